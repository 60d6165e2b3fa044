//! Canned nets run by `pn-run`.
//!
//! Every net stops itself: a consumer or a comparative observer raises the
//! registry's [`Shutdown`](crate::runtime::Shutdown) once the expected
//! behaviour has been seen.
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::SimConfig;
use crate::net::{
    ComparisonEnd, Expectation, Label, NetError, Observer, ObserverConfig, PlaceCell, PlaceSpec,
    PtRegistry, TransitionSpec, Weight,
};
use crate::runtime::Shutdown;

/// Firings of the last transition of the two-input net.
pub const TWO_INPUT_ROUNDS: Weight = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetKind {
    NTester,
    TwoInput,
    Drain,
}

/// `p1 -(n)-> t1 -> p2`, with `t1 -(n-1)-> p1` feeding part of the tokens
/// back. `p1` starts with `2n` tokens and loses one per firing; its observer
/// expects the counts `2n, 2n-1, .., n`. The special place `p2` terminates
/// the net after consuming `n + 1` tokens. Needs `n >= 2`.
pub fn n_tester(config: SimConfig, n: Weight) -> Result<PtRegistry, NetError> {
    let mut reg = PtRegistry::with_config(config);
    let shutdown = reg.shutdown();

    let expected = Expectation::new().counts(Label::GENERIC, (n..=2 * n).rev());
    let o1 = Arc::new(Observer::comparative(
        ObserverConfig::from(reg.config()),
        expected,
        None,
    ));
    let p1 = reg.add_place(
        PlaceSpec::named("p1")
            .initial_tokens(Label::GENERIC, 2 * n)
            .observer(o1),
    );
    let t1 = reg.add_transition(TransitionSpec::named("t1"));

    let mut remaining = n + 1;
    let p2 = reg.add_place(PlaceSpec::named("p2").consumer(move |place: &PlaceCell, token| {
        log::debug!("{}: consumed {:?}", place.ident(), token);
        remaining = remaining.saturating_sub(1);
        if remaining == 0 {
            shutdown.terminate();
        }
    }));

    reg.connect_weighted(p1, t1, n, Label::GENERIC)?;
    reg.connect(t1, p2)?;
    reg.connect_weighted(t1, p1, n - 1, Label::GENERIC)?;
    Ok(reg)
}

/// Two producers feed `t1` through `p10` (weight `w1`) and `p11` (weight
/// `w2`); `t1` fills `p2`, which `t2` drains `w3` tokens at a time into the
/// consumer `p3`. The producers stop after exactly enough tokens for
/// [`TWO_INPUT_ROUNDS`] firings of `t2`. `t1` and `t2` count the tokens they
/// consume; the net terminates once both counts reached their final value.
pub fn two_input_places(
    config: SimConfig,
    w1: Weight,
    w2: Weight,
    w3: Weight,
) -> Result<PtRegistry, NetError> {
    let overflow = || NetError::WeightOverflow { w1, w2, w3 };
    let rounds = w3.checked_mul(TWO_INPUT_ROUNDS).ok_or_else(overflow)?;
    let per_round = w1.checked_add(w2).ok_or_else(overflow)?;
    let budget1 = w1.checked_mul(rounds).ok_or_else(overflow)?;
    let budget2 = w2.checked_mul(rounds).ok_or_else(overflow)?;
    rounds.checked_mul(per_round).ok_or_else(overflow)?;

    let mut reg = PtRegistry::with_config(config);
    let observer_config = ObserverConfig::from(reg.config());
    let shutdown = reg.shutdown();
    let pending = Arc::new(AtomicUsize::new(2));
    let on_end = |shutdown: Shutdown, pending: Arc<AtomicUsize>| -> ComparisonEnd {
        Box::new(move |observer: &Observer| {
            log::info!("{}: all expected firings seen", observer.ident());
            if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                shutdown.terminate();
            }
        })
    };

    let p00 = reg.add_place(PlaceSpec::named("p00").producer(budget(budget1)));
    let p01 = reg.add_place(PlaceSpec::named("p01").producer(budget(budget2)));
    let p10 = reg.add_place(
        PlaceSpec::named("p10").observer(Arc::new(Observer::new(observer_config.clone()))),
    );
    let p11 = reg.add_place(
        PlaceSpec::named("p11").observer(Arc::new(Observer::new(observer_config.clone()))),
    );
    let p2 = reg.add_place(
        PlaceSpec::named("p2").observer(Arc::new(Observer::new(observer_config.clone()))),
    );
    let p3 = reg.add_place(
        PlaceSpec::named("p3")
            .consumer(|_: &PlaceCell, _| {})
            .observer(Arc::new(Observer::new(observer_config.clone()))),
    );

    let t00 = reg.add_transition(TransitionSpec::named("t00"));
    let t01 = reg.add_transition(TransitionSpec::named("t01"));
    let t1_counts = (1..=rounds).map(move |i| i * per_round);
    let t1 = reg.add_transition(TransitionSpec::named("t1").observer(Arc::new(
        Observer::comparative(
            observer_config.clone(),
            Expectation::new().counts(Label::GENERIC, t1_counts),
            Some(on_end(shutdown.clone(), Arc::clone(&pending))),
        ),
    )));
    let t2_counts = (1..=TWO_INPUT_ROUNDS).map(|i| i * w3);
    let t2 = reg.add_transition(TransitionSpec::named("t2").observer(Arc::new(
        Observer::comparative(
            observer_config,
            Expectation::new().counts(Label::GENERIC, t2_counts),
            Some(on_end(shutdown, pending)),
        ),
    )));

    reg.connect(p00, t00)?;
    reg.connect(t00, p10)?;
    reg.connect(p01, t01)?;
    reg.connect(t01, p11)?;
    reg.connect_weighted(p10, t1, w1, Label::GENERIC)?;
    reg.connect_weighted(p11, t1, w2, Label::GENERIC)?;
    reg.connect(t1, p2)?;
    reg.connect_weighted(p2, t2, w3, Label::GENERIC)?;
    reg.connect(t2, p3)?;
    Ok(reg)
}

/// `p1` holds 4 tokens drained two at a time by `t1` into the sink `p2`.
/// The observer of `p1` expects `4, 2, 0` and terminates the net after the
/// last value.
pub fn weighted_drain(config: SimConfig) -> Result<PtRegistry, NetError> {
    weighted_drain_expecting(config, [4, 2, 0])
}

fn weighted_drain_expecting(
    config: SimConfig,
    expected: impl IntoIterator<Item = Weight>,
) -> Result<PtRegistry, NetError> {
    let mut reg = PtRegistry::with_config(config);
    let shutdown = reg.shutdown();
    let observer = Observer::comparative(
        ObserverConfig::from(reg.config()),
        Expectation::new().counts(Label::GENERIC, expected),
        Some(Box::new(move |_: &Observer| shutdown.terminate())),
    );
    let p1 = reg.add_place(
        PlaceSpec::named("p1")
            .initial_tokens(Label::GENERIC, 4)
            .observer(Arc::new(observer)),
    );
    let t1 = reg.add_transition(TransitionSpec::named("t1"));
    let p2 = reg.add_place(PlaceSpec::named("p2"));
    reg.connect_weighted(p1, t1, 2, Label::GENERIC)?;
    reg.connect(t1, p2)?;
    Ok(reg)
}

/// Producer handing out `tokens` generic tokens, one per turn.
fn budget(tokens: Weight) -> impl FnMut(&PlaceCell) -> Option<Label> + Send + 'static {
    let mut left = tokens;
    move |_| {
        if left == 0 {
            return None;
        }
        left -= 1;
        Some(Label::GENERIC)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::net::VerificationError;

    const GUARD: Duration = Duration::from_secs(20);

    #[tokio::test]
    async fn n_tester_counts_down_and_stops() {
        let n = 3;
        let mut net = n_tester(SimConfig::default(), n).unwrap().build().unwrap();
        let guard = net.shutdown().terminate_after(GUARD);
        net.run().await.unwrap();
        guard.abort();

        let p1 = net.place_by_name("p1").unwrap();
        assert_eq!(p1.count(Label::GENERIC), n - 1);
        assert_eq!(net.place_by_name("p2").unwrap().total(), 0);

        let observer = p1.observer().unwrap();
        assert!(!observer.is_comparing());
        let history = observer.history(Label::GENERIC);
        assert_eq!(history[..=n as usize], [6, 5, 4, 3]);
        let records = observer.records();
        assert_eq!(records[0].requester, "p1");
        assert!(records[1..].iter().all(|r| r.requester == "t1"));
    }

    #[test]
    fn n_tester_needs_feedback_arc() {
        let err = n_tester(SimConfig::default(), 1).err().unwrap();
        assert!(matches!(err, NetError::InvalidWeight { weight: 0, .. }));
    }

    #[test]
    fn n_tester_graph() {
        let gv = n_tester(SimConfig::default(), 2)
            .unwrap()
            .generate_graph("Net");
        assert!(gv.contains("p1_0 -> t1_0 [fontsize=\"20\",label=\"2\""));
        assert!(gv.contains("t1_0 -> p1_0 [fontsize=\"20\",label=\"\""));
        assert!(gv.contains("t1_0 -> p2_0"));
    }

    #[tokio::test]
    async fn weighted_drain_empties_source() {
        let mut net = weighted_drain(SimConfig::default()).unwrap().build().unwrap();
        let guard = net.shutdown().terminate_after(GUARD);
        net.run().await.unwrap();
        guard.abort();

        assert_eq!(net.place_by_name("p1").unwrap().total(), 0);
        assert_eq!(net.place_by_name("p2").unwrap().count(Label::GENERIC), 2);
        let merged = net.merged_records(true);
        let counts: Vec<_> = merged.iter().map(|(_, r)| r.count(Label::GENERIC)).collect();
        assert_eq!(counts, vec![4, 2, 0]);

        // a finished net has nothing left to run
        net.run().await.unwrap();
    }

    #[tokio::test]
    async fn unexpected_count_fails_the_run() {
        let mut net = weighted_drain_expecting(SimConfig::default(), [4, 2, 1])
            .unwrap()
            .build()
            .unwrap();
        let guard = net.shutdown().terminate_after(GUARD);
        let err = net.run().await.unwrap_err();
        guard.abort();

        assert!(net.shutdown().is_terminated());
        match err {
            NetError::Verification(VerificationError::Mismatch {
                observer,
                record,
                expected,
                actual,
                ..
            }) => {
                assert_eq!(observer, "p1");
                assert_eq!((record, expected, actual), (2, 1, 0));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn two_input_places_deliver_every_round() {
        let (w1, w2, w3) = (2, 1, 3);
        let mut net = two_input_places(SimConfig::default(), w1, w2, w3)
            .unwrap()
            .build()
            .unwrap();
        let guard = net.shutdown().terminate_after(GUARD);
        net.run().await.unwrap();
        guard.abort();

        for name in ["p00", "p01", "p10", "p11", "p2"] {
            assert_eq!(net.place_by_name(name).unwrap().total(), 0, "{name}");
        }
        assert!(net.place_by_name("p3").unwrap().total() <= TWO_INPUT_ROUNDS);
        assert_eq!(
            net.tokens().minted(Label::GENERIC),
            (w1 + w2) * w3 * TWO_INPUT_ROUNDS
        );
    }

    #[test]
    fn two_input_rejects_overflowing_weights() {
        let huge = 1 << 32;
        for (w1, w2, w3) in [(huge, 1, huge), (Weight::MAX, 1, 1), (1, 1, Weight::MAX / 5)] {
            let err = two_input_places(SimConfig::default(), w1, w2, w3).err().unwrap();
            assert!(
                matches!(err, NetError::WeightOverflow { .. }),
                "{w1},{w2},{w3}: {err}"
            );
        }
        assert!(two_input_places(SimConfig::default(), 10_000, 10_000, 10_000).is_ok());
    }

    #[tokio::test]
    async fn slow_motion_still_terminates() {
        let config = SimConfig {
            slow_motion: true,
            loop_delay_ms: 1,
            ..SimConfig::default()
        };
        let mut net = weighted_drain(config).unwrap().build().unwrap();
        let guard = net.shutdown().terminate_after(GUARD);
        net.run().await.unwrap();
        guard.abort();
        assert_eq!(net.place_by_name("p2").unwrap().count(Label::GENERIC), 2);
    }
}
