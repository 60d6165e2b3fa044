//! 变迁: 可激发判定与带回滚的原子发射.
//!
//! 一个调度回合内的状态: Idle → Evaluating → (Firing) → Idle.
//!
//! * Evaluating: 对每条输入弧检查源库所中该标签的令牌数 `≥ weight`;
//!   任一不满足即回到 Idle, 不产生副作用.
//! * Firing: 按连接顺序对每条输入弧调用 `try_take`. 判定与取令牌之间
//!   可能被其它变迁抢先取走令牌, 因此任何一次 `try_take` 失败都要把
//!   本次已取得的令牌按相反顺序放回原库所队首, 保证发射要么全部发生, 要么完全不发生.
//! * 成功后按连接顺序向每条输出弧的目标库所放入 `weight` 个令牌:
//!   优先转移本次消耗的同标签令牌, 不足部分由令牌注册表新建, 多余的令牌被销毁.
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::net::ids::ActorId;
use crate::net::observer::{Observer, VerificationError};
use crate::net::place::PlaceCell;
use crate::net::structure::Weight;
use crate::net::token::{Label, Token};
use crate::runtime::actor::{TurnContext, TurnOutcome};

#[derive(Debug, Default)]
pub struct TransitionSpec {
    pub(crate) name: Option<String>,
    pub(crate) label: Label,
    pub(crate) observer: Option<Arc<Observer>>,
}

impl TransitionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new().name(name)
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn label(mut self, label: Label) -> Self {
        self.label = label;
        self
    }

    pub fn observer(mut self, observer: Arc<Observer>) -> Self {
        self.observer = Some(observer);
        self
    }
}

/// Runtime end of an arc: the place on the other side, how many tokens and
/// which label move per firing.
#[derive(Clone)]
pub struct ArcEnd {
    pub place: Arc<PlaceCell>,
    pub weight: Weight,
    pub label: Label,
}

impl fmt::Debug for ArcEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArcEnd")
            .field("place", &self.place.ident())
            .field("weight", &self.weight)
            .field("label", &self.label)
            .finish()
    }
}

pub struct TransitionActor {
    id: ActorId,
    name: String,
    inputs: Vec<ArcEnd>,
    outputs: Vec<ArcEnd>,
    observer: Option<Arc<Observer>>,
    /// Observers of touched places, inputs first, each place once.
    watched: Vec<Arc<Observer>>,
    fired: u64,
}

impl TransitionActor {
    pub(crate) fn new(
        id: ActorId,
        name: String,
        inputs: Vec<ArcEnd>,
        outputs: Vec<ArcEnd>,
        observer: Option<Arc<Observer>>,
    ) -> Self {
        let mut seen: Vec<ActorId> = Vec::new();
        let mut watched = Vec::new();
        for end in inputs.iter().chain(outputs.iter()) {
            if seen.contains(&end.place.id()) {
                continue;
            }
            seen.push(end.place.id());
            if let Some(observer) = end.place.observer() {
                watched.push(Arc::clone(observer));
            }
        }
        Self {
            id,
            name,
            inputs,
            outputs,
            observer,
            watched,
            fired: 0,
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ident(&self) -> String {
        format!("{}({})", self.name, self.id)
    }

    pub fn inputs(&self) -> &[ArcEnd] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ArcEnd] {
        &self.outputs
    }

    /// Number of completed firings.
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Every input place holds at least `weight` tokens of the arc's label.
    pub fn is_enabled(&self) -> bool {
        self.inputs
            .iter()
            .all(|arc| arc.place.count(arc.label) >= arc.weight)
    }

    pub fn turn(&mut self, ctx: &TurnContext) -> Result<TurnOutcome, VerificationError> {
        if !self.is_enabled() {
            return Ok(TurnOutcome::Idle);
        }

        let Some(consumed) = self.take_inputs() else {
            log::debug!("{}: input drained before firing, rolled back", self.ident());
            return Ok(TurnOutcome::RolledBack);
        };

        if let Some(observer) = &self.observer {
            for (arc, tokens) in self.inputs.iter().zip(&consumed) {
                observer.inc_token_count(arc.label, tokens.len() as i64);
            }
        }

        self.produce(consumed, ctx);
        self.fired += 1;
        log::trace!("{}: fired (#{})", self.ident(), self.fired);

        self.record(ctx)?;
        Ok(TurnOutcome::Fired)
    }

    /// Takes the tokens of every input arc in connection order. On the first
    /// failure the tokens already taken are returned and `None` is reported.
    fn take_inputs(&self) -> Option<Vec<Vec<Token>>> {
        let mut taken: Vec<Vec<Token>> = Vec::with_capacity(self.inputs.len());
        for arc in &self.inputs {
            match arc.place.try_take(arc.label, arc.weight) {
                Some(tokens) => taken.push(tokens),
                None => {
                    self.rollback(taken);
                    return None;
                }
            }
        }
        Some(taken)
    }

    fn rollback(&self, taken: Vec<Vec<Token>>) {
        for (arc, tokens) in self.inputs.iter().zip(taken).rev() {
            arc.place.restore(arc.label, tokens);
        }
    }

    fn produce(&self, consumed: Vec<Vec<Token>>, ctx: &TurnContext) {
        let mut pool: IndexMap<Label, VecDeque<Token>> = IndexMap::new();
        for (arc, tokens) in self.inputs.iter().zip(consumed) {
            pool.entry(arc.label).or_default().extend(tokens);
        }

        for arc in &self.outputs {
            let queue = pool.entry(arc.label).or_default();
            let moved = queue.len().min(arc.weight as usize);
            let mut tokens: Vec<Token> = queue.drain(..moved).collect();
            let missing = arc.weight - moved as Weight;
            if missing > 0 {
                tokens.extend(ctx.tokens.create_many(arc.label, missing));
            }
            arc.place.put(tokens);
        }

        let destroyed: usize = pool.values().map(VecDeque::len).sum();
        if destroyed > 0 {
            log::trace!("{}: {} consumed tokens destroyed", self.ident(), destroyed);
        }
    }

    fn record(&self, ctx: &TurnContext) -> Result<(), VerificationError> {
        let now = ctx.clock.now();
        for observer in &self.watched {
            observer.save(&self.name, now)?;
        }
        if let Some(observer) = &self.observer {
            observer.save(&self.name, now)?;
        }
        Ok(())
    }
}

impl fmt::Debug for TransitionActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionActor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::observer::{Clock, Expectation, ObserverConfig};
    use crate::net::structure::ActorKind;
    use crate::net::token::TokenRegistry;

    fn place(id: u32, observer: Option<Arc<Observer>>) -> Arc<PlaceCell> {
        Arc::new(PlaceCell::new(
            ActorId::new(id),
            format!("p{id}"),
            ActorKind::Place,
            observer,
        ))
    }

    fn end(place: &Arc<PlaceCell>, weight: Weight) -> ArcEnd {
        ArcEnd {
            place: Arc::clone(place),
            weight,
            label: Label::GENERIC,
        }
    }

    fn ctx() -> TurnContext {
        TurnContext::new(Arc::new(TokenRegistry::new()), Clock::start())
    }

    #[test]
    fn weighted_drain_into_sink() {
        let ctx = ctx();
        let src = place(1, None);
        let sink = place(3, None);
        src.put(ctx.tokens.create_many(Label::GENERIC, 4));
        let mut t = TransitionActor::new(
            ActorId::new(2),
            "t2".into(),
            vec![end(&src, 2)],
            vec![end(&sink, 1)],
            None,
        );

        let mut outcomes = Vec::new();
        for _ in 0..4 {
            outcomes.push(t.turn(&ctx).unwrap());
        }
        assert_eq!(
            outcomes,
            vec![
                TurnOutcome::Fired,
                TurnOutcome::Fired,
                TurnOutcome::Idle,
                TurnOutcome::Idle
            ]
        );
        assert_eq!(src.total(), 0);
        assert_eq!(sink.total(), 2);
        assert_eq!(t.fired(), 2);
    }

    #[test]
    fn unmet_arc_blocks_until_tokens_arrive() {
        let ctx = ctx();
        let a = place(1, None);
        let b = place(2, None);
        let out = place(4, None);
        a.put(ctx.tokens.create_many(Label::GENERIC, 5));
        b.put(ctx.tokens.create_many(Label::GENERIC, 2));
        let mut t = TransitionActor::new(
            ActorId::new(3),
            "t3".into(),
            vec![end(&a, 2), end(&b, 3)],
            vec![end(&out, 1)],
            None,
        );

        assert!(!t.is_enabled());
        assert_eq!(t.turn(&ctx).unwrap(), TurnOutcome::Idle);
        assert_eq!((a.total(), b.total(), out.total()), (5, 2, 0));

        b.put(ctx.tokens.create_many(Label::GENERIC, 1));
        assert_eq!(t.turn(&ctx).unwrap(), TurnOutcome::Fired);
        assert_eq!((a.total(), b.total(), out.total()), (3, 0, 1));
    }

    #[test]
    fn failed_take_rolls_back_earlier_arcs() {
        let ctx = ctx();
        let shared = place(1, None);
        let out = place(3, None);
        let tokens = ctx.tokens.create_many(Label::GENERIC, 3);
        shared.put(tokens.clone());
        // each arc alone is satisfied, both together are not
        let mut t = TransitionActor::new(
            ActorId::new(2),
            "t2".into(),
            vec![end(&shared, 2), end(&shared, 2)],
            vec![end(&out, 1)],
            None,
        );

        assert!(t.is_enabled());
        assert_eq!(t.turn(&ctx).unwrap(), TurnOutcome::RolledBack);
        assert_eq!(shared.tokens(Label::GENERIC), tokens);
        assert_eq!(out.total(), 0);
        assert_eq!(t.fired(), 0);
    }

    #[test]
    fn consumed_tokens_are_transferred_before_minting() {
        let ctx = ctx();
        let src = place(1, None);
        let dst = place(3, None);
        let original = ctx.tokens.create_many(Label::GENERIC, 2);
        src.put(original.clone());
        let mut t = TransitionActor::new(
            ActorId::new(2),
            "t2".into(),
            vec![end(&src, 2)],
            vec![end(&dst, 3)],
            None,
        );

        t.turn(&ctx).unwrap();
        let moved = dst.tokens(Label::GENERIC);
        assert_eq!(moved.len(), 3);
        assert_eq!(moved[..2], original[..]);
        assert!(moved[2].id() > original[1].id());
    }

    #[test]
    fn labels_are_not_mixed() {
        let ctx = ctx();
        let src = place(1, None);
        let dst = place(3, None);
        src.put(ctx.tokens.create_many(Label::new(7), 2));
        let mut t = TransitionActor::new(
            ActorId::new(2),
            "t2".into(),
            vec![end(&src, 1)],
            vec![end(&dst, 1)],
            None,
        );
        assert_eq!(t.turn(&ctx).unwrap(), TurnOutcome::Idle);

        t.inputs[0].label = Label::new(7);
        t.outputs[0].label = Label::new(7);
        assert_eq!(t.turn(&ctx).unwrap(), TurnOutcome::Fired);
        assert_eq!(dst.count(Label::new(7)), 1);
        assert_eq!(dst.count(Label::GENERIC), 0);
    }

    #[test]
    fn conservation_with_balanced_weights() {
        let ctx = ctx();
        let a = place(1, None);
        let b = place(2, None);
        a.put(ctx.tokens.create_many(Label::GENERIC, 6));
        let mut forward = TransitionActor::new(
            ActorId::new(3),
            "t3".into(),
            vec![end(&a, 3)],
            vec![end(&b, 2), end(&a, 1)],
            None,
        );
        let mut backward = TransitionActor::new(
            ActorId::new(4),
            "t4".into(),
            vec![end(&b, 1)],
            vec![end(&a, 1)],
            None,
        );
        for _ in 0..10 {
            forward.turn(&ctx).unwrap();
            assert_eq!(a.total() + b.total(), 6);
            backward.turn(&ctx).unwrap();
            assert_eq!(a.total() + b.total(), 6);
        }
    }

    #[test]
    fn firing_records_touched_places() {
        let ctx = ctx();
        let expected = Expectation::new().counts(Label::GENERIC, [2, 0]);
        let watch = Arc::new(Observer::comparative(ObserverConfig::default(), expected, None));
        watch.attach("p1");
        let sink_watch = Arc::new(Observer::new(ObserverConfig::default()));
        let fired_watch = Arc::new(Observer::new(ObserverConfig::default()));
        let src = place(1, Some(Arc::clone(&watch)));
        let sink = place(3, Some(Arc::clone(&sink_watch)));
        src.put(ctx.tokens.create_many(Label::GENERIC, 4));
        let mut t = TransitionActor::new(
            ActorId::new(2),
            "t2".into(),
            vec![end(&src, 2)],
            vec![end(&sink, 1)],
            Some(Arc::clone(&fired_watch)),
        );

        t.turn(&ctx).unwrap();
        t.turn(&ctx).unwrap();
        assert_eq!(watch.history(Label::GENERIC), vec![2, 0]);
        assert_eq!(sink_watch.history(Label::GENERIC), vec![1, 2]);
        assert_eq!(fired_watch.history(Label::GENERIC), vec![2, 4]);
        assert!(!watch.is_comparing());
        assert!(
            watch
                .records()
                .iter()
                .all(|record| record.requester == "t2")
        );
    }

    #[test]
    fn verification_failure_surfaces_from_turn() {
        let ctx = ctx();
        let expected = Expectation::new().counts(Label::GENERIC, [1]);
        let watch = Arc::new(Observer::comparative(ObserverConfig::default(), expected, None));
        let src = place(1, Some(Arc::clone(&watch)));
        watch.attach("p1");
        src.put(ctx.tokens.create_many(Label::GENERIC, 4));
        let mut t = TransitionActor::new(
            ActorId::new(2),
            "t2".into(),
            vec![end(&src, 2)],
            Vec::new(),
            None,
        );

        let err = t.turn(&ctx).unwrap_err();
        assert!(matches!(
            err,
            VerificationError::Mismatch {
                expected: 1,
                actual: 2,
                ..
            }
        ));
    }
}
