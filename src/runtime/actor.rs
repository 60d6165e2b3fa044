//! Per-actor scheduling loop.
//!
//! Every place and transition runs the same loop: one synchronous turn, then
//! a single suspension point where the loop either observes the shutdown
//! signal or yields (sleeps in slow motion) to let the other actors run.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::net::core::NetError;
use crate::net::ids::ActorId;
use crate::net::observer::Clock;
use crate::net::place::PlaceActor;
use crate::net::structure::ActorKind;
use crate::net::token::TokenRegistry;
use crate::net::transition::TransitionActor;

/// Shared services an actor may use during a turn.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub tokens: Arc<TokenRegistry>,
    pub clock: Clock,
}

impl TurnContext {
    pub fn new(tokens: Arc<TokenRegistry>, clock: Clock) -> Self {
        Self { tokens, clock }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Nothing to do this turn (plain place, or disabled transition).
    Idle,
    Fired,
    /// Enabled at evaluation time but an input was drained before the take.
    RolledBack,
    /// A special place talked to its environment.
    Exchanged { produced: u64, consumed: u64 },
}

pub enum Actor {
    Place(PlaceActor),
    Transition(TransitionActor),
}

impl Actor {
    pub fn id(&self) -> ActorId {
        match self {
            Actor::Place(place) => place.cell().id(),
            Actor::Transition(transition) => transition.id(),
        }
    }

    pub fn kind(&self) -> ActorKind {
        match self {
            Actor::Place(place) => place.cell().kind(),
            Actor::Transition(_) => ActorKind::Transition,
        }
    }

    pub fn ident(&self) -> String {
        match self {
            Actor::Place(place) => place.cell().ident(),
            Actor::Transition(transition) => transition.ident(),
        }
    }

    pub fn turn(&mut self, ctx: &TurnContext) -> Result<TurnOutcome, NetError> {
        match self {
            Actor::Place(place) => Ok(place.turn(ctx)),
            Actor::Transition(transition) => Ok(transition.turn(ctx)?),
        }
    }
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Place(place) => place.fmt(f),
            Actor::Transition(transition) => transition.fmt(f),
        }
    }
}

/// Runs `actor` until the shutdown flag is raised. Returns early only when a
/// turn fails.
pub async fn actor_loop(
    mut actor: Actor,
    ctx: TurnContext,
    mut stop: watch::Receiver<bool>,
    delay: Duration,
) -> Result<(), NetError> {
    let ident = actor.ident();
    log::debug!("{ident}: loop started");
    let mut turns: u64 = 0;
    loop {
        if *stop.borrow() {
            break;
        }
        let outcome = actor.turn(&ctx).inspect_err(|err| {
            log::error!("{ident}: {err}");
        })?;
        turns += 1;
        if outcome != TurnOutcome::Idle {
            log::trace!("{ident}: turn {turns}: {outcome:?}");
        }

        tokio::select! {
            biased;
            _ = stop.wait_for(|stopped| *stopped) => break,
            _ = pause(delay) => {}
        }
    }
    log::debug!("{ident}: loop stopped after {turns} turns");
    Ok(())
}

async fn pause(delay: Duration) {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
}
