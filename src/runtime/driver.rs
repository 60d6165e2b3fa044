//! Spawns one task per actor and waits for all of them.
use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::net::core::NetError;
use crate::runtime::actor::{Actor, TurnContext, actor_loop};
use crate::runtime::shutdown::Shutdown;

/// Runs every actor loop concurrently until `shutdown` is raised.
///
/// The first failing loop raises `shutdown` so that the others wind down, and
/// its error is returned once every task has finished. A panicking actor is
/// reported as [`NetError::ActorPanicked`].
pub async fn run_actors(
    actors: Vec<Actor>,
    ctx: TurnContext,
    shutdown: &Shutdown,
    delay: Duration,
) -> Result<(), NetError> {
    let mut tasks = JoinSet::new();
    let mut idents = HashMap::with_capacity(actors.len());
    log::info!("starting {} actor loops", actors.len());

    for actor in actors {
        let ident = actor.ident();
        let handle = tasks.spawn(actor_loop(actor, ctx.clone(), shutdown.subscribe(), delay));
        idents.insert(handle.id(), ident);
    }

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let err = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err,
            Err(join_err) if join_err.is_panic() => {
                let actor = idents
                    .get(&join_err.id())
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string());
                log::error!("actor {actor} panicked");
                NetError::ActorPanicked { actor }
            }
            Err(_) => continue,
        };
        shutdown.terminate();
        first_error.get_or_insert(err);
    }

    log::info!("all actor loops finished");
    first_error.map_or(Ok(()), Err)
}
