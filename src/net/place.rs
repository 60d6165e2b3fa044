//! 库所: 按标签划分的 FIFO 令牌队列.
//!
//! 所有队列操作都在一次加锁内完成检查与修改, 且锁从不跨越挂起点持有;
//! 因此单次 `try_take` 相对其它执行体是原子的.
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;

use crate::net::ids::ActorId;
use crate::net::observer::Observer;
use crate::net::structure::{ActorKind, Weight};
use crate::net::token::{Label, Token};
use crate::runtime::actor::{TurnContext, TurnOutcome};

/// Injects a token of the returned label into a special place. Invoked once
/// per scheduling turn.
pub type Producer = Box<dyn FnMut(&PlaceCell) -> Option<Label> + Send>;

/// Receives the token popped from a special place in a scheduling turn.
pub type Consumer = Box<dyn FnMut(&PlaceCell, Token) + Send>;

/// Construction options of a place. A place with a producer or a consumer
/// becomes a special place.
#[derive(Default)]
pub struct PlaceSpec {
    pub(crate) name: Option<String>,
    pub(crate) label: Label,
    pub(crate) initial_tokens: IndexMap<Label, u64>,
    pub(crate) producer: Option<Producer>,
    pub(crate) consumer: Option<Consumer>,
    pub(crate) observer: Option<Arc<Observer>>,
}

impl PlaceSpec {
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

    /// Registry label of the place itself (not of its tokens).
    pub fn label(mut self, label: Label) -> Self {
        self.label = label;
        self
    }

    pub fn initial_tokens(mut self, label: Label, count: u64) -> Self {
        *self.initial_tokens.entry(label).or_insert(0) += count;
        self
    }

    pub fn producer<F>(mut self, producer: F) -> Self
    where
        F: FnMut(&PlaceCell) -> Option<Label> + Send + 'static,
    {
        self.producer = Some(Box::new(producer));
        self
    }

    pub fn consumer<F>(mut self, consumer: F) -> Self
    where
        F: FnMut(&PlaceCell, Token) + Send + 'static,
    {
        self.consumer = Some(Box::new(consumer));
        self
    }

    pub fn observer(mut self, observer: Arc<Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn kind(&self) -> ActorKind {
        if self.producer.is_some() || self.consumer.is_some() {
            ActorKind::SpecialPlace
        } else {
            ActorKind::Place
        }
    }
}

impl fmt::Debug for PlaceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaceSpec")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("initial_tokens", &self.initial_tokens)
            .finish()
    }
}

/// Shared token pools of a registered place.
pub struct PlaceCell {
    id: ActorId,
    name: String,
    kind: ActorKind,
    tokens: Mutex<IndexMap<Label, VecDeque<Token>>>,
    observer: Option<Arc<Observer>>,
}

impl PlaceCell {
    pub(crate) fn new(
        id: ActorId,
        name: String,
        kind: ActorKind,
        observer: Option<Arc<Observer>>,
    ) -> Self {
        Self {
            id,
            name,
            kind,
            tokens: Mutex::new(IndexMap::new()),
            observer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<Label, VecDeque<Token>>> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, label: Label, delta: i64) {
        if let Some(observer) = &self.observer {
            observer.inc_token_count(label, delta);
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ActorKind {
        self.kind
    }

    pub fn ident(&self) -> String {
        format!("{}({})", self.name, self.id)
    }

    pub fn observer(&self) -> Option<&Arc<Observer>> {
        self.observer.as_ref()
    }

    pub fn count(&self, label: Label) -> Weight {
        self.lock().get(&label).map_or(0, |queue| queue.len() as Weight)
    }

    pub fn total(&self) -> Weight {
        self.lock().values().map(|queue| queue.len() as Weight).sum()
    }

    /// Per-label queue lengths, labels in first-use order.
    pub fn counts(&self) -> Vec<(Label, Weight)> {
        self.lock()
            .iter()
            .map(|(label, queue)| (*label, queue.len() as Weight))
            .collect()
    }

    /// Copy of the queue of `label`, oldest first.
    pub fn tokens(&self, label: Label) -> Vec<Token> {
        self.lock()
            .get(&label)
            .map(|queue| queue.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Removes exactly `count` oldest tokens of `label`, or nothing when fewer
    /// are present.
    pub fn try_take(&self, label: Label, count: Weight) -> Option<Vec<Token>> {
        let mut pools = self.lock();
        let available = pools.get(&label).map_or(0, |queue| queue.len() as Weight);
        if available < count {
            return None;
        }
        if count == 0 {
            return Some(Vec::new());
        }
        let taken: Vec<Token> = pools
            .get_mut(&label)
            .map(|queue| queue.drain(..count as usize).collect())
            .unwrap_or_default();
        self.notify(label, -(count as i64));
        Some(taken)
    }

    /// Appends tokens to the tail of their label's queue.
    pub fn put(&self, tokens: impl IntoIterator<Item = Token>) {
        let mut pools = self.lock();
        let mut added: IndexMap<Label, i64> = IndexMap::new();
        for token in tokens {
            pools.entry(token.label()).or_default().push_back(token);
            *added.entry(token.label()).or_insert(0) += 1;
        }
        for (label, delta) in added {
            self.notify(label, delta);
        }
    }

    /// Puts tokens taken by an aborted firing back at the head of the queue,
    /// keeping their original order.
    pub(crate) fn restore(&self, label: Label, tokens: Vec<Token>) {
        if tokens.is_empty() {
            return;
        }
        let mut pools = self.lock();
        let count = tokens.len() as i64;
        let queue = pools.entry(label).or_default();
        for token in tokens.into_iter().rev() {
            queue.push_front(token);
        }
        self.notify(label, count);
    }

    /// Pops the oldest token of the first non-empty label queue.
    pub fn pop_front(&self) -> Option<Token> {
        let mut pools = self.lock();
        let token = pools.values_mut().find_map(VecDeque::pop_front)?;
        self.notify(token.label(), -1);
        Some(token)
    }
}

impl fmt::Debug for PlaceCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaceCell")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("counts", &self.counts())
            .finish()
    }
}

/// Scheduling unit of a place. A plain place has no autonomous behaviour;
/// a special place polls its producer and consumer once per turn.
pub struct PlaceActor {
    cell: Arc<PlaceCell>,
    producer: Option<Producer>,
    consumer: Option<Consumer>,
}

impl PlaceActor {
    pub(crate) fn new(
        cell: Arc<PlaceCell>,
        producer: Option<Producer>,
        consumer: Option<Consumer>,
    ) -> Self {
        Self {
            cell,
            producer,
            consumer,
        }
    }

    pub fn cell(&self) -> &Arc<PlaceCell> {
        &self.cell
    }

    pub fn turn(&mut self, ctx: &TurnContext) -> TurnOutcome {
        let mut produced = 0;
        let mut consumed = 0;

        if let Some(producer) = self.producer.as_mut() {
            if let Some(label) = producer(&self.cell) {
                let token = ctx.tokens.create(label);
                log::trace!("{}: produced {:?}", self.cell.ident(), token);
                self.cell.put([token]);
                produced += 1;
            }
        }

        if let Some(consumer) = self.consumer.as_mut() {
            if let Some(token) = self.cell.pop_front() {
                log::trace!("{}: consuming {:?}", self.cell.ident(), token);
                consumer(&self.cell, token);
                consumed += 1;
            }
        }

        if produced + consumed == 0 {
            TurnOutcome::Idle
        } else {
            TurnOutcome::Exchanged { produced, consumed }
        }
    }
}

impl fmt::Debug for PlaceActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaceActor")
            .field("place", &self.cell.ident())
            .field("producer", &self.producer.is_some())
            .field("consumer", &self.consumer.is_some())
            .finish()
    }
}
