//! 网的构建与运行入口.
//!
//! 构建分两个阶段: 先向 [`PtRegistry`] 登记库所/变迁描述并连接弧,
//! 得到注册表分配的标识符与默认名称; 再调用 [`PtRegistry::build`] 生成不可变的 [`Net`],
//! 其中每个执行体对应一个可运行的调度循环.
use std::collections::HashSet;
use std::sync::Arc as Shared;

use indexmap::IndexMap;
use itertools::Itertools;
use thiserror::Error;

use crate::config::SimConfig;
use crate::net::ids::ActorId;
use crate::net::observer::{Clock, Observer, ObserverRecord, VerificationError};
use crate::net::place::{PlaceActor, PlaceCell, PlaceSpec};
use crate::net::registry::{Labelled, Registry};
use crate::net::structure::{ActorKind, Arc, ArcDirection, Weight};
use crate::net::token::{Label, TokenRegistry};
use crate::net::topology::{EdgeInfo, NodeInfo, Topology};
use crate::net::transition::{ArcEnd, TransitionActor, TransitionSpec};
use crate::runtime::actor::{Actor, TurnContext};
use crate::runtime::driver;
use crate::runtime::shutdown::Shutdown;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("arc {from:?} -> {to:?} has weight {weight}, arc weights must be at least 1")]
    InvalidWeight {
        from: ActorId,
        to: ActorId,
        weight: Weight,
    },
    #[error(
        "arc {from:?} ({from_kind}) -> {to:?} ({to_kind}) must join a place and a transition"
    )]
    InvalidArcDirection {
        from: ActorId,
        to: ActorId,
        from_kind: ActorKind,
        to_kind: ActorKind,
    },
    #[error("weights {w1}, {w2}, {w3} overflow the token budget of the net")]
    WeightOverflow { w1: Weight, w2: Weight, w3: Weight },
    #[error("actor {0:?} is not registered")]
    UnknownActor(ActorId),
    #[error("verification failed: {0}")]
    Verification(#[from] VerificationError),
    #[error("actor {actor} panicked")]
    ActorPanicked { actor: String },
}

enum ActorSpec {
    Place(PlaceSpec),
    Transition(TransitionSpec),
}

struct Entry {
    name: String,
    kind: ActorKind,
    label: Label,
    spec: ActorSpec,
}

impl Labelled for Entry {
    fn label(&self) -> Label {
        self.label
    }
}

/// Petri 网连通性诊断报告
#[derive(Debug, Clone, Default)]
pub struct DiagnosticReport {
    /// 孤立库所（无任何连接的弧）
    pub isolated_places: Vec<(ActorId, String)>,
    /// 孤立变迁（无任何连接的弧）
    pub isolated_transitions: Vec<(ActorId, String)>,
    pub warnings: Vec<String>,
    pub total_places: usize,
    pub total_transitions: usize,
}

impl DiagnosticReport {
    pub fn has_issues(&self) -> bool {
        !self.isolated_places.is_empty()
            || !self.isolated_transitions.is_empty()
            || !self.warnings.is_empty()
    }

    pub fn log(&self) {
        if !self.has_issues() {
            log::info!(
                "PT net connectivity check passed: {} places, {} transitions",
                self.total_places,
                self.total_transitions
            );
            return;
        }
        log::warn!(
            "=== PT net connectivity report: {} places, {} transitions ===",
            self.total_places,
            self.total_transitions
        );
        for (id, name) in &self.isolated_places {
            log::warn!("  isolated place [{}] {}", id, name);
        }
        for (id, name) in &self.isolated_transitions {
            log::warn!("  isolated transition [{}] {}", id, name);
        }
        for warning in &self.warnings {
            log::warn!("  - {}", warning);
        }
    }
}

/// Builder-side registry of places and transitions.
pub struct PtRegistry {
    registry: Registry<Entry>,
    arcs: Vec<Arc>,
    tokens: Shared<TokenRegistry>,
    clock: Clock,
    shutdown: Shutdown,
    config: SimConfig,
}

impl PtRegistry {
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    pub fn with_config(config: SimConfig) -> Self {
        Self {
            registry: Registry::new(),
            arcs: Vec::new(),
            tokens: Shared::new(TokenRegistry::new()),
            clock: Clock::start(),
            shutdown: Shutdown::new(),
            config,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Handle that stops the net once it runs; callbacks may capture it.
    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn tokens(&self) -> Shared<TokenRegistry> {
        Shared::clone(&self.tokens)
    }

    pub fn add_place(&mut self, spec: PlaceSpec) -> ActorId {
        let kind = spec.kind();
        let label = spec.label;
        let name = spec.name.clone();
        self.register(name, kind, label, ActorSpec::Place(spec))
    }

    pub fn add_transition(&mut self, spec: TransitionSpec) -> ActorId {
        let label = spec.label;
        let name = spec.name.clone();
        self.register(name, ActorKind::Transition, label, ActorSpec::Transition(spec))
    }

    fn register(
        &mut self,
        name: Option<String>,
        kind: ActorKind,
        label: Label,
        spec: ActorSpec,
    ) -> ActorId {
        let entry = Entry {
            name: name.unwrap_or_default(),
            kind,
            label,
            spec,
        };
        let verbose = self.config.verbose;
        self.registry.register_with(entry, |id, entry| {
            if entry.name.is_empty() {
                entry.name = format!("{}{}", kind.name_prefix(), id);
            }
            if verbose {
                log::debug!("Registered: {}({}) [{}]", entry.name, id, kind);
            }
        })
    }

    fn entry(&self, id: ActorId) -> Result<&Entry, NetError> {
        self.registry.get(id).ok_or(NetError::UnknownActor(id))
    }

    pub fn name_of(&self, id: ActorId) -> Option<&str> {
        self.registry.get(id).map(|entry| entry.name.as_str())
    }

    pub fn kind_of(&self, id: ActorId) -> Option<ActorKind> {
        self.registry.get(id).map(|entry| entry.kind)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Registered actors as `(id, name, kind)`, in spawn order.
    pub fn actors(&self) -> impl Iterator<Item = (ActorId, &str, ActorKind)> {
        self.registry
            .entries(None)
            .map(|(id, entry)| (id, entry.name.as_str(), entry.kind))
    }

    /// Connects `from` to `to` with a weight-1 generic arc and returns `to`
    /// so that calls can be chained.
    pub fn connect(&mut self, from: ActorId, to: ActorId) -> Result<ActorId, NetError> {
        self.connect_weighted(from, to, 1, Label::GENERIC)
    }

    pub fn connect_weighted(
        &mut self,
        from: ActorId,
        to: ActorId,
        weight: Weight,
        label: Label,
    ) -> Result<ActorId, NetError> {
        let from_kind = self.entry(from)?.kind;
        let to_kind = self.entry(to)?.kind;
        if weight < 1 {
            return Err(NetError::InvalidWeight { from, to, weight });
        }
        let direction =
            ArcDirection::between(from_kind, to_kind).ok_or(NetError::InvalidArcDirection {
                from,
                to,
                from_kind,
                to_kind,
            })?;
        let arc = match direction {
            ArcDirection::PlaceToTransition => Arc::new(from, to, weight, label, direction),
            ArcDirection::TransitionToPlace => Arc::new(to, from, weight, label, direction),
        };
        log::trace!("connected {:?}", arc);
        self.arcs.push(arc);
        Ok(to)
    }

    pub fn arcs(&self) -> &[Arc] {
        &self.arcs
    }

    /// Arcs ending at `id`, in connection order.
    pub fn input_arcs(&self, id: ActorId) -> impl Iterator<Item = &Arc> {
        self.arcs.iter().filter(move |arc| arc.destination() == id)
    }

    /// Arcs starting at `id`, in connection order.
    pub fn output_arcs(&self, id: ActorId) -> impl Iterator<Item = &Arc> {
        self.arcs.iter().filter(move |arc| arc.source() == id)
    }

    pub fn topology(&self) -> Topology {
        let mut topology = Topology::new();
        for (id, entry) in self.registry.entries(None) {
            let initial_tokens = match &entry.spec {
                ActorSpec::Place(spec) => spec.initial_tokens.values().sum(),
                ActorSpec::Transition(_) => 0,
            };
            topology.add_node(NodeInfo {
                id,
                name: entry.name.clone(),
                kind: entry.kind,
                initial_tokens,
            });
        }
        for arc in &self.arcs {
            topology.add_arc(
                arc.source(),
                arc.destination(),
                EdgeInfo {
                    weight: arc.weight,
                    label: arc.label,
                },
            );
        }
        topology
    }

    /// Graphviz description of the current topology.
    pub fn generate_graph(&self, net_name: &str) -> String {
        self.topology().generate_graph(net_name)
    }

    /// 诊断信息：检测孤立节点、无输入库所的变迁以及永远得不到令牌的库所.
    pub fn diagnose_connectivity(&self) -> DiagnosticReport {
        let topology = self.topology();
        let mut report = DiagnosticReport::default();

        for node in topology.nodes() {
            let inputs = topology.input_count(node.id);
            let outputs = topology.output_count(node.id);
            match node.kind {
                ActorKind::Transition => {
                    report.total_transitions += 1;
                    if inputs == 0 && outputs == 0 {
                        report
                            .isolated_transitions
                            .push((node.id, node.name.clone()));
                    } else if inputs == 0 {
                        report.warnings.push(format!(
                            "transition '{}' (id={}) has no input place and fires every turn",
                            node.name, node.id
                        ));
                    }
                }
                ActorKind::Place | ActorKind::SpecialPlace => {
                    report.total_places += 1;
                    if inputs == 0 && outputs == 0 && node.kind == ActorKind::Place {
                        report.isolated_places.push((node.id, node.name.clone()));
                    } else if inputs == 0
                        && node.initial_tokens == 0
                        && node.kind == ActorKind::Place
                    {
                        report.warnings.push(format!(
                            "place '{}' (id={}) has no input arc and no initial tokens, it never holds a token",
                            node.name, node.id
                        ));
                    }
                }
            }
        }
        report
    }

    /// Finalises the net: creates the shared token pools, fills initial
    /// tokens, wires the runtime arcs and prepares one actor per entry.
    pub fn build(self) -> Result<Net, NetError> {
        let report = self.diagnose_connectivity();
        report.log();
        let topology = self.topology();

        let Self {
            registry,
            arcs,
            tokens,
            clock,
            shutdown,
            config,
        } = self;

        let mut places: IndexMap<ActorId, Shared<PlaceCell>> = IndexMap::new();
        let mut observers = Vec::new();
        for (id, entry) in registry.entries(None) {
            let ActorSpec::Place(spec) = &entry.spec else {
                continue;
            };
            if let Some(observer) = &spec.observer {
                observer.attach(&entry.name);
                observers.push((id, entry.name.clone(), entry.kind, Shared::clone(observer)));
            }
            let cell = PlaceCell::new(id, entry.name.clone(), entry.kind, spec.observer.clone());
            for (label, count) in &spec.initial_tokens {
                cell.put(tokens.create_many(*label, *count));
            }
            if let Some(observer) = &spec.observer {
                observer.save(&entry.name, clock.now())?;
            }
            places.insert(id, Shared::new(cell));
        }

        let ends = |id: ActorId, direction: ArcDirection| -> Vec<ArcEnd> {
            arcs.iter()
                .filter(|arc| arc.transition == id && arc.direction == direction)
                .filter_map(|arc| {
                    places.get(&arc.place).map(|place| ArcEnd {
                        place: Shared::clone(place),
                        weight: arc.weight,
                        label: arc.label,
                    })
                })
                .collect()
        };

        let mut actors = Vec::with_capacity(registry.len());
        for (id, entry) in registry.into_entries() {
            let Entry {
                name, kind, spec, ..
            } = entry;
            match spec {
                ActorSpec::Place(spec) => {
                    let Some(cell) = places.get(&id) else {
                        continue;
                    };
                    actors.push(Actor::Place(PlaceActor::new(
                        Shared::clone(cell),
                        spec.producer,
                        spec.consumer,
                    )));
                }
                ActorSpec::Transition(spec) => {
                    if let Some(observer) = &spec.observer {
                        observer.attach(&name);
                        observers.push((id, name.clone(), kind, Shared::clone(observer)));
                    }
                    let inputs = ends(id, ArcDirection::PlaceToTransition);
                    let outputs = ends(id, ArcDirection::TransitionToPlace);
                    actors.push(Actor::Transition(TransitionActor::new(
                        id,
                        name,
                        inputs,
                        outputs,
                        spec.observer,
                    )));
                }
            }
        }
        observers.sort_by_key(|(id, ..)| *id);

        Ok(Net {
            actors,
            places,
            observers,
            topology,
            ctx: TurnContext::new(tokens, clock),
            shutdown,
            config,
        })
    }
}

impl Default for PtRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A finalised net, ready to run.
pub struct Net {
    actors: Vec<Actor>,
    places: IndexMap<ActorId, Shared<PlaceCell>>,
    observers: Vec<(ActorId, String, ActorKind, Shared<Observer>)>,
    topology: Topology,
    ctx: TurnContext,
    shutdown: Shutdown,
    config: SimConfig,
}

impl Net {
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn terminate(&self) {
        self.shutdown.terminate();
    }

    pub fn tokens(&self) -> &Shared<TokenRegistry> {
        &self.ctx.tokens
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn place(&self, id: ActorId) -> Option<&Shared<PlaceCell>> {
        self.places.get(&id)
    }

    pub fn place_by_name(&self, name: &str) -> Option<&Shared<PlaceCell>> {
        self.places.values().find(|place| place.name() == name)
    }

    pub fn places(&self) -> impl Iterator<Item = &Shared<PlaceCell>> {
        self.places.values()
    }

    /// Total number of tokens of `label` held by every place.
    pub fn token_count(&self, label: Label) -> Weight {
        self.places.values().map(|place| place.count(label)).sum()
    }

    /// Actors still waiting to be run.
    pub fn actors(&self) -> &[Actor] {
        &self.actors
    }

    pub fn generate_graph(&self, net_name: &str) -> String {
        self.topology.generate_graph(net_name)
    }

    /// Every observer's records tagged with the owning actor's name and
    /// sorted by timestamp.
    pub fn merged_records(&self, ignore_special_places: bool) -> Vec<(String, ObserverRecord)> {
        let mut seen = HashSet::new();
        self.observers
            .iter()
            .filter(|(_, _, kind, _)| !(ignore_special_places && *kind == ActorKind::SpecialPlace))
            .filter(|(_, _, _, observer)| seen.insert(Shared::as_ptr(observer)))
            .flat_map(|(_, name, _, observer)| {
                observer
                    .records()
                    .into_iter()
                    .map(move |record| (name.clone(), record))
            })
            .sorted_by(|a, b| a.1.timestamp.total_cmp(&b.1.timestamp))
            .collect()
    }

    /// Runs one loop per actor until the net is terminated, see
    /// [`driver::run_actors`]. Actors are consumed by the run; running the same
    /// net again returns immediately.
    pub async fn run(&mut self) -> Result<(), NetError> {
        let actors = std::mem::take(&mut self.actors);
        if actors.is_empty() {
            log::warn!("net has no actors left to run");
            return Ok(());
        }
        driver::run_actors(
            actors,
            self.ctx.clone(),
            &self.shutdown,
            self.config.loop_delay(),
        )
        .await
    }
}
