//! P/T 网静态结构元素：执行体类别、弧与弧方向。
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::net::ids::ActorId;
use crate::net::token::Label;

pub type Weight = u64;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ActorKind {
    Place,
    /// 带 producer/consumer 回调的边界库所.
    SpecialPlace,
    Transition,
}

impl ActorKind {
    pub fn is_place(self) -> bool {
        matches!(self, ActorKind::Place | ActorKind::SpecialPlace)
    }

    /// Prefix of registry-assigned default names.
    pub(crate) fn name_prefix(self) -> &'static str {
        if self.is_place() { "p" } else { "t" }
    }
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ActorKind::Place => "place",
            ActorKind::SpecialPlace => "special place",
            ActorKind::Transition => "transition",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ArcDirection {
    PlaceToTransition,
    TransitionToPlace,
}

impl ArcDirection {
    /// Direction of an arc between two actor kinds, `None` when the arc would
    /// join two places or two transitions.
    pub fn between(from: ActorKind, to: ActorKind) -> Option<Self> {
        match (from.is_place(), to.is_place()) {
            (true, false) => Some(ArcDirection::PlaceToTransition),
            (false, true) => Some(ArcDirection::TransitionToPlace),
            _ => None,
        }
    }
}

/// Static description of a connected arc. The runtime arcs held by
/// transitions are derived from these when the net is built.
#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Arc {
    pub place: ActorId,
    pub transition: ActorId,
    pub weight: Weight,
    pub label: Label,
    pub direction: ArcDirection,
}

impl Arc {
    pub fn new(
        place: ActorId,
        transition: ActorId,
        weight: Weight,
        label: Label,
        direction: ArcDirection,
    ) -> Self {
        Self {
            place,
            transition,
            weight,
            label,
            direction,
        }
    }

    pub fn source(&self) -> ActorId {
        match self.direction {
            ArcDirection::PlaceToTransition => self.place,
            ArcDirection::TransitionToPlace => self.transition,
        }
    }

    pub fn destination(&self) -> ActorId {
        match self.direction {
            ArcDirection::PlaceToTransition => self.transition,
            ArcDirection::TransitionToPlace => self.place,
        }
    }
}

impl fmt::Debug for Arc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arc")
            .field("from", &self.source())
            .field("to", &self.destination())
            .field("weight", &self.weight)
            .field("label", &self.label)
            .finish()
    }
}
