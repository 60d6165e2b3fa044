//! Discrete-event execution engine for place/transition nets.
//!
//! Nets are assembled with [`net::PtRegistry`], finalised into a [`net::Net`]
//! and run on tokio with one cooperative loop per place and transition.

pub mod config;
pub mod demo;
pub mod net;
pub mod options;
pub mod runtime;

pub use config::SimConfig;
pub use net::{Net, NetError, PtRegistry};
pub use runtime::Shutdown;
