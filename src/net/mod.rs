//! # 库所/变迁网（Place/Transition Net）的离散事件执行
//!
//! 网由库所 `P`、变迁 `T` 与带权弧组成. 每条弧 `(p, t)` 或 `(t, p)` 携带权重
//! `w ≥ 1` 与令牌标签 `ℓ`. 对当前标识 `M`：
//!
//! * 变迁 `t` **可激发** 当且仅当对每条输入弧 `(p, t, w, ℓ)` 满足 `M[p][ℓ] ≥ w`；
//! * 变迁 **发射** 时原子地从每条输入弧取走 `w` 个令牌, 任何一条取不足则全部回滚；
//!   随后向每条输出弧放入 `w` 个令牌, 优先转移刚取走的同标签令牌, 不足部分新建.
//!
//! 每个库所与变迁都是一个执行体, 各自运行协作式循环, 直到网被终止.
//! 特殊库所可挂接生产者/消费者回调与外部环境交换令牌, 观察器记录库所的令牌计数.
//!
//! ## 示例
//!
//! ```rust
//! use ptnet_sim::net::*;
//!
//! let mut reg = PtRegistry::new();
//! let p1 = reg.add_place(PlaceSpec::new().initial_tokens(Label::GENERIC, 4));
//! let t1 = reg.add_transition(TransitionSpec::new());
//! let p2 = reg.add_place(PlaceSpec::new());
//! reg.connect_weighted(p1, t1, 2, Label::GENERIC).unwrap();
//! reg.connect(t1, p2).unwrap();
//!
//! let net = reg.build().unwrap();
//! assert_eq!(net.place(p1).unwrap().count(Label::GENERIC), 4);
//! assert!(net.generate_graph("Net").starts_with("digraph Net {"));
//! ```

pub mod core;
pub mod ids;
pub mod io;
pub mod observer;
pub mod place;
pub mod registry;
pub mod structure;
pub mod token;
pub mod topology;
pub mod transition;

pub use core::{DiagnosticReport, Net, NetError, PtRegistry};
pub use ids::{ActorId, TokenId};
pub use observer::{
    Clock, Column, ColumnValue, ComparisonEnd, Count, Expectation, Observer, ObserverConfig,
    ObserverRecord, VerificationError,
};
pub use place::{Consumer, PlaceCell, PlaceSpec, Producer};
pub use registry::{Labelled, Registry};
pub use structure::{ActorKind, Arc, ArcDirection, Weight};
pub use token::{Label, Token, TokenRegistry};
pub use topology::{EdgeInfo, NodeInfo, Topology, TopologyDescription};
pub use transition::{ArcEnd, TransitionSpec};
