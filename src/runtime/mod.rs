//! 运行时: 每个执行体一个协作式循环, 共享一个终止信号.
pub mod actor;
pub mod driver;
pub mod shutdown;

pub use actor::{Actor, TurnContext, TurnOutcome, actor_loop};
pub use driver::run_actors;
pub use shutdown::Shutdown;
