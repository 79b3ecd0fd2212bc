//! 写调度：多生产者队列 + 活跃标志 + 单实例排空循环。
//!
//! - [`WorkQueue`]：无界 MPSC FIFO；
//! - [`ActivityFlag`]：Idle/Active 令牌，仅通过 CAS / swap 修改；
//! - [`DispatchState`]：两者组合出的无运行时协议，可被 loom 直接驱动；
//! - [`DispatchScheduler`]：把协议接到 Tokio 上，负责把排空循环派发到独立任务。

mod flag;
mod queue;
mod scheduler;

pub use flag::ActivityFlag;
pub use queue::WorkQueue;
pub use scheduler::{DispatchScheduler, DispatchState, DrainExecutor, DrainStep};
