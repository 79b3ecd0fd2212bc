#![doc = r#"
# spark-mux

## 设计动机（Why）
- **定位**：让任意数量的独立生产者共享一条有序的双向字节流连接，
  每条写按提交顺序落线，并各自得到异步的完成通知（成功时携带关联标识）。
- **核心难点**：写调度由“活跃标志 + 队列判空”两处独立内存共同决定，
  是典型的丢失唤醒场景；本 crate 以“发布 Idle → 全屏障 → 复查 → 夺回”的序列关闭该窗口，
  既不会重复派发排空循环，也不会遗留已入队的工作。

## 核心契约（What）
- 任意时刻每个会话至多一个排空循环在执行写；
- 写入传输的顺序与工作项入队顺序一致，不重排、不并行；
- 每个成功入队的工作项恰好执行一次；
- 每个完成句柄至多离开 `Pending` 一次，结果只被观察一次；
- 单条写失败只通知该写的调用方，后续写照常执行。

## 实现策略（How）
- [`dispatch`]：无锁 MPSC 队列（`crossbeam-queue`）与原子活跃标志，
  排空循环通过 Tokio 运行时句柄派发到独立任务，绝不在生产者的调用栈上执行；
- [`completion`]：固定容量的句柄池，句柄拆为结算端与等待端，两端释放后自动归还；
- [`frame`] / [`io`]：`[u32 长度][标识][负载]` 的帧布局与面向 `AsyncRead`/`AsyncWrite` 的读写器；
- [`session`]：组合上述部件，对外暴露 `write` / `read`。

## 风险与考量（Trade-offs）
- 读侧不做请求/响应关联，入站帧按到达顺序交给唯一的读者；
- 不提供流控、重传与重连；持续损坏的传输会让每条写各自失败一次。
"#]
#![deny(unsafe_code)]

pub mod codec;
pub mod completion;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod id;
pub mod io;
pub mod session;

pub use codec::{BytesCodec, PayloadDecoder, PayloadEncoder, Utf8Codec};
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use completion::{Completion, CompletionPool, CompletionSender, PoolStats};
pub use config::SessionConfig;
pub use error::{ErrorCategory, MuxError, OperationKind, Result, RetryAdvice};
pub use frame::WrappedMessage;
pub use id::{BigEndianIdCodec, MessageId, MessageIdCodec, MessageIdSource, SequentialIdSource};
pub use session::{MultiplexingSession, ReadOutcome, SessionBuilder};
