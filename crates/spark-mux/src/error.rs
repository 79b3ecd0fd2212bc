//! 多路复用会话的统一错误域。
//!
//! # 设计动机（Why）
//! - 写路径、读路径与传输引导产生的故障需要合流为同一个错误类型，调用方才能对
//!   `write`/`read` 的结果做一致的 `?` 传播与分类处理；
//! - 每个错误携带稳定错误码（`spark.mux.*`），日志与告警只依赖错误码而非文案。
//!
//! # 契约说明（What）
//! - [`MuxError::code`] 返回稳定错误码；[`MuxError::category`] 给出处置建议；
//! - I/O 故障通过 [`OperationKind`] 标注失败的操作（读/写/刷新/绑定/接受/建连/配置），
//!   传输实现 crate 可以定义自己的 `OperationKind` 常量复用该通道。

use std::borrow::Cow;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// 错误处理统一使用的 `Result` 别名。
pub type Result<T, E = MuxError> = core::result::Result<T, E>;

/// 负载编解码器返回的底层错误。
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub const READ: OperationKind = OperationKind {
    code: "spark.mux.io.read_failed",
    message: "frame read",
};
pub const WRITE: OperationKind = OperationKind {
    code: "spark.mux.io.write_failed",
    message: "frame write",
};
pub const FLUSH: OperationKind = OperationKind {
    code: "spark.mux.io.flush_failed",
    message: "frame flush",
};

/// 重试建议，携带推荐的退避时长。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryAdvice {
    wait: Duration,
}

impl RetryAdvice {
    /// 在 `wait` 之后重试。
    pub const fn after(wait: Duration) -> Self {
        Self { wait }
    }

    /// 推荐的退避时长。
    pub fn wait(&self) -> Duration {
        self.wait
    }
}

/// 错误的主要处置策略。
///
/// - `Retryable`：调用方可在退避后重新发起 `write`；核心本身从不自动重试；
/// - `NonRetryable`：输入或协议层面的错误，重试不会改变结果；
/// - `Closed`：会话或流已经结束，后续操作会得到相同结论。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    Retryable(RetryAdvice),
    NonRetryable,
    Closed,
}

/// `spark-mux` 的错误类型。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 写失败只允许沿着对应消息的完成句柄回传，因此错误必须能跨线程移动
///   （`Send + Sync + 'static`），并在被唯一的等待者取走后交给调用方；
/// - 读路径的协议错误（帧过长、截断、解码失败）与流结束/取消严格区分：
///   流结束与取消通过 [`crate::ReadOutcome`] 表达，不会出现在这里。
///
/// ## 契约 (What)
/// - 所有变体都有稳定错误码，见 [`MuxError::code`]；
/// - `Io` 变体保留原始 [`io::Error`] 作为 `source`，便于调用方下钻；
/// - 编解码错误以 [`BoxError`] 包裹调用方提供的错误类型。
///
/// ## 注意事项 (Trade-offs)
/// - 错误不实现 `Clone`：每个故障只有一个观察者（对应写操作的等待者），
///   持续损坏的传输会让后续每一次写各自产生独立的错误实例。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MuxError {
    /// 传输层 I/O 失败。
    #[error("{op}: {source}", op = .kind.message)]
    Io {
        kind: OperationKind,
        #[source]
        source: io::Error,
    },

    /// 帧体长度超过配置上限。
    #[error("frame body of {len} bytes exceeds the limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    /// 帧体长度不足以容纳消息标识。
    #[error("frame body of {len} bytes cannot hold a {id_len}-byte message id")]
    FrameTooShort { len: usize, id_len: usize },

    /// 入站流在帧中间结束。
    #[error("inbound stream ended inside a frame ({buffered} bytes buffered)")]
    TruncatedFrame { buffered: usize },

    /// 标识编解码失败。
    #[error("message id codec: {0}")]
    IdCodec(Cow<'static, str>),

    /// 标识源无法给出新的标识。
    #[error("message id source: {0}")]
    IdSource(Cow<'static, str>),

    /// 出站负载编码失败。
    #[error("payload encode failed: {0}")]
    Encode(#[source] BoxError),

    /// 入站负载解码失败。
    #[error("payload decode failed: {0}")]
    Decode(#[source] BoxError),

    /// 写请求在被执行前随会话一起被丢弃。
    #[error("write was abandoned before the drain loop executed it")]
    Abandoned,

    /// 完成句柄的结果已经被取走。
    #[error("completion outcome was already observed")]
    AlreadyObserved,

    /// 同一会话上已有一个读操作在进行。
    #[error("another read is already in flight on this session")]
    ReaderBusy,

    /// 配置非法或缺少运行时。
    #[error("invalid configuration: {0}")]
    Config(Cow<'static, str>),
}

impl MuxError {
    /// 将 I/O 错误映射为带操作语义的框架错误。
    pub fn io(kind: OperationKind, source: io::Error) -> Self {
        Self::Io { kind, source }
    }

    /// 包装负载编码错误。
    pub fn encode(source: impl Into<BoxError>) -> Self {
        Self::Encode(source.into())
    }

    /// 包装负载解码错误。
    pub fn decode(source: impl Into<BoxError>) -> Self {
        Self::Decode(source.into())
    }

    /// 构造配置错误。
    pub fn config(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Config(reason.into())
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { kind, .. } => kind.code,
            Self::FrameTooLarge { .. } => "spark.mux.frame.too_large",
            Self::FrameTooShort { .. } => "spark.mux.frame.too_short",
            Self::TruncatedFrame { .. } => "spark.mux.frame.truncated",
            Self::IdCodec(_) => "spark.mux.id.codec",
            Self::IdSource(_) => "spark.mux.id.source_failed",
            Self::Encode(_) => "spark.mux.payload.encode_failed",
            Self::Decode(_) => "spark.mux.payload.decode_failed",
            Self::Abandoned => "spark.mux.write.abandoned",
            Self::AlreadyObserved => "spark.mux.completion.already_observed",
            Self::ReaderBusy => "spark.mux.read.busy",
            Self::Config(_) => "spark.mux.config.invalid",
        }
    }

    /// 结构化错误分类，驱动调用方的退避或关闭策略。
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Io { source, .. } => categorize_io_error(source),
            Self::TruncatedFrame { .. } | Self::Abandoned => ErrorCategory::Closed,
            Self::ReaderBusy => {
                ErrorCategory::Retryable(RetryAdvice::after(Duration::from_millis(1)))
            }
            Self::IdSource(_) => {
                ErrorCategory::Retryable(RetryAdvice::after(Duration::from_millis(10)))
            }
            _ => ErrorCategory::NonRetryable,
        }
    }

    /// 是否建议调用方重试。
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Retryable(_))
    }
}

fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::WouldBlock | ErrorKind::Interrupted => {
            ErrorCategory::Retryable(RetryAdvice::after(Duration::from_millis(5)))
        }
        ErrorKind::TimedOut | ErrorKind::WriteZero => {
            ErrorCategory::Retryable(RetryAdvice::after(Duration::from_millis(10)))
        }
        ErrorKind::ConnectionRefused | ErrorKind::AddrInUse | ErrorKind::AddrNotAvailable => {
            ErrorCategory::Retryable(RetryAdvice::after(Duration::from_millis(50)))
        }
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => ErrorCategory::Closed,
        _ => ErrorCategory::NonRetryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_keep_operation_code_and_source() {
        let err = MuxError::io(WRITE, io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
        assert_eq!(err.code(), "spark.mux.io.write_failed");
        assert_eq!(err.category(), ErrorCategory::Closed);
        assert_eq!(err.to_string(), "frame write: peer gone");
        assert!(std::error::Error::source(&err).is_some(), "I/O 错误必须保留底层原因");
    }

    #[test]
    fn refused_connections_are_retryable() {
        let err = MuxError::io(READ, io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(err.is_retryable());
        match err.category() {
            ErrorCategory::Retryable(advice) => {
                assert_eq!(advice.wait(), Duration::from_millis(50))
            }
            other => panic!("unexpected category {other:?}"),
        }
    }

    #[test]
    fn protocol_errors_are_not_retryable() {
        let err = MuxError::FrameTooLarge { len: 10, max: 4 };
        assert_eq!(err.code(), "spark.mux.frame.too_large");
        assert!(!err.is_retryable());
    }
}
