//! 多路复用会话：写路径的编排与独立的读路径。

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::{BytesCodec, PayloadDecoder, PayloadEncoder};
use crate::completion::{Completion, CompletionPool, CompletionSender, PoolStats};
use crate::config::SessionConfig;
use crate::dispatch::{DispatchScheduler, DrainExecutor};
use crate::error::{MuxError, Result};
use crate::frame::{FrameDecoder, FrameEncoder, WrappedMessage};
use crate::id::{BigEndianIdCodec, MessageId, MessageIdCodec, MessageIdSource, SequentialIdSource};
use crate::io::{FrameReader, FrameWriter};

/// 写队列中的一项：已分配标识的消息及其完成句柄的结算端。
pub struct WorkItem<O> {
    message: WrappedMessage<O>,
    completion: CompletionSender,
}

impl<O> WorkItem<O> {
    pub fn new(message: WrappedMessage<O>, completion: CompletionSender) -> Self {
        Self {
            message,
            completion,
        }
    }
}

/// 排空循环唯一的执行动作：写一帧并结算对应句柄。
///
/// # 教案式注释
///
/// ## 契约 (What)
/// - 成功：句柄以实际写出的标识结算为 `Ok(id)`；
/// - 失败：编码或传输错误只结算到本项的句柄，不会中断排空循环；
///   损坏的传输会让后续每一项各自失败一次，这里不做熔断。
///
/// ## 注意事项 (Trade-offs)
/// - 写半边放在 `tokio::sync::Mutex` 中只是为了在 `&self` 上获得 `&mut` 访问：
///   活跃标志保证同一时刻只有一个排空循环，锁永远不会发生争用。
pub struct WriteExecutor<O> {
    writer: Mutex<FrameWriter<O>>,
}

impl<O> WriteExecutor<O> {
    pub fn new(writer: FrameWriter<O>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<O> DrainExecutor for WriteExecutor<O>
where
    O: Send + Sync + 'static,
{
    type Item = WorkItem<O>;

    async fn execute(&self, item: WorkItem<O>) {
        let WorkItem {
            message,
            completion,
        } = item;
        let id = message.id;
        let outcome = self.writer.lock().await.write(&message).await;
        match outcome {
            Ok(()) => {
                trace!(%id, "frame written");
                completion.complete(id);
            }
            Err(error) => {
                warn!(%id, code = error.code(), %error, "write faulted");
                completion.fault(error);
            }
        }
    }
}

/// 一次读取的结果。
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome<I> {
    /// 成功解码的一帧。
    Message(WrappedMessage<I>),
    /// 对端在帧边界处结束了流；此后每次读取都得到 `Closed`。
    Closed,
    /// 会话的读取取消令牌已触发。
    Cancelled,
}

impl<I> ReadOutcome<I> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// 多路复用会话。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 让任意数量的生产者共享一条有序的双向字节流：写按入队顺序落线，
///   每条写各自得到完成通知；读路径与写路径完全解耦。
///
/// ## 契约 (What)
/// - [`MultiplexingSession::write`]：取标识 → 租句柄 → 入队 → 等待结算，返回实际写出的标识；
///   标识源失败时直接返回错误，不会入队；
/// - [`MultiplexingSession::submit`]：同步入队并返回 [`Completion`]，
///   写出顺序在调用返回时即已确定；
/// - [`MultiplexingSession::read`]：解码下一帧；同一时刻只允许一个读者，
///   并发读取得到 [`MuxError::ReaderBusy`]。
///
/// ## 注意事项 (Trade-offs)
/// - 丢弃 `write` 的 future 只会放弃等待，已入队的写仍会执行；
/// - 会话被丢弃时，尚未执行的写以 [`MuxError::Abandoned`] 结算；
///   已在执行中的排空循环会把队列写完后退出。
pub struct MultiplexingSession<I, O>
where
    O: Send + Sync + 'static,
{
    scheduler: DispatchScheduler<WriteExecutor<O>>,
    reader: Mutex<FrameReader<I>>,
    ids: Arc<dyn MessageIdSource>,
    pool: CompletionPool,
    read_cancel: CancellationToken,
}

impl<I, O> MultiplexingSession<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    /// 由标识源分配标识后写出一条消息。
    pub async fn write(&self, payload: O) -> Result<MessageId> {
        let id = self.ids.next().await?;
        self.submit(payload, id).await
    }

    /// 使用调用方给定的标识写出一条消息，绕过标识源。
    pub async fn write_with_id(&self, payload: O, id: MessageId) -> Result<MessageId> {
        self.submit(payload, id).await
    }

    /// 同步入队并返回完成句柄。
    pub fn submit(&self, payload: O, id: MessageId) -> Completion {
        let (sender, completion) = self.pool.rent();
        self.scheduler.schedule(WorkItem::new(WrappedMessage::new(id, payload), sender));
        completion
    }

    /// 读取下一帧。
    pub async fn read(&self) -> Result<ReadOutcome<I>> {
        let mut reader = self.reader.try_lock().map_err(|_| MuxError::ReaderBusy)?;
        tokio::select! {
            biased;
            _ = self.read_cancel.cancelled() => {
                debug!("read cancelled");
                Ok(ReadOutcome::Cancelled)
            }
            frame = reader.read_frame() => match frame? {
                Some(message) => Ok(ReadOutcome::Message(message)),
                None => {
                    debug!("inbound stream closed");
                    Ok(ReadOutcome::Closed)
                }
            },
        }
    }

    /// 触发读取取消：进行中与后续的 `read` 都返回 [`ReadOutcome::Cancelled`]。
    pub fn cancel_reads(&self) {
        self.read_cancel.cancel();
    }

    /// 会话的读取取消令牌。
    pub fn read_cancellation(&self) -> CancellationToken {
        self.read_cancel.clone()
    }

    /// 已入队但尚未被排空循环取出的写数量。
    pub fn pending_writes(&self) -> usize {
        self.scheduler.pending()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

/// 会话构建器，可克隆为模板，为多条连接批量构建会话。
///
/// - 未指定标识源时，每次 `build` 都创建一个从 0 开始的 [`SequentialIdSource`]；
/// - 未指定运行时句柄时使用 `Handle::try_current`，不在运行时内且未指定句柄视为配置错误；
/// - 指定了读取取消令牌时，每个会话持有它的子令牌，取消父令牌会取消所有会话的读取。
pub struct SessionBuilder<I, O> {
    config: SessionConfig,
    encoder: Arc<dyn PayloadEncoder<O>>,
    decoder: Arc<dyn PayloadDecoder<I>>,
    id_codec: Arc<dyn MessageIdCodec>,
    id_source: Option<Arc<dyn MessageIdSource>>,
    runtime: Option<Handle>,
    read_cancel: Option<CancellationToken>,
}

impl<I, O> Clone for SessionBuilder<I, O> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            encoder: Arc::clone(&self.encoder),
            decoder: Arc::clone(&self.decoder),
            id_codec: Arc::clone(&self.id_codec),
            id_source: self.id_source.clone(),
            runtime: self.runtime.clone(),
            read_cancel: self.read_cancel.clone(),
        }
    }
}

impl SessionBuilder<Bytes, Bytes> {
    /// 两个方向都以原始字节为负载。
    pub fn bytes() -> Self {
        Self::new(BytesCodec, BytesCodec)
    }
}

impl<I, O> SessionBuilder<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    pub fn new(encoder: impl PayloadEncoder<O>, decoder: impl PayloadDecoder<I>) -> Self {
        Self {
            config: SessionConfig::default(),
            encoder: Arc::new(encoder),
            decoder: Arc::new(decoder),
            id_codec: Arc::new(BigEndianIdCodec),
            id_source: None,
            runtime: None,
            read_cancel: None,
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_id_source(self, source: impl MessageIdSource) -> Self {
        self.with_shared_id_source(Arc::new(source))
    }

    /// 多个会话共享同一个标识源。
    pub fn with_shared_id_source(mut self, source: Arc<dyn MessageIdSource>) -> Self {
        self.id_source = Some(source);
        self
    }

    pub fn with_id_codec(mut self, codec: impl MessageIdCodec) -> Self {
        self.id_codec = Arc::new(codec);
        self
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_read_cancellation(mut self, token: CancellationToken) -> Self {
        self.read_cancel = Some(token);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// 以给定的读、写半边构建会话。
    pub fn build<R, W>(&self, reader: R, writer: W) -> Result<MultiplexingSession<I, O>>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.config.validate()?;
        let max_frame_len = self.config.max_frame_len();
        let id_len = self.id_codec.encoded_len();
        if max_frame_len < id_len {
            return Err(MuxError::config(format!(
                "max_frame_len {max_frame_len} cannot hold a {id_len}-byte message id"
            )));
        }
        let runtime = match &self.runtime {
            Some(runtime) => runtime.clone(),
            None => Handle::try_current().map_err(|_| {
                MuxError::config("no Tokio runtime in scope; supply one with `with_runtime`")
            })?,
        };

        let encoder = FrameEncoder::new(
            Arc::clone(&self.id_codec),
            Arc::clone(&self.encoder),
            max_frame_len,
        );
        let decoder = FrameDecoder::new(
            Arc::clone(&self.id_codec),
            Arc::clone(&self.decoder),
            max_frame_len,
        );
        let executor = WriteExecutor::new(FrameWriter::new(Box::new(writer), encoder));
        let ids = self
            .id_source
            .clone()
            .unwrap_or_else(|| Arc::new(SequentialIdSource::new()));
        let read_cancel = self
            .read_cancel
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);

        debug!(
            pool_capacity = self.config.completion_pool_capacity(),
            max_frame_len,
            "multiplexing session built"
        );
        Ok(MultiplexingSession {
            scheduler: DispatchScheduler::new(executor, runtime),
            reader: Mutex::new(FrameReader::new(
                Box::new(reader),
                decoder,
                self.config.read_buffer_capacity(),
            )),
            ids,
            pool: CompletionPool::new(self.config.completion_pool_capacity()),
            read_cancel,
        })
    }
}
