//! 消息标识、标识线格式与标识源。
//!
//! # 设计动机（Why）
//! - 每条出站消息在入队前获得一个关联标识，写成功后该标识原样回传给生产者，
//!   作为“已分配且已落线”的确认；
//! - 标识的生成算法与线格式都属于外部协作者：核心只依赖 [`MessageIdSource`] 与
//!   [`MessageIdCodec`] 两个契约，默认实现仅用于开箱即用。
//!
//! # 契约说明（What）
//! - [`MessageId`] 为 4 字节标识，一经分配在消息生命周期内不可变；
//! - 标识源必须在会话生命周期内给出唯一标识；唯一性是前置条件，核心不做校验。

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{MuxError, Result};

/// 4 字节消息关联标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u32);

impl MessageId {
    /// 以原始数值构造标识。
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// 读取原始数值。
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for MessageId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// 标识的线格式编解码契约。
///
/// # 契约 (What)
/// - `encoded_len`：编码后的固定字节数，帧解码据此切分标识与负载；
/// - `encode`：向 `dst` 追加恰好 `encoded_len()` 个字节；
/// - `decode`：`src` 长度恒为 `encoded_len()`，失败返回 [`MuxError::IdCodec`]。
pub trait MessageIdCodec: Send + Sync + 'static {
    fn encoded_len(&self) -> usize;

    fn encode(&self, id: MessageId, dst: &mut BytesMut);

    fn decode(&self, src: &[u8]) -> Result<MessageId>;
}

/// 网络字节序的 4 字节标识编码。
#[derive(Clone, Copy, Debug, Default)]
pub struct BigEndianIdCodec;

impl MessageIdCodec for BigEndianIdCodec {
    fn encoded_len(&self) -> usize {
        4
    }

    fn encode(&self, id: MessageId, dst: &mut BytesMut) {
        dst.put_u32(id.get());
    }

    fn decode(&self, src: &[u8]) -> Result<MessageId> {
        let raw: [u8; 4] = src.try_into().map_err(|_| {
            MuxError::IdCodec(format!("expected 4 id bytes, got {}", src.len()).into())
        })?;
        Ok(MessageId::new(u32::from_be_bytes(raw)))
    }
}

/// 异步标识源。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 标识可能来自本地计数器，也可能来自需要网络往返的分配服务；
///   以异步方法表达后，同步完成与挂起等待两种情况对调用方透明。
///
/// ## 契约 (What)
/// - `next` 成功时返回会话内唯一的新标识；
/// - 失败时 `write` 直接返回该错误，且不会创建任何工作项。
///
/// ## 注意事项 (Trade-offs)
/// - 使用 `async_trait` 保持对象安全，会话以 `Arc<dyn MessageIdSource>` 持有标识源，
///   代价是每次调用一次装箱。
#[async_trait]
pub trait MessageIdSource: Send + Sync + 'static {
    async fn next(&self) -> Result<MessageId>;
}

/// 基于原子计数器的单调标识源，到达 `u32::MAX` 后回绕。
#[derive(Debug, Default)]
pub struct SequentialIdSource {
    next: AtomicU32,
}

impl SequentialIdSource {
    /// 从 0 开始计数。
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// 从指定数值开始计数。
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }
}

#[async_trait]
impl MessageIdSource for SequentialIdSource {
    async fn next(&self) -> Result<MessageId> {
        Ok(MessageId::new(self.next.fetch_add(1, Ordering::Relaxed)))
    }
}
