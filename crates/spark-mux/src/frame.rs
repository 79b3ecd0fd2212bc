//! 帧布局：`[u32 大端帧体长度][标识字节][负载字节]`。
//!
//! # 设计动机（Why）
//! - 字节流本身没有消息边界，长度前缀让读端无需理解负载即可切分消息；
//! - 帧体长度 = 标识长度 + 负载长度，因此空负载依然是合法帧。
//!
//! # 契约说明（What）
//! - 编码：帧体超过 `max_frame_len` 时返回 [`MuxError::FrameTooLarge`]，
//!   目标缓冲回滚到编码前的长度；
//! - 解码：缓冲不足一帧返回 `Ok(None)`；标识与负载都解码成功后才从缓冲中移除该帧。

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{PayloadDecoder, PayloadEncoder};
use crate::error::{MuxError, Result};
use crate::id::{MessageId, MessageIdCodec};

/// 长度前缀所占字节数。
pub const LENGTH_PREFIX_LEN: usize = 4;

/// 携带标识的消息，出站与入站共用。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrappedMessage<T> {
    pub id: MessageId,
    pub payload: T,
}

impl<T> WrappedMessage<T> {
    pub fn new(id: MessageId, payload: T) -> Self {
        Self { id, payload }
    }

    /// 拆出 `(标识, 负载)`。
    pub fn into_parts(self) -> (MessageId, T) {
        (self.id, self.payload)
    }
}

/// 出站帧编码器。
pub struct FrameEncoder<T> {
    ids: Arc<dyn MessageIdCodec>,
    payload: Arc<dyn PayloadEncoder<T>>,
    max_frame_len: usize,
}

impl<T: 'static> FrameEncoder<T> {
    pub fn new(
        ids: Arc<dyn MessageIdCodec>,
        payload: Arc<dyn PayloadEncoder<T>>,
        max_frame_len: usize,
    ) -> Self {
        Self {
            ids,
            payload,
            max_frame_len,
        }
    }

    /// 将一条消息编码为完整帧并追加到 `dst`。
    pub fn encode(&self, message: &WrappedMessage<T>, dst: &mut BytesMut) -> Result<()> {
        let start = dst.len();
        dst.put_u32(0);
        self.ids.encode(message.id, dst);
        if let Err(err) = self.payload.encode(&message.payload, dst) {
            dst.truncate(start);
            return Err(err);
        }

        let body_len = dst.len() - start - LENGTH_PREFIX_LEN;
        let prefix = match u32::try_from(body_len) {
            Ok(prefix) if body_len <= self.max_frame_len => prefix,
            _ => {
                dst.truncate(start);
                return Err(MuxError::FrameTooLarge {
                    len: body_len,
                    max: self.max_frame_len,
                });
            }
        };
        dst[start..start + LENGTH_PREFIX_LEN].copy_from_slice(&prefix.to_be_bytes());
        Ok(())
    }
}

/// 入站帧解码器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 读游标只能在一帧完整解码后前移：解码失败时帧仍留在缓冲中，调用方看到的是
///   确定性的错误而不是被悄悄吞掉的一帧。
///
/// ## 逻辑 (How)
/// 1. 窥视长度前缀，先做上下界检查，防止恶意长度触发超大分配；
/// 2. 帧未到齐时仅预留剩余容量并返回 `Ok(None)`；
/// 3. 帧到齐后从切片解码标识，再复制负载交给负载解码器；
/// 4. 全部成功后才 `advance` 整帧。
///
/// ## 注意事项 (Trade-offs)
/// - 第 3 步复制一次负载，换取失败时缓冲保持原状。
pub struct FrameDecoder<T> {
    ids: Arc<dyn MessageIdCodec>,
    payload: Arc<dyn PayloadDecoder<T>>,
    max_frame_len: usize,
}

impl<T: 'static> FrameDecoder<T> {
    pub fn new(
        ids: Arc<dyn MessageIdCodec>,
        payload: Arc<dyn PayloadDecoder<T>>,
        max_frame_len: usize,
    ) -> Self {
        Self {
            ids,
            payload,
            max_frame_len,
        }
    }

    /// 尝试从缓冲头部解码一帧。
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<WrappedMessage<T>>> {
        if src.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }
        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_LEN]);
        let body_len = u32::from_be_bytes(prefix) as usize;

        if body_len > self.max_frame_len {
            return Err(MuxError::FrameTooLarge {
                len: body_len,
                max: self.max_frame_len,
            });
        }
        let id_len = self.ids.encoded_len();
        if body_len < id_len {
            return Err(MuxError::FrameTooShort {
                len: body_len,
                id_len,
            });
        }

        let frame_len = LENGTH_PREFIX_LEN + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let id_end = LENGTH_PREFIX_LEN + id_len;
        let id = self.ids.decode(&src[LENGTH_PREFIX_LEN..id_end])?;
        let payload = self
            .payload
            .decode(Bytes::copy_from_slice(&src[id_end..frame_len]))?;
        src.advance(frame_len);
        Ok(Some(WrappedMessage::new(id, payload)))
    }
}
