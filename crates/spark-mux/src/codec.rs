//! 负载编解码契约与内置实现。
//!
//! 会话对负载类型一无所知：出站方向由 [`PayloadEncoder`] 把负载写入帧缓冲，
//! 入站方向由 [`PayloadDecoder`] 把已经完成分帧的字节还原为负载。两个方向可以使用
//! 不同的负载类型。

#[cfg(feature = "json")]
use bytes::BufMut;
use bytes::{Bytes, BytesMut};

use crate::error::{MuxError, Result};

/// 出站负载编码器。
///
/// # 契约 (What)
/// - 只允许向 `dst` 追加字节，不得读取或截断已有内容（帧头已写在前面）；
/// - 失败时返回 [`MuxError::Encode`]，帧编码器会回滚本帧已追加的字节。
pub trait PayloadEncoder<T>: Send + Sync + 'static {
    fn encode(&self, payload: &T, dst: &mut BytesMut) -> Result<()>;
}

/// 入站负载解码器。
///
/// # 契约 (What)
/// - `src` 恰好是一帧的负载部分，可能为空；
/// - 失败时返回 [`MuxError::Decode`]，读游标不会前移。
pub trait PayloadDecoder<T>: Send + Sync + 'static {
    fn decode(&self, src: Bytes) -> Result<T>;
}

/// 原样透传字节的编解码器。
#[derive(Clone, Copy, Debug, Default)]
pub struct BytesCodec;

impl PayloadEncoder<Bytes> for BytesCodec {
    fn encode(&self, payload: &Bytes, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(payload);
        Ok(())
    }
}

impl PayloadDecoder<Bytes> for BytesCodec {
    fn decode(&self, src: Bytes) -> Result<Bytes> {
        Ok(src)
    }
}

/// UTF-8 文本编解码器，解码时拒绝非法序列。
#[derive(Clone, Copy, Debug, Default)]
pub struct Utf8Codec;

impl PayloadEncoder<String> for Utf8Codec {
    fn encode(&self, payload: &String, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(payload.as_bytes());
        Ok(())
    }
}

impl PayloadDecoder<String> for Utf8Codec {
    fn decode(&self, src: Bytes) -> Result<String> {
        String::from_utf8(src.to_vec()).map_err(MuxError::decode)
    }
}

/// 基于 `serde_json` 的结构化负载编解码器。
#[cfg(feature = "json")]
pub struct JsonCodec<T> {
    _marker: core::marker::PhantomData<fn() -> T>,
}

#[cfg(feature = "json")]
impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: core::marker::PhantomData,
        }
    }
}

#[cfg(feature = "json")]
impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "json")]
impl<T> PayloadEncoder<T> for JsonCodec<T>
where
    T: serde::Serialize + 'static,
{
    fn encode(&self, payload: &T, dst: &mut BytesMut) -> Result<()> {
        serde_json::to_writer(dst.writer(), payload).map_err(MuxError::encode)
    }
}

#[cfg(feature = "json")]
impl<T> PayloadDecoder<T> for JsonCodec<T>
where
    T: serde::de::DeserializeOwned + 'static,
{
    fn decode(&self, src: Bytes) -> Result<T> {
        serde_json::from_slice(&src).map_err(MuxError::decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_codec_rejects_invalid_sequences() {
        let err = Utf8Codec
            .decode(Bytes::from_static(&[0xff, 0xfe]))
            .expect_err("非法 UTF-8 必须解码失败");
        assert_eq!(err.code(), "spark.mux.payload.decode_failed");
    }

    #[test]
    fn bytes_codec_appends_without_touching_prefix() {
        let mut dst = BytesMut::from(&b"head"[..]);
        BytesCodec
            .encode(&Bytes::from_static(b"body"), &mut dst)
            .expect("encode");
        assert_eq!(&dst[..], b"headbody");
    }

    #[cfg(feature = "json")]
    #[test]
    fn json_codec_reports_malformed_documents() {
        let codec = JsonCodec::<Vec<u32>>::new();
        let mut dst = BytesMut::new();
        codec.encode(&vec![1, 2, 3], &mut dst).expect("encode");
        assert_eq!(codec.decode(dst.freeze()).expect("decode"), vec![1, 2, 3]);
        assert!(codec.decode(Bytes::from_static(b"[1,")).is_err());
    }
}
