//! 面向传输半边的帧读写器。
//!
//! # 设计动机（Why）
//! - 核心只消费传输的两组能力：读半边的“读下一块”，写半边的“写一块并刷新”；
//!   以 `tokio::io::AsyncRead` / `AsyncWrite` 的 trait 对象承接，TCP、内存管道、
//!   TLS 流都可以直接接入；
//! - 写半边只由排空循环持有，读半边只由当前读者持有，两者互不干扰。

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{self, MuxError, Result};
use crate::frame::{FrameDecoder, FrameEncoder, WrappedMessage};

/// 可发送的读半边。
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// 可发送的写半边。
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// 写半边：逐帧编码、写出并刷新。
pub struct FrameWriter<O> {
    io: BoxedWriter,
    encoder: FrameEncoder<O>,
    scratch: BytesMut,
}

impl<O: 'static> FrameWriter<O> {
    pub fn new(io: BoxedWriter, encoder: FrameEncoder<O>) -> Self {
        Self {
            io,
            encoder,
            scratch: BytesMut::new(),
        }
    }

    /// 写出一条消息；返回时该帧已经完整写入并刷新。
    ///
    /// 失败时本帧可能已部分落线，写半边的后续状态由传输决定；
    /// 暂存缓冲总会被清空，不会把残帧带给下一条消息。
    pub async fn write(&mut self, message: &WrappedMessage<O>) -> Result<()> {
        self.scratch.clear();
        self.encoder.encode(message, &mut self.scratch)?;
        let outcome = self.flush_scratch().await;
        self.scratch.clear();
        outcome
    }

    async fn flush_scratch(&mut self) -> Result<()> {
        self.io
            .write_all(&self.scratch)
            .await
            .map_err(|err| MuxError::io(error::WRITE, err))?;
        self.io
            .flush()
            .await
            .map_err(|err| MuxError::io(error::FLUSH, err))
    }
}

/// 读半边：缓冲读取并逐帧解码。
///
/// # 教案式注释
///
/// ## 契约 (What)
/// - `Ok(Some(frame))`：成功解码一帧，读游标恰好越过该帧；
/// - `Ok(None)`：对端在帧边界处结束了流，此后每次调用都返回 `Ok(None)`；
/// - `Err(TruncatedFrame)`：对端在帧中间结束了流；
/// - 取消安全：在 `read_frame` 的任意 `.await` 处丢弃 future，已读入的字节仍留在缓冲中，
///   下一次调用从原处继续。
pub struct FrameReader<I> {
    io: BoxedReader,
    decoder: FrameDecoder<I>,
    buffer: BytesMut,
    read_chunk: usize,
    eof: bool,
}

impl<I: 'static> FrameReader<I> {
    pub fn new(io: BoxedReader, decoder: FrameDecoder<I>, read_chunk: usize) -> Self {
        Self {
            io,
            decoder,
            buffer: BytesMut::with_capacity(read_chunk),
            read_chunk: read_chunk.max(1),
            eof: false,
        }
    }

    pub async fn read_frame(&mut self) -> Result<Option<WrappedMessage<I>>> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.buffer)? {
                return Ok(Some(frame));
            }
            if self.eof {
                return self.finish();
            }

            self.buffer.reserve(self.read_chunk);
            let read = self
                .io
                .read_buf(&mut self.buffer)
                .await
                .map_err(|err| MuxError::io(error::READ, err))?;
            if read == 0 {
                self.eof = true;
            }
        }
    }

    fn finish(&self) -> Result<Option<WrappedMessage<I>>> {
        if self.buffer.is_empty() {
            Ok(None)
        } else {
            Err(MuxError::TruncatedFrame {
                buffered: self.buffer.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BytesCodec;
    use crate::id::{BigEndianIdCodec, MessageId};
    use bytes::Bytes;
    use std::sync::Arc;

    fn encoder() -> FrameEncoder<Bytes> {
        FrameEncoder::new(Arc::new(BigEndianIdCodec), Arc::new(BytesCodec), 1024)
    }

    fn decoder() -> FrameDecoder<Bytes> {
        FrameDecoder::new(Arc::new(BigEndianIdCodec), Arc::new(BytesCodec), 1024)
    }

    #[tokio::test]
    async fn reader_reassembles_frames_split_across_reads() {
        let (client, server) = tokio::io::duplex(3);
        let mut writer = FrameWriter::new(Box::new(client), encoder());
        let mut reader = FrameReader::new(Box::new(server), decoder(), 2);

        let send = tokio::spawn(async move {
            for id in 0..3u32 {
                writer
                    .write(&WrappedMessage::new(MessageId::new(id), Bytes::from_static(b"abcdef")))
                    .await
                    .expect("write");
            }
            // 丢弃写半边即对端 EOF。
            drop(writer);
        });

        for id in 0..3u32 {
            let frame = reader.read_frame().await.expect("read").expect("frame");
            assert_eq!(frame.id, MessageId::new(id));
            assert_eq!(&frame.payload[..], b"abcdef");
        }
        assert!(reader.read_frame().await.expect("eof").is_none());
        assert!(reader.read_frame().await.expect("still eof").is_none(), "流结束是粘滞的");
        send.await.expect("writer task");
    }

    #[tokio::test]
    async fn eof_inside_a_frame_is_truncation() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 0, 8, 0, 0]).await.expect("partial");
        drop(client);

        let mut reader = FrameReader::new(Box::new(server), decoder(), 16);
        let err = reader.read_frame().await.expect_err("截断的帧必须报错");
        assert!(matches!(err, MuxError::TruncatedFrame { buffered: 6 }));
    }
}
