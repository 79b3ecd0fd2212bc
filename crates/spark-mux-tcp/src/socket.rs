use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use socket2::SockRef;
use spark_mux::{MultiplexingSession, MuxError, Result, SessionBuilder};
use tokio::net::TcpStream;

use crate::error::CONFIGURE;

/// TCP 套接字级配置项。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 多路复用会话逐帧 `flush`，小帧居多；默认开启 `TCP_NODELAY`，
///   避免 Nagle 算法把确认延迟叠加到每一条写的完成通知上；
/// - `SO_LINGER` 决定会话被丢弃时未发出的数据是等待发送还是以 RST 释放。
///
/// ## 契约（What）
/// - `nodelay`：默认 `true`；
/// - `linger`：`None` 表示遵循内核默认策略；`Some(dur)` 通过 `socket2::SockRef::set_linger`
///   设置超时；
/// - 监听端对每条接受的连接、拨号端对新建的连接各应用一次，失败时返回 `configure` 错误码。
///
/// ## 注意事项（Trade-offs）
/// - `SO_LINGER` 在 Linux 上取整到秒；设置过小可能丢弃发送缓冲区中的数据并触发对端 `ECONNRESET`。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TcpSocketConfig {
    nodelay: bool,
    linger: Option<Duration>,
}

impl Default for TcpSocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpSocketConfig {
    pub const fn new() -> Self {
        Self {
            nodelay: true,
            linger: None,
        }
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// 设置 `SO_LINGER` 超时时长。
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;
        SockRef::from(stream).set_linger(self.linger)
    }
}

/// 应用套接字选项，拆分读写半边并交给会话模板构建。
pub(crate) fn into_session<I, O>(
    stream: TcpStream,
    template: &SessionBuilder<I, O>,
    socket: &TcpSocketConfig,
) -> Result<MultiplexingSession<I, O>>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    socket
        .apply(&stream)
        .map_err(|err| MuxError::io(CONFIGURE, err))?;
    let (reader, writer) = stream.into_split();
    template.build(reader, writer)
}
