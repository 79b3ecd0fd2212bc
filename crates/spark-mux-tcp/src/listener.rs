use std::net::SocketAddr;

use spark_mux::{MultiplexingSession, MuxError, Result, SessionBuilder};
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::debug;

use crate::error::{ACCEPT, BIND};
use crate::socket::{TcpSocketConfig, into_session};

/// 产出多路复用会话的 TCP 监听器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 传输引导与会话核心解耦：监听器只负责“绑定 → 接受 → 配置套接字”，
///   每条连接都由同一个 [`SessionBuilder`] 模板构建会话；
///
/// ## 契约 (What)
/// - `bind`：绑定地址并记录实际端口（支持 `:0` 由内核分配）；
/// - `accept`：等待一条入站连接，返回已就绪的会话与对端地址；
/// - 错误携带 `spark.mux.tcp.*` 稳定错误码。
///
/// ## 注意事项 (Trade-offs)
/// - 模板若指定了读取取消令牌，所有接受的会话都持有其子令牌，
///   取消父令牌即可统一终止这些会话上的读取；
/// - 未在模板中共享标识源时，每个会话拥有各自从 0 开始的标识序列。
pub struct MuxListener<I, O> {
    inner: TcpListener,
    local_addr: SocketAddr,
    template: SessionBuilder<I, O>,
    socket: TcpSocketConfig,
}

impl<I, O> MuxListener<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    pub async fn bind(
        addr: impl ToSocketAddrs,
        template: SessionBuilder<I, O>,
        socket: TcpSocketConfig,
    ) -> Result<Self> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|err| MuxError::io(BIND, err))?;
        let local_addr = inner.local_addr().map_err(|err| MuxError::io(BIND, err))?;
        debug!(%local_addr, "multiplexing listener bound");
        Ok(Self {
            inner,
            local_addr,
            template,
            socket,
        })
    }

    /// 监听器实际绑定的地址。
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn accept(&self) -> Result<(MultiplexingSession<I, O>, SocketAddr)> {
        let (stream, peer) = self
            .inner
            .accept()
            .await
            .map_err(|err| MuxError::io(ACCEPT, err))?;
        let session = into_session(stream, &self.template, &self.socket)?;
        debug!(%peer, "multiplexing session accepted");
        Ok((session, peer))
    }
}
