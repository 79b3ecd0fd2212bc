use spark_mux::{MultiplexingSession, MuxError, Result, SessionBuilder};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::error::CONNECT;
use crate::socket::{TcpSocketConfig, into_session};

/// 建立到目标地址的连接，并以模板构建会话。
pub async fn connect<I, O>(
    addr: impl ToSocketAddrs,
    template: &SessionBuilder<I, O>,
    socket: &TcpSocketConfig,
) -> Result<MultiplexingSession<I, O>>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|err| MuxError::io(CONNECT, err))?;
    if let Ok(peer) = stream.peer_addr() {
        debug!(%peer, "multiplexing session connected");
    }
    into_session(stream, template, socket)
}
