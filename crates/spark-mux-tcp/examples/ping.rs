//! 在回环地址上启动一个回显服务，客户端并发发送若干 ping 并等待回显。
//!
//! 运行：`RUST_LOG=spark_mux=debug cargo run -p spark-mux-tcp --example ping`

use std::sync::Arc;

use bytes::Bytes;
use spark_mux::{ReadOutcome, SessionBuilder};
use spark_mux_tcp::{MuxListener, TcpSocketConfig, connect};
use tracing::info;
use tracing_subscriber::EnvFilter;

const PINGS: usize = 16;

#[tokio::main]
async fn main() -> spark_mux::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let template = SessionBuilder::bytes();
    let socket = TcpSocketConfig::default();
    let listener = MuxListener::bind("127.0.0.1:0", template.clone(), socket.clone()).await?;
    let addr = listener.local_addr();
    info!(%addr, "echo server listening");

    let server = tokio::spawn(async move {
        let (session, peer) = listener.accept().await?;
        info!(%peer, "client connected");
        loop {
            match session.read().await? {
                ReadOutcome::Message(message) => {
                    let (id, payload) = message.into_parts();
                    session.write_with_id(payload, id).await?;
                }
                ReadOutcome::Closed | ReadOutcome::Cancelled => break,
            }
        }
        info!("client disconnected");
        Ok::<(), spark_mux::MuxError>(())
    });

    let client = Arc::new(connect(addr, &template, &socket).await?);
    let writers: Vec<_> = (0..PINGS)
        .map(|n| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.write(Bytes::from(format!("ping {n}"))).await })
        })
        .collect();
    for writer in writers {
        match writer.await {
            Ok(outcome) => {
                outcome?;
            }
            Err(join) => tracing::error!(%join, "writer task failed"),
        }
    }

    for _ in 0..PINGS {
        if let ReadOutcome::Message(message) = client.read().await? {
            info!(
                id = %message.id,
                payload = %String::from_utf8_lossy(&message.payload),
                "echo received"
            );
        }
    }

    drop(client);
    match server.await {
        Ok(outcome) => outcome,
        Err(join) => {
            tracing::error!(%join, "echo server task failed");
            Ok(())
        }
    }
}
