#![doc = r#"
# spark-mux-tcp

## 设计动机（Why）
- **定位**：为 `spark-mux` 的多路复用会话提供 Tokio TCP 引导：绑定监听、接受连接、
  主动建连，并把连接交给会话模板。
- **架构角色**：会话核心只消费“读下一块 / 写一块并刷新”两组能力；本 crate 负责产生
  这些能力的具体来源，不参与写调度与帧编解码。

## 核心契约（What）
- [`MuxListener::bind`] / [`MuxListener::accept`]：监听端逐条产出会话；
- [`connect`]：拨号端产出会话；
- 连接通过 `TcpStream::into_split` 拆成独立拥有的读、写半边，
  读半边归读者，写半边归排空循环；
- 失败映射为 [`spark_mux::MuxError::Io`]，错误码见 [`error`]。

## 风险与考量（Trade-offs）
- 不做重连、不做连接池；连接断开后由上层决定是否重新 `connect`。
"#]
#![deny(unsafe_code)]

mod connector;
pub mod error;
mod listener;
mod socket;

pub use connector::connect;
pub use listener::MuxListener;
pub use socket::TcpSocketConfig;
