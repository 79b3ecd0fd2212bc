//! 传输引导阶段的稳定错误码，经 [`spark_mux::MuxError::Io`] 透出。

use spark_mux::OperationKind;

pub const BIND: OperationKind = OperationKind {
    code: "spark.mux.tcp.bind_failed",
    message: "tcp bind",
};
pub const ACCEPT: OperationKind = OperationKind {
    code: "spark.mux.tcp.accept_failed",
    message: "tcp accept",
};
pub const CONNECT: OperationKind = OperationKind {
    code: "spark.mux.tcp.connect_failed",
    message: "tcp connect",
};
pub const CONFIGURE: OperationKind = OperationKind {
    code: "spark.mux.tcp.configure_failed",
    message: "tcp configure",
};
