//! MCP 子进程层：进程通道、JSON-RPC 线格式、请求关联

pub mod channel;
pub mod protocol;
pub mod rpc;

pub use channel::{LineReceiver, LineSink, SubprocessChannel};
pub use protocol::{
    CallToolParams, ClientInfo, InitializeParams, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, RpcErrorObject, DEFAULT_PROTOCOL_VERSION,
};
pub use rpc::RpcCorrelator;
