//! Websocket connection registry and type-routed JSON dispatch

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod transport;

pub use config::schema::ServerConfig;
pub use connection::{Connection, ConnectionId, Registry, RequestMeta};
pub use dispatch::{
    Admission, Disconnect, Dispatcher, DispatcherBuilder, Envelope, Handler, HandlerError, HandlerResult, Hub,
    MessageContext,
};
pub use http::WsServer;
pub use lifecycle::Shutdown;
