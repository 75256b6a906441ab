pub mod connection;
pub mod protocol;

pub use connection::{GatewayOptions, HttpConnection, parse_proxy_url};
pub use protocol::{GatewayError, RemoteId, classify_error};
