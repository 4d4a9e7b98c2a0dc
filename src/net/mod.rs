//! Socket transport for streaming audio

pub mod connection;

pub use connection::{
    connect_ws, ConnectionEvent, ConnectionManager, ConnectionState, Connector, LinkKind,
    MessageSink, MessageStream, ReconnectOutcome, WsConnector,
};
