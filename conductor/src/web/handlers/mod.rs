//! Request handlers for the network transport

pub mod websocket;
