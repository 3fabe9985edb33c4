//! HTTP and WebSocket surface
//!
//! Thin transport around the room actor: sockets are translated into
//! `RoomEvent`s on the way in and `ServerEvent` JSON frames on the way out.
//! Nothing in here touches room state directly.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::ApiServer;
pub use websocket::Hub;
