//! Wanchat - multiplayer chat room with games and a shared economy
//!
//! Users join a single room over WebSocket, chat, and spend a persistent
//! balance on blackjack, horse races, drag races, a snake arcade game and a
//! store of items, titles and cars. Owned items can be sent out for an
//! appraisal that comes back after a delay with a new resale value.
//!
//! All mutable state lives in one [`room::Room`] task; the [`api`] layer only
//! translates sockets into room events and room events into JSON frames.

pub mod api;
pub mod appraisal;
pub mod catalog;
pub mod clock;
pub mod commands;
pub mod config;
pub mod economy;
pub mod errors;
pub mod events;
pub mod games;
pub mod identity;
pub mod inventory;
pub mod metrics;
pub mod room;
pub mod storage;

pub use config::WanchatConfig;
pub use errors::{WanchatError, WanchatResult};
pub use room::{Room, RoomEvent, RoomHandle};
