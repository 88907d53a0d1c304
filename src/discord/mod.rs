//! Discord backend.
//!
//! Gateway events become relay inputs through [`handler::RelayHandler`];
//! relayed copies go out through [`sender::DiscordSender`]. [`DiscordRelay`] ties both to one bot
//! token and keeps the gateway alive.

pub mod client;
pub mod handler;
pub mod sender;

pub use client::DiscordRelay;
