//! Real-time chat relay.
//!
//! Clients connect, receive an identity (nickname and color) and exchange short
//! messages that are broadcast to everyone currently connected. Each module
//! focuses on one responsibility:
//!
//! - [`registry`] tracks the identity attached to every open connection.
//! - [`color`] picks display colors that stay readable on a light background.
//! - [`router`] turns connection events into outbound events and their targets.
//! - [`hub`] serializes access to the router and fans events out to per-connection
//!   queues without waiting on slow readers.
//! - [`protocol`] defines the JSON envelopes plus line framing helpers.
//! - [`relay`] accepts TCP connections speaking JSON lines.
//! - [`web`] serves the WebSocket endpoint and static assets over HTTP.
//! - [`cli`] and [`client`] provide the command line and a terminal client.
//!
//! The router is synchronous and transport agnostic, so most behavior is
//! tested without opening sockets.

pub mod cli;
pub mod client;
pub mod color;
pub mod hub;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod router;
pub mod web;
