//! Client-side sync engine for Nexus chat conversations.
//!
//! The pieces line up with the data flow: [`composer`] turns user intent into
//! [`protocol::OutboundEvent`]s, [`transport`] carries frames over a
//! reconnecting websocket, [`dispatcher`] applies inbound events to the
//! [`view_model`], and [`render`] projects messages for display.
//! [`offline_cache`] is independent of the chat channel.

pub mod api;
pub mod composer;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod offline_cache;
pub mod protocol;
pub mod reactions;
pub mod render;
pub mod session;
pub mod storage;
pub mod timeline;
pub mod transport;
pub mod typing;
pub mod view_model;
