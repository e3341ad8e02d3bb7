//! # BlinkDB
//!
//! A small in-memory key-value server speaking a RESP2 subset.
//!
//! Clients send arrays of bulk strings (`SET`, `GET`, `DELETE`, `AUTH`).
//! Every connection runs its own decode task, and all commands funnel through
//! one dispatcher task that owns authentication state and applies changes to
//! the store in a single total order.

pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod resp;
pub mod server;
pub mod store;

pub use client::Client;
pub use config::Config;
pub use error::{BlinkError, BlinkResult};
pub use server::Server;
