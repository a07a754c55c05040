//! # chronokv
//!
//! An in-memory key-value store built around per-key expiry: attaching,
//! extending, querying and enforcing time-to-live, and reclaiming expired
//! keys without client help.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              chronokv                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │   Server    │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │ one atomic op           │
//! │                                               ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐   │
//! │  │   Clock     │───>│              StorageEngine                   │   │
//! │  │ (Unix ms)   │    │  64 RwLock shards of key -> Entry{value,ttl} │   │
//! │  └─────────────┘    │  lazy reclaim on every access                │   │
//! │                     └──────────────────────────────────────────────┘   │
//! │                                               ▲ try_write only          │
//! │                     ┌─────────────────────────┴───────────────────────┐ │
//! │                     │  ExpirySweeper (background task, adaptive)      │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key States
//!
//! A key is either missing, persistent (no expiry) or volatile (expires at
//! an absolute Unix-millisecond instant). Once the clock reaches that
//! instant the key is missing to every reader, whether or not it has been
//! physically removed yet.
//!
//! | Command   | Missing | Persistent | Volatile              |
//! |-----------|---------|------------|-----------------------|
//! | `TTL`     | `-2`    | `-1`       | seconds, rounded up   |
//! | `PTTL`    | `-2`    | `-1`       | whole milliseconds    |
//! | `PERSIST` | `0`     | `0`        | `1`, becomes persistent |
//!
//! ## Quick Start
//!
//! ```ignore
//! use chronokv::server::Server;
//! use chronokv::storage::{start_expiry_sweeper, StorageEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let storage = Arc::new(StorageEngine::new());
//!     let _sweeper = start_expiry_sweeper(Arc::clone(&storage));
//!
//!     let server = Server::bind("127.0.0.1:6379", storage).await?;
//!     server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: clock, sharded engine, lazy and active expiry
//! - [`commands`]: SET/GETEX/TTL/PTTL/PERSIST/EXPIRE and friends
//! - [`protocol`]: RESP parser and types
//! - [`connection`]: per-client read/execute/respond loop
//! - [`server`]: TCP accept loop with graceful shutdown
//! - [`config`]: command-line flags

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

pub use commands::{CommandError, CommandHandler};
pub use protocol::{parse_message, ParseError, RespValue};
pub use server::Server;
pub use storage::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper, StorageEngine};

/// Version of chronokv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
