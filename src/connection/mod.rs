//! Client Connections
//!
//! Each accepted client is served by its own [`ConnectionHandler`] task, so a
//! slow client only ever stalls itself.
//!
//! ```text
//!   TcpListener (server.rs)
//!         │ accept()
//!         ▼
//!   tokio::spawn(handle_connection(..))
//!         │
//!         ▼
//!   ┌──────────────────────────────────────────────┐
//!   │ ConnectionHandler                            │
//!   │  read bytes ─> parse RESP ─> execute ─> reply │
//!   └──────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use chronokv::commands::CommandHandler;
//! use chronokv::connection::handle_connection;
//! use chronokv::storage::StorageEngine;
//! use std::sync::Arc;
//!
//! let handler = CommandHandler::new(Arc::new(StorageEngine::new()));
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, handler.clone()));
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler};
