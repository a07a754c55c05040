//! Command Processing
//!
//! Receives parsed RESP commands, validates their arguments, and runs them
//! against the storage engine.
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  handler.rs: arity + dispatch
//! │  option parsing │  options.rs: SET / GETEX / EXPIRE arguments
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```

pub mod error;
pub mod handler;
pub mod options;

pub use error::{CommandError, CommandResult};
pub use handler::CommandHandler;
pub use options::{ExpireForm, ExpiryDirective, GetExArgs, SetArgs};
