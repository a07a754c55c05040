//! Storage Engine Module
//!
//! This module provides the key store for chronokv and everything that
//! governs key lifetimes: the clock, the sharded store with lazy expiry, and
//! the background sweeper for active expiry.
//!
//! ## Architecture
//!
//! ```text
//!              ┌───────────────────────────┐
//!              │          Clock            │
//!              │  (SystemClock / Manual)   │
//!              └─────────────┬─────────────┘
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Key States
//!
//! A key is NONEXISTENT, PERSISTENT (no TTL) or VOLATILE (has a TTL). SET
//! moves it to PERSISTENT or VOLATILE depending on its expiry option, GETEX
//! and EXPIRE make it VOLATILE, PERSIST makes it PERSISTENT, and DEL or the
//! passage of time sends it back to NONEXISTENT.
//!
//! ## Example
//!
//! ```
//! use chronokv::storage::{ExpiryUpdate, StorageEngine, TtlState};
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let engine = StorageEngine::new();
//! let key = Bytes::from("foo");
//!
//! engine.set(key.clone(), Bytes::from("bar"));
//! let value = engine.get_ex(&key, ExpiryUpdate::After(Duration::from_secs(5)));
//! assert_eq!(value, Some(Bytes::from("bar")));
//! assert!(engine.ttl(&key).as_secs() <= 5);
//!
//! engine.get_ex(&key, ExpiryUpdate::Persist);
//! assert_eq!(engine.ttl(&key), TtlState::Persistent);
//! ```

pub mod clock;
pub mod engine;
pub mod expiry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{
    Entry, ExpiryUpdate, SetCondition, SetOptions, SetOutcome, StorageEngine, StorageError,
    StorageStats, SweepSample, TtlState,
};
pub use expiry::{
    next_interval, run_expiry_cycle, start_expiry_sweeper, CycleReport, ExpiryConfig,
    ExpirySweeper,
};
