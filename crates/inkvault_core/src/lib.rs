#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Structural change detection with a noise ignore-list
pub mod change;

/// Configuration options
pub mod config;

/// Typed mutation batches and cross-namespace replay
pub mod diff;

/// Drawing records and host snapshots
pub mod drawing;

/// Error (common error types)
pub mod error;

/// Asset cache garbage collection
pub mod gc;

/// Canonical content hashing
pub mod hash;

/// Local ↔ Remote identifier mapping
pub mod mapping;

/// Remote provider abstraction and the in-memory double
pub mod provider;

/// Host mutation-event handlers
pub mod service;

/// Key-value storage abstraction
pub mod store;

/// Cloud sync (coordinator, status, reports)
pub mod sync;
