//! GasLedger - a tamper-evident ledger for compressor station gas consumption
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Block type, append-only block store and chain verification
//! - [`transaction`] - Gas readings and their validation
//! - [`anomaly`] - Per-station streaming statistics and anomaly scoring
//! - [`ledger`] - The single write path (score, seal, append)
//! - [`query`] - Read-only access to chain state
//!
//! ## State Management
//! - [`persistence`] - Database layer (SQLite) and in-memory backend
//!
//! ## Integration
//! - [`node`] - Startup orchestration and node health
//! - [`api`] - REST endpoints (feature `api`)
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod anomaly;
pub mod blockchain;
pub mod ledger;
pub mod query;
pub mod transaction;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;

// ============================================================================
// Integration
// ============================================================================
#[cfg(feature = "api")]
pub mod api;
pub mod node;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;

pub use error::{ChainError, Result};
