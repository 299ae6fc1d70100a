//! Arus Exchange Connectivity Core
//!
//! Exchange connectivity and state synchronization for the trading system:
//! real-time feed sessions with classified reconnection, and entity
//! repositories that keep secondary indexes consistent with their primary
//! records over a plain key-value store.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
