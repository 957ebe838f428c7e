//! Core modules for repokeep.
//!
//! Shared primitives every strategy builds on: configuration, errors, the
//! remote and local command channels, storage layout, compression and
//! artifact rotation.

pub mod artifact;
pub mod command;
pub mod compress;
pub mod config;
pub mod error;
pub mod layout;
pub mod lock;
pub mod logging;
pub mod output;
pub mod remote;
pub mod repository;
pub mod time;
