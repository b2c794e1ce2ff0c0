#![deny(missing_docs)]
//! vaultmount unlocks encrypted vaults, mounts them over FUSE, optionally
//! shares them over WebDAV, and stays alive until every mount is gone.

/// Command-line interface.
pub mod cli;
/// Config file discovery, parsing and validation.
pub mod config;
/// Error types.
pub mod error;
/// FUSE mounts and mount table monitoring.
pub mod mount;
/// Per-vault argument namespacing.
pub mod namespace;
/// Mount lifecycle coordination.
pub mod orchestrator;
/// Network sharing of mounted vaults.
pub mod share;
/// Signal-driven shutdown.
pub mod shutdown;
/// Logging setup.
pub mod telemetry;
/// Vault arguments, passwords and unlocking.
pub mod vault;
