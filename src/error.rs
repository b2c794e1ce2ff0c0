use std::io;

use thiserror::Error;

/// Validation failures for `NAME=VALUE` vault arguments.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Argument has no `=` separating the vault name from the value.
    #[error("expected NAME=VALUE, got `{0}`")]
    MissingSeparator(String),
    /// Vault name part is empty.
    #[error("vault name cannot be empty in `{0}`")]
    EmptyName(String),
    /// Value part is empty.
    #[error("value for vault `{0}` cannot be empty")]
    EmptyValue(String),
}

/// Top-level application errors.
#[derive(Debug, Error)]
pub enum VaultMountError {
    /// Launch configuration is unusable; raised before any mount is attempted.
    #[error("{0}")]
    Configuration(String),
    /// Vault argument is malformed.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A required external program is not installed.
    #[error("required binary not found: {0}")]
    MissingBinary(String),
    /// Vault rejected the passphrase.
    #[error("invalid passphrase")]
    InvalidPassphrase,
    /// Vault directory is not a readable vault.
    #[error("corrupt vault: {0}")]
    CorruptVault(String),
    /// Native mount call failed.
    #[error("mount failed: {0}")]
    MountFailure(String),
    /// Native unmount call failed.
    #[error("unmount failed: {0}")]
    UnmountFailure(String),
    /// Network share publisher failed.
    #[error("share failed: {0}")]
    Share(String),
    /// Signal handler installation failed.
    #[error("signal setup failed: {0}")]
    Signal(#[from] nix::errno::Errno),
    /// Config TOML could not be parsed.
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A typed result used across the crate.
pub type Result<T> = std::result::Result<T, VaultMountError>;

/// Launch configuration is invalid.
pub const ERROR_CODE_CONFIGURATION: &str = "E100";
/// Malformed `NAME=VALUE` vault argument.
pub const ERROR_CODE_VAULT_ARGUMENT: &str = "E101";
/// Missing runtime dependency or binary.
pub const ERROR_CODE_MISSING_RUNTIME: &str = "E103";
/// Vault rejected the passphrase.
pub const ERROR_CODE_PASSPHRASE: &str = "E201";
/// Vault directory is not a vault.
pub const ERROR_CODE_CORRUPT_VAULT: &str = "E300";
/// Mount failed.
pub const ERROR_CODE_MOUNT: &str = "E400";
/// Unmount failed.
pub const ERROR_CODE_UNMOUNT: &str = "E401";
/// Network share failed.
pub const ERROR_CODE_SHARE: &str = "E500";
/// Filesystem or stream I/O failed.
pub const ERROR_CODE_IO: &str = "E900";
/// Internal parsing or runtime failure.
pub const ERROR_CODE_INTERNAL: &str = "E999";

/// Returns the stable error code for a runtime error.
pub fn classify_error_code(error: &VaultMountError) -> &'static str {
    match error {
        VaultMountError::Configuration(_) => ERROR_CODE_CONFIGURATION,
        VaultMountError::Validation(_) => ERROR_CODE_VAULT_ARGUMENT,
        VaultMountError::MissingBinary(_) => ERROR_CODE_MISSING_RUNTIME,
        VaultMountError::InvalidPassphrase => ERROR_CODE_PASSPHRASE,
        VaultMountError::CorruptVault(_) => ERROR_CODE_CORRUPT_VAULT,
        VaultMountError::MountFailure(_) => ERROR_CODE_MOUNT,
        VaultMountError::UnmountFailure(_) => ERROR_CODE_UNMOUNT,
        VaultMountError::Share(_) => ERROR_CODE_SHARE,
        VaultMountError::Io(_) => ERROR_CODE_IO,
        VaultMountError::Signal(_) | VaultMountError::Toml(_) => ERROR_CODE_INTERNAL,
    }
}

/// Returns `true` for errors that should be reported together with usage text.
pub fn is_usage_error(error: &VaultMountError) -> bool {
    matches!(
        error,
        VaultMountError::Configuration(_) | VaultMountError::Validation(_)
    )
}
