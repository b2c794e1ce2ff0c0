//! Vault description, unlocking, passphrases, and pre-flight checks.

/// Passphrase acquisition strategies.
pub mod password;
/// Vault provider abstraction and the cipher directory provider.
pub mod provider;
/// Launch validation.
pub mod validation;

mod types;

pub use password::{InlinePassword, PasswordFile, PasswordStrategy, PromptPassword};
pub use provider::{CipherDirProvider, VaultProvider};
pub use types::{VaultSpec, VirtualRoot};
pub use validation::{validate_launch, WebDavSettings};
