use std::{fmt, path::PathBuf};

use secrecy::SecretString;

use super::password::PasswordStrategy;

/// One vault to unlock and optionally mount.
pub struct VaultSpec {
    /// Unique vault name within one run.
    pub name: String,
    /// Encrypted vault directory.
    pub vault_path: PathBuf,
    /// Directory to mount the decrypted tree on.
    pub mount_point: Option<PathBuf>,
    /// Raw comma-separated mount options.
    pub mount_flags: Option<String>,
    /// How the passphrase is obtained.
    pub password: Box<dyn PasswordStrategy>,
}

impl fmt::Debug for VaultSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSpec")
            .field("name", &self.name)
            .field("vault_path", &self.vault_path)
            .field("mount_point", &self.mount_point)
            .field("mount_flags", &self.mount_flags)
            .field("password", &self.password.describe())
            .finish()
    }
}

/// Unlocked vault handed to the mounter and share publisher.
#[derive(Debug)]
pub struct VirtualRoot {
    /// Vault name.
    pub name: String,
    /// Encrypted vault directory.
    pub vault_path: PathBuf,
    /// Passphrase that unlocked the vault.
    pub passphrase: SecretString,
}
