use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};

use crate::error::{Result, VaultMountError};

use super::types::VirtualRoot;

/// Config file that marks a gocryptfs cipher directory.
pub const GOCRYPTFS_CONFIG_FILE: &str = "gocryptfs.conf";

/// Unlocks an encrypted vault directory.
pub trait VaultProvider {
    /// Opens the vault at `vault_path` with `passphrase`.
    fn open(&self, name: &str, vault_path: &Path, passphrase: SecretString)
        -> Result<VirtualRoot>;
}

/// Vault provider for cipher directories unlocked by the native mounter.
///
/// The passphrase itself is verified by the FUSE helper during mount; this
/// provider checks that the directory is a vault and the passphrase is usable.
#[derive(Debug, Clone)]
pub struct CipherDirProvider {
    config_file: PathBuf,
}

impl CipherDirProvider {
    /// Expects a gocryptfs config file in each vault.
    pub fn new() -> Self {
        Self::with_config_file(GOCRYPTFS_CONFIG_FILE)
    }

    /// Expects `config_file` (relative to the vault directory) in each vault.
    pub fn with_config_file(config_file: impl Into<PathBuf>) -> Self {
        Self {
            config_file: config_file.into(),
        }
    }
}

impl Default for CipherDirProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl VaultProvider for CipherDirProvider {
    fn open(
        &self,
        name: &str,
        vault_path: &Path,
        passphrase: SecretString,
    ) -> Result<VirtualRoot> {
        let config_path = vault_path.join(&self.config_file);
        if !config_path.is_file() {
            return Err(VaultMountError::CorruptVault(format!(
                "missing {} in {}",
                self.config_file.display(),
                vault_path.display()
            )));
        }
        if passphrase.expose_secret().is_empty() {
            return Err(VaultMountError::InvalidPassphrase);
        }
        Ok(VirtualRoot {
            name: name.to_owned(),
            vault_path: vault_path.to_path_buf(),
            passphrase,
        })
    }
}
