use std::collections::HashSet;

use crate::error::{Result, VaultMountError};

use super::types::VaultSpec;

const MAX_PORT: i64 = u16::MAX as i64;

/// Validated WebDAV bind address and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebDavSettings {
    /// Address to bind.
    pub bind: String,
    /// TCP port.
    pub port: u16,
}

impl WebDavSettings {
    /// Checks the port range and builds the settings.
    pub fn parse(bind: &str, port: i64) -> Result<Self> {
        if !(0..=MAX_PORT).contains(&port) {
            return Err(VaultMountError::Configuration(
                "Invalid WebDAV Port.".to_owned(),
            ));
        }
        if bind.trim().is_empty() {
            return Err(VaultMountError::Configuration(
                "Invalid WebDAV bind address.".to_owned(),
            ));
        }
        Ok(Self {
            bind: bind.to_owned(),
            port: port as u16,
        })
    }
}

/// Pre-flight checks run before any vault is unlocked.
///
/// Any failure aborts the launch; no vault is touched.
pub fn validate_launch(
    specs: &[VaultSpec],
    webdav: Option<(&str, i64)>,
) -> Result<Option<WebDavSettings>> {
    let webdav = webdav
        .map(|(bind, port)| WebDavSettings::parse(bind, port))
        .transpose()?;

    if specs.is_empty() {
        return Err(VaultMountError::Configuration(
            "No vault specified.".to_owned(),
        ));
    }

    let mut names = HashSet::with_capacity(specs.len());
    for spec in specs {
        if !names.insert(spec.name.as_str()) {
            return Err(VaultMountError::Configuration(format!(
                "Vault \"{}\" is specified more than once.",
                spec.name
            )));
        }
        if !spec.vault_path.is_dir() {
            return Err(VaultMountError::Configuration(format!(
                "Not a directory: {}",
                spec.vault_path.display()
            )));
        }
        spec.password.validate()?;
        if let Some(mount_point) = &spec.mount_point {
            if !mount_point.is_dir() {
                return Err(VaultMountError::Configuration(format!(
                    "Fuse mount point does not exist: {}",
                    mount_point.display()
                )));
            }
        }
    }
    Ok(webdav)
}
