use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
};

use crate::{
    error::{Result, VaultMountError},
    vault::{VirtualRoot, WebDavSettings},
};

/// Publishes unlocked vaults over a network file-sharing protocol.
pub trait SharePublisher {
    /// Makes the vault mounted at `mount_point` reachable under `name`.
    fn publish(&mut self, name: &str, root: &VirtualRoot, mount_point: &Path) -> Result<()>;
}

/// WebDAV share served by an external `rclone serve webdav` process.
///
/// All published vaults share one listener; each vault is a top-level
/// directory of a `:combine:` remote. Publishing restarts the server with the
/// updated upstream list. Upstreams containing whitespace are double-quoted.
pub struct WebDavPublisher {
    server_binary: String,
    settings: WebDavSettings,
    upstreams: BTreeMap<String, PathBuf>,
    server: Option<Child>,
}

impl WebDavPublisher {
    /// Serves on `settings` using the `rclone` binary.
    pub fn new(settings: WebDavSettings) -> Self {
        Self::with_binary("rclone", settings)
    }

    /// Serves on `settings` using a custom server binary.
    pub fn with_binary(server_binary: impl Into<String>, settings: WebDavSettings) -> Self {
        Self {
            server_binary: server_binary.into(),
            settings,
            upstreams: BTreeMap::new(),
            server: None,
        }
    }

    /// Base URL clients connect to.
    pub fn url(&self) -> String {
        format!("http://{}:{}/", self.settings.bind, self.settings.port)
    }

    /// Published vault names.
    pub fn published(&self) -> impl Iterator<Item = &str> {
        self.upstreams.keys().map(String::as_str)
    }

    /// Arguments for the server command.
    pub fn server_args(&self) -> Vec<String> {
        let upstreams = self
            .upstreams
            .iter()
            .map(|(name, path)| {
                let upstream = format!("{name}={}", path.display());
                if upstream.contains(char::is_whitespace) {
                    format!("\"{upstream}\"")
                } else {
                    upstream
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        vec![
            "serve".to_owned(),
            "webdav".to_owned(),
            "--addr".to_owned(),
            format!("{}:{}", self.settings.bind, self.settings.port),
            "--combine-upstreams".to_owned(),
            upstreams,
            ":combine:".to_owned(),
        ]
    }

    fn restart(&mut self) -> Result<()> {
        self.stop();
        let child = Command::new(&self.server_binary)
            .args(self.server_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|error| {
                if error.kind() == io::ErrorKind::NotFound {
                    VaultMountError::MissingBinary(self.server_binary.clone())
                } else {
                    VaultMountError::Share(format!("failed to start WebDAV server: {error}"))
                }
            })?;
        self.server = Some(child);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.server.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl SharePublisher for WebDavPublisher {
    fn publish(&mut self, name: &str, root: &VirtualRoot, mount_point: &Path) -> Result<()> {
        if name.contains(char::is_whitespace) || name.contains('=') {
            return Err(VaultMountError::Share(format!(
                "vault name cannot be shared over WebDAV: {name:?}"
            )));
        }
        self.upstreams
            .insert(name.to_owned(), mount_point.to_path_buf());
        if let Err(error) = self.restart() {
            self.upstreams.remove(name);
            return Err(error);
        }
        tracing::info!(
            vault = %name,
            vault_path = %root.vault_path.display(),
            url = %format!("{}{name}/", self.url()),
            "published vault over WebDAV"
        );
        Ok(())
    }
}

impl Drop for WebDavPublisher {
    fn drop(&mut self) {
        self.stop();
    }
}
