#![allow(dead_code)]

use std::{
    collections::{HashSet, VecDeque},
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use secrecy::SecretString;
use vaultmount::{
    error::{Result, VaultMountError},
    mount::{MountEnvironment, MountTableSource, Mounter, NativeMount},
    share::SharePublisher,
    vault::{InlinePassword, VaultProvider, VaultSpec, VirtualRoot},
};

/// Writes an executable script.
#[cfg(unix)]
pub fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    let mut permissions = fs::metadata(path).unwrap().permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions).unwrap();
}

/// One mountinfo line for a FUSE mount.
pub fn mountinfo_line(mount_point: &str, filesystem_type: &str, source: &str) -> String {
    format!("36 35 0:44 / {mount_point} rw,nosuid,nodev shared:1 - {filesystem_type} {source} rw")
}

/// Builds a vault spec with an inline password and no mount point.
pub fn vault_spec(name: &str, vault_path: &Path) -> VaultSpec {
    VaultSpec {
        name: name.to_owned(),
        vault_path: vault_path.to_path_buf(),
        mount_point: None,
        mount_flags: None,
        password: Box::new(InlinePassword::new(name, "passphrase".to_owned())),
    }
}

/// Builds a vault spec with an inline password mounted at `mount_point`.
pub fn mounted_vault_spec(name: &str, vault_path: &Path, mount_point: &Path) -> VaultSpec {
    VaultSpec {
        mount_point: Some(mount_point.to_path_buf()),
        ..vault_spec(name, vault_path)
    }
}

/// Creates `<root>/<name>/vault` and `<root>/<name>/mnt` directories.
///
/// Both paths are returned in canonical form.
pub fn vault_dirs(root: &Path, name: &str) -> (PathBuf, PathBuf) {
    let vault_path = root.join(name).join("vault");
    let mount_point = root.join(name).join("mnt");
    fs::create_dir_all(&vault_path).unwrap();
    fs::create_dir_all(&mount_point).unwrap();
    (
        fs::canonicalize(vault_path).unwrap(),
        fs::canonicalize(mount_point).unwrap(),
    )
}

/// Shared event log written by the recording doubles.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Returns a snapshot of the recorded events.
pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Vault provider that unlocks every vault.
#[derive(Debug, Default)]
pub struct AcceptingProvider;

impl VaultProvider for AcceptingProvider {
    fn open(&self, name: &str, vault_path: &Path, passphrase: SecretString) -> Result<VirtualRoot> {
        Ok(VirtualRoot {
            name: name.to_owned(),
            vault_path: vault_path.to_path_buf(),
            passphrase,
        })
    }
}

/// Mounter double that records calls and fails on request.
#[derive(Debug, Default)]
pub struct RecordingMounter {
    pub log: EventLog,
    pub failing_mount_points: HashSet<PathBuf>,
    pub graceful_unmount_fails: bool,
    pub forced_unmount_fails: bool,
}

impl RecordingMounter {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn failing_on(mut self, mount_point: &Path) -> Self {
        self.failing_mount_points.insert(mount_point.to_path_buf());
        self
    }

    pub fn with_unmount_failures(mut self, graceful: bool, forced: bool) -> Self {
        self.graceful_unmount_fails = graceful;
        self.forced_unmount_fails = forced;
        self
    }
}

impl Mounter for RecordingMounter {
    type Mount = RecordingMount;

    fn default_flags(&self) -> Vec<String> {
        vec!["-onosuid".to_owned()]
    }

    fn mount(&self, root: &VirtualRoot, environment: &MountEnvironment) -> Result<Self::Mount> {
        let mount_point = environment.mount_point.clone();
        self.log
            .lock()
            .unwrap()
            .push(format!("mount {} {}", root.name, environment.flags.join(" ")));
        if self.failing_mount_points.contains(&mount_point) {
            return Err(VaultMountError::MountFailure(format!(
                "refused {}",
                mount_point.display()
            )));
        }
        Ok(RecordingMount {
            log: Arc::clone(&self.log),
            mount_point,
            graceful_fails: self.graceful_unmount_fails,
            forced_fails: self.forced_unmount_fails,
        })
    }
}

/// Native mount produced by [`RecordingMounter`].
#[derive(Debug)]
pub struct RecordingMount {
    log: EventLog,
    mount_point: PathBuf,
    graceful_fails: bool,
    forced_fails: bool,
}

impl NativeMount for RecordingMount {
    fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    fn unmount(&mut self) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("unmount {}", self.mount_point.display()));
        if self.graceful_fails {
            return Err(VaultMountError::UnmountFailure("busy".to_owned()));
        }
        Ok(())
    }

    fn unmount_forced(&mut self) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("unmount-forced {}", self.mount_point.display()));
        if self.forced_fails {
            return Err(VaultMountError::UnmountFailure("still busy".to_owned()));
        }
        Ok(())
    }
}

/// Mount table that replays scripted reads, repeating the last one.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTable {
    reads: Arc<Mutex<VecDeque<Option<String>>>>,
    count: Arc<Mutex<usize>>,
}

impl ScriptedTable {
    /// Queues a successful read.
    pub fn then_table(self, table: impl Into<String>) -> Self {
        self.reads.lock().unwrap().push_back(Some(table.into()));
        self
    }

    /// Queues a failed read.
    pub fn then_unreadable(self) -> Self {
        self.reads.lock().unwrap().push_back(None);
        self
    }

    /// Number of reads so far.
    pub fn read_count(&self) -> usize {
        *self.count.lock().unwrap()
    }
}

impl MountTableSource for ScriptedTable {
    fn read_table(&self) -> io::Result<String> {
        *self.count.lock().unwrap() += 1;
        let mut reads = self.reads.lock().unwrap();
        let next = if reads.len() > 1 {
            reads.pop_front().flatten()
        } else {
            reads.front().cloned().flatten()
        };
        next.ok_or_else(|| io::Error::new(io::ErrorKind::PermissionDenied, "mountinfo denied"))
    }
}

/// Share publisher double that records publications.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    pub log: EventLog,
    pub fail: bool,
}

impl SharePublisher for RecordingPublisher {
    fn publish(&mut self, name: &str, _root: &VirtualRoot, mount_point: &Path) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("publish {name} {}", mount_point.display()));
        if self.fail {
            return Err(VaultMountError::Share("server down".to_owned()));
        }
        Ok(())
    }
}
