use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use super::flags::FSNAME_PREFIX;

/// Default kernel mount table for the current process.
pub const PROC_MOUNTINFO_PATH: &str = "/proc/self/mountinfo";
/// Filesystem type reported for mounts tagged by this tool.
pub const DEFAULT_FUSE_TYPE: &str = "fuse.vaultmount";

const MOUNT_POINT_FIELD_INDEX: usize = 4;
const SEPARATOR_FIELD: &str = "-";
const ESCAPES: [(&str, char); 4] = [
    ("\\012", '\n'),
    ("\\040", ' '),
    ("\\134", '\\'),
    ("\\011", '\t'),
];

/// Decodes the octal escapes the kernel uses in mount table fields.
///
/// Decoding runs in one left-to-right pass, so a decoded backslash is never
/// combined with the following text into a second escape.
pub fn decode_mount_field(raw: &str) -> String {
    let mut decoded = String::with_capacity(raw.len());
    let mut rest = raw;
    'outer: while !rest.is_empty() {
        if rest.starts_with('\\') {
            for (escape, character) in ESCAPES {
                if let Some(tail) = rest.strip_prefix(escape) {
                    decoded.push(character);
                    rest = tail;
                    continue 'outer;
                }
            }
        }
        let mut chars = rest.chars();
        if let Some(character) = chars.next() {
            decoded.push(character);
        }
        rest = chars.as_str();
    }
    decoded
}

/// Vault path and mount point of one mount.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MountRecord {
    /// Vault path, or the mount source for kernel entries.
    pub vault_path: String,
    /// Mount point.
    pub mount_point: String,
}

impl MountRecord {
    /// Builds a record from escaped mount table fields.
    pub fn from_raw(vault_path: &str, mount_point: &str) -> Self {
        Self {
            vault_path: decode_mount_field(vault_path),
            mount_point: decode_mount_field(mount_point),
        }
    }

    /// Builds a record for a mount started by this process.
    pub fn for_paths(vault_path: &Path, mount_point: &Path) -> Self {
        Self::from_raw(
            &vault_path.display().to_string(),
            &mount_point.display().to_string(),
        )
    }
}

/// Parsed fields of one mount table line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountTableEntry {
    /// Decoded mount point.
    pub mount_point: String,
    /// Filesystem type as reported by the kernel.
    pub filesystem_type: String,
    /// Decoded mount source.
    pub mount_source: String,
}

impl MountTableEntry {
    /// Parses one mount table line. Returns `None` for malformed lines.
    pub fn parse(line: &str) -> Option<Self> {
        let fields = line.split_whitespace().collect::<Vec<_>>();
        let separator = fields.iter().position(|field| *field == SEPARATOR_FIELD)?;
        let filesystem_type = fields.get(separator + 1)?;
        let mount_source = fields.get(separator + 2)?;
        if separator <= MOUNT_POINT_FIELD_INDEX {
            return None;
        }
        let mount_point = fields.get(MOUNT_POINT_FIELD_INDEX)?;
        Some(Self {
            mount_point: decode_mount_field(mount_point),
            filesystem_type: (*filesystem_type).to_owned(),
            mount_source: decode_mount_field(mount_source),
        })
    }

    /// Returns the entry as a record.
    pub fn record(&self) -> MountRecord {
        MountRecord {
            vault_path: self.mount_source.clone(),
            mount_point: self.mount_point.clone(),
        }
    }
}

/// Source of the kernel mount table text.
pub trait MountTableSource {
    /// Reads the whole mount table.
    fn read_table(&self) -> io::Result<String>;
}

/// Reads the mount table from a mountinfo file.
#[derive(Debug, Clone)]
pub struct ProcMountInfo {
    path: PathBuf,
}

impl ProcMountInfo {
    /// Reads `/proc/self/mountinfo`.
    pub fn new() -> Self {
        Self::with_path(PROC_MOUNTINFO_PATH)
    }

    /// Reads a mountinfo-formatted file at `path`.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcMountInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTableSource for ProcMountInfo {
    fn read_table(&self) -> io::Result<String> {
        fs::read_to_string(&self.path)
    }
}

/// What the watcher reports when the mount table cannot be read.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnreadablePolicy {
    /// Report no active mounts, which ends the watch loop.
    #[default]
    AssumeUnmounted,
    /// Report the tracked mounts as still active.
    KeepWaiting,
}

/// Checks the kernel mount table for mounts this process started.
pub struct MountTableWatcher<S>
where
    S: MountTableSource,
{
    source: S,
    fuse_type: String,
    unreadable_policy: UnreadablePolicy,
}

impl<S> MountTableWatcher<S>
where
    S: MountTableSource,
{
    /// Constructs a watcher matching [`DEFAULT_FUSE_TYPE`].
    pub fn new(source: S) -> Self {
        Self {
            source,
            fuse_type: DEFAULT_FUSE_TYPE.to_owned(),
            unreadable_policy: UnreadablePolicy::default(),
        }
    }

    /// Overrides the filesystem type that identifies our mounts.
    pub fn with_fuse_type(mut self, fuse_type: impl Into<String>) -> Self {
        self.fuse_type = fuse_type.into();
        self
    }

    /// Overrides the unreadable-table policy.
    pub fn with_unreadable_policy(mut self, policy: UnreadablePolicy) -> Self {
        self.unreadable_policy = policy;
        self
    }

    /// Returns kernel entries tagged as ours, by filesystem type or by the
    /// `vaultmount@` mount source.
    pub fn tagged_entries(&self) -> io::Result<Vec<MountTableEntry>> {
        let table = self.source.read_table()?;
        Ok(table
            .lines()
            .filter_map(MountTableEntry::parse)
            .filter(|entry| {
                entry.filesystem_type.eq_ignore_ascii_case(&self.fuse_type)
                    || entry.mount_source.starts_with(FSNAME_PREFIX)
            })
            .collect())
    }

    /// Returns whether any tracked mount is present, surfacing read failures.
    pub fn poll(&self, tracked: &[MountRecord]) -> io::Result<bool> {
        if tracked.is_empty() {
            return Ok(false);
        }
        let entries = self.tagged_entries()?;
        Ok(tracked.iter().any(|record| {
            entries
                .iter()
                .any(|entry| entry.mount_point == record.mount_point)
        }))
    }

    /// Returns whether any tracked mount is present.
    ///
    /// A mount table that cannot be read is reported according to the
    /// configured [`UnreadablePolicy`].
    pub fn has_any_active(&self, tracked: &[MountRecord]) -> bool {
        match self.poll(tracked) {
            Ok(active) => active,
            Err(error) => {
                tracing::warn!(
                    %error,
                    policy = ?self.unreadable_policy,
                    "mount table unreadable, cannot confirm vault mounts"
                );
                self.unreadable_policy == UnreadablePolicy::KeepWaiting && !tracked.is_empty()
            }
        }
    }
}
