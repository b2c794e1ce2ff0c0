use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use serde::Deserialize;

use crate::{
    error::{Result, VaultMountError},
    mount::{
        driver::DEFAULT_MOUNT_FLAGS,
        table::{DEFAULT_FUSE_TYPE, PROC_MOUNTINFO_PATH},
        UnreadablePolicy,
    },
    telemetry::{LogFormat, DEFAULT_LOG_LEVEL},
    vault::provider::GOCRYPTFS_CONFIG_FILE,
};

const CONFIG_VERSION_V1: u32 = 1;
const DEFAULT_GOCRYPTFS_BINARY: &str = "gocryptfs";
const DEFAULT_FUSERMOUNT_BINARY: &str = "fusermount";
const DEFAULT_WEBDAV_SERVER_BINARY: &str = "rclone";
const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 2;

/// Default config file name.
pub const CONFIG_FILE_NAME: &str = ".vaultmount.toml";
/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "VAULTMOUNT_CONFIG";

/// Source used to select the effective config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Selected via `--config` CLI flag.
    Flag,
    /// Selected via `VAULTMOUNT_CONFIG` environment variable.
    Env,
    /// Selected by walking from the current working directory to root.
    Discovered,
    /// No config file selected.
    None,
}

/// Resolved config selection before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSelection {
    /// Source used for selection.
    pub source: ConfigSource,
    /// Selected path when a config file was found.
    pub path: Option<PathBuf>,
}

/// Raw TOML shape for one `.vaultmount.toml` file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VaultMountConfigFile {
    /// Schema version.
    pub version: u32,
    /// Native mount settings.
    #[serde(default)]
    pub mount: MountConfigFile,
    /// Mount table monitoring settings.
    #[serde(default)]
    pub monitor: MonitorConfigFile,
    /// WebDAV share settings.
    #[serde(default)]
    pub webdav: WebDavConfigFile,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfigFile,
}

/// Raw `[mount]` section from TOML.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MountConfigFile {
    /// gocryptfs binary.
    pub gocryptfs_binary: Option<String>,
    /// fusermount binary.
    pub fusermount_binary: Option<String>,
    /// Flags applied to every mount.
    pub default_flags: Option<Vec<String>>,
    /// Filesystem type that identifies our mounts in the mount table.
    pub fuse_type: Option<String>,
    /// File that marks a directory as a vault.
    pub vault_config_file: Option<String>,
}

/// Raw `[monitor]` section from TOML.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfigFile {
    /// Seconds between mount table checks.
    pub poll_interval_seconds: Option<u64>,
    /// Behaviour when the mount table cannot be read.
    pub on_unreadable: Option<UnreadablePolicy>,
    /// Mount table file.
    pub mount_table: Option<String>,
}

/// Raw `[webdav]` section from TOML.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WebDavConfigFile {
    /// WebDAV server binary.
    pub server_binary: Option<String>,
}

/// Raw `[logging]` section from TOML.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfigFile {
    /// Log filter directive, for example `info` or `vaultmount=debug`.
    pub level: Option<String>,
    /// Log line format.
    pub format: Option<LogFormat>,
}

/// Effective native mount settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSettings {
    /// gocryptfs binary.
    pub gocryptfs_binary: String,
    /// fusermount binary.
    pub fusermount_binary: String,
    /// Flags applied to every mount.
    pub default_flags: Vec<String>,
    /// Filesystem type that identifies our mounts.
    pub fuse_type: String,
    /// File that marks a directory as a vault.
    pub vault_config_file: String,
}

/// Effective monitoring settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Interval between mount table checks.
    pub poll_interval: Duration,
    /// Behaviour when the mount table cannot be read.
    pub on_unreadable: UnreadablePolicy,
    /// Mount table file.
    pub mount_table: PathBuf,
}

/// Effective logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Log filter directive.
    pub level: String,
    /// Log line format.
    pub format: LogFormat,
}

/// Effective and validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultMountConfig {
    /// Config file the values came from, if any.
    pub source_path: Option<PathBuf>,
    /// Native mount settings.
    pub mount: MountSettings,
    /// Mount table monitoring settings.
    pub monitor: MonitorSettings,
    /// WebDAV server binary.
    pub webdav_server_binary: String,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl Default for VaultMountConfig {
    fn default() -> Self {
        Self {
            source_path: None,
            mount: MountSettings {
                gocryptfs_binary: DEFAULT_GOCRYPTFS_BINARY.to_owned(),
                fusermount_binary: DEFAULT_FUSERMOUNT_BINARY.to_owned(),
                default_flags: DEFAULT_MOUNT_FLAGS.map(str::to_owned).to_vec(),
                fuse_type: DEFAULT_FUSE_TYPE.to_owned(),
                vault_config_file: GOCRYPTFS_CONFIG_FILE.to_owned(),
            },
            monitor: MonitorSettings {
                poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECONDS),
                on_unreadable: UnreadablePolicy::default(),
                mount_table: PathBuf::from(PROC_MOUNTINFO_PATH),
            },
            webdav_server_binary: DEFAULT_WEBDAV_SERVER_BINARY.to_owned(),
            logging: LoggingSettings {
                level: DEFAULT_LOG_LEVEL.to_owned(),
                format: LogFormat::default(),
            },
        }
    }
}

impl VaultMountConfig {
    /// Loads and validates a config file from disk.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let absolute_path = anchored(path.as_ref(), &cwd);
        if !absolute_path.exists() {
            return Err(VaultMountError::Configuration(format!(
                "config file does not exist: {}",
                absolute_path.display()
            )));
        }

        validate_config_file_permissions(&absolute_path)?;
        let raw = fs::read_to_string(&absolute_path)?;
        Self::parse_from_str(&raw, absolute_path)
    }

    /// Parses and validates config from TOML text.
    pub fn parse_from_str(raw: &str, source_path: impl AsRef<Path>) -> Result<Self> {
        let parsed = toml::from_str::<VaultMountConfigFile>(raw)?;
        build_config(parsed, source_path.as_ref())
    }

    /// Loads the config selected by `selection`, or defaults when none is selected.
    pub fn load(selection: &ConfigSelection) -> Result<Self> {
        match &selection.path {
            Some(path) => Self::load_from_path(path),
            None => Ok(Self::default()),
        }
    }
}

/// Resolves one config path based on precedence rules.
pub fn resolve_config_path(
    explicit_path: Option<&Path>,
    env_path: Option<&str>,
    no_config: bool,
    cwd: impl AsRef<Path>,
) -> Result<ConfigSelection> {
    if no_config {
        return Ok(ConfigSelection {
            source: ConfigSource::None,
            path: None,
        });
    }

    let cwd = cwd.as_ref();
    if let Some(path) = explicit_path {
        return select_file(ConfigSource::Flag, anchored(path, cwd));
    }

    if let Some(value) = env_path {
        if value.trim().is_empty() {
            return Err(VaultMountError::Configuration(format!(
                "{CONFIG_ENV_VAR} cannot be empty"
            )));
        }

        return select_file(ConfigSource::Env, anchored(Path::new(value), cwd));
    }

    if let Some(discovered) = discover_config(cwd) {
        return Ok(ConfigSelection {
            source: ConfigSource::Discovered,
            path: Some(discovered),
        });
    }

    Ok(ConfigSelection {
        source: ConfigSource::None,
        path: None,
    })
}

/// Discovers `.vaultmount.toml` by walking from `start_dir` to filesystem root.
pub fn discover_config(start_dir: impl AsRef<Path>) -> Option<PathBuf> {
    let mut current = start_dir.as_ref();
    loop {
        let candidate = current.join(CONFIG_FILE_NAME);
        if is_regular_config_candidate(&candidate) {
            return Some(candidate);
        }

        let parent = current.parent()?;
        current = parent;
    }
}

fn build_config(raw: VaultMountConfigFile, source_path: &Path) -> Result<VaultMountConfig> {
    if raw.version != CONFIG_VERSION_V1 {
        return Err(VaultMountError::Configuration(format!(
            "unsupported config version {} (expected {CONFIG_VERSION_V1})",
            raw.version
        )));
    }
    let defaults = VaultMountConfig::default();

    let mount = MountSettings {
        gocryptfs_binary: resolve_literal(
            raw.mount.gocryptfs_binary,
            defaults.mount.gocryptfs_binary,
            "mount.gocryptfs_binary",
        )?,
        fusermount_binary: resolve_literal(
            raw.mount.fusermount_binary,
            defaults.mount.fusermount_binary,
            "mount.fusermount_binary",
        )?,
        default_flags: match raw.mount.default_flags {
            Some(flags) => validate_default_flags(flags)?,
            None => defaults.mount.default_flags,
        },
        fuse_type: resolve_literal(
            raw.mount.fuse_type,
            defaults.mount.fuse_type,
            "mount.fuse_type",
        )?,
        vault_config_file: resolve_literal(
            raw.mount.vault_config_file,
            defaults.mount.vault_config_file,
            "mount.vault_config_file",
        )?,
    };

    let poll_interval_seconds = raw
        .monitor
        .poll_interval_seconds
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECONDS);
    if poll_interval_seconds == 0 {
        return Err(VaultMountError::Configuration(
            "monitor.poll_interval_seconds must be greater than zero".to_owned(),
        ));
    }
    let mount_table = match raw.monitor.mount_table {
        Some(value) => {
            validate_path_literal(&value, "monitor.mount_table")?;
            let source_dir = source_path.parent().unwrap_or(Path::new("."));
            anchored(Path::new(&value), source_dir)
        }
        None => defaults.monitor.mount_table,
    };
    let monitor = MonitorSettings {
        poll_interval: Duration::from_secs(poll_interval_seconds),
        on_unreadable: raw.monitor.on_unreadable.unwrap_or_default(),
        mount_table,
    };

    let logging = LoggingSettings {
        level: resolve_literal(raw.logging.level, defaults.logging.level, "logging.level")?,
        format: raw.logging.format.unwrap_or_default(),
    };

    Ok(VaultMountConfig {
        source_path: Some(source_path.to_path_buf()),
        mount,
        monitor,
        webdav_server_binary: resolve_literal(
            raw.webdav.server_binary,
            defaults.webdav_server_binary,
            "webdav.server_binary",
        )?,
        logging,
    })
}

fn resolve_literal(value: Option<String>, default: String, label: &str) -> Result<String> {
    match value {
        Some(value) => {
            validate_path_literal(&value, label)?;
            Ok(value)
        }
        None => Ok(default),
    }
}

fn validate_default_flags(flags: Vec<String>) -> Result<Vec<String>> {
    for flag in &flags {
        if !flag.starts_with('-') || flag.len() < 2 {
            return Err(VaultMountError::Configuration(format!(
                "mount.default_flags entries must look like `-o<option>`, got `{flag}`"
            )));
        }
    }
    Ok(flags)
}

fn validate_path_literal(value: &str, label: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(VaultMountError::Configuration(format!(
            "{label} cannot be empty"
        )));
    }
    Ok(())
}

fn anchored(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn validate_config_file_permissions(path: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() || !metadata.file_type().is_file() {
        return Err(VaultMountError::Configuration(format!(
            "config path must be a regular file: {}",
            path.display()
        )));
    }

    #[cfg(unix)]
    {
        let mode = metadata.permissions().mode() & 0o777;
        if mode & 0o022 != 0 {
            return Err(VaultMountError::Configuration(format!(
                "config file must not be group/world writable: {}",
                path.display()
            )));
        }
    }

    Ok(())
}

fn select_file(source: ConfigSource, candidate: PathBuf) -> Result<ConfigSelection> {
    if !is_regular_config_candidate(&candidate) {
        return Err(VaultMountError::Configuration(format!(
            "config file must be a regular file: {}",
            candidate.display()
        )));
    }
    Ok(ConfigSelection {
        source,
        path: Some(candidate),
    })
}

fn is_regular_config_candidate(path: &Path) -> bool {
    let Ok(metadata) = fs::symlink_metadata(path) else {
        return false;
    };
    !metadata.file_type().is_symlink() && metadata.file_type().is_file()
}
