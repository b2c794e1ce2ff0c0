use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::Duration,
};

use secrecy::ExposeSecret;

use crate::{
    error::{Result, VaultMountError},
    vault::VirtualRoot,
};

use super::flags::flag_key;

const EXEC_BUSY_RETRY_ATTEMPTS: usize = 20;
const EXEC_BUSY_RETRY_DELAY: Duration = Duration::from_millis(10);
const GOCRYPTFS_WRONG_PASSWORD_EXIT_CODE: i32 = 12;
const OPTION_PREFIX: &str = "-o";
/// Flags every gocryptfs mount gets unless overridden.
pub const DEFAULT_MOUNT_FLAGS: [&str; 2] = ["-onosuid", "-onodev"];

/// Where and how to mount one unlocked vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEnvironment {
    /// Plaintext mount point.
    pub mount_point: PathBuf,
    /// Native flags in `-o<key>[=<value>]` form.
    pub flags: Vec<String>,
}

/// One mount created by a [`Mounter`].
pub trait NativeMount {
    /// Mount point of this mount.
    fn mount_point(&self) -> &Path;
    /// Requests a regular unmount.
    fn unmount(&mut self) -> Result<()>;
    /// Detaches the mount even when it is busy.
    fn unmount_forced(&mut self) -> Result<()>;
}

/// Native FUSE mount layer.
pub trait Mounter: Send + Sync {
    /// Handle type of a successful mount.
    type Mount: NativeMount;

    /// Flags applied to every mount.
    fn default_flags(&self) -> Vec<String>;
    /// Mounts `root` according to `environment`.
    fn mount(&self, root: &VirtualRoot, environment: &MountEnvironment) -> Result<Self::Mount>;
}

/// System gocryptfs/fusermount command driver.
#[derive(Debug, Clone)]
pub struct GocryptfsMounter {
    gocryptfs_binary: String,
    fusermount_binary: String,
    default_flags: Vec<String>,
}

impl GocryptfsMounter {
    /// Constructs a driver using default binary names.
    pub fn new() -> Self {
        Self::with_binaries("gocryptfs", "fusermount")
    }

    /// Constructs a driver with custom binaries.
    pub fn with_binaries(
        gocryptfs_binary: impl Into<String>,
        fusermount_binary: impl Into<String>,
    ) -> Self {
        Self {
            gocryptfs_binary: gocryptfs_binary.into(),
            fusermount_binary: fusermount_binary.into(),
            default_flags: DEFAULT_MOUNT_FLAGS.map(str::to_owned).to_vec(),
        }
    }

    /// Replaces the default mount flags.
    pub fn with_default_flags(mut self, default_flags: Vec<String>) -> Self {
        self.default_flags = default_flags;
        self
    }

    /// Binaries this driver executes.
    pub fn binaries(&self) -> [&str; 2] {
        [&self.gocryptfs_binary, &self.fusermount_binary]
    }
}

impl Default for GocryptfsMounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Mounter for GocryptfsMounter {
    type Mount = GocryptfsMount;

    fn default_flags(&self) -> Vec<String> {
        self.default_flags.clone()
    }

    fn mount(&self, root: &VirtualRoot, environment: &MountEnvironment) -> Result<Self::Mount> {
        let mut command = Command::new(&self.gocryptfs_binary);
        command.args(gocryptfs_flag_args(&environment.flags));
        command
            .arg(&root.vault_path)
            .arg(&environment.mount_point)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        let mut child = retry_exec_busy(|| command.spawn())
            .map_err(|error| map_command_execution_error(&self.gocryptfs_binary, error))?;
        if let Some(mut stdin) = child.stdin.take() {
            let written = stdin
                .write_all(root.passphrase.expose_secret().as_bytes())
                .and_then(|_| stdin.write_all(b"\n"));
            if let Err(error) = written {
                if error.kind() != io::ErrorKind::BrokenPipe {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(VaultMountError::Io(error));
                }
            }
        }

        let status = child.wait()?;
        if status.success() {
            return Ok(GocryptfsMount {
                mount_point: environment.mount_point.clone(),
                fusermount_binary: self.fusermount_binary.clone(),
            });
        }
        if status.code() == Some(GOCRYPTFS_WRONG_PASSWORD_EXIT_CODE) {
            return Err(VaultMountError::MountFailure(format!(
                "vault rejected the passphrase: {}",
                root.vault_path.display()
            )));
        }
        Err(VaultMountError::MountFailure(format!(
            "gocryptfs exited with {status} for {}",
            environment.mount_point.display()
        )))
    }
}

/// A gocryptfs mount released through fusermount.
#[derive(Debug, Clone)]
pub struct GocryptfsMount {
    mount_point: PathBuf,
    fusermount_binary: String,
}

impl GocryptfsMount {
    fn run_fusermount(&self, args: &[&str]) -> Result<()> {
        let status = retry_exec_busy(|| {
            Command::new(&self.fusermount_binary)
                .args(args)
                .arg(&self.mount_point)
                .status()
        })
        .map_err(|error| map_command_execution_error(&self.fusermount_binary, error))?;
        if status.success() {
            return Ok(());
        }
        Err(VaultMountError::UnmountFailure(format!(
            "{} {} exited with {status}",
            self.fusermount_binary,
            args.join(" ")
        )))
    }
}

impl NativeMount for GocryptfsMount {
    fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    fn unmount(&mut self) -> Result<()> {
        self.run_fusermount(&["-u"])
    }

    fn unmount_forced(&mut self) -> Result<()> {
        self.run_fusermount(&["-u", "-z"])
    }
}

/// Translates native `-o` flags into gocryptfs arguments.
///
/// `fsname` becomes `-fsname`, other options are folded into one `-ko` list,
/// and anything else is passed through unchanged. `subtype` is dropped:
/// gocryptfs always sets its own, so its mounts show up as `fuse.gocryptfs`.
pub fn gocryptfs_flag_args(flags: &[String]) -> Vec<String> {
    let mut args = Vec::new();
    let mut kernel_options = Vec::new();
    for flag in flags {
        match flag.strip_prefix(OPTION_PREFIX) {
            Some(option) if flag_key(flag) == Some("fsname") => {
                let value = option.split_once('=').map_or("", |(_, value)| value);
                args.push("-fsname".to_owned());
                args.push(value.to_owned());
            }
            Some(_) if flag_key(flag) == Some("subtype") => {}
            Some(option) if !option.is_empty() => kernel_options.push(option.to_owned()),
            Some(_) => {}
            None => args.push(flag.clone()),
        }
    }
    if !kernel_options.is_empty() {
        args.push("-ko".to_owned());
        args.push(kernel_options.join(","));
    }
    args
}

/// Returns the binaries from `binaries` that cannot be found.
pub fn missing_binaries<'a>(binaries: &[&'a str]) -> Vec<&'a str> {
    binaries
        .iter()
        .copied()
        .filter(|binary| !is_binary_available(binary))
        .collect()
}

fn is_binary_available(binary: &str) -> bool {
    let candidate = Path::new(binary);
    if candidate
        .parent()
        .is_some_and(|parent| !parent.as_os_str().is_empty())
    {
        return is_executable_file(candidate);
    }

    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|directory| is_executable_file(&directory.join(binary)))
}

fn is_executable_file(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}

fn map_command_execution_error(binary: &str, error: io::Error) -> VaultMountError {
    if error.kind() == io::ErrorKind::NotFound {
        return VaultMountError::MissingBinary(binary.to_owned());
    }
    VaultMountError::Io(error)
}

fn retry_exec_busy<T, F>(mut operation: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    let mut last_error = None;
    for attempt in 0..EXEC_BUSY_RETRY_ATTEMPTS {
        match operation() {
            Ok(value) => return Ok(value),
            Err(error) if is_exec_busy_error(&error) && attempt + 1 < EXEC_BUSY_RETRY_ATTEMPTS => {
                last_error = Some(error);
                thread::sleep(EXEC_BUSY_RETRY_DELAY);
            }
            Err(error) => return Err(error),
        }
    }

    Err(last_error.unwrap_or_else(|| io::Error::other("command execution failed")))
}

fn is_exec_busy_error(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::ExecutableFileBusy || error.raw_os_error() == Some(libc::ETXTBSY)
}
