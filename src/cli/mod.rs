mod commands;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::error::{Result, VaultMountError};

const VAULT_ARG_HELP: &str = "Vault to unlock. A single vault must be given as a plain path; \
     with several vaults each one is `NAME=PATH`.";
const FUSEMOUNT_ARG_HELP: &str = "Directory to mount a vault on, as `NAME=DIR`.";
const MOUNT_FLAGS_ARG_HELP: &str =
    "Comma-separated mount options for a vault, as `NAME=FLAGS` (example: `work=allow_other,ro`).";
const PASSWORD_ARG_HELP: &str = "Inline vault passphrase, as `NAME=PASSWORD` (visible in `ps`).";
const PASSWORDFILE_ARG_HELP: &str =
    "File whose first line is the vault passphrase, as `NAME=FILE`.";
const PORT_ARG_HELP: &str = "WebDAV port (0..=65535). Enables WebDAV sharing of mounted vaults.";
const LOG_LEVEL_ARG_HELP: &str =
    "Log filter directive (example: `debug`, `vaultmount=trace`). `RUST_LOG` takes precedence.";
const CLI_AFTER_HELP: &str = r#"Examples:
  vaultmount --vault ~/vaults/work --fusemount /mnt/work
  vaultmount --vault ~/vaults/work --fusemount /mnt/work --mountFlags allow_other,ro
  vaultmount --vault work=~/vaults/work --fusemount work=/mnt/work \
             --vault home=~/vaults/home --fusemount home=/mnt/home \
             --passwordfile home=~/.config/home.pass
  vaultmount --vault ~/vaults/work --fusemount /mnt/work --bind 127.0.0.1 --port 8080

Passwords:
  Without `--password` or `--passwordfile` the passphrase is read from the terminal.

Lifecycle:
  vaultmount keeps running until every vault it mounted has been unmounted
  (for example with `fusermount -u /mnt/work`) or until SIGINT/SIGTERM/SIGHUP,
  which unmounts everything before exiting.

Config:
  Defaults are read from `.vaultmount.toml` (current directory or any parent),
  `$VAULTMOUNT_CONFIG`, or `--config FILE`. Use `--no-config` to skip it.
"#;

/// Command-line arguments after single-vault namespacing.
#[derive(Debug, Parser)]
#[command(
    name = "vaultmount",
    version,
    about = "Unlock encrypted vaults, mount them over FUSE, and stay alive until every mount is gone.",
    after_help = CLI_AFTER_HELP
)]
pub struct Cli {
    /// Vaults to unlock.
    #[arg(long = "vault", value_name = "NAME=PATH", help = VAULT_ARG_HELP)]
    pub vaults: Vec<String>,
    /// Mount points keyed by vault name.
    #[arg(long = "fusemount", value_name = "NAME=DIR", help = FUSEMOUNT_ARG_HELP)]
    pub fuse_mounts: Vec<String>,
    /// Mount options keyed by vault name.
    #[arg(long = "mountFlags", value_name = "NAME=FLAGS", help = MOUNT_FLAGS_ARG_HELP)]
    pub mount_flags: Vec<String>,
    /// Inline passphrases keyed by vault name.
    #[arg(long = "password", value_name = "NAME=PASSWORD", help = PASSWORD_ARG_HELP)]
    pub passwords: Vec<String>,
    /// Passphrase files keyed by vault name.
    #[arg(long = "passwordfile", value_name = "NAME=FILE", help = PASSWORDFILE_ARG_HELP)]
    pub password_files: Vec<String>,
    /// WebDAV bind address.
    #[arg(long, value_name = "ADDR", default_value = "localhost")]
    pub bind: String,
    /// WebDAV port.
    #[arg(long, value_name = "PORT", allow_negative_numbers = true, help = PORT_ARG_HELP)]
    pub port: Option<i64>,
    /// Config file override path.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Disable config loading and discovery.
    #[arg(long)]
    pub no_config: bool,
    /// Log level override.
    #[arg(long, value_name = "LEVEL", help = LOG_LEVEL_ARG_HELP)]
    pub log_level: Option<String>,
}

/// Runs the CLI and returns the process exit code.
pub fn run(cli: Cli) -> Result<i32> {
    commands::run(cli)
}

/// Prints `error[CODE]: message` to stderr, with usage for configuration errors.
pub fn report_error(error: &VaultMountError) {
    output::report_error(error);
}
