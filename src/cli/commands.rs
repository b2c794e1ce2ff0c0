use std::{
    collections::BTreeMap,
    env::VarError,
    path::{Path, PathBuf},
};

use crate::{
    config::{resolve_config_path, VaultMountConfig, CONFIG_ENV_VAR},
    error::{Result, VaultMountError},
    mount::{driver::missing_binaries, GocryptfsMounter, MountTableWatcher, ProcMountInfo},
    namespace::parse_keyed_value,
    orchestrator::MountOrchestrator,
    share::WebDavPublisher,
    shutdown::ShutdownSignal,
    telemetry,
    vault::{
        validate_launch, CipherDirProvider, InlinePassword, PasswordFile, PasswordStrategy,
        PromptPassword, VaultSpec,
    },
};

use super::Cli;

type CliOrchestrator =
    MountOrchestrator<CipherDirProvider, GocryptfsMounter, WebDavPublisher, ProcMountInfo>;

pub(crate) fn run(cli: Cli) -> Result<i32> {
    let config = load_config(&cli)?;
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let _logging = telemetry::init(level, config.logging.format);
    if let Some(path) = &config.source_path {
        tracing::debug!(config = %path.display(), "loaded config");
    }

    let specs = build_vault_specs(&cli)?;
    let webdav = validate_launch(&specs, cli.port.map(|port| (cli.bind.as_str(), port)))?;

    let mounter = GocryptfsMounter::with_binaries(
        config.mount.gocryptfs_binary.clone(),
        config.mount.fusermount_binary.clone(),
    )
    .with_default_flags(config.mount.default_flags.clone());
    if specs.iter().any(|spec| spec.mount_point.is_some()) {
        ensure_binaries(&mounter.binaries())?;
    }
    if webdav.is_some() {
        ensure_binaries(&[config.webdav_server_binary.as_str()])?;
    }

    let shutdown = ShutdownSignal::process();
    let watcher = MountTableWatcher::new(ProcMountInfo::with_path(&config.monitor.mount_table))
        .with_fuse_type(config.mount.fuse_type.clone())
        .with_unreadable_policy(config.monitor.on_unreadable);
    let provider = CipherDirProvider::with_config_file(&config.mount.vault_config_file);
    let mut orchestrator: CliOrchestrator = MountOrchestrator::new(provider, mounter, watcher)
        .with_poll_interval(config.monitor.poll_interval);
    if let Some(settings) = webdav {
        let publisher = WebDavPublisher::with_binary(config.webdav_server_binary.clone(), settings);
        tracing::info!(url = %publisher.url(), "WebDAV sharing enabled");
        orchestrator = orchestrator.with_publisher(publisher);
    }

    let mounts = orchestrator.run(&specs, &shutdown)?;
    tracing::debug!(
        mounted = mounts.len(),
        requested = specs.len(),
        "vaultmount finished"
    );
    Ok(0)
}

fn load_config(cli: &Cli) -> Result<VaultMountConfig> {
    let env_path = match std::env::var(CONFIG_ENV_VAR) {
        Ok(value) => Some(value),
        Err(VarError::NotPresent) => None,
        Err(VarError::NotUnicode(_)) => {
            return Err(VaultMountError::Configuration(format!(
                "{CONFIG_ENV_VAR} must be valid UTF-8"
            )))
        }
    };
    let cwd = std::env::current_dir()?;
    let selection = resolve_config_path(
        cli.config.as_deref(),
        env_path.as_deref(),
        cli.no_config,
        cwd,
    )?;
    VaultMountConfig::load(&selection)
}

fn ensure_binaries(binaries: &[&str]) -> Result<()> {
    let missing = missing_binaries(binaries);
    if missing.is_empty() {
        return Ok(());
    }
    Err(VaultMountError::MissingBinary(missing.join(", ")))
}

/// Assembles vault specs from the keyed CLI values, in `--vault` order.
pub(crate) fn build_vault_specs(cli: &Cli) -> Result<Vec<VaultSpec>> {
    let vaults = cli
        .vaults
        .iter()
        .map(|raw| parse_keyed_value(raw))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut mount_points = keyed_values(&cli.fuse_mounts, "--fusemount")?;
    let mut mount_flags = keyed_values(&cli.mount_flags, "--mountFlags")?;
    let mut passwords = keyed_values(&cli.passwords, "--password")?;
    let mut password_files = keyed_values(&cli.password_files, "--passwordfile")?;

    let mut specs = Vec::with_capacity(vaults.len());
    for (name, vault_path) in vaults {
        let password = password_strategy(
            &name,
            passwords.remove(&name),
            password_files.remove(&name).map(PathBuf::from),
        );
        specs.push(VaultSpec {
            vault_path: PathBuf::from(vault_path),
            mount_point: mount_points.remove(&name).map(PathBuf::from),
            mount_flags: mount_flags.remove(&name),
            password,
            name,
        });
    }

    for (flag, leftovers) in [
        ("--fusemount", mount_points),
        ("--mountFlags", mount_flags),
        ("--password", passwords),
        ("--passwordfile", password_files),
    ] {
        for name in leftovers.keys() {
            tracing::warn!(vault = %name, flag, "ignoring value for undeclared vault");
        }
    }
    Ok(specs)
}

fn keyed_values(raw_values: &[String], flag: &str) -> Result<BTreeMap<String, String>> {
    let mut values = BTreeMap::new();
    for raw in raw_values {
        let (name, value) = parse_keyed_value(raw)?;
        if values.insert(name.clone(), value).is_some() {
            return Err(VaultMountError::Configuration(format!(
                "{flag} is given more than once for vault \"{name}\"."
            )));
        }
    }
    Ok(values)
}

fn password_strategy(
    name: &str,
    inline: Option<String>,
    file: Option<PathBuf>,
) -> Box<dyn PasswordStrategy> {
    match (inline, file) {
        (Some(value), file) => {
            if let Some(path) = file {
                warn_ignored_password_file(name, &path);
            }
            Box::new(InlinePassword::new(name, value))
        }
        (None, Some(path)) => Box::new(PasswordFile::new(name, path)),
        (None, None) => Box::new(PromptPassword::new(name)),
    }
}

fn warn_ignored_password_file(name: &str, path: &Path) {
    tracing::warn!(
        vault = %name,
        password_file = %path.display(),
        "--password takes precedence over --passwordfile"
    );
}

#[cfg(test)]
mod unit_tests {
    use clap::Parser;

    use super::build_vault_specs;
    use crate::{
        cli::Cli,
        error::{ValidationError, VaultMountError},
    };

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("vaultmount").chain(args.iter().copied()))
    }

    #[test]
    fn specs_follow_vault_declaration_order() {
        let specs = build_vault_specs(&cli(&[
            "--vault",
            "b=/v/b",
            "--vault",
            "a=/v/a",
            "--fusemount",
            "a=/m/a",
            "--mountFlags",
            "a=ro",
        ]))
        .unwrap();
        let names = specs.iter().map(|spec| spec.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["b", "a"]);
        assert!(specs[0].mount_point.is_none());
        assert_eq!(specs[1].mount_point.as_deref(), Some(std::path::Path::new("/m/a")));
        assert_eq!(specs[1].mount_flags.as_deref(), Some("ro"));
    }

    #[test]
    fn password_sources_take_precedence_in_order() {
        let specs = build_vault_specs(&cli(&[
            "--vault",
            "a=/v/a",
            "--vault",
            "b=/v/b",
            "--vault",
            "c=/v/c",
            "--password",
            "a=pw",
            "--passwordfile",
            "a=/p/a",
            "--passwordfile",
            "b=/p/b",
        ]))
        .unwrap();
        let kinds = specs
            .iter()
            .map(|spec| spec.password.describe())
            .collect::<Vec<_>>();
        assert_eq!(kinds, ["inline", "file", "prompt"]);
    }

    #[test]
    fn malformed_vault_argument_is_a_validation_error() {
        let error = build_vault_specs(&cli(&["--vault", "/v/a"])).unwrap_err();
        assert!(matches!(
            error,
            VaultMountError::Validation(ValidationError::MissingSeparator(_))
        ));
    }

    #[test]
    fn repeated_keyed_value_is_rejected() {
        let error = build_vault_specs(&cli(&[
            "--vault",
            "a=/v/a",
            "--fusemount",
            "a=/m/1",
            "--fusemount",
            "a=/m/2",
        ]))
        .unwrap_err();
        assert!(matches!(error, VaultMountError::Configuration(_)));
    }
}
