use std::{fs, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    mount::{MountFlags, MountHandle, MountRecord, MountTableSource, MountTableWatcher, Mounter},
    share::SharePublisher,
    shutdown::ShutdownSignal,
    vault::{validate_launch, VaultProvider, VaultSpec},
};

/// Interval between mount table checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A vault mount this process started and still tracks.
pub struct ActiveMount<M>
where
    M: Mounter,
{
    /// Vault name.
    pub vault_name: String,
    /// Vault path and mount point as matched against the mount table.
    pub record: MountRecord,
    /// Handle owning the native mount.
    pub handle: MountHandle<M>,
    /// When the mount succeeded.
    pub mounted_at: DateTime<Utc>,
}

/// Why [`MountOrchestrator::watch`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// No tracked mount is left in the mount table.
    AllUnmounted,
    /// Shutdown was requested and the tracked mounts were unmounted.
    ShutdownRequested,
}

/// Coordinator for unlocking, mounting, publishing, and watching vaults.
pub struct MountOrchestrator<P, M, S, T>
where
    P: VaultProvider,
    M: Mounter,
    S: SharePublisher,
    T: MountTableSource,
{
    provider: P,
    mounter: Arc<M>,
    publisher: Option<S>,
    watcher: MountTableWatcher<T>,
    poll_interval: Duration,
}

impl<P, M, S, T> MountOrchestrator<P, M, S, T>
where
    P: VaultProvider,
    M: Mounter,
    S: SharePublisher,
    T: MountTableSource,
{
    /// Constructs an orchestrator without a share publisher.
    pub fn new(provider: P, mounter: M, watcher: MountTableWatcher<T>) -> Self {
        Self {
            provider,
            mounter: Arc::new(mounter),
            publisher: None,
            watcher,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Publishes every mounted vault through `publisher`.
    pub fn with_publisher(mut self, publisher: S) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Overrides the mount table poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Share publisher, when configured.
    pub fn publisher(&self) -> Option<&S> {
        self.publisher.as_ref()
    }

    /// Validates, mounts every vault, and blocks until the mounts are gone.
    ///
    /// Only pre-flight validation and arming `shutdown` can fail the run;
    /// per-vault failures are logged and skipped. `shutdown` is armed after
    /// the last vault is mounted, so a signal during unlock keeps its default
    /// action.
    pub fn run(
        &mut self,
        specs: &[VaultSpec],
        shutdown: &ShutdownSignal,
    ) -> Result<Vec<ActiveMount<M>>> {
        validate_launch(specs, None)?;
        let mut mounts = self.mount_all(specs, shutdown);
        if shutdown.is_triggered() {
            tracing::info!("shutdown requested during startup, unmounting vaults");
            unmount_all(&mut mounts);
            return Ok(mounts);
        }
        if let Err(error) = shutdown.arm() {
            unmount_all(&mut mounts);
            return Err(error);
        }
        self.watch(&mut mounts, shutdown);
        Ok(mounts)
    }

    /// Unlocks and mounts each vault in turn, skipping vaults that fail.
    ///
    /// Stops before the next vault once `shutdown` is triggered.
    pub fn mount_all(
        &mut self,
        specs: &[VaultSpec],
        shutdown: &ShutdownSignal,
    ) -> Vec<ActiveMount<M>> {
        let mut mounts = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            if shutdown.is_triggered() {
                tracing::warn!(
                    skipped = specs.len() - index,
                    "shutdown requested, not mounting remaining vaults"
                );
                break;
            }
            match self.mount_vault(spec) {
                Ok(Some(mount)) => mounts.push(mount),
                Ok(None) => {}
                Err(error) => {
                    tracing::error!(vault = %spec.name, %error, "skipping vault");
                }
            }
        }
        mounts
    }

    fn mount_vault(&mut self, spec: &VaultSpec) -> Result<Option<ActiveMount<M>>> {
        tracing::info!(
            vault = %spec.name,
            vault_path = %spec.vault_path.display(),
            "unlocking vault"
        );
        let passphrase = spec.password.password()?;
        let root = self.provider.open(&spec.name, &spec.vault_path, passphrase)?;

        let Some(mount_point) = &spec.mount_point else {
            tracing::info!(vault = %spec.name, "vault unlocked without mount point");
            return Ok(None);
        };
        // The kernel lists mount points in canonical form.
        let mount_point = fs::canonicalize(mount_point)?;

        let user_flags = spec
            .mount_flags
            .as_deref()
            .map(MountFlags::parse_raw)
            .unwrap_or_default();
        let flags = MountFlags::for_vault(
            &self.mounter.default_flags(),
            &user_flags,
            &spec.vault_path,
        );
        let mut handle = MountHandle::new(
            Arc::clone(&self.mounter),
            mount_point.clone(),
            flags.into_vec(),
        );
        handle.mount(&root)?;

        let mount = ActiveMount {
            vault_name: spec.name.clone(),
            record: MountRecord::for_paths(&spec.vault_path, &mount_point),
            handle,
            mounted_at: Utc::now(),
        };
        if let Some(publisher) = self.publisher.as_mut() {
            if let Err(error) = publisher.publish(&spec.name, &root, &mount_point) {
                tracing::error!(vault = %spec.name, %error, "vault mounted but not published");
            }
        }
        Ok(Some(mount))
    }

    /// Blocks until no tracked mount is left or shutdown is requested.
    ///
    /// Mounts that vanish from the mount table are marked unmounted without
    /// calling the native layer. On shutdown every still-mounted vault is
    /// unmounted.
    pub fn watch(&self, mounts: &mut [ActiveMount<M>], shutdown: &ShutdownSignal) -> WatchOutcome {
        let tracked = mounts
            .iter()
            .map(|mount| mount.record.clone())
            .collect::<Vec<_>>();
        tracing::info!(mounts = tracked.len(), "watching vault mounts");
        loop {
            if !self.watcher.has_any_active(&tracked) {
                tracing::info!("all vaults are locked, exiting");
                for mount in mounts.iter_mut() {
                    mount.handle.mark_unmounted();
                }
                return WatchOutcome::AllUnmounted;
            }
            if shutdown.wait_timeout(self.poll_interval) {
                tracing::info!(
                    signal = ?shutdown.received_signal(),
                    "shutdown requested, unmounting vaults"
                );
                unmount_all(mounts);
                return WatchOutcome::ShutdownRequested;
            }
        }
    }
}

fn unmount_all<M>(mounts: &mut [ActiveMount<M>])
where
    M: Mounter,
{
    for mount in mounts.iter_mut() {
        let outcome = mount.handle.unmount();
        tracing::debug!(vault = %mount.vault_name, ?outcome, "unmount finished");
    }
}
