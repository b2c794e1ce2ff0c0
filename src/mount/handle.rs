use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{error::Result, vault::VirtualRoot};

use super::driver::{MountEnvironment, Mounter, NativeMount};

/// Lifecycle state of one vault mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    /// Not mounted.
    Unmounted,
    /// Native mount call in progress.
    Mounting,
    /// Mounted and believed active.
    Mounted,
    /// Unmount in progress.
    Unmounting,
}

/// How an [`MountHandle::unmount`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountOutcome {
    /// Regular unmount succeeded.
    Graceful,
    /// Regular unmount failed and the forced unmount succeeded.
    Forced,
    /// Both unmount attempts failed; the mount is left in place.
    Failed,
    /// Nothing was mounted.
    NotMounted,
}

/// Owns one vault mount and escalates from graceful to forced unmount.
pub struct MountHandle<M>
where
    M: Mounter,
{
    mounter: Arc<M>,
    environment: MountEnvironment,
    state: MountState,
    native: Option<M::Mount>,
}

impl<M> MountHandle<M>
where
    M: Mounter,
{
    /// Prepares a handle; nothing is mounted until [`MountHandle::mount`].
    pub fn new(mounter: Arc<M>, mount_point: PathBuf, flags: Vec<String>) -> Self {
        Self {
            mounter,
            environment: MountEnvironment { mount_point, flags },
            state: MountState::Unmounted,
            native: None,
        }
    }

    /// Mounts `root`. Returns `Ok(false)` when the handle is already mounted.
    pub fn mount(&mut self, root: &VirtualRoot) -> Result<bool> {
        if self.state != MountState::Unmounted {
            tracing::info!(
                mount_point = %self.environment.mount_point.display(),
                "already mounted"
            );
            return Ok(false);
        }

        self.state = MountState::Mounting;
        match self.mounter.mount(root, &self.environment) {
            Ok(native) => {
                self.native = Some(native);
                self.state = MountState::Mounted;
                tracing::info!(
                    mount_point = %self.environment.mount_point.display(),
                    "mounted"
                );
                Ok(true)
            }
            Err(error) => {
                self.state = MountState::Unmounted;
                Err(error)
            }
        }
    }

    /// Unmounts, falling back to a forced unmount when the regular one fails.
    ///
    /// Failures are logged, never returned; a failed forced unmount is not retried.
    pub fn unmount(&mut self) -> UnmountOutcome {
        let Some(native) = self.native.as_mut() else {
            return UnmountOutcome::NotMounted;
        };
        self.state = MountState::Unmounting;
        let mount_point = self.environment.mount_point.display().to_string();

        let outcome = match native.unmount() {
            Ok(()) => UnmountOutcome::Graceful,
            Err(error) => {
                tracing::error!(
                    %error,
                    mount_point = %mount_point,
                    "can't unmount gracefully, forcing unmount"
                );
                match native.unmount_forced() {
                    Ok(()) => UnmountOutcome::Forced,
                    Err(error) => {
                        tracing::error!(%error, mount_point = %mount_point, "force unmount failed");
                        UnmountOutcome::Failed
                    }
                }
            }
        };

        if outcome == UnmountOutcome::Failed {
            self.state = MountState::Mounted;
        } else {
            self.native = None;
            self.state = MountState::Unmounted;
            tracing::info!(mount_point = %mount_point, "unmounted");
        }
        outcome
    }

    /// Records that the mount disappeared without this handle unmounting it.
    pub fn mark_unmounted(&mut self) {
        if self.native.take().is_some() {
            tracing::debug!(
                mount_point = %self.environment.mount_point.display(),
                "mount released externally"
            );
        }
        self.state = MountState::Unmounted;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MountState {
        self.state
    }

    /// Returns `true` while mounted.
    pub fn is_mounted(&self) -> bool {
        self.state == MountState::Mounted
    }

    /// Configured mount point.
    pub fn mount_point(&self) -> &Path {
        self.native
            .as_ref()
            .map_or(self.environment.mount_point.as_path(), NativeMount::mount_point)
    }

    /// Native flags passed to the mounter.
    pub fn flags(&self) -> &[String] {
        &self.environment.flags
    }
}
