//! FUSE mount handling: native driver, mount handles, and mount table watching.

/// Native mount layer and the gocryptfs command driver.
pub mod driver;
/// Structured mount flags.
pub mod flags;
/// Mount handle with graceful-then-forced unmount.
pub mod handle;
/// Kernel mount table parsing and watching.
pub mod table;

pub use driver::{GocryptfsMounter, MountEnvironment, Mounter, NativeMount};
pub use flags::MountFlags;
pub use handle::{MountHandle, MountState, UnmountOutcome};
pub use table::{
    MountRecord, MountTableEntry, MountTableSource, MountTableWatcher, ProcMountInfo,
    UnreadablePolicy,
};
