mod common;

use std::{
    fs,
    path::Path,
    time::{Duration, Instant},
};

use common::{
    events, mountinfo_line, mounted_vault_spec, vault_dirs, vault_spec, AcceptingProvider,
    EventLog, RecordingMounter, RecordingPublisher, ScriptedTable,
};
use secrecy::SecretString;
use vaultmount::{
    error::Result,
    mount::{MountState, MountTableWatcher},
    orchestrator::{MountOrchestrator, WatchOutcome},
    shutdown::ShutdownSignal,
    vault::PasswordStrategy,
};

type TestOrchestrator =
    MountOrchestrator<AcceptingProvider, RecordingMounter, RecordingPublisher, ScriptedTable>;

const SHORT_POLL: Duration = Duration::from_millis(20);

fn active_table(mount_points: &[&Path]) -> String {
    mount_points
        .iter()
        .map(|mount_point| {
            mountinfo_line(
                &mount_point.display().to_string(),
                "fuse.vaultmount",
                "vaultmount@vault",
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Password source that requests shutdown while the vault is unlocking.
struct ShutdownDuringUnlock {
    shutdown: ShutdownSignal,
}

impl PasswordStrategy for ShutdownDuringUnlock {
    fn password(&self) -> Result<SecretString> {
        self.shutdown.trigger();
        Ok(SecretString::new("passphrase".to_owned()))
    }

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> &'static str {
        "test"
    }
}

fn orchestrator(mounter: RecordingMounter, table: ScriptedTable) -> TestOrchestrator {
    MountOrchestrator::new(AcceptingProvider, mounter, MountTableWatcher::new(table))
        .with_poll_interval(SHORT_POLL)
}

#[test]
fn failed_mount_skips_only_that_vault() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (first, first_mount) = vault_dirs(temp_dir.path(), "first");
    let (second, second_mount) = vault_dirs(temp_dir.path(), "second");
    let log = EventLog::default();
    let publisher = RecordingPublisher {
        log: log.clone(),
        fail: false,
    };

    let mut orchestrator = orchestrator(
        RecordingMounter::new(log.clone()).failing_on(&second_mount),
        ScriptedTable::default(),
    )
    .with_publisher(publisher);
    let mounts = orchestrator.mount_all(
        &[
            mounted_vault_spec("first", &first, &first_mount),
            mounted_vault_spec("second", &second, &second_mount),
        ],
        &ShutdownSignal::manual(),
    );

    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0].vault_name, "first");
    assert_eq!(mounts[0].handle.state(), MountState::Mounted);
    assert_eq!(
        mounts[0].record.mount_point,
        first_mount.display().to_string()
    );
    let published = events(&log)
        .into_iter()
        .filter(|event| event.starts_with("publish"))
        .collect::<Vec<_>>();
    assert_eq!(
        published,
        [format!("publish first {}", first_mount.display())]
    );
}

#[test]
fn mount_flags_combine_defaults_user_flags_and_identification() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (vault_path, mount_point) = vault_dirs(temp_dir.path(), "work");
    let log = EventLog::default();
    let mut spec = mounted_vault_spec("work", &vault_path, &mount_point);
    spec.mount_flags = Some("uid%3D1000,ro".to_owned());

    let mut orchestrator = orchestrator(RecordingMounter::new(log.clone()), ScriptedTable::default());
    let mounts = orchestrator.mount_all(&[spec], &ShutdownSignal::manual());

    assert_eq!(
        mounts[0].handle.flags(),
        [
            "-onosuid".to_owned(),
            "-ouid=1000".to_owned(),
            "-oro".to_owned(),
            "-osubtype=vaultmount".to_owned(),
            format!("-ofsname=vaultmount@{}", vault_path.display()),
        ]
    );
}

#[test]
fn vault_without_mount_point_is_unlocked_but_not_tracked() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (vault_path, _) = vault_dirs(temp_dir.path(), "work");
    let log = EventLog::default();

    let mut orchestrator = orchestrator(RecordingMounter::new(log.clone()), ScriptedTable::default());
    let mounts = orchestrator.mount_all(&[vault_spec("work", &vault_path)], &ShutdownSignal::manual());

    assert!(mounts.is_empty());
    assert!(events(&log).is_empty());
}

#[test]
fn publish_failure_keeps_the_mount() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (vault_path, mount_point) = vault_dirs(temp_dir.path(), "work");
    let log = EventLog::default();
    let publisher = RecordingPublisher {
        log: log.clone(),
        fail: true,
    };

    let mut orchestrator = orchestrator(RecordingMounter::new(log.clone()), ScriptedTable::default())
        .with_publisher(publisher);
    let mounts = orchestrator.mount_all(
        &[mounted_vault_spec("work", &vault_path, &mount_point)],
        &ShutdownSignal::manual(),
    );

    assert_eq!(mounts.len(), 1);
    assert!(orchestrator.publisher().is_some());
}

#[test]
fn run_ends_once_mounts_leave_the_table() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (vault_path, mount_point) = vault_dirs(temp_dir.path(), "work");
    let log = EventLog::default();
    let table = ScriptedTable::default()
        .then_table(active_table(&[&mount_point]))
        .then_table(active_table(&[]));

    let mut orchestrator = orchestrator(RecordingMounter::new(log.clone()), table.clone());
    let started = Instant::now();
    let mounts = orchestrator
        .run(
            &[mounted_vault_spec("work", &vault_path, &mount_point)],
            &ShutdownSignal::manual(),
        )
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(table.read_count(), 2);
    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0].handle.state(), MountState::Unmounted);
    assert!(!events(&log).iter().any(|event| event.starts_with("unmount")));
}

#[test]
fn run_with_no_successful_mount_returns_immediately() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (vault_path, mount_point) = vault_dirs(temp_dir.path(), "work");
    let table = ScriptedTable::default();

    let mut orchestrator = orchestrator(
        RecordingMounter::new(EventLog::default()).failing_on(&mount_point),
        table.clone(),
    );
    let mounts = orchestrator
        .run(
            &[mounted_vault_spec("work", &vault_path, &mount_point)],
            &ShutdownSignal::manual(),
        )
        .unwrap();

    assert!(mounts.is_empty());
    assert_eq!(table.read_count(), 0);
}

#[test]
fn run_fails_validation_before_mounting() {
    let temp_dir = tempfile::tempdir().unwrap();
    let log = EventLog::default();
    let missing = temp_dir.path().join("missing");

    let mut orchestrator = orchestrator(RecordingMounter::new(log.clone()), ScriptedTable::default());
    let result = orchestrator.run(
        &[vault_spec("work", &missing)],
        &ShutdownSignal::manual(),
    );

    assert!(result.is_err());
    assert!(events(&log).is_empty());
}

#[test]
fn shutdown_unmounts_every_tracked_vault() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (first, first_mount) = vault_dirs(temp_dir.path(), "first");
    let (second, second_mount) = vault_dirs(temp_dir.path(), "second");
    let log = EventLog::default();
    let table =
        ScriptedTable::default().then_table(active_table(&[&first_mount, &second_mount]));

    let mut orchestrator = orchestrator(
        RecordingMounter::new(log.clone()).with_unmount_failures(true, false),
        table,
    )
    .with_poll_interval(Duration::from_secs(30));
    let shutdown = ShutdownSignal::manual();
    let mut mounts = orchestrator.mount_all(
        &[
            mounted_vault_spec("first", &first, &first_mount),
            mounted_vault_spec("second", &second, &second_mount),
        ],
        &shutdown,
    );

    let remote = shutdown.clone();
    let trigger = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        remote.trigger();
    });
    let started = Instant::now();
    let outcome = orchestrator.watch(&mut mounts, &shutdown);
    trigger.join().unwrap();

    assert_eq!(outcome, WatchOutcome::ShutdownRequested);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(mounts
        .iter()
        .all(|mount| mount.handle.state() == MountState::Unmounted));
    let forced = events(&log)
        .into_iter()
        .filter(|event| event.starts_with("unmount-forced"))
        .count();
    assert_eq!(forced, 2);
}

#[test]
fn unreadable_table_ends_the_watch() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (vault_path, mount_point) = vault_dirs(temp_dir.path(), "work");
    let mut orchestrator = orchestrator(
        RecordingMounter::new(EventLog::default()),
        ScriptedTable::default().then_unreadable(),
    );
    let mut mounts = orchestrator.mount_all(
        &[mounted_vault_spec("work", &vault_path, &mount_point)],
        &ShutdownSignal::manual(),
    );

    let outcome = orchestrator.watch(&mut mounts, &ShutdownSignal::manual());
    assert_eq!(outcome, WatchOutcome::AllUnmounted);
}

#[test]
fn shutdown_during_startup_stops_before_the_next_vault() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (first, first_mount) = vault_dirs(temp_dir.path(), "first");
    let (second, second_mount) = vault_dirs(temp_dir.path(), "second");
    let log = EventLog::default();
    let shutdown = ShutdownSignal::manual();
    let mut first_spec = mounted_vault_spec("first", &first, &first_mount);
    first_spec.password = Box::new(ShutdownDuringUnlock {
        shutdown: shutdown.clone(),
    });

    let mut orchestrator = orchestrator(RecordingMounter::new(log.clone()), ScriptedTable::default());
    let mounts = orchestrator.mount_all(
        &[first_spec, mounted_vault_spec("second", &second, &second_mount)],
        &shutdown,
    );

    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0].vault_name, "first");
    let mounted = events(&log)
        .into_iter()
        .filter(|event| event.starts_with("mount "))
        .collect::<Vec<_>>();
    assert_eq!(mounted.len(), 1);
    assert!(mounted[0].starts_with("mount first"));
}

#[test]
fn run_unmounts_and_skips_watching_after_startup_shutdown() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (vault_path, mount_point) = vault_dirs(temp_dir.path(), "work");
    let log = EventLog::default();
    let table = ScriptedTable::default().then_table(active_table(&[&mount_point]));
    let shutdown = ShutdownSignal::manual();
    let mut spec = mounted_vault_spec("work", &vault_path, &mount_point);
    spec.password = Box::new(ShutdownDuringUnlock {
        shutdown: shutdown.clone(),
    });

    let mut orchestrator = orchestrator(RecordingMounter::new(log.clone()), table.clone());
    let mounts = orchestrator.run(&[spec], &shutdown).unwrap();

    assert_eq!(table.read_count(), 0);
    assert_eq!(mounts[0].handle.state(), MountState::Unmounted);
    assert!(events(&log).contains(&format!("unmount {}", mount_point.display())));
}

#[test]
fn trailing_slash_mount_point_is_tracked_canonically() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (vault_path, mount_point) = vault_dirs(temp_dir.path(), "work");
    let typed = format!("{}/", mount_point.display());
    let table = ScriptedTable::default()
        .then_table(active_table(&[&mount_point]))
        .then_table(active_table(&[]));

    let mut orchestrator = orchestrator(RecordingMounter::new(EventLog::default()), table.clone());
    let mounts = orchestrator
        .run(
            &[mounted_vault_spec("work", &vault_path, Path::new(&typed))],
            &ShutdownSignal::manual(),
        )
        .unwrap();

    assert_eq!(
        mounts[0].record.mount_point,
        mount_point.display().to_string()
    );
    assert_eq!(table.read_count(), 2);
}

#[test]
fn relative_mount_point_is_tracked_canonically() {
    let temp_dir = tempfile::Builder::new()
        .prefix("vaultmount-relative")
        .tempdir_in(".")
        .unwrap();
    let relative_root = Path::new(".").join(temp_dir.path().file_name().unwrap());
    let vault_path = relative_root.join("vault");
    let relative_mount = relative_root.join("mnt");
    fs::create_dir_all(&vault_path).unwrap();
    fs::create_dir_all(&relative_mount).unwrap();
    let canonical_mount = fs::canonicalize(&relative_mount).unwrap();
    let log = EventLog::default();
    let table = ScriptedTable::default()
        .then_table(active_table(&[&canonical_mount]))
        .then_table(active_table(&[]));

    let mut orchestrator = orchestrator(RecordingMounter::new(log.clone()), table.clone());
    let mounts = orchestrator
        .run(
            &[mounted_vault_spec("work", &vault_path, &relative_mount)],
            &ShutdownSignal::manual(),
        )
        .unwrap();

    assert_eq!(
        mounts[0].record.mount_point,
        canonical_mount.display().to_string()
    );
    assert_eq!(mounts[0].handle.mount_point(), canonical_mount.as_path());
    assert_eq!(table.read_count(), 2);
}
