//! Startup recovery against real scratch directories: corrupted
//! snapshots, orphans, singleton duplicates, and the snapshot round
//! trip across a restart.

mod common;

use styxy::{AllocationRequest, StepStatus};

use common::{audit_lines, boot, own_pid, reboot_with_busy};

#[test]
fn corrupted_snapshot_is_backed_up_and_replaced() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("daemon.state"), "corrupted").unwrap();

    let fixture = common::reboot(dir);

    assert!(fixture.daemon.list_allocations().is_empty());
    let report = fixture.daemon.recovery_report();
    assert_eq!(
        report.step("state_validation").unwrap().status,
        StepStatus::AutoRepaired
    );

    // The original bytes survive next to the snapshot.
    let backup = std::fs::read_dir(fixture.dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .find(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with("daemon.state.corrupt."))
        })
        .expect("corrupt snapshot backed up");
    assert_eq!(
        std::fs::read_to_string(backup.path()).unwrap(),
        "corrupted"
    );

    // Recovery completion lands in the audit log.
    let lines = audit_lines(fixture.dir.path());
    assert!(lines
        .iter()
        .any(|line| line["action"] == "SYSTEM_RECOVERY_COMPLETE"));
}

#[test]
fn snapshot_round_trips_across_a_restart() {
    let first = boot();
    let a = first
        .daemon
        .allocate(
            &AllocationRequest::new("dev", "i1").with_process_id(Some(own_pid())),
        )
        .unwrap();
    let b = first
        .daemon
        .allocate(
            &AllocationRequest::new("ai", "i2").with_process_id(Some(own_pid())),
        )
        .unwrap();
    first.daemon.save_snapshot_now().unwrap();
    let before = first.daemon.list_allocations();

    // Restart on the same directory; the owning process (this test) is
    // alive and both ports still read as bound.
    let dir = first.dir;
    drop(first.daemon);
    let second = reboot_with_busy(dir, &[a.port.value(), b.port.value()]);

    let after = second.daemon.list_allocations();
    assert_eq!(after, before);
    let singleton = second.daemon.singleton_for("ai").unwrap();
    assert_eq!(Some(singleton.lock_id), b.lock_id);
}

#[test]
fn orphaned_allocations_are_dropped_on_boot() {
    let first = boot();
    // No owning pid recorded: unverifiable after a restart.
    first
        .daemon
        .allocate(&AllocationRequest::new("dev", "i1"))
        .unwrap();
    // Owned by this test and still bound after restart.
    let kept = first
        .daemon
        .allocate(
            &AllocationRequest::new("api", "i2").with_process_id(Some(own_pid())),
        )
        .unwrap();
    first.daemon.save_snapshot_now().unwrap();

    let dir = first.dir;
    drop(first.daemon);
    let second = reboot_with_busy(dir, &[kept.port.value()]);

    let survivors = second.daemon.list_allocations();
    assert_eq!(survivors.len(), 1);
    assert_eq!(survivors[0].port, kept.port);
    assert_eq!(
        second
            .daemon
            .recovery_report()
            .step("orphan_cleanup")
            .unwrap()
            .status,
        StepStatus::AutoRepaired
    );
}

#[test]
fn duplicate_singletons_in_the_snapshot_keep_the_latest() {
    // Hand-craft a snapshot with two `ai` allocations, which a running
    // daemon would never produce.
    let dir = tempfile::tempdir().unwrap();
    let older = serde_json::json!({
        "port": 11430,
        "lock_id": "6b8e1fd3-9f6a-4c64-9d3d-111111111111",
        "service_type": "ai",
        "instance_id": "old",
        "process_id": own_pid(),
        "allocated_at": "2026-07-01T10:00:00Z",
    });
    let newer = serde_json::json!({
        "port": 11431,
        "lock_id": "6b8e1fd3-9f6a-4c64-9d3d-222222222222",
        "service_type": "ai",
        "instance_id": "new",
        "process_id": own_pid(),
        "allocated_at": "2026-07-01T12:00:00Z",
    });
    let snapshot = serde_json::json!({
        "allocations": [older, newer],
        "singletonServices": {},
        "instances": [],
        "version": "test",
    });
    std::fs::write(
        dir.path().join("daemon.state"),
        serde_json::to_string_pretty(&snapshot).unwrap(),
    )
    .unwrap();

    let fixture = reboot_with_busy(dir, &[11430, 11431]);

    let survivors = fixture.daemon.list_allocations();
    assert_eq!(survivors.len(), 1);
    assert_eq!(survivors[0].port.value(), 11431);
    assert_eq!(survivors[0].instance_id, "new");
    assert_eq!(
        fixture
            .daemon
            .recovery_report()
            .step("singleton_integrity")
            .unwrap()
            .status,
        StepStatus::AutoRepaired
    );
    assert_eq!(
        fixture.daemon.singleton_for("ai").unwrap().port.value(),
        11431
    );
}

#[test]
fn instances_survive_a_restart() {
    let first = boot();
    first
        .daemon
        .register_instance(styxy::InstanceRegistration {
            instance_id: Some("editor-1".into()),
            ..Default::default()
        })
        .unwrap();
    first.daemon.save_snapshot_now().unwrap();

    let dir = first.dir;
    drop(first.daemon);
    let second = common::reboot(dir);

    let instances = second.daemon.list_instances();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].instance_id, "editor-1");
}

#[test]
fn broken_user_config_degrades_to_defaults_with_a_failed_step() {
    let fixture = common::boot_with_config(Some("{ this is not json"));

    // The daemon still serves the shipped catalogue.
    let outcome = fixture
        .daemon
        .allocate(&AllocationRequest::new("dev", "i1"))
        .unwrap();
    assert_eq!(outcome.port.value(), 3000);

    assert_eq!(
        fixture
            .daemon
            .recovery_report()
            .step("config_validation")
            .unwrap()
            .status,
        StepStatus::Failed
    );
}
