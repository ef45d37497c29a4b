//! Allocation path integration tests: candidate ordering, conflict
//! skipping, dry runs, release semantics, and exhaustion.

mod common;

use std::collections::HashSet;

use styxy::AllocationRequest;

use common::{boot, boot_with_config, port};

#[test]
fn preferred_port_free_is_taken_first() {
    let fixture = boot();

    let outcome = fixture
        .daemon
        .allocate(&AllocationRequest::new("dev", "i1"))
        .unwrap();

    assert_eq!(outcome.port.value(), 3000);
    assert!(outcome.lock_id.is_some());
    assert!(!outcome.existing);
    assert!(!outcome.auto_allocated);

    let check = fixture.daemon.check(port(3000));
    assert!(!check.available);
    assert_eq!(
        check.allocation.unwrap().lock_id,
        outcome.lock_id.unwrap()
    );
}

#[test]
fn externally_held_preferred_port_is_skipped_and_counted() {
    let fixture = boot();
    // A foreign listener owns 3000.
    fixture.prober.mark_busy(port(3000));

    let outcome = fixture
        .daemon
        .allocate(&AllocationRequest::new("dev", "i1"))
        .unwrap();

    assert_eq!(outcome.port.value(), 3001);
    assert_eq!(fixture.daemon.metrics().port_conflicts_for("dev"), 1);
    assert_eq!(fixture.daemon.metrics().port_conflicts_for("api"), 0);
}

#[test]
fn explicit_preferred_port_leads_the_candidate_list() {
    let fixture = boot();

    let outcome = fixture
        .daemon
        .allocate(
            &AllocationRequest::new("dev", "i1").with_preferred_port(Some(port(3042))),
        )
        .unwrap();
    assert_eq!(outcome.port.value(), 3042);
}

#[test]
fn out_of_range_preferred_port_is_honoured_but_never_extended() {
    let fixture = boot();

    // 15000 is outside every shipped range; the caller explicitly asked.
    let outcome = fixture
        .daemon
        .allocate(
            &AllocationRequest::new("dev", "i1").with_preferred_port(Some(port(15000))),
        )
        .unwrap();
    assert_eq!(outcome.port.value(), 15000);

    // When that one port is taken, the next request falls back into the
    // range instead of probing near 15000.
    let fallback = fixture
        .daemon
        .allocate(
            &AllocationRequest::new("dev", "i2").with_preferred_port(Some(port(15000))),
        )
        .unwrap();
    assert_eq!(fallback.port.value(), 3000);
}

#[test]
fn sequential_allocations_never_collide() {
    let fixture = boot();
    let mut seen = HashSet::new();

    for i in 0..10 {
        let outcome = fixture
            .daemon
            .allocate(&AllocationRequest::new("dev", format!("i{i}")))
            .unwrap();
        assert!(seen.insert(outcome.port), "duplicate port {}", outcome.port);
    }

    let live: HashSet<_> = fixture
        .daemon
        .list_allocations()
        .into_iter()
        .map(|a| a.port)
        .collect();
    assert_eq!(live, seen);
}

#[test]
fn dry_run_reports_a_candidate_without_reserving() {
    let fixture = boot();

    let dry = fixture
        .daemon
        .allocate(&AllocationRequest::new("dev", "i1").with_dry_run(true))
        .unwrap();
    assert_eq!(dry.port.value(), 3000);
    assert!(dry.lock_id.is_none());
    assert!(fixture.daemon.list_allocations().is_empty());

    // Nothing was reserved, so a real call still gets the same port.
    let real = fixture
        .daemon
        .allocate(&AllocationRequest::new("dev", "i1"))
        .unwrap();
    assert_eq!(real.port.value(), 3000);
}

#[test]
fn release_frees_the_port_and_is_idempotent_at_the_error_level() {
    let fixture = boot();

    let outcome = fixture
        .daemon
        .allocate(&AllocationRequest::new("dev", "i1"))
        .unwrap();
    let lock_id = outcome.lock_id.unwrap();

    let released = fixture.daemon.release(&lock_id).unwrap();
    assert_eq!(released.port, outcome.port);
    assert!(fixture.daemon.check(port(3000)).available);

    // A second release of the same lock reports it was already gone.
    let err = fixture.daemon.release(&lock_id).unwrap_err();
    assert_eq!(err.kind(), "lockNotFound");

    // The port is reusable.
    let again = fixture
        .daemon
        .allocate(&AllocationRequest::new("dev", "i2"))
        .unwrap();
    assert_eq!(again.port.value(), 3000);
}

#[test]
fn exhausted_service_type_fails_with_no_ports_available() {
    // A three-port range makes exhaustion cheap to arrange.
    let fixture = boot_with_config(Some(
        r#"{"service_types": {"tiny": {"range": [15000, 15002]}}}"#,
    ));

    for i in 0..3 {
        fixture
            .daemon
            .allocate(&AllocationRequest::new("tiny", format!("i{i}")))
            .unwrap();
    }
    let err = fixture
        .daemon
        .allocate(&AllocationRequest::new("tiny", "i9"))
        .unwrap_err();
    assert_eq!(err.kind(), "noPortsAvailable");
}

#[test]
fn probe_failure_means_the_port_is_never_reserved() {
    let fixture = boot_with_config(Some(
        r#"{"service_types": {"tiny": {"range": [15000, 15001]}}}"#,
    ));
    fixture.prober.mark_busy(port(15000));
    fixture.prober.mark_busy(port(15001));

    let err = fixture
        .daemon
        .allocate(&AllocationRequest::new("tiny", "i1"))
        .unwrap_err();
    assert_eq!(err.kind(), "noPortsAvailable");
    assert!(fixture.daemon.list_allocations().is_empty());
}

#[test]
fn unknown_service_type_fails_when_auto_allocation_is_disabled() {
    let fixture = boot_with_config(Some(r#"{"auto_allocation": {"enabled": false}}"#));

    let err = fixture
        .daemon
        .allocate(&AllocationRequest::new("grafana", "i1"))
        .unwrap_err();
    assert_eq!(err.kind(), "unknownServiceType");
    assert!(err.remediation().is_some());
}

#[test]
fn allocation_records_audit_events() {
    let fixture = boot();
    let outcome = fixture
        .daemon
        .allocate(&AllocationRequest::new("dev", "i1"))
        .unwrap();
    fixture.daemon.release(&outcome.lock_id.unwrap()).unwrap();

    let actions: Vec<String> = common::audit_lines(fixture.dir.path())
        .iter()
        .map(|line| line["action"].as_str().unwrap().to_string())
        .collect();
    assert!(actions.contains(&"ALLOCATION".to_string()));
    assert!(actions.contains(&"RELEASE".to_string()));
}

#[test]
fn blank_fields_are_rejected() {
    let fixture = boot();
    let err = fixture
        .daemon
        .allocate(&AllocationRequest::new("dev", "  "))
        .unwrap_err();
    assert_eq!(err.kind(), "invalidRequest");
}
