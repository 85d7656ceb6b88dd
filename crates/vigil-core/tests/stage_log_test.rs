//! Invariante append-and-read-latest del stage log in-memory.

use serde_json::json;
use vigil_core::{InMemoryPipelineStore, RunRegistry, StageLog, StageStatus};

#[test]
fn current_status_follows_last_transition() {
    let store = InMemoryPipelineStore::new();

    assert_eq!(store.current_status("run_1", 1).unwrap(), None);

    store.start_stage("run_1", 1).unwrap();
    assert_eq!(store.current_status("run_1", 1).unwrap(), Some(StageStatus::Running));

    store.complete_stage("run_1", 1, Some(json!({"items": 3}))).unwrap();
    assert_eq!(store.current_status("run_1", 1).unwrap(), Some(StageStatus::Completed));

    // Un intento nuevo siempre inserta un registro running fresco; el
    // terminal previo queda intacto en la historia.
    store.start_stage("run_1", 1).unwrap();
    assert_eq!(store.current_status("run_1", 1).unwrap(), Some(StageStatus::Running));

    store.fail_stage("run_1", 1, "boom").unwrap();
    assert_eq!(store.current_status("run_1", 1).unwrap(), Some(StageStatus::Failed));

    let history = store.stage_history("run_1").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, StageStatus::Completed);
    assert_eq!(history[1].status, StageStatus::Failed);
    assert_eq!(history[1].error_message.as_deref(), Some("boom"));
    assert!(history[0].seq < history[1].seq);
}

#[test]
fn terminal_transitions_without_running_record_are_noops() {
    let store = InMemoryPipelineStore::new();

    // Retry de una completion después de un crash-recovery: inocuo.
    store.complete_stage("run_1", 1, None).unwrap();
    assert_eq!(store.current_status("run_1", 1).unwrap(), None);

    store.start_stage("run_1", 1).unwrap();
    store.complete_stage("run_1", 1, None).unwrap();
    store.fail_stage("run_1", 1, "late failure").unwrap();
    // El fail llegó tarde: no hay running, el completed queda.
    assert_eq!(store.current_status("run_1", 1).unwrap(), Some(StageStatus::Completed));
}

#[test]
fn approve_is_idempotent_and_requires_awaiting_approval() {
    let store = InMemoryPipelineStore::new();

    store.start_stage("run_1", 2).unwrap();
    assert!(!store.approve_stage("run_1", 2).unwrap(), "running no es aprobable");

    store.mark_awaiting_approval("run_1", 2).unwrap();
    assert!(store.approve_stage("run_1", 2).unwrap());
    assert_eq!(store.current_status("run_1", 2).unwrap(), Some(StageStatus::Approved));

    // Segunda aprobación seguida: cero filas afectadas.
    assert!(!store.approve_stage("run_1", 2).unwrap());
    assert_eq!(store.current_status("run_1", 2).unwrap(), Some(StageStatus::Approved));
}

#[test]
fn statuses_are_isolated_per_run_and_stage() {
    let store = InMemoryPipelineStore::new();

    store.start_stage("run_1", 1).unwrap();
    store.complete_stage("run_1", 1, None).unwrap();
    store.start_stage("run_2", 1).unwrap();

    assert_eq!(store.current_status("run_1", 1).unwrap(), Some(StageStatus::Completed));
    assert_eq!(store.current_status("run_2", 1).unwrap(), Some(StageStatus::Running));
    assert_eq!(store.current_status("run_1", 2).unwrap(), None);
}

#[test]
fn latest_run_orders_by_creation() {
    let store = InMemoryPipelineStore::new();
    assert_eq!(store.latest_run().unwrap(), None);

    store.create_run("run_a", &json!({}), "first").unwrap();
    store.create_run("run_b", &json!({}), "second").unwrap();
    assert_eq!(store.latest_run().unwrap(), Some("run_b".to_string()));
}
