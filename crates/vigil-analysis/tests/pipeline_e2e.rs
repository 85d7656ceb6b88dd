//! End-to-end del pipeline sobre backends in-memory con cliente scripteado:
//! gates humanos, skip-correctness del delta y fallo parcial.

use serde_json::{json, Value};
use std::sync::Arc;
use vigil_analysis::{standard_stages, SeedCorpus};
use vigil_core::{GateCoordinator, GateDecision, InMemoryPipelineStore, PipelineConfig, RunRegistry,
                 ScriptedClient, StageLog, StageOrchestrator, StageSet, StageStatus};
use vigil_domain::{AnalysisStore, InMemoryAnalysisStore, PolicyScore, Prediction, Quality, ReviewStatus};

fn seed_corpus() -> SeedCorpus {
    SeedCorpus::from_json(
        r#"{
        "qualities": [
            {"quality_id": "Q1", "name": "Self-reported eligibility",
             "definition": "Eligibility rests on unverified self-attestation",
             "recognition_test": "Can a claimant assert the qualifying fact unchecked?",
             "exploitation_logic": "Attestation without verification invites fabrication",
             "review_status": "approved"},
            {"quality_id": "Q2", "name": "Volume-insensitive reimbursement",
             "definition": "Payment scales with claimed volume without utilization review",
             "recognition_test": "Does payment grow linearly with claims submitted?",
             "exploitation_logic": "Unreviewed volume rewards fabricated throughput",
             "review_status": "approved"}
        ],
        "policies": [
            {"policy_id": "POL-A", "name": "Telehealth billing expansion",
             "structural_characterization": "Remote visits billable at parity with in-person"},
            {"policy_id": "POL-B", "name": "DME supplier enrollment",
             "structural_characterization": "Suppliers self-certify inventory capacity"},
            {"policy_id": "POL-C", "name": "Hospice election streamlining",
             "structural_characterization": "Election effective on provider attestation"}
        ]
    }"#,
    )
    .expect("seed corpus")
}

struct Fixture {
    store: InMemoryPipelineStore,
    analysis: Arc<InMemoryAnalysisStore>,
    config: PipelineConfig,
    set: StageSet,
}

fn fixture() -> Fixture {
    let store = InMemoryPipelineStore::new();
    store.create_run("run_1", &Value::Null, "e2e").expect("create run");
    let analysis = Arc::new(InMemoryAnalysisStore::new());
    let set = standard_stages(analysis.clone(), seed_corpus());
    Fixture { store,
              analysis,
              config: PipelineConfig::default(),
              set }
}

fn mark_completed(store: &InMemoryPipelineStore, run_id: &str, stages: &[i32]) {
    for &stage in stages {
        store.start_stage(run_id, stage).unwrap();
        store.complete_stage(run_id, stage, None).unwrap();
    }
}

fn scores_response() -> Value {
    json!({"scores": {
        "Q1": {"present": true, "evidence": "attestation suffices"},
        "Q2": {"present": true, "evidence": "per-claim payment"}
    }})
}

#[test]
fn taxonomy_gate_pauses_the_sequence_until_approved() {
    let f = fixture();
    let client = ScriptedClient::new(json!({"qualities": [
        {"quality_id": "Q-NEW", "name": "Retroactive effective dates",
         "definition": "Coverage can be asserted backwards in time",
         "recognition_test": "Can past events become billable after the fact?",
         "exploitation_logic": "Backdating converts history into billable events"}
    ]}));
    let orchestrator = StageOrchestrator::new(&f.store, &client, &f.config);

    let reports = orchestrator.run_sequence("run_1", &f.set, &[1, 2, 3]).expect("sequence");
    assert_eq!(reports.len(), 2, "el gate de taxonomía frena la secuencia");
    assert_eq!(reports[0].status, Some(StageStatus::Completed));
    assert!(reports[1].needs_approval);
    assert_eq!(client.calls(), 1, "una sola llamada de extracción");

    // La candidata quedó en draft: no integra el corpus aprobado todavía.
    let taxonomy = f.analysis.taxonomy().unwrap();
    assert!(taxonomy.iter().any(|q| q.quality_id == "Q-NEW" && q.review_status == ReviewStatus::Draft));
    assert_eq!(f.analysis.approved_taxonomy().unwrap().len(), 2);

    let gate = GateCoordinator::new(&f.store);
    assert_eq!(gate.approve("run_1", 2).unwrap(), GateDecision::Approved);
    assert_eq!(f.store.current_status("run_1", 2).unwrap(), Some(StageStatus::Approved));
}

#[test]
fn scanning_skips_unchanged_entities_and_reacts_to_corpus_changes() {
    let f = fixture();
    let client = ScriptedClient::new(scores_response());
    let orchestrator = StageOrchestrator::new(&f.store, &client, &f.config);

    orchestrator.run_stage_number("run_1", 1, &f.set).expect("intake");
    mark_completed(&f.store, "run_1", &[2]);

    // Primer escaneo: una llamada por política.
    let report = orchestrator.run_stage_number("run_1", 3, &f.set).expect("scan");
    assert_eq!(report.status, Some(StageStatus::Completed));
    assert_eq!(client.calls(), 3);
    assert_eq!(f.analysis.policy_scores("run_1").unwrap().len(), 6);

    // Re-corrida sin cambios: cero invocaciones nuevas y éxito igual.
    let report = orchestrator.run_stage_number("run_1", 3, &f.set).expect("rescan");
    assert_eq!(report.status, Some(StageStatus::Completed));
    assert_eq!(client.calls(), 3, "entidades sin cambios no re-invocan al motor");

    // Cambió SOLO el corpus upstream (cualidad aprobada nueva): el
    // fingerprint invalida a todas las políticas aunque su texto no cambió.
    let q3 = Quality::new("Q3", "Deferred reconciliation", "def", "test", "logic")
        .unwrap()
        .with_review_status(ReviewStatus::Approved);
    f.analysis.upsert_quality("run_1", &q3).unwrap();

    let report = orchestrator.run_stage_number("run_1", 3, &f.set).expect("rescan after corpus change");
    assert_eq!(report.status, Some(StageStatus::Completed));
    assert_eq!(client.calls(), 6, "toda política downstream se reprocesa");
}

#[test]
fn scanning_with_all_jobs_failing_marks_the_stage_failed() {
    let f = fixture();
    let client = ScriptedClient::failing("reasoning backend unavailable");
    let orchestrator = StageOrchestrator::new(&f.store, &client, &f.config);

    // Intake no llama al motor: corre bien incluso con el cliente caído.
    orchestrator.run_stage_number("run_1", 1, &f.set).expect("intake");
    mark_completed(&f.store, "run_1", &[2]);

    let report = orchestrator.run_stage_number("run_1", 3, &f.set).expect("scan returns normally");
    assert_eq!(report.status, Some(StageStatus::Failed));
    assert!(f.analysis.policy_scores("run_1").unwrap().is_empty());
    // Nada quedó registrado en el ledger: el próximo intento reprocesa todo.
    let history = f.store.stage_history("run_1").unwrap();
    assert!(history.last().unwrap().error_message.as_deref().unwrap().contains("all 3"));
}

#[test]
fn prediction_gates_and_skips_stable_profiles() {
    let f = fixture();
    let client = ScriptedClient::new(json!({"predictions": [
        {"mechanics": "bulk attestation farming across shell suppliers",
         "enabling_qualities": ["Q1", "Q2", "Q3"],
         "actor_profile": "organized biller",
         "lifecycle_stage": "mature",
         "detection_difficulty": "high"}
    ]}));
    let orchestrator = StageOrchestrator::new(&f.store, &client, &f.config);

    // POL-A en el umbral (3 cualidades presentes), POL-B por debajo.
    for quality in ["Q1", "Q2", "Q3"] {
        f.analysis.upsert_policy_score(&PolicyScore { run_id: "run_1".into(),
                                                      policy_id: "POL-A".into(),
                                                      quality_id: quality.into(),
                                                      present: true,
                                                      evidence: None }).unwrap();
    }
    f.analysis.upsert_policy_score(&PolicyScore { run_id: "run_1".into(),
                                                  policy_id: "POL-B".into(),
                                                  quality_id: "Q1".into(),
                                                  present: true,
                                                  evidence: None }).unwrap();
    mark_completed(&f.store, "run_1", &[1, 2, 3]);

    let report = orchestrator.run_stage_number("run_1", 4, &f.set).expect("predict");
    assert_eq!(report.status, Some(StageStatus::AwaitingApproval));
    assert!(report.needs_approval);
    assert_eq!(client.calls(), 1, "sólo POL-A supera el umbral");
    let predictions = f.analysis.predictions("run_1").unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].convergence_score, 3);

    let gate = GateCoordinator::new(&f.store);
    assert_eq!(gate.approve("run_1", 4).unwrap(), GateDecision::Approved);

    // Perfil sin cambios: la re-corrida no re-invoca ni re-abre el gate.
    let report = orchestrator.run_stage_number("run_1", 4, &f.set).expect("re-predict");
    assert_eq!(report.status, Some(StageStatus::Completed));
    assert_eq!(client.calls(), 1);
    assert_eq!(f.analysis.predictions("run_1").unwrap().len(), 1);
}

#[test]
fn prediction_with_nothing_over_threshold_completes_without_gate() {
    let f = fixture();
    let client = ScriptedClient::new(Value::Null);
    let orchestrator = StageOrchestrator::new(&f.store, &client, &f.config);

    f.analysis.upsert_policy_score(&PolicyScore { run_id: "run_1".into(),
                                                  policy_id: "POL-A".into(),
                                                  quality_id: "Q1".into(),
                                                  present: true,
                                                  evidence: None }).unwrap();
    mark_completed(&f.store, "run_1", &[1, 2, 3]);

    let report = orchestrator.run_stage_number("run_1", 4, &f.set).expect("predict");
    assert_eq!(report.status, Some(StageStatus::Completed));
    assert!(!report.needs_approval, "cero trabajo es éxito, no gate");
    assert_eq!(client.calls(), 0);
}

#[test]
fn detection_translates_predictions_into_patterns() {
    let f = fixture();
    let client = ScriptedClient::new(json!({"patterns": [
        {"data_source": "claims feed", "anomaly_signal": "volume spike per new supplier",
         "baseline": "12-month supplier cohort", "priority": "high"},
        {"data_source": "enrollment registry", "anomaly_signal": "shared addresses across suppliers",
         "priority": "critical"}
    ]}));
    let orchestrator = StageOrchestrator::new(&f.store, &client, &f.config);

    for (i, mechanics) in ["phantom billing loop", "credential resale chain"].iter().enumerate() {
        let p = Prediction::new("POL-A", i, 3, *mechanics, vec!["Q1".into()]).unwrap();
        f.analysis.upsert_prediction("run_1", &p).unwrap();
    }
    mark_completed(&f.store, "run_1", &[1, 2, 3, 4]);

    let report = orchestrator.run_stage_number("run_1", 5, &f.set).expect("detect");
    assert_eq!(report.status, Some(StageStatus::Completed));
    assert_eq!(client.calls(), 2, "una llamada por predicción");
    let patterns = f.analysis.detection_patterns("run_1").unwrap();
    assert_eq!(patterns.len(), 4);
    assert!(patterns.iter().any(|p| p.priority == vigil_domain::PatternPriority::Critical));

    // Re-corrida estable: nada que regenerar.
    let report = orchestrator.run_stage_number("run_1", 5, &f.set).expect("re-detect");
    assert_eq!(report.status, Some(StageStatus::Completed));
    assert_eq!(client.calls(), 2);
}

#[test]
fn triage_records_the_shortlist_in_stage_metadata() {
    let f = fixture();
    let client = ScriptedClient::new(Value::Null);
    let orchestrator = StageOrchestrator::new(&f.store, &client, &f.config);

    for quality in ["Q1", "Q2", "Q3"] {
        f.analysis.upsert_policy_score(&PolicyScore { run_id: "run_1".into(),
                                                      policy_id: "POL-A".into(),
                                                      quality_id: quality.into(),
                                                      present: true,
                                                      evidence: None }).unwrap();
    }
    mark_completed(&f.store, "run_1", &[1, 2, 3]);

    let report = orchestrator.run_stage_number("run_1", 30, &f.set).expect("triage");
    assert_eq!(report.status, Some(StageStatus::Completed));

    let history = f.store.stage_history("run_1").unwrap();
    let metadata = history.last().unwrap().metadata.clone().expect("metadata");
    assert_eq!(metadata["shortlisted"], json!(["POL-A"]));
    assert_eq!(metadata["threshold"], json!(3));
}
