//! Validación end-to-end del pipeline sobre backends in-memory.
//!
//! Recorre el camino completo con un cliente scripteado: seed → intake →
//! taxonomía (gate) → aprobación → scanning → re-scan incremental → triage →
//! predicción (gate) → aprobación → detección, verificando los invariantes
//! observables en cada paso. Sirve como demo ejecutable y como chequeo
//! rápido sin Postgres (`cargo run --bin main-pipeline`).

use serde_json::json;
use std::sync::Arc;
use vigil_analysis::{standard_stages, SeedCorpus};
use vigil_core::{pipeline_status, GateCoordinator, GateDecision, InMemoryPipelineStore, PipelineConfig,
                 RunRegistry, ScriptedClient, StageOrchestrator, StageStatus};
use vigil_domain::{AnalysisStore, InMemoryAnalysisStore};

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
             "review_status": "approved"},
            {"quality_id": "Q3", "name": "Retroactive effective dates",
             "definition": "Coverage can be asserted backwards in time",
             "recognition_test": "Can past events become billable after the fact?",
             "exploitation_logic": "Backdating converts history into billable events",
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

fn scores_response() -> serde_json::Value {
    json!({"scores": {
        "Q1": {"present": true, "evidence": "attestation suffices"},
        "Q2": {"present": true, "evidence": "per-claim payment"},
        "Q3": {"present": true, "evidence": "retroactive election window"}
    }})
}

fn main() {
    let store = InMemoryPipelineStore::new();
    let analysis = Arc::new(InMemoryAnalysisStore::new());
    let config = PipelineConfig::default();
    let client = ScriptedClient::new(serde_json::Value::Null);
    let set = standard_stages(analysis.clone(), seed_corpus());
    let orchestrator = StageOrchestrator::new(&store, &client, &config);
    let gate = GateCoordinator::new(&store);

    let run_id = "demo_run";
    store.create_run(run_id, &config.snapshot(), "in-memory validation").expect("create run");
    println!("Run ID: {run_id}");

    // Intake + taxonomía: la secuencia frena en el gate humano.
    client.push_response(json!({"qualities": [
        {"quality_id": "Q4", "name": "Deferred reconciliation",
         "definition": "Claims settle before any cross-check runs",
         "recognition_test": "Is payment released ahead of verification?",
         "exploitation_logic": "Pay-then-chase turns recovery into the only control"}
    ]}));
    let reports = orchestrator.run_sequence(run_id, &set, &[1, 2, 3]).expect("sequence");
    assert_eq!(reports.len(), 2, "la secuencia debe frenar en el gate de taxonomía");
    assert!(reports[1].needs_approval);
    println!("Stage 1 completado; stage 2 pausado en gate humano (candidata Q4 en draft).");

    assert_eq!(gate.approve(run_id, 2).expect("approve"), GateDecision::Approved);
    println!("Gate de taxonomía aprobado.");

    // Scanning: una llamada por política; el ledger registra digests.
    for _ in 0..3 {
        client.push_response(scores_response());
    }
    let calls_before = client.calls();
    orchestrator.run_stage_number(run_id, 3, &set).expect("scanning");
    assert_eq!(client.calls() - calls_before, 3);
    println!("Scanning: 3 políticas evaluadas, {} scores.",
             analysis.policy_scores(run_id).expect("scores").len());

    // Re-scan sin cambios: delta saltea todo, cero invocaciones nuevas.
    let calls_before = client.calls();
    orchestrator.run_stage_number(run_id, 3, &set).expect("re-scanning");
    assert_eq!(client.calls(), calls_before, "entidades sin cambios no re-invocan al motor");
    println!("Re-scan incremental: 3 políticas sin cambios, 0 llamadas.");

    // Triage + predicción (gate) + detección.
    orchestrator.run_stage_number(run_id, 30, &set).expect("triage");

    for _ in 0..3 {
        client.push_response(json!({"predictions": [
            {"mechanics": "bulk attestation farming across shell suppliers",
             "enabling_qualities": ["Q1", "Q2"],
             "actor_profile": "organized biller",
             "detection_difficulty": "high"}
        ]}));
    }
    let report = orchestrator.run_stage_number(run_id, 4, &set).expect("prediction");
    assert_eq!(report.status, Some(StageStatus::AwaitingApproval));
    assert_eq!(gate.approve(run_id, 4).expect("approve"), GateDecision::Approved);
    let predictions = analysis.predictions(run_id).expect("predictions");
    println!("Predicción: {} esquemas generados y aprobados.", predictions.len());

    for _ in 0..predictions.len() {
        client.push_response(json!({"patterns": [
            {"data_source": "claims feed", "anomaly_signal": "volume spike per new supplier",
             "baseline": "12-month supplier cohort", "priority": "high"}
        ]}));
    }
    orchestrator.run_stage_number(run_id, 5, &set).expect("detection");
    println!("Detección: {} patrones.", analysis.detection_patterns(run_id).expect("patterns").len());

    // Estado final agregado.
    println!("\nPipeline Status:");
    for row in pipeline_status(&store, run_id).expect("status") {
        let status = row.status.map(|s| s.to_string()).unwrap_or_else(|| "not started".into());
        println!("  Stage {:>2}: {} - {}", row.stage, row.name, status);
    }
    println!("\nValidación end-to-end OK.");
}
