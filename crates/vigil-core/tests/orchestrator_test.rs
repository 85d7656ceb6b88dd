//! Orquestador: prerequisitos, conversión de errores no capturados y driver
//! secuencial con pausa en gates.

use serde_json::{json, Value};
use vigil_core::{GateCoordinator, GateDecision, InMemoryPipelineStore, PipelineConfig, PipelineError,
                 RunRegistry, ScriptedClient, StageContext, StageId, StageLog, StageLogic, StageOrchestrator,
                 StageSet, StageStatus};

struct CompletingStage(StageId);
impl StageLogic for CompletingStage {
    fn stage(&self) -> StageId {
        self.0
    }
    fn name(&self) -> &str {
        "completing"
    }
    fn run(&self, ctx: &StageContext<'_>) -> Result<(), PipelineError> {
        ctx.store.complete_stage(ctx.run_id, self.0, Some(json!({"items": 1})))
    }
}

struct GatedStage(StageId);
impl StageLogic for GatedStage {
    fn stage(&self) -> StageId {
        self.0
    }
    fn name(&self) -> &str {
        "gated"
    }
    fn run(&self, ctx: &StageContext<'_>) -> Result<(), PipelineError> {
        ctx.store.mark_awaiting_approval(ctx.run_id, self.0)
    }
}

struct ExplodingStage(StageId);
impl StageLogic for ExplodingStage {
    fn stage(&self) -> StageId {
        self.0
    }
    fn name(&self) -> &str {
        "exploding"
    }
    fn run(&self, _ctx: &StageContext<'_>) -> Result<(), PipelineError> {
        // Error no capturado: no registra ninguna transición por su cuenta.
        Err(PipelineError::Internal("unhandled stage error".into()))
    }
}

fn fixture() -> (InMemoryPipelineStore, ScriptedClient, PipelineConfig) {
    let store = InMemoryPipelineStore::new();
    store.create_run("run_1", &Value::Null, "test run").expect("create run");
    (store, ScriptedClient::new(Value::Null), PipelineConfig::default())
}

#[test]
fn e2e_stage_one_runs_without_prerequisite() {
    let (store, client, config) = fixture();
    let orchestrator = StageOrchestrator::new(&store, &client, &config);

    let report = orchestrator.run_stage("run_1", &CompletingStage(1)).expect("stage 1");
    assert_eq!(report.status, Some(StageStatus::Completed));
    assert!(!report.needs_approval);
    assert_eq!(store.current_status("run_1", 1).unwrap(), Some(StageStatus::Completed));
}

#[test]
fn e2e_blocked_by_gate_names_the_blocking_stage() {
    let (store, client, config) = fixture();
    let orchestrator = StageOrchestrator::new(&store, &client, &config);

    store.start_stage("run_1", 1).unwrap();
    store.complete_stage("run_1", 1, None).unwrap();
    orchestrator.run_stage("run_1", &GatedStage(2)).expect("stage 2 gates");

    // Stage 3 exige stage 2 en {completed, approved}; está awaiting_approval.
    let err = orchestrator.run_stage("run_1", &CompletingStage(3)).expect_err("debe bloquear");
    assert_eq!(err,
               PipelineError::PrerequisiteNotSatisfied { requested: 3,
                                                         stage: 2,
                                                         status: "awaiting_approval".into() });

    // Tras aprobar el gate, stage 3 corre.
    let gate = GateCoordinator::new(&store);
    assert_eq!(gate.approve("run_1", 2).unwrap(), GateDecision::Approved);
    let report = orchestrator.run_stage("run_1", &CompletingStage(3)).expect("stage 3");
    assert_eq!(report.status, Some(StageStatus::Completed));
}

#[test]
fn never_run_prerequisite_is_reported_as_such() {
    let (store, client, config) = fixture();
    let orchestrator = StageOrchestrator::new(&store, &client, &config);

    let err = orchestrator.run_stage("run_1", &CompletingStage(2)).expect_err("bloquea");
    assert_eq!(err,
               PipelineError::PrerequisiteNotSatisfied { requested: 2,
                                                         stage: 1,
                                                         status: "never run".into() });
    // Fail-fast: ni siquiera se insertó un intento running para stage 2.
    assert_eq!(store.current_status("run_1", 2).unwrap(), None);
}

#[test]
fn uncaught_logic_error_is_recorded_then_reraised() {
    let (store, client, config) = fixture();
    let orchestrator = StageOrchestrator::new(&store, &client, &config);

    let err = orchestrator.run_stage("run_1", &ExplodingStage(1)).expect_err("propaga");
    assert_eq!(err,
               PipelineError::StageLogicFailure { stage: 1,
                                                  message: "internal: unhandled stage error".into() });

    // Nada queda colgado en running; el texto del error se preserva.
    assert_eq!(store.current_status("run_1", 1).unwrap(), Some(StageStatus::Failed));
    let history = store.stage_history("run_1").unwrap();
    assert_eq!(history.last().unwrap().error_message.as_deref(),
               Some("internal: unhandled stage error"));
}

#[test]
fn run_sequence_pauses_at_the_human_gate() {
    let (store, client, config) = fixture();
    let orchestrator = StageOrchestrator::new(&store, &client, &config);

    let mut set = StageSet::new();
    set.register(Box::new(CompletingStage(1)));
    set.register(Box::new(GatedStage(2)));
    set.register(Box::new(CompletingStage(3)));

    let reports = orchestrator.run_sequence("run_1", &set, &[1, 2, 3]).expect("sequence");
    assert_eq!(reports.len(), 2, "frena en el gate, stage 3 no se intenta");
    assert!(reports[1].needs_approval);
    assert_eq!(store.current_status("run_1", 3).unwrap(), None);
}

#[test]
fn unknown_stage_number_is_an_explicit_error() {
    let (store, client, config) = fixture();
    let orchestrator = StageOrchestrator::new(&store, &client, &config);
    let set = StageSet::new();

    let err = orchestrator.run_stage_number("run_1", 9, &set).expect_err("no registrado");
    assert_eq!(err, PipelineError::UnknownStage(9));
}

#[test]
fn pipeline_status_surfaces_stale_running_records() {
    let (store, client, config) = fixture();
    let orchestrator = StageOrchestrator::new(&store, &client, &config);

    orchestrator.run_stage("run_1", &CompletingStage(1)).expect("stage 1");
    // Proceso muerto a mitad de stage: queda running para siempre, visible
    // en el status, nunca reintentado en silencio.
    store.start_stage("run_1", 2).unwrap();

    let overview = vigil_core::pipeline_status(&store, "run_1").expect("status");
    let by_stage = |s: StageId| overview.iter().find(|o| o.stage == s).cloned().expect("row");
    assert_eq!(by_stage(1).status, Some(StageStatus::Completed));
    assert_eq!(by_stage(2).status, Some(StageStatus::Running));
    assert_eq!(by_stage(3).status, None);
}
