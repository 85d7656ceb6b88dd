//! CLI operativa del pipeline contra el backend Postgres.
//!
//! Uso:
//!     vigil seed --file seed.json          # cargar corpus curado
//!     vigil run --stage 1                  # correr un stage
//!     vigil run --stage all                # correr la línea principal
//!     vigil status                         # estado del run más reciente
//!     vigil approve --stage 2              # aprobar un gate humano
//!     vigil export --format md             # exportar resultados
//!
//! Las llamadas de razonamiento salen de un cliente de fixtures
//! (`VIGIL_FIXTURES=<json>`); el motor real corre como despliegue aparte y
//! se integra por el mismo trait.

use std::path::Path;
use std::sync::Arc;

use vigil_analysis::{standard_stages, SeedCorpus};
use vigil_core::{new_run_id, pipeline_status, stage_name, GateCoordinator, GateDecision, PipelineConfig,
                 PipelineError, RunRegistry, ScriptedClient, StageId, StageOrchestrator, StageStatus};
use vigil_domain::AnalysisStore;
use vigil_persistence::{build_dev_pool_from_env, PgPipelineStore, PoolProvider};

/// Línea principal del pipeline (los sub-stages 3a..3c se corren explícitos).
const MAIN_LINE: [StageId; 5] = [1, 2, 3, 4, 5];

fn usage() {
    eprintln!("Uso: vigil <seed|run|status|approve|export> [opciones]");
    eprintln!("  seed    --file <json>");
    eprintln!("  run     --stage <N|3a|3b|3c|all> [--seed <json>]");
    eprintln!("  status");
    eprintln!("  approve --stage <N>");
    eprintln!("  export  --format <md|json> [--output <dir>]");
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag {
            return args.get(i + 1).map(String::as_str);
        }
        i += 1;
    }
    None
}

fn open_store() -> Arc<PgPipelineStore<PoolProvider>> {
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("[vigil] requiere DATABASE_URL para operar contra el backend persistente");
        std::process::exit(4);
    }
    let pool = match build_dev_pool_from_env() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("[vigil] pool error: {e}");
            std::process::exit(5);
        }
    };
    Arc::new(PgPipelineStore::new(PoolProvider { pool }))
}

fn load_config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    if let Some(n) = std::env::var("VIGIL_MAX_CONCURRENCY").ok().and_then(|v| v.parse().ok()) {
        cfg.max_concurrency = n;
    }
    if let Some(t) = std::env::var("VIGIL_CONVERGENCE_THRESHOLD").ok().and_then(|v| v.parse().ok()) {
        cfg.convergence_threshold = t;
    }
    if let Ok(dir) = std::env::var("VIGIL_EXPORT_DIR") {
        cfg.export_dir = dir;
    }
    cfg.normalized()
}

/// Cliente de fixtures: `{"fallback": <json>, "responses": [<json>, ...]}`.
fn fixtures_client() -> ScriptedClient {
    let path = match std::env::var("VIGIL_FIXTURES") {
        Ok(p) => p,
        Err(_) => {
            eprintln!("[vigil run] sin backend de razonamiento configurado; definir VIGIL_FIXTURES=<json>");
            std::process::exit(4);
        }
    };
    let raw = match std::fs::read_to_string(&path) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("[vigil run] no se pudo leer {path}: {e}");
            std::process::exit(5);
        }
    };
    let value: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("[vigil run] fixtures inválidos: {e}");
            std::process::exit(5);
        }
    };
    let client = ScriptedClient::new(value.get("fallback").cloned().unwrap_or(serde_json::Value::Null));
    if let Some(responses) = value.get("responses").and_then(serde_json::Value::as_array) {
        for response in responses {
            client.push_response(response.clone());
        }
    }
    client
}

fn parse_stage(raw: &str) -> Option<StageId> {
    match raw {
        "3a" => Some(30),
        "3b" => Some(31),
        "3c" => Some(32),
        other => other.parse().ok(),
    }
}

fn latest_or_new_run(store: &PgPipelineStore<PoolProvider>, config: &PipelineConfig) -> String {
    match store.latest_run() {
        Ok(Some(run_id)) => run_id,
        Ok(None) => {
            let run_id = new_run_id("run");
            if let Err(e) = store.create_run(&run_id, &config.snapshot(), "CLI run") {
                eprintln!("[vigil] no se pudo crear el run: {e}");
                std::process::exit(5);
            }
            run_id
        }
        Err(e) => {
            eprintln!("[vigil] {e}");
            std::process::exit(5);
        }
    }
}

fn cmd_run(args: &[String]) {
    let Some(stage_arg) = flag_value(args, "--stage") else {
        usage();
        std::process::exit(2);
    };
    let store = open_store();
    let config = load_config();
    let run_id = latest_or_new_run(&store, &config);
    println!("Run ID: {run_id}");

    let seed = match flag_value(args, "--seed") {
        Some(path) => match std::fs::read_to_string(path).map_err(|e| e.to_string())
                                                         .and_then(|raw| SeedCorpus::from_json(&raw)
                                                             .map_err(|e| e.to_string()))
        {
            Ok(corpus) => corpus,
            Err(e) => {
                eprintln!("[vigil run] seed inválido: {e}");
                std::process::exit(5);
            }
        },
        None => SeedCorpus::default(),
    };

    let client = fixtures_client();
    let analysis: Arc<dyn AnalysisStore> = store.clone();
    let set = standard_stages(analysis, seed);
    let orchestrator = StageOrchestrator::new(store.as_ref(), &client, &config);

    let stages: Vec<StageId> = if stage_arg == "all" {
        MAIN_LINE.to_vec()
    } else {
        match parse_stage(stage_arg) {
            Some(stage) => vec![stage],
            None => {
                eprintln!("[vigil run] stage inválido: {stage_arg}");
                std::process::exit(2);
            }
        }
    };

    match orchestrator.run_sequence(&run_id, &set, &stages) {
        Ok(reports) => {
            for report in &reports {
                let status = report.status.map(|s| s.to_string()).unwrap_or_else(|| "unknown".into());
                println!("  stage {} ({}): {}", report.stage, stage_name(report.stage), status);
            }
            if let Some(paused) = reports.iter().find(|r| r.needs_approval) {
                println!("\n  Pipeline pausado en el gate humano del stage {}.", paused.stage);
                println!("  Revisar outputs y aprobar con: vigil approve --stage {}", paused.stage);
            }
        }
        Err(PipelineError::PrerequisiteNotSatisfied { requested, stage, status }) => {
            eprintln!("[vigil run] stage {requested} bloqueado: stage {stage} está '{status}'");
            if status == "awaiting_approval" {
                eprintln!("  Aprobar primero: vigil approve --stage {stage}");
            }
            std::process::exit(4);
        }
        Err(e) => {
            eprintln!("[vigil run] {e}");
            std::process::exit(5);
        }
    }
}

fn cmd_status() {
    let store = open_store();
    let run_id = match store.latest_run() {
        Ok(Some(r)) => r,
        Ok(None) => {
            println!("No hay runs. Empezar con: vigil seed --file seed.json && vigil run --stage 1");
            return;
        }
        Err(e) => {
            eprintln!("[vigil] {e}");
            std::process::exit(5);
        }
    };

    println!("Run ID: {run_id}\n\n  Pipeline Status:");
    match pipeline_status(store.as_ref(), &run_id) {
        Ok(overview) => {
            for row in overview {
                let marker = match row.status {
                    Some(StageStatus::Completed) | Some(StageStatus::Approved) => "[done]",
                    Some(StageStatus::Running) => "[run ]",
                    Some(StageStatus::Failed) => "[fail]",
                    Some(StageStatus::AwaitingApproval) => "[gate]",
                    None => "[ -- ]",
                };
                let status = row.status.map(|s| s.to_string()).unwrap_or_else(|| "not started".into());
                println!("    {} Stage {:>2}: {} - {}", marker, row.stage, row.name, status);
                if let Some(error) = row.error_message {
                    println!("           error: {error}");
                }
            }
        }
        Err(e) => {
            eprintln!("[vigil] {e}");
            std::process::exit(5);
        }
    }

    let analysis: &dyn AnalysisStore = store.as_ref();
    let taxonomy = analysis.taxonomy().map(|t| t.len()).unwrap_or(0);
    let policies = analysis.policies().map(|p| p.len()).unwrap_or(0);
    let predictions = analysis.predictions(&run_id).map(|p| p.len()).unwrap_or(0);
    let patterns = analysis.detection_patterns(&run_id).map(|p| p.len()).unwrap_or(0);
    println!("\n  Data Summary:");
    println!("    Taxonomy qualities: {taxonomy}");
    println!("    Policies:           {policies}");
    println!("    Predictions:        {predictions}");
    println!("    Detection patterns: {patterns}");
}

fn cmd_approve(args: &[String]) {
    let stage = match flag_value(args, "--stage").and_then(parse_stage) {
        Some(s) => s,
        None => {
            usage();
            std::process::exit(2);
        }
    };
    let store = open_store();
    let run_id = match store.latest_run() {
        Ok(Some(r)) => r,
        Ok(None) => {
            println!("No hay runs que aprobar.");
            return;
        }
        Err(e) => {
            eprintln!("[vigil] {e}");
            std::process::exit(5);
        }
    };

    let gate = GateCoordinator::new(store.as_ref());
    match gate.approve(&run_id, stage) {
        Ok(GateDecision::Approved) => {
            println!("Stage {stage} aprobado. Continuar con: vigil run --stage {}", stage + 1);
            match gate.resume_on_approval(&run_id, stage) {
                Ok(Some(token)) => println!("Token de continuación para el coordinador externo: {token}"),
                Ok(None) => {}
                Err(e) => eprintln!("[vigil approve] token: {e}"),
            }
        }
        Ok(GateDecision::NotAwaiting { status }) => {
            let status = status.map(|s| s.to_string()).unwrap_or_else(|| "not started".into());
            println!("Stage {stage} está '{status}', no 'awaiting_approval'. Nada que aprobar.");
        }
        Err(e) => {
            eprintln!("[vigil approve] {e}");
            std::process::exit(5);
        }
    }
}

fn cmd_seed(args: &[String]) {
    let Some(path) = flag_value(args, "--file") else {
        usage();
        std::process::exit(2);
    };
    let raw = match std::fs::read_to_string(path) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("[vigil seed] no se pudo leer {path}: {e}");
            std::process::exit(5);
        }
    };
    let corpus = match SeedCorpus::from_json(&raw) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[vigil seed] {e}");
            std::process::exit(5);
        }
    };
    let store = open_store();
    match corpus.load(store.as_ref(), "seed") {
        Ok((qualities, policies)) => {
            println!("Seed cargado:");
            println!("  Taxonomy qualities: {qualities}");
            println!("  Policies:           {policies}");
        }
        Err(e) => {
            eprintln!("[vigil seed] {e}");
            std::process::exit(5);
        }
    }
}

fn cmd_export(args: &[String]) {
    let format = flag_value(args, "--format").unwrap_or("md");
    let store = open_store();
    let config = load_config();
    let run_id = match store.latest_run() {
        Ok(Some(r)) => r,
        Ok(None) => {
            println!("No hay runs que exportar.");
            return;
        }
        Err(e) => {
            eprintln!("[vigil] {e}");
            std::process::exit(5);
        }
    };

    let out_dir = flag_value(args, "--output").unwrap_or(&config.export_dir);
    if let Err(e) = std::fs::create_dir_all(out_dir) {
        eprintln!("[vigil export] no se pudo crear {out_dir}: {e}");
        std::process::exit(5);
    }

    let analysis: &dyn AnalysisStore = store.as_ref();
    let result = match format {
        "json" => export_json(analysis, &run_id, Path::new(out_dir)),
        _ => export_markdown(analysis, &run_id, Path::new(out_dir)),
    };
    match result {
        Ok(path) => println!("Exportado a {path}"),
        Err(e) => {
            eprintln!("[vigil export] {e}");
            std::process::exit(5);
        }
    }
}

fn export_json(analysis: &dyn AnalysisStore, run_id: &str, out_dir: &Path) -> Result<String, String> {
    let data = serde_json::json!({
        "taxonomy": analysis.taxonomy().map_err(|e| e.to_string())?,
        "policies": analysis.policies().map_err(|e| e.to_string())?,
        "policy_scores": analysis.policy_scores(run_id).map_err(|e| e.to_string())?,
        "predictions": analysis.predictions(run_id).map_err(|e| e.to_string())?,
        "detection_patterns": analysis.detection_patterns(run_id).map_err(|e| e.to_string())?,
    });
    let out_path = out_dir.join(format!("vigil_export_{run_id}.json"));
    let rendered = serde_json::to_string_pretty(&data).map_err(|e| e.to_string())?;
    std::fs::write(&out_path, rendered).map_err(|e| e.to_string())?;
    Ok(out_path.display().to_string())
}

fn export_markdown(analysis: &dyn AnalysisStore, run_id: &str, out_dir: &Path) -> Result<String, String> {
    let taxonomy = analysis.taxonomy().map_err(|e| e.to_string())?;
    let policies = analysis.policies().map_err(|e| e.to_string())?;
    let predictions = analysis.predictions(run_id).map_err(|e| e.to_string())?;
    let patterns = analysis.detection_patterns(run_id).map_err(|e| e.to_string())?;

    let mut lines = vec!["# VIGIL Analysis Report".to_string(), format!("Run: {run_id}\n")];

    if !taxonomy.is_empty() {
        lines.push("## Vulnerability Taxonomy\n".into());
        for q in &taxonomy {
            lines.push(format!("### {}: {} ({})", q.quality_id, q.name, q.review_status));
            lines.push(format!("**Definition:** {}\n", q.definition));
            lines.push(format!("**Recognition Test:** {}\n", q.recognition_test));
            lines.push(format!("**Exploitation Logic:** {}\n", q.exploitation_logic));
        }
    }

    if !predictions.is_empty() {
        lines.push("\n## Exploitation Predictions (by score)\n".into());
        for pred in &predictions {
            let policy_name = policies.iter()
                                      .find(|p| p.policy_id == pred.policy_id)
                                      .map(|p| p.name.as_str())
                                      .unwrap_or(pred.policy_id.as_str());
            lines.push(format!("### {policy_name} (score={})", pred.convergence_score));
            lines.push(format!("**Mechanics:** {}\n", pred.mechanics));
            lines.push(format!("**Enabling Qualities:** {}\n", pred.enabling_qualities.join(", ")));
            lines.push(format!("**Actor Profile:** {}\n", pred.actor_profile.as_deref().unwrap_or("N/A")));
            lines.push(format!("**Detection Difficulty:** {}\n",
                               pred.detection_difficulty.as_deref().unwrap_or("N/A")));
        }
    }

    if !patterns.is_empty() {
        lines.push("\n## Detection Patterns\n".into());
        for pat in &patterns {
            lines.push(format!("### [{}] {}", pat.priority.as_str().to_uppercase(), pat.data_source));
            lines.push(format!("**Anomaly Signal:** {}\n", pat.anomaly_signal));
            lines.push(format!("**Baseline:** {}\n", pat.baseline.as_deref().unwrap_or("N/A")));
            lines.push(format!("**False Positive Risk:** {}\n",
                               pat.false_positive_risk.as_deref().unwrap_or("N/A")));
            lines.push(format!("**Detection Latency:** {}\n",
                               pat.detection_latency.as_deref().unwrap_or("N/A")));
        }
    }

    let out_path = out_dir.join(format!("vigil_report_{run_id}.md"));
    std::fs::write(&out_path, lines.join("\n")).map_err(|e| e.to_string())?;
    Ok(out_path.display().to_string())
}

fn main() {
    let _ = dotenvy::dotenv();
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        usage();
        std::process::exit(2);
    }
    match args[1].as_str() {
        "run" => cmd_run(&args[2..]),
        "status" => cmd_status(),
        "approve" => cmd_approve(&args[2..]),
        "seed" => cmd_seed(&args[2..]),
        "export" => cmd_export(&args[2..]),
        _ => {
            usage();
            std::process::exit(2);
        }
    }
}
