//! Migrador de esquema versionado con exclusión mutua entre instancias.
//!
//! Máquina de dos estados (unlocked / migrating) sobre un advisory lock
//! transaccional con clave fija: todas las instancias que arrancan compiten
//! por la misma clave.
//!
//! Protocolo, dentro de UNA transacción read-write:
//! 1. `pg_try_advisory_xact_lock(clave)`. Si no se obtiene, otra instancia
//!    está migrando: se lee la versión best-effort y se retorna SIN error
//!    (conservador: se asume que el holder termina; jamás una segunda
//!    migración concurrente).
//! 2. Con el lock: bootstrap de la tabla `schema_version` (fila única),
//!    lectura de versión; si ya está en target, retorno.
//! 3. Si no, se aplican los pasos con versión > actual en orden estricto
//!    creciente. Cada statement es idempotente por construcción
//!    (IF NOT EXISTS / ADD COLUMN IF NOT EXISTS), así un replay contra un
//!    esquema parcialmente migrado — crash entre el paso N y el update del
//!    contador — no falla.
//! 4. Update del contador y commit: contador y DDL son atómicos, no existe
//!    ventana donde el contador declare una versión cuyo DDL no aplicó. El
//!    lock se libera solo al commitear/rollbackear.
//!
//! Cualquier error rollbackea la transacción completa dejando la versión
//! intacta (el próximo arranque reintenta desde el mismo punto) y es fatal
//! para el startup del proceso.

use crate::error::PersistenceError;
use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Bool, Integer};
use log::{debug, info};

/// Clave fija del advisory lock de migración: única primitiva de exclusión
/// mutua cross-instancia del sistema.
pub const MIGRATION_LOCK_KEY: i64 = 0x5649_4749_4c01;

/// Un paso de migración tipado: versión monotónica, nombre y statements
/// forward idempotentes.
#[derive(Debug, Clone, Copy)]
pub struct MigrationStep {
    pub version: i32,
    pub name: &'static str,
    pub statements: &'static [&'static str],
}

/// Catálogo completo, en orden estricto de versión.
pub const CATALOG: &[MigrationStep] = &[
    MigrationStep { version: 1,
                    name: "core_pipeline_state",
                    statements: &[
                        "CREATE TABLE IF NOT EXISTS pipeline_runs (
                            run_id          TEXT PRIMARY KEY,
                            created_at      TIMESTAMPTZ NOT NULL,
                            config_snapshot JSONB NOT NULL,
                            notes           TEXT NOT NULL DEFAULT ''
                        )",
                        "CREATE TABLE IF NOT EXISTS stage_log (
                            id              BIGSERIAL PRIMARY KEY,
                            run_id          TEXT NOT NULL,
                            stage           INTEGER NOT NULL,
                            status          TEXT NOT NULL CHECK (status IN
                                ('running','completed','failed','awaiting_approval','approved')),
                            started_at      TIMESTAMPTZ,
                            completed_at    TIMESTAMPTZ,
                            error_message   TEXT,
                            metadata        JSONB
                        )",
                        "CREATE INDEX IF NOT EXISTS idx_stage_log_run_stage
                            ON stage_log (run_id, stage, id DESC)",
                        "CREATE TABLE IF NOT EXISTS stage_processing_log (
                            stage           INTEGER NOT NULL,
                            entity_id       TEXT NOT NULL,
                            input_hash      TEXT NOT NULL,
                            run_id          TEXT NOT NULL,
                            processed_at    TIMESTAMPTZ NOT NULL,
                            PRIMARY KEY (stage, entity_id)
                        )",
                    ] },
    MigrationStep { version: 2,
                    name: "gate_continuation_tokens",
                    statements: &[
                        "ALTER TABLE stage_log ADD COLUMN IF NOT EXISTS gate_token TEXT",
                    ] },
    MigrationStep { version: 3,
                    name: "analysis_corpus",
                    statements: &[
                        "CREATE TABLE IF NOT EXISTS taxonomy (
                            quality_id          TEXT PRIMARY KEY,
                            run_id              TEXT NOT NULL,
                            name                TEXT NOT NULL,
                            definition          TEXT NOT NULL,
                            recognition_test    TEXT NOT NULL,
                            exploitation_logic  TEXT NOT NULL,
                            canonical_examples  JSONB NOT NULL DEFAULT '[]'::jsonb,
                            review_status       TEXT NOT NULL DEFAULT 'draft' CHECK (review_status IN
                                ('draft','approved','rejected','revised')),
                            reviewer_notes      TEXT,
                            created_at          TIMESTAMPTZ NOT NULL
                        )",
                        "CREATE TABLE IF NOT EXISTS policies (
                            policy_id           TEXT PRIMARY KEY,
                            run_id              TEXT NOT NULL,
                            name                TEXT NOT NULL,
                            description         TEXT,
                            source_document     TEXT,
                            structural_characterization TEXT,
                            created_at          TIMESTAMPTZ NOT NULL
                        )",
                    ] },
    MigrationStep { version: 4,
                    name: "scores_predictions_patterns",
                    statements: &[
                        "CREATE TABLE IF NOT EXISTS policy_scores (
                            id                  BIGSERIAL PRIMARY KEY,
                            run_id              TEXT NOT NULL,
                            policy_id           TEXT NOT NULL,
                            quality_id          TEXT NOT NULL,
                            present             BOOLEAN NOT NULL,
                            evidence            TEXT,
                            created_at          TIMESTAMPTZ NOT NULL
                        )",
                        "CREATE UNIQUE INDEX IF NOT EXISTS uq_policy_score
                            ON policy_scores (run_id, policy_id, quality_id)",
                        "CREATE TABLE IF NOT EXISTS predictions (
                            prediction_id       TEXT PRIMARY KEY,
                            run_id              TEXT NOT NULL,
                            policy_id           TEXT NOT NULL,
                            convergence_score   INTEGER NOT NULL,
                            mechanics           TEXT NOT NULL,
                            enabling_qualities  JSONB NOT NULL DEFAULT '[]'::jsonb,
                            actor_profile       TEXT,
                            lifecycle_stage     TEXT,
                            detection_difficulty TEXT,
                            review_status       TEXT NOT NULL DEFAULT 'draft',
                            created_at          TIMESTAMPTZ NOT NULL
                        )",
                        "CREATE TABLE IF NOT EXISTS detection_patterns (
                            pattern_id          TEXT PRIMARY KEY,
                            run_id              TEXT NOT NULL,
                            prediction_id       TEXT NOT NULL,
                            data_source         TEXT NOT NULL,
                            anomaly_signal      TEXT NOT NULL,
                            baseline            TEXT,
                            false_positive_risk TEXT,
                            detection_latency   TEXT,
                            priority            TEXT NOT NULL DEFAULT 'medium' CHECK (priority IN
                                ('critical','high','medium','low')),
                            implementation_notes TEXT,
                            created_at          TIMESTAMPTZ NOT NULL
                        )",
                    ] },
];

const BOOTSTRAP: &str = "CREATE TABLE IF NOT EXISTS schema_version (
        id      SMALLINT PRIMARY KEY CHECK (id = 1),
        version INTEGER NOT NULL
    );
    INSERT INTO schema_version (id, version) VALUES (1, 0) ON CONFLICT (id) DO NOTHING;";

/// Resultado observable de un arranque del migrador.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Esta instancia aplicó los pasos (from, to].
    Applied { from: i32, to: i32 },
    /// No había nada que aplicar.
    AlreadyCurrent { version: i32 },
    /// Otra instancia sostiene el lock; se asume que termina ella.
    LockHeldElsewhere { observed: Option<i32> },
}

/// Versión objetivo = última del catálogo.
pub fn target_version() -> i32 {
    CATALOG.last().map(|s| s.version).unwrap_or(0)
}

#[derive(QueryableByName)]
struct LockRow {
    #[diesel(sql_type = Bool)]
    acquired: bool,
}

#[derive(QueryableByName)]
struct VersionRow {
    #[diesel(sql_type = Integer)]
    version: i32,
}

fn read_version(conn: &mut PgConnection) -> Result<i32, diesel::result::Error> {
    diesel::sql_query("SELECT version FROM schema_version WHERE id = 1")
        .get_result::<VersionRow>(conn)
        .map(|row| row.version)
}

/// Corre el protocolo de migración completo. Ver doc del módulo.
pub fn run_migrations(conn: &mut PgConnection) -> Result<MigrationOutcome, PersistenceError> {
    let outcome = conn.build_transaction().read_write().run(|tx| {
        let lock: LockRow = diesel::sql_query("SELECT pg_try_advisory_xact_lock($1) AS acquired")
            .bind::<BigInt, _>(MIGRATION_LOCK_KEY)
            .get_result(tx)?;

        if !lock.acquired {
            // En el primer arranque absoluto la tabla puede no existir aún:
            // lectura best-effort, sin error.
            let observed = read_version(tx).ok();
            debug!("migration lock held elsewhere (observed version {observed:?})");
            return Ok(MigrationOutcome::LockHeldElsewhere { observed });
        }

        tx.batch_execute(BOOTSTRAP)?;
        let current = read_version(tx)?;
        let target = target_version();
        if current >= target {
            debug!("schema already at version {current}");
            return Ok(MigrationOutcome::AlreadyCurrent { version: current });
        }

        for step in CATALOG.iter().filter(|s| s.version > current) {
            info!("applying migration v{} ({})", step.version, step.name);
            for statement in step.statements {
                tx.batch_execute(statement)?;
            }
        }
        diesel::sql_query("UPDATE schema_version SET version = $1 WHERE id = 1")
            .bind::<Integer, _>(target)
            .execute(tx)?;
        Ok::<MigrationOutcome, diesel::result::Error>(MigrationOutcome::Applied { from: current, to: target })
    });

    outcome.map_err(|e: diesel::result::Error| PersistenceError::MigrationFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_versions_are_strictly_increasing() {
        // La validación que antes era "por convención" ahora es chequeable.
        for window in CATALOG.windows(2) {
            assert!(window[0].version < window[1].version,
                    "catalog out of order at v{} -> v{}",
                    window[0].version,
                    window[1].version);
        }
        assert_eq!(target_version(), CATALOG.last().unwrap().version);
    }

    #[test]
    fn every_step_has_statements() {
        for step in CATALOG {
            assert!(!step.statements.is_empty(), "v{} has no statements", step.version);
            assert!(!step.name.is_empty());
        }
    }
}
