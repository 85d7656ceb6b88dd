//! vigil-persistence
//!
//! Capa Postgres (Diesel) del pipeline: implementaciones durables de los
//! traits de almacenamiento del core y del dominio, con paridad 1:1 respecto
//! a los backends in-memory, más el migrador de esquema versionado que
//! coordina instancias concurrentes vía advisory lock.
//!
//! Módulos:
//! - `pg`: implementaciones sobre Postgres (stage log append-only, ledger de
//!   procesamiento, corpus de análisis).
//! - `migrations`: catálogo tipado de migraciones y rutina de aplicación
//!   exactly-once.
//! - `config`: carga de configuración desde .env.
//! - `schema`: tablas Diesel declaradas para compilar queries.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use migrations::{run_migrations, target_version, MigrationOutcome, MigrationStep, CATALOG,
                     MIGRATION_LOCK_KEY};
pub use pg::{build_dev_pool_from_env, build_pool, ConnectionProvider, PgPipelineStore, PgPool, PoolProvider};
