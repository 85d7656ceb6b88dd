//! El migrador aplica cada paso exactamente una vez y tolera replay sobre un
//! esquema parcialmente migrado. Un solo #[test] secuencial: los pasos
//! comparten la misma base y no deben interlevarse.

use diesel::{Connection, PgConnection, RunQueryDsl};
use vigil_persistence::{init_dotenv, run_migrations, target_version, DbConfig, MigrationOutcome};

#[test]
fn migrator_is_exactly_once_and_replay_safe() {
    init_dotenv();
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("DATABASE_URL no definido: omitiendo test");
        return;
    }

    let cfg = DbConfig::from_env();
    let mut conn = PgConnection::establish(&cfg.url).expect("connect");

    // Primera corrida: aplica todo (base nueva) o ya está al día.
    let first = run_migrations(&mut conn).expect("first run");
    match first {
        MigrationOutcome::Applied { to, .. } => assert_eq!(to, target_version()),
        MigrationOutcome::AlreadyCurrent { version } => assert_eq!(version, target_version()),
        MigrationOutcome::LockHeldElsewhere { .. } => panic!("ninguna otra instancia debería tener el lock"),
    }

    // Segunda corrida inmediata: cada paso se aplicó exactamente una vez.
    let second = run_migrations(&mut conn).expect("second run");
    assert_eq!(second, MigrationOutcome::AlreadyCurrent { version: target_version() });

    // Simula el crash entre DDL y contador: retrocede el contador y replaya.
    // Los statements son idempotentes por construcción, así que el replay
    // sobre el esquema ya migrado termina limpio en la versión objetivo.
    diesel::sql_query("UPDATE schema_version SET version = 1 WHERE id = 1")
        .execute(&mut conn)
        .expect("rewind version counter");
    let replay = run_migrations(&mut conn).expect("replay");
    assert_eq!(replay,
               MigrationOutcome::Applied { from: 1,
                                           to: target_version() });

    let settled = run_migrations(&mut conn).expect("settled");
    assert_eq!(settled, MigrationOutcome::AlreadyCurrent { version: target_version() });
}
