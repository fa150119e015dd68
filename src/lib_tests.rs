use super::{Bootstrap, LiveCatalog};
use crate::artifact::ArtifactBuilder;
use crate::catalog::deployment::Deployment;
use crate::catalog::types::Value;
use crate::cluster::InMemoryTables;
use crate::config::{LivecatConfig, RecoveryMode};
use crate::manifest::load_committed;
use crate::response::ResponseStatus;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const ORDERS_DDL: &str = "CREATE TABLE ORDERS (
    O_ID INTEGER NOT NULL,
    O_NAME VARCHAR(32),
    PRIMARY KEY (O_ID)
);
CREATE PROCEDURE CountOrders AS SELECT O_ID FROM ORDERS;";

fn bootstrap(deployment: &str) -> Bootstrap {
    Bootstrap {
        artifact: Some(ArtifactBuilder::new().ddl(ORDERS_DDL).build()),
        deployment: Deployment::parse(deployment.as_bytes()).expect("deployment"),
    }
}

fn open(dir: &Path, tables: Arc<InMemoryTables>, deployment: &str) -> LiveCatalog {
    LiveCatalog::open_with(LivecatConfig::default(), dir, bootstrap(deployment), tables)
        .expect("open")
}

#[tokio::test]
async fn fresh_directory_records_bootstrap_generation() {
    let dir = tempdir().expect("temp");
    let live = open(dir.path(), Arc::new(InMemoryTables::new()), "{}");
    assert_eq!(live.catalog_generation(), 0);
    let committed = load_committed(dir.path(), None, true)
        .expect("load")
        .expect("bootstrap recorded");
    assert_eq!(committed.manifest.generation, 0);
    assert_eq!(
        committed.manifest.catalog_hash,
        live.current_catalog().catalog_hash
    );
}

#[cfg(unix)]
#[tokio::test]
async fn data_directory_is_private() {
    use std::os::unix::fs::PermissionsExt;
    let dir = tempdir().expect("temp");
    let data = dir.path().join("data");
    let _live = LiveCatalog::open(LivecatConfig::default(), &data).expect("open");
    let mode = fs::metadata(&data).expect("metadata").permissions().mode();
    assert_eq!(mode & 0o777, 0o700);
}

#[tokio::test]
async fn default_procedures_run_and_count_statistics() {
    let dir = tempdir().expect("temp");
    let tables = Arc::new(InMemoryTables::new());
    let live = open(dir.path(), Arc::clone(&tables), "{}");
    let session = live.connect(None, None).expect("connect");

    let response = live
        .call(
            session,
            "ORDERS.insert",
            vec![Value::Integer(1), Value::from("first")],
        )
        .await
        .expect("insert");
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(tables.rows("ORDERS"), 1);

    let err = live
        .call(session, "ORDERS.insert", vec![Value::Integer(2)])
        .await
        .expect_err("arity");
    assert!(err.message.contains("EXPECTS 2 PARAMS"));

    live.call(session, "CountOrders", Vec::new())
        .await
        .expect("select");
    let rows = live.procedure_statistics();
    let names: Vec<&str> = rows.iter().map(|r| r.procedure.as_str()).collect();
    assert_eq!(names, vec!["CountOrders", "ORDERS.insert"]);
}

#[tokio::test]
async fn unknown_procedure_and_sysproc_are_graceful() {
    let dir = tempdir().expect("temp");
    let live = open(dir.path(), Arc::new(InMemoryTables::new()), "{}");
    let session = live.connect(None, None).expect("connect");
    let err = live
        .call(session, "InsertOrderLineBatched", Vec::new())
        .await
        .expect_err("missing");
    assert_eq!(err.status, ResponseStatus::GracefulFailure);
    assert!(err.message.contains("Procedure InsertOrderLineBatched was not found"));

    let err = live
        .call(session, "@Shutdown", Vec::new())
        .await
        .expect_err("unknown sysproc");
    assert_eq!(err.code, "procedure_not_found");
    assert!(live.procedure_statistics().is_empty());
}

#[tokio::test]
async fn query_timeout_fails_only_that_call() {
    let dir = tempdir().expect("temp");
    let tables = Arc::new(InMemoryTables::new());
    let live = open(dir.path(), Arc::clone(&tables), r#"{"query_timeout_ms":50}"#);
    let session = live.connect(None, None).expect("connect");
    tables.set_call_delay(Duration::from_millis(300));
    let err = live
        .call(session, "CountOrders", Vec::new())
        .await
        .expect_err("timeout");
    assert_eq!(err.code, "query_timeout");
    tables.set_call_delay(Duration::ZERO);
    live.call(session, "CountOrders", Vec::new())
        .await
        .expect("next call unaffected");
    let row = &live.procedure_statistics()[0];
    assert_eq!(row.invocations, 2);
    assert_eq!(row.failures, 1);
}

#[tokio::test]
async fn adhoc_dml_is_planned_and_mixed_batches_refused() {
    let dir = tempdir().expect("temp");
    let tables = Arc::new(InMemoryTables::new());
    let live = open(dir.path(), Arc::clone(&tables), "{}");
    let session = live.connect(None, None).expect("connect");

    live.adhoc(session, "INSERT INTO ORDERS (O_ID, O_NAME) VALUES (7, 'x');")
        .await
        .expect("insert");
    assert_eq!(tables.rows("ORDERS"), 1);

    let err = live
        .adhoc(session, "INSERT INTO ORDERS (NOPE) VALUES (1)")
        .await
        .expect_err("plan");
    assert_eq!(err.code, "plan_failure");

    let err = live
        .adhoc(
            session,
            "CREATE TABLE X (A INTEGER); INSERT INTO ORDERS (O_ID) VALUES (1);",
        )
        .await
        .expect_err("mixed");
    assert!(err.message.contains("mixed"));
}

#[tokio::test]
async fn system_catalog_tables_report_row_counts() {
    let dir = tempdir().expect("temp");
    let tables = Arc::new(InMemoryTables::new());
    tables.set_rows("ORDERS", 3);
    let live = open(dir.path(), tables, "{}");
    let table = live.system_catalog("tables").expect("tables");
    assert_eq!(table.row_count(), 1);
    assert_eq!(table.value(0, "ROW_COUNT"), Some(&Value::Integer(3)));
    assert!(live.system_catalog("BOGUS").is_err());

    let procs = live.system_catalog("PROCEDURES").expect("procedures");
    assert_eq!(procs.value(0, "PROCEDURE_TYPE"), Some(&Value::from("SINGLE_STATEMENT")));
}

#[tokio::test]
async fn empty_catalog_bytes_mean_no_new_artifact() {
    let dir = tempdir().expect("temp");
    let live = open(dir.path(), Arc::new(InMemoryTables::new()), "{}");
    let admin = live.connect_admin(None, None).expect("admin");
    let before = live.current_catalog();
    let outcome = live
        .update_application_catalog(admin, Some(&[]), None)
        .await
        .expect("empty bytes are not decoded");
    assert_eq!(outcome.generation, 1);
    assert!(live.current_catalog().same_content(&before));
}

#[tokio::test]
async fn permissive_reopen_rebuilds_lost_manifest() {
    let dir = tempdir().expect("temp");
    let config = LivecatConfig {
        recovery_mode: RecoveryMode::Permissive,
        ..LivecatConfig::default()
    };
    {
        let live = LiveCatalog::open_with_bootstrap(config.clone(), dir.path(), bootstrap("{}"))
            .expect("open");
        let admin = live.connect_admin(None, None).expect("admin");
        live.update_application_catalog(admin, None, Some(br#"{"heartbeat_timeout_secs":30}"#))
            .await
            .expect("deployment update");
    }
    fs::remove_file(dir.path().join("manifest.json")).expect("remove manifest");
    fs::remove_file(dir.path().join("manifest.json.prev")).expect("remove prev");

    let live = LiveCatalog::open(config.clone(), dir.path()).expect("reopen");
    assert_eq!(live.catalog_generation(), 1);
    assert_eq!(live.current_catalog().deployment.heartbeat_timeout_secs, 30);
    assert!(dir.path().join("manifest.json").exists());

    let strict = LivecatConfig::default();
    drop(live);
    LiveCatalog::open(strict, dir.path()).expect("manifest rewritten, strict open succeeds");
}
