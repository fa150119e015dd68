use livecat::{
    ArtifactBuilder, Bootstrap, Deployment, InMemoryTables, LiveCatalog, LivecatConfig,
    LivecatError, Value,
};
use livecat::manifest::load_committed;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const ORDERS: &str = "CREATE TABLE ORDERS (
    O_ID INTEGER NOT NULL,
    O_C_ID INTEGER,
    PRIMARY KEY (O_ID)
);
CREATE PROCEDURE CountOrders AS SELECT O_ID FROM ORDERS;";

const CUSTOMER: &str = "CREATE TABLE CUSTOMER (
    C_ID INTEGER NOT NULL,
    C_NAME VARCHAR(32),
    PRIMARY KEY (C_ID)
);";

fn jar_bytes(ddl: &str) -> Vec<u8> {
    ArtifactBuilder::new().ddl(ddl).to_bytes().expect("jar")
}

fn open(dir: &std::path::Path, config: LivecatConfig, deployment: &str) -> (LiveCatalog, Arc<InMemoryTables>) {
    let tables = Arc::new(InMemoryTables::new());
    let bootstrap = Bootstrap {
        artifact: Some(ArtifactBuilder::new().ddl(ORDERS).build()),
        deployment: Deployment::parse(deployment.as_bytes()).expect("deployment"),
    };
    let live = LiveCatalog::open_with(config, dir, bootstrap, Arc::clone(&tables)).expect("open");
    (live, tables)
}

#[tokio::test]
async fn new_schema_is_installed_as_next_generation() {
    let dir = tempdir().expect("temp");
    let (live, _) = open(dir.path(), LivecatConfig::default(), "{}");
    let admin = live.connect_admin(None, None).expect("admin");

    let outcome = live
        .update_application_catalog(admin, Some(&jar_bytes(&format!("{ORDERS}\n{CUSTOMER}"))), None)
        .await
        .expect("update");
    assert_eq!(outcome.generation, 1);
    assert!(outcome.description.contains("ADD TABLE CUSTOMER"));
    assert!(!outcome.already_applied);
    assert_eq!(live.catalog_generation(), 1);

    let user = live.connect(None, None).expect("user");
    let response = live
        .call(user, "CUSTOMER.insert", vec![Value::Integer(1), Value::from("acme")])
        .await
        .expect("new default procedure");
    assert_eq!(response.generation, 1);

    let committed = load_committed(dir.path(), None, true)
        .expect("load")
        .expect("committed");
    assert_eq!(committed.manifest.generation, 1);

    // Resubmitting the same artifact is a fresh generation with nothing to change.
    let again = live
        .update_application_catalog(admin, Some(&jar_bytes(&format!("{ORDERS}\n{CUSTOMER}"))), None)
        .await
        .expect("same catalog");
    assert_eq!(again.generation, 2);
    assert_eq!(again.description, "no changes\n");

    let metrics = live.update_metrics();
    assert_eq!(metrics.submitted, 2);
    assert_eq!(metrics.committed, 2);
}

#[tokio::test]
async fn dropping_a_table_removes_its_procedures() {
    let dir = tempdir().expect("temp");
    let (live, _) = open(dir.path(), LivecatConfig::default(), "{}");
    let admin = live.connect_admin(None, None).expect("admin");
    live.update_application_catalog(admin, Some(&jar_bytes(CUSTOMER)), None)
        .await
        .expect("update");

    let err = live
        .call(admin, "CountOrders", Vec::new())
        .await
        .expect_err("dropped");
    assert_eq!(err.code, "procedure_not_found");
    let err = live
        .call(admin, "ORDERS.select", vec![Value::Integer(1)])
        .await
        .expect_err("default dropped");
    assert_eq!(err.code, "procedure_not_found");
}

#[tokio::test]
async fn not_null_column_needs_an_empty_table() {
    let dir = tempdir().expect("temp");
    let (live, tables) = open(dir.path(), LivecatConfig::default(), "{}");
    let admin = live.connect_admin(None, None).expect("admin");
    tables.set_rows("ORDERS", 5);
    let altered = "CREATE TABLE ORDERS (
        O_ID INTEGER NOT NULL,
        O_C_ID INTEGER,
        O_TOTAL INTEGER NOT NULL,
        PRIMARY KEY (O_ID)
    );
    CREATE PROCEDURE CountOrders AS SELECT O_ID FROM ORDERS;";

    let err = live
        .update_application_catalog(admin, Some(&jar_bytes(altered)), None)
        .await
        .expect_err("populated");
    assert!(matches!(err, LivecatError::TablesMustBeEmpty(_)));
    assert!(err.to_string().contains("Unable to add NOT NULL column O_TOTAL"));
    assert_eq!(live.catalog_generation(), 0);
    assert!(live.nodes().iter().all(|n| n.generation() == 0));

    tables.set_rows("ORDERS", 0);
    let outcome = live
        .update_application_catalog(admin, Some(&jar_bytes(altered)), None)
        .await
        .expect("empty table");
    assert!(outcome.description.contains("ALTER TABLE ORDERS: add column O_TOTAL"));
}

#[tokio::test]
async fn materialized_views_need_an_empty_source() {
    let dir = tempdir().expect("temp");
    let (live, tables) = open(dir.path(), LivecatConfig::default(), "{}");
    let admin = live.connect_admin(None, None).expect("admin");
    tables.set_rows("ORDERS", 5);

    // A view over a table created in the same update is always accepted.
    let with_names = format!(
        "{ORDERS}\n{CUSTOMER}\n\
         CREATE VIEW CUSTOMER_NAMES (C_NAME, N) AS SELECT C_NAME, COUNT(*) FROM CUSTOMER GROUP BY C_NAME;\n\
         CREATE PROCEDURE NameCount AS SELECT N FROM CUSTOMER_NAMES WHERE C_NAME = ?;"
    );
    let outcome = live
        .update_application_catalog(admin, Some(&jar_bytes(&with_names)), None)
        .await
        .expect("table with view");
    assert!(outcome.description.contains("ADD VIEW CUSTOMER_NAMES"));
    let views = live.system_catalog("VIEWS").expect("views");
    assert_eq!(views.value(0, "SOURCE_TABLE"), Some(&Value::from("CUSTOMER")));
    let user = live.connect(None, None).expect("user");
    live.call(user, "NameCount", vec![Value::from("acme")])
        .await
        .expect("view is readable");

    let with_totals = format!(
        "{with_names}\n\
         CREATE VIEW ORDERS_BY_CUSTOMER (O_C_ID, N) AS SELECT O_C_ID, COUNT(*) FROM ORDERS GROUP BY O_C_ID;"
    );
    let err = live
        .update_application_catalog(admin, Some(&jar_bytes(&with_totals)), None)
        .await
        .expect_err("populated source");
    assert!(matches!(err, LivecatError::TablesMustBeEmpty(_)));
    assert!(err.to_string().contains("materialized view ORDERS_BY_CUSTOMER"));
    assert_eq!(live.catalog_generation(), 1);

    tables.set_rows("ORDERS", 0);
    live.update_application_catalog(admin, Some(&jar_bytes(&with_totals)), None)
        .await
        .expect("empty source");
    assert_eq!(live.system_catalog("VIEWS").expect("views").row_count(), 2);
}

#[tokio::test]
async fn topology_and_schema_mode_cannot_change_live() {
    let dir = tempdir().expect("temp");
    let (live, _) = open(dir.path(), LivecatConfig::default(), "{}");
    let admin = live.connect_admin(None, None).expect("admin");

    let err = live
        .update_application_catalog(admin, None, Some(br#"{"cluster":{"sites_per_host":4}}"#))
        .await
        .expect_err("topology");
    assert_eq!(err.code_str(), "unsupported_change");
    assert!(err.to_string().contains("cluster topology"));

    let err = live
        .update_application_catalog(admin, None, Some(br#"{"schema_mode":"ddl"}"#))
        .await
        .expect_err("schema mode");
    assert_eq!(err.code_str(), "unsupported_change");
    assert_eq!(live.update_metrics().rejected_validation, 2);
}

#[tokio::test]
async fn missing_or_unreadable_catalog_is_reported() {
    let dir = tempdir().expect("temp");
    let (live, _) = open(dir.path(), LivecatConfig::default(), "{}");
    let admin = live.connect_admin(None, None).expect("admin");

    let err = live
        .update_application_catalog_from_path(admin, &dir.path().join("nope.jar"), None)
        .await
        .expect_err("missing");
    assert!(matches!(err, LivecatError::CatalogNotFound { .. }));
    assert!(err.to_string().contains("Database catalog not found"));

    let err = live
        .update_application_catalog(admin, Some(b"definitely not a jar"), None)
        .await
        .expect_err("garbage");
    assert!(err.to_string().contains("Unable to read from catalog bytes"));
    assert_eq!(live.catalog_generation(), 0);
}

#[tokio::test]
async fn artifact_on_disk_can_be_submitted() {
    let dir = tempdir().expect("temp");
    let (live, _) = open(dir.path(), LivecatConfig::default(), "{}");
    let admin = live.connect_admin(None, None).expect("admin");
    let path = dir.path().join("next.jar");
    std::fs::write(&path, jar_bytes(&format!("{ORDERS}\n{CUSTOMER}"))).expect("write jar");
    let outcome = live
        .update_application_catalog_from_path(admin, &path, Some(br#"{"heartbeat_timeout_secs":45}"#))
        .await
        .expect("update");
    assert!(outcome.description.contains("DEPLOYMENT heartbeat timeout changed"));
    assert_eq!(live.current_catalog().deployment.heartbeat_timeout_secs, 45);
}

#[tokio::test]
async fn in_flight_call_finishes_on_its_generation() {
    let dir = tempdir().expect("temp");
    let config = LivecatConfig {
        drain_wait_ms: 5_000,
        ..LivecatConfig::default()
    };
    let (live, tables) = open(dir.path(), config, "{}");
    let admin = live.connect_admin(None, None).expect("admin");
    let user = live.connect(None, None).expect("user");
    let next = jar_bytes(&format!(
        "{ORDERS}\nCREATE PROCEDURE CountAgain AS SELECT O_ID FROM ORDERS;"
    ));

    tables.set_call_delay(Duration::from_millis(300));
    let (call, update) = tokio::join!(live.call(user, "CountOrders", Vec::new()), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        live.update_application_catalog(admin, Some(&next), None).await
    });
    let call = call.expect("in-flight call");
    let update = update.expect("update");
    assert_eq!(call.generation, 0);
    assert_eq!(update.generation, 1);
    assert!(update.drained);
    assert!(live.node(0).expect("node").barrier().retained_generations().is_empty());

    tables.set_call_delay(Duration::ZERO);
    let response = live
        .call(user, "CountAgain", Vec::new())
        .await
        .expect("new procedure");
    assert_eq!(response.generation, 1);
}

#[tokio::test]
async fn next_update_is_admitted_while_previous_generation_drains() {
    let dir = tempdir().expect("temp");
    let config = LivecatConfig {
        drain_wait_ms: 5_000,
        ..LivecatConfig::default()
    };
    let (live, tables) = open(dir.path(), config, "{}");
    let admin = live.connect_admin(None, None).expect("admin");
    let user = live.connect(None, None).expect("user");

    tables.set_call_delay(Duration::from_millis(900));
    let (call, first, second) = tokio::join!(
        live.call(user, "CountOrders", Vec::new()),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            live.update_application_catalog(admin, None, None).await
        },
        async {
            tokio::time::sleep(Duration::from_millis(400)).await;
            live.update_application_catalog(admin, None, Some(br#"{"heartbeat_timeout_secs":20}"#))
                .await
        }
    );
    assert_eq!(call.expect("in-flight call").generation, 0);
    assert_eq!(first.expect("first update").generation, 1);
    let second = second.expect("not refused as concurrent while the first drains");
    assert_eq!(second.generation, 2);
    assert_eq!(live.catalog_generation(), 2);
}

#[tokio::test]
async fn statistics_restart_with_each_generation() {
    let dir = tempdir().expect("temp");
    let (live, _) = open(dir.path(), LivecatConfig::default(), "{}");
    let admin = live.connect_admin(None, None).expect("admin");
    live.call(admin, "CountOrders", Vec::new()).await.expect("call");
    live.call(admin, "CountOrders", Vec::new()).await.expect("call");
    assert_eq!(live.procedure_statistics()[0].invocations, 2);

    live.update_application_catalog(admin, None, None)
        .await
        .expect("no-op update");
    assert!(live.procedure_statistics().is_empty());

    let response = live
        .call(admin, "@Statistics", Vec::new())
        .await
        .expect("statistics");
    assert_eq!(response.first_table().expect("table").row_count(), 0);
}

#[tokio::test]
async fn ddl_mode_takes_adhoc_ddl_and_refuses_whole_catalogs() {
    let dir = tempdir().expect("temp");
    let (live, _) = open(dir.path(), LivecatConfig::default(), r#"{"schema_mode":"ddl"}"#);
    let admin = live.connect_admin(None, None).expect("admin");

    let response = live.adhoc(admin, CUSTOMER).await.expect("adhoc ddl");
    assert_eq!(response.generation, 1);
    live.call(admin, "CUSTOMER.insert", vec![Value::Integer(9), Value::Null])
        .await
        .expect("insert");
    assert!(live.current_catalog().tables.contains_key("ORDERS"));

    let err = live
        .update_application_catalog(admin, Some(&jar_bytes(ORDERS)), None)
        .await
        .expect_err("catalog in ddl mode");
    assert!(matches!(err, LivecatError::SchemaModeMismatch(_)));

    live.update_application_catalog(admin, None, Some(br#"{"schema_mode":"ddl","query_timeout_ms":500}"#))
        .await
        .expect("deployment alone is allowed");
    assert_eq!(live.settings().query_timeout(), Duration::from_millis(500));
}

#[tokio::test]
async fn catalog_mode_refuses_adhoc_ddl() {
    let dir = tempdir().expect("temp");
    let (live, _) = open(dir.path(), LivecatConfig::default(), "{}");
    let admin = live.connect_admin(None, None).expect("admin");
    let err = live.adhoc(admin, CUSTOMER).await.expect_err("catalog mode");
    assert_eq!(err.code, "schema_mode_mismatch");
    assert_eq!(live.catalog_generation(), 0);
}

#[tokio::test]
async fn sysproc_surface_matches_direct_calls() {
    let dir = tempdir().expect("temp");
    let (live, _) = open(dir.path(), LivecatConfig::default(), "{}");
    let admin = live.connect_admin(None, None).expect("admin");

    let response = live
        .call(
            admin,
            "@UpdateApplicationCatalog",
            vec![Value::Bytes(jar_bytes(&format!("{ORDERS}\n{CUSTOMER}"))), Value::Null],
        )
        .await
        .expect("sysproc update");
    assert_eq!(response.generation, 1);

    let tables = live
        .call(admin, "@SystemCatalog", vec![Value::from("tables")])
        .await
        .expect("tables");
    assert_eq!(tables.first_table().expect("table").row_count(), 2);

    let err = live
        .call(admin, "@UpdateApplicationCatalog", vec![Value::Null])
        .await
        .expect_err("arity");
    assert_eq!(err.code, "parameter_error");
}
