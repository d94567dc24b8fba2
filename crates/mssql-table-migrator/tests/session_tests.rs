//! Live-database tests for migration sessions.
//!
//! Run with:
//!   MIGRATOR_TEST_SOURCE="Server=tcp:localhost,1433;Database=TestA;User Id=sa;Password=...;TrustServerCertificate=true" \
//!   MIGRATOR_TEST_DESTINATION="Server=tcp:localhost,1433;Database=TestB;User Id=sa;Password=...;TrustServerCertificate=true" \
//!   cargo test -p mssql-table-migrator --test session_tests -- --ignored --test-threads=1
//!
//! Each test creates its own uniquely named fixture tables and drops them
//! afterwards.

use mssql_table_migrator::connection::{ConnectionRole, MssqlConnection};
use mssql_table_migrator::metadata;
use mssql_table_migrator::{
    ColumnDescriptor, Config, ConnectionConfig, MigrateError, MigrationSession, SessionFactory,
    SessionState, TableRef, Topology,
};

const SOURCE_ENV: &str = "MIGRATOR_TEST_SOURCE";
const DESTINATION_ENV: &str = "MIGRATOR_TEST_DESTINATION";

fn source_config() -> ConnectionConfig {
    let ado = std::env::var(SOURCE_ENV)
        .unwrap_or_else(|_| panic!("{} must be set for live-database tests", SOURCE_ENV));
    ConnectionConfig::from_connection_string(ado)
}

fn destination_config() -> ConnectionConfig {
    let ado = std::env::var(DESTINATION_ENV)
        .unwrap_or_else(|_| panic!("{} must be set for live-database tests", DESTINATION_ENV));
    ConnectionConfig::from_connection_string(ado)
}

fn single_factory() -> SessionFactory {
    SessionFactory::new(Config::single(source_config())).unwrap()
}

fn dual_factory() -> SessionFactory {
    SessionFactory::new(Config::dual(source_config(), destination_config())).unwrap()
}

/// Table name unique to this test run.
fn unique_table(prefix: &str) -> TableRef {
    let stamp = chrono::Utc::now().format("%H%M%S%6f");
    TableRef::dbo(format!("{}_{}", prefix, stamp)).unwrap()
}

async fn raw_connection(config: &ConnectionConfig) -> MssqlConnection {
    MssqlConnection::connect(config, ConnectionRole::Shared)
        .await
        .unwrap()
}

async fn execute(config: &ConnectionConfig, sql: &str) {
    let mut conn = raw_connection(config).await;
    conn.scope(None)
        .unwrap()
        .simple_query(sql)
        .await
        .unwrap()
        .into_results()
        .await
        .unwrap();
    conn.close().await.unwrap();
}

/// Create the fixture: composite clustered primary key, a nonclustered
/// index, a default, and a few rows including nulls.
async fn create_fixture(config: &ConnectionConfig, table: &TableRef) {
    let sql = format!(
        "CREATE TABLE {t} (
            ID int NOT NULL,
            SubId int NOT NULL,
            Code nvarchar(20) NOT NULL DEFAULT ('none'),
            Amount decimal(10, 2) NULL,
            Notes nvarchar(max) NULL,
            CONSTRAINT {pk} PRIMARY KEY CLUSTERED (ID, SubId)
        );
        CREATE NONCLUSTERED INDEX {ix} ON {t} (Code) INCLUDE (Amount);
        INSERT INTO {t} (ID, SubId, Code, Amount, Notes) VALUES
            (1, 1, N'alpha', 10.50, N'first'),
            (1, 2, N'beta', NULL, NULL),
            (2, 1, N'gamma', 99.99, N'third');",
        t = table,
        pk = format!("[PK_fixture_{}]", table.name()),
        ix = format!("[IX_fixture_{}]", table.name()),
    );
    execute(config, &sql).await;
}

/// The fixture without any rows.
async fn create_empty_fixture(config: &ConnectionConfig, table: &TableRef) {
    create_fixture(config, table).await;
    execute(config, &format!("DELETE FROM {};", table)).await;
}

async fn drop_table(config: &ConnectionConfig, table: &TableRef) {
    let sql = format!(
        "IF OBJECT_ID(N'{0}', N'U') IS NOT NULL DROP TABLE {0};",
        table
    );
    execute(config, &sql).await;
}

/// Row count and an order-independent checksum of all rows.
async fn fingerprint(config: &ConnectionConfig, table: &TableRef) -> (i32, Option<i32>) {
    let mut conn = raw_connection(config).await;
    let sql = format!(
        "SELECT COUNT(*), CHECKSUM_AGG(CHECKSUM(ID, SubId, Code, Amount, Notes)) FROM {}",
        table
    );
    let row = conn
        .scope(None)
        .unwrap()
        .simple_query(sql)
        .await
        .unwrap()
        .into_row()
        .await
        .unwrap()
        .unwrap();
    let count: i32 = row.get(0).unwrap();
    let checksum: Option<i32> = row.get(1);
    conn.close().await.unwrap();
    (count, checksum)
}

/// Length in characters of the longest `Notes` value.
async fn longest_note(config: &ConnectionConfig, table: &TableRef) -> i64 {
    let mut conn = raw_connection(config).await;
    let sql = format!("SELECT CAST(MAX(LEN(Notes)) AS bigint) FROM {}", table);
    let row = conn
        .scope(None)
        .unwrap()
        .simple_query(sql)
        .await
        .unwrap()
        .into_row()
        .await
        .unwrap()
        .unwrap();
    let longest: i64 = row.get(0).unwrap();
    conn.close().await.unwrap();
    longest
}

async fn columns(config: &ConnectionConfig, table: &TableRef) -> Vec<ColumnDescriptor> {
    let mut conn = raw_connection(config).await;
    let columns = metadata::read_columns(&mut conn, table, None).await.unwrap();
    conn.close().await.unwrap();
    columns
}

async fn primary_key_name(config: &ConnectionConfig, table: &TableRef) -> (i32, String) {
    let mut conn = raw_connection(config).await;
    let qualified = table.to_string();
    let row = conn
        .scope(None)
        .unwrap()
        .query(
            "SELECT kc.parent_object_id, kc.name FROM sys.key_constraints kc \
             WHERE kc.parent_object_id = OBJECT_ID(@P1) AND kc.type = 'PK'",
            &[&qualified.as_str()],
        )
        .await
        .unwrap()
        .into_row()
        .await
        .unwrap()
        .unwrap();
    let object_id: i32 = row.get(0).unwrap();
    let name: &str = row.get(1).unwrap();
    let name = name.to_string();
    conn.close().await.unwrap();
    (object_id, name)
}

async fn index_count(config: &ConnectionConfig, table: &TableRef) -> i32 {
    let mut conn = raw_connection(config).await;
    let qualified = table.to_string();
    let row = conn
        .scope(None)
        .unwrap()
        .query(
            "SELECT COUNT(*) FROM sys.indexes WHERE object_id = OBJECT_ID(@P1) AND index_id > 0",
            &[&qualified.as_str()],
        )
        .await
        .unwrap()
        .into_row()
        .await
        .unwrap()
        .unwrap();
    let count: i32 = row.get(0).unwrap();
    conn.close().await.unwrap();
    count
}

/// Open, begin, migrate, commit, close.
async fn migrate_committed(
    session: &mut dyn MigrationSession,
    source: &TableRef,
    destination: &TableRef,
) {
    session.open().await.unwrap();
    assert_eq!(session.state(), SessionState::Open);
    assert!(!session.check_table_exists(destination).await.unwrap());

    session.begin_transaction().await.unwrap();
    assert_eq!(session.state(), SessionState::InTransaction);
    assert!(session.migrate_table(source, Some(destination)).await.unwrap());
    session.commit_transaction().await.unwrap();
    assert_eq!(session.state(), SessionState::Open);

    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
#[ignore]
async fn test_single_migrate_commit_copies_rows_and_indexes() {
    let config = source_config();
    let source = unique_table("SrcSingle");
    let destination = unique_table("DstSingle");
    create_fixture(&config, &source).await;

    let mut session = single_factory().single(None).unwrap();
    assert_eq!(session.topology(), Topology::Single);
    migrate_committed(session.as_mut(), &source, &destination).await;

    assert_eq!(
        fingerprint(&config, &destination).await,
        fingerprint(&config, &source).await
    );
    assert_eq!(columns(&config, &destination).await, columns(&config, &source).await);
    assert_eq!(index_count(&config, &destination).await, 2);

    let (object_id, pk_name) = primary_key_name(&config, &destination).await;
    let prefix = format!("PK_{}_", object_id);
    assert!(pk_name.starts_with(&prefix), "unexpected name {}", pk_name);
    let stamp = &pk_name[prefix.len()..];
    assert_eq!(stamp.len(), 14);
    assert!(stamp.chars().all(|c| c.is_ascii_digit()));

    drop_table(&config, &destination).await;
    drop_table(&config, &source).await;
}

#[tokio::test]
#[ignore]
async fn test_single_copy_schema_has_no_rows() {
    let config = source_config();
    let source = unique_table("SrcSchema");
    let destination = unique_table("DstSchema");
    create_fixture(&config, &source).await;

    let mut session = single_factory().single(None).unwrap();
    session.open().await.unwrap();
    session.begin_transaction().await.unwrap();
    assert!(session
        .copy_table_schema(&source, Some(&destination))
        .await
        .unwrap());
    session.commit_transaction().await.unwrap();
    assert!(session.check_table_exists(&destination).await.unwrap());
    session.close().await.unwrap();

    assert_eq!(fingerprint(&config, &destination).await.0, 0);
    assert_eq!(columns(&config, &destination).await, columns(&config, &source).await);
    assert_eq!(index_count(&config, &destination).await, 2);

    drop_table(&config, &destination).await;
    drop_table(&config, &source).await;
}

#[tokio::test]
#[ignore]
async fn test_single_rollback_leaves_no_table() {
    let config = source_config();
    let source = unique_table("SrcRollback");
    let destination = unique_table("DstRollback");
    create_fixture(&config, &source).await;

    let mut session = single_factory().single(None).unwrap();
    session.open().await.unwrap();
    session.begin_transaction().await.unwrap();
    assert!(session.migrate_table(&source, Some(&destination)).await.unwrap());
    assert!(session.check_table_exists(&destination).await.unwrap());
    session.rollback_transaction().await.unwrap();

    assert!(!session.check_table_exists(&destination).await.unwrap());
    session.close().await.unwrap();

    drop_table(&config, &source).await;
}

#[tokio::test]
#[ignore]
async fn test_close_rolls_back_pending_transaction() {
    let config = source_config();
    let source = unique_table("SrcClose");
    let destination = unique_table("DstClose");
    create_fixture(&config, &source).await;

    let mut session = single_factory().single(None).unwrap();
    session.open().await.unwrap();
    session.begin_transaction().await.unwrap();
    session
        .copy_table_schema(&source, Some(&destination))
        .await
        .unwrap();
    session.close().await.unwrap();

    let mut check = single_factory().single(None).unwrap();
    check.open().await.unwrap();
    assert!(!check.check_table_exists(&destination).await.unwrap());
    check.close().await.unwrap();

    drop_table(&config, &source).await;
}

#[tokio::test]
#[ignore]
async fn test_existing_destination_is_duplicate_object() {
    let config = source_config();
    let source = unique_table("SrcDup");
    create_fixture(&config, &source).await;

    let mut session = single_factory().single(None).unwrap();
    session.open().await.unwrap();
    let err = session.copy_table_schema(&source, Some(&source)).await.unwrap_err();
    assert!(matches!(err, MigrateError::DuplicateObject { .. }), "{:?}", err);
    session.close().await.unwrap();

    drop_table(&config, &source).await;
}

#[tokio::test]
#[ignore]
async fn test_missing_source_is_metadata_not_found() {
    let mut session = single_factory().single(None).unwrap();
    session.open().await.unwrap();
    let missing = unique_table("NoSuchTable");
    let err = session.migrate_table(&missing, None).await.unwrap_err();
    assert!(matches!(err, MigrateError::MetadataNotFound(_)), "{:?}", err);
    session.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_begin_twice_is_state_error() {
    let mut session = single_factory().single(None).unwrap();
    session.open().await.unwrap();
    session.begin_transaction().await.unwrap();
    assert!(matches!(
        session.begin_transaction().await,
        Err(MigrateError::State(_))
    ));
    assert!(matches!(session.open().await, Err(MigrateError::State(_))));
    session.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_dual_migrate_commit_copies_rows() {
    let source_cfg = source_config();
    let destination_cfg = destination_config();
    let source = unique_table("SrcDual");
    let destination = unique_table("DstDual");
    create_fixture(&source_cfg, &source).await;

    let mut session = dual_factory().from_defaults().unwrap();
    assert_eq!(session.topology(), Topology::Dual);
    migrate_committed(session.as_mut(), &source, &destination).await;

    assert_eq!(
        fingerprint(&destination_cfg, &destination).await,
        fingerprint(&source_cfg, &source).await
    );
    assert_eq!(
        columns(&destination_cfg, &destination).await,
        columns(&source_cfg, &source).await
    );
    assert_eq!(index_count(&destination_cfg, &destination).await, 2);

    drop_table(&destination_cfg, &destination).await;
    drop_table(&source_cfg, &source).await;
}

#[tokio::test]
#[ignore]
async fn test_dual_rollback_leaves_destination_untouched() {
    let source_cfg = source_config();
    let source = unique_table("SrcDualRb");
    let destination = unique_table("DstDualRb");
    create_fixture(&source_cfg, &source).await;

    let mut session = dual_factory().from_defaults().unwrap();
    session.open().await.unwrap();
    session.begin_transaction().await.unwrap();
    assert!(session.migrate_table(&source, Some(&destination)).await.unwrap());
    session.rollback_transaction().await.unwrap();
    assert!(!session.check_table_exists(&destination).await.unwrap());
    session.close().await.unwrap();

    assert_eq!(fingerprint(&source_cfg, &source).await.0, 3);
    drop_table(&source_cfg, &source).await;
}

#[tokio::test]
#[ignore]
async fn test_dual_exists_checks_destination() {
    let destination_cfg = destination_config();
    let table = unique_table("OnlyDest");
    create_fixture(&destination_cfg, &table).await;

    let mut session = dual_factory().dual(None, None).unwrap();
    session.open().await.unwrap();
    assert!(session.check_table_exists(&table).await.unwrap());
    assert!(!session
        .check_table_exists(&unique_table("Absent"))
        .await
        .unwrap());
    session.close().await.unwrap();

    drop_table(&destination_cfg, &table).await;
}

#[tokio::test]
#[ignore]
async fn test_single_migrate_empty_table() {
    let config = source_config();
    let source = unique_table("SrcEmpty");
    let destination = unique_table("DstEmpty");
    create_empty_fixture(&config, &source).await;

    let mut session = single_factory().single(None).unwrap();
    migrate_committed(session.as_mut(), &source, &destination).await;

    assert_eq!(fingerprint(&config, &destination).await.0, 0);
    assert_eq!(columns(&config, &destination).await, columns(&config, &source).await);

    drop_table(&config, &destination).await;
    drop_table(&config, &source).await;
}

#[tokio::test]
#[ignore]
async fn test_dual_migrate_empty_table() {
    let source_cfg = source_config();
    let destination_cfg = destination_config();
    let source = unique_table("SrcDualEmpty");
    let destination = unique_table("DstDualEmpty");
    create_empty_fixture(&source_cfg, &source).await;

    let mut session = dual_factory().from_defaults().unwrap();
    migrate_committed(session.as_mut(), &source, &destination).await;

    assert_eq!(fingerprint(&destination_cfg, &destination).await.0, 0);
    assert_eq!(
        columns(&destination_cfg, &destination).await,
        columns(&source_cfg, &source).await
    );

    drop_table(&destination_cfg, &destination).await;
    drop_table(&source_cfg, &source).await;
}

#[tokio::test]
#[ignore]
async fn test_dual_migrate_copies_oversized_strings() {
    let source_cfg = source_config();
    let destination_cfg = destination_config();
    let source = unique_table("SrcDualWide");
    let destination = unique_table("DstDualWide");
    create_fixture(&source_cfg, &source).await;
    execute(
        &source_cfg,
        &format!(
            "INSERT INTO {} (ID, SubId, Code, Amount, Notes) VALUES \
             (3, 1, N'wide', 1.00, REPLICATE(CAST(N'x' AS nvarchar(max)), 40000)), \
             (3, 2, N'wide', 2.00, REPLICATE(CAST(N'y' AS nvarchar(max)), 50000));",
            source
        ),
    )
    .await;

    let mut session = dual_factory().from_defaults().unwrap();
    migrate_committed(session.as_mut(), &source, &destination).await;

    assert_eq!(
        fingerprint(&destination_cfg, &destination).await,
        fingerprint(&source_cfg, &source).await
    );
    assert_eq!(fingerprint(&destination_cfg, &destination).await.0, 5);
    assert_eq!(longest_note(&destination_cfg, &destination).await, 50_000);

    drop_table(&destination_cfg, &destination).await;
    drop_table(&source_cfg, &source).await;
}

#[tokio::test]
#[ignore]
async fn test_dual_rollback_discards_oversized_rows() {
    let source_cfg = source_config();
    let source = unique_table("SrcDualWideRb");
    let destination = unique_table("DstDualWideRb");
    create_empty_fixture(&source_cfg, &source).await;
    execute(
        &source_cfg,
        &format!(
            "INSERT INTO {} (ID, SubId, Code, Notes) VALUES \
             (1, 1, N'wide', REPLICATE(CAST(N'z' AS nvarchar(max)), 40000));",
            source
        ),
    )
    .await;

    let mut session = dual_factory().from_defaults().unwrap();
    session.open().await.unwrap();
    session.begin_transaction().await.unwrap();
    assert!(session.migrate_table(&source, Some(&destination)).await.unwrap());
    session.rollback_transaction().await.unwrap();
    assert!(!session.check_table_exists(&destination).await.unwrap());
    session.close().await.unwrap();

    drop_table(&source_cfg, &source).await;
}
