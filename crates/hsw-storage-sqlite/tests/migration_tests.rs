//! Schema migration tests

use hsw_storage_sqlite::migrations::{self, SCHEMA_VERSION};
use rusqlite::Connection;
use tempfile::NamedTempFile;

const TABLES: &[&str] = &[
    "accounts",
    "addresses",
    "coins",
    "transactions",
    "block_checkpoints",
    "names",
    "name_history",
    "blinds",
];

fn table_exists(conn: &Connection, name: &str) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get::<_, i64>(0),
    )
    .unwrap()
        == 1
}

#[test]
fn test_fresh_migration() {
    let file = NamedTempFile::new().unwrap();
    let conn = Connection::open(file.path()).unwrap();

    migrations::run_migrations(&conn).unwrap();

    for table in TABLES {
        assert!(table_exists(&conn, table), "missing table {}", table);
    }
}

#[test]
fn test_migration_idempotency() {
    let file = NamedTempFile::new().unwrap();
    let conn = Connection::open(file.path()).unwrap();

    migrations::run_migrations(&conn).unwrap();
    migrations::run_migrations(&conn).unwrap();

    assert_eq!(migrations::get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
}

#[test]
fn test_schema_version_tracking() {
    let conn = Connection::open_in_memory().unwrap();
    assert_eq!(migrations::get_schema_version(&conn).unwrap(), 0);

    migrations::run_migrations(&conn).unwrap();
    assert_eq!(migrations::get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
}

#[test]
fn test_newer_schema_is_rejected() {
    let conn = Connection::open_in_memory().unwrap();
    migrations::run_migrations(&conn).unwrap();
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION + 1],
    )
    .unwrap();

    assert!(migrations::run_migrations(&conn).is_err());
}

#[test]
fn test_coin_requires_account() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    migrations::run_migrations(&conn).unwrap();

    let result = conn.execute(
        "INSERT INTO coins (account_id, tx_hash, out_index, value, address, branch, idx, \
         covenant_type, covenant, coinbase, height) \
         VALUES (99, x'00', 0, 1, 'a', 0, 0, 0, x'00', 0, 1)",
        [],
    );
    assert!(result.is_err());
}
