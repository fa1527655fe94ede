//! Database schema migrations

use crate::{Error, Result};
use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 4;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    tracing::debug!(
        "Running migrations: current_version={}, target_version={}",
        current_version,
        SCHEMA_VERSION
    );

    if current_version > SCHEMA_VERSION {
        return Err(Error::Migration(format!(
            "database schema {} is newer than supported {}",
            current_version, SCHEMA_VERSION
        )));
    }

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
    }

    if current_version < 3 {
        migrate_v3(conn)?;
    }

    if current_version < 4 {
        migrate_v4(conn)?;
    }

    if current_version != SCHEMA_VERSION {
        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

/// Schema version recorded in the database, 0 when fresh
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    let result = conn.query_row(
        "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
        [],
        |row| row.get(0),
    );

    match result {
        Ok(v) => Ok(v),
        Err(_) => Ok(0),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        [],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    tracing::info!("Schema version set to {}", version);
    Ok(())
}

/// Accounts, addresses, coins, transactions and the checkpoint window
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE accounts (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            network TEXT NOT NULL,
            account_index INTEGER NOT NULL,
            xpub TEXT NOT NULL,
            sealed_seed BLOB,
            receive_depth INTEGER NOT NULL DEFAULT 0,
            change_depth INTEGER NOT NULL DEFAULT 0,
            receive_tip INTEGER NOT NULL DEFAULT 0,
            change_tip INTEGER NOT NULL DEFAULT 0,
            lookahead INTEGER NOT NULL,
            rescan_height INTEGER NOT NULL DEFAULT 0,
            address_bloom BLOB,
            outpoint_bloom BLOB,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE addresses (
            account_id INTEGER NOT NULL,
            branch INTEGER NOT NULL,
            idx INTEGER NOT NULL,
            address TEXT NOT NULL,
            PRIMARY KEY (account_id, branch, idx),
            UNIQUE (account_id, address),
            FOREIGN KEY (account_id) REFERENCES accounts(id)
        );

        CREATE TABLE coins (
            account_id INTEGER NOT NULL,
            tx_hash BLOB NOT NULL,
            out_index INTEGER NOT NULL,
            value INTEGER NOT NULL,
            address TEXT NOT NULL,
            branch INTEGER NOT NULL,
            idx INTEGER NOT NULL,
            covenant_type INTEGER NOT NULL,
            covenant BLOB NOT NULL,
            name_hash BLOB,
            coinbase INTEGER NOT NULL DEFAULT 0,
            height INTEGER NOT NULL,
            spent_by BLOB,
            PRIMARY KEY (account_id, tx_hash, out_index),
            FOREIGN KEY (account_id) REFERENCES accounts(id)
        );

        CREATE TABLE transactions (
            account_id INTEGER NOT NULL,
            hash BLOB NOT NULL,
            raw BLOB NOT NULL,
            height INTEGER NOT NULL,
            block_hash BLOB,
            fee INTEGER,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (account_id, hash),
            FOREIGN KEY (account_id) REFERENCES accounts(id)
        );

        CREATE TABLE block_checkpoints (
            height INTEGER PRIMARY KEY,
            hash BLOB NOT NULL
        );

        CREATE INDEX idx_coins_height ON coins(account_id, height);
        CREATE INDEX idx_transactions_height ON transactions(account_id, height);
        "#,
    )
    .map_err(|e| Error::Migration(e.to_string()))?;

    Ok(())
}

/// Name tracking: per-name status, append-only history and bid blinds
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE names (
            account_id INTEGER NOT NULL,
            name_hash BLOB NOT NULL,
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'UNOWNED',
            updated_height INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (account_id, name_hash),
            FOREIGN KEY (account_id) REFERENCES accounts(id)
        );

        CREATE TABLE name_history (
            account_id INTEGER NOT NULL,
            name_hash BLOB NOT NULL,
            name TEXT NOT NULL,
            action TEXT NOT NULL,
            tx_hash BLOB NOT NULL,
            out_index INTEGER NOT NULL,
            value INTEGER NOT NULL,
            height INTEGER NOT NULL,
            parent_hash BLOB,
            parent_index INTEGER,
            PRIMARY KEY (account_id, tx_hash, out_index),
            FOREIGN KEY (account_id) REFERENCES accounts(id)
        );

        CREATE TABLE blinds (
            account_id INTEGER NOT NULL,
            blind BLOB NOT NULL,
            value INTEGER NOT NULL,
            nonce BLOB NOT NULL,
            PRIMARY KEY (account_id, blind),
            FOREIGN KEY (account_id) REFERENCES accounts(id)
        );

        CREATE INDEX idx_name_history_name ON name_history(account_id, name_hash);
        "#,
    )
    .map_err(|e| Error::Migration(e.to_string()))?;

    Ok(())
}

/// Lookup indexes for spend tracking and parent links
fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_coins_spent_by ON coins(account_id, spent_by);
        CREATE INDEX IF NOT EXISTS idx_coins_name ON coins(account_id, name_hash);
        CREATE INDEX IF NOT EXISTS idx_name_history_parent
            ON name_history(account_id, parent_hash, parent_index);
        "#,
    )
    .map_err(|e| Error::Migration(e.to_string()))?;

    Ok(())
}

/// Rollback target recorded with a reorged checkpoint window, cleared once
/// the account has rolled back
fn migrate_v4(conn: &Connection) -> Result<()> {
    conn.execute_batch("ALTER TABLE accounts ADD COLUMN pending_rollback INTEGER;")
        .map_err(|e| Error::Migration(e.to_string()))?;

    Ok(())
}
