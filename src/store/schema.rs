//! Schema definition and additive migration. Columns are added with
//! `ALTER TABLE ... ADD COLUMN` rather than dropped or renamed so an older
//! catalogue file keeps opening after an upgrade.

use sqlx::{Row, SqlitePool};
use tracing::{error, info};

/// `(column name, SQL type + default clause)` pairs for the `cids` table, in
/// the order new columns were introduced.
const CIDS_COLUMNS: &[(&str, &str)] = &[
    ("cid", "TEXT PRIMARY KEY"),
    ("present", "INTEGER NOT NULL DEFAULT 1"),
    ("present_source", "TEXT NOT NULL DEFAULT 'pin_root'"),
    ("present_reason", "TEXT"),
    ("first_seen_at", "INTEGER NOT NULL DEFAULT 0"),
    ("last_seen_at", "INTEGER NOT NULL DEFAULT 0"),
    ("removed_at", "INTEGER"),
    ("size_bytes", "INTEGER"),
    ("mime", "TEXT"),
    ("ext_guess", "TEXT"),
    ("kind", "TEXT"),
    ("confidence", "REAL"),
    ("source", "TEXT"),
    ("signals_json", "TEXT"),
    ("tags_json", "TEXT"),
    ("detector_version", "TEXT"),
    ("indexed_at", "INTEGER"),
    ("error", "TEXT"),
    ("updated_at", "INTEGER"),
    ("is_directory", "INTEGER NOT NULL DEFAULT 0"),
    ("expanded_at", "INTEGER"),
    ("expand_error", "TEXT"),
    ("expand_depth", "INTEGER NOT NULL DEFAULT 0"),
    ("site_entry_path", "TEXT"),
    ("site_entry_cid", "TEXT"),
    ("site_entry_indexed_at", "INTEGER"),
    ("crawl_attempts", "INTEGER NOT NULL DEFAULT 0"),
];

const CREATE_CIDS: &str = "CREATE TABLE IF NOT EXISTS cids (cid TEXT PRIMARY KEY)";

const CREATE_EDGES: &str = "
CREATE TABLE IF NOT EXISTS cid_edges (
    parent_cid TEXT NOT NULL,
    child_cid TEXT NOT NULL,
    first_seen_at INTEGER NOT NULL,
    last_seen_at INTEGER NOT NULL,
    PRIMARY KEY (parent_cid, child_cid)
)";

const CREATE_PATHS: &str = "
CREATE TABLE IF NOT EXISTS cid_paths (
    root_cid TEXT NOT NULL,
    path TEXT NOT NULL,
    leaf_cid TEXT NOT NULL,
    depth INTEGER NOT NULL,
    mime_hint TEXT,
    PRIMARY KEY (root_cid, path)
)";

const CREATE_TOKENS: &str = "
CREATE TABLE IF NOT EXISTS cid_tokens (
    token TEXT NOT NULL,
    cid TEXT NOT NULL,
    count INTEGER NOT NULL,
    PRIMARY KEY (token, cid)
)";

const CREATE_METRICS: &str = "
CREATE TABLE IF NOT EXISTS metrics (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    pins_current INTEGER NOT NULL DEFAULT 0,
    last_pin_sync_ms INTEGER,
    last_pin_sync_duration_ms INTEGER,
    last_pin_sync_success INTEGER,
    types_indexed_total INTEGER NOT NULL DEFAULT 0,
    dirs_expanded_total INTEGER NOT NULL DEFAULT 0,
    dir_expand_errors_total INTEGER NOT NULL DEFAULT 0,
    range_ignored_total INTEGER NOT NULL DEFAULT 0,
    last_type_crawl_ms INTEGER,
    last_dir_expand_ms INTEGER
)";

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_cids_present ON cids(present)",
    "CREATE INDEX IF NOT EXISTS idx_cids_detector_version ON cids(present, detector_version)",
    "CREATE INDEX IF NOT EXISTS idx_cid_edges_child ON cid_edges(child_cid)",
    "CREATE INDEX IF NOT EXISTS idx_cid_paths_leaf ON cid_paths(leaf_cid)",
    "CREATE INDEX IF NOT EXISTS idx_cid_tokens_token ON cid_tokens(token)",
];

async fn existing_columns(pool: &SqlitePool, table: &str) -> anyhow::Result<Vec<String>> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|row| row.get::<String, _>("name")).collect())
}

async fn add_missing_columns(
    pool: &SqlitePool,
    table: &str,
    desired: &[(&str, &str)],
) -> anyhow::Result<usize> {
    let existing = existing_columns(pool, table).await?;
    let mut added = 0;
    for (name, def) in desired {
        if !existing.iter().any(|c| c == name) {
            let sql = format!("ALTER TABLE {table} ADD COLUMN {name} {def}");
            if let Err(e) = sqlx::query(&sql).execute(pool).await {
                error!("migration: failed to add column {table}.{name}: {e}");
            } else {
                added += 1;
            }
        }
    }
    Ok(added)
}

async fn repair_presence_invariant(pool: &SqlitePool, now_ms: i64) -> anyhow::Result<u64> {
    let result = sqlx::query(
        "UPDATE cids SET removed_at = ?1 WHERE present = 0 AND removed_at IS NULL",
    )
    .bind(now_ms)
    .execute(pool)
    .await?;
    let fixed_a = result.rows_affected();

    let result = sqlx::query(
        "UPDATE cids SET removed_at = NULL WHERE present = 1 AND removed_at IS NOT NULL",
    )
    .execute(pool)
    .await?;

    Ok(fixed_a + result.rows_affected())
}

async fn prune_invalid_tokens(pool: &SqlitePool) -> anyhow::Result<u64> {
    let result = sqlx::query(
        "DELETE FROM cid_tokens WHERE length(token) < 3 OR count <= 0 OR count > 1000",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Run on startup: create the table set if absent, additively migrate the
/// `cids` table, ensure the metrics singleton exists, and repair any
/// invariant violations left by a prior, less careful version of the schema.
/// Migration failures are logged but not fatal — only the initial
/// file-open is.
pub async fn migrate(pool: &SqlitePool, now_ms: i64) -> anyhow::Result<()> {
    sqlx::query(CREATE_CIDS).execute(pool).await?;
    sqlx::query(CREATE_EDGES).execute(pool).await?;
    sqlx::query(CREATE_PATHS).execute(pool).await?;
    sqlx::query(CREATE_TOKENS).execute(pool).await?;
    sqlx::query(CREATE_METRICS).execute(pool).await?;

    match add_missing_columns(pool, "cids", CIDS_COLUMNS).await {
        Ok(0) => {}
        Ok(n) => info!("migration: added {n} column(s) to cids"),
        Err(e) => error!("migration: cids column check failed: {e}"),
    }

    for index_sql in CREATE_INDEXES {
        if let Err(e) = sqlx::query(index_sql).execute(pool).await {
            error!("migration: failed to create index: {e}");
        }
    }

    if let Err(e) = sqlx::query("INSERT OR IGNORE INTO metrics (id) VALUES (1)")
        .execute(pool)
        .await
    {
        error!("migration: failed to seed metrics singleton: {e}");
    }

    match repair_presence_invariant(pool, now_ms).await {
        Ok(0) => {}
        Ok(n) => info!("migration: repaired {n} presence/removed_at violation(s)"),
        Err(e) => error!("migration: presence invariant repair failed: {e}"),
    }

    match prune_invalid_tokens(pool).await {
        Ok(0) => {}
        Ok(n) => info!("migration: pruned {n} invalid token row(s)"),
        Err(e) => error!("migration: token pruning failed: {e}"),
    }

    Ok(())
}
