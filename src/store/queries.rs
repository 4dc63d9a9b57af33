//! SQL query functions, generic over `sqlx::Executor` so the same function
//! runs against the write pool directly or against an in-flight
//! transaction, whichever the caller currently holds.

use crate::contracts::{Edge, PathEntry, SearchFilters, SearchHit, SearchPage};
use crate::store::row::{CidRow, KindCountRow, MetricsRow, CID_ROW_COLUMNS};
use sqlx::{Executor, Sqlite, SqlitePool};

pub async fn upsert_pinned<'e, E>(executor: E, cid: &str, now_ms: i64) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO cids (cid, present, present_source, first_seen_at, last_seen_at, expand_depth, removed_at)
         VALUES (?1, 1, 'pin_root', ?2, ?2, 0, NULL)
         ON CONFLICT(cid) DO UPDATE SET
            present = 1,
            present_source = 'pin_root',
            last_seen_at = ?2,
            removed_at = NULL",
    )
    .bind(cid)
    .bind(now_ms)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn mark_missing_pins<'e, E>(
    executor: E,
    seen_cids: &[String],
    now_ms: i64,
) -> anyhow::Result<Vec<String>>
where
    E: Executor<'e, Database = Sqlite>,
{
    // SQLite has a 999-parameter default limit; the pin set is expected to
    // be small enough per process that this single query is fine.
    let placeholders = seen_cids
        .iter()
        .enumerate()
        .map(|(i, _)| format!("?{}", i + 2))
        .collect::<Vec<_>>()
        .join(",");

    let sql = if seen_cids.is_empty() {
        "SELECT cid FROM cids WHERE present = 1 AND present_source = 'pin_root'".to_string()
    } else {
        format!(
            "SELECT cid FROM cids WHERE present = 1 AND present_source = 'pin_root' AND cid NOT IN ({placeholders})"
        )
    };

    let mut query = sqlx::query_scalar::<_, String>(&sql);
    for cid in seen_cids {
        query = query.bind(cid);
    }
    let missing: Vec<String> = query.fetch_all(executor).await?;
    Ok(missing)
}

pub async fn mark_removed<'e, E>(
    executor: E,
    cid: &str,
    present_reason: &str,
    now_ms: i64,
) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE cids SET present = 0, removed_at = ?2, present_reason = ?3 WHERE cid = ?1",
    )
    .bind(cid)
    .bind(now_ms)
    .bind(present_reason)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn get<'e, E>(executor: E, cid: &str) -> anyhow::Result<Option<CidRow>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {CID_ROW_COLUMNS} FROM cids WHERE cid = ?1");
    let row = sqlx::query_as::<_, CidRow>(&sql)
        .bind(cid)
        .fetch_optional(executor)
        .await?;
    Ok(row)
}

#[allow(clippy::too_many_arguments)]
pub async fn record_crawl_result<'e, E>(
    executor: E,
    cid: &str,
    kind: &str,
    ext_guess: Option<&str>,
    confidence: f64,
    source: &str,
    size: Option<i64>,
    mime: Option<&str>,
    signals_json: &str,
    tags_json: &str,
    detector_version: &str,
    now_ms: i64,
) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE cids SET
            kind = ?2,
            ext_guess = ?3,
            confidence = ?4,
            source = ?5,
            size_bytes = ?6,
            mime = ?7,
            signals_json = ?8,
            tags_json = ?9,
            detector_version = ?10,
            indexed_at = ?11,
            updated_at = ?11,
            error = NULL,
            crawl_attempts = crawl_attempts + 1
         WHERE cid = ?1",
    )
    .bind(cid)
    .bind(kind)
    .bind(ext_guess)
    .bind(confidence)
    .bind(source)
    .bind(size)
    .bind(mime)
    .bind(signals_json)
    .bind(tags_json)
    .bind(detector_version)
    .bind(now_ms)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn record_crawl_error<'e, E>(
    executor: E,
    cid: &str,
    error: &str,
    detector_version: &str,
    now_ms: i64,
) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE cids SET error = ?2, detector_version = ?3, updated_at = ?4, crawl_attempts = crawl_attempts + 1
         WHERE cid = ?1",
    )
    .bind(cid)
    .bind(error)
    .bind(detector_version)
    .bind(now_ms)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn next_crawl_candidates<'e, E>(
    executor: E,
    detector_version: &str,
    limit: i64,
) -> anyhow::Result<Vec<CidRow>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {CID_ROW_COLUMNS}
         FROM cids
         WHERE present = 1
           AND (detector_version IS NOT DISTINCT FROM NULL OR detector_version != ?1
                OR mime IS NULL OR error IS NOT NULL)
           AND NOT (is_directory = 1 AND (kind IS NULL OR kind IN ('unknown','ipld','dag')))
         ORDER BY last_seen_at DESC
         LIMIT ?2"
    );
    let rows = sqlx::query_as::<_, CidRow>(&sql)
    .bind(detector_version)
    .bind(limit)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

pub async fn next_expand_candidates<'e, E>(
    executor: E,
    max_depth: i64,
    ttl_s: i64,
    now_ms: i64,
    batch: i64,
) -> anyhow::Result<Vec<CidRow>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let ttl_ms = ttl_s * 1000;
    let sql = format!(
        "SELECT {CID_ROW_COLUMNS}
         FROM cids
         WHERE present = 1
           AND expand_depth < ?1
           AND (expanded_at IS NULL
                OR expanded_at < ?2 - ?3
                OR expand_error IS NOT NULL
                OR (is_directory = 0 AND present_source = 'pin_root'))
         ORDER BY last_seen_at DESC
         LIMIT ?4"
    );
    let rows = sqlx::query_as::<_, CidRow>(&sql)
    .bind(max_depth)
    .bind(now_ms)
    .bind(ttl_ms)
    .bind(batch)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

pub async fn mark_directory<'e, E>(
    executor: E,
    cid: &str,
    is_directory: bool,
    expand_error: Option<&str>,
    now_ms: i64,
) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE cids SET is_directory = ?2, expanded_at = ?3, expand_error = ?4 WHERE cid = ?1",
    )
    .bind(cid)
    .bind(is_directory as i64)
    .bind(now_ms)
    .bind(expand_error)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn upsert_child<'e, E>(
    executor: E,
    cid: &str,
    expand_depth: i64,
    now_ms: i64,
) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO cids (cid, present, present_source, first_seen_at, last_seen_at, expand_depth)
         VALUES (?1, 1, 'expanded', ?3, ?3, ?2)
         ON CONFLICT(cid) DO UPDATE SET
            present = 1,
            present_source = CASE WHEN cids.present_source = 'pin_root' THEN 'pin_root' ELSE 'expanded' END,
            last_seen_at = ?3,
            expand_depth = MIN(cids.expand_depth, ?2),
            removed_at = NULL",
    )
    .bind(cid)
    .bind(expand_depth)
    .bind(now_ms)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn upsert_edge<'e, E>(
    executor: E,
    parent: &str,
    child: &str,
    now_ms: i64,
) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO cid_edges (parent_cid, child_cid, first_seen_at, last_seen_at)
         VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT(parent_cid, child_cid) DO UPDATE SET
            first_seen_at = MIN(first_seen_at, ?3),
            last_seen_at = MAX(last_seen_at, ?3)",
    )
    .bind(parent)
    .bind(child)
    .bind(now_ms)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn edges_for_parent<'e, E>(executor: E, parent: &str) -> anyhow::Result<Vec<String>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let children = sqlx::query_scalar::<_, String>(
        "SELECT child_cid FROM cid_edges WHERE parent_cid = ?1",
    )
    .bind(parent)
    .fetch_all(executor)
    .await?;
    Ok(children)
}

pub async fn delete_edge<'e, E>(executor: E, parent: &str, child: &str) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM cid_edges WHERE parent_cid = ?1 AND child_cid = ?2")
        .bind(parent)
        .bind(child)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn edge_count_for_child<'e, E>(executor: E, child: &str) -> anyhow::Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cid_edges WHERE child_cid = ?1")
        .bind(child)
        .fetch_one(executor)
        .await?;
    Ok(count)
}

pub async fn present_source_of<'e, E>(executor: E, cid: &str) -> anyhow::Result<Option<String>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let source =
        sqlx::query_scalar::<_, Option<String>>("SELECT present_source FROM cids WHERE cid = ?1")
            .bind(cid)
            .fetch_optional(executor)
            .await?
            .flatten();
    Ok(source)
}

pub async fn replace_path_index(
    conn: &mut sqlx::SqliteConnection,
    root: &str,
    entries: &[PathEntry],
) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM cid_paths WHERE root_cid = ?1")
        .bind(root)
        .execute(&mut *conn)
        .await?;

    for entry in entries {
        let depth = entry.path.matches('/').count() as i64;
        sqlx::query(
            "INSERT INTO cid_paths (root_cid, path, leaf_cid, depth, mime_hint) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(root_cid, path) DO UPDATE SET leaf_cid = excluded.leaf_cid, mime_hint = excluded.mime_hint",
        )
        .bind(root)
        .bind(&entry.path)
        .bind(&entry.child_cid)
        .bind(depth)
        .bind(&entry.mime_hint)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn set_site_entry<'e, E>(
    executor: E,
    root: &str,
    path: &str,
    cid: &str,
    now_ms: i64,
) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE cids SET site_entry_path = ?2, site_entry_cid = ?3, site_entry_indexed_at = ?4 WHERE cid = ?1",
    )
    .bind(root)
    .bind(path)
    .bind(cid)
    .bind(now_ms)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn replace_token_index(
    conn: &mut sqlx::SqliteConnection,
    cid: &str,
    tokens: &[(String, u32)],
) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM cid_tokens WHERE cid = ?1")
        .bind(cid)
        .execute(&mut *conn)
        .await?;

    for (token, count) in tokens {
        sqlx::query("INSERT INTO cid_tokens (token, cid, count) VALUES (?1, ?2, ?3)")
            .bind(token)
            .bind(cid)
            .bind(*count as i64)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// A filter value bound positionally into the dynamic WHERE clause built by
/// [`search`]. Kept as an enum (rather than relying on sqlx's `Encode` for a
/// boxed trait object) since the filter set is small and fixed.
enum Bind<'a> {
    Str(&'a str),
    Bool(bool),
}

fn push_filter_clauses<'a>(filters: &'a SearchFilters, clauses: &mut Vec<&'static str>, binds: &mut Vec<Bind<'a>>) {
    if let Some(kind) = filters.kind.as_deref() {
        clauses.push("c.kind = ?");
        binds.push(Bind::Str(kind));
    }
    if let Some(mime) = filters.mime.as_deref() {
        clauses.push("c.mime = ?");
        binds.push(Bind::Str(mime));
    }
    let present = filters.present.unwrap_or(true);
    clauses.push("c.present = ?");
    binds.push(Bind::Bool(present));
    if let Some(source) = filters.source.as_deref() {
        clauses.push("c.source = ?");
        binds.push(Bind::Str(source));
    }
    if let Some(present_source) = filters.present_source.as_deref() {
        clauses.push("c.present_source = ?");
        binds.push(Bind::Str(present_source));
    }
    if let Some(is_directory) = filters.is_directory {
        clauses.push("c.is_directory = ?");
        binds.push(Bind::Bool(is_directory));
    }
}

const PATH_JOIN: &str = "LEFT JOIN (
        SELECT leaf_cid, root_cid, path, mime_hint,
               ROW_NUMBER() OVER (PARTITION BY leaf_cid ORDER BY path ASC) AS rn
        FROM cid_paths
    ) p ON p.leaf_cid = c.cid AND p.rn = 1";

pub async fn search(
    pool: &SqlitePool,
    tokens: &[String],
    filters: &SearchFilters,
    limit: i64,
    offset: i64,
) -> anyhow::Result<SearchPage> {
    let mut clauses: Vec<&'static str> = Vec::new();
    let mut binds: Vec<Bind> = Vec::new();
    push_filter_clauses(filters, &mut clauses, &mut binds);
    let where_extra = if clauses.is_empty() {
        String::new()
    } else {
        format!(" AND {}", clauses.join(" AND "))
    };

    #[derive(sqlx::FromRow)]
    struct Hit {
        cid: String,
        mime: Option<String>,
        content_class: Option<String>,
        score: f64,
        matched: Option<String>,
        root_cid: Option<String>,
        path: Option<String>,
        path_mime_hint: Option<String>,
    }

    let (items_sql, count_sql) = if tokens.is_empty() {
        (
            format!(
                "SELECT c.cid AS cid, c.mime AS mime,
                        json_extract(c.tags_json, '$.content_class') AS content_class,
                        0.0 AS score, NULL AS matched,
                        p.root_cid AS root_cid, p.path AS path, p.mime_hint AS path_mime_hint
                 FROM cids c
                 {PATH_JOIN}
                 WHERE 1 = 1{where_extra}
                 ORDER BY c.last_seen_at DESC
                 LIMIT ? OFFSET ?"
            ),
            format!("SELECT COUNT(DISTINCT c.cid) FROM cids c WHERE 1 = 1{where_extra}"),
        )
    } else {
        let placeholders = tokens.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        (
            format!(
                "SELECT c.cid AS cid, c.mime AS mime,
                        json_extract(c.tags_json, '$.content_class') AS content_class,
                        SUM(t.count) AS score, GROUP_CONCAT(DISTINCT t.token) AS matched,
                        p.root_cid AS root_cid, p.path AS path, p.mime_hint AS path_mime_hint
                 FROM cid_tokens t
                 JOIN cids c ON c.cid = t.cid
                 {PATH_JOIN}
                 WHERE t.token IN ({placeholders})
                   AND (c.mime IS NULL OR c.mime != 'application/octet-stream'){where_extra}
                 GROUP BY c.cid
                 ORDER BY score DESC, c.last_seen_at DESC
                 LIMIT ? OFFSET ?"
            ),
            format!(
                "SELECT COUNT(DISTINCT c.cid) FROM cid_tokens t
                 JOIN cids c ON c.cid = t.cid
                 WHERE t.token IN ({placeholders})
                   AND (c.mime IS NULL OR c.mime != 'application/octet-stream'){where_extra}"
            ),
        )
    };

    let mut query = sqlx::query_as::<_, Hit>(&items_sql);
    for token in tokens {
        query = query.bind(token);
    }
    for bind in &binds {
        query = match bind {
            Bind::Str(s) => query.bind(*s),
            Bind::Bool(b) => query.bind(*b),
        };
    }
    query = query.bind(limit).bind(offset);
    let rows = query.fetch_all(pool).await?;

    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for token in tokens {
        count_query = count_query.bind(token);
    }
    for bind in &binds {
        count_query = match bind {
            Bind::Str(s) => count_query.bind(*s),
            Bind::Bool(b) => count_query.bind(*b),
        };
    }
    let total = count_query.fetch_one(pool).await?;

    let items = rows
        .into_iter()
        .map(|row| SearchHit {
            cid: row.cid,
            mime: row.mime,
            content_class: row.content_class,
            matched_tokens: row
                .matched
                .map(|s| s.split(',').map(|t| t.to_string()).collect())
                .unwrap_or_default(),
            score: row.score,
            root_cid: row.root_cid,
            path: row.path,
            path_mime_hint: row.path_mime_hint,
        })
        .collect();

    Ok(SearchPage { items, total })
}

pub async fn children<'e, E>(executor: E, cid: &str) -> anyhow::Result<Vec<Edge>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, (String, String, i64, i64)>(
        "SELECT parent_cid, child_cid, first_seen_at, last_seen_at FROM cid_edges WHERE parent_cid = ?1 LIMIT 200",
    )
    .bind(cid)
    .fetch_all(executor)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(parent_cid, child_cid, first_seen_ms, last_seen_ms)| Edge {
            parent_cid,
            child_cid,
            first_seen_ms,
            last_seen_ms,
        })
        .collect())
}

pub async fn parents<'e, E>(executor: E, cid: &str) -> anyhow::Result<Vec<Edge>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, (String, String, i64, i64)>(
        "SELECT parent_cid, child_cid, first_seen_at, last_seen_at FROM cid_edges WHERE child_cid = ?1 LIMIT 50",
    )
    .bind(cid)
    .fetch_all(executor)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(parent_cid, child_cid, first_seen_ms, last_seen_ms)| Edge {
            parent_cid,
            child_cid,
            first_seen_ms,
            last_seen_ms,
        })
        .collect())
}

pub async fn tag_matches<'e, E>(executor: E, tag: &str) -> anyhow::Result<Vec<String>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_scalar::<_, String>(
        "SELECT cid FROM cids WHERE present = 1 AND tags_json LIKE '%' || ?1 || '%' LIMIT 500",
    )
    .bind(tag)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

pub async fn cids_total<'e, E>(executor: E) -> anyhow::Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cids WHERE present = 1")
        .fetch_one(executor)
        .await?;
    Ok(total)
}

pub async fn cids_by_kind<'e, E>(executor: E) -> anyhow::Result<Vec<KindCountRow>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, KindCountRow>(
        "SELECT kind, COUNT(*) AS n FROM cids WHERE present = 1 GROUP BY kind",
    )
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

pub async fn metrics_row<'e, E>(executor: E) -> anyhow::Result<MetricsRow>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, MetricsRow>(
        "SELECT last_pin_sync_ms, last_type_crawl_ms, last_dir_expand_ms FROM metrics WHERE id = 1",
    )
    .fetch_one(executor)
    .await?;
    Ok(row)
}

pub async fn record_pin_sync<'e, E>(executor: E, now_ms: i64, pins_current: i64, success: bool) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE metrics SET last_pin_sync_ms = ?1, pins_current = ?2, last_pin_sync_success = ?3 WHERE id = 1",
    )
    .bind(now_ms)
    .bind(pins_current)
    .bind(success as i64)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn record_type_crawl<'e, E>(executor: E, now_ms: i64, indexed: i64) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE metrics SET last_type_crawl_ms = ?1, types_indexed_total = types_indexed_total + ?2 WHERE id = 1",
    )
    .bind(now_ms)
    .bind(indexed)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn record_dir_expand<'e, E>(
    executor: E,
    now_ms: i64,
    expanded: i64,
    errors: i64,
) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE metrics SET last_dir_expand_ms = ?1, dirs_expanded_total = dirs_expanded_total + ?2,
            dir_expand_errors_total = dir_expand_errors_total + ?3 WHERE id = 1",
    )
    .bind(now_ms)
    .bind(expanded)
    .bind(errors)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn increment_range_ignored<'e, E>(executor: E) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE metrics SET range_ignored_total = range_ignored_total + 1 WHERE id = 1")
        .execute(executor)
        .await?;
    Ok(())
}
