use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, ErrorCode, params};
use serde_json::Value;
use tracing::{debug, info};

use crate::constants::sqlite::{BUSY_TIMEOUT_MS, IMPORT_CHUNK_ROWS};
use crate::data::{Document, LinkRef, parse_timestamp};
use crate::errors::AuditError;
use crate::store::{DocumentStore, ScanRequest};
use crate::types::DocumentKey;

/// Document store backed by a SQLite database.
///
/// Every collection is a table `(key TEXT PRIMARY KEY, doc TEXT NOT NULL)`
/// holding one JSON document per row. Keys compare bytewise, which matches
/// `String` ordering, so the scan cursor is portable between backends.
pub struct SqliteStore {
    connection: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteStore {
    /// Open (or create) a database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let connection = Connection::open(path).map_err(|err| map_sql_error("<database>", err))?;
        let store = Self {
            connection: Mutex::new(connection),
            path: Some(path.to_path_buf()),
        };
        store.apply_pragmas()?;
        info!("[crossref:sqlite] opened {}", path.display());
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, AuditError> {
        let connection =
            Connection::open_in_memory().map_err(|err| map_sql_error("<database>", err))?;
        let store = Self {
            connection: Mutex::new(connection),
            path: None,
        };
        store.apply_pragmas()?;
        Ok(store)
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn apply_pragmas(&self) -> Result<(), AuditError> {
        let conn = self.lock("<database>")?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout={BUSY_TIMEOUT_MS};
             PRAGMA temp_store=MEMORY;"
        ))
        .map_err(|err| map_sql_error("<database>", err))
    }

    fn lock(&self, collection: &str) -> Result<MutexGuard<'_, Connection>, AuditError> {
        self.connection
            .lock()
            .map_err(|_| AuditError::CollectionUnavailable {
                collection: collection.to_string(),
                reason: "connection lock poisoned".into(),
            })
    }

    /// Create the table backing `collection` if missing.
    pub fn create_collection(&self, collection: &str) -> Result<(), AuditError> {
        let table = quoted_identifier(collection)?;
        let conn = self.lock(collection)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                key TEXT PRIMARY KEY NOT NULL,
                doc TEXT NOT NULL
             ) WITHOUT ROWID;"
        ))
        .map_err(|err| map_sql_error(collection, err))
    }

    /// Insert or replace documents in one transaction. Returns rows written.
    pub fn insert_documents<I>(&self, collection: &str, documents: I) -> Result<usize, AuditError>
    where
        I: IntoIterator<Item = Document>,
    {
        self.create_collection(collection)?;
        let table = quoted_identifier(collection)?;
        let mut conn = self.lock(collection)?;
        let tx = conn
            .transaction()
            .map_err(|err| map_sql_error(collection, err))?;
        let mut written = 0usize;
        {
            let mut stmt = tx
                .prepare_cached(&format!(
                    "INSERT OR REPLACE INTO {table} (key, doc) VALUES (?1, ?2)"
                ))
                .map_err(|err| map_sql_error(collection, err))?;
            for document in documents {
                let doc = serde_json::to_string(&document.body).map_err(|err| {
                    AuditError::CollectionInconsistent {
                        collection: collection.to_string(),
                        details: format!("document '{}' is not serializable: {err}", document.key),
                    }
                })?;
                stmt.execute(params![document.key, doc])
                    .map_err(|err| map_sql_error(collection, err))?;
                written += 1;
            }
        }
        tx.commit().map_err(|err| map_sql_error(collection, err))?;
        Ok(written)
    }

    /// Import JSON Lines into `collection`, taking each key from `key_field`.
    ///
    /// Blank lines are skipped. A line that is not a JSON object or lacks a
    /// usable key aborts the import with its line number; chunks committed
    /// before the failure stay written.
    pub fn import_json_lines<R: BufRead>(
        &self,
        collection: &str,
        reader: R,
        key_field: &str,
    ) -> Result<usize, AuditError> {
        let mut chunk = Vec::with_capacity(IMPORT_CHUNK_ROWS);
        let mut imported = 0usize;
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let line_no = idx + 1;
            let body: Value =
                serde_json::from_str(&line).map_err(|err| AuditError::CollectionInconsistent {
                    collection: collection.to_string(),
                    details: format!("line {line_no}: invalid JSON: {err}"),
                })?;
            if !body.is_object() {
                return Err(AuditError::CollectionInconsistent {
                    collection: collection.to_string(),
                    details: format!("line {line_no}: expected a JSON object"),
                });
            }
            let LinkRef::Present(key) = LinkRef::from_field(&body, key_field) else {
                return Err(AuditError::CollectionInconsistent {
                    collection: collection.to_string(),
                    details: format!("line {line_no}: missing key field '{key_field}'"),
                });
            };
            chunk.push(Document::new(key, body));
            if chunk.len() >= IMPORT_CHUNK_ROWS {
                imported += self.insert_documents(collection, chunk.drain(..))?;
                debug!("[crossref:sqlite] imported {imported} rows into '{collection}'");
            }
        }
        if !chunk.is_empty() {
            imported += self.insert_documents(collection, chunk)?;
        }
        info!("[crossref:sqlite] imported {imported} rows into '{collection}'");
        Ok(imported)
    }
}

impl DocumentStore for SqliteStore {
    fn scan_page(&self, request: &ScanRequest<'_>) -> Result<Vec<Document>, AuditError> {
        let table = quoted_identifier(request.collection)?;
        let conn = self.lock(request.collection)?;
        let mut page = Vec::new();
        let mut after = request.after.map(str::to_string);
        // Time bounds apply to decoded documents; keep pulling key-ordered
        // chunks until the page is full or the table runs out.
        while page.len() < request.limit {
            let rows = fetch_key_range(
                &conn,
                &table,
                request.collection,
                after.as_deref(),
                request.limit,
            )?;
            let exhausted = rows.len() < request.limit;
            after = rows.last().map(|(key, _)| key.clone());
            for document in decode_rows(request.collection, rows)? {
                if page.len() == request.limit {
                    break;
                }
                if request
                    .range
                    .contains(parse_timestamp(document.body.get(request.time_field)))
                {
                    page.push(document);
                }
            }
            if exhausted || after.is_none() {
                break;
            }
        }
        Ok(page)
    }

    fn find_by_keys(
        &self,
        collection: &str,
        keys: &[DocumentKey],
    ) -> Result<Vec<Document>, AuditError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let table = quoted_identifier(collection)?;
        // One statement regardless of key count: keys travel as a JSON array.
        let key_list = serde_json::to_string(keys).map_err(|err| {
            AuditError::CollectionInconsistent {
                collection: collection.to_string(),
                details: format!("lookup keys are not serializable: {err}"),
            }
        })?;
        let conn = self.lock(collection)?;
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT key, doc FROM {table}
                 WHERE key IN (SELECT value FROM json_each(?1))"
            ))
            .map_err(|err| map_sql_error(collection, err))?;
        let rows = stmt
            .query_map(params![key_list], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|err| map_sql_error(collection, err))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| map_sql_error(collection, err))?;
        decode_rows(collection, rows)
    }

    fn load_collection(&self, collection: &str) -> Result<Vec<Document>, AuditError> {
        let table = quoted_identifier(collection)?;
        let conn = self.lock(collection)?;
        let mut stmt = conn
            .prepare(&format!("SELECT key, doc FROM {table} ORDER BY key ASC"))
            .map_err(|err| map_sql_error(collection, err))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|err| map_sql_error(collection, err))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| map_sql_error(collection, err))?;
        decode_rows(collection, rows)
    }
}

fn decode_rows(
    collection: &str,
    rows: Vec<(String, String)>,
) -> Result<Vec<Document>, AuditError> {
    rows.into_iter()
        .map(|(key, doc)| {
            serde_json::from_str(&doc)
                .map(|body| Document::new(key.clone(), body))
                .map_err(|err| AuditError::CollectionInconsistent {
                    collection: collection.to_string(),
                    details: format!("document '{key}' holds invalid JSON: {err}"),
                })
        })
        .collect()
}

/// Key-ordered page statement. `keyed` adds the `key > ?1` seek; the limit is
/// the last parameter.
fn page_sql(table: &str, keyed: bool) -> String {
    if keyed {
        format!("SELECT key, doc FROM {table} WHERE key > ?1 ORDER BY key ASC LIMIT ?2")
    } else {
        format!("SELECT key, doc FROM {table} ORDER BY key ASC LIMIT ?1")
    }
}

fn fetch_key_range(
    conn: &Connection,
    table: &str,
    collection: &str,
    after: Option<&str>,
    limit: usize,
) -> Result<Vec<(String, String)>, AuditError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn
        .prepare_cached(&page_sql(table, after.is_some()))
        .map_err(|err| map_sql_error(collection, err))?;
    let rows = match after {
        Some(after) => stmt.query_map(params![after, limit], read_row),
        None => stmt.query_map(params![limit], read_row),
    }
    .map_err(|err| map_sql_error(collection, err))?
    .collect::<Result<Vec<_>, _>>()
    .map_err(|err| map_sql_error(collection, err))?;
    Ok(rows)
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String)> {
    Ok((row.get(0)?, row.get(1)?))
}

/// Collection names become table names; restrict them to plain identifiers.
fn quoted_identifier(name: &str) -> Result<String, AuditError> {
    if is_plain_identifier(name) {
        Ok(format!("\"{name}\""))
    } else {
        Err(AuditError::Configuration(format!(
            "collection name '{name}' must be non-empty and contain only ASCII letters, digits, or '_'"
        )))
    }
}

fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn map_sql_error(collection: &str, err: rusqlite::Error) -> AuditError {
    match err {
        rusqlite::Error::SqliteFailure(sql_err, message)
            if matches!(
                sql_err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) =>
        {
            AuditError::StoreBusy {
                collection: collection.to_string(),
                reason: message.unwrap_or_else(|| sql_err.to_string()),
            }
        }
        other => AuditError::CollectionUnavailable {
            collection: collection.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeRange;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::io::Cursor;

    fn seeded() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let docs = [
            ("d3", "2024-01-03T12:00:00Z"),
            ("d1", "2024-01-01T12:00:00Z"),
            ("d2", "2024-01-02T12:00:00+05:00"),
            ("d4", "not a date"),
        ]
        .into_iter()
        .map(|(key, ts)| Document::new(key, json!({"createdAt": ts, "item": key})));
        store.insert_documents("documents", docs).unwrap();
        store
    }

    fn scan(store: &SqliteStore, after: Option<&str>, range: TimeRange, limit: usize) -> Vec<String> {
        store
            .scan_page(&ScanRequest {
                collection: "documents",
                after,
                time_field: "createdAt",
                range,
                limit,
            })
            .unwrap()
            .into_iter()
            .map(|doc| doc.key)
            .collect()
    }

    #[test]
    fn scan_is_ordered_and_resumes_after_key() {
        let store = seeded();
        assert_eq!(scan(&store, None, TimeRange::default(), 3), ["d1", "d2", "d3"]);
        assert_eq!(scan(&store, Some("d3"), TimeRange::default(), 3), ["d4"]);
        assert!(scan(&store, Some("d4"), TimeRange::default(), 3).is_empty());
    }

    #[test]
    fn scan_filters_by_time_window() {
        let store = seeded();
        let range = TimeRange::from_dates(NaiveDate::from_ymd_opt(2024, 1, 2), None);
        assert_eq!(scan(&store, None, range, 10), ["d2", "d3"]);
        let range = TimeRange::from_dates(None, NaiveDate::from_ymd_opt(2024, 1, 3));
        assert_eq!(scan(&store, None, range, 10), ["d1", "d2"]);
    }

    #[test]
    fn sparse_window_refills_the_page() {
        let store = seeded();
        let range = TimeRange::from_dates(NaiveDate::from_ymd_opt(2024, 1, 3), None);
        assert_eq!(scan(&store, None, range, 1), ["d3"]);
        assert!(scan(&store, Some("d3"), range, 1).is_empty());
    }

    #[test]
    fn non_rfc3339_timestamps_fall_outside_bounded_windows() {
        let store = SqliteStore::open_in_memory().unwrap();
        let docs = [
            ("d1", json!("2024-01-05")),
            ("d2", json!("2024-01-05 10:00:00")),
            ("d3", json!(2460320)),
            ("d4", json!("2024-01-05T10:00:00Z")),
        ]
        .into_iter()
        .map(|(key, ts)| Document::new(key, json!({"createdAt": ts})));
        store.insert_documents("documents", docs).unwrap();
        let range = TimeRange::from_dates(
            NaiveDate::from_ymd_opt(2024, 1, 1),
            NaiveDate::from_ymd_opt(2024, 2, 1),
        );
        assert_eq!(scan(&store, None, range, 10), ["d4"]);
        assert_eq!(
            scan(&store, None, TimeRange::default(), 10),
            ["d1", "d2", "d3", "d4"]
        );
    }

    #[test]
    fn cursor_page_seeks_the_primary_key() {
        let store = seeded();
        let conn = store.lock("documents").unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "EXPLAIN QUERY PLAN {}",
                page_sql("\"documents\"", true)
            ))
            .unwrap();
        let plan: Vec<String> = stmt
            .query_map(params!["d1", 10i64], |row| row.get::<_, String>(3))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(
            plan.iter().any(|detail| detail.contains("USING PRIMARY KEY")),
            "{plan:?}"
        );
        assert!(!plan.iter().any(|detail| detail.starts_with("SCAN")), "{plan:?}");
    }

    #[test]
    fn find_by_keys_is_a_single_in_set_lookup() {
        let store = seeded();
        let mut found: Vec<String> = store
            .find_by_keys("documents", &["d2".into(), "missing".into(), "d4".into()])
            .unwrap()
            .into_iter()
            .map(|doc| doc.key)
            .collect();
        found.sort();
        assert_eq!(found, ["d2", "d4"]);
        assert!(store.find_by_keys("documents", &[]).unwrap().is_empty());
    }

    #[test]
    fn missing_table_is_unavailable() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.load_collection("repositories").unwrap_err();
        assert!(matches!(err, AuditError::CollectionUnavailable { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn unsafe_collection_names_are_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.load_collection("docs; DROP TABLE x").unwrap_err();
        assert!(matches!(err, AuditError::Configuration(_)));
    }

    #[test]
    fn json_lines_import_uses_key_field() {
        let store = SqliteStore::open_in_memory().unwrap();
        let input = "{\"_id\": \"R1\", \"body\": \"bodyA\"}\n\n{\"_id\": 7, \"body\": \"bodyB\"}\n";
        let count = store
            .import_json_lines("repositories", Cursor::new(input), "_id")
            .unwrap();
        assert_eq!(count, 2);
        let keys: Vec<String> = store
            .load_collection("repositories")
            .unwrap()
            .into_iter()
            .map(|doc| doc.key)
            .collect();
        assert_eq!(keys, ["7", "R1"]);
    }

    #[test]
    fn json_lines_import_reports_bad_line() {
        let store = SqliteStore::open_in_memory().unwrap();
        let input = "{\"_id\": \"R1\"}\n{\"body\": \"x\"}\n";
        let err = store
            .import_json_lines("repositories", Cursor::new(input), "_id")
            .unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[test]
    fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .insert_documents("items", [Document::new("I1", json!({"bodies": ["a"]}))])
                .unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.path(), Some(path.as_path()));
        assert_eq!(reopened.load_collection("items").unwrap().len(), 1);
    }
}
