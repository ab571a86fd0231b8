use crate::db;
use crate::error::{Result, StorageError};
use crate::schema::{
    quote_ident, table_name, validate_identifier, validate_sample, validate_values, ColumnType,
    SchemaCache, StreamSchema, RESERVED_COLUMNS,
};
use chrono::{DateTime, Datelike, Utc};
use pulse_common::types::{
    decode_rankings, MetricSample, MetricValue, RankingEntry, StoredRanking, StreamRow,
    RANKINGS_VALUE_KEY,
};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub const DEFAULT_RANKINGS_STREAM_KIND: &str = "uefa_rankings";

const REGISTRY_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS stream_registry (
    table_name TEXT PRIMARY KEY COLLATE NOCASE,
    source_id TEXT NOT NULL,
    stream_kind TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
";

const RANKINGS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rankings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id TEXT NOT NULL,
    team TEXT NOT NULL,
    points REAL NOT NULL,
    year INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rankings_source ON rankings(source_id);
";

/// A stream known to the database, for discovery.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub table: String,
    pub source_id: String,
    pub stream_kind: String,
    pub columns: BTreeMap<String, ColumnType>,
    pub created_at: DateTime<Utc>,
}

/// Dynamic-schema store: one SQLite table per `(source_id, stream_kind)`,
/// created on first write with columns inferred from that sample.
///
/// The rankings stream kind is routed to a replace-on-write snapshot table
/// instead of a stream table.
pub struct MetricStore {
    conn: Mutex<Connection>,
    cache: SchemaCache,
    rankings_stream_kind: String,
}

impl MetricStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        Self::with_rankings_stream_kind(data_dir, DEFAULT_RANKINGS_STREAM_KIND)
    }

    pub fn with_rankings_stream_kind(data_dir: &Path, rankings_stream_kind: &str) -> Result<Self> {
        let conn = db::open(data_dir)?;
        conn.execute_batch(REGISTRY_SCHEMA)?;
        conn.execute_batch(RANKINGS_SCHEMA)?;
        tracing::info!(path = %db::db_path(data_dir).display(), "Metric store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            cache: SchemaCache::new(),
            rankings_stream_kind: rankings_stream_kind.to_string(),
        })
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn rankings_stream_kind(&self) -> &str {
        &self.rankings_stream_kind
    }

    pub fn is_rankings(&self, stream_kind: &str) -> bool {
        stream_kind == self.rankings_stream_kind
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.cache
    }

    /// Returns the schema of the stream, creating its table from `values` on
    /// first sight.
    ///
    /// A cache hit never touches the database. On a miss the table is looked
    /// up in the database first (e.g. after a restart) and only created if
    /// absent; either way the cache is populated and the first writer wins.
    pub fn ensure_table(
        &self,
        source_id: &str,
        stream_kind: &str,
        values: &BTreeMap<String, MetricValue>,
    ) -> Result<Arc<StreamSchema>> {
        validate_identifier("sourceId", source_id)?;
        validate_identifier("streamKind", stream_kind)?;
        let table = table_name(source_id, stream_kind);

        if let Some(schema) = self.cache.get(&table) {
            check_owner(&schema, source_id, stream_kind)?;
            return Ok(schema);
        }

        let conn = self.lock_conn();
        if let Some(schema) = load_schema(&conn, &table)? {
            check_owner(&schema, source_id, stream_kind)?;
            return Ok(self.cache.insert_if_absent(schema));
        }

        validate_values(values)?;
        let schema = StreamSchema::infer(source_id, stream_kind, values);
        create_table(&conn, &schema)?;
        tracing::info!(
            table = %table,
            columns = schema.columns().len(),
            "Created stream table"
        );
        Ok(self.cache.insert_if_absent(schema))
    }

    /// Appends one row for `sample` to the stream described by `schema`.
    /// Returns the new row id.
    pub fn insert(&self, schema: &StreamSchema, sample: &MetricSample) -> Result<i64> {
        let conn = self.lock_conn();
        let tx = conn.unchecked_transaction()?;
        let id = insert_row(&tx, schema, sample)?;
        tx.commit()?;
        Ok(id)
    }

    /// Validates and persists a batch atomically. Returns the number of
    /// samples stored.
    ///
    /// Tables are ensured before the write transaction opens; table creation
    /// is idempotent so a rolled-back batch leaves nothing inconsistent.
    pub fn ingest(&self, samples: &[MetricSample]) -> Result<usize> {
        enum Planned<'a> {
            Row(Arc<StreamSchema>, &'a MetricSample),
            Rankings(&'a MetricSample, Vec<RankingEntry>),
        }

        for sample in samples {
            validate_sample(sample)?;
        }

        let mut plan = Vec::with_capacity(samples.len());
        for sample in samples {
            if self.is_rankings(sample.stream_kind()) {
                plan.push(Planned::Rankings(sample, rankings_of(sample)?));
            } else {
                let schema =
                    self.ensure_table(sample.source_id(), sample.stream_kind(), sample.values())?;
                plan.push(Planned::Row(schema, sample));
            }
        }

        let conn = self.lock_conn();
        let tx = conn.unchecked_transaction()?;
        for item in &plan {
            match item {
                Planned::Row(schema, sample) => {
                    insert_row(&tx, schema, sample)?;
                }
                Planned::Rankings(sample, entries) => {
                    write_rankings(&tx, sample.source_id(), entries, sample.captured_at())?;
                }
            }
        }
        tx.commit()?;

        tracing::debug!(count = plan.len(), "Ingested samples");
        Ok(plan.len())
    }

    /// Most recent row of the stream, or `None` if the stream has no rows.
    pub fn latest(&self, source_id: &str, stream_kind: &str) -> Result<Option<StreamRow>> {
        let schema = self.require_schema(source_id, stream_kind)?;
        let sql = format!(
            "SELECT {} FROM {} ORDER BY timestamp DESC, id DESC LIMIT 1",
            select_list(&schema),
            quote_ident(schema.table())
        );
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(&sql)?;
        let row = stmt
            .query_row([], |row| read_row(row, &schema))
            .optional()?;
        Ok(row)
    }

    /// Rows with `start <= timestamp < end`, ascending.
    pub fn range(
        &self,
        source_id: &str,
        stream_kind: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StreamRow>> {
        let schema = self.require_schema(source_id, stream_kind)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE timestamp >= ?1 AND timestamp < ?2 ORDER BY timestamp ASC, id ASC",
            select_list(&schema),
            quote_ident(schema.table())
        );
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(
            params![start.timestamp_millis(), end.timestamp_millis()],
            |row| read_row(row, &schema),
        )?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Replaces the rankings snapshot of `source_id` with `entries`.
    pub fn replace_rankings(
        &self,
        source_id: &str,
        entries: &[RankingEntry],
        at: DateTime<Utc>,
    ) -> Result<()> {
        validate_identifier("sourceId", source_id)?;
        let conn = self.lock_conn();
        let tx = conn.unchecked_transaction()?;
        write_rankings(&tx, source_id, entries, at)?;
        tx.commit()?;
        Ok(())
    }

    /// Current rankings, highest points first.
    pub fn list_rankings(&self) -> Result<Vec<StoredRanking>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT source_id, team, points, year, updated_at FROM rankings
             ORDER BY points DESC, id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let updated_ms: i64 = row.get(4)?;
            Ok(StoredRanking {
                source_id: row.get(0)?,
                team: row.get(1)?,
                points: row.get(2)?,
                year: row.get(3)?,
                updated_at: DateTime::from_timestamp_millis(updated_ms).unwrap_or_default(),
            })
        })?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Every stream table recorded in the database with its schema.
    pub fn list_streams(&self) -> Result<Vec<StreamInfo>> {
        let conn = self.lock_conn();
        let registered: Vec<(String, i64)> = {
            let mut stmt = conn.prepare_cached(
                "SELECT table_name, created_at FROM stream_registry ORDER BY table_name ASC",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            out
        };

        let mut streams = Vec::with_capacity(registered.len());
        for (table, created_ms) in registered {
            match load_schema(&conn, &table)? {
                Some(schema) => streams.push(StreamInfo {
                    table,
                    source_id: schema.source_id().to_string(),
                    stream_kind: schema.stream_kind().to_string(),
                    columns: schema.columns().clone(),
                    created_at: DateTime::from_timestamp_millis(created_ms).unwrap_or_default(),
                }),
                None => {
                    tracing::warn!(table = %table, "Registered stream table is missing");
                }
            }
        }
        Ok(streams)
    }

    pub fn stream_count(&self) -> Result<u64> {
        let conn = self.lock_conn();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM stream_registry", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn require_schema(&self, source_id: &str, stream_kind: &str) -> Result<Arc<StreamSchema>> {
        validate_identifier("sourceId", source_id)?;
        validate_identifier("streamKind", stream_kind)?;
        let table = table_name(source_id, stream_kind);
        let schema = match self.cache.get(&table) {
            Some(schema) => Some(schema),
            None => {
                let conn = self.lock_conn();
                load_schema(&conn, &table)?.map(|schema| self.cache.insert_if_absent(schema))
            }
        };
        // a case variant of another stream's identity is not that stream
        match schema {
            Some(schema) if check_owner(&schema, source_id, stream_kind).is_ok() => Ok(schema),
            _ => Err(StorageError::NotFound {
                entity: "stream",
                id: format!("{source_id}/{stream_kind}"),
            }),
        }
    }
}

fn check_owner(schema: &StreamSchema, source_id: &str, stream_kind: &str) -> Result<()> {
    if schema.source_id() == source_id && schema.stream_kind() == stream_kind {
        Ok(())
    } else {
        Err(StorageError::Validation(format!(
            "table {} already belongs to ({}, {})",
            schema.table(),
            schema.source_id(),
            schema.stream_kind()
        )))
    }
}

/// Recovers a stream schema from the registry and `PRAGMA table_info`.
fn load_schema(conn: &Connection, table: &str) -> Result<Option<StreamSchema>> {
    let owner: Option<(String, String)> = conn
        .prepare_cached("SELECT source_id, stream_kind FROM stream_registry WHERE table_name = ?1")?
        .query_row(params![table], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;
    let Some((source_id, stream_kind)) = owner else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let cols = stmt.query_map([], |row| {
        let name: String = row.get(1)?;
        let decl: String = row.get(2)?;
        Ok((name, decl))
    })?;
    let mut columns = BTreeMap::new();
    let mut found = false;
    for col in cols {
        let (name, decl) = col?;
        found = true;
        if RESERVED_COLUMNS.contains(&name.as_str()) {
            continue;
        }
        columns.insert(name, ColumnType::from_declared(&decl));
    }
    if !found {
        return Ok(None);
    }
    Ok(Some(StreamSchema::new(&source_id, &stream_kind, columns)))
}

fn create_table(conn: &Connection, schema: &StreamSchema) -> Result<()> {
    let table = quote_ident(schema.table());
    let mut columns = vec![
        "id INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
        "timestamp INTEGER NOT NULL".to_string(),
    ];
    columns.extend(
        schema
            .columns()
            .iter()
            .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.sql_type())),
    );
    let index = quote_ident(&format!("idx_{}_timestamp", schema.table()));
    let ddl = format!(
        "CREATE TABLE IF NOT EXISTS {table} ({});
         CREATE INDEX IF NOT EXISTS {index} ON {table}(timestamp);",
        columns.join(", ")
    );

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(&ddl)?;
    tx.execute(
        "INSERT OR IGNORE INTO stream_registry (table_name, source_id, stream_kind, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            schema.table(),
            schema.source_id(),
            schema.stream_kind(),
            Utc::now().timestamp_millis()
        ],
    )?;
    tx.commit()?;
    Ok(())
}

fn insert_row(conn: &Connection, schema: &StreamSchema, sample: &MetricSample) -> Result<i64> {
    let (kept, dropped) = schema.project(sample);
    if !dropped.is_empty() {
        tracing::warn!(
            table = %schema.table(),
            keys = ?dropped,
            "Dropping values that do not match the stream schema"
        );
    }

    let mut names = vec!["timestamp".to_string()];
    let mut values = vec![SqlValue::Integer(sample.captured_at().timestamp_millis())];
    for (key, value) in kept {
        names.push(quote_ident(key));
        values.push(match value {
            MetricValue::Number(n) => SqlValue::Real(*n),
            MetricValue::Text(s) => SqlValue::Text(s.clone()),
        });
    }
    let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(schema.table()),
        names.join(", "),
        placeholders.join(", ")
    );
    conn.prepare_cached(&sql)?
        .execute(rusqlite::params_from_iter(values.iter()))?;
    Ok(conn.last_insert_rowid())
}

fn write_rankings(
    conn: &Connection,
    source_id: &str,
    entries: &[RankingEntry],
    at: DateTime<Utc>,
) -> Result<()> {
    let removed = conn.execute("DELETE FROM rankings WHERE source_id = ?1", params![source_id])?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO rankings (source_id, team, points, year, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for entry in entries {
        stmt.execute(params![
            source_id,
            &entry.team,
            entry.points,
            at.year(),
            at.timestamp_millis()
        ])?;
    }
    tracing::info!(
        source_id = %source_id,
        removed,
        inserted = entries.len(),
        "Replaced rankings snapshot"
    );
    Ok(())
}

fn rankings_of(sample: &MetricSample) -> Result<Vec<RankingEntry>> {
    let value = sample.values().get(RANKINGS_VALUE_KEY).ok_or_else(|| {
        StorageError::Validation(format!("rankings sample requires a '{RANKINGS_VALUE_KEY}' value"))
    })?;
    decode_rankings(value).map_err(StorageError::Validation)
}

fn select_list(schema: &StreamSchema) -> String {
    let mut cols = vec!["id".to_string(), "timestamp".to_string()];
    cols.extend(schema.columns().keys().map(|c| quote_ident(c)));
    cols.join(", ")
}

fn read_row(row: &rusqlite::Row<'_>, schema: &StreamSchema) -> rusqlite::Result<StreamRow> {
    let id: i64 = row.get(0)?;
    let ts_ms: i64 = row.get(1)?;
    let mut values = BTreeMap::new();
    for (idx, name) in schema.columns().keys().enumerate() {
        let value = match row.get_ref(idx + 2)? {
            ValueRef::Null => continue,
            ValueRef::Integer(i) => MetricValue::Number(i as f64),
            ValueRef::Real(f) => MetricValue::Number(f),
            ValueRef::Text(t) => MetricValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => MetricValue::Text(String::from_utf8_lossy(b).into_owned()),
        };
        values.insert(name.clone(), value);
    }
    Ok(StreamRow {
        id,
        timestamp: DateTime::from_timestamp_millis(ts_ms).unwrap_or_default(),
        values,
    })
}
