//! Stream table naming, identifier validation and the per-store schema
//! registry.

use crate::error::{Result, StorageError};
use pulse_common::types::{MetricSample, MetricValue};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Column names every stream table carries; value keys may not reuse them.
pub const RESERVED_COLUMNS: [&str; 2] = ["id", "timestamp"];

/// Storage type of a value column, fixed at first write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    Text,
}

impl ColumnType {
    pub fn of(value: &MetricValue) -> Self {
        match value {
            MetricValue::Number(_) => ColumnType::Numeric,
            MetricValue::Text(_) => ColumnType::Text,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Numeric => "numeric",
            ColumnType::Text => "text",
        }
    }

    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Numeric => "REAL",
            ColumnType::Text => "TEXT",
        }
    }

    /// Maps a declared SQLite column type back. Anything without text
    /// affinity is treated as numeric.
    pub fn from_declared(decl: &str) -> Self {
        let upper = decl.to_ascii_uppercase();
        if upper.contains("CHAR") || upper.contains("TEXT") || upper.contains("CLOB") {
            ColumnType::Text
        } else {
            ColumnType::Numeric
        }
    }

    pub fn accepts(self, value: &MetricValue) -> bool {
        ColumnType::of(value) == self
    }
}

/// Column layout of one stream table. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSchema {
    table: String,
    source_id: String,
    stream_kind: String,
    columns: BTreeMap<String, ColumnType>,
}

impl StreamSchema {
    pub fn new(
        source_id: &str,
        stream_kind: &str,
        columns: BTreeMap<String, ColumnType>,
    ) -> Self {
        Self {
            table: table_name(source_id, stream_kind),
            source_id: source_id.to_string(),
            stream_kind: stream_kind.to_string(),
            columns,
        }
    }

    /// Schema inferred from the first sample's values.
    pub fn infer(source_id: &str, stream_kind: &str, values: &BTreeMap<String, MetricValue>) -> Self {
        let columns = values
            .iter()
            .map(|(k, v)| (k.clone(), ColumnType::of(v)))
            .collect();
        Self::new(source_id, stream_kind, columns)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn stream_kind(&self) -> &str {
        &self.stream_kind
    }

    pub fn columns(&self) -> &BTreeMap<String, ColumnType> {
        &self.columns
    }

    /// Splits a sample's values into those that fit this schema and the keys
    /// that must be dropped (unknown column or mismatched type).
    pub fn project<'a>(
        &self,
        sample: &'a MetricSample,
    ) -> (Vec<(&'a str, &'a MetricValue)>, Vec<&'a str>) {
        let mut kept = Vec::new();
        let mut dropped = Vec::new();
        for (key, value) in sample.values() {
            match self.columns.get(key) {
                Some(col) if col.accepts(value) => kept.push((key.as_str(), value)),
                _ => dropped.push(key.as_str()),
            }
        }
        (kept, dropped)
    }
}

/// `metrics_{source_id}_{stream_kind}`, ASCII-lowercased.
///
/// SQLite resolves table names without regard to case, so the name is folded
/// here and ownership is checked against the registry with exact case.
pub fn table_name(source_id: &str, stream_kind: &str) -> String {
    format!("metrics_{source_id}_{stream_kind}").to_ascii_lowercase()
}

/// Double-quotes an identifier for use in generated SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Checks that `value` is a non-empty `[A-Za-z0-9_]+` of at most
/// [`MAX_IDENTIFIER_LEN`] characters.
///
/// # Examples
///
/// ```
/// use pulse_storage::schema::validate_identifier;
///
/// assert!(validate_identifier("sourceId", "device_1").is_ok());
/// assert!(validate_identifier("sourceId", "dev-1").is_err());
/// assert!(validate_identifier("sourceId", "").is_err());
/// ```
pub fn validate_identifier(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(StorageError::Validation(format!("{what} must not be empty")));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(StorageError::Validation(format!(
            "{what} exceeds {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StorageError::Validation(format!(
            "{what} '{value}' may only contain letters, digits and underscores"
        )));
    }
    Ok(())
}

/// Validates everything about a sample that can be checked without the
/// database.
pub fn validate_sample(sample: &MetricSample) -> Result<()> {
    validate_identifier("sourceId", sample.source_id())?;
    validate_identifier("streamKind", sample.stream_kind())?;
    validate_values(sample.values())
}

/// Checks value keys as future column names. Column names are
/// case-insensitive in SQLite, so keys may not differ only by case.
pub fn validate_values(values: &BTreeMap<String, MetricValue>) -> Result<()> {
    if values.is_empty() {
        return Err(StorageError::Validation("values must not be empty".to_string()));
    }
    let mut seen = HashSet::with_capacity(values.len());
    for key in values.keys() {
        validate_identifier("value key", key)?;
        if RESERVED_COLUMNS.iter().any(|r| r.eq_ignore_ascii_case(key)) {
            return Err(StorageError::Validation(format!(
                "value key '{key}' is reserved"
            )));
        }
        if !seen.insert(key.to_ascii_lowercase()) {
            return Err(StorageError::Validation(format!(
                "value key '{key}' differs from another key only by case"
            )));
        }
    }
    Ok(())
}

/// Process-lifetime registry of known stream schemas, keyed by table name.
///
/// Lookups take a read lock only; the first schema inserted for a table wins.
#[derive(Debug, Default)]
pub struct SchemaCache {
    inner: RwLock<HashMap<String, Arc<StreamSchema>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<StreamSchema>>> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<StreamSchema>>> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, table: &str) -> Option<Arc<StreamSchema>> {
        self.read().get(table).cloned()
    }

    /// Inserts `schema` unless the table is already cached, returning the
    /// handle that ends up in the cache.
    pub fn insert_if_absent(&self, schema: StreamSchema) -> Arc<StreamSchema> {
        self.write()
            .entry(schema.table().to_string())
            .or_insert_with(|| Arc::new(schema))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(values: &[(&str, MetricValue)]) -> MetricSample {
        let values = values
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        MetricSample::new("s1", "sys", values)
    }

    #[test]
    fn project_drops_unknown_and_mismatched_keys() {
        let first = sample(&[("ram", 42.0.into()), ("host", "box".into())]);
        let schema = StreamSchema::infer("s1", "sys", first.values());
        assert_eq!(schema.table(), "metrics_s1_sys");

        let later = sample(&[
            ("ram", 50.0.into()),
            ("host", 7.0.into()),
            ("disk", 3.0.into()),
        ]);
        let (kept, dropped) = schema.project(&later);
        assert_eq!(kept, vec![("ram", &MetricValue::Number(50.0))]);
        assert_eq!(dropped, vec!["disk", "host"]);
    }

    #[test]
    fn reserved_and_malformed_keys_are_rejected() {
        assert!(validate_sample(&sample(&[("ram", 1.0.into())])).is_ok());
        assert!(validate_sample(&sample(&[("timestamp", 1.0.into())])).is_err());
        assert!(validate_sample(&sample(&[("ID", 1.0.into())])).is_err());
        assert!(validate_sample(&sample(&[("ram usage", 1.0.into())])).is_err());
        assert!(validate_sample(&sample(&[])).is_err());
        assert!(validate_identifier("k", &"a".repeat(65)).is_err());
    }

    #[test]
    fn keys_differing_only_by_case_are_rejected() {
        let err = validate_sample(&sample(&[("ram", 1.0.into()), ("RAM", 2.0.into())]))
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
        assert!(validate_sample(&sample(&[("ram", 1.0.into()), ("rom", 2.0.into())])).is_ok());
    }

    #[test]
    fn table_names_fold_case() {
        assert_eq!(table_name("S1", "SYS"), "metrics_s1_sys");
        assert_eq!(table_name("s1", "sys"), table_name("S1", "Sys"));
    }

    #[test]
    fn first_insert_wins() {
        let cache = SchemaCache::new();
        let a = StreamSchema::new(
            "s1",
            "sys",
            BTreeMap::from([("ram".to_string(), ColumnType::Numeric)]),
        );
        let b = StreamSchema::new(
            "s1",
            "sys",
            BTreeMap::from([("ram".to_string(), ColumnType::Text)]),
        );
        let first = cache.insert_if_absent(a);
        let second = cache.insert_if_absent(b);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.columns()["ram"], ColumnType::Numeric);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn declared_types_map_back() {
        assert_eq!(ColumnType::from_declared("REAL"), ColumnType::Numeric);
        assert_eq!(ColumnType::from_declared("INTEGER"), ColumnType::Numeric);
        assert_eq!(ColumnType::from_declared("text"), ColumnType::Text);
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
