use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use super::TupleError;

/// Destination for tuple rows.
pub trait RowSink {
    /// Declares a tuple and its columns. Must precede any row of that tuple.
    fn register(&mut self, table: &str, columns: &[String]) -> Result<(), TupleError>;

    fn write_row(&mut self, table: &str, row: &[Option<f64>]) -> Result<(), TupleError>;
}

/// Schema manifest written next to each tuple file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleSchema {
    pub name: String,
    pub file: String,
    pub columns: Vec<String>,
    pub rows: u64,
    /// `sha256:<hex>` of the serialized run configuration.
    pub config_digest: String,
    pub created_at: DateTime<Utc>, // informational only
}

// One JSON object per row, keys in schema order.
struct RowRef<'a> {
    columns: &'a [String],
    values: &'a [Option<f64>],
}

impl Serialize for RowRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(self.values) {
            // non-finite values have no JSON form; write them as absent
            map.serialize_entry(column, &value.filter(|v| v.is_finite()))?;
        }
        map.end()
    }
}

struct Table {
    columns: Vec<String>,
    file: String,
    out: BufWriter<File>,
    rows: u64,
}

/// Writes each tuple as `<name>.jsonl` plus `<name>.schema.json` into a
/// fresh output directory.
pub struct TupleWriter {
    root: PathBuf,
    config_digest: String,
    tables: BTreeMap<String, Table>,
}

impl TupleWriter {
    pub fn create(root: &Path, config_digest: impl Into<String>) -> Result<Self, TupleError> {
        if root.exists() {
            return Err(TupleError::OutputExists(root.to_path_buf()));
        }
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            config_digest: config_digest.into(),
            tables: BTreeMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn rows_written(&self, table: &str) -> Option<u64> {
        self.tables.get(table).map(|t| t.rows)
    }

    /// Flushes every tuple and writes the schema manifests.
    pub fn finish(self) -> Result<Vec<TupleSchema>, TupleError> {
        let created_at = Utc::now();
        let mut schemas = Vec::with_capacity(self.tables.len());
        for (name, table) in self.tables {
            let file = table.out.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            let schema = TupleSchema {
                name: name.clone(),
                file: table.file,
                columns: table.columns,
                rows: table.rows,
                config_digest: self.config_digest.clone(),
                created_at,
            };
            let f = File::create(self.root.join(format!("{name}.schema.json")))?;
            serde_json::to_writer_pretty(&f, &schema)?;
            f.sync_all()?;
            tracing::info!(tuple = %name, rows = schema.rows, "tuple written");
            schemas.push(schema);
        }
        Ok(schemas)
    }
}

impl RowSink for TupleWriter {
    fn register(&mut self, table: &str, columns: &[String]) -> Result<(), TupleError> {
        let file = format!("{table}.jsonl");
        let path = self.root.join(&file);
        if self.tables.contains_key(table) || path.exists() {
            return Err(TupleError::OutputExists(path));
        }
        let out = BufWriter::new(File::create(&path)?);
        self.tables.insert(
            table.to_string(),
            Table {
                columns: columns.to_vec(),
                file,
                out,
                rows: 0,
            },
        );
        Ok(())
    }

    fn write_row(&mut self, table: &str, row: &[Option<f64>]) -> Result<(), TupleError> {
        let t = self
            .tables
            .get_mut(table)
            .ok_or_else(|| TupleError::UnknownTable(table.to_string()))?;
        if row.len() != t.columns.len() {
            return Err(TupleError::RowWidth {
                table: table.to_string(),
                expected: t.columns.len(),
                got: row.len(),
            });
        }
        serde_json::to_writer(
            &mut t.out,
            &RowRef {
                columns: &t.columns,
                values: row,
            },
        )?;
        t.out.write_all(b"\n")?;
        t.rows += 1;
        Ok(())
    }
}

/// In-memory sink, handy for inspecting rows without touching disk.
#[derive(Debug, Clone, Default)]
pub struct TupleBuffer {
    tables: BTreeMap<String, (Vec<String>, Vec<Vec<Option<f64>>>)>,
}

impl TupleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.tables.get(table).map(|(c, _)| c.as_slice())
    }

    pub fn rows(&self, table: &str) -> &[Vec<Option<f64>>] {
        self.tables.get(table).map(|(_, r)| r.as_slice()).unwrap_or(&[])
    }

    /// Value of `column` in row `row`; outer `None` for an unknown column
    /// or row.
    pub fn value(&self, table: &str, row: usize, column: &str) -> Option<Option<f64>> {
        let (columns, rows) = self.tables.get(table)?;
        let i = columns.iter().position(|c| c == column)?;
        rows.get(row).map(|r| r[i])
    }
}

impl RowSink for TupleBuffer {
    fn register(&mut self, table: &str, columns: &[String]) -> Result<(), TupleError> {
        self.tables
            .insert(table.to_string(), (columns.to_vec(), Vec::new()));
        Ok(())
    }

    fn write_row(&mut self, table: &str, row: &[Option<f64>]) -> Result<(), TupleError> {
        let (columns, rows) = self
            .tables
            .get_mut(table)
            .ok_or_else(|| TupleError::UnknownTable(table.to_string()))?;
        if row.len() != columns.len() {
            return Err(TupleError::RowWidth {
                table: table.to_string(),
                expected: columns.len(),
                got: row.len(),
            });
        }
        rows.push(row.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rows_keep_schema_order_and_absent_values() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("out");
        let mut writer = TupleWriter::create(&root, "sha256:abc").unwrap();
        writer.register("T", &cols(&["b", "a", "c"])).unwrap();
        writer.write_row("T", &[Some(1.5), None, Some(f64::NAN)]).unwrap();
        assert_eq!(writer.rows_written("T"), Some(1));

        let schemas = writer.finish().unwrap();
        assert_eq!(schemas[0].columns, cols(&["b", "a", "c"]));
        let text = fs::read_to_string(root.join("T.jsonl")).unwrap();
        assert_eq!(text, "{\"b\":1.5,\"a\":null,\"c\":null}\n");
    }

    #[test]
    fn row_width_and_registration_are_checked() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut writer = TupleWriter::create(&dir.path().join("out"), "d").unwrap();
        assert!(matches!(
            writer.write_row("T", &[Some(1.0)]),
            Err(TupleError::UnknownTable(_))
        ));
        writer.register("T", &cols(&["x"])).unwrap();
        assert!(matches!(
            writer.write_row("T", &[Some(1.0), Some(2.0)]),
            Err(TupleError::RowWidth { expected: 1, got: 2, .. })
        ));
        assert!(matches!(
            writer.register("T", &cols(&["x"])),
            Err(TupleError::OutputExists(_))
        ));
    }

    #[test]
    fn existing_directory_is_refused() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            TupleWriter::create(dir.path(), "d"),
            Err(TupleError::OutputExists(_))
        ));
    }
}
