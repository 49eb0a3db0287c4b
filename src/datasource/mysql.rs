// MySQL catalog loader
//
// Reads column and index definitions from INFORMATION_SCHEMA.

use log::debug;

use super::cache::TableMetaLoader;
use super::meta::{ColumnMeta, IndexMeta, TableMeta};
use crate::common::{DataValue, IndexType, NamedValue};
use crate::driver::{Conn, Rows};
use crate::error::{AtError, Result};

pub const COLUMN_SCHEMA_SQL: &str = "SELECT TABLE_CATALOG, TABLE_NAME, TABLE_SCHEMA, COLUMN_NAME, DATA_TYPE, \
     COLUMN_TYPE, COLUMN_KEY, IS_NULLABLE, COLUMN_DEFAULT, EXTRA FROM INFORMATION_SCHEMA.COLUMNS \
     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION";

pub const INDEX_SCHEMA_SQL: &str = "SELECT INDEX_NAME, COLUMN_NAME, NON_UNIQUE, INDEX_TYPE, COLLATION, \
     CARDINALITY FROM INFORMATION_SCHEMA.STATISTICS WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
     ORDER BY INDEX_NAME, SEQ_IN_INDEX";

/// Loads table metadata from a MySQL compatible catalog
#[derive(Debug, Default)]
pub struct MySqlTableMetaLoader;

impl MySqlTableMetaLoader {
    pub fn new() -> Self {
        MySqlTableMetaLoader
    }
}

fn text(rows: &Rows, row: usize, column: &str) -> String {
    match rows.get(row, column) {
        Some(DataValue::Null) | None => String::new(),
        Some(value) => value.to_string(),
    }
}

fn columns_from_rows(rows: &Rows) -> Vec<ColumnMeta> {
    (0..rows.row_count())
        .map(|i| {
            let default = match rows.get(i, "COLUMN_DEFAULT") {
                Some(DataValue::Null) | None => None,
                Some(value) => Some(value.clone()),
            };
            ColumnMeta {
                name: text(rows, i, "COLUMN_NAME"),
                data_type: text(rows, i, "DATA_TYPE").to_lowercase(),
                column_type: text(rows, i, "COLUMN_TYPE"),
                nullable: text(rows, i, "IS_NULLABLE").eq_ignore_ascii_case("YES"),
                default,
                auto_increment: text(rows, i, "EXTRA").to_lowercase().contains("auto_increment"),
                key: text(rows, i, "COLUMN_KEY"),
            }
        })
        .collect()
}

/// Group statistics rows into indexes, keeping column order
fn indexes_from_rows(rows: &Rows) -> Vec<IndexMeta> {
    let mut indexes: Vec<IndexMeta> = Vec::new();
    for i in 0..rows.row_count() {
        let name = text(rows, i, "INDEX_NAME");
        let column = text(rows, i, "COLUMN_NAME");
        if let Some(index) = indexes.iter_mut().find(|idx| idx.name == name) {
            index.columns.push(column);
            continue;
        }
        let non_unique = rows.get(i, "NON_UNIQUE").and_then(DataValue::as_i64).unwrap_or(1);
        let index_type = if name.eq_ignore_ascii_case("PRIMARY") {
            IndexType::PrimaryKey
        } else if non_unique == 0 {
            IndexType::Unique
        } else {
            IndexType::Normal
        };
        indexes.push(IndexMeta { name, index_type, columns: vec![column] });
    }
    indexes
}

impl TableMetaLoader for MySqlTableMetaLoader {
    fn load_one(&self, conn: &mut dyn Conn, schema: &str, table: &str) -> Result<TableMeta> {
        let args = [NamedValue::new(1, schema), NamedValue::new(2, table)];

        let column_rows = conn.query(COLUMN_SCHEMA_SQL, &args)?;
        let columns = columns_from_rows(&column_rows);
        if columns.is_empty() {
            return Err(AtError::NotFound(format!("table {}.{} does not exist", schema, table)));
        }

        let index_rows = conn.query(INDEX_SCHEMA_SQL, &args)?;
        let indexes = indexes_from_rows(&index_rows);

        let meta = TableMeta::new(table, columns, indexes);
        meta.primary_key_columns()?;
        debug!(
            "Loaded metadata for {}.{}: {} columns, {} indexes",
            schema,
            table,
            meta.column_names.len(),
            meta.indexes.len()
        );
        Ok(meta)
    }
}
