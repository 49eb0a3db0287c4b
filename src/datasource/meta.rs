//! Table Metadata Module
//!
//! Column and index descriptions of a table as read from the schema catalog.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::common::{DataValue, IndexType};
use crate::error::{AtError, Result};

/// A column of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    /// Base type, e.g. `varchar`
    pub data_type: String,
    /// Full type, e.g. `varchar(64)`
    pub column_type: String,
    pub nullable: bool,
    pub default: Option<DataValue>,
    pub auto_increment: bool,
    /// Catalog key marker (`PRI`, `UNI`, `MUL` or empty)
    pub key: String,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        let data_type = data_type.into();
        ColumnMeta {
            name: name.into(),
            column_type: data_type.clone(),
            data_type,
            nullable: true,
            default: None,
            auto_increment: false,
            key: String::new(),
        }
    }
}

/// An index of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub name: String,
    pub index_type: IndexType,
    /// Indexed columns in index order
    pub columns: Vec<String>,
}

/// Schema of one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub table_name: String,
    pub columns: HashMap<String, ColumnMeta>,
    pub indexes: HashMap<String, IndexMeta>,
    /// Column names in table order
    pub column_names: Vec<String>,
}

impl TableMeta {
    /// Build table metadata from columns in table order
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnMeta>, indexes: Vec<IndexMeta>) -> Self {
        let column_names = columns.iter().map(|c| c.name.clone()).collect();
        TableMeta {
            table_name: table_name.into(),
            columns: columns.into_iter().map(|c| (c.name.clone(), c)).collect(),
            indexes: indexes.into_iter().map(|i| (i.name.clone(), i)).collect(),
            column_names,
        }
    }

    /// Get a column by name, ignoring case
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.get(name).or_else(|| {
            self.columns
                .values()
                .find(|c| c.name.eq_ignore_ascii_case(name))
        })
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Columns identifying a row: the primary key, or failing that the
    /// first unique index by name
    pub fn primary_key_columns(&self) -> Result<Vec<String>> {
        if let Some(pk) = self.indexes.values().find(|i| i.index_type == IndexType::PrimaryKey) {
            return Ok(pk.columns.clone());
        }
        self.unique_indexes()
            .into_iter()
            .next()
            .map(|i| i.columns.clone())
            .ok_or_else(|| AtError::NotFound(format!("table {} has no primary or unique index", self.table_name)))
    }

    /// Whether `column` is part of the row identity
    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key_columns()
            .map(|pks| pks.iter().any(|pk| pk.eq_ignore_ascii_case(column)))
            .unwrap_or(false)
    }

    /// Primary and unique indexes, primary key first, the rest by name
    pub fn unique_indexes(&self) -> Vec<&IndexMeta> {
        let mut indexes: Vec<&IndexMeta> = self
            .indexes
            .values()
            .filter(|i| i.index_type != IndexType::Normal)
            .collect();
        indexes.sort_by(|a, b| {
            let rank = |i: &IndexMeta| if i.index_type == IndexType::PrimaryKey { 0 } else { 1 };
            rank(a).cmp(&rank(b)).then_with(|| a.name.cmp(&b.name))
        });
        indexes
    }

    /// Names of auto-generated columns in table order
    pub fn auto_increment_columns(&self) -> Vec<&str> {
        self.column_names
            .iter()
            .filter_map(|n| self.columns.get(n))
            .filter(|c| c.auto_increment)
            .map(|c| c.name.as_str())
            .collect()
    }
}
