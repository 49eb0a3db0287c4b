// Data source metadata
//
// Table schemas, their cache, and the per-dialect catalog loaders.

pub mod cache;
pub mod meta;
pub mod mysql;

pub use self::cache::{TableMetaCache, TableMetaLoader};
pub use self::meta::{ColumnMeta, IndexMeta, TableMeta};
pub use self::mysql::MySqlTableMetaLoader;

/// Database name of a data source name such as `user:pwd@tcp(host:3306)/db?charset=utf8`
pub fn schema_from_dsn(dsn: &str) -> String {
    let without_params = dsn.split('?').next().unwrap_or(dsn);
    match without_params.rfind('/') {
        Some(pos) => without_params[pos + 1..].to_string(),
        None => String::new(),
    }
}
