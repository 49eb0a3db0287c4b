// Component registry
//
// Wiring between dialects, statement kinds and the components serving them:
// undo log managers, table metadata caches, image builders, executor
// factories and hooks. Built once at startup and shared by reference.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use once_cell::sync::OnceCell;

use crate::common::{DbType, SqlType};
use crate::config::AtConfig;
use crate::datasource::{MySqlTableMetaLoader, TableMetaCache, TableMetaLoader};
use crate::error::{AtError, Result};
use crate::exec::{AtExecutor, ExecutorFactory, SqlExecutor, SqlHook};
use crate::undo::builder::{DeleteUndoLogBuilder, InsertUndoLogBuilder, UpdateUndoLogBuilder, UpsertUndoLogBuilder};
use crate::undo::{MySqlUndoLogManager, UndoLogBuilder, UndoLogCodec, UndoLogManager};

/// A manager and the one-time gate around its `init`
struct ManagerEntry {
    manager: Arc<dyn UndoLogManager>,
    ready: OnceCell<()>,
}

pub struct AtRegistry {
    config: AtConfig,
    managers: HashMap<DbType, ManagerEntry>,
    meta_caches: HashMap<DbType, Arc<TableMetaCache>>,
    builders: HashMap<SqlType, Arc<dyn UndoLogBuilder>>,
    factories: HashMap<(DbType, SqlType), ExecutorFactory>,
    hooks: HashMap<SqlType, Vec<Arc<dyn SqlHook>>>,
}

impl AtRegistry {
    /// Registry with no components
    pub fn empty(config: AtConfig) -> Self {
        AtRegistry {
            config,
            managers: HashMap::new(),
            meta_caches: HashMap::new(),
            builders: HashMap::new(),
            factories: HashMap::new(),
            hooks: HashMap::new(),
        }
    }

    /// Registry wired with the MySQL components and every image builder
    pub fn new(config: &AtConfig) -> Result<Self> {
        config.validate()?;
        let mut registry = AtRegistry::empty(config.clone());

        let codec = Arc::new(UndoLogCodec::from_config(&config.undo)?);
        registry.register_undo_log_manager(Arc::new(MySqlUndoLogManager::new(codec, config.undo.log_table.clone())));
        registry.register_table_meta_loader(DbType::MySql, Arc::new(MySqlTableMetaLoader::new()));

        registry.register_builder(Arc::new(InsertUndoLogBuilder));
        registry.register_builder(Arc::new(UpdateUndoLogBuilder));
        registry.register_builder(Arc::new(DeleteUndoLogBuilder));
        registry.register_builder(Arc::new(UpsertUndoLogBuilder::replace()));
        registry.register_builder(Arc::new(UpsertUndoLogBuilder::insert_on_duplicate_update()));

        for sql_type in [
            SqlType::Insert,
            SqlType::Update,
            SqlType::Delete,
            SqlType::Replace,
            SqlType::InsertOnDuplicateUpdate,
        ] {
            registry.register_executor(DbType::MySql, sql_type, AtExecutor::factory());
        }
        Ok(registry)
    }

    pub fn config(&self) -> &AtConfig {
        &self.config
    }

    pub fn register_undo_log_manager(&mut self, manager: Arc<dyn UndoLogManager>) {
        let db_type = manager.db_type();
        self.managers.insert(db_type, ManagerEntry { manager, ready: OnceCell::new() });
    }

    pub fn register_table_meta_loader(&mut self, db_type: DbType, loader: Arc<dyn TableMetaLoader>) {
        let cache = TableMetaCache::from_config(loader, &self.config.table_meta);
        self.meta_caches.insert(db_type, Arc::new(cache));
    }

    pub fn register_builder(&mut self, builder: Arc<dyn UndoLogBuilder>) {
        self.builders.insert(builder.sql_type(), builder);
    }

    pub fn register_executor(&mut self, db_type: DbType, sql_type: SqlType, factory: ExecutorFactory) {
        self.factories.insert((db_type, sql_type), factory);
    }

    /// Hooks of a kind run in the order they were registered
    pub fn register_hook(&mut self, sql_type: SqlType, hook: Arc<dyn SqlHook>) {
        self.hooks.entry(sql_type).or_default().push(hook);
    }

    /// Manager for a dialect, initialised on first lookup
    pub fn undo_log_manager(&self, db_type: DbType) -> Result<Arc<dyn UndoLogManager>> {
        let entry = self
            .managers
            .get(&db_type)
            .ok_or_else(|| AtError::NotFound(format!("undo log manager for {}", db_type)))?;
        entry.ready.get_or_try_init(|| {
            debug!("Initialising undo log manager for {}", db_type);
            entry.manager.init()
        })?;
        Ok(Arc::clone(&entry.manager))
    }

    pub fn table_meta_cache(&self, db_type: DbType) -> Result<Arc<TableMetaCache>> {
        self.meta_caches
            .get(&db_type)
            .cloned()
            .ok_or_else(|| AtError::NotFound(format!("table meta cache for {}", db_type)))
    }

    pub fn builder(&self, sql_type: SqlType) -> Option<Arc<dyn UndoLogBuilder>> {
        self.builders.get(&sql_type).cloned()
    }

    pub fn hooks(&self, sql_type: SqlType) -> Vec<Arc<dyn SqlHook>> {
        self.hooks.get(&sql_type).cloned().unwrap_or_default()
    }

    /// Executor for a statement; kinds without a factory only run their hooks
    pub fn executor(&self, db_type: DbType, sql_type: SqlType) -> Box<dyn SqlExecutor> {
        let hooks = self.hooks(sql_type);
        match self.factories.get(&(db_type, sql_type)) {
            Some(factory) => factory(self.builder(sql_type), hooks),
            None => Box::new(AtExecutor::plain(hooks)),
        }
    }
}
