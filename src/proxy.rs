// Proxy driver
//
// Wraps a target driver. Connections opened through it run statements issued
// inside a global transaction through the registered executors, and turn the
// local commit into branch registration plus undo log persistence.

use std::sync::Arc;

use log::{debug, error, warn};

use crate::common::{BranchStatus, DbType, NamedValue, Xid};
use crate::datasource::schema_from_dsn;
use crate::driver::{Conn, Driver, DriverError, DriverResult, ExecResult, Rows};
use crate::error::{AtError, Result};
use crate::exec::{ExecContext, TransactionContext};
use crate::parser::{do_parse, ParsedStatement};
use crate::registry::AtRegistry;
use crate::rm::{DataSourceManager, DbResource, Resource, ResourceManagerOutbound};

pub struct ProxyDriver {
    target: Arc<dyn Driver>,
    registry: Arc<AtRegistry>,
    rm: Arc<DataSourceManager>,
}

impl ProxyDriver {
    pub fn new(target: Arc<dyn Driver>, registry: Arc<AtRegistry>, rm: Arc<DataSourceManager>) -> Self {
        ProxyDriver { target, registry, rm }
    }

    /// Open a target connection, register its data source as a resource and
    /// wrap the connection
    pub fn open_conn(&self, dsn: &str) -> Result<ProxyConn> {
        let db_type = DbType::from_driver_name(self.target.name());
        if db_type == DbType::Unknown {
            return Err(AtError::Resource(format!("unsupported target driver '{}'", self.target.name())));
        }
        let conn = self.target.open(dsn)?;

        let config = self.registry.config();
        let resource = DbResource::new(
            config.group_id.clone(),
            dsn,
            db_type,
            config.branch_type,
            Arc::clone(&self.target),
        );
        let resource_id = resource.resource_id().to_string();
        self.rm.register_resource(Arc::new(resource));

        Ok(ProxyConn {
            target: conn,
            db_type,
            schema: schema_from_dsn(dsn),
            registry: Arc::clone(&self.registry),
            rm: Arc::clone(&self.rm),
            tx_ctx: TransactionContext::new(resource_id, db_type),
            in_local_tx: false,
        })
    }
}

impl Driver for ProxyDriver {
    fn name(&self) -> &str {
        self.target.name()
    }

    fn open(&self, dsn: &str) -> DriverResult<Box<dyn Conn>> {
        let conn = self.open_conn(dsn)?;
        Ok(Box::new(conn))
    }
}

/// Connection decorator intercepting statements of a global transaction
pub struct ProxyConn {
    target: Box<dyn Conn>,
    db_type: DbType,
    schema: String,
    registry: Arc<AtRegistry>,
    rm: Arc<DataSourceManager>,
    tx_ctx: TransactionContext,
    in_local_tx: bool,
}

impl ProxyConn {
    /// Join the global transaction `xid`
    pub fn bind_xid(&mut self, xid: impl Into<Xid>) {
        self.tx_ctx.xid = Some(xid.into());
    }

    pub fn unbind_xid(&mut self) -> Option<Xid> {
        self.tx_ctx.xid.take()
    }

    pub fn xid(&self) -> Option<&str> {
        self.tx_ctx.xid.as_deref()
    }

    pub fn db_type(&self) -> DbType {
        self.db_type
    }

    pub fn resource_id(&self) -> &str {
        &self.tx_ctx.resource_id
    }

    pub fn transaction_context(&self) -> &TransactionContext {
        &self.tx_ctx
    }

    fn intercept(&mut self, parsed: &ParsedStatement, query: &str, args: &[NamedValue]) -> Result<ExecResult> {
        let registry = Arc::clone(&self.registry);
        let cache = match registry.table_meta_cache(self.db_type) {
            Ok(cache) => cache,
            Err(e) => {
                debug!("No capture for {}: {}", self.db_type, e);
                return Ok(self.target.exec(query, args)?);
            }
        };
        let executor = registry.executor(self.db_type, parsed.sql_type);

        let mut ctx = ExecContext {
            conn: self.target.as_mut(),
            query,
            values: args,
            parsed: Some(parsed),
            db_type: self.db_type,
            schema: &self.schema,
            meta_cache: &cache,
            undo_config: &registry.config().undo,
            tx_ctx: &mut self.tx_ctx,
            before_image: None,
            after_image: None,
            exec_result: None,
        };
        executor.exec(&mut ctx)
    }

    /// Run a statement in the global transaction, opening a local transaction
    /// around it when the caller did not begin one
    fn exec_in_global(&mut self, parsed: &ParsedStatement, query: &str, args: &[NamedValue]) -> Result<ExecResult> {
        if self.in_local_tx {
            return self.intercept(parsed, query, args);
        }

        self.begin_local()?;
        match self.intercept(parsed, query, args) {
            Ok(result) => match self.commit_local() {
                Ok(()) => Ok(result),
                Err(e) => {
                    self.rollback_local();
                    Err(e)
                }
            },
            Err(e) => {
                self.rollback_local();
                Err(e)
            }
        }
    }

    fn begin_local(&mut self) -> Result<()> {
        self.target.begin()?;
        self.in_local_tx = true;
        self.tx_ctx.reset();
        Ok(())
    }

    /// Register the branch, flush the undo log and commit locally
    fn commit_local(&mut self) -> Result<()> {
        let xid = match &self.tx_ctx.xid {
            Some(xid) if self.tx_ctx.has_undo_logs() => xid.clone(),
            _ => {
                self.target.commit()?;
                self.finish_local();
                return Ok(());
            }
        };

        let registry = Arc::clone(&self.registry);
        let config = registry.config();
        let lock_keys = self.tx_ctx.build_lock_keys();
        let branch_id = self.rm.branch_register(
            config.branch_type,
            &self.tx_ctx.resource_id,
            &config.application_id,
            &xid,
            "",
            &lock_keys,
        )?;
        self.tx_ctx.branch_id = Some(branch_id);

        let outcome = registry
            .undo_log_manager(self.db_type)
            .and_then(|manager| manager.flush_undo_log(&self.tx_ctx, self.target.as_mut()))
            .and_then(|()| self.target.commit().map_err(AtError::from));

        if let Err(e) = &outcome {
            error!("Local commit of branch {} of {} failed: {}", branch_id, xid, e);
            if let Err(report_err) =
                self.rm
                    .branch_report(config.branch_type, &xid, branch_id, BranchStatus::PhaseOneFailed, "")
            {
                warn!("Cannot report phase one failure of branch {}: {}", branch_id, report_err);
            }
            return outcome;
        }
        self.finish_local();
        Ok(())
    }

    fn rollback_local(&mut self) {
        if let Err(e) = self.target.rollback() {
            warn!("Local rollback failed: {}", e);
        }
        self.finish_local();
    }

    fn finish_local(&mut self) {
        self.in_local_tx = false;
        self.tx_ctx.reset();
    }
}

impl Conn for ProxyConn {
    fn exec(&mut self, query: &str, args: &[NamedValue]) -> DriverResult<ExecResult> {
        if !self.tx_ctx.in_global_transaction() {
            return self.target.exec(query, args);
        }
        let parsed = match do_parse(query) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Executing without capture, cannot parse '{}': {}", query, e);
                return self.target.exec(query, args);
            }
        };
        Ok(self.exec_in_global(&parsed, query, args)?)
    }

    fn query(&mut self, query: &str, args: &[NamedValue]) -> DriverResult<Rows> {
        self.target.query(query, args)
    }

    fn begin(&mut self) -> DriverResult<()> {
        Ok(self.begin_local()?)
    }

    fn commit(&mut self) -> DriverResult<()> {
        Ok(self.commit_local()?)
    }

    fn rollback(&mut self) -> DriverResult<()> {
        let result = self.target.rollback();
        self.finish_local();
        result
    }
}

impl From<AtError> for DriverError {
    fn from(e: AtError) -> Self {
        match e {
            AtError::Driver(inner) => inner,
            other => DriverError::Execution(other.to_string()),
        }
    }
}
