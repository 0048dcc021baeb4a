//! The model repository: orchestrates every read/write operation.
//!
//! Each operation follows the same shape: compile a command through the
//! strategy, fire the pre-hook, execute through the unit of work, interpret
//! the affected-row count against the command's contract, map records onto
//! models, fire the post-hook. Single-row reads and identity retrieval
//! enforce the contract strictly; writes treat "affected rows did not
//! exceed the baseline" as the non-fatal concurrency/nullipotency conflict
//! and return `false`. Every fatal error marks the active unit of work
//! divergent before it propagates.
//!
//! Transactions are threaded explicitly: pass a [`DbContext`] to share the
//! caller's unit of work (results stay lazy unless configured eager), or
//! pass `None` to run top-level — a dedicated unit is opened, every lazy
//! result is fully materialized, and the unit is completed before
//! returning, so no result ever outlives its transaction.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::command::CompiledCommand;
use crate::error::{EngineError, EngineResult, ExecutionError};
use crate::expr::Query;
use crate::model::procedure::ProcedureReturn;
use crate::model::{CallModel, OutputModel, ResultModel, TableModel};
use crate::strategy::SqlStrategy;
use crate::uow::{DbContext, RecordIter, UnitOfWork, UnitOfWorkFactory};

/// Runtime options for a repository instance.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Detect restarted enumerations (see `EnumerationGuard`). Disable only
    /// for callers that deliberately re-read abandoned procedure results.
    pub check_reentrancy: bool,
    /// Force full materialization even under an ambient context.
    pub eager_results: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            check_reentrancy: true,
            eager_results: std::env::var("RELMODEL_EAGER")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

/// Either the caller's shared unit or a dedicated one opened for this call.
enum UnitHandle<'a> {
    Shared(&'a Arc<dyn UnitOfWork>),
    Owned(Arc<dyn UnitOfWork>),
}

impl UnitHandle<'_> {
    fn unit(&self) -> &dyn UnitOfWork {
        match self {
            UnitHandle::Shared(unit) => unit.as_ref(),
            UnitHandle::Owned(unit) => unit.as_ref(),
        }
    }

    /// Complete a dedicated unit; a shared unit stays open for its owner.
    fn finish(self) -> EngineResult<()> {
        match self {
            UnitHandle::Shared(_) => Ok(()),
            UnitHandle::Owned(unit) => unit.complete(),
        }
    }
}

/// The orchestrator. Holds the strategy, the unit-of-work factory for
/// top-level calls, and the runtime options.
pub struct Repository {
    strategy: Arc<SqlStrategy>,
    factory: Arc<dyn UnitOfWorkFactory>,
    config: RepositoryConfig,
}

impl Repository {
    pub fn new(strategy: Arc<SqlStrategy>, factory: Arc<dyn UnitOfWorkFactory>) -> Self {
        Self {
            strategy,
            factory,
            config: RepositoryConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Open a shareable context so several operations run in one
    /// transaction. The caller completes it after the last operation.
    pub fn begin_context(&self) -> EngineResult<DbContext> {
        Ok(DbContext::new(self.factory.begin()?))
    }

    /// Load a fresh model through a prototype carrying the primary key.
    pub fn load<M: TableModel>(&self, ctx: Option<&DbContext>, prototype: M) -> EngineResult<M> {
        let mut model = prototype;
        let command = self.compile(ctx, || self.strategy.select_by_key(&model))?;
        model.before_load();
        let handle = self.unit(ctx)?;
        Self::read_single(handle.unit(), &command, "load", &mut model)?;
        model.mark();
        model.after_load();
        handle.finish()?;
        Ok(model)
    }

    /// Re-read an existing model in place, keyed on its primary key.
    pub fn fill<M: TableModel>(&self, ctx: Option<&DbContext>, model: &mut M) -> EngineResult<()> {
        let command = self.compile(ctx, || self.strategy.select_by_key(model))?;
        model.before_fill();
        let handle = self.unit(ctx)?;
        Self::read_single(handle.unit(), &command, "fill", model)?;
        model.mark();
        model.after_fill();
        handle.finish()
    }

    /// Multi-row read. No affected-row contract is enforced. Top-level
    /// calls return a fully materialized stream; under an ambient context
    /// the stream maps records as it is pulled.
    pub fn find<M: TableModel>(
        &self,
        ctx: Option<&DbContext>,
        query: &Query,
    ) -> EngineResult<ModelStream<M>> {
        let command = self.compile(ctx, || self.strategy.select_query::<M>(query))?;
        M::before_find(query);
        let stream = match ctx {
            Some(context) => {
                let unit = context.unit();
                let set = Self::guarded(unit.as_ref(), unit.execute_records(&command.command))?;
                let records = set
                    .records
                    .ok_or_else(|| Self::fail(unit.as_ref(), ExecutionError::MissingRecords))?;
                if self.config.eager_results {
                    ModelStream::eager(Self::materialize(unit.as_ref(), &command, records)?)
                } else {
                    ModelStream::lazy(records, command, Arc::clone(unit))
                }
            }
            None => {
                let owned = self.factory.begin()?;
                let set =
                    Self::guarded(owned.as_ref(), owned.execute_records(&command.command))?;
                let records = set
                    .records
                    .ok_or_else(|| Self::fail(owned.as_ref(), ExecutionError::MissingRecords))?;
                let models = Self::materialize(owned.as_ref(), &command, records)?;
                owned.complete()?;
                ModelStream::eager(models)
            }
        };
        M::after_find();
        Ok(stream)
    }

    /// Persist the model: insert when new, update otherwise. Returns
    /// `false` on the concurrency/nullipotency conflict path — the unit is
    /// marked divergent, the conflict hook fires once, and `is_new` stays
    /// unchanged. On a successful insert without batch-scope identity the
    /// generated key is fetched with a strict identify command.
    pub fn save<M: TableModel>(&self, ctx: Option<&DbContext>, model: &mut M) -> EngineResult<bool> {
        let was_new = model.is_new();
        let command = self.compile(ctx, || {
            if was_new {
                self.strategy.insert(model)
            } else {
                self.strategy.update(model)
            }
        })?;
        model.before_save();
        let handle = self.unit(ctx)?;
        let unit = handle.unit();

        let set = Self::guarded(unit, unit.execute_records(&command.command))?;
        if set.affected <= command.command.expected_affected() {
            unit.divergent();
            warn!(
                operation = if was_new { "insert" } else { "update" },
                expected = command.command.expected_affected(),
                actual = set.affected,
                "write conflict: affected rows did not exceed the expected baseline"
            );
            model.on_save_conflict();
            return Ok(false);
        }

        // Batch-scope identity comes back as the write's own record.
        if let Some(mut records) = set.records {
            if let Some(record) = records.next() {
                Self::guarded(unit, command.map_record(&record, model))?;
            }
        }

        if was_new && !command.command.batch_scope_identity() {
            let identify = Self::guarded(unit, self.strategy.identify::<M>())?;
            Self::read_single(unit, &identify, "identify", model)?;
        }

        model.mark();
        model.after_save();
        handle.finish()?;
        debug!(was_new, "save complete");
        Ok(true)
    }

    /// Delete the model's row. Shares the write conflict policy with
    /// [`Repository::save`].
    pub fn discard<M: TableModel>(
        &self,
        ctx: Option<&DbContext>,
        model: &mut M,
    ) -> EngineResult<bool> {
        let command = self.compile(ctx, || self.strategy.delete(model))?;
        model.before_discard();
        let handle = self.unit(ctx)?;
        let unit = handle.unit();

        let set = Self::guarded(unit, unit.execute_records(&command.command))?;
        if set.affected <= command.command.expected_affected() {
            unit.divergent();
            warn!(
                operation = "delete",
                expected = command.command.expected_affected(),
                actual = set.affected,
                "write conflict: affected rows did not exceed the expected baseline"
            );
            model.on_save_conflict();
            return Ok(false);
        }

        model.after_discard();
        handle.finish()?;
        Ok(true)
    }

    /// Call a stored procedure. No affected-row contract is enforced;
    /// resultsets stream lazily under an ambient context and are fully
    /// drained for top-level calls.
    pub fn execute<C, R, O>(
        &self,
        ctx: Option<&DbContext>,
        call: &mut C,
    ) -> EngineResult<ProcedureReturn<R, O>>
    where
        C: CallModel,
        R: ResultModel + Clone,
        O: OutputModel,
    {
        let command: CompiledCommand<R> = self.compile(ctx, || self.strategy.call::<C, R>(call))?;
        call.before_execute();
        let disable_guard = !self.config.check_reentrancy;

        let result = match ctx {
            Some(context) => {
                let unit = context.unit().as_ref();
                let produced = Self::guarded(unit, unit.execute_resultsets(&command.command))?;
                let records = produced
                    .records
                    .ok_or_else(|| Self::fail(unit, ExecutionError::MissingRecords))?;
                let lazy =
                    ProcedureReturn::lazy(command, records, produced.outputs, disable_guard);
                if self.config.eager_results {
                    Self::guarded(unit, lazy.materialize())?
                } else {
                    lazy
                }
            }
            None => {
                let owned = self.factory.begin()?;
                let unit = owned.as_ref();
                let produced = Self::guarded(unit, unit.execute_resultsets(&command.command))?;
                let records = produced
                    .records
                    .ok_or_else(|| Self::fail(unit, ExecutionError::MissingRecords))?;
                let drained = Self::guarded(
                    unit,
                    ProcedureReturn::lazy(command, records, produced.outputs, disable_guard)
                        .materialize(),
                )?;
                owned.complete()?;
                drained
            }
        };

        call.after_execute();
        Ok(result)
    }

    fn unit<'a>(&self, ctx: Option<&'a DbContext>) -> EngineResult<UnitHandle<'a>> {
        match ctx {
            Some(context) => Ok(UnitHandle::Shared(context.unit())),
            None => Ok(UnitHandle::Owned(self.factory.begin()?)),
        }
    }

    /// Run the compile step; a compile failure poisons the ambient unit so
    /// the caller cannot commit around it.
    fn compile<T>(
        &self,
        ctx: Option<&DbContext>,
        build: impl FnOnce() -> EngineResult<T>,
    ) -> EngineResult<T> {
        build().map_err(|error| {
            if let Some(context) = ctx {
                context.unit().divergent();
            }
            error
        })
    }

    fn fail(unit: &dyn UnitOfWork, error: impl Into<EngineError>) -> EngineError {
        unit.divergent();
        error.into()
    }

    fn guarded<T>(unit: &dyn UnitOfWork, result: EngineResult<T>) -> EngineResult<T> {
        result.map_err(|error| {
            unit.divergent();
            error
        })
    }

    /// Execute a single-row command and map its record onto the model,
    /// enforcing the strict affected-row contract.
    fn read_single<M: TableModel>(
        unit: &dyn UnitOfWork,
        command: &CompiledCommand<M>,
        operation: &'static str,
        model: &mut M,
    ) -> EngineResult<()> {
        let set = Self::guarded(unit, unit.execute_records(&command.command))?;
        if set.affected != command.command.expected_affected() {
            return Err(Self::fail(
                unit,
                ExecutionError::ConcurrencyViolation {
                    operation,
                    expected: command.command.expected_affected(),
                    actual: set.affected,
                },
            ));
        }
        let mut records = set
            .records
            .ok_or_else(|| Self::fail(unit, ExecutionError::MissingRecords))?;
        let record = records
            .next()
            .ok_or_else(|| Self::fail(unit, ExecutionError::MissingRecords))?;
        Self::guarded(unit, command.map_record(&record, model))?;
        Ok(())
    }

    fn materialize<M: TableModel>(
        unit: &dyn UnitOfWork,
        command: &CompiledCommand<M>,
        records: RecordIter,
    ) -> EngineResult<Vec<M>> {
        let mut models = Vec::new();
        for record in records {
            let mut model = M::default();
            model.before_load();
            Self::guarded(unit, command.map_record(&record, &mut model))?;
            model.mark();
            model.after_load();
            models.push(model);
        }
        Ok(models)
    }
}

enum StreamInner<M: TableModel> {
    Lazy {
        records: RecordIter,
        command: CompiledCommand<M>,
        unit: Arc<dyn UnitOfWork>,
    },
    Eager(std::vec::IntoIter<M>),
}

/// Result of a multi-row find: either a fully materialized model list
/// (top-level calls, eager repositories) or a pull-driven mapping over the
/// ambient transaction's record stream.
pub struct ModelStream<M: TableModel> {
    inner: StreamInner<M>,
}

impl<M: TableModel> ModelStream<M> {
    fn lazy(records: RecordIter, command: CompiledCommand<M>, unit: Arc<dyn UnitOfWork>) -> Self {
        Self {
            inner: StreamInner::Lazy {
                records,
                command,
                unit,
            },
        }
    }

    fn eager(models: Vec<M>) -> Self {
        Self {
            inner: StreamInner::Eager(models.into_iter()),
        }
    }

    pub fn is_eager(&self) -> bool {
        matches!(self.inner, StreamInner::Eager(_))
    }

    /// Drain the stream, failing on the first mapping error.
    pub fn collect_all(self) -> EngineResult<Vec<M>> {
        self.collect()
    }
}

impl<M: TableModel> Iterator for ModelStream<M> {
    type Item = EngineResult<M>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            StreamInner::Eager(models) => models.next().map(Ok),
            StreamInner::Lazy {
                records,
                command,
                unit,
            } => {
                let record = records.next()?;
                let mut model = M::default();
                model.before_load();
                if let Err(error) = command.map_record(&record, &mut model) {
                    unit.divergent();
                    return Some(Err(error));
                }
                model.mark();
                model.after_load();
                Some(Ok(model))
            }
        }
    }
}
