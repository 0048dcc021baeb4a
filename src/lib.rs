//! relmodel — a minimal object-relational execution engine.
//!
//! The crate compiles declarative model and query descriptions into
//! parameterized SQL commands, executes them against a transactional store
//! behind the [`uow::UnitOfWork`] boundary, streams results lazily, and
//! enforces optimistic-concurrency and re-entrancy invariants.
//!
//! The moving parts, leaves first:
//!
//! - [`command`] — compiled command descriptors with their affected-row
//!   contracts and enumeration guards.
//! - [`expr`] — the filter/sort algebra and its SQL renderer.
//! - [`strategy`] — the command builder, parameterized end to end, with the
//!   provider dialect seam.
//! - [`repository`] — the orchestrator: load, fill, find, save, discard,
//!   and stored-procedure execution, with explicit transaction threading.
//!
//! Schemas are declared ahead of time in a [`schema::SchemaRegistry`];
//! models bridge to the engine through [`model::FieldAccess`] and receive
//! lifecycle notifications through [`model::ModelEvents`]. The
//! [`uow::memory::MemoryStore`] reference store backs the test suite and
//! embedded use.

pub mod command;
pub mod error;
pub mod expr;
pub mod model;
pub mod repository;
pub mod schema;
pub mod strategy;
pub mod uow;
pub mod value;

pub use command::{
    Command, CommandBehavior, CommandKind, CommandVerb, CompiledCommand, EnumerationGuard,
    EnumerationState, Parameter, ParameterDirection, ParameterSet, RecordMapper,
};
pub use error::{
    CompileError, EngineError, EngineResult, ExecutionError, ExecutionResult, SchemaError,
    SchemaResult,
};
pub use expr::{BinaryOp, Expr, Query, SortDirection, SortSpec, UnaryOp};
pub use model::procedure::{ProcedureReturn, ResultsetIter, ResultsetModel};
pub use model::{CallModel, FieldAccess, ModelEvents, OutputModel, ResultModel, TableModel};
pub use repository::{ModelStream, Repository, RepositoryConfig};
pub use schema::{
    ColumnSchema, ProcedureParamSchema, ProcedureSchema, SchemaRegistry, TableSchema,
};
pub use strategy::dialect::{MssqlDialect, PostgresDialect, SqlDialect};
pub use strategy::SqlStrategy;
pub use uow::memory::{MemoryStore, MemoryUnitOfWork, ProcedureHandler};
pub use uow::{
    DbContext, ProcedureRecords, Record, RecordIter, RecordSet, UnitOfWork, UnitOfWorkFactory,
};
pub use value::{ProviderType, ScalarValue};
