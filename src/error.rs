//! Error taxonomy for the execution engine.
//!
//! Errors are split by the phase that raises them: schema lookups and
//! command compilation fail before any store access; execution errors carry
//! the affected-row contract and streaming failures. All fatal execution
//! errors mark the active unit of work divergent before they propagate.

use thiserror::Error;

/// Top-level error type for the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),
}

/// Mapping-descriptor failures, raised at compile time before store access.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("no descriptor registered for model type '{model}'")]
    UnknownModel { model: String },

    #[error("no procedure descriptor registered for call type '{call}'")]
    UnknownProcedure { call: String },

    #[error("table '{table}' declares no primary key")]
    MissingPrimaryKey { table: String },

    #[error("column '{column}' is not declared on table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("table '{table}' has no writable columns")]
    NoWritableColumns { table: String },

    #[error("model supplies no value for key column '{column}' of table '{table}'")]
    MissingKeyValue { table: String, column: String },

    #[error("identity retrieval requires a single-column key on table '{table}'")]
    AmbiguousIdentity { table: String },

    #[error("parameter '{name}' is already registered on this command")]
    DuplicateParameter { name: String },
}

/// Failures while rendering expressions or building a command.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("expression kind '{kind}' cannot be rendered to SQL")]
    UnsupportedExpression { kind: &'static str },

    #[error("operator '{operator}' cannot be rendered to SQL")]
    UnsupportedOperator { operator: &'static str },

    #[error("a constant leaf holds NULL; use IS NULL / IS NOT NULL instead")]
    NullConstant,

    #[error("descriptor error: {0}")]
    Schema(#[from] SchemaError),
}

/// Failures raised while executing a compiled command or streaming results.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The affected-row count violated the command's contract. Fatal for
    /// single-row reads and identity retrieval; the write path reports the
    /// same condition non-fatally by returning `false`.
    #[error("affected-row contract violated during {operation}: expected {expected}, actual {actual}")]
    ConcurrencyViolation {
        operation: &'static str,
        expected: u64,
        actual: u64,
    },

    #[error("enumeration restarted while a prior pass is still in progress")]
    ReentrantEnumeration,

    #[error("the store returned no record sequence")]
    MissingRecords,

    #[error("unit of work is divergent and cannot be committed")]
    DivergentUnit,

    #[error("store error: {message}")]
    Store { message: String },
}

impl ExecutionError {
    pub fn store(message: impl Into<String>) -> Self {
        ExecutionError::Store {
            message: message.into(),
        }
    }
}

impl From<SchemaError> for EngineError {
    fn from(error: SchemaError) -> Self {
        EngineError::Compile(CompileError::Schema(error))
    }
}

/// Result type aliases for convenience
pub type EngineResult<T> = Result<T, EngineError>;
pub type CompileResult<T> = Result<T, CompileError>;
pub type SchemaResult<T> = Result<T, SchemaError>;
pub type ExecutionResult<T> = Result<T, ExecutionError>;
