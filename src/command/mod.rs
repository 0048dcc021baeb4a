//! Compiled command descriptors.
//!
//! A [`Command`] is the immutable-per-execution product of the strategy:
//! SQL text, parameters, the affected-row contract, and the enumeration
//! guard. [`CompiledCommand`] pairs a command with the record mapper for
//! one model type. Commands carry no store handles; executing them is the
//! unit of work's job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{EngineResult, ExecutionError, ExecutionResult, SchemaError, SchemaResult};
use crate::expr::Query;
use crate::schema::{ProcedureSchema, TableSchema};
use crate::uow::Record;
use crate::value::{ProviderType, ScalarValue};

/// How the command text is interpreted by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Text,
    Procedure,
}

/// The operation the command was compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandVerb {
    Select,
    Insert,
    Update,
    Delete,
    Identify,
    Call,
}

impl CommandVerb {
    pub fn name(self) -> &'static str {
        match self {
            CommandVerb::Select => "select",
            CommandVerb::Insert => "insert",
            CommandVerb::Update => "update",
            CommandVerb::Delete => "delete",
            CommandVerb::Identify => "identify",
            CommandVerb::Call => "call",
        }
    }
}

/// Execution behavior hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBehavior {
    Standard,
    SingleRow,
}

/// Parameter direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterDirection {
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

/// One command parameter.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub direction: ParameterDirection,
    pub provider_type: ProviderType,
    pub nullable: bool,
    pub size: Option<u32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub value: ScalarValue,
}

impl Parameter {
    pub fn input(
        name: impl Into<String>,
        provider_type: ProviderType,
        value: ScalarValue,
    ) -> Self {
        Self {
            name: name.into(),
            direction: ParameterDirection::Input,
            provider_type,
            nullable: value.is_null(),
            size: None,
            precision: None,
            scale: None,
            value,
        }
    }

    pub fn output(name: impl Into<String>, provider_type: ProviderType) -> Self {
        Self {
            name: name.into(),
            direction: ParameterDirection::Output,
            provider_type,
            nullable: true,
            size: None,
            precision: None,
            scale: None,
            value: ScalarValue::Null,
        }
    }

    pub fn return_value(name: impl Into<String>, provider_type: ProviderType) -> Self {
        Self {
            name: name.into(),
            direction: ParameterDirection::ReturnValue,
            provider_type,
            nullable: true,
            size: None,
            precision: None,
            scale: None,
            value: ScalarValue::Null,
        }
    }
}

/// Ordered parameter list, keyed by name. Names are unique within one
/// command; the set also allocates fresh collision-free names for constant
/// leaves registered by the expression compiler.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    items: Vec<Parameter>,
    index: HashMap<String, usize>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, parameter: Parameter) -> SchemaResult<()> {
        if self.index.contains_key(&parameter.name) {
            return Err(SchemaError::DuplicateParameter {
                name: parameter.name.clone(),
            });
        }
        self.index.insert(parameter.name.clone(), self.items.len());
        self.items.push(parameter);
        Ok(())
    }

    /// Allocate a parameter name that does not collide with any registered
    /// name. Constant leaves get `p0`, `p1`, ... in registration order.
    pub fn fresh_name(&self) -> String {
        let mut n = self.items.len();
        loop {
            let candidate = format!("p{n}");
            if !self.index.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.index.get(name).map(|i| &self.items[*i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|p| p.name.as_str())
    }
}

/// Enumeration guard state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationState {
    NotStarted,
    InProgress,
    Completed,
}

const STATE_NOT_STARTED: u8 = 0;
const STATE_IN_PROGRESS: u8 = 1;
const STATE_COMPLETED: u8 = 2;

/// Explicit cursor state for one command's enumeration. Detects a
/// previously abandoned enumeration being restarted; it is not a substitute
/// for real concurrency control.
#[derive(Debug, Default)]
pub struct EnumerationGuard {
    state: AtomicU8,
}

impl EnumerationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> EnumerationState {
        match self.state.load(Ordering::Acquire) {
            STATE_IN_PROGRESS => EnumerationState::InProgress,
            STATE_COMPLETED => EnumerationState::Completed,
            _ => EnumerationState::NotStarted,
        }
    }

    /// Begin an enumeration pass. Fails when a prior pass is still open,
    /// unless re-entrancy checking is disabled.
    pub fn enter(&self, disable_guard: bool) -> ExecutionResult<()> {
        if self.state() == EnumerationState::InProgress && !disable_guard {
            return Err(ExecutionError::ReentrantEnumeration);
        }
        self.state.store(STATE_IN_PROGRESS, Ordering::Release);
        Ok(())
    }

    /// Finish the open pass.
    pub fn leave(&self) {
        self.state.store(STATE_COMPLETED, Ordering::Release);
    }
}

/// A compiled store operation plus its success contract. All descriptor
/// fields are read-only after compilation.
#[derive(Clone)]
pub struct Command {
    pub(crate) verb: CommandVerb,
    pub(crate) kind: CommandKind,
    pub(crate) text: String,
    pub(crate) prepare: bool,
    pub(crate) timeout: Duration,
    pub(crate) behavior: CommandBehavior,
    pub(crate) expected_affected: u64,
    pub(crate) nullipotent: bool,
    pub(crate) batch_scope_identity: bool,
    pub(crate) table: Option<Arc<TableSchema>>,
    pub(crate) procedure: Option<Arc<ProcedureSchema>>,
    pub(crate) query: Option<Query>,
    pub(crate) parameters: ParameterSet,
    pub(crate) guard: Arc<EnumerationGuard>,
}

impl Command {
    pub(crate) fn new(verb: CommandVerb, kind: CommandKind, text: String) -> Self {
        Self {
            verb,
            kind,
            text,
            prepare: false,
            timeout: Duration::from_secs(30),
            behavior: CommandBehavior::Standard,
            expected_affected: 0,
            nullipotent: false,
            batch_scope_identity: false,
            table: None,
            procedure: None,
            query: None,
            parameters: ParameterSet::new(),
            guard: Arc::new(EnumerationGuard::new()),
        }
    }

    pub fn verb(&self) -> CommandVerb {
        self.verb
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn prepare(&self) -> bool {
        self.prepare
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn behavior(&self) -> CommandBehavior {
        self.behavior
    }

    /// The affected-row contract, fixed by the strategy at compile time.
    pub fn expected_affected(&self) -> u64 {
        self.expected_affected
    }

    pub fn is_nullipotent(&self) -> bool {
        self.nullipotent
    }

    pub fn batch_scope_identity(&self) -> bool {
        self.batch_scope_identity
    }

    pub fn table(&self) -> Option<&Arc<TableSchema>> {
        self.table.as_ref()
    }

    pub fn procedure(&self) -> Option<&Arc<ProcedureSchema>> {
        self.procedure.as_ref()
    }

    /// The source query this command was compiled from, when it had one.
    pub fn query(&self) -> Option<&Query> {
        self.query.as_ref()
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    pub fn enumeration_state(&self) -> EnumerationState {
        self.guard.state()
    }

    /// See [`EnumerationGuard::enter`].
    pub fn enter_enumeration(&self, disable_guard: bool) -> ExecutionResult<()> {
        self.guard.enter(disable_guard)
    }

    /// See [`EnumerationGuard::leave`].
    pub fn leave_enumeration(&self) {
        self.guard.leave()
    }

    pub(crate) fn guard(&self) -> Arc<EnumerationGuard> {
        Arc::clone(&self.guard)
    }
}

/// Record-to-model mapping function, injected into the compiled command.
pub type RecordMapper<M> = Arc<dyn Fn(&Record, &mut M) -> EngineResult<()> + Send + Sync>;

/// A command paired with the record mapper for one model type.
#[derive(Clone)]
pub struct CompiledCommand<M> {
    pub command: Command,
    mapper: RecordMapper<M>,
}

impl<M> CompiledCommand<M> {
    pub(crate) fn new(command: Command, mapper: RecordMapper<M>) -> Self {
        Self { command, mapper }
    }

    pub fn map_record(&self, record: &Record, model: &mut M) -> EngineResult<()> {
        (self.mapper)(record, model)
    }

    pub fn mapper(&self) -> RecordMapper<M> {
        Arc::clone(&self.mapper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_names_skip_registered() {
        let mut params = ParameterSet::new();
        params
            .add(Parameter::input("p0", ProviderType::Int32, 1i32.into()))
            .unwrap();
        assert_eq!(params.fresh_name(), "p1");
    }

    #[test]
    fn test_duplicate_parameter_rejected() {
        let mut params = ParameterSet::new();
        params
            .add(Parameter::input("name", ProviderType::Text, "a".into()))
            .unwrap();
        let dup = Parameter::input("name", ProviderType::Text, "b".into());
        assert!(matches!(
            params.add(dup),
            Err(SchemaError::DuplicateParameter { .. })
        ));
    }

    #[test]
    fn test_guard_reentry_detected() {
        let guard = EnumerationGuard::new();
        guard.enter(false).unwrap();
        assert!(matches!(
            guard.enter(false),
            Err(ExecutionError::ReentrantEnumeration)
        ));
        // Disabling the check allows the restart.
        guard.enter(true).unwrap();
        guard.leave();
        assert_eq!(guard.state(), EnumerationState::Completed);
        // A completed pass can be re-entered.
        guard.enter(false).unwrap();
    }

    #[test]
    fn test_parameter_order_preserved() {
        let mut params = ParameterSet::new();
        for name in ["c", "a", "b"] {
            params
                .add(Parameter::input(name, ProviderType::Text, name.into()))
                .unwrap();
        }
        let names: Vec<_> = params.names().collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }
}
