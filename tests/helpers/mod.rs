//! Shared fixtures for the integration suite: a small person model, a
//! stored-procedure family, engine builders over the memory store, and a
//! scripted unit-of-work double for forcing exact affected-row counts.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use relmodel::{
    CallModel, ColumnSchema, Command, EngineResult, ExecutionError, FieldAccess, MemoryStore,
    ModelEvents, MssqlDialect, ParameterDirection, ProcedureParamSchema, ProcedureRecords,
    ProcedureSchema, ProviderType, Record, RecordSet, Repository, ScalarValue, SchemaRegistry,
    SqlStrategy, TableModel, TableSchema, UnitOfWork, UnitOfWorkFactory, PostgresDialect,
};

// ── table model ──────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Person {
    pub person_id: Option<i64>,
    pub name: String,
    pub age: Option<i32>,
    pub email: Option<String>,
    pub is_new: bool,
    pub conflicts: usize,
}

impl Person {
    /// A fresh, unsaved row.
    pub fn new_row(name: &str, age: i32) -> Self {
        Self {
            name: name.to_string(),
            age: Some(age),
            is_new: true,
            ..Self::default()
        }
    }

    /// A prototype carrying only the primary key, for load/fill.
    pub fn keyed(person_id: i64) -> Self {
        Self {
            person_id: Some(person_id),
            ..Self::default()
        }
    }
}

impl FieldAccess for Person {
    fn get_field(&self, name: &str) -> Option<ScalarValue> {
        match name {
            "person_id" => Some(self.person_id.into()),
            "name" => Some(self.name.as_str().into()),
            "age" => Some(self.age.into()),
            "email" => Some(self.email.clone().into()),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: ScalarValue) -> EngineResult<()> {
        match name {
            "person_id" => self.person_id = value.as_i64(),
            "name" => self.name = value.as_text().unwrap_or_default().to_string(),
            "age" => self.age = value.as_i64().map(|v| v as i32),
            "email" => self.email = value.as_text().map(|s| s.to_string()),
            _ => {}
        }
        Ok(())
    }
}

impl ModelEvents for Person {
    fn on_save_conflict(&mut self) {
        self.conflicts += 1;
    }
}

impl TableModel for Person {
    fn is_new(&self) -> bool {
        self.is_new
    }

    fn mark(&mut self) {
        self.is_new = false;
    }
}

pub fn person_schema() -> TableSchema {
    TableSchema::new(
        "people",
        vec![
            ColumnSchema::new("person_id", ProviderType::Int64).primary_key(),
            ColumnSchema::new("name", ProviderType::Text).size(200),
            ColumnSchema::new("age", ProviderType::Int32).nullable(),
            ColumnSchema::new("email", ProviderType::Text).nullable().size(320),
        ],
    )
}

// ── procedure model family ───────────────────────────────────

/// Rows mapped by `AuditRow::set_field`, for laziness assertions. Tests
/// that read it must hold `COUNTER_LOCK` and reset the counter first.
pub static ROWS_MAPPED: AtomicUsize = AtomicUsize::new(0);
pub static COUNTER_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Default, Clone)]
pub struct AuditCall {
    pub cutoff: i64,
}

impl FieldAccess for AuditCall {
    fn get_field(&self, name: &str) -> Option<ScalarValue> {
        match name {
            "cutoff" => Some(self.cutoff.into()),
            _ => None,
        }
    }

    fn set_field(&mut self, _name: &str, _value: ScalarValue) -> EngineResult<()> {
        Ok(())
    }
}

impl CallModel for AuditCall {}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct AuditRow {
    pub line: String,
    pub count: i64,
}

impl FieldAccess for AuditRow {
    fn get_field(&self, name: &str) -> Option<ScalarValue> {
        match name {
            "line" => Some(self.line.as_str().into()),
            "count" => Some(self.count.into()),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: ScalarValue) -> EngineResult<()> {
        match name {
            "line" => {
                ROWS_MAPPED.fetch_add(1, Ordering::SeqCst);
                self.line = value.as_text().unwrap_or_default().to_string();
            }
            "count" => self.count = value.as_i64().unwrap_or_default(),
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct AuditOutput {
    pub total: i64,
    pub status: String,
}

impl FieldAccess for AuditOutput {
    fn get_field(&self, name: &str) -> Option<ScalarValue> {
        match name {
            "total" => Some(self.total.into()),
            "status" => Some(self.status.as_str().into()),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: ScalarValue) -> EngineResult<()> {
        match name {
            "total" => self.total = value.as_i64().unwrap_or_default(),
            "status" => self.status = value.as_text().unwrap_or_default().to_string(),
            _ => {}
        }
        Ok(())
    }
}

pub fn audit_schema() -> ProcedureSchema {
    ProcedureSchema::new(
        "audit_trail",
        vec![
            ProcedureParamSchema::new("cutoff", ParameterDirection::Input, ProviderType::Int64),
            ProcedureParamSchema::new("total", ParameterDirection::Output, ProviderType::Int64),
            ProcedureParamSchema::new("status", ParameterDirection::Output, ProviderType::Text),
        ],
    )
}

/// Register the reference `audit_trail` procedure: two rows tagged 0, one
/// tagged 1, outputs carrying the row total.
pub fn register_audit_procedure(store: &MemoryStore) {
    store.register_procedure(
        "audit_trail",
        Arc::new(|_params| {
            let mut r1 = Record::with_resultset(0);
            r1.set("line", "created").set("count", 10i64);
            let mut r2 = Record::with_resultset(0);
            r2.set("line", "updated").set("count", 20i64);
            let mut r3 = Record::with_resultset(1);
            r3.set("line", "deleted").set("count", 30i64);
            let mut outputs = HashMap::new();
            outputs.insert("total".to_string(), ScalarValue::Int64(3));
            outputs.insert("status".to_string(), ScalarValue::Text("ok".into()));
            (vec![r1, r2, r3], outputs)
        }),
    );
}

// ── engine builders ──────────────────────────────────────────

fn registry() -> Arc<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    registry.register_table::<Person>(person_schema());
    registry.register_procedure::<AuditCall>(audit_schema());
    Arc::new(registry)
}

pub fn pg_strategy() -> Arc<SqlStrategy> {
    Arc::new(SqlStrategy::new(registry(), Arc::new(PostgresDialect)))
}

/// Repository + store over the Postgres dialect (batch-scope identity).
pub fn pg_engine() -> (Repository, MemoryStore) {
    let store = MemoryStore::new();
    register_audit_procedure(&store);
    let repository = Repository::new(
        pg_strategy(),
        Arc::new(store.clone()) as Arc<dyn UnitOfWorkFactory>,
    );
    (repository, store)
}

/// Repository + store over the SQL Server dialect (separate identify step).
pub fn mssql_engine() -> (Repository, MemoryStore) {
    let store = MemoryStore::new();
    register_audit_procedure(&store);
    let strategy = Arc::new(SqlStrategy::new(registry(), Arc::new(MssqlDialect)));
    let repository = Repository::new(
        strategy,
        Arc::new(store.clone()) as Arc<dyn UnitOfWorkFactory>,
    );
    (repository, store)
}

// ── scripted unit-of-work double ─────────────────────────────

pub struct ScriptedResponse {
    pub affected: u64,
    pub records: Option<Vec<Record>>,
}

/// Replays queued responses and records every executed command text, for
/// tests that need exact affected-row counts the real store would not
/// produce.
#[derive(Default)]
pub struct ScriptedUnit {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    pub executed: Mutex<Vec<String>>,
    divergent: AtomicBool,
}

impl ScriptedUnit {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, affected: u64, records: Option<Vec<Record>>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(ScriptedResponse { affected, records });
    }
}

impl UnitOfWork for ScriptedUnit {
    fn execute_records(&self, command: &Command) -> EngineResult<RecordSet> {
        self.executed.lock().unwrap().push(command.text().to_string());
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ExecutionError::store("script exhausted"))?;
        Ok(RecordSet {
            affected: response.affected,
            records: response
                .records
                .map(|rows| Box::new(rows.into_iter()) as relmodel::RecordIter),
        })
    }

    fn execute_resultsets(&self, _command: &Command) -> EngineResult<ProcedureRecords> {
        Err(ExecutionError::store("scripted unit has no procedure support").into())
    }

    fn divergent(&self) {
        self.divergent.store(true, Ordering::SeqCst);
    }

    fn is_divergent(&self) -> bool {
        self.divergent.load(Ordering::SeqCst)
    }

    fn complete(&self) -> EngineResult<()> {
        if self.is_divergent() {
            return Err(ExecutionError::DivergentUnit.into());
        }
        Ok(())
    }
}

pub struct ScriptedFactory(pub Arc<ScriptedUnit>);

impl UnitOfWorkFactory for ScriptedFactory {
    fn begin(&self) -> EngineResult<Arc<dyn UnitOfWork>> {
        Ok(Arc::clone(&self.0) as Arc<dyn UnitOfWork>)
    }
}

/// Repository wired to a scripted unit.
pub fn scripted_engine() -> (Repository, Arc<ScriptedUnit>) {
    let unit = ScriptedUnit::new();
    let repository = Repository::new(pg_strategy(), Arc::new(ScriptedFactory(Arc::clone(&unit))));
    (repository, unit)
}
