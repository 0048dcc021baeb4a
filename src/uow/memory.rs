//! In-memory reference store.
//!
//! A transactional table store used by the test suite and by embedders who
//! need the engine without a network database. Commands are interpreted
//! structurally — operation verb, descriptor, named parameters, and the
//! source query — rather than by parsing SQL text. Each unit of work runs
//! against a private copy of the store and publishes it on `complete()`;
//! a divergent unit refuses to commit, and dropping a unit discards its
//! writes.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::command::{Command, CommandVerb, ParameterSet};
use crate::error::{EngineResult, ExecutionError};
use crate::expr::{BinaryOp, Expr, SortDirection, UnaryOp};
use crate::schema::TableSchema;
use crate::uow::{ProcedureRecords, Record, RecordIter, RecordSet, UnitOfWork, UnitOfWorkFactory};
use crate::value::{ProviderType, ScalarValue};

type Row = HashMap<String, ScalarValue>;

/// Procedure implementation: maps the call's parameter set to tagged result
/// records plus output/return parameter values.
pub type ProcedureHandler =
    Arc<dyn Fn(&ParameterSet) -> (Vec<Record>, HashMap<String, ScalarValue>) + Send + Sync>;

#[derive(Default, Clone)]
struct TableState {
    rows: Vec<Row>,
    serial: i64,
    last_identity: Option<ScalarValue>,
}

#[derive(Default, Clone)]
struct StoreState {
    tables: HashMap<String, TableState>,
}

/// Shared store root. Cheap to clone; clones share the same tables.
#[derive(Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    procedures: Arc<Mutex<HashMap<String, ProcedureHandler>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_procedure(&self, name: impl Into<String>, handler: ProcedureHandler) {
        self.procedures
            .lock()
            .expect("procedure registry poisoned")
            .insert(name.into(), handler);
    }

    /// Open a unit of work over a private copy of the current store state.
    pub fn begin_unit(&self) -> MemoryUnitOfWork {
        let snapshot = self.state.lock().expect("store poisoned").clone();
        MemoryUnitOfWork {
            shared: Arc::clone(&self.state),
            procedures: Arc::clone(&self.procedures),
            local: Mutex::new(snapshot),
            divergent: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        }
    }

    /// Committed row count, for assertions.
    pub fn row_count(&self, table: &str) -> usize {
        self.state
            .lock()
            .expect("store poisoned")
            .tables
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// Committed rows as records, for assertions.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.state
            .lock()
            .expect("store poisoned")
            .tables
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .map(|row| row.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl UnitOfWorkFactory for MemoryStore {
    fn begin(&self) -> EngineResult<Arc<dyn UnitOfWork>> {
        Ok(Arc::new(self.begin_unit()))
    }
}

/// One transaction against the memory store.
pub struct MemoryUnitOfWork {
    shared: Arc<Mutex<StoreState>>,
    procedures: Arc<Mutex<HashMap<String, ProcedureHandler>>>,
    local: Mutex<StoreState>,
    divergent: AtomicBool,
    completed: AtomicBool,
}

impl MemoryUnitOfWork {
    fn table_schema<'a>(&self, command: &'a Command) -> Result<&'a Arc<TableSchema>, ExecutionError> {
        command
            .table()
            .ok_or_else(|| ExecutionError::store("command carries no table descriptor"))
    }

    fn select(&self, command: &Command) -> Result<RecordSet, ExecutionError> {
        let schema = self.table_schema(command)?;
        let local = self.local.lock().expect("unit state poisoned");
        let empty = TableState::default();
        let table = local.tables.get(&schema.table).unwrap_or(&empty);

        let mut matched: Vec<Row> = Vec::new();
        for row in &table.rows {
            let keep = match command.query() {
                Some(query) => truthy(&eval(&query.filter, row)?),
                None => true,
            };
            if keep {
                matched.push(row.clone());
            }
        }

        if let Some(query) = command.query() {
            sort_rows(&mut matched, query)?;
        }

        let records: Vec<Record> = matched
            .iter()
            .map(|row| {
                let mut record = Record::new();
                for column in &schema.columns {
                    let value = row.get(&column.name).cloned().unwrap_or(ScalarValue::Null);
                    record.set(column.name.clone(), value);
                }
                record
            })
            .collect();
        let affected = records.len() as u64;
        debug!(table = %schema.table, affected, "memory select");
        Ok(RecordSet {
            affected,
            records: Some(Box::new(records.into_iter()) as RecordIter),
        })
    }

    fn insert(&self, command: &Command) -> Result<RecordSet, ExecutionError> {
        let schema = self.table_schema(command)?;
        let mut local = self.local.lock().expect("unit state poisoned");
        let table = local.tables.entry(schema.table.clone()).or_default();

        let mut row: Row = HashMap::new();
        for parameter in command.parameters().iter() {
            row.insert(parameter.name.clone(), parameter.value.clone());
        }

        let mut key_record = Record::new();
        for column in schema.key_columns() {
            let value = match column.provider_type {
                ProviderType::Int16 | ProviderType::Int32 | ProviderType::Int64 => {
                    table.serial += 1;
                    match column.provider_type {
                        ProviderType::Int16 => ScalarValue::Int16(table.serial as i16),
                        ProviderType::Int32 => ScalarValue::Int32(table.serial as i32),
                        _ => ScalarValue::Int64(table.serial),
                    }
                }
                ProviderType::Uuid => ScalarValue::Uuid(Uuid::new_v4()),
                other => {
                    return Err(ExecutionError::store(format!(
                        "cannot generate a key of type {other:?} for table '{}'",
                        schema.table
                    )))
                }
            };
            row.insert(column.name.clone(), value.clone());
            table.last_identity = Some(value.clone());
            key_record.set(column.name.clone(), value);
        }
        table.rows.push(row);
        debug!(table = %schema.table, "memory insert");

        let records: RecordIter = if command.batch_scope_identity() {
            Box::new(std::iter::once(key_record))
        } else {
            Box::new(std::iter::empty())
        };
        Ok(RecordSet {
            affected: 1,
            records: Some(records),
        })
    }

    fn key_matches(&self, schema: &TableSchema, command: &Command, row: &Row) -> bool {
        schema.key_columns().iter().all(|column| {
            command
                .parameters()
                .get(&column.name)
                .map(|p| row.get(&column.name) == Some(&p.value))
                .unwrap_or(false)
        })
    }

    fn update(&self, command: &Command) -> Result<RecordSet, ExecutionError> {
        let schema = Arc::clone(self.table_schema(command)?);
        let mut local = self.local.lock().expect("unit state poisoned");
        let table = local.tables.entry(schema.table.clone()).or_default();

        let mut affected = 0u64;
        let updates: Vec<(String, ScalarValue)> = schema
            .writable_columns()
            .iter()
            .filter_map(|column| {
                command
                    .parameters()
                    .get(&column.name)
                    .map(|p| (column.name.clone(), p.value.clone()))
            })
            .collect();
        for row in table.rows.iter_mut() {
            if self.key_matches(&schema, command, row) {
                for (name, value) in &updates {
                    row.insert(name.clone(), value.clone());
                }
                affected += 1;
            }
        }
        debug!(table = %schema.table, affected, "memory update");
        Ok(RecordSet {
            affected,
            records: Some(Box::new(std::iter::empty())),
        })
    }

    fn delete(&self, command: &Command) -> Result<RecordSet, ExecutionError> {
        let schema = Arc::clone(self.table_schema(command)?);
        let mut local = self.local.lock().expect("unit state poisoned");
        let table = local.tables.entry(schema.table.clone()).or_default();

        let before = table.rows.len();
        let rows = std::mem::take(&mut table.rows);
        table.rows = rows
            .into_iter()
            .filter(|row| !self.key_matches(&schema, command, row))
            .collect();
        let affected = (before - table.rows.len()) as u64;
        debug!(table = %schema.table, affected, "memory delete");
        Ok(RecordSet {
            affected,
            records: Some(Box::new(std::iter::empty())),
        })
    }

    fn identify(&self, command: &Command) -> Result<RecordSet, ExecutionError> {
        let schema = self.table_schema(command)?;
        let key = schema
            .identity_column()
            .map_err(|e| ExecutionError::store(e.to_string()))?;
        let local = self.local.lock().expect("unit state poisoned");
        match local
            .tables
            .get(&schema.table)
            .and_then(|t| t.last_identity.clone())
        {
            Some(value) => {
                let mut record = Record::new();
                record.set(key.name.clone(), value);
                Ok(RecordSet {
                    affected: 1,
                    records: Some(Box::new(std::iter::once(record))),
                })
            }
            None => Ok(RecordSet {
                affected: 0,
                records: Some(Box::new(std::iter::empty())),
            }),
        }
    }
}

impl UnitOfWork for MemoryUnitOfWork {
    fn execute_records(&self, command: &Command) -> EngineResult<RecordSet> {
        let result = match command.verb() {
            CommandVerb::Select => self.select(command),
            CommandVerb::Insert => self.insert(command),
            CommandVerb::Update => self.update(command),
            CommandVerb::Delete => self.delete(command),
            CommandVerb::Identify => self.identify(command),
            CommandVerb::Call => Err(ExecutionError::store(
                "procedure commands go through execute_resultsets",
            )),
        };
        result.map_err(Into::into)
    }

    fn execute_resultsets(&self, command: &Command) -> EngineResult<ProcedureRecords> {
        if command.verb() != CommandVerb::Call {
            return Err(ExecutionError::store("not a procedure command").into());
        }
        let name = command
            .procedure()
            .map(|p| p.procedure.clone())
            .ok_or_else(|| ExecutionError::store("command carries no procedure descriptor"))?;
        let handler = self
            .procedures
            .lock()
            .expect("procedure registry poisoned")
            .get(&name)
            .cloned()
            .ok_or_else(|| {
                ExecutionError::store(format!("no procedure registered under '{name}'"))
            })?;

        let (mut records, outputs) = handler(command.parameters());
        // The store contract hands resultsets over in ascending tag order.
        records.sort_by_key(|r| r.resultset());
        debug!(procedure = %name, records = records.len(), "memory procedure call");
        Ok(ProcedureRecords {
            records: Some(Box::new(records.into_iter())),
            outputs,
        })
    }

    fn divergent(&self) {
        if !self.divergent.swap(true, Ordering::AcqRel) {
            warn!("unit of work marked divergent");
        }
    }

    fn is_divergent(&self) -> bool {
        self.divergent.load(Ordering::Acquire)
    }

    fn complete(&self) -> EngineResult<()> {
        if self.is_divergent() {
            return Err(ExecutionError::DivergentUnit.into());
        }
        if self.completed.swap(true, Ordering::AcqRel) {
            return Err(ExecutionError::store("unit of work already completed").into());
        }
        let local = self.local.lock().expect("unit state poisoned").clone();
        *self.shared.lock().expect("store poisoned") = local;
        Ok(())
    }
}

// ── structural predicate evaluation ──────────────────────────

fn truthy(value: &ScalarValue) -> bool {
    value.as_bool().unwrap_or(false)
}

fn to_f64(value: &ScalarValue) -> Option<f64> {
    match value {
        ScalarValue::Float64(v) => Some(*v),
        other => other.as_i64().map(|v| v as f64),
    }
}

fn compare(left: &ScalarValue, right: &ScalarValue) -> Option<CmpOrdering> {
    use ScalarValue::*;
    match (left, right) {
        (Null, _) | (_, Null) => None,
        (Text(a), Text(b)) => Some(a.cmp(b)),
        (Bool(a), Bool(b)) => Some(a.cmp(b)),
        (Uuid(a), Uuid(b)) => Some(a.cmp(b)),
        (Date(a), Date(b)) => Some(a.cmp(b)),
        (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
        (Decimal(a), Decimal(b)) => Some(a.cmp(b)),
        (Bytes(a), Bytes(b)) => Some(a.cmp(b)),
        _ => {
            if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
                Some(a.cmp(&b))
            } else {
                let (a, b) = (to_f64(left)?, to_f64(right)?);
                a.partial_cmp(&b)
            }
        }
    }
}

fn arithmetic(
    op: BinaryOp,
    left: &ScalarValue,
    right: &ScalarValue,
) -> Result<ScalarValue, ExecutionError> {
    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div => a.checked_div(b),
            BinaryOp::Mod => a.checked_rem(b),
            BinaryOp::BitAnd => Some(a & b),
            BinaryOp::BitOr => Some(a | b),
            BinaryOp::BitXor => Some(a ^ b),
            _ => None,
        };
        return result
            .map(ScalarValue::Int64)
            .ok_or_else(|| ExecutionError::store("integer arithmetic failed"));
    }
    let (a, b) = match (to_f64(left), to_f64(right)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(ExecutionError::store(format!(
                "cannot apply '{}' to {} and {}",
                op.name(),
                left.type_name(),
                right.type_name()
            )))
        }
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => {
            return Err(ExecutionError::store(format!(
                "'{}' needs integer operands",
                op.name()
            )))
        }
    };
    Ok(ScalarValue::Float64(result))
}

/// SQL LIKE with `%` and `_` wildcards.
fn like_match(text: &str, pattern: &str) -> bool {
    fn matches(text: &[char], pattern: &[char]) -> bool {
        match pattern.split_first() {
            None => text.is_empty(),
            Some((&'%', rest)) => (0..=text.len()).any(|i| matches(&text[i..], rest)),
            Some((&'_', rest)) => !text.is_empty() && matches(&text[1..], rest),
            Some((c, rest)) => text.first() == Some(c) && matches(&text[1..], rest),
        }
    }
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    matches(&text, &pattern)
}

/// Evaluate a filter expression against one row. Constants are evaluated
/// inline; this mirrors the rendered SQL without going through a parser.
fn eval(expr: &Expr, row: &Row) -> Result<ScalarValue, ExecutionError> {
    match expr {
        Expr::Nullary => Ok(ScalarValue::Bool(true)),
        Expr::Surface { column } => Ok(row.get(column).cloned().unwrap_or(ScalarValue::Null)),
        Expr::Value(value) => Ok(value.clone()),
        Expr::Container(Some(inner)) => eval(inner, row),
        Expr::Container(None) => Ok(ScalarValue::Bool(true)),
        Expr::Unary { op, operand } => {
            let value = eval(operand, row)?;
            match op {
                UnaryOp::Not => Ok(ScalarValue::Bool(!truthy(&value))),
                UnaryOp::IsNull => Ok(ScalarValue::Bool(value.is_null())),
                UnaryOp::IsNotNull => Ok(ScalarValue::Bool(!value.is_null())),
                UnaryOp::Identity => Ok(value),
                UnaryOp::Negate => arithmetic(BinaryOp::Sub, &ScalarValue::Int64(0), &value),
                UnaryOp::Increment => arithmetic(BinaryOp::Add, &value, &ScalarValue::Int64(1)),
                UnaryOp::Decrement => arithmetic(BinaryOp::Sub, &value, &ScalarValue::Int64(1)),
                UnaryOp::BitNot => value
                    .as_i64()
                    .map(|v| ScalarValue::Int64(!v))
                    .ok_or_else(|| ExecutionError::store("'~' needs an integer operand")),
                UnaryOp::Convert => Err(ExecutionError::store("convert is not evaluatable")),
            }
        }
        Expr::Binary { op, left, right } => {
            let l = eval(left, row)?;
            let r = eval(right, row)?;
            match op {
                BinaryOp::And => Ok(ScalarValue::Bool(truthy(&l) && truthy(&r))),
                BinaryOp::Or => Ok(ScalarValue::Bool(truthy(&l) || truthy(&r))),
                BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt
                | BinaryOp::Le => {
                    let ordering = compare(&l, &r);
                    let result = match (op, ordering) {
                        (_, None) => false,
                        (BinaryOp::Eq, Some(o)) => o == CmpOrdering::Equal,
                        (BinaryOp::Ne, Some(o)) => o != CmpOrdering::Equal,
                        (BinaryOp::Gt, Some(o)) => o == CmpOrdering::Greater,
                        (BinaryOp::Ge, Some(o)) => o != CmpOrdering::Less,
                        (BinaryOp::Lt, Some(o)) => o == CmpOrdering::Less,
                        (BinaryOp::Le, Some(o)) => o != CmpOrdering::Greater,
                        _ => unreachable!(),
                    };
                    Ok(ScalarValue::Bool(result))
                }
                BinaryOp::Like => match (l.as_text(), r.as_text()) {
                    (Some(text), Some(pattern)) => {
                        Ok(ScalarValue::Bool(like_match(text, pattern)))
                    }
                    _ => Ok(ScalarValue::Bool(false)),
                },
                BinaryOp::Add
                | BinaryOp::Sub
                | BinaryOp::Mul
                | BinaryOp::Div
                | BinaryOp::Mod
                | BinaryOp::BitAnd
                | BinaryOp::BitOr
                | BinaryOp::BitXor => arithmetic(*op, &l, &r),
                BinaryOp::Power | BinaryOp::ShiftLeft | BinaryOp::ShiftRight => Err(
                    ExecutionError::store(format!("'{}' is not evaluatable", op.name())),
                ),
            }
        }
        Expr::Call { name, .. } => Err(ExecutionError::store(format!(
            "function '{name}' is not evaluatable"
        ))),
    }
}

fn sort_rows(rows: &mut [Row], query: &crate::expr::Query) -> Result<(), ExecutionError> {
    if query.sort.iter().all(|s| s.column.is_none()) {
        return Ok(());
    }
    // Precompute keys so evaluation errors surface instead of being
    // swallowed inside the comparator.
    let mut keyed: Vec<(Vec<ScalarValue>, Row)> = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        let mut keys = Vec::new();
        for spec in &query.sort {
            if let Some(column) = &spec.column {
                keys.push(eval(column, row)?);
            }
        }
        keyed.push((keys, row.clone()));
    }
    keyed.sort_by(|(a, _), (b, _)| {
        for (i, spec) in query.sort.iter().filter(|s| s.column.is_some()).enumerate() {
            let ordering = compare(&a[i], &b[i]).unwrap_or(CmpOrdering::Equal);
            let ordering = match spec.direction {
                Some(SortDirection::Descending) => ordering.reverse(),
                _ => ordering,
            };
            if ordering != CmpOrdering::Equal {
                return ordering;
            }
        }
        CmpOrdering::Equal
    });
    for (slot, (_, row)) in rows.iter_mut().zip(keyed) {
        *slot = row;
    }
    Ok(())
}
