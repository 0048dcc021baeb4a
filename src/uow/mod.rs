//! The unit-of-work boundary.
//!
//! The engine never talks to a database driver directly; it hands compiled
//! commands to a [`UnitOfWork`] and consumes lazy record sequences plus
//! affected-row counts. A unit marked divergent must not be committed.
//! [`memory`] provides the in-memory reference implementation.

pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use crate::command::Command;
use crate::error::EngineResult;
use crate::value::ScalarValue;

/// One store record: a field map plus the resultset index tag the record
/// belongs to (0 for table operations).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    resultset: usize,
    fields: HashMap<String, ScalarValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resultset(resultset: usize) -> Self {
        Self {
            resultset,
            fields: HashMap::new(),
        }
    }

    pub fn resultset(&self) -> usize {
        self.resultset
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ScalarValue>) -> &mut Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ScalarValue> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &ScalarValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, ScalarValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, ScalarValue)>>(iter: I) -> Self {
        Self {
            resultset: 0,
            fields: iter.into_iter().collect(),
        }
    }
}

/// Lazy record sequence. `None` from a store means the driver failed to
/// produce a sequence at all — a provider defect, reported fatally.
pub type RecordIter = Box<dyn Iterator<Item = Record>>;

/// Result of executing a record-producing command.
pub struct RecordSet {
    pub affected: u64,
    pub records: Option<RecordIter>,
}

/// Result of executing a procedure: records tagged with their resultset
/// index (ascending group order), plus output/return parameter values. The
/// repository harvests the outputs only after the records are drained.
pub struct ProcedureRecords {
    pub records: Option<RecordIter>,
    pub outputs: HashMap<String, ScalarValue>,
}

/// Transactional execution context owned by the caller or opened per
/// top-level repository call.
pub trait UnitOfWork: Send + Sync {
    fn execute_records(&self, command: &Command) -> EngineResult<RecordSet>;

    fn execute_resultsets(&self, command: &Command) -> EngineResult<ProcedureRecords>;

    /// Mark the unit unsafe to commit.
    fn divergent(&self);

    fn is_divergent(&self) -> bool;

    /// Commit. Fails on a divergent unit.
    fn complete(&self) -> EngineResult<()>;
}

/// Opens dedicated units for top-level repository calls.
pub trait UnitOfWorkFactory: Send + Sync {
    fn begin(&self) -> EngineResult<Arc<dyn UnitOfWork>>;
}

/// Explicit call-scoped context: nested repository calls that share a
/// `DbContext` share one transaction. No hidden global state.
#[derive(Clone)]
pub struct DbContext {
    uow: Arc<dyn UnitOfWork>,
}

impl DbContext {
    pub fn new(uow: Arc<dyn UnitOfWork>) -> Self {
        Self { uow }
    }

    pub fn unit(&self) -> &Arc<dyn UnitOfWork> {
        &self.uow
    }

    pub fn is_divergent(&self) -> bool {
        self.uow.is_divergent()
    }

    /// Commit the shared unit. Call once, after the last operation.
    pub fn complete(&self) -> EngineResult<()> {
        self.uow.complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_field_roundtrip() {
        let mut record = Record::with_resultset(2);
        record.set("name", "ada").set("age", 36i32);
        assert_eq!(record.resultset(), 2);
        assert_eq!(record.get("name").and_then(|v| v.as_text()), Some("ada"));
        assert_eq!(record.get("age").and_then(|v| v.as_i64()), Some(36));
        assert!(record.get("missing").is_none());
    }

    #[test]
    fn test_record_from_iterator_tags_resultset_zero() {
        let record: Record = vec![("a".to_string(), ScalarValue::from(1i64))]
            .into_iter()
            .collect();
        assert_eq!(record.resultset(), 0);
        assert_eq!(record.len(), 1);
    }
}
