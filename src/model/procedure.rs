//! Stored-procedure result objects.
//!
//! A procedure call yields a [`ProcedureReturn`]: a lazy sequence of
//! [`ResultsetModel`]s (one per resultset-index tag, ascending) plus an
//! output model. The command's enumeration guard is entered when the
//! resultset sequence is opened and released only when it is fully drained;
//! the output model stays at its defaults until then. Reading outputs
//! before draining observes default values — a documented hazard, not a
//! fault.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use tracing::warn;

use crate::command::{CompiledCommand, EnumerationGuard, RecordMapper};
use crate::error::{EngineResult, ExecutionResult};
use crate::model::{OutputModel, ResultModel};
use crate::uow::{Record, RecordIter};
use crate::value::ScalarValue;

/// Streaming state shared between the outer resultset iterator and the
/// resultset currently being consumed. Single-threaded by design: the
/// caller's iteration drives the pull.
struct CursorState<R> {
    records: RecordIter,
    pending: Option<Record>,
    active_group: Option<usize>,
    mapper: RecordMapper<R>,
}

impl<R> CursorState<R> {
    fn peek_tag(&mut self) -> Option<usize> {
        if self.pending.is_none() {
            self.pending = self.records.next();
        }
        self.pending.as_ref().map(|r| r.resultset())
    }

    fn take_if(&mut self, group: usize) -> Option<Record> {
        match self.peek_tag() {
            Some(tag) if tag == group => self.pending.take(),
            _ => None,
        }
    }
}

enum RowSource<R> {
    Lazy(Rc<RefCell<CursorState<R>>>),
    Eager(std::vec::IntoIter<R>),
}

/// One procedure resultset: its index plus a lazy sequence of row models.
/// Rows are mapped only as they are iterated; rows left unread when the
/// outer sequence advances are skipped unmapped.
pub struct ResultsetModel<R> {
    index: usize,
    source: RowSource<R>,
}

impl<R> ResultsetModel<R> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<R: ResultModel> Iterator for ResultsetModel<R> {
    type Item = EngineResult<R>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.source {
            RowSource::Eager(rows) => rows.next().map(Ok),
            RowSource::Lazy(state) => {
                let mut state = state.borrow_mut();
                if state.active_group != Some(self.index) {
                    return None;
                }
                let record = state.take_if(self.index)?;
                let mapper = Arc::clone(&state.mapper);
                drop(state);
                let mut row = R::default();
                Some((mapper)(&record, &mut row).map(|()| row))
            }
        }
    }
}

enum IterSource<R> {
    Lazy(Rc<RefCell<CursorState<R>>>),
    Eager(std::vec::IntoIter<(usize, Vec<R>)>),
}

/// Outer iterator over a procedure's resultsets, in ascending index order.
/// On exhaustion it releases the enumeration guard and harvests the output
/// parameters onto the output model.
pub struct ResultsetIter<R, O: OutputModel> {
    source: IterSource<R>,
    guard: Arc<EnumerationGuard>,
    outputs_raw: Rc<RefCell<Option<HashMap<String, ScalarValue>>>>,
    output: Rc<RefCell<O>>,
    done: bool,
}

impl<R, O: OutputModel> ResultsetIter<R, O> {
    fn finish(&mut self) {
        self.done = true;
        self.guard.leave();
        if let Some(outputs) = self.outputs_raw.borrow_mut().take() {
            let mut output = self.output.borrow_mut();
            for (name, value) in outputs {
                if let Err(error) = output.set_field(&name, value) {
                    warn!(parameter = %name, %error, "output parameter rejected by output model");
                }
            }
        }
    }
}

impl<R: ResultModel, O: OutputModel> Iterator for ResultsetIter<R, O> {
    type Item = ResultsetModel<R>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = match &mut self.source {
            IterSource::Eager(groups) => groups.next().map(|(index, rows)| ResultsetModel {
                index,
                source: RowSource::Eager(rows.into_iter()),
            }),
            IterSource::Lazy(state_rc) => {
                let mut state = state_rc.borrow_mut();
                // Drop whatever the consumer left unread in the group that
                // was active; those records are never mapped.
                if let Some(group) = state.active_group {
                    while state.take_if(group).is_some() {}
                }
                match state.peek_tag() {
                    Some(tag) => {
                        state.active_group = Some(tag);
                        drop(state);
                        Some(ResultsetModel {
                            index: tag,
                            source: RowSource::Lazy(Rc::clone(state_rc)),
                        })
                    }
                    None => {
                        state.active_group = None;
                        None
                    }
                }
            }
        };
        if next.is_none() {
            self.finish();
        }
        next
    }
}

enum ReturnSource<R> {
    Lazy(Rc<RefCell<CursorState<R>>>),
    Eager(Vec<(usize, Vec<R>)>),
}

/// Everything a procedure call produced: the resultset sequence plus the
/// output/return parameter model.
pub struct ProcedureReturn<R: ResultModel, O: OutputModel> {
    command: CompiledCommand<R>,
    source: ReturnSource<R>,
    outputs_raw: Rc<RefCell<Option<HashMap<String, ScalarValue>>>>,
    output: Rc<RefCell<O>>,
    disable_guard: bool,
}

impl<R: ResultModel, O: OutputModel> ProcedureReturn<R, O> {
    pub(crate) fn lazy(
        command: CompiledCommand<R>,
        records: RecordIter,
        outputs: HashMap<String, ScalarValue>,
        disable_guard: bool,
    ) -> Self {
        let mapper = command.mapper();
        Self {
            command,
            source: ReturnSource::Lazy(Rc::new(RefCell::new(CursorState {
                records,
                pending: None,
                active_group: None,
                mapper,
            }))),
            outputs_raw: Rc::new(RefCell::new(Some(outputs))),
            output: Rc::new(RefCell::new(O::default())),
            disable_guard,
        }
    }

    /// Open the resultset sequence. Fails when a prior pass over this
    /// command is still in progress, unless re-entrancy checking is
    /// disabled for the owning repository.
    pub fn resultsets(&self) -> ExecutionResult<ResultsetIter<R, O>>
    where
        R: Clone,
    {
        self.command.command.enter_enumeration(self.disable_guard)?;
        let source = match &self.source {
            ReturnSource::Lazy(state) => IterSource::Lazy(Rc::clone(state)),
            ReturnSource::Eager(groups) => IterSource::Eager(groups.clone().into_iter()),
        };
        Ok(ResultsetIter {
            source,
            guard: self.command.command.guard(),
            outputs_raw: Rc::clone(&self.outputs_raw),
            output: Rc::clone(&self.output),
            done: false,
        })
    }

    /// Snapshot of the output model. Defaults until the resultset sequence
    /// has been fully drained.
    pub fn output(&self) -> O {
        self.output.borrow().clone()
    }

    pub fn command(&self) -> &CompiledCommand<R> {
        &self.command
    }

    /// Drain every resultset eagerly. Used for top-level calls, whose
    /// results must not outlive their dedicated transaction.
    pub(crate) fn materialize(self) -> EngineResult<Self>
    where
        R: Clone,
    {
        if matches!(self.source, ReturnSource::Eager(_)) {
            return Ok(self);
        }
        let mut groups = Vec::new();
        for resultset in self.resultsets()? {
            let index = resultset.index();
            let mut rows = Vec::new();
            for row in resultset {
                rows.push(row?);
            }
            groups.push((index, rows));
        }
        Ok(Self {
            source: ReturnSource::Eager(groups),
            ..self
        })
    }
}
