//! Model traits: the bridge between application objects and the engine.
//!
//! Models expose their fields through [`FieldAccess`] and receive lifecycle
//! notifications through [`ModelEvents`]; they carry no SQL knowledge. The
//! procedure-call family lives in [`procedure`].

pub mod procedure;

use crate::error::EngineResult;
use crate::expr::Query;
use crate::value::ScalarValue;

/// Field bridge shared by table models, call models, and procedure rows.
/// `set_field` is the only way the engine writes into a model; `get_field`
/// the only way it reads out.
pub trait FieldAccess {
    fn get_field(&self, name: &str) -> Option<ScalarValue>;
    fn set_field(&mut self, name: &str, value: ScalarValue) -> EngineResult<()>;
}

/// Lifecycle hooks, invoked by the repository around each operation. All
/// default to no-ops; implement the ones you need.
pub trait ModelEvents {
    fn before_load(&mut self) {}
    fn after_load(&mut self) {}
    fn before_fill(&mut self) {}
    fn after_fill(&mut self) {}
    fn before_save(&mut self) {}
    fn after_save(&mut self) {}
    fn before_discard(&mut self) {}
    fn after_discard(&mut self) {}
    /// Fired exactly once when a save/discard hits the concurrency conflict
    /// path (the operation then returns `false`).
    fn on_save_conflict(&mut self) {}
}

/// A mutable row shadow with new/persisted tracking.
pub trait TableModel: FieldAccess + ModelEvents + Default + 'static {
    /// True until the first successful write.
    fn is_new(&self) -> bool;

    /// Record a successful write; flips `is_new` to false. Never flipped
    /// back by the engine.
    fn mark(&mut self);

    /// Hook before a multi-row find over this model type.
    fn before_find(_query: &Query) {}

    /// Hook after a multi-row find over this model type.
    fn after_find() {}
}

/// Input side of a stored-procedure call: parameter values are read through
/// the field bridge by parameter name.
pub trait CallModel: FieldAccess + 'static {
    fn before_execute(&mut self) {}
    fn after_execute(&mut self) {}
}

/// One row of a procedure resultset.
pub trait ResultModel: FieldAccess + Default + 'static {}

impl<T: FieldAccess + Default + 'static> ResultModel for T {}

/// Output/return-parameter shape of a procedure call. Cloned out of the
/// return object; fields stay at their defaults until the resultsets are
/// fully drained.
pub trait OutputModel: FieldAccess + Default + Clone + 'static {}

impl<T: FieldAccess + Default + Clone + 'static> OutputModel for T {}
