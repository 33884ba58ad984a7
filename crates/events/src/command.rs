use ledgerflow_core::AggregateId;

/// A command targets a specific aggregate (command abstraction).
///
/// Commands represent **intent** - a request to perform an action on an aggregate.
/// They are **transient** (not persisted) and are transformed into events (which are persisted).
///
/// Commands must be cloneable, `Send + Sync` and own all their data so they can
/// cross task boundaries (HTTP handlers, workers).
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> &AggregateId;

    /// Whether the dispatcher must compare the caller's expected version with
    /// the rehydrated version *before* deciding.
    ///
    /// Commands that return `false` are still checked by the store at append.
    fn requires_version_precheck(&self) -> bool {
        false
    }
}
