//! A fine-grained dependency-graph runtime: lazy memoized scopes (resolve,
//! cache, and reactively update a DAG of factories) and journaled flows
//! (run a handler against resolved dependencies, with hierarchy, a
//! replay-safe journal, and cooperative cancellation).
//!
//! See `SPEC_FULL.md` for the full module breakdown; in brief:
//!
//! - [`tag`] — symbol-keyed, schema-validated metadata (`Tag`, `DataStore`).
//! - [`error`] — the crate's single error type, [`error::GraphError`].
//! - [`executor`] — executor definitions (`provide`, `derive`, dependency
//!   views, presets).
//! - [`scope`] — the resolution cache and reactive propagator.
//! - [`extension`] — the interceptor pipeline wrapping every operation.
//! - [`flow`] — journaled, hierarchical, cancellable execution.
//! - [`promised`] — the lazy, chainable future every async entry point
//!   returns.

pub mod error;
pub mod executor;
pub mod extension;
pub mod flow;
pub mod promised;
pub mod scope;
pub mod tag;

pub use error::{ErrorContext, GraphError, ResolutionStage, ValidationIssue, ValidationIssues};
pub use executor::{
    derive, map, preset, preset_with, provide, seq, DepRef, DepsSpec, Executor, ExecutorId,
    ForwardRef, IntoDepsSpec, Lazy, MapDeps, Preset, Reactive, ResolvedDeps, SeqDeps, StaticView,
    ViewKind,
};
pub use flow::{
    define, execute, AbortSignal, ExecDetails, FlowContext, FlowDefOptions, FlowDefinition,
    FlowError, FlowExecOpts, FlowImpl, FlowOutcome, ParallelItem, ParallelKind, ParallelOutcome,
    ParallelSettled, ParallelStats, ScopeExec,
};
pub use promised::Promised;
pub use scope::{
    create_scope, create_scope_with, Accessor, CleanupSink, Mutation, Scope, ScopeOptions,
    Unsubscribe,
};
pub use tag::{
    custom, meta, name_tag, tag, Accept, Custom, DataStore, MetaContainer, Predicate, Tag,
    TagKey, TagOptions, Tagged, TagSource, Validate,
};

/// `flow(handler_fn)` — the zero-dependency shorthand constructor (§6).
/// Lives in the value namespace, so it coexists at the crate root with the
/// `flow` module itself (`flow::define`, `flow::execute`, ...).
pub use flow::flow;
