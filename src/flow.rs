//! C6: flow execution — a handler run with resolved dependencies inside a
//! hierarchical, journaled, cancellable context (§4.6).
//!
//! Flow dependencies resolve through the owning scope's cache
//! ([`crate::scope::resolve_node`]); a flow never builds a cache of its own.
//! `.reactive()` dependencies are treated the same as eager ones here: a
//! flow is never itself a cascade target, so there is nothing useful to
//! register it as a dependent of.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;

use futures::future::{FutureExt, Shared};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::error::{BoxedCause, ErrorContext, GraphError, ResolutionStage};
use crate::executor::{
    AnyRc, DepRef, DepsSpec, ExecutorId, IntoDepsSpec, PinnedFuture, Preset, PresetValue,
    ResolvedDeps, ViewKind,
};
use crate::extension::{run_pipeline, Operation};
use crate::promised::Promised;
use crate::scope::{untyped_accessor, CleanupSink, Scope};
use crate::tag::{Accept, DataStore, MetaContainer, Tag, Tagged, Validate};

/// A handler's domain-level result: `Ok(success)` or `Ko(domain error)`.
/// Handler-side faults (panics, infra errors) are a [`FlowError`] instead —
/// `Ko` is reserved for expected negative outcomes (§4.6, §7).
#[derive(Debug, Clone)]
pub enum FlowOutcome<S, E> {
    Ok(S),
    Ko(E),
}

impl<S, E> FlowOutcome<S, E> {
    pub fn is_ok(&self) -> bool {
        matches!(self, FlowOutcome::Ok(_))
    }

    pub fn is_ko(&self) -> bool {
        matches!(self, FlowOutcome::Ko(_))
    }
}

/// One entry in a [`FlowContext::execute_parallel`] batch: either a plain,
/// synchronous function (like [`FlowContext::execute`] takes) or a pending
/// sub-flow produced by [`FlowContext::exec`].
pub enum ParallelItem<S: 'static, E: 'static> {
    Sync(Box<dyn FnOnce() -> FlowOutcome<S, E>>),
    Flow(Promised<ExecDetails<S, E>, GraphError>),
}

impl<S: 'static, E: 'static> ParallelItem<S, E> {
    pub fn sync(f: impl FnOnce() -> FlowOutcome<S, E> + 'static) -> Self {
        ParallelItem::Sync(Box::new(f))
    }

    pub fn flow(pending: Promised<ExecDetails<S, E>, GraphError>) -> Self {
        ParallelItem::Flow(pending)
    }
}

/// A handler-side fault, lifted into [`GraphError::FlowError`] at the exec
/// boundary. Distinct from [`FlowOutcome::Ko`], which is a domain result.
pub struct FlowError(BoxedCause);

impl FlowError {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        FlowError(Arc::new(err))
    }
}

impl From<FlowError> for GraphError {
    fn from(e: FlowError) -> Self {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %e.0, "flow handler failed");
        GraphError::FlowError {
            source: e.0,
            context: ErrorContext::new(ResolutionStage::FlowHandler),
        }
    }
}

fn cancelled_error() -> GraphError {
    #[cfg(feature = "tracing")]
    tracing::debug!("flow operation attempted on a cancelled context");
    GraphError::Cancelled {
        context: ErrorContext::new(ResolutionStage::FlowHandler),
    }
}

/// A cooperative cancellation flag, shared between a [`FlowContext`] and
/// whoever holds the handle returned by [`FlowContext::abort_signal`].
/// Checked at `ctx.run`/`ctx.exec` boundaries, not woken via a `Future` —
/// callers who need it inside a network call just poll `is_cancelled()`.
#[derive(Clone, Default)]
pub struct AbortSignal(Rc<Cell<bool>>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }
}

/// `{ name, inputSchema, successSchema, errorSchema, metas }` plus the
/// dependency spec a handler will be called with (§3, §4.2).
pub struct FlowDefinition<I: 'static, S: 'static, E: 'static> {
    pub name: Option<&'static str>,
    metas: Vec<Tagged>,
    deps: DepsSpec,
    input_schema: Rc<dyn Validate<I>>,
    success_schema: Rc<dyn Validate<S>>,
    error_schema: Rc<dyn Validate<E>>,
}

impl<I: 'static, S: 'static, E: 'static> Clone for FlowDefinition<I, S, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            metas: self.metas.clone(),
            deps: self.deps.clone(),
            input_schema: Rc::clone(&self.input_schema),
            success_schema: Rc::clone(&self.success_schema),
            error_schema: Rc::clone(&self.error_schema),
        }
    }
}

impl<I: 'static, S: 'static, E: 'static> MetaContainer for FlowDefinition<I, S, E> {
    fn metas(&self) -> &[Tagged] {
        &self.metas
    }
}

impl<I: 'static, S: 'static, E: 'static> FlowDefinition<I, S, E> {
    /// An unnamed definition with no schema enforcement and no dependencies
    /// — the starting point for the `flow(handler_fn)`/`flow(deps,
    /// handler_fn)` shorthand forms.
    pub fn anonymous() -> Self {
        Self {
            name: None,
            metas: Vec::new(),
            deps: DepsSpec::None,
            input_schema: Rc::new(Accept) as Rc<dyn Validate<I>>,
            success_schema: Rc::new(Accept) as Rc<dyn Validate<S>>,
            error_schema: Rc::new(Accept) as Rc<dyn Validate<E>>,
        }
    }

    pub fn with_deps(mut self, deps: impl IntoDepsSpec) -> Self {
        self.deps = deps.into_deps_spec();
        self
    }

    /// `def.handler(fn)` — produces the runnable [`FlowImpl`].
    pub fn handler<F, Fut>(self, handler: F) -> FlowImpl<I, S, E>
    where
        F: Fn(FlowContext, ResolvedDeps, I) -> Fut + 'static,
        Fut: Future<Output = Result<FlowOutcome<S, E>, FlowError>> + 'static,
    {
        let handler: Rc<
            dyn Fn(FlowContext, ResolvedDeps, I) -> PinnedFuture<Result<FlowOutcome<S, E>, FlowError>>,
        > = Rc::new(move |ctx, deps, input| Box::pin(handler(ctx, deps, input)));
        FlowImpl { def: self, handler }
    }
}

/// Options accepted by [`define`].
pub struct FlowDefOptions<I: 'static, S: 'static, E: 'static> {
    pub name: Option<&'static str>,
    pub input: Option<Rc<dyn Validate<I>>>,
    pub success: Option<Rc<dyn Validate<S>>>,
    pub error: Option<Rc<dyn Validate<E>>>,
    pub metas: Vec<Tagged>,
}

impl<I: 'static, S: 'static, E: 'static> Default for FlowDefOptions<I, S, E> {
    fn default() -> Self {
        Self {
            name: None,
            input: None,
            success: None,
            error: None,
            metas: Vec::new(),
        }
    }
}

/// `flow::define({ name, input, success, error, ...metas })`.
pub fn define<I: 'static, S: 'static, E: 'static>(
    options: FlowDefOptions<I, S, E>,
) -> FlowDefinition<I, S, E> {
    FlowDefinition {
        name: options.name,
        metas: options.metas,
        deps: DepsSpec::None,
        input_schema: options.input.unwrap_or_else(|| Rc::new(Accept) as Rc<dyn Validate<I>>),
        success_schema: options.success.unwrap_or_else(|| Rc::new(Accept) as Rc<dyn Validate<S>>),
        error_schema: options.error.unwrap_or_else(|| Rc::new(Accept) as Rc<dyn Validate<E>>),
    }
}

/// `flow(handler_fn)` — the zero-dependency, unnamed shorthand. The other
/// three forms the original exposes (`flow(deps, handler_fn)`, `flow(deps,
/// def, handler_fn)`, `flow(def, handler_fn)`) have no direct counterpart
/// here since Rust doesn't overload on parameter count; reach them via
/// `FlowDefinition::anonymous().with_deps(deps).handler(f)`,
/// `def.with_deps(deps).handler(f)`, and `def.handler(f)` respectively — all
/// four funnel through the same [`FlowDefinition::handler`].
pub fn flow<I: 'static, S: 'static, E: 'static, F, Fut>(handler: F) -> FlowImpl<I, S, E>
where
    F: Fn(FlowContext, ResolvedDeps, I) -> Fut + 'static,
    Fut: Future<Output = Result<FlowOutcome<S, E>, FlowError>> + 'static,
{
    FlowDefinition::anonymous().handler(handler)
}

/// A [`FlowDefinition`] plus its handler — runnable via [`ScopeExec::exec`]
/// or [`FlowContext::exec`].
pub struct FlowImpl<I: 'static, S: 'static, E: 'static> {
    def: FlowDefinition<I, S, E>,
    handler:
        Rc<dyn Fn(FlowContext, ResolvedDeps, I) -> PinnedFuture<Result<FlowOutcome<S, E>, FlowError>>>,
}

impl<I: 'static, S: 'static, E: 'static> Clone for FlowImpl<I, S, E> {
    fn clone(&self) -> Self {
        Self {
            def: self.def.clone(),
            handler: Rc::clone(&self.handler),
        }
    }
}

impl<I: 'static, S: 'static, E: 'static> MetaContainer for FlowImpl<I, S, E> {
    fn metas(&self) -> &[Tagged] {
        self.def.metas()
    }
}

/// Per-context journal state for one `ctx.run` key (§3, §4.6).
#[derive(Clone)]
enum JournalEntry {
    Pending(Shared<PinnedFuture<Result<AnyRc, GraphError>>>),
    Resolved(AnyRc),
    Failed(GraphError),
}

fn downcast_journal<T: 'static>(v: AnyRc, key: &str) -> Result<Rc<T>, GraphError> {
    Rc::clone(&v).downcast::<T>().map_err(|_| {
        #[cfg(feature = "tracing")]
        tracing::warn!(key, "journal key replayed with an incompatible type");
        GraphError::JournalKeyCollision {
            key: key.to_string(),
            context: ErrorContext::new(ResolutionStage::Journal),
        }
    })
}

struct FlowContextInner {
    scope: Scope,
    parent: Option<FlowContext>,
    data: Rc<RefCell<DataStore>>,
    journal: RefCell<FxHashMap<String, JournalEntry>>,
    abort: AbortSignal,
    depth: u32,
}

/// `{ scope, parent?, dataStore, journal, cancelled, depth }` (§3).
#[derive(Clone)]
pub struct FlowContext(Rc<FlowContextInner>);

impl FlowContext {
    pub fn scope(&self) -> &Scope {
        &self.0.scope
    }

    pub fn depth(&self) -> u32 {
        self.0.depth
    }

    pub fn parent(&self) -> Option<&FlowContext> {
        self.0.parent.as_ref()
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.0.abort.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.abort.is_cancelled() || self.0.parent.as_ref().is_some_and(FlowContext::is_cancelled)
    }

    /// Wraps a value as [`FlowOutcome::Ok`] — the Rust stand-in for the
    /// original's callable `ctx.ok(v)`.
    pub fn ok<S, E>(&self, value: S) -> FlowOutcome<S, E> {
        FlowOutcome::Ok(value)
    }

    /// Wraps a value as [`FlowOutcome::Ko`] — `ctx.ko(v)`.
    pub fn ko<S, E>(&self, value: E) -> FlowOutcome<S, E> {
        FlowOutcome::Ko(value)
    }

    pub fn set<T: Clone + 'static>(&self, tag: &Tag<T>, value: T) -> Result<(), GraphError> {
        tag.set(&mut self.0.data.borrow_mut(), value)
    }

    /// Local-only read of this context's data store.
    pub fn get<T: Clone + 'static>(&self, tag: &Tag<T>) -> Option<T> {
        tag.find(&*self.0.data.borrow())
    }

    /// Walks upward through ancestor contexts until `tag` is found.
    pub fn get_from_parent<T: Clone + 'static>(&self, tag: &Tag<T>) -> Option<T> {
        let mut cur = self.0.parent.clone();
        while let Some(p) = cur {
            if let Some(v) = tag.find(&*p.0.data.borrow()) {
                return Some(v);
            }
            cur = p.0.parent.clone();
        }
        None
    }

    /// Queries the owning scope's meta store.
    pub fn get_from_scope<T: Clone + 'static>(&self, tag: &Tag<T>) -> Option<T> {
        tag.find(&self.0.scope.meta())
    }

    /// Cascades self → parents → scope. The vocabulary for "ambient" values
    /// like a request id or trace id.
    pub fn lookup<T: Clone + 'static>(&self, tag: &Tag<T>) -> Option<T> {
        self.get(tag)
            .or_else(|| self.get_from_parent(tag))
            .or_else(|| self.get_from_scope(tag))
    }

    /// `ctx.run(key, thunk)` (§4.6): executes `thunk` once per context per
    /// `key`, journaling pending/resolved/failed state; replays the
    /// journaled value on subsequent calls with the same key.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all, fields(key = %key.as_ref())))]
    pub async fn run<T: 'static>(
        &self,
        key: impl AsRef<str> + Into<String>,
        thunk: impl Future<Output = Result<T, GraphError>> + 'static,
    ) -> Result<Rc<T>, GraphError> {
        if self.is_cancelled() {
            return Err(cancelled_error());
        }
        let key = key.into();
        let existing = self.0.journal.borrow().get(&key).cloned();
        match existing {
            Some(JournalEntry::Resolved(v)) => return downcast_journal::<T>(v, &key),
            Some(JournalEntry::Failed(e)) => return Err(e),
            Some(JournalEntry::Pending(fut)) => {
                let v = fut.await?;
                return downcast_journal::<T>(v, &key);
            }
            None => {}
        }

        let boxed: PinnedFuture<Result<AnyRc, GraphError>> =
            Box::pin(async move { thunk.await.map(|v| Rc::new(v) as AnyRc) });
        let shared = boxed.shared();
        self.0
            .journal
            .borrow_mut()
            .insert(key.clone(), JournalEntry::Pending(shared.clone()));
        let result = shared.await;
        match &result {
            Ok(v) => {
                self.0
                    .journal
                    .borrow_mut()
                    .insert(key.clone(), JournalEntry::Resolved(Rc::clone(v)));
            }
            Err(e) => {
                self.0
                    .journal
                    .borrow_mut()
                    .insert(key.clone(), JournalEntry::Failed(e.clone()));
            }
        }
        match result {
            Ok(v) => downcast_journal::<T>(v, &key),
            Err(e) => Err(e),
        }
    }

    /// `ctx.exec(child, input)` — runs a sub-flow in a child context
    /// (§4.6).
    pub fn exec<I: 'static, S: 'static, E: 'static>(
        &self,
        flow: &FlowImpl<I, S, E>,
        input: I,
    ) -> Promised<ExecDetails<S, E>, GraphError> {
        self.exec_with(flow, input, FlowExecOpts::default())
    }

    pub fn exec_with<I: 'static, S: 'static, E: 'static>(
        &self,
        flow: &FlowImpl<I, S, E>,
        input: I,
        opts: FlowExecOpts,
    ) -> Promised<ExecDetails<S, E>, GraphError> {
        let scope = self.0.scope.clone();
        let parent = self.clone();
        let depth = self.0.depth + 1;
        let flow = flow.clone();
        Promised::from_future(async move { run_flow(scope, Some(parent), depth, flow, input, opts).await })
    }

    /// `ctx.execute(fn, error_mapper)` — lifts a plain fallible function
    /// into the `OK`/`KO` world.
    pub fn execute<S, Err, E>(
        &self,
        f: impl FnOnce() -> Result<S, Err>,
        error_mapper: impl FnOnce(Err) -> E,
    ) -> FlowOutcome<S, E> {
        match f() {
            Ok(v) => FlowOutcome::Ok(v),
            Err(e) => FlowOutcome::Ko(error_mapper(e)),
        }
    }

    /// `ctx.execute_parallel([...])` — the array form of [`Self::execute`],
    /// accepting a mix of plain functions and pending flows
    /// ([`ParallelItem`]). Plain functions run inline (there is nothing to
    /// await); flows are driven concurrently alongside them. A fatal
    /// (non-domain) error from any flow branch short-circuits the call.
    pub async fn execute_parallel<S: 'static, E: 'static>(
        &self,
        items: Vec<ParallelItem<S, E>>,
    ) -> Result<Vec<FlowOutcome<S, E>>, GraphError> {
        let futs: Vec<PinnedFuture<Result<FlowOutcome<S, E>, GraphError>>> = items
            .into_iter()
            .map(|item| match item {
                ParallelItem::Sync(f) => {
                    let outcome = f();
                    Box::pin(async move { Ok(outcome) }) as PinnedFuture<_>
                }
                ParallelItem::Flow(pending) => {
                    let fut = pending.into_future();
                    Box::pin(async move {
                        let details = fut.await?;
                        Ok(if details.success {
                            FlowOutcome::Ok(details.result.expect("success details carry a result"))
                        } else {
                            FlowOutcome::Ko(details.error.expect("failed details carry an error"))
                        })
                    })
                }
            })
            .collect();
        futures::future::join_all(futs).await.into_iter().collect()
    }

    /// `ctx.parallel([...])` — awaits every pending sub-flow concurrently
    /// and classifies the aggregate outcome. A fatal (non-domain) error from
    /// any branch short-circuits the whole call.
    pub async fn parallel<S: 'static, E: 'static>(
        &self,
        pending: Vec<Promised<ExecDetails<S, E>, GraphError>>,
    ) -> Result<ParallelOutcome<S, E>, GraphError> {
        if self.is_cancelled() {
            return Err(cancelled_error());
        }
        let futs: Vec<_> = pending.into_iter().map(Promised::into_future).collect();
        let results: Result<Vec<ExecDetails<S, E>>, GraphError> =
            futures::future::join_all(futs).await.into_iter().collect();
        let results = results?;
        let total = results.len();
        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = total - succeeded;
        let kind = if failed == 0 {
            ParallelKind::AllOk
        } else if succeeded == 0 {
            ParallelKind::AllKo
        } else {
            ParallelKind::Partial
        };
        Ok(ParallelOutcome {
            kind,
            results,
            stats: ParallelStats { total, succeeded, failed },
        })
    }

    /// `ctx.parallel_settled([...])` — never errors; every branch's outcome
    /// (including fatal errors) is reported per-item.
    pub async fn parallel_settled<S: 'static, E: 'static>(
        &self,
        pending: Vec<Promised<ExecDetails<S, E>, GraphError>>,
    ) -> ParallelSettled<S, E> {
        let futs: Vec<_> = pending.into_iter().map(Promised::into_future).collect();
        let results = futures::future::join_all(futs).await;
        let total = results.len();
        let succeeded = results.iter().filter(|r| matches!(r, Ok(d) if d.success)).count();
        let failed = total - succeeded;
        ParallelSettled {
            results,
            stats: ParallelStats { total, succeeded, failed },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParallelKind {
    AllOk,
    Partial,
    AllKo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParallelStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct ParallelOutcome<S, E> {
    pub kind: ParallelKind,
    pub results: Vec<ExecDetails<S, E>>,
    pub stats: ParallelStats,
}

pub struct ParallelSettled<S, E> {
    pub results: Vec<Result<ExecDetails<S, E>, GraphError>>,
    pub stats: ParallelStats,
}

/// The full execution record returned by [`ScopeExec::exec`] /
/// [`FlowContext::exec`] (§4.6's "detail floor"). Call [`Self::into_value`]
/// to collapse to the raw success value or a propagated error.
pub struct ExecDetails<S, E> {
    pub success: bool,
    pub result: Option<S>,
    pub error: Option<E>,
    pub context: FlowContext,
}

impl<S, E> Clone for ExecDetails<S, E>
where
    S: Clone,
    E: Clone,
{
    fn clone(&self) -> Self {
        Self {
            success: self.success,
            result: self.result.clone(),
            error: self.error.clone(),
            context: self.context.clone(),
        }
    }
}

impl<S: 'static, E: std::error::Error + Send + Sync + 'static> ExecDetails<S, E> {
    pub fn into_value(self) -> Result<S, GraphError> {
        if self.success {
            Ok(self.result.expect("success details always carry a result"))
        } else {
            let err = self.error.expect("failed details always carry an error");
            Err(GraphError::FlowError {
                source: Arc::new(err),
                context: ErrorContext::new(ResolutionStage::FlowError),
            })
        }
    }
}

/// Options accepted by [`ScopeExec::exec_with`]/[`FlowContext::exec_with`].
#[derive(Default)]
pub struct FlowExecOpts {
    pub initial_context: DataStore,
    pub meta: DataStore,
    pub presets: Vec<Preset>,
    pub abort: Option<AbortSignal>,
}

async fn materialize_override(scope: &Scope, value: PresetValue) -> Result<AnyRc, GraphError> {
    match value {
        PresetValue::Value(v) => Ok(v),
        PresetValue::Factory(f) => {
            let sink = CleanupSink::default();
            (f.as_ref())(ResolvedDeps::None, scope.clone(), sink).await
        }
    }
}

fn resolve_flow_dep(
    scope: Scope,
    dep: DepRef,
    overrides: Rc<FxHashMap<ExecutorId, AnyRc>>,
) -> PinnedFuture<Result<AnyRc, GraphError>> {
    Box::pin(async move {
        if let Some(v) = overrides.get(&dep.id) {
            return Ok(Rc::clone(v));
        }
        match dep.view {
            ViewKind::Eager | ViewKind::Reactive => {
                crate::scope::resolve_node(scope, Rc::clone(&dep.node), Vec::new()).await
            }
            ViewKind::Static => {
                crate::scope::resolve_node(scope.clone(), Rc::clone(&dep.node), Vec::new()).await?;
                Ok(untyped_accessor(scope, dep.id, Rc::clone(&dep.node)))
            }
            ViewKind::Lazy => Ok(untyped_accessor(scope, dep.id, Rc::clone(&dep.node))),
        }
    })
}

fn resolve_flow_deps(
    scope: Scope,
    deps: DepsSpec,
    overrides: Rc<FxHashMap<ExecutorId, AnyRc>>,
) -> PinnedFuture<Result<ResolvedDeps, GraphError>> {
    Box::pin(async move {
        match deps {
            DepsSpec::None => Ok(ResolvedDeps::None),
            DepsSpec::Single(dep) => {
                Ok(ResolvedDeps::Single(resolve_flow_dep(scope, dep, overrides).await?))
            }
            DepsSpec::Seq(deps) => {
                let mut out = Vec::with_capacity(deps.len());
                for dep in deps {
                    out.push(resolve_flow_dep(scope.clone(), dep, Rc::clone(&overrides)).await?);
                }
                Ok(ResolvedDeps::Seq(out))
            }
            DepsSpec::Map(deps) => {
                let mut out = IndexMap::new();
                for (k, dep) in deps {
                    out.insert(k, resolve_flow_dep(scope.clone(), dep, Rc::clone(&overrides)).await?);
                }
                Ok(ResolvedDeps::Map(out))
            }
            DepsSpec::Forward(cell) => {
                let dep = cell.borrow().clone().ok_or_else(|| {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("forward ref resolved before it was tied");
                    GraphError::ForwardRefNotTied {
                        context: ErrorContext::new(ResolutionStage::DependencyResolution),
                    }
                })?;
                Ok(ResolvedDeps::Single(resolve_flow_dep(scope, dep, overrides).await?))
            }
        }
    })
}

#[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
async fn run_flow<I: 'static, S: 'static, E: 'static>(
    scope: Scope,
    parent: Option<FlowContext>,
    depth: u32,
    flow: FlowImpl<I, S, E>,
    input: I,
    opts: FlowExecOpts,
) -> Result<ExecDetails<S, E>, GraphError> {
    let mut data = opts.initial_context;
    data.extend(opts.meta);

    let mut overrides = FxHashMap::default();
    for preset in opts.presets {
        let value = materialize_override(&scope, preset.value).await?;
        overrides.insert(preset.id, value);
    }
    let overrides = Rc::new(overrides);

    let ctx = FlowContext(Rc::new(FlowContextInner {
        scope: scope.clone(),
        parent,
        data: Rc::new(RefCell::new(data)),
        journal: RefCell::new(FxHashMap::default()),
        abort: opts.abort.unwrap_or_default(),
        depth,
    }));

    if ctx.is_cancelled() {
        return Err(cancelled_error());
    }

    let op = if ctx.0.parent.is_some() {
        Operation::Subflow { flow: flow.def.name.unwrap_or("<anonymous>") }
    } else {
        Operation::Flow { flow: flow.def.name.unwrap_or("<anonymous>") }
    };

    let deps_spec = flow.def.deps.clone();
    let scope_for_deps = scope.clone();
    let deps_inner: PinnedFuture<Result<AnyRc, GraphError>> = Box::pin(async move {
        let resolved = resolve_flow_deps(scope_for_deps, deps_spec, overrides).await?;
        Ok(Rc::new(resolved) as AnyRc)
    });
    let wrapped =
        run_pipeline(&scope.extensions_snapshot(), op, Rc::clone(&ctx.0.data), move || deps_inner)
            .await?;
    let resolved_deps: ResolvedDeps = (*wrapped
        .downcast::<ResolvedDeps>()
        .unwrap_or_else(|_| panic!("flow dependency pipeline returned an unexpected type")))
    .clone();

    if ctx.is_cancelled() {
        return Err(cancelled_error());
    }

    let input = flow
        .def
        .input_schema
        .validate(input)
        .map_err(GraphError::schema_validation)?;

    let outcome = (flow.handler.as_ref())(ctx.clone(), resolved_deps, input)
        .await
        .map_err(GraphError::from)?;

    let details = match outcome {
        FlowOutcome::Ok(value) => {
            let value = flow
                .def
                .success_schema
                .validate(value)
                .map_err(GraphError::schema_validation)?;
            ExecDetails { success: true, result: Some(value), error: None, context: ctx }
        }
        FlowOutcome::Ko(err) => {
            let err = flow
                .def
                .error_schema
                .validate(err)
                .map_err(GraphError::schema_validation)?;
            ExecDetails { success: false, result: None, error: Some(err), context: ctx }
        }
    };
    Ok(details)
}

/// `scope.exec(flow, input, opts?)` (§4.3, §4.6), as an extension trait so
/// flow execution reads as a method on [`Scope`] without flow.rs and
/// scope.rs needing to know about each other's full internals.
pub trait ScopeExec {
    fn exec<I: 'static, S: 'static, E: 'static>(
        &self,
        flow: &FlowImpl<I, S, E>,
        input: I,
    ) -> Promised<ExecDetails<S, E>, GraphError>;

    fn exec_with<I: 'static, S: 'static, E: 'static>(
        &self,
        flow: &FlowImpl<I, S, E>,
        input: I,
        opts: FlowExecOpts,
    ) -> Promised<ExecDetails<S, E>, GraphError>;
}

/// `flow::execute(scope, flow, input)` — free-function form of
/// [`ScopeExec::exec`], for callers that prefer `flow::execute(...)` over
/// the method-call spelling (§4.6, §6).
pub fn execute<I: 'static, S: 'static, E: 'static>(
    scope: &Scope,
    flow: &FlowImpl<I, S, E>,
    input: I,
) -> Promised<ExecDetails<S, E>, GraphError> {
    scope.exec(flow, input)
}

impl ScopeExec for Scope {
    fn exec<I: 'static, S: 'static, E: 'static>(
        &self,
        flow: &FlowImpl<I, S, E>,
        input: I,
    ) -> Promised<ExecDetails<S, E>, GraphError> {
        self.exec_with(flow, input, FlowExecOpts::default())
    }

    fn exec_with<I: 'static, S: 'static, E: 'static>(
        &self,
        flow: &FlowImpl<I, S, E>,
        input: I,
        opts: FlowExecOpts,
    ) -> Promised<ExecDetails<S, E>, GraphError> {
        let scope = self.clone();
        let flow = flow.clone();
        Promised::from_future(async move { run_flow(scope, None, 0, flow, input, opts).await })
    }
}
