//! C3/C4: the resolution cache and reactive propagator.
//!
//! A [`Scope`] owns every piece of state a resolved executor needs: the
//! cache itself (a `slotmap::SlotMap` of container slots, so released slots
//! are recycled rather than leaking `ExecutorId`-keyed holes), a
//! `rustc_hash`-backed index from stable `ExecutorId` to cache slot, the
//! dependency-edge index (an `indexmap::IndexSet` per dependency so cascade
//! order is deterministic), cleanup callbacks, listeners, and the extension
//! pipeline. Nothing here is thread-local: per SPEC_FULL.md §9, every scope
//! is a self-contained `Rc`, not a singleton.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::future::{FutureExt, Shared};
use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::error::{ErrorContext, GraphError, ResolutionStage};
use crate::executor::{
    AnyRc, BoxedFactory, DepRef, DepsSpec, Executor, ExecutorId, ExecutorNode, PinnedFuture,
    Preset, PresetValue, ResolvedDeps, ViewKind,
};
use crate::extension::{run_pipeline, Extension, Operation};
use crate::tag::DataStore;

slotmap::new_key_type! {
    pub(crate) struct ContainerKey;
}

type SharedResolve = Shared<PinnedFuture<Result<AnyRc, GraphError>>>;

#[derive(Clone)]
enum ContainerState {
    Pending(SharedResolve),
    Resolved(AnyRc),
    Updating(SharedResolve, AnyRc),
}

/// A per-resolution sink a factory uses to register teardown logic. Taken
/// by value so a factory can clone it into a nested closure freely; the
/// registered callbacks are committed to the scope only once the factory
/// resolves successfully.
#[derive(Clone, Default)]
pub struct CleanupSink(Rc<RefCell<Vec<Box<dyn FnOnce() -> Result<(), GraphError>>>>>);

impl CleanupSink {
    pub fn on_cleanup(&self, f: impl FnOnce() -> Result<(), GraphError> + 'static) {
        self.0.borrow_mut().push(Box::new(f));
    }

    /// Infallible convenience form.
    pub fn on_cleanup_infallible(&self, f: impl FnOnce() + 'static) {
        self.on_cleanup(move || {
            f();
            Ok(())
        });
    }

    fn take(&self) -> Vec<Box<dyn FnOnce() -> Result<(), GraphError>>> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

/// A type-erased handle to one executor's cache slot, used to represent
/// `lazy`/`static` dependency views inside a type-erased [`ResolvedDeps`]
/// slot (§4.2) and as the return of [`Scope::accessor`].
pub(crate) struct UntypedAccessor {
    scope: Scope,
    id: ExecutorId,
    node: Rc<ExecutorNode>,
}

impl UntypedAccessor {
    pub(crate) fn typed<T: 'static>(self: Rc<Self>) -> Accessor<T> {
        Accessor {
            scope: self.scope.clone(),
            id: self.id,
            node: Rc::clone(&self.node),
            _marker: std::marker::PhantomData,
        }
    }
}

/// Builds a type-erased `Lazy`/`Static` dependency-view value from outside
/// this module, for callers (flow dependency resolution) that resolve
/// against a node without going through `resolve_dep_ref`.
pub(crate) fn untyped_accessor(scope: Scope, id: ExecutorId, node: Rc<ExecutorNode>) -> AnyRc {
    Rc::new(UntypedAccessor { scope, id, node }) as AnyRc
}

/// A typed handle returned by [`Scope::accessor`], by dependency views, and
/// by `resolve` (§4.3).
pub struct Accessor<T: 'static> {
    scope: Scope,
    id: ExecutorId,
    node: Rc<ExecutorNode>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> Clone for Accessor<T> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            id: self.id,
            node: Rc::clone(&self.node),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: 'static> Accessor<T> {
    /// Synchronous peek at the resolved value. Fails with
    /// [`GraphError::Unresolved`] if the container is absent or still
    /// pending.
    pub fn get(&self) -> Result<Rc<T>, GraphError> {
        match self.scope.lookup_state(self.id) {
            Some(ContainerState::Resolved(v)) | Some(ContainerState::Updating(_, v)) => {
                Ok(downcast(&v))
            }
            _ => Err(self.scope.mk_error(
                |ctx| GraphError::Unresolved { context: ctx },
                ResolutionStage::FactoryInvocation,
                Some(self.id),
            )),
        }
    }

    pub async fn resolve(&self) -> Result<Rc<T>, GraphError> {
        let v = resolve_node(self.scope.clone(), Rc::clone(&self.node), Vec::new()).await?;
        Ok(downcast(&v))
    }

    pub async fn update(&self, mutation: Mutation<T>) -> Result<Rc<T>, GraphError>
    where
        T: Clone,
    {
        self.scope.update_handle(self.id, Rc::clone(&self.node), mutation).await
    }

    pub fn subscribe(&self, f: impl Fn(&T) + 'static) -> Unsubscribe {
        self.scope.on_update_id(self.id, f)
    }

    pub fn release(&self) {
        self.scope.release_id(self.id);
    }
}

/// Either a replacement value or a `(prev) -> next` mutator, as accepted by
/// [`Scope::update`] (§4.3).
pub enum Mutation<T> {
    Value(T),
    With(Box<dyn FnOnce(Rc<T>) -> T>),
}

impl<T> Mutation<T> {
    pub fn value(v: T) -> Self {
        Mutation::Value(v)
    }

    pub fn with(f: impl FnOnce(Rc<T>) -> T + 'static) -> Self {
        Mutation::With(Box::new(f))
    }

    fn apply(self, prev: Rc<T>) -> T
    where
        T: Clone,
    {
        match self {
            Mutation::Value(v) => v,
            Mutation::With(f) => f(prev),
        }
    }
}

/// Unregisters a listener or extension previously installed with
/// `on`/`on_update`/`on_error`/`use_extension`.
pub struct Unsubscribe(Box<dyn FnOnce()>);

impl Unsubscribe {
    pub fn unsubscribe(self) {
        (self.0)()
    }
}

type ChangeListener = Rc<dyn Fn(&AnyRc)>;
type ErrorListener = Rc<dyn Fn(&GraphError)>;

#[derive(Default)]
pub(crate) struct ScopeInner {
    containers: RefCell<SlotMap<ContainerKey, ContainerState>>,
    index: RefCell<FxHashMap<ExecutorId, ContainerKey>>,
    nodes: RefCell<FxHashMap<ExecutorId, Rc<ExecutorNode>>>,
    edges: RefCell<FxHashMap<ExecutorId, IndexSet<ExecutorId>>>,
    cleanups: RefCell<FxHashMap<ExecutorId, Vec<Box<dyn FnOnce() -> Result<(), GraphError>>>>>,
    resolution_order: RefCell<Vec<ExecutorId>>,
    change_listeners: RefCell<IndexMap<u64, (ExecutorId, ChangeListener)>>,
    update_listeners: RefCell<IndexMap<u64, (ExecutorId, ChangeListener)>>,
    error_listeners: RefCell<IndexMap<u64, (Option<ExecutorId>, ErrorListener)>>,
    extensions: RefCell<IndexMap<u64, Rc<dyn Extension>>>,
    preset_factories: RefCell<FxHashMap<ExecutorId, BoxedFactory>>,
    meta: Rc<RefCell<DataStore>>,
    token: Cell<u64>,
    disposed: Cell<bool>,
}

impl ScopeInner {
    fn next_token(&self) -> u64 {
        let t = self.token.get();
        self.token.set(t + 1);
        t
    }
}

/// The long-lived container for resolved factory values (§4.3). Cheap to
/// clone: every clone shares the same underlying cache.
#[derive(Clone, Default)]
pub struct Scope(Rc<ScopeInner>);

/// Options accepted by [`create_scope`].
#[derive(Default)]
pub struct ScopeOptions {
    pub initial_values: Vec<Preset>,
    pub extensions: Vec<Rc<dyn Extension>>,
    pub meta: DataStore,
}

/// `create_scope()` — a fresh scope with no presets, extensions, or meta.
pub fn create_scope() -> Scope {
    create_scope_with(ScopeOptions::default())
}

/// `create_scope_with({ initial_values, extensions, meta })` — constructs a
/// scope with its cache, dependency edge map, cleanup map, listener maps,
/// extension sequence, and meta store (§4.3).
pub fn create_scope_with(options: ScopeOptions) -> Scope {
    let scope = Scope(Rc::new(ScopeInner {
        meta: Rc::new(RefCell::new(options.meta)),
        ..Default::default()
    }));
    for ext in options.extensions {
        scope.use_extension_rc(ext);
    }
    for preset in options.initial_values {
        scope.apply_preset(preset);
    }
    scope
}

fn downcast<T: 'static>(v: &AnyRc) -> Rc<T> {
    Rc::clone(v)
        .downcast::<T>()
        .unwrap_or_else(|_| panic!("cached value did not have the expected type"))
}

impl Scope {
    fn apply_preset(&self, preset: Preset) {
        match preset.value {
            PresetValue::Value(v) => {
                self.insert_resolved(preset.id, v);
                self.0.resolution_order.borrow_mut().push(preset.id);
            }
            PresetValue::Factory(f) => {
                self.0.preset_factories.borrow_mut().insert(preset.id, f);
            }
        }
    }

    fn lookup_state(&self, id: ExecutorId) -> Option<ContainerState> {
        let key = *self.0.index.borrow().get(&id)?;
        self.0.containers.borrow().get(key).cloned()
    }

    fn insert_resolved(&self, id: ExecutorId, value: AnyRc) {
        let mut containers = self.0.containers.borrow_mut();
        let mut index = self.0.index.borrow_mut();
        match index.get(&id).copied() {
            Some(key) => {
                containers[key] = ContainerState::Resolved(value);
            }
            None => {
                let key = containers.insert(ContainerState::Resolved(value));
                index.insert(id, key);
            }
        }
    }

    fn insert_pending(&self, id: ExecutorId, fut: SharedResolve) {
        let mut containers = self.0.containers.borrow_mut();
        let mut index = self.0.index.borrow_mut();
        match index.get(&id).copied() {
            Some(key) => containers[key] = ContainerState::Pending(fut),
            None => {
                let key = containers.insert(ContainerState::Pending(fut));
                index.insert(id, key);
            }
        }
    }

    fn remove_container(&self, id: ExecutorId) {
        if let Some(key) = self.0.index.borrow_mut().remove(&id) {
            self.0.containers.borrow_mut().remove(key);
        }
    }

    fn add_edge(&self, dep: ExecutorId, dependent: ExecutorId, dependent_node: &Rc<ExecutorNode>) {
        self.0
            .edges
            .borrow_mut()
            .entry(dep)
            .or_default()
            .insert(dependent);
        self.0
            .nodes
            .borrow_mut()
            .entry(dependent)
            .or_insert_with(|| Rc::clone(dependent_node));
    }

    fn dependents_of(&self, id: ExecutorId) -> Vec<(ExecutorId, Rc<ExecutorNode>)> {
        let ids: Vec<ExecutorId> = self
            .0
            .edges
            .borrow()
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        let nodes = self.0.nodes.borrow();
        ids.into_iter()
            .filter_map(|dep_id| nodes.get(&dep_id).map(|n| (dep_id, Rc::clone(n))))
            .collect()
    }

    fn run_cleanup(&self, id: ExecutorId) -> Vec<GraphError> {
        let callbacks = self.0.cleanups.borrow_mut().remove(&id).unwrap_or_default();
        let mut errors = Vec::new();
        for cb in callbacks {
            if let Err(e) = cb() {
                errors.push(e);
            }
        }
        errors
    }

    fn commit_cleanup(&self, id: ExecutorId, cbs: Vec<Box<dyn FnOnce() -> Result<(), GraphError>>>) {
        if !cbs.is_empty() {
            self.0.cleanups.borrow_mut().entry(id).or_default().extend(cbs);
        }
    }

    fn fire_change(&self, id: ExecutorId, value: &AnyRc) {
        for (_, (target, f)) in self.0.change_listeners.borrow().iter() {
            if *target == id {
                (f.as_ref())(value);
            }
        }
    }

    fn fire_update(&self, id: ExecutorId, value: &AnyRc) {
        for (_, (target, f)) in self.0.update_listeners.borrow().iter() {
            if *target == id {
                (f.as_ref())(value);
            }
        }
    }

    pub(crate) fn fire_error(&self, target: Option<ExecutorId>, err: &GraphError) {
        for (_, (t, f)) in self.0.error_listeners.borrow().iter() {
            if *t == target || t.is_none() {
                (f.as_ref())(err);
            }
        }
        for ext in self.extensions_snapshot() {
            ext.on_error(err, target, self);
        }
    }

    pub(crate) fn extensions_snapshot(&self) -> Vec<Rc<dyn Extension>> {
        self.0.extensions.borrow().values().cloned().collect()
    }

    pub(crate) fn meta_store(&self) -> Rc<RefCell<DataStore>> {
        Rc::clone(&self.0.meta)
    }

    pub fn meta(&self) -> DataStore {
        self.0.meta.borrow().clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.0.disposed.get()
    }

    fn mk_error(
        &self,
        build: impl FnOnce(ErrorContext) -> GraphError,
        stage: ResolutionStage,
        target: Option<ExecutorId>,
    ) -> GraphError {
        let mut ctx = ErrorContext::new(stage);
        if let Some(id) = target {
            ctx.dependency_chain = vec![id];
        }
        build(ctx)
    }

    fn check_disposed(&self, stage: ResolutionStage) -> Result<(), GraphError> {
        if self.0.disposed.get() {
            #[cfg(feature = "tracing")]
            tracing::warn!(?stage, "operation attempted on a disposed scope");
            Err(self.mk_error(|ctx| GraphError::ScopeDisposed { context: ctx }, stage, None))
        } else {
            Ok(())
        }
    }

    /// `resolve(e)` (§4.3).
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub async fn resolve<T: 'static>(&self, executor: &Executor<T>) -> Result<Rc<T>, GraphError> {
        let v = resolve_node(self.clone(), Rc::clone(&executor.node), Vec::new()).await?;
        Ok(downcast(&v))
    }

    /// `accessor(e)` (§4.3).
    pub fn accessor<T: 'static>(&self, executor: &Executor<T>) -> Accessor<T> {
        Accessor {
            scope: self.clone(),
            id: executor.id,
            node: Rc::clone(&executor.node),
            _marker: std::marker::PhantomData,
        }
    }

    /// `update(e, v or fn)` (§4.3, §4.4).
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub async fn update<T: 'static>(
        &self,
        executor: &Executor<T>,
        mutation: Mutation<T>,
    ) -> Result<Rc<T>, GraphError>
    where
        T: Clone,
    {
        self.update_handle(executor.id, Rc::clone(&executor.node), mutation).await
    }

    async fn update_handle<T: 'static>(
        &self,
        id: ExecutorId,
        node: Rc<ExecutorNode>,
        mutation: Mutation<T>,
    ) -> Result<Rc<T>, GraphError>
    where
        T: Clone,
    {
        self.check_disposed(ResolutionStage::Update)?;
        if !node.mutable {
            #[cfg(feature = "tracing")]
            tracing::warn!(?id, "update attempted on a non-mutable executor");
            return Err(self.mk_error(
                |ctx| GraphError::NotMutable { context: ctx },
                ResolutionStage::Update,
                Some(id),
            ));
        }
        // Ensure resolved at least once.
        match self.lookup_state(id) {
            None => {
                resolve_node(self.clone(), Rc::clone(&node), Vec::new()).await?;
            }
            Some(ContainerState::Pending(_)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(?id, "update requested while initial resolution is still pending");
                return Err(self.mk_error(
                    |ctx| GraphError::ResolutionInProgress { context: ctx },
                    ResolutionStage::Update,
                    Some(id),
                ));
            }
            Some(ContainerState::Updating(fut, _)) => {
                fut.await?;
            }
            Some(ContainerState::Resolved(_)) => {}
        }
        let prev = match self.lookup_state(id) {
            Some(ContainerState::Resolved(v)) => downcast::<T>(&v),
            _ => {
                #[cfg(feature = "tracing")]
                tracing::debug!(?id, "update found no resolved container after initial resolution");
                return Err(self.mk_error(
                    |ctx| GraphError::ResolutionInProgress { context: ctx },
                    ResolutionStage::Update,
                    Some(id),
                ))
            }
        };

        for err in self.run_cleanup(id) {
            self.report_cleanup_error(err);
        }

        let ready_value: Result<AnyRc, GraphError> = Ok(Rc::clone(&prev) as AnyRc);
        let placeholder: SharedResolve =
            (Box::pin(futures::future::ready(ready_value)) as PinnedFuture<Result<AnyRc, GraphError>>)
                .shared();
        {
            let mut containers = self.0.containers.borrow_mut();
            let key = *self.0.index.borrow().get(&id).expect("resolved container must have a slot");
            containers[key] = ContainerState::Updating(placeholder, Rc::clone(&prev) as AnyRc);
        }

        let new_value = mutation.apply(Rc::clone(&prev));
        let new_rc: AnyRc = Rc::new(new_value);
        self.insert_resolved(id, Rc::clone(&new_rc));
        self.fire_update(id, &new_rc);
        self.fire_change(id, &new_rc);

        self.cascade(id).await?;

        Ok(downcast(&new_rc))
    }

    fn report_cleanup_error(&self, err: GraphError) {
        let handled = self
            .extensions_snapshot()
            .iter()
            .any(|ext| ext.on_cleanup_error(&err));
        if !handled {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %err, "unhandled cleanup error");
            self.fire_error(None, &err);
        }
    }

    /// Breadth-first cascade: re-evaluate every reactive dependent of `id`,
    /// one level at a time, all dependents of a level running concurrently
    /// (§4.4).
    fn cascade(&self, id: ExecutorId) -> PinnedFuture<Result<(), GraphError>> {
        let scope = self.clone();
        Box::pin(async move {
            let dependents = scope.dependents_of(id);
            if dependents.is_empty() {
                return Ok(());
            }
            let futs = dependents.into_iter().map(|(dep_id, node)| {
                let scope = scope.clone();
                async move {
                    for err in scope.run_cleanup(dep_id) {
                        scope.report_cleanup_error(err);
                    }
                    scope.remove_container(dep_id);
                    let value = resolve_node(scope.clone(), Rc::clone(&node), Vec::new()).await?;
                    scope.fire_update(dep_id, &value);
                    scope.fire_change(dep_id, &value);
                    scope.cascade(dep_id).await
                }
            });
            let results = futures::future::join_all(futs).await;
            results.into_iter().collect::<Result<Vec<()>, GraphError>>()?;
            Ok(())
        })
    }

    /// `release(e)` (§4.3). Silent if absent.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub fn release<T: 'static>(&self, executor: &Executor<T>) {
        self.release_id(executor.id);
    }

    fn release_id(&self, id: ExecutorId) {
        self.remove_container(id);
        for err in self.run_cleanup(id) {
            self.report_cleanup_error(err);
        }
        self.0.edges.borrow_mut().remove(&id);
        for set in self.0.edges.borrow_mut().values_mut() {
            set.shift_remove(&id);
        }
    }

    /// `reset(e)` (§4.3) — `release` then re-resolve and cascade.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub async fn reset<T: 'static + Clone>(&self, executor: &Executor<T>) -> Result<Rc<T>, GraphError> {
        self.release(executor);
        let v = self.resolve(executor).await?;
        self.cascade(executor.id).await?;
        Ok(v)
    }

    /// `dispose()` (§4.3, §5). Idempotent; runs all cleanups in reverse
    /// resolution order.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub fn dispose(&self) {
        if self.0.disposed.get() {
            return;
        }
        self.0.disposed.set(true);
        let order: Vec<ExecutorId> = {
            let mut o = self.0.resolution_order.borrow_mut();
            let out = o.clone();
            o.clear();
            out
        };
        let mut unhandled: Vec<std::sync::Arc<dyn std::error::Error + Send + Sync>> = Vec::new();
        for id in order.into_iter().rev() {
            for err in self.run_cleanup(id) {
                let handled = self
                    .extensions_snapshot()
                    .iter()
                    .any(|ext| ext.on_cleanup_error(&err));
                if !handled {
                    unhandled.push(std::sync::Arc::new(err));
                }
            }
        }
        self.0.containers.borrow_mut().clear();
        self.0.index.borrow_mut().clear();
        self.0.edges.borrow_mut().clear();
        self.0.cleanups.borrow_mut().clear();
        if !unhandled.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::warn!(count = unhandled.len(), "cleanup callback(s) failed during dispose");
            let err = GraphError::CleanupAggregate {
                errors: unhandled,
                context: ErrorContext::new(ResolutionStage::Dispose),
            };
            self.fire_error(None, &err);
        }
        for ext in self.extensions_snapshot() {
            ext.dispose(self);
        }
    }

    /// `on(e, fn)` — fires after both initial resolution and every update.
    pub fn on<T: 'static>(&self, executor: &Executor<T>, f: impl Fn(&T) + 'static) -> Unsubscribe {
        self.on_change_id(executor.id, f)
    }

    /// `on_update(e, fn)` — fires only on `update`/`reset` cascades, not on
    /// the initial resolve.
    pub fn on_update<T: 'static>(
        &self,
        executor: &Executor<T>,
        f: impl Fn(&T) + 'static,
    ) -> Unsubscribe {
        self.on_update_id(executor.id, f)
    }

    fn on_change_id<T: 'static>(&self, id: ExecutorId, f: impl Fn(&T) + 'static) -> Unsubscribe {
        let token = self.0.next_token();
        let wrapped: ChangeListener = Rc::new(move |v: &AnyRc| {
            if let Some(v) = v.downcast_ref::<T>() {
                f(v);
            }
        });
        self.0.change_listeners.borrow_mut().insert(token, (id, wrapped));
        let inner = Rc::clone(&self.0);
        Unsubscribe(Box::new(move || {
            inner.change_listeners.borrow_mut().shift_remove(&token);
        }))
    }

    fn on_update_id<T: 'static>(&self, id: ExecutorId, f: impl Fn(&T) + 'static) -> Unsubscribe {
        let token = self.0.next_token();
        let wrapped: ChangeListener = Rc::new(move |v: &AnyRc| {
            if let Some(v) = v.downcast_ref::<T>() {
                f(v);
            }
        });
        self.0.update_listeners.borrow_mut().insert(token, (id, wrapped));
        let inner = Rc::clone(&self.0);
        Unsubscribe(Box::new(move || {
            inner.update_listeners.borrow_mut().shift_remove(&token);
        }))
    }

    /// `on_error(e?, fn)` (§4.3). `None` registers a global sink.
    pub fn on_error(
        &self,
        executor: Option<ExecutorId>,
        f: impl Fn(&GraphError) + 'static,
    ) -> Unsubscribe {
        let token = self.0.next_token();
        self.0
            .error_listeners
            .borrow_mut()
            .insert(token, (executor, Rc::new(f)));
        let inner = Rc::clone(&self.0);
        Unsubscribe(Box::new(move || {
            inner.error_listeners.borrow_mut().shift_remove(&token);
        }))
    }

    /// `use(extension)` (§4.3, §4.5).
    pub fn use_extension(&self, extension: impl Extension) -> Unsubscribe {
        self.use_extension_rc(Rc::new(extension))
    }

    fn use_extension_rc(&self, extension: Rc<dyn Extension>) -> Unsubscribe {
        extension.init(self);
        let token = self.0.next_token();
        self.0.extensions.borrow_mut().insert(token, Rc::clone(&extension));
        let inner = Rc::clone(&self.0);
        Unsubscribe(Box::new(move || {
            inner.extensions.borrow_mut().shift_remove(&token);
        }))
    }
}

/// Resolves one dependency slot per its [`ViewKind`], registering a reactive
/// edge when appropriate (§4.2, §4.4).
fn resolve_dep_ref(
    scope: Scope,
    dep: DepRef,
    dependent: ExecutorId,
    dependent_node: Rc<ExecutorNode>,
    chain: Vec<ExecutorId>,
) -> PinnedFuture<Result<AnyRc, GraphError>> {
    Box::pin(async move {
        match dep.view {
            ViewKind::Eager => resolve_node(scope, Rc::clone(&dep.node), chain).await,
            ViewKind::Reactive => {
                let v = resolve_node(scope.clone(), Rc::clone(&dep.node), chain).await?;
                scope.add_edge(dep.id, dependent, &dependent_node);
                Ok(v)
            }
            ViewKind::Static => {
                resolve_node(scope.clone(), Rc::clone(&dep.node), chain).await?;
                let acc = UntypedAccessor {
                    scope: scope.clone(),
                    id: dep.id,
                    node: Rc::clone(&dep.node),
                };
                Ok(Rc::new(acc) as AnyRc)
            }
            ViewKind::Lazy => {
                let acc = UntypedAccessor {
                    scope: scope.clone(),
                    id: dep.id,
                    node: Rc::clone(&dep.node),
                };
                Ok(Rc::new(acc) as AnyRc)
            }
        }
    })
}

fn resolve_deps(
    scope: Scope,
    node: Rc<ExecutorNode>,
    chain: Vec<ExecutorId>,
) -> PinnedFuture<Result<ResolvedDeps, GraphError>> {
    Box::pin(async move {
        match node.deps.clone() {
            DepsSpec::None => Ok(ResolvedDeps::None),
            DepsSpec::Single(dep) => {
                let v = resolve_dep_ref(scope, dep, node.id, Rc::clone(&node), chain).await?;
                Ok(ResolvedDeps::Single(v))
            }
            DepsSpec::Seq(deps) => {
                let mut out = Vec::with_capacity(deps.len());
                for dep in deps {
                    out.push(
                        resolve_dep_ref(scope.clone(), dep, node.id, Rc::clone(&node), chain.clone())
                            .await?,
                    );
                }
                Ok(ResolvedDeps::Seq(out))
            }
            DepsSpec::Map(deps) => {
                let mut out = IndexMap::new();
                for (k, dep) in deps {
                    let v =
                        resolve_dep_ref(scope.clone(), dep, node.id, Rc::clone(&node), chain.clone())
                            .await?;
                    out.insert(k, v);
                }
                Ok(ResolvedDeps::Map(out))
            }
            DepsSpec::Forward(cell) => {
                let dep = cell.borrow().clone().ok_or_else(|| {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(?node.id, "forward ref resolved before it was tied");
                    GraphError::ForwardRefNotTied {
                        context: ErrorContext::new(ResolutionStage::DependencyResolution),
                    }
                })?;
                let v = resolve_dep_ref(scope, dep, node.id, Rc::clone(&node), chain).await?;
                Ok(ResolvedDeps::Single(v))
            }
        }
    })
}

/// The resolution algorithm of §4.3, steps 1-10.
pub(crate) fn resolve_node(
    scope: Scope,
    node: Rc<ExecutorNode>,
    chain: Vec<ExecutorId>,
) -> PinnedFuture<Result<AnyRc, GraphError>> {
    Box::pin(async move {
        scope.check_disposed(ResolutionStage::DependencyResolution)?;
        let id = node.id;

        if chain.contains(&id) {
            let mut path = chain;
            path.push(id);
            #[cfg(feature = "tracing")]
            tracing::warn!(?path, "circular dependency detected");
            return Err(GraphError::CircularDependency {
                context: ErrorContext::new(ResolutionStage::DependencyResolution)
                    .with_chain(path.clone())
                    .with_info(format!(
                        "circular_path: {}",
                        path.iter().map(|i| format!("{i:?}")).collect::<Vec<_>>().join(" -> ")
                    )),
            });
        }

        match scope.lookup_state(id) {
            Some(ContainerState::Resolved(v)) => return Ok(v),
            Some(ContainerState::Pending(fut)) => return fut.await,
            Some(ContainerState::Updating(fut, _)) => {
                fut.await?;
                return resolve_node(scope, node, chain).await;
            }
            None => {}
        }

        let mut child_chain = chain;
        child_chain.push(id);

        let preset_factory = scope.0.preset_factories.borrow().get(&id).cloned();
        let scope2 = scope.clone();
        let node2 = Rc::clone(&node);
        let compute: PinnedFuture<Result<AnyRc, GraphError>> = Box::pin(async move {
            let sink = CleanupSink::default();
            let value = if let Some(factory) = preset_factory {
                let fut = (factory.as_ref())(ResolvedDeps::None, scope2.clone(), sink.clone());
                fut.await?
            } else {
                let resolved_deps = resolve_deps(scope2.clone(), Rc::clone(&node2), child_chain).await?;
                let op = Operation::Resolve { executor: id };
                let ctx = scope2.meta_store();
                let factory = Rc::clone(&node2.factory);
                let scope3 = scope2.clone();
                let sink2 = sink.clone();
                run_pipeline(&scope2.extensions_snapshot(), op, ctx, move || {
                    (factory.as_ref())(resolved_deps, scope3, sink2)
                })
                .await?
            };
            scope2.commit_cleanup(id, sink.take());
            Ok(value)
        });

        let shared = compute.shared();
        scope.insert_pending(id, shared.clone());
        let result = shared.await;
        match &result {
            Ok(value) => {
                scope.insert_resolved(id, Rc::clone(value));
                scope.0.resolution_order.borrow_mut().push(id);
                scope.fire_change(id, value);
            }
            Err(e) => {
                scope.remove_container(id);
                scope.fire_error(Some(id), e);
            }
        }
        result
    })
}
