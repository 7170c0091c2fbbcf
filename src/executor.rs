//! C2: the immutable description of a factory — its dependency spec, its
//! metadata, and its resolution mode.
//!
//! The original let an executor be its own map key (object identity). There
//! is no stable object identity to lean on here, so each executor carries a
//! monotonic [`ExecutorId`] (the same interning trick [`crate::tag::TagKey`]
//! uses) plus an `Rc` to its frozen node. The id is what scopes key their
//! resolution cache on; the `Rc` is what lets a dependent walk to its
//! dependency's factory without a global registry (see SPEC_FULL.md §9 on
//! why this crate never reaches for a thread-local singleton).

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::error::GraphError;
use crate::scope::Scope;
use crate::tag::{MetaContainer, Tagged};

pub(crate) type PinnedFuture<T> = Pin<Box<dyn Future<Output = T>>>;
pub(crate) type AnyRc = Rc<dyn Any>;
pub(crate) type BoxedFactory = Rc<
    dyn Fn(ResolvedDeps, Scope, crate::scope::CleanupSink) -> PinnedFuture<Result<AnyRc, GraphError>>,
>;

/// Stable identity of an executor, independent of any particular scope.
/// Used as the resolution cache key and as the dependency-edge index key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutorId(u64);

impl ExecutorId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        ExecutorId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExecutorId({})", self.0)
    }
}

/// Which view of an executor a dependent consumed it through. Controls
/// whether the dependent is registered in the reactive edge index (§4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewKind {
    Eager,
    Lazy,
    Reactive,
    Static,
}

/// The frozen, type-erased definition shared by every clone of an
/// [`Executor`]. Never mutated after construction.
pub(crate) struct ExecutorNode {
    pub id: ExecutorId,
    pub deps: DepsSpec,
    pub metas: Vec<Tagged>,
    pub mutable: bool,
    pub name: Option<&'static str>,
    pub factory: BoxedFactory,
}

impl fmt::Debug for ExecutorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorNode")
            .field("id", &self.id)
            .field("mutable", &self.mutable)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// One entry in a [`DepsSpec`]: the dependency's identity, its node (so it
/// can be resolved without a registry lookup), and which view it was
/// consumed through.
#[derive(Clone)]
pub struct DepRef {
    pub(crate) id: ExecutorId,
    pub(crate) view: ViewKind,
    pub(crate) node: Rc<ExecutorNode>,
}

impl fmt::Debug for DepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepRef")
            .field("id", &self.id)
            .field("view", &self.view)
            .finish()
    }
}

/// An executor's dependency spec, frozen at construction (§3 invariant).
///
/// `Forward` is the one narrow escape hatch from that invariant: it exists
/// solely so tests can build a self-referential graph to exercise circular
/// detection (§9 "cyclic structural references"), via
/// [`Executor::forward_ref`] / [`ForwardRef::tie`].
#[derive(Clone, Default)]
pub enum DepsSpec {
    #[default]
    None,
    Single(DepRef),
    Seq(Vec<DepRef>),
    Map(IndexMap<String, DepRef>),
    Forward(Rc<RefCell<Option<DepRef>>>),
}

/// The shape-mirrored, still-type-erased input handed to a factory: a
/// single value, a positionally-aligned sequence, or a string-keyed mapping,
/// matching whichever [`DepsSpec`] shape the executor declared.
#[derive(Clone, Default)]
pub enum ResolvedDeps {
    #[default]
    None,
    Single(AnyRc),
    Seq(Vec<AnyRc>),
    Map(IndexMap<String, AnyRc>),
}

impl ResolvedDeps {
    /// Downcasts the single resolved dependency. Panics if the spec wasn't
    /// `Single` or the stored type doesn't match `T` — both are
    /// programmer errors (the factory closure is paired with its own
    /// `derive` call and knows its own shape).
    pub fn single<T: 'static>(&self) -> Rc<T> {
        match self {
            ResolvedDeps::Single(v) => downcast(v),
            _ => panic!("ResolvedDeps: expected Single, found a different shape"),
        }
    }

    pub fn seq<T: 'static>(&self, index: usize) -> Rc<T> {
        match self {
            ResolvedDeps::Seq(v) => downcast(
                v.get(index)
                    .unwrap_or_else(|| panic!("ResolvedDeps::seq: index {index} out of range")),
            ),
            _ => panic!("ResolvedDeps: expected Seq, found a different shape"),
        }
    }

    pub fn map<T: 'static>(&self, key: &str) -> Rc<T> {
        match self {
            ResolvedDeps::Map(m) => downcast(
                m.get(key)
                    .unwrap_or_else(|| panic!("ResolvedDeps::map: key `{key}` not present")),
            ),
            _ => panic!("ResolvedDeps: expected Map, found a different shape"),
        }
    }

    /// Like [`Self::single`], but for a dependency consumed through
    /// [`Lazy`]/[`StaticView`]: the slot holds an accessor handle rather than
    /// a forced value (§4.2).
    pub fn single_accessor<T: 'static>(&self) -> crate::scope::Accessor<T> {
        match self {
            ResolvedDeps::Single(v) => downcast_accessor(v),
            _ => panic!("ResolvedDeps: expected Single, found a different shape"),
        }
    }

    pub fn seq_accessor<T: 'static>(&self, index: usize) -> crate::scope::Accessor<T> {
        match self {
            ResolvedDeps::Seq(v) => downcast_accessor(
                v.get(index)
                    .unwrap_or_else(|| panic!("ResolvedDeps::seq: index {index} out of range")),
            ),
            _ => panic!("ResolvedDeps: expected Seq, found a different shape"),
        }
    }

    pub fn map_accessor<T: 'static>(&self, key: &str) -> crate::scope::Accessor<T> {
        match self {
            ResolvedDeps::Map(m) => downcast_accessor(
                m.get(key)
                    .unwrap_or_else(|| panic!("ResolvedDeps::map: key `{key}` not present")),
            ),
            _ => panic!("ResolvedDeps: expected Map, found a different shape"),
        }
    }
}

fn downcast_accessor<T: 'static>(v: &AnyRc) -> crate::scope::Accessor<T> {
    Rc::clone(v)
        .downcast::<crate::scope::UntypedAccessor>()
        .unwrap_or_else(|_| panic!("dependency value was not a lazy/static accessor"))
        .typed::<T>()
}

fn downcast<T: 'static>(v: &AnyRc) -> Rc<T> {
    Rc::clone(v)
        .downcast::<T>()
        .unwrap_or_else(|_| panic!("dependency value did not have the expected type"))
}

/// A value-typed, cheap-to-clone handle to a factory node (§3).
///
/// `Executor<T>` shares its underlying [`ExecutorNode`] (via `Rc`) with
/// every clone and with every [`Lazy`]/[`Reactive`]/[`StaticView`] taken
/// from it, so all views resolve through the same cache entry.
pub struct Executor<T: 'static> {
    pub(crate) id: ExecutorId,
    pub(crate) node: Rc<ExecutorNode>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Executor<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            node: Rc::clone(&self.node),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Executor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Executor").field(&self.id).finish()
    }
}

impl<T> MetaContainer for Executor<T> {
    fn metas(&self) -> &[Tagged] {
        &self.node.metas
    }
}

impl<T: 'static> Executor<T> {
    pub fn id(&self) -> ExecutorId {
        self.id
    }

    pub fn is_mutable(&self) -> bool {
        self.node.mutable
    }

    pub fn name(&self) -> Option<&'static str> {
        self.node.name
    }

    /// The default (eager) view: resolving a dependent that consumes this
    /// view forces resolution and does not register reactivity.
    pub fn eager(&self) -> Self {
        self.clone()
    }

    /// The lazy view: a dependent receives an accessor instead of a forced
    /// value and may resolve on demand.
    pub fn lazy(&self) -> Lazy<T> {
        Lazy(self.clone())
    }

    /// The reactive view: consuming this view as a dependency registers the
    /// dependent in the edge index, so `update`/`reset` of this executor
    /// cascades to it (§4.4).
    pub fn reactive(&self) -> Reactive<T> {
        Reactive(self.clone())
    }

    /// The static view: resolves like eager but signals "I want the handle
    /// for imperative `update`/`subscribe`, not the reactivity" — it is
    /// deliberately *not* added to the edge index.
    pub fn static_view(&self) -> StaticView<T> {
        StaticView(self.clone())
    }
}

/// Lazy view of an [`Executor`] (§4.2).
pub struct Lazy<T: 'static>(Executor<T>);
/// Reactive view of an [`Executor`] (§4.2, §4.4).
pub struct Reactive<T: 'static>(Executor<T>);
/// Static view of an [`Executor`] (§4.2).
pub struct StaticView<T: 'static>(Executor<T>);

impl<T> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        Lazy(self.0.clone())
    }
}
impl<T> Clone for Reactive<T> {
    fn clone(&self) -> Self {
        Reactive(self.0.clone())
    }
}
impl<T> Clone for StaticView<T> {
    fn clone(&self) -> Self {
        StaticView(self.0.clone())
    }
}

impl<T: 'static> From<Executor<T>> for DepRef {
    fn from(e: Executor<T>) -> Self {
        DepRef {
            id: e.id,
            view: ViewKind::Eager,
            node: e.node,
        }
    }
}

impl<T: 'static> From<Lazy<T>> for DepRef {
    fn from(e: Lazy<T>) -> Self {
        DepRef {
            id: e.0.id,
            view: ViewKind::Lazy,
            node: e.0.node,
        }
    }
}

impl<T: 'static> From<Reactive<T>> for DepRef {
    fn from(e: Reactive<T>) -> Self {
        DepRef {
            id: e.0.id,
            view: ViewKind::Reactive,
            node: e.0.node,
        }
    }
}

impl<T: 'static> From<StaticView<T>> for DepRef {
    fn from(e: StaticView<T>) -> Self {
        DepRef {
            id: e.0.id,
            view: ViewKind::Static,
            node: e.0.node,
        }
    }
}

/// Converts a builder-friendly value into a frozen [`DepsSpec`]. Implemented
/// for `()` (no deps), any single view of an executor, and pre-built
/// sequences/mappings of [`DepRef`] for the `ordered sequence`/`mapping`
/// shapes in §3.
pub trait IntoDepsSpec {
    fn into_deps_spec(self) -> DepsSpec;
}

impl IntoDepsSpec for () {
    fn into_deps_spec(self) -> DepsSpec {
        DepsSpec::None
    }
}

impl<D: Into<DepRef>> IntoDepsSpec for D {
    fn into_deps_spec(self) -> DepsSpec {
        DepsSpec::Single(self.into())
    }
}

/// Wrapper requesting the `ordered sequence` dependency shape; build with
/// [`seq`].
pub struct SeqDeps(pub Vec<DepRef>);

impl IntoDepsSpec for SeqDeps {
    fn into_deps_spec(self) -> DepsSpec {
        DepsSpec::Seq(self.0)
    }
}

/// Builds an `ordered sequence of executors` dependency spec.
pub fn seq(deps: Vec<DepRef>) -> SeqDeps {
    SeqDeps(deps)
}

/// Wrapper requesting the `mapping from string to executor` dependency
/// shape; build with [`map`].
pub struct MapDeps(pub IndexMap<String, DepRef>);

impl IntoDepsSpec for MapDeps {
    fn into_deps_spec(self) -> DepsSpec {
        DepsSpec::Map(self.0)
    }
}

/// Builds a `mapping from string to executor` dependency spec; iteration
/// order is insertion order, matching the ordering guarantee in §4.2.
pub fn map(entries: Vec<(impl Into<String>, DepRef)>) -> MapDeps {
    let mut m = IndexMap::new();
    for (k, v) in entries {
        m.insert(k.into(), v);
    }
    MapDeps(m)
}

/// A forward-reference cell: a dependency slot an executor is born with
/// before its value is known, tied later via [`ForwardRef::tie`]. The only
/// sanctioned way to build a cyclic graph, and only so circular-dependency
/// detection has something to detect (§9).
pub struct ForwardRef<T: 'static> {
    cell: Rc<RefCell<Option<DepRef>>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> ForwardRef<T> {
    pub fn tie(&self, to: impl Into<DepRef>) {
        *self.cell.borrow_mut() = Some(to.into());
    }
}

impl Executor<()> {
    /// Creates an executor whose single dependency is an untied
    /// [`ForwardRef`], plus the handle used to tie it. See the struct docs.
    pub fn forward_ref<T: 'static, U: 'static, F, Fut>(
        factory: F,
        metas: Vec<Tagged>,
    ) -> (Executor<U>, ForwardRef<T>)
    where
        F: Fn(ResolvedDeps, Scope, crate::scope::CleanupSink) -> Fut + 'static,
        Fut: Future<Output = Result<U, GraphError>> + 'static,
    {
        let cell = Rc::new(RefCell::new(None));
        let deps = DepsSpec::Forward(Rc::clone(&cell));
        let exec = build_executor(deps, factory, metas, false, None);
        (exec, ForwardRef { cell, _marker: PhantomData })
    }
}

fn build_executor<T: 'static, F, Fut>(
    deps: DepsSpec,
    factory: F,
    metas: Vec<Tagged>,
    mutable: bool,
    name: Option<&'static str>,
) -> Executor<T>
where
    F: Fn(ResolvedDeps, Scope, crate::scope::CleanupSink) -> Fut + 'static,
    Fut: Future<Output = Result<T, GraphError>> + 'static,
{
    let id = ExecutorId::next();
    let factory: BoxedFactory = Rc::new(move |deps, scope, sink| {
        let fut = factory(deps, scope, sink);
        Box::pin(async move { fut.await.map(|v| Rc::new(v) as AnyRc) })
    });
    let node = Rc::new(ExecutorNode {
        id,
        deps,
        metas,
        mutable,
        name,
        factory,
    });
    Executor {
        id,
        node,
        _marker: PhantomData,
    }
}

/// `provide(factory, metas)` — a dependency-free, mutable (`update`-able)
/// executor.
pub fn provide<T: 'static, F, Fut>(factory: F, metas: Vec<Tagged>) -> Executor<T>
where
    F: Fn(Scope, crate::scope::CleanupSink) -> Fut + 'static,
    Fut: Future<Output = Result<T, GraphError>> + 'static,
{
    build_executor(
        DepsSpec::None,
        move |_deps, scope, sink| factory(scope, sink),
        metas,
        true,
        None,
    )
}

/// `derive(deps_spec, factory, metas)` — a computed, non-mutable executor.
/// The resolved input mirrors the shape of `deps` (§4.2 ordering guarantee).
pub fn derive<T: 'static, D, F, Fut>(deps: D, factory: F, metas: Vec<Tagged>) -> Executor<T>
where
    D: IntoDepsSpec,
    F: Fn(ResolvedDeps, Scope, crate::scope::CleanupSink) -> Fut + 'static,
    Fut: Future<Output = Result<T, GraphError>> + 'static,
{
    build_executor(deps.into_deps_spec(), factory, metas, false, None)
}

/// A dependency-free substitute for `executor`, consulted at scope
/// construction (§4.2, §4.3) instead of running `executor`'s factory.
pub struct Preset {
    pub(crate) id: ExecutorId,
    pub(crate) value: PresetValue,
}

pub(crate) enum PresetValue {
    Value(AnyRc),
    Factory(BoxedFactory),
}

/// `preset(executor, value)` — the value is used verbatim; `executor`'s
/// factory is never invoked for this scope.
pub fn preset<T: 'static>(executor: &Executor<T>, value: T) -> Preset {
    Preset {
        id: executor.id,
        value: PresetValue::Value(Rc::new(value)),
    }
}

/// `preset(executor, factory)` — the factory runs (once, lazily, with no
/// dependencies resolved) in place of `executor`'s own factory.
pub fn preset_with<T: 'static, F, Fut>(executor: &Executor<T>, factory: F) -> Preset
where
    F: Fn(Scope, crate::scope::CleanupSink) -> Fut + 'static,
    Fut: Future<Output = Result<T, GraphError>> + 'static,
{
    let boxed: BoxedFactory = Rc::new(move |_deps, scope, sink| {
        let fut = factory(scope, sink);
        Box::pin(async move { fut.await.map(|v| Rc::new(v) as AnyRc) })
    });
    Preset {
        id: executor.id,
        value: PresetValue::Factory(boxed),
    }
}
