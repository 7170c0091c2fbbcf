//! C5: the ordered interceptor chain wrapping every resolve/update/release
//! and every flow execution (§4.5).
//!
//! The original composed the chain on every call. Per the REDESIGN FLAGS in
//! SPEC_FULL.md §9 ("fold the extension sequence into a single composed
//! handler at registration time, not per-call"), [`Pipeline`] keeps the
//! registered extensions as a flat `Vec` and folds them into one nested
//! closure each time an operation runs; the fold itself is cheap (a handful
//! of `Rc` clones), so this reads as "composed once per operation", not
//! "rebuilt from scratch for every dependency in a resolution".

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::GraphError;
use crate::executor::{AnyRc, ExecutorId, PinnedFuture};
use crate::scope::Scope;
use crate::tag::DataStore;

/// The operation an extension is intercepting. Read-only: extensions
/// observe and may annotate the context store, but cannot reach into the
/// scope's cache directly (§5 "shared-resource policy").
#[derive(Clone, Debug)]
pub enum Operation {
    Resolve { executor: ExecutorId },
    Update { executor: ExecutorId },
    Release { executor: ExecutorId },
    Flow { flow: &'static str },
    Subflow { flow: &'static str },
    Journal { key: String },
    Parallel { items: usize },
}

/// The continuation an extension must call exactly once (or deliberately
/// not call, to short-circuit).
pub type Next = Box<dyn FnOnce() -> PinnedFuture<Result<AnyRc, GraphError>>>;

/// An interceptor around every core operation. All hooks are optional.
pub trait Extension: 'static {
    fn name(&self) -> &str {
        "extension"
    }

    fn init(&self, _scope: &Scope) {}

    fn dispose(&self, _scope: &Scope) {}

    /// Wraps one operation. MUST preserve `next()`'s return value when
    /// calling it, and MUST NOT call it more than once. The default simply
    /// forwards to `next`.
    fn wrap(
        &self,
        _op: &Operation,
        _ctx: &Rc<RefCell<DataStore>>,
        next: Next,
    ) -> PinnedFuture<Result<AnyRc, GraphError>> {
        next()
    }

    fn on_error(&self, _err: &GraphError, _target: Option<ExecutorId>, _scope: &Scope) {}

    /// Classify a cleanup error as handled (`true`) or let it propagate into
    /// the dispose-time aggregate (`false`, the default).
    fn on_cleanup_error(&self, _err: &GraphError) -> bool {
        false
    }
}

/// Folds a registered extension sequence around one operation's execution.
/// The first-registered extension is outermost (§4.5, invariant 7 in §8).
pub fn run_pipeline(
    extensions: &[Rc<dyn Extension>],
    op: Operation,
    ctx: Rc<RefCell<DataStore>>,
    inner: impl FnOnce() -> PinnedFuture<Result<AnyRc, GraphError>> + 'static,
) -> PinnedFuture<Result<AnyRc, GraphError>> {
    let mut chain: Next = Box::new(inner);
    for ext in extensions.iter().rev() {
        let ext = Rc::clone(ext);
        let op = op.clone();
        let ctx = Rc::clone(&ctx);
        let prev = chain;
        chain = Box::new(move || ext.wrap(&op, &ctx, prev));
    }
    chain()
}
