//! C1: symbol-keyed, schema-validated metadata attachable to executors,
//! flows, scopes, and per-flow data stores.
//!
//! The original design let a single `source` argument be a data store, an
//! ordered list of tagged values, or anything carrying `.metas` and picked
//! the right behavior by probing its runtime shape. That kind of dispatch
//! has no clean analogue in Rust's type system, so here the three shapes are
//! three concrete `TagSource` impls instead (see REDESIGN FLAGS in
//! SPEC_FULL.md §9).

use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::error::{GraphError, ValidationIssue, ValidationIssues};

/// Uniquely identifies a [`Tag`], independent of its label. Two tags
/// constructed separately never collide even if given the same label.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagKey(u64);

impl fmt::Debug for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagKey({})", self.0)
    }
}

impl TagKey {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        TagKey(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// An opaque validator, consumed by the core but owned by a collaborator
/// (e.g. a schema library integration). Mirrors §6: `validate(v) -> value |
/// issues`. Implementations MUST be synchronous; there is no async variant
/// at this boundary — see [`GraphError::ValidationAsyncNotSupported`].
pub trait Validate<T>: 'static {
    fn validate(&self, value: T) -> Result<T, ValidationIssues>;
}

/// A validator that accepts everything. The default for `tag()` calls that
/// don't need schema enforcement.
pub struct Accept;

impl<T> Validate<T> for Accept {
    fn validate(&self, value: T) -> Result<T, ValidationIssues> {
        Ok(value)
    }
}

/// A validator built from a plain predicate closure, for the common case of
/// "reject if this returns false" without pulling in a schema crate.
pub struct Predicate<F> {
    message: &'static str,
    check: F,
}

impl<F> Predicate<F> {
    pub fn new(message: &'static str, check: F) -> Self {
        Self { message, check }
    }
}

impl<T, F> Validate<T> for Predicate<F>
where
    T: 'static,
    F: Fn(&T) -> bool + 'static,
{
    fn validate(&self, value: T) -> Result<T, ValidationIssues> {
        if (self.check)(&value) {
            Ok(value)
        } else {
            Err(ValidationIssues(vec![ValidationIssue {
                message: self.message.to_string(),
            }]))
        }
    }
}

/// A validator built from an arbitrary fallible closure, for schemas that
/// need to transform the value (not just accept/reject it) or report more
/// than one issue at a time. `custom(|v| ...)` is the general form;
/// [`Predicate`] stays around for the common boolean-check case.
pub struct Custom<F> {
    check: F,
}

impl<T, F> Validate<T> for Custom<F>
where
    T: 'static,
    F: Fn(T) -> Result<T, ValidationIssues> + 'static,
{
    fn validate(&self, value: T) -> Result<T, ValidationIssues> {
        (self.check)(value)
    }
}

/// `custom(fn)` — wraps an arbitrary `T -> Result<T, ValidationIssues>`
/// closure as a [`Validate`] impl, for schema needs [`Predicate`] can't
/// express.
pub fn custom<T: 'static>(
    check: impl Fn(T) -> Result<T, ValidationIssues> + 'static,
) -> Custom<impl Fn(T) -> Result<T, ValidationIssues> + 'static> {
    Custom { check }
}

/// A single validated key/value pair, type-erased so heterogeneous tags can
/// live side by side in a [`DataStore`] or a metadata sequence.
#[derive(Clone)]
pub struct Tagged {
    pub(crate) key: TagKey,
    pub(crate) label: Option<&'static str>,
    value: Rc<dyn Any>,
}

impl fmt::Debug for Tagged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tagged")
            .field("key", &self.key)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// A symbol-keyed, schema-validated metadata accessor.
///
/// `Tag<T>` is itself just a capability to read/write `T`s under a private
/// [`TagKey`]; it carries no storage of its own.
pub struct Tag<T: 'static> {
    key: TagKey,
    label: Option<&'static str>,
    default: Option<Rc<T>>,
    validator: Rc<dyn Validate<T>>,
}

impl<T: 'static> Clone for Tag<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            label: self.label,
            default: self.default.clone(),
            validator: Rc::clone(&self.validator),
        }
    }
}

/// Options accepted by [`tag`].
#[derive(Default)]
pub struct TagOptions<T> {
    pub default: Option<T>,
    pub label: Option<&'static str>,
}

/// Creates a new tag accessor validated by `validator`. Two calls to `tag`
/// never produce colliding keys, even with the same `label`.
pub fn tag<T: 'static>(
    validator: impl Validate<T>,
    options: TagOptions<T>,
) -> Tag<T> {
    Tag {
        key: TagKey::next(),
        label: options.label,
        default: options.default.map(Rc::new),
        validator: Rc::new(validator),
    }
}

/// Shorthand for [`tag`] with no schema enforcement.
pub fn meta<T: 'static>(label: &'static str) -> Tag<T> {
    tag(
        Accept,
        TagOptions {
            default: None,
            label: Some(label),
        },
    )
}

/// The built-in `name` tag, used pervasively to label executors and flows
/// for diagnostics (error contexts, tracing spans).
pub fn name_tag() -> Tag<String> {
    meta("name")
}

impl<T: Clone + 'static> Tag<T> {
    pub fn key(&self) -> TagKey {
        self.key
    }

    /// Validates `v` and wraps it as a [`Tagged`] value under this tag's
    /// key. This is the Rust-idiomatic stand-in for the original's callable
    /// `tag(v)` constructor syntax.
    pub fn make(&self, value: T) -> Result<Tagged, GraphError> {
        let validated = self
            .validator
            .validate(value)
            .map_err(GraphError::schema_validation)?;
        Ok(Tagged {
            key: self.key,
            label: self.label,
            value: Rc::new(validated),
        })
    }

    /// `tag.entry(v)` / `tag.preset(v)` — a `(key, value)` pair suitable for
    /// seeding a [`DataStore`] literal.
    pub fn entry(&self, value: T) -> Result<(TagKey, Tagged), GraphError> {
        Ok((self.key, self.make(value)?))
    }

    /// Alias of [`Tag::entry`], kept for readers coming from the seed-data
    /// vocabulary used by [`crate::executor::preset`].
    pub fn preset(&self, value: T) -> Result<(TagKey, Tagged), GraphError> {
        self.entry(value)
    }

    /// Returns the first match in `src`, falling back to the tag's default.
    pub fn find(&self, src: &impl TagSource) -> Option<T> {
        src.scan(self.key)
            .into_iter()
            .next()
            .and_then(|v| v.downcast_ref::<T>().cloned())
            .or_else(|| self.default.as_deref().cloned())
    }

    /// Like [`Tag::find`], but fails with [`GraphError::TagNotFound`] if
    /// neither a match nor a default exists.
    pub fn get(&self, src: &impl TagSource) -> Result<T, GraphError> {
        self.find(src).ok_or_else(|| GraphError::TagNotFound {
            label: self.label.unwrap_or("<unlabeled>"),
        })
    }

    /// All matches in insertion order.
    pub fn some(&self, src: &impl TagSource) -> Vec<T> {
        src.scan(self.key)
            .into_iter()
            .filter_map(|v| v.downcast_ref::<T>().cloned())
            .collect()
    }

    /// Validates `value` and stores it in `store` under this tag's key,
    /// appending to any existing entries (mirrors the "tagged-array"
    /// container semantics: old entries aren't overwritten, `find`/`get`
    /// return the first one pushed).
    pub fn set(
        &self,
        store: &mut DataStore,
        value: T,
    ) -> Result<(), GraphError> {
        let tagged = self.make(value)?;
        store.push(tagged);
        Ok(())
    }
}

/// Something a [`Tag`] can be scanned against: a [`DataStore`], an ordered
/// sequence of [`Tagged`] values, or a [`MetaContainer`].
pub trait TagSource {
    fn scan(&self, key: TagKey) -> Vec<Rc<dyn Any>>;
}

impl TagSource for [Tagged] {
    fn scan(&self, key: TagKey) -> Vec<Rc<dyn Any>> {
        self.iter()
            .filter(|t| t.key == key)
            .map(|t| Rc::clone(&t.value))
            .collect()
    }
}

impl TagSource for Vec<Tagged> {
    fn scan(&self, key: TagKey) -> Vec<Rc<dyn Any>> {
        self.as_slice().scan(key)
    }
}

/// A mapping from tag keys to values; the substrate for flow contexts and
/// scope metadata. Insertion order is preserved; a single key may carry
/// several values pushed over time (first one pushed wins on read).
#[derive(Default, Clone)]
pub struct DataStore {
    entries: IndexMap<TagKey, Vec<Tagged>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a store from `(key, value)` pairs, as produced by
    /// [`Tag::entry`]/[`Tag::preset`].
    pub fn from_entries(entries: impl IntoIterator<Item = (TagKey, Tagged)>) -> Self {
        let mut store = Self::new();
        for (key, value) in entries {
            store.entries.entry(key).or_default().push(value);
        }
        store
    }

    pub fn push(&mut self, tagged: Tagged) {
        self.entries.entry(tagged.key).or_default().push(tagged);
    }

    /// Merges `other`'s entries into `self`, preserving insertion order and
    /// each key's existing value history.
    pub fn extend(&mut self, other: DataStore) {
        for (_, values) in other.entries {
            for tagged in values {
                self.push(tagged);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TagSource for DataStore {
    fn scan(&self, key: TagKey) -> Vec<Rc<dyn Any>> {
        self.entries
            .get(&key)
            .map(|values| values.iter().map(|t| Rc::clone(&t.value)).collect())
            .unwrap_or_default()
    }
}

/// Anything that carries its own metadata sequence: executors, flow
/// definitions, scopes.
pub trait MetaContainer {
    fn metas(&self) -> &[Tagged];
}

impl<C: MetaContainer> TagSource for C {
    fn scan(&self, key: TagKey) -> Vec<Rc<dyn Any>> {
        self.metas().scan(key)
    }
}
