//! The crate's single error root. Every fallible public entry point returns
//! `Result<_, GraphError>`; one variant per row of SPEC_FULL.md §7.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use crate::executor::ExecutorId;

/// A single issue surfaced by a [`crate::tag::Validate`] implementation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub message: String,
}

/// The full set of issues a validator rejected a value with. Always
/// non-empty.
#[derive(Debug, Clone)]
pub struct ValidationIssues(pub Vec<ValidationIssue>);

impl ValidationIssues {
    pub fn first_message(&self) -> &str {
        self.0
            .first()
            .map(|i| i.message.as_str())
            .unwrap_or("validation failed")
    }
}

impl fmt::Display for ValidationIssues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first_message())
    }
}

/// Where in the resolve/update/flow pipeline an error originated. Purely
/// diagnostic; never matched on by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStage {
    DependencyResolution,
    FactoryInvocation,
    Update,
    Release,
    Dispose,
    FlowInput,
    FlowHandler,
    FlowSuccess,
    FlowError,
    Journal,
    Extension,
}

/// Attached to every [`GraphError`]; carries enough breadcrumbs to diagnose
/// a failure without re-running it.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub executor_name: Option<String>,
    pub dependency_chain: Vec<ExecutorId>,
    pub timestamp: SystemTime,
    pub resolution_stage: ResolutionStage,
    pub additional_info: Option<String>,
}

impl ErrorContext {
    pub fn new(stage: ResolutionStage) -> Self {
        Self {
            executor_name: None,
            dependency_chain: Vec::new(),
            timestamp: SystemTime::now(),
            resolution_stage: stage,
            additional_info: None,
        }
    }

    pub fn with_chain(mut self, chain: Vec<ExecutorId>) -> Self {
        self.dependency_chain = chain;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.executor_name = Some(name.into());
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.additional_info = Some(info.into());
        self
    }
}

/// A boxed, cloneable stand-in for a third-party error wrapped at a crate
/// boundary, matching `any_error`'s `Arc<dyn Error>` wrapper convention
/// instead of forcing every caller's error type through this crate's enum.
pub type BoxedCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// The crate's single error type. One variant per §7 row.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphError {
    #[error("operation attempted on a disposed scope")]
    ScopeDisposed { context: ErrorContext },

    #[error("accessor read before resolution completed")]
    Unresolved { context: ErrorContext },

    #[error("update requested while a prior update is still in flight")]
    ResolutionInProgress { context: ErrorContext },

    #[error("executor is not mutable (built with `provide`/`derive`, not a value executor)")]
    NotMutable { context: ErrorContext },

    #[error("circular dependency detected: {path}", path = format_chain(&context.dependency_chain))]
    CircularDependency { context: ErrorContext },

    #[error("a ForwardRef dependency was resolved before it was tied")]
    ForwardRefNotTied { context: ErrorContext },

    #[error("factory execution failed: {source}")]
    FactoryExecutionError {
        #[source]
        source: BoxedCause,
        context: ErrorContext,
    },

    #[error("dependency resolution failed: {source}")]
    DependencyResolutionError {
        #[source]
        source: Box<GraphError>,
        context: ErrorContext,
    },

    #[error("schema validation failed: {message}")]
    SchemaValidationError {
        message: String,
        issues: Vec<String>,
        context: ErrorContext,
    },

    #[error("schema validator returned an async result in a synchronous-only position")]
    ValidationAsyncNotSupported { context: ErrorContext },

    #[error("tag not found and no default was configured: {label}")]
    TagNotFound { label: &'static str },

    #[error("journal key `{key}` was replayed with an incompatible type")]
    JournalKeyCollision { key: String, context: ErrorContext },

    #[error("operation attempted on a cancelled flow context")]
    Cancelled { context: ErrorContext },

    #[error("flow handler failed: {source}")]
    FlowError {
        #[source]
        source: BoxedCause,
        context: ErrorContext,
    },

    #[error("{} cleanup callback(s) failed during dispose", .errors.len())]
    CleanupAggregate {
        errors: Vec<BoxedCause>,
        context: ErrorContext,
    },
}

fn format_chain(chain: &[ExecutorId]) -> String {
    chain
        .iter()
        .map(|id| format!("{id:?}"))
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl GraphError {
    pub fn schema_validation(issues: ValidationIssues) -> Self {
        let message = issues.first_message().to_string();
        GraphError::SchemaValidationError {
            message,
            issues: issues.0.into_iter().map(|i| i.message).collect(),
            context: ErrorContext::new(ResolutionStage::FactoryInvocation),
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            GraphError::ScopeDisposed { context }
            | GraphError::Unresolved { context }
            | GraphError::ResolutionInProgress { context }
            | GraphError::NotMutable { context }
            | GraphError::CircularDependency { context }
            | GraphError::ForwardRefNotTied { context }
            | GraphError::FactoryExecutionError { context, .. }
            | GraphError::DependencyResolutionError { context, .. }
            | GraphError::SchemaValidationError { context, .. }
            | GraphError::ValidationAsyncNotSupported { context }
            | GraphError::JournalKeyCollision { context, .. }
            | GraphError::Cancelled { context }
            | GraphError::FlowError { context, .. }
            | GraphError::CleanupAggregate { context, .. } => Some(context),
            GraphError::TagNotFound { .. } => None,
        }
    }

    /// True for errors the core itself would consider fatal/non-retriable
    /// (schema/config mistakes), as opposed to transient resolution faults.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GraphError::SchemaValidationError { .. }
                | GraphError::ValidationAsyncNotSupported { .. }
                | GraphError::JournalKeyCollision { .. }
                | GraphError::NotMutable { .. }
        )
    }
}
