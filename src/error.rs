//! The single error type returned by every fallible operation in this crate.
//!
//! The teacher crate hand-rolls its own `egraph::run::StopReason` rather
//! than reaching for `thiserror`, and that's the pattern followed here: one
//! enum, manual `Display`, manual `std::error::Error`. No dependency is
//! added purely for error plumbing.

use std::fmt;

use crate::node::NodeId;

/// A located excerpt of source text, used by [`PredicateError::Parse`] to
/// show the caller roughly where parsing went wrong (§4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceExcerpt {
    pub offset: usize,
    pub excerpt: String,
}

impl fmt::Display for SourceExcerpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at byte {}: ...{}...", self.offset, self.excerpt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateError {
    /// Malformed S-expression text.
    Parse { message: String, at: SourceExcerpt },
    /// A call name appeared in source text with no matching
    /// [`crate::call::CallFactory`] registration.
    UnknownCall { name: String, at: SourceExcerpt },
    /// A template body referenced `ref(x)` for a parameter `x` not declared
    /// in the template's parameter list, or a template was redefined under
    /// a name already registered.
    InvalidTemplate { message: String },
    /// `validate` (either PRE or POST, §4.2) rejected the graph.
    Validation { message: String, node: Option<NodeId> },
    /// A `transform` call raised an error rather than returning a rewrite
    /// (§4.2); also raised when the fixpoint iteration cap is exceeded.
    Transform { message: String, node: Option<NodeId> },
    /// `pre_evaluate` (§4.3) rejected a node once indices were final.
    PreEvaluation { message: String, node: NodeId },
    /// An operation was attempted against a [`crate::context`] in the wrong
    /// lifecycle state (e.g. `add_root` after freeze).
    InvalidState { message: String },
    /// [`crate::oracle::Oracle::query`] was called on a context that has
    /// not yet been closed/frozen.
    QueryBeforeClose,
    /// An oracle outlived the context it was issued against.
    QueryAfterClose,
}

impl fmt::Display for PredicateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredicateError::Parse { message, at } => write!(f, "parse error: {message} ({at})"),
            PredicateError::UnknownCall { name, at } => {
                write!(f, "unknown call '{name}' ({at})")
            }
            PredicateError::InvalidTemplate { message } => {
                write!(f, "invalid template: {message}")
            }
            PredicateError::Validation { message, node } => match node {
                Some(n) => write!(f, "validation error at {n}: {message}"),
                None => write!(f, "validation error: {message}"),
            },
            PredicateError::Transform { message, node } => match node {
                Some(n) => write!(f, "transform error at {n}: {message}"),
                None => write!(f, "transform error: {message}"),
            },
            PredicateError::PreEvaluation { message, node } => {
                write!(f, "pre-evaluation error at {node}: {message}")
            }
            PredicateError::InvalidState { message } => write!(f, "invalid state: {message}"),
            PredicateError::QueryBeforeClose => {
                write!(f, "query issued against a context that has not been closed")
            }
            PredicateError::QueryAfterClose => {
                write!(f, "oracle used after its owning context was released")
            }
        }
    }
}

impl std::error::Error for PredicateError {}

pub type Result<T> = std::result::Result<T, PredicateError>;
