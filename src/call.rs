//! The call contract (§4.2): a name-indexed table of behavior hooks rather
//! than a class hierarchy of node types. A [`NodeData::Call`] carries only
//! its name and argument list; all behavior is looked up by name in a
//! [`CallFactory`] at the point it's needed (validate/transform/
//! pre_evaluate/eval), the same way the teacher's `egraph::construct::Analysis`
//! trait hangs `make`/`merge`/`modify` hooks off an e-class's *data* rather
//! than off a per-node subclass.

use indexmap::IndexMap;
use std::{fmt, rc::Rc};

use crate::{
    error::{PredicateError, Result},
    graph::MergeGraph,
    node::NodeId,
    symbol::CallName,
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

/// Which validation sweep a node is being asked to run (§4.4 steps 2/5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Post,
}

/// Everything a `transform` hook is allowed to touch: the graph being
/// rewritten and the factory it can look up other calls' arities/specs
/// through (used by the template engine's instantiation transform, §4.5).
pub struct TransformCtx<'a> {
    pub graph: &'a mut MergeGraph,
    pub factory: &'a CallFactory,
}

/// Read-only view handed to a `pre_evaluate` hook: the frozen graph plus its
/// node indexing (§4.4 step 7 runs strictly after indexing, step 6).
pub struct PreEvalCtx<'a> {
    pub graph: &'a MergeGraph,
}

/// The per-transaction state a node's `eval` hook reads and writes (§4.6).
/// Lives in `crate::eval`; re-exported here only by reference so `call.rs`
/// doesn't need to know its internals, just its public mutator surface.
pub trait EvalState {
    /// Value currently recorded for `node`, or `None` if never evaluated.
    fn value(&self, node: NodeId) -> Option<&Value>;
    fn finished(&self, node: NodeId) -> bool;
    /// Evaluates `node`'s children (recursively, memoized) then returns
    /// whether `node` is finished after that descent.
    fn eval_child(&mut self, node: NodeId) -> bool;
    /// Sets the partial or final value for `node`. Calling this after
    /// `node` is already finished is a contract violation the engine
    /// ignores (finished slots are terminal, §4.6).
    fn set_value(&mut self, node: NodeId, value: Value);
    fn push_streamed(&mut self, node: NodeId, item: Value);
    fn set_finished(&mut self, node: NodeId);
    /// Read-only access to the transaction's input fields, for calls (e.g.
    /// demo `streq`) that resolve one of their arguments against live
    /// per-transaction data rather than another node's value.
    fn transaction(&self) -> &crate::eval::Transaction;
}

pub type ValidateFn = dyn Fn(NodeId, &MergeGraph, Phase) -> Vec<Diagnostic>;
pub type TransformFn = dyn Fn(NodeId, &mut TransformCtx) -> Result<bool>;
pub type PreEvaluateFn = dyn Fn(NodeId, &mut PreEvalCtx) -> Result<()>;
pub type EvalFn = dyn Fn(NodeId, &[NodeId], &mut dyn EvalState);

/// One call's behavior table. `eval` is mandatory (every call must be able
/// to produce a value); the rest default to no-ops, matching §4.2's framing
/// of `validate`/`transform`/`pre_evaluate` as optional capabilities.
pub struct CallSpec {
    pub name: CallName,
    pub validate: Option<Box<ValidateFn>>,
    pub transform: Option<Box<TransformFn>>,
    pub pre_evaluate: Option<Box<PreEvaluateFn>>,
    pub eval: Box<EvalFn>,
}

impl fmt::Debug for CallSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSpec").field("name", &self.name.as_str()).finish_non_exhaustive()
    }
}

/// Registry mapping a call name to its [`CallSpec`] (§4.2). Registration is
/// idempotent-forbidding: the template engine (§4.5) relies on
/// [`CallFactory::register`] rejecting a name that's already taken to
/// enforce "reject if a call of that name already exists".
///
/// `IndexMap` is used (as in the teacher's `BackoffScheduler`'s rule table)
/// so that iterating the factory — e.g. to print available calls in a debug
/// report — is deterministic across runs.
/// Cheap to clone: entries are `Rc<CallSpec>`, so cloning only bumps
/// refcounts. This is what lets [`crate::context::ConfigContext::open_child`]
/// inherit the parent's call registry without re-registering anything.
#[derive(Default, Clone)]
pub struct CallFactory {
    specs: IndexMap<CallName, Rc<CallSpec>>,
}

impl CallFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: CallSpec) -> Result<()> {
        if self.specs.contains_key(&spec.name) {
            return Err(PredicateError::InvalidTemplate {
                message: format!("call '{}' is already registered", spec.name.as_str()),
            });
        }
        self.specs.insert(spec.name, Rc::new(spec));
        Ok(())
    }

    pub fn contains(&self, name: CallName) -> bool {
        self.specs.contains_key(&name)
    }

    pub fn get(&self, name: CallName) -> Option<Rc<CallSpec>> {
        self.specs.get(&name).cloned()
    }

    pub fn lookup(&self, name: CallName) -> Result<Rc<CallSpec>> {
        self.get(name).ok_or_else(|| PredicateError::UnknownCall {
            name: name.as_str().to_owned(),
            at: crate::error::SourceExcerpt {
                offset: 0,
                excerpt: String::new(),
            },
        })
    }

    pub fn names(&self) -> impl Iterator<Item = CallName> + '_ {
        self.specs.keys().copied()
    }
}
