//! The per-transaction evaluation engine (§4.6).
//!
//! Grounded in the array-indexed-by-id "elaborator" shape used by real
//! e-graph extraction passes in this lineage (cranelift's `egraph` pass
//! keeps per-node `NodeCtx`/`Stats` in arrays indexed by a small id, rather
//! than per-node heap state) — here that becomes two parallel arrays,
//! `value[i]`/`finished[i]`, indexed by the node's frozen `index` rather
//! than its raw `NodeId`, so a transaction's footprint is exactly
//! `index_limit` slots regardless of how large the configuration-time
//! arena grew before freezing.

use crate::{
    call::EvalState,
    context::FrozenGraph,
    node::NodeId,
    utils::HashMap,
    value::Value,
};

/// The per-transaction environment a predicate reads from. A thin
/// key-value bag of named fields (`"user-agent"`, etc.); the demo `streq`
/// call (`crate::calls`) treats its first argument as a field name to look
/// up here rather than a value to compare directly, which is how a
/// template-parameterized predicate like `is_bad` ends up reading live
/// transaction data (§8 scenario S3).
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    fields: HashMap<String, Value>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// One node's per-transaction slot (§4.6's state machine):
/// `(value=None, finished=false) -> eval -> (partial, false)* -> (final, true)`.
#[derive(Default, Clone)]
struct Slot {
    value: Option<Value>,
    finished: bool,
    /// Reset at the start of every `query`; tracks whether this node's
    /// `eval` has already run *this* query, so two roots sharing a
    /// sub-node only evaluate it once per query (§8 invariant 7).
    visited_this_query: bool,
}

/// The live evaluation state for one transaction against one frozen
/// context. Owns exactly `index_limit` slots; released with the
/// transaction (§5 Resource ownership).
pub struct PerTransaction<'g> {
    graph: &'g FrozenGraph,
    tx: Transaction,
    slots: Vec<Slot>,
}

impl<'g> PerTransaction<'g> {
    /// BFS from all roots to zero every reachable node's slot (§4.6
    /// Initialization). Since slots default to `(None, false)` already,
    /// this just sizes the array to `index_limit`; it exists as a distinct
    /// step so a future per-node initializer hook has an obvious home.
    pub fn new(graph: &'g FrozenGraph, tx: Transaction) -> Self {
        PerTransaction {
            graph,
            tx,
            slots: vec![Slot::default(); graph.index_limit()],
        }
    }

    /// Evaluates `root` (recursively evaluating any not-yet-visited
    /// children first) and returns its current `(value, finished)`.
    pub fn query(&mut self, root: NodeId) -> (Value, bool) {
        for slot in &mut self.slots {
            slot.visited_this_query = false;
        }
        self.eval_child(root);
        let idx = self.index_of(root);
        let value = self.slots[idx].value.clone().unwrap_or(Value::Null);
        (value, self.slots[idx].finished)
    }

    fn index_of(&self, node: NodeId) -> usize {
        self.graph
            .index_of(node)
            .expect("every node reachable from a root has a frozen index")
    }
}

impl EvalState for PerTransaction<'_> {
    fn value(&self, node: NodeId) -> Option<&Value> {
        self.slots[self.index_of(node)].value.as_ref()
    }

    fn finished(&self, node: NodeId) -> bool {
        self.slots[self.index_of(node)].finished
    }

    fn eval_child(&mut self, node: NodeId) -> bool {
        let idx = self.index_of(node);
        if self.slots[idx].visited_this_query {
            return self.slots[idx].finished;
        }
        self.slots[idx].visited_this_query = true;

        if self.slots[idx].finished {
            // Already finished in an earlier query (§8 invariant: monotone
            // finished across the transaction's lifetime); nothing to do.
            return true;
        }

        let data = self.graph.arena().get(node).data.clone();
        match data.as_literal() {
            Some(v) => {
                self.set_value(node, v.clone());
                self.set_finished(node);
            }
            None => {
                let name = data.call_name().expect("non-literal node is always a call");
                let args = data.args().to_vec();
                if let Some(spec) = self.graph.factory().get(name) {
                    (spec.eval)(node, &args, self);
                } else {
                    // Unreachable in a graph that passed the lifecycle's
                    // validate/transform stages, which require every call
                    // name to resolve; defensive rather than contractual.
                    self.set_value(node, Value::Null);
                    self.set_finished(node);
                }
            }
        }
        self.slots[self.index_of(node)].finished
    }

    fn set_value(&mut self, node: NodeId, value: Value) {
        let idx = self.index_of(node);
        if self.slots[idx].finished {
            return;
        }
        self.slots[idx].value = Some(value);
    }

    fn push_streamed(&mut self, node: NodeId, item: Value) {
        let idx = self.index_of(node);
        if self.slots[idx].finished {
            return;
        }
        let slot = &mut self.slots[idx];
        match &mut slot.value {
            Some(v) => v.push_streamed(item),
            None => slot.value = Some(Value::List(vec![item])),
        }
    }

    fn set_finished(&mut self, node: NodeId) {
        self.slots[self.index_of(node)].finished = true;
    }

    fn transaction(&self) -> &Transaction {
        &self.tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{calls, context::ConfigContext};

    fn demo_context() -> ConfigContext {
        let mut ctx = ConfigContext::new();
        calls::register_demo_calls(ctx.call_factory_mut()).unwrap();
        ctx
    }

    #[test]
    fn literal_root_is_finished_immediately() {
        let mut ctx = demo_context();
        let root = ctx.parse_and_add_root("'hello'", "test").unwrap();
        let frozen = ctx.close().unwrap();
        let mut tx = PerTransaction::new(&frozen, Transaction::new());
        let node = frozen.root_node(root).unwrap();
        let (value, finished) = tx.query(node);
        assert!(finished);
        assert_eq!(value, Value::from("hello"));
    }

    #[test]
    fn shared_subexpression_evaluates_once_per_query() {
        let mut ctx = demo_context();
        let r1 = ctx
            .parse_and_add_root("(and (streq 'user-agent' 'evil') (streq 'user-agent' 'evil'))", "test")
            .unwrap();
        let frozen = ctx.close().unwrap();
        let mut tx = PerTransaction::new(&frozen, Transaction::new().with_field("user-agent", "evil"));
        let node = frozen.root_node(r1).unwrap();
        let (value, finished) = tx.query(node);
        assert!(finished);
        assert!(value.is_truthy());
    }
}
