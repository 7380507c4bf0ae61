//! Oracles: the `(context, root index) -> (value, finished)` handle exposed
//! to the rest of the rule engine by §6's public API table.
//!
//! An oracle is acquired during configuration, before the lifecycle has run
//! and before any root has been rewritten by a transform. §9's "Oracle
//! indices vs node indices" note is why this type is split in two: an
//! [`Oracle`] (pre-close, just a root index) and a [`FrozenOracle`]
//! (post-close, a `(FrozenGraph, root index)` pair) that resolves the root
//! index to its *current* representative node on every query rather than
//! caching a node the lifecycle may since have rewritten out of existence.

use std::rc::Rc;

use crate::{
    context::FrozenGraph,
    error::{PredicateError, Result},
    eval::{PerTransaction, Transaction},
    value::Value,
};

/// A handle acquired during configuration (§6 `acquire`). Safe to acquire
/// any number of times for the same or different expressions; invalid to
/// query before the owning context has closed (`QueryBeforeClose`).
#[derive(Debug, Clone, Copy)]
pub struct Oracle {
    root_index: usize,
}

impl Oracle {
    pub(crate) fn new(root_index: usize) -> Self {
        Oracle { root_index }
    }

    pub fn root_index(&self) -> usize {
        self.root_index
    }

    /// Binds this oracle to the frozen graph produced by closing its owning
    /// context, producing a handle that can actually be queried. Returns
    /// `QueryBeforeClose` only in the pathological case of an `Oracle`
    /// constructed by hand against the wrong index range; in the ordinary
    /// flow (`ConfigContext::acquire` -> `close`) this always succeeds.
    pub fn bind(self, graph: Rc<FrozenGraph>) -> Result<FrozenOracle> {
        if self.root_index >= graph.root_count() {
            return Err(PredicateError::QueryBeforeClose);
        }
        Ok(FrozenOracle {
            graph,
            root_index: self.root_index,
        })
    }
}

/// An oracle bound to the frozen graph of its (now closed) owning context.
/// Cheap to clone (`Rc<FrozenGraph>`); safe to invoke from any transaction
/// of that context or a descendant context that inherited the same
/// [`FrozenGraph`] (§6 `acquire`'s contract).
#[derive(Clone)]
pub struct FrozenOracle {
    graph: Rc<FrozenGraph>,
    root_index: usize,
}

impl FrozenOracle {
    /// Resolves this oracle's root index to its current representative
    /// node (post-transform) and asks `tx`'s evaluation engine for that
    /// root's `(value, finished)` (§4.6 `query`).
    pub fn query(&self, tx: &mut PerTransaction<'_>) -> Result<(Value, bool)> {
        let node = self.graph.root_node(self.root_index)?;
        Ok(tx.query(node))
    }

    pub fn graph(&self) -> &Rc<FrozenGraph> {
        &self.graph
    }
}

/// Convenience wrapper pairing a [`FrozenGraph`] with a [`Transaction`],
/// matching how a caller typically drives several oracles over one
/// transaction without re-threading the graph/transaction pair through
/// every call site.
pub struct OracleSession<'g> {
    per_tx: PerTransaction<'g>,
}

impl<'g> OracleSession<'g> {
    pub fn new(graph: &'g FrozenGraph, tx: Transaction) -> Self {
        OracleSession {
            per_tx: PerTransaction::new(graph, tx),
        }
    }

    pub fn query(&mut self, oracle: &FrozenOracle) -> Result<(Value, bool)> {
        oracle.query(&mut self.per_tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{calls, context::ConfigContext};

    #[test]
    fn oracle_resolves_rewritten_root() {
        let mut ctx = ConfigContext::new();
        calls::register_demo_calls(ctx.call_factory_mut()).unwrap();
        let root = ctx.parse_and_add_root("(not (false))", "test").unwrap();
        let oracle = Oracle::new(root);

        let frozen = Rc::new(ctx.close().unwrap());
        // The root was folded from `(not (false))` into literal `1` during
        // the lifecycle; the oracle must still resolve to it.
        let bound = oracle.bind(frozen.clone()).unwrap();
        let mut session = OracleSession::new(&frozen, Transaction::new());
        let (value, finished) = session.query(&bound).unwrap();
        assert!(finished);
        assert!(value.is_truthy());
    }

    #[test]
    fn two_oracles_sharing_a_subexpression_see_one_evaluation() {
        let mut ctx = ConfigContext::new();
        calls::register_demo_calls(ctx.call_factory_mut()).unwrap();
        let shared = "(streq 'user-agent' 'evil')";
        let r1 = ctx.parse_and_add_root(shared, "o1").unwrap();
        let r2 = ctx
            .parse_and_add_root(&format!("(and {shared} {shared})"), "o2")
            .unwrap();
        let o1 = Oracle::new(r1);
        let o2 = Oracle::new(r2);

        let frozen = Rc::new(ctx.close().unwrap());
        let b1 = o1.bind(frozen.clone()).unwrap();
        let b2 = o2.bind(frozen.clone()).unwrap();
        let mut session =
            OracleSession::new(&frozen, Transaction::new().with_field("user-agent", "evil"));

        let (v1, f1) = session.query(&b1).unwrap();
        let (v2, f2) = session.query(&b2).unwrap();
        assert!(f1 && f2);
        assert!(v1.is_truthy() && v2.is_truthy());
    }
}
