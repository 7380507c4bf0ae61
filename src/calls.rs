//! A small demo call library exercising the node contract (§4.2) end to
//! end: literal boolean folding, a streaming node, and a field-comparison
//! predicate. §1 scope explicitly treats the *standard* call library as an
//! out-of-scope "opaque call factory obeying the node contract" — these
//! calls exist only so `graph`/`eval`/`template`'s tests and the crate's
//! `tests/` integration suite have something concrete to compile and
//! evaluate against; they are not meant as a production rule library.
//!
//! Grounded on the teacher's own pattern of registering behavior by name
//! into a flat table (`egraph::run::BackoffScheduler`'s per-rule-name
//! `IndexMap`) rather than one struct per call.

use crate::{
    call::{CallFactory, CallSpec, Diagnostic, EvalState, Phase, TransformCtx},
    error::Result,
    node::{NodeData, NodeId},
    symbol::intern,
    value::Value,
};

fn truthy_of(state: &dyn EvalState, node: NodeId) -> Option<bool> {
    if !state.finished(node) {
        return None;
    }
    state.value(node).map(Value::is_truthy)
}

/// `(and a b c ...)` — finished+false as soon as any argument finishes
/// falsy (§4.6 short-circuit semantics); finished+true once every argument
/// has finished truthy. Mirrors `or` below with the truth value inverted.
fn and_eval(_node: NodeId, args: &[NodeId], state: &mut dyn EvalState) -> Option<bool> {
    let mut all_finished = true;
    for &arg in args {
        state.eval_child(arg);
        match truthy_of(state, arg) {
            Some(false) => return Some(false),
            Some(true) => {}
            None => all_finished = false,
        }
    }
    all_finished.then_some(true)
}

fn or_eval(_node: NodeId, args: &[NodeId], state: &mut dyn EvalState) -> Option<bool> {
    let mut all_finished = true;
    for &arg in args {
        state.eval_child(arg);
        match truthy_of(state, arg) {
            Some(true) => return Some(true),
            Some(false) => {}
            None => all_finished = false,
        }
    }
    all_finished.then_some(false)
}

/// Folds `(and ...)`/`(or ...)` at configuration time when every argument is
/// already a literal number (§8 scenario S2). Runs as each node's own
/// `transform` hook so the lifecycle's generic to-fixpoint loop (§4.4 step
/// 3) handles re-folding after `(true)`/`(false)` have themselves folded
/// into literals in an earlier pass — no special-casing needed here beyond
/// "are all my children literal right now".
fn fold_bool_combinator(
    node: NodeId,
    ctx: &mut TransformCtx,
    combine: fn(bool, bool) -> bool,
    identity: bool,
) -> Result<bool> {
    let args = ctx.graph.arena().get(node).data.args().to_vec();
    let mut acc = identity;
    for arg in &args {
        match ctx.graph.arena().get(*arg).data.as_literal() {
            Some(v) => acc = combine(acc, v.is_truthy()),
            None => return Ok(false),
        }
    }
    let lit = ctx.graph.merge(NodeData::Literal(Value::from(acc)));
    if lit == node {
        return Ok(false);
    }
    ctx.graph.replace(node, lit)?;
    Ok(true)
}

fn not_transform(node: NodeId, ctx: &mut TransformCtx) -> Result<bool> {
    let args = ctx.graph.arena().get(node).data.args().to_vec();
    let [arg] = args.as_slice() else { return Ok(false) };
    let Some(v) = ctx.graph.arena().get(*arg).data.as_literal() else {
        return Ok(false);
    };
    let lit = ctx.graph.merge(NodeData::Literal(Value::from(!v.is_truthy())));
    if lit == node {
        return Ok(false);
    }
    ctx.graph.replace(node, lit)?;
    Ok(true)
}

/// Constant folds `(true)`/`(false)` (0-arity calls) into literal numbers
/// the very first transform pass, so anything built on top of them (e.g.
/// `and`'s own folding) sees plain literals on its next visit. These exist
/// only because the grammar (§4.1) has no bareword boolean literal: a rule
/// author writes `(true)`/`(false)`, not a bare `true`/`false` token.
fn const_fold(value: Value) -> impl Fn(NodeId, &mut TransformCtx) -> Result<bool> {
    move |node, ctx| {
        let lit = ctx.graph.merge(NodeData::Literal(value.clone()));
        if lit == node {
            return Ok(false);
        }
        ctx.graph.replace(node, lit)?;
        Ok(true)
    }
}

fn arity_validate(expected: usize) -> impl Fn(NodeId, &crate::graph::MergeGraph, Phase) -> Vec<Diagnostic> {
    move |node, graph, phase| {
        if phase != Phase::Pre {
            return Vec::new();
        }
        let got = graph.arena().get(node).data.args().len();
        if got == expected {
            Vec::new()
        } else {
            vec![Diagnostic::error(format!(
                "expected {expected} argument(s), got {got}"
            ))]
        }
    }
}

/// Registers the demo call library into `factory`. Intended for tests and
/// the `tests/` integration suite; a real deployment registers its own
/// production call library instead (§1: standard calls are out of scope).
pub fn register_demo_calls(factory: &mut CallFactory) -> Result<()> {
    factory.register(CallSpec {
        name: intern("true"),
        validate: Some(Box::new(arity_validate(0))),
        transform: Some(Box::new(const_fold(Value::from(true)))),
        pre_evaluate: None,
        eval: Box::new(|node, _args, state| {
            state.set_value(node, Value::from(true));
            state.set_finished(node);
        }),
    })?;

    factory.register(CallSpec {
        name: intern("false"),
        validate: Some(Box::new(arity_validate(0))),
        transform: Some(Box::new(const_fold(Value::from(false)))),
        pre_evaluate: None,
        eval: Box::new(|node, _args, state| {
            state.set_value(node, Value::from(false));
            state.set_finished(node);
        }),
    })?;

    factory.register(CallSpec {
        name: intern("and"),
        validate: None,
        transform: Some(Box::new(|node, ctx| {
            fold_bool_combinator(node, ctx, |a, b| a && b, true)
        })),
        pre_evaluate: None,
        eval: Box::new(|node, args, state| {
            if let Some(result) = and_eval(node, args, state) {
                state.set_value(node, Value::from(result));
                state.set_finished(node);
            }
        }),
    })?;

    factory.register(CallSpec {
        name: intern("or"),
        validate: None,
        transform: Some(Box::new(|node, ctx| {
            fold_bool_combinator(node, ctx, |a, b| a || b, false)
        })),
        pre_evaluate: None,
        eval: Box::new(|node, args, state| {
            if let Some(result) = or_eval(node, args, state) {
                state.set_value(node, Value::from(result));
                state.set_finished(node);
            }
        }),
    })?;

    factory.register(CallSpec {
        name: intern("not"),
        validate: Some(Box::new(arity_validate(1))),
        transform: Some(Box::new(not_transform)),
        pre_evaluate: None,
        eval: Box::new(|node, args, state| {
            let [arg] = args else { return };
            if state.eval_child(*arg) {
                let truthy = state.value(*arg).map(Value::is_truthy).unwrap_or(false);
                state.set_value(node, Value::from(!truthy));
                state.set_finished(node);
            }
        }),
    })?;

    // `(streq field-name-literal value-expr)`: looks `field-name-literal`
    // up in the transaction's field bag (§4.6's `Transaction`) and compares
    // it for equality against `value-expr`'s evaluated value. This is how a
    // template-parameterized predicate like `is_bad` (§8 S3) ends up
    // reading live per-transaction data rather than another graph node.
    factory.register(CallSpec {
        name: intern("streq"),
        validate: Some(Box::new(arity_validate(2))),
        transform: None,
        pre_evaluate: None,
        eval: Box::new(|node, args, state| {
            let [field, value] = args else { return };
            let field_done = state.eval_child(*field);
            let value_done = state.eval_child(*value);
            if !field_done || !value_done {
                return;
            }
            let Some(Value::String(field_name)) = state.value(*field) else {
                state.set_value(node, Value::from(false));
                state.set_finished(node);
                return;
            };
            let tx_value = state.transaction().field(field_name);
            let matches = match (tx_value, state.value(*value)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };
            state.set_value(node, Value::from(matches));
            state.set_finished(node);
        }),
    })?;

    // `(list a b c ...)`: evaluates every argument to completion, then
    // gathers their final values into a `Value::List`. Distinct from a
    // literal `[...]`, whose items (§4.1 grammar) must themselves be
    // literals; this builds a list out of arbitrary sub-expressions.
    factory.register(CallSpec {
        name: intern("list"),
        validate: None,
        transform: None,
        pre_evaluate: None,
        eval: Box::new(|node, args, state| {
            let mut values = Vec::with_capacity(args.len());
            for &arg in args {
                if !state.eval_child(arg) {
                    return;
                }
                values.push(state.value(arg).cloned().unwrap_or(Value::Null));
            }
            state.set_value(node, Value::List(values));
            state.set_finished(node);
        }),
    })?;

    // `(gather n)`: a streaming demo node (§4.6 S4). Each top-level `query`
    // that reaches this node while it's unfinished appends exactly one more
    // element to its running list, finishing once it has emitted `n` of
    // them — never rewinding or replacing earlier elements (§5's monotone
    // value-growth guarantee).
    factory.register(CallSpec {
        name: intern("gather"),
        validate: Some(Box::new(|node, graph, phase| {
            if phase != Phase::Pre {
                return Vec::new();
            }
            match graph.arena().get(node).data.args() {
                [n] => match graph.arena().get(*n).data.as_literal() {
                    Some(Value::Number(_)) => Vec::new(),
                    _ => vec![Diagnostic::error("gather's argument must be a number literal")],
                },
                other => vec![Diagnostic::error(format!(
                    "gather expects exactly 1 argument, got {}",
                    other.len()
                ))],
            }
        })),
        transform: None,
        pre_evaluate: None,
        eval: Box::new(|node, args, state| {
            let [n_arg] = args else { return };
            state.eval_child(*n_arg);
            let n = match state.value(*n_arg) {
                Some(Value::Number(n)) => *n as usize,
                _ => 0,
            };
            let current_len = match state.value(node) {
                Some(Value::List(items)) => items.len(),
                _ => 0,
            };
            if current_len >= n {
                state.set_finished(node);
                return;
            }
            state.push_streamed(node, Value::Number(current_len as f64));
            if current_len + 1 >= n {
                state.set_finished(node);
            }
        }),
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::ConfigContext, eval::{PerTransaction, Transaction}};

    fn demo_context() -> ConfigContext {
        let mut ctx = ConfigContext::new();
        register_demo_calls(ctx.call_factory_mut()).unwrap();
        ctx
    }

    #[test]
    fn constant_folds_and_of_literals() {
        let mut ctx = demo_context();
        let root = ctx.parse_and_add_root("(and (true) (true) (false))", "test").unwrap();
        let frozen = ctx.close().unwrap();
        let node = frozen.root_node(root).unwrap();
        assert_eq!(frozen.arena().text_of(node), "0");
    }

    #[test]
    fn not_folds_a_literal() {
        let mut ctx = demo_context();
        let root = ctx.parse_and_add_root("(not (false))", "test").unwrap();
        let frozen = ctx.close().unwrap();
        let node = frozen.root_node(root).unwrap();
        assert_eq!(frozen.arena().text_of(node), "1");
    }

    #[test]
    fn streq_compares_against_transaction_field() {
        let mut ctx = demo_context();
        let root = ctx
            .parse_and_add_root("(streq 'user-agent' 'evil')", "test")
            .unwrap();
        let frozen = ctx.close().unwrap();
        let node = frozen.root_node(root).unwrap();

        let mut miss = PerTransaction::new(&frozen, Transaction::new().with_field("user-agent", "friendly"));
        let (value, finished) = miss.query(node);
        assert!(finished);
        assert!(!value.is_truthy());

        let mut hit = PerTransaction::new(&frozen, Transaction::new().with_field("user-agent", "evil"));
        let (value, finished) = hit.query(node);
        assert!(finished);
        assert!(value.is_truthy());
    }

    #[test]
    fn gather_streams_one_element_per_query() {
        let mut ctx = demo_context();
        let root = ctx.parse_and_add_root("(gather 3)", "test").unwrap();
        let frozen = ctx.close().unwrap();
        let node = frozen.root_node(root).unwrap();
        let mut tx = PerTransaction::new(&frozen, Transaction::new());

        let (v1, f1) = tx.query(node);
        assert_eq!(v1, Value::List(vec![Value::Number(0.0)]));
        assert!(!f1);

        let (v2, f2) = tx.query(node);
        assert_eq!(v2, Value::List(vec![Value::Number(0.0), Value::Number(1.0)]));
        assert!(!f2);

        let (v3, f3) = tx.query(node);
        assert_eq!(
            v3,
            Value::List(vec![Value::Number(0.0), Value::Number(1.0), Value::Number(2.0)])
        );
        assert!(f3);

        // A further query must not change the finished value (§4.6 state
        // machine: finished is terminal).
        let (v4, f4) = tx.query(node);
        assert_eq!(v4, v3);
        assert!(f4);
    }

    #[test]
    fn list_call_gathers_subexpression_values() {
        let mut ctx = demo_context();
        let root = ctx.parse_and_add_root("(list (true) (false) 'x')", "test").unwrap();
        let frozen = ctx.close().unwrap();
        let node = frozen.root_node(root).unwrap();
        let mut tx = PerTransaction::new(&frozen, Transaction::new());
        let (value, finished) = tx.query(node);
        assert!(finished);
        assert_eq!(
            value,
            Value::List(vec![Value::from(true), Value::from(false), Value::from("x")])
        );
    }
}
