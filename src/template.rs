//! The template mechanism (§4.5): user-defined calls parameterized by
//! argument names, instantiated inline wherever they're used.
//!
//! Grounded on the teacher's `egraph::pattern::apply_pat`, which walks a
//! `PatternAst` substituting pattern variables for e-class ids drawn from a
//! match's substitution map. Here the "pattern" is a template body parsed
//! once at definition time, the "substitution" is the template call's own
//! argument list, and the variables are `(ref 'name')` occurrences rather
//! than `PatternAst`'s `?x`-style leaves.

use crate::{
    call::{CallSpec, Diagnostic, Phase, TransformCtx},
    error::{PredicateError, Result},
    node::{NodeData, NodeId},
    parser::{ParseTree, Parser},
    symbol::{intern, CallName, ParamName},
};

/// A parsed template: its declared parameter order and its body, still in
/// pre-arena `ParseTree` form so each instantiation can merge a fresh copy
/// bottom-up (and thus CSE against whatever's already in the graph).
pub struct TemplateDef {
    pub name: CallName,
    pub params: Vec<ParamName>,
    pub body: ParseTree,
}

fn ref_param(tree: &ParseTree) -> Option<ParamName> {
    match tree {
        ParseTree::Call { name, args } if name.as_str() == "ref" => match args.as_slice() {
            [ParseTree::Literal(crate::value::Value::String(s))] => Some(intern(s)),
            _ => None,
        },
        _ => None,
    }
}

/// Validates that every `(ref 'x')` occurrence in `body` names a declared
/// parameter (§4.5 "Validate at construction").
fn validate_refs(body: &ParseTree, params: &[ParamName]) -> Result<()> {
    if let Some(p) = ref_param(body) {
        if !params.contains(&p) {
            return Err(PredicateError::InvalidTemplate {
                message: format!("ref('{}') does not name a declared parameter", p.as_str()),
            });
        }
        return Ok(());
    }
    if let ParseTree::Call { args, .. } = body {
        for a in args {
            validate_refs(a, params)?;
        }
    }
    Ok(())
}

/// Parses and validates a template definition, ready to be registered into
/// a [`crate::call::CallFactory`] via [`register`].
pub fn define(
    name: &str,
    params: &[&str],
    body_sexpr: &str,
    origin: &str,
) -> Result<TemplateDef> {
    let body = Parser::new(body_sexpr, origin).parse_tree()?;
    let params: Vec<ParamName> = params.iter().map(|p| intern(p)).collect();
    validate_refs(&body, &params)?;
    Ok(TemplateDef {
        name: intern(name),
        params,
        body,
    })
}

/// Registers `def` as a new call in `factory`. Rejects redefinition of an
/// existing call name (§4.5 "Reject if a call of that name already
/// exists"), delegated to [`crate::call::CallFactory::register`]'s own
/// idempotent-forbidding check.
pub fn register(factory: &mut crate::call::CallFactory, def: TemplateDef) -> Result<()> {
    let arity = def.params.len();
    let body = std::sync::Arc::new(def.body);
    let params = std::sync::Arc::new(def.params);
    let name = def.name;

    let validate_body = params.clone();
    let transform_body = body.clone();
    let transform_params = params.clone();

    factory.register(CallSpec {
        name,
        validate: Some(Box::new(move |node, graph, phase| {
            if phase != Phase::Post {
                return Vec::new();
            }
            let got = graph.arena().get(node).data.args().len();
            if got != validate_body.len() {
                vec![Diagnostic::error(format!(
                    "template '{}' expects {} argument(s), got {got}",
                    name.as_str(),
                    validate_body.len()
                ))]
            } else {
                Vec::new()
            }
        })),
        transform: Some(Box::new(move |node, ctx: &mut TransformCtx| {
            let args: Vec<NodeId> = ctx.graph.arena().get(node).data.args().to_vec();
            if args.len() != transform_params.len() {
                // Leave the mismatched call in place; POST validate reports it.
                return Ok(false);
            }
            let instantiated = instantiate(ctx.graph, &transform_body, &transform_params, &args);
            ctx.graph.replace(node, instantiated)?;
            Ok(true)
        })),
        pre_evaluate: None,
        eval: Box::new(move |node, _args, state| {
            crate::utils::log_macros::error!(
                "template call '{}' survived to evaluation at {node}; its transform should have \
                 replaced it during the lifecycle",
                name.as_str()
            );
            state.set_value(node, crate::value::Value::Null);
            state.set_finished(node);
        }),
    })
}

/// Merges a copy of `body` into `graph`, substituting every `(ref 'p')`
/// occurrence with the actual argument bound to parameter `p`. Non-`ref`
/// nodes are rebuilt bottom-up and merged normally, so CSE applies across
/// every instantiation of this template (and with the rest of the graph)
/// exactly as it would for hand-written S-expressions (§4.5 "Substitution
/// re-enters the MergeGraph").
fn instantiate(
    graph: &mut crate::graph::MergeGraph,
    body: &ParseTree,
    params: &[ParamName],
    actual_args: &[NodeId],
) -> NodeId {
    if let Some(p) = ref_param(body) {
        let i = params.iter().position(|q| *q == p).expect("validated at definition time");
        return actual_args[i];
    }
    match body {
        ParseTree::Literal(v) => graph.merge(NodeData::Literal(v.clone())),
        ParseTree::Call { name, args } => {
            let resolved: smallvec::SmallVec<[NodeId; 4]> = args
                .iter()
                .map(|a| instantiate(graph, a, params, actual_args))
                .collect();
            graph.merge(NodeData::Call {
                name: *name,
                args: resolved,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ConfigContext;

    #[test]
    fn rejects_undeclared_param_ref() {
        let err = define("bad", &["x"], "(streq (ref 'y') 'z')", "test").unwrap_err();
        assert!(matches!(err, PredicateError::InvalidTemplate { .. }));
    }

    #[test]
    fn instantiation_substitutes_and_merges() {
        let mut ctx = ConfigContext::new();
        crate::calls::register_demo_calls(ctx.call_factory_mut()).unwrap();
        let def = define(
            "is_bad",
            &["x"],
            "(or (streq (ref 'x') 'evil') (streq (ref 'x') 'bad'))",
            "test",
        )
        .unwrap();
        register(ctx.call_factory_mut(), def).unwrap();

        let root = ctx.parse_and_add_root("(is_bad 'user-agent')", "test").unwrap();
        let frozen = ctx.close().unwrap();
        let node = frozen.root_node(root).unwrap();
        let text = frozen.arena().text_of(node);
        assert!(text.contains("'user-agent'"));
        assert!(!text.contains("is_bad"));
    }
}
