//! End-to-end scenarios straight off the public spec (§8 S1-S6), exercised
//! through the crate's public API (`ConfigContext`, `calls`, `oracle`,
//! `config`) rather than any internal module, matching the teacher's
//! convention of keeping exhaustive end-to-end cases outside `src/`.

use predicate_core::{
    calls,
    config::{apply_define_directive, apply_debug_report_directive, DebugReportSink},
    context::ConfigContext,
    error::PredicateError,
    eval::{PerTransaction, Transaction},
    value::Value,
};
use pretty_assertions::assert_eq;

fn demo_context() -> ConfigContext {
    let mut ctx = ConfigContext::new();
    calls::register_demo_calls(ctx.call_factory_mut()).unwrap();
    ctx
}

/// S1 — CSE: two structurally-equal `streq` expressions, one nested twice
/// inside an `and` and one added again as its own root, must collapse to a
/// single representative. The representative is referenced twice from
/// `and`'s own argument list (once per argument slot) and carries exactly
/// one root index of its own (the direct `(streq 'x' 'x')` root) — the
/// `and` node is a *separate* root and does not itself grant its argument
/// a root index (only `add_root` does that, never mere membership as a
/// child).
#[test]
fn s1_common_subexpression_collapses_to_one_representative() {
    let mut ctx = demo_context();
    let and_root = ctx
        .parse_and_add_root("(and (streq 'x' 'x') (streq 'x' 'x'))", "s1")
        .unwrap();
    let streq_root = ctx.parse_and_add_root("(streq 'x' 'x')", "s1").unwrap();

    let graph = ctx.graph();
    let and_node = graph.root_at(and_root).unwrap();
    let streq_node = graph.root_at(streq_root).unwrap();

    let and_args = graph.arena().get(and_node).data.args();
    assert_eq!(and_args, &[streq_node, streq_node], "and references one representative twice");
    assert_eq!(graph.root_indices(streq_node), &[streq_root]);
    assert!(graph.is_root(streq_node));
}

/// S2 — Constant folding: `(and (true) (true) (false))` folds, over the
/// transform-to-fixpoint loop, all the way down to a literal `false`. Two
/// transforms compose to get here: `(true)`/`(false)` fold to literal
/// numbers first, then `and`'s own transform folds once its children are
/// literal (§9 "ref"/"boolean literal surface form" in DESIGN.md explains
/// why these are 0-arity calls rather than bareword literals).
#[test]
fn s2_constant_folding_reaches_fixpoint() {
    let _ = env_logger::try_init();
    let mut ctx = demo_context();
    let root = ctx.parse_and_add_root("(and (true) (true) (false))", "s2").unwrap();
    let frozen = ctx.close().unwrap();
    let node = frozen.root_node(root).unwrap();
    assert_eq!(frozen.arena().text_of(node), "0");
    assert!(frozen.arena().get(node).data.is_literal());
}

/// S3 — Template: `is_bad(x) = (or (streq (ref 'x') 'evil') (streq (ref
/// 'x') 'bad'))`, instantiated as `(is_bad 'user-agent')`. After the
/// lifecycle the template call has vanished (replaced by its substituted
/// body) and a transaction whose `user-agent` field is `'evil'` resolves
/// truthy and finished.
#[test]
fn s3_template_instantiates_and_evaluates() {
    let mut ctx = demo_context();
    apply_define_directive(
        &mut ctx,
        &["is_bad", "x", "(or (streq (ref 'x') 'evil') (streq (ref 'x') 'bad'))"],
        "rules.conf:1",
    )
    .unwrap();

    let root = ctx.parse_and_add_root("(is_bad 'user-agent')", "s3").unwrap();
    let frozen = ctx.close().unwrap();
    let node = frozen.root_node(root).unwrap();

    let text = frozen.arena().text_of(node);
    assert!(!text.contains("is_bad"), "template call must not survive transforms: {text}");

    let mut tx = PerTransaction::new(&frozen, Transaction::new().with_field("user-agent", "evil"));
    let (value, finished) = tx.query(node);
    assert!(finished);
    assert!(value.is_truthy());
    assert_ne!(value, Value::Null);
}

/// S4 — Streaming: `(gather 3)` emits one more list element per `query`
/// call, growing monotonically, finishing on the third.
#[test]
fn s4_streaming_node_grows_monotonically() {
    let mut ctx = demo_context();
    let root = ctx.parse_and_add_root("(gather 3)", "s4").unwrap();
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

    let (v4, f4) = tx.query(node);
    assert_eq!(v4, v3, "finished slots must not change value on further queries");
    assert!(f4);
}

/// S5 — Parse error: a missing closing paren reports the offset at end of
/// input, with an excerpt window and the supplied origin.
#[test]
fn s5_parse_error_reports_offset_and_origin() {
    let mut ctx = demo_context();
    let err = ctx
        .parse_and_add_root("(and (streq 'x' 'x')", "rules.conf:7")
        .unwrap_err();
    match err {
        PredicateError::Parse { at, .. } => {
            // End of input: the unterminated `(streq ...)` call is still
            // open when bytes run out, so the offset lands at the byte
            // length of the source text (20), matching `parser.rs`'s own
            // `unterminated_call_reports_offset` unit test for the same
            // shape of input.
            assert_eq!(at.offset, 20);
        }
        other => panic!("expected a parse error, got {other:?}"),
    }
}

/// S6 — Cycle refusal: replacing a node with its own parent must fail and
/// leave the graph unchanged. `(not 'a')` is parsed but not yet transformed
/// (transforms run at `close()`, not at parse time), so its argument edge
/// is still intact to attempt the illegal replace against.
#[test]
fn s6_replace_refuses_a_cycle() {
    let mut ctx = demo_context();
    let root = ctx.parse_and_add_root("(not 'a')", "s6").unwrap();

    let graph = ctx.graph_mut();
    let parent = graph.root_at(root).unwrap();
    let leaf = graph.arena().get(parent).data.args()[0];

    let err = graph.replace(leaf, parent).unwrap_err();
    assert!(matches!(err, PredicateError::InvalidState { .. }));
    assert_eq!(graph.arena().get(parent).data.args(), &[leaf]);
}

/// `PredicateDebugReport` directive parsing (§6): empty path or `-` means
/// stderr, anything else is a file path.
#[test]
fn debug_report_directive_chooses_sink() {
    assert!(matches!(apply_debug_report_directive(&["-"]).unwrap(), DebugReportSink::Stderr));
    assert!(matches!(apply_debug_report_directive(&[""]).unwrap(), DebugReportSink::Stderr));
    assert!(matches!(
        apply_debug_report_directive(&["/tmp/predicate-debug.log"]).unwrap(),
        DebugReportSink::File(_)
    ));
}

/// Property 7 (§8): two roots sharing a sub-node evaluate that sub-node at
/// most once per `query` — observed indirectly via the shared node being
/// `finished` immediately for both oracles once the first one resolves it.
#[test]
fn shared_subexpression_seen_by_two_roots_is_consistent() {
    let mut ctx = demo_context();
    let shared = "(streq 'user-agent' 'evil')";
    let r1 = ctx.acquire(shared, "o1").unwrap();
    let r2 = ctx.acquire(&format!("(and {shared} {shared})"), "o2").unwrap();

    let frozen = std::rc::Rc::new(ctx.close().unwrap());
    let b1 = r1.bind(frozen.clone()).unwrap();
    let b2 = r2.bind(frozen.clone()).unwrap();

    let mut session = predicate_core::oracle::OracleSession::new(
        &frozen,
        Transaction::new().with_field("user-agent", "evil"),
    );
    let (v1, f1) = session.query(&b1).unwrap();
    let (v2, f2) = session.query(&b2).unwrap();
    assert!(f1 && f2);
    assert!(v1.is_truthy() && v2.is_truthy());
}
