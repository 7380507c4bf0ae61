//! The context-close lifecycle (§4.4): validate → transform to fixpoint →
//! validate → index → pre-evaluate → freeze.
//!
//! Directly reshaped from the teacher's `egraph::run::Runner::run`
//! iterate-to-saturation loop: that loop applies rewrites until a pass
//! produces no change or a stop condition fires, and reports an
//! `egraph::run::Report`/`Iteration` per round. Here the "rewrites" are each
//! reachable node's own `transform` hook rather than externally supplied
//! rewrite rules, and the per-round report becomes [`LifecycleReport`].

use std::time::Duration;

use crate::{
    call::{CallFactory, Diagnostic, Phase, PreEvalCtx, Severity, TransformCtx},
    error::{PredicateError, Result},
    graph::MergeGraph,
    node::NodeId,
    utils::{HashSet, Instant},
};

/// A root's identity and accumulated origins, attached to a diagnostic so a
/// rule author can trace a failing node back to the predicate(s) that
/// introduced it (§4.4's reporter contract).
pub struct RootInfo {
    pub index: usize,
    pub origins: Vec<String>,
}

/// Sink for lifecycle diagnostics. The default [`LogReporter`] writes to the
/// `log` crate; tests typically supply a `Vec`-backed implementation to
/// assert against the diagnostic set directly (§9: raw order is not a
/// contract, only the set is).
pub trait Reporter {
    fn diagnostic(
        &mut self,
        severity: Severity,
        message: &str,
        node: NodeId,
        node_text: &str,
        node_origins: &[String],
        roots: &[RootInfo],
    );
}

/// Logs each diagnostic at the level matching its severity, mirroring the
/// teacher Runner's `info!`-per-iteration-boundary, `debug!`/`trace!`-per-rule
/// logging density.
#[derive(Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn diagnostic(
        &mut self,
        severity: Severity,
        message: &str,
        node: NodeId,
        node_text: &str,
        node_origins: &[String],
        roots: &[RootInfo],
    ) {
        use crate::utils::log_macros::{error, warn};
        let root_summary: Vec<usize> = roots.iter().map(|r| r.index).collect();
        match severity {
            Severity::Error => error!(
                "{node} `{node_text}` origins={node_origins:?} roots={root_summary:?}: {message}"
            ),
            Severity::Warning => warn!(
                "{node} `{node_text}` origins={node_origins:?} roots={root_summary:?}: {message}"
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StageStats {
    pub diagnostics: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct TransformStats {
    pub iterations: usize,
    pub nodes_changed: usize,
    pub elapsed: Duration,
}

/// Per-stage counts and timings for one lifecycle run, modeled on the
/// teacher's `egraph::run::Report`.
#[derive(Debug, Clone, Default)]
pub struct LifecycleReport {
    pub pre_validate: StageStats,
    pub transform: TransformStats,
    pub post_validate: StageStats,
    pub pre_evaluate: StageStats,
    pub index_limit: usize,
    pub total: Duration,
}

const DEFAULT_ITERATION_CAP: usize = 1000;

pub struct LifecycleConfig {
    pub iteration_cap: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig {
            iteration_cap: DEFAULT_ITERATION_CAP,
        }
    }
}

/// Runs the full §4.4 lifecycle against `graph`, returning accumulated
/// statistics on success. On any stage's abort condition, returns the
/// corresponding `PredicateError` variant and leaves `graph` in whatever
/// state the aborting stage left it (the lifecycle does not attempt
/// transactional rollback across stages; a context that fails to close is a
/// configuration bug the caller must fix and retry from a fresh context).
pub fn run(
    graph: &mut MergeGraph,
    factory: &CallFactory,
    reporter: &mut dyn Reporter,
    config: &LifecycleConfig,
) -> Result<LifecycleReport> {
    let start = Instant::now();

    assert_valid(graph)?;
    let pre_validate = validate_phase(graph, factory, reporter, Phase::Pre)?;

    let transform = transform_to_fixpoint(graph, factory, config.iteration_cap)?;

    assert_valid(graph)?;
    let post_validate = validate_phase(graph, factory, reporter, Phase::Post)?;

    let index_limit = index_nodes(graph);

    let pre_evaluate = pre_evaluate_all(graph, factory)?;

    Ok(LifecycleReport {
        pre_validate,
        transform,
        post_validate,
        pre_evaluate,
        index_limit,
        total: start.elapsed(),
    })
}

fn assert_valid(graph: &MergeGraph) -> Result<()> {
    let mut report = String::new();
    let ok = graph.write_validation_report(&mut report)?;
    if ok {
        Ok(())
    } else {
        crate::utils::log_macros::error!("graph failed internal audit:\n{report}");
        Err(PredicateError::InvalidState {
            message: format!("internal audit failed:\n{report}"),
        })
    }
}

/// Deterministic BFS over reachable nodes, seeded from root index order
/// (§4.4 step 6: "Indexing order is deterministic, BFS from the root-index
/// ordering"). Every lifecycle stage that must visit nodes in a stable
/// order reuses this.
fn bfs_order(graph: &MergeGraph) -> Vec<NodeId> {
    let mut seen = HashSet::default();
    let mut order = Vec::new();
    let mut queue: std::collections::VecDeque<NodeId> = std::collections::VecDeque::new();
    for i in 0..graph.root_count() {
        if let Some(root) = graph.root_at(i) {
            if seen.insert(root) {
                queue.push_back(root);
            }
        }
    }
    while let Some(id) = queue.pop_front() {
        order.push(id);
        for &child in graph.arena().get(id).data.args() {
            if seen.insert(child) {
                queue.push_back(child);
            }
        }
    }
    order
}

fn ancestor_roots(graph: &MergeGraph, node: NodeId) -> Vec<RootInfo> {
    let mut seen = HashSet::default();
    let mut stack = vec![node];
    let mut indices = std::collections::BTreeSet::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if graph.is_root(id) {
            indices.extend(graph.root_indices(id).iter().copied());
        }
        stack.extend(graph.arena().get(id).parents.iter().copied());
    }
    indices
        .into_iter()
        .map(|index| {
            let node = graph.root_at(index).expect("root index always resolves");
            RootInfo {
                index,
                origins: graph.arena().get(node).origins.clone(),
            }
        })
        .collect()
}

fn validate_phase(
    graph: &MergeGraph,
    factory: &CallFactory,
    reporter: &mut dyn Reporter,
    phase: Phase,
) -> Result<StageStats> {
    let start = Instant::now();
    let mut diagnostics = 0usize;
    let mut errors = 0usize;

    for id in bfs_order(graph) {
        let data = &graph.arena().get(id).data;
        let Some(name) = data.call_name() else { continue };
        let Some(spec) = factory.get(name) else { continue };
        let Some(validate) = &spec.validate else { continue };
        let found: Vec<Diagnostic> = validate(id, graph, phase);
        if found.is_empty() {
            continue;
        }
        let node_text = graph.arena().text_of(id);
        let node_origins = graph.arena().get(id).origins.clone();
        let roots = ancestor_roots(graph, id);
        for d in &found {
            diagnostics += 1;
            if d.severity == Severity::Error {
                errors += 1;
            }
            reporter.diagnostic(d.severity, &d.message, id, &node_text, &node_origins, &roots);
        }
    }

    if errors > 0 {
        return Err(PredicateError::Validation {
            message: format!("{errors} validation error(s) in phase {phase:?}"),
            node: None,
        });
    }

    Ok(StageStats {
        diagnostics,
        elapsed: start.elapsed(),
    })
}

fn transform_to_fixpoint(
    graph: &mut MergeGraph,
    factory: &CallFactory,
    iteration_cap: usize,
) -> Result<TransformStats> {
    let start = Instant::now();
    let mut iterations = 0usize;
    let mut nodes_changed = 0usize;

    loop {
        if iterations >= iteration_cap {
            return Err(PredicateError::Transform {
                message: format!("transform pass did not converge within {iteration_cap} iterations"),
                node: None,
            });
        }
        iterations += 1;
        let mut changed_this_pass = false;

        for id in bfs_order(graph) {
            let data = graph.arena().get(id).data.clone();
            let Some(name) = data.call_name() else { continue };
            let Some(spec) = factory.get(name) else { continue };
            let Some(transform) = &spec.transform else { continue };
            let mut ctx = TransformCtx {
                graph: &mut *graph,
                factory,
            };
            let changed = transform(id, &mut ctx)?;
            if changed {
                changed_this_pass = true;
                nodes_changed += 1;
            }
        }

        crate::utils::log_macros::debug!(
            "transform pass {iterations}: changed={changed_this_pass}"
        );

        if !changed_this_pass {
            break;
        }
    }

    crate::utils::log_macros::info!(
        "transform reached fixpoint after {iterations} iteration(s), {nodes_changed} node(s) changed"
    );

    Ok(TransformStats {
        iterations,
        nodes_changed,
        elapsed: start.elapsed(),
    })
}

fn index_nodes(graph: &mut MergeGraph) -> usize {
    let order = bfs_order(graph);
    let limit = order.len();
    for (i, id) in order.into_iter().enumerate() {
        graph.arena_mut().get_mut(id).index = Some(i);
    }
    limit
}

fn pre_evaluate_all(graph: &mut MergeGraph, factory: &CallFactory) -> Result<StageStats> {
    let start = Instant::now();
    let mut diagnostics = 0usize;

    for id in bfs_order(graph) {
        let data = graph.arena().get(id).data.clone();
        let Some(name) = data.call_name() else { continue };
        let Some(spec) = factory.get(name) else { continue };
        let Some(pre_evaluate) = &spec.pre_evaluate else { continue };
        let mut ctx = PreEvalCtx { graph: &*graph };
        pre_evaluate(id, &mut ctx).map_err(|e| match e {
            PredicateError::PreEvaluation { message, .. } => {
                diagnostics += 1;
                PredicateError::PreEvaluation { message, node: id }
            }
            other => other,
        })?;
    }

    Ok(StageStats {
        diagnostics,
        elapsed: start.elapsed(),
    })
}
