//! Per-configuration-context glue (§2 item 7, §4.4, §5).
//!
//! A [`ConfigContext`] owns one [`MergeGraph`] during configuration; closing
//! it runs the full lifecycle (§4.4) and produces a [`FrozenGraph`], an
//! immutable, cheaply-shared snapshot transactions evaluate against.
//! Opening a child context is a full structural copy of the parent's
//! `MergeGraph` (§9 "Copy-on-context-open"), matching §3's ownership model
//! rather than copy-on-write, which the teacher crate's own `ExprContext`
//! likewise never attempts to share mutably across owners.

use std::rc::Rc;

use crate::{
    call::CallFactory,
    error::{PredicateError, Result},
    graph::{
        lifecycle::{self, LifecycleConfig, LifecycleReport},
        MergeGraph,
    },
    node::{NodeArena, NodeData, NodeId},
    parser::{ParseTree, Parser},
    utils::HashMap,
};

/// Everything still mutable during configuration: the graph under
/// construction and the call registry new templates get added to.
pub struct ConfigContext {
    graph: MergeGraph,
    factory: CallFactory,
    lifecycle_config: LifecycleConfig,
}

impl ConfigContext {
    pub fn new() -> Self {
        ConfigContext {
            graph: MergeGraph::new(),
            factory: CallFactory::new(),
            lifecycle_config: LifecycleConfig::default(),
        }
    }

    pub fn call_factory(&self) -> &CallFactory {
        &self.factory
    }

    pub fn call_factory_mut(&mut self) -> &mut CallFactory {
        &mut self.factory
    }

    pub fn graph(&self) -> &MergeGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut MergeGraph {
        &mut self.graph
    }

    pub fn set_iteration_cap(&mut self, cap: usize) {
        self.lifecycle_config.iteration_cap = cap;
    }

    /// Opens a child context inheriting this context's graph and call
    /// registry by full structural copy (§9 Copy-on-context-open). The
    /// child's subsequent mutations never affect `self`. Cloning the
    /// factory is cheap (its entries are `Rc<CallSpec>`, §4.2); cloning the
    /// graph is a genuine deep copy of every node identity, per §3's
    /// "Ownership" note that a correctness-first implementation performs a
    /// full copy rather than copy-on-write.
    pub fn open_child(&self) -> ConfigContext {
        ConfigContext {
            graph: self.graph.deep_clone(),
            factory: self.factory.clone(),
            lifecycle_config: LifecycleConfig {
                iteration_cap: self.lifecycle_config.iteration_cap,
            },
        }
    }

    /// Parses `text` (an S-expression) tagged with `origin`, merges it
    /// bottom-up into the graph (so every sub-expression participates in
    /// CSE), and registers the result as a new root. Returns the root
    /// index (§4.3 `add_root`).
    pub fn parse_and_add_root(&mut self, text: &str, origin: &str) -> Result<usize> {
        let tree = Parser::new(text, origin).parse_tree()?;
        let node = merge_tree(&mut self.graph, &self.factory, &tree, origin)?;
        Ok(self.graph.add_root(node, origin.to_owned()))
    }

    /// §6 `acquire(context, expr_text, origin) -> oracle`: parses and roots
    /// `text`, returning a handle that becomes queryable once this context
    /// closes (`Oracle::bind`). Valid only during configuration.
    pub fn acquire(&mut self, text: &str, origin: &str) -> Result<crate::oracle::Oracle> {
        let root_index = self.parse_and_add_root(text, origin)?;
        Ok(crate::oracle::Oracle::new(root_index))
    }

    /// Defines a template (§4.5) and registers it as a new call in this
    /// context's factory.
    pub fn define_template(
        &mut self,
        name: &str,
        params: &[&str],
        body_sexpr: &str,
        origin: &str,
    ) -> Result<()> {
        let def = crate::template::define(name, params, body_sexpr, origin)?;
        crate::template::register(&mut self.factory, def)
    }

    /// Runs the full lifecycle (§4.4) and releases the configuration-time
    /// `MergeGraph`, returning the frozen snapshot transactions evaluate
    /// against.
    pub fn close(mut self) -> Result<FrozenGraph> {
        let mut reporter = lifecycle::LogReporter;
        let report = lifecycle::run(
            &mut self.graph,
            &self.factory,
            &mut reporter,
            &self.lifecycle_config,
        )?;
        crate::utils::log_macros::info!(
            "context closed: {} root(s), index_limit={}, {:?} elapsed",
            self.graph.root_count(),
            report.index_limit,
            report.total
        );
        Ok(FrozenGraph::build(self.graph, self.factory, report))
    }
}

impl Default for ConfigContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Merges a [`ParseTree`] into `graph` bottom-up, so every sub-expression
/// (not just the root) participates in CSE (§4.3's structural-hashing
/// contract). Rejects call names the factory doesn't recognize (§4.1
/// "Unknown call names are a parse-time error").
fn merge_tree(
    graph: &mut MergeGraph,
    factory: &CallFactory,
    tree: &ParseTree,
    origin: &str,
) -> Result<NodeId> {
    match tree {
        ParseTree::Literal(v) => Ok(graph.merge(NodeData::Literal(v.clone()))),
        ParseTree::Call { name, args } => {
            if !factory.contains(*name) {
                return Err(PredicateError::UnknownCall {
                    name: name.as_str().to_owned(),
                    at: crate::error::SourceExcerpt {
                        offset: 0,
                        excerpt: origin.to_owned(),
                    },
                });
            }
            let resolved: smallvec::SmallVec<[NodeId; 4]> = args
                .iter()
                .map(|a| merge_tree(graph, factory, a, origin))
                .collect::<Result<_>>()?;
            Ok(graph.merge(NodeData::Call {
                name: *name,
                args: resolved,
            }))
        }
    }
}

/// The immutable post-freeze snapshot (§4.4 step 8). Shared by reference
/// across every transaction of the context that produced it; the
/// configuration-time `MergeGraph` it was built from is dropped once this
/// is constructed, reclaiming the working-set memory (§5 Resource
/// ownership).
pub struct FrozenGraph {
    arena: NodeArena,
    index_limit: usize,
    /// `roots[i]` is the node for root index `i`, captured at freeze time
    /// from the `MergeGraph`'s final `root_indices` (§9 "Oracle indices vs
    /// node indices").
    roots: Vec<NodeId>,
    index_of: HashMap<NodeId, usize>,
    factory: Rc<CallFactory>,
    pub report: LifecycleReport,
}

impl FrozenGraph {
    fn build(graph: MergeGraph, factory: CallFactory, report: LifecycleReport) -> Self {
        let roots: Vec<NodeId> = (0..graph.root_count())
            .map(|i| graph.root_at(i).expect("root index always resolves"))
            .collect();
        let mut index_of = HashMap::default();
        for id in graph.arena().ids() {
            if let Some(i) = graph.arena().get(id).index {
                index_of.insert(id, i);
            }
        }
        FrozenGraph {
            arena: graph.into_arena(),
            index_limit: report.index_limit,
            roots,
            index_of,
            factory: Rc::new(factory),
            report,
        }
    }

    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    pub fn factory(&self) -> &CallFactory {
        &self.factory
    }

    pub fn index_limit(&self) -> usize {
        self.index_limit
    }

    pub fn index_of(&self, node: NodeId) -> Option<usize> {
        self.index_of.get(&node).copied()
    }

    /// Resolves a root index acquired at configuration time (before
    /// transforms ran) to its current representative node. Root indices
    /// outlive any rewriting the lifecycle did to the node they originally
    /// named (§9 "Oracle indices vs node indices").
    pub fn root_node(&self, root_index: usize) -> Result<NodeId> {
        self.roots.get(root_index).copied().ok_or_else(|| PredicateError::InvalidState {
            message: format!("root index {root_index} does not exist in this frozen graph"),
        })
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }
}
