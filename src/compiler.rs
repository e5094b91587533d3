//! Pattern compilation to binding plans
//!
//! The compiler builds the intermediate pattern graph, links its components
//! to the anchor, and then walks it depth-first from the anchor. Each node
//! and edge is visited once; the walk emits a generator, let or guard step
//! for every element in the order it is reached. Which step an element gets
//! depends on what is already bound at that point, and on the backend
//! strategy.

use log::{debug, trace};
use rustc_hash::FxHashSet;

use crate::backend::{Backend, BackendStrategy};
use crate::error::CompileError;
use crate::expr::{CmpOp, Expr};
use crate::path::{ChainSegment, compress};
use crate::pattern_graph::{ANCHOR, EdgeId, EdgeKind, NodeId, NodeKind, PatternGraph};
use crate::plan::{BindingPlan, BindingStep, GuardMode, PlanItem, expand_fail_fast};
use crate::token::{ConstraintForm, Direction, PatternToken, classify_all, tokenize};

/// Compiler configuration
///
/// ```
/// use shapeplan::{Backend, Compiler};
///
/// let plan = Compiler::new()
///     .backend(Backend::Graph)
///     .compile_str::<&str>(&[], "f<Family> -hf<HasFather>-> m<Member>")
///     .unwrap();
/// assert_eq!(plan.result_names(), ["f", "hf", "m"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    backend: Option<Backend>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the model family plans are compiled for
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Compile a pattern given as a sequence of elements
    pub fn compile<A: AsRef<str>, T: AsRef<str>>(
        &self,
        arguments: &[A],
        elements: &[T],
    ) -> Result<BindingPlan, CompileError> {
        let backend = self.backend.ok_or(CompileError::UnresolvedBackendContext)?;
        compile(arguments, elements, backend)
    }

    /// Compile a pattern written as one string
    pub fn compile_str<A: AsRef<str>>(
        &self,
        arguments: &[A],
        pattern: &str,
    ) -> Result<BindingPlan, CompileError> {
        let backend = self.backend.ok_or(CompileError::UnresolvedBackendContext)?;
        compile_tokens(arguments, &tokenize(pattern)?, backend)
    }
}

/// Compile a pattern given as a sequence of elements
pub fn compile<A: AsRef<str>, T: AsRef<str>>(
    arguments: &[A],
    elements: &[T],
    backend: Backend,
) -> Result<BindingPlan, CompileError> {
    compile_tokens(arguments, &classify_all(elements)?, backend)
}

/// Compile an already classified token stream
pub fn compile_tokens<A: AsRef<str>>(
    arguments: &[A],
    tokens: &[PatternToken],
    backend: Backend,
) -> Result<BindingPlan, CompileError> {
    let mut graph = PatternGraph::build(arguments, tokens)?;
    graph.resolve_components();

    let arguments: Vec<String> = arguments.iter().map(|a| a.as_ref().to_string()).collect();
    let items = Traversal::new(&graph, backend.strategy(), &arguments).run()?;
    let steps = expand_fail_fast(items);

    debug!(
        "Compiled {} tokens for the {} backend: {} nodes, {} edges, {} steps",
        tokens.len(),
        backend,
        graph.nodes().len(),
        graph.edges().len(),
        steps.len()
    );

    Ok(BindingPlan::new(
        backend,
        arguments,
        steps,
        graph.result_names().to_vec(),
    ))
}

/// Variable a node is bound to; anonymous nodes get `#<handle>`
fn var_name(graph: &PatternGraph, node: NodeId) -> String {
    graph
        .node(node)
        .name
        .clone()
        .unwrap_or_else(|| format!("#{node}"))
}

/// Depth-first walk over the pattern graph
struct Traversal<'g> {
    graph: &'g PatternGraph,
    strategy: &'g dyn BackendStrategy,
    nodes_done: Vec<bool>,
    edges_done: Vec<bool>,
    /// Variables bound by the steps emitted so far
    bound: FxHashSet<String>,
    /// Edges still to traverse, with the node they are traversed from
    stack: Vec<(EdgeId, NodeId)>,
    items: Vec<PlanItem>,
}

impl<'g> Traversal<'g> {
    fn new(
        graph: &'g PatternGraph,
        strategy: &'g dyn BackendStrategy,
        arguments: &[String],
    ) -> Self {
        Self {
            graph,
            strategy,
            nodes_done: vec![false; graph.nodes().len()],
            edges_done: vec![false; graph.edges().len()],
            bound: arguments.iter().cloned().collect(),
            stack: Vec::new(),
            items: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<PlanItem>, CompileError> {
        self.nodes_done[ANCHOR] = true;
        self.expand(ANCHOR);

        while let Some((edge, from)) = self.stack.pop() {
            if self.edges_done[edge] {
                continue;
            }
            self.edges_done[edge] = true;
            self.traverse(edge, from)?;
        }

        Ok(self.items)
    }

    /// Schedule the unvisited edges of `node`, first-created on top
    fn expand(&mut self, node: NodeId) {
        let graph = self.graph;
        for &edge in graph.node(node).incident.iter().rev() {
            if !self.edges_done[edge] {
                self.stack.push((edge, node));
            }
        }
    }

    fn emit(&mut self, step: BindingStep) {
        trace!("emit {step}");
        if let Some(var) = step.var() {
            self.bound.insert(var.to_string());
        }
        self.items.push(PlanItem::Step(step));
    }

    fn traverse(&mut self, edge: EdgeId, from: NodeId) -> Result<(), CompileError> {
        let graph = self.graph;
        let e = graph.edge(edge);
        let target = e.other(from);

        match e.kind {
            EdgeKind::HasStart => {
                self.start_component(target);
                Ok(())
            }
            EdgeKind::Precedes => self.splice(target),
            EdgeKind::Pattern => match &e.name {
                Some(name) => {
                    let direction = e.orient(from);
                    let source = self.strategy.edge_call(
                        name,
                        &var_name(graph, from),
                        e.ty.as_ref(),
                        direction,
                    )?;
                    self.emit(BindingStep::Generator {
                        var: name.clone(),
                        source,
                    });
                    self.reach_target(name, direction, target);
                    Ok(())
                }
                None => self.anonymous_edge(edge, from),
            },
            EdgeKind::Argument => {
                // argument edges always carry a name
                let name = e.name.clone().unwrap_or_default();
                self.strategy.argument_edge(&name)?;
                let direction = e.orient(from);
                self.emit(BindingStep::filter(Expr::IncidentAt {
                    edge: name.clone(),
                    node: var_name(graph, from),
                    ty: e.ty.clone(),
                    direction,
                }));
                self.reach_target(&name, direction, target);
                Ok(())
            }
        }
    }

    fn start_component(&mut self, node: NodeId) {
        if self.nodes_done[node] {
            return;
        }
        let graph = self.graph;
        let var = var_name(graph, node);
        let step = match graph.node(node).kind {
            NodeKind::Argument => BindingStep::Let {
                expr: Expr::Argument(var.clone()),
                var,
            },
            _ => BindingStep::Generator {
                source: self.strategy.generator_call(graph.node(node).ty.as_ref()),
                var,
            },
        };
        self.emit(step);
        self.nodes_done[node] = true;
        self.expand(node);
    }

    /// Bind or check the far end of a named or argument edge
    fn reach_target(&mut self, edge: &str, direction: Direction, target: NodeId) {
        let graph = self.graph;
        let node = graph.node(target);
        let var = var_name(graph, target);
        let end = Expr::EdgeEnd {
            edge: edge.to_string(),
            direction,
        };

        if self.nodes_done[target] || node.kind == NodeKind::Argument {
            self.emit(BindingStep::filter(Expr::Compare(
                CmpOp::Eq,
                Box::new(end),
                Box::new(Expr::Var(var)),
            )));
        } else {
            trace!("fail-fast binding of {var} through {edge}");
            self.bound.insert(var.clone());
            self.items.push(PlanItem::FailFast(vec![(var.clone(), end)]));
            if let Some(ty) = &node.ty {
                self.emit(BindingStep::filter(Expr::IsInstance(
                    Box::new(Expr::Var(var)),
                    ty.clone(),
                )));
            }
        }

        if !self.nodes_done[target] {
            self.nodes_done[target] = true;
            self.expand(target);
        }
    }

    fn anonymous_edge(&mut self, edge: EdgeId, from: NodeId) -> Result<(), CompileError> {
        let graph = self.graph;
        let chain = compress(graph, from, edge, &self.nodes_done, &self.edges_done)?;
        for &e in &chain.edges {
            self.edges_done[e] = true;
        }
        for &n in &chain.consumed {
            self.nodes_done[n] = true;
        }

        let from_var = var_name(graph, from);
        let terminal = graph.node(chain.terminal);
        let terminal_var = var_name(graph, chain.terminal);
        let mut segments = chain.segments;
        trace!(
            "compressed {} elements between {from_var} and {terminal_var}",
            2 * chain.edges.len() - 1
        );

        if self.nodes_done[chain.terminal] || terminal.kind == NodeKind::Argument {
            let source = self.strategy.reachability_call(&from_var, &segments);
            self.emit(BindingStep::filter(Expr::Member(terminal_var, source)));
        } else {
            if let Some(ty) = &terminal.ty {
                segments.push(ChainSegment::Node(ty.clone()));
            }
            let source = self.strategy.reachability_call(&from_var, &segments);
            if terminal.is_anonymous() && chain.dead_end {
                self.emit(BindingStep::filter(Expr::NonEmpty(source)));
            } else {
                self.emit(BindingStep::Generator {
                    var: terminal_var,
                    source,
                });
            }
        }

        if !self.nodes_done[chain.terminal] {
            self.nodes_done[chain.terminal] = true;
            self.expand(chain.terminal);
        }
        // constraints on the folded nodes come right after the chain step
        for &n in chain.consumed.iter().rev() {
            self.expand(n);
        }
        Ok(())
    }

    /// Emit the steps of a constraint node and continue along its chain
    fn splice(&mut self, node: NodeId) -> Result<(), CompileError> {
        if self.nodes_done[node] {
            return Ok(());
        }
        let graph = self.graph;
        let NodeKind::Constraint(form) = &graph.node(node).kind else {
            return Ok(());
        };

        match form {
            ConstraintForm::When(predicate) => {
                self.require_bound(predicate)?;
                self.emit(BindingStep::filter(predicate.clone()));
            }
            ConstraintForm::While(predicate) => {
                self.require_bound(predicate)?;
                self.emit(BindingStep::Guard {
                    predicate: predicate.clone(),
                    mode: GuardMode::Halt,
                });
            }
            ConstraintForm::Let(bindings) => {
                for (var, expr) in bindings {
                    self.require_bound(expr)?;
                    self.emit(BindingStep::Let {
                        var: var.clone(),
                        expr: expr.clone(),
                    });
                }
            }
            ConstraintForm::WhenLet(bindings) => {
                for (var, expr) in bindings {
                    self.require_bound(expr)?;
                    self.bound.insert(var.clone());
                }
                self.items.push(PlanItem::FailFast(bindings.clone()));
            }
        }

        self.nodes_done[node] = true;
        self.expand(node);
        Ok(())
    }

    fn require_bound(&self, expr: &Expr) -> Result<(), CompileError> {
        match expr.free_vars().into_iter().find(|v| !self.bound.contains(*v)) {
            Some(var) => Err(CompileError::UnboundVariable(var.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{PathExpr, PathSegment, Source};
    use crate::token::TypeSpec;

    fn graph_plan(arguments: &[&str], pattern: &[&str]) -> BindingPlan {
        compile(arguments, pattern, Backend::Graph).unwrap()
    }

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::var(name))
    }

    fn out(ty: Option<&str>) -> PathSegment {
        PathSegment::Edge {
            ty: ty.map(TypeSpec::new),
            direction: Direction::Out,
        }
    }

    #[test]
    fn test_family_has_father_plan() {
        let plan = graph_plan(&[], &["f<Family>", "-hf<HasFather>->", "m<Member>"]);

        assert_eq!(
            plan.steps(),
            [
                BindingStep::Generator {
                    var: "f".to_string(),
                    source: Source::InstancesOf(Some(TypeSpec::new("Family"))),
                },
                BindingStep::Generator {
                    var: "hf".to_string(),
                    source: Source::Incidences {
                        from: "f".to_string(),
                        ty: Some(TypeSpec::new("HasFather")),
                        direction: Direction::Out,
                    },
                },
                BindingStep::Let {
                    var: "m".to_string(),
                    expr: Expr::EdgeEnd {
                        edge: "hf".to_string(),
                        direction: Direction::Out,
                    },
                },
                BindingStep::filter(Expr::IsPresent("m".to_string())),
                BindingStep::filter(Expr::IsInstance(var("m"), TypeSpec::new("Member"))),
            ]
        );
    }

    #[test]
    fn test_step_names_match_declared_names() {
        let plan = graph_plan(
            &[],
            &["a", "-e->", "b", "-->", "c", ":let", "[n = c.name]"],
        );
        let bound: Vec<_> = plan.bound_names().collect();
        assert_eq!(bound, ["a", "e", "b", "c", "n"]);
        assert_eq!(plan.result_names(), ["a", "e", "b", "c", "n"]);
    }

    #[test]
    fn test_anonymous_two_hop() {
        let plan = graph_plan(&[], &["a", "-->", "_", "-->", "c<Target>"]);

        // three anonymous elements fold into one reachability step
        assert_eq!(plan.steps().len(), 2);
        assert_eq!(
            plan.steps()[1],
            BindingStep::Generator {
                var: "c".to_string(),
                source: Source::Reachables {
                    from: "a".to_string(),
                    path: PathExpr::new(vec![
                        out(None),
                        out(None),
                        PathSegment::Restrict(TypeSpec::new("Target")),
                    ]),
                },
            }
        );
    }

    #[test]
    fn test_anonymous_dead_end_is_existence_check() {
        let plan = graph_plan(&[], &["a", "-<Link>->", "_<Leaf>"]);
        assert_eq!(
            plan.steps()[1],
            BindingStep::filter(Expr::NonEmpty(Source::Reachables {
                from: "a".to_string(),
                path: PathExpr::new(vec![
                    out(Some("Link")),
                    PathSegment::Restrict(TypeSpec::new("Leaf")),
                ]),
            }))
        );
    }

    #[test]
    fn test_anonymous_chain_to_bound_node() {
        let plan = graph_plan(&[], &["a", "-e->", "b", "-->", "a"]);
        assert_eq!(
            plan.steps().last(),
            Some(&BindingStep::filter(Expr::Member(
                "a".to_string(),
                Source::Reachables {
                    from: "b".to_string(),
                    path: PathExpr::new(vec![out(None)]),
                }
            )))
        );
    }

    #[test]
    fn test_anonymous_node_before_named_edge() {
        let plan = graph_plan(&[], &["a", "-->", "_", "-e->", "b"]);
        let bound: Vec<_> = plan.bound_names().collect();
        assert_eq!(bound, ["a", "#2", "e", "b"]);
        assert_eq!(plan.result_names(), ["a", "e", "b"]);
    }

    #[test]
    fn test_cycle_closes_with_guard() {
        let plan = graph_plan(&[], &["a<T>", "-e->", "b", "-f->", "a<T>"]);
        assert_eq!(
            plan.steps().last(),
            Some(&BindingStep::filter(Expr::Compare(
                CmpOp::Eq,
                Box::new(Expr::EdgeEnd {
                    edge: "f".to_string(),
                    direction: Direction::Out,
                }),
                var("a"),
            )))
        );

        let conflict = compile::<&str, &str>(
            &[],
            &["a<T>", "-e->", "b", "-f->", "a<U>"],
            Backend::Graph,
        );
        assert!(matches!(
            conflict,
            Err(CompileError::DuplicateOrConflictingName(name)) if name == "a"
        ));
    }

    #[test]
    fn test_multiple_components() {
        let plan = graph_plan(&[], &["a<X>", "b<Y>", ":when", "a.k == b.k"]);
        assert_eq!(plan.steps().len(), 3);
        assert!(plan.steps()[0].is_generator());
        assert!(plan.steps()[1].is_generator());
        assert!(plan.steps()[2].is_guard());
    }

    #[test]
    fn test_argument_node() {
        let plan = graph_plan(&["p"], &["p", "-e->", "q"]);
        assert_eq!(
            plan.steps()[0],
            BindingStep::Let {
                var: "p".to_string(),
                expr: Expr::Argument("p".to_string()),
            }
        );
        assert_eq!(plan.arguments(), ["p"]);
        assert_eq!(plan.result_names(), ["e", "q"]);
    }

    #[test]
    fn test_edge_into_argument_node_is_checked() {
        let plan = graph_plan(&["p"], &["q", "-e->", "p"]);
        assert_eq!(plan.steps().len(), 3);
        assert_eq!(
            plan.steps()[2],
            BindingStep::filter(Expr::Compare(
                CmpOp::Eq,
                Box::new(Expr::EdgeEnd {
                    edge: "e".to_string(),
                    direction: Direction::Out,
                }),
                var("p"),
            ))
        );
    }

    #[test]
    fn test_argument_edge() {
        let plan = graph_plan(&["e"], &["p", "-e<Link>->", "q"]);
        assert_eq!(
            plan.steps()[1],
            BindingStep::filter(Expr::IncidentAt {
                edge: "e".to_string(),
                node: "p".to_string(),
                ty: Some(TypeSpec::new("Link")),
                direction: Direction::Out,
            })
        );
        assert_eq!(plan.steps()[2].var(), Some("q"));
    }

    #[test]
    fn test_constraints_in_declaration_order() {
        let plan = graph_plan(
            &["limit"],
            &[
                "a",
                ":while",
                "a.rank < limit",
                ":when-let",
                "[n = a.name]",
                ":when",
                "n != \"x\"",
            ],
        );
        let steps = plan.steps();
        assert_eq!(steps.len(), 5);
        assert!(matches!(
            &steps[1],
            BindingStep::Guard {
                mode: GuardMode::Halt,
                ..
            }
        ));
        assert_eq!(steps[2].var(), Some("n"));
        assert_eq!(steps[3], BindingStep::filter(Expr::IsPresent("n".to_string())));
        assert!(matches!(
            &steps[4],
            BindingStep::Guard {
                mode: GuardMode::Filter,
                ..
            }
        ));
    }

    #[test]
    fn test_unbound_variable() {
        let result = compile::<&str, &str>(&[], &["a", ":when", "b.x == 1", "b"], Backend::Graph);
        assert!(matches!(result, Err(CompileError::UnboundVariable(name)) if name == "b"));
    }

    #[test]
    fn test_constraint_on_sibling_branch() {
        let compiler = Compiler::new().backend(Backend::Graph);

        // b's branch is walked before c is bound
        let result = compiler.compile_str::<&str>(&[], "a -e-> b a -f-> c b :when c.x == 1");
        assert!(matches!(result, Err(CompileError::UnboundVariable(name)) if name == "c"));

        let plan = compiler
            .compile_str::<&str>(&[], "a -e-> b a -f-> c :when c.x == 1")
            .unwrap();
        let filters_on_c = plan.steps().iter().any(|s| match s {
            BindingStep::Guard { predicate, .. } => predicate.free_vars().contains(&"c"),
            _ => false,
        });
        assert!(filters_on_c);
    }

    #[test]
    fn test_containment_backend() {
        let plan = compile::<&str, &str>(
            &[],
            &["doc<Document>", "-->", "s<Section>"],
            Backend::Containment,
        )
        .unwrap();
        assert_eq!(
            plan.steps()[1],
            BindingStep::Generator {
                var: "s".to_string(),
                source: Source::Reachables {
                    from: "doc".to_string(),
                    path: PathExpr::new(vec![
                        PathSegment::Contents { role: None },
                        PathSegment::Restrict(TypeSpec::new("Section")),
                    ]),
                },
            }
        );

        let named = compile::<&str, &str>(&[], &["a", "-e->", "b"], Backend::Containment);
        assert!(matches!(named, Err(CompileError::UnsupportedNamedEdge(name)) if name == "e"));

        let argument = compile(&["e"], &["a", "-e->", "b"], Backend::Containment);
        assert!(matches!(argument, Err(CompileError::UnsupportedArgumentEdge(_))));
    }

    #[test]
    fn test_compile_is_idempotent() {
        let pattern = ["f<Family>", "-hf<HasFather>->", "m", "-->", "_", "<--", "x"];
        let first = graph_plan(&[], &pattern);
        let second = graph_plan(&[], &pattern);
        assert_eq!(first, second);
    }

    #[test]
    fn test_backend_must_be_selected() {
        let result = Compiler::new().compile::<&str, &str>(&[], &["a"]);
        assert!(matches!(result, Err(CompileError::UnresolvedBackendContext)));

        let plan = Compiler::new()
            .backend(Backend::Containment)
            .compile_str::<&str>(&[], "a <-- b")
            .unwrap();
        assert_eq!(plan.backend(), Backend::Containment);
    }
}
