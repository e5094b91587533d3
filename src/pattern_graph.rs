//! Intermediate pattern graph
//!
//! The classified token stream is turned into a small directed multigraph
//! before any plan is generated. Nodes and edges live in two arenas and are
//! addressed by index. Node 0 is the anchor: every connected component of
//! the pattern hangs off it through a `HasStart` edge, and constraints
//! written before any node hang off it through `Precedes` edges.

use rustc_hash::FxHashMap;

use crate::error::CompileError;
use crate::token::{ConstraintForm, Direction, EdgeToken, NodeToken, PatternToken, TypeSpec};

pub type NodeId = usize;
pub type EdgeId = usize;

/// Handle of the implicit anchor node
pub const ANCHOR: NodeId = 0;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Anchor,
    Pattern,
    /// Bound from the external argument list
    Argument,
    Constraint(ConstraintForm),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternNode {
    pub kind: NodeKind,
    pub name: Option<String>,
    pub ty: Option<TypeSpec>,
    /// Incident edges in creation order, both directions
    pub incident: Vec<EdgeId>,
}

impl PatternNode {
    pub fn is_anonymous(&self) -> bool {
        self.name.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Declaration order of constraint forms
    Precedes,
    /// Anchor to the start of a connected component
    HasStart,
    Pattern,
    /// The edge itself is supplied as an argument
    Argument,
}

impl EdgeKind {
    /// Edges that take part in the matched shape
    pub fn is_structural(self) -> bool {
        matches!(self, EdgeKind::HasStart | EdgeKind::Pattern | EdgeKind::Argument)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternEdge {
    pub kind: EdgeKind,
    pub name: Option<String>,
    pub ty: Option<TypeSpec>,
    pub src: NodeId,
    pub dst: NodeId,
}

impl PatternEdge {
    /// Direction of this edge when traversed from `from`
    pub fn orient(&self, from: NodeId) -> Direction {
        if from == self.src {
            Direction::Out
        } else {
            Direction::In
        }
    }

    /// The end opposite `from`
    pub fn other(&self, from: NodeId) -> NodeId {
        if from == self.src { self.dst } else { self.src }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Named {
    Node(NodeId),
    Edge(EdgeId),
    Local,
}

#[derive(Debug, Clone)]
pub struct PatternGraph {
    nodes: Vec<PatternNode>,
    edges: Vec<PatternEdge>,
    by_name: FxHashMap<String, Named>,
    result_names: Vec<String>,
}

impl Default for PatternGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternGraph {
    /// An empty graph holding only the anchor
    pub fn new() -> Self {
        Self {
            nodes: vec![PatternNode {
                kind: NodeKind::Anchor,
                name: None,
                ty: None,
                incident: Vec::new(),
            }],
            edges: Vec::new(),
            by_name: FxHashMap::default(),
            result_names: Vec::new(),
        }
    }

    /// Build the graph for a classified token stream
    ///
    /// Names listed in `arguments` become argument nodes or argument edges.
    /// Components are not linked to the anchor yet; see
    /// [`PatternGraph::resolve_components`].
    pub fn build<S: AsRef<str>>(
        arguments: &[S],
        tokens: &[PatternToken],
    ) -> Result<Self, CompileError> {
        let mut builder = Builder::new(arguments)?;
        for token in tokens {
            builder.push(token)?;
        }
        builder.finish()
    }

    pub fn node(&self, id: NodeId) -> &PatternNode {
        &self.nodes[id]
    }

    pub fn edge(&self, id: EdgeId) -> &PatternEdge {
        &self.edges[id]
    }

    pub fn nodes(&self) -> &[PatternNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[PatternEdge] {
        &self.edges
    }

    /// Declared names in declaration order, arguments excluded
    pub fn result_names(&self) -> &[String] {
        &self.result_names
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        match self.by_name.get(name) {
            Some(Named::Node(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn edge_by_name(&self, name: &str) -> Option<EdgeId> {
        match self.by_name.get(name) {
            Some(Named::Edge(id)) => Some(*id),
            _ => None,
        }
    }

    pub(crate) fn add_node(
        &mut self,
        kind: NodeKind,
        name: Option<String>,
        ty: Option<TypeSpec>,
    ) -> NodeId {
        let id = self.nodes.len();
        if let Some(name) = &name
            && matches!(kind, NodeKind::Pattern | NodeKind::Argument)
        {
            self.by_name.insert(name.clone(), Named::Node(id));
        }
        self.nodes.push(PatternNode {
            kind,
            name,
            ty,
            incident: Vec::new(),
        });
        id
    }

    pub(crate) fn add_edge(
        &mut self,
        kind: EdgeKind,
        name: Option<String>,
        ty: Option<TypeSpec>,
        src: NodeId,
        dst: NodeId,
    ) -> EdgeId {
        let id = self.edges.len();
        if let Some(name) = &name {
            self.by_name.insert(name.clone(), Named::Edge(id));
        }
        self.edges.push(PatternEdge {
            kind,
            name,
            ty,
            src,
            dst,
        });
        self.nodes[src].incident.push(id);
        if dst != src {
            self.nodes[dst].incident.push(id);
        }
        id
    }

    /// Link every component the anchor cannot reach to the anchor
    ///
    /// Candidates are taken in handle order, so each component starts at
    /// its first declared node.
    pub fn resolve_components(&mut self) {
        let mut reached = vec![false; self.nodes.len()];
        self.mark_reachable(ANCHOR, &mut reached);

        for id in 1..self.nodes.len() {
            if reached[id] || !matches!(self.nodes[id].kind, NodeKind::Pattern | NodeKind::Argument)
            {
                continue;
            }
            self.add_edge(EdgeKind::HasStart, None, None, ANCHOR, id);
            self.mark_reachable(id, &mut reached);
        }
    }

    /// Undirected reachability over structural edges
    fn mark_reachable(&self, start: NodeId, reached: &mut [bool]) {
        let mut stack = vec![start];
        reached[start] = true;
        while let Some(node) = stack.pop() {
            for &e in &self.nodes[node].incident {
                let edge = &self.edges[e];
                if !edge.kind.is_structural() {
                    continue;
                }
                let next = edge.other(node);
                if !reached[next] {
                    reached[next] = true;
                    stack.push(next);
                }
            }
        }
    }
}

/// Left-to-right consumer of the token stream
struct Builder<'a, S> {
    graph: PatternGraph,
    arguments: &'a [S],
    /// Last node token seen
    cursor: Option<NodeId>,
    /// Edge token waiting for its target node
    pending: Option<&'a EdgeToken>,
    /// Constraint node that immediately precedes the current token
    constraint_tail: Option<NodeId>,
}

impl<'a, S: AsRef<str>> Builder<'a, S> {
    fn new(arguments: &'a [S]) -> Result<Self, CompileError> {
        for (i, arg) in arguments.iter().enumerate() {
            let arg = arg.as_ref();
            if arguments[..i].iter().any(|a| a.as_ref() == arg) {
                return Err(CompileError::DuplicateOrConflictingName(arg.to_string()));
            }
        }
        Ok(Self {
            graph: PatternGraph::new(),
            arguments,
            cursor: None,
            pending: None,
            constraint_tail: None,
        })
    }

    fn is_argument(&self, name: &str) -> bool {
        self.arguments.iter().any(|a| a.as_ref() == name)
    }

    fn push(&mut self, token: &'a PatternToken) -> Result<(), CompileError> {
        match token {
            PatternToken::Node(node) => {
                let edge = match self.pending.take() {
                    Some(edge) => Some((edge, self.claim_edge(edge, node)?)),
                    None => None,
                };
                let id = self.resolve_node(node)?;
                if let Some((edge, kind)) = edge {
                    // an edge is only ever pending after a node
                    let from = self.cursor.unwrap_or(ANCHOR);
                    self.connect(from, id, edge, kind);
                }
                self.cursor = Some(id);
                self.constraint_tail = None;
            }
            PatternToken::Edge(edge) => {
                if let Some(previous) = self.pending {
                    return Err(CompileError::malformed(
                        previous.to_string(),
                        "edge token followed by another edge token",
                    ));
                }
                if self.cursor.is_none() {
                    return Err(CompileError::malformed(
                        edge.to_string(),
                        "edge token without a preceding node",
                    ));
                }
                self.pending = Some(edge);
                self.constraint_tail = None;
            }
            PatternToken::Constraint(form) => {
                if let Some(edge) = self.pending {
                    return Err(CompileError::malformed(
                        edge.to_string(),
                        format!("edge token followed by {}", form.keyword()),
                    ));
                }
                self.add_constraint(form)?;
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<PatternGraph, CompileError> {
        if let Some(edge) = self.pending {
            return Err(CompileError::malformed(
                edge.to_string(),
                "edge token at end of pattern",
            ));
        }
        Ok(self.graph)
    }

    fn resolve_node(&mut self, token: &NodeToken) -> Result<NodeId, CompileError> {
        let Some(name) = &token.name else {
            return Ok(self
                .graph
                .add_node(NodeKind::Pattern, None, token.ty.clone()));
        };

        match self.graph.by_name.get(name.as_str()).copied() {
            Some(Named::Node(id)) => {
                let node = &self.graph.nodes[id];
                let conflict = match (&node.ty, &token.ty) {
                    _ if node.kind == NodeKind::Argument => token.ty.is_some(),
                    (Some(declared), Some(ty)) => declared != ty,
                    _ => false,
                };
                if conflict {
                    return Err(CompileError::DuplicateOrConflictingName(name.clone()));
                }
                if node.ty.is_none() && token.ty.is_some() {
                    self.graph.nodes[id].ty = token.ty.clone();
                }
                Ok(id)
            }
            Some(Named::Edge(_) | Named::Local) => {
                Err(CompileError::DuplicateOrConflictingName(name.clone()))
            }
            None if self.is_argument(name) => {
                if token.ty.is_some() {
                    return Err(CompileError::DuplicateOrConflictingName(name.clone()));
                }
                Ok(self
                    .graph
                    .add_node(NodeKind::Argument, Some(name.clone()), None))
            }
            None => {
                self.graph.result_names.push(name.clone());
                Ok(self
                    .graph
                    .add_node(NodeKind::Pattern, Some(name.clone()), token.ty.clone()))
            }
        }
    }

    /// Check an edge name against everything declared so far
    ///
    /// Runs before the target node is resolved, so the edge name is recorded
    /// ahead of the target's.
    fn claim_edge(
        &mut self,
        token: &EdgeToken,
        target: &NodeToken,
    ) -> Result<EdgeKind, CompileError> {
        let Some(name) = &token.name else {
            return Ok(EdgeKind::Pattern);
        };
        if self.graph.by_name.contains_key(name.as_str()) || target.name.as_ref() == Some(name) {
            return Err(CompileError::DuplicateOrConflictingName(name.clone()));
        }
        if self.is_argument(name) {
            return Ok(EdgeKind::Argument);
        }
        self.graph.result_names.push(name.clone());
        Ok(EdgeKind::Pattern)
    }

    /// Create the edge between the cursor and the node that follows it
    fn connect(&mut self, cursor: NodeId, target: NodeId, token: &EdgeToken, kind: EdgeKind) {
        let (src, dst) = match token.direction {
            Direction::Out => (cursor, target),
            Direction::In => (target, cursor),
        };
        self.graph
            .add_edge(kind, token.name.clone(), token.ty.clone(), src, dst);
    }

    fn add_constraint(&mut self, form: &ConstraintForm) -> Result<(), CompileError> {
        if let ConstraintForm::Let(bindings) | ConstraintForm::WhenLet(bindings) = form {
            for (name, _) in bindings {
                if self.graph.by_name.contains_key(name.as_str()) || self.is_argument(name) {
                    return Err(CompileError::DuplicateOrConflictingName(name.clone()));
                }
                self.graph.by_name.insert(name.clone(), Named::Local);
                self.graph.result_names.push(name.clone());
            }
        }

        let from = self
            .constraint_tail
            .or(self.cursor)
            .unwrap_or(ANCHOR);
        let id = self
            .graph
            .add_node(NodeKind::Constraint(form.clone()), None, None);
        self.graph
            .add_edge(EdgeKind::Precedes, None, None, from, id);
        self.constraint_tail = Some(id);
        Ok(())
    }
}
