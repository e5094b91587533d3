//! In-memory typed graph
//!
//! Vertices and edges both carry a type and attributes, and edges can be
//! enumerated and bound like vertices. Used to run graph plans in tests and
//! benches.

use rustc_hash::FxHashMap;

use crate::backend::Backend;
use crate::model::{EdgeAccess, Model, TypeHierarchy, Value, evaluate_path};
use crate::plan::{PathExpr, PathSegment};
use crate::token::{Direction, TypeSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GraphElement {
    Vertex(usize),
    Edge(usize),
}

type Attributes = FxHashMap<String, Value<GraphElement>>;

#[derive(Debug, Clone)]
struct Vertex {
    ty: TypeSpec,
    attributes: Attributes,
    outgoing: Vec<usize>,
    incoming: Vec<usize>,
}

#[derive(Debug, Clone)]
struct Edge {
    ty: TypeSpec,
    src: usize,
    dst: usize,
    attributes: Attributes,
}

#[derive(Debug, Clone, Default)]
pub struct TypedGraph {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    types: TypeHierarchy,
}

impl TypedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, ty: &str) -> GraphElement {
        self.vertices.push(Vertex {
            ty: TypeSpec::new(ty),
            attributes: Attributes::default(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
        });
        GraphElement::Vertex(self.vertices.len() - 1)
    }

    /// Add an edge between two vertices
    ///
    /// Returns `None` when either end is not a vertex of this graph.
    pub fn add_edge(
        &mut self,
        ty: &str,
        src: GraphElement,
        dst: GraphElement,
    ) -> Option<GraphElement> {
        let (GraphElement::Vertex(s), GraphElement::Vertex(d)) = (src, dst) else {
            return None;
        };
        if s >= self.vertices.len() || d >= self.vertices.len() {
            return None;
        }
        let id = self.edges.len();
        self.edges.push(Edge {
            ty: TypeSpec::new(ty),
            src: s,
            dst: d,
            attributes: Attributes::default(),
        });
        self.vertices[s].outgoing.push(id);
        self.vertices[d].incoming.push(id);
        Some(GraphElement::Edge(id))
    }

    pub fn set_attribute(
        &mut self,
        element: GraphElement,
        name: &str,
        value: impl Into<Value<GraphElement>>,
    ) {
        let attributes = match element {
            GraphElement::Vertex(v) => self.vertices.get_mut(v).map(|v| &mut v.attributes),
            GraphElement::Edge(e) => self.edges.get_mut(e).map(|e| &mut e.attributes),
        };
        if let Some(attributes) = attributes {
            attributes.insert(name.to_string(), value.into());
        }
    }

    /// Declare `subtype` as a subtype of `supertype`
    pub fn add_supertype(&mut self, subtype: &str, supertype: &str) {
        self.types.declare(subtype, supertype);
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn type_of(&self, element: GraphElement) -> Option<&TypeSpec> {
        match element {
            GraphElement::Vertex(v) => self.vertices.get(v).map(|v| &v.ty),
            GraphElement::Edge(e) => self.edges.get(e).map(|e| &e.ty),
        }
    }

    fn conforms(&self, ty: &TypeSpec, target: Option<&TypeSpec>) -> bool {
        target.is_none_or(|target| self.types.conforms(ty.name(), target.name()))
    }

    fn edge_ids(&self, vertex: usize, direction: Direction) -> &[usize] {
        match (self.vertices.get(vertex), direction) {
            (Some(v), Direction::Out) => &v.outgoing,
            (Some(v), Direction::In) => &v.incoming,
            (None, _) => &[],
        }
    }
}

impl Model for TypedGraph {
    type Element = GraphElement;

    fn backend(&self) -> Backend {
        Backend::Graph
    }

    fn instances_of_type<'a>(
        &'a self,
        ty: Option<&TypeSpec>,
    ) -> Box<dyn Iterator<Item = GraphElement> + 'a> {
        let ty = ty.cloned();
        Box::new(
            self.vertices
                .iter()
                .enumerate()
                .filter(move |(_, v)| self.conforms(&v.ty, ty.as_ref()))
                .map(|(i, _)| GraphElement::Vertex(i)),
        )
    }

    fn is_instance(&self, element: &GraphElement, ty: &TypeSpec) -> bool {
        self.type_of(*element)
            .is_some_and(|own| self.types.conforms(own.name(), ty.name()))
    }

    fn reachables(&self, start: &GraphElement, path: &PathExpr) -> Vec<GraphElement> {
        evaluate_path(start, path, |element, segment, out| {
            match (element, segment) {
                (GraphElement::Vertex(v), PathSegment::Edge { ty, direction }) => {
                    for &e in self.edge_ids(*v, *direction) {
                        let edge = &self.edges[e];
                        if self.conforms(&edge.ty, ty.as_ref()) {
                            let next = match direction {
                                Direction::Out => edge.dst,
                                Direction::In => edge.src,
                            };
                            out.push(GraphElement::Vertex(next));
                        }
                    }
                }
                (_, PathSegment::Restrict(ty)) => {
                    if self.is_instance(element, ty) {
                        out.push(*element);
                    }
                }
                // containment steps have no meaning here
                _ => {}
            }
        })
    }

    fn attribute(&self, element: &GraphElement, name: &str) -> Value<GraphElement> {
        let attributes = match *element {
            GraphElement::Vertex(v) => self.vertices.get(v).map(|v| &v.attributes),
            GraphElement::Edge(e) => self.edges.get(e).map(|e| &e.attributes),
        };
        attributes
            .and_then(|a| a.get(name))
            .cloned()
            .unwrap_or(Value::Nil)
    }

    fn edges(&self) -> Option<&dyn EdgeAccess<GraphElement>> {
        Some(self)
    }
}

impl EdgeAccess<GraphElement> for TypedGraph {
    fn incidences(
        &self,
        node: &GraphElement,
        ty: Option<&TypeSpec>,
        direction: Direction,
    ) -> Vec<GraphElement> {
        let GraphElement::Vertex(v) = *node else {
            return Vec::new();
        };
        self.edge_ids(v, direction)
            .iter()
            .filter(|&&e| self.conforms(&self.edges[e].ty, ty))
            .map(|&e| GraphElement::Edge(e))
            .collect()
    }

    fn adjacent_by_edge(&self, edge: &GraphElement, direction: Direction) -> Option<GraphElement> {
        let (src, dst) = self.endpoints(edge)?;
        match direction {
            Direction::Out => Some(dst),
            Direction::In => Some(src),
        }
    }

    fn endpoints(&self, edge: &GraphElement) -> Option<(GraphElement, GraphElement)> {
        let GraphElement::Edge(e) = *edge else {
            return None;
        };
        let edge = self.edges.get(e)?;
        Some((GraphElement::Vertex(edge.src), GraphElement::Vertex(edge.dst)))
    }
}
