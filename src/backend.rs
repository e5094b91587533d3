//! Backend strategies
//!
//! The binding compiler walks the pattern graph the same way for every
//! target model. What differs is how a step reads the model: a typed graph
//! has first-class edges that can be enumerated and bound, a containment
//! tree only has container/contents links. A [`BackendStrategy`] encodes
//! those differences.

use std::fmt;

use crate::error::CompileError;
use crate::path::ChainSegment;
use crate::plan::{PathExpr, PathSegment, Source};
use crate::token::{Direction, TypeSpec};

/// The model family a plan is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Graph,
    Containment,
}

impl Backend {
    pub(crate) fn strategy(self) -> &'static dyn BackendStrategy {
        match self {
            Backend::Graph => &GraphStrategy,
            Backend::Containment => &ContainmentStrategy,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Graph => write!(f, "graph"),
            Backend::Containment => write!(f, "containment"),
        }
    }
}

pub trait BackendStrategy {
    /// Source enumerating all instances of a type
    fn generator_call(&self, ty: Option<&TypeSpec>) -> Source {
        Source::InstancesOf(ty.cloned())
    }

    /// Source enumerating the edges that leave `from` in `direction`
    ///
    /// Fails when the backend has no first-class edges.
    fn edge_call(
        &self,
        edge: &str,
        from: &str,
        ty: Option<&TypeSpec>,
        direction: Direction,
    ) -> Result<Source, CompileError>;

    /// Check that an argument edge is expressible at all
    fn argument_edge(&self, edge: &str) -> Result<(), CompileError>;

    /// Encode one segment of a compressed chain
    fn path_segment(&self, segment: &ChainSegment) -> PathSegment;

    /// Source of the elements reachable from `from` along `chain`
    fn reachability_call(&self, from: &str, chain: &[ChainSegment]) -> Source {
        let segments = chain.iter().map(|s| self.path_segment(s)).collect();
        Source::Reachables {
            from: from.to_string(),
            path: PathExpr::new(segments),
        }
    }
}

/// Typed graphs: edges are objects in their own right
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphStrategy;

impl BackendStrategy for GraphStrategy {
    fn edge_call(
        &self,
        _edge: &str,
        from: &str,
        ty: Option<&TypeSpec>,
        direction: Direction,
    ) -> Result<Source, CompileError> {
        Ok(Source::Incidences {
            from: from.to_string(),
            ty: ty.cloned(),
            direction,
        })
    }

    fn argument_edge(&self, _edge: &str) -> Result<(), CompileError> {
        Ok(())
    }

    fn path_segment(&self, segment: &ChainSegment) -> PathSegment {
        match segment {
            ChainSegment::Edge { ty, direction } => PathSegment::Edge {
                ty: ty.clone(),
                direction: *direction,
            },
            ChainSegment::Node(ty) => PathSegment::Restrict(ty.clone()),
        }
    }
}

/// Containment trees: an edge is a container/contents link, typed by role
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainmentStrategy;

impl BackendStrategy for ContainmentStrategy {
    fn edge_call(
        &self,
        edge: &str,
        _from: &str,
        _ty: Option<&TypeSpec>,
        _direction: Direction,
    ) -> Result<Source, CompileError> {
        Err(CompileError::UnsupportedNamedEdge(edge.to_string()))
    }

    fn argument_edge(&self, edge: &str) -> Result<(), CompileError> {
        Err(CompileError::UnsupportedArgumentEdge(edge.to_string()))
    }

    fn path_segment(&self, segment: &ChainSegment) -> PathSegment {
        match segment {
            ChainSegment::Edge {
                ty,
                direction: Direction::Out,
            } => PathSegment::Contents { role: ty.clone() },
            ChainSegment::Edge {
                ty,
                direction: Direction::In,
            } => PathSegment::Container { role: ty.clone() },
            ChainSegment::Node(ty) => PathSegment::Restrict(ty.clone()),
        }
    }
}
