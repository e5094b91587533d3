//! Anonymous chain compression
//!
//! A run of anonymous nodes and edges never needs its intermediate elements
//! bound. The compressor walks such a run from a bound start and returns it
//! as a list of segments, which a backend strategy encodes as a single
//! reachability expression.

use crate::error::CompileError;
use crate::pattern_graph::{EdgeId, EdgeKind, NodeId, NodeKind, PatternGraph};
use crate::token::{Direction, TypeSpec};

/// Backend-neutral piece of a compressed chain
#[derive(Debug, Clone, PartialEq)]
pub enum ChainSegment {
    Edge {
        ty: Option<TypeSpec>,
        direction: Direction,
    },
    /// Type of an intermediate anonymous node
    Node(TypeSpec),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    pub segments: Vec<ChainSegment>,
    /// First node where the chain stops
    pub terminal: NodeId,
    /// Intermediate anonymous nodes folded into the chain
    pub consumed: Vec<NodeId>,
    /// Every edge folded into the chain, the first one included
    pub edges: Vec<EdgeId>,
    /// The terminal has no unvisited structural edge left
    pub dead_end: bool,
}

/// Compress the anonymous chain that starts with `first` at `start`
pub fn compress(
    graph: &PatternGraph,
    start: NodeId,
    first: EdgeId,
    nodes_done: &[bool],
    edges_done: &[bool],
) -> Result<Chain, CompileError> {
    let mut segments = Vec::new();
    let mut consumed = Vec::new();
    let mut edges = vec![first];
    let mut at = start;
    let mut edge = first;

    loop {
        let current = graph.edge(edge);
        segments.push(ChainSegment::Edge {
            ty: current.ty.clone(),
            direction: current.orient(at),
        });

        let next = current.other(at);
        let node = graph.node(next);
        let continuations: Vec<EdgeId> = node
            .incident
            .iter()
            .copied()
            .filter(|&e| {
                !edges_done[e] && !edges.contains(&e) && graph.edge(e).kind.is_structural()
            })
            .collect();

        let passable = !nodes_done[next]
            && next != start
            && !consumed.contains(&next)
            && node.kind == NodeKind::Pattern
            && node.is_anonymous();
        if !passable {
            return Ok(Chain {
                segments,
                terminal: next,
                consumed,
                edges,
                dead_end: continuations.is_empty(),
            });
        }

        match continuations.as_slice() {
            [] => {
                return Ok(Chain {
                    segments,
                    terminal: next,
                    consumed,
                    edges,
                    dead_end: true,
                });
            }
            [only] => {
                let following = graph.edge(*only);
                if following.kind != EdgeKind::Pattern || following.name.is_some() {
                    return Ok(Chain {
                        segments,
                        terminal: next,
                        consumed,
                        edges,
                        dead_end: false,
                    });
                }
                if let Some(ty) = &node.ty {
                    segments.push(ChainSegment::Node(ty.clone()));
                }
                log::trace!("chain passes through anonymous node {next}");
                consumed.push(next);
                edges.push(*only);
                at = next;
                edge = *only;
            }
            many => {
                return Err(CompileError::AmbiguousAnonymousChain {
                    continuations: many.len(),
                });
            }
        }
    }
}
