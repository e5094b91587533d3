//! Backend contract
//!
//! Plans never touch storage directly. Everything the executor needs from a
//! model goes through [`Model`], and graph models additionally expose
//! first-class edges through [`EdgeAccess`].

use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt::Debug;
use std::hash::Hash;

use crate::backend::Backend;
use crate::expr::Literal;
use crate::plan::{PathExpr, PathSegment};
use crate::token::{Direction, TypeSpec};

/// A runtime value: a scalar attribute or a model element
#[derive(Debug, Clone, PartialEq)]
pub enum Value<E> {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    Element(E),
}

impl<E> Value<E> {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// `nil` and `false` are false, everything else is true
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn as_element(&self) -> Option<&E> {
        match self {
            Value::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn from_literal(literal: &Literal) -> Self {
        match literal {
            Literal::Nil => Value::Nil,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::Str(s) => Value::Str(s.clone()),
        }
    }
}

impl<E> From<bool> for Value<E> {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<E> From<i64> for Value<E> {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl<E> From<&str> for Value<E> {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl<E> From<String> for Value<E> {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

/// Read-only access to a model instance
pub trait Model {
    type Element: Clone + Eq + Hash + Debug;

    fn backend(&self) -> Backend;

    /// All instances of `ty` (subtypes included); `None` means every node
    fn instances_of_type<'a>(
        &'a self,
        ty: Option<&TypeSpec>,
    ) -> Box<dyn Iterator<Item = Self::Element> + 'a>;

    fn is_instance(&self, element: &Self::Element, ty: &TypeSpec) -> bool;

    /// Elements reachable from `start` along `path`, ordered and duplicate-free
    fn reachables(&self, start: &Self::Element, path: &PathExpr) -> Vec<Self::Element>;

    /// Attribute value, `Nil` when absent
    fn attribute(&self, element: &Self::Element, name: &str) -> Value<Self::Element>;

    /// First-class edges, for graph models
    fn edges(&self) -> Option<&dyn EdgeAccess<Self::Element>> {
        None
    }
}

pub trait EdgeAccess<E> {
    /// Edges leaving (`Out`) or entering (`In`) `node`
    fn incidences(&self, node: &E, ty: Option<&TypeSpec>, direction: Direction) -> Vec<E>;

    /// The far end of `edge` when traversed in `direction`
    fn adjacent_by_edge(&self, edge: &E, direction: Direction) -> Option<E>;

    /// `(source, target)` of an edge
    fn endpoints(&self, edge: &E) -> Option<(E, E)>;
}

/// Declared subtype relation shared by the reference models
#[derive(Debug, Clone, Default)]
pub struct TypeHierarchy {
    supertypes: FxHashMap<String, Vec<String>>,
}

impl TypeHierarchy {
    pub fn declare(&mut self, subtype: &str, supertype: &str) {
        self.supertypes
            .entry(subtype.to_string())
            .or_default()
            .push(supertype.to_string());
    }

    /// Whether `ty` is `target` or one of its transitive subtypes
    pub fn conforms(&self, ty: &str, target: &str) -> bool {
        let mut seen = FxHashSet::default();
        let mut stack = vec![ty];
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(supers) = self.supertypes.get(current) {
                stack.extend(supers.iter().map(String::as_str));
            }
        }
        false
    }
}

/// Evaluate `path` one segment at a time
///
/// `step` appends the successors of one element under one segment. Each
/// frontier is deduplicated, keeping first occurrences.
pub(crate) fn evaluate_path<E: Clone + Eq + Hash>(
    start: &E,
    path: &PathExpr,
    mut step: impl FnMut(&E, &PathSegment, &mut Vec<E>),
) -> Vec<E> {
    let mut frontier = vec![start.clone()];
    for segment in &path.segments {
        let mut next = Vec::new();
        for element in &frontier {
            step(element, segment, &mut next);
        }
        let mut seen = FxHashSet::default();
        next.retain(|e| seen.insert(e.clone()));
        frontier = next;
        if frontier.is_empty() {
            break;
        }
    }
    frontier
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::<u32>::Nil.is_truthy());
        assert!(!Value::<u32>::Bool(false).is_truthy());
        assert!(Value::<u32>::Int(0).is_truthy());
        assert!(Value::<u32>::Str(String::new()).is_truthy());
        assert!(Value::Element(7u32).is_truthy());
    }

    #[test]
    fn test_type_hierarchy() {
        let mut types = TypeHierarchy::default();
        types.declare("Father", "Member");
        types.declare("Member", "Person");
        assert!(types.conforms("Father", "Person"));
        assert!(types.conforms("Member", "Member"));
        assert!(!types.conforms("Person", "Member"));
    }

    #[test]
    fn test_evaluate_path_dedups_frontier() {
        // element n steps to n+1 and n+2
        let path = PathExpr::new(vec![
            PathSegment::Restrict(TypeSpec::new("any")),
            PathSegment::Restrict(TypeSpec::new("any")),
        ]);
        let reached = evaluate_path(&0u32, &path, |e, _, out| {
            out.push(e + 1);
            out.push(e + 2);
        });
        assert_eq!(reached, vec![2, 3, 4]);
    }
}
