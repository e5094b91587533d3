//! In-memory containment tree
//!
//! Every object has at most one container and is held under a named role.
//! There are no first-class edges: patterns over a containment tree can
//! only move between containers and contents.

use rustc_hash::FxHashMap;

use crate::backend::Backend;
use crate::model::{Model, TypeHierarchy, Value, evaluate_path};
use crate::plan::{PathExpr, PathSegment};
use crate::token::TypeSpec;

/// Unique identifier for an object
pub type ObjectId = usize;

#[derive(Debug, Clone)]
pub struct Object {
    pub id: ObjectId,
    pub ty: TypeSpec,
    pub container: Option<ObjectId>,
    /// Role under which the container holds this object
    pub role: Option<String>,
    pub contents: Vec<ObjectId>,
    attributes: FxHashMap<String, Value<ObjectId>>,
}

#[derive(Debug, Clone, Default)]
pub struct ContainmentTree {
    objects: Vec<Object>,
    types: TypeHierarchy,
}

impl ContainmentTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object with no container
    pub fn add_root(&mut self, ty: &str) -> ObjectId {
        self.push(ty, None, None)
    }

    /// Add an object held by `container` under `role`
    ///
    /// Returns `None` when `container` does not exist.
    pub fn add_child(&mut self, container: ObjectId, role: &str, ty: &str) -> Option<ObjectId> {
        if container >= self.objects.len() {
            return None;
        }
        let id = self.push(ty, Some(container), Some(role.to_string()));
        self.objects[container].contents.push(id);
        Some(id)
    }

    fn push(&mut self, ty: &str, container: Option<ObjectId>, role: Option<String>) -> ObjectId {
        let id = self.objects.len();
        self.objects.push(Object {
            id,
            ty: TypeSpec::new(ty),
            container,
            role,
            contents: Vec::new(),
            attributes: FxHashMap::default(),
        });
        id
    }

    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn set_attribute(&mut self, id: ObjectId, name: &str, value: impl Into<Value<ObjectId>>) {
        if let Some(object) = self.objects.get_mut(id) {
            object.attributes.insert(name.to_string(), value.into());
        }
    }

    pub fn add_supertype(&mut self, subtype: &str, supertype: &str) {
        self.types.declare(subtype, supertype);
    }

    fn has_role(&self, id: ObjectId, role: Option<&TypeSpec>) -> bool {
        match role {
            None => true,
            Some(role) => self
                .get(id)
                .and_then(|o| o.role.as_deref())
                .is_some_and(|r| r == role.name()),
        }
    }
}

impl Model for ContainmentTree {
    type Element = ObjectId;

    fn backend(&self) -> Backend {
        Backend::Containment
    }

    fn instances_of_type<'a>(
        &'a self,
        ty: Option<&TypeSpec>,
    ) -> Box<dyn Iterator<Item = ObjectId> + 'a> {
        let ty = ty.cloned();
        Box::new(
            self.objects
                .iter()
                .filter(move |o| {
                    ty.as_ref()
                        .is_none_or(|ty| self.types.conforms(o.ty.name(), ty.name()))
                })
                .map(|o| o.id),
        )
    }

    fn is_instance(&self, element: &ObjectId, ty: &TypeSpec) -> bool {
        self.get(*element)
            .is_some_and(|o| self.types.conforms(o.ty.name(), ty.name()))
    }

    fn reachables(&self, start: &ObjectId, path: &PathExpr) -> Vec<ObjectId> {
        evaluate_path(start, path, |&id, segment, out| {
            let Some(object) = self.get(id) else {
                return;
            };
            match segment {
                PathSegment::Contents { role } => out.extend(
                    object
                        .contents
                        .iter()
                        .copied()
                        .filter(|&c| self.has_role(c, role.as_ref())),
                ),
                PathSegment::Container { role } => {
                    if let Some(container) = object.container
                        && self.has_role(id, role.as_ref())
                    {
                        out.push(container);
                    }
                }
                PathSegment::Restrict(ty) => {
                    if self.is_instance(&id, ty) {
                        out.push(id);
                    }
                }
                // edges have no meaning here
                PathSegment::Edge { .. } => {}
            }
        })
    }

    fn attribute(&self, element: &ObjectId, name: &str) -> Value<ObjectId> {
        self.get(*element)
            .and_then(|o| o.attributes.get(name))
            .cloned()
            .unwrap_or(Value::Nil)
    }
}
