//! Binding plans
//!
//! A [`BindingPlan`] is the compiled form of a pattern: an ordered list of
//! generator, let and guard steps. Executing the steps in order, with
//! backtracking over generators, enumerates every match.

use std::fmt;

use crate::backend::Backend;
use crate::expr::Expr;
use crate::token::{Direction, TypeSpec};

/// One step of a compiled reachability expression
#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    /// Graph backend: follow edges of an optional type
    Edge {
        ty: Option<TypeSpec>,
        direction: Direction,
    },
    /// Containment backend: contained objects, optionally by role
    Contents { role: Option<TypeSpec> },
    /// Containment backend: the container, optionally by role
    Container { role: Option<TypeSpec> },
    /// Keep only elements of the given type
    Restrict(TypeSpec),
}

/// A composite path evaluated by one `reachables` call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PathExpr {
    pub segments: Vec<PathSegment>,
}

impl PathExpr {
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Where a generator draws its candidates from
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// All instances of a type; `None` means every element
    InstancesOf(Option<TypeSpec>),
    /// Edges incident to `from` (graph backend only)
    Incidences {
        from: String,
        ty: Option<TypeSpec>,
        direction: Direction,
    },
    Reachables { from: String, path: PathExpr },
}

impl Source {
    /// The variable this source reads, if any
    pub fn input(&self) -> Option<&str> {
        match self {
            Source::InstancesOf(_) => None,
            Source::Incidences { from, .. } | Source::Reachables { from, .. } => Some(from),
        }
    }
}

/// What a failing guard does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardMode {
    /// Drop the current partial match and try the next candidate
    Filter,
    /// Stop the innermost generator altogether
    Halt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BindingStep {
    Generator { var: String, source: Source },
    Let { var: String, expr: Expr },
    Guard { predicate: Expr, mode: GuardMode },
}

impl BindingStep {
    /// The variable introduced by this step
    pub fn var(&self) -> Option<&str> {
        match self {
            BindingStep::Generator { var, .. } | BindingStep::Let { var, .. } => Some(var),
            BindingStep::Guard { .. } => None,
        }
    }

    pub fn is_generator(&self) -> bool {
        matches!(self, BindingStep::Generator { .. })
    }

    pub fn is_guard(&self) -> bool {
        matches!(self, BindingStep::Guard { .. })
    }

    pub(crate) fn filter(predicate: Expr) -> Self {
        BindingStep::Guard {
            predicate,
            mode: GuardMode::Filter,
        }
    }
}

/// Compiler output before post-processing
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PlanItem {
    Step(BindingStep),
    /// Bindings declared together that must each be non-nil
    FailFast(Vec<(String, Expr)>),
}

/// Rewrite every fail-fast batch into `Let` + `Guard(IsPresent)` pairs
///
/// The first nil binding aborts the match attempt instead of leaking into
/// later steps.
pub(crate) fn expand_fail_fast(items: Vec<PlanItem>) -> Vec<BindingStep> {
    let mut steps = Vec::with_capacity(items.len());
    for item in items {
        match item {
            PlanItem::Step(step) => steps.push(step),
            PlanItem::FailFast(bindings) => {
                for (var, expr) in bindings {
                    let check = Expr::IsPresent(var.clone());
                    steps.push(BindingStep::Let { var, expr });
                    steps.push(BindingStep::filter(check));
                }
            }
        }
    }
    steps
}

/// A compiled pattern
///
/// Step variables are the declared names, except where an anonymous node
/// must be bound because a named or argument edge continues from it. Such a
/// node gets a synthetic `#<handle>` variable, so `a --> _ -e-> b` binds
/// `a`, `#2`, `e` and `b`. Synthetic names never appear in
/// [`BindingPlan::result_names`].
#[derive(Debug, Clone, PartialEq)]
pub struct BindingPlan {
    backend: Backend,
    arguments: Vec<String>,
    steps: Vec<BindingStep>,
    result_names: Vec<String>,
}

impl BindingPlan {
    pub(crate) fn new(
        backend: Backend,
        arguments: Vec<String>,
        steps: Vec<BindingStep>,
        result_names: Vec<String>,
    ) -> Self {
        Self {
            backend,
            arguments,
            steps,
            result_names,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn steps(&self) -> &[BindingStep] {
        &self.steps
    }

    /// Declared names reported in each match, in declaration order
    pub fn result_names(&self) -> &[String] {
        &self.result_names
    }

    /// Names introduced by generator and let steps, in plan order
    pub fn bound_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(BindingStep::var)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ty = |t: &Option<TypeSpec>| t.as_ref().map(ToString::to_string).unwrap_or_default();
        match self {
            PathSegment::Edge {
                ty: t,
                direction: Direction::Out,
            } => write!(f, "-{}->", ty(t)),
            PathSegment::Edge {
                ty: t,
                direction: Direction::In,
            } => write!(f, "<-{}-", ty(t)),
            PathSegment::Contents { role } => write!(f, "contents[{}]", ty(role)),
            PathSegment::Container { role } => write!(f, "container[{}]", ty(role)),
            PathSegment::Restrict(t) => write!(f, "<{t}>"),
        }
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::InstancesOf(Some(ty)) => write!(f, "instances({ty})"),
            Source::InstancesOf(None) => write!(f, "instances(*)"),
            Source::Incidences {
                from,
                ty,
                direction,
            } => match ty {
                Some(ty) => write!(f, "incidences({from}, {ty}, {direction})"),
                None => write!(f, "incidences({from}, {direction})"),
            },
            Source::Reachables { from, path } => write!(f, "reachables({from}, {path})"),
        }
    }
}

impl fmt::Display for BindingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingStep::Generator { var, source } => write!(f, "{var} <- {source}"),
            BindingStep::Let { var, expr } => write!(f, "let {var} = {expr}"),
            BindingStep::Guard {
                predicate,
                mode: GuardMode::Filter,
            } => write!(f, "when {predicate}"),
            BindingStep::Guard {
                predicate,
                mode: GuardMode::Halt,
            } => write!(f, "while {predicate}"),
        }
    }
}

impl fmt::Display for BindingPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "plan[{}]({})", self.backend, self.arguments.join(", "))?;
        for step in &self.steps {
            writeln!(f, "  {step}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_fail_fast_batches() {
        let items = vec![
            PlanItem::Step(BindingStep::Generator {
                var: "a".to_string(),
                source: Source::InstancesOf(None),
            }),
            PlanItem::FailFast(vec![
                ("x".to_string(), Expr::Attr(Box::new(Expr::var("a")), "x".into())),
                ("y".to_string(), Expr::Attr(Box::new(Expr::var("x")), "y".into())),
            ]),
        ];

        let steps = expand_fail_fast(items);
        assert_eq!(steps.len(), 5);
        assert!(steps[0].is_generator());
        assert_eq!(steps[1].var(), Some("x"));
        assert_eq!(steps[2], BindingStep::filter(Expr::IsPresent("x".to_string())));
        assert_eq!(steps[3].var(), Some("y"));
        assert_eq!(steps[4], BindingStep::filter(Expr::IsPresent("y".to_string())));
    }

    #[test]
    fn test_plain_steps_untouched() {
        let step = BindingStep::Let {
            var: "n".to_string(),
            expr: Expr::var("m"),
        };
        let steps = expand_fail_fast(vec![PlanItem::Step(step.clone())]);
        assert_eq!(steps, vec![step]);
    }

    #[test]
    fn test_step_display() {
        let step = BindingStep::Generator {
            var: "c".to_string(),
            source: Source::Reachables {
                from: "a".to_string(),
                path: PathExpr::new(vec![
                    PathSegment::Edge {
                        ty: None,
                        direction: Direction::Out,
                    },
                    PathSegment::Edge {
                        ty: Some(TypeSpec::new("Link")),
                        direction: Direction::In,
                    },
                    PathSegment::Restrict(TypeSpec::new("Target")),
                ]),
            },
        };
        assert_eq!(step.to_string(), "c <- reachables(a, --> <-Link- <Target>)");
    }
}
