//! Virtual machine for binding plans
//!
//! The VM interprets the steps of a [`BindingPlan`] against a model. Each
//! generator pushes a frame holding its remaining candidates; a failed guard
//! backtracks to the innermost frame and resumes it with the next
//! candidate. Matches are produced lazily, one per successful run through
//! the step list.

use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::backend::Backend;
use crate::error::ExecError;
use crate::expr::{CmpOp, Expr};
use crate::model::{Model, Value};
use crate::plan::{BindingPlan, BindingStep, GuardMode, Source};
use crate::token::{Direction, TypeSpec};

/// Functions callable from constraint expressions without registration
const BUILTINS: [&str; 2] = ["has_type", "is_nil"];

/// A host function callable from constraint expressions
pub type HostFunction<E> = Rc<dyn Fn(&[Value<E>]) -> Value<E>>;

/// Host functions available to `f(..)` calls in constraints
pub struct FunctionTable<E> {
    functions: FxHashMap<String, HostFunction<E>>,
}

impl<E> Default for FunctionTable<E> {
    fn default() -> Self {
        Self {
            functions: FxHashMap::default(),
        }
    }
}

impl<E> FunctionTable<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, function: impl Fn(&[Value<E>]) -> Value<E> + 'static) {
        self.functions.insert(name.to_string(), Rc::new(function));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<&HostFunction<E>> {
        self.functions.get(name)
    }
}

impl<E> fmt::Debug for FunctionTable<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.functions.keys()).finish()
    }
}

/// A step with its variable resolved to a slot
#[derive(Debug, Clone)]
enum Op {
    Generate { slot: usize, source: Source },
    Bind { slot: usize, expr: Expr },
    Check { predicate: Expr, mode: GuardMode },
}

/// A plan prepared for execution
#[derive(Debug)]
struct Program {
    backend: Backend,
    ops: Vec<Op>,
    /// Variable name to slot; arguments occupy the first slots
    slots: FxHashMap<String, usize>,
    arguments: Vec<String>,
    /// Slot of each result name
    results: Vec<Option<usize>>,
    names: Rc<[String]>,
    /// Names of every function the plan calls
    calls: Vec<String>,
}

impl Program {
    fn new(plan: &BindingPlan) -> Self {
        let mut slots = FxHashMap::default();
        for arg in plan.arguments() {
            let next = slots.len();
            slots.entry(arg.clone()).or_insert(next);
        }

        let mut calls = Vec::new();
        let mut ops = Vec::with_capacity(plan.steps().len());
        for step in plan.steps() {
            let op = match step {
                BindingStep::Generator { var, source } => Op::Generate {
                    slot: slot_for(&mut slots, var),
                    source: source.clone(),
                },
                BindingStep::Let { var, expr } => {
                    collect_calls(expr, &mut calls);
                    Op::Bind {
                        slot: slot_for(&mut slots, var),
                        expr: expr.clone(),
                    }
                }
                BindingStep::Guard { predicate, mode } => {
                    collect_calls(predicate, &mut calls);
                    Op::Check {
                        predicate: predicate.clone(),
                        mode: *mode,
                    }
                }
            };
            ops.push(op);
        }

        let results = plan
            .result_names()
            .iter()
            .map(|name| slots.get(name).copied())
            .collect();

        Self {
            backend: plan.backend(),
            ops,
            slots,
            arguments: plan.arguments().to_vec(),
            results,
            names: plan.result_names().into(),
            calls,
        }
    }
}

fn slot_for(slots: &mut FxHashMap<String, usize>, var: &str) -> usize {
    let next = slots.len();
    *slots.entry(var.to_string()).or_insert(next)
}

fn collect_calls(expr: &Expr, calls: &mut Vec<String>) {
    expr.walk(&mut |e| {
        if let Expr::Call(name, _) = e
            && !calls.contains(name)
        {
            calls.push(name.clone());
        }
    });
}

/// One match: the values of the plan's result names
#[derive(Debug, Clone, PartialEq)]
pub struct Match<E> {
    values: Vec<Value<E>>,
    names: Rc<[String]>,
}

impl<E> Match<E> {
    /// Value bound to `name`, if it is a result name
    pub fn get(&self, name: &str) -> Option<&Value<E>> {
        let i = self.names.iter().position(|n| n == name)?;
        self.values.get(i)
    }

    /// Element bound to `name`
    pub fn element(&self, name: &str) -> Option<&E> {
        self.get(name).and_then(Value::as_element)
    }

    pub fn values(&self) -> &[Value<E>] {
        &self.values
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter_named(&self) -> impl Iterator<Item = (&str, &Value<E>)> {
        self.names.iter().map(String::as_str).zip(self.values.iter())
    }
}

/// Executor for one compiled plan
///
/// A `VM` can be executed any number of times; every execution gets an
/// independent [`MatchIterator`].
pub struct VM<E> {
    program: Rc<Program>,
    functions: Rc<FunctionTable<E>>,
}

impl<E: Clone + Eq> VM<E> {
    pub fn new(plan: &BindingPlan) -> Self {
        Self::with_functions(plan, FunctionTable::new())
    }

    pub fn with_functions(plan: &BindingPlan, functions: FunctionTable<E>) -> Self {
        Self {
            program: Rc::new(Program::new(plan)),
            functions: Rc::new(functions),
        }
    }

    /// Start enumerating the matches of the plan in `model`
    pub fn execute<'a, M>(
        &self,
        model: &'a M,
        arguments: Vec<Value<E>>,
    ) -> Result<MatchIterator<'a, M>, ExecError>
    where
        M: Model<Element = E>,
    {
        let program = &self.program;
        if model.backend() != program.backend {
            return Err(ExecError::BackendMismatch {
                plan: program.backend,
                model: model.backend(),
            });
        }
        if arguments.len() != program.arguments.len() {
            return Err(ExecError::ArgumentCount {
                expected: program.arguments.len(),
                found: arguments.len(),
            });
        }
        if let Some(i) = arguments.iter().position(Value::is_nil) {
            return Err(ExecError::AbsentArgument(program.arguments[i].clone()));
        }
        if let Some(name) = program
            .calls
            .iter()
            .find(|name| !BUILTINS.contains(&name.as_str()) && !self.functions.contains(name))
        {
            return Err(ExecError::UnknownFunction(name.clone()));
        }

        let mut values = vec![Value::Nil; program.slots.len()];
        for (name, value) in program.arguments.iter().zip(arguments) {
            if let Some(&slot) = program.slots.get(name) {
                values[slot] = value;
            }
        }

        Ok(MatchIterator {
            model,
            program: Rc::clone(&self.program),
            functions: Rc::clone(&self.functions),
            values,
            frames: Vec::new(),
            state: State::Fresh,
        })
    }
}

/// A generator with the candidates it has not tried yet
struct Frame<'a, E> {
    op: usize,
    slot: usize,
    candidates: Box<dyn Iterator<Item = E> + 'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fresh,
    /// A match was returned; resume from the innermost frame
    Resume,
    Done,
}

/// Lazy sequence of matches
///
/// Dropping the iterator is the only way to cancel an execution.
pub struct MatchIterator<'a, M: Model> {
    model: &'a M,
    program: Rc<Program>,
    functions: Rc<FunctionTable<M::Element>>,
    values: Vec<Value<M::Element>>,
    frames: Vec<Frame<'a, M::Element>>,
    state: State,
}

impl<'a, M: Model> MatchIterator<'a, M> {
    /// Advance the innermost frame, popping exhausted ones
    ///
    /// Returns the op to continue at, or `None` when every frame is spent.
    fn backtrack(&mut self) -> Option<usize> {
        while let Some(frame) = self.frames.last_mut() {
            if let Some(candidate) = frame.candidates.next() {
                self.values[frame.slot] = Value::Element(candidate);
                return Some(frame.op + 1);
            }
            self.frames.pop();
        }
        self.state = State::Done;
        None
    }

    fn current_match(&self) -> Match<M::Element> {
        let values = self
            .program
            .results
            .iter()
            .map(|slot| match slot {
                Some(slot) => self.values[*slot].clone(),
                None => Value::Nil,
            })
            .collect();
        Match {
            values,
            names: Rc::clone(&self.program.names),
        }
    }

    fn lookup(&self, name: &str) -> Value<M::Element> {
        self.program
            .slots
            .get(name)
            .map(|&slot| self.values[slot].clone())
            .unwrap_or(Value::Nil)
    }

    fn element(&self, name: &str) -> Option<M::Element> {
        match self.lookup(name) {
            Value::Element(e) => Some(e),
            _ => None,
        }
    }

    fn candidates(&self, source: &Source) -> Box<dyn Iterator<Item = M::Element> + 'a> {
        let model: &'a M = self.model;
        match source {
            Source::InstancesOf(ty) => model.instances_of_type(ty.as_ref()),
            Source::Incidences {
                from,
                ty,
                direction,
            } => {
                let edges = match (self.element(from), model.edges()) {
                    (Some(node), Some(access)) => access.incidences(&node, ty.as_ref(), *direction),
                    _ => Vec::new(),
                };
                Box::new(edges.into_iter())
            }
            Source::Reachables { from, path } => {
                let reached = match self.element(from) {
                    Some(start) => model.reachables(&start, path),
                    None => Vec::new(),
                };
                Box::new(reached.into_iter())
            }
        }
    }

    fn eval(&self, expr: &Expr) -> Value<M::Element> {
        match expr {
            Expr::Literal(literal) => Value::from_literal(literal),
            Expr::Var(name) | Expr::Argument(name) => self.lookup(name),
            Expr::Attr(inner, attr) => match self.eval(inner) {
                Value::Element(e) => self.model.attribute(&e, attr),
                _ => Value::Nil,
            },
            Expr::Call(name, args) => {
                let args: Vec<_> = args.iter().map(|a| self.eval(a)).collect();
                self.call(name, &args)
            }
            Expr::Not(inner) => Value::Bool(!self.eval(inner).is_truthy()),
            Expr::And(items) => Value::Bool(items.iter().all(|e| self.eval(e).is_truthy())),
            Expr::Or(items) => Value::Bool(items.iter().any(|e| self.eval(e).is_truthy())),
            Expr::Compare(op, lhs, rhs) => {
                Value::Bool(compare(*op, &self.eval(lhs), &self.eval(rhs)))
            }
            Expr::IsInstance(inner, ty) => Value::Bool(self.is_instance(&self.eval(inner), ty)),
            Expr::EdgeEnd { edge, direction } => {
                let end = self.element(edge).and_then(|e| {
                    self.model
                        .edges()
                        .and_then(|access| access.adjacent_by_edge(&e, *direction))
                });
                end.map_or(Value::Nil, Value::Element)
            }
            Expr::IncidentAt {
                edge,
                node,
                ty,
                direction,
            } => Value::Bool(self.incident_at(edge, node, ty.as_ref(), *direction)),
            Expr::IsPresent(name) => Value::Bool(!self.lookup(name).is_nil()),
            Expr::NonEmpty(source) => Value::Bool(self.candidates(source).next().is_some()),
            Expr::Member(name, source) => match self.element(name) {
                Some(e) => Value::Bool(self.candidates(source).any(|c| c == e)),
                None => Value::Bool(false),
            },
        }
    }

    fn call(&self, name: &str, args: &[Value<M::Element>]) -> Value<M::Element> {
        match (name, args) {
            ("has_type", [value, Value::Str(ty)]) => {
                Value::Bool(self.is_instance(value, &TypeSpec::new(ty.as_str())))
            }
            ("is_nil", [value]) => Value::Bool(value.is_nil()),
            _ => match self.functions.get(name) {
                Some(function) => function(args),
                None => Value::Nil,
            },
        }
    }

    fn is_instance(&self, value: &Value<M::Element>, ty: &TypeSpec) -> bool {
        value
            .as_element()
            .is_some_and(|e| self.model.is_instance(e, ty))
    }

    fn incident_at(
        &self,
        edge: &str,
        node: &str,
        ty: Option<&TypeSpec>,
        direction: Direction,
    ) -> bool {
        let (Some(edge), Some(node)) = (self.element(edge), self.element(node)) else {
            return false;
        };
        let Some((src, dst)) = self.model.edges().and_then(|a| a.endpoints(&edge)) else {
            return false;
        };
        let end = match direction {
            Direction::Out => src,
            Direction::In => dst,
        };
        end == node && ty.is_none_or(|ty| self.model.is_instance(&edge, ty))
    }
}

fn compare<E: PartialEq>(op: CmpOp, lhs: &Value<E>, rhs: &Value<E>) -> bool {
    let ordering = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => None,
    };
    match op {
        CmpOp::Eq => lhs == rhs,
        CmpOp::Ne => lhs != rhs,
        CmpOp::Lt => ordering == Some(Ordering::Less),
        CmpOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Gt => ordering == Some(Ordering::Greater),
        CmpOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
    }
}

impl<'a, M: Model> Iterator for MatchIterator<'a, M> {
    type Item = Match<M::Element>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut ip = match self.state {
            State::Done => return None,
            State::Fresh => {
                self.state = State::Resume;
                0
            }
            State::Resume => self.backtrack()?,
        };

        let program = Rc::clone(&self.program);
        loop {
            let Some(op) = program.ops.get(ip) else {
                return Some(self.current_match());
            };

            let proceed = match op {
                Op::Generate { slot, source } => {
                    let candidates = self.candidates(source);
                    self.frames.push(Frame {
                        op: ip,
                        slot: *slot,
                        candidates,
                    });
                    false
                }
                Op::Bind { slot, expr } => {
                    self.values[*slot] = self.eval(expr);
                    true
                }
                Op::Check { predicate, mode } => {
                    let holds = self.eval(predicate).is_truthy();
                    if !holds && *mode == GuardMode::Halt {
                        if let Some(frame) = self.frames.last_mut() {
                            frame.candidates = Box::new(std::iter::empty());
                        }
                    }
                    holds
                }
            };

            ip = if proceed { ip + 1 } else { self.backtrack()? };
        }
    }
}
