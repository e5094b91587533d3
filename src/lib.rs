//! Shapeplan: compile declarative subgraph patterns into binding plans
//!
//! A pattern names the nodes and edges of a shape, constrains their types,
//! and adds guards and local bindings. The compiler turns it into an ordered
//! plan of generator, let and guard steps for either a typed graph or a
//! containment tree; the VM runs that plan lazily against a model.

// Compilation pipeline
pub mod backend; // Graph and containment encodings
pub mod compiler; // Depth-first binding compiler
pub mod error;
pub mod expr; // Constraint expression AST and parser
pub mod path; // Anonymous chain compression
pub mod pattern_graph; // Intermediate pattern graph and anchor resolution
pub mod plan; // Binding steps and the fail-fast rewrite
pub mod token; // Pattern token classification

// Execution
pub mod graph_model; // In-memory typed graph
pub mod model; // Backend contract
pub mod searcher; // Compile + execute in one call
pub mod tree_model; // In-memory containment tree
pub mod vm; // Backtracking plan executor

// Re-exports for convenience
pub use backend::{Backend, BackendStrategy, ContainmentStrategy, GraphStrategy};
pub use compiler::{Compiler, compile, compile_tokens};
pub use error::{CompileError, ExecError};
pub use expr::Expr;
pub use graph_model::{GraphElement, TypedGraph};
pub use model::{EdgeAccess, Model, Value};
pub use plan::{BindingPlan, BindingStep, GuardMode, PathExpr, PathSegment, Source};
pub use searcher::{SearchError, search, search_pattern};
pub use token::{PatternToken, TypeSpec, classify, classify_all, tokenize};
pub use tree_model::{ContainmentTree, ObjectId};
pub use vm::{FunctionTable, Match, MatchIterator, VM};
