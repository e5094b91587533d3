//! End-to-end search: compile a pattern and run it against a model
//!
//! 1. Tokenize the pattern string
//! 2. Compile it for the model's backend
//! 3. Execute the plan and yield matches

use thiserror::Error;

use crate::compiler::Compiler;
use crate::error::{CompileError, ExecError};
use crate::model::{Model, Value};
use crate::plan::BindingPlan;
use crate::vm::{MatchIterator, VM};

/// Error during search
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Run a compiled plan against a model
pub fn search<'a, M: Model>(
    model: &'a M,
    plan: &BindingPlan,
    arguments: Vec<Value<M::Element>>,
) -> Result<MatchIterator<'a, M>, SearchError> {
    Ok(VM::new(plan).execute(model, arguments)?)
}

/// Compile `pattern` for the model's backend and run it
///
/// `argument_names` and `argument_values` are matched up by position.
pub fn search_pattern<'a, M: Model, S: AsRef<str>>(
    model: &'a M,
    pattern: &str,
    argument_names: &[S],
    argument_values: Vec<Value<M::Element>>,
) -> Result<MatchIterator<'a, M>, SearchError> {
    let plan = Compiler::new()
        .backend(model.backend())
        .compile_str(argument_names, pattern)?;
    search(model, &plan, argument_values)
}
