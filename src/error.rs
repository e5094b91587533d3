//! Error types for compilation and plan execution

use thiserror::Error;

use crate::backend::Backend;
use crate::token::Rule;

/// Errors detected while compiling a pattern
///
/// Every error is fatal: compilation either produces a complete plan or
/// fails closed.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Compile error: malformed pattern token `{token}`: {reason}")]
    MalformedToken { token: String, reason: String },

    #[error("Compile error: {0}")]
    Syntax(#[from] pest::error::Error<Rule>),

    #[error("Compile error: duplicate or conflicting name: {0}")]
    DuplicateOrConflictingName(String),

    #[error("Compile error: named edge `{0}` is not supported by the containment backend")]
    UnsupportedNamedEdge(String),

    #[error("Compile error: argument edge `{0}` is not supported by the containment backend")]
    UnsupportedArgumentEdge(String),

    #[error(
        "Compile error: anonymous chain cannot be linearized ({continuations} open continuations)"
    )]
    AmbiguousAnonymousChain { continuations: usize },

    #[error("Compile error: no backend selected for compilation")]
    UnresolvedBackendContext,

    /// A constraint is checked where it is spliced into the depth-first walk,
    /// right after the node it follows. Variables bound only on a sibling
    /// branch reached later in the walk count as unbound there.
    #[error("Compile error: variable `{0}` is used before it is bound")]
    UnboundVariable(String),
}

impl CompileError {
    pub(crate) fn malformed(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedToken {
            token: token.into(),
            reason: reason.into(),
        }
    }
}

/// Errors detected before a plan starts producing matches
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Execution error: plan targets the {plan} backend but the model is a {model} model")]
    BackendMismatch { plan: Backend, model: Backend },

    #[error("Execution error: plan expects {expected} arguments, got {found}")]
    ArgumentCount { expected: usize, found: usize },

    #[error("Execution error: argument `{0}` is nil")]
    AbsentArgument(String),

    #[error("Execution error: unknown function `{0}`")]
    UnknownFunction(String),
}
