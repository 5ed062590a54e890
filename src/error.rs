//! Defines [`TermError`] and [`RuntimeError`], the two error surfaces of the crate.
//!
//! [`TermError`] covers faults at the term/arena layer (stale handles, kind or
//! arity mismatches).  [`RuntimeError`] is the execution-engine taxonomy:
//! instantiation, type, domain, existence, evaluation, and permission errors,
//! plus the thrown-ball and halt signals.  Unification *failure* is never an
//! error; it is reported as an ordinary `false` and handled by backtracking.

use crate::Term;
use smartstring::alias::String;
use thiserror::Error;

/// Errors that can occur while constructing or inspecting terms.
///
/// [`TermError`] provides a single error surface for the term layer.  Fallible
/// accessors return it so that callers can propagate with `?` without explicit
/// mapping.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TermError {
    /// The handle does not reference valid arena storage (stale or foreign).
    #[error("invalid term {0:?}")]
    InvalidTerm(Term),

    #[error("missing functor")]
    MissingFunctor,

    #[error("invalid functor {0:?}")]
    InvalidFunctor(Term),

    #[error("type mismatch: expected {expected}, found {found}")]
    UnexpectedKind {
        expected: &'static str,
        found: &'static str,
    },

    #[error("arity mismatch: expected {expected}, found {found}")]
    UnexpectedArity { expected: usize, found: usize },
}

/// Runtime errors raised by the execution engine and the native predicates.
///
/// Variants carry just enough untethered context (the offending term, the
/// expected type atom) for the catch boundary or the top level to convert them
/// into fully contextualized `error(Kind, context(Name/Arity))` terms; code
/// that raises an error never needs to know which predicate is active.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// An operation required a bound value but found an unbound variable.
    #[error("instantiation error")]
    Instantiation,

    /// A value was present but of the wrong kind.
    #[error("type error: expected {expected}")]
    Type {
        expected: &'static str,
        culprit: Term,
    },

    /// Right type, value outside the accepted set.
    #[error("domain error: expected {domain}")]
    Domain {
        domain: &'static str,
        culprit: Term,
    },

    /// A referenced predicate does not exist.
    #[error("existence error: unknown procedure {name}/{arity}")]
    Existence { name: String, arity: u32 },

    /// Arithmetic fault, e.g. division by zero.
    #[error("evaluation error: {0}")]
    Evaluation(&'static str),

    /// A disallowed mutation was attempted, e.g. modifying a static predicate.
    #[error("permission error: cannot {action} {name}/{arity}")]
    Permission {
        action: &'static str,
        name: String,
        arity: u32,
    },

    /// A fault in the underlying term storage.
    #[error(transparent)]
    Term(#[from] TermError),

    /// A ball thrown by `throw/1`; caught by `catch/3` via unification.
    #[error("uncaught exception")]
    Thrown(Term),

    /// The distinguished halt signal.  Unwinds the entire engine and is not
    /// catchable by `catch/3`.
    #[error("halted with status {0}")]
    Halted(i64),

    /// An error annotated with the predicate indicator that was active when it
    /// reached the top level.
    #[error("in {name}/{arity}: {source}")]
    Context {
        name: String,
        arity: u32,
        #[source]
        source: Box<RuntimeError>,
    },
}

impl RuntimeError {
    /// Attach a predicate-indicator context.  Idempotent for already
    /// contextualized errors and transparent for thrown balls and halt,
    /// which must reach the catch boundary unwrapped.
    pub fn with_context(self, name: impl Into<String>, arity: u32) -> Self {
        match self {
            RuntimeError::Context { .. }
            | RuntimeError::Thrown(_)
            | RuntimeError::Halted(_) => self,
            other => RuntimeError::Context {
                name: name.into(),
                arity,
                source: Box::new(other),
            },
        }
    }

    /// Returns `true` if this error must unwind the whole engine.
    pub fn is_halt(&self) -> bool {
        matches!(self, RuntimeError::Halted(_))
    }
}
