//! An arena-backed Prolog core: compact terms, a unification compiler,
//! and a backtracking execution engine.
//!
//! This crate provides a fixed-width 16 byte [`Term`] handle over a typed
//! [`Arena`] that interns atoms, variables, big integers, strings and
//! compound terms, plus the machinery to run logic programs over them: a
//! clause [`Database`] with compiled head unifiers, and a [`Machine`] that
//! resolves queries by depth-first search with backtracking, cut, `catch`
//! and `throw`, trying clauses in program order with last-call
//! optimization.
//!
//! The primary entry points are [`Machine`] (load clauses with
//! [`Machine::load`], query with [`Machine::solve`]) and, one level down,
//! [`Arena`] and [`Term`] for building and inspecting terms directly.
//! Terms are matched with [`Term::view`], which yields a [`View`]
//! borrowing from the arena; construction goes through the [`func!`],
//! [`list!`], [`atom!`] and [`var!`] macros or the `Arena` convenience
//! methods.  Equality and ordering follow the standard order of terms.
//!
//! ```
//! use arena_prolog::{atom, func, Machine};
//!
//! let mut machine = Machine::new();
//! let arena = machine.arena_mut();
//! let fact = func!["parent"; atom!("tom"), atom!("bob") => arena];
//! machine.load(fact).unwrap();
//!
//! let arena = machine.arena_mut();
//! let x = arena.var("X");
//! let goal = func!["parent"; atom!("tom"), x => arena];
//! let names: Vec<_> = machine
//!     .solve(goal)
//!     .unwrap()
//!     .map(|s| s.unwrap()[0].1)
//!     .collect();
//! assert_eq!(names.len(), 1);
//! ```

mod arena;
mod builtins;
mod database;
mod display;
mod error;
mod machine;
mod term;
mod trail;
mod unify;
mod view;
pub mod visit;

pub use arena::{Arena, AtomId, Mark, Stats, VarId};
pub use database::{Database, NativeFn, PredKey};
pub use display::TermDisplay;
pub use error::{RuntimeError, TermError};
pub use machine::{EngineStats, Machine, Solution, Solutions};
pub use term::{IntoTerm, Term};
pub use trail::{Trail, TrailMark};
pub use unify::{unify, BindCtx};
pub use view::{compare, terms_equal, View};
