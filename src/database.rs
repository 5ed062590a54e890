//! The clause database: predicates keyed by functor and arity.
//!
//! A predicate is either a native (a Rust callback) or a sequence of user
//! clauses.  Clauses are stored behind `Rc` in a deque, so `asserta` and
//! `assertz` are O(1) at either end and a running call can snapshot the
//! sequence by cloning the handles.  Retraction is logical: the clause is
//! flagged, new snapshots skip it, and snapshots taken before the retract
//! keep running it — the logical update view.  A clause is canonicalized at
//! assert time: the term is copied with fresh template variables (never
//! bound afterwards) and the head is compiled into a unification program.

use crate::machine::Machine;
use crate::term::Handle;
use crate::unify::{BindCtx, Unifier};
use crate::{visit, Arena, AtomId, RuntimeError, Term, VarId};
use indexmap::IndexMap;
use log::debug;
use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

/// A builtin predicate.  `Ok(false)` is failure, answered by backtracking;
/// errors unwind to the nearest catch.
pub type NativeFn = fn(&mut Machine, &[Term]) -> Result<bool, RuntimeError>;

/// Predicate key: functor atom and arity.
pub type PredKey = (AtomId, u32);

/// A stored clause.  `head` and `body` contain the template variables
/// listed in `vars`; those arena slots are never bound.  Activation
/// allocates one fresh variable per entry of `vars`.
pub(crate) struct Clause {
    pub(crate) head: Term,
    pub(crate) body: Term,
    pub(crate) vars: Vec<VarId>,
    pub(crate) head_unifier: Unifier,
    retracted: Cell<bool>,
}

impl Clause {
    #[inline]
    pub(crate) fn retracted(&self) -> bool {
        self.retracted.get()
    }

    /// Allocates the activation's fresh variables and unifies the head
    /// against `goal`.  On success the body can be instantiated over the
    /// returned locals.
    pub(crate) fn activate_head(
        &self,
        ctx: &mut BindCtx<'_>,
        goal: Term,
    ) -> Result<Option<Vec<Term>>, RuntimeError> {
        let locals: Vec<Term> = self.vars.iter().map(|_| ctx.arena.fresh_var()).collect();
        if self.head_unifier.run(ctx, goal, &locals)? {
            Ok(Some(locals))
        } else {
            Ok(None)
        }
    }

    /// Instantiates the body over an activation's locals.
    pub(crate) fn body_instance(
        &self,
        arena: &mut Arena,
        locals: &[Term],
    ) -> Result<Term, RuntimeError> {
        let map = self
            .vars
            .iter()
            .copied()
            .zip(locals.iter().copied())
            .collect();
        Ok(visit::instantiate(arena, self.body, &map)?)
    }
}

pub(crate) enum PredicateEntry {
    Native(NativeFn),
    Clauses {
        clauses: VecDeque<Rc<Clause>>,
        dynamic: bool,
    },
}

/// All predicates known to a runtime.
#[derive(Default)]
pub struct Database {
    preds: IndexMap<PredKey, PredicateEntry>,
    generation: u64,
}

/// Splits a clause term into head and body; a term without `:-/2` at the
/// root is a fact with body `true`.
fn split_clause(arena: &Arena, term: Term) -> (Term, Term) {
    let term = arena.resolve(term);
    if let Handle::FuncRef(_) = term.0 {
        if arena.functor_arity(term) == Ok((crate::arena::atoms::NECK, 2)) {
            if let Ok(args) = arena.func_args(term) {
                return (args[0], args[1]);
            }
        }
    }
    (term, Term::TRUE)
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumped on every assert and retract; lets the engine detect that a
    /// query changed the database (asserted clauses must survive the
    /// query's storage reclamation).
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn lookup(&self, key: PredKey) -> Option<&PredicateEntry> {
        self.preds.get(&key)
    }

    /// Registers a builtin under `name/arity`.
    pub fn register_native(&mut self, arena: &mut Arena, name: &str, arity: u32, f: NativeFn) {
        let key = (arena.intern_atom(name), arity);
        self.preds.insert(key, PredicateEntry::Native(f));
    }

    /// Adds a clause to a static predicate, creating it on first use.  This
    /// is the programmatic equivalent of consulting a source file; the
    /// resulting predicate rejects later `assert`/`retract`.
    pub fn load(&mut self, arena: &mut Arena, clause: Term) -> Result<PredKey, RuntimeError> {
        self.add_clause(arena, clause, false, false)
    }

    /// `asserta` (front = true) / `assertz`.  Creates a dynamic predicate on
    /// first use; rejects natives and static predicates.
    pub fn assert(
        &mut self,
        arena: &mut Arena,
        clause: Term,
        front: bool,
    ) -> Result<PredKey, RuntimeError> {
        self.add_clause(arena, clause, front, true)
    }

    fn add_clause(
        &mut self,
        arena: &mut Arena,
        clause: Term,
        front: bool,
        dynamic: bool,
    ) -> Result<PredKey, RuntimeError> {
        // private template copy: the caller's variables must not alias the
        // stored clause
        let copied = visit::copy_fresh(arena, clause)?;
        let (head, body) = split_clause(arena, copied);
        let head = arena.resolve(head);
        if head.is_var() {
            return Err(RuntimeError::Instantiation);
        }
        if !(head.is_atom() || head.is_compound()) {
            return Err(RuntimeError::Type {
                expected: "callable",
                culprit: head,
            });
        }
        let key = arena.functor_arity(head)?;
        // head-then-body first-occurrence order
        let vars = visit::variables(arena, copied)?;
        let head_unifier = Unifier::compile(arena, head, &vars)?;
        let stored = Rc::new(Clause {
            head,
            body,
            vars,
            head_unifier,
            retracted: Cell::new(false),
        });

        match self.preds.get_mut(&key) {
            None => {
                let mut clauses = VecDeque::with_capacity(4);
                clauses.push_back(stored);
                self.preds
                    .insert(key, PredicateEntry::Clauses { clauses, dynamic });
            }
            Some(PredicateEntry::Native(_)) => {
                return Err(self.permission_error(arena, "modify native procedure", key));
            }
            Some(PredicateEntry::Clauses {
                clauses,
                dynamic: is_dynamic,
            }) => {
                if dynamic && !*is_dynamic {
                    return Err(self.permission_error(arena, "modify static procedure", key));
                }
                if front {
                    clauses.push_front(stored);
                } else {
                    clauses.push_back(stored);
                }
            }
        }
        self.generation += 1;
        debug!(
            "assert{} {}/{}",
            if front { "a" } else { "z" },
            arena.atom_text(key.0),
            key.1
        );
        Ok(key)
    }

    /// The live clauses of a predicate as of now.  Mutations after the
    /// snapshot do not affect it.
    pub(crate) fn snapshot(&self, key: PredKey) -> Option<Vec<Rc<Clause>>> {
        match self.preds.get(&key)? {
            PredicateEntry::Native(_) => None,
            PredicateEntry::Clauses { clauses, .. } => Some(
                clauses
                    .iter()
                    .filter(|c| !c.retracted())
                    .cloned()
                    .collect(),
            ),
        }
    }

    /// Logically removes one clause, by reference, in O(1).  Snapshots
    /// taken earlier keep running it.
    pub(crate) fn retract(
        &mut self,
        arena: &Arena,
        key: PredKey,
        clause: &Rc<Clause>,
    ) -> Result<(), RuntimeError> {
        match self.preds.get_mut(&key) {
            Some(PredicateEntry::Clauses { dynamic: true, .. }) => {
                clause.retracted.set(true);
                self.generation += 1;
                debug!("retract {}/{}", arena.atom_text(key.0), key.1);
                Ok(())
            }
            Some(PredicateEntry::Clauses { dynamic: false, .. }) => {
                Err(self.permission_error(arena, "modify static procedure", key))
            }
            Some(PredicateEntry::Native(_)) => {
                Err(self.permission_error(arena, "modify native procedure", key))
            }
            None => Ok(()),
        }
    }

    /// Whether a predicate may be retracted from (dynamic, non-native).
    pub(crate) fn check_dynamic(&self, arena: &Arena, key: PredKey) -> Result<(), RuntimeError> {
        match self.preds.get(&key) {
            Some(PredicateEntry::Clauses { dynamic: true, .. }) | None => Ok(()),
            Some(PredicateEntry::Clauses { dynamic: false, .. }) => {
                Err(self.permission_error(arena, "modify static procedure", key))
            }
            Some(PredicateEntry::Native(_)) => {
                Err(self.permission_error(arena, "modify native procedure", key))
            }
        }
    }

    fn permission_error(&self, arena: &Arena, action: &'static str, key: PredKey) -> RuntimeError {
        RuntimeError::Permission {
            action,
            name: arena.atom_text(key.0).into(),
            arity: key.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trail::Trail;
    use crate::{atom, func};

    #[test]
    fn facts_and_rules_split_correctly() {
        let mut arena = Arena::new();
        let mut db = Database::new();

        let fact = func!["legs"; atom!("bird"), 2 => &mut arena];
        let key = db.load(&mut arena, fact).unwrap();
        assert_eq!(key, (arena.intern_atom("legs"), 2));

        let x = arena.var("X");
        let head = func!["mortal"; x => &mut arena];
        let body = func!["human"; x => &mut arena];
        let rule = func![":-"; head, body => &mut arena];
        let key = db.load(&mut arena, rule).unwrap();
        let snap = db.snapshot(key).unwrap();
        assert_eq!(snap.len(), 1);
        assert_ne!(snap[0].body, Term::TRUE);
        assert_eq!(snap[0].vars.len(), 1);
    }

    #[test]
    fn asserta_prepends_assertz_appends() {
        let mut arena = Arena::new();
        let mut db = Database::new();
        let c1 = func!["p"; 1 => &mut arena];
        let c2 = func!["p"; 2 => &mut arena];
        let c3 = func!["p"; 3 => &mut arena];
        let key = db.assert(&mut arena, c1, false).unwrap();
        db.assert(&mut arena, c2, false).unwrap();
        db.assert(&mut arena, c3, true).unwrap();
        let snap = db.snapshot(key).unwrap();
        let firsts: Vec<Term> = snap
            .iter()
            .map(|c| arena.func_args(c.head).unwrap()[0])
            .collect();
        assert_eq!(firsts, vec![Term::int(3), Term::int(1), Term::int(2)]);
    }

    #[test]
    fn retract_is_logical() {
        let mut arena = Arena::new();
        let mut db = Database::new();
        let c1 = func!["q"; 1 => &mut arena];
        let c2 = func!["q"; 2 => &mut arena];
        let key = db.assert(&mut arena, c1, false).unwrap();
        db.assert(&mut arena, c2, false).unwrap();

        let before = db.snapshot(key).unwrap();
        assert_eq!(before.len(), 2);
        db.retract(&arena, key, &before[0]).unwrap();
        // the old snapshot still holds the clause; a new one does not
        assert_eq!(before.len(), 2);
        assert!(before[0].retracted());
        assert_eq!(db.snapshot(key).unwrap().len(), 1);
    }

    #[test]
    fn static_predicates_reject_assert() {
        let mut arena = Arena::new();
        let mut db = Database::new();
        let c = func!["s"; 1 => &mut arena];
        db.load(&mut arena, c).unwrap();
        let c2 = func!["s"; 2 => &mut arena];
        assert!(matches!(
            db.assert(&mut arena, c2, false),
            Err(RuntimeError::Permission { .. })
        ));
    }

    #[test]
    fn clause_head_must_be_callable() {
        let mut arena = Arena::new();
        let mut db = Database::new();
        assert!(matches!(
            db.assert(&mut arena, Term::int(1), false),
            Err(RuntimeError::Type { .. })
        ));
        let v = arena.var("X");
        assert!(matches!(
            db.assert(&mut arena, v, false),
            Err(RuntimeError::Instantiation)
        ));
    }

    #[test]
    fn assert_copies_the_caller_template() {
        let mut arena = Arena::new();
        let mut trail = Trail::new();
        let mut db = Database::new();
        let x = arena.var("X");
        let c = func!["r"; x => &mut arena];
        let key = db.assert(&mut arena, c, false).unwrap();
        // binding the caller's X must not affect the stored clause
        arena.bind(x.var_id().unwrap(), Term::int(5));
        let snap = db.snapshot(key).unwrap();
        let goal = func!["r"; 6 => &mut arena];
        let floor = arena.var_count();
        let mut ctx = BindCtx::new(&mut arena, &mut trail, floor);
        assert!(snap[0].activate_head(&mut ctx, goal).unwrap().is_some());
    }
}
