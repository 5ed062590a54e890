//! The execution engine: goal stack, choice points, cut, catch, and the
//! solutions iterator.
//!
//! Execution is a loop over an explicit goal stack; no Prolog recursion
//! maps to Rust recursion.  A choice point snapshots the goal stack, the
//! trail position and the variable watermark; backtracking restores the
//! snapshot, undoes the trail, and resumes the recorded alternative.  Cut
//! truncates the choice-point stack to the barrier captured at clause
//! entry.  Clause selection pushes a choice point only while a further
//! candidate remains, so deterministic recursion runs in constant goal,
//! choice and host stack depth.
//!
//! Errors unwind the choice-point stack to the nearest catch frame, where
//! they are converted to `error(Kind, Context)` terms and unified with the
//! catcher; an unmatched catcher rethrows.  `halt` is a distinguished
//! signal that no frame intercepts.

use crate::arena::{atoms, Mark};
use crate::database::{Clause, Database, PredicateEntry, PredKey};
use crate::term::Handle;
use crate::trail::{Trail, TrailMark};
use crate::unify::{unify, BindCtx};
use crate::{visit, Arena, RuntimeError, Term, VarId};
use log::trace;
use smartstring::alias::String;
use std::rc::Rc;

/// One pending obligation on the goal stack.
#[derive(Debug, Copy, Clone)]
enum Goal {
    /// Run a body term; `barrier` is the choice-point height a `!` inside
    /// it cuts back to.
    Body { term: Term, barrier: usize },
    /// Commit: discard choice points above `height`.
    Cut { height: usize },
    /// Retire the catch frame at `index` once the guarded goal has
    /// finished deterministically.
    PopCatch { index: usize },
}

/// What to do when a choice point is resumed.
enum Alternative {
    /// Run another body term (the right branch of `;`, the else of `->`).
    Rerun { goal: Term, barrier: usize },
    /// Try the remaining clause candidates of a call.
    Clauses {
        goal: Term,
        clauses: Vec<Rc<Clause>>,
        next: usize,
        barrier: usize,
    },
    /// A catch frame.  Transparent to ordinary backtracking; consulted
    /// only when an error unwinds.
    Catch {
        catcher: Term,
        recovery: Term,
        barrier: usize,
    },
}

struct ChoicePoint {
    goals: Vec<Goal>,
    trail_mark: TrailMark,
    var_mark: usize,
    alternative: Alternative,
}

/// High-water marks of the engine's stacks, for boundedness assertions.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineStats {
    pub max_goal_depth: usize,
    pub max_choice_depth: usize,
    pub steps: u64,
}

/// One solution: the query's named variables with deep-resolved values.
/// The terms stay valid until the [`Solutions`] iterator is dropped.
pub type Solution = Vec<(String, Term)>;

/// A logic runtime: arena, database, trail, and the execution stacks.
pub struct Machine {
    pub(crate) arena: Arena,
    pub(crate) db: Database,
    pub(crate) trail: Trail,
    goals: Vec<Goal>,
    cps: Vec<ChoicePoint>,
    query_var_base: usize,
    query_trail_mark: TrailMark,
    query_arena_mark: Option<Mark>,
    query_db_generation: u64,
    stats: EngineStats,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    /// A machine with the core builtins registered.
    pub fn new() -> Self {
        let mut machine = Machine {
            arena: Arena::new(),
            db: Database::new(),
            trail: Trail::new(),
            goals: Vec::new(),
            cps: Vec::new(),
            query_var_base: 0,
            query_trail_mark: 0,
            query_arena_mark: None,
            query_db_generation: 0,
            stats: EngineStats::default(),
        };
        crate::builtins::register(&mut machine);
        machine
    }

    #[inline]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    #[inline]
    pub fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    #[inline]
    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = EngineStats::default();
    }

    /// Adds a program clause (static predicate).
    pub fn load(&mut self, clause: Term) -> Result<(), RuntimeError> {
        self.db.load(&mut self.arena, clause)?;
        Ok(())
    }

    /// The variable watermark that decides trail elision: the newest choice
    /// point's, or the query entry when none is live.
    #[inline]
    fn var_floor(&self) -> usize {
        self.cps
            .last()
            .map(|cp| cp.var_mark)
            .unwrap_or(self.query_var_base)
    }

    /// A binding context over the machine's arena and trail.
    pub(crate) fn bind_ctx(&mut self) -> BindCtx<'_> {
        let floor = self.var_floor();
        BindCtx::new(&mut self.arena, &mut self.trail, floor)
    }

    fn push_cp(&mut self, alternative: Alternative) {
        self.cps.push(ChoicePoint {
            goals: self.goals.clone(),
            trail_mark: self.trail.mark(),
            var_mark: self.arena.var_count(),
            alternative,
        });
        self.stats.max_choice_depth = self.stats.max_choice_depth.max(self.cps.len());
    }

    /// Starts a query.  The returned iterator yields one binding set per
    /// solution; dropping it restores all query bindings and reclaims the
    /// query's storage (unless the query changed the database, whose
    /// clauses must survive).
    pub fn solve(&mut self, goal: Term) -> Result<Solutions<'_>, RuntimeError> {
        let vars = visit::variables(&self.arena, goal)?;
        let named: Vec<(String, VarId)> = vars
            .into_iter()
            .filter_map(|v| self.arena.var_name(v).map(|n| (String::from(n), v)))
            .collect();
        Ok(Solutions {
            machine: self,
            named,
            pending: Some(goal),
            done: false,
        })
    }

    /// Runs a goal once, discarding bindings: `true` if it has at least one
    /// solution.
    pub fn prove(&mut self, goal: Term) -> Result<bool, RuntimeError> {
        let mut solutions = self.solve(goal)?;
        match solutions.next() {
            None => Ok(false),
            Some(Ok(_)) => Ok(true),
            Some(Err(e)) => Err(e),
        }
    }

    fn begin_query(&mut self, goal: Term) {
        self.query_arena_mark = Some(self.arena.mark());
        self.query_db_generation = self.db.generation();
        self.query_trail_mark = self.trail.mark();
        self.query_var_base = self.arena.var_count();
        self.goals.clear();
        self.cps.clear();
        self.goals.push(Goal::Body {
            term: goal,
            barrier: 0,
        });
    }

    fn end_query(&mut self) {
        self.goals.clear();
        self.cps.clear();
        self.trail.undo_to(&mut self.arena, self.query_trail_mark);
        if let Some(mark) = self.query_arena_mark.take() {
            // asserted clauses live in the arena; keep the storage if the
            // query touched the database
            if self.db.generation() == self.query_db_generation {
                self.arena.truncate(mark);
            }
        }
    }

    /// The main loop: runs until the goal stack empties (a solution), the
    /// alternatives are exhausted (failure), or an error escapes every
    /// catch frame.
    fn run(&mut self) -> Result<bool, RuntimeError> {
        loop {
            self.stats.max_goal_depth = self.stats.max_goal_depth.max(self.goals.len());
            self.stats.steps += 1;
            let outcome = match self.goals.pop() {
                None => return Ok(true),
                Some(goal) => self.step(goal),
            };
            let outcome = match outcome {
                Ok(true) => continue,
                Ok(false) => self.backtrack(),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(true) => {}
                Ok(false) => return Ok(false),
                Err(e) if e.is_halt() => return Err(e),
                Err(e) => self.dispatch_error(e)?,
            }
        }
    }

    fn step(&mut self, goal: Goal) -> Result<bool, RuntimeError> {
        match goal {
            Goal::Cut { height } => {
                self.cps.truncate(height);
                Ok(true)
            }
            Goal::PopCatch { index } => {
                // the frame can only be removed when it is on top; buried
                // under the guard's choice points it stays as an inert
                // placeholder, since `dispatch_error` consults a frame only
                // while its `PopCatch` is still pending
                if self.cps.len() == index + 1
                    && matches!(
                        self.cps.last().map(|cp| &cp.alternative),
                        Some(Alternative::Catch { .. })
                    )
                {
                    self.cps.pop();
                }
                Ok(true)
            }
            Goal::Body { term, barrier } => self.call_body(term, barrier),
        }
    }

    fn call_body(&mut self, term: Term, barrier: usize) -> Result<bool, RuntimeError> {
        let term = self.arena.resolve(term);
        match term.0 {
            Handle::Var(_) => Err(RuntimeError::Instantiation),
            Handle::Atom(id) => match id {
                atoms::TRUE => Ok(true),
                atoms::FAIL | atoms::FALSE => Ok(false),
                atoms::CUT => {
                    self.cps.truncate(barrier);
                    Ok(true)
                }
                _ => self.dispatch(term, (id, 0), barrier),
            },
            Handle::FuncRef(_) => {
                let key = self.arena.functor_arity(term).map_err(RuntimeError::from)?;
                let args = self.arena.func_args(term).map_err(RuntimeError::from)?;
                match key {
                    (atoms::COMMA, 2) => {
                        let (a, b) = (args[0], args[1]);
                        self.goals.push(Goal::Body { term: b, barrier });
                        self.goals.push(Goal::Body { term: a, barrier });
                        Ok(true)
                    }
                    (atoms::SEMICOLON, 2) => {
                        let (left, right) = (args[0], args[1]);
                        let left = self.arena.resolve(left);
                        if self.arena.functor_arity(left) == Ok((atoms::ARROW, 2)) {
                            let cond_args = self.arena.func_args(left).map_err(RuntimeError::from)?;
                            let (cond, then) = (cond_args[0], cond_args[1]);
                            self.push_if_then_else(cond, then, right, barrier);
                        } else {
                            self.push_cp(Alternative::Rerun {
                                goal: right,
                                barrier,
                            });
                            self.goals.push(Goal::Body {
                                term: left,
                                barrier,
                            });
                        }
                        Ok(true)
                    }
                    (atoms::ARROW, 2) => {
                        let (cond, then) = (args[0], args[1]);
                        self.push_if_then_else(cond, then, Term::FAIL, barrier);
                        Ok(true)
                    }
                    (atoms::NAF, 1) => {
                        let goal = args[0];
                        self.push_if_then_else(goal, Term::FAIL, Term::TRUE, barrier);
                        Ok(true)
                    }
                    (atoms::ONCE, 1) => {
                        let goal = args[0];
                        self.push_if_then_else(goal, Term::TRUE, Term::FAIL, barrier);
                        Ok(true)
                    }
                    (atoms::CALL, 1) => {
                        // cut inside the called goal is local to it
                        let inner = args[0];
                        let local = self.cps.len();
                        self.goals.push(Goal::Body {
                            term: inner,
                            barrier: local,
                        });
                        Ok(true)
                    }
                    (atoms::CATCH, 3) => {
                        let (guarded, catcher, recovery) = (args[0], args[1], args[2]);
                        let frame = self.cps.len();
                        self.push_cp(Alternative::Catch {
                            catcher,
                            recovery,
                            barrier,
                        });
                        self.goals.push(Goal::PopCatch { index: frame });
                        self.goals.push(Goal::Body {
                            term: guarded,
                            barrier: self.cps.len(),
                        });
                        Ok(true)
                    }
                    _ => self.dispatch(term, key, barrier),
                }
            }
            Handle::ListRef(_) | Handle::ListCRef(_) => Err(RuntimeError::Type {
                expected: "callable",
                culprit: term,
            }),
            _ => Err(RuntimeError::Type {
                expected: "callable",
                culprit: term,
            }),
        }
    }

    /// `( Cond -> Then ; Else )`.  The condition runs under its own cut
    /// barrier; its first solution commits by cutting to below the else
    /// alternative, which never disturbs an enclosing disjunction's choice
    /// point.
    fn push_if_then_else(&mut self, cond: Term, then: Term, els: Term, barrier: usize) {
        let below = self.cps.len();
        self.push_cp(Alternative::Rerun {
            goal: els,
            barrier,
        });
        self.goals.push(Goal::Body {
            term: then,
            barrier,
        });
        self.goals.push(Goal::Cut { height: below });
        let local = self.cps.len();
        self.goals.push(Goal::Body {
            term: cond,
            barrier: local,
        });
    }

    fn dispatch(&mut self, goal: Term, key: PredKey, barrier: usize) -> Result<bool, RuntimeError> {
        trace!(
            "call {}/{}",
            self.arena.atom_text(key.0),
            key.1
        );
        let native = match self.db.lookup(key) {
            Some(PredicateEntry::Native(f)) => Some(*f),
            Some(PredicateEntry::Clauses { .. }) => None,
            None => {
                return Err(RuntimeError::Existence {
                    name: self.arena.atom_text(key.0).into(),
                    arity: key.1,
                })
            }
        };
        match native {
            Some(f) => {
                let args: Vec<Term> = match goal.0 {
                    Handle::FuncRef(_) => self
                        .arena
                        .func_args(goal)
                        .map_err(RuntimeError::from)?
                        .to_vec(),
                    _ => Vec::new(),
                };
                f(self, &args).map_err(|e| {
                    let name = self.arena.atom_text(key.0);
                    e.with_context(name, key.1)
                })
            }
            None => {
                let clauses = self.db.snapshot(key).unwrap_or_default();
                self.try_clauses(goal, clauses, 0, barrier)
            }
        }
    }

    /// Tries clause candidates starting at `start`.  A retry choice point
    /// exists only while a further candidate remains; on in-place head
    /// failure it is updated rather than re-created, and it is dropped
    /// before the last candidate runs — last-call optimization falls out of
    /// this discipline.
    fn try_clauses(
        &mut self,
        goal: Term,
        clauses: Vec<Rc<Clause>>,
        start: usize,
        barrier: usize,
    ) -> Result<bool, RuntimeError> {
        let entry_height = self.cps.len();
        let mut idx = start;
        loop {
            if idx >= clauses.len() {
                if self.cps.len() > entry_height {
                    self.cps.pop();
                }
                return Ok(false);
            }
            let has_more = idx + 1 < clauses.len();
            if has_more {
                if self.cps.len() == entry_height {
                    self.push_cp(Alternative::Clauses {
                        goal,
                        clauses: clauses.clone(),
                        next: idx + 1,
                        barrier,
                    });
                } else if let Some(cp) = self.cps.last_mut() {
                    if let Alternative::Clauses { next, .. } = &mut cp.alternative {
                        *next = idx + 1;
                    }
                }
            } else if self.cps.len() > entry_height {
                self.cps.pop();
            }

            let mark = self.trail.mark();
            let clause = &clauses[idx];
            let mut ctx = BindCtx::new(
                &mut self.arena,
                &mut self.trail,
                match self.cps.last() {
                    Some(cp) => cp.var_mark,
                    None => self.query_var_base,
                },
            );
            match clause.activate_head(&mut ctx, goal)? {
                Some(locals) => {
                    let body = clause.body_instance(&mut self.arena, &locals)?;
                    self.goals.push(Goal::Body {
                        term: body,
                        barrier: entry_height,
                    });
                    return Ok(true);
                }
                None => {
                    self.trail.undo_to(&mut self.arena, mark);
                    idx += 1;
                }
            }
        }
    }

    /// Pops choice points until one offers an alternative, restoring the
    /// trail and goal stack recorded by each.
    fn backtrack(&mut self) -> Result<bool, RuntimeError> {
        while let Some(cp) = self.cps.pop() {
            self.trail.undo_to(&mut self.arena, cp.trail_mark);
            match cp.alternative {
                Alternative::Rerun { goal, barrier } => {
                    self.goals = cp.goals;
                    self.goals.push(Goal::Body {
                        term: goal,
                        barrier,
                    });
                    return Ok(true);
                }
                Alternative::Clauses {
                    goal,
                    clauses,
                    next,
                    barrier,
                } => {
                    self.goals = cp.goals;
                    if self.try_clauses(goal, clauses, next, barrier)? {
                        return Ok(true);
                    }
                }
                // catch frames hold no alternative; keep unwinding
                Alternative::Catch { .. } => {}
            }
        }
        Ok(false)
    }

    /// Unwinds to the nearest catch frame whose catcher unifies with the
    /// error's ball term, then schedules its recovery goal.  Errors with no
    /// matching frame propagate out of the query.
    fn dispatch_error(&mut self, err: RuntimeError) -> Result<(), RuntimeError> {
        let mut err = err;
        while let Some(cp) = self.cps.pop() {
            let index = self.cps.len();
            let (catcher, recovery, barrier) = match cp.alternative {
                Alternative::Catch {
                    catcher,
                    recovery,
                    barrier,
                } => (catcher, recovery, barrier),
                _ => continue,
            };
            // a frame guards only the dynamic extent of its goal: the
            // `PopCatch` that retires it is pending in the current goal
            // stack exactly while the guarded goal (or a backtracked
            // re-entry into it) is running.  A frame kept alive past its
            // goal by a clause choice point must not intercept balls
            // thrown from the continuation.
            let guarding = self
                .goals
                .iter()
                .any(|g| matches!(g, Goal::PopCatch { index: i } if *i == index));
            if !guarding {
                continue;
            }
            self.trail.undo_to(&mut self.arena, cp.trail_mark);
            let ball = self.error_ball(&err)?;
            let mark = self.trail.mark();
            // no elision: trail everything, so a failed match is fully undone
            // before the next frame sees the ball
            let mut ctx = BindCtx::new(&mut self.arena, &mut self.trail, usize::MAX);
            if unify(&mut ctx, catcher, ball).map_err(RuntimeError::from)? {
                self.goals = cp.goals;
                self.goals.push(Goal::Body {
                    term: recovery,
                    barrier,
                });
                return Ok(());
            }
            // not this handler's ball; undo the attempt and keep unwinding
            self.trail.undo_to(&mut self.arena, mark);
            err = RuntimeError::Thrown(ball);
        }
        Err(err)
    }

    /// The term form of an error, for unification with a catcher.
    fn error_ball(&mut self, err: &RuntimeError) -> Result<Term, RuntimeError> {
        let (kind_source, context) = match err {
            RuntimeError::Thrown(ball) => return Ok(*ball),
            RuntimeError::Context { name, arity, source } => {
                if let RuntimeError::Thrown(ball) = source.as_ref() {
                    return Ok(*ball);
                }
                let name = self.arena.atom(name.as_str());
                let indicator = self.arena.func("/", [name, Term::int(*arity as i64)]);
                let context = self.arena.func("context", [indicator]);
                (source.as_ref(), context)
            }
            other => (other, self.arena.fresh_var()),
        };
        let kind = self.kind_term(kind_source)?;
        Ok(self.arena.func("error", [kind, context]))
    }

    fn kind_term(&mut self, err: &RuntimeError) -> Result<Term, RuntimeError> {
        let arena = &mut self.arena;
        Ok(match err {
            RuntimeError::Instantiation => arena.atom("instantiation_error"),
            RuntimeError::Type { expected, culprit } => {
                let e = arena.atom(*expected);
                arena.func("type_error", [e, *culprit])
            }
            RuntimeError::Domain { domain, culprit } => {
                let d = arena.atom(*domain);
                arena.func("domain_error", [d, *culprit])
            }
            RuntimeError::Existence { name, arity } => {
                let n = arena.atom(name.as_str());
                let indicator = arena.func("/", [n, Term::int(*arity as i64)]);
                let p = arena.atom("procedure");
                arena.func("existence_error", [p, indicator])
            }
            RuntimeError::Evaluation(what) => {
                let w = arena.atom(*what);
                arena.func("evaluation_error", [w])
            }
            RuntimeError::Permission { action, name, arity } => {
                let a = arena.atom(*action);
                let n = arena.atom(name.as_str());
                let indicator = arena.func("/", [n, Term::int(*arity as i64)]);
                arena.func("permission_error", [a, indicator])
            }
            _ => arena.atom("system_error"),
        })
    }
}

/// Lazy solution stream for one query; see [`Machine::solve`].
pub struct Solutions<'m> {
    machine: &'m mut Machine,
    named: Vec<(String, VarId)>,
    pending: Option<Term>,
    done: bool,
}

impl Solutions<'_> {
    /// The machine's arena, for rendering captured terms.
    pub fn arena(&self) -> &Arena {
        self.machine.arena()
    }

    fn capture(&mut self) -> Result<Solution, RuntimeError> {
        let mut out = Solution::with_capacity(self.named.len());
        for (name, var) in &self.named {
            let value = visit::resolve_deep(self.machine.arena_mut(), Term(Handle::Var(*var)))?;
            out.push((name.clone(), value));
        }
        Ok(out)
    }

    fn finish(&mut self) {
        if !self.done {
            self.done = true;
            self.machine.end_query();
        }
    }
}

impl Iterator for Solutions<'_> {
    type Item = Result<Solution, RuntimeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let outcome = match self.pending.take() {
            Some(goal) => {
                self.machine.begin_query(goal);
                self.machine.run()
            }
            None => match self.machine.backtrack() {
                Ok(true) => self.machine.run(),
                Ok(false) => Ok(false),
                Err(e) => Err(e),
            },
        };
        match outcome {
            Ok(true) => Some(self.capture()),
            Ok(false) => {
                self.finish();
                None
            }
            Err(e) => {
                self.finish();
                Some(Err(e))
            }
        }
    }
}

impl Drop for Solutions<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{atom, func, list};

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn first_binding(solution: &Solution, name: &str) -> Term {
        solution
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| *t)
            .unwrap()
    }

    /// legs/insect: two clauses, one rule, full backtracking.
    fn load_legs(machine: &mut Machine) {
        let arena = machine.arena_mut();
        let a = arena.var("A");
        let head = func!["legs"; a, 6 => arena];
        let body = func!["insect"; a => arena];
        let rule = func![":-"; head, body => arena];
        machine.load(rule).unwrap();
        let arena = machine.arena_mut();
        let horse = func!["legs"; atom!("horse"), 4 => arena];
        machine.load(horse).unwrap();
        for name in ["bee", "ant"] {
            let arena = machine.arena_mut();
            let fact = func!["insect"; atom!(name) => arena];
            machine.load(fact).unwrap();
        }
    }

    #[test]
    fn legs_query_backtracks_through_insects() {
        init_logging();
        let mut machine = Machine::new();
        load_legs(&mut machine);
        let arena = machine.arena_mut();
        let x = arena.var("X");
        let goal = func!["legs"; x, 6 => arena];

        let mut names = Vec::new();
        {
            let mut solutions = machine.solve(goal).unwrap();
            while let Some(solution) = solutions.next() {
                let solution = solution.unwrap();
                let value = first_binding(&solution, "X");
                names.push(value.display(solutions.machine.arena()).to_string());
            }
        }
        assert_eq!(names, vec!["bee", "ant"]);
        // all bindings undone after the query
        assert_eq!(machine.arena.resolve(x), x);
    }

    #[test]
    fn exhausted_query_restores_all_state() {
        init_logging();
        let mut machine = Machine::new();
        load_legs(&mut machine);
        let arena = machine.arena_mut();
        let x = arena.var("X");
        let goal = func!["legs"; x, 3 => arena];
        assert!(!machine.prove(goal).unwrap());
        assert_eq!(machine.arena.resolve(x), x);
        assert!(machine.trail.is_empty());
    }

    #[test]
    fn conjunction_and_disjunction() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let x = arena.var("X");
        // ( X = 1 ; X = 2 ), X = 2
        let left = func!["="; x, 1 => arena];
        let right = func!["="; x, 2 => arena];
        let disj = func![";"; left, right => arena];
        let check = func!["="; x, 2 => arena];
        let goal = func![","; disj, check => arena];

        let results: Vec<_> = machine
            .solve(goal)
            .unwrap()
            .map(|s| first_binding(&s.unwrap(), "X"))
            .collect();
        assert_eq!(results, vec![Term::int(2)]);
    }

    #[test]
    fn cut_commits_without_unbinding() {
        let mut machine = Machine::new();
        // first(X) :- p(X), !.
        for i in [1, 2, 3] {
            let fact = func!["p"; i => machine.arena_mut()];
            machine.load(fact).unwrap();
        }
        let arena = machine.arena_mut();
        let x = arena.var("X");
        let head = func!["first"; x => arena];
        let p = func!["p"; x => arena];
        let body = func![","; p, atom!("!") => arena];
        let rule = func![":-"; head, body => arena];
        machine.load(rule).unwrap();

        let arena = machine.arena_mut();
        let y = arena.var("Y");
        let goal = func!["first"; y => arena];
        let results: Vec<_> = machine
            .solve(goal)
            .unwrap()
            .map(|s| first_binding(&s.unwrap(), "Y"))
            .collect();
        // committed to the first p/1 clause; binding survives the cut
        assert_eq!(results, vec![Term::int(1)]);
    }

    #[test]
    fn if_then_else_takes_one_branch() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let x = arena.var("X");
        // ( 1 = 1 -> X = yes ; X = no )
        let cond = func!["="; 1, 1 => arena];
        let then = func!["="; x, atom!("yes") => arena];
        let els = func!["="; x, atom!("no") => arena];
        let ite = func!["->"; cond, then => arena];
        let goal = func![";"; ite, els => arena];
        let results: Vec<_> = machine
            .solve(goal)
            .unwrap()
            .map(|s| s.unwrap())
            .collect();
        assert_eq!(results.len(), 1);

        let arena = machine.arena_mut();
        let x = arena.var("X");
        let cond = func!["="; 1, 2 => arena];
        let then = func!["="; x, atom!("yes") => arena];
        let els = func!["="; x, atom!("no") => arena];
        let ite = func!["->"; cond, then => arena];
        let goal = func![";"; ite, els => arena];
        let results: Vec<_> = machine
            .solve(goal)
            .unwrap()
            .map(|s| first_binding(&s.unwrap(), "X"))
            .collect();
        let no = machine.arena_mut().atom("no");
        assert_eq!(results, vec![no]);
    }

    #[test]
    fn ite_commit_spares_enclosing_disjunction() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let x = arena.var("X");
        // ( ( 1 = 1 -> X = a ; X = b ) ; X = c )
        let cond = func!["="; 1, 1 => arena];
        let then = func!["="; x, atom!("a") => arena];
        let els = func!["="; x, atom!("b") => arena];
        let ite = func!["->"; cond, then => arena];
        let inner = func![";"; ite, els => arena];
        let outer_else = func!["="; x, atom!("c") => arena];
        let goal = func![";"; inner, outer_else => arena];

        let results: Vec<_> = machine
            .solve(goal)
            .unwrap()
            .map(|s| first_binding(&s.unwrap(), "X"))
            .collect();
        let a = machine.arena_mut().atom("a");
        let c = machine.arena_mut().atom("c");
        // the commit removes only the else branch, not the outer alternative
        assert_eq!(results, vec![a, c]);
    }

    #[test]
    fn negation_as_failure_leaves_no_bindings() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        // \+ fail succeeds, \+ true fails
        let naf = func!["\\+"; atom!("fail") => arena];
        assert!(machine.prove(naf).unwrap());
        let arena = machine.arena_mut();
        let naf = func!["\\+"; atom!("true") => arena];
        assert!(!machine.prove(naf).unwrap());

        // \+ (X = 1) fails and X stays unbound
        let arena = machine.arena_mut();
        let x = arena.var("X");
        let eq = func!["="; x, 1 => arena];
        let naf = func!["\\+"; eq => arena];
        assert!(!machine.prove(naf).unwrap());
        assert_eq!(machine.arena.resolve(x), x);
    }

    #[test]
    fn unknown_predicate_raises_existence_error() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let goal = func!["no_such_pred"; 1 => arena];
        match machine.prove(goal) {
            Err(RuntimeError::Context { source, .. }) => {
                assert!(matches!(*source, RuntimeError::Existence { arity: 1, .. }));
            }
            Err(RuntimeError::Existence { name, arity }) => {
                assert_eq!((name.as_str(), arity), ("no_such_pred", 1));
            }
            other => panic!("expected existence error, got {other:?}"),
        }
    }

    #[test]
    fn catch_intercepts_existence_error() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let goal_in = func!["no_such_pred"; 1 => arena];
        let kind = arena.var("Kind");
        let ctx = arena.fresh_var();
        let catcher = func!["error"; kind, ctx => arena];
        let recovery = atom!("true" => arena);
        let goal = func!["catch"; goal_in, catcher, recovery => arena];

        let mut solutions = machine.solve(goal).unwrap();
        let solution = solutions.next().unwrap().unwrap();
        let bound = first_binding(&solution, "Kind");
        let rendered = bound.display(solutions.machine.arena()).to_string();
        assert_eq!(rendered, "existence_error(procedure,no_such_pred/1)");
    }

    #[test]
    fn catch_rethrows_unmatched_balls() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let ball = atom!("boom" => arena);
        let thrown = func!["throw"; ball => arena];
        let catcher = atom!("other" => arena);
        let recovery = atom!("true" => arena);
        let inner = func!["catch"; thrown, catcher, recovery => arena];
        // outer catch with a matching catcher
        let arena = machine.arena_mut();
        let outer_catcher = atom!("boom" => arena);
        let marker = arena.var("Caught");
        let outer_recovery = func!["="; marker, atom!("yes") => arena];
        let goal = func!["catch"; inner, outer_catcher, outer_recovery => arena];

        let results: Vec<_> = machine
            .solve(goal)
            .unwrap()
            .map(|s| first_binding(&s.unwrap(), "Caught"))
            .collect();
        let yes = machine.arena_mut().atom("yes");
        assert_eq!(results, vec![yes]);
    }

    #[test]
    fn finished_catch_does_not_guard_the_continuation() {
        let mut machine = Machine::new();
        // p/1 leaves a clause choice point behind when its first solution
        // escapes the catch
        for i in [1, 2] {
            let fact = func!["p"; i => machine.arena_mut()];
            machine.load(fact).unwrap();
        }
        let arena = machine.arena_mut();
        let x = arena.var("X");
        let guarded = func!["p"; x => arena];
        let any = arena.fresh_var();
        let caught = func!["catch"; guarded, any, atom!("fail") => arena];
        let thrown = func!["throw"; atom!("boom") => arena];
        let goal = func![","; caught, thrown => arena];
        match machine.prove(goal) {
            Err(RuntimeError::Thrown(ball)) => {
                assert_eq!(ball.display(machine.arena()).to_string(), "boom");
            }
            other => panic!("expected the ball to escape, got {other:?}"),
        }
    }

    #[test]
    fn backtracking_into_the_guard_rearms_the_catch() {
        let mut machine = Machine::new();
        // q(1).  q(2) :- throw(inside).  r(caught).
        let fact = func!["q"; 1 => machine.arena_mut()];
        machine.load(fact).unwrap();
        let arena = machine.arena_mut();
        let head = func!["q"; 2 => arena];
        let body = func!["throw"; atom!("inside") => arena];
        let rule = func![":-"; head, body => arena];
        machine.load(rule).unwrap();
        let fact = func!["r"; atom!("caught") => machine.arena_mut()];
        machine.load(fact).unwrap();

        // catch(q(X), inside, X = caught), r(X): r(1) fails, the retry of
        // q/1 throws from inside the guard, and the frame must still catch
        let arena = machine.arena_mut();
        let x = arena.var("X");
        let guarded = func!["q"; x => arena];
        let recovery = func!["="; x, atom!("caught") => arena];
        let caught = func!["catch"; guarded, atom!("inside"), recovery => arena];
        let check = func!["r"; x => arena];
        let goal = func![","; caught, check => arena];
        let results: Vec<_> = machine
            .solve(goal)
            .unwrap()
            .map(|s| first_binding(&s.unwrap(), "X"))
            .collect();
        let expected = machine.arena_mut().atom("caught");
        assert_eq!(results, vec![expected]);
    }

    #[test]
    fn halt_is_not_catchable() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let halt = func!["halt"; 7 => arena];
        let any = arena.fresh_var();
        let goal = func!["catch"; halt, any, atom!("true") => arena];
        match machine.prove(goal) {
            Err(RuntimeError::Halted(7)) => {}
            other => panic!("expected halt, got {other:?}"),
        }
    }

    #[test]
    fn deterministic_recursion_runs_in_constant_space() {
        init_logging();
        let mut machine = Machine::new();
        // count(0).  count(N) :- N > 0, M is N - 1, count(M).
        let arena = machine.arena_mut();
        let base = func!["count"; 0 => arena];
        machine.load(base).unwrap();
        let arena = machine.arena_mut();
        let n = arena.var("N");
        let m = arena.var("M");
        let head = func!["count"; n => arena];
        let check = func![">"; n, 0 => arena];
        let minus = func!["-"; n, 1 => arena];
        let step = func!["is"; m, minus => arena];
        let rec = func!["count"; m => arena];
        let inner = func![","; step, rec => arena];
        let body = func![","; check, inner => arena];
        let rule = func![":-"; head, body => arena];
        machine.load(rule).unwrap();

        machine.reset_stats();
        let arena = machine.arena_mut();
        let goal = func!["count"; 100_000 => arena];
        assert!(machine.prove(goal).unwrap());
        let stats = machine.stats();
        // bounded stacks regardless of recursion depth
        assert!(stats.max_choice_depth <= 4, "cps high-water {}", stats.max_choice_depth);
        assert!(stats.max_goal_depth <= 32, "goal high-water {}", stats.max_goal_depth);
    }

    #[test]
    fn query_storage_is_reclaimed() {
        let mut machine = Machine::new();
        load_legs(&mut machine);
        let arena = machine.arena_mut();
        let x = arena.var("X");
        let goal = func!["legs"; x, 6 => arena];
        // everything allocated from here on belongs to the query
        let before = machine.arena.stats();
        assert!(machine.prove(goal).unwrap());
        let after = machine.arena.stats();
        assert_eq!(before.terms, after.terms);
        assert_eq!(before.vars, after.vars);
    }

    #[test]
    fn calling_a_variable_is_an_instantiation_error() {
        let mut machine = Machine::new();
        let g = machine.arena_mut().var("G");
        let call = func!["call"; g => machine.arena_mut()];
        assert!(matches!(
            machine.prove(call),
            Err(RuntimeError::Context { .. }) | Err(RuntimeError::Instantiation)
        ));
    }

    #[test]
    fn list_goals_are_type_errors() {
        let mut machine = Machine::new();
        let goal = list![1, 2 => machine.arena_mut()];
        assert!(matches!(
            machine.prove(goal),
            Err(RuntimeError::Type { expected: "callable", .. })
        ));
    }

    #[test]
    fn variable_goal_through_binding_is_called() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let g = arena.var("G");
        // G = true, call(G)
        let bind = func!["="; g, atom!("true") => arena];
        let call = func!["call"; g => arena];
        let goal = func![","; bind, call => arena];
        assert!(machine.prove(goal).unwrap());
    }
}
