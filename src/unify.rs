//! Unification: the binding context, the general term unifier, and compiled
//! unification programs for clause heads.
//!
//! A clause head is compiled once, at assert time, into a flat sequence of
//! [`Step`]s executed against the caller's goal term.  The counterpart side
//! is pulled through an [`ArgIter`], which walks generic compounds and
//! compact list cells behind one interface, so neither representation is
//! normalized into the other.  Nested structures in tail position replace
//! the current iterator instead of stacking a new one, which keeps the
//! iterator stack O(1) on right-deep patterns such as long list heads.
//!
//! Unification never raises on mismatch; `Ok(false)` means failure, to be
//! answered by backtracking.  Errors are reserved for broken storage.

use crate::arena::VarId;
use crate::term::Handle;
use crate::trail::Trail;
use crate::view::View;
use crate::{visit, Arena, AtomId, Term, TermError};
use std::collections::HashMap;

/// The context in which bindings are made: the arena, the undo trail, and
/// the variable floor for trail elision.
///
/// `var_floor` is the variable watermark of the newest choice point (or of
/// query entry when none is live).  A binding of a variable at or above the
/// floor is not trailed: the variable did not exist when the choice point
/// was created, so no resumption can observe it, and the slot is reclaimed
/// wholesale when the stores are truncated.
pub struct BindCtx<'a> {
    pub arena: &'a mut Arena,
    pub trail: &'a mut Trail,
    pub var_floor: usize,
}

impl<'a> BindCtx<'a> {
    pub fn new(arena: &'a mut Arena, trail: &'a mut Trail, var_floor: usize) -> Self {
        Self {
            arena,
            trail,
            var_floor,
        }
    }

    /// Binds an unbound variable, trailing it unless elision applies.
    #[inline]
    pub fn bind(&mut self, var: VarId, value: Term) {
        self.arena.bind(var, value);
        if (var.0 as usize) < self.var_floor {
            self.trail.push(var);
        }
    }

    /// Unifies two unbound variables: both are bound to one fresh variable,
    /// with an independent trail entry each, so undoing either binding alone
    /// cannot leave a stale link.
    #[inline]
    fn bind_coref(&mut self, x: VarId, y: VarId) {
        let z = self.arena.fresh_var();
        let z_id = match z.var_id() {
            Some(id) => id,
            None => return,
        };
        debug_assert!(self.arena.binding(z_id).is_none());
        self.bind(x, z);
        self.bind(y, z);
    }
}

/// Value equality for atomic terms under unification: numbers of the same
/// class by value, atoms by id, strings by content.  An integer never
/// unifies with a float.
fn atomic_eq(arena: &Arena, a: Term, b: Term) -> Result<bool, TermError> {
    match (a.0, b.0) {
        (Handle::Int(x), Handle::Int(y)) => Ok(x == y),
        (Handle::Int(_) | Handle::BigRef(_), Handle::Int(_) | Handle::BigRef(_)) => {
            Ok(arena.big_value(a)? == arena.big_value(b)?)
        }
        (Handle::Real(x), Handle::Real(y)) => Ok(x == y),
        (Handle::Atom(x), Handle::Atom(y)) => Ok(x == y),
        (Handle::Str(_) | Handle::StrRef(_), Handle::Str(_) | Handle::StrRef(_)) => {
            match (a.view(arena)?, b.view(arena)?) {
                (View::Str(x), View::Str(y)) => Ok(x == y),
                _ => Ok(false),
            }
        }
        _ => Ok(false),
    }
}

/// General symmetric unification of two terms, with an explicit pair stack
/// so deep structures cannot overflow the host stack.
pub fn unify(ctx: &mut BindCtx<'_>, a: Term, b: Term) -> Result<bool, TermError> {
    let mut stack = vec![(a, b)];
    while let Some((a, b)) = stack.pop() {
        let a = ctx.arena.resolve(a);
        let b = ctx.arena.resolve(b);
        if a == b {
            continue;
        }
        match (a.var_id(), b.var_id()) {
            (Some(x), Some(y)) => ctx.bind_coref(x, y),
            (Some(x), None) => ctx.bind(x, b),
            (None, Some(y)) => ctx.bind(y, a),
            (None, None) => {
                let a_cons = ctx.arena.is_cons(a);
                let b_cons = ctx.arena.is_cons(b);
                if a_cons && b_cons {
                    let (ha, ta) = ctx.arena.list_parts(a)?;
                    let (hb, tb) = ctx.arena.list_parts(b)?;
                    stack.push((ta, tb));
                    stack.push((ha, hb));
                } else if a.is_compound() && b.is_compound() && !a_cons && !b_cons {
                    if ctx.arena.functor_arity(a)? != ctx.arena.functor_arity(b)? {
                        return Ok(false);
                    }
                    let xs = ctx.arena.func_args(a)?;
                    let ys = ctx.arena.func_args(b)?;
                    let pairs: Vec<(Term, Term)> =
                        xs.iter().copied().zip(ys.iter().copied()).collect();
                    for pair in pairs.into_iter().rev() {
                        stack.push(pair);
                    }
                } else if a.is_atomic() && b.is_atomic() {
                    if !atomic_eq(ctx.arena, a, b)? {
                        return Ok(false);
                    }
                } else {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

/// Pull iterator over the counterpart side of a compiled unification.
enum ArgIter {
    /// The goal term itself, consumed by the program's root step.
    Single { term: Term, done: bool },
    /// Arguments of a generic compound.
    Args { term: Term, pos: u32, len: u32 },
    /// Head then tail of a list cell, either representation.
    Cell { term: Term, pos: u32 },
}

impl ArgIter {
    fn single(term: Term) -> Self {
        ArgIter::Single { term, done: false }
    }

    fn over(arena: &Arena, term: Term) -> Result<Self, TermError> {
        if arena.is_cons(term) {
            Ok(ArgIter::Cell { term, pos: 0 })
        } else {
            let (_, arity) = arena.functor_arity(term)?;
            Ok(ArgIter::Args {
                term,
                pos: 0,
                len: arity,
            })
        }
    }

    fn is_done(&self) -> bool {
        match self {
            ArgIter::Single { done, .. } => *done,
            ArgIter::Args { pos, len, .. } => pos >= len,
            ArgIter::Cell { pos, .. } => *pos >= 2,
        }
    }

    fn next(&mut self, arena: &Arena) -> Result<Term, TermError> {
        match self {
            ArgIter::Single { term, done } => {
                debug_assert!(!*done);
                *done = true;
                Ok(*term)
            }
            ArgIter::Args { term, pos, .. } => {
                let arg = arena.func_args(*term)?[*pos as usize];
                *pos += 1;
                Ok(arg)
            }
            ArgIter::Cell { term, pos } => {
                let (head, tail) = arena.list_parts(*term)?;
                let out = if *pos == 0 { head } else { tail };
                *pos += 1;
                Ok(out)
            }
        }
    }
}

/// One instruction of a compiled unification program, in prefix order.
#[derive(Debug, Clone)]
enum Step {
    /// Atomic pattern leaf: bind an unbound counterpart or compare values.
    Const(Term),
    /// Pattern variable k: general-unify the activation's k-th local.
    Local(u32),
    /// Nested compound: check functor/arity and descend, or instantiate the
    /// pattern subtree when the counterpart is unbound (`skip` steps cover
    /// the subtree).  `tail` marks last-argument position: the exhausted
    /// parent iterator is replaced instead of stacked on.
    Compound {
        functor: AtomId,
        arity: u32,
        pattern: Term,
        skip: u32,
        tail: bool,
    },
    /// List cell: accepts either compact runs or `'.'/2` compounds without
    /// materializing a functor.
    Cell {
        pattern: Term,
        skip: u32,
        tail: bool,
    },
}

/// A unification program compiled from a pattern term (a clause head).
///
/// `vars` lists the pattern's distinct variables in first-occurrence order;
/// at activation the caller supplies one fresh "local" term per entry.
pub(crate) struct Unifier {
    steps: Vec<Step>,
    vars: Vec<VarId>,
}

enum CompileTask {
    Node { term: Term, tail: bool },
    Patch(usize),
}

impl Unifier {
    /// Compiles `pattern` against the variable list `vars` (which must
    /// contain every variable occurring in the pattern).
    pub(crate) fn compile(arena: &Arena, pattern: Term, vars: &[VarId]) -> Result<Self, TermError> {
        let index: HashMap<VarId, u32> = vars
            .iter()
            .enumerate()
            .map(|(k, &v)| (v, k as u32))
            .collect();
        let mut steps = Vec::new();
        let mut stack = vec![CompileTask::Node {
            term: pattern,
            tail: true,
        }];
        while let Some(task) = stack.pop() {
            match task {
                CompileTask::Patch(at) => {
                    let skip = (steps.len() - at - 1) as u32;
                    match &mut steps[at] {
                        Step::Compound { skip: s, .. } | Step::Cell { skip: s, .. } => *s = skip,
                        _ => unreachable!("patch target is always a descend step"),
                    }
                }
                CompileTask::Node { term, tail } => {
                    let term = arena.resolve(term);
                    if let Some(id) = term.var_id() {
                        let k = index
                            .get(&id)
                            .copied()
                            .ok_or(TermError::InvalidTerm(term))?;
                        steps.push(Step::Local(k));
                    } else if arena.is_cons(term) {
                        let (head, rest) = arena.list_parts(term)?;
                        steps.push(Step::Cell {
                            pattern: term,
                            skip: 0,
                            tail,
                        });
                        stack.push(CompileTask::Patch(steps.len() - 1));
                        stack.push(CompileTask::Node {
                            term: rest,
                            tail: true,
                        });
                        stack.push(CompileTask::Node {
                            term: head,
                            tail: false,
                        });
                    } else if term.is_compound() {
                        let (functor, arity) = arena.functor_arity(term)?;
                        steps.push(Step::Compound {
                            functor,
                            arity,
                            pattern: term,
                            skip: 0,
                            tail,
                        });
                        stack.push(CompileTask::Patch(steps.len() - 1));
                        let args = arena.func_args(term)?;
                        for (i, &arg) in args.iter().enumerate().rev() {
                            stack.push(CompileTask::Node {
                                term: arg,
                                tail: i + 1 == args.len(),
                            });
                        }
                    } else {
                        steps.push(Step::Const(term));
                    }
                }
            }
        }
        Ok(Self {
            steps,
            vars: vars.to_vec(),
        })
    }

    /// Runs the program against `goal`.  `locals` supplies the activation's
    /// fresh variables, one per entry of the compiled variable list.
    pub(crate) fn run(
        &self,
        ctx: &mut BindCtx<'_>,
        goal: Term,
        locals: &[Term],
    ) -> Result<bool, TermError> {
        debug_assert_eq!(locals.len(), self.vars.len());
        let mut iters = vec![ArgIter::single(goal)];
        let mut locals_map: Option<HashMap<VarId, Term>> = None;
        let mut pc = 0;
        while pc < self.steps.len() {
            while iters.last().is_some_and(ArgIter::is_done) {
                iters.pop();
            }
            let top = iters.last_mut().ok_or(TermError::InvalidTerm(goal))?;
            let counterpart = top.next(ctx.arena)?;
            let counterpart = ctx.arena.resolve(counterpart);
            match &self.steps[pc] {
                Step::Const(pattern) => {
                    if let Some(id) = counterpart.var_id() {
                        ctx.bind(id, *pattern);
                    } else if !atomic_eq(ctx.arena, *pattern, counterpart)? {
                        return Ok(false);
                    }
                }
                Step::Local(k) => {
                    if !unify(ctx, locals[*k as usize], counterpart)? {
                        return Ok(false);
                    }
                }
                Step::Compound {
                    functor,
                    arity,
                    pattern,
                    skip,
                    tail,
                } => {
                    if let Some(id) = counterpart.var_id() {
                        let image = self.write_out(ctx, *pattern, locals, &mut locals_map)?;
                        ctx.bind(id, image);
                        pc += *skip as usize;
                    } else if matches!(counterpart.0, Handle::FuncRef(_))
                        && ctx.arena.functor_arity(counterpart)? == (*functor, *arity)
                    {
                        if *tail {
                            let done = iters.pop();
                            debug_assert!(done.is_some_and(|it| it.is_done()));
                        }
                        iters.push(ArgIter::over(ctx.arena, counterpart)?);
                    } else {
                        return Ok(false);
                    }
                }
                Step::Cell {
                    pattern,
                    skip,
                    tail,
                } => {
                    if let Some(id) = counterpart.var_id() {
                        let image = self.write_out(ctx, *pattern, locals, &mut locals_map)?;
                        ctx.bind(id, image);
                        pc += *skip as usize;
                    } else if ctx.arena.is_cons(counterpart) {
                        if *tail {
                            let done = iters.pop();
                            debug_assert!(done.is_some_and(|it| it.is_done()));
                        }
                        iters.push(ArgIter::Cell {
                            term: counterpart,
                            pos: 0,
                        });
                    } else {
                        return Ok(false);
                    }
                }
            }
            pc += 1;
        }
        Ok(true)
    }

    /// Write mode: the counterpart is unbound, so the pattern subtree is
    /// materialized with the activation's locals substituted for pattern
    /// variables, then bound as a whole.
    fn write_out(
        &self,
        ctx: &mut BindCtx<'_>,
        pattern: Term,
        locals: &[Term],
        cache: &mut Option<HashMap<VarId, Term>>,
    ) -> Result<Term, TermError> {
        let map = cache.get_or_insert_with(|| {
            self.vars
                .iter()
                .copied()
                .zip(locals.iter().copied())
                .collect()
        });
        visit::instantiate(ctx.arena, pattern, map)
    }
}
