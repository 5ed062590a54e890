//! Deep term traversal without host recursion.
//!
//! Terms can be arbitrarily deep (a million-element list is a million nested
//! cells), so every deep operation here runs on an explicit work list.  One
//! engine, [`transform`], backs the three substituting traversals: fresh
//! copies ([`copy_fresh`]), template instantiation ([`instantiate`]) and
//! copy-on-write binding resolution ([`resolve_deep`]).  A per-traversal
//! cache keyed by storage location keeps shared subterms shared, and the
//! copy-on-write rule returns the original handle whenever nothing below it
//! changed.

use crate::term::Handle;
use crate::{Arena, Term, TermError, VarId};
use std::collections::{HashMap, HashSet};

/// How a traversal rewrites variables.
enum Subst<'m> {
    /// Each distinct variable maps to a fresh one, allocated on first sight.
    Fresh(&'m mut HashMap<VarId, Term>),
    /// Mapped variables are replaced; unmapped ones kept as-is.
    Map(&'m HashMap<VarId, Term>),
    /// Bound variables are replaced by what they resolve to; unbound ones
    /// are kept.
    Bindings,
}

enum Task {
    Visit(Term),
    Build {
        original: Term,
        /// functor handle for compounds, `None` for list runs
        functor: Option<Term>,
        argc: usize,
    },
}

/// Cache key: representation tag plus storage location.
type CacheKey = (u8, u32, u32);

fn cache_key(term: Term) -> Option<CacheKey> {
    match term.0 {
        Handle::FuncRef(s) => Some((0, s.index, s.len)),
        Handle::ListRef(s) => Some((1, s.index, s.len)),
        Handle::ListCRef(s) => Some((2, s.index, s.len)),
        _ => None,
    }
}

fn transform(arena: &mut Arena, term: Term, mut subst: Subst<'_>) -> Result<Term, TermError> {
    let mut tasks = vec![Task::Visit(term)];
    let mut values: Vec<Term> = Vec::new();
    let mut cache: HashMap<CacheKey, Term> = HashMap::new();

    while let Some(task) = tasks.pop() {
        match task {
            Task::Visit(t) => {
                let t = arena.resolve(t);
                match t.0 {
                    Handle::Var(id) => {
                        let out = match &mut subst {
                            Subst::Fresh(seen) => match seen.get(&id) {
                                Some(fresh) => *fresh,
                                None => {
                                    let fresh = arena.fresh_var();
                                    seen.insert(id, fresh);
                                    fresh
                                }
                            },
                            Subst::Map(map) => map.get(&id).copied().unwrap_or(t),
                            // already resolved to the tip
                            Subst::Bindings => t,
                        };
                        values.push(out);
                    }
                    Handle::FuncRef(slice) => {
                        if let Some(&hit) = cache.get(&(0, slice.index, slice.len)) {
                            values.push(hit);
                            continue;
                        }
                        let run = arena.term_slice(t, slice)?.to_vec();
                        tasks.push(Task::Build {
                            original: t,
                            functor: Some(run[0]),
                            argc: run.len() - 1,
                        });
                        for &arg in run[1..].iter().rev() {
                            tasks.push(Task::Visit(arg));
                        }
                    }
                    Handle::ListRef(slice) | Handle::ListCRef(slice) => {
                        if let Some(key) = cache_key(t) {
                            if let Some(&hit) = cache.get(&key) {
                                values.push(hit);
                                continue;
                            }
                        }
                        let run = arena.term_slice(t, slice)?.to_vec();
                        tasks.push(Task::Build {
                            original: t,
                            functor: None,
                            argc: run.len(),
                        });
                        for &item in run.iter().rev() {
                            tasks.push(Task::Visit(item));
                        }
                    }
                    _ => values.push(t),
                }
            }
            Task::Build {
                original,
                functor,
                argc,
            } => {
                let base = values.len() - argc;
                let items = &values[base..];
                let out = match original.0 {
                    Handle::FuncRef(slice) => {
                        let changed = {
                            let run = arena.term_slice(original, slice)?;
                            run[1..] != *items
                        };
                        if changed {
                            let items = items.to_vec();
                            let functor = functor.unwrap_or(original);
                            Term(Handle::FuncRef(arena.intern_func(functor, items)))
                        } else {
                            original
                        }
                    }
                    Handle::ListRef(slice) | Handle::ListCRef(slice) => {
                        let changed = {
                            let run = arena.term_slice(original, slice)?;
                            run != items
                        };
                        if changed {
                            // both run layouts are a plain contiguous run
                            let items = items.to_vec();
                            let new = arena.intern_seq(items);
                            match original.0 {
                                Handle::ListRef(_) => Term(Handle::ListRef(new)),
                                _ => Term(Handle::ListCRef(new)),
                            }
                        } else {
                            original
                        }
                    }
                    _ => original,
                };
                values.truncate(base);
                if let Some(key) = cache_key(original) {
                    cache.insert(key, out);
                }
                values.push(out);
            }
        }
    }
    debug_assert_eq!(values.len(), 1);
    values.pop().ok_or(TermError::InvalidTerm(term))
}

/// A structure-preserving copy with every distinct variable replaced by a
/// fresh one (`copy_term/2`).  Bound variables copy as their values; shared
/// subterms stay shared in the copy.
pub fn copy_fresh(arena: &mut Arena, term: Term) -> Result<Term, TermError> {
    let mut seen = HashMap::new();
    transform(arena, term, Subst::Fresh(&mut seen))
}

/// Rewrites `term` with the given variable substitution, keeping unmapped
/// variables.  Used to activate clause bodies (template variable to fresh
/// variable) and to materialize write-mode bindings during head unification.
pub(crate) fn instantiate(
    arena: &mut Arena,
    term: Term,
    map: &HashMap<VarId, Term>,
) -> Result<Term, TermError> {
    transform(arena, term, Subst::Map(map))
}

/// Substitutes current bindings throughout `term`, copy-on-write: when
/// nothing below a subterm is bound, the original handle is returned and no
/// storage is allocated.
pub fn resolve_deep(arena: &mut Arena, term: Term) -> Result<Term, TermError> {
    transform(arena, term, Subst::Bindings)
}

/// The distinct unbound variables of `term`, in first-occurrence order
/// (left-to-right, depth-first).
pub fn variables(arena: &Arena, term: Term) -> Result<Vec<VarId>, TermError> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![term];
    while let Some(t) = stack.pop() {
        let t = arena.resolve(t);
        match t.0 {
            Handle::Var(id) => {
                if seen.insert(id) {
                    out.push(id);
                }
            }
            Handle::FuncRef(slice) => {
                let run = arena.term_slice(t, slice)?;
                for &arg in run[1..].iter().rev() {
                    stack.push(arg);
                }
            }
            Handle::ListRef(slice) | Handle::ListCRef(slice) => {
                let run = arena.term_slice(t, slice)?;
                for &item in run.iter().rev() {
                    stack.push(item);
                }
            }
            _ => {}
        }
    }
    Ok(out)
}

/// Whether `term` contains no unbound variables.
pub fn is_ground(arena: &Arena, term: Term) -> Result<bool, TermError> {
    let mut stack = vec![term];
    while let Some(t) = stack.pop() {
        let t = arena.resolve(t);
        match t.0 {
            Handle::Var(_) => return Ok(false),
            Handle::FuncRef(slice) => {
                stack.extend_from_slice(&arena.term_slice(t, slice)?[1..]);
            }
            Handle::ListRef(slice) | Handle::ListCRef(slice) => {
                stack.extend_from_slice(arena.term_slice(t, slice)?);
            }
            _ => {}
        }
    }
    Ok(true)
}
