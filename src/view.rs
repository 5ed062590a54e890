//! Defines [`View`], a borrowed decoded representation of a term, and the
//! standard order of terms.
//!
//! A `View` borrows from the arena (and, for inline strings, from the handle
//! itself), so inspecting a term never copies its payload.  [`compare`]
//! implements the total order used by `compare/3`, `==` and `\==`:
//! variables, then numbers by value, then atoms, then strings, then
//! compounds by arity, functor and arguments.

use crate::term::Handle;
use crate::{Arena, AtomId, Term, TermError, VarId};
use core::cmp::Ordering;
use num_bigint::BigInt;
use num_traits::FromPrimitive;

/// A decoded term, borrowing from the arena.
#[derive(Debug, Clone, PartialEq)]
pub enum View<'a> {
    Int(i64),
    Big(BigInt),
    Real(f64),
    Atom(AtomId, &'a str),
    Str(&'a str),
    Var(VarId, Option<&'a str>),
    /// A compound: the original handle, the functor, and the argument run.
    Func(Term, AtomId, &'a [Term]),
    /// A list cell (either representation): head and tail.
    Cell(Term, Term),
}

impl Term {
    /// Decodes this term, borrowing payloads from the arena.  The handle is
    /// not resolved first; a bound variable views as `View::Var`.
    pub fn view<'a>(&'a self, arena: &'a Arena) -> Result<View<'a>, TermError> {
        match &self.0 {
            Handle::Int(i) => Ok(View::Int(*i)),
            Handle::BigRef(slice) => Ok(View::Big(BigInt::from_signed_bytes_be(
                arena.byte_slice(*slice)?,
            ))),
            Handle::Real(r) => Ok(View::Real(*r)),
            Handle::Atom(id) => Ok(View::Atom(*id, arena.atom_text(*id))),
            Handle::Str(tiny) => Ok(View::Str(tiny.as_str())),
            Handle::StrRef(slice) => {
                let bytes = arena.byte_slice(*slice)?;
                core::str::from_utf8(bytes)
                    .map(View::Str)
                    .map_err(|_| TermError::InvalidTerm(*self))
            }
            Handle::Var(id) => Ok(View::Var(*id, arena.var_name(*id))),
            Handle::FuncRef(slice) => {
                let run = arena.term_slice(*self, *slice)?;
                match run[0].0 {
                    Handle::Atom(functor) => Ok(View::Func(*self, functor, &run[1..])),
                    _ => Err(TermError::InvalidFunctor(run[0])),
                }
            }
            Handle::ListRef(_) | Handle::ListCRef(_) => {
                let (head, tail) = arena.list_parts(*self)?;
                Ok(View::Cell(head, tail))
            }
        }
    }
}

/// Rank of a term in the standard order.  Bound variables rank as what they
/// resolve to; callers pass resolved terms.
fn rank(term: Term) -> u8 {
    match term.0 {
        Handle::Var(_) => 0,
        Handle::Int(_) | Handle::BigRef(_) | Handle::Real(_) => 1,
        Handle::Atom(_) => 2,
        Handle::Str(_) | Handle::StrRef(_) => 3,
        Handle::FuncRef(_) | Handle::ListRef(_) | Handle::ListCRef(_) => 4,
    }
}

fn compare_numbers(arena: &Arena, a: Term, b: Term) -> Result<Ordering, TermError> {
    match (a.0, b.0) {
        (Handle::Int(x), Handle::Int(y)) => Ok(x.cmp(&y)),
        (Handle::Real(x), Handle::Real(y)) => Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal)),
        (Handle::Real(x), _) => {
            let y = arena.big_value(b)?;
            Ok(big_real_cmp(&y, x).reverse())
        }
        (_, Handle::Real(y)) => {
            let x = arena.big_value(a)?;
            Ok(big_real_cmp(&x, y))
        }
        _ => Ok(arena.big_value(a)?.cmp(&arena.big_value(b)?)),
    }
}

/// Compares a big integer against a float by value.
fn big_real_cmp(x: &BigInt, y: f64) -> Ordering {
    if y.is_nan() {
        return Ordering::Greater;
    }
    if y == f64::INFINITY {
        return Ordering::Less;
    }
    if y == f64::NEG_INFINITY {
        return Ordering::Greater;
    }
    // compare against the truncated integer part, then break ties on the
    // fractional remainder
    let yt = BigInt::from_f64(y.trunc()).unwrap_or_default();
    match x.cmp(&yt) {
        Ordering::Equal => {
            let frac = y - y.trunc();
            if frac > 0.0 {
                Ordering::Less
            } else if frac < 0.0 {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        other => other,
    }
}

/// The standard order of terms.  Both inputs are resolved before ranking, so
/// a bound variable orders as its value; unbound variables order among
/// themselves by slot id.  Compound terms order by arity, then functor name,
/// then arguments left to right, with list cells treated as `'.'/2` chains
/// regardless of representation.
pub fn compare(arena: &Arena, a: Term, b: Term) -> Result<Ordering, TermError> {
    let mut stack = vec![(a, b)];
    while let Some((a, b)) = stack.pop() {
        let a = arena.resolve(a);
        let b = arena.resolve(b);
        if a == b {
            continue;
        }
        let (ra, rb) = (rank(a), rank(b));
        if ra != rb {
            return Ok(ra.cmp(&rb));
        }
        let ord = match ra {
            0 => {
                // both unbound
                let (x, y) = (a.var_id(), b.var_id());
                x.cmp(&y)
            }
            1 => compare_numbers(arena, a, b)?,
            2 => {
                let (x, y) = (a.atom_id(), b.atom_id());
                match (x, y) {
                    (Some(x), Some(y)) => arena.atom_text(x).cmp(arena.atom_text(y)),
                    _ => Ordering::Equal,
                }
            }
            3 => match (a.view(arena)?, b.view(arena)?) {
                (View::Str(x), View::Str(y)) => x.cmp(y),
                _ => Ordering::Equal,
            },
            _ => {
                let (fa, na) = arena.functor_arity(a)?;
                let (fb, nb) = arena.functor_arity(b)?;
                match na
                    .cmp(&nb)
                    .then_with(|| arena.atom_text(fa).cmp(arena.atom_text(fb)))
                {
                    Ordering::Equal => {
                        if arena.is_cons(a) {
                            let (ha, ta) = arena.list_parts(a)?;
                            let (hb, tb) = arena.list_parts(b)?;
                            stack.push((ta, tb));
                            stack.push((ha, hb));
                        } else {
                            let xs = arena.func_args(a)?;
                            let ys = arena.func_args(b)?;
                            for (&x, &y) in xs.iter().zip(ys.iter()).rev() {
                                stack.push((x, y));
                            }
                        }
                        continue;
                    }
                    other => other,
                }
            }
        };
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(Ordering::Equal)
}

/// Structural equality under the standard order (`==/2`).
#[inline]
pub fn terms_equal(arena: &Arena, a: Term, b: Term) -> Result<bool, TermError> {
    Ok(compare(arena, a, b)? == Ordering::Equal)
}

/// The atom a comparison order maps to: `<`, `=` or `>` for `compare/3`.
pub(crate) fn order_atom(arena: &mut Arena, ord: Ordering) -> Term {
    match ord {
        Ordering::Less => arena.atom("<"),
        Ordering::Equal => arena.atom("="),
        Ordering::Greater => arena.atom(">"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{atom, func, list, nil};

    #[test]
    fn rank_ordering_across_kinds() {
        let mut arena = Arena::new();
        let v = arena.var("X");
        let n = Term::int(0);
        let a = arena.atom("zzz");
        let s = arena.str("aaa");
        let c = func!["a"; 1 => &mut arena];
        let seq = [v, n, a, s, c];
        for w in seq.windows(2) {
            assert_eq!(compare(&arena, w[0], w[1]).unwrap(), Ordering::Less);
            assert_eq!(compare(&arena, w[1], w[0]).unwrap(), Ordering::Greater);
        }
    }

    #[test]
    fn numbers_compare_by_value() {
        let mut arena = Arena::new();
        let big = BigInt::parse_bytes(b"99999999999999999999999999", 10).unwrap();
        let big_t = arena.big(&big);
        assert_eq!(
            compare(&arena, Term::int(3), Term::real(3.5)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare(&arena, Term::int(i64::MAX), big_t).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare(&arena, big_t, Term::real(1.0e30)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare(&arena, Term::int(2), Term::int(2)).unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn compounds_compare_by_arity_then_functor_then_args() {
        let mut arena = Arena::new();
        let f1 = func!["f"; 1 => &mut arena];
        let g1 = func!["g"; 1 => &mut arena];
        let f2 = func!["f"; 1, 1 => &mut arena];
        let f1b = func!["f"; 2 => &mut arena];
        assert_eq!(compare(&arena, f1, g1).unwrap(), Ordering::Less);
        assert_eq!(compare(&arena, g1, f2).unwrap(), Ordering::Less);
        assert_eq!(compare(&arena, f1, f1b).unwrap(), Ordering::Less);
    }

    #[test]
    fn compact_and_cons_lists_order_identically() {
        let mut arena = Arena::new();
        let compact = list![1, 2 => &mut arena];
        let inner = func!["."; 2, nil!() => &mut arena];
        let chain = func!["."; 1, inner => &mut arena];
        assert_eq!(compare(&arena, compact, chain).unwrap(), Ordering::Equal);
        assert!(terms_equal(&arena, compact, chain).unwrap());
        let shorter = list![1 => &mut arena];
        assert_eq!(compare(&arena, shorter, compact).unwrap(), Ordering::Less);
    }

    #[test]
    fn bound_variables_order_as_their_values() {
        let mut arena = Arena::new();
        let x = arena.var("X");
        arena.bind(x.var_id().unwrap(), Term::int(10));
        assert_eq!(compare(&arena, x, Term::int(10)).unwrap(), Ordering::Equal);
        assert_eq!(compare(&arena, x, Term::int(9)).unwrap(), Ordering::Greater);
    }

    #[test]
    fn unbound_variables_order_by_age() {
        let mut arena = Arena::new();
        let x = arena.var("X");
        let y = arena.var("Y");
        assert_eq!(compare(&arena, x, y).unwrap(), Ordering::Less);
        assert_eq!(compare(&arena, x, x).unwrap(), Ordering::Equal);
    }

    #[test]
    fn view_decodes_compound() {
        let mut arena = Arena::new();
        let t = func!["pair"; atom!("a"), 2 => &mut arena];
        match t.view(&arena).unwrap() {
            View::Func(original, functor, args) => {
                assert_eq!(original, t);
                assert_eq!(arena.atom_text(functor), "pair");
                assert_eq!(args[1], Term::int(2));
            }
            other => panic!("unexpected view: {other:?}"),
        }
    }
}
