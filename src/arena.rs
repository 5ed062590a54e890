//! Defines the [`Arena`] that owns all variable-length term data.
//!
//! The arena holds four stores: the atom table (interned names with stable
//! ids), the byte store (long strings, big-integer digits), the term store
//! (compound argument runs and list element runs), and the variable slots.
//! Terms are 16-byte handles into these stores; see [`crate::Term`].
//!
//! All stores grow monotonically while a query runs.  [`Arena::mark`] /
//! [`Arena::truncate`] give the engine a watermark to reclaim everything a
//! finished top-level query allocated.

use crate::term::{Handle, Slice};
use crate::{Term, TermError};
use indexmap::IndexSet;
use num_bigint::BigInt;
use smartstring::alias::String;

/// Identifier of an interned atom.  Equal names always yield equal ids for
/// the lifetime of the arena, so atom equality is a single integer compare.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AtomId(pub(crate) u32);

/// Identifier of a variable slot.  Ids increase monotonically with
/// allocation order, which the binding trail relies on for its elision rule.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub(crate) u32);

/// Atoms interned at fixed ids by [`Arena::new`], in table order.  Keeping
/// them at known positions lets `Term::NIL` and friends be consts and lets
/// the engine match control constructs without table lookups.
pub(crate) mod atoms {
    use super::AtomId;

    pub(crate) const NIL: AtomId = AtomId(0);
    pub(crate) const DOT: AtomId = AtomId(1);
    pub(crate) const COMMA: AtomId = AtomId(2);
    pub(crate) const SEMICOLON: AtomId = AtomId(3);
    pub(crate) const ARROW: AtomId = AtomId(4);
    pub(crate) const NECK: AtomId = AtomId(5);
    pub(crate) const CUT: AtomId = AtomId(6);
    pub(crate) const TRUE: AtomId = AtomId(7);
    pub(crate) const FAIL: AtomId = AtomId(8);
    pub(crate) const FALSE: AtomId = AtomId(9);
    pub(crate) const CALL: AtomId = AtomId(10);
    pub(crate) const ONCE: AtomId = AtomId(11);
    pub(crate) const NAF: AtomId = AtomId(12);
    pub(crate) const CATCH: AtomId = AtomId(13);
    pub(crate) const THROW: AtomId = AtomId(14);
    pub(crate) const ERROR: AtomId = AtomId(15);
    pub(crate) const CONTEXT: AtomId = AtomId(16);
    pub(crate) const SLASH: AtomId = AtomId(17);

    /// Names in id order; `Arena::new` interns these first.
    pub(crate) const NAMES: &[&str] = &[
        "[]", ".", ",", ";", "->", ":-", "!", "true", "fail", "false", "call", "once", "\\+",
        "catch", "throw", "error", "context", "/",
    ];
}

/// One variable: an optional display name and the current binding.  A slot
/// is bound at most once between trail resets; rebinding goes through
/// undo-then-bind, never overwrite.
#[derive(Debug, Clone, Default)]
pub(crate) struct VarSlot {
    pub(crate) name: Option<String>,
    pub(crate) value: Option<Term>,
}

/// A watermark over all four stores, taken at query entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Mark {
    atoms: usize,
    bytes: usize,
    terms: usize,
    vars: usize,
}

/// Store sizes, for diagnostics and capacity assertions in tests.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Stats {
    pub atoms: usize,
    pub bytes: usize,
    pub terms: usize,
    pub vars: usize,
}

/// The backing store for terms.
///
/// Interning is append-only; handles produced by an arena are valid until a
/// [`truncate`](Arena::truncate) cuts the stores back past their position.
pub struct Arena {
    atoms: IndexSet<String>,
    bytes: Vec<u8>,
    terms: Vec<Term>,
    vars: Vec<VarSlot>,
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena {
    /// Creates an arena with the well-known atoms pre-interned at their
    /// fixed ids.
    pub fn new() -> Self {
        let mut atoms = IndexSet::with_capacity(64);
        for name in atoms::NAMES {
            atoms.insert(String::from(*name));
        }
        debug_assert_eq!(atoms.get_index_of("[]"), Some(atoms::NIL.0 as usize));
        debug_assert_eq!(atoms.get_index_of("/"), Some(atoms::SLASH.0 as usize));
        Self {
            atoms,
            bytes: Vec::new(),
            terms: Vec::new(),
            vars: Vec::new(),
        }
    }

    /// Current sizes of the four stores.
    pub fn stats(&self) -> Stats {
        Stats {
            atoms: self.atoms.len(),
            bytes: self.bytes.len(),
            terms: self.terms.len(),
            vars: self.vars.len(),
        }
    }

    // ---- atom table ----

    /// Interns `name`, returning its stable id.
    pub fn intern_atom(&mut self, name: &str) -> AtomId {
        if let Some(index) = self.atoms.get_index_of(name) {
            return AtomId(index as u32);
        }
        let (index, _) = self.atoms.insert_full(String::from(name));
        AtomId(index as u32)
    }

    /// The text of an interned atom.
    ///
    /// # Panics
    /// Panics if `id` was not produced by this arena.
    pub fn atom_text(&self, id: AtomId) -> &str {
        self.atoms
            .get_index(id.0 as usize)
            .map(|s| s.as_str())
            .unwrap_or_else(|| panic!("unknown atom id {}", id.0))
    }

    // ---- variable slots ----

    /// Allocates a fresh variable slot.
    pub(crate) fn new_var(&mut self, name: Option<&str>) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(VarSlot {
            name: name.map(String::from),
            value: None,
        });
        id
    }

    /// Number of variable slots allocated so far.  Also the id the next
    /// allocation will receive, which is what choice points record as their
    /// variable watermark.
    #[inline]
    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    /// The display name of a variable, if it was given one.
    pub fn var_name(&self, id: VarId) -> Option<&str> {
        self.vars
            .get(id.0 as usize)
            .and_then(|slot| slot.name.as_deref())
    }

    #[inline]
    pub(crate) fn binding(&self, id: VarId) -> Option<Term> {
        self.vars.get(id.0 as usize).and_then(|slot| slot.value)
    }

    /// Assigns an unbound slot.  Callers resolve first; binding over an
    /// existing value would break undo.
    #[inline]
    pub(crate) fn bind(&mut self, id: VarId, value: Term) {
        let slot = &mut self.vars[id.0 as usize];
        debug_assert!(slot.value.is_none(), "rebinding variable _{}", id.0);
        slot.value = Some(value);
    }

    #[inline]
    pub(crate) fn unbind(&mut self, id: VarId) {
        if let Some(slot) = self.vars.get_mut(id.0 as usize) {
            slot.value = None;
        }
    }

    /// Follows a binding chain to its tip: an unbound variable or a
    /// non-variable term.  Shallow; does not descend into compounds.
    #[inline]
    pub fn resolve(&self, term: Term) -> Term {
        let mut term = term;
        while let Handle::Var(id) = term.0 {
            match self.binding(id) {
                Some(next) => term = next,
                None => break,
            }
        }
        term
    }

    // ---- interning ----

    pub(crate) fn intern_bytes(&mut self, data: &[u8]) -> Slice {
        let index = self.bytes.len() as u32;
        self.bytes.extend_from_slice(data);
        Slice {
            index,
            len: data.len() as u32,
        }
    }

    pub(crate) fn intern_str(&mut self, s: &str) -> Slice {
        self.intern_bytes(s.as_bytes())
    }

    pub(crate) fn byte_slice(&self, slice: Slice) -> Result<&[u8], TermError> {
        self.bytes
            .get(slice.index as usize..(slice.index + slice.len) as usize)
            .ok_or(TermError::InvalidTerm(Term(Handle::StrRef(slice))))
    }

    /// Interns a compound: functor atom followed by the arguments, as one
    /// contiguous run.  Arguments are materialized first so their own
    /// allocations cannot interleave with the run.
    pub(crate) fn intern_func(
        &mut self,
        functor: Term,
        args: impl IntoIterator<Item = impl crate::IntoTerm>,
    ) -> Slice {
        let items: Vec<Term> = args.into_iter().map(|a| a.into_term(self)).collect();
        let index = self.terms.len() as u32;
        self.terms.push(functor);
        self.terms.extend_from_slice(&items);
        Slice {
            index,
            len: 1 + items.len() as u32,
        }
    }

    /// Interns a plain run of terms (list elements).
    pub(crate) fn intern_seq(
        &mut self,
        terms: impl IntoIterator<Item = impl crate::IntoTerm>,
    ) -> Slice {
        let items: Vec<Term> = terms.into_iter().map(|a| a.into_term(self)).collect();
        let index = self.terms.len() as u32;
        self.terms.extend_from_slice(&items);
        Slice {
            index,
            len: items.len() as u32,
        }
    }

    /// Interns a run of terms followed by one extra term (a partial list's
    /// elements plus its tail).
    pub(crate) fn intern_seq_plus_one(
        &mut self,
        terms: impl IntoIterator<Item = impl crate::IntoTerm>,
        last: Term,
    ) -> Slice {
        let items: Vec<Term> = terms.into_iter().map(|a| a.into_term(self)).collect();
        let index = self.terms.len() as u32;
        self.terms.extend_from_slice(&items);
        self.terms.push(last);
        Slice {
            index,
            len: items.len() as u32 + 1,
        }
    }

    pub(crate) fn term_slice(&self, term: Term, slice: Slice) -> Result<&[Term], TermError> {
        self.terms
            .get(slice.index as usize..(slice.index + slice.len) as usize)
            .ok_or(TermError::InvalidTerm(term))
    }

    /// Decodes a big integer term back into its value.
    pub fn big_value(&self, term: Term) -> Result<BigInt, TermError> {
        match term.0 {
            Handle::Int(i) => Ok(BigInt::from(i)),
            Handle::BigRef(slice) => Ok(BigInt::from_signed_bytes_be(self.byte_slice(slice)?)),
            _ => Err(TermError::UnexpectedKind {
                expected: "int",
                found: term.kind_name(),
            }),
        }
    }

    // ---- structural accessors ----

    /// Functor id and arity of a callable term: atoms are arity 0, list
    /// cells are `'.'/2`.  Variables and non-callable terms are rejected.
    pub fn functor_arity(&self, term: Term) -> Result<(AtomId, u32), TermError> {
        match term.0 {
            Handle::Atom(id) => Ok((id, 0)),
            Handle::FuncRef(slice) => {
                let run = self.term_slice(term, slice)?;
                match run[0].0 {
                    Handle::Atom(id) => Ok((id, slice.len - 1)),
                    _ => Err(TermError::InvalidFunctor(run[0])),
                }
            }
            Handle::ListRef(_) | Handle::ListCRef(_) => Ok((atoms::DOT, 2)),
            _ => Err(TermError::UnexpectedKind {
                expected: "callable",
                found: term.kind_name(),
            }),
        }
    }

    /// Arguments of a compound.  Only meaningful for `FuncRef`; list cells
    /// go through [`list_parts`](Arena::list_parts).
    pub(crate) fn func_args(&self, term: Term) -> Result<&[Term], TermError> {
        match term.0 {
            Handle::FuncRef(slice) => Ok(&self.term_slice(term, slice)?[1..]),
            _ => Err(TermError::UnexpectedKind {
                expected: "func",
                found: term.kind_name(),
            }),
        }
    }

    /// Head and tail of a list cell, in O(1) and without copying: the tail
    /// of a compact run is a sub-slice handle over the same storage.  Also
    /// accepts a generic `'.'/2` compound, so callers see one contract for
    /// both representations.
    pub fn list_parts(&self, term: Term) -> Result<(Term, Term), TermError> {
        match term.0 {
            Handle::ListRef(slice) => {
                let run = self.term_slice(term, slice)?;
                let head = run[0];
                let tail = if slice.len == 1 {
                    Term::NIL
                } else {
                    Term(Handle::ListRef(Slice {
                        index: slice.index + 1,
                        len: slice.len - 1,
                    }))
                };
                Ok((head, tail))
            }
            Handle::ListCRef(slice) => {
                // run = elements then the explicit tail; len >= 2.
                let run = self.term_slice(term, slice)?;
                let head = run[0];
                let tail = if slice.len == 2 {
                    run[1]
                } else {
                    Term(Handle::ListCRef(Slice {
                        index: slice.index + 1,
                        len: slice.len - 1,
                    }))
                };
                Ok((head, tail))
            }
            Handle::FuncRef(slice) if slice.len == 3 => {
                let run = self.term_slice(term, slice)?;
                if run[0].atom_id() == Some(atoms::DOT) {
                    Ok((run[1], run[2]))
                } else {
                    Err(TermError::UnexpectedKind {
                        expected: "list",
                        found: term.kind_name(),
                    })
                }
            }
            _ => Err(TermError::UnexpectedKind {
                expected: "list",
                found: term.kind_name(),
            }),
        }
    }

    /// Returns `true` for anything the engine treats as a `'.'/2` cell.
    pub(crate) fn is_cons(&self, term: Term) -> bool {
        match term.0 {
            Handle::ListRef(_) | Handle::ListCRef(_) => true,
            Handle::FuncRef(_) => matches!(
                self.functor_arity(term),
                Ok((atoms::DOT, 2))
            ),
            _ => false,
        }
    }

    // ---- convenience constructors (macro targets) ----

    #[inline]
    pub fn atom(&mut self, name: impl AsRef<str>) -> Term {
        Term::atom(self, name)
    }

    #[inline]
    pub fn var(&mut self, name: impl AsRef<str>) -> Term {
        Term::var(self, name)
    }

    /// A fresh unnamed variable, as introduced by co-reference unification
    /// and clause activation.
    #[inline]
    pub fn fresh_var(&mut self) -> Term {
        Term(Handle::Var(self.new_var(None)))
    }

    #[inline]
    pub fn str(&mut self, s: impl AsRef<str>) -> Term {
        Term::str(self, s)
    }

    #[inline]
    pub fn big(&mut self, value: &BigInt) -> Term {
        Term::big(self, value)
    }

    #[inline]
    pub fn func(
        &mut self,
        functor: impl AsRef<str>,
        args: impl IntoIterator<Item = impl crate::IntoTerm>,
    ) -> Term {
        Term::func(self, functor, args)
    }

    #[inline]
    pub fn list(&mut self, terms: impl IntoIterator<Item = impl crate::IntoTerm>) -> Term {
        Term::list(self, terms)
    }

    #[inline]
    pub fn listc(
        &mut self,
        terms: impl IntoIterator<Item = impl crate::IntoTerm>,
        tail: impl crate::IntoTerm,
    ) -> Term {
        Term::listc(self, terms, tail)
    }

    // ---- watermarks ----

    /// Records the current size of every store.
    pub fn mark(&self) -> Mark {
        Mark {
            atoms: self.atoms.len(),
            bytes: self.bytes.len(),
            terms: self.terms.len(),
            vars: self.vars.len(),
        }
    }

    /// Cuts all stores back to `mark`, invalidating every handle allocated
    /// since.  Safe only between top-level queries, once the trail has been
    /// fully undone; the engine is the sole caller.
    pub fn truncate(&mut self, mark: Mark) {
        self.atoms.truncate(mark.atoms);
        self.bytes.truncate(mark.bytes);
        self.terms.truncate(mark.terms);
        self.vars.truncate(mark.vars);
    }
}

impl core::fmt::Debug for Arena {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Arena")
            .field("atoms", &self.atoms.len())
            .field("bytes", &self.bytes.len())
            .field("terms", &self.terms.len())
            .field("vars", &self.vars.len())
            .finish()
    }
}
