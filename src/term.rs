//! Defines the core [`Term`] type and related constructors.
//!
//! Provides a compact representation for Prolog terms and basic utilities for
//! creating and inspecting them.  A term is a 16-byte copyable handle; all
//! variable-length data (long strings, big integers, compound argument runs)
//! lives in the [`Arena`].

use crate::{Arena, AtomId, TermError, VarId};
use core::fmt;
use num_bigint::BigInt;
use smartstring::alias::String;
use std::borrow::Cow;

// The internal representation is a tagged enum rather than a packed integer.
// Each variant carries its payload directly: a 64 bit value for numbers, a
// small inline buffer for short strings, or an index/length pair into the
// arena for everything else.

#[derive(Debug, Copy, Clone, PartialEq, PartialOrd)]
pub(crate) struct TinyArray {
    pub(crate) bytes: [u8; 14],
    pub(crate) len: u8,
}

impl TinyArray {
    #[inline]
    pub(crate) fn as_str(&self) -> &str {
        // Only ever constructed from valid UTF-8 prefixes.
        unsafe { core::str::from_utf8_unchecked(&self.bytes[..self.len as usize]) }
    }
}

/// An index/length pair into one of the arena's stores.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd)]
pub(crate) struct Slice {
    pub(crate) index: u32,
    pub(crate) len: u32,
}

/// Internal handle describing the kind of a term and storing its data.
///
/// `repr(u8)` keeps the discriminant in a single byte, which together with
/// the payloads yields a `Term` size of 16 bytes on 64-bit targets.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd)]
#[repr(u8)]
pub(crate) enum Handle {
    Int(i64),
    /// Integer too large for `i64`; signed big-endian bytes in the arena.
    BigRef(Slice),
    Real(f64),
    /// Interned atom; compares by id.
    Atom(AtomId),
    Str(TinyArray),
    StrRef(Slice),
    /// A variable slot in the arena.
    Var(VarId),
    /// Compound term: functor atom followed by the arguments.
    FuncRef(Slice),
    /// Proper list stored as a flat run of elements (tail is nil).
    ListRef(Slice),
    /// Improper list: a flat run of elements plus an explicit tail term.
    ListCRef(Slice),
}

/// A compact, copyable handle referencing a term stored in an [`Arena`].
///
/// Internally a `Term` stores a single tagged payload; on 64-bit targets the
/// whole handle occupies 16 bytes.  Users should never construct `Term`
/// values directly; instead use the associated constructors, the [`Arena`]
/// methods, or the convenience macros.  Handle equality (`==` on `Term`) is
/// identity at the storage level: atoms and variables compare by id, inline
/// numbers by value, and compounds by arena location.  Structural comparison
/// goes through [`crate::view::compare`].
#[derive(Copy, Clone, PartialEq, PartialOrd)]
pub struct Term(pub(crate) Handle);

impl AsRef<Term> for Term {
    fn as_ref(&self) -> &Self {
        self
    }
}

macro_rules! impl_from_integers_for_term {
    ($($t:ty),* $(,)?) => {$(
        impl From<$t> for Term {
            #[inline]
            fn from(v: $t) -> Self { Term::int(v as i64) }
        }
    )*};
}
impl_from_integers_for_term!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! impl_from_floats_for_term {
    ($($t:ty),* $(,)?) => {$(
        impl From<$t> for Term {
            #[inline]
            fn from(v: $t) -> Self { Term::real(v as f64) }
        }
    )*};
}
impl_from_floats_for_term!(f32, f64);

/// Conversion of a value into a [`Term`] allocated in a given arena.
pub trait IntoTerm {
    fn into_term(self, arena: &mut Arena) -> Term;
}

macro_rules! impl_intoterm_for_integers {
    ($($t:ty),* $(,)?) => {$(
        impl IntoTerm for $t {
            #[inline]
            fn into_term(self, _arena: &mut Arena) -> Term { Term::int(self as i64) }
        }
    )*};
}
impl_intoterm_for_integers!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! impl_intoterm_for_floats {
    ($($t:ty),* $(,)?) => {$(
        impl IntoTerm for $t {
            #[inline]
            fn into_term(self, _arena: &mut Arena) -> Term { Term::real(self as f64) }
        }
    )*};
}
impl_intoterm_for_floats!(f32, f64);

impl<'a> IntoTerm for &'a str {
    #[inline]
    fn into_term(self, arena: &mut Arena) -> Term {
        Term::str(arena, self)
    }
}

impl<'a> IntoTerm for Cow<'a, str> {
    #[inline]
    fn into_term(self, arena: &mut Arena) -> Term {
        Term::str(arena, self.as_ref())
    }
}

impl IntoTerm for String {
    #[inline]
    fn into_term(self, arena: &mut Arena) -> Term {
        Term::str(arena, &self)
    }
}

impl IntoTerm for std::string::String {
    #[inline]
    fn into_term(self, arena: &mut Arena) -> Term {
        Term::str(arena, &self)
    }
}

impl IntoTerm for BigInt {
    #[inline]
    fn into_term(self, arena: &mut Arena) -> Term {
        Term::big(arena, &self)
    }
}

impl IntoTerm for Term {
    #[inline]
    fn into_term(self, _arena: &mut Arena) -> Term {
        self
    }
}

impl IntoTerm for &Term {
    #[inline]
    fn into_term(self, _arena: &mut Arena) -> Term {
        *self
    }
}

impl<F> IntoTerm for F
where
    F: FnOnce(&mut Arena) -> Term,
{
    #[inline]
    fn into_term(self, arena: &mut Arena) -> Term {
        self(arena)
    }
}

impl Term {
    /// Construct a new integer term.  The full 64 bit two's complement
    /// representation of `i` is stored in the payload.
    #[inline]
    pub fn int(i: impl Into<i64>) -> Self {
        Self(Handle::Int(i.into()))
    }

    /// Construct a new floating point term.  The full 64 bit IEEE-754 bit
    /// pattern is stored in the payload without truncation.
    #[inline]
    pub fn real(f: impl Into<f64>) -> Self {
        Self(Handle::Real(f.into()))
    }

    /// Construct an integer term of arbitrary precision.  Values that fit in
    /// `i64` are stored inline (the canonical form, so equal values always
    /// compare equal); larger values are interned in the arena as signed
    /// big-endian bytes.
    #[inline]
    pub fn big(arena: &mut Arena, value: &BigInt) -> Self {
        match i64::try_from(value) {
            Ok(i) => Self::int(i),
            Err(_) => Self(Handle::BigRef(
                arena.intern_bytes(&value.to_signed_bytes_be()),
            )),
        }
    }

    /// Intern an atom and produce a term referencing it.  Atoms are interned
    /// once per runtime; two atoms with the same name always carry the same
    /// id and compare equal by handle.
    #[inline]
    pub fn atom(arena: &mut Arena, name: impl AsRef<str>) -> Self {
        Self(Handle::Atom(arena.intern_atom(name.as_ref())))
    }

    /// Allocate a fresh named variable slot.  Every call produces a distinct
    /// variable: variables have identity, not value semantics, and their ids
    /// increase monotonically for the lifetime of the arena.
    #[inline]
    pub fn var(arena: &mut Arena, name: impl AsRef<str>) -> Self {
        Self(Handle::Var(arena.new_var(Some(name.as_ref()))))
    }

    /// Construct or intern a UTF-8 string term.  Strings of at most 14 bytes
    /// are inlined directly into the handle; longer strings are interned in
    /// the arena and referenced by index and length.
    #[inline]
    pub fn str(arena: &mut Arena, s: impl AsRef<str>) -> Self {
        let s = s.as_ref();
        let bytes = s.as_bytes();
        if bytes.len() <= 14 {
            let mut buf = [0u8; 14];
            buf[..bytes.len()].copy_from_slice(bytes);
            Self(Handle::Str(TinyArray {
                bytes: buf,
                len: bytes.len() as u8,
            }))
        } else {
            Self(Handle::StrRef(arena.intern_str(s)))
        }
    }

    /// Construct a new compound term by interning the functor and arguments
    /// in the arena.  The stored slice consists of the functor atom followed
    /// by the argument handles.  A functor of arity zero yields the atom.
    #[inline]
    pub fn func(
        arena: &mut Arena,
        functor: impl AsRef<str>,
        args: impl IntoIterator<Item = impl IntoTerm>,
    ) -> Self {
        let functor_atom = Self::atom(arena, functor);
        let mut args = args.into_iter();
        let Some(first) = args.next() else {
            return functor_atom;
        };
        Self(Handle::FuncRef(arena.intern_func(
            functor_atom,
            std::iter::once(first).chain(args),
        )))
    }

    /// Construct a compound term from a sequence of terms, functor first.
    /// A lone functor yields the atom itself.  Errors if no functor is
    /// provided or if the first term is not an atom.
    #[inline]
    pub fn funcv(
        arena: &mut Arena,
        terms: impl IntoIterator<Item = impl IntoTerm>,
    ) -> Result<Self, TermError> {
        let mut terms = terms.into_iter();
        let Some(functor_atom) = terms.next() else {
            return Err(TermError::MissingFunctor);
        };
        let functor_atom = functor_atom.into_term(arena);
        if !functor_atom.is_atom() {
            return Err(TermError::InvalidFunctor(functor_atom));
        }
        let Some(first) = terms.next() else {
            return Ok(functor_atom);
        };
        Ok(Self(Handle::FuncRef(arena.intern_func(
            functor_atom,
            std::iter::once(first).chain(terms),
        ))))
    }

    /// Constructs a new proper list as a flat run of elements.  If `terms`
    /// is empty, returns nil.  The compact form exposes the same `'.'/2`
    /// contract as an explicit cons chain; generic code cannot tell them
    /// apart except by allocation count.
    #[inline]
    pub fn list(arena: &mut Arena, terms: impl IntoIterator<Item = impl IntoTerm>) -> Self {
        let mut terms = terms.into_iter();
        let Some(first) = terms.next() else {
            return Self::NIL;
        };
        Self(Handle::ListRef(
            arena.intern_seq(std::iter::once(first).chain(terms)),
        ))
    }

    /// Constructs a partial list: a flat run of elements plus a tail term
    /// (typically a variable).  A nil tail degrades to the proper-list form;
    /// an empty run yields the tail itself.
    #[inline]
    pub fn listc(
        arena: &mut Arena,
        terms: impl IntoIterator<Item = impl IntoTerm>,
        tail: impl IntoTerm,
    ) -> Self {
        let mut terms = terms.into_iter();
        let Some(first) = terms.next() else {
            return tail.into_term(arena);
        };
        let tail = tail.into_term(arena);
        if tail == Term::NIL {
            Self(Handle::ListRef(
                arena.intern_seq(std::iter::once(first).chain(terms)),
            ))
        } else {
            Self(Handle::ListCRef(arena.intern_seq_plus_one(
                std::iter::once(first).chain(terms),
                tail,
            )))
        }
    }

    /// The empty list, `[]`.  Pre-interned at a fixed atom id, so this is a
    /// free constant independent of any particular arena instance.
    pub const NIL: Self = Self(Handle::Atom(crate::arena::atoms::NIL));

    /// The atom `true`.
    pub const TRUE: Self = Self(Handle::Atom(crate::arena::atoms::TRUE));

    /// The atom `fail`.
    pub const FAIL: Self = Self(Handle::Atom(crate::arena::atoms::FAIL));

    /// The cut atom, `!`.
    pub const CUT: Self = Self(Handle::Atom(crate::arena::atoms::CUT));

    /// Returns `true` if the term is a compound (including list cells).
    #[inline]
    pub fn is_compound(&self) -> bool {
        matches!(
            self.0,
            Handle::FuncRef(_) | Handle::ListRef(_) | Handle::ListCRef(_)
        )
    }

    /// Returns `true` if the term is a list cell or nil.
    #[inline]
    pub fn is_list(&self) -> bool {
        matches!(self.0, Handle::ListRef(_) | Handle::ListCRef(_)) || *self == Self::NIL
    }

    /// Returns `true` if the term is an integer (inline or big).
    #[inline]
    pub fn is_int(&self) -> bool {
        matches!(self.0, Handle::Int(_) | Handle::BigRef(_))
    }

    /// Returns `true` if the term is a floating-point number.
    #[inline]
    pub fn is_real(&self) -> bool {
        matches!(self.0, Handle::Real(_))
    }

    /// Returns `true` if the term is an atom.
    #[inline]
    pub fn is_atom(&self) -> bool {
        matches!(self.0, Handle::Atom(_))
    }

    /// Returns `true` if the term is a variable.  Note that a bound variable
    /// is still a variable at the handle level; resolve first if you need to
    /// know what it stands for.
    #[inline]
    pub fn is_var(&self) -> bool {
        matches!(self.0, Handle::Var(_))
    }

    /// Returns `true` if the term is a number (integer or real).
    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self.0, Handle::Int(_) | Handle::BigRef(_) | Handle::Real(_))
    }

    /// Returns `true` if the term is a string.
    #[inline]
    pub fn is_str(&self) -> bool {
        matches!(self.0, Handle::Str(_) | Handle::StrRef(_))
    }

    /// Returns `true` if the term is atomic (not a variable, not a compound).
    #[inline]
    pub fn is_atomic(&self) -> bool {
        !self.is_var() && !self.is_compound()
    }

    /// Returns the atom id if the term is an atom.
    #[inline]
    pub fn atom_id(&self) -> Option<AtomId> {
        match self.0 {
            Handle::Atom(id) => Some(id),
            _ => None,
        }
    }

    /// Returns the variable id if the term is a variable.
    #[inline]
    pub fn var_id(&self) -> Option<VarId> {
        match self.0 {
            Handle::Var(id) => Some(id),
            _ => None,
        }
    }

    /// Returns the arity of the term: argument count for compounds, 2 for
    /// list cells (the `'.'/2` contract), 0 for everything else.
    #[inline]
    pub fn arity(&self) -> usize {
        match &self.0 {
            Handle::FuncRef(Slice { len: n, .. }) => (n - 1) as usize,
            Handle::ListRef(_) | Handle::ListCRef(_) => 2,
            _ => 0,
        }
    }

    /// Returns a string describing the kind of this term.
    #[inline]
    pub fn kind_name(&self) -> &'static str {
        match &self.0 {
            Handle::Int(_) | Handle::BigRef(_) => "int",
            Handle::Real(_) => "real",
            Handle::Atom(_) => "atom",
            Handle::Str(_) | Handle::StrRef(_) => "str",
            Handle::Var(_) => "var",
            Handle::FuncRef(_) => "func",
            Handle::ListRef(_) | Handle::ListCRef(_) => "list",
        }
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Handle::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Handle::BigRef(s) => f
                .debug_struct("Big")
                .field("index", &s.index)
                .field("len", &s.len)
                .finish(),
            Handle::Real(r) => f.debug_tuple("Real").field(r).finish(),
            Handle::Atom(id) => f.debug_tuple("Atom").field(&id.0).finish(),
            Handle::Str(s) => f.debug_struct("Str").field("value", &s.as_str()).finish(),
            Handle::StrRef(s) => f
                .debug_struct("StrRef")
                .field("index", &s.index)
                .field("len", &s.len)
                .finish(),
            Handle::Var(id) => f.debug_tuple("Var").field(&id.0).finish(),
            Handle::FuncRef(s) => f
                .debug_struct("Func")
                .field("index", &s.index)
                .field("len", &s.len)
                .finish(),
            Handle::ListRef(s) => f
                .debug_struct("List")
                .field("index", &s.index)
                .field("len", &s.len)
                .finish(),
            Handle::ListCRef(s) => f
                .debug_struct("ListC")
                .field("index", &s.index)
                .field("len", &s.len)
                .finish(),
        }
    }
}

/// Convenience macros to construct compound terms, lists, atoms and variables.
#[macro_export]
macro_rules! list {
    // with tail, explicit arena
    ($($arg:expr),* $(,)?; $tail:expr => $arena:expr) => {
        $crate::list!($($arg),* ; $tail)($arena)
    };
    // without tail, explicit arena
    ($($arg:expr),* $(,)? => $arena:expr) => {
        $crate::list!($($arg),*)($arena)
    };
    // with tail, implicit arena
    ($($arg:expr),* $(,)?; $tail:expr) => { (|__arena: &mut $crate::Arena| {
        let __args: &[$crate::Term] = &[$($crate::IntoTerm::into_term($arg, __arena)),*];
        let __tail: $crate::Term = $crate::IntoTerm::into_term($tail, __arena);
        __arena.listc(__args, __tail)
    })};
    // without tail, implicit arena
    ($($arg:expr),* $(,)?) => { (|__arena: &mut $crate::Arena| {
        let __args: &[$crate::Term] = &[$($crate::IntoTerm::into_term($arg, __arena)),*];
        __arena.list(__args)
    })};
}

#[macro_export]
macro_rules! func {
    // explicit arena
    ($functor:expr; $($arg:expr),+ $(,)? => $arena:expr) => {
        $crate::func!($functor; $($arg),+)($arena)
    };
    // implicit arena
    ($functor:expr; $($arg:expr),+ $(,)?) => { (|__arena: &mut $crate::Arena| {
        let __args: &[$crate::Term] = &[$($crate::IntoTerm::into_term($arg, __arena)),+];
        __arena.func($functor, __args)
    })};
}

#[macro_export]
macro_rules! atom {
    // explicit arena
    ($name:expr => $arena:expr) => {
        $crate::atom!($name)($arena)
    };
    // implicit arena
    ($name:expr) => {
        (|__arena: &mut $crate::Arena| __arena.atom($name))
    };
}

#[macro_export]
macro_rules! var {
    // explicit arena
    ($name:expr => $arena:expr) => {
        $crate::var!($name)($arena)
    };
    // implicit arena
    ($name:expr) => {
        (|__arena: &mut $crate::Arena| __arena.var($name))
    };
}

#[macro_export]
macro_rules! nil {
    () => {
        $crate::Term::NIL
    };
}
