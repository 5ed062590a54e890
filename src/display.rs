//! Human-readable term rendering.
//!
//! [`Term::display`] borrows the arena and yields a value implementing
//! [`fmt::Display`].  Bindings are followed while rendering, so displaying a
//! bound variable shows its value.  Atoms are quoted when their name would
//! not read back as an atom; unnamed variables render as `_G<id>`.

use crate::arena::atoms;
use crate::term::Handle;
use crate::view::View;
use crate::{Arena, Term};
use core::fmt;

/// Borrowed rendering wrapper returned by [`Term::display`].
pub struct TermDisplay<'a> {
    arena: &'a Arena,
    term: Term,
}

impl Term {
    /// Renders this term against an arena.
    #[inline]
    pub fn display<'a>(&self, arena: &'a Arena) -> TermDisplay<'a> {
        TermDisplay { arena, term: *self }
    }
}

impl fmt::Display for TermDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_term(f, self.arena, self.term)
    }
}

impl fmt::Debug for TermDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

fn is_symbolic(c: char) -> bool {
    matches!(
        c,
        '+' | '-' | '*' | '/' | '\\' | '^' | '<' | '>' | '=' | '~' | ':' | '.' | '?' | '@' | '#'
            | '&' | '$'
    )
}

fn needs_quotes(name: &str) -> bool {
    match name {
        "[]" | "!" | ";" | "{}" => return false,
        "" => return true,
        _ => {}
    }
    let first = name.chars().next().unwrap_or(' ');
    let alpha =
        first.is_ascii_lowercase() && name.chars().all(|c| c.is_alphanumeric() || c == '_');
    let symbolic = name.chars().all(is_symbolic);
    !(alpha || symbolic)
}

fn fmt_atom(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if needs_quotes(name) {
        write!(f, "'")?;
        for c in name.chars() {
            match c {
                '\'' => write!(f, "\\'")?,
                '\\' => write!(f, "\\\\")?,
                '\n' => write!(f, "\\n")?,
                c => write!(f, "{c}")?,
            }
        }
        write!(f, "'")
    } else {
        write!(f, "{name}")
    }
}

fn fmt_term(f: &mut fmt::Formatter<'_>, arena: &Arena, term: Term) -> fmt::Result {
    let term = arena.resolve(term);
    let view = match term.view(arena) {
        Ok(view) => view,
        Err(_) => return write!(f, "<invalid {:?}>", term),
    };
    match view {
        View::Int(i) => write!(f, "{i}"),
        View::Big(value) => write!(f, "{value}"),
        View::Real(r) => {
            if r.is_finite() && r == r.trunc() {
                write!(f, "{r:.1}")
            } else {
                write!(f, "{r}")
            }
        }
        View::Atom(_, name) => fmt_atom(f, name),
        View::Str(s) => write!(f, "{s:?}"),
        View::Var(id, name) => match name {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "_G{}", id.0),
        },
        View::Func(_, functor, args) => {
            // predicate indicators (error contexts, existence balls) read
            // as Name/Arity
            if functor == atoms::SLASH && args.len() == 2 {
                fmt_term(f, arena, args[0])?;
                write!(f, "/")?;
                return fmt_term(f, arena, args[1]);
            }
            fmt_atom(f, arena.atom_text(functor))?;
            write!(f, "(")?;
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                fmt_term(f, arena, *arg)?;
            }
            write!(f, ")")
        }
        View::Cell(head, tail) => {
            write!(f, "[")?;
            fmt_term(f, arena, head)?;
            let mut rest = arena.resolve(tail);
            loop {
                if rest == Term::NIL {
                    break;
                }
                if matches!(rest.0, Handle::ListRef(_) | Handle::ListCRef(_)) || arena.is_cons(rest)
                {
                    match arena.list_parts(rest) {
                        Ok((h, t)) => {
                            write!(f, ",")?;
                            fmt_term(f, arena, h)?;
                            rest = arena.resolve(t);
                        }
                        Err(_) => break,
                    }
                } else {
                    write!(f, "|")?;
                    fmt_term(f, arena, rest)?;
                    break;
                }
            }
            write!(f, "]")
        }
    }
}
