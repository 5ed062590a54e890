//! The core native predicates.
//!
//! Builtins are ordinary database entries backed by Rust callbacks.  They
//! are clients of the core: they resolve and unify through the machine's
//! binding context and raise [`RuntimeError`]s, never reaching into engine
//! internals.  `Ok(false)` is a plain failure answered by backtracking.

use crate::machine::Machine;
use crate::term::Handle;
use crate::unify::{unify, BindCtx};
use crate::view::{compare, order_atom, terms_equal};
use crate::{visit, Arena, RuntimeError, Term};
use core::cmp::Ordering;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

type NativeResult = Result<bool, RuntimeError>;

/// Registers every core builtin into a fresh machine's database.
pub(crate) fn register(machine: &mut Machine) {
    let table: &[(&str, u32, crate::database::NativeFn)] = &[
        ("=", 2, bi_unify),
        ("\\=", 2, bi_not_unifiable),
        ("==", 2, bi_struct_eq),
        ("\\==", 2, bi_struct_neq),
        ("compare", 3, bi_compare),
        ("var", 1, bi_var),
        ("nonvar", 1, bi_nonvar),
        ("atom", 1, bi_atom),
        ("number", 1, bi_number),
        ("atomic", 1, bi_atomic),
        ("compound", 1, bi_compound),
        ("is_list", 1, bi_is_list),
        ("copy_term", 2, bi_copy_term),
        ("functor", 3, bi_functor),
        ("arg", 3, bi_arg),
        ("=..", 2, bi_univ),
        ("is", 2, bi_is),
        ("=:=", 2, bi_arith_eq),
        ("=\\=", 2, bi_arith_neq),
        ("<", 2, bi_arith_lt),
        (">", 2, bi_arith_gt),
        ("=<", 2, bi_arith_le),
        (">=", 2, bi_arith_ge),
        ("asserta", 1, bi_asserta),
        ("assertz", 1, bi_assertz),
        ("retract", 1, bi_retract),
        ("throw", 1, bi_throw),
        ("halt", 0, bi_halt0),
        ("halt", 1, bi_halt1),
    ];
    for (name, arity, f) in table {
        machine.db.register_native(&mut machine.arena, name, *arity, *f);
    }
}

// ---- unification ----

fn bi_unify(m: &mut Machine, args: &[Term]) -> NativeResult {
    let mut ctx = m.bind_ctx();
    Ok(unify(&mut ctx, args[0], args[1])?)
}

/// `\=`: a speculative unification that must leave no trace either way, so
/// every binding is trailed (no elision) and undone.
fn bi_not_unifiable(m: &mut Machine, args: &[Term]) -> NativeResult {
    let mark = m.trail.mark();
    let mut ctx = BindCtx::new(&mut m.arena, &mut m.trail, usize::MAX);
    let unifiable = unify(&mut ctx, args[0], args[1])?;
    m.trail.undo_to(&mut m.arena, mark);
    Ok(!unifiable)
}

// ---- structural comparison ----

fn bi_struct_eq(m: &mut Machine, args: &[Term]) -> NativeResult {
    Ok(terms_equal(&m.arena, args[0], args[1])?)
}

fn bi_struct_neq(m: &mut Machine, args: &[Term]) -> NativeResult {
    Ok(!terms_equal(&m.arena, args[0], args[1])?)
}

fn bi_compare(m: &mut Machine, args: &[Term]) -> NativeResult {
    let ord = compare(&m.arena, args[1], args[2])?;
    let order = order_atom(&mut m.arena, ord);
    let mut ctx = m.bind_ctx();
    Ok(unify(&mut ctx, args[0], order)?)
}

// ---- type tests ----

fn bi_var(m: &mut Machine, args: &[Term]) -> NativeResult {
    Ok(m.arena.resolve(args[0]).is_var())
}

fn bi_nonvar(m: &mut Machine, args: &[Term]) -> NativeResult {
    Ok(!m.arena.resolve(args[0]).is_var())
}

fn bi_atom(m: &mut Machine, args: &[Term]) -> NativeResult {
    Ok(m.arena.resolve(args[0]).is_atom())
}

fn bi_number(m: &mut Machine, args: &[Term]) -> NativeResult {
    Ok(m.arena.resolve(args[0]).is_number())
}

fn bi_atomic(m: &mut Machine, args: &[Term]) -> NativeResult {
    Ok(m.arena.resolve(args[0]).is_atomic())
}

fn bi_compound(m: &mut Machine, args: &[Term]) -> NativeResult {
    Ok(m.arena.resolve(args[0]).is_compound())
}

fn bi_is_list(m: &mut Machine, args: &[Term]) -> NativeResult {
    let mut t = m.arena.resolve(args[0]);
    loop {
        if t == Term::NIL {
            return Ok(true);
        }
        if !m.arena.is_cons(t) {
            return Ok(false);
        }
        let (_, tail) = m.arena.list_parts(t)?;
        t = m.arena.resolve(tail);
    }
}

// ---- term construction and inspection ----

fn bi_copy_term(m: &mut Machine, args: &[Term]) -> NativeResult {
    let copy = visit::copy_fresh(&mut m.arena, args[0])?;
    let mut ctx = m.bind_ctx();
    Ok(unify(&mut ctx, copy, args[1])?)
}

fn bi_functor(m: &mut Machine, args: &[Term]) -> NativeResult {
    let t = m.arena.resolve(args[0]);
    if !t.is_var() {
        let (name, arity) = if t.is_compound() {
            let (f, n) = m.arena.functor_arity(t)?;
            (Term(Handle::Atom(f)), n as i64)
        } else {
            (t, 0)
        };
        let mut ctx = m.bind_ctx();
        if !unify(&mut ctx, args[1], name)? {
            return Ok(false);
        }
        let mut ctx = m.bind_ctx();
        return Ok(unify(&mut ctx, args[2], Term::int(arity))?);
    }

    let name = m.arena.resolve(args[1]);
    let arity = m.arena.resolve(args[2]);
    if name.is_var() || arity.is_var() {
        return Err(RuntimeError::Instantiation);
    }
    let n = match arity.0 {
        Handle::Int(n) if n >= 0 => n,
        Handle::Int(_) => {
            return Err(RuntimeError::Domain {
                domain: "not_less_than_zero",
                culprit: arity,
            })
        }
        _ => {
            return Err(RuntimeError::Type {
                expected: "integer",
                culprit: arity,
            })
        }
    };
    let image = if n == 0 {
        if name.is_compound() {
            return Err(RuntimeError::Type {
                expected: "atomic",
                culprit: name,
            });
        }
        name
    } else {
        let functor = name.atom_id().ok_or(RuntimeError::Type {
            expected: "atom",
            culprit: name,
        })?;
        let fresh: Vec<Term> = (0..n).map(|_| m.arena.fresh_var()).collect();
        Term(Handle::FuncRef(
            m.arena.intern_func(Term(Handle::Atom(functor)), fresh),
        ))
    };
    let mut ctx = m.bind_ctx();
    Ok(unify(&mut ctx, t, image)?)
}

fn bi_arg(m: &mut Machine, args: &[Term]) -> NativeResult {
    let index = m.arena.resolve(args[0]);
    let t = m.arena.resolve(args[1]);
    if index.is_var() || t.is_var() {
        return Err(RuntimeError::Instantiation);
    }
    let n = match index.0 {
        Handle::Int(n) => n,
        _ => {
            return Err(RuntimeError::Type {
                expected: "integer",
                culprit: index,
            })
        }
    };
    if !t.is_compound() {
        return Err(RuntimeError::Type {
            expected: "compound",
            culprit: t,
        });
    }
    if n < 0 {
        return Err(RuntimeError::Domain {
            domain: "not_less_than_zero",
            culprit: index,
        });
    }
    let selected = if m.arena.is_cons(t) {
        let (head, tail) = m.arena.list_parts(t)?;
        match n {
            1 => head,
            2 => tail,
            _ => return Ok(false),
        }
    } else {
        let slots = m.arena.func_args(t)?;
        match usize::try_from(n) {
            Ok(i) if (1..=slots.len()).contains(&i) => slots[i - 1],
            _ => return Ok(false),
        }
    };
    let mut ctx = m.bind_ctx();
    Ok(unify(&mut ctx, args[2], selected)?)
}

/// `=..`: decompose or construct.  The construction side requires a proper
/// list starting with an atom (or a singleton atomic term).
fn bi_univ(m: &mut Machine, args: &[Term]) -> NativeResult {
    let t = m.arena.resolve(args[0]);
    if !t.is_var() {
        let items: Vec<Term> = if m.arena.is_cons(t) {
            let (head, tail) = m.arena.list_parts(t)?;
            vec![m.arena.atom("."), head, tail]
        } else if t.is_compound() {
            let (f, _) = m.arena.functor_arity(t)?;
            let mut items = vec![Term(Handle::Atom(f))];
            items.extend_from_slice(m.arena.func_args(t)?);
            items
        } else {
            vec![t]
        };
        let image = m.arena.list(items);
        let mut ctx = m.bind_ctx();
        return Ok(unify(&mut ctx, args[1], image)?);
    }

    let mut items = Vec::new();
    let mut rest = m.arena.resolve(args[1]);
    loop {
        if rest == Term::NIL {
            break;
        }
        if rest.is_var() {
            return Err(RuntimeError::Instantiation);
        }
        if !m.arena.is_cons(rest) {
            return Err(RuntimeError::Type {
                expected: "list",
                culprit: rest,
            });
        }
        let (head, tail) = m.arena.list_parts(rest)?;
        items.push(m.arena.resolve(head));
        rest = m.arena.resolve(tail);
    }
    let Some((&first, rest_items)) = items.split_first() else {
        return Err(RuntimeError::Domain {
            domain: "non_empty_list",
            culprit: args[1],
        });
    };
    let image = if rest_items.is_empty() {
        if first.is_compound() || first.is_var() {
            return Err(RuntimeError::Type {
                expected: "atomic",
                culprit: first,
            });
        }
        first
    } else {
        let functor = first.atom_id().ok_or(RuntimeError::Type {
            expected: "atom",
            culprit: first,
        })?;
        let rest_items = rest_items.to_vec();
        Term(Handle::FuncRef(
            m.arena.intern_func(Term(Handle::Atom(functor)), rest_items),
        ))
    };
    let mut ctx = m.bind_ctx();
    Ok(unify(&mut ctx, t, image)?)
}

// ---- arithmetic ----

/// An evaluated number.  Integers promote from `i64` to big on overflow
/// and normalize back when a result fits.
#[derive(Debug, Clone)]
enum Num {
    Int(i64),
    Big(BigInt),
    Real(f64),
}

impl Num {
    fn from_big(value: BigInt) -> Self {
        match i64::try_from(&value) {
            Ok(i) => Num::Int(i),
            Err(_) => Num::Big(value),
        }
    }

    fn to_term(&self, arena: &mut Arena) -> Term {
        match self {
            Num::Int(i) => Term::int(*i),
            Num::Big(b) => Term::big(arena, b),
            Num::Real(r) => Term::real(*r),
        }
    }

    fn is_real(&self) -> bool {
        matches!(self, Num::Real(_))
    }

    fn as_f64(&self) -> f64 {
        match self {
            Num::Int(i) => *i as f64,
            Num::Big(b) => b.to_f64().unwrap_or(f64::NAN),
            Num::Real(r) => *r,
        }
    }

    fn as_big(&self) -> BigInt {
        match self {
            Num::Int(i) => BigInt::from(*i),
            Num::Big(b) => b.clone(),
            Num::Real(_) => BigInt::zero(),
        }
    }
}

fn num_add(a: Num, b: Num) -> Num {
    match (&a, &b) {
        (Num::Int(x), Num::Int(y)) => match x.checked_add(*y) {
            Some(s) => Num::Int(s),
            None => Num::from_big(BigInt::from(*x) + BigInt::from(*y)),
        },
        _ if a.is_real() || b.is_real() => Num::Real(a.as_f64() + b.as_f64()),
        _ => Num::from_big(a.as_big() + b.as_big()),
    }
}

fn num_sub(a: Num, b: Num) -> Num {
    match (&a, &b) {
        (Num::Int(x), Num::Int(y)) => match x.checked_sub(*y) {
            Some(d) => Num::Int(d),
            None => Num::from_big(BigInt::from(*x) - BigInt::from(*y)),
        },
        _ if a.is_real() || b.is_real() => Num::Real(a.as_f64() - b.as_f64()),
        _ => Num::from_big(a.as_big() - b.as_big()),
    }
}

fn num_mul(a: Num, b: Num) -> Num {
    match (&a, &b) {
        (Num::Int(x), Num::Int(y)) => match x.checked_mul(*y) {
            Some(p) => Num::Int(p),
            None => Num::from_big(BigInt::from(*x) * BigInt::from(*y)),
        },
        _ if a.is_real() || b.is_real() => Num::Real(a.as_f64() * b.as_f64()),
        _ => Num::from_big(a.as_big() * b.as_big()),
    }
}

fn num_neg(a: Num) -> Num {
    match a {
        Num::Int(i) => match i.checked_neg() {
            Some(n) => Num::Int(n),
            None => Num::from_big(-BigInt::from(i)),
        },
        Num::Big(b) => Num::from_big(-b),
        Num::Real(r) => Num::Real(-r),
    }
}

fn check_nonzero(b: &Num) -> Result<(), RuntimeError> {
    let zero = match b {
        Num::Int(i) => *i == 0,
        Num::Big(b) => b.is_zero(),
        Num::Real(r) => *r == 0.0,
    };
    if zero {
        Err(RuntimeError::Evaluation("zero_divisor"))
    } else {
        Ok(())
    }
}

fn integer_expected(a: &Num, b: &Num) -> RuntimeError {
    let culprit = if a.is_real() { a } else { b };
    RuntimeError::Type {
        expected: "integer",
        culprit: Term::real(culprit.as_f64()),
    }
}

/// `/`: exact integer quotient when the operands are integers and divide
/// evenly; a float otherwise.
fn num_div(a: Num, b: Num) -> Result<Num, RuntimeError> {
    check_nonzero(&b)?;
    if a.is_real() || b.is_real() {
        return Ok(Num::Real(a.as_f64() / b.as_f64()));
    }
    let (x, y) = (a.as_big(), b.as_big());
    if (&x % &y).is_zero() {
        Ok(Num::from_big(x / y))
    } else {
        Ok(Num::Real(a.as_f64() / b.as_f64()))
    }
}

fn num_idiv(a: Num, b: Num) -> Result<Num, RuntimeError> {
    check_nonzero(&b)?;
    match (&a, &b) {
        (Num::Real(_), _) | (_, Num::Real(_)) => Err(integer_expected(&a, &b)),
        (Num::Int(x), Num::Int(y)) => match x.checked_div(*y) {
            Some(q) => Ok(Num::Int(q)),
            None => Ok(Num::from_big(BigInt::from(*x) / BigInt::from(*y))),
        },
        _ => Ok(Num::from_big(a.as_big() / b.as_big())),
    }
}

/// `mod`: result takes the sign of the divisor.
fn num_mod(a: Num, b: Num) -> Result<Num, RuntimeError> {
    check_nonzero(&b)?;
    match (&a, &b) {
        (Num::Real(_), _) | (_, Num::Real(_)) => Err(integer_expected(&a, &b)),
        (Num::Int(x), Num::Int(y)) => {
            let r = x % y;
            Ok(Num::Int(if r != 0 && (r < 0) != (*y < 0) { r + y } else { r }))
        }
        _ => {
            let (x, y) = (a.as_big(), b.as_big());
            let r = &x % &y;
            Ok(Num::from_big(
                if !r.is_zero() && r.is_negative() != y.is_negative() {
                    r + y
                } else {
                    r
                },
            ))
        }
    }
}

/// `rem`: result takes the sign of the dividend.
fn num_rem(a: Num, b: Num) -> Result<Num, RuntimeError> {
    check_nonzero(&b)?;
    match (&a, &b) {
        (Num::Real(_), _) | (_, Num::Real(_)) => Err(integer_expected(&a, &b)),
        (Num::Int(x), Num::Int(y)) => Ok(Num::Int(x % y)),
        _ => Ok(Num::from_big(a.as_big() % b.as_big())),
    }
}

/// NaN operands (reachable through float arithmetic, e.g. `inf - inf`)
/// have no order; comparing one is an evaluation error.
fn num_cmp(a: &Num, b: &Num) -> Result<Ordering, RuntimeError> {
    Ok(match (a, b) {
        (Num::Int(x), Num::Int(y)) => x.cmp(y),
        (Num::Real(_), _) | (_, Num::Real(_)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .ok_or(RuntimeError::Evaluation("undefined"))?,
        _ => a.as_big().cmp(&b.as_big()),
    })
}

fn num_abs(a: Num) -> Num {
    match a {
        Num::Int(i) => match i.checked_abs() {
            Some(v) => Num::Int(v),
            None => Num::from_big(BigInt::from(i).abs()),
        },
        Num::Big(b) => Num::from_big(b.abs()),
        Num::Real(r) => Num::Real(r.abs()),
    }
}

fn num_sign(a: Num) -> Num {
    match a {
        Num::Int(i) => Num::Int(i.signum()),
        Num::Big(b) => Num::Int(match b.sign() {
            num_bigint::Sign::Minus => -1,
            num_bigint::Sign::NoSign => 0,
            num_bigint::Sign::Plus => 1,
        }),
        Num::Real(r) => Num::Real(if r == 0.0 { 0.0 } else { r.signum() }),
    }
}

#[derive(Debug, Copy, Clone)]
enum UnOp {
    Neg,
    Plus,
    Abs,
    Sign,
}

#[derive(Debug, Copy, Clone)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    Rem,
    Min,
    Max,
}

fn unary_op(name: &str) -> Option<UnOp> {
    Some(match name {
        "-" => UnOp::Neg,
        "+" => UnOp::Plus,
        "abs" => UnOp::Abs,
        "sign" => UnOp::Sign,
        _ => return None,
    })
}

fn binary_op(name: &str) -> Option<BinOp> {
    Some(match name {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "//" => BinOp::IntDiv,
        "mod" => BinOp::Mod,
        "rem" => BinOp::Rem,
        "min" => BinOp::Min,
        "max" => BinOp::Max,
        _ => return None,
    })
}

fn apply_unary(op: UnOp, a: Num) -> Num {
    match op {
        UnOp::Neg => num_neg(a),
        UnOp::Plus => a,
        UnOp::Abs => num_abs(a),
        UnOp::Sign => num_sign(a),
    }
}

fn apply_binary(op: BinOp, a: Num, b: Num) -> Result<Num, RuntimeError> {
    Ok(match op {
        BinOp::Add => num_add(a, b),
        BinOp::Sub => num_sub(a, b),
        BinOp::Mul => num_mul(a, b),
        BinOp::Div => return num_div(a, b),
        BinOp::IntDiv => return num_idiv(a, b),
        BinOp::Mod => return num_mod(a, b),
        BinOp::Rem => return num_rem(a, b),
        BinOp::Min => {
            if num_cmp(&a, &b)? == Ordering::Greater {
                b
            } else {
                a
            }
        }
        BinOp::Max => {
            if num_cmp(&a, &b)? == Ordering::Less {
                b
            } else {
                a
            }
        }
    })
}

/// Evaluates an arithmetic expression term.  Driven by an explicit work
/// stack, so expression depth never maps to host stack depth.
fn eval(arena: &mut Arena, term: Term) -> Result<Num, RuntimeError> {
    enum Work {
        Eval(Term),
        Unary(UnOp),
        Binary(BinOp),
    }
    let mut work = vec![Work::Eval(term)];
    let mut values: Vec<Num> = Vec::new();
    while let Some(item) = work.pop() {
        match item {
            Work::Eval(t) => {
                let t = arena.resolve(t);
                match t.0 {
                    Handle::Int(i) => values.push(Num::Int(i)),
                    Handle::BigRef(_) => values.push(Num::Big(arena.big_value(t)?)),
                    Handle::Real(r) => values.push(Num::Real(r)),
                    Handle::Var(_) => return Err(RuntimeError::Instantiation),
                    Handle::Atom(id) => match arena.atom_text(id) {
                        "pi" => values.push(Num::Real(core::f64::consts::PI)),
                        "e" => values.push(Num::Real(core::f64::consts::E)),
                        _ => {
                            return Err(RuntimeError::Type {
                                expected: "evaluable",
                                culprit: t,
                            })
                        }
                    },
                    Handle::FuncRef(_) => {
                        let (f, arity) = arena.functor_arity(t)?;
                        let step = match arity {
                            1 => unary_op(arena.atom_text(f)).map(Work::Unary),
                            2 => binary_op(arena.atom_text(f)).map(Work::Binary),
                            _ => None,
                        };
                        let Some(step) = step else {
                            return Err(RuntimeError::Type {
                                expected: "evaluable",
                                culprit: t,
                            });
                        };
                        work.push(step);
                        for &operand in arena.func_args(t)?.iter().rev() {
                            work.push(Work::Eval(operand));
                        }
                    }
                    _ => {
                        return Err(RuntimeError::Type {
                            expected: "evaluable",
                            culprit: t,
                        })
                    }
                }
            }
            Work::Unary(op) => {
                let Some(a) = values.pop() else {
                    return Err(RuntimeError::Evaluation("undefined"));
                };
                values.push(apply_unary(op, a));
            }
            Work::Binary(op) => {
                let (Some(b), Some(a)) = (values.pop(), values.pop()) else {
                    return Err(RuntimeError::Evaluation("undefined"));
                };
                values.push(apply_binary(op, a, b)?);
            }
        }
    }
    values.pop().ok_or(RuntimeError::Evaluation("undefined"))
}

fn bi_is(m: &mut Machine, args: &[Term]) -> NativeResult {
    let value = eval(&mut m.arena, args[1])?;
    let value = value.to_term(&mut m.arena);
    let mut ctx = m.bind_ctx();
    Ok(unify(&mut ctx, args[0], value)?)
}

fn arith_cmp(m: &mut Machine, args: &[Term]) -> Result<Ordering, RuntimeError> {
    let a = eval(&mut m.arena, args[0])?;
    let b = eval(&mut m.arena, args[1])?;
    num_cmp(&a, &b)
}

fn bi_arith_eq(m: &mut Machine, args: &[Term]) -> NativeResult {
    Ok(arith_cmp(m, args)? == Ordering::Equal)
}

fn bi_arith_neq(m: &mut Machine, args: &[Term]) -> NativeResult {
    Ok(arith_cmp(m, args)? != Ordering::Equal)
}

fn bi_arith_lt(m: &mut Machine, args: &[Term]) -> NativeResult {
    Ok(arith_cmp(m, args)? == Ordering::Less)
}

fn bi_arith_gt(m: &mut Machine, args: &[Term]) -> NativeResult {
    Ok(arith_cmp(m, args)? == Ordering::Greater)
}

fn bi_arith_le(m: &mut Machine, args: &[Term]) -> NativeResult {
    Ok(arith_cmp(m, args)? != Ordering::Greater)
}

fn bi_arith_ge(m: &mut Machine, args: &[Term]) -> NativeResult {
    Ok(arith_cmp(m, args)? != Ordering::Less)
}

// ---- database ----

fn bi_asserta(m: &mut Machine, args: &[Term]) -> NativeResult {
    m.db.assert(&mut m.arena, args[0], true)?;
    Ok(true)
}

fn bi_assertz(m: &mut Machine, args: &[Term]) -> NativeResult {
    m.db.assert(&mut m.arena, args[0], false)?;
    Ok(true)
}

/// `retract/1`: removes the first clause whose head and body unify with the
/// argument, keeping the match's bindings.  Deterministic: it does not
/// offer further clauses on backtracking.
fn bi_retract(m: &mut Machine, args: &[Term]) -> NativeResult {
    let pattern = m.arena.resolve(args[0]);
    let (head_pat, body_pat) = if m.arena.functor_arity(pattern)
        == Ok((crate::arena::atoms::NECK, 2))
    {
        let parts = m.arena.func_args(pattern)?;
        (m.arena.resolve(parts[0]), parts[1])
    } else {
        (pattern, Term::TRUE)
    };
    if head_pat.is_var() {
        return Err(RuntimeError::Instantiation);
    }
    if !(head_pat.is_atom() || head_pat.is_compound()) {
        return Err(RuntimeError::Type {
            expected: "callable",
            culprit: head_pat,
        });
    }
    let key = m.arena.functor_arity(head_pat)?;
    m.db.check_dynamic(&m.arena, key)?;
    let Some(snapshot) = m.db.snapshot(key) else {
        return Ok(false);
    };
    for clause in &snapshot {
        let mark = m.trail.mark();
        // trail everything so a failed candidate is fully undone
        let mut ctx = BindCtx::new(&mut m.arena, &mut m.trail, usize::MAX);
        if let Some(locals) = clause.activate_head(&mut ctx, head_pat)? {
            let body = clause.body_instance(&mut m.arena, &locals)?;
            let mut ctx = BindCtx::new(&mut m.arena, &mut m.trail, usize::MAX);
            if unify(&mut ctx, body, body_pat)? {
                m.db.retract(&m.arena, key, clause)?;
                return Ok(true);
            }
        }
        m.trail.undo_to(&mut m.arena, mark);
    }
    Ok(false)
}

// ---- exceptions ----

/// `throw/1`: the ball is materialized (bindings substituted) before the
/// unwinding undoes the trail beneath it.
fn bi_throw(m: &mut Machine, args: &[Term]) -> NativeResult {
    let ball = m.arena.resolve(args[0]);
    if ball.is_var() {
        return Err(RuntimeError::Instantiation);
    }
    let ball = visit::resolve_deep(&mut m.arena, ball)?;
    Err(RuntimeError::Thrown(ball))
}

fn bi_halt0(_m: &mut Machine, _args: &[Term]) -> NativeResult {
    Err(RuntimeError::Halted(0))
}

fn bi_halt1(m: &mut Machine, args: &[Term]) -> NativeResult {
    match eval(&mut m.arena, args[0])? {
        Num::Int(status) => Err(RuntimeError::Halted(status)),
        other => Err(RuntimeError::Type {
            expected: "integer",
            culprit: other.to_term(&mut m.arena),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{atom, func, list};

    fn eval_goal(machine: &mut Machine, goal: Term) -> bool {
        machine.prove(goal).unwrap()
    }

    #[test]
    fn is_evaluates_and_binds() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let x = arena.var("X");
        // X is 2 + 3 * 4
        let mul = func!["*"; 3, 4 => arena];
        let add = func!["+"; 2, mul => arena];
        let goal = func!["is"; x, add => arena];
        let results: Vec<_> = machine
            .solve(goal)
            .unwrap()
            .map(|s| s.unwrap()[0].1)
            .collect();
        assert_eq!(results, vec![Term::int(14)]);
    }

    #[test]
    fn integer_overflow_promotes_to_big() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let x = arena.var("X");
        let add = func!["+"; i64::MAX, 1 => arena];
        let goal = func!["is"; x, add => arena];
        let mut solutions = machine.solve(goal).unwrap();
        let solution = solutions.next().unwrap().unwrap();
        let value = solution[0].1;
        let rendered = value.display(solutions.arena()).to_string();
        assert_eq!(rendered, "9223372036854775808");
    }

    #[test]
    fn deep_expressions_evaluate_in_constant_host_stack() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let mut expr = Term::int(0);
        for _ in 0..100_000 {
            expr = func!["+"; 1, expr => arena];
        }
        let x = arena.var("X");
        let goal = func!["is"; x, expr => arena];
        let results: Vec<_> = machine
            .solve(goal)
            .unwrap()
            .map(|s| s.unwrap()[0].1)
            .collect();
        assert_eq!(results, vec![Term::int(100_000)]);
    }

    #[test]
    fn nan_comparison_is_an_evaluation_error() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let inf = Term::real(f64::INFINITY);
        let nan = func!["-"; inf, inf => arena];
        let goal = func!["=:="; nan, 0 => arena];
        match machine.prove(goal) {
            Err(RuntimeError::Context { source, .. }) => {
                assert!(matches!(*source, RuntimeError::Evaluation("undefined")));
            }
            other => panic!("expected evaluation error, got {other:?}"),
        }
    }

    #[test]
    fn division_by_zero_is_an_evaluation_error() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let x = arena.var("X");
        let div = func!["/"; 1, 0 => arena];
        let goal = func!["is"; x, div => arena];
        match machine.prove(goal) {
            Err(RuntimeError::Context { source, .. }) => {
                assert!(matches!(*source, RuntimeError::Evaluation("zero_divisor")));
            }
            other => panic!("expected evaluation error, got {other:?}"),
        }
    }

    #[test]
    fn division_results() {
        let mut machine = Machine::new();
        for (num, den, expect) in [(6, 3, Term::int(2)), (7, 2, Term::real(3.5))] {
            let arena = machine.arena_mut();
            let x = arena.var("X");
            let div = func!["/"; num, den => arena];
            let goal = func!["is"; x, div => arena];
            let results: Vec<_> = machine
                .solve(goal)
                .unwrap()
                .map(|s| s.unwrap()[0].1)
                .collect();
            assert_eq!(results, vec![expect]);
        }
    }

    #[test]
    fn mod_follows_divisor_sign() {
        let mut machine = Machine::new();
        for (a, b, expect) in [(7, 2, 1), (-7, 2, 1), (7, -2, -1), (-7, -2, -1)] {
            let arena = machine.arena_mut();
            let x = arena.var("X");
            let e = func!["mod"; a, b => arena];
            let goal = func!["is"; x, e => arena];
            let results: Vec<_> = machine
                .solve(goal)
                .unwrap()
                .map(|s| s.unwrap()[0].1)
                .collect();
            assert_eq!(results, vec![Term::int(expect)], "mod({a},{b})");
        }
    }

    #[test]
    fn arithmetic_comparison_mixes_kinds() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let goal = func!["=:="; 1, 1.0 => arena];
        assert!(eval_goal(&mut machine, goal));
        let arena = machine.arena_mut();
        let goal = func!["<"; 1, 1.5 => arena];
        assert!(eval_goal(&mut machine, goal));
        let arena = machine.arena_mut();
        let goal = func![">="; 1, 2 => arena];
        assert!(!eval_goal(&mut machine, goal));
    }

    #[test]
    fn not_unifiable_leaves_no_partial_bindings() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let x = arena.var("X");
        // f(X, a) \= f(1, b) succeeds; X must stay unbound afterwards
        let left = func!["f"; x, atom!("a") => arena];
        let right = func!["f"; 1, atom!("b") => arena];
        let neq = func!["\\="; left, right => arena];
        let check = func!["var"; x => arena];
        let goal = func![","; neq, check => arena];
        assert!(eval_goal(&mut machine, goal));
    }

    #[test]
    fn structural_equality_ignores_unification() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let x = arena.var("X");
        let y = arena.var("Y");
        // X \== Y, X == X
        let neq = func!["\\=="; x, y => arena];
        let eq = func!["=="; x, x => arena];
        let goal = func![","; neq, eq => arena];
        assert!(eval_goal(&mut machine, goal));
    }

    #[test]
    fn compare_yields_order_atom() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let o = arena.var("O");
        let goal = func!["compare"; o, 1, 2 => arena];
        let results: Vec<_> = machine
            .solve(goal)
            .unwrap()
            .map(|s| s.unwrap()[0].1)
            .collect();
        let lt = machine.arena_mut().atom("<");
        assert_eq!(results, vec![lt]);
    }

    #[test]
    fn type_tests() {
        let mut machine = Machine::new();
        let checks: Vec<(Term, &str, bool)> = {
            let arena = machine.arena_mut();
            let v = arena.var("V");
            let a = arena.atom("a");
            let l = list![1 => arena];
            let f = func!["f"; 1 => arena];
            vec![
                (v, "var", true),
                (v, "nonvar", false),
                (a, "atom", true),
                (a, "atomic", true),
                (Term::int(1), "number", true),
                (Term::real(1.5), "number", true),
                (f, "compound", true),
                (f, "atom", false),
                (l, "compound", true),
                (l, "is_list", true),
                (a, "compound", false),
            ]
        };
        for (term, test, expect) in checks {
            let goal = func![test; term => machine.arena_mut()];
            assert_eq!(eval_goal(&mut machine, goal), expect, "{test}");
        }
    }

    #[test]
    fn partial_list_is_not_a_list() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let t = arena.var("T");
        let open = list![1, 2; t => arena];
        let goal = func!["is_list"; open => arena];
        assert!(!eval_goal(&mut machine, goal));
    }

    #[test]
    fn copy_term_detaches_bindings() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let x = arena.var("X");
        let y = arena.var("Y");
        let pair = func!["f"; x, x => arena];
        // copy_term(f(X,X), Y), Y = f(1, One): shared structure preserved
        let copy = func!["copy_term"; pair, y => arena];
        let one = arena.var("One");
        let probe = func!["f"; 1, one => arena];
        let bind = func!["="; y, probe => arena];
        let goal = func![","; copy, bind => arena];

        let mut solutions = machine.solve(goal).unwrap();
        let solution = solutions.next().unwrap().unwrap();
        let bound_one = solution
            .iter()
            .find(|(n, _)| n == "One")
            .map(|(_, t)| *t)
            .unwrap();
        assert_eq!(bound_one, Term::int(1));
        // the original X is untouched
        let bound_x = solution
            .iter()
            .find(|(n, _)| n == "X")
            .map(|(_, t)| *t)
            .unwrap();
        assert!(bound_x.is_var());
    }

    #[test]
    fn functor_decomposes_and_constructs() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let n = arena.var("N");
        let a = arena.var("A");
        let t = func!["point"; 1, 2 => arena];
        let goal = func!["functor"; t, n, a => arena];
        let mut solutions = machine.solve(goal).unwrap();
        let solution = solutions.next().unwrap().unwrap();
        let point = solution[0].1;
        let arity = solution[1].1;
        assert_eq!(point.display(solutions.arena()).to_string(), "point");
        assert_eq!(arity, Term::int(2));
        drop(solutions);

        // construction: functor(T, pair, 2), arg(1, T, left)
        let arena = machine.arena_mut();
        let t = arena.var("T");
        let make = func!["functor"; t, atom!("pair"), 2 => arena];
        let fill = func!["arg"; 1, t, atom!("left") => arena];
        let goal = func![","; make, fill => arena];
        assert!(eval_goal(&mut machine, goal));
    }

    #[test]
    fn univ_round_trip() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let l = arena.var("L");
        let t = func!["f"; 1, 2 => arena];
        let decompose = func!["=.."; t, l => arena];
        let expected = list![atom!("f"), 1, 2 => arena];
        let check = func!["=="; l, expected => arena];
        let goal = func![","; decompose, check => arena];
        assert!(eval_goal(&mut machine, goal));

        let arena = machine.arena_mut();
        let t = arena.var("T");
        let spec = list![atom!("g"), 7 => arena];
        let compose = func!["=.."; t, spec => arena];
        let expected = func!["g"; 7 => arena];
        let check = func!["=="; t, expected => arena];
        let goal = func![","; compose, check => arena];
        assert!(eval_goal(&mut machine, goal));
    }

    #[test]
    fn assert_and_retract_through_goals() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let f1 = func!["fact"; 1 => arena];
        let az = func!["assertz"; f1 => arena];
        assert!(eval_goal(&mut machine, az));
        let arena = machine.arena_mut();
        let f2 = func!["fact"; 2 => arena];
        let aa = func!["asserta"; f2 => arena];
        assert!(eval_goal(&mut machine, aa));

        let arena = machine.arena_mut();
        let x = arena.var("X");
        let goal = func!["fact"; x => arena];
        let results: Vec<_> = machine
            .solve(goal)
            .unwrap()
            .map(|s| s.unwrap()[0].1)
            .collect();
        // asserta put 2 first
        assert_eq!(results, vec![Term::int(2), Term::int(1)]);

        let arena = machine.arena_mut();
        let pat = func!["fact"; 2 => arena];
        let retract = func!["retract"; pat => arena];
        assert!(eval_goal(&mut machine, retract));
        let arena = machine.arena_mut();
        let x = arena.var("X");
        let goal = func!["fact"; x => arena];
        let results: Vec<_> = machine
            .solve(goal)
            .unwrap()
            .map(|s| s.unwrap()[0].1)
            .collect();
        assert_eq!(results, vec![Term::int(1)]);

        // retracting the last copy fails the next retract but not the entry
        let arena = machine.arena_mut();
        let pat = func!["fact"; 9 => arena];
        let retract = func!["retract"; pat => arena];
        assert!(!eval_goal(&mut machine, retract));
    }

    #[test]
    fn in_flight_iteration_ignores_new_clauses() {
        let mut machine = Machine::new();
        for i in [1, 2] {
            let fact = func!["p"; i => machine.arena_mut()];
            let az = func!["assertz"; fact => machine.arena_mut()];
            assert!(eval_goal(&mut machine, az));
        }
        // ( p(X), assertz(p(99)), fail ; true ): terminates because the
        // snapshot taken for p(X) never sees the new clauses
        let arena = machine.arena_mut();
        let x = arena.var("X");
        let p = func!["p"; x => arena];
        let nine = func!["p"; 99 => arena];
        let az = func!["assertz"; nine => arena];
        let chain = func![","; az, atom!("fail") => arena];
        let left = func![","; p, chain => arena];
        let goal = func![";"; left, atom!("true") => arena];
        assert!(eval_goal(&mut machine, goal));

        let arena = machine.arena_mut();
        let y = arena.var("Y");
        let goal = func!["p"; y => arena];
        let count = machine.solve(goal).unwrap().count();
        // one 99 asserted per original solution
        assert_eq!(count, 4);
    }

    #[test]
    fn retract_unifies_rule_bodies() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let x = arena.var("X");
        let head = func!["q"; x => arena];
        let body = func!["p"; x => arena];
        let rule = func![":-"; head, body => arena];
        let az = func!["assertz"; rule => arena];
        assert!(eval_goal(&mut machine, az));

        let arena = machine.arena_mut();
        let a = arena.var("A");
        let head = func!["q"; a => arena];
        let body = func!["p"; a => arena];
        let pat = func![":-"; head, body => arena];
        let retract = func!["retract"; pat => arena];
        assert!(eval_goal(&mut machine, retract));
    }

    #[test]
    fn throw_materializes_the_ball() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let x = arena.var("X");
        // X = 1, catch(throw(ball(X)), ball(Y), Y == 1)
        let bind = func!["="; x, 1 => arena];
        let ball = func!["ball"; x => arena];
        let thrown = func!["throw"; ball => arena];
        let y = arena.var("Y");
        let catcher = func!["ball"; y => arena];
        let check = func!["=="; y, 1 => arena];
        let caught = func!["catch"; thrown, catcher, check => arena];
        let goal = func![","; bind, caught => arena];
        assert!(eval_goal(&mut machine, goal));
    }

    #[test]
    fn big_integer_comparison_is_exact() {
        let mut machine = Machine::new();
        let arena = machine.arena_mut();
        let x = arena.var("X");
        // X is max + max, X > max
        let add = func!["+"; i64::MAX, i64::MAX => arena];
        let step = func!["is"; x, add => arena];
        let check = func![">"; x, i64::MAX => arena];
        let goal = func![","; step, check => arena];
        assert!(eval_goal(&mut machine, goal));
    }
}
