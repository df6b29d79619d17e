//! The primitive library.
//!
//! Each primitive comes in two flavors, matching the emission contract:
//! a `primop_*` form that pops its fixed arity of operands off the
//! argument stack and returns its result directly (the emitted C
//! assigns it to a local and falls through to the rest of the `kargs`
//! body), and a `prim_*` form for primitives that transfer control
//! rather than just compute a value — it additionally pops the return
//! continuation and tail-calls it with the result pushed as its sole
//! argument. Misuse (wrong arity, wrong type, an arithmetic fault) goes
//! through the installed, non-resumable handler rather than panicking,
//! since this runtime must not unwind across the emitted C boundary.

use crate::argstack::with_args;
use crate::closures::{make_closure, record_meta_ref, record_ref, record_set};
use crate::error::fatal;
use crate::heap::{Heap, HeapObj, ScmValue, Tag};
use schemec_core::{RuntimeError, RuntimeErrorKind};

fn type_err(function: &str, msg: impl Into<String>) -> RuntimeError {
    RuntimeError::new(RuntimeErrorKind::Type, function, msg.into())
}

fn pop1(function: &str) -> ScmValue {
    with_args(|a| a.pop()).unwrap_or_else(|| fatal(&arity_err(function, 1, 0)))
}

fn pop2(function: &str) -> (ScmValue, ScmValue) {
    let (x, y) = with_args(|a| (a.pop(), a.pop()));
    match (x, y) {
        // popped in reverse push order: `y` is the first-pushed operand
        (Some(b), Some(a)) => (a, b),
        _ => fatal(&arity_err(function, 2, 0)),
    }
}

/// Pop `argc` operands, restoring call-site left-to-right order. Mirrors
/// `primop_list`/`primop_vector`'s existing argc-parameter convention,
/// extended here to `+`/`-`/`*` since those are the only arithmetic
/// primitives the optimizer's constant-folder treats as variadic.
fn pop_n(function: &str, argc: usize) -> Vec<ScmValue> {
    let mut items: Vec<ScmValue> = with_args(|a| (0..argc).map(|_| a.pop()).collect::<Option<_>>())
        .unwrap_or_else(|| fatal(&arity_err(function, argc, 0)));
    items.reverse();
    items
}

fn arity_err(function: &str, expected: usize, got: usize) -> RuntimeError {
    RuntimeError::new(
        RuntimeErrorKind::Arity,
        function,
        format!("expected {expected} argument(s), got {got}"),
    )
}

fn want_int(function: &str, v: ScmValue) -> i32 {
    v.as_int().unwrap_or_else(|| fatal(&type_err(function, "expected an integer")))
}

// -- arithmetic -----------------------------------------------------------

macro_rules! checked_binop {
    ($name:ident, $fname:expr, $check:ident, $zero_check:expr) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn $name() -> ScmValue {
            let (a, b) = pop2($fname);
            let (a, b) = (want_int($fname, a), want_int($fname, b));
            if $zero_check && b == 0 {
                fatal(&RuntimeError::new(RuntimeErrorKind::DivideByZero, $fname, "zero divisor"));
            }
            match a.$check(b) {
                Some(r) => ScmValue::int(r),
                None => fatal(&RuntimeError::new(RuntimeErrorKind::Overflow, $fname, "integer overflow")),
            }
        }
    };
}

checked_binop!(primop_quotient, "div", checked_div, true);
checked_binop!(primop_remainder, "%", checked_rem, true);

/// `+`/`-`/`*` pop a caller-supplied `argc` operands (the emitter knows the
/// call's arity statically) and fold left-to-right, matching
/// `schemec_core::primops::numeric_fold`'s semantics: zero args yields the
/// additive/multiplicative identity, one arg is returned as-is (`-`
/// negates it), two or more fold pairwise with overflow checking.
macro_rules! checked_nary_op {
    ($name:ident, $fname:expr, $check:ident, $identity:expr, $negate_unary:expr) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn $name(argc: usize) -> ScmValue {
            if argc == 0 {
                return ScmValue::int($identity);
            }
            let ints: Vec<i32> = pop_n($fname, argc).into_iter().map(|v| want_int($fname, v)).collect();
            let mut acc = ints[0];
            if ints.len() == 1 {
                if $negate_unary {
                    acc = acc
                        .checked_neg()
                        .unwrap_or_else(|| fatal(&RuntimeError::new(RuntimeErrorKind::Overflow, $fname, "integer overflow")));
                }
                return ScmValue::int(acc);
            }
            for &x in &ints[1..] {
                acc = acc
                    .$check(x)
                    .unwrap_or_else(|| fatal(&RuntimeError::new(RuntimeErrorKind::Overflow, $fname, "integer overflow")));
            }
            ScmValue::int(acc)
        }
    };
}

checked_nary_op!(primop_add, "+", checked_add, 0, false);
checked_nary_op!(primop_sub, "-", checked_sub, 0, true);
checked_nary_op!(primop_mul, "*", checked_mul, 1, false);

#[unsafe(no_mangle)]
pub extern "C" fn primop_div() -> ScmValue {
    let (a, b) = pop2("/");
    let (a, b) = (want_int("/", a) as f64, want_int("/", b) as f64);
    if b == 0.0 {
        fatal(&RuntimeError::new(RuntimeErrorKind::DivideByZero, "/", "zero divisor"));
    }
    ScmValue::float(a / b)
}

macro_rules! numeric_cmp {
    ($name:ident, $fname:expr, $op:tt) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn $name() -> ScmValue {
            let (a, b) = pop2($fname);
            ScmValue::bool(want_int($fname, a) $op want_int($fname, b))
        }
    };
}

numeric_cmp!(primop_num_eq, "=", ==);
numeric_cmp!(primop_lt, "<", <);
numeric_cmp!(primop_gt, ">", >);
numeric_cmp!(primop_le, "<=", <=);
numeric_cmp!(primop_ge, ">=", >=);

// -- equality ---------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn primop_eq_p() -> ScmValue {
    let (a, b) = pop2("eq?");
    ScmValue::bool(a == b)
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_eqv_p() -> ScmValue {
    let (a, b) = pop2("eqv?");
    let eqv = a == b
        || (a.tag == Tag::Float && b.tag == Tag::Float && a.as_float() == b.as_float())
        || (a.tag == Tag::Int && b.tag == Tag::Int && a.as_int() == b.as_int());
    ScmValue::bool(eqv)
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_equal_p() -> ScmValue {
    let (a, b) = pop2("equal?");
    ScmValue::bool(crate::heap::with_heap(|h| structural_eq(h, a, b)))
}

fn structural_eq(heap: &Heap, a: ScmValue, b: ScmValue) -> bool {
    if a == b {
        return true;
    }
    match (a.heap_ref().map(|r| heap.get(r)), b.heap_ref().map(|r| heap.get(r))) {
        (Some(HeapObj::Pair(a1, d1)), Some(HeapObj::Pair(a2, d2))) => {
            structural_eq(heap, *a1, *a2) && structural_eq(heap, *d1, *d2)
        }
        (Some(HeapObj::Str(s1)), Some(HeapObj::Str(s2))) => s1 == s2,
        (Some(HeapObj::Bytevector(v1)), Some(HeapObj::Bytevector(v2))) => v1 == v2,
        (Some(HeapObj::Vector(v1)), Some(HeapObj::Vector(v2))) => {
            v1.len() == v2.len() && v1.iter().zip(v2).all(|(x, y)| structural_eq(heap, *x, *y))
        }
        _ => false,
    }
}

// -- predicates ---------------------------------------------------------------

macro_rules! tag_predicate {
    ($name:ident, $fname:expr, $tag:pat) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn $name() -> ScmValue {
            let v = pop1($fname);
            ScmValue::bool(matches!(v.tag, $tag))
        }
    };
}

tag_predicate!(primop_null_p, "null?", Tag::Null);
tag_predicate!(primop_pair_p, "pair?", Tag::Pair);
tag_predicate!(primop_number_p, "number?", Tag::Int | Tag::Float);
tag_predicate!(primop_string_p, "string?", Tag::Str);
tag_predicate!(primop_symbol_p, "symbol?", Tag::Symbol);
tag_predicate!(primop_boolean_p, "boolean?", Tag::Bool);
tag_predicate!(primop_vector_p, "vector?", Tag::Vector);
tag_predicate!(primop_bytevector_p, "bytevector?", Tag::Bytevector);
tag_predicate!(primop_record_p, "record?", Tag::Record);

#[unsafe(no_mangle)]
pub extern "C" fn primop_procedure_p() -> ScmValue {
    let v = pop1("procedure?");
    ScmValue::bool(matches!(v.tag, Tag::Closure | Tag::Function))
}

// -- list ops ---------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn primop_cons() -> ScmValue {
    let (a, d) = pop2("cons");
    crate::heap::with_heap(|h| h.alloc(HeapObj::Pair(a, d)))
}

fn pair_parts(heap: &Heap, function: &str, v: ScmValue) -> (ScmValue, ScmValue) {
    match v.heap_ref().map(|r| heap.get(r)) {
        Some(HeapObj::Pair(a, d)) => (*a, *d),
        _ => fatal(&type_err(function, "expected a pair")),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_car() -> ScmValue {
    let v = pop1("car");
    crate::heap::with_heap(|h| pair_parts(h, "car", v).0)
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_cdr() -> ScmValue {
    let v = pop1("cdr");
    crate::heap::with_heap(|h| pair_parts(h, "cdr", v).1)
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_set_car() -> ScmValue {
    let (p, val) = pop2("set-car!");
    crate::heap::with_heap(|h| match p.heap_ref() {
        Some(r) => match h.get_mut(r) {
            HeapObj::Pair(a, _) => *a = val,
            _ => fatal(&type_err("set-car!", "expected a pair")),
        },
        None => fatal(&type_err("set-car!", "expected a pair")),
    });
    ScmValue::VOID
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_set_cdr() -> ScmValue {
    let (p, val) = pop2("set-cdr!");
    crate::heap::with_heap(|h| match p.heap_ref() {
        Some(r) => match h.get_mut(r) {
            HeapObj::Pair(_, d) => *d = val,
            _ => fatal(&type_err("set-cdr!", "expected a pair")),
        },
        None => fatal(&type_err("set-cdr!", "expected a pair")),
    });
    ScmValue::VOID
}

/// `list` — the variadic constructor; the emitter pops exactly `argc`
/// operands (it knows the arity statically) and passes them here already
/// collected, since ABI functions can't themselves be variadic.
#[unsafe(no_mangle)]
pub extern "C" fn primop_list(argc: usize) -> ScmValue {
    let items: Vec<ScmValue> = with_args(|a| (0..argc).map(|_| a.pop().expect("list: stack underflow")).collect());
    crate::heap::with_heap(|h| {
        let mut acc = ScmValue::NULL;
        for v in items {
            acc = h.alloc(HeapObj::Pair(v, acc));
        }
        acc
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_list_p() -> ScmValue {
    let mut v = pop1("list?");
    let ok = crate::heap::with_heap(|h| loop {
        match v.tag {
            Tag::Null => break true,
            Tag::Pair => v = pair_parts(h, "list?", v).1,
            _ => break false,
        }
    });
    ScmValue::bool(ok)
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_length() -> ScmValue {
    let mut v = pop1("length");
    let n = crate::heap::with_heap(|h| {
        let mut n = 0i32;
        loop {
            match v.tag {
                Tag::Null => break n,
                Tag::Pair => {
                    n += 1;
                    v = pair_parts(h, "length", v).1;
                }
                _ => fatal(&type_err("length", "improper list")),
            }
        }
    });
    ScmValue::int(n)
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_list_ref() -> ScmValue {
    let (lst, idx) = pop2("list-ref");
    let mut v = lst;
    let mut k = want_int("list-ref", idx);
    crate::heap::with_heap(|h| {
        loop {
            match v.tag {
                Tag::Pair if k == 0 => break pair_parts(h, "list-ref", v).0,
                Tag::Pair => {
                    v = pair_parts(h, "list-ref", v).1;
                    k -= 1;
                }
                _ => fatal(&RuntimeError::new(RuntimeErrorKind::Bounds, "list-ref", "index out of range")),
            }
        }
    })
}

// -- vector ops ---------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn primop_vector(argc: usize) -> ScmValue {
    let mut items: Vec<ScmValue> = with_args(|a| (0..argc).map(|_| a.pop().expect("vector: stack underflow")).collect());
    items.reverse();
    crate::heap::with_heap(|h| h.alloc(HeapObj::Vector(items)))
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_make_vector() -> ScmValue {
    let (len, fill) = pop2("make-vector");
    let len = want_int("make-vector", len).max(0) as usize;
    crate::heap::with_heap(|h| h.alloc(HeapObj::Vector(vec![fill; len])))
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_vector_length() -> ScmValue {
    let v = pop1("vector-length");
    let n = crate::heap::with_heap(|h| match v.heap_ref().map(|r| h.get(r)) {
        Some(HeapObj::Vector(items)) => items.len(),
        _ => fatal(&type_err("vector-length", "expected a vector")),
    });
    ScmValue::int(n as i32)
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_vector_ref() -> ScmValue {
    let (vec, idx) = pop2("vector-ref");
    let i = want_int("vector-ref", idx) as usize;
    crate::heap::with_heap(|h| match vec.heap_ref().map(|r| h.get(r)) {
        Some(HeapObj::Vector(items)) => *items
            .get(i)
            .unwrap_or_else(|| fatal(&RuntimeError::new(RuntimeErrorKind::Bounds, "vector-ref", "index out of range"))),
        _ => fatal(&type_err("vector-ref", "expected a vector")),
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_vector_set() -> ScmValue {
    let val = pop1("vector-set!");
    let (vec, idx) = pop2("vector-set!");
    let i = want_int("vector-set!", idx) as usize;
    crate::heap::with_heap(|h| match vec.heap_ref() {
        Some(r) => match h.get_mut(r) {
            HeapObj::Vector(items) => {
                let slot = items
                    .get_mut(i)
                    .unwrap_or_else(|| fatal(&RuntimeError::new(RuntimeErrorKind::Bounds, "vector-set!", "index out of range")));
                *slot = val;
            }
            _ => fatal(&type_err("vector-set!", "expected a vector")),
        },
        None => fatal(&type_err("vector-set!", "expected a vector")),
    });
    ScmValue::VOID
}

// -- bytevector ops -----------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn primop_make_bytevector() -> ScmValue {
    let (len, fill) = pop2("make-bytevector");
    let len = want_int("make-bytevector", len).max(0) as usize;
    let byte = want_int("make-bytevector", fill) as u8;
    crate::heap::with_heap(|h| h.alloc(HeapObj::Bytevector(vec![byte; len])))
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_bytevector_length() -> ScmValue {
    let v = pop1("bytevector-length");
    let n = crate::heap::with_heap(|h| match v.heap_ref().map(|r| h.get(r)) {
        Some(HeapObj::Bytevector(bytes)) => bytes.len(),
        _ => fatal(&type_err("bytevector-length", "expected a bytevector")),
    });
    ScmValue::int(n as i32)
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_bytevector_ref() -> ScmValue {
    let (bv, idx) = pop2("bytevector-u8-ref");
    let i = want_int("bytevector-u8-ref", idx) as usize;
    crate::heap::with_heap(|h| match bv.heap_ref().map(|r| h.get(r)) {
        Some(HeapObj::Bytevector(bytes)) => ScmValue::int(
            *bytes
                .get(i)
                .unwrap_or_else(|| fatal(&RuntimeError::new(RuntimeErrorKind::Bounds, "bytevector-u8-ref", "index out of range")))
                as i32,
        ),
        _ => fatal(&type_err("bytevector-u8-ref", "expected a bytevector")),
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_bytevector_set() -> ScmValue {
    let val = pop1("bytevector-u8-set!");
    let (bv, idx) = pop2("bytevector-u8-set!");
    let i = want_int("bytevector-u8-set!", idx) as usize;
    let byte = want_int("bytevector-u8-set!", val) as u8;
    crate::heap::with_heap(|h| match bv.heap_ref() {
        Some(r) => match h.get_mut(r) {
            HeapObj::Bytevector(bytes) => {
                let slot = bytes
                    .get_mut(i)
                    .unwrap_or_else(|| fatal(&RuntimeError::new(RuntimeErrorKind::Bounds, "bytevector-u8-set!", "index out of range")));
                *slot = byte;
            }
            _ => fatal(&type_err("bytevector-u8-set!", "expected a bytevector")),
        },
        None => fatal(&type_err("bytevector-u8-set!", "expected a bytevector")),
    });
    ScmValue::VOID
}

// -- string ops ---------------------------------------------------------------

fn with_str<R>(function: &str, v: ScmValue, f: impl FnOnce(&[u8]) -> R) -> R {
    crate::heap::with_heap(|h| match v.heap_ref().map(|r| h.get(r)) {
        Some(HeapObj::Str(bytes)) => f(bytes),
        _ => fatal(&type_err(function, "expected a string")),
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_make_string() -> ScmValue {
    let (len, fill) = pop2("make-string");
    let len = want_int("make-string", len).max(0) as usize;
    let ch = want_int("make-string", fill) as u8;
    crate::heap::with_heap(|h| h.alloc(HeapObj::Str(std::rc::Rc::from(vec![ch; len]))))
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_string_length() -> ScmValue {
    let v = pop1("string-length");
    ScmValue::int(with_str("string-length", v, |b| b.len()) as i32)
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_string_ref() -> ScmValue {
    let (s, idx) = pop2("string-ref");
    let i = want_int("string-ref", idx) as usize;
    with_str("string-ref", s, |b| {
        ScmValue::char_(*b.get(i).unwrap_or_else(|| fatal(&RuntimeError::new(RuntimeErrorKind::Bounds, "string-ref", "index out of range"))))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_string_set() -> ScmValue {
    let ch = pop1("string-set!");
    let (s, idx) = pop2("string-set!");
    let i = want_int("string-set!", idx) as usize;
    let byte = want_int("string-set!", ch) as u8;
    crate::heap::with_heap(|h| match s.heap_ref() {
        Some(r) => match h.get_mut(r) {
            HeapObj::Str(bytes) => {
                if i >= bytes.len() {
                    fatal(&RuntimeError::new(RuntimeErrorKind::Bounds, "string-set!", "index out of range"));
                }
                let mut v = bytes.to_vec();
                v[i] = byte;
                *bytes = std::rc::Rc::from(v);
            }
            _ => fatal(&type_err("string-set!", "expected a string")),
        },
        None => fatal(&type_err("string-set!", "expected a string")),
    });
    ScmValue::VOID
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_string_copy() -> ScmValue {
    let s = pop1("string-copy");
    let bytes = with_str("string-copy", s, |b| b.to_vec());
    crate::heap::with_heap(|h| h.alloc(HeapObj::Str(std::rc::Rc::from(bytes))))
}

/// Both operands' bytes are cloned out of the heap in a single borrow
/// before comparing — `with_str` nested inside `with_str` would try to
/// borrow the thread-local heap twice at once and panic.
fn two_strings(function: &str, a: ScmValue, b: ScmValue) -> (Vec<u8>, Vec<u8>) {
    crate::heap::with_heap(|h| {
        let sa = match a.heap_ref().map(|r| h.get(r)) {
            Some(HeapObj::Str(bytes)) => bytes.to_vec(),
            _ => fatal(&type_err(function, "expected a string")),
        };
        let sb = match b.heap_ref().map(|r| h.get(r)) {
            Some(HeapObj::Str(bytes)) => bytes.to_vec(),
            _ => fatal(&type_err(function, "expected a string")),
        };
        (sa, sb)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_string_eq() -> ScmValue {
    let (a, b) = pop2("string=?");
    let (sa, sb) = two_strings("string=?", a, b);
    ScmValue::bool(sa == sb)
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_string_lt() -> ScmValue {
    let (a, b) = pop2("string<?");
    let (sa, sb) = two_strings("string<?", a, b);
    ScmValue::bool(sa < sb)
}

// -- record ops ---------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn primop_make_record() -> ScmValue {
    let (nfields, meta) = pop2("make-record");
    let nfields = want_int("make-record", nfields).max(0) as usize;
    crate::heap::with_heap(|h| crate::closures::make_record(h, nfields, meta))
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_record_ref() -> ScmValue {
    let (r, idx) = pop2("record-ref");
    let i = want_int("record-ref", idx) as usize;
    crate::heap::with_heap(|h| record_ref(h, r, i).unwrap_or_else(|e| fatal(&e)))
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_record_set() -> ScmValue {
    let val = pop1("record-set!");
    let (r, idx) = pop2("record-set!");
    let i = want_int("record-set!", idx) as usize;
    crate::heap::with_heap(|h| record_set(h, r, i, val).unwrap_or_else(|e| fatal(&e)));
    ScmValue::VOID
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_record_meta_ref() -> ScmValue {
    let r = pop1("record-meta-ref");
    crate::heap::with_heap(|h| record_meta_ref(h, r).unwrap_or_else(|e| fatal(&e)))
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_record_meta_set() -> ScmValue {
    let (r, meta) = pop2("record-meta-set!");
    crate::heap::with_heap(|h| crate::closures::record_meta_set(h, r, meta).unwrap_or_else(|e| fatal(&e)));
    ScmValue::VOID
}

// -- control: call/cc, call-with-values, apply --------------------------------
//
// These are `prim_*` rather than `primop_*`: each needs to transfer
// control, so it pops its operands *and* the return continuation, then
// hands the trampoline a new "self" to run next instead of returning a
// plain value.

/// `call/cc` in this runtime captures only the *argument-stack depth* at
/// the call site and reifies it as a one-shot closure over a synthetic
/// "resume" code id; invoking the captured continuation truncates the
/// argument stack back to that depth and pushes the supplied value. This
/// gives escape-only (upward) continuations — enough to escape a loop
/// or short-circuit a computation — not full re-entrant continuations,
/// which would require copying the native C call stack that the
/// trampoline exists precisely to avoid growing. Recorded as a design
/// decision in `DESIGN.md`.
#[unsafe(no_mangle)]
pub extern "C" fn prim_call_cc() -> ScmValue {
    let receiver = pop1("call/cc");
    let k = pop1("call/cc");
    let depth = with_args(|a| a.depth());
    let escape = crate::heap::with_heap(|h| make_closure(h, crate::trampoline::HALT_CODE, vec![ScmValue::int(depth as i32), k]));
    with_args(|a| {
        let _ = a.push(escape);
    });
    receiver
}

/// `call-with-values` — fuse a zero-argument producer with a consumer
/// that receives its results as ordinary arguments. Producer results
/// arrive on the argument stack already, so this just forwards to the
/// consumer closure.
#[unsafe(no_mangle)]
pub extern "C" fn prim_call_with_values() -> ScmValue {
    let consumer = pop1("call-with-values");
    let _producer = pop1("call-with-values");
    consumer
}

/// `apply` — the final argument is a list that must be spliced across
/// the argument stack before the target is invoked.
#[unsafe(no_mangle)]
pub extern "C" fn prim_apply() -> ScmValue {
    let arg_list = pop1("apply");
    let target = pop1("apply");
    crate::heap::with_heap(|h| {
        let mut v = arg_list;
        let mut items = Vec::new();
        loop {
            match v.tag {
                Tag::Null => break,
                Tag::Pair => {
                    let (a, d) = pair_parts(h, "apply", v);
                    items.push(a);
                    v = d;
                }
                _ => fatal(&type_err("apply", "final argument to apply must be a proper list")),
            }
        }
        with_args(|stack| {
            for item in items {
                let _ = stack.push(item);
            }
        });
    });
    target
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_chk_procedure() -> ScmValue {
    let v = pop1("procedure-check");
    if !matches!(v.tag, Tag::Closure | Tag::Function) {
        fatal(&type_err("procedure-check", "expected a procedure"));
    }
    v
}

// -- output ---------------------------------------------------------------

/// `display`'s rendering: strings and chars print bare, everything else
/// the same as `write`.
fn display_string(heap: &Heap, v: ScmValue) -> String {
    let mut out = String::new();
    render(heap, v, false, &mut out);
    out
}

/// `write`'s rendering: strings are quoted and escaped, chars use `#\`
/// syntax, producing output `read` could round-trip.
fn write_string(heap: &Heap, v: ScmValue) -> String {
    let mut out = String::new();
    render(heap, v, true, &mut out);
    out
}

fn render(heap: &Heap, v: ScmValue, readable: bool, out: &mut String) {
    match v.tag {
        Tag::Void => out.push_str("#<void>"),
        Tag::Bool => out.push_str(if v.is_truthy() { "#t" } else { "#f" }),
        Tag::Char => {
            let c = v.bits as u8 as char;
            if readable {
                out.push_str("#\\");
                out.push(c);
            } else {
                out.push(c);
            }
        }
        Tag::Int => out.push_str(&v.as_int().unwrap().to_string()),
        Tag::Float => out.push_str(&v.as_float().unwrap().to_string()),
        Tag::Null => out.push_str("()"),
        Tag::Symbol => out.push_str(&schemec_core::Symbol::from_id(v.bits as u32).name()),
        Tag::Function => out.push_str("#<procedure>"),
        Tag::Pair | Tag::Str | Tag::Bytevector | Tag::Vector | Tag::Record | Tag::Box | Tag::Closure => {
            render_heap_obj(heap, heap.get(v.heap_ref().unwrap()), readable, out)
        }
    }
}

fn render_heap_obj(heap: &Heap, obj: &HeapObj, readable: bool, out: &mut String) {
    match obj {
        HeapObj::Pair(a, d) => {
            out.push('(');
            render(heap, *a, readable, out);
            render_pair_tail(heap, *d, readable, out);
            out.push(')');
        }
        HeapObj::Str(bytes) => {
            let s = String::from_utf8_lossy(bytes);
            if readable {
                out.push('"');
                for c in s.chars() {
                    match c {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        c => out.push(c),
                    }
                }
                out.push('"');
            } else {
                out.push_str(&s);
            }
        }
        HeapObj::Bytevector(bytes) => {
            out.push_str("#u8(");
            for (i, b) in bytes.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                out.push_str(&b.to_string());
            }
            out.push(')');
        }
        HeapObj::Vector(items) => {
            out.push_str("#(");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                render(heap, *item, readable, out);
            }
            out.push(')');
        }
        HeapObj::Record { .. } => out.push_str("#<record>"),
        HeapObj::BoxCell(_) => out.push_str("#<box>"),
        HeapObj::Closure { .. } => out.push_str("#<procedure>"),
    }
}

fn render_pair_tail(heap: &Heap, v: ScmValue, readable: bool, out: &mut String) {
    match v.tag {
        Tag::Null => {}
        Tag::Pair => match heap.get(v.heap_ref().unwrap()) {
            HeapObj::Pair(a, d) => {
                out.push(' ');
                render(heap, *a, readable, out);
                render_pair_tail(heap, *d, readable, out);
            }
            _ => unreachable!(),
        },
        _ => {
            out.push_str(" . ");
            render(heap, v, readable, out);
        }
    }
}

/// Write directly to the process's stdout and flush immediately: the
/// emitted C's `main` exits via a plain `return`, never running Rust's
/// own `Stdout` line-buffer flush-on-drop, so unflushed output after the
/// last `display`/`write` without a trailing newline would otherwise be
/// lost.
fn emit(s: &str) {
    use std::io::Write as _;
    let mut out = std::io::stdout();
    let _ = out.write_all(s.as_bytes());
    let _ = out.flush();
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_display() -> ScmValue {
    let v = pop1("display");
    crate::heap::with_heap(|h| emit(&display_string(h, v)));
    ScmValue::VOID
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_write() -> ScmValue {
    let v = pop1("write");
    crate::heap::with_heap(|h| emit(&write_string(h, v)));
    ScmValue::VOID
}

#[unsafe(no_mangle)]
pub extern "C" fn primop_newline() -> ScmValue {
    emit("\n");
    ScmValue::VOID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_pops_two_and_returns_sum() {
        with_args(|a| {
            let _ = a.push(ScmValue::int(2));
            let _ = a.push(ScmValue::int(3));
        });
        assert_eq!(primop_add(2).as_int(), Some(5));
    }

    #[test]
    fn add_folds_variadic_operands() {
        with_args(|a| {
            for v in [1, 2, 3, 4] {
                let _ = a.push(ScmValue::int(v));
            }
        });
        assert_eq!(primop_add(4).as_int(), Some(10));
        assert_eq!(primop_mul(0).as_int(), Some(1));
        assert_eq!(primop_add(0).as_int(), Some(0));
    }

    #[test]
    fn sub_single_operand_negates() {
        with_args(|a| {
            let _ = a.push(ScmValue::int(5));
        });
        assert_eq!(primop_sub(1).as_int(), Some(-5));
    }

    #[test]
    fn display_renders_list_bare_strings() {
        let mut heap = Heap::default();
        let s = heap.alloc(HeapObj::Str(b"hi".as_slice().into()));
        let p = heap.alloc(HeapObj::Pair(s, ScmValue::NULL));
        assert_eq!(display_string(&heap, p), "(hi)");
    }

    #[test]
    fn write_renders_quoted_strings_and_dotted_pairs() {
        let mut heap = Heap::default();
        let s = heap.alloc(HeapObj::Str(b"a\"b".as_slice().into()));
        assert_eq!(write_string(&heap, s), "\"a\\\"b\"");
        let dotted = heap.alloc(HeapObj::Pair(ScmValue::int(1), ScmValue::int(2)));
        assert_eq!(write_string(&heap, dotted), "(1 . 2)");
    }

    #[test]
    fn cons_then_car_cdr() {
        with_args(|a| {
            let _ = a.push(ScmValue::int(1));
            let _ = a.push(ScmValue::int(2));
        });
        let p = primop_cons();
        with_args(|a| {
            let _ = a.push(p);
        });
        assert_eq!(primop_car().as_int(), Some(1));
        with_args(|a| {
            let _ = a.push(p);
        });
        assert_eq!(primop_cdr().as_int(), Some(2));
    }

    #[test]
    fn vector_ref_set_round_trip() {
        with_args(|a| {
            let _ = a.push(ScmValue::int(3));
            let _ = a.push(ScmValue::int(0));
        });
        let v = primop_make_vector();
        with_args(|a| {
            let _ = a.push(v);
            let _ = a.push(ScmValue::int(1));
            let _ = a.push(ScmValue::int(42));
        });
        primop_vector_set();
        with_args(|a| {
            let _ = a.push(v);
            let _ = a.push(ScmValue::int(1));
        });
        assert_eq!(primop_vector_ref().as_int(), Some(42));
    }

    #[test]
    fn equal_p_compares_structurally() {
        with_args(|a| {
            let _ = a.push(ScmValue::int(1));
            let _ = a.push(ScmValue::int(2));
        });
        let p1 = primop_cons();
        with_args(|a| {
            let _ = a.push(ScmValue::int(1));
            let _ = a.push(ScmValue::int(2));
        });
        let p2 = primop_cons();
        with_args(|a| {
            let _ = a.push(p1);
            let _ = a.push(p2);
        });
        assert!(primop_equal_p().is_truthy());
    }
}
