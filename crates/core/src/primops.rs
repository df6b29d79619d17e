//! The pure-primop table used by the contraction optimizer's constant
//! folding pass. Shared with `schemec-runtime` so the primitives the
//! folder executes at compile time agree, operand-for-operand, with
//! what the emitted C would compute at run time.
//!
//! Folding is conservative: if applying a primop to its constant operands
//! would itself be an error (divide by zero, overflow, wrong arity/type),
//! `fold` returns `None` and the optimizer leaves the `primcall` untouched
//! so the error surfaces at run time exactly as it would have unfolded.

use crate::value::Value;

/// The primitives the optimizer is licensed to fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimOp {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    NumEq,
    Lt,
    Gt,
    Le,
    Ge,
    EqP,
    EqvP,
    EqualP,
    Cons,
    Car,
    Cdr,
    List,
    Vector,
}

impl PrimOp {
    pub fn from_name(name: &str) -> Option<PrimOp> {
        use PrimOp::*;
        Some(match name {
            "+" => Add,
            "-" => Sub,
            "*" => Mul,
            "/" => Div,
            "div" => IntDiv,
            "%" | "modulo" => Mod,
            "=" => NumEq,
            "<" => Lt,
            ">" => Gt,
            "<=" => Le,
            ">=" => Ge,
            "eq?" => EqP,
            "eqv?" => EqvP,
            "equal?" => EqualP,
            "cons" => Cons,
            "car" => Car,
            "cdr" => Cdr,
            "list" => List,
            "vector" => Vector,
            _ => return None,
        })
    }

    pub fn is_pure(self) -> bool {
        true // every PrimOp in this roster is pure by construction
    }
}

fn as_number(v: &Value) -> Option<Num> {
    match v {
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

#[derive(Clone, Copy)]
enum Num {
    Int(i32),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
    fn to_value(self) -> Value {
        match self {
            Num::Int(i) => Value::Int(i),
            Num::Float(f) => Value::Float(f),
        }
    }
}

fn numeric_fold(op: PrimOp, args: &[Value]) -> Option<Value> {
    let nums: Vec<Num> = args.iter().map(as_number).collect::<Option<_>>()?;
    if nums.is_empty() {
        return None;
    }
    let all_int = nums.iter().all(|n| matches!(n, Num::Int(_)));

    match op {
        PrimOp::Add | PrimOp::Sub | PrimOp::Mul => {
            if all_int {
                let ints: Vec<i32> = nums
                    .iter()
                    .map(|n| match n {
                        Num::Int(i) => *i,
                        _ => unreachable!(),
                    })
                    .collect();
                let mut acc = ints[0];
                if ints.len() == 1 {
                    return Some(Value::Int(match op {
                        PrimOp::Sub => acc.checked_neg()?,
                        _ => acc,
                    }));
                }
                for &x in &ints[1..] {
                    acc = match op {
                        PrimOp::Add => acc.checked_add(x)?,
                        PrimOp::Sub => acc.checked_sub(x)?,
                        PrimOp::Mul => acc.checked_mul(x)?,
                        _ => unreachable!(),
                    };
                }
                Some(Value::Int(acc))
            } else {
                let floats: Vec<f64> = nums.iter().map(|n| n.as_f64()).collect();
                let mut acc = floats[0];
                if floats.len() == 1 {
                    return Some(Value::Float(if op == PrimOp::Sub { -acc } else { acc }));
                }
                for &x in &floats[1..] {
                    acc = match op {
                        PrimOp::Add => acc + x,
                        PrimOp::Sub => acc - x,
                        PrimOp::Mul => acc * x,
                        _ => unreachable!(),
                    };
                }
                Some(Value::Float(acc))
            }
        }
        PrimOp::Div => {
            if args.len() != 2 {
                return None;
            }
            let a = nums[0].as_f64();
            let b = nums[1].as_f64();
            if b == 0.0 {
                return None;
            }
            Some(Value::Float(a / b))
        }
        PrimOp::IntDiv => {
            if !all_int || args.len() != 2 {
                return None;
            }
            let (Num::Int(a), Num::Int(b)) = (nums[0], nums[1]) else {
                return None;
            };
            if b == 0 {
                return None;
            }
            Some(Value::Int(a.checked_div(b)?))
        }
        PrimOp::Mod => {
            if !all_int || args.len() != 2 {
                return None;
            }
            let (Num::Int(a), Num::Int(b)) = (nums[0], nums[1]) else {
                return None;
            };
            if b == 0 {
                return None;
            }
            Some(Value::Int(a.checked_rem(b)?))
        }
        PrimOp::NumEq | PrimOp::Lt | PrimOp::Gt | PrimOp::Le | PrimOp::Ge => {
            if args.len() != 2 {
                return None;
            }
            let a = nums[0].as_f64();
            let b = nums[1].as_f64();
            let result = match op {
                PrimOp::NumEq => a == b,
                PrimOp::Lt => a < b,
                PrimOp::Gt => a > b,
                PrimOp::Le => a <= b,
                PrimOp::Ge => a >= b,
                _ => unreachable!(),
            };
            Some(Value::Bool(result))
        }
        _ => None,
    }
}

/// Attempt to fold `primcall(op, args)` into a constant. Returns `None` if
/// the operands are not all of compatible kinds, or if applying the
/// primitive would itself be an error.
pub fn fold(op: PrimOp, args: &[Value]) -> Option<Value> {
    match op {
        PrimOp::Add
        | PrimOp::Sub
        | PrimOp::Mul
        | PrimOp::Div
        | PrimOp::IntDiv
        | PrimOp::Mod
        | PrimOp::NumEq
        | PrimOp::Lt
        | PrimOp::Gt
        | PrimOp::Le
        | PrimOp::Ge => numeric_fold(op, args),
        PrimOp::EqP => {
            if args.len() != 2 {
                return None;
            }
            Some(Value::Bool(args[0].eq_identity(&args[1])))
        }
        PrimOp::EqvP => {
            if args.len() != 2 {
                return None;
            }
            Some(Value::Bool(args[0].eqv(&args[1])))
        }
        PrimOp::EqualP => {
            if args.len() != 2 {
                return None;
            }
            Some(Value::Bool(args[0].structural_eq(&args[1])))
        }
        PrimOp::Cons => {
            if args.len() != 2 {
                return None;
            }
            Some(Value::cons(args[0].clone(), args[1].clone()))
        }
        PrimOp::Car => match args {
            [Value::Pair(car, _)] => Some((**car).clone()),
            _ => None,
        },
        PrimOp::Cdr => match args {
            [Value::Pair(_, cdr)] => Some((**cdr).clone()),
            _ => None,
        },
        PrimOp::List => Some(Value::list(args.to_vec())),
        PrimOp::Vector => Some(Value::Vector(std::rc::Rc::new(args.to_vec()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_int_arithmetic() {
        let op = PrimOp::from_name("+").unwrap();
        let v = fold(op, &[Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap();
        assert_eq!(v, Value::Int(6));
    }

    #[test]
    fn refuses_to_fold_division_by_zero() {
        let op = PrimOp::from_name("/").unwrap();
        assert!(fold(op, &[Value::Int(1), Value::Int(0)]).is_none());
    }

    #[test]
    fn refuses_to_fold_overflow() {
        let op = PrimOp::from_name("+").unwrap();
        assert!(fold(op, &[Value::Int(i32::MAX), Value::Int(1)]).is_none());
    }

    #[test]
    fn car_cdr_fold_pairs() {
        let pair = Value::cons(Value::Int(1), Value::Int(2));
        assert_eq!(
            fold(PrimOp::from_name("car").unwrap(), &[pair.clone()]),
            Some(Value::Int(1))
        );
        assert_eq!(
            fold(PrimOp::from_name("cdr").unwrap(), &[pair]),
            Some(Value::Int(2))
        );
    }

    #[test]
    fn mixed_int_float_promotes_to_float() {
        let op = PrimOp::from_name("+").unwrap();
        let v = fold(op, &[Value::Int(1), Value::Float(2.5)]).unwrap();
        assert_eq!(v, Value::Float(3.5));
    }
}
