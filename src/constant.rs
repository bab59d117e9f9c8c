//! The flat constant lattice.
//!
//! Three kinds of element: `Bot` (unreachable), `Int(n)` (exactly `n`),
//! and `Top` (not a constant). Distinct constants are incomparable, so
//! the lattice has finite height and widening is plain join.
//!
//! Arithmetic short-circuits `Top` before `Bot`; division by a definite
//! zero produces `Bot` (the program point is unreachable under this
//! abstraction), and overflow conservatively produces `Top`.

use std::fmt;

use crate::domain::{AbstractValue, NumericValue};
use crate::lir::{ArithOp, CmpOp};

/// An element of the constant lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstValue {
    Bot,
    Int(i64),
    Top,
}

impl ConstValue {
    fn arith_concrete(op: ArithOp, a: i64, b: i64) -> ConstValue {
        let folded = match op {
            ArithOp::Add => a.checked_add(b),
            ArithOp::Sub => a.checked_sub(b),
            ArithOp::Mul => a.checked_mul(b),
            ArithOp::Div => {
                if b == 0 {
                    return ConstValue::Bot;
                }
                a.checked_div(b)
            }
        };
        match folded {
            Some(n) => ConstValue::Int(n),
            None => ConstValue::Top,
        }
    }

    fn compare_concrete(op: CmpOp, a: i64, b: i64) -> bool {
        match op {
            CmpOp::Eq => a == b,
            CmpOp::Neq => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Lte => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Gte => a >= b,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Bot => write!(f, "Bot"),
            ConstValue::Int(n) => write!(f, "{n}"),
            ConstValue::Top => write!(f, "Top"),
        }
    }
}

impl AbstractValue for ConstValue {
    fn bottom() -> Self {
        ConstValue::Bot
    }

    fn is_bottom(&self) -> bool {
        matches!(self, ConstValue::Bot)
    }

    fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (ConstValue::Bot, v) | (v, ConstValue::Bot) => *v,
            (ConstValue::Top, _) | (_, ConstValue::Top) => ConstValue::Top,
            (ConstValue::Int(a), ConstValue::Int(b)) => {
                if a == b {
                    ConstValue::Int(*a)
                } else {
                    ConstValue::Top
                }
            }
        }
    }

    fn widen(&self, new: &Self) -> Self {
        self.join(new)
    }

    fn leq(&self, other: &Self) -> bool {
        match (self, other) {
            (ConstValue::Bot, _) => true,
            (_, ConstValue::Top) => true,
            (ConstValue::Int(a), ConstValue::Int(b)) => a == b,
            _ => false,
        }
    }
}

impl NumericValue for ConstValue {
    fn from_int(n: i64) -> Self {
        ConstValue::Int(n)
    }

    fn top() -> Self {
        ConstValue::Top
    }

    fn arith(op: ArithOp, a: &Self, b: &Self) -> Self {
        match (a, b) {
            (ConstValue::Top, _) | (_, ConstValue::Top) => ConstValue::Top,
            (ConstValue::Bot, _) | (_, ConstValue::Bot) => ConstValue::Bot,
            (ConstValue::Int(a), ConstValue::Int(b)) => Self::arith_concrete(op, *a, *b),
        }
    }

    fn compare(op: CmpOp, a: &Self, b: &Self) -> Self {
        match (a, b) {
            (ConstValue::Top, _) | (_, ConstValue::Top) => ConstValue::Top,
            (ConstValue::Bot, _) | (_, ConstValue::Bot) => ConstValue::Bot,
            (ConstValue::Int(a), ConstValue::Int(b)) => {
                ConstValue::Int(Self::compare_concrete(op, *a, *b) as i64)
            }
        }
    }

    fn assume(self, _op: CmpOp, _other: &Self) -> Self {
        // The constant lattice does not refine at branches.
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tests::check_lattice_laws;
    use ConstValue::{Bot, Int, Top};

    #[test]
    fn test_join() {
        assert_eq!(Int(3).join(&Int(3)), Int(3));
        assert_eq!(Int(3).join(&Int(4)), Top);
        assert_eq!(Bot.join(&Int(7)), Int(7));
        assert_eq!(Top.join(&Int(7)), Top);
    }

    #[test]
    fn test_lattice_laws() {
        check_lattice_laws(&[Bot, Int(-10), Int(0), Int(5), Int(i64::MAX), Top]);
    }

    #[test]
    fn test_arith() {
        assert_eq!(ConstValue::arith(ArithOp::Add, &Int(3), &Int(4)), Int(7));
        assert_eq!(ConstValue::arith(ArithOp::Sub, &Int(3), &Int(4)), Int(-1));
        assert_eq!(ConstValue::arith(ArithOp::Mul, &Int(3), &Int(4)), Int(12));
        assert_eq!(ConstValue::arith(ArithOp::Div, &Int(12), &Int(4)), Int(3));
        assert_eq!(ConstValue::arith(ArithOp::Add, &Top, &Int(1)), Top);
        assert_eq!(ConstValue::arith(ArithOp::Add, &Bot, &Int(1)), Bot);
        // Top takes precedence over Bot.
        assert_eq!(ConstValue::arith(ArithOp::Add, &Top, &Bot), Top);
    }

    #[test]
    fn test_div_by_zero_is_bottom() {
        assert_eq!(ConstValue::arith(ArithOp::Div, &Int(10), &Int(0)), Bot);
        assert_eq!(ConstValue::arith(ArithOp::Div, &Top, &Int(0)), Top);
    }

    #[test]
    fn test_overflow_is_top() {
        assert_eq!(ConstValue::arith(ArithOp::Add, &Int(i64::MAX), &Int(1)), Top);
        assert_eq!(ConstValue::arith(ArithOp::Div, &Int(i64::MIN), &Int(-1)), Top);
    }

    #[test]
    fn test_compare() {
        assert_eq!(ConstValue::compare(CmpOp::Lt, &Int(1), &Int(2)), Int(1));
        assert_eq!(ConstValue::compare(CmpOp::Gte, &Int(1), &Int(2)), Int(0));
        assert_eq!(ConstValue::compare(CmpOp::Eq, &Int(2), &Int(2)), Int(1));
        assert_eq!(ConstValue::compare(CmpOp::Neq, &Int(2), &Int(2)), Int(0));
        assert_eq!(ConstValue::compare(CmpOp::Lt, &Top, &Int(2)), Top);
        assert_eq!(ConstValue::compare(CmpOp::Lt, &Bot, &Int(2)), Bot);
    }

    #[test]
    fn test_display() {
        assert_eq!(Int(42).to_string(), "42");
        assert_eq!(Top.to_string(), "Top");
    }
}
