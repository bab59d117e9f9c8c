//! The integer interval lattice.
//!
//! An element is `[low, high]` with bounds in `ℤ ∪ {-∞, +∞}`; the empty
//! interval is bottom and `[-∞, +∞]` is top. Endpoint arithmetic
//! saturates at the infinities (`n + ∞ = ∞`, `0·∞ = 0`). The lattice has
//! infinite ascending chains, so loop headers apply the classical
//! widening: a bound that moved since the last iteration jumps straight
//! to the corresponding infinity.

use std::cmp::{max, min};
use std::fmt;

use crate::domain::{AbstractValue, NumericValue};
use crate::lir::{ArithOp, CmpOp};

/// Bound of an interval: `-∞`, a finite value, or `+∞`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bound {
    NegInf,
    Finite(i64),
    PosInf,
}

impl Bound {
    pub fn add(&self, other: &Bound) -> Bound {
        use Bound::*;
        match (self, other) {
            (Finite(a), Finite(b)) => Finite(a.saturating_add(*b)),
            (NegInf, PosInf) | (PosInf, NegInf) => PosInf,
            (NegInf, _) | (_, NegInf) => NegInf,
            (PosInf, _) | (_, PosInf) => PosInf,
        }
    }

    pub fn sub(&self, other: &Bound) -> Bound {
        use Bound::*;
        match (self, other) {
            (Finite(a), Finite(b)) => Finite(a.saturating_sub(*b)),
            (PosInf, NegInf) => PosInf,
            (NegInf, PosInf) => NegInf,
            (PosInf, _) => PosInf,
            (NegInf, _) => NegInf,
            (_, PosInf) => NegInf,
            (_, NegInf) => PosInf,
        }
    }

    pub fn mul(&self, other: &Bound) -> Bound {
        use Bound::*;
        match (self, other) {
            (Finite(0), _) | (_, Finite(0)) => Finite(0),
            (Finite(a), Finite(b)) => Finite(a.saturating_mul(*b)),
            (PosInf, PosInf) | (NegInf, NegInf) => PosInf,
            (PosInf, NegInf) | (NegInf, PosInf) => NegInf,
            (PosInf, Finite(n)) | (Finite(n), PosInf) => {
                if *n > 0 {
                    PosInf
                } else {
                    NegInf
                }
            }
            (NegInf, Finite(n)) | (Finite(n), NegInf) => {
                if *n > 0 {
                    NegInf
                } else {
                    PosInf
                }
            }
        }
    }

    /// Endpoint division. The caller guarantees the divisor interval
    /// excludes zero, so a finite `other` is nonzero.
    pub fn div(&self, other: &Bound) -> Bound {
        use Bound::*;
        match (self, other) {
            (Finite(a), Finite(b)) => Finite(a.checked_div(*b).unwrap_or(i64::MAX)),
            (Finite(_), PosInf) | (Finite(_), NegInf) => Finite(0),
            (PosInf, Finite(n)) => {
                if *n > 0 {
                    PosInf
                } else {
                    NegInf
                }
            }
            (NegInf, Finite(n)) => {
                if *n > 0 {
                    NegInf
                } else {
                    PosInf
                }
            }
            (PosInf, PosInf) | (NegInf, NegInf) => PosInf,
            (PosInf, NegInf) | (NegInf, PosInf) => NegInf,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::NegInf => write!(f, "-∞"),
            Bound::Finite(n) => write!(f, "{n}"),
            Bound::PosInf => write!(f, "+∞"),
        }
    }
}

/// An interval `[low, high]`. `low > high` encodes the empty interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    pub low: Bound,
    pub high: Bound,
}

impl Interval {
    pub const EMPTY: Self = Self {
        low: Bound::PosInf,
        high: Bound::NegInf,
    };

    pub const TOP: Self = Self {
        low: Bound::NegInf,
        high: Bound::PosInf,
    };

    /// Normalizing constructor: inverted bounds collapse to empty.
    pub fn new(low: Bound, high: Bound) -> Self {
        if low > high {
            Self::EMPTY
        } else {
            Self { low, high }
        }
    }

    pub fn constant(value: i64) -> Self {
        Self {
            low: Bound::Finite(value),
            high: Bound::Finite(value),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.low > self.high
    }

    pub fn contains_zero(&self) -> bool {
        self.low <= Bound::Finite(0) && Bound::Finite(0) <= self.high
    }

    /// The single concrete value of this interval, if it has exactly one.
    pub fn as_constant(&self) -> Option<i64> {
        match (self.low, self.high) {
            (Bound::Finite(l), Bound::Finite(h)) if l == h => Some(l),
            _ => None,
        }
    }

    pub fn meet(&self, other: &Interval) -> Interval {
        Interval::new(max(self.low, other.low), min(self.high, other.high))
    }

    fn add(&self, other: &Interval) -> Interval {
        Interval::new(self.low.add(&other.low), self.high.add(&other.high))
    }

    fn sub(&self, other: &Interval) -> Interval {
        Interval::new(self.low.sub(&other.high), self.high.sub(&other.low))
    }

    fn mul(&self, other: &Interval) -> Interval {
        let corners = [
            self.low.mul(&other.low),
            self.low.mul(&other.high),
            self.high.mul(&other.low),
            self.high.mul(&other.high),
        ];
        Interval::new(
            corners.iter().min().copied().unwrap_or(Bound::NegInf),
            corners.iter().max().copied().unwrap_or(Bound::PosInf),
        )
    }

    fn div(&self, other: &Interval) -> Interval {
        if other.contains_zero() {
            return Interval::TOP;
        }
        let corners = [
            self.low.div(&other.low),
            self.low.div(&other.high),
            self.high.div(&other.low),
            self.high.div(&other.high),
        ];
        Interval::new(
            corners.iter().min().copied().unwrap_or(Bound::NegInf),
            corners.iter().max().copied().unwrap_or(Bound::PosInf),
        )
    }

    /// Refine this interval under the assumption `self op other`.
    /// Inequality against a non-singleton cannot be expressed and leaves
    /// the interval unchanged.
    pub fn refine(self, op: CmpOp, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::EMPTY;
        }
        let one = Bound::Finite(1);
        match op {
            CmpOp::Lt => self.meet(&Interval::new(Bound::NegInf, other.high.sub(&one))),
            CmpOp::Lte => self.meet(&Interval::new(Bound::NegInf, other.high)),
            CmpOp::Gt => self.meet(&Interval::new(other.low.add(&one), Bound::PosInf)),
            CmpOp::Gte => self.meet(&Interval::new(other.low, Bound::PosInf)),
            CmpOp::Eq => self.meet(other),
            CmpOp::Neq => match (self.as_constant(), other.as_constant()) {
                (Some(a), Some(b)) if a == b => Interval::EMPTY,
                _ => self,
            },
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.low, self.high)
    }
}

impl AbstractValue for Interval {
    fn bottom() -> Self {
        Interval::EMPTY
    }

    fn is_bottom(&self) -> bool {
        self.is_empty()
    }

    fn join(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Interval {
            low: min(self.low, other.low),
            high: max(self.high, other.high),
        }
    }

    fn widen(&self, new: &Self) -> Self {
        if self.is_empty() {
            return *new;
        }
        if new.is_empty() {
            return *self;
        }
        Interval {
            low: if new.low < self.low { Bound::NegInf } else { self.low },
            high: if new.high > self.high { Bound::PosInf } else { self.high },
        }
    }

    fn leq(&self, other: &Self) -> bool {
        if self.is_empty() {
            return true;
        }
        if other.is_empty() {
            return false;
        }
        self.low >= other.low && self.high <= other.high
    }
}

impl NumericValue for Interval {
    fn from_int(n: i64) -> Self {
        Interval::constant(n)
    }

    fn top() -> Self {
        Interval::TOP
    }

    fn arith(op: ArithOp, a: &Self, b: &Self) -> Self {
        if a.is_empty() || b.is_empty() {
            return Interval::EMPTY;
        }
        match op {
            ArithOp::Add => a.add(b),
            ArithOp::Sub => a.sub(b),
            ArithOp::Mul => a.mul(b),
            ArithOp::Div => a.div(b),
        }
    }

    fn compare(op: CmpOp, a: &Self, b: &Self) -> Self {
        if a.is_empty() || b.is_empty() {
            return Interval::EMPTY;
        }
        let always = match op {
            CmpOp::Lt => a.high < b.low,
            CmpOp::Lte => a.high <= b.low,
            CmpOp::Gt => a.low > b.high,
            CmpOp::Gte => a.low >= b.high,
            CmpOp::Eq => matches!((a.as_constant(), b.as_constant()), (Some(x), Some(y)) if x == y),
            CmpOp::Neq => a.high < b.low || b.high < a.low,
        };
        if always {
            return Interval::constant(1);
        }
        let never = match op {
            CmpOp::Lt => a.low >= b.high,
            CmpOp::Lte => a.low > b.high,
            CmpOp::Gt => a.high <= b.low,
            CmpOp::Gte => a.high < b.low,
            CmpOp::Eq => a.high < b.low || b.high < a.low,
            CmpOp::Neq => {
                matches!((a.as_constant(), b.as_constant()), (Some(x), Some(y)) if x == y)
            }
        };
        if never {
            Interval::constant(0)
        } else {
            Interval::new(Bound::Finite(0), Bound::Finite(1))
        }
    }

    fn assume(self, op: CmpOp, other: &Self) -> Self {
        self.refine(op, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tests::{check_lattice_laws, check_widening_stabilizes};
    use Bound::{Finite, NegInf, PosInf};

    fn iv(lo: i64, hi: i64) -> Interval {
        Interval::new(Finite(lo), Finite(hi))
    }

    #[test]
    fn test_bound_saturation() {
        assert_eq!(Finite(1).add(&PosInf), PosInf);
        assert_eq!(Finite(1).sub(&PosInf), NegInf);
        assert_eq!(Finite(0).mul(&PosInf), Finite(0));
        assert_eq!(Finite(-2).mul(&PosInf), NegInf);
        assert_eq!(Finite(i64::MAX).add(&Finite(1)), Finite(i64::MAX));
        assert_eq!(Finite(7).div(&PosInf), Finite(0));
        assert_eq!(PosInf.div(&Finite(-3)), NegInf);
    }

    #[test]
    fn test_join_meet_widen() {
        assert_eq!(iv(0, 10).join(&iv(5, 15)), iv(0, 15));
        assert_eq!(iv(0, 10).meet(&iv(5, 15)), iv(5, 10));
        assert!(iv(0, 10).meet(&iv(20, 30)).is_empty());
        assert_eq!(iv(0, 10).widen(&iv(5, 15)), Interval::new(Finite(0), PosInf));
        assert_eq!(iv(0, 10).widen(&iv(-5, 10)), Interval::new(NegInf, Finite(10)));
        assert_eq!(iv(0, 10).widen(&iv(2, 8)), iv(0, 10));
    }

    #[test]
    fn test_lattice_laws() {
        check_lattice_laws(&[
            Interval::EMPTY,
            Interval::TOP,
            iv(0, 0),
            iv(0, 10),
            iv(-5, 5),
            iv(10, 20),
            Interval::new(NegInf, Finite(3)),
            Interval::new(Finite(3), PosInf),
        ]);
    }

    #[test]
    fn test_widening_stabilizes() {
        // x := x + 1 iterated: [0,0], [0,1], [0,2], ...
        let steps = (1..50).map(|n| iv(0, n));
        check_widening_stabilizes(iv(0, 0), steps);
    }

    #[test]
    fn test_arith() {
        assert_eq!(Interval::arith(ArithOp::Add, &iv(1, 2), &iv(10, 20)), iv(11, 22));
        assert_eq!(Interval::arith(ArithOp::Sub, &iv(1, 2), &iv(10, 20)), iv(-19, -8));
        assert_eq!(Interval::arith(ArithOp::Mul, &iv(-2, 3), &iv(4, 5)), iv(-10, 15));
        assert_eq!(Interval::arith(ArithOp::Div, &iv(10, 20), &iv(2, 5)), iv(2, 10));
    }

    #[test]
    fn test_div_across_zero_is_top() {
        assert_eq!(Interval::arith(ArithOp::Div, &iv(10, 20), &iv(-1, 1)), Interval::TOP);
        assert_eq!(Interval::arith(ArithOp::Div, &iv(10, 20), &iv(0, 0)), Interval::TOP);
    }

    #[test]
    fn test_compare() {
        assert_eq!(Interval::compare(CmpOp::Lt, &iv(0, 3), &iv(5, 9)), iv(1, 1));
        assert_eq!(Interval::compare(CmpOp::Lt, &iv(5, 9), &iv(0, 3)), iv(0, 0));
        assert_eq!(Interval::compare(CmpOp::Lt, &iv(0, 7), &iv(5, 9)), iv(0, 1));
        assert_eq!(Interval::compare(CmpOp::Eq, &iv(4, 4), &iv(4, 4)), iv(1, 1));
        assert_eq!(Interval::compare(CmpOp::Eq, &iv(0, 3), &iv(5, 9)), iv(0, 0));
        assert_eq!(Interval::compare(CmpOp::Neq, &iv(0, 3), &iv(5, 9)), iv(1, 1));
        assert_eq!(Interval::compare(CmpOp::Gte, &iv(5, 9), &iv(0, 5)), iv(0, 1));
    }

    #[test]
    fn test_refine() {
        assert_eq!(iv(0, 100).refine(CmpOp::Lt, &iv(10, 10)), iv(0, 9));
        assert_eq!(iv(0, 100).refine(CmpOp::Gte, &iv(10, 10)), iv(10, 100));
        assert_eq!(iv(0, 100).refine(CmpOp::Eq, &iv(40, 50)), iv(40, 50));
        assert!(iv(5, 5).refine(CmpOp::Neq, &iv(5, 5)).is_empty());
        assert_eq!(iv(0, 10).refine(CmpOp::Neq, &iv(5, 5)), iv(0, 10));
        assert!(iv(0, 3).refine(CmpOp::Gt, &iv(10, 10)).is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(iv(0, 3).to_string(), "[0, 3]");
        assert_eq!(Interval::new(Finite(0), PosInf).to_string(), "[0, +∞]");
        assert_eq!(Interval::TOP.to_string(), "[-∞, +∞]");
    }
}
