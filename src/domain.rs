//! Abstract-value traits shared by the analyses.
//!
//! A lattice value must support join, widening, and the partial order; the
//! store and the worklist driver are written against [`AbstractValue`]
//! alone. The two integer lattices additionally implement
//! [`NumericValue`], which gives the transfer functions constants,
//! arithmetic, comparison, and branch refinement without knowing which
//! lattice they run on.

use std::fmt::{Debug, Display};

use crate::lir::{ArithOp, CmpOp};

/// A join-semilattice value with widening.
///
/// Laws (checked by the test helpers below):
/// - `join` is commutative, associative, and idempotent;
/// - `leq(a, a.join(b))` for all `a`, `b`;
/// - bottom is the identity of `join`;
/// - `leq(new, old.widen(new))` for all `old`, `new`.
pub trait AbstractValue: Clone + PartialEq + Debug + Display {
    fn bottom() -> Self;

    fn is_bottom(&self) -> bool;

    /// Least upper bound.
    fn join(&self, other: &Self) -> Self;

    /// Widening: an upper bound of `self` and `new` chosen so that
    /// repeated application stabilizes in finitely many steps. Lattices
    /// of finite height use `join`.
    fn widen(&self, new: &Self) -> Self;

    /// Partial order: `self` is at least as precise as `other`.
    fn leq(&self, other: &Self) -> bool;
}

/// Operations the integer transfer functions need on top of the lattice.
pub trait NumericValue: AbstractValue {
    /// Abstraction of a concrete integer.
    fn from_int(n: i64) -> Self;

    /// The no-information element.
    fn top() -> Self;

    /// Abstract arithmetic. Division by a definite zero is a lattice
    /// event, never a trap.
    fn arith(op: ArithOp, a: &Self, b: &Self) -> Self;

    /// Abstract comparison; concrete outcomes are the integers 0 and 1.
    fn compare(op: CmpOp, a: &Self, b: &Self) -> Self;

    /// Refine `self` under the assumption that `self op other` holds.
    /// Lattices that cannot express the refinement return `self`.
    fn assume(self, op: CmpOp, other: &Self) -> Self;
}
