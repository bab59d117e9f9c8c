//! Instruction-level transfer functions for the integer analyses.
//!
//! One generic transfer serves both the constant and the interval
//! analysis; the lattice-specific behavior (arithmetic, comparison,
//! branch refinement) comes in through [`NumericValue`]. The analyses are
//! intraprocedural: calls do not descend into callees, they smash every
//! addr-taken int and the call's own result to top and continue at the
//! call's `next_bb`.
//!
//! Pointers are not tracked, but they leak into the integer world in two
//! places. A `Store` through an int pointer may write any int whose
//! address was taken, so it weak-updates the addr-taken set with the
//! stored value; a `Load` into an int reads unknown memory and goes
//! straight to top.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::marker::PhantomData;

use crate::constant::ConstValue;
use crate::domain::NumericValue;
use crate::error::{Error, Result};
use crate::interval::Interval;
use crate::lir::{BasicBlock, CmpOp, Function, Instruction, Operand, Program, Terminal, Variable};
use crate::store::Store;
use crate::worklist::{BlockEffect, Engine, Transfer};

/// Generic transfer for the integer analyses of one function.
pub struct IntTransfer<'p, V> {
    func: &'p Function,
    /// Int-typed variables whose address is taken anywhere in the
    /// function; the targets of weak updates and post-call smashing.
    addrof_ints: BTreeSet<String>,
    _value: PhantomData<V>,
}

/// Comparisons defined earlier in the current block, used to refine
/// branch targets. Keyed by the name of the variable holding the result.
type CmpDefs = HashMap<String, (CmpOp, Operand, Operand)>;

impl<'p, V: NumericValue> IntTransfer<'p, V> {
    pub fn new(program: &'p Program, func: &'p Function, addrof_locals_only: bool) -> Self {
        IntTransfer {
            func,
            addrof_ints: func.addrof_ints(program, addrof_locals_only),
            _value: PhantomData,
        }
    }

    fn eval(&self, op: &Operand, store: &Store<V>) -> V {
        match op {
            Operand::CInt(n) => V::from_int(*n),
            Operand::Var(v) => store.get(&v.name),
        }
    }

    fn require_int(&self, v: &Variable, context: &str) -> Result<()> {
        if v.typ.is_int() {
            Ok(())
        } else {
            Err(Error::TypeMismatch(format!(
                "{context} expects an int operand, got {} of type {}",
                v.name, v.typ
            )))
        }
    }

    fn require_int_operand(&self, op: &Operand, context: &str) -> Result<()> {
        match op.var() {
            Some(v) => self.require_int(v, context),
            None => Ok(()),
        }
    }

    fn instruction(&self, inst: &Instruction, store: &mut Store<V>, cmps: &mut CmpDefs) -> Result<()> {
        match inst {
            Instruction::Copy { lhs, op } => {
                cmps.remove(&lhs.name);
                if lhs.typ.is_int() {
                    self.require_int_operand(op, "copy")?;
                    let value = self.eval(op, store);
                    store.set(&lhs.name, value);
                }
            }
            Instruction::Arith { lhs, aop, op1, op2 } => {
                cmps.remove(&lhs.name);
                self.require_int(lhs, "arithmetic")?;
                self.require_int_operand(op1, "arithmetic")?;
                self.require_int_operand(op2, "arithmetic")?;
                let a = self.eval(op1, store);
                let b = self.eval(op2, store);
                store.set(&lhs.name, V::arith(*aop, &a, &b));
            }
            Instruction::Cmp { lhs, rop, op1, op2 } => {
                self.require_int(lhs, "comparison")?;
                self.require_int_operand(op1, "comparison")?;
                self.require_int_operand(op2, "comparison")?;
                let a = self.eval(op1, store);
                let b = self.eval(op2, store);
                store.set(&lhs.name, V::compare(*rop, &a, &b));
                cmps.insert(lhs.name.clone(), (*rop, op1.clone(), op2.clone()));
            }
            Instruction::Alloc { lhs, .. }
            | Instruction::Addrof { lhs, .. }
            | Instruction::Gep { lhs, .. }
            | Instruction::Gfp { lhs, .. } => {
                // The result is a pointer; the integer store drops it.
                cmps.remove(&lhs.name);
                store.remove(&lhs.name);
            }
            Instruction::Load { lhs, .. } => {
                cmps.remove(&lhs.name);
                if lhs.typ.is_int() {
                    store.set(&lhs.name, V::top());
                } else {
                    store.remove(&lhs.name);
                }
            }
            Instruction::Store { op, .. } => {
                // Weak update: the write may land on any addr-taken int.
                if op.var().map_or(true, |v| v.typ.is_int()) {
                    let value = self.eval(op, store);
                    for name in &self.addrof_ints {
                        let joined = store.get(name).join(&value);
                        store.set(name, joined);
                    }
                }
            }
        }
        Ok(())
    }

    /// Everything a call does to the integer state: the callee may write
    /// through any pointer it can reach, and its return value is unknown.
    fn apply_call(&self, lhs: &Option<Variable>, store: &mut Store<V>) {
        for name in &self.addrof_ints {
            store.set(name, V::top());
        }
        if let Some(lhs) = lhs {
            if lhs.typ.is_int() {
                store.set(&lhs.name, V::top());
            }
        }
    }

    /// Refine `store` under the assumption that the block's branch
    /// condition `cond` is non-zero (`taken`) or zero. Only conditions
    /// defined by a comparison within the same block refine the compared
    /// operands; everything else passes through unchanged.
    fn refine_branch(&self, store: &mut Store<V>, cond: &Operand, cmps: &CmpDefs, taken: bool) {
        let Some(cv) = cond.var() else { return };

        if let Some((rop, op1, op2)) = cmps.get(&cv.name) {
            // The condition is 0 or 1 here, so both outcomes are exact.
            let outcome = V::from_int(taken as i64);
            let refined = store.get(&cv.name).assume(CmpOp::Eq, &outcome);
            store.set(&cv.name, refined);

            let op = if taken { *rop } else { rop.negate() };
            if let Some(v1) = op1.var() {
                let bound = self.eval(op2, store);
                if !bound.is_bottom() {
                    let refined = store.get(&v1.name).assume(op, &bound);
                    store.set(&v1.name, refined);
                }
            }
            if let Some(v2) = op2.var() {
                let bound = self.eval(op1, store);
                if !bound.is_bottom() {
                    let refined = store.get(&v2.name).assume(op.flip(), &bound);
                    store.set(&v2.name, refined);
                }
            }
        } else if !taken {
            // A falsified condition is exactly zero whatever defined it.
            let refined = store.get(&cv.name).assume(CmpOp::Eq, &V::from_int(0));
            store.set(&cv.name, refined);
        }
    }
}

impl<V: NumericValue> Transfer for IntTransfer<'_, V> {
    type Value = V;

    fn entry_store(&self) -> Store<V> {
        let mut store = Store::new();
        for param in &self.func.params {
            if param.typ.is_int() {
                store.set(&param.name, V::top());
            }
        }
        store
    }

    fn block(
        &mut self,
        _label: &str,
        bb: &BasicBlock,
        mut store: Store<V>,
        _record: bool,
    ) -> Result<BlockEffect<V>> {
        let mut cmps = CmpDefs::new();
        for inst in &bb.insts {
            self.instruction(inst, &mut store, &mut cmps)?;
        }

        let deltas = match &bb.term {
            Terminal::Jump(label) => vec![(label.clone(), store.clone())],
            Terminal::Branch { cond, tt, ff } => {
                let mut t_store = store.clone();
                let mut f_store = store.clone();
                self.refine_branch(&mut t_store, cond, &cmps, true);
                self.refine_branch(&mut f_store, cond, &cmps, false);
                vec![(tt.clone(), t_store), (ff.clone(), f_store)]
            }
            Terminal::Ret(_) => vec![],
            Terminal::CallDir { lhs, next_bb, .. }
            | Terminal::CallIdr { lhs, next_bb, .. }
            | Terminal::CallExt { lhs, next_bb, .. } => {
                self.apply_call(lhs, &mut store);
                vec![(next_bb.clone(), store.clone())]
            }
        };

        Ok(BlockEffect { exit: store, deltas })
    }
}

/// Run the constant analysis on one function and return the exit store of
/// every block the worklist ever visited.
pub fn analyze_constants(
    program: &Program,
    func_name: &str,
    addrof_locals_only: bool,
) -> Result<BTreeMap<String, Store<ConstValue>>> {
    let func = program.function(func_name)?;
    let transfer = IntTransfer::<ConstValue>::new(program, func, addrof_locals_only);
    let (solution, _) = Engine::new(func_name, func, transfer).run()?;
    Ok(solution)
}

/// Run the interval analysis on one function, widening at loop headers.
pub fn analyze_intervals(
    program: &Program,
    func_name: &str,
    addrof_locals_only: bool,
) -> Result<BTreeMap<String, Store<Interval>>> {
    let func = program.function(func_name)?;
    let transfer = IntTransfer::<Interval>::new(program, func, addrof_locals_only);
    let (solution, _) = Engine::new(func_name, func, transfer).with_widening().run()?;
    Ok(solution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::ConstValue::{Int, Top};
    use serde_json::json;

    fn int_var(name: &str) -> serde_json::Value {
        json!({"name": name, "typ": "Int"})
    }

    fn int_ptr(name: &str) -> serde_json::Value {
        json!({"name": name, "typ": {"Pointer": "Int"}})
    }

    fn var_op(name: &str) -> serde_json::Value {
        json!({"Var": int_var(name)})
    }

    fn program_with(locals: serde_json::Value, body: serde_json::Value) -> Program {
        Program::parse(
            json!({
                "functions": {"test": {"locals": locals, "body": body}}
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn test_straight_line_constants() {
        // a := 3; b := a + 4
        let program = program_with(
            json!({"a": int_var("a"), "b": int_var("b")}),
            json!({
                "entry": {
                    "insts": [
                        {"Copy": {"lhs": int_var("a"), "op": {"CInt": 3}}},
                        {"Arith": {"lhs": int_var("b"), "aop": "add",
                                   "op1": var_op("a"), "op2": {"CInt": 4}}},
                    ],
                    "term": {"Ret": null},
                }
            }),
        );
        let solution = analyze_constants(&program, "test", false).unwrap();
        let exit = &solution["entry"];
        assert_eq!(exit.get("a"), Int(3));
        assert_eq!(exit.get("b"), Int(7));
    }

    #[test]
    fn test_constants_join_to_top() {
        // Two predecessors assign x := 1 and x := 2; their join sees Top.
        let program = program_with(
            json!({"x": int_var("x")}),
            json!({
                "entry": {"insts": [],
                          "term": {"Branch": {"cond": {"CInt": 1}, "tt": "bb1", "ff": "bb2"}}},
                "bb1": {"insts": [{"Copy": {"lhs": int_var("x"), "op": {"CInt": 1}}}],
                        "term": {"Jump": "join"}},
                "bb2": {"insts": [{"Copy": {"lhs": int_var("x"), "op": {"CInt": 2}}}],
                        "term": {"Jump": "join"}},
                "join": {"insts": [], "term": {"Ret": null}},
            }),
        );
        let solution = analyze_constants(&program, "test", false).unwrap();
        assert_eq!(solution["join"].get("x"), Top);
        assert_eq!(solution["bb1"].get("x"), Int(1));
        assert_eq!(solution["bb2"].get("x"), Int(2));
    }

    #[test]
    fn test_store_weak_update() {
        // a := 5; p := &a; *p := 7  =>  a is Top (5 joined with 7).
        let program = program_with(
            json!({"a": int_var("a"), "p": int_ptr("p")}),
            json!({
                "entry": {
                    "insts": [
                        {"Copy": {"lhs": int_var("a"), "op": {"CInt": 5}}},
                        {"Addrof": {"lhs": int_ptr("p"), "rhs": int_var("a")}},
                        {"Store": {"dst": int_ptr("p"), "op": {"CInt": 7}}},
                    ],
                    "term": {"Ret": null},
                }
            }),
        );
        let solution = analyze_constants(&program, "test", false).unwrap();
        assert_eq!(solution["entry"].get("a"), Top);
    }

    #[test]
    fn test_call_smashes_addrof_ints_and_lhs() {
        let program = program_with(
            json!({"a": int_var("a"), "p": int_ptr("p"), "r": int_var("r")}),
            json!({
                "entry": {
                    "insts": [
                        {"Copy": {"lhs": int_var("a"), "op": {"CInt": 5}}},
                        {"Addrof": {"lhs": int_ptr("p"), "rhs": int_var("a")}},
                    ],
                    "term": {"CallExt": {"lhs": int_var("r"), "ext_callee": "input",
                                         "args": [], "next_bb": "after"}},
                },
                "after": {"insts": [], "term": {"Ret": null}},
            }),
        );
        let solution = analyze_constants(&program, "test", false).unwrap();
        assert_eq!(solution["after"].get("a"), Top);
        assert_eq!(solution["after"].get("r"), Top);
    }

    #[test]
    fn test_load_into_int_is_top() {
        let program = program_with(
            json!({"a": int_var("a"), "p": int_ptr("p"), "x": int_var("x")}),
            json!({
                "entry": {
                    "insts": [
                        {"Copy": {"lhs": int_var("a"), "op": {"CInt": 1}}},
                        {"Addrof": {"lhs": int_ptr("p"), "rhs": int_var("a")}},
                        {"Load": {"lhs": int_var("x"), "src": int_ptr("p")}},
                    ],
                    "term": {"Ret": null},
                }
            }),
        );
        let solution = analyze_constants(&program, "test", false).unwrap();
        assert_eq!(solution["entry"].get("x"), Top);
    }

    #[test]
    fn test_arith_on_pointer_is_type_mismatch() {
        let program = program_with(
            json!({"p": int_ptr("p"), "x": int_var("x")}),
            json!({
                "entry": {
                    "insts": [
                        {"Arith": {"lhs": int_var("x"), "aop": "add",
                                   "op1": {"Var": int_ptr("p")}, "op2": {"CInt": 1}}},
                    ],
                    "term": {"Ret": null},
                }
            }),
        );
        let err = analyze_constants(&program, "test", false).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));
    }

    #[test]
    fn test_unknown_function() {
        let program = program_with(json!({}), json!({"entry": {"insts": [], "term": {"Ret": null}}}));
        let err = analyze_constants(&program, "missing", false).unwrap_err();
        assert!(matches!(err, Error::UnknownFunction(_)));
    }

    #[test]
    fn test_interval_loop_widens_to_infinity() {
        // i := 0; while (i < 100) i := i + 1
        let program = program_with(
            json!({"i": int_var("i"), "c": int_var("c")}),
            json!({
                "entry": {
                    "insts": [{"Copy": {"lhs": int_var("i"), "op": {"CInt": 0}}}],
                    "term": {"Jump": "head"},
                },
                "head": {
                    "insts": [{"Cmp": {"lhs": int_var("c"), "rop": "lt",
                                       "op1": var_op("i"), "op2": {"CInt": 100}}}],
                    "term": {"Branch": {"cond": var_op("c"), "tt": "body", "ff": "done"}},
                },
                "body": {
                    "insts": [{"Arith": {"lhs": int_var("i"), "aop": "add",
                                         "op1": var_op("i"), "op2": {"CInt": 1}}}],
                    "term": {"Jump": "head"},
                },
                "done": {"insts": [], "term": {"Ret": null}},
            }),
        );
        let solution = analyze_intervals(&program, "test", false).unwrap();
        assert_eq!(solution["head"].get("i").to_string(), "[0, +∞]");
        // The exit branch knows i >= 100.
        assert_eq!(solution["done"].get("i").to_string(), "[100, +∞]");
        // The body sees the refined bound i < 100 before incrementing.
        assert_eq!(solution["body"].get("i").to_string(), "[1, 100]");
    }

    #[test]
    fn test_constant_analysis_does_not_refine_branches() {
        let program = program_with(
            json!({"x": int_var("x"), "c": int_var("c")}),
            json!({
                "entry": {
                    "insts": [{"Cmp": {"lhs": int_var("c"), "rop": "lt",
                                       "op1": var_op("x"), "op2": {"CInt": 10}}}],
                    "term": {"Branch": {"cond": var_op("c"), "tt": "tt", "ff": "ff"}},
                },
                "tt": {"insts": [], "term": {"Ret": null}},
                "ff": {"insts": [], "term": {"Ret": null}},
            }),
        );
        let solution = analyze_constants(&program, "test", false).unwrap();
        // x was never assigned: it stays bottom (absent) on both arms.
        assert!(solution["tt"].keys().all(|k| k != "x"));
        assert!(solution["ff"].keys().all(|k| k != "x"));
    }
}
