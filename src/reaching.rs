//! Reaching-definitions analysis.
//!
//! This driver composes the rest of the toolkit: it generates and solves
//! the program's set constraints to get points-to sets, derives mod/ref
//! summaries from the call graph, and then runs the generic worklist
//! engine with a transfer function whose abstract values are *sets of
//! program points* (`bb.idx` / `bb.term`).
//!
//! Scalar assignments update their target strongly (the old definition
//! set is replaced); a store through a pointer with more than one
//! possible cell updates every cell weakly (old set plus this point).
//! Calls kill and generate through the callee's mod summary.
//!
//! Besides the per-block stores the analysis records a per-program-point
//! solution on its final reporting pass: for each point, the definitions
//! that reach whatever the instruction references: its operands, the
//! cells it may read through pointers, and the prior definitions of
//! whatever it overwrites. Points with nothing to report are omitted.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::callgraph::{mod_ref_summaries, points_to_key, ModRef, PointsTo};
use crate::constraints;
use crate::domain::AbstractValue;
use crate::error::Result;
use crate::lir::{BasicBlock, Function, Instruction, Operand, Program, Terminal, Variable};
use crate::solver;
use crate::store::Store;
use crate::worklist::{BlockEffect, Engine, Transfer};

/// A position in a function: an instruction index within a block, or the
/// block's terminal. Ordering is block label first, then index, with the
/// terminal after every instruction of its block.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramPoint {
    pub bb: String,
    pub loc: Loc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Loc {
    Inst(usize),
    Term,
}

impl ProgramPoint {
    pub fn inst(bb: &str, idx: usize) -> Self {
        ProgramPoint {
            bb: bb.to_string(),
            loc: Loc::Inst(idx),
        }
    }

    pub fn term(bb: &str) -> Self {
        ProgramPoint {
            bb: bb.to_string(),
            loc: Loc::Term,
        }
    }
}

impl fmt::Display for ProgramPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.loc {
            Loc::Inst(idx) => write!(f, "{}.{idx}", self.bb),
            Loc::Term => write!(f, "{}.term", self.bb),
        }
    }
}

/// The abstract value of the analysis: the set of points that may have
/// produced a variable's current value. The powerset lattice is finite
/// per function, so widening is join.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Defs(pub BTreeSet<ProgramPoint>);

impl fmt::Display for Defs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self.0.iter().map(|pp| pp.to_string()).collect();
        write!(f, "{{{}}}", items.join(", "))
    }
}

impl AbstractValue for Defs {
    fn bottom() -> Self {
        Defs::default()
    }

    fn is_bottom(&self) -> bool {
        self.0.is_empty()
    }

    fn join(&self, other: &Self) -> Self {
        Defs(self.0.union(&other.0).cloned().collect())
    }

    fn widen(&self, new: &Self) -> Self {
        self.join(new)
    }

    fn leq(&self, other: &Self) -> bool {
        self.0.is_subset(&other.0)
    }
}

/// Per-program-point reaching sets, keyed in report order.
pub type ReachingSolution = BTreeMap<ProgramPoint, BTreeSet<ProgramPoint>>;

struct ReachingTransfer<'p> {
    fname: String,
    func: &'p Function,
    points_to: PointsTo,
    summaries: BTreeMap<String, ModRef>,
    addr_taken: BTreeSet<String>,
    solution: ReachingSolution,
}

impl<'p> ReachingTransfer<'p> {
    /// Cells a pointer variable may reference.
    fn cells(&self, var: &Variable) -> BTreeSet<String> {
        let key = points_to_key(&self.fname, self.func, var);
        self.points_to.get(&key).cloned().unwrap_or_default()
    }

    /// Record the definitions reaching `pp`: the union of the current
    /// sets of every referenced name. Nothing is recorded when the union
    /// is empty.
    fn record(&mut self, pp: ProgramPoint, referenced: &[String], store: &Store<Defs>) {
        let mut reaching = BTreeSet::new();
        for name in referenced {
            reaching.extend(store.get(name).0);
        }
        if !reaching.is_empty() {
            self.solution.insert(pp, reaching);
        }
    }

    fn operand_names(ops: &[&Operand]) -> Vec<String> {
        ops.iter()
            .filter_map(|op| op.var())
            .map(|v| v.name.clone())
            .collect()
    }

    fn instruction(
        &mut self,
        pp: ProgramPoint,
        inst: &Instruction,
        store: &mut Store<Defs>,
        record: bool,
    ) {
        // Everything the instruction touches, for the solution record:
        // names it reads plus names it overwrites (their *prior* defs).
        let mut referenced: Vec<String>;
        match inst {
            Instruction::Copy { lhs, op } => {
                referenced = Self::operand_names(&[op]);
                referenced.push(lhs.name.clone());
                if record {
                    self.record(pp.clone(), &referenced, store);
                }
                store.set(&lhs.name, Defs(BTreeSet::from([pp])));
            }
            Instruction::Arith { lhs, op1, op2, .. } | Instruction::Cmp { lhs, op1, op2, .. } => {
                referenced = Self::operand_names(&[op1, op2]);
                referenced.push(lhs.name.clone());
                if record {
                    self.record(pp.clone(), &referenced, store);
                }
                store.set(&lhs.name, Defs(BTreeSet::from([pp])));
            }
            Instruction::Alloc { lhs, num, .. } => {
                referenced = Self::operand_names(&[num]);
                referenced.push(lhs.name.clone());
                if record {
                    self.record(pp.clone(), &referenced, store);
                }
                store.set(&lhs.name, Defs(BTreeSet::from([pp])));
            }
            Instruction::Addrof { lhs, .. } => {
                // Taking an address reads nothing.
                referenced = vec![lhs.name.clone()];
                if record {
                    self.record(pp.clone(), &referenced, store);
                }
                store.set(&lhs.name, Defs(BTreeSet::from([pp])));
            }
            Instruction::Gep { lhs, src, idx } => {
                referenced = Self::operand_names(&[idx]);
                referenced.push(src.name.clone());
                referenced.push(lhs.name.clone());
                if record {
                    self.record(pp.clone(), &referenced, store);
                }
                store.set(&lhs.name, Defs(BTreeSet::from([pp])));
            }
            Instruction::Gfp { lhs, src, .. } => {
                referenced = vec![src.name.clone(), lhs.name.clone()];
                if record {
                    self.record(pp.clone(), &referenced, store);
                }
                store.set(&lhs.name, Defs(BTreeSet::from([pp])));
            }
            Instruction::Load { lhs, src } => {
                referenced = vec![src.name.clone()];
                referenced.extend(self.cells(src));
                referenced.push(lhs.name.clone());
                if record {
                    self.record(pp.clone(), &referenced, store);
                }
                store.set(&lhs.name, Defs(BTreeSet::from([pp])));
            }
            Instruction::Store { dst, op } => {
                let mut targets: Vec<String> = self.cells(dst).into_iter().collect();
                if targets.is_empty() {
                    // No points-to information: any address-taken
                    // variable may be written.
                    targets = self.addr_taken.iter().cloned().collect();
                }
                referenced = Self::operand_names(&[op]);
                referenced.push(dst.name.clone());
                referenced.extend(targets.iter().cloned());
                if record {
                    self.record(pp.clone(), &referenced, store);
                }
                let strong = targets.len() == 1;
                for target in targets {
                    let new = if strong {
                        Defs(BTreeSet::from([pp.clone()]))
                    } else {
                        let mut old = store.get(&target);
                        old.0.insert(pp.clone());
                        old
                    };
                    store.set(&target, new);
                }
            }
        }
    }

    /// Mod set of the functions a call terminal may invoke.
    fn callee_mods(&self, term: &Terminal) -> BTreeSet<String> {
        let mut mods = BTreeSet::new();
        match term {
            Terminal::CallDir { callee, .. } => {
                if let Some(summary) = self.summaries.get(callee) {
                    mods.extend(summary.mods.iter().cloned());
                }
            }
            Terminal::CallIdr { fptr, .. } => {
                for callee in self.cells(fptr) {
                    if let Some(summary) = self.summaries.get(&callee) {
                        mods.extend(summary.mods.iter().cloned());
                    }
                }
            }
            _ => {}
        }
        mods
    }

    fn terminal(
        &mut self,
        pp: ProgramPoint,
        term: &Terminal,
        store: &mut Store<Defs>,
        record: bool,
    ) {
        match term {
            Terminal::Jump(_) => {}
            Terminal::Branch { cond, .. } => {
                let referenced = Self::operand_names(&[cond]);
                if record {
                    self.record(pp, &referenced, store);
                }
            }
            Terminal::Ret(op) => {
                let referenced = match op {
                    Some(op) => Self::operand_names(&[op]),
                    None => vec![],
                };
                if record {
                    self.record(pp, &referenced, store);
                }
            }
            Terminal::CallDir { lhs, args, .. }
            | Terminal::CallIdr { lhs, args, .. }
            | Terminal::CallExt { lhs, args, .. } => {
                let mods = self.callee_mods(term);

                let mut referenced: Vec<String> =
                    args.iter().filter_map(|a| a.var()).map(|v| v.name.clone()).collect();
                if let Terminal::CallIdr { fptr, .. } = term {
                    referenced.push(fptr.name.clone());
                }
                if let Some(lhs) = lhs {
                    referenced.push(lhs.name.clone());
                }
                referenced.extend(mods.iter().cloned());
                if record {
                    self.record(pp.clone(), &referenced, store);
                }

                // The callee may redefine anything in its mod set.
                for name in &mods {
                    let mut defs = store.get(name);
                    defs.0.insert(pp.clone());
                    store.set(name, defs);
                }
                if let Some(lhs) = lhs {
                    store.set(&lhs.name, Defs(BTreeSet::from([pp])));
                }
            }
        }
    }
}

impl Transfer for ReachingTransfer<'_> {
    type Value = Defs;

    fn entry_store(&self) -> Store<Defs> {
        Store::new()
    }

    fn block(
        &mut self,
        label: &str,
        bb: &BasicBlock,
        mut store: Store<Defs>,
        record: bool,
    ) -> Result<BlockEffect<Defs>> {
        for (idx, inst) in bb.insts.iter().enumerate() {
            self.instruction(ProgramPoint::inst(label, idx), inst, &mut store, record);
        }
        self.terminal(ProgramPoint::term(label), &bb.term, &mut store, record);

        let deltas = bb
            .term
            .successors()
            .into_iter()
            .map(|succ| (succ.to_string(), store.clone()))
            .collect();
        Ok(BlockEffect { exit: store, deltas })
    }
}

/// Run the full pipeline on `func_name`: constraints, points-to, mod/ref
/// (call graph seeded at the analyzed function), then the reaching-defs
/// fixpoint. Returns the per-program-point solution.
pub fn analyze_reaching_defs(program: &Program, func_name: &str) -> Result<ReachingSolution> {
    let func = program.function(func_name)?;

    let constraint_set = constraints::generate(program);
    let points_to = solver::solve_constraints(&constraints::render(&constraint_set))?;
    let summaries = mod_ref_summaries(program, &points_to, func_name);

    let transfer = ReachingTransfer {
        fname: func_name.to_string(),
        func,
        points_to,
        summaries,
        addr_taken: func.addr_taken(),
        solution: ReachingSolution::new(),
    };
    let (_, transfer) = Engine::new(func_name, func, transfer).run()?;
    Ok(transfer.solution)
}

/// Render the solution: `pp -> {pp1, pp2}` per line, in program-point
/// order (block label ascending, instruction index numeric, terminal
/// last).
pub fn write_reaching(
    out: &mut impl std::io::Write,
    solution: &ReachingSolution,
) -> std::io::Result<()> {
    for (pp, defs) in solution {
        let items: Vec<String> = defs.iter().map(|d| d.to_string()).collect();
        writeln!(out, "{pp} -> {{{}}}", items.join(", "))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn int_var(name: &str) -> serde_json::Value {
        json!({"name": name, "typ": "Int"})
    }

    fn int_ptr(name: &str) -> serde_json::Value {
        json!({"name": name, "typ": {"Pointer": "Int"}})
    }

    fn pp(s: &str) -> ProgramPoint {
        let (bb, loc) = s.rsplit_once('.').unwrap();
        if loc == "term" {
            ProgramPoint::term(bb)
        } else {
            ProgramPoint::inst(bb, loc.parse().unwrap())
        }
    }

    #[test]
    fn test_program_point_ordering() {
        let mut points = vec![pp("bb1.term"), pp("bb1.11"), pp("bb1.9"), pp("bb1.0"), pp("aa.2")];
        points.sort();
        let rendered: Vec<String> = points.iter().map(|p| p.to_string()).collect();
        assert_eq!(rendered, ["aa.2", "bb1.0", "bb1.9", "bb1.11", "bb1.term"]);
    }

    #[test]
    fn test_kill_and_use() {
        // entry.0: x := 1; entry.1: x := 2; term: ret x
        let program = Program::parse(
            json!({
                "functions": {
                    "test": {
                        "ret_ty": "Int",
                        "locals": {"x": int_var("x")},
                        "body": {
                            "entry": {
                                "insts": [
                                    {"Copy": {"lhs": int_var("x"), "op": {"CInt": 1}}},
                                    {"Copy": {"lhs": int_var("x"), "op": {"CInt": 2}}},
                                ],
                                "term": {"Ret": {"Var": int_var("x")}},
                            }
                        }
                    }
                }
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();

        let solution = analyze_reaching_defs(&program, "test").unwrap();
        assert_eq!(solution[&pp("entry.1")], BTreeSet::from([pp("entry.0")]));
        assert_eq!(solution[&pp("entry.term")], BTreeSet::from([pp("entry.1")]));
        // The first definition reads nothing, so it is not reported.
        assert!(!solution.contains_key(&pp("entry.0")));
    }

    #[test]
    fn test_store_strong_when_single_cell() {
        // a := 1; p := &a; *p := 2; x := a
        let program = Program::parse(
            json!({
                "functions": {
                    "test": {
                        "locals": {"a": int_var("a"), "x": int_var("x"), "p": int_ptr("p")},
                        "body": {
                            "entry": {
                                "insts": [
                                    {"Copy": {"lhs": int_var("a"), "op": {"CInt": 1}}},
                                    {"Addrof": {"lhs": int_ptr("p"), "rhs": int_var("a")}},
                                    {"Store": {"dst": int_ptr("p"), "op": {"CInt": 2}}},
                                    {"Copy": {"lhs": int_var("x"), "op": {"Var": int_var("a")}}},
                                ],
                                "term": {"Ret": null},
                            }
                        }
                    }
                }
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();

        let solution = analyze_reaching_defs(&program, "test").unwrap();
        // p points only to a, so the store kills entry.0.
        assert_eq!(solution[&pp("entry.3")], BTreeSet::from([pp("entry.2")]));
        // The store itself sees a's old definition and p's definition.
        assert_eq!(
            solution[&pp("entry.2")],
            BTreeSet::from([pp("entry.0"), pp("entry.1")])
        );
    }

    #[test]
    fn test_store_weak_when_multiple_cells() {
        // Both a and b may be written: old definitions survive.
        let program = Program::parse(
            json!({
                "functions": {
                    "test": {
                        "locals": {
                            "a": int_var("a"), "b": int_var("b"),
                            "p": int_ptr("p"), "x": int_var("x"), "c": int_var("c"),
                        },
                        "body": {
                            "entry": {
                                "insts": [
                                    {"Copy": {"lhs": int_var("a"), "op": {"CInt": 1}}},
                                    {"Copy": {"lhs": int_var("b"), "op": {"CInt": 2}}},
                                    {"Cmp": {"lhs": int_var("c"), "rop": "eq",
                                             "op1": {"CInt": 0}, "op2": {"CInt": 0}}},
                                ],
                                "term": {"Branch": {"cond": {"Var": int_var("c")},
                                                     "tt": "take_a", "ff": "take_b"}},
                            },
                            "take_a": {
                                "insts": [{"Addrof": {"lhs": int_ptr("p"), "rhs": int_var("a")}}],
                                "term": {"Jump": "merge"},
                            },
                            "take_b": {
                                "insts": [{"Addrof": {"lhs": int_ptr("p"), "rhs": int_var("b")}}],
                                "term": {"Jump": "merge"},
                            },
                            "merge": {
                                "insts": [
                                    {"Store": {"dst": int_ptr("p"), "op": {"CInt": 9}}},
                                    {"Copy": {"lhs": int_var("x"), "op": {"Var": int_var("a")}}},
                                ],
                                "term": {"Ret": null},
                            },
                        }
                    }
                }
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();

        let solution = analyze_reaching_defs(&program, "test").unwrap();
        // a may have been written by the store or kept its original def.
        assert_eq!(
            solution[&pp("merge.1")],
            BTreeSet::from([pp("entry.0"), pp("merge.0")])
        );
    }

    #[test]
    fn test_call_generates_from_callee_mods() {
        // callee writes global g; caller reads g after the call.
        let program = Program::parse(
            json!({
                "globals": [int_var("g")],
                "functions": {
                    "callee": {
                        "body": {
                            "entry": {
                                "insts": [{"Copy": {"lhs": int_var("g"), "op": {"CInt": 7}}}],
                                "term": {"Ret": null},
                            }
                        }
                    },
                    "test": {
                        "locals": {"x": int_var("x")},
                        "body": {
                            "entry": {
                                "insts": [{"Copy": {"lhs": int_var("g"), "op": {"CInt": 1}}}],
                                "term": {"CallDir": {"lhs": null, "callee": "callee",
                                                     "args": [], "next_bb": "after"}},
                            },
                            "after": {
                                "insts": [{"Copy": {"lhs": int_var("x"), "op": {"Var": int_var("g")}}}],
                                "term": {"Ret": null},
                            },
                        }
                    }
                }
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();

        let solution = analyze_reaching_defs(&program, "test").unwrap();
        // g may hold the caller's def or the callee's write at the call.
        assert_eq!(
            solution[&pp("after.0")],
            BTreeSet::from([pp("entry.0"), pp("entry.term")])
        );
    }
}
