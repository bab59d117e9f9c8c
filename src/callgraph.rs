//! Call graph and mod/ref summaries.
//!
//! The call graph is built by breadth-first traversal from an entry
//! function: direct calls add edges outright, indirect calls consult the
//! points-to solution of the function-pointer variable. After a
//! transitive closure, a function's mod/ref summary is its own initial
//! summary (globals written/read, plus cells written/read through
//! pointers) unioned with the initial summaries of every reachable
//! callee.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::lir::{Function, Instruction, Operand, Program, Terminal, Variable};

/// The points-to solution: qualified set-variable name to cell names.
pub type PointsTo = BTreeMap<String, BTreeSet<String>>;

/// Per-function summary of what may be written (`mods`) and read
/// (`refs`): global names and abstract cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModRef {
    pub mods: BTreeSet<String>,
    pub refs: BTreeSet<String>,
}

/// The points-to key for a variable used inside `func`: locals and
/// parameters are function-qualified, globals and cells are bare.
pub fn points_to_key(fname: &str, func: &Function, var: &Variable) -> String {
    if func.declares(&var.name) {
        format!("{fname}.{}", var.name)
    } else {
        var.name.clone()
    }
}

/// Directed call graph over the program's defined functions.
#[derive(Debug, Default)]
pub struct CallGraph {
    succs: BTreeMap<String, BTreeSet<String>>,
    preds: BTreeMap<String, BTreeSet<String>>,
    reachable: BTreeSet<String>,
}

impl CallGraph {
    /// BFS from `entry`. An edge A -> B exists when A direct-calls B, or
    /// when A indirect-calls through a pointer whose points-to set
    /// contains B.
    pub fn build(program: &Program, points_to: &PointsTo, entry: &str) -> CallGraph {
        let mut graph = CallGraph::default();
        let mut queue = VecDeque::new();
        if program.functions.contains_key(entry) {
            queue.push_back(entry.to_string());
            graph.reachable.insert(entry.to_string());
        }

        while let Some(fname) = queue.pop_front() {
            let func = &program.functions[&fname];
            for bb in func.body.values() {
                let callees: Vec<String> = match &bb.term {
                    Terminal::CallDir { callee, .. } => vec![callee.clone()],
                    Terminal::CallIdr { fptr, .. } => {
                        let key = points_to_key(&fname, func, fptr);
                        points_to
                            .get(&key)
                            .map(|cells| cells.iter().cloned().collect())
                            .unwrap_or_default()
                    }
                    _ => vec![],
                };
                for callee in callees {
                    if !program.functions.contains_key(&callee) {
                        continue;
                    }
                    graph.add_edge(&fname, &callee);
                    if graph.reachable.insert(callee.clone()) {
                        queue.push_back(callee);
                    }
                }
            }
        }
        graph
    }

    fn add_edge(&mut self, from: &str, to: &str) {
        self.succs
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        self.preds
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string());
    }

    /// Saturate edges: every node inherits its successors' successors
    /// until nothing changes, with predecessor sets kept symmetric.
    pub fn transitive_closure(&mut self) {
        loop {
            let mut added = Vec::new();
            for (node, direct) in &self.succs {
                for succ in direct {
                    if let Some(indirect) = self.succs.get(succ) {
                        for target in indirect {
                            if !direct.contains(target) {
                                added.push((node.clone(), target.clone()));
                            }
                        }
                    }
                }
            }
            if added.is_empty() {
                break;
            }
            for (from, to) in added {
                self.add_edge(&from, &to);
            }
        }
    }

    pub fn successors(&self, fname: &str) -> Option<&BTreeSet<String>> {
        self.succs.get(fname)
    }

    pub fn predecessors(&self, fname: &str) -> Option<&BTreeSet<String>> {
        self.preds.get(fname)
    }

    pub fn reachable(&self) -> &BTreeSet<String> {
        &self.reachable
    }
}

/// A function's own mod/ref contribution, before callee propagation.
fn initial_mod_ref(program: &Program, fname: &str, func: &Function, points_to: &PointsTo) -> ModRef {
    let mut summary = ModRef::default();

    let mod_lhs = |v: &Variable, summary: &mut ModRef| {
        if program.is_global_in(func, &v.name) {
            summary.mods.insert(v.name.clone());
        }
    };
    let ref_var = |v: &Variable, summary: &mut ModRef| {
        if program.is_global_in(func, &v.name) {
            summary.refs.insert(v.name.clone());
        }
    };
    let ref_operand = |op: &Operand, summary: &mut ModRef| {
        if let Some(v) = op.var() {
            if program.is_global_in(func, &v.name) {
                summary.refs.insert(v.name.clone());
            }
        }
    };
    let cells = |v: &Variable| -> BTreeSet<String> {
        let key = points_to_key(fname, func, v);
        points_to.get(&key).cloned().unwrap_or_default()
    };

    for bb in func.body.values() {
        for inst in &bb.insts {
            match inst {
                Instruction::Store { dst, op } => {
                    summary.mods.extend(cells(dst));
                    ref_var(dst, &mut summary);
                    ref_operand(op, &mut summary);
                }
                Instruction::Load { lhs, src } => {
                    summary.refs.extend(cells(src));
                    mod_lhs(lhs, &mut summary);
                    ref_var(src, &mut summary);
                }
                Instruction::Copy { lhs, op } => {
                    mod_lhs(lhs, &mut summary);
                    ref_operand(op, &mut summary);
                }
                Instruction::Arith { lhs, op1, op2, .. } | Instruction::Cmp { lhs, op1, op2, .. } => {
                    mod_lhs(lhs, &mut summary);
                    ref_operand(op1, &mut summary);
                    ref_operand(op2, &mut summary);
                }
                Instruction::Alloc { lhs, num, .. } => {
                    mod_lhs(lhs, &mut summary);
                    ref_operand(num, &mut summary);
                }
                Instruction::Gep { lhs, src, idx } => {
                    mod_lhs(lhs, &mut summary);
                    ref_var(src, &mut summary);
                    ref_operand(idx, &mut summary);
                }
                Instruction::Gfp { lhs, src, .. } => {
                    mod_lhs(lhs, &mut summary);
                    ref_var(src, &mut summary);
                }
                Instruction::Addrof { lhs, .. } => {
                    mod_lhs(lhs, &mut summary);
                }
            }
        }
        if let Terminal::Ret(Some(op)) = &bb.term {
            ref_operand(op, &mut summary);
        }
    }
    summary
}

/// Final mod/ref summaries: each function's initial summary unioned with
/// the initial summaries of every callee in the transitive closure of
/// the call graph rooted at `entry`.
pub fn mod_ref_summaries(
    program: &Program,
    points_to: &PointsTo,
    entry: &str,
) -> BTreeMap<String, ModRef> {
    let mut graph = CallGraph::build(program, points_to, entry);
    graph.transitive_closure();

    let initial: BTreeMap<String, ModRef> = program
        .functions
        .iter()
        .map(|(fname, func)| (fname.clone(), initial_mod_ref(program, fname, func, points_to)))
        .collect();

    let mut summaries = BTreeMap::new();
    for (fname, base) in &initial {
        let mut summary = base.clone();
        if let Some(callees) = graph.successors(fname) {
            for callee in callees {
                if let Some(callee_summary) = initial.get(callee) {
                    summary.mods.extend(callee_summary.mods.iter().cloned());
                    summary.refs.extend(callee_summary.refs.iter().cloned());
                }
            }
        }
        summaries.insert(fname.clone(), summary);
    }
    summaries
}
