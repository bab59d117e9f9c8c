//! The fixpoint engine shared by every dataflow analysis.
//!
//! The engine keeps one abstract store per basic block (the block's entry
//! state) and a FIFO worklist of block labels. Each iteration pops a
//! label, runs the analysis-specific transfer function over the block,
//! and joins the resulting deltas into the successors' entry states; a
//! successor whose state grew is re-enqueued. At loop headers the
//! interval analysis replaces the join with a widening, which bounds the
//! number of times any store can grow and forces termination.
//!
//! After the fixpoint is reached the transfer function runs once more on
//! every block that was ever enqueued; those outputs are the exit stores
//! reported to the user, in ascending label order.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::io::Write;

use crate::domain::AbstractValue;
use crate::error::{Error, Result};
use crate::lir::{BasicBlock, Function, ENTRY};
use crate::store::Store;

/// What transferring one block produced: the state at the end of the
/// block and, per successor label, the state to join into that successor.
pub struct BlockEffect<V> {
    pub exit: Store<V>,
    pub deltas: Vec<(String, Store<V>)>,
}

/// A block-level transfer function. Implementations own whatever
/// analysis-specific context they need (addr-taken sets, points-to
/// results, mod/ref summaries).
pub trait Transfer {
    type Value: AbstractValue;

    /// The abstract state on entry to the `entry` block.
    fn entry_store(&self) -> Store<Self::Value>;

    /// Apply the block's instructions and terminal to `store`.
    ///
    /// `record` is true only during the post-fixpoint reporting pass;
    /// analyses that produce per-program-point output use it to know when
    /// to write their solution.
    fn block(
        &mut self,
        label: &str,
        bb: &BasicBlock,
        store: Store<Self::Value>,
        record: bool,
    ) -> Result<BlockEffect<Self::Value>>;
}

/// Worklist driver for one function.
pub struct Engine<'p, T: Transfer> {
    func_name: String,
    func: &'p Function,
    transfer: T,
    widen_at: BTreeSet<String>,
}

impl<'p, T: Transfer> Engine<'p, T> {
    pub fn new(func_name: &str, func: &'p Function, transfer: T) -> Self {
        Engine {
            func_name: func_name.to_string(),
            func,
            transfer,
            widen_at: BTreeSet::new(),
        }
    }

    /// Enable widening at this function's loop headers.
    pub fn with_widening(mut self) -> Self {
        self.widen_at = loop_headers(self.func);
        self
    }

    fn block(&self, label: &str) -> Result<&'p BasicBlock> {
        self.func.block(label).ok_or_else(|| Error::UnknownBlock {
            func: self.func_name.clone(),
            label: label.to_string(),
        })
    }

    /// Iterate to fixpoint, then report: the exit store of every block
    /// that was ever enqueued, plus the transfer function itself (for
    /// analyses that accumulate per-point results).
    pub fn run(mut self) -> Result<(BTreeMap<String, Store<T::Value>>, T)> {
        let mut entry_stores: HashMap<String, Store<T::Value>> = HashMap::new();
        entry_stores.insert(ENTRY.to_string(), self.transfer.entry_store());

        let mut worklist: VecDeque<String> = VecDeque::new();
        let mut queued: HashSet<String> = HashSet::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        worklist.push_back(ENTRY.to_string());
        queued.insert(ENTRY.to_string());
        seen.insert(ENTRY.to_string());

        let mut iterations = 0usize;
        while let Some(label) = worklist.pop_front() {
            queued.remove(&label);
            iterations += 1;

            let bb = self.block(&label)?;
            let store = entry_stores.get(&label).cloned().unwrap_or_default();
            let effect = self.transfer.block(&label, bb, store, false)?;

            for (succ, delta) in effect.deltas {
                self.block(&succ)?;
                let current = entry_stores.entry(succ.clone()).or_default();
                let (mut new, mut changed) = current.join(&delta);
                if self.widen_at.contains(&succ) {
                    new = current.widen(&new);
                    changed = new != *current;
                }
                if changed {
                    *current = new;
                    seen.insert(succ.clone());
                    if queued.insert(succ.clone()) {
                        worklist.push_back(succ);
                    }
                }
            }
        }
        log::debug!("{}: fixpoint after {} block transfers", self.func_name, iterations);

        let mut solution = BTreeMap::new();
        for label in &seen {
            let bb = self.block(label)?;
            let store = entry_stores.get(label).cloned().unwrap_or_default();
            let effect = self.transfer.block(label, bb, store, true)?;
            solution.insert(label.clone(), effect.exit);
        }
        Ok((solution, self.transfer))
    }
}

/// Labels of this function's loop headers: the targets of back edges
/// found by a depth-first traversal from `entry`. A block is a header
/// exactly when some edge reaches it while its own traversal is still in
/// progress; blocks merely reached twice (ordinary join points) are not
/// headers. The control-flow graph may be irreducible, so the traversal
/// keeps an explicit three-state marking rather than a plain visited set.
pub fn loop_headers(func: &Function) -> BTreeSet<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Open,
        Done,
    }

    fn dfs<'a>(
        func: &'a Function,
        label: &'a str,
        state: &mut HashMap<&'a str, State>,
        headers: &mut BTreeSet<String>,
    ) {
        state.insert(label, State::Open);
        if let Some(bb) = func.block(label) {
            for succ in bb.term.successors() {
                match state.get(succ) {
                    Some(State::Open) => {
                        headers.insert(succ.to_string());
                    }
                    Some(State::Done) => {}
                    None => dfs(func, succ, state, headers),
                }
            }
        }
        state.insert(label, State::Done);
    }

    let mut state = HashMap::new();
    let mut headers = BTreeSet::new();
    dfs(func, ENTRY, &mut state, &mut headers);
    headers
}

/// Print the per-block report: each block label on its own line followed
/// by its exit store and a blank separator line.
pub fn write_report<V: AbstractValue>(
    out: &mut impl Write,
    solution: &BTreeMap<String, Store<V>>,
) -> std::io::Result<()> {
    for (label, store) in solution {
        writeln!(out, "{label}:")?;
        write!(out, "{store}")?;
        writeln!(out)?;
    }
    Ok(())
}
