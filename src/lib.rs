//! # lir-analysis: static analyses over a low-level IR
//!
//! **`lir-analysis`** is a toolkit of classical static analyses for a small
//! low-level intermediate representation (LIR) with integers, structs,
//! pointers (including function pointers), heap allocation, and
//! direct/indirect calls. Programs arrive as JSON, are parsed once into a
//! read-only [`Program`][crate::lir::Program], and are then queried by four
//! analyses:
//!
//! - **Constant analysis** --- flow-sensitive constant propagation over the
//!   flat constant lattice.
//! - **Interval analysis** --- integer ranges with widening at loop headers,
//!   so loops with unbounded counters still reach a fixpoint.
//! - **Points-to analysis** --- Andersen-style: the program is compiled to
//!   textual set constraints, and a graph solver saturates them into
//!   per-variable points-to sets.
//! - **Reaching definitions** --- definition sets per program point, using
//!   the points-to solution for weak updates and per-function mod/ref
//!   summaries at call sites.
//!
//! ## Architecture
//!
//! The dataflow analyses share one engine: an abstract store
//! ([`store::Store`]) maps variable names to lattice values
//! ([`domain::AbstractValue`]), per-instruction transfer functions compute
//! block effects, and a FIFO worklist ([`worklist::Engine`]) iterates to a
//! fixpoint. The pointer analysis is a separate pipeline: constraint
//! generation ([`constraints`]), then graph saturation ([`solver`]), whose
//! output feeds the call graph and mod/ref summaries ([`callgraph`]) and
//! ultimately the reaching-definitions driver ([`reaching`]).
//!
//! ## Quick start
//!
//! ```rust
//! use lir_analysis::lir::Program;
//! use lir_analysis::transfer::analyze_constants;
//!
//! let json = serde_json::json!({
//!     "functions": {
//!         "main": {
//!             "locals": {"a": {"name": "a", "typ": "Int"}},
//!             "body": {
//!                 "entry": {
//!                     "insts": [
//!                         {"Copy": {"lhs": {"name": "a", "typ": "Int"},
//!                                   "op": {"CInt": 3}}},
//!                     ],
//!                     "term": {"Ret": null},
//!                 }
//!             }
//!         }
//!     }
//! });
//!
//! let program = Program::parse(json.to_string().as_bytes()).unwrap();
//! let solution = analyze_constants(&program, "main", false).unwrap();
//! assert_eq!(solution["entry"].get("a").to_string(), "3");
//! ```
//!
//! Five thin binaries (`constant-analysis`, `interval-analysis`,
//! `constraint-generator`, `constraint-solver`, `reaching-defs`) wrap
//! these entry points for the command line.

pub mod callgraph;
pub mod constant;
pub mod constraints;
pub mod domain;
pub mod error;
pub mod interval;
pub mod lir;
pub mod reaching;
pub mod solver;
pub mod store;
pub mod transfer;
pub mod worklist;

pub use error::{Error, Result};
