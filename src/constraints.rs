//! Set-constraint generation for the points-to analysis.
//!
//! Walks every function of the program and emits inclusion constraints
//! over set variables in a small textual grammar:
//!
//! ```text
//! stmt   := expr "<=" expr
//! expr   := setvar | ctor | proj
//! ctor   := name "(" args ")"
//! proj   := "proj(" name "," int "," setvar ")"
//! setvar := ident | ident "." ident
//! ```
//!
//! Globals, heap cells, and function names are bare set variables; locals
//! and parameters are qualified with their function's name. Only
//! pointer-typed definitions generate constraints; field and index
//! arithmetic (`Gep`/`Gfp`) collapse to plain copies, so the analysis is
//! field-insensitive.
//!
//! Taking a function's address seeds a `lam_` constructor carrying the
//! function's signature, its return variable, and its parameters; that is
//! how function values reach the points-to sets the call-graph builder
//! consults for indirect calls.

use std::collections::BTreeSet;
use std::fmt;

use crate::lir::{Function, Instruction, Program, Terminal, Variable};

/// A set variable: the points-to unknown of one program variable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SetVar {
    /// Qualifying function for locals and parameters; `None` for
    /// globals, function names, and `$alloc` cell identifiers.
    pub func: Option<String>,
    pub name: String,
}

impl SetVar {
    fn local(func: &str, name: &str) -> Self {
        SetVar {
            func: Some(func.to_string()),
            name: name.to_string(),
        }
    }

    fn bare(name: &str) -> Self {
        SetVar {
            func: None,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for SetVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.func {
            Some(func) => write!(f, "{func}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// One side of a constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CExpr {
    Var(SetVar),
    /// `ref(cell, contents)`: may point to `cell`, whose contents are
    /// the set variable `contents`.
    Ref { cell: String, contents: SetVar },
    /// `lam_[sig](fname, ret?, params..)`: a function value.
    Lam {
        sig: String,
        fname: String,
        ret: Option<SetVar>,
        params: Vec<SetVar>,
    },
    /// `proj(ctor, idx, sv)`.
    Proj { ctor: &'static str, idx: usize, sv: SetVar },
}

impl fmt::Display for CExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CExpr::Var(sv) => write!(f, "{sv}"),
            CExpr::Ref { cell, contents } => write!(f, "ref({cell},{contents})"),
            CExpr::Lam { sig, fname, ret, params } => {
                write!(f, "lam_[{sig}]({fname}")?;
                if let Some(ret) = ret {
                    write!(f, ",{ret}")?;
                }
                for p in params {
                    write!(f, ",{p}")?;
                }
                write!(f, ")")
            }
            CExpr::Proj { ctor, idx, sv } => write!(f, "proj({ctor},{idx},{sv})"),
        }
    }
}

/// An inclusion `lhs <= rhs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub lhs: CExpr,
    pub rhs: CExpr,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <= {}", self.lhs, self.rhs)
    }
}

fn flows(lhs: CExpr, rhs: CExpr) -> Constraint {
    Constraint { lhs, rhs }
}

struct Generator<'p> {
    program: &'p Program,
    constraints: Vec<Constraint>,
}

impl<'p> Generator<'p> {
    /// Resolve a variable to its set variable: function-qualified when
    /// the enclosing function declares it, bare otherwise.
    fn set_var(&self, fname: &str, func: &Function, var: &Variable) -> SetVar {
        if func.declares(&var.name) {
            SetVar::local(fname, &var.name)
        } else {
            SetVar::bare(&var.name)
        }
    }

    fn instruction(&mut self, fname: &str, func: &Function, inst: &Instruction) {
        match inst {
            Instruction::Copy { lhs, op } => {
                if lhs.typ.is_pointer() {
                    if let Some(src) = op.var() {
                        self.constraints.push(flows(
                            CExpr::Var(self.set_var(fname, func, src)),
                            CExpr::Var(self.set_var(fname, func, lhs)),
                        ));
                    }
                }
            }
            Instruction::Addrof { lhs, rhs } => {
                self.constraints.push(flows(
                    CExpr::Ref {
                        cell: rhs.name.clone(),
                        contents: self.set_var(fname, func, rhs),
                    },
                    CExpr::Var(self.set_var(fname, func, lhs)),
                ));
            }
            Instruction::Alloc { lhs, id, .. } => {
                self.constraints.push(flows(
                    CExpr::Ref {
                        cell: id.name.clone(),
                        contents: SetVar::bare(&id.name),
                    },
                    CExpr::Var(self.set_var(fname, func, lhs)),
                ));
            }
            Instruction::Gep { lhs, src, .. } | Instruction::Gfp { lhs, src, .. } => {
                self.constraints.push(flows(
                    CExpr::Var(self.set_var(fname, func, src)),
                    CExpr::Var(self.set_var(fname, func, lhs)),
                ));
            }
            Instruction::Load { lhs, src } => {
                if lhs.typ.is_pointer() {
                    self.constraints.push(flows(
                        CExpr::Proj {
                            ctor: "ref",
                            idx: 1,
                            sv: self.set_var(fname, func, src),
                        },
                        CExpr::Var(self.set_var(fname, func, lhs)),
                    ));
                }
            }
            Instruction::Store { dst, op } => {
                if let Some(src) = op.var() {
                    if src.typ.is_pointer() {
                        self.constraints.push(flows(
                            CExpr::Var(self.set_var(fname, func, src)),
                            CExpr::Proj {
                                ctor: "ref",
                                idx: 1,
                                sv: self.set_var(fname, func, dst),
                            },
                        ));
                    }
                }
            }
            Instruction::Arith { .. } | Instruction::Cmp { .. } => {}
        }
    }

    fn terminal(&mut self, fname: &str, func: &Function, term: &Terminal) {
        if let Terminal::CallDir { lhs, callee, args, .. } = term {
            let Some(callee_func) = self.program.functions.get(callee) else {
                return;
            };
            if let Some(lhs) = lhs {
                if lhs.typ.is_pointer() {
                    if let Some(ret_var) = callee_func.return_variable() {
                        self.constraints.push(flows(
                            CExpr::Var(SetVar::local(callee, &ret_var.name)),
                            CExpr::Var(self.set_var(fname, func, lhs)),
                        ));
                    }
                }
            }
            for (param, arg) in callee_func.params.iter().zip(args) {
                if param.typ.is_pointer() {
                    if let Some(arg_var) = arg.var() {
                        self.constraints.push(flows(
                            CExpr::Var(self.set_var(fname, func, arg_var)),
                            CExpr::Var(SetVar::local(callee, &param.name)),
                        ));
                    }
                }
            }
        }
    }

    /// One `lam_` constructor per address-taken function: the function
    /// value flows into the bare set variable bearing its name.
    fn seed_function_value(&mut self, fname: &str) {
        let func = &self.program.functions[fname];
        let ret_var = func.return_variable();
        let ret_sig = match (&func.ret_ty, ret_var) {
            (Some(ty), Some(_)) => ty.to_string(),
            _ => "_".to_string(),
        };
        let params_sig: Vec<String> = func.params.iter().map(|p| p.typ.to_string()).collect();
        let sig = format!("({})->{}", params_sig.join(","), ret_sig);

        self.constraints.push(flows(
            CExpr::Lam {
                sig,
                fname: fname.to_string(),
                ret: ret_var.map(|v| SetVar::local(fname, &v.name)),
                params: func
                    .params
                    .iter()
                    .map(|p| SetVar::local(fname, &p.name))
                    .collect(),
            },
            CExpr::Var(SetVar::bare(fname)),
        ));
    }
}

/// Functions whose name appears as an operand somewhere in the program,
/// i.e. whose address is taken.
fn address_taken_functions(program: &Program) -> BTreeSet<String> {
    let mut taken = BTreeSet::new();
    for func in program.functions.values() {
        for bb in func.body.values() {
            let vars = bb
                .insts
                .iter()
                .flat_map(|i| i.variables())
                .chain(bb.term.variables());
            for v in vars {
                if program.functions.contains_key(&v.name) {
                    taken.insert(v.name.clone());
                }
            }
        }
    }
    taken
}

/// Generate the program's constraints, deduplicated and sorted, one
/// statement per line.
pub fn generate(program: &Program) -> BTreeSet<String> {
    let mut gen = Generator {
        program,
        constraints: Vec::new(),
    };
    for (fname, func) in &program.functions {
        for bb in func.body.values() {
            for inst in &bb.insts {
                gen.instruction(fname, func, inst);
            }
            gen.terminal(fname, func, &bb.term);
        }
    }
    for fname in address_taken_functions(program) {
        gen.seed_function_value(&fname);
    }
    gen.constraints.iter().map(|c| c.to_string()).collect()
}

/// Render the constraint set as the tool's file format: one constraint
/// per line, trailing newline included.
pub fn render(constraints: &BTreeSet<String>) -> String {
    let mut out = String::new();
    for c in constraints {
        out.push_str(c);
        out.push('\n');
    }
    out
}
