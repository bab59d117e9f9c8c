//! In-memory model of the low-level intermediate representation (LIR).
//!
//! A [`Program`] is deserialized from its JSON form once, validated, and
//! then read-only for every analysis. Instruction variants are a tagged
//! enum, so each analysis handles them by exhaustive pattern matching
//! rather than run-time type checks.
//!
//! The JSON schema is externally tagged: a `typ` is `"Int"`,
//! `{"Struct": name}`, `{"Pointer": typ}`, or
//! `{"Function": {"params": [typ], "ret": typ|null}}`; instructions and
//! terminals are objects whose single key names the variant.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::Deserialize;

use crate::error::{Error, Result};

/// A LIR type. Pointer nesting is explicit and unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum Type {
    Int,
    Struct(String),
    Pointer(Box<Type>),
    Function(FunctionType),
}

/// Signature of a function or extern: parameter types and optional return.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionType {
    pub params: Vec<Type>,
    pub ret: Option<Box<Type>>,
}

/// The base of a type once all pointer layers are stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base<'a> {
    Int,
    Struct(&'a str),
    Function(&'a FunctionType),
}

impl Type {
    /// Number of pointer layers around the base type.
    pub fn indirection(&self) -> usize {
        match self {
            Type::Pointer(inner) => 1 + inner.indirection(),
            _ => 0,
        }
    }

    /// The base kind under all pointer layers.
    pub fn base(&self) -> Base<'_> {
        match self {
            Type::Int => Base::Int,
            Type::Struct(name) => Base::Struct(name),
            Type::Function(sig) => Base::Function(sig),
            Type::Pointer(inner) => inner.base(),
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }
}

/// A named variable: global, parameter, local, or `$alloc` heap cell.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Variable {
    pub name: String,
    pub typ: Type,
}

/// One field of a struct definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Field {
    pub name: String,
    pub typ: Type,
}

/// An instruction operand: a constant integer or a variable.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum Operand {
    CInt(i64),
    Var(Variable),
}

impl Operand {
    /// The variable behind this operand, if it is not a constant.
    pub fn var(&self) -> Option<&Variable> {
        match self {
            Operand::Var(v) => Some(v),
            Operand::CInt(_) => None,
        }
    }
}

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Comparison operators. Results are the integers 0 and 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmpOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CmpOp {
    /// The comparison that holds exactly when `self` does not.
    pub fn negate(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Neq,
            CmpOp::Neq => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Gte,
            CmpOp::Lte => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Lte,
            CmpOp::Gte => CmpOp::Lt,
        }
    }

    /// The comparison with its operands swapped: `a < b` iff `b > a`.
    pub fn flip(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Neq => CmpOp::Neq,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Lte => CmpOp::Gte,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Gte => CmpOp::Lte,
        }
    }
}

/// A non-terminal instruction. None of these transfer control.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub enum Instruction {
    /// `lhs := op`
    Copy { lhs: Variable, op: Operand },
    /// `lhs := op1 aop op2`
    Arith {
        lhs: Variable,
        aop: ArithOp,
        op1: Operand,
        op2: Operand,
    },
    /// `lhs := op1 rop op2`
    Cmp {
        lhs: Variable,
        rop: CmpOp,
        op1: Operand,
        op2: Operand,
    },
    /// `lhs := $alloc num id`; `id` names a fresh abstract heap cell.
    Alloc {
        lhs: Variable,
        num: Operand,
        id: Variable,
    },
    /// `lhs := &rhs`
    Addrof { lhs: Variable, rhs: Variable },
    /// `lhs := $gep src idx`, pointer plus index.
    Gep {
        lhs: Variable,
        src: Variable,
        idx: Operand,
    },
    /// `lhs := $gfp src field`, pointer to a struct field.
    Gfp {
        lhs: Variable,
        src: Variable,
        field: String,
    },
    /// `lhs := *src`
    Load { lhs: Variable, src: Variable },
    /// `*dst := op`
    Store { dst: Variable, op: Operand },
}

/// A terminal instruction. Every terminal transfers control (a `Ret`
/// transfers it out of the function; the call forms continue at `next_bb`
/// after the callee returns).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub enum Terminal {
    /// `$jump label`
    Jump(String),
    /// `$branch cond tt ff`
    Branch {
        cond: Operand,
        tt: String,
        ff: String,
    },
    /// `$ret op?`
    Ret(Option<Operand>),
    /// `[lhs :=] $call_dir callee(args) then next_bb`
    CallDir {
        lhs: Option<Variable>,
        callee: String,
        args: Vec<Operand>,
        next_bb: String,
    },
    /// `[lhs :=] $call_idr fptr(args) then next_bb`
    CallIdr {
        lhs: Option<Variable>,
        fptr: Variable,
        args: Vec<Operand>,
        next_bb: String,
    },
    /// `[lhs :=] $call_ext ext_callee(args) then next_bb`
    CallExt {
        lhs: Option<Variable>,
        ext_callee: String,
        args: Vec<Operand>,
        next_bb: String,
    },
}

impl Terminal {
    /// Labels of the basic blocks control may transfer to.
    pub fn successors(&self) -> Vec<&str> {
        match self {
            Terminal::Jump(label) => vec![label],
            Terminal::Branch { tt, ff, .. } => vec![tt, ff],
            Terminal::Ret(_) => vec![],
            Terminal::CallDir { next_bb, .. }
            | Terminal::CallIdr { next_bb, .. }
            | Terminal::CallExt { next_bb, .. } => vec![next_bb],
        }
    }
}

/// A basic block: straight-line instructions followed by one terminal.
/// The block's label is the key under which it is stored in
/// [`Function::body`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BasicBlock {
    pub insts: Vec<Instruction>,
    pub term: Terminal,
}

/// A function definition. `entry` is the sole entry block.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Function {
    #[serde(default)]
    pub ret_ty: Option<Type>,
    #[serde(default)]
    pub params: Vec<Variable>,
    #[serde(default)]
    pub locals: BTreeMap<String, Variable>,
    pub body: BTreeMap<String, BasicBlock>,
}

/// Label of the distinguished entry block.
pub const ENTRY: &str = "entry";

impl Function {
    pub fn block(&self, label: &str) -> Option<&BasicBlock> {
        self.body.get(label)
    }

    /// Look up a parameter by name.
    pub fn param(&self, name: &str) -> Option<&Variable> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Whether `name` is declared by this function (local or parameter).
    /// Declarations shadow globals of the same name.
    pub fn declares(&self, name: &str) -> bool {
        self.locals.contains_key(name) || self.param(name).is_some()
    }

    /// Names of the int-typed variables whose address is taken somewhere
    /// in this function. These are the variables a store through an
    /// int pointer may reach, so the integer analyses weak-update them.
    ///
    /// With `locals_only`, globals are excluded even when their address is
    /// taken, reproducing the historical behavior of the reference
    /// implementation.
    pub fn addrof_ints(&self, program: &Program, locals_only: bool) -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        for bb in self.body.values() {
            for inst in &bb.insts {
                if let Instruction::Addrof { rhs, .. } = inst {
                    if !rhs.typ.is_int() {
                        continue;
                    }
                    if self.declares(&rhs.name) {
                        set.insert(rhs.name.clone());
                    } else if !locals_only && program.is_global(&rhs.name) {
                        set.insert(rhs.name.clone());
                    }
                }
            }
        }
        set
    }

    /// Names of all variables whose address is taken in this function,
    /// regardless of type. Reaching-definitions uses this as the fallback
    /// target set for stores through pointers with no known cells.
    pub fn addr_taken(&self) -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        for bb in self.body.values() {
            for inst in &bb.insts {
                if let Instruction::Addrof { rhs, .. } = inst {
                    set.insert(rhs.name.clone());
                }
            }
        }
        set
    }

    /// The variable this function returns through a `Ret op` terminal,
    /// if any block returns a variable.
    pub fn return_variable(&self) -> Option<&Variable> {
        for bb in self.body.values() {
            if let Terminal::Ret(Some(Operand::Var(v))) = &bb.term {
                return Some(v);
            }
        }
        None
    }
}

/// A whole LIR program: struct types, globals, functions, and externs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Program {
    #[serde(default)]
    pub structs: BTreeMap<String, Vec<Field>>,
    #[serde(default)]
    pub globals: Vec<Variable>,
    pub functions: BTreeMap<String, Function>,
    #[serde(default)]
    pub externs: BTreeMap<String, Type>,
}

impl Program {
    /// Parse and validate a program from its JSON representation.
    pub fn parse(bytes: &[u8]) -> Result<Program> {
        let program: Program = serde_json::from_slice(bytes)?;
        program.validate()?;
        Ok(program)
    }

    /// Look up a function, reporting its absence as a typed error.
    pub fn function(&self, name: &str) -> Result<&Function> {
        self.functions
            .get(name)
            .ok_or_else(|| Error::UnknownFunction(name.to_string()))
    }

    pub fn global(&self, name: &str) -> Option<&Variable> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn is_global(&self, name: &str) -> bool {
        self.global(name).is_some()
    }

    /// Whether `name` refers to a global inside `func`: it must be a
    /// program global not shadowed by a local or parameter.
    pub fn is_global_in(&self, func: &Function, name: &str) -> bool {
        !func.declares(name) && self.is_global(name)
    }

    /// Structural invariants of §3: every function has an `entry` block,
    /// every referenced label exists, parameter and local names do not
    /// collide, and every variable named by an instruction is declared.
    fn validate(&self) -> Result<()> {
        for (fname, func) in &self.functions {
            if !func.body.contains_key(ENTRY) {
                return Err(Error::Invalid(format!("function {fname} has no entry block")));
            }
            for param in &func.params {
                if func.locals.contains_key(&param.name) {
                    return Err(Error::Invalid(format!(
                        "function {fname} declares {} as both parameter and local",
                        param.name
                    )));
                }
            }

            let mut declared: HashSet<&str> = HashSet::new();
            declared.extend(func.locals.keys().map(String::as_str));
            declared.extend(func.params.iter().map(|p| p.name.as_str()));
            declared.extend(self.globals.iter().map(|g| g.name.as_str()));
            declared.extend(self.functions.keys().map(String::as_str));
            declared.extend(self.externs.keys().map(String::as_str));
            for bb in func.body.values() {
                for inst in &bb.insts {
                    if let Instruction::Alloc { id, .. } = inst {
                        declared.insert(&id.name);
                    }
                }
            }

            for (label, bb) in &func.body {
                for succ in bb.term.successors() {
                    if !func.body.contains_key(succ) {
                        return Err(Error::UnknownBlock {
                            func: fname.clone(),
                            label: succ.to_string(),
                        });
                    }
                }
                let check = |v: &Variable| -> Result<()> {
                    if declared.contains(v.name.as_str()) {
                        Ok(())
                    } else {
                        Err(Error::Invalid(format!(
                            "undeclared variable {} in {fname}:{label}",
                            v.name
                        )))
                    }
                };
                for inst in &bb.insts {
                    for v in inst.variables() {
                        check(v)?;
                    }
                }
                for v in bb.term.variables() {
                    check(v)?;
                }
            }
        }
        Ok(())
    }
}

fn push_operand<'a>(op: &'a Operand, out: &mut Vec<&'a Variable>) {
    if let Operand::Var(v) = op {
        out.push(v);
    }
}

impl Instruction {
    /// Every variable this instruction mentions, in no particular order.
    pub fn variables(&self) -> Vec<&Variable> {
        let mut out = Vec::new();
        match self {
            Instruction::Copy { lhs, op } => {
                out.push(lhs);
                push_operand(op, &mut out);
            }
            Instruction::Arith { lhs, op1, op2, .. } | Instruction::Cmp { lhs, op1, op2, .. } => {
                out.push(lhs);
                push_operand(op1, &mut out);
                push_operand(op2, &mut out);
            }
            Instruction::Alloc { lhs, num, id } => {
                out.push(lhs);
                push_operand(num, &mut out);
                out.push(id);
            }
            Instruction::Addrof { lhs, rhs } => {
                out.push(lhs);
                out.push(rhs);
            }
            Instruction::Gep { lhs, src, idx } => {
                out.push(lhs);
                out.push(src);
                push_operand(idx, &mut out);
            }
            Instruction::Gfp { lhs, src, .. } => {
                out.push(lhs);
                out.push(src);
            }
            Instruction::Load { lhs, src } => {
                out.push(lhs);
                out.push(src);
            }
            Instruction::Store { dst, op } => {
                out.push(dst);
                push_operand(op, &mut out);
            }
        }
        out
    }
}

impl Terminal {
    /// Every variable this terminal mentions.
    pub fn variables(&self) -> Vec<&Variable> {
        let mut out = Vec::new();
        match self {
            Terminal::Jump(_) => {}
            Terminal::Branch { cond, .. } => push_operand(cond, &mut out),
            Terminal::Ret(Some(op)) => push_operand(op, &mut out),
            Terminal::Ret(None) => {}
            Terminal::CallDir { lhs, args, .. } | Terminal::CallExt { lhs, args, .. } => {
                if let Some(v) = lhs {
                    out.push(v);
                }
                for a in args {
                    push_operand(a, &mut out);
                }
            }
            Terminal::CallIdr { lhs, fptr, args, .. } => {
                if let Some(v) = lhs {
                    out.push(v);
                }
                out.push(fptr);
                for a in args {
                    push_operand(a, &mut out);
                }
            }
        }
        out
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Struct(name) => write!(f, "{name}"),
            Type::Pointer(inner) => write!(f, "&{inner}"),
            Type::Function(sig) => {
                write!(f, "(")?;
                for (i, p) in sig.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ")->")?;
                match &sig.ret {
                    Some(r) => write!(f, "{r}"),
                    None => write!(f, "_"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<Program> {
        Program::parse(value.to_string().as_bytes())
    }

    fn int_var(name: &str) -> serde_json::Value {
        json!({"name": name, "typ": "Int"})
    }

    #[test]
    fn test_parse_straight_line() {
        let program = parse(json!({
            "functions": {
                "main": {
                    "ret_ty": "Int",
                    "params": [int_var("a")],
                    "locals": {"b": int_var("b")},
                    "body": {
                        "entry": {
                            "insts": [
                                {"Copy": {"lhs": int_var("b"), "op": {"CInt": 3}}},
                                {"Arith": {"lhs": int_var("b"), "aop": "add",
                                           "op1": {"Var": int_var("a")},
                                           "op2": {"Var": int_var("b")}}},
                            ],
                            "term": {"Ret": {"Var": int_var("b")}},
                        }
                    }
                }
            }
        }))
        .unwrap();

        let main = program.function("main").unwrap();
        assert_eq!(main.params.len(), 1);
        assert_eq!(main.body[ENTRY].insts.len(), 2);
        assert!(matches!(main.body[ENTRY].term, Terminal::Ret(Some(_))));
        assert_eq!(main.return_variable().unwrap().name, "b");
    }

    #[test]
    fn test_parse_pointer_types() {
        let program = parse(json!({
            "globals": [{"name": "g", "typ": {"Pointer": {"Pointer": "Int"}}}],
            "functions": {
                "main": {
                    "body": {"entry": {"insts": [], "term": {"Ret": null}}}
                }
            }
        }))
        .unwrap();

        let g = program.global("g").unwrap();
        assert_eq!(g.typ.indirection(), 2);
        assert_eq!(g.typ.base(), Base::Int);
        assert!(g.typ.is_pointer());
    }

    #[test]
    fn test_missing_entry_rejected() {
        let err = parse(json!({
            "functions": {
                "main": {"body": {"start": {"insts": [], "term": {"Ret": null}}}}
            }
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn test_dangling_label_rejected() {
        let err = parse(json!({
            "functions": {
                "main": {"body": {"entry": {"insts": [], "term": {"Jump": "nowhere"}}}}
            }
        }))
        .unwrap_err();
        assert!(matches!(err, Error::UnknownBlock { .. }));
    }

    #[test]
    fn test_undeclared_variable_rejected() {
        let err = parse(json!({
            "functions": {
                "main": {
                    "body": {
                        "entry": {
                            "insts": [{"Copy": {"lhs": int_var("x"), "op": {"CInt": 1}}}],
                            "term": {"Ret": null},
                        }
                    }
                }
            }
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = parse(json!({
            "functions": {
                "main": {
                    "body": {"entry": {"insts": [], "term": {"Ret": null}}},
                    "extra": 1,
                }
            }
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_addrof_sets() {
        let program = parse(json!({
            "globals": [int_var("g")],
            "functions": {
                "main": {
                    "locals": {
                        "a": int_var("a"),
                        "p": {"name": "p", "typ": {"Pointer": "Int"}},
                        "q": {"name": "q", "typ": {"Pointer": "Int"}},
                    },
                    "body": {
                        "entry": {
                            "insts": [
                                {"Addrof": {"lhs": {"name": "p", "typ": {"Pointer": "Int"}},
                                            "rhs": int_var("a")}},
                                {"Addrof": {"lhs": {"name": "q", "typ": {"Pointer": "Int"}},
                                            "rhs": int_var("g")}},
                            ],
                            "term": {"Ret": null},
                        }
                    }
                }
            }
        }))
        .unwrap();

        let main = program.function("main").unwrap();
        let with_globals = main.addrof_ints(&program, false);
        assert!(with_globals.contains("a"));
        assert!(with_globals.contains("g"));

        let locals_only = main.addrof_ints(&program, true);
        assert!(locals_only.contains("a"));
        assert!(!locals_only.contains("g"));

        assert_eq!(main.addr_taken().len(), 2);
    }

    #[test]
    fn test_terminal_successors() {
        let branch = Terminal::Branch {
            cond: Operand::CInt(1),
            tt: "bb1".to_string(),
            ff: "bb2".to_string(),
        };
        assert_eq!(branch.successors(), vec!["bb1", "bb2"]);
        assert!(Terminal::Ret(None).successors().is_empty());
    }

    #[test]
    fn test_type_display() {
        let fty = Type::Function(FunctionType {
            params: vec![Type::Pointer(Box::new(Type::Int)), Type::Int],
            ret: Some(Box::new(Type::Int)),
        });
        assert_eq!(fty.to_string(), "(&int,int)->int");
        let none = Type::Function(FunctionType { params: vec![], ret: None });
        assert_eq!(none.to_string(), "()->_");
    }
}
