//! The set-constraint solver behind the points-to analysis.
//!
//! Input is the textual constraint language of the generator; output is a
//! points-to map. The solver parses each statement into a graph of nodes
//! (set variables, constructor calls, projections), then saturates the
//! graph: predecessor edges record values flowing *into* a node,
//! successor edges record where a node's values flow *onward*, and the
//! worklist composes the two until nothing grows.
//!
//! All nodes live in one arena owned by the [`Solver`]; edges are indices
//! into it, so the inherently cyclic graph (set variables reference
//! projections and vice versa) needs no shared ownership.
//!
//! Constructor edges dispatch structurally: `ref(a, X) <= ref(b, Y)` is
//! dropped outright when the cell names disagree and otherwise descends
//! covariantly into the contents; `lam_` descends covariantly into the
//! return position and *contravariantly* into the parameters, which is
//! what makes argument flow through indirect calls point the right way.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{Error, Result};

/// Index of a node in the solver's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

#[derive(Debug, Clone, PartialEq)]
enum NodeKind {
    /// A set variable, interned by name.
    SetVar(String),
    /// A constructor call: `ref(cell, contents)` or
    /// `lam_[sig](fname, ret?, params..)`. Position 0 (`cell`) is the
    /// nominal argument; the set-variable arguments follow.
    Ctor {
        name: String,
        cell: String,
        has_ret: bool,
        args: Vec<NodeId>,
    },
    /// `proj(ctor, idx, sv)`.
    Proj {
        ctor: String,
        idx: usize,
        sv: NodeId,
    },
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    preds: BTreeSet<NodeId>,
    succs: BTreeSet<NodeId>,
    /// Projection nodes whose subject set variable is this node.
    projs: Vec<NodeId>,
}

/// Constraint graph plus worklist; the sole owner of every node.
#[derive(Debug, Default)]
pub struct Solver {
    nodes: Vec<Node>,
    set_vars: BTreeMap<String, NodeId>,
    worklist: VecDeque<NodeId>,
}

impl Solver {
    /// Parse a constraint file (one `lhs <= rhs` statement per line) into
    /// an unsolved graph.
    pub fn parse(input: &str) -> Result<Solver> {
        let mut solver = Solver::default();
        for (lineno, line) in input.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let tokens = tokenize(line)
                .map_err(|e| Error::Constraint(format!("line {}: {e}", lineno + 1)))?;
            let mut parser = Parser { tokens, pos: 0 };
            let lhs = parser.expr(&mut solver)?;
            parser.expect(&Token::Leq)?;
            let rhs = parser.expr(&mut solver)?;
            parser
                .end()
                .map_err(|e| Error::Constraint(format!("line {}: {e}", lineno + 1)))?;
            solver.add_edge(lhs, rhs, false);
        }
        Ok(solver)
    }

    fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            preds: BTreeSet::new(),
            succs: BTreeSet::new(),
            projs: Vec::new(),
        });
        id
    }

    /// Intern a set variable by name.
    fn set_var(&mut self, name: &str) -> NodeId {
        if let Some(&id) = self.set_vars.get(name) {
            return id;
        }
        let id = self.add_node(NodeKind::SetVar(name.to_string()));
        self.set_vars.insert(name.to_string(), id);
        id
    }

    fn is_set_var(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.0 as usize].kind, NodeKind::SetVar(_))
    }

    fn edge_count(&self, id: NodeId) -> usize {
        let node = &self.nodes[id.0 as usize];
        node.preds.len() + node.succs.len()
    }

    /// The set-variable argument at constructor position `pos` (position
    /// 0 is the nominal cell and has no node).
    fn ctor_arg(&self, id: NodeId, pos: usize) -> Option<NodeId> {
        match &self.nodes[id.0 as usize].kind {
            NodeKind::Ctor { args, .. } if pos >= 1 => args.get(pos - 1).copied(),
            _ => None,
        }
    }

    /// Record the inclusion `l <= r`, dispatching on node shapes.
    ///
    /// Two same-named constructors unify structurally: the nominal cell
    /// must agree (otherwise the edge is dropped), `ref` contents and
    /// `lam_` returns are covariant, `lam_` parameters contravariant.
    /// Otherwise a constructor on the left or a projection on the right
    /// is stored as a predecessor of the right node, and anything else as
    /// a successor of the left node. With `enqueue`, a set variable whose
    /// edge set grew is put on the worklist.
    fn add_edge(&mut self, l: NodeId, r: NodeId, enqueue: bool) {
        let (lk, rk) = (
            self.nodes[l.0 as usize].kind.clone(),
            self.nodes[r.0 as usize].kind.clone(),
        );
        match (&lk, &rk) {
            (
                NodeKind::Ctor {
                    name: ln,
                    cell: lc,
                    has_ret: lr,
                    args: la,
                },
                NodeKind::Ctor {
                    name: rn,
                    cell: rc,
                    has_ret: rr,
                    args: ra,
                },
            ) if ln == rn => {
                if lc != rc {
                    // Nominal disagreement: the inclusion is vacuous.
                    return;
                }
                if ln == "lam_" {
                    let (lparams, rparams) = if *lr && *rr && !la.is_empty() && !ra.is_empty() {
                        self.add_edge(la[0], ra[0], enqueue);
                        (&la[1..], &ra[1..])
                    } else {
                        (&la[..], &ra[..])
                    };
                    for (lp, rp) in lparams.iter().zip(rparams.iter()) {
                        self.add_edge(*rp, *lp, enqueue);
                    }
                } else {
                    for (lx, rx) in la.iter().zip(ra.iter()) {
                        self.add_edge(*lx, *rx, enqueue);
                    }
                }
            }
            _ if matches!(lk, NodeKind::Ctor { .. }) || matches!(rk, NodeKind::Proj { .. }) => {
                if self.nodes[r.0 as usize].preds.insert(l)
                    && enqueue
                    && self.is_set_var(r)
                {
                    self.worklist.push_back(r);
                }
            }
            _ => {
                if self.nodes[l.0 as usize].succs.insert(r)
                    && enqueue
                    && self.is_set_var(l)
                {
                    self.worklist.push_back(l);
                }
            }
        }
    }

    /// Saturate the graph. Every enqueue corresponds to a strictly grown
    /// edge set on some node, and the graph is finite, so this halts.
    pub fn solve(&mut self) {
        for &id in self.set_vars.values() {
            if !self.nodes[id.0 as usize].preds.is_empty() {
                self.worklist.push_back(id);
            }
        }

        let mut steps = 0usize;
        while let Some(x) = self.worklist.pop_front() {
            steps += 1;

            // Compose incoming values with outgoing flow.
            let preds: Vec<NodeId> = self.nodes[x.0 as usize].preds.iter().copied().collect();
            let succs: Vec<NodeId> = self.nodes[x.0 as usize].succs.iter().copied().collect();
            for &p in &preds {
                for &s in &succs {
                    self.add_edge(p, s, true);
                }
            }

            // Resolve every projection whose subject is this variable.
            let projs = self.nodes[x.0 as usize].projs.clone();
            for pnode in projs {
                let NodeKind::Proj { ctor, idx, .. } = self.nodes[pnode.0 as usize].kind.clone()
                else {
                    continue;
                };
                let mut resolved = BTreeSet::new();
                for &c in &self.nodes[x.0 as usize].preds {
                    if let NodeKind::Ctor { name, .. } = &self.nodes[c.0 as usize].kind {
                        if *name == ctor {
                            if let Some(y) = self.ctor_arg(c, idx) {
                                resolved.insert(y);
                            }
                        }
                    }
                }

                for y in resolved {
                    let y_before = self.edge_count(y);
                    let pnode_preds: Vec<NodeId> =
                        self.nodes[pnode.0 as usize].preds.iter().copied().collect();
                    for q in pnode_preds {
                        let q_before = self.edge_count(q);
                        self.add_edge(q, y, false);
                        if self.is_set_var(q) && self.edge_count(q) > q_before {
                            self.worklist.push_back(q);
                        }
                    }
                    let pnode_succs: Vec<NodeId> =
                        self.nodes[pnode.0 as usize].succs.iter().copied().collect();
                    for r in pnode_succs {
                        let r_before = self.edge_count(r);
                        self.add_edge(y, r, false);
                        if self.is_set_var(r) && self.edge_count(r) > r_before {
                            self.worklist.push_back(r);
                        }
                    }
                    if self.edge_count(y) > y_before {
                        self.worklist.push_back(y);
                    }
                }
            }
        }
        log::debug!("constraint solver saturated after {steps} worklist steps");
    }

    /// The points-to solution: for each set variable, the cells of the
    /// constructors flowing into it. Variables with empty sets are
    /// omitted.
    pub fn points_to(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut solution = BTreeMap::new();
        for (name, &id) in &self.set_vars {
            let mut cells = BTreeSet::new();
            for &p in &self.nodes[id.0 as usize].preds {
                if let NodeKind::Ctor { cell, .. } = &self.nodes[p.0 as usize].kind {
                    cells.insert(cell.clone());
                }
            }
            if !cells.is_empty() {
                solution.insert(name.clone(), cells);
            }
        }
        solution
    }
}

/// Parse, solve, and extract the points-to map in one call.
pub fn solve_constraints(input: &str) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let mut solver = Solver::parse(input)?;
    solver.solve();
    Ok(solver.points_to())
}

/// Render the points-to solution: `setvar -> {cell, ..}` per line.
pub fn write_points_to(
    out: &mut impl std::io::Write,
    solution: &BTreeMap<String, BTreeSet<String>>,
) -> std::io::Result<()> {
    for (name, cells) in solution {
        let cells: Vec<&str> = cells.iter().map(String::as_str).collect();
        writeln!(out, "{name} -> {{{}}}", cells.join(", "))?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Leq,
    Arrow,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "{s}"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Leq => write!(f, "<="),
            Token::Arrow => write!(f, "->"),
        }
    }
}

/// Identifier characters: names, qualified names, `$alloc` cells, and the
/// `&`-prefixed types inside a `lam_` signature.
fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '&')
}

fn tokenize(line: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '<' => {
                chars.next();
                match chars.next() {
                    Some('=') => tokens.push(Token::Leq),
                    other => return Err(format!("expected <=, got <{}", other.unwrap_or(' '))),
                }
            }
            '-' => {
                chars.next();
                match chars.next() {
                    Some('>') => tokens.push(Token::Arrow),
                    other => return Err(format!("expected ->, got -{}", other.unwrap_or(' '))),
                }
            }
            c if is_ident_char(c) => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if is_ident_char(c) {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(format!("unexpected character {other:?}")),
        }
    }
    Ok(tokens)
}

/// Recursive-descent parser over one statement's tokens.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| Error::Constraint("unexpected end of statement".to_string()))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, want: &Token) -> Result<()> {
        let got = self.next()?;
        if got == *want {
            Ok(())
        } else {
            Err(Error::Constraint(format!("expected {want}, got {got}")))
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.next()? {
            Token::Ident(s) => Ok(s),
            other => Err(Error::Constraint(format!("expected identifier, got {other}"))),
        }
    }

    fn end(&self) -> std::result::Result<(), String> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(format!("trailing tokens after statement: {}", self.tokens[self.pos]))
        }
    }

    fn expr(&mut self, solver: &mut Solver) -> Result<NodeId> {
        let head = self.ident()?;
        match (head.as_str(), self.peek()) {
            ("proj", Some(Token::LParen)) => self.projection(solver),
            ("lam_", Some(Token::LBracket)) => self.lam(solver),
            (_, Some(Token::LParen)) => self.ctor(solver, head),
            _ => Ok(solver.set_var(&head)),
        }
    }

    /// `proj(ctor, idx, sv)`: registers itself with its subject variable
    /// so the solver can find it during saturation.
    fn projection(&mut self, solver: &mut Solver) -> Result<NodeId> {
        self.expect(&Token::LParen)?;
        let ctor = self.ident()?;
        self.expect(&Token::Comma)?;
        let idx_token = self.ident()?;
        let idx: usize = idx_token
            .parse()
            .map_err(|_| Error::Constraint(format!("bad projection index {idx_token}")))?;
        self.expect(&Token::Comma)?;
        let sv_name = self.ident()?;
        self.expect(&Token::RParen)?;

        let sv = solver.set_var(&sv_name);
        let proj = solver.add_node(NodeKind::Proj { ctor, idx, sv });
        solver.nodes[sv.0 as usize].projs.push(proj);
        Ok(proj)
    }

    /// `name(cell, sv..)`; in practice `ref` with exactly one contents
    /// variable, but the shape is kept general.
    fn ctor(&mut self, solver: &mut Solver, name: String) -> Result<NodeId> {
        self.expect(&Token::LParen)?;
        let cell = self.ident()?;
        let mut args = Vec::new();
        while matches!(self.peek(), Some(Token::Comma)) {
            self.expect(&Token::Comma)?;
            let arg = self.ident()?;
            args.push(solver.set_var(&arg));
        }
        self.expect(&Token::RParen)?;
        Ok(solver.add_node(NodeKind::Ctor {
            name,
            cell,
            has_ret: false,
            args,
        }))
    }

    /// `lam_[(t1,..,tn)->tret](fname, ret?, p1, .., pn)`. The signature
    /// says whether a return argument is present: `tret` of `_` means
    /// none, so the first set-variable argument is already a parameter.
    fn lam(&mut self, solver: &mut Solver) -> Result<NodeId> {
        self.expect(&Token::LBracket)?;
        self.expect(&Token::LParen)?;
        let mut param_types = Vec::new();
        while !matches!(self.peek(), Some(Token::RParen)) {
            param_types.push(self.ident()?);
            if matches!(self.peek(), Some(Token::Comma)) {
                self.expect(&Token::Comma)?;
            }
        }
        self.expect(&Token::RParen)?;
        self.expect(&Token::Arrow)?;
        let ret_type = self.ident()?;
        self.expect(&Token::RBracket)?;

        self.expect(&Token::LParen)?;
        let fname = self.ident()?;
        let mut args = Vec::new();
        while matches!(self.peek(), Some(Token::Comma)) {
            self.expect(&Token::Comma)?;
            let arg = self.ident()?;
            args.push(solver.set_var(&arg));
        }
        self.expect(&Token::RParen)?;

        Ok(solver.add_node(NodeKind::Ctor {
            name: "lam_".to_string(),
            cell: fname,
            has_ret: ret_type != "_",
            args,
        }))
    }
}
