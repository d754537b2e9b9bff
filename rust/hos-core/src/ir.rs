//! Arena-based intermediate representation consumed and produced by every pass.
//!
//! A [`Module`] owns its functions; each [`Function`] owns three flat arenas
//! (locals, expressions, blocks). Nodes refer to each other by index only, so
//! control-flow graphs with back-edges never form ownership cycles and a pass
//! can rewrite a node in place without invalidating ids held elsewhere.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use thiserror::Error;

use crate::value::ExceptionTag;

macro_rules! arena_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

arena_id!(ExprId, "e");
arena_id!(BlockId, "bb");
arena_id!(LocalId, "l");
arena_id!(FunctionId, "fn");

/// Scalar or compound constant appearing in source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Non-scalar constant. Data passes leave these alone.
    Tuple(Vec<Literal>),
}

impl Literal {
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Literal::Tuple(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
    /// Reinterpret an integer's bit pattern as an `f64`.
    FloatFromBits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    RotL,
    RotR,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::RotL => "<<<",
            BinOp::RotR => ">>>",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }
}

/// Runtime-provided functions callable from IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Builtin {
    /// Appends the rendered argument to the program's output. The only I/O effect.
    Print,
    Abs,
    Min,
    Max,
    /// Runtime Guard hook; returns a bool supplied by the host.
    CheckIntegrity,
}

impl Builtin {
    pub fn is_pure(self) -> bool {
        matches!(self, Builtin::Abs | Builtin::Min | Builtin::Max)
    }

    pub fn id(self) -> u32 {
        match self {
            Builtin::Print => 0,
            Builtin::Abs => 1,
            Builtin::Min => 2,
            Builtin::Max => 3,
            Builtin::CheckIntegrity => 4,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Some(match id {
            0 => Builtin::Print,
            1 => Builtin::Abs,
            2 => Builtin::Min,
            3 => Builtin::Max,
            4 => Builtin::CheckIntegrity,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Callee {
    Function(FunctionId),
    Builtin(Builtin),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Lit(Literal),
    Local(LocalId),
    Unary {
        op: UnOp,
        operand: ExprId,
    },
    Binary {
        op: BinOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    /// Evaluates `cond` then only the chosen arm.
    Select {
        cond: ExprId,
        then_value: ExprId,
        else_value: ExprId,
    },
    Call {
        callee: Callee,
        args: Vec<ExprId>,
    },
    /// Indirect constant through a module encoding table.
    TableLoad {
        table: u32,
        slot: u32,
    },
    /// Lazily decrypted string literal.
    Decrypt {
        record: u32,
    },
    /// Evaluated on first use within an invocation, cached afterwards.
    Lazy {
        cell: u32,
        init: ExprId,
    },
    /// Run a bytecode blob in the embedded VM.
    VmCall {
        blob: u32,
        args: Vec<ExprId>,
    },
}

impl Expr {
    /// Child slots, in evaluation order, for rewriting ids in place.
    pub fn children_mut(&mut self) -> Vec<&mut ExprId> {
        match self {
            Expr::Lit(_) | Expr::Local(_) | Expr::TableLoad { .. } | Expr::Decrypt { .. } => {
                Vec::new()
            }
            Expr::Unary { operand, .. } => vec![operand],
            Expr::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Expr::Select {
                cond,
                then_value,
                else_value,
            } => vec![cond, then_value, else_value],
            Expr::Call { args, .. } | Expr::VmCall { args, .. } => args.iter_mut().collect(),
            Expr::Lazy { init, .. } => vec![init],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Assign { local: LocalId, value: ExprId },
    Eval(ExprId),
}

impl Stmt {
    pub fn expr_mut(&mut self) -> &mut ExprId {
        match self {
            Stmt::Assign { value, .. } => value,
            Stmt::Eval(e) => e,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    Jump(BlockId),
    Branch {
        cond: ExprId,
        then_block: BlockId,
        else_block: BlockId,
    },
    /// Dispatch table: jumps to the block whose key equals the scrutinee.
    Switch {
        scrutinee: ExprId,
        cases: Vec<(i64, BlockId)>,
        default: BlockId,
    },
    Return(Option<ExprId>),
    Raise {
        tag: ExceptionTag,
        payload: ExprId,
    },
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump(t) => vec![*t],
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Switch { cases, default, .. } => {
                let mut out: Vec<BlockId> = cases.iter().map(|(_, b)| *b).collect();
                out.push(*default);
                out
            }
            Terminator::Return(_) | Terminator::Raise { .. } => Vec::new(),
        }
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, Terminator::Return(_) | Terminator::Raise { .. })
    }

    pub fn targets_mut(&mut self) -> Vec<&mut BlockId> {
        match self {
            Terminator::Jump(t) => vec![t],
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => vec![then_block, else_block],
            Terminator::Switch { cases, default, .. } => {
                let mut out: Vec<&mut BlockId> = cases.iter_mut().map(|(_, b)| b).collect();
                out.push(default);
                out
            }
            Terminator::Return(_) | Terminator::Raise { .. } => Vec::new(),
        }
    }

    pub fn expr_mut(&mut self) -> Option<&mut ExprId> {
        match self {
            Terminator::Branch { cond, .. } => Some(cond),
            Terminator::Switch { scrutinee, .. } => Some(scrutinee),
            Terminator::Return(value) => value.as_mut(),
            Terminator::Raise { payload, .. } => Some(payload),
            Terminator::Jump(_) => None,
        }
    }
}

/// Exception edge: a raise with a matching tag anywhere inside the owning
/// block transfers control to `target`, binding the payload if requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handler {
    pub tag: ExceptionTag,
    pub target: BlockId,
    pub bind: Option<LocalId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub term: Terminator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handlers: Vec<Handler>,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>, term: Terminator) -> Self {
        Self {
            stmts,
            term,
            handlers: Vec::new(),
        }
    }

    /// Normal and exceptional successors.
    pub fn successors(&self) -> Vec<BlockId> {
        let mut out = self.term.successors();
        out.extend(self.handlers.iter().map(|h| h.target));
        out
    }

    pub fn successors_mut(&mut self) -> Vec<&mut BlockId> {
        let mut out = self.term.targets_mut();
        out.extend(self.handlers.iter_mut().map(|h| &mut h.target));
        out
    }

    /// Expression roots of the statements and terminator.
    pub fn roots_mut(&mut self) -> Vec<&mut ExprId> {
        let mut out: Vec<&mut ExprId> = self.stmts.iter_mut().map(Stmt::expr_mut).collect();
        out.extend(self.term.expr_mut());
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Local {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    /// Exported functions keep their name; callers outside the module use it.
    #[serde(default)]
    pub exported: bool,
    pub params: Vec<LocalId>,
    pub locals: Vec<Local>,
    pub exprs: Vec<Expr>,
    pub blocks: Vec<Block>,
    pub entry: BlockId,
}

/// Per-module constant table referenced by [`Expr::TableLoad`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingTable {
    pub entries: Vec<Literal>,
}

/// Ciphertext of one protected string literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionRecord {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; 16],
    pub salt: [u8; 16],
    pub tag: [u8; 32],
}

/// Serialized bytecode program plus the metadata its call site needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BytecodeBlob {
    /// Name of the function this blob replaced.
    pub origin: String,
    pub arity: u32,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<EncodingTable>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strings: Vec<EncryptionRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blobs: Vec<BytecodeBlob>,
    /// Master secret from which per-string keys are derived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_key: Option<[u8; 32]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("{function}: expression {id} out of range")]
    BadExpr { function: String, id: ExprId },
    #[error("{function}: block {id} out of range")]
    BadBlock { function: String, id: BlockId },
    #[error("{function}: local {id} out of range")]
    BadLocal { function: String, id: LocalId },
    #[error("{function}: call to unknown function {id}")]
    BadFunction { function: String, id: FunctionId },
    #[error("{function}: {what} index {index} out of range")]
    BadModuleRef {
        function: String,
        what: &'static str,
        index: u32,
    },
    #[error("{function}: expression {id} contains itself")]
    CyclicExpr { function: String, id: ExprId },
    #[error("duplicate function name '{0}'")]
    DuplicateFunction(String),
}

impl IrError {
    /// Function the error was found in, if it is function-local.
    pub fn function(&self) -> Option<&str> {
        match self {
            IrError::BadExpr { function, .. }
            | IrError::BadBlock { function, .. }
            | IrError::BadLocal { function, .. }
            | IrError::BadFunction { function, .. }
            | IrError::BadModuleRef { function, .. }
            | IrError::CyclicExpr { function, .. } => Some(function),
            IrError::DuplicateFunction(_) => None,
        }
    }
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            tables: Vec::new(),
            strings: Vec::new(),
            blobs: Vec::new(),
            string_key: None,
        }
    }

    pub fn function_id(&self, name: &str) -> Option<FunctionId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FunctionId(i as u32))
    }

    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(id.index())
    }

    /// Structural validation of every function and module-level reference.
    pub fn validate(&self) -> Result<(), IrError> {
        let mut names = BTreeSet::new();
        for func in &self.functions {
            if !names.insert(func.name.as_str()) {
                return Err(IrError::DuplicateFunction(func.name.clone()));
            }
            func.validate()?;
            for expr in &func.exprs {
                let bad = |what, index| IrError::BadModuleRef {
                    function: func.name.clone(),
                    what,
                    index,
                };
                match expr {
                    Expr::Call {
                        callee: Callee::Function(id),
                        ..
                    } if id.index() >= self.functions.len() => {
                        return Err(IrError::BadFunction {
                            function: func.name.clone(),
                            id: *id,
                        })
                    }
                    Expr::TableLoad { table, slot } => {
                        let entries = self.tables.get(*table as usize).map(|t| t.entries.len());
                        match entries {
                            None => return Err(bad("table", *table)),
                            Some(n) if *slot as usize >= n => return Err(bad("table slot", *slot)),
                            _ => {}
                        }
                    }
                    Expr::Decrypt { record } if *record as usize >= self.strings.len() => {
                        return Err(bad("string record", *record))
                    }
                    Expr::VmCall { blob, .. } if *blob as usize >= self.blobs.len() => {
                        return Err(bad("bytecode blob", *blob))
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exported: false,
            params: Vec::new(),
            locals: Vec::new(),
            exprs: Vec::new(),
            blocks: Vec::new(),
            entry: BlockId(0),
        }
    }

    pub fn add_local(&mut self, name: impl Into<String>) -> LocalId {
        self.locals.push(Local { name: name.into() });
        LocalId(self.locals.len() as u32 - 1)
    }

    pub fn add_param(&mut self, name: impl Into<String>) -> LocalId {
        let id = self.add_local(name);
        self.params.push(id);
        id
    }

    pub fn add_expr(&mut self, expr: Expr) -> ExprId {
        self.exprs.push(expr);
        ExprId(self.exprs.len() as u32 - 1)
    }

    pub fn add_block(&mut self, block: Block) -> BlockId {
        self.blocks.push(block);
        BlockId(self.blocks.len() as u32 - 1)
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    pub fn lit(&mut self, lit: Literal) -> ExprId {
        self.add_expr(Expr::Lit(lit))
    }

    pub fn int(&mut self, v: i64) -> ExprId {
        self.lit(Literal::Int(v))
    }

    pub fn local(&mut self, id: LocalId) -> ExprId {
        self.add_expr(Expr::Local(id))
    }

    pub fn binary(&mut self, op: BinOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.add_expr(Expr::Binary { op, lhs, rhs })
    }

    pub fn unary(&mut self, op: UnOp, operand: ExprId) -> ExprId {
        self.add_expr(Expr::Unary { op, operand })
    }

    /// Direct children of an expression, in evaluation order.
    pub fn children(&self, id: ExprId) -> Vec<ExprId> {
        match self.expr(id) {
            Expr::Lit(_) | Expr::Local(_) | Expr::TableLoad { .. } | Expr::Decrypt { .. } => {
                Vec::new()
            }
            Expr::Unary { operand, .. } => vec![*operand],
            Expr::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            Expr::Select {
                cond,
                then_value,
                else_value,
            } => vec![*cond, *then_value, *else_value],
            Expr::Call { args, .. } | Expr::VmCall { args, .. } => args.clone(),
            Expr::Lazy { init, .. } => vec![*init],
        }
    }

    /// Root expressions referenced by a block's statements and terminator.
    pub fn block_roots(&self, id: BlockId) -> Vec<ExprId> {
        let block = self.block(id);
        let mut roots = Vec::new();
        for stmt in &block.stmts {
            match stmt {
                Stmt::Assign { value, .. } => roots.push(*value),
                Stmt::Eval(e) => roots.push(*e),
            }
        }
        match &block.term {
            Terminator::Branch { cond, .. } => roots.push(*cond),
            Terminator::Switch { scrutinee, .. } => roots.push(*scrutinee),
            Terminator::Return(Some(e)) => roots.push(*e),
            Terminator::Raise { payload, .. } => roots.push(*payload),
            Terminator::Jump(_) | Terminator::Return(None) => {}
        }
        roots
    }

    /// Every expression id reachable from reachable blocks, parents before children.
    pub fn live_exprs(&self) -> Vec<ExprId> {
        let mut out = Vec::new();
        let mut seen = vec![false; self.exprs.len()];
        for block in self.reachable_blocks() {
            let mut stack = self.block_roots(block);
            stack.reverse();
            while let Some(e) = stack.pop() {
                if e.index() >= seen.len() || seen[e.index()] {
                    continue;
                }
                seen[e.index()] = true;
                out.push(e);
                let mut kids = self.children(e);
                kids.reverse();
                stack.extend(kids);
            }
        }
        out
    }

    /// True when evaluating the expression can neither perform I/O nor call
    /// into code whose effects are unknown. Such expressions may be duplicated
    /// or reordered.
    pub fn is_pure(&self, id: ExprId) -> bool {
        match self.expr(id) {
            Expr::Call {
                callee: Callee::Builtin(b),
                ..
            } if b.is_pure() => self.children(id).into_iter().all(|c| self.is_pure(c)),
            Expr::Call { .. } | Expr::VmCall { .. } => false,
            _ => self.children(id).into_iter().all(|c| self.is_pure(c)),
        }
    }

    /// Copies the subtree rooted at `id` into fresh arena slots.
    pub fn deep_clone(&mut self, id: ExprId) -> ExprId {
        let expr = self.expr(id).clone();
        let cloned = match expr {
            Expr::Unary { op, operand } => {
                let operand = self.deep_clone(operand);
                Expr::Unary { op, operand }
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.deep_clone(lhs);
                let rhs = self.deep_clone(rhs);
                Expr::Binary { op, lhs, rhs }
            }
            Expr::Select {
                cond,
                then_value,
                else_value,
            } => Expr::Select {
                cond: self.deep_clone(cond),
                then_value: self.deep_clone(then_value),
                else_value: self.deep_clone(else_value),
            },
            Expr::Call { callee, args } => Expr::Call {
                callee,
                args: args.into_iter().map(|a| self.deep_clone(a)).collect(),
            },
            Expr::VmCall { blob, args } => Expr::VmCall {
                blob,
                args: args.into_iter().map(|a| self.deep_clone(a)).collect(),
            },
            Expr::Lazy { cell, init } => Expr::Lazy {
                cell,
                init: self.deep_clone(init),
            },
            leaf => leaf,
        };
        self.add_expr(cloned)
    }

    /// Blocks reachable from the entry through normal and exception edges, in BFS order.
    pub fn reachable_blocks(&self) -> Vec<BlockId> {
        let mut order = Vec::new();
        if self.entry.index() >= self.blocks.len() {
            return order;
        }
        let mut seen = vec![false; self.blocks.len()];
        let mut queue = VecDeque::from([self.entry]);
        seen[self.entry.index()] = true;
        while let Some(b) = queue.pop_front() {
            order.push(b);
            for succ in self.block(b).successors() {
                if succ.index() < seen.len() && !seen[succ.index()] {
                    seen[succ.index()] = true;
                    queue.push_back(succ);
                }
            }
        }
        order
    }

    /// Largest lazy-cell index used plus one.
    pub fn lazy_cells(&self) -> u32 {
        self.exprs
            .iter()
            .filter_map(|e| match e {
                Expr::Lazy { cell, .. } => Some(cell + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Tags raised or handled anywhere in this function.
    pub fn exception_tags(&self) -> BTreeSet<ExceptionTag> {
        let mut tags = BTreeSet::new();
        for block in &self.blocks {
            if let Terminator::Raise { tag, .. } = block.term {
                tags.insert(tag);
            }
            tags.extend(block.handlers.iter().map(|h| h.tag));
        }
        tags
    }

    /// Checks every id is in range. Out-of-range references anywhere in the
    /// arenas are reported, reachable or not.
    pub fn validate(&self) -> Result<(), IrError> {
        let bad_block = |id| IrError::BadBlock {
            function: self.name.clone(),
            id,
        };
        let bad_local = |id| IrError::BadLocal {
            function: self.name.clone(),
            id,
        };
        let check_expr = |id: ExprId| {
            if id.index() < self.exprs.len() {
                Ok(())
            } else {
                Err(IrError::BadExpr {
                    function: self.name.clone(),
                    id,
                })
            }
        };
        let check_block = |id: BlockId| {
            if id.index() < self.blocks.len() {
                Ok(())
            } else {
                Err(bad_block(id))
            }
        };
        let check_local = |id: LocalId| {
            if id.index() < self.locals.len() {
                Ok(())
            } else {
                Err(bad_local(id))
            }
        };

        check_block(self.entry)?;
        for p in &self.params {
            check_local(*p)?;
        }
        for (i, expr) in self.exprs.iter().enumerate() {
            if let Expr::Local(l) = expr {
                check_local(*l)?;
            }
            let id = ExprId(i as u32);
            for child in self.children(id) {
                check_expr(child)?;
            }
        }
        if let Some(id) = self.find_expr_cycle() {
            return Err(IrError::CyclicExpr {
                function: self.name.clone(),
                id,
            });
        }
        for block in &self.blocks {
            for stmt in &block.stmts {
                match stmt {
                    Stmt::Assign { local, value } => {
                        check_local(*local)?;
                        check_expr(*value)?;
                    }
                    Stmt::Eval(e) => check_expr(*e)?,
                }
            }
            match &block.term {
                Terminator::Branch { cond, .. } => check_expr(*cond)?,
                Terminator::Switch { scrutinee, .. } => check_expr(*scrutinee)?,
                Terminator::Return(Some(e)) => check_expr(*e)?,
                Terminator::Raise { payload, .. } => check_expr(*payload)?,
                Terminator::Jump(_) | Terminator::Return(None) => {}
            }
            for succ in block.successors() {
                check_block(succ)?;
            }
            for h in &block.handlers {
                if let Some(l) = h.bind {
                    check_local(l)?;
                }
            }
        }
        Ok(())
    }

    /// An expression that transitively contains itself. Children must be in
    /// range. Iterative so that deep trees cannot exhaust the stack.
    fn find_expr_cycle(&self) -> Option<ExprId> {
        // 0 unvisited, 1 on the current path, 2 finished
        let mut state = vec![0u8; self.exprs.len()];
        for root in 0..self.exprs.len() {
            if state[root] != 0 {
                continue;
            }
            state[root] = 1;
            let mut stack = vec![(ExprId(root as u32), 0usize)];
            while let Some((id, next)) = stack.last_mut() {
                let id = *id;
                let child = self.children(id).get(*next).copied();
                match child {
                    Some(child) => {
                        *next += 1;
                        match state[child.index()] {
                            0 => {
                                state[child.index()] = 1;
                                stack.push((child, 0));
                            }
                            1 => return Some(child),
                            _ => {}
                        }
                    }
                    None => {
                        state[id.index()] = 2;
                        stack.pop();
                    }
                }
            }
        }
        None
    }

    /// Drops blocks unreachable from the entry and expressions no reachable
    /// block uses, renumbering what remains in order. Locals are untouched.
    pub fn prune(&mut self) {
        let reachable = self.reachable_blocks();
        let mut live = self.live_exprs();
        live.sort();

        let mut block_map = vec![BlockId(0); self.blocks.len()];
        for (new, old) in reachable.iter().enumerate() {
            block_map[old.index()] = BlockId(new as u32);
        }
        let mut expr_map = vec![ExprId(0); self.exprs.len()];
        for (new, old) in live.iter().enumerate() {
            expr_map[old.index()] = ExprId(new as u32);
        }

        let exprs = live
            .iter()
            .map(|id| {
                let mut e = self.expr(*id).clone();
                for child in e.children_mut() {
                    *child = expr_map[child.index()];
                }
                e
            })
            .collect();
        let blocks = reachable
            .iter()
            .map(|id| {
                let mut b = self.block(*id).clone();
                for root in b.roots_mut() {
                    *root = expr_map[root.index()];
                }
                for target in b.successors_mut() {
                    *target = block_map[target.index()];
                }
                b
            })
            .collect();
        self.entry = block_map.get(self.entry.index()).copied().unwrap_or(BlockId(0));
        self.exprs = exprs;
        self.blocks = blocks;
    }

    /// True when some reachable block returns or raises.
    pub fn has_reachable_exit(&self) -> bool {
        self.reachable_blocks()
            .into_iter()
            .any(|b| self.block(b).term.is_exit())
    }

    /// Names in use by locals of this function.
    pub fn local_names(&self) -> BTreeSet<String> {
        self.locals.iter().map(|l| l.name.clone()).collect()
    }
}
