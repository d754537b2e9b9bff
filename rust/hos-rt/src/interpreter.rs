//! Tree-walking interpreter for HOS IR.
//!
//! Every operator goes through [`Value::binary`] / [`Value::unary`], the same
//! entry points the bytecode VM uses, so a function and its virtualized form
//! cannot disagree. Bytecode blobs run on a fresh [`hos_vm::Vm`] per call
//! with this interpreter as the host, which makes nested and recursive
//! invocations across the IR/VM boundary independent of each other.

use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, trace};

use hos_core::crypto;
use hos_core::ir::{BlockId, Builtin, Callee, Expr, ExprId, Function, FunctionId, Module, Stmt, Terminator};
use hos_core::value::ExceptionTag;
use hos_core::{Exception, Value};
use hos_vm::{codec, Completion, Program, Vm, VmHost};

use crate::error::RuntimeError;

pub const MAX_CALL_DEPTH: usize = 256;

/// Runtime Guard hook answering the `CheckIntegrity` builtin.
pub trait IntegrityHook {
    fn check_integrity(&mut self) -> bool {
        true
    }
}

/// Hook that reports every check as passing.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrustingHook;

impl IntegrityHook for TrustingHook {}

/// Why evaluation stopped early: a program exception, which handlers may
/// catch, or a host error, which always propagates.
enum Interrupt {
    Raise(Exception),
    Error(RuntimeError),
}

impl From<Exception> for Interrupt {
    fn from(exc: Exception) -> Self {
        Interrupt::Raise(exc)
    }
}

impl From<RuntimeError> for Interrupt {
    fn from(err: RuntimeError) -> Self {
        Interrupt::Error(err)
    }
}

fn lift(completion: Completion) -> Result<Value, Interrupt> {
    completion.map_err(Interrupt::Raise)
}

enum Next {
    Goto(BlockId),
    Return(Value),
    /// `return g(args)` from a block without handlers. Runs in place of the
    /// current frame so call depth stays flat.
    TailCall(FunctionId, Vec<Value>),
}

struct Frame {
    locals: Vec<Value>,
    lazy: Vec<Option<Value>>,
}

pub struct Runtime<'m> {
    module: &'m Module,
    hook: Box<dyn IntegrityHook + 'm>,
    output: Vec<String>,
    programs: HashMap<u32, Rc<Program>>,
    steps: u64,
    max_steps: Option<u64>,
    depth: usize,
}

impl<'m> Runtime<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            hook: Box::new(TrustingHook),
            output: Vec::new(),
            programs: HashMap::new(),
            steps: 0,
            max_steps: None,
            depth: 0,
        }
    }

    pub fn with_hook(mut self, hook: impl IntegrityHook + 'm) -> Self {
        self.hook = Box::new(hook);
        self
    }

    /// Caps the blocks entered across the whole invocation, nested calls
    /// included. Unlimited by default so protected code never fails where
    /// the original would have finished.
    pub fn with_step_limit(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// Lines printed so far.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    /// Calls a function by name.
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Completion, RuntimeError> {
        let id = self
            .module
            .function_id(name)
            .ok_or_else(|| RuntimeError::MissingFunction(name.to_string()))?;
        self.call_id(id, args)
    }

    pub fn call_id(&mut self, id: FunctionId, args: Vec<Value>) -> Result<Completion, RuntimeError> {
        let module = self.module;
        let func = module
            .function(id)
            .ok_or_else(|| RuntimeError::MissingFunction(id.to_string()))?;
        if args.len() != func.params.len() {
            return Err(RuntimeError::ArityMismatch {
                function: func.name.clone(),
                expected: func.params.len(),
                got: args.len(),
            });
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(RuntimeError::DepthLimit(MAX_CALL_DEPTH));
        }
        self.depth += 1;
        let result = self.run_function(func, args);
        self.depth -= 1;
        result
    }

    fn bad(func: &Function, detail: impl Into<String>) -> RuntimeError {
        RuntimeError::BadReference {
            function: func.name.clone(),
            detail: detail.into(),
        }
    }

    fn enter(func: &Function, args: Vec<Value>) -> Result<Frame, RuntimeError> {
        let mut frame = Frame {
            locals: vec![Value::Unit; func.locals.len()],
            lazy: vec![None; func.lazy_cells() as usize],
        };
        for (param, arg) in func.params.iter().zip(args) {
            let slot = frame
                .locals
                .get_mut(param.index())
                .ok_or_else(|| Self::bad(func, format!("parameter {param} out of range")))?;
            *slot = arg;
        }
        Ok(frame)
    }

    fn run_function(&mut self, mut func: &'m Function, args: Vec<Value>) -> Result<Completion, RuntimeError> {
        let mut frame = Self::enter(func, args)?;
        let mut current = func.entry;
        loop {
            self.steps += 1;
            if let Some(limit) = self.max_steps.filter(|limit| self.steps > *limit) {
                return Err(RuntimeError::StepLimit(limit));
            }
            let block = func
                .blocks
                .get(current.index())
                .ok_or_else(|| Self::bad(func, format!("block {current} out of range")))?;
            match self.exec_block(func, &mut frame, current) {
                Ok(Next::Goto(b)) => current = b,
                Ok(Next::Return(v)) => return Ok(Ok(v)),
                Ok(Next::TailCall(id, args)) => {
                    let module = self.module;
                    let callee = module
                        .function(id)
                        .ok_or_else(|| RuntimeError::MissingFunction(id.to_string()))?;
                    if args.len() != callee.params.len() {
                        return Err(RuntimeError::ArityMismatch {
                            function: callee.name.clone(),
                            expected: callee.params.len(),
                            got: args.len(),
                        });
                    }
                    trace!(from = %func.name, to = %callee.name, "tail call");
                    frame = Self::enter(callee, args)?;
                    func = callee;
                    current = func.entry;
                }
                Err(Interrupt::Error(e)) => return Err(e),
                Err(Interrupt::Raise(exc)) => {
                    let Some(handler) = block.handlers.iter().find(|h| h.tag == exc.tag) else {
                        return Ok(Err(exc));
                    };
                    trace!(function = %func.name, tag = %exc.tag, target = %handler.target, "handled");
                    if let Some(l) = handler.bind {
                        let slot = frame
                            .locals
                            .get_mut(l.index())
                            .ok_or_else(|| Self::bad(func, format!("handler local {l} out of range")))?;
                        *slot = exc.payload;
                    }
                    current = handler.target;
                }
            }
        }
    }

    fn exec_block(&mut self, func: &'m Function, frame: &mut Frame, id: BlockId) -> Result<Next, Interrupt> {
        let block = func.block(id);
        for stmt in &block.stmts {
            match stmt {
                Stmt::Assign { local, value } => {
                    let v = self.eval(func, frame, *value)?;
                    let slot = frame
                        .locals
                        .get_mut(local.index())
                        .ok_or_else(|| Self::bad(func, format!("local {local} out of range")))?;
                    *slot = v;
                }
                Stmt::Eval(e) => {
                    self.eval(func, frame, *e)?;
                }
            }
        }
        match &block.term {
            Terminator::Jump(t) => Ok(Next::Goto(*t)),
            Terminator::Branch {
                cond,
                then_block,
                else_block,
            } => {
                let c = self.eval(func, frame, *cond)?.as_bool()?;
                Ok(Next::Goto(if c { *then_block } else { *else_block }))
            }
            Terminator::Switch {
                scrutinee,
                cases,
                default,
            } => {
                let v = self.eval(func, frame, *scrutinee)?;
                let target = match v {
                    Value::Int(k) => cases.iter().find(|(key, _)| *key == k).map(|(_, b)| *b),
                    _ => None,
                };
                Ok(Next::Goto(target.unwrap_or(*default)))
            }
            Terminator::Return(Some(value)) if block.handlers.is_empty() => {
                if let Some(Expr::Call {
                    callee: Callee::Function(id),
                    args,
                }) = func.exprs.get(value.index())
                {
                    let args = self.eval_args(func, frame, args)?;
                    return Ok(Next::TailCall(*id, args));
                }
                Ok(Next::Return(self.eval(func, frame, *value)?))
            }
            Terminator::Return(value) => {
                let v = match value {
                    Some(e) => self.eval(func, frame, *e)?,
                    None => Value::Unit,
                };
                Ok(Next::Return(v))
            }
            Terminator::Raise { tag, payload } => {
                let payload = self.eval(func, frame, *payload)?;
                Err(Interrupt::Raise(Exception::new(*tag, payload)))
            }
        }
    }

    fn eval(&mut self, func: &'m Function, frame: &mut Frame, id: ExprId) -> Result<Value, Interrupt> {
        let expr = func
            .exprs
            .get(id.index())
            .ok_or_else(|| Self::bad(func, format!("expression {id} out of range")))?;
        match expr {
            Expr::Lit(lit) => Ok(Value::from(lit)),
            Expr::Local(l) => frame
                .locals
                .get(l.index())
                .cloned()
                .ok_or_else(|| Self::bad(func, format!("local {l} out of range")).into()),
            Expr::Unary { op, operand } => {
                let v = self.eval(func, frame, *operand)?;
                Ok(Value::unary(*op, &v)?)
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.eval(func, frame, *lhs)?;
                let r = self.eval(func, frame, *rhs)?;
                Ok(Value::binary(*op, &l, &r)?)
            }
            Expr::Select {
                cond,
                then_value,
                else_value,
            } => {
                let c = self.eval(func, frame, *cond)?.as_bool()?;
                self.eval(func, frame, if c { *then_value } else { *else_value })
            }
            Expr::Call { callee, args } => {
                let args = self.eval_args(func, frame, args)?;
                match callee {
                    Callee::Function(fid) => lift(self.call_id(*fid, args)?),
                    Callee::Builtin(b) => lift(self.builtin(*b, args)),
                }
            }
            Expr::TableLoad { table, slot } => {
                let lit = self
                    .module
                    .tables
                    .get(*table as usize)
                    .and_then(|t| t.entries.get(*slot as usize))
                    .ok_or_else(|| Self::bad(func, format!("table {table} slot {slot} missing")))?;
                Ok(Value::from(lit))
            }
            Expr::Decrypt { record } => {
                let module = self.module;
                let key = module
                    .string_key
                    .as_ref()
                    .ok_or_else(|| Self::bad(func, "module carries no string key"))?;
                let rec = module
                    .strings
                    .get(*record as usize)
                    .ok_or_else(|| Self::bad(func, format!("string record {record} missing")))?;
                let plaintext = crypto::open(key, rec).map_err(RuntimeError::from)?;
                Ok(Value::Str(plaintext))
            }
            Expr::Lazy { cell, init } => {
                let idx = *cell as usize;
                if let Some(Some(v)) = frame.lazy.get(idx) {
                    return Ok(v.clone());
                }
                let v = self.eval(func, frame, *init)?;
                let slot = frame
                    .lazy
                    .get_mut(idx)
                    .ok_or_else(|| Self::bad(func, format!("lazy cell {cell} out of range")))?;
                *slot = Some(v.clone());
                Ok(v)
            }
            Expr::VmCall { blob, args } => {
                let args = self.eval_args(func, frame, args)?;
                lift(self.run_blob(func, *blob, args)?)
            }
        }
    }

    fn eval_args(&mut self, func: &'m Function, frame: &mut Frame, args: &[ExprId]) -> Result<Vec<Value>, Interrupt> {
        args.iter().map(|a| self.eval(func, frame, *a)).collect()
    }

    fn program(&mut self, func: &Function, blob: u32) -> Result<(Rc<Program>, u32), RuntimeError> {
        let module = self.module;
        let entry = module
            .blobs
            .get(blob as usize)
            .ok_or_else(|| Self::bad(func, format!("bytecode blob {blob} missing")))?;
        if let Some(p) = self.programs.get(&blob) {
            return Ok((Rc::clone(p), entry.arity));
        }
        let program = Rc::new(codec::decode(&entry.bytes)?);
        debug!(blob, origin = %entry.origin, instructions = program.code.len(), "bytecode loaded");
        self.programs.insert(blob, Rc::clone(&program));
        Ok((program, entry.arity))
    }

    fn run_blob(&mut self, func: &Function, blob: u32, args: Vec<Value>) -> Result<Completion, RuntimeError> {
        let (program, arity) = self.program(func, blob)?;
        if args.len() != arity as usize {
            return Err(RuntimeError::ArityMismatch {
                function: func.name.clone(),
                expected: arity as usize,
                got: args.len(),
            });
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(RuntimeError::DepthLimit(MAX_CALL_DEPTH));
        }
        self.depth += 1;
        let mut vm = Vm::new(&program);
        if let Some(limit) = self.max_steps {
            vm = vm.with_step_limit(limit);
        }
        let result = vm.run(args, self);
        self.depth -= 1;
        result
    }

    fn builtin(&mut self, builtin: Builtin, args: Vec<Value>) -> Completion {
        let arity_error = || Exception::new(ExceptionTag::ARITY_ERROR, Value::Unit);
        match builtin {
            Builtin::Print => match args.as_slice() {
                [v] => {
                    self.output.push(v.to_string());
                    Ok(Value::Unit)
                }
                _ => Err(arity_error()),
            },
            Builtin::CheckIntegrity => {
                if !args.is_empty() {
                    return Err(arity_error());
                }
                Ok(Value::Bool(self.hook.check_integrity()))
            }
            pure => Value::pure_builtin(pure, &args),
        }
    }
}

impl VmHost for Runtime<'_> {
    type Error = RuntimeError;

    fn call_function(&mut self, func: FunctionId, args: Vec<Value>) -> Result<Completion, RuntimeError> {
        self.call_id(func, args)
    }

    fn call_builtin(&mut self, builtin: Builtin, args: Vec<Value>) -> Result<Completion, RuntimeError> {
        Ok(self.builtin(builtin, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hos_core::ir::{BinOp, Block, Handler, Literal};

    fn print_call(f: &mut Function, value: ExprId) -> ExprId {
        f.add_expr(Expr::Call {
            callee: Callee::Builtin(Builtin::Print),
            args: vec![value],
        })
    }

    #[test]
    fn test_handler_catches_and_binds() {
        // try { raise 9(41) } catch e { return e + 1 }
        let mut f = Function::new("f");
        let e = f.add_local("e");
        let payload = f.int(41);
        let ee = f.local(e);
        let one = f.int(1);
        let sum = f.binary(BinOp::Add, ee, one);
        let catch = f.add_block(Block::new(vec![], Terminator::Return(Some(sum))));
        let mut body = Block::new(
            vec![],
            Terminator::Raise {
                tag: ExceptionTag(9),
                payload,
            },
        );
        body.handlers.push(Handler {
            tag: ExceptionTag(9),
            target: catch,
            bind: Some(e),
        });
        f.entry = f.add_block(body);
        let mut m = Module::new("m");
        m.functions.push(f);

        let mut rt = Runtime::new(&m);
        assert_eq!(rt.call("f", vec![]).unwrap(), Ok(Value::Int(42)));
    }

    #[test]
    fn test_uncaught_exception_escapes() {
        let mut f = Function::new("f");
        let one = f.int(1);
        let zero = f.int(0);
        let div = f.binary(BinOp::Div, one, zero);
        f.entry = f.add_block(Block::new(vec![], Terminator::Return(Some(div))));
        let mut m = Module::new("m");
        m.functions.push(f);
        let result = Runtime::new(&m).call("f", vec![]).unwrap();
        assert_eq!(result, Err(Exception::division_by_zero()));
    }

    #[test]
    fn test_print_is_captured_in_order() {
        let mut f = Function::new("f");
        let a = f.lit(Literal::Str("a".into()));
        let b = f.int(2);
        let pa = print_call(&mut f, a);
        let pb = print_call(&mut f, b);
        f.entry = f.add_block(Block::new(vec![Stmt::Eval(pa), Stmt::Eval(pb)], Terminator::Return(None)));
        let mut m = Module::new("m");
        m.functions.push(f);
        let mut rt = Runtime::new(&m);
        assert_eq!(rt.call("f", vec![]).unwrap(), Ok(Value::Unit));
        assert_eq!(rt.take_output(), vec!["a".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_integrity_hook_is_consulted() {
        struct Tampered;
        impl IntegrityHook for Tampered {
            fn check_integrity(&mut self) -> bool {
                false
            }
        }
        let mut f = Function::new("f");
        let check = f.add_expr(Expr::Call {
            callee: Callee::Builtin(Builtin::CheckIntegrity),
            args: vec![],
        });
        f.entry = f.add_block(Block::new(vec![], Terminator::Return(Some(check))));
        let mut m = Module::new("m");
        m.functions.push(f);
        assert_eq!(Runtime::new(&m).call("f", vec![]).unwrap(), Ok(Value::Bool(true)));
        let mut rt = Runtime::new(&m).with_hook(Tampered);
        assert_eq!(rt.call("f", vec![]).unwrap(), Ok(Value::Bool(false)));
    }

    #[test]
    fn test_unbounded_recursion_hits_depth_limit() {
        // return f() + 1
        let mut f = Function::new("f");
        let call = f.add_expr(Expr::Call {
            callee: Callee::Function(FunctionId(0)),
            args: vec![],
        });
        let one = f.int(1);
        let sum = f.binary(BinOp::Add, call, one);
        f.entry = f.add_block(Block::new(vec![], Terminator::Return(Some(sum))));
        let mut m = Module::new("m");
        m.functions.push(f);
        let err = Runtime::new(&m).call("f", vec![]).unwrap_err();
        assert_eq!(err, RuntimeError::DepthLimit(MAX_CALL_DEPTH));
    }

    /// `countdown(n) = if n == 0 { return 0 } return countdown(n - 1)`
    fn countdown(handled: bool) -> Module {
        let mut f = Function::new("countdown");
        let n = f.add_param("n");
        let ne = f.local(n);
        let zero = f.int(0);
        let done = f.binary(BinOp::Eq, ne, zero);
        let ne = f.local(n);
        let one = f.int(1);
        let next = f.binary(BinOp::Sub, ne, one);
        let call = f.add_expr(Expr::Call {
            callee: Callee::Function(FunctionId(0)),
            args: vec![next],
        });
        let zero = f.int(0);
        let base = f.add_block(Block::new(vec![], Terminator::Return(Some(zero))));
        let mut step = Block::new(vec![], Terminator::Return(Some(call)));
        if handled {
            step.handlers.push(Handler {
                tag: ExceptionTag(5),
                target: base,
                bind: None,
            });
        }
        let step = f.add_block(step);
        f.entry = f.add_block(Block::new(
            vec![],
            Terminator::Branch {
                cond: done,
                then_block: base,
                else_block: step,
            },
        ));
        let mut m = Module::new("m");
        m.functions.push(f);
        m
    }

    #[test]
    fn test_tail_calls_do_not_grow_depth() {
        let m = countdown(false);
        let deep = Value::Int(MAX_CALL_DEPTH as i64 * 8);
        assert_eq!(Runtime::new(&m).call("countdown", vec![deep]).unwrap(), Ok(Value::Int(0)));
    }

    #[test]
    fn test_calls_under_a_handler_keep_their_frame() {
        let m = countdown(true);
        let deep = Value::Int(MAX_CALL_DEPTH as i64 * 8);
        assert_eq!(
            Runtime::new(&m).call("countdown", vec![deep]).unwrap_err(),
            RuntimeError::DepthLimit(MAX_CALL_DEPTH)
        );
        assert_eq!(Runtime::new(&m).call("countdown", vec![Value::Int(10)]).unwrap(), Ok(Value::Int(0)));
    }

    #[test]
    fn test_infinite_loop_hits_step_limit() {
        let mut f = Function::new("f");
        f.entry = f.add_block(Block::new(vec![], Terminator::Jump(BlockId(0))));
        let mut m = Module::new("m");
        m.functions.push(f);
        let err = Runtime::new(&m).with_step_limit(100).call("f", vec![]).unwrap_err();
        assert_eq!(err, RuntimeError::StepLimit(100));
    }

    #[test]
    fn test_arity_checked() {
        let mut f = Function::new("f");
        f.add_param("x");
        f.entry = f.add_block(Block::new(vec![], Terminator::Return(None)));
        let mut m = Module::new("m");
        m.functions.push(f);
        let err = Runtime::new(&m).call("f", vec![]).unwrap_err();
        assert!(matches!(err, RuntimeError::ArityMismatch { expected: 1, got: 0, .. }));
    }
}
