//! Sample programs and strategies shared by the integration tests.
#![allow(dead_code)]

use hos_core::ir::{
    BinOp, Block, Builtin, Callee, Expr, ExprId, Function, FunctionId, Handler, Literal, Module,
    Stmt, Terminator, UnOp,
};
use hos_core::strategy::{Feature, Mode, Strategy, StrengthLevel};
use hos_core::value::ExceptionTag;
use hos_core::Value;

const ABS_DOUBLE: u32 = 0;
const MIX: u32 = 2;

fn exported(name: &str) -> Function {
    let mut f = Function::new(name);
    f.exported = true;
    f
}

fn call(f: &mut Function, callee: Callee, args: Vec<ExprId>) -> ExprId {
    f.add_expr(Expr::Call { callee, args })
}

fn print(f: &mut Function, value: ExprId) -> Stmt {
    Stmt::Eval(call(f, Callee::Builtin(Builtin::Print), vec![value]))
}

/// `f(x) = if x > 0 { x * 2 } else { -x }`
pub fn abs_double() -> Function {
    let mut f = exported("abs_double");
    let x = f.add_param("x");
    let xe = f.local(x);
    let zero = f.int(0);
    let cond = f.binary(BinOp::Gt, xe, zero);
    let xe = f.local(x);
    let two = f.int(2);
    let double = f.binary(BinOp::Mul, xe, two);
    let xe = f.local(x);
    let neg = f.unary(UnOp::Neg, xe);
    let then_b = f.add_block(Block::new(vec![], Terminator::Return(Some(double))));
    let else_b = f.add_block(Block::new(vec![], Terminator::Return(Some(neg))));
    f.entry = f.add_block(Block::new(
        vec![],
        Terminator::Branch {
            cond,
            then_block: then_b,
            else_block: else_b,
        },
    ));
    f
}

/// Loop with a back-edge: `acc += i * 3 - 1` for `i in 0..n`, then prints `acc`.
fn sum_to() -> Function {
    let mut f = exported("sum_to");
    let n = f.add_param("n");
    let acc = f.add_local("acc");
    let i = f.add_local("i");
    let zero_acc = f.int(0);
    let zero_i = f.int(0);

    let ie = f.local(i);
    let ne = f.local(n);
    let cond = f.binary(BinOp::Lt, ie, ne);

    let acc_e = f.local(acc);
    let ie = f.local(i);
    let three = f.int(3);
    let scaled = f.binary(BinOp::Mul, ie, three);
    let sum = f.binary(BinOp::Add, acc_e, scaled);
    let one = f.int(1);
    let next_acc = f.binary(BinOp::Sub, sum, one);
    let ie = f.local(i);
    let one = f.int(1);
    let next_i = f.binary(BinOp::Add, ie, one);

    let acc_e = f.local(acc);
    let shown = print(&mut f, acc_e);
    let result = f.local(acc);

    let exit = f.add_block(Block::new(vec![shown], Terminator::Return(Some(result))));
    let header = f.add_block(Block::new(vec![], Terminator::Return(None)));
    let body = f.add_block(Block::new(
        vec![
            Stmt::Assign {
                local: acc,
                value: next_acc,
            },
            Stmt::Assign {
                local: i,
                value: next_i,
            },
        ],
        Terminator::Jump(header),
    ));
    f.block_mut(header).term = Terminator::Branch {
        cond,
        then_block: body,
        else_block: exit,
    };
    f.entry = f.add_block(Block::new(
        vec![
            Stmt::Assign {
                local: acc,
                value: zero_acc,
            },
            Stmt::Assign {
                local: i,
                value: zero_i,
            },
        ],
        Terminator::Jump(header),
    ));
    f
}

/// Non-exported helper: `mix(y) = y * y - 7`.
fn mix() -> Function {
    let mut f = Function::new("mix");
    let y = f.add_param("y");
    let a = f.local(y);
    let b = f.local(y);
    let sq = f.binary(BinOp::Mul, a, b);
    let seven = f.int(7);
    let r = f.binary(BinOp::Sub, sq, seven);
    f.entry = f.add_block(Block::new(vec![], Terminator::Return(Some(r))));
    f
}

/// `calls(x) = max(mix(x), mix(x + 1)) + abs(x) + abs_double(x)`
fn calls() -> Function {
    let mut f = exported("calls");
    let x = f.add_param("x");
    let xe = f.local(x);
    let m1 = call(&mut f, Callee::Function(FunctionId(MIX)), vec![xe]);
    let xe = f.local(x);
    let one = f.int(1);
    let succ = f.binary(BinOp::Add, xe, one);
    let m2 = call(&mut f, Callee::Function(FunctionId(MIX)), vec![succ]);
    let max = call(&mut f, Callee::Builtin(Builtin::Max), vec![m1, m2]);
    let xe = f.local(x);
    let abs = call(&mut f, Callee::Builtin(Builtin::Abs), vec![xe]);
    let xe = f.local(x);
    let ad = call(&mut f, Callee::Function(FunctionId(ABS_DOUBLE)), vec![xe]);
    let partial = f.binary(BinOp::Add, max, abs);
    let total = f.binary(BinOp::Add, partial, ad);
    f.entry = f.add_block(Block::new(vec![], Terminator::Return(Some(total))));
    f
}

/// `100 / a`, catching division by zero; `a == 13` raises an uncaught tag 77.
fn safe_div() -> Function {
    let mut f = exported("safe_div");
    let a = f.add_param("a");
    let e = f.add_local("e");
    let r = f.add_local("r");

    let ae = f.local(a);
    let thirteen = f.int(13);
    let unlucky = f.binary(BinOp::Eq, ae, thirteen);
    let payload = f.local(a);
    let hundred = f.int(100);
    let ae = f.local(a);
    let quotient = f.binary(BinOp::Div, hundred, ae);
    let re = f.local(r);
    let ee = f.local(e);
    let shown = print(&mut f, ee);
    let minus_one = f.int(-1);

    let caught = f.add_block(Block::new(vec![shown], Terminator::Return(Some(minus_one))));
    let raise = f.add_block(Block::new(
        vec![],
        Terminator::Raise {
            tag: ExceptionTag(77),
            payload,
        },
    ));
    let mut attempt = Block::new(
        vec![Stmt::Assign {
            local: r,
            value: quotient,
        }],
        Terminator::Return(Some(re)),
    );
    attempt.handlers.push(Handler {
        tag: ExceptionTag::DIVISION_BY_ZERO,
        target: caught,
        bind: Some(e),
    });
    let attempt = f.add_block(attempt);
    f.entry = f.add_block(Block::new(
        vec![],
        Terminator::Branch {
            cond: unlucky,
            then_block: raise,
            else_block: attempt,
        },
    ));
    f
}

/// Strings (including empty and control characters) and float arithmetic.
fn greet() -> Function {
    let mut f = exported("greet");
    let x = f.add_param("x");
    let mut stmts = Vec::new();
    for s in ["hello, world", "", "nul\0tab\t"] {
        let lit = f.lit(Literal::Str(s.into()));
        stmts.push(print(&mut f, lit));
    }
    let xe = f.local(x);
    stmts.push(print(&mut f, xe));
    let a = f.lit(Literal::Float(2.5));
    let b = f.lit(Literal::Float(-4.0));
    let product = f.binary(BinOp::Mul, a, b);
    stmts.push(print(&mut f, product));
    let done = f.lit(Literal::Str("done".into()));
    f.entry = f.add_block(Block::new(stmts, Terminator::Return(Some(done))));
    f
}

/// Dispatch on `x % 4` through a switch.
fn classify() -> Function {
    let mut f = exported("classify");
    let x = f.add_param("x");
    let k = f.add_local("k");
    let xe = f.local(x);
    let four = f.int(4);
    let rem = f.binary(BinOp::Rem, xe, four);
    let scrutinee = f.local(k);

    let hundred = f.int(100);
    let odd = f.lit(Literal::Str("odd".into()));
    let half = f.lit(Literal::Float(0.5));
    let no = f.lit(Literal::Bool(false));
    let b0 = f.add_block(Block::new(vec![], Terminator::Return(Some(hundred))));
    let b1 = f.add_block(Block::new(vec![], Terminator::Return(Some(odd))));
    let b2 = f.add_block(Block::new(vec![], Terminator::Return(Some(half))));
    let bd = f.add_block(Block::new(vec![], Terminator::Return(Some(no))));
    f.entry = f.add_block(Block::new(
        vec![Stmt::Assign { local: k, value: rem }],
        Terminator::Switch {
            scrutinee,
            cases: vec![(0, b0), (1, b1), (-1, b1), (2, b2)],
            default: bd,
        },
    ));
    f
}

/// Returns a non-scalar constant, which no data transform touches.
fn pair() -> Function {
    let mut f = exported("pair");
    let t = f.lit(Literal::Tuple(vec![Literal::Int(1), Literal::Str("two".into())]));
    f.entry = f.add_block(Block::new(vec![], Terminator::Return(Some(t))));
    f
}

/// A module exercising loops, calls, handlers, strings, floats and switches.
pub fn sample_module(name: &str) -> Module {
    let mut m = Module::new(name);
    m.functions = vec![
        abs_double(),
        sum_to(),
        mix(),
        calls(),
        safe_div(),
        greet(),
        classify(),
        pair(),
    ];
    m
}

/// Exported entry points and the arguments to call them with for input `x`.
pub fn invocations(x: i64) -> Vec<(&'static str, Vec<Value>)> {
    vec![
        ("abs_double", vec![Value::Int(x)]),
        ("sum_to", vec![Value::Int(x % 30)]),
        ("calls", vec![Value::Int(x)]),
        ("safe_div", vec![Value::Int(x)]),
        ("greet", vec![Value::Int(x)]),
        ("classify", vec![Value::Int(x)]),
        ("pair", vec![]),
    ]
}

fn single(feature: Feature, intensity: f64) -> Strategy {
    Strategy::with_features([(feature, intensity)]).expect("valid strategy")
}

/// Labelled strategies covering every feature alone and in combination.
pub fn strategies() -> Vec<(String, Strategy)> {
    let features = [
        Feature::ConstantSplitting,
        Feature::DynamicCalculation,
        Feature::EncodingTable,
        Feature::StringEncryption,
        Feature::Flattening,
        Feature::FakeBranches,
        Feature::ExceptionFlow,
        Feature::LoopTransform,
        Feature::InstructionSubstitution,
        Feature::GarbageInjection,
        Feature::Renaming,
        Feature::FunctionSplitting,
        Feature::FunctionMerging,
        Feature::CallGraphObfuscation,
        Feature::BytecodeVm,
        Feature::IntegrityChecks,
    ];
    let mut out: Vec<(String, Strategy)> = features
        .iter()
        .map(|f| (f.to_string(), single(*f, 1.0)))
        .collect();
    out.push((
        "everything at 0.5".into(),
        Strategy::with_features(features.iter().map(|f| (*f, 0.5))).expect("valid strategy"),
    ));
    out.push((
        "flattening + exception flow + vm".into(),
        Strategy::with_features([
            (Feature::Flattening, 0.8),
            (Feature::ExceptionFlow, 0.6),
            (Feature::BytecodeVm, 1.0),
        ])
        .expect("valid strategy"),
    ));
    out.push((
        "structure + loops + flattening + vm".into(),
        Strategy::with_features([
            (Feature::FunctionSplitting, 1.0),
            (Feature::FunctionMerging, 1.0),
            (Feature::CallGraphObfuscation, 1.0),
            (Feature::LoopTransform, 1.0),
            (Feature::Flattening, 0.7),
            (Feature::BytecodeVm, 1.0),
        ])
        .expect("valid strategy"),
    ));
    out.push((
        "numeric data + vm".into(),
        Strategy::with_features([
            (Feature::ConstantSplitting, 1.0),
            (Feature::DynamicCalculation, 0.5),
            (Feature::BytecodeVm, 1.0),
        ])
        .expect("valid strategy"),
    ));
    for (mode, level) in [
        (Mode::Balanced, StrengthLevel::Medium),
        (Mode::Security, StrengthLevel::High),
        (Mode::Performance, StrengthLevel::Low),
    ] {
        out.push((format!("preset {mode}/{level}"), Strategy::preset(mode, level)));
    }
    out
}
