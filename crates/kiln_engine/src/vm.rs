//! The interpreter loop.

use std::cell::Cell;
use std::rc::Rc;

use tracing::trace;

use crate::ast::{BinaryOp, UnaryOp};
use crate::bytecode::{Chunk, Constant, FunctionBody, Op};
use crate::compiler::compile_function;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::parser::parse_function_body;
use crate::token::Span;
use crate::value::{Closure, Function, Object, Scope, Value};

/// Maximum nesting of script function calls.
pub(crate) const MAX_CALL_DEPTH: usize = 256;

/// Maximum nesting of native functions calling back into script code. Script
/// to script calls share one loop; only these hold native stack frames.
pub(crate) const MAX_REENTRY_DEPTH: usize = 32;

/// One activation of a chunk. Script calls push frames onto a heap stack
/// instead of recursing.
struct Frame {
    chunk: Rc<Chunk>,
    scope: Rc<Scope>,
    this: Value,
    source: Rc<str>,
    ip: usize,
    /// Operand stack height when the frame was entered.
    base: usize,
    completion: Value,
}

impl Frame {
    fn new(chunk: Rc<Chunk>, scope: Rc<Scope>, this: Value, source: Rc<str>) -> Self {
        Self {
            chunk,
            scope,
            this,
            source,
            ip: 0,
            base: 0,
            completion: Value::Undefined,
        }
    }
}

/// What a single instruction asks the loop to do next.
enum Flow {
    Continue,
    Enter(Frame),
    Return(Value),
}

/// The outcome of starting a call.
enum Entered {
    Done(Value),
    Frame(Frame),
}

/// Runs `chunk` to completion and returns its completion or return value.
pub(crate) fn execute(
    engine: &Engine,
    chunk: Rc<Chunk>,
    scope: Rc<Scope>,
    this: Value,
    source: Rc<str>,
) -> Result<Value, EngineError> {
    let _restore = Restore::new(&engine.depth);
    run(engine, Frame::new(chunk, scope, this, source))
}

/// Calls `callee` with receiver `this`.
pub(crate) fn call(
    engine: &Engine,
    callee: &Value,
    this: Value,
    args: &[Value],
) -> Result<Value, EngineError> {
    let _restore = Restore::new(&engine.depth);
    match enter(engine, callee, this, args.to_vec())? {
        Entered::Done(value) => Ok(value),
        Entered::Frame(frame) => run(engine, frame),
    }
}

/// Starts a call. Natives run to completion here; closures come back as a
/// frame for the loop to push.
fn enter(
    engine: &Engine,
    callee: &Value,
    this: Value,
    args: Vec<Value>,
) -> Result<Entered, EngineError> {
    let Value::Function(function) = callee else {
        return Err(EngineError::Type(format!(
            "{} is not a function",
            callee.to_display_string()
        )));
    };
    match function.as_ref() {
        Function::Native { func, .. } => func(engine, this, &args).map(Entered::Done),
        Function::Closure(closure) => {
            if engine.depth.get() >= MAX_CALL_DEPTH {
                return Err(EngineError::StackOverflow);
            }
            let chunk = closure_chunk(engine, closure)?;
            let scope = Scope::child(&closure.env);
            let mut args = args.into_iter();
            for param in &closure.proto.params {
                scope.declare(param, args.next().unwrap_or_default());
            }
            engine.depth.set(engine.depth.get() + 1);
            Ok(Entered::Frame(Frame::new(
                chunk,
                scope,
                this,
                Rc::clone(&closure.source),
            )))
        }
    }
}

/// The interpreter loop. Returns when `frame`, the bottom frame, returns.
fn run(engine: &Engine, mut frame: Frame) -> Result<Value, EngineError> {
    let _reentry = DepthGuard::enter(&engine.reentry, MAX_REENTRY_DEPTH)?;
    let mut callers: Vec<Frame> = Vec::new();
    let mut stack: Vec<Value> = Vec::with_capacity(16);

    loop {
        let flow = match frame.chunk.code.get(frame.ip).copied() {
            Some(op) => {
                frame.ip += 1;
                step(engine, &mut frame, &mut stack, op)?
            }
            None => Flow::Return(std::mem::take(&mut frame.completion)),
        };
        match flow {
            Flow::Continue => {}
            Flow::Enter(callee) => callers.push(std::mem::replace(&mut frame, callee)),
            Flow::Return(value) => {
                stack.truncate(frame.base);
                let Some(caller) = callers.pop() else {
                    return Ok(value);
                };
                frame = caller;
                engine.depth.set(engine.depth.get().saturating_sub(1));
                stack.push(value);
            }
        }
    }
}

/// Executes one instruction of `frame`.
fn step(
    engine: &Engine,
    frame: &mut Frame,
    stack: &mut Vec<Value>,
    op: Op,
) -> Result<Flow, EngineError> {
    match op {
        Op::Const(i) => stack.push(constant(&frame.chunk, i)?),
        Op::Undefined => stack.push(Value::Undefined),
        Op::Null => stack.push(Value::Null),
        Op::True => stack.push(Value::Bool(true)),
        Op::False => stack.push(Value::Bool(false)),
        Op::This => stack.push(frame.this.clone()),
        Op::Pop => {
            pop(stack)?;
        }
        Op::Dup => {
            let top = peek(stack)?.clone();
            stack.push(top);
        }
        Op::Load(i) => {
            let name = name(&frame.chunk, i)?;
            let value = frame
                .scope
                .lookup(name)
                .ok_or_else(|| EngineError::Reference(name.to_string()))?;
            stack.push(value);
        }
        Op::Store(i) => {
            let value = peek(stack)?.clone();
            frame.scope.assign(name(&frame.chunk, i)?, value);
        }
        Op::Declare(i) => {
            let value = pop(stack)?;
            frame.scope.declare(name(&frame.chunk, i)?, value);
        }
        Op::TypeofName(i) => {
            let ty = frame
                .scope
                .lookup(name(&frame.chunk, i)?)
                .map_or("undefined", |v| v.type_of());
            stack.push(Value::string(ty));
        }
        Op::GetMember(i) => {
            let object = pop(stack)?;
            stack.push(get_member(engine, &object, name(&frame.chunk, i)?)?);
        }
        Op::SetMember(i) => {
            let value = pop(stack)?;
            let object = pop(stack)?;
            set_member(&object, name(&frame.chunk, i)?, value.clone())?;
            stack.push(value);
        }
        Op::GetIndex => {
            let key = pop(stack)?;
            let object = pop(stack)?;
            stack.push(get_index(engine, &object, &key)?);
        }
        Op::SetIndex => {
            let value = pop(stack)?;
            let key = pop(stack)?;
            let object = pop(stack)?;
            set_index(&object, &key, value.clone())?;
            stack.push(value);
        }
        Op::MakeArray(n) => {
            let items = pop_n(stack, n as usize)?;
            stack.push(Value::array(items));
        }
        Op::MakeObject(n) => {
            let flat = pop_n(stack, 2 * n as usize)?;
            let mut object = Object::new();
            for pair in flat.chunks_exact(2) {
                object.set(pair[0].to_display_string(), pair[1].clone());
            }
            stack.push(Value::object(object));
        }
        Op::Closure(i) => {
            let proto = frame
                .chunk
                .functions
                .get(i as usize)
                .ok_or_else(|| invalid(format!("function index {i} out of range")))?;
            stack.push(Value::Function(Rc::new(Function::Closure(Closure {
                proto: Rc::clone(proto),
                env: Rc::clone(&frame.scope),
                source: Rc::clone(&frame.source),
                compiled: Default::default(),
            }))));
        }
        Op::Call(n) => {
            let args = pop_n(stack, n as usize)?;
            let callee = pop(stack)?;
            return invoke(engine, &callee, Value::Undefined, args, stack);
        }
        Op::CallMethod(n) => {
            let args = pop_n(stack, n as usize)?;
            let callee = pop(stack)?;
            let receiver = pop(stack)?;
            return invoke(engine, &callee, receiver, args, stack);
        }
        Op::Unary(op) => {
            let operand = pop(stack)?;
            stack.push(unary(op, &operand));
        }
        Op::Binary(op) => {
            let right = pop(stack)?;
            let left = pop(stack)?;
            stack.push(binary(op, &left, &right));
        }
        Op::Jump(target) => frame.ip = target as usize,
        Op::JumpIfFalse(target) => {
            if !pop(stack)?.is_truthy() {
                frame.ip = target as usize;
            }
        }
        Op::JumpIfFalseOrPop(target) => {
            if peek(stack)?.is_truthy() {
                pop(stack)?;
            } else {
                frame.ip = target as usize;
            }
        }
        Op::JumpIfTrueOrPop(target) => {
            if peek(stack)?.is_truthy() {
                frame.ip = target as usize;
            } else {
                pop(stack)?;
            }
        }
        Op::Complete => frame.completion = pop(stack)?,
        Op::Return => return Ok(Flow::Return(pop(stack)?)),
    }
    Ok(Flow::Continue)
}

fn invoke(
    engine: &Engine,
    callee: &Value,
    this: Value,
    args: Vec<Value>,
    stack: &mut Vec<Value>,
) -> Result<Flow, EngineError> {
    match enter(engine, callee, this, args)? {
        Entered::Done(value) => {
            stack.push(value);
            Ok(Flow::Continue)
        }
        Entered::Frame(mut frame) => {
            frame.base = stack.len();
            Ok(Flow::Enter(frame))
        }
    }
}

/// Returns the compiled body of a closure, compiling a deferred body from
/// the closure's source on demand.
fn closure_chunk(engine: &Engine, closure: &Closure) -> Result<Rc<Chunk>, EngineError> {
    let (start, end) = match &closure.proto.body {
        FunctionBody::Eager(chunk) => return Ok(Rc::clone(chunk)),
        FunctionBody::Lazy { start, end } => (*start, *end),
    };
    if let Some(chunk) = closure.compiled.borrow().as_ref() {
        return Ok(Rc::clone(chunk));
    }

    let unavailable = || EngineError::SourceUnavailable {
        name: closure.proto.display_name().to_string(),
    };
    if closure.source.get(start as usize..end as usize).is_none() {
        return Err(unavailable());
    }
    // The whole script parsed before, so a failure here means the source
    // no longer holds this function.
    let body =
        parse_function_body(&closure.source, Span::new(start, end)).map_err(|_| unavailable())?;
    let chunk = Rc::new(compile_function(&body, engine.flags()));
    trace!(
        function = closure.proto.display_name(),
        "compiled deferred function body"
    );
    if !engine.flags().flush_bytecode {
        *closure.compiled.borrow_mut() = Some(Rc::clone(&chunk));
    }
    Ok(chunk)
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<usize>, limit: usize) -> Result<Self, EngineError> {
        if depth.get() >= limit {
            return Err(EngineError::StackOverflow);
        }
        depth.set(depth.get() + 1);
        Ok(Self(depth))
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// Puts a counter back to its value at creation, covering frames an error
/// unwound without returning.
struct Restore<'a> {
    cell: &'a Cell<usize>,
    saved: usize,
}

impl<'a> Restore<'a> {
    fn new(cell: &'a Cell<usize>) -> Self {
        Self {
            cell,
            saved: cell.get(),
        }
    }
}

impl Drop for Restore<'_> {
    fn drop(&mut self) {
        self.cell.set(self.saved);
    }
}

// ============================================================================
// Operand access
// ============================================================================

fn invalid(msg: String) -> EngineError {
    EngineError::InvalidBytecode(msg)
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, EngineError> {
    stack
        .pop()
        .ok_or_else(|| invalid("stack underflow".to_string()))
}

fn peek(stack: &[Value]) -> Result<&Value, EngineError> {
    stack
        .last()
        .ok_or_else(|| invalid("stack underflow".to_string()))
}

fn pop_n(stack: &mut Vec<Value>, n: usize) -> Result<Vec<Value>, EngineError> {
    let at = stack
        .len()
        .checked_sub(n)
        .ok_or_else(|| invalid("stack underflow".to_string()))?;
    Ok(stack.split_off(at))
}

fn name(chunk: &Chunk, i: u32) -> Result<&str, EngineError> {
    chunk
        .names
        .get(i as usize)
        .map(String::as_str)
        .ok_or_else(|| invalid(format!("name index {i} out of range")))
}

fn constant(chunk: &Chunk, i: u32) -> Result<Value, EngineError> {
    match chunk.constants.get(i as usize) {
        Some(Constant::Number(n)) => Ok(Value::Number(*n)),
        Some(Constant::Str(s)) => Ok(Value::string(s)),
        None => Err(invalid(format!("constant index {i} out of range"))),
    }
}

// ============================================================================
// Properties
// ============================================================================

fn get_member(engine: &Engine, object: &Value, key: &str) -> Result<Value, EngineError> {
    let value = match object {
        Value::Undefined | Value::Null => {
            return Err(EngineError::Type(format!(
                "Cannot read properties of {} (reading '{key}')",
                object.to_display_string()
            )))
        }
        Value::Object(o) => o.borrow().get(key).cloned().unwrap_or_default(),
        Value::Array(a) => {
            if key == "length" {
                Value::Number(a.borrow().len() as f64)
            } else if let Ok(i) = key.parse::<usize>() {
                a.borrow().get(i).cloned().unwrap_or_default()
            } else {
                engine.array_method(key).unwrap_or_default()
            }
        }
        Value::Str(s) if key == "length" => Value::Number(f64::from(crate::source_length(s))),
        Value::Function(f) if key == "name" => Value::string(f.name().unwrap_or("")),
        _ => Value::Undefined,
    };
    Ok(value)
}

fn set_member(object: &Value, key: &str, value: Value) -> Result<(), EngineError> {
    match object {
        Value::Undefined | Value::Null => Err(EngineError::Type(format!(
            "Cannot set properties of {} (setting '{key}')",
            object.to_display_string()
        ))),
        Value::Object(o) => {
            o.borrow_mut().set(key, value);
            Ok(())
        }
        Value::Array(a) => {
            if let Ok(i) = key.parse::<usize>() {
                let mut a = a.borrow_mut();
                if i >= a.len() {
                    a.resize(i + 1, Value::Undefined);
                }
                a[i] = value;
            }
            Ok(())
        }
        // Primitives and functions silently drop the write.
        _ => Ok(()),
    }
}

fn index_key(key: &Value) -> String {
    key.to_display_string()
}

fn get_index(engine: &Engine, object: &Value, key: &Value) -> Result<Value, EngineError> {
    get_member(engine, object, &index_key(key))
}

fn set_index(object: &Value, key: &Value, value: Value) -> Result<(), EngineError> {
    set_member(object, &index_key(key), value)
}

// ============================================================================
// Operators
// ============================================================================

fn unary(op: UnaryOp, operand: &Value) -> Value {
    match op {
        UnaryOp::Neg => Value::Number(-operand.to_number()),
        UnaryOp::Plus => Value::Number(operand.to_number()),
        UnaryOp::Not => Value::Bool(!operand.is_truthy()),
        UnaryOp::Typeof => Value::string(operand.type_of()),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            if is_numeric(left) && is_numeric(right) {
                Value::Number(left.to_number() + right.to_number())
            } else {
                let mut s = left.to_display_string();
                s.push_str(&right.to_display_string());
                Value::string(s)
            }
        }
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
        BinaryOp::Lt => compare(left, right, |o| o.is_lt()),
        BinaryOp::Le => compare(left, right, |o| o.is_le()),
        BinaryOp::Gt => compare(left, right, |o| o.is_gt()),
        BinaryOp::Ge => compare(left, right, |o| o.is_ge()),
    }
}

fn is_numeric(v: &Value) -> bool {
    matches!(
        v,
        Value::Number(_) | Value::Bool(_) | Value::Null | Value::Undefined
    )
}

fn compare(left: &Value, right: &Value, test: fn(std::cmp::Ordering) -> bool) -> Value {
    let ordering = match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    };
    Value::Bool(ordering.is_some_and(test))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{BuildIdentity, EngineFlags};

    fn engine() -> Engine {
        Engine::with_flags(BuildIdentity::current(), EngineFlags::code_cache())
    }

    fn eval(src: &str) -> Value {
        engine().eval(src).unwrap()
    }

    #[test]
    fn arithmetic_and_concatenation() {
        assert_eq!(eval("1 + 2 * 3").as_number(), Some(7.0));
        assert_eq!(eval("'a' + 1").as_str(), Some("a1"));
        assert_eq!(eval("7 % 4").as_number(), Some(3.0));
        assert_eq!(eval("typeof nope").as_str(), Some("undefined"));
    }

    #[test]
    fn completion_value_is_last_expression() {
        assert_eq!(eval("let x = 1\nx + 1\nx + 42").as_number(), Some(43.0));
        assert!(eval("let y = 1").is_undefined());
        assert_eq!(eval("if (true) { 5 }").as_number(), Some(5.0));
    }

    #[test]
    fn closures_capture_scope() {
        let src = "
            function counter() {
                let n = 0
                return function () { n = n + 1; return n; }
            }
            let c = counter()
            c(); c(); c()
        ";
        assert_eq!(eval(src).as_number(), Some(3.0));
    }

    #[test]
    fn while_loop_and_logical_operators() {
        let src = "let i = 0; let s = 0; while (i < 5) { s = s + i; i = i + 1 } s";
        assert_eq!(eval(src).as_number(), Some(10.0));
        assert_eq!(eval("0 || 'fallback'").as_str(), Some("fallback"));
        assert_eq!(eval("1 && 2").as_number(), Some(2.0));
        assert_eq!(eval("null && boom()").to_display_string(), "null");
    }

    #[test]
    fn objects_arrays_and_methods() {
        let src = "
            let o = { items: [] }
            o.items.push(1, 2)
            o.items[3] = 4
            o['k'] = o.items.length
            o.items.join('-') + ':' + o.k
        ";
        assert_eq!(eval(src).as_str(), Some("1-2--4:4"));
    }

    #[test]
    fn this_is_bound_for_method_calls() {
        let src = "let o = { v: 41, get: function () { return this.v + 1; } }\no.get()";
        assert_eq!(eval(src).as_number(), Some(42.0));
    }

    #[test]
    fn unknown_name_is_a_reference_error() {
        let err = engine().eval("missing + 1").unwrap_err();
        assert_eq!(err, EngineError::Reference("missing".to_string()));
    }

    #[test]
    fn sloppy_assignment_creates_global() {
        let engine = engine();
        engine.eval("function f() { leaked = 7 }\nf()").unwrap();
        assert_eq!(engine.eval("leaked").unwrap().as_number(), Some(7.0));
    }

    #[test]
    fn calling_a_non_function_is_a_type_error() {
        let err = engine().eval("let x = 1; x()").unwrap_err();
        assert!(matches!(err, EngineError::Type(_)));
        let err = engine().eval("undefined.x").unwrap_err();
        assert!(err.to_string().contains("Cannot read properties of undefined"));
    }

    #[test]
    fn deep_recursion_overflows() {
        let engine = engine();
        let err = engine
            .eval("function f(n) { return f(n + 1); }\nf(0)")
            .unwrap_err();
        assert_eq!(err, EngineError::StackOverflow);
        assert_eq!(engine.depth.get(), 0);
        assert_eq!(engine.reentry.get(), 0);
        assert_eq!(engine.eval("1 + 1").unwrap().as_number(), Some(2.0));
    }

    #[test]
    fn recursion_below_the_limit_completes() {
        let src = "function sum(n) { if (n === 0) { return 0; } return n + sum(n - 1); }\nsum(250)";
        assert_eq!(eval(src).as_number(), Some(31375.0));
    }

    #[test]
    fn returning_calls_release_depth() {
        let src = "
            function id(x) { return x; }
            let i = 0
            while (i < 1000) { id(i); i = i + 1 }
            id(i)
        ";
        assert_eq!(eval(src).as_number(), Some(1000.0));
    }

    #[test]
    fn native_callbacks_into_script_are_bounded() {
        let engine = engine();
        engine.set_global(
            "again",
            Value::native("again", |engine, _this, args| {
                let f = args.first().cloned().unwrap_or_default();
                engine.call(&f, Value::Undefined, &[f.clone()])
            }),
        );
        let err = engine
            .eval("function f(g) { return again(g); }\nf(f)")
            .unwrap_err();
        assert_eq!(err, EngineError::StackOverflow);
        assert_eq!(engine.reentry.get(), 0);
        assert_eq!(engine.depth.get(), 0);
    }

    #[test]
    fn lazy_bodies_compile_on_first_call() {
        let engine = Engine::with_flags(
            BuildIdentity::current(),
            EngineFlags {
                lazy_compilation: true,
                flush_bytecode: false,
            },
        );
        let v = engine
            .eval("function add(a, b) { return a + b; }\nadd(40, 3)")
            .unwrap();
        assert_eq!(v.as_number(), Some(43.0));
    }

    #[test]
    fn corrupt_bytecode_is_an_error_not_a_panic() {
        let chunk = Chunk {
            code: vec![Op::Pop],
            ..Chunk::default()
        };
        let engine = engine();
        let err = execute(
            &engine,
            Rc::new(chunk),
            engine.global_scope(),
            Value::Undefined,
            Rc::from(""),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidBytecode(_)));
    }
}
