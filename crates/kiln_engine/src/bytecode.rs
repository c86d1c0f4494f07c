//! Serializable bytecode.
//!
//! A [`Chunk`] is the compiled form of one function body (or of a whole
//! script). Chunks and [`FunctionProto`]s derive serde so the cache payload
//! is just the top-level proto run through bincode.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::ast::{BinaryOp, UnaryOp};
use crate::token::Span;

/// A stack machine instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Push `constants[i]`.
    Const(u32),
    /// Push `undefined`.
    Undefined,
    /// Push `null`.
    Null,
    /// Push `true`.
    True,
    /// Push `false`.
    False,
    /// Push the receiver of the current call.
    This,
    /// Discard the top of stack.
    Pop,
    /// Duplicate the top of stack.
    Dup,
    /// Push the value bound to `names[i]`.
    Load(u32),
    /// Assign the top of stack to `names[i]`, leaving it on the stack.
    Store(u32),
    /// Pop a value and bind it to `names[i]` in the current scope.
    Declare(u32),
    /// Push the type name of `names[i]` without failing on unbound names.
    TypeofName(u32),
    /// `[obj] -> [obj.names[i]]`
    GetMember(u32),
    /// `[obj, value] -> [value]`, setting `obj.names[i]`.
    SetMember(u32),
    /// `[obj, key] -> [obj[key]]`
    GetIndex,
    /// `[obj, key, value] -> [value]`, setting `obj[key]`.
    SetIndex,
    /// Pop `n` values into a new array.
    MakeArray(u32),
    /// Pop `n` key/value pairs into a new object.
    MakeObject(u32),
    /// Push a closure over `functions[i]` and the current scope.
    Closure(u32),
    /// `[fn, args..n] -> [result]` with an undefined receiver.
    Call(u32),
    /// `[obj, fn, args..n] -> [result]` with `obj` as receiver.
    CallMethod(u32),
    /// Apply a prefix operator to the top of stack.
    Unary(UnaryOp),
    /// `[a, b] -> [a op b]`
    Binary(BinaryOp),
    /// Jump to an absolute instruction index.
    Jump(u32),
    /// Pop; jump if falsy.
    JumpIfFalse(u32),
    /// Jump if the top is falsy, keeping it; otherwise pop it.
    JumpIfFalseOrPop(u32),
    /// Jump if the top is truthy, keeping it; otherwise pop it.
    JumpIfTrueOrPop(u32),
    /// Pop into the script completion value.
    Complete,
    /// Pop and return from the current function.
    Return,
}

/// A literal stored in a chunk's constant pool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    /// A number.
    Number(f64),
    /// A string.
    Str(String),
}

/// Compiled code for one body.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Instructions.
    pub code: Vec<Op>,
    /// Constant pool.
    pub constants: Vec<Constant>,
    /// Interned names referenced by `Load`, `Store`, member ops, and friends.
    pub names: Vec<String>,
    /// Nested function prototypes referenced by `Closure`.
    pub functions: Vec<Rc<FunctionProto>>,
}

/// A function's static description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionProto {
    /// The function name, if any.
    pub name: Option<String>,
    /// Parameter names.
    pub params: Vec<String>,
    /// The body, compiled or deferred.
    pub body: FunctionBody,
}

impl FunctionProto {
    /// Returns the name used in diagnostics.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    /// Returns `true` if this proto and every nested one is fully compiled.
    pub fn is_self_contained(&self) -> bool {
        match &self.body {
            FunctionBody::Lazy { .. } => false,
            FunctionBody::Eager(chunk) => chunk.functions.iter().all(|f| f.is_self_contained()),
        }
    }
}

/// A function body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FunctionBody {
    /// Compiled up front.
    Eager(Rc<Chunk>),
    /// Compiled on first call from this byte span of the script source.
    Lazy {
        /// Byte offset of the opening brace.
        start: u32,
        /// Byte offset one past the closing brace.
        end: u32,
    },
}

impl FunctionBody {
    /// Creates a deferred body covering `span`.
    pub fn lazy(span: Span) -> Self {
        FunctionBody::Lazy {
            start: span.start,
            end: span.end,
        }
    }
}
