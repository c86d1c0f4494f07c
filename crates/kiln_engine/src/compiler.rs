//! Lowers the AST to bytecode.
//!
//! Scripts and function bodies share one [`Compiler`]; they differ only in
//! what an expression statement does with its value. At script level the
//! value becomes the completion value (`Complete`), inside a function it is
//! discarded (`Pop`).

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{Expr, FunctionDecl, LogicalOp, Stmt};
use crate::bytecode::{Chunk, Constant, FunctionBody, FunctionProto, Op};
use crate::identity::EngineFlags;

/// Compiles a whole script into its top-level chunk.
pub fn compile_script(program: &[Stmt], flags: EngineFlags) -> Chunk {
    let mut compiler = Compiler::new(flags, true);
    compiler.body(program);
    compiler.finish()
}

/// Compiles a function body. The chunk always ends in a `Return`.
pub fn compile_function(body: &[Stmt], flags: EngineFlags) -> Chunk {
    let mut compiler = Compiler::new(flags, false);
    compiler.body(body);
    compiler.emit(Op::Undefined);
    compiler.emit(Op::Return);
    compiler.finish()
}

/// Builds the prototype of a function declaration or expression.
pub fn function_proto(decl: &FunctionDecl, flags: EngineFlags) -> FunctionProto {
    let body = if flags.lazy_compilation {
        FunctionBody::lazy(decl.body_span)
    } else {
        FunctionBody::Eager(Rc::new(compile_function(&decl.body, flags)))
    };
    FunctionProto {
        name: decl.name.clone(),
        params: decl.params.clone(),
        body,
    }
}

/// Bytecode emitter for a single body.
pub struct Compiler {
    chunk: Chunk,
    flags: EngineFlags,
    top_level: bool,
    name_index: HashMap<String, u32>,
}

impl Compiler {
    fn new(flags: EngineFlags, top_level: bool) -> Self {
        Self {
            chunk: Chunk::default(),
            flags,
            top_level,
            name_index: HashMap::new(),
        }
    }

    fn finish(self) -> Chunk {
        self.chunk
    }

    fn emit(&mut self, op: Op) -> usize {
        self.chunk.code.push(op);
        self.chunk.code.len() - 1
    }

    /// Points the jump at `at` to the next instruction.
    fn patch_jump(&mut self, at: usize) {
        let target = self.chunk.code.len() as u32;
        match &mut self.chunk.code[at] {
            Op::Jump(t) | Op::JumpIfFalse(t) | Op::JumpIfFalseOrPop(t) | Op::JumpIfTrueOrPop(t) => {
                *t = target
            }
            _ => unreachable!("patch_jump on a non-jump instruction"),
        }
    }

    fn name(&mut self, name: &str) -> u32 {
        if let Some(&i) = self.name_index.get(name) {
            return i;
        }
        let i = self.chunk.names.len() as u32;
        self.chunk.names.push(name.to_string());
        self.name_index.insert(name.to_string(), i);
        i
    }

    fn constant(&mut self, value: Constant) -> u32 {
        if let Some(i) = self.chunk.constants.iter().position(|c| *c == value) {
            return i as u32;
        }
        self.chunk.constants.push(value);
        (self.chunk.constants.len() - 1) as u32
    }

    fn closure(&mut self, decl: &FunctionDecl) {
        let proto = function_proto(decl, self.flags);
        self.chunk.functions.push(Rc::new(proto));
        let i = (self.chunk.functions.len() - 1) as u32;
        self.emit(Op::Closure(i));
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn body(&mut self, stmts: &[Stmt]) {
        let mut hoisted = Vec::new();
        collect_function_decls(stmts, &mut hoisted);
        for decl in hoisted {
            self.closure(decl);
            if let Some(name) = &decl.name {
                let i = self.name(name);
                self.emit(Op::Declare(i));
            }
        }
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) => {
                self.expr(e);
                self.emit(if self.top_level { Op::Complete } else { Op::Pop });
            }
            Stmt::Declare { name, init } => {
                match init {
                    Some(e) => self.expr(e),
                    None => {
                        self.emit(Op::Undefined);
                    }
                }
                let i = self.name(name);
                self.emit(Op::Declare(i));
            }
            // Hoisted in `body`.
            Stmt::Function(_) => {}
            Stmt::Return(value) => {
                match value {
                    Some(e) => self.expr(e),
                    None => {
                        self.emit(Op::Undefined);
                    }
                }
                self.emit(Op::Return);
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                self.expr(cond);
                let to_else = self.emit(Op::JumpIfFalse(0));
                self.block(then);
                match otherwise {
                    Some(otherwise) => {
                        let to_end = self.emit(Op::Jump(0));
                        self.patch_jump(to_else);
                        self.block(otherwise);
                        self.patch_jump(to_end);
                    }
                    None => self.patch_jump(to_else),
                }
            }
            Stmt::While { cond, body } => {
                let start = self.chunk.code.len() as u32;
                self.expr(cond);
                let to_end = self.emit(Op::JumpIfFalse(0));
                self.block(body);
                self.emit(Op::Jump(start));
                self.patch_jump(to_end);
            }
            Stmt::Block(stmts) => self.block(stmts),
            Stmt::Empty => {}
        }
    }

    fn block(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Number(n) => {
                let i = self.constant(Constant::Number(*n));
                self.emit(Op::Const(i));
            }
            Expr::Str(s) => {
                let i = self.constant(Constant::Str(s.clone()));
                self.emit(Op::Const(i));
            }
            Expr::Bool(true) => {
                self.emit(Op::True);
            }
            Expr::Bool(false) => {
                self.emit(Op::False);
            }
            Expr::Null => {
                self.emit(Op::Null);
            }
            Expr::Undefined => {
                self.emit(Op::Undefined);
            }
            Expr::This => {
                self.emit(Op::This);
            }
            Expr::Ident(name) => {
                let i = self.name(name);
                self.emit(Op::Load(i));
            }
            Expr::Array(items) => {
                for item in items {
                    self.expr(item);
                }
                self.emit(Op::MakeArray(items.len() as u32));
            }
            Expr::Object(entries) => {
                for (key, value) in entries {
                    let i = self.constant(Constant::Str(key.clone()));
                    self.emit(Op::Const(i));
                    self.expr(value);
                }
                self.emit(Op::MakeObject(entries.len() as u32));
            }
            Expr::Function(decl) => self.closure(decl),
            Expr::Unary { op, operand } => {
                if let (crate::ast::UnaryOp::Typeof, Expr::Ident(name)) = (op, operand.as_ref()) {
                    let i = self.name(name);
                    self.emit(Op::TypeofName(i));
                } else {
                    self.expr(operand);
                    self.emit(Op::Unary(*op));
                }
            }
            Expr::Binary { op, left, right } => {
                self.expr(left);
                self.expr(right);
                self.emit(Op::Binary(*op));
            }
            Expr::Logical { op, left, right } => {
                self.expr(left);
                let jump = match op {
                    LogicalOp::And => self.emit(Op::JumpIfFalseOrPop(0)),
                    LogicalOp::Or => self.emit(Op::JumpIfTrueOrPop(0)),
                };
                self.expr(right);
                self.patch_jump(jump);
            }
            Expr::Assign { target, value } => match target.as_ref() {
                Expr::Ident(name) => {
                    self.expr(value);
                    let i = self.name(name);
                    self.emit(Op::Store(i));
                }
                Expr::Member { object, property } => {
                    self.expr(object);
                    self.expr(value);
                    let i = self.name(property);
                    self.emit(Op::SetMember(i));
                }
                Expr::Index { object, index } => {
                    self.expr(object);
                    self.expr(index);
                    self.expr(value);
                    self.emit(Op::SetIndex);
                }
                _ => unreachable!("parser only accepts assignable targets"),
            },
            Expr::Member { object, property } => {
                self.expr(object);
                let i = self.name(property);
                self.emit(Op::GetMember(i));
            }
            Expr::Index { object, index } => {
                self.expr(object);
                self.expr(index);
                self.emit(Op::GetIndex);
            }
            Expr::Call { callee, args } => {
                let argc = args.len() as u32;
                match callee.as_ref() {
                    Expr::Member { object, property } => {
                        self.expr(object);
                        self.emit(Op::Dup);
                        let i = self.name(property);
                        self.emit(Op::GetMember(i));
                        self.args(args);
                        self.emit(Op::CallMethod(argc));
                    }
                    Expr::Index { object, index } => {
                        self.expr(object);
                        self.emit(Op::Dup);
                        self.expr(index);
                        self.emit(Op::GetIndex);
                        self.args(args);
                        self.emit(Op::CallMethod(argc));
                    }
                    _ => {
                        self.expr(callee);
                        self.args(args);
                        self.emit(Op::Call(argc));
                    }
                }
            }
        }
    }

    fn args(&mut self, args: &[Expr]) {
        for arg in args {
            self.expr(arg);
        }
    }
}

/// Collects named function declarations of a body, descending into blocks
/// but not into nested functions.
fn collect_function_decls<'a>(stmts: &'a [Stmt], out: &mut Vec<&'a FunctionDecl>) {
    for stmt in stmts {
        match stmt {
            Stmt::Function(decl) => out.push(decl),
            Stmt::If {
                then, otherwise, ..
            } => {
                collect_function_decls(then, out);
                if let Some(otherwise) = otherwise {
                    collect_function_decls(otherwise, out);
                }
            }
            Stmt::While { body, .. } | Stmt::Block(body) => collect_function_decls(body, out),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn compile(src: &str, flags: EngineFlags) -> Chunk {
        compile_script(&parse_program(src).unwrap(), flags)
    }

    #[test]
    fn script_statements_complete() {
        let chunk = compile("43;", EngineFlags::code_cache());
        assert_eq!(chunk.code, vec![Op::Const(0), Op::Complete]);
        assert_eq!(chunk.constants, vec![Constant::Number(43.0)]);
    }

    #[test]
    fn function_statements_pop_and_return() {
        let chunk = compile_function(&parse_program("1;").unwrap(), EngineFlags::code_cache());
        assert_eq!(
            chunk.code,
            vec![Op::Const(0), Op::Pop, Op::Undefined, Op::Return]
        );
    }

    #[test]
    fn declarations_are_hoisted() {
        let chunk = compile("f();\nfunction f() {}", EngineFlags::code_cache());
        assert_eq!(chunk.code[0], Op::Closure(0));
        assert_eq!(chunk.code[1], Op::Declare(0));
        assert_eq!(chunk.names[0], "f");
    }

    #[test]
    fn lazy_flag_defers_bodies() {
        let src = "let f = function () { return 1; };";
        let eager = compile(src, EngineFlags::code_cache());
        assert!(matches!(eager.functions[0].body, FunctionBody::Eager(_)));

        let lazy = compile(src, EngineFlags::default());
        match lazy.functions[0].body {
            FunctionBody::Lazy { start, end } => {
                assert_eq!(&src[start as usize..end as usize], "{ return 1; }");
            }
            ref other => panic!("expected lazy body, got {other:?}"),
        }
    }

    #[test]
    fn names_and_constants_are_interned() {
        let chunk = compile("a; a; 'x'; 'x';", EngineFlags::code_cache());
        assert_eq!(chunk.names, vec!["a"]);
        assert_eq!(chunk.constants.len(), 1);
    }

    #[test]
    fn if_else_jumps_are_patched() {
        let chunk = compile("if (a) 1; else 2;", EngineFlags::code_cache());
        // Load a, JumpIfFalse, Const, Complete, Jump, Const, Complete
        assert_eq!(chunk.code[1], Op::JumpIfFalse(5));
        assert_eq!(chunk.code[4], Op::Jump(7));
        assert_eq!(chunk.code.len(), 7);
    }

    #[test]
    fn method_calls_keep_the_receiver() {
        let chunk = compile("console.log(1);", EngineFlags::code_cache());
        assert_eq!(
            chunk.code,
            vec![
                Op::Load(0),
                Op::Dup,
                Op::GetMember(1),
                Op::Const(0),
                Op::CallMethod(1),
                Op::Complete,
            ]
        );
    }

    #[test]
    fn self_contained_only_without_lazy_bodies() {
        let src = "function outer() { return function () {}; }";
        let eager = FunctionProto {
            name: None,
            params: vec![],
            body: FunctionBody::Eager(Rc::new(compile(src, EngineFlags::code_cache()))),
        };
        assert!(eager.is_self_contained());
        let lazy = FunctionProto {
            name: None,
            params: vec![],
            body: FunctionBody::Eager(Rc::new(compile(src, EngineFlags::default()))),
        };
        assert!(!lazy.is_self_contained());
    }
}
