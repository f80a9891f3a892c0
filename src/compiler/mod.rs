// SPDX-License-Identifier: GPL-3.0-or-later

//! Single-pass Pratt compiler: scans and emits bytecode in the same
//! walk, with no intermediate AST. See `SPEC_FULL.md` §4, "Compiler".
//!
//! The VM owns the heap, so every place this module needs to intern a
//! string or allocate a function object takes `vm: &mut Vm` explicitly
//! rather than the `Compiler` holding a reference to it — that keeps
//! `Compiler` down to a single lifetime parameter (the source text's)
//! instead of two, which is what actually made the borrow patterns
//! below tractable to write by hand.

mod rules;

use rules::{Precedence, rule_for};

use crate::chunk::OpCode;
use crate::error::CompileError;
use crate::lexer::{Lexer, Token, TokenKind};
use crate::limits::{MAX_ARGS, MAX_LOCALS, MAX_UPVALUES};
use crate::object::{LoxFunction, ObjData, ObjRef};
use crate::value::Value;
use crate::vm::Vm;

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local<'src> {
    name: &'src str,
    /// `-1` while the initializer expression is still being compiled —
    /// reading the name in that window is a "used before its own
    /// initializer" compile error.
    depth: i32,
    is_captured: bool,
}

struct UpvalueInfo {
    index: u8,
    is_local: bool,
}

struct LoopState {
    scope_depth: i32,
    break_jumps: Vec<usize>,
}

struct FunctionState<'src> {
    function_ref: ObjRef,
    function_type: FunctionType,
    locals: Vec<Local<'src>>,
    scope_depth: i32,
    upvalues: Vec<UpvalueInfo>,
    loops: Vec<LoopState>,
}

impl<'src> FunctionState<'src> {
    fn new(function_ref: ObjRef, function_type: FunctionType) -> Self {
        let slot0_name = match function_type {
            FunctionType::Method | FunctionType::Initializer => "this",
            FunctionType::Function | FunctionType::Script => "",
        };
        FunctionState {
            function_ref,
            function_type,
            locals: vec![Local { name: slot0_name, depth: 0, is_captured: false }],
            scope_depth: 0,
            upvalues: Vec::new(),
            loops: Vec::new(),
        }
    }
}

struct ClassState {
    has_superclass: bool,
}

enum LocalLookup {
    Found(u8),
    Uninitialized,
    NotFound,
}

/// Parser/emitter state. One `Compiler` per top-level `compile` call;
/// nested function and method bodies push a [`FunctionState`] rather
/// than recursing into a new `Compiler`.
pub struct Compiler<'src> {
    lexer: Lexer<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    errors: Vec<CompileError>,
    panic_mode: bool,
    functions: Vec<FunctionState<'src>>,
    classes: Vec<ClassState>,
}

/// Compiles one top-level program into a function object (the implicit
/// "script" function). On failure, returns every diagnostic collected
/// during panic-mode recovery, not just the first.
pub fn compile(vm: &mut Vm, source: &str) -> Result<ObjRef, Vec<CompileError>> {
    let function_ref = vm.alloc(ObjData::Function(LoxFunction {
        arity: 0,
        upvalue_count: 0,
        chunk: crate::chunk::Chunk::new(),
        name: None,
    }));
    vm.push_compiler_root(function_ref);

    let placeholder = Token { kind: TokenKind::Eof, lexeme: "", line: 0 };
    let mut compiler = Compiler {
        lexer: Lexer::new(source),
        previous: placeholder,
        current: placeholder,
        errors: Vec::new(),
        panic_mode: false,
        functions: vec![FunctionState::new(function_ref, FunctionType::Script)],
        classes: Vec::new(),
    };
    compiler.advance(vm);
    while !compiler.match_token(vm, TokenKind::Eof) {
        compiler.declaration(vm);
    }
    compiler.emit_return(vm);

    #[cfg(feature = "print-code")]
    if compiler.errors.is_empty() && vm.should_print_code() {
        let name = vm.function_name(function_ref).unwrap_or("script").to_string();
        tracing::debug!("{}", vm.disassemble(function_ref, &name));
    }

    vm.pop_compiler_root();
    if compiler.errors.is_empty() { Ok(function_ref) } else { Err(compiler.errors) }
}

impl<'src> Compiler<'src> {
    // ---- token stream -----------------------------------------------

    fn advance(&mut self, vm: &mut Vm) {
        self.previous = self.current;
        loop {
            self.current = self.lexer.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.to_string();
            self.error_at_current(vm, &message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, vm: &mut Vm, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance(vm);
        true
    }

    fn consume(&mut self, vm: &mut Vm, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance(vm);
            return;
        }
        self.error_at_current(vm, message);
    }

    fn error_at_current(&mut self, vm: &mut Vm, message: &str) {
        let token = self.current;
        self.error_at(vm, token, message);
    }

    fn error(&mut self, vm: &mut Vm, message: &str) {
        let token = self.previous;
        self.error_at(vm, token, message);
    }

    fn error_at(&mut self, _vm: &mut Vm, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let location = match token.kind {
            TokenKind::Eof => Some("at end".to_string()),
            TokenKind::Error => None,
            _ => Some(format!("at '{}'", token.lexeme)),
        };
        self.errors.push(CompileError { line: token.line, location, message: message.to_string() });
    }

    fn synchronize(&mut self, vm: &mut Vm) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Return
                | TokenKind::Break => return,
                _ => {}
            }
            self.advance(vm);
        }
    }

    // ---- function-context helpers ------------------------------------

    fn current_function(&self) -> &FunctionState<'src> {
        self.functions.last().expect("a Compiler always has at least the top-level script context")
    }

    fn current_function_mut(&mut self) -> &mut FunctionState<'src> {
        self.functions.last_mut().expect("a Compiler always has at least the top-level script context")
    }

    fn chunk_len(&self, vm: &mut Vm) -> usize {
        let function_ref = self.current_function().function_ref;
        vm.function_mut(function_ref).chunk.code.len()
    }

    // ---- bytecode emission --------------------------------------------

    fn emit_byte(&mut self, vm: &mut Vm, byte: u8) {
        let line = self.previous.line;
        let function_ref = self.current_function().function_ref;
        vm.function_mut(function_ref).chunk.write(byte, line);
    }

    fn emit_op(&mut self, vm: &mut Vm, op: OpCode) {
        self.emit_byte(vm, op as u8);
    }

    fn emit_bytes(&mut self, vm: &mut Vm, a: u8, b: u8) {
        self.emit_byte(vm, a);
        self.emit_byte(vm, b);
    }

    fn emit_loop(&mut self, vm: &mut Vm, loop_start: usize) {
        self.emit_op(vm, OpCode::Loop);
        let offset = self.chunk_len(vm) - loop_start + 2;
        if offset > usize::from(u16::MAX) {
            self.error(vm, "Loop body too large.");
        }
        self.emit_byte(vm, ((offset >> 8) & 0xff) as u8);
        self.emit_byte(vm, (offset & 0xff) as u8);
    }

    /// Emits `op` followed by a placeholder 16-bit offset, returning the
    /// index of the placeholder's first byte for [`Self::patch_jump`].
    fn emit_jump(&mut self, vm: &mut Vm, op: OpCode) -> usize {
        self.emit_op(vm, op);
        self.emit_byte(vm, 0xff);
        self.emit_byte(vm, 0xff);
        self.chunk_len(vm) - 2
    }

    fn patch_jump(&mut self, vm: &mut Vm, offset: usize) {
        let code_len = self.chunk_len(vm);
        let jump = code_len - offset - 2;
        if jump > usize::from(u16::MAX) {
            self.error(vm, "Too much code to jump over.");
            return;
        }
        let function_ref = self.current_function().function_ref;
        let chunk = &mut vm.function_mut(function_ref).chunk;
        chunk.code[offset] = ((jump >> 8) & 0xff) as u8;
        chunk.code[offset + 1] = (jump & 0xff) as u8;
    }

    fn emit_return(&mut self, vm: &mut Vm) {
        if self.current_function().function_type == FunctionType::Initializer {
            self.emit_bytes(vm, OpCode::GetLocal as u8, 0);
        } else {
            self.emit_op(vm, OpCode::Nil);
        }
        self.emit_op(vm, OpCode::Return);
    }

    fn make_constant(&mut self, vm: &mut Vm, value: Value) -> u8 {
        let function_ref = self.current_function().function_ref;
        match vm.function_mut(function_ref).chunk.add_constant(value) {
            Some(index) => index,
            None => {
                self.error(vm, "Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, vm: &mut Vm, value: Value) {
        let index = self.make_constant(vm, value);
        self.emit_bytes(vm, OpCode::Constant as u8, index);
    }

    fn identifier_constant(&mut self, vm: &mut Vm, name: &str) -> u8 {
        let name_ref = vm.intern_string(name);
        self.make_constant(vm, Value::obj(name_ref))
    }

    // ---- scopes and locals ---------------------------------------------

    fn begin_scope(&mut self) {
        self.current_function_mut().scope_depth += 1;
    }

    fn end_scope(&mut self, vm: &mut Vm) {
        self.current_function_mut().scope_depth -= 1;
        let depth = self.current_function().scope_depth;
        while let Some(local) = self.current_function().locals.last() {
            if local.depth <= depth {
                break;
            }
            if local.is_captured {
                self.emit_op(vm, OpCode::CloseUpvalue);
            } else {
                self.emit_op(vm, OpCode::Pop);
            }
            self.current_function_mut().locals.pop();
        }
    }

    fn add_local(&mut self, vm: &mut Vm, name: &'src str) {
        if self.current_function().locals.len() >= MAX_LOCALS {
            self.error(vm, "Too many local variables in function.");
            return;
        }
        self.current_function_mut().locals.push(Local { name, depth: -1, is_captured: false });
    }

    fn declare_variable(&mut self, vm: &mut Vm) {
        if self.current_function().scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme;
        let scope_depth = self.current_function().scope_depth;
        let mut duplicate = false;
        for local in self.current_function().locals.iter().rev() {
            if local.depth != -1 && local.depth < scope_depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error(vm, "Already a variable with this name in this scope.");
            return;
        }
        self.add_local(vm, name);
    }

    fn mark_initialized(&mut self) {
        if self.current_function().scope_depth == 0 {
            return;
        }
        let depth = self.current_function().scope_depth;
        if let Some(local) = self.current_function_mut().locals.last_mut() {
            local.depth = depth;
        }
    }

    fn parse_variable(&mut self, vm: &mut Vm, message: &str) -> u8 {
        self.consume(vm, TokenKind::Identifier, message);
        self.declare_variable(vm);
        if self.current_function().scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme;
        self.identifier_constant(vm, name)
    }

    fn define_variable(&mut self, vm: &mut Vm, global: u8) {
        if self.current_function().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_bytes(vm, OpCode::DefineGlobal as u8, global);
    }

    fn resolve_local(&self, func_idx: usize, name: &str) -> LocalLookup {
        for (i, local) in self.functions[func_idx].locals.iter().enumerate().rev() {
            if local.name == name {
                return if local.depth == -1 {
                    LocalLookup::Uninitialized
                } else {
                    LocalLookup::Found(i as u8)
                };
            }
        }
        LocalLookup::NotFound
    }

    fn resolve_upvalue(&mut self, vm: &mut Vm, func_idx: usize, name: &str) -> Option<u8> {
        if func_idx == 0 {
            return None;
        }
        let enclosing = func_idx - 1;
        match self.resolve_local(enclosing, name) {
            LocalLookup::Found(slot) => {
                self.functions[enclosing].locals[slot as usize].is_captured = true;
                Some(self.add_upvalue(vm, func_idx, slot, true))
            }
            LocalLookup::Uninitialized => {
                self.error(vm, "Can't read local variable in its own initializer.");
                None
            }
            LocalLookup::NotFound => {
                let upvalue = self.resolve_upvalue(vm, enclosing, name)?;
                Some(self.add_upvalue(vm, func_idx, upvalue, false))
            }
        }
    }

    fn add_upvalue(&mut self, vm: &mut Vm, func_idx: usize, index: u8, is_local: bool) -> u8 {
        for (i, existing) in self.functions[func_idx].upvalues.iter().enumerate() {
            if existing.index == index && existing.is_local == is_local {
                return i as u8;
            }
        }
        if self.functions[func_idx].upvalues.len() >= MAX_UPVALUES {
            self.error(vm, "Too many closure variables in function.");
            return 0;
        }
        self.functions[func_idx].upvalues.push(UpvalueInfo { index, is_local });
        let count = self.functions[func_idx].upvalues.len();
        let function_ref = self.functions[func_idx].function_ref;
        vm.function_mut(function_ref).upvalue_count = count;
        (count - 1) as u8
    }

    fn named_variable(&mut self, vm: &mut Vm, name: &str, can_assign: bool) {
        let func_idx = self.functions.len() - 1;
        let (get_op, set_op, arg) = match self.resolve_local(func_idx, name) {
            LocalLookup::Found(slot) => (OpCode::GetLocal, OpCode::SetLocal, slot),
            LocalLookup::Uninitialized => {
                self.error(vm, "Can't read local variable in its own initializer.");
                (OpCode::GetLocal, OpCode::SetLocal, 0)
            }
            LocalLookup::NotFound => {
                if let Some(slot) = self.resolve_upvalue(vm, func_idx, name) {
                    (OpCode::GetUpvalue, OpCode::SetUpvalue, slot)
                } else {
                    let index = self.identifier_constant(vm, name);
                    (OpCode::GetGlobal, OpCode::SetGlobal, index)
                }
            }
        };
        if can_assign && self.match_token(vm, TokenKind::Equal) {
            self.expression(vm);
            self.emit_bytes(vm, set_op as u8, arg);
        } else {
            self.emit_bytes(vm, get_op as u8, arg);
        }
    }

    // ---- expressions (Pratt) -------------------------------------------

    fn parse_precedence(&mut self, vm: &mut Vm, precedence: Precedence) {
        self.advance(vm);
        let Some(prefix) = rule_for(self.previous.kind).prefix else {
            self.error(vm, "Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, vm, can_assign);

        while precedence <= rule_for(self.current.kind).precedence {
            self.advance(vm);
            let infix = rule_for(self.previous.kind)
                .infix
                .expect("a token with infix-level precedence must have an infix rule");
            infix(self, vm, can_assign);
        }

        if can_assign && self.match_token(vm, TokenKind::Equal) {
            self.error(vm, "Invalid assignment target.");
        }
    }

    fn expression(&mut self, vm: &mut Vm) {
        self.parse_precedence(vm, Precedence::Assignment);
    }

    fn argument_list(&mut self, vm: &mut Vm) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression(vm);
                if count == MAX_ARGS {
                    self.error(vm, "Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.match_token(vm, TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(vm, TokenKind::RightParen, "Expect ')' after arguments.");
        count as u8
    }

    // ---- statements ------------------------------------------------------

    fn declaration(&mut self, vm: &mut Vm) {
        if self.match_token(vm, TokenKind::Class) {
            self.class_declaration(vm);
        } else if self.match_token(vm, TokenKind::Fun) {
            self.fun_declaration(vm);
        } else if self.match_token(vm, TokenKind::Var) {
            self.var_declaration(vm);
        } else {
            self.statement(vm);
        }
        if self.panic_mode {
            self.synchronize(vm);
        }
    }

    fn statement(&mut self, vm: &mut Vm) {
        if self.match_token(vm, TokenKind::If) {
            self.if_statement(vm);
        } else if self.match_token(vm, TokenKind::While) {
            self.while_statement(vm);
        } else if self.match_token(vm, TokenKind::For) {
            self.for_statement(vm);
        } else if self.match_token(vm, TokenKind::Return) {
            self.return_statement(vm);
        } else if self.match_token(vm, TokenKind::Break) {
            self.break_statement(vm);
        } else if self.match_token(vm, TokenKind::LeftBrace) {
            self.begin_scope();
            self.block(vm);
            self.end_scope(vm);
        } else {
            self.expression_statement(vm);
        }
    }

    fn block(&mut self, vm: &mut Vm) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration(vm);
        }
        self.consume(vm, TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn expression_statement(&mut self, vm: &mut Vm) {
        self.expression(vm);
        self.consume(vm, TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(vm, OpCode::Pop);
    }

    fn if_statement(&mut self, vm: &mut Vm) {
        self.consume(vm, TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression(vm);
        self.consume(vm, TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(vm, OpCode::JumpIfFalse);
        self.emit_op(vm, OpCode::Pop);
        self.statement(vm);

        let else_jump = self.emit_jump(vm, OpCode::Jump);
        self.patch_jump(vm, then_jump);
        self.emit_op(vm, OpCode::Pop);

        if self.match_token(vm, TokenKind::Else) {
            self.statement(vm);
        }
        self.patch_jump(vm, else_jump);
    }

    fn while_statement(&mut self, vm: &mut Vm) {
        let loop_start = self.chunk_len(vm);
        let scope_depth = self.current_function().scope_depth;
        self.current_function_mut().loops.push(LoopState { scope_depth, break_jumps: Vec::new() });

        self.consume(vm, TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression(vm);
        self.consume(vm, TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(vm, OpCode::JumpIfFalse);
        self.emit_op(vm, OpCode::Pop);
        self.statement(vm);
        self.emit_loop(vm, loop_start);

        self.patch_jump(vm, exit_jump);
        self.emit_op(vm, OpCode::Pop);
        self.end_loop(vm);
    }

    fn for_statement(&mut self, vm: &mut Vm) {
        self.begin_scope();
        self.consume(vm, TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(vm, TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(vm, TokenKind::Var) {
            self.var_declaration(vm);
        } else {
            self.expression_statement(vm);
        }

        let mut loop_start = self.chunk_len(vm);
        let scope_depth = self.current_function().scope_depth;
        self.current_function_mut().loops.push(LoopState { scope_depth, break_jumps: Vec::new() });

        let mut exit_jump: Option<usize> = None;
        if !self.match_token(vm, TokenKind::Semicolon) {
            self.expression(vm);
            self.consume(vm, TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(vm, OpCode::JumpIfFalse));
            self.emit_op(vm, OpCode::Pop);
        }

        if !self.match_token(vm, TokenKind::RightParen) {
            let body_jump = self.emit_jump(vm, OpCode::Jump);
            let increment_start = self.chunk_len(vm);
            self.expression(vm);
            self.emit_op(vm, OpCode::Pop);
            self.consume(vm, TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(vm, loop_start);
            loop_start = increment_start;
            self.patch_jump(vm, body_jump);
        }

        self.statement(vm);
        self.emit_loop(vm, loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(vm, exit_jump);
            self.emit_op(vm, OpCode::Pop);
        }

        self.end_loop(vm);
        self.end_scope(vm);
    }

    fn end_loop(&mut self, vm: &mut Vm) {
        let loop_state =
            self.current_function_mut().loops.pop().expect("end_loop is only called by the statement that pushed it");
        for jump in loop_state.break_jumps {
            self.patch_jump(vm, jump);
        }
    }

    fn break_statement(&mut self, vm: &mut Vm) {
        if self.current_function().loops.is_empty() {
            self.error(vm, "Can't use 'break' outside of a loop.");
            self.consume(vm, TokenKind::Semicolon, "Expect ';' after 'break'.");
            return;
        }
        let loop_depth = self.current_function().loops.last().expect("checked above").scope_depth;
        let to_unwind: Vec<bool> = self
            .current_function()
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth > loop_depth)
            .map(|local| local.is_captured)
            .collect();
        for is_captured in to_unwind {
            if is_captured {
                self.emit_op(vm, OpCode::CloseUpvalue);
            } else {
                self.emit_op(vm, OpCode::Pop);
            }
        }
        let jump = self.emit_jump(vm, OpCode::Jump);
        self.current_function_mut().loops.last_mut().expect("checked above").break_jumps.push(jump);
        self.consume(vm, TokenKind::Semicolon, "Expect ';' after 'break'.");
    }

    fn return_statement(&mut self, vm: &mut Vm) {
        if self.functions.len() == 1 {
            self.error(vm, "Can't return from top-level code.");
        }
        if self.match_token(vm, TokenKind::Semicolon) {
            self.emit_return(vm);
        } else {
            if self.current_function().function_type == FunctionType::Initializer {
                self.error(vm, "Can't return a value from an initializer.");
            }
            self.expression(vm);
            self.consume(vm, TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(vm, OpCode::Return);
        }
    }

    fn var_declaration(&mut self, vm: &mut Vm) {
        let global = self.parse_variable(vm, "Expect variable name.");
        if self.match_token(vm, TokenKind::Equal) {
            self.expression(vm);
        } else {
            self.emit_op(vm, OpCode::Nil);
        }
        self.consume(vm, TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(vm, global);
    }

    fn fun_declaration(&mut self, vm: &mut Vm) {
        let global = self.parse_variable(vm, "Expect function name.");
        self.mark_initialized();
        self.function(vm, FunctionType::Function);
        self.define_variable(vm, global);
    }

    fn function(&mut self, vm: &mut Vm, function_type: FunctionType) {
        let function_ref = vm.alloc(ObjData::Function(LoxFunction {
            arity: 0,
            upvalue_count: 0,
            chunk: crate::chunk::Chunk::new(),
            name: None,
        }));
        vm.push_compiler_root(function_ref);
        let name_ref = vm.intern_string(self.previous.lexeme);
        vm.function_mut(function_ref).name = Some(name_ref);
        self.functions.push(FunctionState::new(function_ref, function_type));
        self.begin_scope();

        self.consume(vm, TokenKind::LeftParen, "Expect '(' after function name.");
        let mut arity: u8 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                if arity as usize == MAX_ARGS {
                    self.error_at_current(vm, "Can't have more than 255 parameters.");
                }
                arity = arity.saturating_add(1);
                let constant = self.parse_variable(vm, "Expect parameter name.");
                self.define_variable(vm, constant);
                if !self.match_token(vm, TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(vm, TokenKind::RightParen, "Expect ')' after parameters.");
        vm.function_mut(function_ref).arity = arity;

        self.consume(vm, TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block(vm);
        self.emit_return(vm);

        #[cfg(feature = "print-code")]
        if self.errors.is_empty() && vm.should_print_code() {
            let label = vm.function_name(function_ref).unwrap_or("fn").to_string();
            tracing::debug!("{}", vm.disassemble(function_ref, &label));
        }

        let upvalues = self.functions.pop().expect("pushed at the top of this function").upvalues;
        vm.pop_compiler_root();

        let constant = self.make_constant(vm, Value::obj(function_ref));
        self.emit_bytes(vm, OpCode::Closure as u8, constant);
        for upvalue in upvalues {
            self.emit_byte(vm, u8::from(upvalue.is_local));
            self.emit_byte(vm, upvalue.index);
        }
    }

    fn class_declaration(&mut self, vm: &mut Vm) {
        self.consume(vm, TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous.lexeme.to_string();
        let name_index = self.identifier_constant(vm, &class_name);
        self.declare_variable(vm);

        self.emit_bytes(vm, OpCode::Class as u8, name_index);
        self.define_variable(vm, name_index);

        self.classes.push(ClassState { has_superclass: false });

        if self.match_token(vm, TokenKind::Less) {
            self.consume(vm, TokenKind::Identifier, "Expect superclass name.");
            if self.previous.lexeme == class_name {
                self.error(vm, "A class can't inherit from itself.");
            }
            rule_fns::variable(self, vm, false);

            self.begin_scope();
            self.add_local(vm, "super");
            self.define_variable(vm, 0);

            self.named_variable(vm, &class_name, false);
            self.emit_op(vm, OpCode::Inherit);
            self.classes.last_mut().expect("just pushed").has_superclass = true;
        }

        self.named_variable(vm, &class_name, false);
        self.consume(vm, TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method(vm);
        }
        self.consume(vm, TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(vm, OpCode::Pop);

        if self.classes.last().expect("just pushed").has_superclass {
            self.end_scope(vm);
        }
        self.classes.pop();
    }

    fn method(&mut self, vm: &mut Vm) {
        self.consume(vm, TokenKind::Identifier, "Expect method name.");
        let method_name = self.previous.lexeme.to_string();
        let name_index = self.identifier_constant(vm, &method_name);
        let function_type =
            if method_name == "init" { FunctionType::Initializer } else { FunctionType::Method };
        self.function(vm, function_type);
        self.emit_bytes(vm, OpCode::Method as u8, name_index);
    }
}

/// The Pratt prefix/infix parse functions. Free functions (not methods)
/// because [`rules::ParseFn`] is a plain function pointer, not a
/// trait object — matched against in [`rules::rule_for`].
mod rule_fns {
    use super::{Compiler, OpCode, Precedence, TokenKind, Value};
    use crate::vm::Vm;

    pub(super) fn grouping(c: &mut Compiler<'_>, vm: &mut Vm, _can_assign: bool) {
        c.expression(vm);
        c.consume(vm, TokenKind::RightParen, "Expect ')' after expression.");
    }

    pub(super) fn unary(c: &mut Compiler<'_>, vm: &mut Vm, _can_assign: bool) {
        let op_kind = c.previous.kind;
        c.parse_precedence(vm, Precedence::Unary);
        match op_kind {
            TokenKind::Bang => c.emit_op(vm, OpCode::Not),
            TokenKind::Minus => c.emit_op(vm, OpCode::Negate),
            _ => unreachable!("the unary rule is only registered for ! and -"),
        }
    }

    pub(super) fn binary(c: &mut Compiler<'_>, vm: &mut Vm, _can_assign: bool) {
        let op_kind = c.previous.kind;
        let rule = super::rule_for(op_kind);
        c.parse_precedence(vm, rule.precedence.next());
        match op_kind {
            TokenKind::BangEqual => {
                c.emit_op(vm, OpCode::Equal);
                c.emit_op(vm, OpCode::Not);
            }
            TokenKind::EqualEqual => c.emit_op(vm, OpCode::Equal),
            TokenKind::Greater => c.emit_op(vm, OpCode::Greater),
            TokenKind::GreaterEqual => {
                c.emit_op(vm, OpCode::Less);
                c.emit_op(vm, OpCode::Not);
            }
            TokenKind::Less => c.emit_op(vm, OpCode::Less),
            TokenKind::LessEqual => {
                c.emit_op(vm, OpCode::Greater);
                c.emit_op(vm, OpCode::Not);
            }
            TokenKind::Plus => c.emit_op(vm, OpCode::Add),
            TokenKind::Minus => c.emit_op(vm, OpCode::Subtract),
            TokenKind::Star => c.emit_op(vm, OpCode::Multiply),
            TokenKind::Slash => c.emit_op(vm, OpCode::Divide),
            _ => unreachable!("the binary rule is only registered for arithmetic/comparison operators"),
        }
    }

    pub(super) fn number(c: &mut Compiler<'_>, vm: &mut Vm, _can_assign: bool) {
        let cleaned: String = c.previous.lexeme.chars().filter(|&ch| ch != '_').collect();
        match cleaned.parse::<f64>() {
            Ok(n) => c.emit_constant(vm, Value::number(n)),
            Err(_) => c.error(vm, "Invalid number literal."),
        }
    }

    pub(super) fn string(c: &mut Compiler<'_>, vm: &mut Vm, _can_assign: bool) {
        let lexeme = c.previous.lexeme;
        let contents = &lexeme[1..lexeme.len() - 1];
        let string_ref = vm.intern_string(contents);
        c.emit_constant(vm, Value::obj(string_ref));
    }

    pub(super) fn literal(c: &mut Compiler<'_>, vm: &mut Vm, _can_assign: bool) {
        match c.previous.kind {
            TokenKind::False => c.emit_op(vm, OpCode::False),
            TokenKind::Nil => c.emit_op(vm, OpCode::Nil),
            TokenKind::True => c.emit_op(vm, OpCode::True),
            _ => unreachable!("the literal rule is only registered for false/nil/true"),
        }
    }

    pub(super) fn variable(c: &mut Compiler<'_>, vm: &mut Vm, can_assign: bool) {
        let name = c.previous.lexeme.to_string();
        c.named_variable(vm, &name, can_assign);
    }

    pub(super) fn and_(c: &mut Compiler<'_>, vm: &mut Vm, _can_assign: bool) {
        let end_jump = c.emit_jump(vm, OpCode::JumpIfFalse);
        c.emit_op(vm, OpCode::Pop);
        c.parse_precedence(vm, Precedence::And);
        c.patch_jump(vm, end_jump);
    }

    pub(super) fn or_(c: &mut Compiler<'_>, vm: &mut Vm, _can_assign: bool) {
        let else_jump = c.emit_jump(vm, OpCode::JumpIfFalse);
        let end_jump = c.emit_jump(vm, OpCode::Jump);
        c.patch_jump(vm, else_jump);
        c.emit_op(vm, OpCode::Pop);
        c.parse_precedence(vm, Precedence::Or);
        c.patch_jump(vm, end_jump);
    }

    pub(super) fn call(c: &mut Compiler<'_>, vm: &mut Vm, _can_assign: bool) {
        let arg_count = c.argument_list(vm);
        c.emit_bytes(vm, OpCode::Call as u8, arg_count);
    }

    pub(super) fn dot(c: &mut Compiler<'_>, vm: &mut Vm, can_assign: bool) {
        c.consume(vm, TokenKind::Identifier, "Expect property name after '.'.");
        let name = c.previous.lexeme.to_string();
        let name_index = c.identifier_constant(vm, &name);
        if can_assign && c.match_token(vm, TokenKind::Equal) {
            c.expression(vm);
            c.emit_bytes(vm, OpCode::SetProperty as u8, name_index);
        } else if c.match_token(vm, TokenKind::LeftParen) {
            let arg_count = c.argument_list(vm);
            c.emit_bytes(vm, OpCode::Invoke as u8, name_index);
            c.emit_byte(vm, arg_count);
        } else {
            c.emit_bytes(vm, OpCode::GetProperty as u8, name_index);
        }
    }

    pub(super) fn this(c: &mut Compiler<'_>, vm: &mut Vm, _can_assign: bool) {
        if c.classes.is_empty() {
            c.error(vm, "Can't use 'this' outside of a class.");
            return;
        }
        variable(c, vm, false);
    }

    pub(super) fn super_(c: &mut Compiler<'_>, vm: &mut Vm, _can_assign: bool) {
        if c.classes.is_empty() {
            c.error(vm, "Can't use 'super' outside of a class.");
        } else if !c.classes.last().expect("checked above").has_superclass {
            c.error(vm, "Can't use 'super' in a class with no superclass.");
        }
        c.consume(vm, TokenKind::Dot, "Expect '.' after 'super'.");
        c.consume(vm, TokenKind::Identifier, "Expect superclass method name.");
        let name = c.previous.lexeme.to_string();
        let name_index = c.identifier_constant(vm, &name);

        c.named_variable(vm, "this", false);
        if c.match_token(vm, TokenKind::LeftParen) {
            let arg_count = c.argument_list(vm);
            c.named_variable(vm, "super", false);
            c.emit_bytes(vm, OpCode::InvokeSuper as u8, name_index);
            c.emit_byte(vm, arg_count);
        } else {
            c.named_variable(vm, "super", false);
            c.emit_bytes(vm, OpCode::GetSuper as u8, name_index);
        }
    }
}
