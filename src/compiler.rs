// File: src/compiler.rs
//
// Single-pass compiler: a Pratt parser that lowers source straight to
// bytecode with no intermediate tree. Tracks locals, upvalue captures,
// scope depth and loop fixups as it goes; classes, traits, methods and
// optional parameters are all compiled in one forward pass over the token
// stream, with one deliberate exception: `{` at statement position is
// disambiguated by speculatively scanning ahead and rewinding the scanner.

use ahash::RandomState;
use std::collections::HashMap;

use crate::chunk::{instruction_len, Chunk, OpCode};
use crate::debug;
use crate::errors::report_compile_error;
use crate::object::{ObjFunction, ObjKind, ObjRef};
use crate::scanner::{Scanner, Token, TokenKind};
use crate::value::Value;
use crate::vm::Vm;

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_PARAMETERS: u16 = 255;
const MAX_ARGUMENTS: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    BitwiseOr,  // |
    BitwiseXor, // ^
    BitwiseAnd, // &
    Term,       // + -
    Factor,     // * / %
    Indices,    // ** (right-associative)
    Unary,      // ! -
    Call,       // . () []
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => BitwiseOr,
            BitwiseOr => BitwiseXor,
            BitwiseXor => BitwiseAnd,
            BitwiseAnd => Term,
            Term => Factor,
            Factor => Indices,
            Indices => Unary,
            Unary => Call,
            Call => Primary,
            Primary => Primary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionType {
    TopLevel,
    Function,
    Method,
    Initializer,
    Static,
}

struct Local {
    name: String,
    /// -1 while declared but not yet initialized.
    depth: i32,
    /// Set when a nested function captures this local; scope exit then
    /// closes the upvalue instead of popping.
    is_upvalue: bool,
}

#[derive(Clone, Copy)]
struct Upvalue {
    index: u8,
    is_local: bool,
}

struct Loop {
    /// Back-edge target for `continue` and the loop's own jump.
    start: usize,
    /// First opcode of the body; the break-rewrite scan starts here.
    body: usize,
    /// Forward exit patch, None for unconditional loops.
    end: Option<usize>,
    scope_depth: i32,
}

struct WithScope {
    slot: u8,
    scope_depth: i32,
}

struct Compiler {
    function: ObjRef,
    kind: FunctionType,
    locals: Vec<Local>,
    upvalues: Vec<Upvalue>,
    scope_depth: i32,
    loops: Vec<Loop>,
    withs: Vec<WithScope>,
    /// Deduplicates name constants within this function's pool.
    string_constants: HashMap<u32, u8, RandomState>,
}

struct ClassCompiler {
    has_superclass: bool,
}

struct ParseRule<'src, 'vm> {
    prefix: Option<fn(&mut Parser<'src, 'vm>, bool)>,
    infix: Option<fn(&mut Parser<'src, 'vm>, bool)>,
    precedence: Precedence,
}

pub struct Parser<'src, 'vm> {
    vm: &'vm mut Vm,
    scanner: Scanner<'src>,
    current: Token,
    previous: Token,
    had_error: bool,
    panic_mode: bool,
    /// Active compiler chain, innermost last.
    compilers: Vec<Compiler>,
    class_compilers: Vec<ClassCompiler>,
}

/// Compiles a complete source unit and returns the top-level function, or
/// None after reporting one or more compile errors.
pub fn compile(vm: &mut Vm, source: &str) -> Option<ObjRef> {
    let scanner = Scanner::new(source);
    let placeholder = Token { kind: TokenKind::Eof, lexeme: String::new(), line: 1 };
    let mut parser = Parser {
        vm,
        scanner,
        current: placeholder.clone(),
        previous: placeholder,
        had_error: false,
        panic_mode: false,
        compilers: Vec::new(),
        class_compilers: Vec::new(),
    };

    parser.push_compiler(FunctionType::TopLevel, None);
    parser.advance();
    while !parser.match_token(TokenKind::Eof) {
        parser.declaration();
    }
    let (function, _) = parser.end_compiler();

    if parser.had_error {
        None
    } else {
        Some(function)
    }
}

impl<'src, 'vm> Parser<'src, 'vm> {
    // ------------------------------------------------------------------
    // Compiler chain
    // ------------------------------------------------------------------

    fn push_compiler(&mut self, kind: FunctionType, name: Option<&str>) {
        let function = self.vm.alloc(ObjKind::Function(ObjFunction {
            name: None,
            arity: 0,
            arity_optional: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
        }));
        // The in-progress function is a GC root for the whole compilation
        // of this unit; everything it accumulates in its constant pool is
        // reachable through it.
        self.vm.gc.protect(Value::Obj(function));
        if let Some(name) = name {
            let name = self.vm.intern(name);
            self.vm.gc.heap.function_mut(function).name = Some(name);
        }

        let slot_zero = match kind {
            FunctionType::Method | FunctionType::Initializer => "this",
            _ => "",
        };
        self.compilers.push(Compiler {
            function,
            kind,
            locals: vec![Local { name: slot_zero.to_string(), depth: 0, is_upvalue: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
            withs: Vec::new(),
            string_constants: HashMap::with_hasher(RandomState::new()),
        });
    }

    fn end_compiler(&mut self) -> (ObjRef, Vec<Upvalue>) {
        self.emit_return();
        let compiler = self.compilers.pop().expect("compiler chain underflow");
        let function = compiler.function;
        self.vm.gc.heap.function_mut(function).upvalue_count = compiler.upvalues.len();

        if debug::print_code_enabled() && !self.had_error {
            let name = match self.vm.gc.heap.function(function).name {
                Some(n) => self.vm.gc.heap.string(n).chars.clone(),
                None => "<script>".to_string(),
            };
            debug::disassemble_chunk(
                &self.vm.gc.heap,
                &self.vm.gc.heap.function(function).chunk,
                &name,
            );
        }

        self.vm.gc.unprotect(1);
        (function, compiler.upvalues)
    }

    fn compiler(&self) -> &Compiler {
        self.compilers.last().expect("no active compiler")
    }

    fn compiler_mut(&mut self) -> &mut Compiler {
        self.compilers.last_mut().expect("no active compiler")
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn advance(&mut self) {
        self.previous = std::mem::replace(
            &mut self.current,
            Token { kind: TokenKind::Eof, lexeme: String::new(), line: 0 },
        );
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.clone();
            self.error_at_current(&message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&mut self, message: &str) {
        let token = self.previous.clone();
        self.error_at(&token, message);
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current.clone();
        self.error_at(&token, message);
    }

    fn error_at(&mut self, token: &Token, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let location = match token.kind {
            TokenKind::Eof => " at end".to_string(),
            TokenKind::Error => String::new(),
            _ => format!(" at '{}'", token.lexeme),
        };
        report_compile_error(token.line, &location, message);
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Trait
                | TokenKind::Def
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::Return
                | TokenKind::With
                | TokenKind::Import => return,
                _ => self.advance(),
            }
        }
    }

    // ------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------

    fn chunk_len(&self) -> usize {
        self.vm.gc.heap.function(self.compiler().function).chunk.code.len()
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        let function = self.compiler().function;
        self.vm.gc.heap.function_mut(function).chunk.write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_op_byte(&mut self, op: OpCode, operand: u8) {
        self.emit_op(op);
        self.emit_byte(operand);
    }

    fn emit_return(&mut self) {
        if self.compiler().kind == FunctionType::Initializer {
            self.emit_op_byte(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk_len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.chunk_len() - offset - 2;
        let too_far = jump > u16::MAX as usize;
        let bytes = (jump.min(u16::MAX as usize) as u16).to_be_bytes();
        let function = self.compiler().function;
        let chunk = &mut self.vm.gc.heap.function_mut(function).chunk;
        chunk.code[offset] = bytes[0];
        chunk.code[offset + 1] = bytes[1];
        if too_far {
            self.error("Too much code to jump over.");
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.chunk_len() - loop_start + 2;
        let too_far = offset > u16::MAX as usize;
        let bytes = (offset.min(u16::MAX as usize) as u16).to_be_bytes();
        self.emit_byte(bytes[0]);
        self.emit_byte(bytes[1]);
        if too_far {
            self.error("Loop body too large.");
        }
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let function = self.compiler().function;
        match self.vm.gc.heap.function_mut(function).chunk.add_constant(value) {
            Some(index) => index,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_op_byte(OpCode::Constant, index);
    }

    /// Interns an identifier and returns its constant index, reusing the
    /// per-function cache so repeated names share one pool slot.
    fn identifier_constant(&mut self, name: &str) -> u8 {
        let interned = self.vm.intern(name);
        if let Some(&index) = self.compiler().string_constants.get(&interned.0) {
            return index;
        }
        let index = self.make_constant(Value::Obj(interned));
        self.compiler_mut().string_constants.insert(interned.0, index);
        index
    }

    // ------------------------------------------------------------------
    // Scopes, locals and upvalues
    // ------------------------------------------------------------------

    fn begin_scope(&mut self) {
        self.compiler_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.compiler_mut().scope_depth -= 1;
        loop {
            let op = {
                let compiler = self.compiler();
                match compiler.locals.last() {
                    Some(local) if local.depth > compiler.scope_depth => {
                        if local.is_upvalue {
                            OpCode::CloseUpvalue
                        } else {
                            OpCode::Pop
                        }
                    }
                    _ => break,
                }
            };
            self.emit_op(op);
            self.compiler_mut().locals.pop();
        }
    }

    fn add_local(&mut self, name: String) {
        if self.compiler().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.compiler_mut().locals.push(Local { name, depth: -1, is_upvalue: false });
    }

    fn mark_initialized(&mut self) {
        let compiler = self.compiler_mut();
        if compiler.scope_depth == 0 {
            return;
        }
        let depth = compiler.scope_depth;
        if let Some(local) = compiler.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn declare_variable(&mut self) {
        if self.compiler().scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme.clone();
        let mut duplicate = false;
        {
            let compiler = self.compiler();
            for local in compiler.locals.iter().rev() {
                if local.depth != -1 && local.depth < compiler.scope_depth {
                    break;
                }
                if local.name == name {
                    duplicate = true;
                    break;
                }
            }
        }
        if duplicate {
            self.error("Variable with this name already declared in this scope.");
        }
        self.add_local(name);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.compiler().scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme.clone();
        self.identifier_constant(&name)
    }

    fn define_variable(&mut self, global: u8) {
        if self.compiler().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_byte(OpCode::DefineGlobal, global);
    }

    fn resolve_local(&mut self, compiler_index: usize, name: &str) -> Option<u8> {
        let mut uninitialized = false;
        let mut found = None;
        for (index, local) in self.compilers[compiler_index].locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    uninitialized = true;
                }
                found = Some(index as u8);
                break;
            }
        }
        if uninitialized {
            self.error("Cannot read local variable in its own initializer.");
        }
        found
    }

    /// Searches enclosing functions for `name`, materialising the capture
    /// chain: every function between the use and the declaration gets an
    /// upvalue, so at runtime a capture is at most one hop away.
    fn resolve_upvalue(&mut self, compiler_index: usize, name: &str) -> Option<u8> {
        if compiler_index == 0 {
            return None;
        }
        if let Some(local) = self.resolve_local(compiler_index - 1, name) {
            self.compilers[compiler_index - 1].locals[local as usize].is_upvalue = true;
            return Some(self.add_upvalue(compiler_index, local, true));
        }
        if let Some(upvalue) = self.resolve_upvalue(compiler_index - 1, name) {
            return Some(self.add_upvalue(compiler_index, upvalue, false));
        }
        None
    }

    fn add_upvalue(&mut self, compiler_index: usize, index: u8, is_local: bool) -> u8 {
        for (i, upvalue) in self.compilers[compiler_index].upvalues.iter().enumerate() {
            if upvalue.index == index && upvalue.is_local == is_local {
                return i as u8;
            }
        }
        if self.compilers[compiler_index].upvalues.len() >= MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        self.compilers[compiler_index].upvalues.push(Upvalue { index, is_local });
        (self.compilers[compiler_index].upvalues.len() - 1) as u8
    }

    fn resolve_variable(&mut self, name: &str) -> (OpCode, OpCode, u8) {
        let top = self.compilers.len() - 1;
        if let Some(slot) = self.resolve_local(top, name) {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(index) = self.resolve_upvalue(top, name) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, index)
        } else {
            let constant = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, constant)
        }
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Trait) {
            self.trait_declaration();
        } else if self.match_token(TokenKind::Def) {
            self.def_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn def_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        let name = self.previous.lexeme.clone();
        self.mark_initialized();
        self.function(FunctionType::Function, &name);
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionType, name: &str) {
        self.push_compiler(kind, Some(name));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        let mut optional_seen = false;
        if !self.check(TokenKind::RightParen) {
            loop {
                let declared = {
                    let f = self.vm.gc.heap.function(self.compiler().function);
                    f.arity as u16 + f.arity_optional as u16
                };
                if declared + 1 > MAX_PARAMETERS {
                    self.error_at_current("Cannot have more than 255 parameters.");
                }
                let param = self.parse_variable("Expect parameter name.");
                self.define_variable(param);
                let function = self.compiler().function;
                if self.match_token(TokenKind::Equal) {
                    optional_seen = true;
                    self.vm.gc.heap.function_mut(function).arity_optional += 1;
                    // Default values are evaluated in the prologue; the
                    // shuffle opcode below keeps the tail that is needed.
                    self.expression();
                } else {
                    if optional_seen {
                        self.error("Cannot have a non-optional parameter after an optional one.");
                    }
                    self.vm.gc.heap.function_mut(function).arity += 1;
                }
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        if self.vm.gc.heap.function(self.compiler().function).arity_optional > 0 {
            self.emit_op(OpCode::DefineOptional);
        }

        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.end_compiler();
        let constant = self.make_constant(Value::Obj(function));
        self.emit_op_byte(OpCode::Closure, constant);
        self.emit_byte(upvalues.len() as u8);
        for upvalue in upvalues {
            self.emit_byte(if upvalue.is_local { 1 } else { 0 });
            self.emit_byte(upvalue.index);
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let name_token = self.previous.clone();
        let name_constant = self.identifier_constant(&name_token.lexeme.clone());
        self.declare_variable();
        self.class_compilers.push(ClassCompiler { has_superclass: false });

        let mut super_token = None;
        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            let token = self.previous.clone();
            if token.lexeme == name_token.lexeme {
                self.error("A class cannot inherit from itself.");
            }
            // Superclass methods are copied into the new class up front, so
            // the class's own methods override them.
            self.named_variable(token.clone(), false);
            self.emit_op_byte(OpCode::Subclass, name_constant);
            super_token = Some(token);
        } else {
            self.emit_op_byte(OpCode::Class, name_constant);
        }
        self.define_variable(name_constant);

        if let Some(token) = &super_token {
            self.begin_scope();
            self.named_variable(token.clone(), false);
            self.add_local("super".to_string());
            self.mark_initialized();
            self.class_compilers.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(name_token, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            if self.match_token(TokenKind::Use) {
                self.use_statement();
            } else {
                self.method(false);
            }
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        if super_token.is_some() {
            self.end_scope();
        }
        self.class_compilers.pop();
    }

    fn trait_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect trait name.");
        let name_token = self.previous.clone();
        let name_constant = self.identifier_constant(&name_token.lexeme.clone());
        self.declare_variable();
        self.emit_op_byte(OpCode::Trait, name_constant);
        self.define_variable(name_constant);

        // Trait methods may reference `this`; it binds when the method is
        // copied into an adopting class.
        self.class_compilers.push(ClassCompiler { has_superclass: false });
        self.named_variable(name_token, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before trait body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method(true);
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after trait body.");
        self.emit_op(OpCode::Pop);
        self.class_compilers.pop();
    }

    fn use_statement(&mut self) {
        loop {
            self.consume(TokenKind::Identifier, "Expect trait name after 'use'.");
            let token = self.previous.clone();
            self.named_variable(token, false);
            self.emit_op(OpCode::UseTrait);
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after use statement.");
    }

    fn method(&mut self, in_trait: bool) {
        let is_static = self.match_token(TokenKind::Static);
        self.consume(TokenKind::Def, "Expect method declaration.");
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.previous.lexeme.clone();
        let constant = self.identifier_constant(&name);

        let kind = if is_static {
            FunctionType::Static
        } else if name == "init" {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };
        self.function(kind, &name);
        self.emit_op_byte(if in_trait { OpCode::TraitMethod } else { OpCode::Method }, constant);
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement(&mut self) {
        if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::With) {
            self.with_statement();
        } else if self.match_token(TokenKind::Import) {
            self.import_statement();
        } else if self.match_token(TokenKind::Break) {
            self.break_statement();
        } else if self.match_token(TokenKind::Continue) {
            self.continue_statement();
        } else if self.check(TokenKind::LeftBrace) && !self.looks_like_dict() {
            self.advance();
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    /// Speculatively scans past `{` to decide between a block and a dict
    /// expression statement: `{}` directly before `;` and `{ key :` are
    /// expressions, everything else is a block. The scanner is rewound
    /// before returning.
    fn looks_like_dict(&mut self) -> bool {
        let mark = self.scanner.mark();
        let first = self.scanner.scan_token();
        let result = match first.kind {
            TokenKind::RightBrace => self.scanner.scan_token().kind == TokenKind::Semicolon,
            TokenKind::String
            | TokenKind::Number
            | TokenKind::Identifier
            | TokenKind::True
            | TokenKind::False
            | TokenKind::Nil => self.scanner.scan_token().kind == TokenKind::Colon,
            _ => false,
        };
        self.scanner.backtrack(mark);
        result
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        let at_top_level = self.compilers.len() == 1 && self.compiler().scope_depth == 0;
        if self.vm.repl && at_top_level {
            self.emit_op(OpCode::PopRepl);
        } else {
            self.emit_op(OpCode::Pop);
        }
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk_len();
        let scope_depth = self.compiler().scope_depth;
        self.compiler_mut().loops.push(Loop { start: loop_start, body: 0, end: None, scope_depth });

        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit = self.emit_jump(OpCode::JumpIfFalse);
        self.compiler_mut().loops.last_mut().unwrap().end = Some(exit);
        self.emit_op(OpCode::Pop);
        let body = self.chunk_len();
        self.compiler_mut().loops.last_mut().unwrap().body = body;

        self.statement();
        self.emit_loop(loop_start);
        self.end_loop();
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop initializer.");
            self.emit_op(OpCode::Pop);
        }

        let mut loop_start = self.chunk_len();
        let scope_depth = self.compiler().scope_depth;
        self.compiler_mut().loops.push(Loop { start: loop_start, body: 0, end: None, scope_depth });

        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            let exit = self.emit_jump(OpCode::JumpIfFalse);
            self.compiler_mut().loops.last_mut().unwrap().end = Some(exit);
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk_len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            // continue targets the increment clause
            self.compiler_mut().loops.last_mut().unwrap().start = loop_start;
            self.patch_jump(body_jump);
        }

        let body = self.chunk_len();
        self.compiler_mut().loops.last_mut().unwrap().body = body;
        self.statement();
        self.emit_loop(loop_start);
        self.end_loop();
        self.end_scope();
    }

    /// Pops the current loop record, patches its exit, and rewrites every
    /// OP_BREAK placeholder in the body into a jump past the loop.
    fn end_loop(&mut self) {
        let finished = self.compiler_mut().loops.pop().expect("no enclosing loop");
        if let Some(end) = finished.end {
            self.patch_jump(end);
            self.emit_op(OpCode::Pop);
        }

        let function = self.compiler().function;
        let mut offset = finished.body;
        while offset < self.chunk_len() {
            let (is_break, step) = {
                let chunk = &self.vm.gc.heap.function(function).chunk;
                if chunk.code[offset] == OpCode::Break as u8 {
                    (true, 3)
                } else {
                    (false, instruction_len(chunk, offset))
                }
            };
            if is_break {
                self.vm.gc.heap.function_mut(function).chunk.code[offset] = OpCode::Jump as u8;
                self.patch_jump(offset + 1);
            }
            offset += step;
        }
    }

    /// Emits cleanup for an early exit out to `target_depth`: open files in
    /// the abandoned scopes are closed and locals are popped, without
    /// touching compile-time state (the code after the jump still needs it).
    fn discard_locals(&mut self, target_depth: i32) {
        let slots: Vec<u8> = self
            .compiler()
            .withs
            .iter()
            .filter(|w| w.scope_depth > target_depth)
            .map(|w| w.slot)
            .collect();
        for slot in slots {
            self.emit_op_byte(OpCode::CloseFile, slot);
        }

        let ops: Vec<OpCode> = self
            .compiler()
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth > target_depth)
            .map(|local| {
                if local.is_upvalue {
                    OpCode::CloseUpvalue
                } else {
                    OpCode::Pop
                }
            })
            .collect();
        for op in ops {
            self.emit_op(op);
        }
    }

    fn break_statement(&mut self) {
        self.consume(TokenKind::Semicolon, "Expect ';' after 'break'.");
        if self.compiler().loops.is_empty() {
            self.error("Cannot use 'break' outside of a loop.");
            return;
        }
        let depth = self.compiler().loops.last().unwrap().scope_depth;
        self.discard_locals(depth);
        // Placeholder; end_loop rewrites it to a Jump once the exit is known.
        self.emit_jump(OpCode::Break);
    }

    fn continue_statement(&mut self) {
        self.consume(TokenKind::Semicolon, "Expect ';' after 'continue'.");
        if self.compiler().loops.is_empty() {
            self.error("Cannot use 'continue' outside of a loop.");
            return;
        }
        let lp = self.compiler().loops.last().unwrap();
        let depth = lp.scope_depth;
        let start = lp.start;
        self.discard_locals(depth);
        self.emit_loop(start);
    }

    fn return_statement(&mut self) {
        if self.compiler().kind == FunctionType::TopLevel {
            self.error("Cannot return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.close_open_files();
            self.emit_return();
            return;
        }
        if self.compiler().kind == FunctionType::Initializer {
            self.error("Cannot return a value from an initializer.");
        }
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
        self.close_open_files();
        self.emit_op(OpCode::Return);
    }

    /// `return` unwinds through any enclosing `with` blocks; their files
    /// must be closed on this path too.
    fn close_open_files(&mut self) {
        let slots: Vec<u8> = self.compiler().withs.iter().map(|w| w.slot).collect();
        for slot in slots {
            self.emit_op_byte(OpCode::CloseFile, slot);
        }
    }

    fn with_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'with'.");
        self.expression();
        self.consume(TokenKind::Comma, "Expect ',' between file path and mode.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after file mode.");

        self.begin_scope();
        self.emit_op(OpCode::OpenFile);
        // The opened file is the scope's `file` local.
        self.add_local("file".to_string());
        self.mark_initialized();
        let slot = (self.compiler().locals.len() - 1) as u8;
        let scope_depth = self.compiler().scope_depth;
        self.compiler_mut().withs.push(WithScope { slot, scope_depth });

        self.consume(TokenKind::LeftBrace, "Expect '{' after with statement.");
        self.block();

        self.emit_op_byte(OpCode::CloseFile, slot);
        self.compiler_mut().withs.pop();
        self.end_scope();
    }

    fn import_statement(&mut self) {
        let constant = if self.match_token(TokenKind::String) {
            let path = decode_escapes(&self.previous.lexeme);
            let interned = self.vm.intern(&path);
            self.make_constant(Value::Obj(interned))
        } else {
            self.consume(TokenKind::Identifier, "Expect module name or file path after 'import'.");
            let name = self.previous.lexeme.clone();
            self.identifier_constant(&name)
        };
        self.consume(TokenKind::Semicolon, "Expect ';' after import.");
        self.emit_op_byte(OpCode::Import, constant);
        self.emit_op(OpCode::Pop);
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix = match Self::get_rule(self.previous.kind).prefix {
            Some(rule) => rule,
            None => {
                self.error("Expect expression.");
                return;
            }
        };
        // Only the lowest-precedence contexts may be assignment targets.
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= Self::get_rule(self.current.kind).precedence {
            self.advance();
            let infix = Self::get_rule(self.previous.kind).infix.expect("infix rule missing");
            infix(self, can_assign);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn get_rule(kind: TokenKind) -> ParseRule<'src, 'vm> {
        macro_rules! rule {
            ($prefix:expr, $infix:expr, $prec:expr) => {
                ParseRule { prefix: $prefix, infix: $infix, precedence: $prec }
            };
        }
        use Precedence as P;
        use TokenKind::*;
        match kind {
            LeftParen => rule!(Some(Self::grouping), Some(Self::call), P::Call),
            LeftBracket => rule!(Some(Self::list_literal), Some(Self::subscript), P::Call),
            LeftBrace => rule!(Some(Self::dict_literal), None, P::None),
            Dot => rule!(None, Some(Self::dot), P::Call),
            Minus => rule!(Some(Self::unary), Some(Self::binary), P::Term),
            Plus => rule!(None, Some(Self::binary), P::Term),
            Slash | Star | Percent => rule!(None, Some(Self::binary), P::Factor),
            StarStar => rule!(None, Some(Self::binary), P::Indices),
            Amp => rule!(None, Some(Self::binary), P::BitwiseAnd),
            Caret => rule!(None, Some(Self::binary), P::BitwiseXor),
            Pipe => rule!(None, Some(Self::binary), P::BitwiseOr),
            Bang => rule!(Some(Self::unary), None, P::None),
            PlusPlus | MinusMinus => rule!(Some(Self::prefix_op), None, P::None),
            BangEqual | EqualEqual => rule!(None, Some(Self::binary), P::Equality),
            Greater | GreaterEqual | Less | LessEqual => {
                rule!(None, Some(Self::binary), P::Comparison)
            }
            Identifier => rule!(Some(Self::variable), None, P::None),
            String => rule!(Some(Self::string), None, P::None),
            Number => rule!(Some(Self::number), None, P::None),
            And => rule!(None, Some(Self::and_op), P::And),
            Or => rule!(None, Some(Self::or_op), P::Or),
            True | False | Nil => rule!(Some(Self::literal), None, P::None),
            This => rule!(Some(Self::this_op), None, P::None),
            Super => rule!(Some(Self::super_op), None, P::None),
            _ => rule!(None, None, P::None),
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let decoded = decode_escapes(&self.previous.lexeme);
        let interned = self.vm.intern(&decoded);
        self.emit_constant(Value::Obj(interned));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            _ => unreachable!(),
        }
    }

    fn unary(&mut self, _can_assign: bool) {
        let op = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match op {
            TokenKind::Bang => self.emit_op(OpCode::Not),
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let op = self.previous.kind;
        let rule_precedence = Self::get_rule(op).precedence;
        // Exponentiation is the one right-associative binary operator.
        let next = if op == TokenKind::StarStar {
            rule_precedence
        } else {
            rule_precedence.next()
        };
        self.parse_precedence(next);

        match op {
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::Percent => self.emit_op(OpCode::Modulo),
            TokenKind::StarStar => self.emit_op(OpCode::Pow),
            TokenKind::Amp => self.emit_op(OpCode::BitwiseAnd),
            TokenKind::Caret => self.emit_op(OpCode::BitwiseXor),
            TokenKind::Pipe => self.emit_op(OpCode::BitwiseOr),
            _ => unreachable!(),
        }
    }

    fn and_op(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_op(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.clone();
        self.named_variable(name, can_assign);
    }

    /// Compound assignment lowers to read, evaluate, combine, store.
    fn compound_op(kind: TokenKind) -> Option<OpCode> {
        match kind {
            TokenKind::PlusEquals => Some(OpCode::Add),
            TokenKind::MinusEquals => Some(OpCode::Subtract),
            TokenKind::StarEquals => Some(OpCode::Multiply),
            TokenKind::SlashEquals => Some(OpCode::Divide),
            TokenKind::AmpEquals => Some(OpCode::BitwiseAnd),
            TokenKind::CaretEquals => Some(OpCode::BitwiseXor),
            TokenKind::PipeEquals => Some(OpCode::BitwiseOr),
            _ => None,
        }
    }

    fn named_variable(&mut self, name: Token, can_assign: bool) {
        let (get_op, set_op, arg) = self.resolve_variable(&name.lexeme);

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(set_op, arg);
            return;
        }
        if can_assign {
            if let Some(op) = Self::compound_op(self.current.kind) {
                self.advance();
                self.emit_op_byte(get_op, arg);
                self.expression();
                self.emit_op(op);
                self.emit_op_byte(set_op, arg);
                return;
            }
        }
        self.emit_op_byte(get_op, arg);
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_op_byte(OpCode::Call, argc);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                count += 1;
                if count > MAX_ARGUMENTS {
                    self.error("Cannot have more than 255 arguments.");
                }
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count.min(MAX_ARGUMENTS) as u8
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.previous.lexeme.clone();
        let constant = self.identifier_constant(&name);

        if self.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.emit_op_byte(OpCode::Invoke, constant);
            self.emit_byte(argc);
            return;
        }
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(OpCode::SetProperty, constant);
            return;
        }
        if can_assign {
            if let Some(op) = Self::compound_op(self.current.kind) {
                self.advance();
                self.emit_op_byte(OpCode::GetPropertyNoPop, constant);
                self.expression();
                self.emit_op(op);
                self.emit_op_byte(OpCode::SetProperty, constant);
                return;
            }
        }
        self.emit_op_byte(OpCode::GetProperty, constant);
    }

    fn list_literal(&mut self, _can_assign: bool) {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightBracket) {
            loop {
                self.expression();
                count += 1;
                if count > 255 {
                    self.error("Cannot have more than 255 items in a list literal.");
                }
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
                if self.check(TokenKind::RightBracket) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBracket, "Expect ']' after list literal.");
        self.emit_op_byte(OpCode::NewList, count.min(255) as u8);
    }

    fn dict_literal(&mut self, _can_assign: bool) {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightBrace) {
            loop {
                self.expression();
                self.consume(TokenKind::Colon, "Expect ':' after dict key.");
                self.expression();
                count += 1;
                if count > 255 {
                    self.error("Cannot have more than 255 entries in a dict literal.");
                }
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
                if self.check(TokenKind::RightBrace) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after dict literal.");
        self.emit_op_byte(OpCode::NewDict, count.min(255) as u8);
    }

    fn subscript(&mut self, can_assign: bool) {
        // Slice with an elided start: a[:hi] or a[:]
        if self.match_token(TokenKind::Colon) {
            self.emit_op(OpCode::Empty);
            if self.check(TokenKind::RightBracket) {
                self.emit_op(OpCode::Empty);
            } else {
                self.expression();
            }
            self.consume(TokenKind::RightBracket, "Expect ']' after slice.");
            self.emit_op(OpCode::Slice);
            return;
        }

        self.expression();
        if self.match_token(TokenKind::Colon) {
            if self.check(TokenKind::RightBracket) {
                self.emit_op(OpCode::Empty);
            } else {
                self.expression();
            }
            self.consume(TokenKind::RightBracket, "Expect ']' after slice.");
            self.emit_op(OpCode::Slice);
            return;
        }

        self.consume(TokenKind::RightBracket, "Expect ']' after index.");
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(OpCode::SubscriptAssign);
            return;
        }
        if can_assign {
            if let Some(op) = Self::compound_op(self.current.kind) {
                self.advance();
                self.emit_op(OpCode::SubscriptNoPop);
                self.expression();
                self.emit_op(op);
                self.emit_op(OpCode::SubscriptAssign);
                return;
            }
        }
        self.emit_op(OpCode::Subscript);
    }

    /// Prefix `++`/`--`: the target is an identifier or a dotted property
    /// path; subscript targets are not accepted.
    fn prefix_op(&mut self, _can_assign: bool) {
        let op = if self.previous.kind == TokenKind::PlusPlus {
            OpCode::Increment
        } else {
            OpCode::Decrement
        };
        self.consume(TokenKind::Identifier, "Expected a variable or property.");
        let name = self.previous.clone();

        if self.check(TokenKind::Dot) {
            self.named_variable(name, false);
            loop {
                self.advance(); // consume '.'
                self.consume(TokenKind::Identifier, "Expect property name after '.'.");
                let prop = self.previous.lexeme.clone();
                let constant = self.identifier_constant(&prop);
                if self.check(TokenKind::Dot) {
                    self.emit_op_byte(OpCode::GetProperty, constant);
                } else {
                    self.emit_op_byte(OpCode::GetPropertyNoPop, constant);
                    self.emit_op(op);
                    self.emit_op_byte(OpCode::SetProperty, constant);
                    break;
                }
            }
        } else {
            let (get_op, set_op, arg) = self.resolve_variable(&name.lexeme);
            self.emit_op_byte(get_op, arg);
            self.emit_op(op);
            self.emit_op_byte(set_op, arg);
        }
    }

    fn this_op(&mut self, _can_assign: bool) {
        if self.class_compilers.is_empty() {
            self.error("Cannot use 'this' outside of a class.");
            return;
        }
        if self.compiler().kind == FunctionType::Static {
            self.error("Cannot use 'this' inside a static method.");
            return;
        }
        self.named_variable(Token::synthetic("this"), false);
    }

    fn super_op(&mut self, _can_assign: bool) {
        if self.class_compilers.is_empty() {
            self.error("Cannot use 'super' outside of a class.");
        } else if !self.class_compilers.last().unwrap().has_superclass {
            self.error("Cannot use 'super' in a class with no superclass.");
        }
        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.previous.lexeme.clone();
        let constant = self.identifier_constant(&name);

        self.named_variable(Token::synthetic("this"), false);
        if self.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.named_variable(Token::synthetic("super"), false);
            self.emit_op_byte(OpCode::SuperInvoke, constant);
            self.emit_byte(argc);
        } else {
            self.named_variable(Token::synthetic("super"), false);
            self.emit_op_byte(OpCode::GetSuper, constant);
        }
    }
}

/// Decodes the escape sequences the language understands, in place of the
/// raw token text. Unknown backslash sequences pass through literally.
pub fn decode_escapes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('v') => out.push('\u{000B}'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_decoding() {
        assert_eq!(decode_escapes("a\\nb"), "a\nb");
        assert_eq!(decode_escapes("\\t\\r\\v"), "\t\r\u{000B}");
        assert_eq!(decode_escapes("\\'\\\""), "'\"");
        // Unknown sequences keep the backslash.
        assert_eq!(decode_escapes("a\\zb"), "a\\zb");
    }

    #[test]
    fn precedence_ladder_is_ordered() {
        use Precedence::*;
        let ladder = [
            None, Assignment, Or, And, Equality, Comparison, BitwiseOr, BitwiseXor, BitwiseAnd,
            Term, Factor, Indices, Unary, Call, Primary,
        ];
        for pair in ladder.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].next(), pair[1]);
        }
    }
}
