// File: src/vm.rs
//
// The bytecode virtual machine: a stack machine with call frames, a sorted
// open-upvalue list, method and trait dispatch, imports with run-once
// caching, and REPL-aware expression statements. The VM owns the garbage
// collector and drives collections with the full root set in view.

use crate::chunk::OpCode;
use crate::compiler;
use crate::errors::{report_runtime_error, InterpretResult, TraceFrame};
use crate::natives;
use crate::gc::Gc;
use crate::object::{ObjClosure, ObjFile, ObjInstance, ObjKind, ObjRef, ObjUpvalue};
use crate::table::{hash_value, is_valid_key, Table, ValueDict};
use crate::value::Value;
use std::fs::OpenOptions;

pub const MAX_FRAMES: usize = 64;

struct CallFrame {
    closure: ObjRef,
    /// The closure's function, cached to keep dispatch to one hop.
    function: ObjRef,
    ip: usize,
    base: usize,
    arg_count: usize,
}

pub struct Vm {
    pub gc: Gc,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    /// Open upvalues ordered by stack slot, highest first.
    open_upvalues: Vec<ObjRef>,
    pub globals: Table,
    /// Path or module name -> run-once sentinel.
    modules: Table,
    pub string_methods: Table,
    pub list_methods: Table,
    pub dict_methods: Table,
    pub file_methods: Table,
    pub number_methods: Table,
    pub sqlite_methods: Table,
    pub socket_methods: Table,
    init_string: ObjRef,
    pub repl: bool,
    native_error: Option<String>,
}

impl Vm {
    pub fn new(repl: bool) -> Vm {
        let mut gc = Gc::new();
        let init_string = gc.intern("init");
        let mut vm = Vm {
            gc,
            stack: Vec::with_capacity(MAX_FRAMES * 256),
            frames: Vec::with_capacity(MAX_FRAMES),
            open_upvalues: Vec::new(),
            globals: Table::new(),
            modules: Table::new(),
            string_methods: Table::new(),
            list_methods: Table::new(),
            dict_methods: Table::new(),
            file_methods: Table::new(),
            number_methods: Table::new(),
            sqlite_methods: Table::new(),
            socket_methods: Table::new(),
            init_string,
            repl,
            native_error: None,
        };
        natives::register_builtins(&mut vm);
        vm
    }

    /// Forces a collection before every allocation; the observable result
    /// of any program must not change.
    pub fn set_stress_gc(&mut self, stress: bool) {
        self.gc.set_stress(stress);
    }

    // ------------------------------------------------------------------
    // Allocation and GC driving
    // ------------------------------------------------------------------

    /// All allocation funnels through here so a collection can run first,
    /// while every live object is still reachable from the roots.
    pub fn alloc(&mut self, kind: ObjKind) -> ObjRef {
        if self.gc.wants_collection() {
            self.collect_garbage();
        }
        self.gc.allocate(kind)
    }

    pub fn intern(&mut self, chars: &str) -> ObjRef {
        if self.gc.wants_collection() {
            self.collect_garbage();
        }
        self.gc.intern(chars)
    }

    fn collect_garbage(&mut self) {
        for i in 0..self.stack.len() {
            let value = self.stack[i];
            self.gc.mark_value(value);
        }
        for i in 0..self.frames.len() {
            let closure = self.frames[i].closure;
            self.gc.mark_object(closure);
        }
        for i in 0..self.open_upvalues.len() {
            let upvalue = self.open_upvalues[i];
            self.gc.mark_object(upvalue);
        }
        self.gc.mark_table(&self.globals);
        self.gc.mark_table(&self.modules);
        self.gc.mark_table(&self.string_methods);
        self.gc.mark_table(&self.list_methods);
        self.gc.mark_table(&self.dict_methods);
        self.gc.mark_table(&self.file_methods);
        self.gc.mark_table(&self.number_methods);
        self.gc.mark_table(&self.sqlite_methods);
        self.gc.mark_table(&self.socket_methods);
        self.gc.mark_object(self.init_string);
        self.gc.finish_collection();
    }

    /// Hook for natives: records a runtime error and returns the sentinel
    /// the VM recognises on the native's return.
    pub fn error(&mut self, message: impl Into<String>) -> Value {
        self.native_error = Some(message.into());
        Value::Empty
    }

    // ------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------

    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let function = match compiler::compile(self, source) {
            Some(function) => function,
            None => return InterpretResult::CompileError,
        };
        let closure = self.closure_for(function);
        self.stack.push(Value::Obj(closure));
        if let Err(message) = self.call_closure(closure, 0) {
            self.runtime_error(&message);
            return InterpretResult::RuntimeError;
        }
        self.run()
    }

    fn closure_for(&mut self, function: ObjRef) -> ObjRef {
        self.gc.protect(Value::Obj(function));
        let closure = self.alloc(ObjKind::Closure(ObjClosure { function, upvalues: Vec::new() }));
        self.gc.unprotect(1);
        closure
    }

    // ------------------------------------------------------------------
    // Stack and frame helpers
    // ------------------------------------------------------------------

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("value stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("no active frame");
        let byte = self.gc.heap.function(frame.function).chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_short(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo])
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let function = self.frames.last().expect("no active frame").function;
        self.gc.heap.function(function).chunk.constants[index]
    }

    fn read_string(&mut self) -> ObjRef {
        match self.read_constant() {
            Value::Obj(r) => r,
            _ => unreachable!("constant is not a string"),
        }
    }

    fn string_hash(&self, r: ObjRef) -> u32 {
        self.gc.heap.string(r).hash
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    /// Prints the message with a frame-by-frame trace and unwinds
    /// everything, returning control to the host loop.
    fn runtime_error(&mut self, message: &str) {
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let function = self.gc.heap.function(frame.function);
            let line = function.chunk.lines[frame.ip.saturating_sub(1).min(
                function.chunk.lines.len().saturating_sub(1),
            )];
            let name = match function.name {
                Some(n) => self.gc.heap.string(n).chars.clone(),
                None => "script".to_string(),
            };
            trace.push(TraceFrame { name, line });
        }
        report_runtime_error(message, &trace);
        self.reset_stack();
    }

    // ------------------------------------------------------------------
    // Calls and method dispatch
    // ------------------------------------------------------------------

    fn call_closure(&mut self, closure: ObjRef, argc: usize) -> Result<(), String> {
        let function = self.gc.heap.closure(closure).function;
        let (arity, arity_optional) = {
            let f = self.gc.heap.function(function);
            (f.arity as usize, f.arity_optional as usize)
        };
        let total = arity + arity_optional;
        if argc < arity || argc > total {
            if arity_optional > 0 {
                return Err(format!(
                    "Expected {} to {} arguments but got {}.",
                    arity, total, argc
                ));
            }
            return Err(format!("Expected {} arguments but got {}.", arity, argc));
        }
        if self.frames.len() >= MAX_FRAMES {
            return Err("Stack overflow.".to_string());
        }
        let base = self.stack.len() - argc - 1;
        // Missing optional slots are padded now; the prologue's shuffle
        // overwrites them with the evaluated defaults.
        for _ in argc..total {
            self.push(Value::Nil);
        }
        self.frames.push(CallFrame { closure, function, ip: 0, base, arg_count: argc });
        Ok(())
    }

    fn call_native(&mut self, native: ObjRef, argc: usize, with_receiver: bool) -> Result<(), String> {
        let function = match &self.gc.heap.get(native).kind {
            ObjKind::Native(n) => n.function,
            _ => unreachable!("callee is not a native"),
        };
        let arg_start = self.stack.len() - argc - usize::from(with_receiver);
        let args: Vec<Value> = self.stack[arg_start..].to_vec();
        let result = function(self, &args);
        if let Some(message) = self.native_error.take() {
            return Err(message);
        }
        // Arguments and callee (or receiver) are replaced by the result.
        let new_len = self.stack.len() - argc - 1;
        self.stack.truncate(new_len);
        self.push(result);
        Ok(())
    }

    fn call_value(&mut self, callee: Value, argc: usize) -> Result<(), String> {
        if let Value::Obj(r) = callee {
            enum Callee {
                Closure,
                Native,
                Class,
                Bound(Value, ObjRef),
            }
            let kind = match &self.gc.heap.get(r).kind {
                ObjKind::Closure(_) => Callee::Closure,
                ObjKind::Native(_) => Callee::Native,
                ObjKind::Class(_) => Callee::Class,
                ObjKind::BoundMethod(b) => Callee::Bound(b.receiver, b.method),
                _ => return Err("Can only call functions and classes.".to_string()),
            };
            return match kind {
                Callee::Closure => self.call_closure(r, argc),
                Callee::Native => self.call_native(r, argc, false),
                Callee::Class => self.instantiate(r, argc),
                Callee::Bound(receiver, method) => {
                    let slot = self.stack.len() - argc - 1;
                    self.stack[slot] = receiver;
                    self.call_closure(method, argc)
                }
            };
        }
        Err("Can only call functions and classes.".to_string())
    }

    fn instantiate(&mut self, class: ObjRef, argc: usize) -> Result<(), String> {
        let instance =
            self.alloc(ObjKind::Instance(ObjInstance { class, fields: Table::new() }));
        let slot = self.stack.len() - argc - 1;
        self.stack[slot] = Value::Obj(instance);

        let init_hash = self.string_hash(self.init_string);
        let initializer = self.gc.heap.class(class).methods.get(self.init_string, init_hash);
        match initializer {
            Some(Value::Obj(method)) => self.call_closure(method, argc),
            _ if argc != 0 => Err(format!("Expected 0 arguments but got {}.", argc)),
            _ => Ok(()),
        }
    }

    fn invoke(&mut self, name: ObjRef, argc: usize) -> Result<(), String> {
        let receiver = self.peek(argc);
        let hash = self.string_hash(name);

        if let Value::Number(_) = receiver {
            let method = self.number_methods.get(name, hash);
            return self.call_type_method(method, name, argc);
        }
        let r = match receiver {
            Value::Obj(r) => r,
            _ => {
                return Err(format!(
                    "'{}' has no methods.",
                    self.gc.heap.type_name(receiver)
                ))
            }
        };

        match &self.gc.heap.get(r).kind {
            ObjKind::Instance(_) => {
                let field = {
                    let instance = self.gc.heap.instance(r);
                    instance.fields.get(name, hash)
                };
                if let Some(value) = field {
                    // An instance field shadows methods; it may hold any
                    // callable.
                    let slot = self.stack.len() - argc - 1;
                    self.stack[slot] = value;
                    return self.call_value(value, argc);
                }
                let class = self.gc.heap.instance(r).class;
                self.invoke_from_class(class, name, argc)
            }
            ObjKind::Class(_) => {
                let method = self.gc.heap.class(r).methods.get(name, hash);
                match method {
                    Some(Value::Obj(m)) => match &self.gc.heap.get(m).kind {
                        ObjKind::Closure(_) => self.call_closure(m, argc),
                        ObjKind::Native(_) => self.call_native(m, argc, false),
                        _ => Err("Can only call functions and classes.".to_string()),
                    },
                    _ => Err(format!(
                        "Undefined property '{}'.",
                        self.gc.heap.string(name).chars
                    )),
                }
            }
            ObjKind::String(_) => {
                let method = self.string_methods.get(name, hash);
                self.call_type_method(method, name, argc)
            }
            ObjKind::List(_) => {
                let method = self.list_methods.get(name, hash);
                self.call_type_method(method, name, argc)
            }
            ObjKind::Dict(_) => {
                let method = self.dict_methods.get(name, hash);
                self.call_type_method(method, name, argc)
            }
            ObjKind::File(_) => {
                let method = self.file_methods.get(name, hash);
                self.call_type_method(method, name, argc)
            }
            ObjKind::Sqlite(_) => {
                let method = self.sqlite_methods.get(name, hash);
                self.call_type_method(method, name, argc)
            }
            ObjKind::Socket(_) => {
                let method = self.socket_methods.get(name, hash);
                self.call_type_method(method, name, argc)
            }
            _ => Err(format!(
                "'{}' has no methods.",
                self.gc.heap.type_name(receiver)
            )),
        }
    }

    fn call_type_method(
        &mut self,
        method: Option<Value>,
        name: ObjRef,
        argc: usize,
    ) -> Result<(), String> {
        match method {
            Some(Value::Obj(native)) => self.call_native(native, argc, true),
            _ => Err(format!(
                "Undefined method '{}' on {}.",
                self.gc.heap.string(name).chars,
                self.gc.heap.type_name(self.peek(argc))
            )),
        }
    }

    fn invoke_from_class(&mut self, class: ObjRef, name: ObjRef, argc: usize) -> Result<(), String> {
        if !matches!(self.gc.heap.get(class).kind, ObjKind::Class(_)) {
            return Err("Superclass must be a class.".to_string());
        }
        let hash = self.string_hash(name);
        let method = self.gc.heap.class(class).methods.get(name, hash);
        match method {
            Some(Value::Obj(m)) => match &self.gc.heap.get(m).kind {
                ObjKind::Closure(_) => self.call_closure(m, argc),
                ObjKind::Native(_) => self.call_native(m, argc, true),
                _ => Err("Can only call functions and classes.".to_string()),
            },
            _ => Err(format!(
                "Undefined property '{}'.",
                self.gc.heap.string(name).chars
            )),
        }
    }

    /// Resolves `name` on `class` and replaces the receiver on top of the
    /// stack with the bound result.
    fn bind_method(&mut self, class: ObjRef, name: ObjRef) -> Result<(), String> {
        if !matches!(self.gc.heap.get(class).kind, ObjKind::Class(_)) {
            return Err("Only classes have methods.".to_string());
        }
        let hash = self.string_hash(name);
        let method = self.gc.heap.class(class).methods.get(name, hash);
        match method {
            Some(Value::Obj(m))
                if matches!(self.gc.heap.get(m).kind, ObjKind::Native(_)) =>
            {
                self.pop();
                self.push(Value::Obj(m));
                Ok(())
            }
            Some(Value::Obj(m)) => {
                let bound = self.alloc(ObjKind::BoundMethod(crate::object::ObjBoundMethod {
                    receiver: self.peek(0),
                    method: m,
                }));
                self.pop();
                self.push(Value::Obj(bound));
                Ok(())
            }
            _ => Err(format!(
                "Undefined property '{}'.",
                self.gc.heap.string(name).chars
            )),
        }
    }

    // ------------------------------------------------------------------
    // Upvalues
    // ------------------------------------------------------------------

    fn open_slot(&self, upvalue: ObjRef) -> usize {
        match self.gc.heap.upvalue(upvalue) {
            ObjUpvalue::Open(slot) => *slot,
            ObjUpvalue::Closed(_) => unreachable!("closed upvalue in open list"),
        }
    }

    /// Reuses an existing open upvalue for `slot` or inserts a new one,
    /// keeping the list sorted by slot, highest first.
    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let mut index = 0;
        while index < self.open_upvalues.len() {
            let existing = self.open_slot(self.open_upvalues[index]);
            if existing == slot {
                return self.open_upvalues[index];
            }
            if existing < slot {
                break;
            }
            index += 1;
        }
        let created = self.alloc(ObjKind::Upvalue(ObjUpvalue::Open(slot)));
        self.open_upvalues.insert(index, created);
        created
    }

    /// Closes every open upvalue at `from` or above: the stack value moves
    /// into the upvalue object and the entry leaves the list.
    fn close_upvalues(&mut self, from: usize) {
        while let Some(&first) = self.open_upvalues.first() {
            let slot = self.open_slot(first);
            if slot < from {
                break;
            }
            let value = self.stack[slot];
            *self.gc.heap.upvalue_mut(first) = ObjUpvalue::Closed(value);
            self.open_upvalues.remove(0);
        }
    }

    // ------------------------------------------------------------------
    // Imports
    // ------------------------------------------------------------------

    fn import_module(&mut self, name_ref: ObjRef) -> Result<(), String> {
        let hash = self.string_hash(name_ref);
        if self.modules.get(name_ref, hash).is_some() {
            // Already executed (or registered); import is a no-op.
            self.push(Value::Nil);
            return Ok(());
        }
        let name = self.gc.heap.string(name_ref).chars.clone();

        if natives::is_builtin_module(&name) {
            natives::import_builtin(self, &name);
            self.modules.set(name_ref, hash, Value::Nil);
            self.push(Value::Nil);
            return Ok(());
        }

        let source = std::fs::read_to_string(&name)
            .map_err(|e| format!("Unable to open file \"{}\" ({}).", name, e))?;
        // Cache before executing so recursive imports terminate.
        self.modules.set(name_ref, hash, Value::Nil);
        let function = compiler::compile(self, &source)
            .ok_or_else(|| format!("Could not compile \"{}\".", name))?;
        let closure = self.closure_for(function);
        self.push(Value::Obj(closure));
        self.call_closure(closure, 0)
    }

    // ------------------------------------------------------------------
    // Operand helpers
    // ------------------------------------------------------------------

    fn binary_number_op(&mut self, name: &str, op: fn(f64, f64) -> f64) -> Result<(), String> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(op(a, b)));
                Ok(())
            }
            (a, b) => Err(format!(
                "Unsupported operand types for '{}': {} and {}.",
                name,
                self.gc.heap.type_name(a),
                self.gc.heap.type_name(b)
            )),
        }
    }

    fn binary_compare_op(&mut self, name: &str, op: fn(f64, f64) -> bool) -> Result<(), String> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Bool(op(a, b)));
                Ok(())
            }
            (a, b) => Err(format!(
                "Unsupported operand types for '{}': {} and {}.",
                name,
                self.gc.heap.type_name(a),
                self.gc.heap.type_name(b)
            )),
        }
    }

    fn binary_bitwise_op(&mut self, name: &str, op: fn(i64, i64) -> i64) -> Result<(), String> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(op(a as i64, b as i64) as f64));
                Ok(())
            }
            (a, b) => Err(format!(
                "Unsupported operand types for '{}': {} and {}.",
                name,
                self.gc.heap.type_name(a),
                self.gc.heap.type_name(b)
            )),
        }
    }

    fn add_values(&mut self) -> Result<(), String> {
        let b = self.peek(0);
        let a = self.peek(1);
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(x + y));
                return Ok(());
            }
            (Value::Obj(ra), Value::Obj(rb)) => {
                let kinds = (&self.gc.heap.get(ra).kind, &self.gc.heap.get(rb).kind);
                match kinds {
                    (ObjKind::String(left), ObjKind::String(right)) => {
                        let combined = format!("{}{}", left.chars, right.chars);
                        let interned = self.intern(&combined);
                        self.pop();
                        self.pop();
                        self.push(Value::Obj(interned));
                        return Ok(());
                    }
                    (ObjKind::List(left), ObjKind::List(right)) => {
                        let mut merged = left.clone();
                        merged.extend_from_slice(right);
                        let list = self.alloc(ObjKind::List(merged));
                        self.pop();
                        self.pop();
                        self.push(Value::Obj(list));
                        return Ok(());
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        Err(format!(
            "Unsupported operand types for '+': {} and {}.",
            self.gc.heap.type_name(a),
            self.gc.heap.type_name(b)
        ))
    }

    fn subscript_read(&mut self, target: Value, index: Value) -> Result<Value, String> {
        let r = match target {
            Value::Obj(r) => r,
            _ => {
                return Err(format!(
                    "'{}' is not subscriptable.",
                    self.gc.heap.type_name(target)
                ))
            }
        };
        match &self.gc.heap.get(r).kind {
            ObjKind::List(items) => {
                let n = index
                    .as_number()
                    .ok_or_else(|| "List index must be a number.".to_string())?;
                let i = normalize_index(items.len(), n)
                    .ok_or_else(|| "List index out of bounds.".to_string())?;
                Ok(items[i])
            }
            ObjKind::String(s) => {
                let n = index
                    .as_number()
                    .ok_or_else(|| "String index must be a number.".to_string())?;
                let i = normalize_index(s.chars.len(), n)
                    .ok_or_else(|| "String index out of bounds.".to_string())?;
                // Byte-oriented, like len(); indexing never splits the
                // string at anything other than byte boundaries.
                let one = String::from_utf8_lossy(&s.chars.as_bytes()[i..i + 1]).into_owned();
                let interned = self.intern(&one);
                Ok(Value::Obj(interned))
            }
            ObjKind::Dict(dict) => {
                if !is_valid_key(&self.gc.heap, index) {
                    return Err("Dictionary key must be an immutable type.".to_string());
                }
                let hash = hash_value(&self.gc.heap, index);
                dict.get(index, hash).ok_or_else(|| {
                    format!("Key '{}' not found in dict.", self.gc.heap.value_to_string(index))
                })
            }
            _ => Err(format!(
                "'{}' is not subscriptable.",
                self.gc.heap.type_name(target)
            )),
        }
    }

    fn slice_values(&mut self) -> Result<(), String> {
        let hi = self.peek(0);
        let lo = self.peek(1);
        let target = self.peek(2);
        let r = match target {
            Value::Obj(r) => r,
            _ => {
                return Err(format!(
                    "'{}' cannot be sliced.",
                    self.gc.heap.type_name(target)
                ))
            }
        };
        let len = match &self.gc.heap.get(r).kind {
            ObjKind::List(items) => items.len(),
            ObjKind::String(s) => s.chars.len(),
            _ => {
                return Err(format!(
                    "'{}' cannot be sliced.",
                    self.gc.heap.type_name(target)
                ))
            }
        };
        let start = slice_bound(len, lo, 0)?;
        let end = slice_bound(len, hi, len)?;
        let (start, end) = if start > end { (start, start) } else { (start, end) };

        let result = match &self.gc.heap.get(r).kind {
            ObjKind::List(items) => {
                let slice = items[start..end].to_vec();
                Value::Obj(self.alloc(ObjKind::List(slice)))
            }
            ObjKind::String(s) => {
                let slice = String::from_utf8_lossy(&s.chars.as_bytes()[start..end]).into_owned();
                Value::Obj(self.intern(&slice))
            }
            _ => unreachable!(),
        };
        self.pop();
        self.pop();
        self.pop();
        self.push(result);
        Ok(())
    }

    // ------------------------------------------------------------------
    // The interpreter loop
    // ------------------------------------------------------------------

    fn run(&mut self) -> InterpretResult {
        macro_rules! fail {
            ($self:ident, $msg:expr) => {{
                $self.runtime_error(&$msg);
                return InterpretResult::RuntimeError;
            }};
        }
        macro_rules! try_op {
            ($self:ident, $result:expr) => {
                if let Err(message) = $result {
                    fail!($self, message);
                }
            };
        }

        loop {
            let op = OpCode::from_byte(self.read_byte());
            match op {
                OpCode::Constant => {
                    let constant = self.read_constant();
                    self.push(constant);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Empty => self.push(Value::Empty),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::PopRepl => {
                    let value = self.pop();
                    println!("{}", self.gc.heap.value_to_string(value));
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().expect("no active frame").base;
                    let value = self.stack[base + slot];
                    self.push(value);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().expect("no active frame").base;
                    self.stack[base + slot] = self.peek(0);
                }
                OpCode::GetGlobal => {
                    let name = self.read_string();
                    let hash = self.string_hash(name);
                    match self.globals.get(name, hash) {
                        Some(value) => self.push(value),
                        None => fail!(
                            self,
                            format!("Undefined variable '{}'.", self.gc.heap.string(name).chars)
                        ),
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let hash = self.string_hash(name);
                    let value = self.peek(0);
                    self.globals.set(name, hash, value);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let hash = self.string_hash(name);
                    let value = self.peek(0);
                    if self.globals.set(name, hash, value) {
                        self.globals.delete(name, hash);
                        fail!(
                            self,
                            format!("Undefined variable '{}'.", self.gc.heap.string(name).chars)
                        );
                    }
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.frames.last().expect("no active frame").closure;
                    let upvalue = self.gc.heap.closure(closure).upvalues[slot];
                    let value = match self.gc.heap.upvalue(upvalue) {
                        ObjUpvalue::Open(stack_slot) => self.stack[*stack_slot],
                        ObjUpvalue::Closed(value) => *value,
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.frames.last().expect("no active frame").closure;
                    let upvalue = self.gc.heap.closure(closure).upvalues[slot];
                    let value = self.peek(0);
                    match self.gc.heap.upvalue_mut(upvalue) {
                        ObjUpvalue::Open(stack_slot) => {
                            let stack_slot = *stack_slot;
                            self.stack[stack_slot] = value;
                        }
                        closed => *closed = ObjUpvalue::Closed(value),
                    }
                }
                OpCode::GetProperty | OpCode::GetPropertyNoPop => {
                    let name = self.read_string();
                    let hash = self.string_hash(name);
                    let receiver = self.peek(0);
                    let r = match receiver {
                        Value::Obj(r) => r,
                        _ => fail!(
                            self,
                            format!(
                                "'{}' has no properties.",
                                self.gc.heap.type_name(receiver)
                            )
                        ),
                    };
                    match &self.gc.heap.get(r).kind {
                        ObjKind::Instance(_) => {
                            let field = self.gc.heap.instance(r).fields.get(name, hash);
                            if let Some(value) = field {
                                if op == OpCode::GetProperty {
                                    self.pop();
                                }
                                self.push(value);
                            } else if op == OpCode::GetProperty {
                                let class = self.gc.heap.instance(r).class;
                                try_op!(self, self.bind_method(class, name));
                            } else {
                                fail!(
                                    self,
                                    format!(
                                        "Undefined property '{}'.",
                                        self.gc.heap.string(name).chars
                                    )
                                );
                            }
                        }
                        ObjKind::Class(_) if op == OpCode::GetProperty => {
                            try_op!(self, self.bind_method(r, name));
                        }
                        _ => fail!(
                            self,
                            format!(
                                "'{}' has no properties.",
                                self.gc.heap.type_name(receiver)
                            )
                        ),
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_string();
                    let hash = self.string_hash(name);
                    let target = self.peek(1);
                    match target {
                        Value::Obj(r)
                            if matches!(self.gc.heap.get(r).kind, ObjKind::Instance(_)) =>
                        {
                            let value = self.peek(0);
                            self.gc.heap.instance_mut(r).fields.set(name, hash, value);
                            let value = self.pop();
                            self.pop();
                            self.push(value);
                        }
                        _ => fail!(
                            self,
                            format!(
                                "'{}' has no fields to assign.",
                                self.gc.heap.type_name(target)
                            )
                        ),
                    }
                }
                OpCode::GetSuper => {
                    let name = self.read_string();
                    let superclass = match self.pop() {
                        Value::Obj(r) => r,
                        _ => fail!(self, "Superclass must be a class.".to_string()),
                    };
                    try_op!(self, self.bind_method(superclass, name));
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => try_op!(self, self.binary_compare_op(">", |a, b| a > b)),
                OpCode::Less => try_op!(self, self.binary_compare_op("<", |a, b| a < b)),
                OpCode::Add => try_op!(self, self.add_values()),
                OpCode::Subtract => try_op!(self, self.binary_number_op("-", |a, b| a - b)),
                OpCode::Multiply => try_op!(self, self.binary_number_op("*", |a, b| a * b)),
                OpCode::Divide => try_op!(self, self.binary_number_op("/", |a, b| a / b)),
                OpCode::Modulo => try_op!(self, self.binary_number_op("%", |a, b| a % b)),
                OpCode::Pow => try_op!(self, self.binary_number_op("**", f64::powf)),
                OpCode::BitwiseAnd => try_op!(self, self.binary_bitwise_op("&", |a, b| a & b)),
                OpCode::BitwiseXor => try_op!(self, self.binary_bitwise_op("^", |a, b| a ^ b)),
                OpCode::BitwiseOr => try_op!(self, self.binary_bitwise_op("|", |a, b| a | b)),
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Negate => match self.peek(0) {
                    Value::Number(n) => {
                        self.pop();
                        self.push(Value::Number(-n));
                    }
                    value => fail!(
                        self,
                        format!("Cannot negate {}.", self.gc.heap.type_name(value))
                    ),
                },
                OpCode::Increment => match self.peek(0) {
                    Value::Number(n) => {
                        self.pop();
                        self.push(Value::Number(n + 1.0));
                    }
                    value => fail!(
                        self,
                        format!("Cannot increment {}.", self.gc.heap.type_name(value))
                    ),
                },
                OpCode::Decrement => match self.peek(0) {
                    Value::Number(n) => {
                        self.pop();
                        self.push(Value::Number(n - 1.0));
                    }
                    value => fail!(
                        self,
                        format!("Cannot decrement {}.", self.gc.heap.type_name(value))
                    ),
                },
                OpCode::Jump => {
                    let offset = self.read_short() as usize;
                    self.frames.last_mut().expect("no active frame").ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short() as usize;
                    if self.peek(0).is_falsey() {
                        self.frames.last_mut().expect("no active frame").ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short() as usize;
                    self.frames.last_mut().expect("no active frame").ip -= offset;
                }
                OpCode::Break => {
                    unreachable!("unpatched break placeholder reached the VM")
                }
                OpCode::Call => {
                    let argc = self.read_byte() as usize;
                    let callee = self.peek(argc);
                    try_op!(self, self.call_value(callee, argc));
                }
                OpCode::Invoke => {
                    let name = self.read_string();
                    let argc = self.read_byte() as usize;
                    try_op!(self, self.invoke(name, argc));
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string();
                    let argc = self.read_byte() as usize;
                    let superclass = match self.pop() {
                        Value::Obj(r) => r,
                        _ => fail!(self, "Superclass must be a class.".to_string()),
                    };
                    try_op!(self, self.invoke_from_class(superclass, name, argc));
                }
                OpCode::Closure => {
                    let function = match self.read_constant() {
                        Value::Obj(r) => r,
                        _ => unreachable!("closure constant is not a function"),
                    };
                    let upvalue_count = self.read_byte() as usize;
                    let closure = self.alloc(ObjKind::Closure(ObjClosure {
                        function,
                        upvalues: Vec::with_capacity(upvalue_count),
                    }));
                    self.push(Value::Obj(closure));
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() == 1;
                        let index = self.read_byte() as usize;
                        let upvalue = if is_local {
                            let base = self.frames.last().expect("no active frame").base;
                            self.capture_upvalue(base + index)
                        } else {
                            let enclosing = self.frames.last().expect("no active frame").closure;
                            self.gc.heap.closure(enclosing).upvalues[index]
                        };
                        self.gc.heap.closure_mut(closure).upvalues.push(upvalue);
                    }
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let base = self.frames.last().expect("no active frame").base;
                    self.close_upvalues(base);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        self.pop();
                        return InterpretResult::Ok;
                    }
                    self.stack.truncate(base);
                    self.push(result);
                }
                OpCode::DefineOptional => {
                    let frame = self.frames.last().expect("no active frame");
                    let base = frame.base;
                    let argc = frame.arg_count;
                    let (arity, total) = {
                        let f = self.gc.heap.function(frame.function);
                        (f.arity as usize, f.arity as usize + f.arity_optional as usize)
                    };
                    // Defaults were just evaluated above the padded
                    // parameter slots; install the missing tail.
                    let defaults_start = base + 1 + total;
                    for slot in argc..total {
                        self.stack[base + 1 + slot] =
                            self.stack[defaults_start + (slot - arity)];
                    }
                    self.stack.truncate(defaults_start);
                }
                OpCode::Class => {
                    let name = self.read_string();
                    let class = self.alloc(ObjKind::Class(crate::object::ObjClass {
                        name,
                        superclass: None,
                        methods: Table::new(),
                    }));
                    self.push(Value::Obj(class));
                }
                OpCode::Subclass => {
                    let name = self.read_string();
                    let superclass = match self.peek(0) {
                        Value::Obj(r)
                            if matches!(self.gc.heap.get(r).kind, ObjKind::Class(_)) =>
                        {
                            r
                        }
                        _ => fail!(self, "Superclass must be a class.".to_string()),
                    };
                    let class = self.alloc(ObjKind::Class(crate::object::ObjClass {
                        name,
                        superclass: Some(superclass),
                        methods: Table::new(),
                    }));
                    // Inherited methods are installed first so the class's
                    // own definitions override them.
                    let methods = self.gc.heap.class(superclass).methods.clone();
                    self.gc.heap.class_mut(class).methods = methods;
                    self.pop();
                    self.push(Value::Obj(class));
                }
                OpCode::Method => {
                    let name = self.read_string();
                    let hash = self.string_hash(name);
                    let method = self.peek(0);
                    let class = match self.peek(1) {
                        Value::Obj(r) => r,
                        _ => unreachable!("method target is not a class"),
                    };
                    self.gc.heap.class_mut(class).methods.set(name, hash, method);
                    self.pop();
                }
                OpCode::Trait => {
                    let name = self.read_string();
                    let trait_obj = self.alloc(ObjKind::Trait(crate::object::ObjTrait {
                        name,
                        methods: Table::new(),
                    }));
                    self.push(Value::Obj(trait_obj));
                }
                OpCode::TraitMethod => {
                    let name = self.read_string();
                    let hash = self.string_hash(name);
                    let method = self.peek(0);
                    let trait_obj = match self.peek(1) {
                        Value::Obj(r) => r,
                        _ => unreachable!("trait method target is not a trait"),
                    };
                    match &mut self.gc.heap.get_mut(trait_obj).kind {
                        ObjKind::Trait(t) => {
                            t.methods.set(name, hash, method);
                        }
                        _ => unreachable!("trait method target is not a trait"),
                    }
                    self.pop();
                }
                OpCode::UseTrait => {
                    let trait_ref = match self.peek(0) {
                        Value::Obj(r)
                            if matches!(self.gc.heap.get(r).kind, ObjKind::Trait(_)) =>
                        {
                            r
                        }
                        value => fail!(
                            self,
                            format!("Can only use traits, got {}.", self.gc.heap.type_name(value))
                        ),
                    };
                    let class = match self.peek(1) {
                        Value::Obj(r) => r,
                        _ => unreachable!("use target is not a class"),
                    };
                    let methods = self.gc.heap.trait_obj(trait_ref).methods.clone();
                    methods.add_all_into(&mut self.gc.heap.class_mut(class).methods);
                    self.pop();
                }
                OpCode::NewList => {
                    let count = self.read_byte() as usize;
                    let start = self.stack.len() - count;
                    let items = self.stack[start..].to_vec();
                    let list = self.alloc(ObjKind::List(items));
                    self.stack.truncate(start);
                    self.push(Value::Obj(list));
                }
                OpCode::NewDict => {
                    let count = self.read_byte() as usize;
                    let start = self.stack.len() - count * 2;
                    let mut dict = ValueDict::new();
                    for pair in 0..count {
                        let key = self.stack[start + pair * 2];
                        let value = self.stack[start + pair * 2 + 1];
                        if !is_valid_key(&self.gc.heap, key) {
                            fail!(self, "Dictionary key must be an immutable type.".to_string());
                        }
                        let hash = hash_value(&self.gc.heap, key);
                        dict.set(key, hash, value);
                    }
                    let dict = self.alloc(ObjKind::Dict(dict));
                    self.stack.truncate(start);
                    self.push(Value::Obj(dict));
                }
                OpCode::Subscript => {
                    let index = self.peek(0);
                    let target = self.peek(1);
                    match self.subscript_read(target, index) {
                        Ok(value) => {
                            self.pop();
                            self.pop();
                            self.push(value);
                        }
                        Err(message) => fail!(self, message),
                    }
                }
                OpCode::SubscriptNoPop => {
                    let index = self.peek(0);
                    let target = self.peek(1);
                    match self.subscript_read(target, index) {
                        Ok(value) => self.push(value),
                        Err(message) => fail!(self, message),
                    }
                }
                OpCode::SubscriptAssign => {
                    let value = self.peek(0);
                    let index = self.peek(1);
                    let target = self.peek(2);
                    let r = match target {
                        Value::Obj(r) => r,
                        _ => fail!(
                            self,
                            format!(
                                "'{}' does not support item assignment.",
                                self.gc.heap.type_name(target)
                            )
                        ),
                    };
                    enum Target {
                        List(usize),
                        Dict,
                        Other,
                    }
                    let target_kind = match &self.gc.heap.get(r).kind {
                        ObjKind::List(items) => {
                            let n = match index.as_number() {
                                Some(n) => n,
                                None => fail!(self, "List index must be a number.".to_string()),
                            };
                            match normalize_index(items.len(), n) {
                                Some(i) => Target::List(i),
                                None => fail!(self, "List index out of bounds.".to_string()),
                            }
                        }
                        ObjKind::Dict(_) => Target::Dict,
                        ObjKind::String(_) => {
                            fail!(self, "Strings are immutable.".to_string())
                        }
                        _ => Target::Other,
                    };
                    match target_kind {
                        Target::List(i) => {
                            self.gc.heap.list_mut(r)[i] = value;
                        }
                        Target::Dict => {
                            if !is_valid_key(&self.gc.heap, index) {
                                fail!(
                                    self,
                                    "Dictionary key must be an immutable type.".to_string()
                                );
                            }
                            let hash = hash_value(&self.gc.heap, index);
                            self.gc.heap.dict_mut(r).set(index, hash, value);
                        }
                        Target::Other => fail!(
                            self,
                            format!(
                                "'{}' does not support item assignment.",
                                self.gc.heap.type_name(target)
                            )
                        ),
                    }
                    self.pop();
                    self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::Slice => try_op!(self, self.slice_values()),
                OpCode::Import => {
                    let name = self.read_string();
                    try_op!(self, self.import_module(name));
                }
                OpCode::OpenFile => {
                    let mode_value = self.peek(0);
                    let path_value = self.peek(1);
                    let (path, mode) = match (path_value, mode_value) {
                        (Value::Obj(p), Value::Obj(m)) => {
                            match (&self.gc.heap.get(p).kind, &self.gc.heap.get(m).kind) {
                                (ObjKind::String(p), ObjKind::String(m)) => {
                                    (p.chars.clone(), m.chars.clone())
                                }
                                _ => fail!(
                                    self,
                                    "File path and mode must be strings.".to_string()
                                ),
                            }
                        }
                        _ => fail!(self, "File path and mode must be strings.".to_string()),
                    };
                    let handle = match open_file(&path, &mode) {
                        Ok(handle) => handle,
                        Err(message) => fail!(self, message),
                    };
                    let file = self.alloc(ObjKind::File(ObjFile {
                        path,
                        mode,
                        handle: Some(handle),
                    }));
                    self.pop();
                    self.pop();
                    self.push(Value::Obj(file));
                }
                OpCode::CloseFile => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().expect("no active frame").base;
                    if let Value::Obj(r) = self.stack[base + slot] {
                        if matches!(self.gc.heap.get(r).kind, ObjKind::File(_)) {
                            self.gc.heap.file_mut(r).handle = None;
                        }
                    }
                }
            }
        }
    }
}

/// Resolves a possibly negative index against `len`; negative indices count
/// from the end.
fn normalize_index(len: usize, n: f64) -> Option<usize> {
    let mut index = n as i64;
    if index < 0 {
        index += len as i64;
    }
    if index < 0 || index >= len as i64 {
        None
    } else {
        Some(index as usize)
    }
}

/// A slice bound: the empty sentinel means "default", numbers clamp into
/// range, counting from the end when negative.
fn slice_bound(len: usize, value: Value, default: usize) -> Result<usize, String> {
    match value {
        Value::Empty => Ok(default),
        Value::Number(n) => {
            let mut index = n as i64;
            if index < 0 {
                index += len as i64;
            }
            Ok(index.clamp(0, len as i64) as usize)
        }
        _ => Err("Slice index must be a number.".to_string()),
    }
}

fn open_file(path: &str, mode: &str) -> Result<std::fs::File, String> {
    let result = match mode.trim_end_matches('b') {
        "r" => OpenOptions::new().read(true).open(path),
        "r+" => OpenOptions::new().read(true).write(true).open(path),
        "w" => OpenOptions::new().write(true).create(true).truncate(true).open(path),
        "a" => OpenOptions::new().append(true).create(true).open(path),
        _ => return Err(format!("Invalid file mode '{}'.", mode)),
    };
    result.map_err(|e| format!("Unable to open file '{}' ({}).", path, e))
}

// Strings are interned through Vm::intern; the helpers below exist so
// native modules can build and inspect strings without reaching into the
// allocator directly.
impl Vm {
    pub fn intern_value(&mut self, chars: &str) -> Value {
        let interned = self.intern(chars);
        Value::Obj(interned)
    }

    pub fn string_value(&self, value: Value) -> Option<&str> {
        if let Value::Obj(r) = value {
            if let ObjKind::String(s) = &self.gc.heap.get(r).kind {
                return Some(&s.chars);
            }
        }
        None
    }
}
