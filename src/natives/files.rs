// File: src/natives/files.rs
//
// File type methods. The receiver is args[0] and holds an open OS handle
// until close() or the end of the enclosing `with` block.

use std::io::{Read, Write};

use crate::object::{ObjKind, ObjRef};
use crate::value::Value;
use crate::vm::Vm;

pub fn register(vm: &mut Vm) {
    super::install_methods(
        vm,
        &[
            ("read", read),
            ("readLine", read_line),
            ("write", write),
            ("writeLine", write_line),
            ("close", close),
        ],
        |vm| &mut vm.file_methods,
    );
}

fn receiver(args: &[Value]) -> ObjRef {
    match args[0] {
        Value::Obj(r) => r,
        _ => unreachable!("file method on non-file"),
    }
}

fn check_arity(vm: &mut Vm, name: &str, expected: usize, args: &[Value]) -> bool {
    if args.len() - 1 != expected {
        vm.error(format!("{}() takes {} arguments ({} given).", name, expected, args.len() - 1));
        return false;
    }
    true
}

fn read(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "read", 0, args) {
        return Value::Empty;
    }
    let file = receiver(args);
    let mut contents = String::new();
    let outcome = match vm.gc.heap.file_mut(file).handle.as_mut() {
        Some(handle) => handle.read_to_string(&mut contents),
        None => return vm.error("File is closed."),
    };
    match outcome {
        Ok(_) => vm.intern_value(&contents),
        Err(e) => vm.error(format!("Unable to read file ({}).", e)),
    }
}

fn read_line(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "readLine", 0, args) {
        return Value::Empty;
    }
    let file = receiver(args);
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let outcome = match vm.gc.heap.file_mut(file).handle.as_mut() {
            Some(handle) => handle.read(&mut byte),
            None => return vm.error("File is closed."),
        };
        match outcome {
            Ok(0) => {
                if line.is_empty() {
                    return Value::Nil;
                }
                break;
            }
            Ok(_) => {
                if byte[0] == b'\n' {
                    break;
                }
                line.push(byte[0]);
            }
            Err(e) => return vm.error(format!("Unable to read file ({}).", e)),
        }
    }
    let line = String::from_utf8_lossy(&line).into_owned();
    vm.intern_value(line.trim_end_matches('\r'))
}

fn write(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "write", 1, args) {
        return Value::Empty;
    }
    let contents = match vm.string_value(args[1]) {
        Some(s) => s.to_string(),
        None => return vm.error("write() argument must be a string."),
    };
    let file = receiver(args);
    let outcome = match vm.gc.heap.file_mut(file).handle.as_mut() {
        Some(handle) => handle.write(contents.as_bytes()),
        None => return vm.error("File is closed."),
    };
    match outcome {
        Ok(written) => Value::Number(written as f64),
        Err(e) => vm.error(format!("Unable to write to file ({}).", e)),
    }
}

fn write_line(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "writeLine", 1, args) {
        return Value::Empty;
    }
    let contents = match vm.string_value(args[1]) {
        Some(s) => format!("{}\n", s),
        None => return vm.error("writeLine() argument must be a string."),
    };
    let file = receiver(args);
    let outcome = match vm.gc.heap.file_mut(file).handle.as_mut() {
        Some(handle) => handle.write_all(contents.as_bytes()),
        None => return vm.error("File is closed."),
    };
    match outcome {
        Ok(()) => Value::Nil,
        Err(e) => vm.error(format!("Unable to write to file ({}).", e)),
    }
}

fn close(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "close", 0, args) {
        return Value::Empty;
    }
    let file = receiver(args);
    if matches!(vm.gc.heap.get(file).kind, ObjKind::File(_)) {
        vm.gc.heap.file_mut(file).handle = None;
    }
    Value::Nil
}
