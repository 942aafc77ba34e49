// File: src/natives/lists.rs
//
// List type methods. The receiver is args[0].

use crate::object::ObjRef;
use crate::value::Value;
use crate::vm::Vm;

pub fn register(vm: &mut Vm) {
    super::install_methods(
        vm,
        &[
            ("len", len),
            ("push", push),
            ("pop", pop),
            ("insert", insert),
            ("remove", remove),
            ("contains", contains),
            ("join", join),
        ],
        |vm| &mut vm.list_methods,
    );
}

fn receiver(args: &[Value]) -> ObjRef {
    match args[0] {
        Value::Obj(r) => r,
        _ => unreachable!("list method on non-list"),
    }
}

fn check_arity(vm: &mut Vm, name: &str, expected: usize, args: &[Value]) -> bool {
    if args.len() - 1 != expected {
        vm.error(format!("{}() takes {} arguments ({} given).", name, expected, args.len() - 1));
        return false;
    }
    true
}

fn len(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "len", 0, args) {
        return Value::Empty;
    }
    Value::Number(vm.gc.heap.list(receiver(args)).len() as f64)
}

fn push(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "push", 1, args) {
        return Value::Empty;
    }
    vm.gc.heap.list_mut(receiver(args)).push(args[1]);
    Value::Nil
}

fn pop(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "pop", 0, args) {
        return Value::Empty;
    }
    match vm.gc.heap.list_mut(receiver(args)).pop() {
        Some(value) => value,
        None => vm.error("pop() on an empty list."),
    }
}

fn insert(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "insert", 2, args) {
        return Value::Empty;
    }
    let index = match args[1] {
        Value::Number(n) => n as i64,
        _ => return vm.error("insert() index must be a number."),
    };
    let list = receiver(args);
    let length = vm.gc.heap.list(list).len() as i64;
    if index < 0 || index > length {
        return vm.error("insert() index out of bounds.");
    }
    vm.gc.heap.list_mut(list).insert(index as usize, args[2]);
    Value::Nil
}

fn remove(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "remove", 1, args) {
        return Value::Empty;
    }
    let list = receiver(args);
    let position = vm.gc.heap.list(list).iter().position(|&v| v == args[1]);
    match position {
        Some(index) => {
            vm.gc.heap.list_mut(list).remove(index);
            Value::Nil
        }
        None => vm.error("Value not found in list."),
    }
}

fn contains(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "contains", 1, args) {
        return Value::Empty;
    }
    let found = vm.gc.heap.list(receiver(args)).iter().any(|&v| v == args[1]);
    Value::Bool(found)
}

fn join(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() - 1 > 1 {
        return vm.error(format!("join() takes 0 or 1 arguments ({} given).", args.len() - 1));
    }
    let separator = match args.get(1) {
        Some(&value) => match vm.string_value(value) {
            Some(s) => s.to_string(),
            None => return vm.error("join() separator must be a string."),
        },
        None => ", ".to_string(),
    };
    let rendered: Vec<String> = vm
        .gc
        .heap
        .list(receiver(args))
        .iter()
        .map(|&v| vm.gc.heap.value_to_string(v))
        .collect();
    vm.intern_value(&rendered.join(&separator))
}
