// File: src/natives/dicts.rs
//
// Dict type methods. The receiver is args[0]; key validity and equality
// follow the subscript rules.

use crate::object::{ObjKind, ObjRef};
use crate::table::{hash_value, is_valid_key};
use crate::value::Value;
use crate::vm::Vm;

pub fn register(vm: &mut Vm) {
    super::install_methods(
        vm,
        &[
            ("len", len),
            ("get", get),
            ("keys", keys),
            ("exists", exists),
            ("remove", remove),
        ],
        |vm| &mut vm.dict_methods,
    );
}

fn receiver(args: &[Value]) -> ObjRef {
    match args[0] {
        Value::Obj(r) => r,
        _ => unreachable!("dict method on non-dict"),
    }
}

fn valid_key(vm: &mut Vm, name: &str, key: Value) -> bool {
    if is_valid_key(&vm.gc.heap, key) {
        true
    } else {
        vm.error(format!("{}() key must be an immutable type.", name));
        false
    }
}

fn len(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() - 1 != 0 {
        return vm.error(format!("len() takes 0 arguments ({} given).", args.len() - 1));
    }
    Value::Number(vm.gc.heap.dict(receiver(args)).len() as f64)
}

fn get(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() - 1 == 0 || args.len() - 1 > 2 {
        return vm.error(format!("get() takes 1 or 2 arguments ({} given).", args.len() - 1));
    }
    if !valid_key(vm, "get", args[1]) {
        return Value::Empty;
    }
    let fallback = args.get(2).copied().unwrap_or(Value::Nil);
    let hash = hash_value(&vm.gc.heap, args[1]);
    vm.gc.heap.dict(receiver(args)).get(args[1], hash).unwrap_or(fallback)
}

fn keys(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() - 1 != 0 {
        return vm.error(format!("keys() takes 0 arguments ({} given).", args.len() - 1));
    }
    let collected: Vec<Value> =
        vm.gc.heap.dict(receiver(args)).entries().map(|(key, _)| key).collect();
    Value::Obj(vm.alloc(ObjKind::List(collected)))
}

fn exists(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() - 1 != 1 {
        return vm.error(format!("exists() takes 1 argument ({} given).", args.len() - 1));
    }
    if !valid_key(vm, "exists", args[1]) {
        return Value::Empty;
    }
    let hash = hash_value(&vm.gc.heap, args[1]);
    Value::Bool(vm.gc.heap.dict(receiver(args)).get(args[1], hash).is_some())
}

fn remove(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() - 1 != 1 {
        return vm.error(format!("remove() takes 1 argument ({} given).", args.len() - 1));
    }
    if !valid_key(vm, "remove", args[1]) {
        return Value::Empty;
    }
    let hash = hash_value(&vm.gc.heap, args[1]);
    if vm.gc.heap.dict_mut(receiver(args)).delete(args[1], hash) {
        Value::Nil
    } else {
        let rendered = vm.gc.heap.value_to_string(args[1]);
        vm.error(format!("Key '{}' not found in dict.", rendered))
    }
}
