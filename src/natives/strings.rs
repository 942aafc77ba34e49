// File: src/natives/strings.rs
//
// String type methods. The receiver is args[0]; strings are byte-oriented.

use crate::object::ObjKind;
use crate::value::Value;
use crate::vm::Vm;

pub fn register(vm: &mut Vm) {
    super::install_methods(
        vm,
        &[
            ("len", len),
            ("lower", lower),
            ("upper", upper),
            ("contains", contains),
            ("startsWith", starts_with),
            ("endsWith", ends_with),
            ("trim", trim),
            ("split", split),
            ("replace", replace),
            ("find", find),
            ("toNumber", to_number),
        ],
        |vm| &mut vm.string_methods,
    );
}

fn receiver(vm: &Vm, args: &[Value]) -> String {
    vm.string_value(args[0]).expect("string method on non-string").to_string()
}

fn check_arity(vm: &mut Vm, name: &str, expected: usize, args: &[Value]) -> bool {
    // args[0] is the receiver
    if args.len() - 1 != expected {
        vm.error(format!("{}() takes {} arguments ({} given).", name, expected, args.len() - 1));
        return false;
    }
    true
}

fn string_arg<'a>(vm: &'a mut Vm, name: &str, value: Value) -> Option<String> {
    match vm.string_value(value) {
        Some(s) => Some(s.to_string()),
        None => {
            vm.error(format!("{}() argument must be a string.", name));
            None
        }
    }
}

fn len(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "len", 0, args) {
        return Value::Empty;
    }
    Value::Number(receiver(vm, args).len() as f64)
}

fn lower(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "lower", 0, args) {
        return Value::Empty;
    }
    let lowered = receiver(vm, args).to_lowercase();
    vm.intern_value(&lowered)
}

fn upper(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "upper", 0, args) {
        return Value::Empty;
    }
    let raised = receiver(vm, args).to_uppercase();
    vm.intern_value(&raised)
}

fn contains(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "contains", 1, args) {
        return Value::Empty;
    }
    let needle = match string_arg(vm, "contains", args[1]) {
        Some(s) => s,
        None => return Value::Empty,
    };
    Value::Bool(receiver(vm, args).contains(&needle))
}

fn starts_with(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "startsWith", 1, args) {
        return Value::Empty;
    }
    let prefix = match string_arg(vm, "startsWith", args[1]) {
        Some(s) => s,
        None => return Value::Empty,
    };
    Value::Bool(receiver(vm, args).starts_with(&prefix))
}

fn ends_with(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "endsWith", 1, args) {
        return Value::Empty;
    }
    let suffix = match string_arg(vm, "endsWith", args[1]) {
        Some(s) => s,
        None => return Value::Empty,
    };
    Value::Bool(receiver(vm, args).ends_with(&suffix))
}

fn trim(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "trim", 0, args) {
        return Value::Empty;
    }
    let trimmed = receiver(vm, args).trim().to_string();
    vm.intern_value(&trimmed)
}

fn split(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "split", 1, args) {
        return Value::Empty;
    }
    let separator = match string_arg(vm, "split", args[1]) {
        Some(s) => s,
        None => return Value::Empty,
    };
    if separator.is_empty() {
        return vm.error("split() separator cannot be empty.");
    }
    let source = receiver(vm, args);
    let list = vm.alloc(ObjKind::List(Vec::new()));
    vm.gc.protect(Value::Obj(list));
    for piece in source.split(&separator) {
        let interned = vm.intern(piece);
        vm.gc.heap.list_mut(list).push(Value::Obj(interned));
    }
    vm.gc.unprotect(1);
    Value::Obj(list)
}

fn replace(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "replace", 2, args) {
        return Value::Empty;
    }
    let from = match string_arg(vm, "replace", args[1]) {
        Some(s) => s,
        None => return Value::Empty,
    };
    let to = match string_arg(vm, "replace", args[2]) {
        Some(s) => s,
        None => return Value::Empty,
    };
    if from.is_empty() {
        return vm.error("replace() cannot replace an empty string.");
    }
    let replaced = receiver(vm, args).replace(&from, &to);
    vm.intern_value(&replaced)
}

fn find(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "find", 1, args) {
        return Value::Empty;
    }
    let needle = match string_arg(vm, "find", args[1]) {
        Some(s) => s,
        None => return Value::Empty,
    };
    match receiver(vm, args).find(&needle) {
        Some(index) => Value::Number(index as f64),
        None => Value::Number(-1.0),
    }
}

fn to_number(vm: &mut Vm, args: &[Value]) -> Value {
    if !check_arity(vm, "toNumber", 0, args) {
        return Value::Empty;
    }
    let source = receiver(vm, args);
    match source.trim().parse::<f64>() {
        Ok(n) => Value::Number(n),
        Err(_) => vm.error(format!("Cannot convert '{}' to a number.", source)),
    }
}
