// File: src/natives/numbers.rs
//
// Number type methods.

use crate::value::{format_number, Value};
use crate::vm::Vm;

pub fn register(vm: &mut Vm) {
    super::install_methods(vm, &[("toString", to_string)], |vm| &mut vm.number_methods);
}

fn to_string(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() - 1 != 0 {
        return vm.error(format!("toString() takes 0 arguments ({} given).", args.len() - 1));
    }
    let n = match args[0] {
        Value::Number(n) => n,
        _ => unreachable!("number method on non-number"),
    };
    let rendered = format_number(n);
    vm.intern_value(&rendered)
}
