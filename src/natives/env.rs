// File: src/natives/env.rs
//
// The Env module: process environment access.

use crate::value::Value;
use crate::vm::Vm;

pub fn import(vm: &mut Vm) {
    super::define_module(vm, "Env", &[("get", get), ("set", set)]);
}

fn get(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return vm.error(format!("get() takes 1 argument ({} given).", args.len()));
    }
    let name = match vm.string_value(args[0]) {
        Some(s) => s.to_string(),
        None => return vm.error("get() argument must be a string."),
    };
    match std::env::var(&name) {
        Ok(value) => vm.intern_value(&value),
        Err(_) => Value::Nil,
    }
}

fn set(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 2 {
        return vm.error(format!("set() takes 2 arguments ({} given).", args.len()));
    }
    let name = match vm.string_value(args[0]) {
        Some(s) => s.to_string(),
        None => return vm.error("set() variable name must be a string."),
    };
    match args[1] {
        Value::Nil => std::env::remove_var(&name),
        value => match vm.string_value(value) {
            Some(s) => std::env::set_var(&name, s),
            None => return vm.error("set() value must be a string or nil."),
        },
    }
    Value::Nil
}
