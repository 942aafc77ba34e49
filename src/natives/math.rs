// File: src/natives/math.rs
//
// The Math module.

use crate::value::Value;
use crate::vm::Vm;

pub fn import(vm: &mut Vm) {
    super::define_module(
        vm,
        "Math",
        &[
            ("abs", abs),
            ("floor", floor),
            ("ceil", ceil),
            ("round", round),
            ("sqrt", sqrt),
            ("min", min),
            ("max", max),
            ("sum", sum),
            ("average", average),
        ],
    );
}

fn single_number(vm: &mut Vm, name: &str, args: &[Value]) -> Option<f64> {
    if args.len() != 1 {
        vm.error(format!("{}() takes 1 argument ({} given).", name, args.len()));
        return None;
    }
    match args[0] {
        Value::Number(n) => Some(n),
        _ => {
            vm.error(format!("{}() argument must be a number.", name));
            None
        }
    }
}

fn all_numbers(vm: &mut Vm, name: &str, args: &[Value]) -> Option<Vec<f64>> {
    if args.is_empty() {
        vm.error(format!("{}() takes at least 1 argument (0 given).", name));
        return None;
    }
    let mut numbers = Vec::with_capacity(args.len());
    for &value in args {
        match value {
            Value::Number(n) => numbers.push(n),
            _ => {
                vm.error(format!("{}() arguments must be numbers.", name));
                return None;
            }
        }
    }
    Some(numbers)
}

fn abs(vm: &mut Vm, args: &[Value]) -> Value {
    match single_number(vm, "abs", args) {
        Some(n) => Value::Number(n.abs()),
        None => Value::Empty,
    }
}

fn floor(vm: &mut Vm, args: &[Value]) -> Value {
    match single_number(vm, "floor", args) {
        Some(n) => Value::Number(n.floor()),
        None => Value::Empty,
    }
}

fn ceil(vm: &mut Vm, args: &[Value]) -> Value {
    match single_number(vm, "ceil", args) {
        Some(n) => Value::Number(n.ceil()),
        None => Value::Empty,
    }
}

fn round(vm: &mut Vm, args: &[Value]) -> Value {
    match single_number(vm, "round", args) {
        Some(n) => Value::Number(n.round()),
        None => Value::Empty,
    }
}

fn sqrt(vm: &mut Vm, args: &[Value]) -> Value {
    match single_number(vm, "sqrt", args) {
        Some(n) => Value::Number(n.sqrt()),
        None => Value::Empty,
    }
}

fn min(vm: &mut Vm, args: &[Value]) -> Value {
    match all_numbers(vm, "min", args) {
        Some(numbers) => Value::Number(numbers.into_iter().fold(f64::INFINITY, f64::min)),
        None => Value::Empty,
    }
}

fn max(vm: &mut Vm, args: &[Value]) -> Value {
    match all_numbers(vm, "max", args) {
        Some(numbers) => Value::Number(numbers.into_iter().fold(f64::NEG_INFINITY, f64::max)),
        None => Value::Empty,
    }
}

fn sum(vm: &mut Vm, args: &[Value]) -> Value {
    match all_numbers(vm, "sum", args) {
        Some(numbers) => Value::Number(numbers.into_iter().sum()),
        None => Value::Empty,
    }
}

fn average(vm: &mut Vm, args: &[Value]) -> Value {
    match all_numbers(vm, "average", args) {
        Some(numbers) => {
            let count = numbers.len() as f64;
            Value::Number(numbers.into_iter().sum::<f64>() / count)
        }
        None => Value::Empty,
    }
}
