// File: src/natives/globals.rs
//
// Always-available global natives.

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::Value;
use crate::vm::Vm;

pub fn register(vm: &mut Vm) {
    super::install_globals(
        vm,
        &[
            ("print", print),
            ("assert", assert),
            ("type", type_of),
            ("str", str_of),
            ("time", time),
            ("input", input),
        ],
    );
}

fn print(vm: &mut Vm, args: &[Value]) -> Value {
    let rendered: Vec<String> = args.iter().map(|&v| vm.gc.heap.value_to_string(v)).collect();
    println!("{}", rendered.join(" "));
    Value::Nil
}

fn assert(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return vm.error(format!("assert() takes 1 argument ({} given).", args.len()));
    }
    if args[0].is_falsey() {
        return vm.error("assert() was false!");
    }
    Value::Nil
}

fn type_of(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return vm.error(format!("type() takes 1 argument ({} given).", args.len()));
    }
    let name = vm.gc.heap.type_name(args[0]);
    vm.intern_value(name)
}

fn str_of(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return vm.error(format!("str() takes 1 argument ({} given).", args.len()));
    }
    let rendered = vm.gc.heap.value_to_string(args[0]);
    vm.intern_value(&rendered)
}

fn time(vm: &mut Vm, args: &[Value]) -> Value {
    if !args.is_empty() {
        return vm.error(format!("time() takes 0 arguments ({} given).", args.len()));
    }
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Value::Number(seconds)
}

fn input(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() > 1 {
        return vm.error(format!("input() takes 0 or 1 arguments ({} given).", args.len()));
    }
    if let Some(&prompt) = args.first() {
        match vm.string_value(prompt) {
            Some(text) => {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
            None => return vm.error("input() prompt must be a string."),
        }
    }
    let mut line = String::new();
    match std::io::stdin().read_line(&mut line) {
        Ok(0) => Value::Nil,
        Ok(_) => {
            let trimmed = line.trim_end_matches(|c| c == '\n' || c == '\r');
            vm.intern_value(trimmed)
        }
        Err(e) => vm.error(format!("input() failed ({}).", e)),
    }
}
