// File: src/natives/system.rs
//
// The System module: clocks, sleeping and process exit.

use once_cell::sync::Lazy;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::value::Value;
use crate::vm::Vm;

static START: Lazy<Instant> = Lazy::new(Instant::now);

pub fn import(vm: &mut Vm) {
    // Touch the start instant so clock() measures from first import at the
    // latest.
    Lazy::force(&START);
    super::define_module(
        vm,
        "System",
        &[("time", time), ("clock", clock), ("sleep", sleep), ("exit", exit)],
    );
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

fn clock(vm: &mut Vm, args: &[Value]) -> Value {
    if !args.is_empty() {
        return vm.error(format!("clock() takes 0 arguments ({} given).", args.len()));
    }
    Value::Number(START.elapsed().as_secs_f64())
}

fn sleep(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return vm.error(format!("sleep() takes 1 argument ({} given).", args.len()));
    }
    match args[0] {
        Value::Number(seconds) if seconds >= 0.0 => {
            std::thread::sleep(Duration::from_secs_f64(seconds));
            Value::Nil
        }
        _ => vm.error("sleep() argument must be a non-negative number."),
    }
}

fn exit(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() > 1 {
        return vm.error(format!("exit() takes 0 or 1 arguments ({} given).", args.len()));
    }
    let code = match args.first() {
        Some(Value::Number(n)) => *n as i32,
        None => 0,
        _ => return vm.error("exit() argument must be a number."),
    };
    std::process::exit(code);
}
