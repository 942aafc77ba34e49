// File: src/natives/datetime.rs
//
// The Datetime module, backed by chrono.

use chrono::{Local, Utc};

use crate::value::Value;
use crate::vm::Vm;

const DEFAULT_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

pub fn import(vm: &mut Vm) {
    super::define_module(vm, "Datetime", &[("now", now), ("nowUTC", now_utc)]);
}

fn format_arg(vm: &mut Vm, name: &str, args: &[Value]) -> Option<String> {
    match args.len() {
        0 => Some(DEFAULT_FORMAT.to_string()),
        1 => match vm.string_value(args[0]) {
            Some(s) => Some(s.to_string()),
            None => {
                vm.error(format!("{}() format must be a string.", name));
                None
            }
        },
        n => {
            vm.error(format!("{}() takes 0 or 1 arguments ({} given).", name, n));
            None
        }
    }
}

fn now(vm: &mut Vm, args: &[Value]) -> Value {
    match format_arg(vm, "now", args) {
        Some(format) => {
            let rendered = Local::now().format(&format).to_string();
            vm.intern_value(&rendered)
        }
        None => Value::Empty,
    }
}

fn now_utc(vm: &mut Vm, args: &[Value]) -> Value {
    match format_arg(vm, "nowUTC", args) {
        Some(format) => {
            let rendered = Utc::now().format(&format).to_string();
            vm.intern_value(&rendered)
        }
        None => Value::Empty,
    }
}
