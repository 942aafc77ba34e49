// File: src/natives/random.rs
//
// The Random module, backed by rand.

use rand::Rng;

use crate::object::ObjKind;
use crate::value::Value;
use crate::vm::Vm;

pub fn import(vm: &mut Vm) {
    super::define_module(vm, "Random", &[("random", random), ("range", range), ("select", select)]);
}

fn random(vm: &mut Vm, args: &[Value]) -> Value {
    if !args.is_empty() {
        return vm.error(format!("random() takes 0 arguments ({} given).", args.len()));
    }
    Value::Number(rand::thread_rng().gen::<f64>())
}

fn range(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 2 {
        return vm.error(format!("range() takes 2 arguments ({} given).", args.len()));
    }
    let (low, high) = match (args[0], args[1]) {
        (Value::Number(a), Value::Number(b)) => (a as i64, b as i64),
        _ => return vm.error("range() arguments must be numbers."),
    };
    if low > high {
        return vm.error("range() lower bound must not exceed the upper bound.");
    }
    Value::Number(rand::thread_rng().gen_range(low..=high) as f64)
}

fn select(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return vm.error(format!("select() takes 1 argument ({} given).", args.len()));
    }
    let items = match args[0] {
        Value::Obj(r) => match &vm.gc.heap.get(r).kind {
            ObjKind::List(items) => items.clone(),
            _ => return vm.error("select() argument must be a list."),
        },
        _ => return vm.error("select() argument must be a list."),
    };
    if items.is_empty() {
        return vm.error("select() on an empty list.");
    }
    items[rand::thread_rng().gen_range(0..items.len())]
}
