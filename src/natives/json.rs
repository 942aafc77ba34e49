// File: src/natives/json.rs
//
// The JSON module: parse and stringify through serde_json.

use crate::object::ObjKind;
use crate::table::{hash_value, ValueDict};
use crate::value::{format_number, Value};
use crate::vm::Vm;

pub fn import(vm: &mut Vm) {
    super::define_module(vm, "JSON", &[("parse", parse), ("stringify", stringify)]);
}

fn parse(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return vm.error(format!("parse() takes 1 argument ({} given).", args.len()));
    }
    let source = match vm.string_value(args[0]) {
        Some(s) => s.to_string(),
        None => return vm.error("parse() argument must be a string."),
    };
    match serde_json::from_str::<serde_json::Value>(&source) {
        Ok(parsed) => json_to_value(vm, &parsed),
        Err(e) => vm.error(format!("Invalid JSON ({}).", e)),
    }
}

fn json_to_value(vm: &mut Vm, json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => vm.intern_value(s),
        serde_json::Value::Array(items) => {
            let list = vm.alloc(ObjKind::List(Vec::with_capacity(items.len())));
            vm.gc.protect(Value::Obj(list));
            for item in items {
                let converted = json_to_value(vm, item);
                vm.gc.heap.list_mut(list).push(converted);
            }
            vm.gc.unprotect(1);
            Value::Obj(list)
        }
        serde_json::Value::Object(entries) => {
            let dict = vm.alloc(ObjKind::Dict(ValueDict::new()));
            vm.gc.protect(Value::Obj(dict));
            for (key, value) in entries {
                let key = vm.intern_value(key);
                vm.gc.protect(key);
                let converted = json_to_value(vm, value);
                let hash = hash_value(&vm.gc.heap, key);
                vm.gc.heap.dict_mut(dict).set(key, hash, converted);
                vm.gc.unprotect(1);
            }
            vm.gc.unprotect(1);
            Value::Obj(dict)
        }
    }
}

fn stringify(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return vm.error(format!("stringify() takes 1 argument ({} given).", args.len()));
    }
    match value_to_json(vm, args[0]) {
        Ok(json) => {
            let rendered = json.to_string();
            vm.intern_value(&rendered)
        }
        Err(message) => vm.error(message),
    }
}

fn value_to_json(vm: &Vm, value: Value) -> Result<serde_json::Value, String> {
    match value {
        Value::Nil => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(b)),
        Value::Number(n) => serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .ok_or_else(|| "Cannot represent this number as JSON.".to_string()),
        Value::Obj(r) => match &vm.gc.heap.get(r).kind {
            ObjKind::String(s) => Ok(serde_json::Value::String(s.chars.clone())),
            ObjKind::List(items) => {
                let mut array = Vec::with_capacity(items.len());
                for &item in items {
                    array.push(value_to_json(vm, item)?);
                }
                Ok(serde_json::Value::Array(array))
            }
            ObjKind::Dict(dict) => {
                let mut object = serde_json::Map::new();
                for (key, entry) in dict.entries() {
                    let key = match key {
                        Value::Obj(k) => vm.gc.heap.string(k).chars.clone(),
                        Value::Number(n) => format_number(n),
                        Value::Bool(b) => b.to_string(),
                        Value::Nil => "null".to_string(),
                        Value::Empty => unreachable!("empty cannot key a dict"),
                    };
                    object.insert(key, value_to_json(vm, entry)?);
                }
                Ok(serde_json::Value::Object(object))
            }
            _ => Err(format!(
                "Cannot represent {} as JSON.",
                vm.gc.heap.type_name(value)
            )),
        },
        Value::Empty => Err("Cannot represent this value as JSON.".to_string()),
    }
}
