// File: src/natives/http.rs
//
// The HTTP module: blocking client requests. Network I/O blocks the
// interpreter, like every other native.

use std::time::Duration;

use crate::value::Value;
use crate::vm::Vm;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn import(vm: &mut Vm) {
    super::define_module(vm, "HTTP", &[("get", get), ("post", post)]);
}

fn client(vm: &mut Vm) -> Option<reqwest::blocking::Client> {
    match reqwest::blocking::Client::builder().timeout(REQUEST_TIMEOUT).build() {
        Ok(client) => Some(client),
        Err(e) => {
            vm.error(format!("Unable to create HTTP client ({}).", e));
            None
        }
    }
}

fn get(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return vm.error(format!("get() takes 1 argument ({} given).", args.len()));
    }
    let url = match vm.string_value(args[0]) {
        Some(s) => s.to_string(),
        None => return vm.error("get() URL must be a string."),
    };
    let client = match client(vm) {
        Some(client) => client,
        None => return Value::Empty,
    };
    match client.get(&url).send().and_then(|response| response.text()) {
        Ok(body) => vm.intern_value(&body),
        Err(e) => vm.error(format!("GET {} failed ({}).", url, e)),
    }
}

fn post(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 2 {
        return vm.error(format!("post() takes 2 arguments ({} given).", args.len()));
    }
    let url = match vm.string_value(args[0]) {
        Some(s) => s.to_string(),
        None => return vm.error("post() URL must be a string."),
    };
    let body = match vm.string_value(args[1]) {
        Some(s) => s.to_string(),
        None => return vm.error("post() body must be a string."),
    };
    let client = match client(vm) {
        Some(client) => client,
        None => return Value::Empty,
    };
    match client.post(&url).body(body).send().and_then(|response| response.text()) {
        Ok(text) => vm.intern_value(&text),
        Err(e) => vm.error(format!("POST {} failed ({}).", url, e)),
    }
}
