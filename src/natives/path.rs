// File: src/natives/path.rs
//
// The Path module: filesystem path inspection and joining.

use std::path::{Path, PathBuf};

use crate::value::Value;
use crate::vm::Vm;

pub fn import(vm: &mut Vm) {
    super::define_module(
        vm,
        "Path",
        &[
            ("basename", basename),
            ("dirname", dirname),
            ("extname", extname),
            ("exists", exists),
            ("isDir", is_dir),
            ("join", join),
        ],
    );
}

fn path_arg(vm: &mut Vm, name: &str, args: &[Value]) -> Option<String> {
    if args.len() != 1 {
        vm.error(format!("{}() takes 1 argument ({} given).", name, args.len()));
        return None;
    }
    match vm.string_value(args[0]) {
        Some(s) => Some(s.to_string()),
        None => {
            vm.error(format!("{}() argument must be a string.", name));
            None
        }
    }
}

fn basename(vm: &mut Vm, args: &[Value]) -> Value {
    match path_arg(vm, "basename", args) {
        Some(path) => {
            let base = Path::new(&path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            vm.intern_value(&base)
        }
        None => Value::Empty,
    }
}

fn dirname(vm: &mut Vm, args: &[Value]) -> Value {
    match path_arg(vm, "dirname", args) {
        Some(path) => {
            let dir = Path::new(&path)
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            vm.intern_value(&dir)
        }
        None => Value::Empty,
    }
}

fn extname(vm: &mut Vm, args: &[Value]) -> Value {
    match path_arg(vm, "extname", args) {
        Some(path) => {
            let ext = Path::new(&path)
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            vm.intern_value(&ext)
        }
        None => Value::Empty,
    }
}

fn exists(vm: &mut Vm, args: &[Value]) -> Value {
    match path_arg(vm, "exists", args) {
        Some(path) => Value::Bool(Path::new(&path).exists()),
        None => Value::Empty,
    }
}

fn is_dir(vm: &mut Vm, args: &[Value]) -> Value {
    match path_arg(vm, "isDir", args) {
        Some(path) => Value::Bool(Path::new(&path).is_dir()),
        None => Value::Empty,
    }
}

fn join(vm: &mut Vm, args: &[Value]) -> Value {
    if args.is_empty() {
        return vm.error("join() takes at least 1 argument (0 given).");
    }
    let mut joined = PathBuf::new();
    for &value in args {
        match vm.string_value(value) {
            Some(part) => joined.push(part),
            None => return vm.error("join() arguments must be strings."),
        }
    }
    let rendered = joined.to_string_lossy().into_owned();
    vm.intern_value(&rendered)
}
