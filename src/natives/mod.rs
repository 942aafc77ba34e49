// File: src/natives/mod.rs
//
// Native (built-in) function implementations, one module per concern, and
// the registration hooks that install them: module classes created on
// import, and per-type method tables filled at VM start-up.

pub mod datetime;
pub mod dicts;
pub mod env;
pub mod files;
pub mod globals;
pub mod http;
pub mod json;
pub mod lists;
pub mod math;
pub mod numbers;
pub mod path;
pub mod random;
pub mod socket;
pub mod sqlite;
pub mod strings;
pub mod system;

use crate::object::{NativeFn, ObjClass, ObjKind, ObjNative, ObjRef};
use crate::table::Table;
use crate::value::Value;
use crate::vm::Vm;

/// Importable built-in modules; `import` short-circuits these names.
pub const BUILTIN_MODULES: [&str; 10] = [
    "Math", "Env", "System", "JSON", "Path", "Datetime", "Socket", "Random", "HTTP", "Sqlite",
];

pub fn is_builtin_module(name: &str) -> bool {
    BUILTIN_MODULES.contains(&name)
}

/// Installs the always-available globals and the per-type method tables.
pub fn register_builtins(vm: &mut Vm) {
    globals::register(vm);
    strings::register(vm);
    lists::register(vm);
    dicts::register(vm);
    files::register(vm);
    numbers::register(vm);
    sqlite::register_methods(vm);
    socket::register_methods(vm);
}

/// Registers one built-in module's natives and defines the module object
/// as a global. Called the first time the module is imported.
pub fn import_builtin(vm: &mut Vm, name: &str) {
    match name {
        "Math" => math::import(vm),
        "Env" => env::import(vm),
        "System" => system::import(vm),
        "JSON" => json::import(vm),
        "Path" => path::import(vm),
        "Datetime" => datetime::import(vm),
        "Socket" => socket::import(vm),
        "Random" => random::import(vm),
        "HTTP" => http::import(vm),
        "Sqlite" => sqlite::import(vm),
        _ => unreachable!("unknown builtin module"),
    }
}

fn alloc_native(vm: &mut Vm, name: &'static str, function: NativeFn) -> ObjRef {
    vm.alloc(ObjKind::Native(ObjNative { name, function }))
}

/// Registration hook: installs `(name, fn)` pairs as methods on a fresh
/// module class and defines the class as a global under `name`.
pub fn define_module(vm: &mut Vm, name: &str, natives: &[(&'static str, NativeFn)]) {
    let module_name = vm.intern(name);
    vm.gc.protect(Value::Obj(module_name));
    let class = vm.alloc(ObjKind::Class(ObjClass {
        name: module_name,
        superclass: None,
        methods: Table::new(),
    }));
    vm.gc.protect(Value::Obj(class));

    for &(method_name, function) in natives {
        let native = alloc_native(vm, method_name, function);
        vm.gc.protect(Value::Obj(native));
        let key = vm.intern(method_name);
        let hash = vm.gc.heap.string(key).hash;
        vm.gc.heap.class_mut(class).methods.set(key, hash, Value::Obj(native));
        vm.gc.unprotect(1);
    }

    let hash = vm.gc.heap.string(module_name).hash;
    vm.globals.set(module_name, hash, Value::Obj(class));
    vm.gc.unprotect(2);
}

/// Registration hook for type methods: installs `(name, fn)` pairs into one
/// of the VM's per-type method tables.
pub fn install_methods(
    vm: &mut Vm,
    natives: &[(&'static str, NativeFn)],
    select: fn(&mut Vm) -> &mut Table,
) {
    for &(name, function) in natives {
        let native = alloc_native(vm, name, function);
        vm.gc.protect(Value::Obj(native));
        let key = vm.intern(name);
        let hash = vm.gc.heap.string(key).hash;
        select(vm).set(key, hash, Value::Obj(native));
        vm.gc.unprotect(1);
    }
}

/// Registration hook for global functions.
pub fn install_globals(vm: &mut Vm, natives: &[(&'static str, NativeFn)]) {
    for &(name, function) in natives {
        let native = alloc_native(vm, name, function);
        vm.gc.protect(Value::Obj(native));
        let key = vm.intern(name);
        let hash = vm.gc.heap.string(key).hash;
        vm.globals.set(key, hash, Value::Obj(native));
        vm.gc.unprotect(1);
    }
}
