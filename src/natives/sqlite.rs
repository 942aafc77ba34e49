// File: src/natives/sqlite.rs
//
// The Sqlite module: connect() returns a connection object whose methods
// live in the VM's sqlite method table. SELECT results come back as a list
// of dicts keyed by column name.

use crate::object::{ObjKind, ObjRef, ObjSqlite};
use crate::table::{hash_value, ValueDict};
use crate::value::Value;
use crate::vm::Vm;

pub fn import(vm: &mut Vm) {
    super::define_module(vm, "Sqlite", &[("connect", connect)]);
}

pub fn register_methods(vm: &mut Vm) {
    super::install_methods(
        vm,
        &[("execute", execute), ("close", close)],
        |vm| &mut vm.sqlite_methods,
    );
}

fn connect(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return vm.error(format!("connect() takes 1 argument ({} given).", args.len()));
    }
    let path = match vm.string_value(args[0]) {
        Some(s) => s.to_string(),
        None => return vm.error("connect() path must be a string."),
    };
    match rusqlite::Connection::open(&path) {
        Ok(conn) => Value::Obj(vm.alloc(ObjKind::Sqlite(ObjSqlite { conn: Some(conn) }))),
        Err(e) => vm.error(format!("Unable to open database '{}' ({}).", path, e)),
    }
}

fn receiver(args: &[Value]) -> ObjRef {
    match args[0] {
        Value::Obj(r) => r,
        _ => unreachable!("sqlite method on non-connection"),
    }
}

fn to_sql_param(vm: &Vm, value: Value) -> Result<rusqlite::types::Value, String> {
    Ok(match value {
        Value::Nil => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(i64::from(b)),
        Value::Number(n) => {
            if n.fract() == 0.0 {
                rusqlite::types::Value::Integer(n as i64)
            } else {
                rusqlite::types::Value::Real(n)
            }
        }
        Value::Obj(_) => match vm.string_value(value) {
            Some(s) => rusqlite::types::Value::Text(s.to_string()),
            None => return Err("SQL parameters must be nil, bool, number or string.".to_string()),
        },
        Value::Empty => return Err("SQL parameters must be nil, bool, number or string.".to_string()),
    })
}

fn map_sqlite_value(vm: &mut Vm, value: rusqlite::types::Value) -> Value {
    match value {
        rusqlite::types::Value::Null => Value::Nil,
        rusqlite::types::Value::Integer(n) => Value::Number(n as f64),
        rusqlite::types::Value::Real(n) => Value::Number(n),
        rusqlite::types::Value::Text(text) => vm.intern_value(&text),
        rusqlite::types::Value::Blob(_) => vm.intern_value("[blob]"),
    }
}

fn execute(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() - 1 == 0 || args.len() - 1 > 2 {
        return vm.error(format!("execute() takes 1 or 2 arguments ({} given).", args.len() - 1));
    }
    let sql = match vm.string_value(args[1]) {
        Some(s) => s.to_string(),
        None => return vm.error("execute() query must be a string."),
    };
    let params: Vec<rusqlite::types::Value> = match args.get(2) {
        None => Vec::new(),
        Some(&value) => {
            let items = match value {
                Value::Obj(r) => match &vm.gc.heap.get(r).kind {
                    ObjKind::List(items) => items.clone(),
                    _ => return vm.error("execute() parameters must be a list."),
                },
                _ => return vm.error("execute() parameters must be a list."),
            };
            let mut converted = Vec::with_capacity(items.len());
            for item in items {
                match to_sql_param(vm, item) {
                    Ok(param) => converted.push(param),
                    Err(message) => return vm.error(message),
                }
            }
            converted
        }
    };

    let connection = receiver(args);
    if sql.trim_start().to_ascii_uppercase().starts_with("SELECT") {
        select_query(vm, connection, &sql, params)
    } else {
        let outcome = {
            let conn = match vm.gc.heap.sqlite_mut(connection).conn.as_mut() {
                Some(conn) => conn,
                None => return vm.error("Database connection is closed."),
            };
            conn.execute(&sql, rusqlite::params_from_iter(params))
        };
        match outcome {
            Ok(changed) => Value::Number(changed as f64),
            Err(e) => vm.error(format!("SQL error ({}).", e)),
        }
    }
}

fn select_query(
    vm: &mut Vm,
    connection: ObjRef,
    sql: &str,
    params: Vec<rusqlite::types::Value>,
) -> Value {
    if vm.gc.heap.sqlite_mut(connection).conn.is_none() {
        return vm.error("Database connection is closed.");
    }
    // Pull the full result set out of rusqlite first; building language
    // values allocates, and the statement borrows the connection.
    let rows: Result<(Vec<String>, Vec<Vec<rusqlite::types::Value>>), rusqlite::Error> = (|| {
        let conn = vm.gc.heap.sqlite_mut(connection).conn.as_mut().expect("checked above");
        let mut statement = conn.prepare(sql)?;
        let names: Vec<String> = statement.column_names().iter().map(|s| s.to_string()).collect();
        let count = names.len();
        let mut rows = statement.query(rusqlite::params_from_iter(params))?;
        let mut collected = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(count);
            for column in 0..count {
                values.push(row.get::<_, rusqlite::types::Value>(column)?);
            }
            collected.push(values);
        }
        Ok((names, collected))
    })();

    let (names, rows) = match rows {
        Ok(result) => result,
        Err(e) => return vm.error(format!("SQL error ({}).", e)),
    };

    let list = vm.alloc(ObjKind::List(Vec::with_capacity(rows.len())));
    vm.gc.protect(Value::Obj(list));
    for row in rows {
        let dict = vm.alloc(ObjKind::Dict(ValueDict::new()));
        vm.gc.protect(Value::Obj(dict));
        for (name, value) in names.iter().zip(row) {
            let key = vm.intern_value(name);
            vm.gc.protect(key);
            let converted = map_sqlite_value(vm, value);
            let hash = hash_value(&vm.gc.heap, key);
            vm.gc.heap.dict_mut(dict).set(key, hash, converted);
            vm.gc.unprotect(1);
        }
        vm.gc.heap.list_mut(list).push(Value::Obj(dict));
        vm.gc.unprotect(1);
    }
    vm.gc.unprotect(1);
    Value::Obj(list)
}

fn close(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() - 1 != 0 {
        return vm.error(format!("close() takes 0 arguments ({} given).", args.len() - 1));
    }
    vm.gc.heap.sqlite_mut(receiver(args)).conn = None;
    Value::Nil
}
