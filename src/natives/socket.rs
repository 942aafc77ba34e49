// File: src/natives/socket.rs
//
// The Socket module: blocking TCP client sockets over std::net.

use std::io::{Read, Write};
use std::net::TcpStream;

use crate::object::{ObjKind, ObjRef, ObjSocket};
use crate::value::Value;
use crate::vm::Vm;

pub fn import(vm: &mut Vm) {
    super::define_module(vm, "Socket", &[("connect", connect)]);
}

pub fn register_methods(vm: &mut Vm) {
    super::install_methods(
        vm,
        &[("write", write), ("recv", recv), ("close", close)],
        |vm| &mut vm.socket_methods,
    );
}

fn connect(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 2 {
        return vm.error(format!("connect() takes 2 arguments ({} given).", args.len()));
    }
    let host = match vm.string_value(args[0]) {
        Some(s) => s.to_string(),
        None => return vm.error("connect() host must be a string."),
    };
    let port = match args[1] {
        Value::Number(n) if n >= 0.0 && n <= 65535.0 => n as u16,
        _ => return vm.error("connect() port must be a number between 0 and 65535."),
    };
    match TcpStream::connect((host.as_str(), port)) {
        Ok(stream) => Value::Obj(vm.alloc(ObjKind::Socket(ObjSocket { stream: Some(stream) }))),
        Err(e) => vm.error(format!("Unable to connect to {}:{} ({}).", host, port, e)),
    }
}

fn receiver(args: &[Value]) -> ObjRef {
    match args[0] {
        Value::Obj(r) => r,
        _ => unreachable!("socket method on non-socket"),
    }
}

fn write(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() - 1 != 1 {
        return vm.error(format!("write() takes 1 argument ({} given).", args.len() - 1));
    }
    let contents = match vm.string_value(args[1]) {
        Some(s) => s.to_string(),
        None => return vm.error("write() argument must be a string."),
    };
    let socket = receiver(args);
    let outcome = match vm.gc.heap.socket_mut(socket).stream.as_mut() {
        Some(stream) => stream.write(contents.as_bytes()),
        None => return vm.error("Socket is closed."),
    };
    match outcome {
        Ok(written) => Value::Number(written as f64),
        Err(e) => vm.error(format!("Unable to write to socket ({}).", e)),
    }
}

fn recv(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() - 1 != 1 {
        return vm.error(format!("recv() takes 1 argument ({} given).", args.len() - 1));
    }
    let size = match args[1] {
        Value::Number(n) if n > 0.0 => n as usize,
        _ => return vm.error("recv() size must be a positive number."),
    };
    let socket = receiver(args);
    let mut buffer = vec![0u8; size];
    let outcome = match vm.gc.heap.socket_mut(socket).stream.as_mut() {
        Some(stream) => stream.read(&mut buffer),
        None => return vm.error("Socket is closed."),
    };
    match outcome {
        Ok(read) => {
            let text = String::from_utf8_lossy(&buffer[..read]).into_owned();
            vm.intern_value(&text)
        }
        Err(e) => vm.error(format!("Unable to read from socket ({}).", e)),
    }
}

fn close(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() - 1 != 0 {
        return vm.error(format!("close() takes 0 arguments ({} given).", args.len() - 1));
    }
    vm.gc.heap.socket_mut(receiver(args)).stream = None;
    Value::Nil
}
