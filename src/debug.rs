// File: src/debug.rs
//
// Bytecode disassembler, enabled with DICTU_PRINT_CODE. Each compiled
// function is dumped once at the end of compilation.

use crate::chunk::{Chunk, OpCode};
use crate::object::Heap;

pub fn print_code_enabled() -> bool {
    std::env::var("DICTU_PRINT_CODE").is_ok()
}

pub fn disassemble_chunk(heap: &Heap, chunk: &Chunk, name: &str) {
    eprintln!("== {} ==", name);
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(heap, chunk, offset);
    }
}

pub fn disassemble_instruction(heap: &Heap, chunk: &Chunk, offset: usize) -> usize {
    eprint!("{:04} ", offset);
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        eprint!("   | ");
    } else {
        eprint!("{:4} ", chunk.lines[offset]);
    }

    use OpCode::*;
    let op = OpCode::from_byte(chunk.code[offset]);
    match op {
        Constant | GetGlobal | DefineGlobal | SetGlobal | GetProperty | GetPropertyNoPop
        | SetProperty | GetSuper | Class | Subclass | Method | Trait | TraitMethod | Import => {
            constant_instruction(heap, chunk, op, offset)
        }
        GetLocal | SetLocal | GetUpvalue | SetUpvalue | Call | NewList | NewDict | CloseFile => {
            byte_instruction(chunk, op, offset)
        }
        Jump | JumpIfFalse | Break => jump_instruction(chunk, op, 1, offset),
        Loop => jump_instruction(chunk, op, -1, offset),
        Invoke | SuperInvoke => invoke_instruction(heap, chunk, op, offset),
        Closure => closure_instruction(heap, chunk, offset),
        _ => {
            eprintln!("{:?}", op);
            offset + 1
        }
    }
}

fn constant_instruction(heap: &Heap, chunk: &Chunk, op: OpCode, offset: usize) -> usize {
    let index = chunk.code[offset + 1] as usize;
    eprintln!("{:?} {} '{}'", op, index, heap.value_to_string(chunk.constants[index]));
    offset + 2
}

fn byte_instruction(chunk: &Chunk, op: OpCode, offset: usize) -> usize {
    eprintln!("{:?} {}", op, chunk.code[offset + 1]);
    offset + 2
}

fn jump_instruction(chunk: &Chunk, op: OpCode, sign: i64, offset: usize) -> usize {
    let jump = u16::from_be_bytes([chunk.code[offset + 1], chunk.code[offset + 2]]) as i64;
    let target = offset as i64 + 3 + sign * jump;
    eprintln!("{:?} {} -> {}", op, offset, target);
    offset + 3
}

fn invoke_instruction(heap: &Heap, chunk: &Chunk, op: OpCode, offset: usize) -> usize {
    let name = chunk.code[offset + 1] as usize;
    let argc = chunk.code[offset + 2];
    eprintln!("{:?} ({} args) '{}'", op, argc, heap.value_to_string(chunk.constants[name]));
    offset + 3
}

fn closure_instruction(heap: &Heap, chunk: &Chunk, offset: usize) -> usize {
    let index = chunk.code[offset + 1] as usize;
    let upvalue_count = chunk.code[offset + 2] as usize;
    eprintln!("Closure {} '{}'", index, heap.value_to_string(chunk.constants[index]));
    let mut cursor = offset + 3;
    for _ in 0..upvalue_count {
        let is_local = chunk.code[cursor] == 1;
        let slot = chunk.code[cursor + 1];
        eprintln!(
            "{:04}    |   {} {}",
            cursor,
            if is_local { "local" } else { "upvalue" },
            slot
        );
        cursor += 2;
    }
    cursor
}
