// File: src/errors.rs
//
// Error reporting for Dictu. Compile errors carry the line and offending
// token; runtime errors carry a frame-by-frame stack trace. Rendering goes
// through here so the REPL and the CLI report identically.

use colored::Colorize;

/// Outcome of running a piece of source through the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

impl InterpretResult {
    /// Process exit code for this outcome: 65 for compile errors, 70 for
    /// runtime errors, following the sysexits convention.
    pub fn exit_code(self) -> i32 {
        match self {
            InterpretResult::Ok => 0,
            InterpretResult::CompileError => 65,
            InterpretResult::RuntimeError => 70,
        }
    }
}

/// One frame of a runtime stack trace, innermost first.
pub struct TraceFrame {
    /// Function name, or "script" for the top level.
    pub name: String,
    pub line: u32,
}

/// Reports a compile error. `location` is already formatted: " at end",
/// " at 'token'", or empty for scanner errors.
pub fn report_compile_error(line: u32, location: &str, message: &str) {
    eprintln!("{} {}", format!("[line {}] Error{}:", line, location).red().bold(), message);
}

/// Reports a runtime error with its stack trace, innermost frame first.
pub fn report_runtime_error(message: &str, trace: &[TraceFrame]) {
    eprintln!("{} {}", "Runtime Error:".red().bold(), message.bold());
    for frame in trace {
        let site = if frame.name == "script" {
            "script".to_string()
        } else {
            format!("{}()", frame.name)
        };
        eprintln!("{}", format!("  [line {}] in {}", frame.line, site).bright_blue());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_sysexits() {
        assert_eq!(InterpretResult::Ok.exit_code(), 0);
        assert_eq!(InterpretResult::CompileError.exit_code(), 65);
        assert_eq!(InterpretResult::RuntimeError.exit_code(), 70);
    }
}
