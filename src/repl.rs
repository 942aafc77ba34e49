// File: src/repl.rs
//
// Interactive REPL for Dictu. Keeps one VM alive across inputs, supports
// multi-line entry while delimiters are unclosed, and echoes the value of
// expression statements.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::vm::Vm;

pub struct Repl {
    vm: Vm,
    editor: DefaultEditor,
}

impl Repl {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let editor = DefaultEditor::new()?;
        Ok(Repl { vm: Vm::new(true), editor })
    }

    fn show_banner(&self) {
        println!("{}", format!("Dictu {}", env!("CARGO_PKG_VERSION")).bright_cyan());
        println!("{}", "Press Ctrl+D to exit.".bright_blue());
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.show_banner();

        let mut buffer = String::new();
        loop {
            let prompt = if buffer.is_empty() {
                ">>> ".bright_green().to_string()
            } else {
                "... ".bright_blue().to_string()
            };

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let _ = self.editor.add_history_entry(line.as_str());
                    buffer.push_str(&line);
                    buffer.push('\n');
                    if is_input_complete(&buffer) {
                        // Errors were already reported; the REPL carries on.
                        self.vm.interpret(&buffer);
                        buffer.clear();
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    buffer.clear();
                }
                Err(ReadlineError::Eof) => break,
                Err(e) => {
                    eprintln!("{} {}", "Error:".bright_red(), e);
                    break;
                }
            }
        }
        Ok(())
    }
}

/// A line is submitted once every delimiter opened outside a string has
/// been closed again.
fn is_input_complete(buffer: &str) -> bool {
    let mut depth: i32 = 0;
    let mut string_quote: Option<char> = None;
    let mut escaped = false;
    let mut comment = false;
    let mut previous = '\0';

    for c in buffer.chars() {
        if comment {
            if c == '\n' {
                comment = false;
            }
            previous = c;
            continue;
        }
        if let Some(quote) = string_quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                string_quote = None;
            }
            previous = c;
            continue;
        }
        match c {
            '"' | '\'' => string_quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '/' if previous == '/' => comment = true,
            _ => {}
        }
        previous = c;
    }

    depth <= 0 && string_quote.is_none()
}

#[cfg(test)]
mod tests {
    use super::is_input_complete;

    #[test]
    fn balanced_input_is_complete() {
        assert!(is_input_complete("var x = 1;\n"));
        assert!(is_input_complete("def f() { return 1; }\n"));
    }

    #[test]
    fn open_delimiters_continue() {
        assert!(!is_input_complete("def f() {\n"));
        assert!(!is_input_complete("var l = [1, 2,\n"));
        assert!(!is_input_complete("f(\n"));
    }

    #[test]
    fn braces_inside_strings_do_not_count() {
        assert!(is_input_complete("var s = \"{\";\n"));
        assert!(is_input_complete("var s = '}';\n"));
    }

    #[test]
    fn comments_hide_delimiters() {
        assert!(is_input_complete("var x = 1; // {\n"));
    }
}
