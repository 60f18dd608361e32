//! REPL (Read-Eval-Print Loop).

use crate::error::{SessionError, SessionResult};
use crate::session::Session;
use builtins::console::format_for_console;
use core_types::Value;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// Runs the interactive REPL over a session until the user exits.
pub fn run_repl(session: &mut Session) -> SessionResult<()> {
    let mut editor = DefaultEditor::new()
        .map_err(|e| SessionError::Repl(format!("failed to initialize editor: {}", e)))?;

    println!("paserati v{}", env!("CARGO_PKG_VERSION"));
    println!("Type TypeScript/JavaScript, or '.help' for commands.");
    println!();

    let mut buffer = String::new();
    let mut continuing = false;

    loop {
        let prompt = if continuing { "... " } else { "> " };
        match editor.readline(prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if !continuing && (trimmed == "exit" || trimmed == ".exit" || trimmed == "quit") {
                    break;
                }
                if !continuing && trimmed.starts_with('.') {
                    handle_command(trimmed, session);
                    continue;
                }

                if continuing {
                    buffer.push('\n');
                }
                buffer.push_str(&line);

                if !is_input_complete(&buffer) {
                    continuing = true;
                    continue;
                }
                continuing = false;
                let _ = editor.add_history_entry(&buffer);

                // Imports switch the input into module mode.
                let result = if looks_like_module(&buffer) {
                    session.run_module_source(&buffer)
                } else {
                    session.run_expression(&buffer)
                };
                match result {
                    Ok(Value::Undefined) => {}
                    Ok(value) => println!("{}", format_for_console(&value)),
                    Err(SessionError::Exit(code)) => std::process::exit(code),
                    Err(e) => eprintln!("{}", e),
                }
                buffer.clear();
            }
            Err(ReadlineError::Interrupted) => {
                if continuing {
                    println!("^C");
                    buffer.clear();
                    continuing = false;
                } else {
                    println!("Press Ctrl-D or type 'exit' to quit");
                }
            }
            Err(ReadlineError::Eof) => {
                println!();
                break;
            }
            Err(e) => {
                return Err(SessionError::Repl(format!("readline: {}", e)));
            }
        }
    }
    Ok(())
}

fn handle_command(command: &str, session: &mut Session) {
    match command {
        ".help" => {
            println!("REPL commands:");
            println!("  .help     Show this help");
            println!("  .clear    Clear the screen");
            println!("  .cache    Show inline-cache statistics");
            println!("  .exit     Exit");
        }
        ".clear" => {
            print!("\x1B[2J\x1B[1;1H");
        }
        ".cache" => {
            print!("{}", session.cache_stats_report());
        }
        _ => {
            println!("Unknown command: {}", command);
            println!("Type .help for available commands");
        }
    }
}

/// True when the input starts a module: an import or export declaration at
/// the top level.
fn looks_like_module(input: &str) -> bool {
    input.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed.starts_with("import ")
            || trimmed.starts_with("import\"")
            || trimmed.starts_with("import'")
            || trimmed.starts_with("export ")
    })
}

/// Balanced-bracket heuristic for multiline input.
fn is_input_complete(input: &str) -> bool {
    let mut braces = 0i32;
    let mut brackets = 0i32;
    let mut parens = 0i32;
    let mut in_string = false;
    let mut quote = ' ';
    let mut escaped = false;

    for c in input.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' && in_string {
            escaped = true;
            continue;
        }
        if in_string {
            if c == quote {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                in_string = true;
                quote = c;
            }
            '{' => braces += 1,
            '}' => braces -= 1,
            '[' => brackets += 1,
            ']' => brackets -= 1,
            '(' => parens += 1,
            ')' => parens -= 1,
            _ => {}
        }
    }
    braces <= 0 && brackets <= 0 && parens <= 0 && !in_string
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_complete_simple() {
        assert!(is_input_complete("let x = 1;"));
        assert!(is_input_complete("f(1, 2)"));
    }

    #[test]
    fn test_input_incomplete_brackets() {
        assert!(!is_input_complete("function f() {"));
        assert!(!is_input_complete("let a = [1, 2,"));
        assert!(!is_input_complete("f(1,"));
    }

    #[test]
    fn test_input_strings_hide_brackets() {
        assert!(is_input_complete(r#"let s = "{[(";"#));
        assert!(!is_input_complete(r#"let s = "unterminated"#));
    }

    #[test]
    fn test_module_detection() {
        assert!(looks_like_module("import { x } from \"./a\";"));
        assert!(looks_like_module("export const y = 1;"));
        assert!(!looks_like_module("let importCount = 1;"));
    }
}
