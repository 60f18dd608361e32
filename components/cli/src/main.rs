//! The `paserati` command-line entry point.

use clap::Parser;
use cli::error::{EXIT_USAGE, SessionError};
use cli::{Session, SessionOptions};
use core_types::Value;
use std::path::Path;

/// TypeScript/JavaScript engine.
#[derive(Parser, Debug)]
#[command(name = "paserati", version, about = "TypeScript/JavaScript engine")]
struct Cli {
    /// Script to execute as a module. With no script, starts a REPL.
    script: Option<String>,

    /// Evaluate an expression and print its value.
    #[arg(short = 'e', long = "eval", value_name = "EXPR")]
    eval: Option<String>,

    /// Print chunk disassembly before executing.
    #[arg(long)]
    bytecode: bool,

    /// Print inline-cache statistics after executing.
    #[arg(long = "cache-stats")]
    cache_stats: bool,

    /// Print the AST before compiling.
    #[arg(long)]
    ast: bool,

    /// Skip the type checker.
    #[arg(long = "no-typecheck")]
    no_typecheck: bool,

    /// Emit JavaScript instead of executing (requires the external emitter).
    #[arg(long)]
    js: bool,

    /// Output path for --js.
    #[arg(short = 'o', value_name = "FILE")]
    out: Option<String>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.js {
        eprintln!("paserati: the JavaScript emitter is not bundled with this binary");
        std::process::exit(EXIT_USAGE);
    }

    let base_dir = cli
        .script
        .as_deref()
        .map(Path::new)
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| ".".into()));

    let mut argv = vec!["paserati".to_string()];
    if let Some(script) = &cli.script {
        argv.push(script.clone());
    }

    let options = SessionOptions {
        typecheck: !cli.no_typecheck,
        ignore_type_errors: cli.no_typecheck,
        print_bytecode: cli.bytecode,
        print_ast: cli.ast,
        argv,
    };
    let mut session = Session::new(base_dir, options);

    let outcome = if let Some(expr) = &cli.eval {
        session.run_expression(expr).map(|value| {
            if !matches!(value, Value::Undefined) {
                println!("{}", builtins::console::format_for_console(&value));
            }
        })
    } else if let Some(script) = &cli.script {
        let file_name = Path::new(script)
            .file_name()
            .map(|n| format!("./{}", n.to_string_lossy()))
            .unwrap_or_else(|| script.clone());
        session.run_file(&file_name).map(|_| ())
    } else {
        match cli::repl::run_repl(&mut session) {
            Ok(()) => Ok(()),
            Err(e) => Err(e),
        }
    };

    if cli.cache_stats {
        print!("{}", session.cache_stats_report());
    }

    match outcome {
        Ok(()) => {}
        Err(SessionError::Exit(code)) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(e.exit_code());
        }
    }
}
