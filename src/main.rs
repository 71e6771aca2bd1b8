use clap::Parser;
use std::io::Read;
use std::sync::Arc;

use mlld::env::EvalConfig;
use mlld::services::RealFs;
use mlld::{Interpreter, InterpreterOptions};

#[derive(Parser)]
#[command(name = "mlld")]
#[command(about = "Interpreter for mlld document templates")]
#[command(version)]
struct Cli {
    /// Evaluate the source from the command line argument
    #[arg(short = 'c')]
    source: Option<String>,

    /// Working directory for commands and relative imports
    #[arg(long = "cwd")]
    cwd: Option<String>,

    /// Content for the INPUT reserved variable
    #[arg(long = "stdin-data")]
    stdin_data: Option<String>,

    /// Treat every non-zero command exit as fatal
    #[arg(long = "strict")]
    strict: bool,

    /// Restrict import URLs to these domains (repeatable)
    #[arg(long = "allow-url")]
    allow_url: Vec<String>,

    /// Block import URLs from these domains (repeatable)
    #[arg(long = "block-url")]
    block_url: Vec<String>,

    /// Restrict shell commands to these patterns (repeatable)
    #[arg(long = "allow-cmd")]
    allow_cmd: Vec<String>,

    /// Block shell commands matching these patterns (repeatable)
    #[arg(long = "block-cmd")]
    block_cmd: Vec<String>,

    /// Output a JSON envelope (output, errors, exitCode)
    #[arg(long = "json")]
    json: bool,

    /// Document file to evaluate
    #[arg()]
    file: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Determine source: -c, file, or stdin
    let source = if let Some(s) = cli.source {
        s
    } else if let Some(ref file) = cli.file {
        match std::fs::read_to_string(file) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("Error: cannot read {}: {}", file, e);
                std::process::exit(1);
            }
        }
    } else {
        use std::io::IsTerminal;
        if std::io::stdin().is_terminal() {
            eprintln!("Error: no document provided. Use -c 'source', a file argument, or pipe via stdin.");
            std::process::exit(1);
        }
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).unwrap_or_default();
        buf
    };

    let mut config = EvalConfig::from_env();
    config.strict = cli.strict;
    config.url_policy.allowed_domains = cli.allow_url;
    config.url_policy.blocked_domains.extend(cli.block_url);
    config.command_policy.allow = cli.allow_cmd;
    config.command_policy.block = cli.block_cmd;

    let mut options = InterpreterOptions {
        base_path: cli.cwd.unwrap_or_else(|| {
            std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| ".".to_string())
        }),
        stdin: cli.stdin_data,
        env_vars: std::env::vars().collect(),
        config,
        ..Default::default()
    };
    options.caps.fs = Arc::new(RealFs);

    let mut interp = Interpreter::new(options);
    match interp.run(&source).await {
        Ok(output) => {
            let errors: Vec<String> = interp
                .collected_errors()
                .iter()
                .map(|e| e.to_string())
                .collect();
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "output": output,
                        "errors": errors,
                        "exitCode": 0,
                    })
                );
            } else {
                print!("{}", output);
                for error in &errors {
                    eprintln!("warning: {}", error);
                }
            }
        }
        Err(e) => {
            // Fatal: emit accumulated output, then the formatted error
            let partial = interp.partial_output();
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "output": partial,
                        "errors": [e.to_string()],
                        "exitCode": 1,
                    })
                );
            } else {
                print!("{}", partial);
                eprintln!("error: {}", e);
            }
            std::process::exit(1);
        }
    }
}
