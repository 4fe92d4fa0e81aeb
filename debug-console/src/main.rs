// Script debug console
//
// Loads a script under the debugger and reads console commands from stdin.
// Notifications and command replies go to stdout, logs to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use script_debugger::DebuggerConfig;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};

mod handlers;
mod session;

use handlers::LineHandler;
use session::ConsoleSession;

#[derive(Parser, Debug)]
#[command(name = "script-debug-console", version, about = "Interactive debugger console for tinyscript programs")]
struct Args {
    /// Script to load
    script: PathBuf,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Add a breakpoint on this line before starting (repeatable)
    #[arg(long = "break", value_name = "LINE")]
    breakpoints: Vec<u32>,

    /// Pause at the first statement
    #[arg(long)]
    stop_on_entry: bool,

    /// Pause on uncaught exceptions
    #[arg(long)]
    interrupt_on_exceptions: bool,
}

fn load_config(args: &Args) -> Result<DebuggerConfig> {
    let config = match &args.config {
        Some(path) => DebuggerConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => DebuggerConfig::default(),
    };
    let mut config = config.with_env_overrides()?;
    if args.interrupt_on_exceptions {
        config.interrupt_on_exceptions = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout is the console itself, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("script_debug_console=info".parse()?)
                .add_directive("script_debugger=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let code = tokio::fs::read_to_string(&args.script)
        .await
        .with_context(|| format!("Failed to read {}", args.script.display()))?;
    let file = args.script.display().to_string();

    info!("Starting script debug console for {}", file);
    let session = ConsoleSession::new(config)?;
    for line in &args.breakpoints {
        session.debugger().add_breakpoint(&file, *line);
    }
    session.spawn_event_printer();
    session.start_script(&file, &code, args.stop_on_entry)?;

    let handler = LineHandler::new(session);
    let mut reader = BufReader::new(tokio::io::stdin());
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                info!("End of input");
                break;
            }
            Ok(_) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                debug!("Console line: {}", line);
                if !handler.handle_line(line).await {
                    break;
                }
            }
            Err(e) => {
                error!("Read error: {}", e);
                break;
            }
        }
    }

    handler.shutdown().await;
    info!("Script debug console shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_args_and_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::json!({ "injected_timeout_ms": 750 });
        write!(file, "{}", json).unwrap();
        let path = file.path().display().to_string();

        let args = Args::parse_from([
            "script-debug-console",
            "main.js",
            "--config",
            path.as_str(),
            "--break",
            "3",
            "--break",
            "9",
            "--interrupt-on-exceptions",
        ]);
        assert_eq!(args.breakpoints, vec![3, 9]);
        assert!(!args.stop_on_entry);

        let config = load_config(&args).unwrap();
        assert_eq!(config.injected_timeout_ms, 750);
        assert!(config.interrupt_on_exceptions);
    }
}
