//! cmdstream binary entry point.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use cmdstream::cli::{self, Args};
use cmdstream::config::Config;
use cmdstream::{
    logging, CancelToken, CommandRunner, LogError, NullLogger, Origin, OutputLine, OutputLogger,
};
use tracing::{debug, info};

/// Exit code for usage and configuration errors.
const EXIT_USAGE: u8 = 2;

/// Streams command output to this process's own stdout/stderr.
struct ConsoleLogger;

impl OutputLogger for ConsoleLogger {
    fn log_line(&self, line: &OutputLine) -> Result<(), LogError> {
        let written = match line.origin {
            Origin::Stdout => write_line(std::io::stdout().lock(), line),
            Origin::Stderr => write_line(std::io::stderr().lock(), line),
        };
        written.map_err(|e| LogError::new(e.to_string()))
    }

    fn log_prompt(&self, prompt: &str) -> Result<(), LogError> {
        writeln!(std::io::stderr(), "{}", prompt).map_err(|e| LogError::new(e.to_string()))
    }
}

fn write_line(mut out: impl Write, line: &OutputLine) -> std::io::Result<()> {
    out.write_all(line.text.as_bytes())?;
    if line.terminated {
        out.write_all(b"\n")?;
    }
    out.flush()
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Try 'cmdstream --help' for more information.");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let _ = logging::try_init_with_filter(config.log_filter());

    match run(&args, &config).await {
        Ok(code) => ExitCode::from((code & 0xff) as u8),
        Err(code) => ExitCode::from(code),
    }
}

async fn run(args: &Args, config: &Config) -> Result<i32, u8> {
    let (command, target) = match args.to_command().and_then(|c| Ok((c, args.target()?))) {
        Ok(parts) => parts,
        Err(e) => {
            eprintln!("error: {}", e);
            return Err(EXIT_USAGE);
        }
    };

    let logger: Arc<dyn OutputLogger> = if args.quiet || args.json {
        Arc::new(NullLogger)
    } else {
        Arc::new(ConsoleLogger)
    };
    let runner = CommandRunner::from_config(config).with_logger(logger);

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted; cancelling command");
            on_interrupt.cancel();
        }
    });

    debug!(%target, command = %command.display(), "running");
    let result = match runner
        .run_async(command, target, runner.options().default_timeout, cancel)
        .await
    {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error: {}", e);
            return Err(1);
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("error: failed to encode result: {}", e);
                return Err(1);
            }
        }
    } else if let Some(failure) = &result.failure {
        eprintln!("cmdstream: {}: {}", result.state, failure);
    } else if result.state != cmdstream::ExecutionState::Completed {
        eprintln!("cmdstream: {} after {:.1}s", result.state, result.duration.as_secs_f64());
    }

    Ok(cli::exit_code(&result))
}
