use clap::Parser;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "lineage",
    version,
    about = "Trace batch lineage and compute recall impact"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Classify an error into an exit code.
///
///   0 — success
///   1 — general/unknown error
///   2 — configuration or invalid input
///   3 — batch or source file not found
///   4 — database / store error
///   5 — cancelled or timed out
fn classify_exit_code(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}");
    let lower = msg.to_lowercase();

    if lower.contains("config") || lower.contains("invalid input") {
        2
    } else if lower.contains("not found") || lower.contains("no lineage source") {
        3
    } else if lower.contains("database")
        || lower.contains("sqlite")
        || lower.contains("dependency unavailable")
    {
        4
    } else if lower.contains("timed out") || lower.contains("cancelled") {
        5
    } else {
        1
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize tracing based on verbosity
    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (_, 0) => "warn",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: Failed to create runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(commands::run(cli.command)) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(classify_exit_code(&e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_config() {
        let err = anyhow::anyhow!("Cannot load config: Parse error: bad toml");
        assert_eq!(classify_exit_code(&err), 2);
    }

    #[test]
    fn exit_code_invalid_input() {
        let err = anyhow::anyhow!("Invalid input: depth bound must be at least 1, got 0");
        assert_eq!(classify_exit_code(&err), 2);
    }

    #[test]
    fn exit_code_not_found() {
        let err = anyhow::anyhow!("Not found: batch number X-1");
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn exit_code_database() {
        let err = anyhow::anyhow!("Cannot open database: /tmp/lineage.db");
        assert_eq!(classify_exit_code(&err), 4);
    }

    #[test]
    fn exit_code_timeout() {
        let err = anyhow::anyhow!("Request timed out after 30s");
        assert_eq!(classify_exit_code(&err), 5);
    }

    #[test]
    fn exit_code_general() {
        let err = anyhow::anyhow!("Something unexpected happened");
        assert_eq!(classify_exit_code(&err), 1);
    }
}
