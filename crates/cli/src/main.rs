mod config;
mod logging;
mod serve;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use gatehouse_core::credential::normalize;
use gatehouse_core::{StateMachine, Variant};

use crate::config::Config;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Gatehouse entry/exit verification service.
#[derive(Parser)]
#[command(
    name = "gatehouse",
    version,
    about = "Gatehouse entry/exit verification service"
)]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Path to the TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Port to listen on (overrides config and GATEHOUSE_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Requests per minute per client IP (overrides config and GATEHOUSE_RATE_LIMIT)
        #[arg(long)]
        rate_limit: Option<u64>,
        /// Emit logs as JSON lines
        #[arg(long)]
        log_json: bool,
    },

    /// Print the lifecycle table of one or every variant
    Machines {
        /// Variant to print (delivery, visitor, staff, vehicle, emergency)
        variant: Option<Variant>,
    },

    /// Normalize a credential the way the gate does before lookup
    Normalize {
        /// Variant the credential belongs to
        variant: Variant,
        /// Raw credential as typed or scanned
        credential: String,
    },

    /// Validate a configuration file and summarize it
    CheckConfig {
        /// Path to the TOML configuration file
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            rate_limit,
            log_json,
        } => {
            logging::init(log_json);
            let config = match load_serve_config(config.as_deref(), port, rate_limit) {
                Ok(c) => c,
                Err(e) => {
                    report_error(&e.to_string(), cli.output, cli.quiet);
                    process::exit(1);
                }
            };
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    report_error(
                        &format!("failed to create tokio runtime: {}", e),
                        cli.output,
                        cli.quiet,
                    );
                    process::exit(1);
                }
            };
            if let Err(e) = rt.block_on(serve::start_server(config)) {
                tracing::error!(error = %e, "server error");
                report_error(&format!("Server error: {}", e), cli.output, cli.quiet);
                process::exit(1);
            }
        }
        Commands::Machines { variant } => cmd_machines(variant, cli.output),
        Commands::Normalize {
            variant,
            credential,
        } => cmd_normalize(variant, &credential, cli.output, cli.quiet),
        Commands::CheckConfig { file } => cmd_check_config(&file, cli.output, cli.quiet),
    }
}

/// File, then environment, then flags.
fn load_serve_config(
    path: Option<&Path>,
    port: Option<u16>,
    rate_limit: Option<u64>,
) -> Result<Config, config::ConfigError> {
    let mut config = Config::load(path)?;
    config.apply_env(|var| std::env::var(var).ok())?;
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(limit) = rate_limit {
        if limit == 0 {
            return Err(config::ConfigError::Invalid(
                "rate_limit must be at least 1".into(),
            ));
        }
        config.server.rate_limit = limit;
    }
    Ok(config)
}

fn cmd_machines(variant: Option<Variant>, output: OutputFormat) {
    let machines: Vec<&StateMachine> = match variant {
        Some(v) => vec![StateMachine::of(v)],
        None => StateMachine::all().collect(),
    };
    match output {
        OutputFormat::Json => {
            let value = serde_json::json!({ "machines": machines });
            println!(
                "{}",
                serde_json::to_string_pretty(&value)
                    .unwrap_or_else(|e| format!("serialization error: {}", e))
            );
        }
        OutputFormat::Text => {
            for (i, m) in machines.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                print!("{}", render_machine(m));
            }
        }
    }
}

fn render_machine(m: &StateMachine) -> String {
    let mut out = format!(
        "{} (initial: {}, terminal: {})\n",
        m.variant,
        m.initial,
        if m.terminal.is_empty() {
            "none".to_string()
        } else {
            m.terminal.join(", ")
        }
    );
    for e in m.edges {
        let mark = if e.inferred { "  [scan]" } else { "" };
        out.push_str(&format!("  {} --{}--> {}{}\n", e.from, e.action, e.to, mark));
    }
    out
}

fn cmd_normalize(variant: Variant, raw: &str, output: OutputFormat, quiet: bool) {
    match normalize(variant, raw) {
        Ok(credential) => match output {
            OutputFormat::Text => println!("{}", credential),
            OutputFormat::Json => println!(
                "{}",
                serde_json::json!({ "variant": variant, "credential": credential })
            ),
        },
        Err(e) => {
            if !quiet {
                match output {
                    OutputFormat::Text => eprintln!("{}", e),
                    OutputFormat::Json => eprintln!(
                        "{}",
                        serde_json::to_string(&e.to_body())
                            .unwrap_or_else(|_| format!("{{\"message\": \"{}\"}}", e))
                    ),
                }
            }
            process::exit(1);
        }
    }
}

fn cmd_check_config(path: &Path, output: OutputFormat, quiet: bool) {
    let config = match Config::load(Some(path)) {
        Ok(c) => c,
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    };
    match output {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "valid": true,
                "port": config.server.port,
                "rate_limit": config.server.rate_limit,
                "operators": config.operators.len(),
                "residents": config.residents.len(),
            })
        ),
        OutputFormat::Text => {
            if !quiet {
                println!(
                    "{}: ok ({} operators, {} residents, port {}, {} req/min)",
                    path.display(),
                    config.operators.len(),
                    config.residents.len(),
                    config.server.port,
                    config.server.rate_limit
                );
            }
        }
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => eprintln!("{}", serde_json::json!({ "error": msg })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_mark_scan_edges() {
        let text = render_machine(StateMachine::of(Variant::Staff));
        assert!(text.starts_with("staff (initial: outside, terminal: none)"));
        assert!(text.contains("outside --entry--> inside  [scan]"), "{text}");

        let text = render_machine(StateMachine::of(Variant::Visitor));
        assert!(text.contains("pending --approve--> granted\n"), "{text}");
        assert!(text.contains("granted --check_in--> checked_in  [scan]"), "{text}");
    }

    #[test]
    fn flags_override_file_values() {
        let config = load_serve_config(None, Some(9999), Some(3)).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.rate_limit, 3);
        assert!(load_serve_config(None, None, Some(0)).is_err());
    }
}
