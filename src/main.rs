//! lifecyclectl
//!
//! Inspect the effective configuration and the machine transition table.

use clap::{Parser, Subcommand};
use machine_lifecycle::{EffectiveConfig, MachineState};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lifecyclectl")]
#[command(about = "Machine lifecycle tooling", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    Config {
        /// Path to a TOML config file
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// JSON object merged over the file
        #[arg(long = "set")]
        overrides: Option<String>,

        /// Output in JSON format, including sources
        #[arg(long)]
        json: bool,
    },

    /// Print legal transitions
    Transitions {
        /// Only show targets reachable from this state
        from: Option<String>,
    },

    /// Check whether one transition is legal (exit 0 if so, 2 if not)
    Check { from: String, to: String },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config {
            config,
            overrides,
            json,
        } => run_config(config, overrides, json),
        Commands::Transitions { from } => run_transitions(from),
        Commands::Check { from, to } => run_check(&from, &to),
    }
}

fn run_config(path: Option<PathBuf>, overrides: Option<String>, json_output: bool) {
    let overrides = match overrides.map(|raw| serde_json::from_str(&raw)).transpose() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Invalid --set value: {}", e);
            process::exit(1);
        }
    };

    let effective = match EffectiveConfig::build(path.as_deref(), overrides) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    };

    if json_output {
        match effective.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Failed to serialize config: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    match toml::to_string_pretty(&effective.config) {
        Ok(text) => print!("{}", text),
        Err(e) => {
            eprintln!("Failed to render config: {}", e);
            process::exit(1);
        }
    }
    for source in &effective.sources {
        match &source.path {
            Some(p) => eprintln!("# source: {:?} {}", source.origin, p),
            None => eprintln!("# source: {:?}", source.origin),
        }
    }
}

fn parse_state(raw: &str) -> MachineState {
    match raw.parse() {
        Ok(state) => state,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

fn run_transitions(from: Option<String>) {
    let states: Vec<MachineState> = match from {
        Some(raw) => vec![parse_state(&raw)],
        None => MachineState::ALL.to_vec(),
    };

    for state in states {
        let targets: Vec<&str> = state.legal_targets().iter().map(|t| t.as_str()).collect();
        if targets.is_empty() {
            println!("{:<22} (none)", state.as_str());
        } else {
            println!("{:<22} -> {}", state.as_str(), targets.join(", "));
        }
    }
}

fn run_check(from: &str, to: &str) {
    let from = parse_state(from);
    let to = parse_state(to);

    if from.can_transition_to(to) {
        println!("{} -> {}: legal", from, to);
        process::exit(0);
    }
    println!("{} -> {}: illegal", from, to);
    process::exit(2);
}
