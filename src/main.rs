//! Load-test CLI.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use surge::{JsonLinesOutput, NullOutput, Overrides, Report, Runner, SampleOutput, ScenarioConfig};
use tracing_subscriber::EnvFilter;

/// Exit code when one or more thresholds fail.
const THRESHOLD_FAILURE_EXIT: i32 = 99;

#[derive(Parser)]
#[command(name = "surge")]
#[command(about = "Scenario-driven HTTP load-testing runner", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a load test from a scenario file
    Run {
        /// Path to scenario YAML file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Override the number of virtual users
        #[arg(short, long, env = "SURGE_VUS")]
        vus: Option<u32>,

        /// Override the test duration, e.g. "30s" or "2m"
        #[arg(short, long, env = "SURGE_DURATION")]
        duration: Option<String>,

        /// Export metric samples to a JSON-lines file
        #[arg(long, env = "SURGE_OUT")]
        out: Option<PathBuf>,

        /// Summary format: table (default), json, csv
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// Run a quick single-target smoke test
    Quick {
        /// Target URL
        #[arg(short, long)]
        url: String,

        /// Number of virtual users
        #[arg(short, long, default_value = "10")]
        vus: u32,

        /// Test duration, e.g. "10s"
        #[arg(short, long, default_value = "10s")]
        duration: String,
    },

    /// List available scenario files
    List {
        /// Scenarios directory
        #[arg(short, long, default_value = "scenarios")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("surge={}", cli.log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            scenario,
            vus,
            duration,
            out,
            output,
        } => {
            let mut config = ScenarioConfig::from_file(&scenario)
                .with_context(|| format!("loading scenario {}", scenario.display()))?;
            config.apply(&Overrides { vus, duration });

            let sink: Box<dyn SampleOutput> = match out {
                Some(path) => {
                    println!("Exporting samples to {}", path.display());
                    Box::new(JsonLinesOutput::create(&path)?)
                }
                None => Box::new(NullOutput),
            };

            println!("Starting load test: {}", config.name);
            println!("  VUs: {}", config.vus);
            println!("  Duration: {}", config.duration);
            println!();

            let runner = Runner::new(config)?;
            let summary = runner.run(sink).await?;

            match output.as_str() {
                "json" => println!("{}", Report::format_json(&summary)?),
                "csv" => {
                    println!("{}", Report::csv_header());
                    println!("{}", Report::format_csv(&summary));
                }
                _ => println!("{}", Report::format_table(&summary)),
            }

            if !summary.thresholds_passed() {
                eprintln!("Thresholds failed");
                std::process::exit(THRESHOLD_FAILURE_EXIT);
            }
            Ok(())
        }
        Commands::Quick { url, vus, duration } => {
            let mut config = ScenarioConfig::single_get(url);
            config.vus = vus;
            config.duration = duration;

            let runner = Runner::new(config)?;
            let summary = runner.run(Box::new(NullOutput)).await?;
            println!("{}", Report::format_table(&summary));
            Ok(())
        }
        Commands::List { dir } => {
            let entries = std::fs::read_dir(&dir)
                .with_context(|| format!("reading scenarios directory {}", dir.display()))?;

            let mut scenarios = Vec::new();
            for entry in entries.flatten() {
                let path = entry.path();
                let is_yaml = matches!(
                    path.extension().and_then(|s| s.to_str()),
                    Some("yaml") | Some("yml")
                );
                if !is_yaml {
                    continue;
                }
                if let Ok(config) = ScenarioConfig::from_file(&path) {
                    scenarios.push((
                        path.file_name().unwrap_or_default().to_string_lossy().to_string(),
                        config.name,
                        config.description,
                    ));
                }
            }
            scenarios.sort_by(|a, b| a.0.cmp(&b.0));

            if scenarios.is_empty() {
                println!("No scenario files found in {}", dir.display());
            } else {
                for (filename, name, description) in scenarios {
                    println!("  {} - {}", filename, name);
                    if !description.is_empty() {
                        println!("    {}", description);
                    }
                }
            }
            Ok(())
        }
    }
}
