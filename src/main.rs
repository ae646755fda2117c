use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use meshmap::coordinator::{RebuildRequest, TopologyCoordinator};
use meshmap::export::{to_dot, to_json, PositionedTopology};
use meshmap::ingest;
use meshmap::layout::{LayoutEngine, LayoutOptions};

#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    #[clap(short, long, global = true)]
    log_level: Option<String>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExportFormat {
    Dot,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the topology from a flow-log batch, lay it out, and export it
    Build {
        /// JSON file with the batch of time-windowed log entries
        #[clap(long)]
        logs: PathBuf,
        /// Device list (YAML or JSON)
        #[clap(short, long)]
        devices: Option<PathBuf>,
        /// Service address map (YAML or JSON)
        #[clap(short, long)]
        services: Option<PathBuf>,
        /// Static record address map (YAML or JSON)
        #[clap(long)]
        static_records: Option<PathBuf>,
        /// Output file; stdout when omitted
        #[clap(short, long)]
        out: Option<String>,
        #[clap(short, long, value_enum, default_value = "json")]
        format: ExportFormat,
        /// Budget for the primary layout strategy before falling back
        #[clap(long, default_value = "10")]
        timeout_secs: u64,
    },
    /// Build the topology and print its statistics
    Inspect {
        #[clap(long)]
        logs: PathBuf,
        #[clap(short, long)]
        devices: Option<PathBuf>,
        #[clap(short, long)]
        services: Option<PathBuf>,
        #[clap(long)]
        static_records: Option<PathBuf>,
    },
}

fn load_request(
    logs: &PathBuf,
    devices: &Option<PathBuf>,
    services: &Option<PathBuf>,
    static_records: &Option<PathBuf>,
) -> Result<RebuildRequest> {
    let entries = ingest::load_log_entries(logs)?;
    let records = ingest::flatten_entries(&entries);
    Ok(RebuildRequest {
        records,
        devices: match devices {
            Some(path) => ingest::load_devices(path)?,
            None => Vec::new(),
        },
        services: match services {
            Some(path) => ingest::load_address_map(path)?,
            None => Default::default(),
        },
        static_records: match static_records {
            Some(path) => ingest::load_address_map(path)?,
            None => Default::default(),
        },
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    setup_logging(&args.log_level);

    match args.command {
        Commands::Build {
            logs,
            devices,
            services,
            static_records,
            out,
            format,
            timeout_secs,
        } => {
            let request = load_request(&logs, &devices, &services, &static_records)?;
            info!("Building topology from {} flow records", request.records.len());

            let engine = LayoutEngine::new(LayoutOptions {
                timeout: Duration::from_secs(timeout_secs),
                ..Default::default()
            });
            let mut coordinator = TopologyCoordinator::new(engine);
            coordinator.rebuild_now(&request).await;

            let view = coordinator.snapshot();
            let topology = PositionedTopology::from_parts(view.graph, view.layout);
            let output = match format {
                ExportFormat::Dot => to_dot::render(&topology),
                ExportFormat::Json => to_json::render(&topology),
            }
            .map_err(|e| anyhow::anyhow!("export failed: {}", e))?;

            match out {
                Some(filename) => {
                    meshmap::common::write_string_to_file(&filename, &output)?;
                    info!("Wrote topology to {}", filename);
                }
                None => println!("{}", output),
            }
        }
        Commands::Inspect {
            logs,
            devices,
            services,
            static_records,
        } => {
            let request = load_request(&logs, &devices, &services, &static_records)?;
            let graph = meshmap::graph::build(
                &request.records,
                &request.devices,
                &request.services,
                &request.static_records,
            );
            println!("{}", graph.stats());
            if let Err(errors) = graph.verify_graph_integrity() {
                for error in errors {
                    eprintln!("integrity: {}", error);
                }
            }
        }
    }

    Ok(())
}

fn setup_logging(log_level: &Option<String>) {
    let log_level = log_level.as_deref().unwrap_or("info");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(format!("handlebars=off,{}", log_level)))
        .without_time()
        .init();
}
