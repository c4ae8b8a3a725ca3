use clap::{Parser, Subcommand, ValueEnum};
use fhir::Bundle;
use ptmatch_core::{
    parse_duplicates, render_config, Collaborators, CoreConfig, LayeredTemplateSource, MatchMode,
    MatchRequest, RecordMatchProcessor,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ptmatch")]
#[command(about = "Patient record-match CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Deduplication,
    Linkage,
}

impl From<Mode> for MatchMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Deduplication => MatchMode::Deduplication,
            Mode::Linkage => MatchMode::Linkage,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check a request bundle and show the searches it would run
    Validate {
        /// Path to the request bundle (JSON)
        request: PathBuf,
    },
    /// Print the acknowledgement for a request bundle
    Acknowledge {
        /// Path to the request bundle (JSON)
        request: PathBuf,
    },
    /// Run a request through the pipeline and print the response
    Process {
        /// Path to the request bundle (JSON)
        request: PathBuf,
    },
    /// Print the rendered match engine configuration
    RenderConfig {
        /// Match mode
        #[arg(value_enum)]
        mode: Mode,
        /// Workspace directory to bind the configuration to
        #[arg(long, default_value = "/tmp/ptmatch-job")]
        job_dir: PathBuf,
    },
    /// Print the clusters in an engine duplicates file
    Duplicates {
        /// Path to the duplicates file (CSV)
        file: PathBuf,
    },
}

fn config_from_env() -> Result<CoreConfig, Box<dyn std::error::Error>> {
    Ok(CoreConfig::from_lookup(|key| std::env::var(key).ok())?)
}

fn read_bundle(path: &Path) -> Result<Bundle, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    Ok(Bundle::parse(&text)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Validate { request }) => {
            let bundle = read_bundle(&request)?;
            match MatchRequest::from_bundle(&bundle) {
                Ok(parsed) => {
                    println!("Mode: {}", parsed.mode().as_str());
                    println!("Master: {}", parsed.master.search_url);
                    if let Some(query) = parsed.query {
                        println!("Query: {}", query.search_url);
                    }
                }
                Err(e) => eprintln!("Invalid request: {}", e),
            }
        }
        Some(Commands::Acknowledge { request }) => {
            let bundle = read_bundle(&request)?;
            let config = Arc::new(config_from_env()?);
            let collaborators = Collaborators::from_config(&config)?;
            let processor = RecordMatchProcessor::new(config, collaborators)?;
            match processor.acknowledge(&bundle) {
                Ok(ack) => println!("{}", serde_json::to_string_pretty(&ack)?),
                Err(e) => eprintln!("Error building acknowledgement: {}", e),
            }
        }
        Some(Commands::Process { request }) => {
            let bundle = read_bundle(&request)?;
            let config = Arc::new(config_from_env()?);
            let collaborators = Collaborators::from_config(&config)?;
            let processor = RecordMatchProcessor::new(config, collaborators)?;
            let outcome = processor.process(&bundle).await;
            eprintln!("{:?}: {}", outcome.code, outcome.diagnostic);
            match outcome.response {
                Some(response) => println!("{}", serde_json::to_string_pretty(&response)?),
                None => eprintln!("No response could be assembled"),
            }
        }
        Some(Commands::RenderConfig { mode, job_dir }) => {
            let config = config_from_env()?;
            match render_config(mode.into(), &job_dir, &LayeredTemplateSource::default(), &config) {
                Ok(text) => println!("{}", text),
                Err(e) => eprintln!("Error rendering configuration: {}", e),
            }
        }
        Some(Commands::Duplicates { file }) => match parse_duplicates(&file) {
            Ok(clusters) if clusters.is_empty() => println!("No duplicates found."),
            Ok(clusters) => {
                for cluster in clusters {
                    println!("{}", cluster.reference);
                    for member in cluster.members {
                        println!(
                            "  {} score={:.2} ({})",
                            member.full_url,
                            member.score,
                            member.confidence.code()
                        );
                    }
                }
            }
            Err(e) => eprintln!("Error reading duplicates: {}", e),
        },
        None => {
            println!("Use 'ptmatch --help' for commands");
        }
    }

    Ok(())
}
