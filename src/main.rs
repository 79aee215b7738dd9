use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use codescord::container::{self, ContainerRuntime, DockerRuntime};
use codescord::pool::PoolConfig;
use codescord::worker;

const DEFAULT_PORT_RANGE: &str = "6090:6096";
const DEFAULT_IMAGE: &str = "codescord";

#[derive(Parser)]
#[command(name = "codescord", version = "1.0.0")]
#[command(about = "Broker and sandboxed worker for executing untrusted code submissions")]
struct Cli {
    #[arg(short = 'p', long = "ports", default_value = DEFAULT_PORT_RANGE, global = true)]
    port_range: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the in-container worker server.
    Server {
        #[arg(long, default_value_t = container::WORKER_PORT)]
        port: u16,
    },
    /// Submit one job to the broker and print its result.
    Client {
        language: String,
        code_path: PathBuf,
        #[arg(default_value = "")]
        args: String,
    },
    /// Stub acknowledging the command exists; the persistence layer it
    /// would set up belongs to the out-of-scope chat front-end.
    CreateDatabase,
    /// Builds the worker's container image.
    BuildDockerImage,
}

fn parse_port_range(raw: &str) -> (u16, u16) {
    let mut parts = raw.splitn(2, ':');
    let start = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or_else(|| {
            eprintln!("invalid port range '{raw}', expected START:END");
            std::process::exit(1);
        });
    let end = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or_else(|| {
            eprintln!("invalid port range '{raw}', expected START:END");
            std::process::exit(1);
        });
    if start > end {
        eprintln!("invalid port range '{raw}': start_port must be <= end_port");
        std::process::exit(1);
    }
    (start, end)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("codescord=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new().unwrap();

    match cli.command {
        Commands::Server { port } => {
            rt.block_on(run_server(port));
        }
        Commands::Client {
            language,
            code_path,
            args,
        } => {
            let (start_port, end_port) = parse_port_range(&cli.port_range);
            rt.block_on(run_client(start_port, end_port, language, code_path, args));
        }
        Commands::CreateDatabase => {
            tracing::info!("create-database: no persistence layer owned by this crate, nothing to do");
            println!("ok");
        }
        Commands::BuildDockerImage => {
            rt.block_on(run_build_docker_image());
        }
    }
}

async fn run_server(port: u16) {
    let shutdown = Arc::new(tokio::sync::Notify::new());
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        println!("\nshutting down gracefully...");
        shutdown_clone.notify_one();
    })
    .expect("failed to set Ctrl-C handler");

    if let Err(e) = worker::serve(port, shutdown).await {
        tracing::error!("worker server error: {e}");
        std::process::exit(1);
    }
}

async fn run_client(start_port: u16, end_port: u16, language: String, code_path: PathBuf, args: String) {
    let code = match fs::read(&code_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("failed to read {}: {e}", code_path.display());
            std::process::exit(1);
        }
    };

    let config = PoolConfig {
        image: DEFAULT_IMAGE.to_string(),
        start_port,
        end_port,
    };
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime);
    let broker = codescord::broker::Broker::new(config, runtime);

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.notify_one();
    })
    .expect("failed to set Ctrl-C handler");

    let result = tokio::select! {
        result = broker.submit(language, code, args) => result,
        _ = shutdown.notified() => {
            println!("interrupted, shutting down...");
            String::new()
        }
    };

    if !result.is_empty() {
        println!("{result}");
    }

    let reclaimed = broker.shutdown().await;
    if reclaimed > 0 {
        tracing::info!("reclaimed {reclaimed} leaked container(s) on shutdown");
    }
}

async fn run_build_docker_image() {
    match container::build_image(DEFAULT_IMAGE).await {
        Ok(()) => println!("built image '{DEFAULT_IMAGE}'"),
        Err(e) => {
            eprintln!("docker build failed: {e}");
            std::process::exit(1);
        }
    }
}
