//! rpcpipe — entry point.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use rpcpipe::{Server, StdioServer, UnixClient, UnixServer};
use rpcpipe_cli::config::{default_config_path, Config, Launched};
use rpcpipe_cli::demo::register_demo_handlers;
use rpcpipe_cli::{parse_params, DEFAULT_SOCKET_PATH};

/// How long to wait for the last response to be written after a stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(
    name = "rpcpipe",
    about = "Serve and call JSON-RPC methods over stdio pipes or Unix sockets",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the demo handlers on stdin/stdout.
    ServeStdio,

    /// Serve the demo handlers on a Unix socket.
    ServeSocket {
        /// Socket path.
        #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
        socket: PathBuf,
    },

    /// Send one request to a socket server and print the response.
    Call {
        /// Socket path.
        #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
        socket: PathBuf,

        /// Correlation id.
        #[arg(long, default_value_t = 1)]
        id: i64,

        /// Method name.
        method: String,

        /// Params as a JSON object.
        params: Option<String>,
    },

    /// Start a configured server subprocess, send one request over its
    /// stdio and print the response.
    Launch {
        /// Config file (default: ~/.mcp-config.json).
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Server name under "mcpServers".
        server: String,

        /// Method name.
        method: String,

        /// Params as a JSON object.
        params: Option<String>,
    },

    /// Launch the interactive socket client.
    Repl {
        /// Socket path.
        #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
        socket: PathBuf,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   rpcpipe completions bash > ~/.local/share/bash-completion/completions/rpcpipe
    ///   rpcpipe completions zsh > ~/.zfunc/_rpcpipe
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    // stdout carries protocol traffic for serve-stdio
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::ServeStdio => {
            let server = StdioServer::stdio();
            serve(&server).await?;
            // The reader may still be parked on stdin after Ctrl+C.
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, server.join()).await;
        }

        Commands::ServeSocket { socket } => {
            let server = UnixServer::new(&socket);
            serve(&server).await?;
            server.join().await;
        }

        Commands::Call {
            socket,
            id,
            method,
            params,
        } => {
            let params = parse_params(params.as_deref())?;
            let mut client = UnixClient::connect(&socket).await?;
            client.send_request_with_id(id, &method, params).await?;
            let response = client
                .receive_response()
                .await?
                .context("server closed the connection without answering")?;
            client.close().await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Commands::Launch {
            config,
            server,
            method,
            params,
        } => {
            let params = parse_params(params.as_deref())?;
            let path = config.unwrap_or_else(default_config_path);
            let config = Config::load(&path)?;
            let launched = Launched::spawn(&config, &server)?;

            launched.client().send_request(&method, params).await?;
            let response = launched.client().receive_response().await;
            launched.shutdown().await?;
            println!("{}", serde_json::to_string_pretty(&response?)?);
        }

        Commands::Repl { socket } => {
            let runtime = tokio::runtime::Handle::current();
            tokio::task::spawn_blocking(move || rpcpipe_cli::repl::run(socket, runtime))
                .await??;
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "rpcpipe", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Install the demo handlers, start, and run until `close` or Ctrl+C.
async fn serve<S: Server>(server: &S) -> anyhow::Result<()> {
    register_demo_handlers(server.registry(), server.stop_handle());
    server.start()?;

    tokio::select! {
        _ = server.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping");
            server.stop()?;
        }
    }
    Ok(())
}
