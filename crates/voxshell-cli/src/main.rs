//! voxshell CLI — voice session gateway with a shell tool.
//!
//! ```text
//! voxshell serve [--port 3000] [--host 127.0.0.1] [--public-dir public]
//! voxshell exec [--url http://localhost:3000/tools/shell] [-q] -- ls -la
//! ```

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use voxshell_lib::relay::SessionRelay;
use voxshell_lib::server::{self, AppState};
use voxshell_lib::shell::ShellRunner;
use voxshell_lib::voxshell_core::credential::{CREDENTIAL_ENV, Credential};
use voxshell_lib::voxshell_core::manifest::CapabilityManifest;
use voxshell_lib::voxshell_core::types::{
    CommandRequest, CommandResult, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_UPSTREAM_URL, RelayConfig,
    ShellConfig,
};

/// voxshell — realtime voice session gateway with a shell tool
#[derive(Parser)]
#[command(name = "voxshell", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the gateway (needs OPENAI_API_KEY)
    Serve(ServeArgs),
    /// Run a command through a running gateway's shell tool
    Exec {
        /// Shell tool endpoint
        #[arg(long, default_value = "http://localhost:3000/tools/shell")]
        url: String,
        /// Print only the command's own output
        #[arg(short, long)]
        quiet: bool,
        /// Command and arguments
        #[arg(last = true)]
        command: Vec<String>,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Listen port
    #[arg(long, default_value = "3000")]
    port: u16,
    /// Listen host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Static asset directory served at `/`
    #[arg(long, default_value = "public")]
    public_dir: PathBuf,
    /// Upstream session negotiation endpoint
    #[arg(long, default_value = DEFAULT_UPSTREAM_URL)]
    upstream_url: String,
    /// Shell tool timeout in seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,
    /// Per-stream cap on captured tool output
    #[arg(long, default_value_t = DEFAULT_MAX_OUTPUT_BYTES)]
    max_output_bytes: usize,
    /// Replace the session instructions
    #[arg(long, env = "VOICE_AGENT_PROMPT")]
    instructions: Option<String>,
    /// Only reply in this language (e.g. en-US)
    #[arg(long)]
    language: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Exec {
            url,
            quiet,
            command,
        } => exec(&url, quiet, command).await,
    }
}

async fn serve(args: ServeArgs) -> ExitCode {
    let credential = match Credential::from_env() {
        Ok(credential) => credential,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mut manifest = match CapabilityManifest::embedded() {
        Ok(manifest) => manifest,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(instructions) = args.instructions {
        manifest = manifest.with_instructions(instructions);
    }
    if let Some(language) = args.language.as_deref() {
        manifest = manifest.with_language(language);
    }
    info!(
        language = args.language.as_deref().unwrap_or("<auto>"),
        instructions_len = manifest.instructions().map_or(0, str::len),
        tools = ?manifest.tool_names(),
        "capability manifest ready"
    );

    let shell = ShellRunner::new(ShellConfig {
        timeout: Duration::from_secs(args.timeout_secs),
        max_output_bytes: args.max_output_bytes,
        scrubbed_env: vec![CREDENTIAL_ENV.to_string()],
    });
    let relay = SessionRelay::new(
        RelayConfig {
            upstream_url: args.upstream_url,
            ..RelayConfig::default()
        },
        credential,
        manifest,
    );
    let app = server::router(AppState::new(shell, relay), &args.public_dir);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Ok(local) = listener.local_addr() {
        if !local.ip().is_loopback() {
            warn!(
                %local,
                "/tools/shell is unauthenticated and runs commands as this user; \
                 put an authenticating proxy in front of non-loopback listeners"
            );
        }
    }
    info!(%addr, "server starting");

    let service = app.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, service).await {
        error!("server error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn exec(url: &str, quiet: bool, command: Vec<String>) -> ExitCode {
    if command.is_empty() {
        eprintln!("usage: voxshell exec [--url URL] [-q] -- <command> [args...]");
        return ExitCode::from(2);
    }

    let resp = match reqwest::Client::new()
        .post(url)
        .json(&CommandRequest { command })
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            eprintln!("post: {e}");
            return ExitCode::FAILURE;
        }
    };

    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        eprintln!("server returned {status}: {body}");
        return ExitCode::FAILURE;
    }

    let result: CommandResult = match serde_json::from_str(&body) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("unmarshal response: {e}\nraw: {body}");
            return ExitCode::FAILURE;
        }
    };

    let _ = std::io::stdout().write_all(&result.stdout);
    let _ = std::io::stderr().write_all(&result.stderr);
    if !quiet && !result.ok {
        eprintln!("[exit {}] {}", result.exit_code, result.error);
    }

    if result.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
