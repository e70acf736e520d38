use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use am_mcp_runtime::{
    DEFAULT_ALERTMANAGER_URL, McpCommands, McpRuntimeConfig, run as run_mcp,
};

#[derive(Parser)]
#[command(
    name = "am-mcp",
    version,
    about = "Alertmanager MCP server — alert and silence tools over stdio"
)]
struct Cli {
    /// Alertmanager base URL
    #[arg(long, env = "ALERTMANAGER_URL", default_value = DEFAULT_ALERTMANAGER_URL)]
    alertmanager_url: String,

    #[command(subcommand)]
    command: McpCommands,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // stdout carries the MCP protocol stream; all diagnostics go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "am_mcp_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let code = run_mcp(McpRuntimeConfig::new(cli.alertmanager_url), cli.command).await;
    std::process::exit(code);
}
