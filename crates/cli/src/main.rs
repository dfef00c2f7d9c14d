mod config;
mod error;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use toolclient::{ClientOptions, ClientRegistry, ServersConfig, ToolOutput};
use tracing_subscriber::EnvFilter;

use error::{Error, Result};

#[derive(Parser)]
#[command(name = "toolwire")]
#[command(about = "Talk to JSON-RPC tool servers over stdio", long_about = None)]
#[command(version)]
struct Cli {
    /// Server config file (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Seconds to wait for each response
    #[arg(short, long, global = true)]
    timeout: Option<u64>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured servers
    Servers,
    /// List the tools a server exposes
    Tools {
        /// Server name from the config
        server: String,
    },
    /// Call one tool and print its output
    Call {
        /// Server name from the config
        server: String,
        /// Tool name
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
        /// Print the undecoded result
        #[arg(long)]
        raw: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let servers = config::load(cli.config.as_deref())?;

    let mut options =
        ClientOptions::default().with_client_info("toolwire", env!("CARGO_PKG_VERSION"));
    if let Some(secs) = cli.timeout {
        options = options.with_request_timeout(Duration::from_secs(secs));
    }

    let registry = ClientRegistry::with_options(servers, options);

    let result = match cli.command {
        Commands::Servers => {
            cmd_servers(registry.config());
            Ok(())
        }
        Commands::Tools { server } => cmd_tools(&registry, &server).await,
        Commands::Call {
            server,
            tool,
            args,
            raw,
        } => cmd_call(&registry, &server, &tool, &args, raw).await,
    };

    registry.close_all().await;
    result
}

fn cmd_servers(config: &ServersConfig) {
    if config.is_empty() {
        println!("No servers configured.");
        return;
    }

    println!("{:<24}  COMMAND", "SERVER");
    println!("{}", "-".repeat(80));

    for (name, server) in config.iter() {
        let mut command = server.command.clone();
        for arg in &server.args {
            command.push(' ');
            command.push_str(arg);
        }
        println!("{name:<24}  {command}");
    }
}

async fn cmd_tools(registry: &ClientRegistry, server: &str) -> Result<()> {
    let client = registry.get_client(server).await?;
    let tools = client.list_tools().await?;

    if tools.is_empty() {
        println!("{server} exposes no tools.");
        return Ok(());
    }

    for tool in &tools {
        match &tool.description {
            Some(desc) => println!("{:<32}  {}", tool.name, first_line(desc)),
            None => println!("{}", tool.name),
        }
    }

    Ok(())
}

async fn cmd_call(
    registry: &ClientRegistry,
    server: &str,
    tool: &str,
    args: &str,
    raw: bool,
) -> Result<()> {
    let arguments = parse_arguments(args)?;
    let client = registry.get_client(server).await?;

    let rendered = if raw {
        let result = client.call_tool(tool, arguments).await?;
        format!("{result:#}")
    } else {
        render(client.call_tool_output(tool, arguments).await?)
    };

    println!("{rendered}");
    Ok(())
}

fn parse_arguments(args: &str) -> Result<Value> {
    serde_json::from_str(args).map_err(Error::InvalidArguments)
}

fn render(output: ToolOutput) -> String {
    match output {
        ToolOutput::Structured(value) | ToolOutput::Data(value) => format!("{value:#}"),
        ToolOutput::Text(text) => text,
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}
