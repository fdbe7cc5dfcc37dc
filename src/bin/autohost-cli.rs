use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

use autohost::config::load_config;
use autohost::net::connection::Connection;
use autohost::vhost::{ConfigTemplate, DescriptorLoader};

#[derive(Parser)]
#[command(name = "autohost-cli")]
#[command(about = "Management CLI for autohostd", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "AUTOHOST_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show engine status
    Status,
    /// List live bindings and their names
    Bindings,
    /// Preview which fragment a connection would load, without a daemon
    Resolve {
        #[arg(short, long, default_value = "/etc/autohost/autohost.toml")]
        config: PathBuf,
        /// Local address the client connects to
        #[arg(short, long)]
        address: IpAddr,
        /// Local port the client connects to
        #[arg(short, long, default_value_t = 21)]
        port: u16,
        /// Server name from SNI or HOST
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Load and validate a configuration file
    Check {
        #[arg(short, long, default_value = "/etc/autohost/autohost.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Status => admin_get(&cli.url, &cli.key, "/admin/status").await?,
        Commands::Bindings => admin_get(&cli.url, &cli.key, "/admin/bindings").await?,
        Commands::Resolve {
            config,
            address,
            port,
            name,
        } => resolve(&config, address, port, name.as_deref())?,
        Commands::Check { config } => match load_config(&config) {
            Ok(_) => println!("{}: OK", config.display()),
            Err(e) => {
                eprintln!("{}: {}", config.display(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}

async fn admin_get(url: &str, key: &str, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", key))?);

    let res = reqwest::Client::new()
        .get(format!("{}{}", url, path))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

fn resolve(
    config: &std::path::Path,
    address: IpAddr,
    port: u16,
    name: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config)?;
    let Some(template) = config.autohost.config.map(ConfigTemplate::new) else {
        return Err("autohost.config is not set".into());
    };

    let path = template.resolve(address, port, name);
    println!("path: {}", path.display());

    let conn = Connection::new(SocketAddr::new(address, port), SocketAddr::new(address, 0));
    match DescriptorLoader::default().load(&path, &conn) {
        Ok(descriptor) => println!("{}", serde_json::to_string_pretty(&descriptor)?),
        Err(e) => println!("no descriptor: {}", e),
    }
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
