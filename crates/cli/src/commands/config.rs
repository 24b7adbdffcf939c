use clap::Subcommand;
use flock_core::{
    config::AppConfig,
    upstream::{HttpClient, HttpClientConfig, HttpNodeClient, NodeClient},
};
use std::{path::Path, time::Duration};

use super::utils::{print_error, print_info, print_success, CliError, CliResult};

const SAMPLE_CONFIG: &str = r#"# flock configuration
# Every value can be overridden with FLOCK__<SECTION>__<FIELD> environment variables.

environment = "production"

[server]
bind_address = "0.0.0.0"
bind_port = 8080
max_concurrent_requests = 256
request_timeout_seconds = 30
max_body_bytes = 1048576

[node]
url = "http://127.0.0.1:5000/"
info_path = ""
timeout_seconds = 9
# headers = { "x-api-key" = "YOUR_API_KEY" }

[routes]
blockchain_path = "/blockchain"
contracts_path = "/contracts"

[store]
path = "data/flock.redb"

[finality]
poll_interval_seconds = 3

[sync]
enabled = true
window_size = 100
safety_margin = 100
window_delay_ms = 100
idle_interval_seconds = 3

[info]
# public_domain = "https://engine.example.com/"
# notice = "Served through flock."

[metrics]
enabled = true

[logging]
level = "info"
format = "json"
"#;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate the current configuration
    Validate {
        /// Path to config file (defaults to config/config.toml)
        #[arg(short, long, default_value = "config/config.toml")]
        file: String,
    },

    /// Show the effective configuration (file plus environment overrides)
    Show {
        /// Path to config file (defaults to config/config.toml)
        #[arg(short, long, default_value = "config/config.toml")]
        file: String,

        /// Show sensitive values (node header values)
        #[arg(long)]
        show_sensitive: bool,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output path for the config file
        #[arg(short, long, default_value = "config/config.toml")]
        output: String,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Read the status document of the configured node
    TestNode {
        /// Path to config file (defaults to config/config.toml)
        #[arg(short, long, default_value = "config/config.toml")]
        file: String,

        /// Timeout in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },
}

pub async fn handle_config_command(command: ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Validate { file } => validate_config(&file),
        ConfigCommands::Show { file, show_sensitive } => show_config(&file, show_sensitive),
        ConfigCommands::Generate { output, force } => generate_config(&output, force),
        ConfigCommands::TestNode { file, timeout } => test_node(&file, timeout).await,
    }
}

fn load_config(file: &str) -> CliResult<AppConfig> {
    AppConfig::from_file(file).map_err(|e| CliError::Config(e.to_string()))
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}

fn validate_config(file: &str) -> CliResult<()> {
    if !Path::new(file).exists() {
        print_error(&format!("Configuration file not found: {file}"));
        return Err(CliError::Config(format!("File not found: {file}")));
    }

    print_info(&format!("Loading configuration from {file}..."));
    let config = load_config(file)?;

    print_info("Validating configuration...");
    config.validate().map_err(CliError::Config)?;

    print_success("Configuration is valid!");

    println!("Configuration Summary:");
    println!("  Server: {}:{}", config.server.bind_address, config.server.bind_port);
    println!("  Node: {}", config.node.url);
    println!("  Store: {}", config.store.path);
    println!("  Backfill: {}", enabled(config.sync.enabled));
    println!("  Metrics: {}", enabled(config.metrics.enabled));

    Ok(())
}

/// Replaces header values so the output can be shared.
fn redact(mut config: AppConfig) -> AppConfig {
    for value in config.node.headers.values_mut() {
        *value = "[hidden - use --show-sensitive to reveal]".to_string();
    }
    config
}

fn show_config(file: &str, show_sensitive: bool) -> CliResult<()> {
    let mut config = load_config(file)?;
    if !show_sensitive {
        config = redact(config);
    }

    let rendered =
        toml::to_string_pretty(&config).map_err(|e| CliError::General(e.to_string()))?;

    println!("# Effective configuration from {file}");
    println!("{rendered}");

    Ok(())
}

fn generate_config(output: &str, force: bool) -> CliResult<()> {
    if Path::new(output).exists() && !force {
        return Err(CliError::Config(format!(
            "File {output} already exists. Use --force to overwrite."
        )));
    }

    if let Some(parent) = Path::new(output).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(output, SAMPLE_CONFIG)?;

    print_success(&format!("Sample configuration generated: {output}"));
    print_info("Remember to:");
    print_info("  1. Point node.url at your node");
    print_info("  2. Set info.public_domain to the address clients use");

    Ok(())
}

async fn test_node(file: &str, timeout: u64) -> CliResult<()> {
    let config = load_config(file)?;

    let http = HttpClient::with_config(HttpClientConfig {
        user_agent: config.node.user_agent.clone(),
        headers: config.node.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        ..HttpClientConfig::default()
    })?;
    let node = HttpNodeClient::new(
        http,
        &config.node.url,
        &config.node.info_path,
        Duration::from_secs(timeout),
    );

    print!("Testing {}: ", config.node.url);
    let start = std::time::Instant::now();
    match node.node_info().await {
        Ok(info) => {
            println!("[OK] ({}ms)", start.elapsed().as_millis());
            println!("  Last block: {}", info.last_block_number);
            println!("  Last verified block: {}", info.last_verified_block_number);
            if !info.chain_id.is_empty() {
                println!("  Chain: {}", info.chain_id);
            }
            print_success("Node is reachable");
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] Failed: {e}");
            print_info("Check node.url, node.info_path and network connectivity");
            Err(e.into())
        }
    }
}
