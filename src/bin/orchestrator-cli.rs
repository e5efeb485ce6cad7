use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};

#[derive(Parser)]
#[command(name = "orchestrator-cli")]
#[command(about = "Management CLI for the guard orchestrator", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check orchestrator liveness
    Status,
    /// List registered guard services
    Services,
    /// Show circuit breaker state per service
    Circuits,
    /// Register a service location
    Register {
        name: String,
        url: String,
    },
    /// Remove a service registration
    Unregister {
        name: String,
    },
    /// Send one orchestration request
    Dispatch {
        service: String,
        /// JSON object forwarded as the payload
        #[arg(short, long)]
        payload: Option<String>,
        /// Allow a fallback response
        #[arg(long)]
        fallback: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Status => client.get(format!("{}/health", base)).send().await?,
        Commands::Services => client.get(format!("{}/v1/services", base)).send().await?,
        Commands::Circuits => client.get(format!("{}/v1/circuits", base)).send().await?,
        Commands::Register { name, url } => {
            client
                .post(format!("{}/v1/services", base))
                .json(&json!({ "name": name, "url": url }))
                .send()
                .await?
        }
        Commands::Unregister { name } => {
            client
                .delete(format!("{}/v1/services/{}", base, name))
                .send()
                .await?
        }
        Commands::Dispatch { service, payload, fallback } => {
            let payload: Map<String, Value> = match payload {
                Some(raw) => serde_json::from_str(&raw)?,
                None => Map::new(),
            };
            client
                .post(format!("{}/v1/orchestrate", base))
                .json(&json!({
                    "service_type": service,
                    "payload": payload,
                    "fallback_enabled": fallback,
                }))
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: orchestrator returned status {}", status);
    }

    let text = res.text().await?;
    if text.trim().is_empty() {
        if status.is_success() {
            println!("ok");
        }
        return Ok(());
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
