//! Voirie CLI
//!
//! Command-line client for a running Voirie API:
//! - Log in and keep the session token
//! - List, create and update signalements
//! - Export and import CSV
//! - Trigger Firestore sync
//! - Generate a config file

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "voirie-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Command-line client for the Voirie road-issue API")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// API server URL
    #[arg(long, default_value = "http://localhost:8080", global = true)]
    pub api_url: String,

    /// Session token (default: $VOIRIE_TOKEN)
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open a session and print its token
    Login {
        email: String,
        password: String,
    },

    /// List signalements
    List {
        /// Status code (nouveau, en_cours, termine, annule)
        #[arg(short, long)]
        status: Option<String>,
        /// Text searched in description and address
        #[arg(short = 'q', long)]
        search: Option<String>,
        /// Only reports since (now-7d, 2024-01-31, RFC 3339)
        #[arg(long)]
        since: Option<String>,
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Report a road defect
    Create {
        latitude: f64,
        longitude: f64,
        description: String,
        #[arg(short, long)]
        adresse: Option<String>,
        /// Surface in m²
        #[arg(short, long)]
        surface: Option<f64>,
        /// Severity 1-10
        #[arg(short, long)]
        niveau: Option<u8>,
    },

    /// Change the status of a signalement
    Status {
        id: i64,
        status: String,
        #[arg(short, long)]
        commentaire: Option<String>,
    },

    /// Signalement statistics
    Stats,

    /// Server health
    Health,

    /// Export signalements
    Export {
        /// csv, json or ndjson
        #[arg(long, default_value = "csv")]
        export_format: String,
        #[arg(short, long)]
        status: Option<String>,
        #[arg(long)]
        since: Option<String>,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import signalements from a CSV file
    Import {
        path: PathBuf,
        /// Validate only, write nothing
        #[arg(long)]
        dry_run: bool,
        #[arg(short, long)]
        delimiter: Option<char>,
    },

    /// Run or inspect Firestore sync (all, push, pull, status)
    Sync {
        #[arg(default_value = "all")]
        action: String,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

struct Api {
    client: Client,
    base: String,
    token: Option<String>,
}

impl Api {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base.trim_end_matches('/'), path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authed(self.client.get(self.url(path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authed(self.client.post(self.url(path)))
    }

    fn put(&self, path: &str) -> RequestBuilder {
        self.authed(self.client.put(self.url(path)))
    }
}

/// Fail with the server's error message on non-2xx
async fn check(response: Response) -> anyhow::Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(text);
    bail!("request failed ({}): {}", status, message)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let api = Api {
        client: Client::new(),
        base: cli.api_url.clone(),
        token: cli.token.clone().or_else(|| std::env::var("VOIRIE_TOKEN").ok()),
    };
    let json_output = cli.format == "json";

    match cli.command {
        Commands::Login { email, password } => {
            let body = serde_json::json!({ "email": email, "password": password });
            let response = check(api.post("/api/auth/login").json(&body).send().await?).await?;
            let data: Value = response.json().await?;

            if json_output {
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!("Logged in as {}", data["user"]["name"].as_str().unwrap_or("-"));
                println!("Expires: {}", data["expires_at"].as_str().unwrap_or("-"));
                println!();
                println!("export VOIRIE_TOKEN={}", data["token"].as_str().unwrap_or(""));
            }
        }

        Commands::List {
            status,
            search,
            since,
            limit,
        } => {
            let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
            if let Some(s) = status {
                query.push(("status", s));
            }
            if let Some(q) = search {
                query.push(("search", q));
            }
            if let Some(s) = since {
                query.push(("since", s));
            }

            let response = check(api.get("/api/signalements").query(&query).send().await?).await?;
            let rows: Vec<Value> = response.json().await?;

            if json_output {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No signalements.");
            } else {
                print_signalements(&rows);
            }
        }

        Commands::Create {
            latitude,
            longitude,
            description,
            adresse,
            surface,
            niveau,
        } => {
            let body = serde_json::json!({
                "latitude": latitude,
                "longitude": longitude,
                "description": description,
                "adresse": adresse,
                "surface": surface,
                "niveau": niveau,
            });
            let response = check(api.post("/api/signalements").json(&body).send().await?).await?;
            let created: Value = response.json().await?;
            println!(
                "Created signalement {} (budget: {})",
                created["id"],
                created["budget"].as_f64().map(|b| format!("{:.2}", b)).unwrap_or_else(|| "-".into())
            );
        }

        Commands::Status {
            id,
            status,
            commentaire,
        } => {
            let body = serde_json::json!({ "status": status, "commentaire": commentaire });
            let response = check(
                api.put(&format!("/api/signalements/{}/status", id))
                    .json(&body)
                    .send()
                    .await?,
            )
            .await?;
            let updated: Value = response.json().await?;
            println!("Signalement {} is now {}", id, updated["status"].as_str().unwrap_or("-"));
        }

        Commands::Stats => {
            let response = check(api.get("/api/signalements/statistics").send().await?).await?;
            let stats: Value = response.json().await?;

            if json_output {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else if let Some(map) = stats.as_object() {
                for (key, value) in map {
                    println!("{:<24} {}", key, value);
                }
            }
        }

        Commands::Health => {
            let response = api.get("/health").send().await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let health: Value = resp.json().await?;

                    println!("Voirie v{}", health["version"].as_str().unwrap_or("?"));
                    println!();
                    println!("Status:    {}", health["status"].as_str().unwrap_or("unknown"));
                    println!("Database:  {}", health["database"].as_str().unwrap_or("unknown"));
                    println!("Sync:      {}", health["sync"].as_str().unwrap_or("unknown"));
                    println!("WebSocket: {}", health["websocket_connections"].as_u64().unwrap_or(0));

                    if let Some(uptime) = health["uptime_seconds"].as_u64() {
                        println!();
                        println!("Uptime: {}", format_duration(uptime));
                    }
                }
                Ok(resp) => bail!("API returned error: {}", resp.status()),
                Err(e) => {
                    eprintln!("Cannot connect to Voirie API at {}", cli.api_url);
                    eprintln!();
                    eprintln!("Make sure the server is running:");
                    eprintln!("  cargo run --bin voirie");
                    return Err(e.into());
                }
            }
        }

        Commands::Export {
            export_format,
            status,
            since,
            output,
        } => {
            let mut query: Vec<(&str, String)> = vec![("format", export_format)];
            if let Some(s) = status {
                query.push(("status", s));
            }
            if let Some(s) = since {
                query.push(("since", s));
            }

            let response =
                check(api.get("/api/export/signalements").query(&query).send().await?).await?;
            let data = response.bytes().await?;

            match output {
                Some(path) => {
                    std::fs::write(&path, &data)?;
                    println!("Exported to {:?}", path);
                }
                None => print!("{}", String::from_utf8_lossy(&data)),
            }
        }

        Commands::Import {
            path,
            dry_run,
            delimiter,
        } => {
            let csv = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read {:?}", path))?;

            let mut query: Vec<(&str, String)> = vec![("dry_run", dry_run.to_string())];
            if let Some(d) = delimiter {
                query.push(("delimiter", d.to_string()));
            }

            let response = check(
                api.post("/api/import/signalements")
                    .query(&query)
                    .header("Content-Type", "text/csv")
                    .body(csv)
                    .send()
                    .await?,
            )
            .await?;
            let result: Value = response.json().await?;

            println!("Import results:");
            println!("  Rows processed: {}", result["rows_processed"]);
            println!("  Rows imported:  {}", result["rows_imported"]);
            println!("  Rows rejected:  {}", result["rows_rejected"]);

            if let Some(rejected) = result["rejected"].as_array().filter(|r| !r.is_empty()) {
                println!();
                println!("Rejected (first 10):");
                for row in rejected.iter().take(10) {
                    println!(
                        "  line {}: {}",
                        row["line"],
                        row["reason"].as_str().unwrap_or("-")
                    );
                }
            }

            if dry_run {
                println!();
                println!("(Dry run - no data was imported)");
            }
        }

        Commands::Sync { action } => {
            let request = match action.as_str() {
                "all" | "push" | "pull" => api.post(&format!("/api/sync/{}", action)),
                "status" => api.get("/api/sync/status"),
                other => bail!("unknown sync action: {} (all, push, pull, status)", other),
            };
            let response = check(request.send().await?).await?;
            let data: Value = response.json().await?;

            if json_output || action == "status" {
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!(
                    "Sync {}: pushed {}, pulled {}, conflicts {}, failed {} ({} ms)",
                    action,
                    data["pushed"],
                    data["pulled"],
                    data["conflicts"],
                    data["failed"],
                    data["duration_ms"]
                );
            }
        }

        Commands::Config { output } => {
            let config = voirie::config::generate_default_config();

            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", config),
            }
        }
    }

    Ok(())
}

fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else if seconds < 86400 {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    } else {
        format!("{}d {}h", seconds / 86400, (seconds % 86400) / 3600)
    }
}

fn print_signalements(rows: &[Value]) {
    println!(
        "{:<6} {:<10} {:<12} {:<22} {}",
        "ID", "Status", "Date", "Position", "Description"
    );
    println!("{}", "-".repeat(80));

    for row in rows {
        let date = row["date_signalement"]
            .as_str()
            .and_then(|s| s.get(..10))
            .unwrap_or("-");
        let position = format!(
            "{:.4}, {:.4}",
            row["latitude"].as_f64().unwrap_or(0.0),
            row["longitude"].as_f64().unwrap_or(0.0)
        );
        let description: String = row["description"]
            .as_str()
            .unwrap_or("-")
            .chars()
            .take(40)
            .collect();

        println!(
            "{:<6} {:<10} {:<12} {:<22} {}",
            row["id"].as_i64().unwrap_or(0),
            row["status"].as_str().unwrap_or("-"),
            date,
            position,
            description
        );
    }
}
