//! Courier CLI - command-line client for the Courier daemon

mod rpc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rpc::RpcClient;
use serde::Deserialize;
use serde_json::{json, Value};
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9627";

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Courier agent task pipeline CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "COURIER_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a conversation for the agent to answer
    Submit {
        #[arg(long)]
        user: String,

        #[arg(long)]
        agent: String,

        #[arg(long)]
        conversation: String,

        /// Where the result is POSTed
        #[arg(long)]
        webhook: String,

        /// Message as `role:content` (bare text is a user message); repeatable
        #[arg(short, long = "message", required = true)]
        messages: Vec<String>,
    },

    /// Show a job
    Status {
        job_id: String,

        /// Print the conversation too
        #[arg(long)]
        messages: bool,
    },

    /// Cancel a queued or running job
    Cancel { job_id: String },

    /// List webhook delivery attempts for a job
    Deliveries { job_id: String },

    /// Show system statistics
    Stats,

    /// Run maintenance operations
    Maintenance {
        /// Force VACUUM even if not needed
        #[arg(long)]
        force_vacuum: bool,

        /// Override the retention window for settled jobs
        #[arg(long)]
        retention_days: Option<i64>,
    },
}

/// `role:content`; text without a known role prefix is a user message
fn parse_message(raw: &str) -> Value {
    match raw.split_once(':') {
        Some((role, content)) if matches!(role, "user" | "assistant" | "tool") => {
            json!({"role": role, "content": content.trim_start()})
        }
        _ => json!({"role": "user", "content": raw}),
    }
}

#[derive(Deserialize, Tabled)]
struct SubmitResult {
    job_id: String,
    status: String,
}

#[derive(Deserialize, Tabled)]
struct JobRow {
    job_id: String,
    status: String,
    delivery_status: String,
    attempts: u32,
    max_attempts: u32,
    #[tabled(display_with = "display_opt")]
    last_error: Option<String>,
}

#[derive(Deserialize, Tabled)]
struct AttemptRow {
    sequence: u32,
    timestamp: i64,
    #[tabled(display_with = "display_opt")]
    http_status: Option<u16>,
    outcome: String,
    #[tabled(display_with = "display_opt")]
    error: Option<String>,
}

fn display_opt<T: std::fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn mb(bytes: &Value) -> f64 {
    bytes.as_i64().unwrap_or(0) as f64 / (1024.0 * 1024.0)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = RpcClient::new(cli.rpc_url);

    match cli.command {
        Commands::Submit {
            user,
            agent,
            conversation,
            webhook,
            messages,
        } => {
            let params = json!({
                "user_id": user,
                "agent_id": agent,
                "conversation_id": conversation,
                "webhook_url": webhook,
                "messages": messages.iter().map(|m| parse_message(m)).collect::<Vec<_>>(),
            });

            let result = client.call("agent.submit.v1", params).await?;
            let submitted: SubmitResult = serde_json::from_value(result)?;

            println!("{}", "✓ Job submitted".green().bold());
            println!();
            println!("{}", Table::new(vec![submitted]));
        }

        Commands::Status { job_id, messages } => {
            let result = client
                .call("agent.status.v1", json!({ "job_id": job_id }))
                .await?;
            let conversation = result["messages"].clone();
            let row: JobRow = serde_json::from_value(result).context("Unexpected job shape")?;

            let status = match row.status.as_str() {
                "succeeded" => row.status.green(),
                "failed" => row.status.red(),
                "cancelled" => row.status.yellow(),
                _ => row.status.cyan(),
            };
            println!("{} {}", "Job".bold(), row.job_id);
            println!("  {} {}", "Status:".bold(), status);
            println!("{}", Table::new(vec![row]));

            if messages {
                println!();
                for message in conversation.as_array().into_iter().flatten() {
                    println!(
                        "  {} {}",
                        format!("[{}]", message["role"].as_str().unwrap_or("?")).bold(),
                        message["content"].as_str().unwrap_or_default()
                    );
                }
            }
        }

        Commands::Cancel { job_id } => {
            client
                .call("agent.cancel.v1", json!({ "job_id": job_id }))
                .await?;
            println!("{}", format!("✓ Job {} cancelled", job_id).green().bold());
        }

        Commands::Deliveries { job_id } => {
            let result = client
                .call("agent.deliveries.v1", json!({ "job_id": job_id }))
                .await?;
            let attempts: Vec<AttemptRow> = serde_json::from_value(result["attempts"].clone())
                .context("Unexpected delivery attempt shape")?;

            if attempts.is_empty() {
                println!("{}", "No delivery attempts yet".yellow());
            } else {
                println!("{}", Table::new(attempts));
            }
        }

        Commands::Stats => {
            println!("{}", "System Status".cyan().bold());
            println!();

            match client.call("admin.stats.v1", json!({})).await {
                Ok(stats) => {
                    println!("  {} {}", "RPC URL:".bold(), client.url());
                    println!("  {} {}", "Status:".bold(), "ONLINE".green());
                    println!();
                    println!("  {} {}", "Total Jobs:".bold(), stats["total_jobs"]);
                    println!("  {} {}", "Queued:".bold(), stats["queued_jobs"]);
                    println!("  {} {}", "Running:".bold(), stats["running_jobs"]);
                    println!("  {} {}", "Succeeded:".bold(), stats["succeeded_jobs"]);
                    println!("  {} {}", "Failed:".bold(), stats["failed_jobs"]);
                    println!("  {} {}", "Cancelled:".bold(), stats["cancelled_jobs"]);
                    println!(
                        "  {} {}",
                        "Pending deliveries:".bold(),
                        stats["pending_deliveries"]
                    );
                    println!();
                    println!("  {} {:.2} MB", "DB Size:".bold(), mb(&stats["db_size_bytes"]));
                    println!("  {} {} seconds", "Uptime:".bold(), stats["uptime_seconds"]);
                }
                Err(e) => {
                    println!("  {} {}", "Status:".bold(), "ERROR".red());
                    println!("  {} {}", "Error:".bold(), e);
                }
            }
        }

        Commands::Maintenance {
            force_vacuum,
            retention_days,
        } => {
            if retention_days.is_some_and(|d| d < 0) {
                bail!("--retention-days cannot be negative");
            }
            println!("{}", "Running maintenance...".cyan().bold());

            let params = json!({
                "force_vacuum": force_vacuum,
                "retention_days": retention_days,
            });
            let result = client.call("admin.maintenance.v1", params).await?;

            if result["vacuum_run"].as_bool().unwrap_or(false) {
                println!("  {} VACUUM executed", "✓".green());
            } else {
                println!("  ○ VACUUM skipped (not needed)");
            }
            println!("  {} {} jobs deleted", "✓".green(), result["jobs_deleted"]);
            println!(
                "  {} {:.2} MB → {:.2} MB",
                "DB Size:".bold(),
                mb(&result["db_size_before"]),
                mb(&result["db_size_after"])
            );
        }
    }

    Ok(())
}
