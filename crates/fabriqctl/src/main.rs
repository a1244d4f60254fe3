//! fabriqctl - terminal client for the fabriq query daemon.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use fabriq_common::{AnswerRole, AskResponse, PlanSource};
use owo_colors::OwoColorize;

const DEFAULT_URL: &str = "http://127.0.0.1:7601";

#[derive(Parser, Debug)]
#[command(name = "fabriqctl", version, about = "Ask the store a question")]
struct Cli {
    /// Daemon base URL
    #[arg(long, default_value = DEFAULT_URL)]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask a natural-language question about the catalog
    Ask {
        /// The question, quoted
        question: String,

        /// Print the raw JSON response instead of formatted output
        #[arg(long)]
        json: bool,
    },
    /// Check daemon health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Command::Ask { question, json } => ask(&client, &cli.url, &question, json).await,
        Command::Health => health(&client, &cli.url).await,
    }
}

async fn ask(client: &reqwest::Client, url: &str, question: &str, raw_json: bool) -> Result<()> {
    let response = client
        .post(format!("{}/v1/ask", url.trim_end_matches('/')))
        .json(&serde_json::json!({ "question": question }))
        .send()
        .await
        .map_err(|e| anyhow!("could not reach fabriqd at {}: {}", url, e))?;

    let body: AskResponse = response.json().await?;

    if raw_json {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    print_response(&body);
    if !body.ok {
        std::process::exit(1);
    }
    Ok(())
}

fn print_response(body: &AskResponse) {
    if body.ok {
        println!("{}", body.answer.bold());
    } else {
        let message = body.error.as_deref().unwrap_or("unknown error");
        println!("{}", message.red().bold());
        if let Some(detail) = &body.detail {
            println!("{}", format!("detail: {}", detail).dimmed());
        }
    }

    let source = match body.planner_source {
        Some(PlanSource::Llm) => "llm",
        Some(PlanSource::Fallback) => "fallback",
        Some(PlanSource::Smalltalk) => "smalltalk",
        Some(PlanSource::Blocked) => "blocked",
        None => "-",
    };
    let role = match body.role {
        AnswerRole::User => "user",
        AnswerRole::Admin => "admin",
    };
    println!(
        "{}",
        format!(
            "source: {}  results: {}  audience: {}",
            source, body.result_count, role
        )
        .dimmed()
    );
    if let Some(query) = &body.mongodb_query {
        println!("{}", format!("query: {}", query).dimmed());
    }
}

async fn health(client: &reqwest::Client, url: &str) -> Result<()> {
    let response = client
        .get(format!("{}/v1/health", url.trim_end_matches('/')))
        .send()
        .await
        .map_err(|e| anyhow!("could not reach fabriqd at {}: {}", url, e))?;

    let body: serde_json::Value = response.json().await?;
    println!(
        "{} v{} (up {}s, {} collections)",
        body["status"].as_str().unwrap_or("unknown").green().bold(),
        body["version"].as_str().unwrap_or("?"),
        body["uptime_seconds"],
        body["collections"]
    );
    Ok(())
}
