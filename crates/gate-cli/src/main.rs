use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

const DEFAULT_SERVER: &str = "http://127.0.0.1:5000";

#[derive(Parser)]
#[command(name = "gate", about = "Face recognition gate CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit an image for recognition (opens the door on a match)
    Recognize {
        /// Image file to upload
        image: PathBuf,
        /// Base URL of the gated daemon
        #[arg(short, long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Show daemon status
    Status {
        #[arg(short, long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// List identities enrolled in the encoding directory
    Gallery {
        /// Encoding directory
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Recognize { image, server } => recognize(&image, &server).await,
        Commands::Status { server } => status(&server).await,
        Commands::Gallery { db } => gallery(db),
    }
}

async fn recognize(image: &Path, server: &str) -> Result<()> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("reading {}", image.display()))?;
    let file_name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    tracing::debug!(bytes = bytes.len(), %file_name, "uploading image");

    let form = reqwest::multipart::Form::new()
        .part("image", reqwest::multipart::Part::bytes(bytes).file_name(file_name));
    let response = reqwest::Client::new()
        .post(endpoint(server, "face-recognition"))
        .multipart(form)
        .send()
        .await
        .with_context(|| format!("contacting {server}"))?;

    let status = response.status();
    let body: serde_json::Value = response.json().await.context("decoding response")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        anyhow::bail!("server answered {status}");
    }
    Ok(())
}

async fn status(server: &str) -> Result<()> {
    let body: serde_json::Value = reqwest::get(endpoint(server, "health"))
        .await
        .with_context(|| format!("contacting {server}"))?
        .error_for_status()?
        .json()
        .await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn gallery(db: Option<PathBuf>) -> Result<()> {
    let dir = db.unwrap_or_else(gate_core::default_db_dir);
    let gallery = gate_core::Gallery::load(&dir)?;
    if gallery.is_empty() {
        println!("No identities enrolled in {}", dir.display());
        return Ok(());
    }
    for model in gallery.models() {
        println!(
            "{:<20} {:<24} {}",
            model.label,
            model.id,
            model.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("{} model(s), {} identities", gallery.len(), gallery.labels().len());
    Ok(())
}

fn endpoint(server: &str, path: &str) -> String {
    format!("{}/{path}", server.trim_end_matches('/'))
}
