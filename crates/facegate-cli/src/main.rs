use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;

mod overlay;

#[zbus::proxy(
    interface = "org.facegate.FaceGate1",
    default_service = "org.facegate.FaceGate1",
    default_path = "/org/facegate/FaceGate1"
)]
trait FaceGate {
    async fn register(&self) -> zbus::Result<String>;
    async fn authenticate(&self) -> zbus::Result<String>;
    async fn list_records(&self) -> zbus::Result<String>;
    async fn clear_records(&self) -> zbus::Result<u32>;
    async fn status(&self) -> zbus::Result<String>;

    #[zbus(signal)]
    fn collection_tick(&self, payload: String) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "facegate", about = "FaceGate face registration and authentication CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register your face in the gallery
    Register,
    /// Authenticate against the registered gallery
    Auth,
    /// List registered face records
    List,
    /// Remove all registered face records
    Clear,
    /// Show daemon status
    Status,
}

#[derive(Clone, Copy)]
enum WindowAction {
    Register,
    Authenticate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = zbus::Connection::session()
        .await
        .context("connecting to the session bus (is facegated running?)")?;
    let proxy = FaceGateProxy::new(&connection).await?;

    match cli.command {
        Commands::Register => {
            let reply = run_window(&proxy, WindowAction::Register).await?;
            print_register_outcome(&reply);
        }
        Commands::Auth => {
            let reply = run_window(&proxy, WindowAction::Authenticate).await?;
            print_auth_outcome(&reply);
        }
        Commands::List => {
            let raw = proxy.list_records().await?;
            print_records(&raw);
        }
        Commands::Clear => {
            let removed = proxy.clear_records().await?;
            println!("removed {removed} record(s)");
        }
        Commands::Status => {
            let raw = proxy.status().await?;
            print_status(&raw);
        }
    }

    Ok(())
}

/// Drive one collection window: start the method call, and render
/// CollectionTick signals as a live overlay until the call returns.
async fn run_window(proxy: &FaceGateProxy<'static>, action: WindowAction) -> Result<String> {
    let mut ticks = proxy.receive_collection_tick().await?;
    let renderer = overlay::OverlayRenderer::from_terminal();

    let call_proxy = proxy.clone();
    let mut call = tokio::spawn(async move {
        match action {
            WindowAction::Register => call_proxy.register().await,
            WindowAction::Authenticate => call_proxy.authenticate().await,
        }
    });

    loop {
        tokio::select! {
            joined = &mut call => {
                let reply = joined.context("window task failed")??;
                let _ = renderer.clear();
                return Ok(reply);
            }
            Some(signal) = ticks.next() => {
                if let Ok(args) = signal.args() {
                    let _ = renderer.draw(args.payload());
                }
            }
        }
    }
}

fn print_register_outcome(reply: &str) {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(reply) else {
        println!("{reply}");
        return;
    };
    if v["ok"].as_bool().unwrap_or(false) {
        println!(
            "face registered: gallery holds {} record(s), averaged {} sample(s)",
            v["gallery_len"], v["samples"]
        );
    } else {
        println!("registration failed: {}", v["error"].as_str().unwrap_or("?"));
    }
}

fn print_auth_outcome(reply: &str) {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(reply) else {
        println!("{reply}");
        return;
    };
    if !v["ok"].as_bool().unwrap_or(false) {
        println!("authentication failed: {}", v["error"].as_str().unwrap_or("?"));
        return;
    }
    if v["accepted"].as_bool().unwrap_or(false) {
        println!(
            "authentication succeeded: score {}, matched record #{} ({} compared, {} skipped)",
            v["score"], v["best_index"], v["compared"], v["skipped"]
        );
    } else {
        println!(
            "authentication rejected: best score {} ({} compared, {} skipped)",
            v["score"], v["compared"], v["skipped"]
        );
    }
}

fn print_records(raw: &str) {
    let Ok(records) = serde_json::from_str::<Vec<serde_json::Value>>(raw) else {
        println!("{raw}");
        return;
    };
    if records.is_empty() {
        println!("no registered records");
        return;
    }
    for (i, r) in records.iter().enumerate() {
        let when = r["timestamp"]
            .as_i64()
            .and_then(chrono::DateTime::from_timestamp_millis)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "?".to_string());
        println!(
            "{i:>3}  {when}  descriptor length {}",
            r["descriptor_len"]
        );
    }
}

fn print_status(raw: &str) {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(raw) else {
        println!("{raw}");
        return;
    };
    println!(
        "facegated {}: {} record(s), policy {}, collecting: {}",
        v["version"].as_str().unwrap_or("?"),
        v["gallery_len"],
        v["policy"].as_str().unwrap_or("?"),
        v["collecting"]
    );
}
