use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use tokio::signal;
use tracing::info;

use pepr::config::PdpConfig;
use pepr::domain::Subscription;
use pepr::feed::PdpClient;
use pepr::observability::init_tracing;

/// Decision tap: send a subscription to the PDP and print what it decides.
///
/// Useful for probing policies and watching decision streams without
/// wiring up a full enforcement point.
#[derive(Debug, Parser)]
#[command(name = "pepr")]
#[command(about = "Decision tap for a PDP decision API")]
struct Cli {
    #[command(flatten)]
    config: PdpConfig,

    /// Path to a JSON subscription file ('-' reads stdin)
    #[arg(long, conflicts_with = "subscription")]
    file: Option<PathBuf>,

    /// Inline JSON subscription
    #[arg(long)]
    subscription: Option<String>,

    /// Follow the decision stream instead of a single decide-once call
    #[arg(long)]
    stream: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.config.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pdp = %cli.config.base_url,
        "Starting pepr decision tap"
    );

    let subscription = load_subscription(&cli)?;
    let client = PdpClient::new(cli.config.clone()).context("Failed to build PDP client")?;

    if cli.stream {
        let mut decisions = Box::pin(client.decide(&subscription));
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                maybe_decision = decisions.next() => {
                    match maybe_decision {
                        Some(decision) => println!("{}", serde_json::to_string(&decision)?),
                        None => break,
                    }
                }
                _ = &mut shutdown => break,
            }
        }
        info!("Decision stream closed");
    } else {
        let decision = client.decide_once(&subscription).await;
        println!("{}", serde_json::to_string(&decision)?);
    }

    Ok(())
}

fn load_subscription(cli: &Cli) -> anyhow::Result<Subscription> {
    let raw = match (&cli.file, &cli.subscription) {
        (Some(path), _) if path.as_os_str() == "-" => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read subscription from stdin")?;
            buf
        }
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read subscription file {}", path.display()))?,
        (None, Some(inline)) => inline.clone(),
        (None, None) => anyhow::bail!("Provide a subscription via --file or --subscription"),
    };

    serde_json::from_str(&raw).context("Subscription is not valid JSON")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cli_with(file: Option<PathBuf>, subscription: Option<String>) -> Cli {
        Cli {
            config: PdpConfig::default(),
            file,
            subscription,
            stream: false,
        }
    }

    #[test]
    fn test_load_subscription_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"subject": "alice", "action": "read", "resource": "report"}}"#
        )
        .unwrap();

        let cli = cli_with(Some(file.path().to_path_buf()), None);
        let subscription = load_subscription(&cli).unwrap();

        assert_eq!(subscription.subject, "alice");
        assert_eq!(subscription.action, "read");
    }

    #[test]
    fn test_load_subscription_inline() {
        let cli = cli_with(
            None,
            Some(r#"{"subject": "bob", "action": "write", "resource": "doc"}"#.to_string()),
        );
        let subscription = load_subscription(&cli).unwrap();

        assert_eq!(subscription.subject, "bob");
    }

    #[test]
    fn test_load_subscription_requires_input() {
        let cli = cli_with(None, None);
        assert!(load_subscription(&cli).is_err());
    }

    #[test]
    fn test_load_subscription_rejects_garbage() {
        let cli = cli_with(None, Some("not json".to_string()));
        assert!(load_subscription(&cli).is_err());
    }
}
