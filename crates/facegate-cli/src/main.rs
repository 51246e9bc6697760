use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::{IdentityProfile, VerificationOutcome};

#[derive(Parser)]
#[command(name = "facegate", about = "facegate biometric identity CLI")]
struct Cli {
    /// Print the daemon's raw JSON instead of formatted text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new identity from a photo containing exactly one face
    Enroll {
        /// Unique identity key (email address)
        #[arg(short, long)]
        email: String,
        /// Display name
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "")]
        phone: String,
        #[arg(short, long, default_value = "")]
        address: String,
        /// Photo to enroll
        image: PathBuf,
    },
    /// Verify a photo against enrolled identities
    Verify {
        /// Photo to verify
        image: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Delete an enrolled identity
    Delete {
        /// Identity key (email address)
        email: String,
    },
    /// Show daemon status
    Status,
}

#[zbus::proxy(
    interface = "org.facegate.Identity1",
    default_service = "org.facegate.Identity1",
    default_path = "/org/facegate/Identity1"
)]
trait Identity {
    fn enroll(
        &self,
        identity_key: &str,
        display_name: &str,
        phone: &str,
        address: &str,
        image_path: &str,
    ) -> zbus::Result<String>;

    fn verify(&self, image_path: &str) -> zbus::Result<String>;

    fn list_identities(&self) -> zbus::Result<String>;

    fn delete_identity(&self, identity_key: &str) -> zbus::Result<bool>;

    fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    let proxy = IdentityProxy::new(&conn)
        .await
        .context("facegated is not reachable")?;

    match cli.command {
        Commands::Enroll {
            email,
            name,
            phone,
            address,
            image,
        } => {
            let image = absolute_image_path(&image)?;
            tracing::debug!(image = %image, "enrolling");
            let key = proxy
                .enroll(&email, &name, &phone, &address, &image)
                .await
                .map_err(daemon_error)?;
            println!("Enrolled {name} <{key}>");
        }
        Commands::Verify { image } => {
            let image = absolute_image_path(&image)?;
            let json = proxy.verify(&image).await.map_err(daemon_error)?;
            let outcome: VerificationOutcome =
                serde_json::from_str(&json).context("unexpected reply from facegated")?;
            if cli.json {
                println!("{json}");
            } else {
                println!("{}", render_outcome(&outcome));
            }
            if !outcome.is_match() {
                return Ok(ExitCode::from(1));
            }
        }
        Commands::List => {
            let json = proxy.list_identities().await.map_err(daemon_error)?;
            if cli.json {
                println!("{json}");
            } else {
                let identities: Vec<IdentityProfile> =
                    serde_json::from_str(&json).context("unexpected reply from facegated")?;
                println!("{}", render_identities(&identities));
            }
        }
        Commands::Delete { email } => {
            proxy.delete_identity(&email).await.map_err(daemon_error)?;
            println!("Deleted {email}");
        }
        Commands::Status => {
            println!("{}", proxy.status().await.map_err(daemon_error)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// The daemon resolves paths itself, so hand it an absolute one.
fn absolute_image_path(image: &Path) -> Result<String> {
    let path = std::fs::canonicalize(image)
        .with_context(|| format!("cannot open image {}", image.display()))?;
    Ok(path.to_string_lossy().into_owned())
}

/// Surface the daemon's human-readable reason rather than the D-Bus error name.
fn daemon_error(err: zbus::Error) -> anyhow::Error {
    match err {
        zbus::Error::MethodError(_, Some(message), _) => anyhow!(message),
        other => anyhow!(other),
    }
}

fn render_outcome(outcome: &VerificationOutcome) -> String {
    match (&outcome.identity, outcome.result.confidence) {
        (Some(identity), Some(confidence)) => format!(
            "Face matched: {} <{}>\n  Phone:   {}\n  Address: {}\n  Match confidence: {:.2}%",
            identity.display_name, identity.identity_key, identity.phone, identity.address, confidence
        ),
        _ => "Face does not match any enrolled identity".to_string(),
    }
}

fn render_identities(identities: &[IdentityProfile]) -> String {
    if identities.is_empty() {
        return "No identities enrolled".to_string();
    }
    let mut out = format!("{} enrolled identities", identities.len());
    for (i, identity) in identities.iter().enumerate() {
        out.push_str(&format!(
            "\n{:>3}. {} <{}>  {}  {}",
            i + 1,
            identity.display_name,
            identity.identity_key,
            identity.phone,
            identity.address.replace('\n', ", ")
        ));
    }
    out
}
