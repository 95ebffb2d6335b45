use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use household::config::ConfigError;
use household::{
    ApiRequest, AuthError, ClientConfig, FileStorage, NoopCache, RequestError, Route, SessionStore,
};
use reqwest::Method;
use serde_json::Value;
use tracing::Level;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("{}: {}", title(.0), .0)]
    Auth(#[from] AuthError),
    #[error("not signed in; run `household login` first")]
    NotSignedIn,
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),
    #[error("invalid header `{0}`; expected NAME:VALUE")]
    InvalidHeader(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Prefix auth failures with the alert title the app would show.
fn title(err: &AuthError) -> &'static str {
    match err {
        AuthError::Authentication { operation, .. } => operation.alert_title(),
        _ => "Error",
    }
}

#[derive(Parser, Debug)]
#[command(name = "household", about = "Household finance session CLI")]
struct Cli {
    /// API origin; overrides `HOUSEHOLD_API_URL`.
    #[arg(long)]
    base_url: Option<String>,

    /// Credential directory; overrides `HOUSEHOLD_STORAGE_DIR`.
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the restored session.
    Status,
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "HOUSEHOLD_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, env = "HOUSEHOLD_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        name: String,
        /// Join an existing family instead of creating one.
        #[arg(long)]
        family_id: Option<String>,
    },
    Logout,
    /// Send an authenticated request and print the JSON response.
    Request {
        method: String,
        endpoint: String,
        #[arg(long)]
        data: Option<String>,
        /// Extra header as `NAME:VALUE`; repeatable.
        #[arg(long = "header")]
        headers: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(url) = &cli.base_url {
        config = config.with_base_url(url)?;
    }
    if let Some(dir) = cli.storage_dir {
        config = config.with_storage_dir(dir);
    }

    let storage = Arc::new(FileStorage::new(config.storage_dir.clone()));
    let store = SessionStore::from_config(&config, storage, Arc::new(NoopCache))?;
    store.restore().await;

    match cli.command {
        Command::Status => {
            let session = store.snapshot();
            match (session.route(), session.identity) {
                (Route::Main, Some(identity)) => print_json(&serde_json::to_value(identity)?)?,
                _ => println!("signed out"),
            }
        }
        Command::Login { email, password } => {
            let identity = store.login(&email, &password).await?;
            print_json(&serde_json::to_value(identity)?)?;
        }
        Command::Register { email, password, name, family_id } => {
            let identity = store.register(&email, &password, &name, family_id.as_deref()).await?;
            print_json(&serde_json::to_value(identity)?)?;
        }
        Command::Logout => {
            store.logout().await?;
            println!("signed out");
        }
        Command::Request { method, endpoint, data, headers } => {
            if !store.snapshot().is_authenticated() {
                return Err(CliError::NotSignedIn);
            }
            let request = build_request(&method, endpoint, data.as_deref(), &headers)?;
            let value = store.send(request).await?;
            print_json(&value)?;
        }
    }
    Ok(())
}

fn build_request(
    method: &str,
    endpoint: String,
    data: Option<&str>,
    headers: &[String],
) -> Result<ApiRequest, CliError> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| CliError::InvalidMethod(method.to_owned()))?;
    let mut request = ApiRequest::new(method, endpoint);
    if let Some(raw) = data {
        let body: Value = serde_json::from_str(raw)?;
        request = request.json(&body)?;
    }
    for raw in headers {
        let Some((name, value)) = raw.split_once(':') else {
            return Err(CliError::InvalidHeader(raw.clone()));
        };
        request = request.try_header(name.trim(), value.trim())?;
    }
    Ok(request)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
