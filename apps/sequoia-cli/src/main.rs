use std::io::Read as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use sequoia_client::{BrowseOptions, Client, ClientConfig, ResourceEndpoint, RetrySpec};
use serde_json::Value;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

/// Sequoia client - authenticated access to resource services
#[derive(Parser)]
#[command(name = "sequoia")]
#[command(about = "Sequoia client - authenticated access to resource services")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Service location override as NAME=URL (repeatable)
    #[arg(long = "service-url", value_parser = parse_service)]
    service_urls: Vec<(String, Url)>,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// Service name from the configuration
    #[arg(short, long, default_value = "metadata")]
    service: String,

    /// Owner the request is scoped to
    #[arg(short, long)]
    owner: String,

    /// Resource collection, e.g. `contents`
    resource: String,
}

#[derive(Args)]
struct BrowseArgs {
    #[command(flatten)]
    target: Target,

    /// Raw query string appended to the first request
    #[arg(long)]
    query: Option<String>,

    /// Filter as KEY=VALUE (repeatable)
    #[arg(long = "criterion", value_parser = parse_pair)]
    criteria: Vec<(String, String)>,

    /// Comma separated list of fields to return
    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,

    /// Stop after this many pages
    #[arg(long)]
    max_pages: Option<usize>,

    /// Walk this inclusion instead of the primary resources
    #[arg(long)]
    linked: Option<String>,

    /// Retry while the primary resource group comes back empty
    #[arg(long)]
    retry_when_empty: bool,
}

impl BrowseArgs {
    fn options(&self) -> BrowseOptions {
        let mut options = BrowseOptions::default().fields(self.fields.iter().cloned());
        for (key, value) in &self.criteria {
            options = options.criterion(key.clone(), value.clone());
        }
        if let Some(query) = &self.query {
            options = options.query_string(query.clone());
        }
        if self.retry_when_empty {
            options = options.retry_spec(RetrySpec::per_group([(
                self.target.resource.as_str(),
                true,
            )]));
        }
        options
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one resource by reference
    Read {
        #[command(flatten)]
        target: Target,
        reference: String,
    },
    /// Browse a collection page by page
    Browse(BrowseArgs),
    /// Store the document read from FILE (`-` for stdin)
    Store {
        #[command(flatten)]
        target: Target,
        file: PathBuf,
    },
    /// Replace a document, guarded by its current version
    Update {
        #[command(flatten)]
        target: Target,
        reference: String,

        /// Version the server must still hold
        #[arg(long)]
        version: String,

        file: PathBuf,
    },
    /// Delete resources by reference
    Delete {
        #[command(flatten)]
        target: Target,
        #[arg(required = true)]
        references: Vec<String>,
    },
    /// Validate configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    if let Some(path) = &cli.config
        && !path.is_file()
    {
        anyhow::bail!("config file does not exist: {}", path.display());
    }

    let config = load_config(cli.config.as_deref(), &cli.service_urls)?;
    let client = Client::new(&config).context("failed to build client")?;

    match cli.command {
        Commands::Check => {
            println!("Configuration is valid");
            for name in client.service_names() {
                let location = client.service(name)?.location().clone();
                println!("  {name}: {location}");
            }
            Ok(())
        }
        Commands::Read { target, reference } => {
            let page = endpoint(&client, &target)?
                .read(&target.owner, &reference)
                .await
                .with_context(|| format!("failed to read {reference}"))?;
            print_json(page.json())
        }
        Commands::Browse(args) => {
            browse(
                &endpoint(&client, &args.target)?,
                &args.target.owner,
                args.options(),
                args.max_pages.unwrap_or(usize::MAX),
                args.linked.as_deref(),
            )
            .await
        }
        Commands::Store { target, file } => {
            let document: Value = serde_json::from_str(&read_document(&file)?)
                .with_context(|| format!("{} is not a JSON document", file.display()))?;
            let page = endpoint(&client, &target)?
                .store(&target.owner, &document)
                .await
                .context("failed to store document")?;
            print_json(page.json())
        }
        Commands::Update {
            target,
            reference,
            version,
            file,
        } => {
            let document = read_document(&file)?;
            let page = endpoint(&client, &target)?
                .update(&target.owner, &document, &reference, &version)
                .await
                .with_context(|| format!("failed to update {reference}"))?;
            print_json(page.json())
        }
        Commands::Delete { target, references } => {
            let references: Vec<&str> = references.iter().map(String::as_str).collect();
            let page = endpoint(&client, &target)?
                .delete(&target.owner, &references)
                .await
                .context("failed to delete")?;
            tracing::info!(status = %page.status(), count = references.len(), "deleted");
            Ok(())
        }
    }
}

fn init_logging(verbose: u8, json: bool) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(path: Option<&Path>, service_urls: &[(String, Url)]) -> Result<ClientConfig> {
    let services: serde_json::Map<String, Value> = service_urls
        .iter()
        .map(|(name, url)| (name.clone(), Value::String(url.to_string())))
        .collect();
    let config = if services.is_empty() {
        ClientConfig::load(path)
    } else {
        ClientConfig::load_with_overrides(path, &serde_json::json!({ "services": services }))
    }
    .context("failed to load configuration")?;
    tracing::debug!(services = config.services.len(), "configuration loaded");
    Ok(config)
}

fn endpoint(client: &Client, target: &Target) -> Result<ResourceEndpoint> {
    client
        .service(&target.service)?
        .resource(&target.resource)
        .with_context(|| format!("invalid resource {}", target.resource))
}

async fn browse(
    endpoint: &ResourceEndpoint,
    owner: &str,
    options: BrowseOptions,
    max_pages: usize,
    linked: Option<&str>,
) -> Result<()> {
    let cursor = endpoint
        .browse(owner, options)
        .await
        .with_context(|| format!("failed to browse {}", endpoint.resource()))?;

    if let Some(name) = linked {
        let mut batches = Box::pin(cursor.linked(name)?.into_stream().take(max_pages));
        while let Some(batch) = batches.next().await {
            for resource in batch? {
                print_json(&resource)?;
            }
        }
        return Ok(());
    }

    let mut pages = Box::pin(cursor.into_stream().take(max_pages));
    let mut count = 0usize;
    while let Some(page) = pages.next().await {
        for resource in page?.resources() {
            print_json(resource)?;
        }
        count += 1;
    }
    tracing::info!(pages = count, "browse finished");
    Ok(())
}

fn read_document(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut document = String::new();
        std::io::stdin()
            .read_to_string(&mut document)
            .context("failed to read stdin")?;
        return Ok(document);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    Ok((key.to_owned(), value.to_owned()))
}

fn parse_service(raw: &str) -> Result<(String, Url), String> {
    let (name, location) = parse_pair(raw)?;
    let url = Url::parse(&location).map_err(|e| format!("invalid URL for {name}: {e}"))?;
    Ok((name, url))
}
