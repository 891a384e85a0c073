use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use deepsea::client::GatewayClient;
use deepsea::config::{GatewayConfig, IndexConfig, NetworkConfig, ServerConfig};
use deepsea::gateway::{Gateway, NetworkPublisher, Publisher};
use deepsea::index::CommitIndex;
use deepsea::packet::{DirectorySource, Packet, default_repo_name, pack_with};
use deepsea::server::{AppState, create_router};
use deepsea::store::{CommitStore, GatewayStore, SqliteCommitStore, SqliteGatewayStore};

#[derive(Parser)]
#[command(name = "deepsea")]
#[command(about = "Distribute commits over Usenet", long_about = None)]
struct Cli {
    /// Network configuration file (TOML)
    #[arg(long, global = true, default_value = "deepsea.toml")]
    config: PathBuf,

    /// Data directory for the commit index and gateway databases
    #[arg(long, global = true, default_value = "./data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct PackArgs {
    /// Directory to package
    #[arg(default_value = ".")]
    dir: PathBuf,

    /// Commit message
    #[arg(long, short)]
    message: String,

    /// Repository name (defaults to the directory's name)
    #[arg(long)]
    repo: Option<String>,

    /// Author label carried in the packet
    #[arg(long)]
    author: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Package a directory and print the packet JSON
    Pack {
        #[command(flatten)]
        args: PackArgs,

        /// Write the packet here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Package a directory and publish it
    Push {
        #[command(flatten)]
        args: PackArgs,

        /// Newsgroup to post to (defaults to the configured channel)
        #[arg(long)]
        channel: Option<String>,

        /// Publish through this gateway instead of the news server
        #[arg(long, requires_all = ["key", "secret"])]
        gateway: Option<String>,

        /// Gateway key id
        #[arg(long, env = "DEEPSEA_KEY")]
        key: Option<String>,

        /// Gateway key secret
        #[arg(long, env = "DEEPSEA_SECRET", hide_env_values = true)]
        secret: Option<String>,
    },

    /// Scan the channel and index any new commits
    Scan {
        /// Newsgroup to scan (defaults to the configured channel)
        #[arg(long)]
        channel: Option<String>,

        /// Number of most recent articles to inspect
        #[arg(long)]
        limit: Option<u64>,

        /// Reject packets whose integrity digest does not match
        #[arg(long)]
        verify_digest: bool,
    },

    /// List indexed commits, newest first
    Log {
        /// Only commits for this repository name
        #[arg(long)]
        repo: Option<String>,

        /// Read from a gateway instead of the local index
        #[arg(long)]
        gateway: Option<String>,
    },

    /// Write the files of an indexed commit into a directory
    Restore {
        /// Message id, e.g. alt.test:42
        message_id: String,

        /// Target directory
        dir: PathBuf,
    },

    /// Manage gateway API keys
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Manage the repo names a gateway key owns
    Repo {
        #[command(flatten)]
        remote: GatewayArgs,

        #[command(subcommand)]
        command: RepoCommands,
    },

    /// Start the gateway server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(long, short, default_value = "8080")]
        port: u16,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Issue a new key
    Issue {
        /// Who the key is for
        #[arg(long)]
        owner: String,

        /// Byte quota (defaults to 100 MiB)
        #[arg(long)]
        quota: Option<i64>,
    },

    /// Revoke a key
    Revoke { key_id: String },

    /// Show a key's quota, status and usage
    Show { key_id: String },

    /// List all keys
    List,
}

#[derive(clap::Args)]
struct GatewayArgs {
    /// Gateway base URL
    #[arg(long)]
    gateway: String,

    /// Gateway key id
    #[arg(long, env = "DEEPSEA_KEY")]
    key: String,

    /// Gateway key secret
    #[arg(long, env = "DEEPSEA_SECRET", hide_env_values = true)]
    secret: String,
}

#[derive(Subcommand)]
enum RepoCommands {
    /// List the repo names this key owns
    List,

    /// Give up a repo name
    Release { name: String },

    /// Move ownership to a new name
    Rename { name: String, new_name: String },
}

fn build_packet(args: &PackArgs) -> anyhow::Result<Packet> {
    if !args.dir.is_dir() {
        bail!("Not a directory: {}", args.dir.display());
    }
    let repo = args
        .repo
        .clone()
        .unwrap_or_else(|| default_repo_name(&args.dir));
    let packet = pack_with(
        &DirectorySource::new(&args.dir),
        &repo,
        args.author.as_deref(),
        &args.message,
    )?;
    Ok(packet)
}

fn ensure_data_dir(config: &ServerConfig) -> anyhow::Result<()> {
    fs::create_dir_all(&config.data_dir).with_context(|| {
        format!(
            "Failed to create data directory {}",
            config.data_dir.display()
        )
    })
}

fn open_index(config: &ServerConfig, verify_digest: bool) -> anyhow::Result<CommitIndex> {
    ensure_data_dir(config)?;
    let store = SqliteCommitStore::new(config.commits_db_path())?;
    store.initialize()?;
    Ok(CommitIndex::new(
        Arc::new(store),
        IndexConfig { verify_digest },
    ))
}

fn open_gateway(config: &ServerConfig, network: &NetworkConfig) -> anyhow::Result<Gateway> {
    ensure_data_dir(config)?;
    let store = SqliteGatewayStore::new(config.gateway_db_path())?;
    store.initialize()?;
    let config = GatewayConfig {
        default_channel: network.channel.clone(),
        ..GatewayConfig::default()
    };
    Ok(Gateway::new(
        Arc::new(store),
        Arc::new(NetworkPublisher::new(network.clone())),
        config,
    ))
}

fn run_push(
    network: &NetworkConfig,
    args: &PackArgs,
    channel: Option<String>,
    gateway: Option<String>,
    key: Option<String>,
    secret: Option<String>,
) -> anyhow::Result<()> {
    let packet = build_packet(args)?;

    if let Some(url) = gateway {
        let (Some(key), Some(secret)) = (key, secret) else {
            bail!("--gateway needs --key and --secret");
        };
        let client = GatewayClient::new(&url, &key, &secret)?;
        let resp = client.publish(&packet, channel.as_deref())?;
        if !resp.accepted {
            bail!(
                "Gateway charged {} bytes but {} refused the post",
                resp.bytes,
                resp.channel
            );
        }
        println!(
            "Published {} to {} via {} ({} bytes)",
            resp.repo_name,
            resp.channel,
            client.base_url(),
            resp.bytes
        );
        return Ok(());
    }

    let channel = channel.unwrap_or_else(|| network.channel.clone());
    let publisher = NetworkPublisher::new(network.clone());
    if !publisher.publish(&packet, &channel)? {
        bail!("{channel} refused the post");
    }
    println!("Published {} to {channel}", packet.repo_name);
    Ok(())
}

fn run_scan(
    network: NetworkConfig,
    server: &ServerConfig,
    channel: Option<String>,
    limit: Option<u64>,
    verify_digest: bool,
) -> anyhow::Result<()> {
    let mut network = network;
    if let Some(channel) = channel {
        network.channel = channel;
    }
    if let Some(limit) = limit {
        if limit == 0 {
            bail!("--limit must be positive");
        }
        network.scan_limit = limit;
    }

    let index = open_index(server, verify_digest)?;
    let report = index.scan_network(&network)?;

    println!(
        "Scanned {} article(s) in {}: {} matched, {} new, {} already indexed, {} rejected, {} failed",
        report.scanned,
        report.channel,
        report.matched,
        report.stored,
        report.duplicates,
        report.rejected,
        report.failed
    );
    if let Some(error) = report.error {
        println!("Scan stopped early: {error}");
    }
    Ok(())
}

fn run_log(server: &ServerConfig, repo: Option<String>, gateway: Option<String>) -> anyhow::Result<()> {
    let commits = match gateway {
        Some(url) => GatewayClient::new(&url, "", "")?.list_commits(repo.as_deref())?,
        None => open_index(server, false)?.list_commits(repo.as_deref())?,
    };

    if commits.is_empty() {
        println!("No commits indexed");
        return Ok(());
    }
    for commit in commits {
        println!("{}  {}", commit.created_at, commit.message_id);
        println!("    {} by {}", commit.repo_name, commit.author);
        println!("    {}", commit.message.lines().next().unwrap_or(""));
    }
    Ok(())
}

fn run_restore(server: &ServerConfig, message_id: &str, dir: &Path) -> anyhow::Result<()> {
    let index = open_index(server, false)?;
    let Some(record) = index.get_commit(message_id)? else {
        bail!("No indexed commit {message_id}");
    };
    let written = record.packet()?.restore_to(dir)?;
    println!(
        "Restored {written} file(s) of {} into {}",
        record.repo_name,
        dir.display()
    );
    Ok(())
}

fn run_key(
    server: &ServerConfig,
    network: &NetworkConfig,
    command: KeyCommands,
) -> anyhow::Result<()> {
    let gateway = open_gateway(server, network)?;

    match command {
        KeyCommands::Issue { owner, quota } => {
            let issued = gateway.issue_key(&owner, quota)?;
            println!();
            println!("========================================");
            println!("Key for {owner} (save the secret, it won't be shown again):");
            println!();
            println!("  key:    {}", issued.key_id);
            println!("  secret: {}", issued.secret);
            println!("  quota:  {} bytes", issued.quota_bytes);
            println!("========================================");
            println!();
        }
        KeyCommands::Revoke { key_id } => {
            if !gateway.revoke_key(&key_id)? {
                bail!("No such key: {key_id}");
            }
            println!("Revoked {key_id}");
        }
        KeyCommands::Show { key_id } => {
            let Some(credential) = gateway.credential(&key_id)? else {
                bail!("No such key: {key_id}");
            };
            println!("Key:     {}", credential.key_id);
            println!("Owner:   {}", credential.owner);
            println!("Status:  {}", credential.status.as_str());
            println!(
                "Quota:   {} / {} bytes used",
                credential.used_bytes, credential.quota_bytes
            );
            println!("Created: {}", credential.created_at.to_rfc3339());

            let repos = gateway.list_owned_repos(&key_id)?;
            if !repos.is_empty() {
                let names: Vec<_> = repos.iter().map(|r| r.repo_name.as_str()).collect();
                println!("Repos:   {}", names.join(", "));
            }

            let usage = gateway.usage(&key_id)?;
            if !usage.is_empty() {
                println!();
                for entry in usage {
                    println!(
                        "  {}  {:<8} {} bytes",
                        entry.timestamp.to_rfc3339(),
                        entry.action,
                        entry.bytes_transferred
                    );
                }
            }
        }
        KeyCommands::List => {
            let credentials = gateway.list_credentials()?;
            if credentials.is_empty() {
                println!("No keys issued");
            }
            for c in credentials {
                println!(
                    "{}  {:<8} {:<16} {}/{}",
                    c.key_id,
                    c.status.as_str(),
                    c.owner,
                    c.used_bytes,
                    c.quota_bytes
                );
            }
        }
    }
    Ok(())
}

fn run_repo(remote: &GatewayArgs, command: RepoCommands) -> anyhow::Result<()> {
    let client = GatewayClient::new(&remote.gateway, &remote.key, &remote.secret)?;

    match command {
        RepoCommands::List => {
            let repos = client.list_repos()?;
            if repos.is_empty() {
                println!("No repos owned");
            }
            for repo in repos {
                println!("{}  {}", repo.repo_name, repo.claimed_at.to_rfc3339());
            }
        }
        RepoCommands::Release { name } => {
            client.release_repo(&name)?;
            println!("Released {name}");
        }
        RepoCommands::Rename { name, new_name } => {
            let resp = client.rename_repo(&name, &new_name)?;
            println!("Renamed {} to {}", resp.old_name, resp.new_name);
        }
    }
    Ok(())
}

async fn run_serve(config: ServerConfig, network: NetworkConfig) -> anyhow::Result<()> {
    if network.credentials.is_none() {
        tracing::warn!("No [server] credentials configured; publishes will fail");
    }

    let gateway = open_gateway(&config, &network)?;
    let index = open_index(&config, false)?;
    let state = Arc::new(AppState::new(Arc::new(gateway), Arc::new(index)));

    let app = create_router(state);
    let addr = config.socket_addr()?;

    info!("Starting gateway on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("deepsea=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let network = NetworkConfig::load(&cli.config)?;
    let server = ServerConfig {
        data_dir: cli.data_dir,
        ..ServerConfig::default()
    };

    match cli.command {
        Commands::Pack { args, output } => {
            let wire = build_packet(&args)?.to_wire()?;
            match output {
                Some(path) => {
                    fs::write(&path, &wire)?;
                    println!("Wrote packet to {}", path.display());
                }
                None => println!("{wire}"),
            }
        }
        Commands::Push {
            args,
            channel,
            gateway,
            key,
            secret,
        } => run_push(&network, &args, channel, gateway, key, secret)?,
        Commands::Scan {
            channel,
            limit,
            verify_digest,
        } => run_scan(network, &server, channel, limit, verify_digest)?,
        Commands::Log { repo, gateway } => run_log(&server, repo, gateway)?,
        Commands::Restore { message_id, dir } => run_restore(&server, &message_id, &dir)?,
        Commands::Key { command } => run_key(&server, &network, command)?,
        Commands::Repo { remote, command } => run_repo(&remote, command)?,
        Commands::Serve { host, port } => {
            let config = ServerConfig {
                host,
                port,
                ..server
            };
            // The HTTP stack is async; everything else stays blocking.
            tokio::runtime::Runtime::new()?.block_on(run_serve(config, network))?;
        }
    }

    Ok(())
}
