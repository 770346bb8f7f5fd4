use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::ConclaveConfig;
use conclave_core::agents::profile::DEFAULT_PROFILE;
use conclave_core::{
    AgentFactory, ChatRequest, ChatService, ModelHub, ProfileRegistry, SessionStore,
    YamlProfileStore,
};
use conclave_gateway::GatewayServer;
use conclave_knowledge::{KnowledgeBase, SqliteSessionBackend};

/// Profiles written by `conclave init`
const STARTER_PROFILES: &[(&str, &str)] = &[
    ("default.yaml", include_str!("../config/profiles/default.yaml")),
    ("rag.yaml", include_str!("../config/profiles/rag.yaml")),
    ("manager.yaml", include_str!("../config/profiles/manager.yaml")),
];

#[derive(Parser)]
#[command(name = "conclave")]
#[command(version)]
#[command(about = "Conclave: profile-driven agents with a delegating manager")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory, default config and starter profiles
    Init,

    /// Start the HTTP gateway
    Serve {
        /// Address to bind, overriding the config
        #[arg(long)]
        bind: Option<String>,
    },

    /// Send one message to an agent profile
    Ask {
        /// The message to send
        message: String,

        /// Profile to talk to
        #[arg(short, long, default_value = DEFAULT_PROFILE)]
        profile: String,

        /// Continue an existing session instead of starting one
        #[arg(short, long)]
        session: Option<String>,
    },

    /// List registered profiles
    Profiles,

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Serve { ref bind } => cmd_serve(&cli.config, bind.as_deref()).await,
        Commands::Ask {
            ref message,
            ref profile,
            ref session,
        } => cmd_ask(&cli.config, message, profile, session.clone()).await,
        Commands::Profiles => cmd_profiles(&cli.config).await,
        Commands::Config => cmd_config(&cli.config),
    }
}

/// `--debug` wins, then RUST_LOG, then the config's `[logging] level`
fn init_logging(cli: &Cli) {
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = ConclaveConfig::load(&cli.config)
                .map(|c| c.logging.level)
                .unwrap_or_else(|_| "info".to_string());
            EnvFilter::new(level)
        })
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        tokio::fs::write(&config_path, config::DEFAULT_CONFIG).await?;
        restrict_permissions(&config_path)?;
        info!("Created default config at {}", config_path.display());
    }

    let cfg = ConclaveConfig::load(&Some(config_path.clone()))?;
    let profiles_dir = cfg.profiles_dir();
    tokio::fs::create_dir_all(&profiles_dir).await?;
    for (file, content) in STARTER_PROFILES {
        let path = profiles_dir.join(file);
        if !path.exists() {
            tokio::fs::write(&path, content).await?;
            info!("Created profile {}", path.display());
        }
    }
    tokio::fs::create_dir_all(cfg.data_dir()).await?;

    println!("Conclave initialized at {}", config_dir.display());
    println!("Edit {} to configure model providers.", config_path.display());
    println!("Profiles live in {}", profiles_dir.display());
    Ok(())
}

fn restrict_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict permissions on {}", path.display()))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Everything a chat turn needs, wired from config
struct Services {
    chat: Arc<ChatService>,
    knowledge: Arc<KnowledgeBase>,
}

async fn build_services(cfg: &ConclaveConfig) -> Result<Services> {
    let profiles_dir = cfg.profiles_dir();
    let registry = Arc::new(ProfileRegistry::new(Arc::new(YamlProfileStore::new(
        &profiles_dir,
    ))));
    let loaded = registry
        .load()
        .await
        .context("Failed to load profiles")?;
    info!("Loaded {} profiles from {}", loaded, profiles_dir.display());
    if !registry.contains(DEFAULT_PROFILE).await {
        warn!(
            "No '{}' profile found. Run `conclave init` to create the starter profiles.",
            DEFAULT_PROFILE
        );
    }

    let knowledge = Arc::new(
        KnowledgeBase::open(&cfg.data_dir(), registry.clone())
            .context("Failed to open knowledge base")?,
    );

    let hub = Arc::new(ModelHub::new(cfg.endpoints()));
    let factory = Arc::new(AgentFactory::new(
        hub,
        registry.clone(),
        knowledge.clone(),
        cfg.orchestrator.clone(),
    ));
    let sessions = Arc::new(
        SessionStore::new(
            Arc::new(SqliteSessionBackend::new(knowledge.db())),
            registry.clone(),
        )
        .with_default_limit(cfg.memory.default_max_token_limit),
    );

    Ok(Services {
        chat: Arc::new(ChatService::new(registry, sessions, factory)),
        knowledge,
    })
}

async fn cmd_serve(config_path: &Option<PathBuf>, bind: Option<&str>) -> Result<()> {
    let cfg = ConclaveConfig::load(config_path)?;
    info!("Starting conclave gateway...");

    let bind = bind.unwrap_or(cfg.server.bind.as_str());
    let bind: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", bind))?;

    let services = build_services(&cfg).await?;
    GatewayServer::new(bind, services.chat, services.knowledge)
        .run()
        .await
}

async fn cmd_ask(
    config_path: &Option<PathBuf>,
    message: &str,
    profile: &str,
    session: Option<String>,
) -> Result<()> {
    let cfg = ConclaveConfig::load(config_path)?;
    let services = build_services(&cfg).await?;

    let mut request = ChatRequest::new(message).with_profile(profile);
    request.session_id = session;

    let cancel = CancellationToken::new();
    let turn = services.chat.chat_with_cancel(request, cancel.clone());
    tokio::pin!(turn);

    let finished = tokio::select! {
        result = &mut turn => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let Some(result) = finished else {
        cancel.cancel();
        // Let the turn observe the cancellation and release the session
        let _ = turn.await;
        anyhow::bail!("Cancelled");
    };
    let response = result?;

    println!("{}", response.response);
    eprintln!("\nsession: {}", response.session_id);
    Ok(())
}

async fn cmd_profiles(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = ConclaveConfig::load(config_path)?;
    let registry = ProfileRegistry::new(Arc::new(YamlProfileStore::new(cfg.profiles_dir())));
    registry.load().await.context("Failed to load profiles")?;

    for profile in registry.list().await {
        println!(
            "{:<20} {:<13} {}",
            profile.name, profile.agent.agent_type, profile.description
        );
    }
    Ok(())
}

fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = ConclaveConfig::load(config_path)?;
    println!("{:#?}", cfg);
    Ok(())
}
