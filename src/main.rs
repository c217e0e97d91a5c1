mod api;
mod chat;
mod config;
mod conversation;
mod knowledge;
mod llm;
mod persona;
mod prompt;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal;

use knowledge::{ContentFetcher, HttpFetcher, LinkCache};
use persona::{LinkType, PersonaStore};
use prompt::PromptComposer;

#[derive(Parser)]
#[command(
    name = "persona-chat",
    version,
    about = "AI chat backend with an editable persona and cached knowledge links"
)]
struct Cli {
    #[arg(short, long, default_value = "~/.persona-chat/config.toml")]
    config: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API (default)
    Run,
    /// Create ~/.persona-chat with a default config and persona
    Init,
    /// Print the system prompt composed from the stored persona
    Prompt,
    /// Fetch a URL the way knowledge links are fetched and print the text
    Fetch {
        url: String,
        /// web, documentation, pdf or gallery
        #[arg(long = "type", default_value = "web", value_parser = parse_link_type)]
        kind: LinkType,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Init => {
            let base = config::init_config_dir().await?;
            tracing::info!("Initialized {}", base.display());
        }
        Commands::Run => run(&cli.config).await?,
        Commands::Prompt => {
            let cfg = config::load(&cli.config)?;
            let personas = PersonaStore::open(cfg.storage.persona_path())?;
            let cache = Arc::new(LinkCache::new(Arc::new(HttpFetcher::new(&cfg.fetcher)?)));
            let composer = PromptComposer::new(cache);
            println!("{}", composer.compose(personas.get().as_ref()).await);
        }
        Commands::Fetch { url, kind } => {
            let cfg = config::load(&cli.config)?;
            let fetcher = HttpFetcher::new(&cfg.fetcher)?;
            println!("{}", fetcher.fetch(&url, kind).await);
        }
    }
    Ok(())
}

async fn run(config_path: &str) -> Result<()> {
    let cfg = config::load(config_path)?;

    if !is_localhost(&cfg.server.bind) {
        if cfg.server.api_key.is_none() || cfg.server.admin_key.is_none() {
            anyhow::bail!(
                "Authentication required for non-localhost binding '{}'. Set [server] api_key and admin_key.",
                cfg.server.bind
            );
        }
    } else if cfg.server.admin_key.is_none() {
        tracing::warn!("Admin authentication disabled (localhost-only)");
    }

    let llm = llm::create_client(&cfg.llm)?;
    let personas = Arc::new(PersonaStore::open(cfg.storage.persona_path())?);
    match personas.get().as_ref().and_then(|p| p.ai_name().map(str::to_string)) {
        Some(name) => tracing::info!("Loaded persona: {name}"),
        None => tracing::warn!("No persona configured, using the default prompt"),
    }

    let fetcher = Arc::new(HttpFetcher::new(&cfg.fetcher)?);
    let composer = Arc::new(PromptComposer::new(Arc::new(LinkCache::new(fetcher))));
    let conversations = conversation::ConversationStore::open(&cfg.storage.base_dir)?;
    let chat = chat::ChatService::new(llm, personas.clone(), composer.clone(), conversations);

    let state = api::AppState {
        chat: Arc::new(chat),
        personas,
        composer,
        name: cfg.server.name.clone(),
        api_key: cfg.server.api_key.clone(),
        admin_key: cfg.server.admin_key.clone(),
    };
    let listener = tokio::net::TcpListener::bind(&cfg.server.bind).await?;
    tracing::info!("{} listening on {}", cfg.server.name, cfg.server.bind);

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
        })
        .await?;
    Ok(())
}

fn parse_link_type(s: &str) -> Result<LinkType, String> {
    match s {
        "web" => Ok(LinkType::Web),
        "documentation" => Ok(LinkType::Documentation),
        "pdf" => Ok(LinkType::Pdf),
        "gallery" => Ok(LinkType::Gallery),
        other => Err(format!("unknown link type '{other}'")),
    }
}

fn is_localhost(bind: &str) -> bool {
    use std::net::IpAddr;

    let host = if let Some(inner) = bind.strip_prefix('[')
        && let Some(bracket_end) = inner.find(']')
    {
        &inner[..bracket_end]
    } else if let Some(colon) = bind.rfind(':') {
        &bind[..colon]
    } else {
        bind
    };

    if host == "localhost" {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_localhost() {
        assert!(is_localhost("127.0.0.1:3001"));
        assert!(is_localhost("localhost:3001"));
        assert!(is_localhost("[::1]:3001"));
        assert!(!is_localhost("0.0.0.0:3001"));
        assert!(!is_localhost("localhost.evil.com:3001"));
        assert!(!is_localhost("[]:3001"));
    }

    #[test]
    fn test_parse_link_type() {
        assert_eq!(parse_link_type("pdf"), Ok(LinkType::Pdf));
        assert!(parse_link_type("video").is_err());
    }

    #[test]
    fn test_cli_parses_fetch() {
        let cli = Cli::try_parse_from(["persona-chat", "fetch", "https://a.example", "--type", "documentation"]).unwrap();
        match cli.command {
            Some(Commands::Fetch { url, kind }) => {
                assert_eq!(url, "https://a.example");
                assert_eq!(kind, LinkType::Documentation);
            }
            _ => panic!("expected fetch"),
        }
    }
}
