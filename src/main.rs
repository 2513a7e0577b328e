// Command-line front end for browser-driven web search.
//
// Logs go to stderr; results go to stdout as markdown, or JSON with --json.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kodegen_tools_websearch::platforms::scraper_for;
use kodegen_tools_websearch::web_search::search_with_manager;
use kodegen_tools_websearch::{BrowserManager, ContentFetcher, Platform, SearchQuery};

#[derive(Parser, Debug)]
#[command(name = "kodegen-websearch")]
#[command(about = "Browser-driven web search and page fetching", long_about = None)]
struct Cli {
    /// Print machine-readable JSON instead of markdown
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search the web or a content platform
    Search {
        /// Up to four keywords
        #[arg(required = true)]
        keywords: Vec<String>,

        /// Result pages to collect (defaults to the configured limit)
        #[arg(long)]
        pages: Option<u32>,

        /// general, shortform, qa, microblog or linkaggregator (site names also work)
        #[arg(long, default_value = "general")]
        platform: Platform,
    },
    /// Fetch a page as markdown
    Fetch {
        url: String,

        /// Write the markdown into this directory instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Open a visible window on the pre-auth profile to sign in to a platform
    Login { platform: Platform },
    /// Download a browser if none is installed
    Install,
    /// Open a throwaway browser until Ctrl-C
    Open { url: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("kodegen_tools_websearch=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let manager = BrowserManager::global();

    let result = run(cli, manager.clone()).await;

    for outcome in manager.shutdown().await {
        if !outcome.is_clean() {
            warn!(?outcome, "Temp browser cleanup incomplete");
        }
    }
    result
}

async fn run(cli: Cli, manager: Arc<BrowserManager>) -> Result<()> {
    match cli.command {
        Commands::Search {
            keywords,
            pages,
            platform,
        } => {
            let page_limit = pages.unwrap_or(manager.config().search.default_page_limit);
            let query = SearchQuery::new(&keywords, page_limit, platform)?;
            let outcome = search_with_manager(manager, &query).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("{}", outcome.render_markdown());
            }
        }
        Commands::Fetch { url, out } => {
            let mut session = manager.new_session();
            session.launch(manager.config().browser.headless).await?;

            let fetcher = ContentFetcher::default();
            let fetched = match &out {
                Some(dir) => fetcher
                    .fetch_to_file(&mut session, &url, dir, manager.registry())
                    .await
                    .map(|(id, path)| Fetched::File { id, path }),
                None => fetcher
                    .fetch_content(&mut session, &url)
                    .await
                    .map(Fetched::Markdown),
            };
            let cleanup = session.close().await;
            if !cleanup.is_clean() {
                warn!(?cleanup, "Session cleanup incomplete");
            }

            match fetched? {
                Fetched::Markdown(markdown) if cli.json => {
                    println!("{}", serde_json::json!({ "url": url, "markdown": markdown }));
                }
                Fetched::Markdown(markdown) => println!("{markdown}"),
                Fetched::File { id, path } if cli.json => {
                    println!("{}", serde_json::json!({ "id": id, "path": path }));
                }
                Fetched::File { id, path } => println!("{id}\t{}", path.display()),
            }
        }
        Commands::Login { platform } => {
            let Some(scraper) = scraper_for(platform) else {
                bail!("{platform} has no login page");
            };
            let window = manager
                .open_login_window(scraper.login_url())
                .await
                .context("Failed to open login window")?;
            info!(platform = %platform, "Sign in, then press Ctrl-C to keep the session");
            tokio::signal::ctrl_c().await?;
            let cleanup = window.shutdown().await;
            if !cleanup.is_clean() {
                warn!(?cleanup, "Login window cleanup incomplete");
            }
        }
        Commands::Install => {
            let browser = manager.provisioner().ensure_browser().await?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "path": browser.executable_path,
                        "source": browser.source.to_string(),
                    })
                );
            } else {
                println!("{} ({})", browser.executable_path.display(), browser.source);
            }
        }
        Commands::Open { url } => {
            let id = manager.open_temp_browser(url.as_deref()).await?;
            info!(id = %id, "Temp browser open, press Ctrl-C to close");
            tokio::signal::ctrl_c().await?;
            // shutdown in main closes it
        }
    }
    Ok(())
}

enum Fetched {
    Markdown(String),
    File { id: String, path: PathBuf },
}
