//! CLI mode for asset-cache - install, inspect and purge the asset cache.

mod progress;

use std::path::PathBuf;

use console::style;
use indicatif::HumanBytes;

use crate::{
    AppConfig, AssetCacheManager, AssetRequest, CacheStorage, ControlMessage, DiskStorage,
    FetchOutcome, FilePreferenceStore, HttpNetwork, MusicControl, SilentSink, reply_channel,
};

use progress::{InstallBar, print_activate_summary, print_install_summary};

type DiskManager = AssetCacheManager<DiskStorage, HttpNetwork>;

/// Music subcommand action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusicAction {
    Status,
    Toggle,
    On,
    Off,
}

/// Parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Pre-cache the manifest and activate the current version.
    Install,
    /// Remove stale cache stores, installing first if needed.
    Activate,
    /// Run URLs through the cache-or-network strategy.
    Fetch(Vec<String>),
    /// Delete every cache store.
    Purge,
    /// List cache stores.
    Status,
    /// Run the caching proxy.
    Serve,
    /// Read or change the music preference.
    Music(MusicAction),
    /// Print usage.
    Help,
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    pub command: Command,
    pub config_path: Option<PathBuf>,
}

pub fn print_usage() {
    eprintln!("Usage: asset-cache [--config <path>] <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  install             Pre-cache the manifest and activate this version");
    eprintln!("  activate            Remove caches from other versions");
    eprintln!("  fetch <url>...      Fetch URLs through the cache (paths resolve against the origin)");
    eprintln!("  purge               Delete every cache store");
    eprintln!("  status              List cache stores");
    eprintln!("  serve               Run the caching proxy");
    eprintln!("  music [status|toggle|on|off]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>     Config file (default: $ASSET_CACHE_CONFIG or the user config dir)");
    eprintln!("  -h, --help          Show this help");
}

/// Parses arguments (without the program name).
///
/// # Errors
///
/// Returns a message describing the first invalid argument.
pub fn parse_args(args: &[String]) -> Result<Cli, String> {
    let mut config_path = None;
    let mut positional = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                return Ok(Cli {
                    command: Command::Help,
                    config_path,
                });
            }
            "--config" => {
                i += 1;
                let path = args.get(i).ok_or("--config requires a value")?;
                config_path = Some(PathBuf::from(path));
            }
            flag if flag.starts_with('-') => return Err(format!("unknown option {flag}")),
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        None => Command::Help,
        Some("install") => Command::Install,
        Some("activate") => Command::Activate,
        Some("purge") => Command::Purge,
        Some("status") => Command::Status,
        Some("serve") => Command::Serve,
        Some("fetch") => {
            let urls: Vec<String> = positional.by_ref().collect();
            if urls.is_empty() {
                return Err("fetch requires at least one URL".to_string());
            }
            Command::Fetch(urls)
        }
        Some("music") => Command::Music(match positional.next().as_deref() {
            None | Some("status") => MusicAction::Status,
            Some("toggle") => MusicAction::Toggle,
            Some("on") => MusicAction::On,
            Some("off") => MusicAction::Off,
            Some(other) => return Err(format!("unknown music action {other}")),
        }),
        Some(other) => return Err(format!("unknown command {other}")),
    };

    if let Some(extra) = positional.next() {
        return Err(format!("unexpected argument {extra}"));
    }
    Ok(Cli {
        command,
        config_path,
    })
}

fn build_manager(config: &AppConfig) -> crate::Result<DiskManager> {
    let storage = DiskStorage::new(&config.paths.store_dir);
    let network = HttpNetwork::new(config.cache.origin_url()?)?;
    AssetCacheManager::new(config.cache.clone(), storage, network)
}

async fn install_and_activate(manager: &DiskManager) -> crate::Result<()> {
    let bar = InstallBar::new();
    let install = manager.install(&bar).await;
    bar.finish();
    let install = install?;
    let activate = manager.activate().await?;
    print_install_summary(&install, &activate);
    Ok(())
}

async fn run_activate(manager: &DiskManager) -> crate::Result<()> {
    if !manager.resume().await? {
        return install_and_activate(manager).await;
    }
    let report = manager.activate().await?;
    print_activate_summary(manager.version(), &report);
    Ok(())
}

async fn ensure_active(manager: &DiskManager) -> crate::Result<()> {
    if manager.resume().await? {
        return Ok(());
    }
    log::info!("Cache {} not installed yet", manager.version());
    install_and_activate(manager).await
}

async fn run_fetch(manager: &DiskManager, urls: &[String]) -> crate::Result<()> {
    ensure_active(manager).await?;
    let origin = manager.config().origin_url()?;

    for target in urls {
        let request = AssetRequest::new(origin.join(target)?);
        match manager.handle_fetch(&request).await {
            Ok(FetchOutcome::FromCache(response)) => println!(
                "{} {} {} ({})",
                style("HIT ").green(),
                response.status,
                request.url(),
                HumanBytes(response.body.len() as u64)
            ),
            Ok(FetchOutcome::FromNetwork { response, stored }) => println!(
                "{} {} {} ({}){}",
                style("MISS").yellow(),
                response.status,
                request.url(),
                HumanBytes(response.body.len() as u64),
                if stored { ", stored" } else { "" }
            ),
            Ok(FetchOutcome::Bypassed) => {
                println!("{} {}", style("PASS").dim(), request.url());
            }
            Err(e) => println!("{} {} ({e})", style("FAIL").red(), request.url()),
        }
    }

    let stats = manager.stats();
    if let Some(ratio) = stats.hit_ratio() {
        println!("hit ratio {:.0}%", ratio * 100.0);
    }
    Ok(())
}

async fn run_purge(manager: &DiskManager) -> crate::Result<()> {
    let (port, rx) = reply_channel();
    manager
        .handle_message(ControlMessage::ClearCache, Some(port))
        .await;
    match rx.await {
        Ok(reply) if reply.success => println!("All caches cleared."),
        _ => println!("Cache purge did not complete."),
    }
    Ok(())
}

async fn run_status(manager: &DiskManager) -> crate::Result<()> {
    let storage = manager.storage();
    let names = storage.keys().await?;
    if names.is_empty() {
        println!("No cache stores in {}", storage.root().display());
        return Ok(());
    }
    for name in names {
        let entries = storage.entry_keys(&name).await?.len();
        let marker = if name == manager.version() {
            style("current").green().to_string()
        } else {
            style("stale").yellow().to_string()
        };
        println!("  {name} [{marker}] {entries} entries");
    }
    Ok(())
}

#[cfg(feature = "server")]
async fn run_serve(config: &AppConfig, manager: DiskManager) -> crate::Result<()> {
    ensure_active(&manager).await?;
    let listener = crate::server::bind(&config.server.host, config.server.port).await?;

    let shutdown = tokio_util::sync::CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received SIGINT");
        }
        signal.cancel();
    });

    crate::server::serve(listener, std::sync::Arc::new(manager), shutdown).await
}

#[cfg(not(feature = "server"))]
async fn run_serve(_config: &AppConfig, _manager: DiskManager) -> crate::Result<()> {
    Err(crate::Error::Config(
        "proxy support requires the 'server' feature".to_string(),
    ))
}

fn run_music(config: &AppConfig, action: MusicAction) -> crate::Result<()> {
    let prefs = FilePreferenceStore::open(config.paths.config_dir.join("preferences.toml"))?;
    let mut music = MusicControl::new(prefs, SilentSink::new(), None)?;
    let enabled = match action {
        MusicAction::Status => music.is_enabled(),
        MusicAction::Toggle => music.toggle()?,
        MusicAction::On => music.set_enabled(true)?,
        MusicAction::Off => music.set_enabled(false)?,
    };
    println!("music {}", if enabled { "on" } else { "off" });
    Ok(())
}

/// Runs the CLI with the process arguments.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command
/// fails.
pub async fn run() -> crate::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("Error: {message}");
            print_usage();
            std::process::exit(2);
        }
    };
    if cli.command == Command::Help {
        print_usage();
        return Ok(());
    }

    let config_path = cli.config_path.unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load_or_create(&config_path)?;
    log::info!("Loaded config from {}", config_path.display());

    if let Command::Music(action) = cli.command {
        return run_music(&config, action);
    }

    let manager = build_manager(&config)?;
    match cli.command {
        Command::Install => install_and_activate(&manager).await,
        Command::Activate => run_activate(&manager).await,
        Command::Fetch(urls) => run_fetch(&manager, &urls).await,
        Command::Purge => run_purge(&manager).await,
        Command::Status => run_status(&manager).await,
        Command::Serve => run_serve(&config, manager).await,
        Command::Music(_) | Command::Help => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn no_args_is_help() {
        assert_eq!(parse_args(&[]).unwrap().command, Command::Help);
    }

    #[test]
    fn parses_config_and_command_in_any_order() {
        let cli = parse_args(&args(&["install", "--config", "/tmp/c.toml"])).unwrap();
        assert_eq!(cli.command, Command::Install);
        assert_eq!(cli.config_path, Some(PathBuf::from("/tmp/c.toml")));

        let cli = parse_args(&args(&["--config", "c.toml", "purge"])).unwrap();
        assert_eq!(cli.command, Command::Purge);
    }

    #[test]
    fn parses_activate() {
        assert_eq!(
            parse_args(&args(&["activate"])).unwrap().command,
            Command::Activate
        );
        assert!(parse_args(&args(&["activate", "now"])).is_err());
    }

    #[test]
    fn fetch_collects_urls() {
        let cli = parse_args(&args(&["fetch", "/index.html", "/assets/model/盤子.glb"])).unwrap();
        assert_eq!(
            cli.command,
            Command::Fetch(vec![
                "/index.html".to_string(),
                "/assets/model/盤子.glb".to_string()
            ])
        );
        assert!(parse_args(&args(&["fetch"])).is_err());
    }

    #[test]
    fn music_actions() {
        assert_eq!(
            parse_args(&args(&["music"])).unwrap().command,
            Command::Music(MusicAction::Status)
        );
        assert_eq!(
            parse_args(&args(&["music", "toggle"])).unwrap().command,
            Command::Music(MusicAction::Toggle)
        );
        assert!(parse_args(&args(&["music", "louder"])).is_err());
    }

    #[test]
    fn rejects_unknown_input() {
        assert!(parse_args(&args(&["explode"])).is_err());
        assert!(parse_args(&args(&["--verbose", "status"])).is_err());
        assert!(parse_args(&args(&["--config"])).is_err());
        assert!(parse_args(&args(&["status", "extra"])).is_err());
    }

    #[test]
    fn help_flag_wins() {
        assert_eq!(
            parse_args(&args(&["install", "--help"])).unwrap().command,
            Command::Help
        );
    }
}
