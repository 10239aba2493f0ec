// ft8alert - WSJT-X companion
//
// Listens to WSJT-X UDP traffic, flags wanted/monitored callsigns and can
// answer wanted CQs automatically. Notifications are logged as JSON lines.

use std::sync::Arc;
use std::time::Duration;

use ft8alert::config::Config;
use ft8alert::reference::cache::LookupCache;
use ft8alert::reference::CallsignEngine;
use ft8alert::udp::{CooldownPolicy, Dispatcher, Notification, UdpListener};
use ft8alert::watchlist::{WatchLists, WorkedBefore};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    // Initialize logging - default to info level for our crate
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("ft8alert=info"),
    )
    .init();

    let config = match Config::path_from_env() {
        Some(path) => match Config::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Failed to load config {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => {
            log::info!("No config file given, using defaults");
            Config::default()
        }
    };

    let listener_config = match config.udp.listener_config() {
        Ok(c) => c,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    let capacity = config.reference.cache_capacity;
    let cache = match config.reference.cache_file.as_deref() {
        Some(path) if path.exists() => LookupCache::load(path, capacity).unwrap_or_else(|e| {
            log::warn!("Ignoring lookup cache {}: {}", path.display(), e);
            LookupCache::new(capacity)
        }),
        _ => LookupCache::new(capacity),
    };

    let engine = Arc::new(CallsignEngine::load(
        config.reference.cty_xml.as_deref(),
        config.reference.cq_zones.as_deref(),
        cache,
    ));
    let watch = Arc::new(WatchLists::new(config.watch.clone()));
    let worked: Arc<WorkedBefore> = Arc::new(config.worked_before.iter().collect());
    log::info!("{} callsigns worked before", worked.len());

    let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();

    let dispatcher = Dispatcher::new(
        config.udp.client_id.as_str(),
        Arc::clone(&engine),
        Arc::clone(&watch),
        Arc::clone(&worked),
        tx,
    )
    .with_auto_reply(config.reply.auto_reply)
    .with_policy(Box::new(CooldownPolicy::new(
        config.reply.max_attempts,
        Duration::from_secs(config.reply.cooldown_secs),
    )));

    let listener = UdpListener::new(listener_config);
    if let Err(e) = listener.start(dispatcher) {
        log::error!("Failed to start UDP listener: {}", e);
        std::process::exit(1);
    }
    log::info!("Started UDP listener on port {}", config.udp.port);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                if let Notification::QsoLogged { call, .. } = &msg {
                    worked.insert(call);
                }
                match serde_json::to_string(&msg) {
                    Ok(json) => log::info!("{}", json),
                    Err(e) => log::error!("Failed to serialize notification: {}", e),
                }
            }
            _ = &mut shutdown => {
                log::info!("Shutting down");
                break;
            }
        }
    }

    if let Err(e) = tokio::task::spawn_blocking(move || listener.stop()).await {
        log::error!("Failed to stop UDP listener: {}", e);
    }

    if let Some(path) = config.reference.cache_file.as_deref() {
        match engine.save_cache(path) {
            Ok(()) => log::info!("Saved {} cached lookups to {}", engine.cache_len(), path.display()),
            Err(e) => log::error!("Failed to save lookup cache {}: {}", path.display(), e),
        }
    }
}
