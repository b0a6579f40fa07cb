use std::env;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::select;
use plsconfig::Config;
use plssync::time_utils::{format_play_time, seconds_to_time_string};
use plssync::{
    MirrorChange, PlaylistService, ServiceSettings, SharedPlaylist, SourceEvent, SourceId,
    SourceRegistry, TrackChange, UreqTransport,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

struct Options {
    config_dir: String,
    source: Option<SourceId>,
    once: bool,
}

fn main() -> Result<()> {
    let options = resolve_options()?;
    let config = Config::load_config(&options.config_dir).context("loading configuration")?;
    init_tracing(&config.get_log_min_level());

    let registry = Arc::new(
        SourceRegistry::from_catalog(&config, Arc::new(UreqTransport::new()))
            .context("reading remote sources")?,
    );
    if registry.is_empty() {
        bail!("no enabled remote source in the configuration");
    }
    let service = Arc::new(PlaylistService::new(
        Arc::clone(&registry),
        ServiceSettings::from_config(&config),
    ));

    let sources: Vec<SourceId> = match &options.source {
        Some(id) => vec![id.clone()],
        None => registry
            .available_sources()
            .into_iter()
            .map(|(id, _)| id)
            .collect(),
    };

    let events = registry.subscribe();
    let changes = service.subscribe_changes();

    for source_id in &sources {
        match service.load_remote_playlist(Some(source_id)) {
            Ok(mirror) => {
                service.annotate(&mirror);
                print_playlist(source_id, &mirror);
            }
            Err(err) => error!(source = %source_id, error = %err, "cannot load playlist"),
        }
    }

    if options.once {
        registry.disconnect_all();
        return Ok(());
    }

    for source_id in &sources {
        match service.start_auto_reload(source_id) {
            Ok(true) => {}
            Ok(false) => {
                info!("auto-reload disabled, nothing left to do");
                registry.disconnect_all();
                return Ok(());
            }
            Err(err) => warn!(source = %source_id, error = %err, "auto-reload not started"),
        }
    }

    loop {
        select! {
            recv(events) -> event => match event {
                Ok(SourceEvent::StatusChanged { source_id, status, message }) => {
                    println!("[{}] {}: {}", source_id, status, message);
                }
                Ok(SourceEvent::PlaylistReloaded { .. }) => {}
                Err(_) => break,
            },
            recv(changes) -> change => match change {
                Ok(change) => report_change(&service, &change),
                Err(_) => break,
            },
        }
    }
    Ok(())
}

fn resolve_options() -> Result<Options> {
    let mut args = env::args().skip(1);
    let mut options = Options {
        config_dir: String::new(),
        source: None,
        once: false,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config-dir" => {
                options.config_dir = args
                    .next()
                    .ok_or_else(|| anyhow!("--config-dir needs a value"))?;
            }
            "--source" => {
                let id = args.next().ok_or_else(|| anyhow!("--source needs a value"))?;
                options.source = Some(SourceId::from(id));
            }
            "--once" => options.once = true,
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            other => bail!("unknown argument {other}, see --help"),
        }
    }
    Ok(options)
}

fn print_usage() {
    println!("Usage: PlaylistSync [--config-dir DIR] [--source ID] [--once]");
    println!();
    println!("  --config-dir DIR  configuration directory (default ~/.playlistsync)");
    println!("  --source ID       only follow this remote source");
    println!("  --once            print the playlists and exit");
    println!();
    println!("  RUST_LOG          overrides log.min_level (ex: plssync=debug)");
}

fn init_tracing(min_level: &str) {
    let _ = tracing_log::LogTracer::init();
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(min_level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_playlist(source_id: &SourceId, mirror: &SharedPlaylist) {
    let playlist = mirror.read();
    println!("== {} ({} tracks)", source_id, playlist.len());
    for (index, track) in playlist.tracks.iter().enumerate() {
        let start = track
            .play_time
            .map(format_play_time)
            .unwrap_or_else(|| "--".to_string());
        let length = track
            .duration
            .map(seconds_to_time_string)
            .unwrap_or_else(|| "?".to_string());
        let flags = match (track.exists, track.has_intro) {
            (false, _) => " [missing]",
            (true, true) => " [intro]",
            _ => "",
        };
        println!("{:>4}  {:<14} {:>8}  {}{}", index + 1, start, length, track, flags);
    }
}

fn report_change(service: &PlaylistService, change: &MirrorChange) {
    for item in &change.diff.changes {
        match item {
            TrackChange::Insert(index, track) => {
                println!("[{}] + {:>4} {}", change.source_id, index + 1, track)
            }
            TrackChange::Delete(index) => println!("[{}] - {:>4}", change.source_id, index + 1),
            TrackChange::Update(index, track) => {
                println!("[{}] ~ {:>4} {}", change.source_id, index + 1, track)
            }
        }
    }
    if let Some(mirror) = service.store().remote_playlist(&change.source_id) {
        service.annotate(&mirror);
        print_playlist(&change.source_id, &mirror);
    }
}
