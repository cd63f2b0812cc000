use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{debug, info, trace, warn};

use frameplay::cli::{Args, Command, PlayArgs, ServeArgs};
use frameplay::config::{self, PathConfig, PlayerSettings, SETTINGS_FILE};
use frameplay::core::event_bus::Event;
use frameplay::core::player::PlaybackState;
use frameplay::core::{DirFrameSource, FrameSource, HttpFrameSource, Intent, Session, SessionParams, Workers};
use frameplay::server::{ApiServer, CacheSnapshot, FrameServer, SharedApiState};
use frameplay::{FrameFailedEvent, PlayerUpdateEvent};

fn main() -> Result<()> {
    // Parse command-line arguments first (needed for log setup)
    let args = Args::parse();

    // Create path configuration from CLI args and environment
    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());

    // Ensure directories exist
    if let Err(e) = config::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {:#}", e);
    }

    init_logger(&args, &path_config)?;

    info!("frameplay {} starting", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);

    let settings_path = config::config_file(SETTINGS_FILE, &path_config);
    info!("Config path: {}", settings_path.display());
    let settings = PlayerSettings::load_or_default(&settings_path);
    if !settings_path.exists()
        && let Err(e) = settings.save(&settings_path)
    {
        warn!("Could not write default settings: {:#}", e);
    }

    match &args.command {
        Command::Serve(serve_args) => serve(serve_args),
        Command::Play(play_args) => play(play_args, &settings),
    }
}

/// Console or file logger; verbosity from `-v` count
fn init_logger(args: &Args, path_config: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .as_ref()
            .cloned()
            .unwrap_or_else(|| config::data_file("frameplay.log", path_config));

        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .filter_module("tiny_http", log::LevelFilter::Warn)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Respects RUST_LOG if set
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .filter_module("tiny_http", log::LevelFilter::Warn)
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn serve(args: &ServeArgs) -> Result<()> {
    let source = DirFrameSource::open(&args.dir)
        .with_context(|| format!("Failed to read frame directory: {}", args.dir.display()))?;
    if source.is_empty() {
        bail!("No frame images in {}", args.dir.display());
    }
    let count = source.len();

    let server = FrameServer::new(source, args.task).spawn(&format!("{}:{}", args.bind, args.port))?;
    println!("Serving {} frames on {}", count, server.base_url());
    server.wait();
    Ok(())
}

fn play(args: &PlayArgs, settings: &PlayerSettings) -> Result<()> {
    let (source, stop): (Arc<dyn FrameSource>, i32) = if let Some(dir) = &args.dir {
        let source = DirFrameSource::open(dir)
            .with_context(|| format!("Failed to read frame directory: {}", dir.display()))?;
        if source.is_empty() {
            bail!("No frame images in {}", dir.display());
        }
        let last = source.len() as i32 - 1;
        (Arc::new(source), args.stop.unwrap_or(last))
    } else if let Some(url) = &args.url {
        let stop = args.stop.context("--stop is required with --url")?;
        let source = HttpFrameSource::new(url, &settings.frame_path, settings.fetch_timeout());
        (Arc::new(source), stop)
    } else {
        bail!("Either --url or --dir is required");
    };

    let params = SessionParams {
        task: args.task,
        start: args.start,
        stop,
        annotation_mode: args.annotation,
        display_width: settings.display_width,
        display_height: settings.display_height,
    };
    let pool = Arc::new(Workers::new(settings.fetch_workers).context("Failed to start fetch workers")?);
    let mut session = Session::new(&params, settings, source, pool);

    // Stand-in for a rendering surface: log updates, publish snapshots
    let api_state = Arc::new(SharedApiState::default());
    {
        let state = Arc::clone(&api_state);
        session.bus().subscribe::<PlayerUpdateEvent, _>(move |e| {
            debug!(
                "Frame {} [{}..={}] playing={} loading={} scale={:.3}",
                e.frames.current,
                e.frames.start,
                e.frames.stop,
                e.playing,
                e.loading(),
                e.geometry.scale
            );
            state.set_player(e.to_snapshot());
        });
        session
            .bus()
            .subscribe::<FrameFailedEvent, _>(|e| warn!("Frame {} unavailable: {}", e.frame, e.error));
    }

    // Local sender keeps the channel open when there is no API
    let (_local_tx, local_rx) = crossbeam_channel::unbounded::<Intent>();
    let (api_server, intents) = match args.api_port {
        Some(port) => {
            let (server, rx) = ApiServer::start(&format!("0.0.0.0:{}", port), Arc::clone(&api_state))?;
            println!("Control API on http://127.0.0.1:{}/api/status", port);
            (Some(server), rx)
        }
        None => (None, local_rx),
    };

    if let Some(index) = args.fps_index {
        session.apply(Intent::ChangeFps(index));
    }
    if let Some(step) = args.step {
        session.apply(Intent::ChangeStep(step));
    }
    session.open(args.frame.unwrap_or(args.start as i64));
    if args.autoplay {
        session.apply(Intent::Play);
    }

    let limit = args
        .duration
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64);
    let serve_forever = api_server.is_some() && limit.is_none();
    let started = Instant::now();

    session.run(&intents, |s| {
        api_state.set_cache(CacheSnapshot::from_provider(s.provider()));
        for event in s.bus().poll() {
            trace!("Event: {}", (*event).type_name());
        }

        if let Some(limit) = limit {
            return started.elapsed() < limit;
        }
        if serve_forever {
            return true;
        }
        // Nothing left to show: paused on a displayed (or failed) frame
        let idle = s.state() == PlaybackState::Paused && s.player().continue_deadline().is_none();
        !idle
    });

    session.shutdown();
    drop(api_server);

    let snapshot = session.snapshot();
    if let Some(frame) = snapshot.stalled {
        warn!("Stopped on frame {} which could not be fetched", frame);
    }
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
