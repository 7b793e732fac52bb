use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use plotrec::{
    BindingIds, CalculatorHost, CancelToken, CycleOutcome, Director, FfmpegSurface, FileSink,
    RecordingSurface, RenderSettings, SessionState, Timeouts, WallClock,
    host::scripted::ScriptedHost,
};

#[derive(Parser, Debug)]
#[command(name = "plotrec", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record the built-in scripted calculator session to an MP4
    /// (requires `ffmpeg` on PATH).
    Demo(DemoArgs),
}

#[derive(Parser, Debug)]
struct DemoArgs {
    /// Output MP4 path.
    #[arg(long, default_value = "plot.mp4")]
    out: PathBuf,

    /// Total playback duration in seconds.
    #[arg(long, default_value_t = 5.0)]
    duration: f64,

    /// Number of samples across the time parameter's range.
    #[arg(long, default_value_t = 200)]
    frames: u32,

    /// Output pixels per viewport unit.
    #[arg(long, default_value_t = 10.0)]
    resolution: f64,

    /// Session state JSON to preload into the host before bootstrap.
    #[arg(long)]
    session: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Demo(args) => cmd_demo(args),
    }
}

fn cmd_demo(args: DemoArgs) -> anyhow::Result<()> {
    let settings = RenderSettings {
        duration_secs: args.duration,
        frame_count: args.frames,
        resolution: args.resolution,
    };
    settings.validate()?;

    if !plotrec::is_ffmpeg_on_path() {
        anyhow::bail!("ffmpeg is required for MP4 recording, but was not found on PATH");
    }

    let timeouts = Timeouts::default();
    let cancel = CancelToken::new();

    let host = Arc::new(ScriptedHost::new());
    if let Some(path) = &args.session {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read session state '{}'", path.display()))?;
        let state: SessionState = serde_json::from_str(&text)
            .with_context(|| format!("parse session state '{}'", path.display()))?;
        host.set_session_state(&state)?;
    }
    let session = plotrec::bootstrap(host.clone(), BindingIds::default(), &timeouts, &cancel)
        .context("bootstrap scripted session")?;
    let trigger_id = session.ids.trigger.clone();

    let dir = args
        .out
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."))
        .to_path_buf();
    let filename = args
        .out
        .file_name()
        .context("output path has no filename")?
        .to_string_lossy()
        .into_owned();

    let surface_settings = settings.clone();
    let mut director = Director::new(
        session,
        settings,
        timeouts,
        Box::new(move |w, h| {
            Ok(Box::new(FfmpegSurface::open(w, h, &surface_settings, &timeouts)?)
                as Box<dyn RecordingSurface>)
        }),
        Box::new(WallClock::new()),
        Box::new(FileSink::new(dir)),
        filename,
    )?;

    // Consume the trigger's initial (zero) value, then toggle it.
    director.process_next_trigger(Duration::from_millis(100))?;
    host.set_scalar(&trigger_id, 1.0)?;

    match director.process_next_trigger(Duration::from_secs(5))? {
        CycleOutcome::Completed => {
            eprintln!("wrote {}", args.out.display());
            Ok(())
        }
        other => anyhow::bail!("render cycle did not complete (outcome: {other:?})"),
    }
}
