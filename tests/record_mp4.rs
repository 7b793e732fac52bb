use std::{sync::Arc, time::Duration};

use plotrec::{
    BindingIds, CancelToken, FfmpegSurface, RenderSettings, Timeouts, WallClock,
    host::scripted::ScriptedHost,
};

fn quick_timeouts() -> Timeouts {
    Timeouts {
        eval: Duration::from_millis(500),
        capture: Duration::from_millis(500),
        finalize: Duration::from_secs(30),
    }
}

#[test]
fn records_a_playable_mp4_when_ffmpeg_is_available() {
    if !plotrec::is_ffmpeg_on_path() {
        eprintln!("skipping: ffmpeg not found on PATH");
        return;
    }

    let host = Arc::new(ScriptedHost::new());
    let session = plotrec::bootstrap(
        host,
        BindingIds::default(),
        &quick_timeouts(),
        &CancelToken::new(),
    )
    .unwrap();

    let settings = RenderSettings {
        duration_secs: 1.0,
        frame_count: 8,
        resolution: 2.0,
    };
    let timeouts = quick_timeouts();
    let settings_for_surface = settings.clone();
    let mut make_surface: plotrec::SurfaceFactory = Box::new(move |w, h| {
        Ok(Box::new(FfmpegSurface::open(
            w,
            h,
            &settings_for_surface,
            &timeouts,
        )?))
    });

    let artifact = plotrec::render_cycle(
        &session,
        &settings,
        &quick_timeouts(),
        &mut make_surface,
        &WallClock::new(),
        &CancelToken::new(),
    )
    .unwrap();

    // Default viewport is 20x12 units at resolution 2.
    assert_eq!((artifact.width, artifact.height), (40, 24));
    assert_eq!(artifact.frame_count, 8);
    // MP4 container magic: "ftyp" brand at byte offset 4.
    assert!(artifact.data.len() > 8);
    assert_eq!(&artifact.data[4..8], b"ftyp");
}
