// src/main.rs
//
// Headless sanity run: drives a deck against the in-memory device and page
// and logs what the page would show.

use stepdeck::{
    Deck, DeckConfig, DeckResult, Device, GraphDescription, Layout, MemoryCanvas, MemorySurface,
    SAMPLE_PATCH, SimDevice, UiEvent,
};

/// ===============================
/// Main
/// ===============================

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(e) = run() {
        log::error!("sanity run failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> DeckResult<()> {
    let config = DeckConfig::default();
    let mut deck: Deck<SimDevice> = Deck::new(config, Layout::standard())?;
    let mut surface = MemorySurface::new();
    let mut canvas = MemoryCanvas::new(64, 32);

    // --------------------------------
    // Load, then wait for a gesture
    // --------------------------------

    deck.resources_loaded(GraphDescription::from_json("sample", SAMPLE_PATCH)?);
    deck.render_all(&mut surface);

    // A write before the device exists is queued.
    deck.set_parameter("rotary1", 0.42)?;
    deck.retry_tick();
    log::info!("{} command(s) pending before the gesture", deck.pending_commands());

    // --------------------------------
    // First click creates the device
    // --------------------------------

    let device = SimDevice::sample();
    let handle = device.clone();
    deck.begin(move |description, sink| {
        log::info!(
            "creating device for runtime {}",
            description.runtime_version()
        );
        device.attach(sink);
        Ok(device)
    })?;
    log::info!("rotary1 on device: {:?}", handle.parameter("rotary1"));

    // --------------------------------
    // Edit some steps
    // --------------------------------

    for index in [0, 4, 8, 12] {
        deck.handle_ui(
            UiEvent::Click {
                element_id: format!("btn-seq1-{index}"),
            },
            &mut surface,
        );
    }
    deck.handle_ui(
        UiEvent::Input {
            element_id: "seq9-box-3".to_string(),
            text: "15".to_string(),
        },
        &mut surface,
    );
    deck.handle_ui(
        UiEvent::Click {
            element_id: "play".to_string(),
        },
        &mut surface,
    );

    // --------------------------------
    // Run the transport for a bar
    // --------------------------------

    handle.load_buffer(
        "waveform",
        (0..512).map(|i| (i as f32 * 0.05).sin()).collect(),
    );

    for step in 0..16 {
        handle.set_silently("step", step as f64);
        handle.set_silently("step16", step as f64);
        handle.set_silently("step16alt", (15 - step) as f64);
        handle.emit("step16alt", vec![(15 - step) as f64]);
        handle.automate("playstat", step as f64 / 15.0);
        deck.poll_tick(&mut surface);
        deck.waveform_tick(&mut canvas);

        log::info!(
            "step {:>2}: {:?} {:?} {:?} progress {:.2}",
            step,
            surface.active_with_prefix("step-"),
            surface.active_with_prefix("step16-"),
            surface.active_with_prefix("step16alt-"),
            surface.level("playstat-bar").unwrap_or(0.0)
        );
    }

    // --------------------------------
    // Summary
    // --------------------------------

    for (tag, payload) in handle.sent_messages() {
        log::info!("sent {tag} ({} values)", payload.len());
    }
    if let Some(values) = deck.store().values("seq1") {
        log::info!("seq1 = {values:?}");
    }
    log::info!(
        "{} page writes, {} waveform frames, {} segments in the last one",
        surface.writes(),
        canvas.frames,
        canvas.segments.len()
    );

    deck.teardown();
    log::info!("sanity run completed");
    Ok(())
}
