// src/deck.rs
//
// The coordinator that owns one page's session state.
//
// A `Deck` replaces the page-global `device`/`context`/`sequences`
// variables with one explicit value: the session, the bridge, the sequence
// store, the position tracker and the slider drag state. UI code calls into
// it from event listeners; timers call the `*_tick` methods.
//
// Nothing here propagates an error to the page. `handle_ui` and the ticks
// log failures and leave the affected control inert.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, Receiver, Sender};

use crate::bridge::{Delivery, ParameterBridge, RetryPolicy};
use crate::config::DeckConfig;
use crate::controls::{ControlKind, ControlTarget, Layout, SliderDrag, parse_number_box};
use crate::device::{Device, DeviceEvent, EventSink};
use crate::error::{DeckError, DeckResult, LogFailure};
use crate::loader::GraphDescription;
use crate::position::PositionTracker;
use crate::state::{DeviceSession, SequenceStore, SessionState};
use crate::surface::{Canvas, Surface};
use crate::waveform::WaveformView;

/// An interaction on the page, already reduced to element ids.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Click { element_id: String },
    PointerDown { element_id: String, y: f64 },
    PointerMove { y: f64 },
    PointerUp,
    Input { element_id: String, text: String },
}

pub struct Deck<D: Device> {
    config: DeckConfig,
    layout: Layout,
    session: DeviceSession<D>,
    bridge: ParameterBridge,
    store: SequenceStore,
    tracker: PositionTracker,

    /// Drag state per slider element.
    sliders: HashMap<String, SliderDrag>,
    dragging: Option<String>,

    waveform: Option<WaveformView>,

    events_tx: Sender<DeviceEvent>,
    events_rx: Receiver<DeviceEvent>,

    /// Last value written or reported per parameter.
    parameters: HashMap<String, f64>,
    last_progress: Option<f64>,
}

impl<D: Device> Deck<D> {
    pub fn new(config: DeckConfig, layout: Layout) -> DeckResult<Self> {
        config.validate()?;

        let mut store = SequenceStore::new(config.accepted_lengths.clone());
        for def in layout.sequences() {
            store.declare(def.clone())?;
        }

        let sliders = layout
            .controls()
            .iter()
            .filter(|c| c.kind == ControlKind::Slider)
            .map(|c| {
                let initial = c.range.normalize(c.range.min);
                (
                    c.element_id.clone(),
                    SliderDrag::new(initial, config.slider_sensitivity),
                )
            })
            .collect();

        let bridge = ParameterBridge::new(RetryPolicy {
            interval_ms: config.retry_interval_ms,
            max_attempts: config.max_retry_attempts,
        });
        let tracker = PositionTracker::new(layout.position_groups().to_vec());
        let waveform = layout
            .waveform_binding()
            .map(|w| WaveformView::new(w.buffer.clone()));
        let (events_tx, events_rx) = mpsc::channel();

        Ok(Self {
            config,
            layout,
            session: DeviceSession::new(),
            bridge,
            store,
            tracker,
            sliders,
            dragging: None,
            waveform,
            events_tx,
            events_rx,
            parameters: HashMap::new(),
            last_progress: None,
        })
    }

    pub fn config(&self) -> &DeckConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn device(&self) -> Option<&D> {
        self.session.device()
    }

    pub fn store(&self) -> &SequenceStore {
        &self.store
    }

    pub fn pending_commands(&self) -> usize {
        self.bridge.pending_len()
    }

    /// Where the device should publish its events.
    pub fn event_sink(&self) -> EventSink {
        self.events_tx.clone()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════

    /// Resource loading finished; wait for the user gesture.
    pub fn resources_loaded(&mut self, description: GraphDescription) {
        self.check_layout(&description);
        self.session.resources_loaded(description);
    }

    fn check_layout(&self, description: &GraphDescription) {
        for control in self.layout.controls() {
            if let ControlTarget::Parameter(name) = &control.target {
                if !description.declares_parameter(name) {
                    log::warn!(
                        "control '{}' targets parameter '{name}' the graph does not declare",
                        control.element_id
                    );
                }
            }
        }
        for def in self.layout.sequences() {
            if !description.declares_inport(&def.name) {
                log::warn!("graph has no inport for sequence '{}'", def.name);
            }
        }
    }

    /// Create the device from a user gesture. Idempotent once active.
    pub fn begin<F>(&mut self, create: F) -> DeckResult<()>
    where
        F: FnOnce(&GraphDescription, EventSink) -> DeckResult<D>,
    {
        let was_active = self.session.is_active();
        let sink = self.event_sink();
        self.session.begin(|description| create(description, sink))?;
        if !was_active {
            self.on_activated();
        }
        Ok(())
    }

    /// Hand over a device that was created asynchronously.
    pub fn activate(&mut self, device: D) -> DeckResult<()> {
        let was_active = self.session.is_active();
        self.session.activate(device)?;
        if !was_active {
            self.on_activated();
        }
        Ok(())
    }

    fn on_activated(&mut self) {
        for element_id in self.unbound_controls() {
            log::warn!("control '{element_id}' targets a parameter the device does not expose");
        }
        let delivered = self.bridge.flush(self.session.device_mut());
        log::info!("device ready, {delivered} deferred commands delivered");
    }

    /// Controls bound to parameters the active device does not have.
    pub fn unbound_controls(&self) -> Vec<String> {
        let Some(device) = self.session.device() else {
            return Vec::new();
        };
        let names: HashSet<String> = device.parameter_names().into_iter().collect();
        self.layout
            .controls()
            .iter()
            .filter(|c| matches!(&c.target, ControlTarget::Parameter(name) if !names.contains(name)))
            .map(|c| c.element_id.clone())
            .collect()
    }

    /// Drop everything queued for a device that will never arrive.
    pub fn teardown(&mut self) {
        self.bridge.cancel_pending();
        self.dragging = None;
        log::debug!("deck torn down");
    }

    // ═══════════════════════════════════════════════════════════════════
    // Bridge operations
    // ═══════════════════════════════════════════════════════════════════

    pub fn set_parameter(&mut self, name: &str, value: f64) -> DeckResult<Delivery> {
        let delivery = self
            .bridge
            .set_parameter(self.session.device_mut(), name, value)?;
        self.parameters.insert(name.to_string(), value);
        Ok(delivery)
    }

    pub fn toggle_step(&mut self, sequence: &str, index: usize) -> DeckResult<Delivery> {
        self.store.toggle_step(sequence, index)?;
        self.push_sequence(sequence)
    }

    pub fn set_step_value(
        &mut self,
        sequence: &str,
        index: usize,
        value: f64,
    ) -> DeckResult<Delivery> {
        self.store.set_step_value(sequence, index, value)?;
        self.sync_step_sliders(sequence);
        self.push_sequence(sequence)
    }

    /// Replace a whole sequence (preset restore) and push it.
    pub fn replace_sequence(&mut self, sequence: &str, values: Vec<f64>) -> DeckResult<Delivery> {
        self.store.replace_values(sequence, values)?;
        self.sync_step_sliders(sequence);
        self.push_sequence(sequence)
    }

    /// Move idle slider drags of a lane to the stored values.
    fn sync_step_sliders(&mut self, sequence: &str) {
        let Some(values) = self.store.values(sequence) else {
            return;
        };
        for binding in self.layout.controls() {
            let ControlTarget::Step { sequence: lane, index } = &binding.target else {
                continue;
            };
            if binding.kind != ControlKind::Slider || lane != sequence {
                continue;
            }
            let (Some(drag), Some(&value)) =
                (self.sliders.get_mut(&binding.element_id), values.get(*index))
            else {
                continue;
            };
            if !drag.is_dragging() {
                drag.set_value(binding.range.normalize(value));
            }
        }
    }

    /// Send the full snapshot of a sequence.
    pub fn push_sequence(&mut self, sequence: &str) -> DeckResult<Delivery> {
        let command = self.store.snapshot(sequence)?;
        self.bridge.submit(self.session.device_mut(), command)
    }

    pub fn on_device_parameter_change(&mut self, callback: impl FnMut(&str, f64) + 'static) {
        self.bridge.on_device_parameter_change(callback);
    }

    pub fn on_device_message(&mut self, callback: impl FnMut(&str, &[f64]) + 'static) {
        self.bridge.on_device_message(callback);
    }

    fn parameter_value(&self, name: &str) -> f64 {
        self.session
            .device()
            .and_then(|d| d.parameter(name))
            .or_else(|| self.parameters.get(name).copied())
            .unwrap_or(0.0)
    }

    // ═══════════════════════════════════════════════════════════════════
    // UI → device
    // ═══════════════════════════════════════════════════════════════════

    /// Handle a page interaction. Failures are logged, never returned.
    pub fn handle_ui(&mut self, event: UiEvent, surface: &mut impl Surface) {
        self.try_handle_ui(&event, surface)
            .log_failure_with(|| format!("{event:?}"));
    }

    pub fn try_handle_ui(&mut self, event: &UiEvent, surface: &mut impl Surface) -> DeckResult<()> {
        match event {
            UiEvent::Click { element_id } => self.click(element_id, surface),
            UiEvent::PointerDown { element_id, y } => {
                if let Some(drag) = self.sliders.get_mut(element_id) {
                    drag.begin(*y);
                    self.dragging = Some(element_id.clone());
                }
                Ok(())
            }
            UiEvent::PointerMove { y } => {
                let Some(element_id) = self.dragging.clone() else {
                    return Ok(());
                };
                let moved = self
                    .sliders
                    .get_mut(&element_id)
                    .and_then(|drag| drag.drag_to(*y));
                match moved {
                    Some(normalized) => self.apply_slider(&element_id, normalized, surface),
                    None => Ok(()),
                }
            }
            UiEvent::PointerUp => {
                if let Some(element_id) = self.dragging.take() {
                    if let Some(drag) = self.sliders.get_mut(&element_id) {
                        drag.end();
                    }
                }
                Ok(())
            }
            UiEvent::Input { element_id, text } => self.input(element_id, text, surface),
        }
    }

    fn click(&mut self, element_id: &str, surface: &mut impl Surface) -> DeckResult<()> {
        let Some(binding) = self.layout.binding(element_id).cloned() else {
            return Ok(());
        };
        match (binding.kind, binding.target) {
            (ControlKind::Button, ControlTarget::Parameter(name)) => {
                let next = binding.range.flip(self.parameter_value(&name));
                self.set_parameter(&name, next)?;
                log::info!("{name} set to {next}");
                surface
                    .set_active(element_id, next > binding.range.min)
                    .log_failure("button state");
                Ok(())
            }
            (ControlKind::StepToggle, ControlTarget::Step { sequence, index }) => {
                let value = self.store.toggle_step(&sequence, index)?;
                surface
                    .set_active(element_id, value > binding.range.min)
                    .log_failure("step button state");
                self.push_sequence(&sequence).map(|_| ())
            }
            _ => Ok(()),
        }
    }

    fn apply_slider(
        &mut self,
        element_id: &str,
        normalized: f64,
        surface: &mut impl Surface,
    ) -> DeckResult<()> {
        let binding = self
            .layout
            .binding(element_id)
            .cloned()
            .ok_or_else(|| DeckError::ElementNotFound(element_id.to_string()))?;
        let value = binding.range.denormalize(normalized);
        surface
            .set_level(element_id, normalized)
            .log_failure("slider level");

        match binding.target {
            ControlTarget::Parameter(name) => self.set_parameter(&name, value).map(|_| ()),
            ControlTarget::Step { sequence, index } => {
                self.set_step_value(&sequence, index, value).map(|_| ())
            }
        }
    }

    fn input(&mut self, element_id: &str, text: &str, surface: &mut impl Surface) -> DeckResult<()> {
        let Some(binding) = self.layout.binding(element_id).cloned() else {
            return Ok(());
        };
        if binding.kind != ControlKind::NumberBox {
            return Ok(());
        }

        let value = parse_number_box(text, binding.range)?;
        surface
            .set_text(element_id, &binding.range.format(value))
            .log_failure("number box text");

        match binding.target {
            ControlTarget::Parameter(name) => self.set_parameter(&name, value).map(|_| ()),
            ControlTarget::Step { sequence, index } => {
                self.set_step_value(&sequence, index, value).map(|_| ())
            }
        }
    }

    /// Paint every control from local state (initial render).
    pub fn render_all(&mut self, surface: &mut impl Surface) {
        for binding in self.layout.controls() {
            let value = match &binding.target {
                ControlTarget::Parameter(name) => self.parameter_value(name),
                ControlTarget::Step { sequence, index } => self
                    .store
                    .values(sequence)
                    .and_then(|v| v.get(*index).copied())
                    .unwrap_or(binding.range.min),
            };
            let result = match binding.kind {
                ControlKind::Button | ControlKind::StepToggle => {
                    surface.set_active(&binding.element_id, value > binding.range.min)
                }
                ControlKind::Slider => {
                    surface.set_level(&binding.element_id, binding.range.normalize(value))
                }
                ControlKind::NumberBox => {
                    surface.set_text(&binding.element_id, &binding.range.format(value))
                }
            };
            result.log_failure("initial render");
        }
        self.tracker.redraw(surface);
    }

    // ═══════════════════════════════════════════════════════════════════
    // Device → UI
    // ═══════════════════════════════════════════════════════════════════

    /// Drain device events, notify subscribers and update the page.
    pub fn process_device_events(&mut self, surface: &mut impl Surface) -> usize {
        let mut processed = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.bridge.dispatch(&event);
            match &event {
                DeviceEvent::ParameterChanged { name, value } => {
                    self.parameters.insert(name.clone(), *value);
                    self.reflect_parameter(name, *value, surface);
                    self.tracker.on_event(name, &[*value]);
                }
                DeviceEvent::Message { tag, payload } => {
                    self.tracker.on_event(tag, payload);
                }
            }
            processed += 1;
        }
        self.tracker.drain();
        self.tracker.redraw(surface);
        processed
    }

    fn reflect_parameter(&mut self, name: &str, value: f64, surface: &mut impl Surface) {
        for binding in self.layout.parameter_controls(name) {
            let result = match binding.kind {
                ControlKind::Button | ControlKind::StepToggle => {
                    surface.set_active(&binding.element_id, value > binding.range.min)
                }
                ControlKind::Slider => {
                    let normalized = binding.range.normalize(value);
                    if let Some(drag) = self.sliders.get_mut(&binding.element_id) {
                        if !drag.is_dragging() {
                            drag.set_value(normalized);
                        }
                    }
                    surface.set_level(&binding.element_id, normalized)
                }
                ControlKind::NumberBox => {
                    surface.set_text(&binding.element_id, &binding.range.format(value))
                }
            };
            result.log_failure("reflecting device parameter");
        }

        self.update_progress(name, value, surface);
    }

    fn update_progress(&mut self, name: &str, value: f64, surface: &mut impl Surface) {
        let Some(progress) = self.layout.progress_binding() else {
            return;
        };
        if progress.parameter != name {
            return;
        }
        let level = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
        if self.last_progress == Some(level) {
            return;
        }
        if surface
            .set_level(&progress.element_id, level)
            .log_failure("progress bar")
            .is_some()
        {
            self.last_progress = Some(level);
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════

    /// Position poll, every `poll_interval_ms`.
    pub fn poll_tick(&mut self, surface: &mut impl Surface) {
        if let Some(device) = self.session.device() {
            self.tracker.poll(device);

            let progress = self
                .layout
                .progress_binding()
                .and_then(|p| device.parameter(&p.parameter).map(|v| (p.parameter.clone(), v)));
            if let Some((name, value)) = progress {
                self.update_progress(&name, value, surface);
            }
        }
        self.process_device_events(surface);
    }

    /// Deferred command retry, every `retry_interval_ms`.
    pub fn retry_tick(&mut self) -> usize {
        self.bridge.retry_tick(self.session.device_mut())
    }

    /// Waveform redraw, every `waveform_interval_ms`.
    pub fn waveform_tick(&mut self, canvas: &mut impl Canvas) -> bool {
        match (self.waveform.as_mut(), self.session.device()) {
            (Some(view), Some(device)) => view.refresh(device, canvas),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{MemoryCanvas, MemorySurface, SAMPLE_PATCH, SimDevice};

    fn loaded_deck() -> Deck<SimDevice> {
        let mut deck = Deck::new(DeckConfig::default(), Layout::standard()).unwrap();
        let description = GraphDescription::from_json("test", SAMPLE_PATCH).unwrap();
        deck.resources_loaded(description);
        deck
    }

    fn start(deck: &mut Deck<SimDevice>) -> SimDevice {
        let device = SimDevice::sample();
        let handle = device.clone();
        deck.begin(move |_, sink| {
            device.attach(sink);
            Ok(device)
        })
        .unwrap();
        handle
    }

    #[test_log::test]
    fn test_double_toggle_sends_twice_and_ends_at_zero() {
        let mut deck = loaded_deck();
        let device = start(&mut deck);

        assert_eq!(deck.toggle_step("seq1", 5).unwrap(), Delivery::Delivered);
        assert_eq!(deck.toggle_step("seq1", 5).unwrap(), Delivery::Delivered);

        let sent = device.sent_messages();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1[5], 1.0);
        assert_eq!(sent[1], ("seq1".to_string(), vec![0.0; 32]));
    }

    #[test_log::test]
    fn test_parameter_set_before_device_is_delivered_later() {
        let mut deck = loaded_deck();

        assert_eq!(deck.set_parameter("rotary1", 0.1).unwrap(), Delivery::Deferred);
        assert_eq!(deck.set_parameter("rotary1", 0.42).unwrap(), Delivery::Deferred);
        deck.retry_tick();
        assert_eq!(deck.pending_commands(), 1);

        let device = start(&mut deck);
        assert_eq!(device.parameter("rotary1"), Some(0.42));
        assert_eq!(device.parameter_writes(), 1);
        assert_eq!(deck.pending_commands(), 0);
    }

    #[test]
    fn test_invalid_length_is_never_sent() {
        let mut deck = loaded_deck();
        let device = start(&mut deck);

        let result = deck.replace_sequence("seq1", vec![1.0; 15]);
        assert!(matches!(
            result,
            Err(DeckError::InvalidSequenceLength { length: 15, .. })
        ));
        assert!(device.sent_messages().is_empty());
    }

    #[test]
    fn test_begin_requires_loaded_resources() {
        let mut deck: Deck<SimDevice> = Deck::new(DeckConfig::default(), Layout::standard()).unwrap();
        let result = deck.begin(|_, _| Ok(SimDevice::sample()));
        assert!(matches!(result, Err(DeckError::SessionNotReady)));
        assert_eq!(deck.state(), SessionState::Uninitialized);
    }

    #[test]
    fn test_play_button_toggles_and_reflects() {
        let mut deck = loaded_deck();
        let device = start(&mut deck);
        let mut surface = MemorySurface::new();

        let click = UiEvent::Click {
            element_id: "play".to_string(),
        };
        deck.handle_ui(click.clone(), &mut surface);
        assert_eq!(device.parameter("play"), Some(1.0));
        assert!(surface.is_active("play"));

        deck.handle_ui(click, &mut surface);
        assert_eq!(device.parameter("play"), Some(0.0));
        assert!(!surface.is_active("play"));
    }

    #[test]
    fn test_step_click_marks_button_and_pushes() {
        let mut deck = loaded_deck();
        let device = start(&mut deck);
        let mut surface = MemorySurface::new();

        deck.handle_ui(
            UiEvent::Click {
                element_id: "btn-seq3-2".to_string(),
            },
            &mut surface,
        );

        assert!(surface.is_active("btn-seq3-2"));
        let sent = device.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "seq3");
        assert_eq!(sent[0].1.len(), 16);
        assert_eq!(sent[0].1[2], 1.0);
    }

    #[test]
    fn test_huge_slider_drag_pushes_exactly_one() {
        let mut deck = loaded_deck();
        let device = start(&mut deck);
        let mut surface = MemorySurface::new();

        deck.handle_ui(
            UiEvent::PointerDown {
                element_id: "seq6-slider-4".to_string(),
                y: 300.0,
            },
            &mut surface,
        );
        deck.handle_ui(UiEvent::PointerMove { y: -1.0e9 }, &mut surface);
        deck.handle_ui(UiEvent::PointerUp, &mut surface);
        deck.handle_ui(UiEvent::PointerMove { y: 1.0e9 }, &mut surface);

        assert_eq!(deck.store().values("seq6").unwrap()[4], 1.0);
        assert_eq!(surface.level("seq6-slider-4"), Some(1.0));
        let sent = device.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1[4], 1.0);
    }

    #[test]
    fn test_step_slider_drag_continues_from_replaced_sequence() {
        let mut deck = loaded_deck();
        let device = start(&mut deck);
        let mut surface = MemorySurface::new();

        deck.replace_sequence("seq6", vec![0.8; 16]).unwrap();
        deck.set_step_value("seq6", 1, 0.3).unwrap();

        deck.handle_ui(
            UiEvent::PointerDown {
                element_id: "seq6-slider-0".to_string(),
                y: 100.0,
            },
            &mut surface,
        );
        deck.handle_ui(UiEvent::PointerMove { y: 90.0 }, &mut surface);
        deck.handle_ui(UiEvent::PointerUp, &mut surface);

        deck.handle_ui(
            UiEvent::PointerDown {
                element_id: "seq6-slider-1".to_string(),
                y: 100.0,
            },
            &mut surface,
        );
        deck.handle_ui(UiEvent::PointerMove { y: 110.0 }, &mut surface);

        let values = deck.store().values("seq6").unwrap();
        assert!((values[0] - 0.85).abs() < 1e-9);
        assert!((values[1] - 0.25).abs() < 1e-9);
        assert_eq!(values[2], 0.8);

        let sent = device.sent_messages();
        let last = &sent.last().unwrap().1;
        assert!((last[0] - 0.85).abs() < 1e-9);
        assert!((last[1] - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_unbound_controls_against_device_parameters() {
        let mut deck = loaded_deck();
        assert!(deck.unbound_controls().is_empty());

        let device = SimDevice::with_parameters(&["play", "rec", "rndm", "playstat"]);
        deck.begin(move |_, _| Ok(device)).unwrap();

        let unbound = deck.unbound_controls();
        assert_eq!(unbound.len(), 8);
        assert!(unbound.contains(&"rotary1".to_string()));
        assert!(!unbound.contains(&"play".to_string()));
    }

    #[test]
    fn test_rotary_drag_writes_parameter() {
        let mut deck = loaded_deck();
        let device = start(&mut deck);
        let mut surface = MemorySurface::new();

        deck.handle_ui(
            UiEvent::PointerDown {
                element_id: "rotary2".to_string(),
                y: 100.0,
            },
            &mut surface,
        );
        deck.handle_ui(UiEvent::PointerMove { y: 0.0 }, &mut surface);

        assert_eq!(device.parameter("rotary2"), Some(0.5));
        assert_eq!(surface.level("rotary2"), Some(0.5));
    }

    #[test]
    fn test_number_box_input_clamps() {
        let mut deck = loaded_deck();
        let device = start(&mut deck);
        let mut surface = MemorySurface::new();

        deck.handle_ui(
            UiEvent::Input {
                element_id: "seq9-box-0".to_string(),
                text: "15".to_string(),
            },
            &mut surface,
        );
        deck.handle_ui(
            UiEvent::Input {
                element_id: "seq9-box-1".to_string(),
                text: "-3".to_string(),
            },
            &mut surface,
        );
        deck.handle_ui(
            UiEvent::Input {
                element_id: "seq9-box-2".to_string(),
                text: "loud".to_string(),
            },
            &mut surface,
        );

        assert_eq!(surface.text("seq9-box-0"), Some("8"));
        assert_eq!(surface.text("seq9-box-1"), Some("0"));
        assert_eq!(&deck.store().values("seq9").unwrap()[..3], &[8.0, 0.0, 0.0]);
        assert_eq!(device.sent_messages().len(), 2);
    }

    #[test]
    fn test_automation_reflects_to_page_and_subscribers() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut deck = loaded_deck();
        let device = start(&mut deck);
        let mut surface = MemorySurface::new();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        deck.on_device_parameter_change(move |name, value| {
            sink.borrow_mut().push((name.to_string(), value));
        });

        device.automate("rotary3", 0.75);
        device.automate("rec", 1.0);
        device.automate("playstat", 0.5);
        assert_eq!(deck.process_device_events(&mut surface), 3);

        assert_eq!(surface.level("rotary3"), Some(0.75));
        assert!(surface.is_active("rec"));
        assert_eq!(surface.level("playstat-bar"), Some(0.5));
        assert_eq!(seen.borrow().len(), 3);

        // The next drag continues from the automated value.
        deck.handle_ui(
            UiEvent::PointerDown {
                element_id: "rotary3".to_string(),
                y: 0.0,
            },
            &mut surface,
        );
        deck.handle_ui(UiEvent::PointerMove { y: 10.0 }, &mut surface);
        let dragged = device.parameter("rotary3").unwrap();
        assert!((dragged - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_positions_from_poll_and_messages() {
        let mut deck = loaded_deck();
        let device = start(&mut deck);
        let mut surface = MemorySurface::new();

        device.set_silently("step", 7.0);
        device.set_silently("step16", 3.0);
        deck.poll_tick(&mut surface);
        assert_eq!(surface.active_with_prefix("step-"), vec!["step-7".to_string()]);
        assert_eq!(surface.active_with_prefix("step16-"), vec!["step16-3".to_string()]);

        device.set_silently("step16alt", 12.0);
        device.emit("step16alt", vec![12.0]);
        deck.poll_tick(&mut surface);
        assert_eq!(
            surface.active_with_prefix("step16alt-"),
            vec!["step16alt-12".to_string()]
        );

        let writes = surface.writes();
        deck.poll_tick(&mut surface);
        assert_eq!(surface.writes(), writes);
    }

    #[test]
    fn test_waveform_tick_needs_device() {
        let mut deck = loaded_deck();
        let mut canvas = MemoryCanvas::new(16, 32);
        assert!(!deck.waveform_tick(&mut canvas));

        let device = start(&mut deck);
        assert!(!deck.waveform_tick(&mut canvas));

        device.load_buffer("waveform", (0..256).map(|i| (i as f32 / 128.0) - 1.0).collect());
        assert!(deck.waveform_tick(&mut canvas));
        assert_eq!(canvas.segments.len(), 16);
    }

    #[test]
    fn test_clicks_before_device_are_queued() {
        let mut deck = loaded_deck();
        let mut surface = MemorySurface::new();

        for _ in 0..3 {
            deck.handle_ui(
                UiEvent::Click {
                    element_id: "btn-seq2-0".to_string(),
                },
                &mut surface,
            );
        }
        assert_eq!(deck.pending_commands(), 1);

        let device = start(&mut deck);
        let sent = device.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1[0], 1.0);
    }

    #[test]
    fn test_render_all_with_missing_elements() {
        let mut deck = loaded_deck();
        let mut surface = MemorySurface::with_elements(["play", "seq9-box-0", "rotary1"]);
        deck.render_all(&mut surface);

        assert!(!surface.is_active("play"));
        assert_eq!(surface.text("seq9-box-0"), Some("0"));
        assert_eq!(surface.level("rotary1"), Some(0.0));
    }
}
