// src/sim.rs
//
// In-memory stand-ins for the device and the page.
//
// Used by the native sanity run and by tests. `SimDevice` is a cheap
// clonable handle so a test can keep one while the session owns another.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use crate::device::{Device, DeviceEvent, EventSink};
use crate::error::{DeckError, DeckResult};
use crate::surface::{Canvas, Surface};

/// A minimal graph description accepted by `GraphDescription::from_json`.
pub const SAMPLE_PATCH: &str = r#"{
    "desc": {
        "meta": { "rnboversion": "1.3.4" },
        "parameters": [
            { "paramId": "play" }, { "paramId": "rec" }, { "paramId": "rndm" },
            { "paramId": "rotary1" }, { "paramId": "rotary2" }, { "paramId": "rotary3" },
            { "paramId": "rotary4" }, { "paramId": "rotary5" }, { "paramId": "rotary6" },
            { "paramId": "rotary7" }, { "paramId": "rotary8" },
            { "paramId": "playstat" }, { "paramId": "step" },
            { "paramId": "step16" }, { "paramId": "step16alt" }
        ],
        "inports": [
            { "tag": "seq1" }, { "tag": "seq2" }, { "tag": "seq3" },
            { "tag": "seq4" }, { "tag": "seq5" }, { "tag": "seq6" },
            { "tag": "seq7" }, { "tag": "seq8" }, { "tag": "seq9" }
        ],
        "outports": [
            { "tag": "step" }, { "tag": "step16" }, { "tag": "step16alt" }
        ]
    }
}"#;

#[derive(Default)]
struct SimState {
    parameters: BTreeMap<String, f64>,
    buffers: HashMap<String, Vec<f32>>,
    sent: Vec<(String, Vec<f64>)>,
    parameter_writes: usize,
    sink: Option<EventSink>,
}

impl SimState {
    fn publish(&self, event: DeviceEvent) {
        if let Some(sink) = &self.sink {
            // The receiving deck may be gone during teardown.
            let _ = sink.send(event);
        }
    }
}

/// An in-memory device with a fixed set of parameters.
#[derive(Clone, Default)]
pub struct SimDevice {
    state: Rc<RefCell<SimState>>,
}

impl SimDevice {
    pub fn with_parameters(names: &[&str]) -> Self {
        let device = Self::default();
        {
            let mut state = device.state.borrow_mut();
            for name in names {
                state.parameters.insert(name.to_string(), 0.0);
            }
        }
        device
    }

    /// Every parameter named by [`SAMPLE_PATCH`].
    pub fn sample() -> Self {
        let names = [
            "play", "rec", "rndm", "rotary1", "rotary2", "rotary3", "rotary4", "rotary5",
            "rotary6", "rotary7", "rotary8", "playstat", "step", "step16", "step16alt",
        ];
        Self::with_parameters(&names)
    }

    /// Publish events into this sink from now on.
    pub fn attach(&self, sink: EventSink) {
        self.state.borrow_mut().sink = Some(sink);
    }

    /// Change a parameter from "inside the graph" and notify.
    pub fn automate(&self, name: &str, value: f64) {
        let mut state = self.state.borrow_mut();
        if let Some(slot) = state.parameters.get_mut(name) {
            *slot = value;
            state.publish(DeviceEvent::ParameterChanged {
                name: name.to_string(),
                value,
            });
        }
    }

    /// Change a parameter without notifying, as if only polling could see it.
    pub fn set_silently(&self, name: &str, value: f64) {
        if let Some(slot) = self.state.borrow_mut().parameters.get_mut(name) {
            *slot = value;
        }
    }

    /// Emit a message on an outport.
    pub fn emit(&self, tag: &str, payload: Vec<f64>) {
        self.state.borrow().publish(DeviceEvent::Message {
            tag: tag.to_string(),
            payload,
        });
    }

    pub fn load_buffer(&self, name: &str, samples: Vec<f32>) {
        self.state
            .borrow_mut()
            .buffers
            .insert(name.to_string(), samples);
    }

    /// Messages received so far, oldest first.
    pub fn sent_messages(&self) -> Vec<(String, Vec<f64>)> {
        self.state.borrow().sent.clone()
    }

    pub fn parameter_writes(&self) -> usize {
        self.state.borrow().parameter_writes
    }
}

impl Device for SimDevice {
    fn parameter(&self, name: &str) -> Option<f64> {
        self.state.borrow().parameters.get(name).copied()
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> DeckResult<()> {
        let mut state = self.state.borrow_mut();
        let slot = state
            .parameters
            .get_mut(name)
            .ok_or_else(|| DeckError::ParameterNotFound(name.to_string()))?;
        *slot = value;
        state.parameter_writes += 1;
        state.publish(DeviceEvent::ParameterChanged {
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    fn send_message(&mut self, tag: &str, payload: &[f64]) -> DeckResult<()> {
        self.state
            .borrow_mut()
            .sent
            .push((tag.to_string(), payload.to_vec()));
        Ok(())
    }

    fn data_buffer(&self, name: &str) -> Option<Vec<f32>> {
        self.state.borrow().buffers.get(name).cloned()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.state.borrow().parameters.keys().cloned().collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Page
// ═══════════════════════════════════════════════════════════════════════════

/// An in-memory page holding a fixed set of element ids.
#[derive(Debug, Default)]
pub struct MemorySurface {
    active: HashMap<String, bool>,
    levels: HashMap<String, f64>,
    texts: HashMap<String, String>,
    known: Option<HashSet<String>>,
    writes: usize,
}

impl MemorySurface {
    /// A page where every id exists.
    pub fn new() -> Self {
        Self::default()
    }

    /// A page containing only these ids.
    pub fn with_elements<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: Some(ids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    fn check(&mut self, element_id: &str) -> DeckResult<()> {
        match &self.known {
            Some(known) if !known.contains(element_id) => {
                Err(DeckError::ElementNotFound(element_id.to_string()))
            }
            _ => {
                self.writes += 1;
                Ok(())
            }
        }
    }

    pub fn is_active(&self, element_id: &str) -> bool {
        self.active.get(element_id).copied().unwrap_or(false)
    }

    pub fn level(&self, element_id: &str) -> Option<f64> {
        self.levels.get(element_id).copied()
    }

    pub fn text(&self, element_id: &str) -> Option<&str> {
        self.texts.get(element_id).map(String::as_str)
    }

    /// Ids currently marked active whose id starts with `prefix`.
    pub fn active_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .active
            .iter()
            .filter(|(id, on)| **on && id.starts_with(prefix))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of successful element writes.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl Surface for MemorySurface {
    fn set_active(&mut self, element_id: &str, active: bool) -> DeckResult<()> {
        self.check(element_id)?;
        self.active.insert(element_id.to_string(), active);
        Ok(())
    }

    fn set_level(&mut self, element_id: &str, level: f64) -> DeckResult<()> {
        self.check(element_id)?;
        self.levels.insert(element_id.to_string(), level);
        Ok(())
    }

    fn set_text(&mut self, element_id: &str, text: &str) -> DeckResult<()> {
        self.check(element_id)?;
        self.texts.insert(element_id.to_string(), text.to_string());
        Ok(())
    }
}

/// Records waveform segments instead of drawing them.
#[derive(Debug)]
pub struct MemoryCanvas {
    width: u32,
    height: u32,
    pub segments: Vec<(f64, f64, f64)>,
    pub frames: usize,
}

impl MemoryCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            segments: Vec::new(),
            frames: 0,
        }
    }
}

impl Canvas for MemoryCanvas {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn clear(&mut self) {
        self.segments.clear();
    }

    fn vertical_line(&mut self, x: f64, y_top: f64, y_bottom: f64) {
        self.segments.push((x, y_top, y_bottom));
    }

    fn finish(&mut self) {
        self.frames += 1;
    }
}
