// src/controls.rs
//
// Declarative page layout.
//
// Each control on the page is one `ControlBinding`: an element id, what kind
// of control it is, and the parameter or sequence step it drives. The deck
// iterates the layout instead of wiring each control by hand.

use std::collections::HashMap;

use crate::error::{DeckError, DeckResult};
use crate::position::PositionGroup;
use crate::state::{SequenceDef, StepKind, ValueRange};

// ═══════════════════════════════════════════════════════════════════════════
// Element ids
// ═══════════════════════════════════════════════════════════════════════════

pub fn step_button_id(sequence: &str, index: usize) -> String {
    format!("btn-{sequence}-{index}")
}

pub fn step_slider_id(sequence: &str, index: usize) -> String {
    format!("{sequence}-slider-{index}")
}

pub fn step_box_id(sequence: &str, index: usize) -> String {
    format!("{sequence}-box-{index}")
}

pub fn rotary_id(number: usize) -> String {
    format!("rotary{number}")
}

/// Id of the element that edits step `index` of a sequence.
pub fn step_element_id(def: &SequenceDef, index: usize) -> String {
    match def.kind {
        StepKind::Toggle => step_button_id(&def.name, index),
        StepKind::Slider => step_slider_id(&def.name, index),
        StepKind::NumberBox => step_box_id(&def.name, index),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Bindings
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Click flips a parameter between 0 and 1.
    Button,
    /// Click flips a sequence step.
    StepToggle,
    /// Vertical drag sets a normalized value.
    Slider,
    /// Typed number, clamped into range.
    NumberBox,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlTarget {
    Parameter(String),
    Step { sequence: String, index: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlBinding {
    pub element_id: String,
    pub kind: ControlKind,
    pub target: ControlTarget,
    pub range: ValueRange,
}

/// Element whose level follows a parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressBinding {
    pub element_id: String,
    pub parameter: String,
}

/// Canvas that shows a device data buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformBinding {
    pub element_id: String,
    pub buffer: String,
}

/// Everything the deck wires on a page.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    sequences: Vec<SequenceDef>,
    controls: Vec<ControlBinding>,
    by_element: HashMap<String, usize>,
    position_groups: Vec<PositionGroup>,
    progress: Option<ProgressBinding>,
    waveform: Option<WaveformBinding>,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full sequencer page: nine lanes, eight rotaries, transport
    /// buttons, three position groups, a progress bar and a waveform.
    pub fn standard() -> Self {
        let mut layout = Self::new()
            .sequence(SequenceDef::toggles("seq1", 32))
            .sequence(SequenceDef::toggles("seq2", 16))
            .sequence(SequenceDef::toggles("seq3", 16))
            .sequence(SequenceDef::toggles("seq4", 16))
            .sequence(SequenceDef::toggles("seq5", 16))
            .sequence(SequenceDef::sliders("seq6", 16))
            .sequence(SequenceDef::toggles("seq7", 16))
            .sequence(SequenceDef::toggles("seq8", 16))
            .sequence(SequenceDef::number_boxes("seq9", 16, 8.0));

        for number in 1..=8 {
            layout = layout.rotary(number);
        }

        layout
            .button("play")
            .button("rec")
            .button("rndm")
            .position_group(PositionGroup::new("step", 32, "step"))
            .position_group(PositionGroup::new("step16", 16, "step16"))
            .position_group(PositionGroup::new("step16alt", 16, "step16alt"))
            .progress("playstat-bar", "playstat")
            .waveform("waveformCanvas", "waveform")
    }

    fn bind(&mut self, binding: ControlBinding) {
        if let Some(&existing) = self.by_element.get(&binding.element_id) {
            log::warn!("element '{}' bound twice, keeping the last", binding.element_id);
            self.controls[existing] = binding;
        } else {
            self.by_element
                .insert(binding.element_id.clone(), self.controls.len());
            self.controls.push(binding);
        }
    }

    /// Add a sequence and one control per step.
    pub fn sequence(mut self, def: SequenceDef) -> Self {
        let kind = match def.kind {
            StepKind::Toggle => ControlKind::StepToggle,
            StepKind::Slider => ControlKind::Slider,
            StepKind::NumberBox => ControlKind::NumberBox,
        };
        for index in 0..def.length {
            self.bind(ControlBinding {
                element_id: step_element_id(&def, index),
                kind,
                target: ControlTarget::Step {
                    sequence: def.name.clone(),
                    index,
                },
                range: def.range,
            });
        }
        self.sequences.push(def);
        self
    }

    /// `rotary<N>` slider driving the parameter of the same name.
    pub fn rotary(mut self, number: usize) -> Self {
        let id = rotary_id(number);
        self.bind(ControlBinding {
            element_id: id.clone(),
            kind: ControlKind::Slider,
            target: ControlTarget::Parameter(id),
            range: ValueRange::UNIT,
        });
        self
    }

    /// A button with the same id as the parameter it toggles.
    pub fn button(mut self, parameter: &str) -> Self {
        self.bind(ControlBinding {
            element_id: parameter.to_string(),
            kind: ControlKind::Button,
            target: ControlTarget::Parameter(parameter.to_string()),
            range: ValueRange::TOGGLE,
        });
        self
    }

    pub fn position_group(mut self, group: PositionGroup) -> Self {
        self.position_groups.push(group);
        self
    }

    pub fn progress(mut self, element_id: &str, parameter: &str) -> Self {
        self.progress = Some(ProgressBinding {
            element_id: element_id.to_string(),
            parameter: parameter.to_string(),
        });
        self
    }

    pub fn waveform(mut self, element_id: &str, buffer: &str) -> Self {
        self.waveform = Some(WaveformBinding {
            element_id: element_id.to_string(),
            buffer: buffer.to_string(),
        });
        self
    }

    pub fn sequences(&self) -> &[SequenceDef] {
        &self.sequences
    }

    pub fn controls(&self) -> &[ControlBinding] {
        &self.controls
    }

    pub fn binding(&self, element_id: &str) -> Option<&ControlBinding> {
        self.by_element.get(element_id).map(|&i| &self.controls[i])
    }

    /// Controls driving a parameter directly.
    pub fn parameter_controls<'a>(
        &'a self,
        parameter: &'a str,
    ) -> impl Iterator<Item = &'a ControlBinding> + 'a {
        self.controls.iter().filter(move |c| {
            matches!(&c.target, ControlTarget::Parameter(name) if name == parameter)
        })
    }

    pub fn position_groups(&self) -> &[PositionGroup] {
        &self.position_groups
    }

    pub fn progress_binding(&self) -> Option<&ProgressBinding> {
        self.progress.as_ref()
    }

    pub fn waveform_binding(&self) -> Option<&WaveformBinding> {
        self.waveform.as_ref()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Input handling
// ═══════════════════════════════════════════════════════════════════════════

/// Transient state of a vertical slider drag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliderDrag {
    dragging: bool,
    last_y: f64,
    value: f64,
    sensitivity: f64,
}

impl SliderDrag {
    pub fn new(value: f64, sensitivity: f64) -> Self {
        Self {
            dragging: false,
            last_y: 0.0,
            value: ValueRange::UNIT.clamp(value),
            sensitivity,
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Sync with a value that changed elsewhere (e.g. device automation).
    pub fn set_value(&mut self, value: f64) {
        self.value = ValueRange::UNIT.clamp(value);
    }

    pub fn begin(&mut self, y: f64) {
        self.dragging = true;
        self.last_y = y;
    }

    /// Move the pointer. Upward movement increases the value.
    ///
    /// Returns the new normalized value, or `None` when not dragging or the
    /// value did not change.
    pub fn drag_to(&mut self, y: f64) -> Option<f64> {
        if !self.dragging || !y.is_finite() {
            return None;
        }
        let delta = (self.last_y - y) * self.sensitivity;
        self.last_y = y;

        let next = ValueRange::UNIT.clamp(self.value + delta);
        if next == self.value {
            return None;
        }
        self.value = next;
        Some(next)
    }

    pub fn end(&mut self) {
        self.dragging = false;
    }
}

/// Parse number box input into a value within `range`.
pub fn parse_number_box(input: &str, range: ValueRange) -> DeckResult<f64> {
    let trimmed = input.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| DeckError::InvalidNumber(input.to_string()))?;
    if !value.is_finite() {
        return Err(DeckError::InvalidNumber(input.to_string()));
    }
    Ok(range.clamp(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_layout_ids() {
        let layout = Layout::standard();

        let binding = layout.binding("btn-seq1-31").unwrap();
        assert_eq!(binding.kind, ControlKind::StepToggle);
        assert_eq!(
            binding.target,
            ControlTarget::Step {
                sequence: "seq1".to_string(),
                index: 31
            }
        );
        assert!(layout.binding("btn-seq1-32").is_none());

        assert_eq!(layout.binding("seq6-slider-0").unwrap().kind, ControlKind::Slider);
        assert_eq!(layout.binding("seq9-box-15").unwrap().kind, ControlKind::NumberBox);
        assert_eq!(layout.binding("rotary8").unwrap().kind, ControlKind::Slider);
        assert_eq!(layout.binding("rndm").unwrap().kind, ControlKind::Button);
        assert_eq!(layout.sequences().len(), 9);
        assert_eq!(layout.position_groups().len(), 3);
        assert_eq!(layout.parameter_controls("play").count(), 1);
    }

    #[test]
    fn test_huge_drag_clamps_to_one() {
        let mut drag = SliderDrag::new(0.5, 0.005);
        drag.begin(500.0);
        assert_eq!(drag.drag_to(-1.0e9), Some(1.0));
        assert_eq!(drag.drag_to(-2.0e9), None);
        assert_eq!(drag.drag_to(1.0e12), Some(0.0));
        assert!(drag.value() >= 0.0 && drag.value() <= 1.0);
    }

    #[test]
    fn test_drag_only_while_dragging() {
        let mut drag = SliderDrag::new(0.0, 0.25);
        assert_eq!(drag.drag_to(10.0), None);

        drag.begin(100.0);
        assert_eq!(drag.drag_to(98.0), Some(0.5));
        drag.end();
        assert_eq!(drag.drag_to(0.0), None);
        assert_eq!(drag.value(), 0.5);
    }

    #[test]
    fn test_number_box_clamps() {
        let range = ValueRange::stepped(0.0, 8.0, 1.0);
        assert_eq!(parse_number_box("15", range).unwrap(), 8.0);
        assert_eq!(parse_number_box("-3", range).unwrap(), 0.0);
        assert_eq!(parse_number_box(" 4 ", range).unwrap(), 4.0);
        assert!(matches!(
            parse_number_box("four", range),
            Err(DeckError::InvalidNumber(_))
        ));
        assert!(parse_number_box("inf", range).is_err());
    }
}
