// src/state/sequence.rs
//
// Step patterns.
//
// The store is the single source of truth for the step grids on the page.
// Every mutation is followed by a wholesale push of the sequence, so the
// device always holds a complete snapshot and no merge protocol is needed.

use std::collections::BTreeMap;

use super::{Command, ValueRange};
use crate::error::{DeckError, DeckResult};

/// How the steps of a sequence are edited on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// `btn-<seq>-<i>` on/off buttons
    Toggle,
    /// `<seq>-slider-<i>` vertical sliders
    Slider,
    /// `<seq>-box-<i>` number inputs
    NumberBox,
}

/// Declaration of a named sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceDef {
    pub name: String,
    pub length: usize,
    pub kind: StepKind,
    pub range: ValueRange,
}

impl SequenceDef {
    pub fn toggles(name: impl Into<String>, length: usize) -> Self {
        Self {
            name: name.into(),
            length,
            kind: StepKind::Toggle,
            range: ValueRange::TOGGLE,
        }
    }

    pub fn sliders(name: impl Into<String>, length: usize) -> Self {
        Self {
            name: name.into(),
            length,
            kind: StepKind::Slider,
            range: ValueRange::UNIT,
        }
    }

    pub fn number_boxes(name: impl Into<String>, length: usize, max: f64) -> Self {
        Self {
            name: name.into(),
            length,
            kind: StepKind::NumberBox,
            range: ValueRange::stepped(0.0, max, 1.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sequence {
    def: SequenceDef,
    values: Vec<f64>,
}

impl Sequence {
    pub fn def(&self) -> &SequenceDef {
        &self.def
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn slot(&mut self, index: usize) -> DeckResult<&mut f64> {
        let length = self.values.len();
        self.values
            .get_mut(index)
            .ok_or_else(|| DeckError::IndexOutOfRange {
                sequence: self.def.name.clone(),
                index,
                length,
            })
    }
}

/// All sequences of the page, keyed by name.
#[derive(Debug, Clone)]
pub struct SequenceStore {
    sequences: BTreeMap<String, Sequence>,
    accepted_lengths: Vec<usize>,
}

impl SequenceStore {
    pub fn new(accepted_lengths: Vec<usize>) -> Self {
        Self {
            sequences: BTreeMap::new(),
            accepted_lengths,
        }
    }

    fn check_length(&self, name: &str, length: usize) -> DeckResult<()> {
        if self.accepted_lengths.contains(&length) {
            Ok(())
        } else {
            Err(DeckError::InvalidSequenceLength {
                name: name.to_string(),
                length,
                accepted: self.accepted_lengths.clone(),
            })
        }
    }

    /// Register a sequence with every step at the range minimum.
    ///
    /// Re-declaring a name resets it.
    pub fn declare(&mut self, def: SequenceDef) -> DeckResult<()> {
        self.check_length(&def.name, def.length)?;
        let values = vec![def.range.min; def.length];
        self.sequences
            .insert(def.name.clone(), Sequence { def, values });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Sequence> {
        self.sequences.get(name)
    }

    pub fn values(&self, name: &str) -> Option<&[f64]> {
        self.sequences.get(name).map(Sequence::values)
    }

    fn sequence_mut(&mut self, name: &str) -> DeckResult<&mut Sequence> {
        self.sequences
            .get_mut(name)
            .ok_or_else(|| DeckError::UnknownSequence(name.to_string()))
    }

    /// Flip a step between the ends of its range. Returns the new value.
    pub fn toggle_step(&mut self, name: &str, index: usize) -> DeckResult<f64> {
        let sequence = self.sequence_mut(name)?;
        let range = sequence.def.range;
        let slot = sequence.slot(index)?;
        *slot = range.flip(*slot);
        Ok(*slot)
    }

    /// Store a clamped value. Returns what was actually stored.
    pub fn set_step_value(&mut self, name: &str, index: usize, value: f64) -> DeckResult<f64> {
        let sequence = self.sequence_mut(name)?;
        let clamped = sequence.def.range.clamp(value);
        *sequence.slot(index)? = clamped;
        Ok(clamped)
    }

    /// Replace all values at once (e.g. restoring a preset).
    ///
    /// Values are clamped; the length is only checked when the sequence is
    /// pushed, so a bad preset is held locally but never reaches the device.
    pub fn replace_values(&mut self, name: &str, values: Vec<f64>) -> DeckResult<()> {
        let sequence = self.sequence_mut(name)?;
        let range = sequence.def.range;
        sequence.values = values.into_iter().map(|v| range.clamp(v)).collect();
        Ok(())
    }

    /// Reset every step to the range minimum.
    pub fn clear(&mut self, name: &str) -> DeckResult<()> {
        let sequence = self.sequence_mut(name)?;
        let min = sequence.def.range.min;
        sequence.values.iter_mut().for_each(|v| *v = min);
        Ok(())
    }

    /// Validate a sequence and build the message that pushes it.
    pub fn snapshot(&self, name: &str) -> DeckResult<Command> {
        let sequence = self
            .sequences
            .get(name)
            .ok_or_else(|| DeckError::UnknownSequence(name.to_string()))?;
        self.check_length(name, sequence.len())?;
        Ok(Command::SendMessage {
            tag: name.to_string(),
            payload: sequence.values.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SequenceStore {
        let mut store = SequenceStore::new(vec![8, 16, 32]);
        store.declare(SequenceDef::toggles("seq1", 32)).unwrap();
        store.declare(SequenceDef::sliders("seq6", 16)).unwrap();
        store.declare(SequenceDef::number_boxes("seq9", 16, 8.0)).unwrap();
        store
    }

    #[test]
    fn test_double_toggle_is_identity() {
        let mut store = store();
        for index in [0, 5, 31] {
            let before = store.values("seq1").unwrap()[index];
            store.toggle_step("seq1", index).unwrap();
            assert_ne!(store.values("seq1").unwrap()[index], before);
            store.toggle_step("seq1", index).unwrap();
            assert_eq!(store.values("seq1").unwrap()[index], before);
        }
    }

    #[test]
    fn test_toggle_out_of_range() {
        let mut store = store();
        let result = store.toggle_step("seq1", 32);
        assert!(matches!(
            result,
            Err(DeckError::IndexOutOfRange { index: 32, length: 32, .. })
        ));
        assert!(matches!(
            store.toggle_step("seq42", 0),
            Err(DeckError::UnknownSequence(_))
        ));
    }

    #[test]
    fn test_set_step_value_clamps() {
        let mut store = store();
        assert_eq!(store.set_step_value("seq9", 0, 15.0).unwrap(), 8.0);
        assert_eq!(store.set_step_value("seq9", 1, -3.0).unwrap(), 0.0);
        assert_eq!(store.set_step_value("seq6", 2, 7.5).unwrap(), 1.0);
        assert_eq!(store.set_step_value("seq6", 3, 0.42).unwrap(), 0.42);
        assert_eq!(&store.values("seq9").unwrap()[..2], &[8.0, 0.0]);
    }

    #[test]
    fn test_declare_rejects_bad_length() {
        let mut store = store();
        let result = store.declare(SequenceDef::toggles("seq2", 12));
        assert!(matches!(
            result,
            Err(DeckError::InvalidSequenceLength { length: 12, .. })
        ));
        assert!(store.get("seq2").is_none());
    }

    #[test]
    fn test_truncated_sequence_is_not_snapshotted() {
        let mut store = store();
        store.replace_values("seq1", vec![1.0; 15]).unwrap();
        assert!(matches!(
            store.snapshot("seq1"),
            Err(DeckError::InvalidSequenceLength { length: 15, .. })
        ));
    }

    #[test]
    fn test_snapshot_carries_full_payload() {
        let mut store = store();
        store.toggle_step("seq1", 3).unwrap();
        match store.snapshot("seq1").unwrap() {
            Command::SendMessage { tag, payload } => {
                assert_eq!(tag, "seq1");
                assert_eq!(payload.len(), 32);
                assert_eq!(payload[3], 1.0);
                assert_eq!(payload.iter().sum::<f64>(), 1.0);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_clear_resets_to_minimum() {
        let mut store = store();
        store.set_step_value("seq9", 4, 6.0).unwrap();
        store.clear("seq9").unwrap();
        assert!(store.values("seq9").unwrap().iter().all(|v| *v == 0.0));
    }
}
