// src/position.rs
//
// Transport position tracking and step indicator redraw.
//
// Positions reach the page two ways: a timer polls the position parameters,
// and the device pushes position messages/parameter changes. Both feed the
// same channel; `drain` consumes it once and `redraw` writes the result.

use std::sync::mpsc::{self, Receiver, Sender};

use crate::device::Device;
use crate::error::LogFailure;
use crate::surface::Surface;

/// A set of step indicators following one device position.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionGroup {
    /// Parameter name and message tag carrying the position.
    pub source: String,
    /// Number of indicators.
    pub length: usize,
    /// Indicators are `<prefix>-<i>`.
    pub indicator_prefix: String,
}

impl PositionGroup {
    pub fn new(source: impl Into<String>, length: usize, indicator_prefix: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            length,
            indicator_prefix: indicator_prefix.into(),
        }
    }

    pub fn indicator_id(&self, index: usize) -> String {
        format!("{}-{}", self.indicator_prefix, index)
    }

    /// Map a device-reported position onto an indicator index.
    ///
    /// Positions wrap around the group length; negative and non-finite
    /// values are rejected.
    pub fn index_for(&self, position: f64) -> Option<usize> {
        if self.length == 0 || !position.is_finite() || position < 0.0 {
            return None;
        }
        Some(position.floor() as usize % self.length)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionOrigin {
    Poll,
    Event,
}

/// One reported position.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdate {
    pub source: String,
    pub position: f64,
    pub origin: PositionOrigin,
}

/// Tracks the current index of every position group.
pub struct PositionTracker {
    groups: Vec<PositionGroup>,
    tx: Sender<PositionUpdate>,
    rx: Receiver<PositionUpdate>,

    /// Latest index per group.
    current: Vec<Option<usize>>,

    /// What the page shows per group (`None` = never drawn).
    applied: Vec<Option<Option<usize>>>,
}

impl PositionTracker {
    pub fn new(groups: Vec<PositionGroup>) -> Self {
        let (tx, rx) = mpsc::channel();
        let count = groups.len();
        Self {
            groups,
            tx,
            rx,
            current: vec![None; count],
            applied: vec![None; count],
        }
    }

    pub fn tracks(&self, source: &str) -> bool {
        self.groups.iter().any(|g| g.source == source)
    }

    fn publish(&self, source: &str, position: f64, origin: PositionOrigin) {
        // The receiver lives in `self`, so this cannot fail.
        let _ = self.tx.send(PositionUpdate {
            source: source.to_string(),
            position,
            origin,
        });
    }

    /// Timer path: read every position parameter from the device.
    pub fn poll<D: Device>(&self, device: &D) {
        for group in &self.groups {
            if let Some(position) = device.parameter(&group.source) {
                self.publish(&group.source, position, PositionOrigin::Poll);
            }
        }
    }

    /// Event path: a tagged message or parameter change from the device.
    ///
    /// Returns `false` if nothing tracks `source`.
    pub fn on_event(&self, source: &str, payload: &[f64]) -> bool {
        if !self.tracks(source) {
            return false;
        }
        match payload.first() {
            Some(&position) => self.publish(source, position, PositionOrigin::Event),
            None => log::debug!("empty position message '{source}'"),
        }
        true
    }

    /// Consume everything queued. Returns whether any index changed.
    pub fn drain(&mut self) -> bool {
        let mut changed = false;
        while let Ok(update) = self.rx.try_recv() {
            for (group, current) in self.groups.iter().zip(self.current.iter_mut()) {
                if group.source != update.source {
                    continue;
                }
                match group.index_for(update.position) {
                    Some(index) => {
                        if *current != Some(index) {
                            *current = Some(index);
                            changed = true;
                        }
                    }
                    None => log::debug!(
                        "ignoring position {} for '{}' ({:?})",
                        update.position,
                        update.source,
                        update.origin
                    ),
                }
            }
        }
        changed
    }

    pub fn current(&self, source: &str) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| g.source == source)
            .and_then(|i| self.current[i])
    }

    /// Force a specific set of indices, then redraw.
    pub fn show(&mut self, indices: &[(String, usize)], surface: &mut impl Surface) {
        for (source, index) in indices {
            self.publish(source, *index as f64, PositionOrigin::Event);
        }
        self.drain();
        self.redraw(surface);
    }

    /// Make exactly one indicator per group active.
    ///
    /// Only differences from the last drawn frame are written, so calling
    /// this again with unchanged indices touches nothing.
    pub fn redraw(&mut self, surface: &mut impl Surface) {
        for (i, group) in self.groups.iter().enumerate() {
            let target = self.current[i];
            match self.applied[i] {
                Some(shown) if shown == target => continue,
                Some(shown) => {
                    if let Some(previous) = shown {
                        surface
                            .set_active(&group.indicator_id(previous), false)
                            .log_failure("clearing step indicator");
                    }
                }
                None => {
                    for index in 0..group.length {
                        if Some(index) != target {
                            surface
                                .set_active(&group.indicator_id(index), false)
                                .log_failure("clearing step indicator");
                        }
                    }
                }
            }
            if let Some(index) = target {
                surface
                    .set_active(&group.indicator_id(index), true)
                    .log_failure("setting step indicator");
            }
            self.applied[i] = Some(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{MemorySurface, SimDevice};

    fn tracker() -> PositionTracker {
        PositionTracker::new(vec![
            PositionGroup::new("step", 32, "step"),
            PositionGroup::new("step16", 16, "step16"),
        ])
    }

    #[test]
    fn test_one_indicator_per_group() {
        let mut tracker = tracker();
        let mut surface = MemorySurface::new();

        tracker.on_event("step", &[5.0]);
        tracker.on_event("step16", &[5.0]);
        assert!(tracker.drain());
        tracker.redraw(&mut surface);

        assert_eq!(surface.active_with_prefix("step-"), vec!["step-5".to_string()]);
        assert_eq!(surface.active_with_prefix("step16-"), vec!["step16-5".to_string()]);

        tracker.on_event("step", &[6.0]);
        tracker.drain();
        tracker.redraw(&mut surface);
        assert_eq!(surface.active_with_prefix("step-"), vec!["step-6".to_string()]);
    }

    #[test]
    fn test_redraw_is_idempotent() {
        let mut tracker = tracker();
        let mut surface = MemorySurface::new();
        let indices = vec![("step".to_string(), 3), ("step16".to_string(), 9)];

        tracker.show(&indices, &mut surface);
        let writes = surface.writes();
        let active = surface.active_with_prefix("step");

        tracker.show(&indices, &mut surface);
        assert_eq!(surface.writes(), writes);
        assert_eq!(surface.active_with_prefix("step"), active);
    }

    #[test]
    fn test_poll_and_event_paths_agree() {
        let device = SimDevice::with_parameters(&["step", "step16"]);
        device.set_silently("step", 33.0);

        let mut polled = tracker();
        polled.poll(&device);
        polled.drain();

        let mut pushed = tracker();
        pushed.on_event("step", &[33.0]);
        pushed.drain();

        assert_eq!(polled.current("step"), Some(1));
        assert_eq!(polled.current("step"), pushed.current("step"));
    }

    #[test]
    fn test_latest_update_wins_and_bad_values_ignored() {
        let mut tracker = tracker();
        tracker.on_event("step", &[2.0]);
        tracker.on_event("step", &[7.0]);
        tracker.on_event("step", &[f64::NAN]);
        tracker.on_event("step", &[-1.0]);
        tracker.drain();
        assert_eq!(tracker.current("step"), Some(7));

        assert!(!tracker.on_event("seq1", &[1.0]));
    }

    #[test_log::test]
    fn test_missing_indicator_is_not_fatal() {
        let mut tracker = PositionTracker::new(vec![PositionGroup::new("step", 8, "step")]);
        let mut surface = MemorySurface::with_elements(["step-0", "step-1", "step-2"]);

        tracker.on_event("step", &[6.0]);
        tracker.drain();
        tracker.redraw(&mut surface);

        assert!(surface.active_with_prefix("step-").is_empty());
        assert!(!surface.is_active("step-0"));
    }
}
