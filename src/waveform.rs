// src/waveform.rs
//
// Waveform readout: a device data buffer reduced to one min/max column per
// pixel and drawn as vertical segments around the canvas midline.

use crate::device::Device;
use crate::surface::Canvas;

/// Extremes of the samples that fall into one pixel column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceColumn {
    pub min: f32,
    pub max: f32,
}

/// Reduce `samples` to `columns` min/max pairs.
///
/// Columns that receive no samples (buffer shorter than the canvas) repeat
/// the nearest sample so the trace has no gaps.
pub fn min_max_trace(samples: &[f32], columns: usize) -> Vec<TraceColumn> {
    if samples.is_empty() || columns == 0 {
        return Vec::new();
    }

    let len = samples.len();
    (0..columns)
        .map(|column| {
            let start = column_bound(column, columns, len);
            let end = column_bound(column + 1, columns, len).clamp(start + 1, len);
            samples[start..end]
                .iter()
                .filter(|s| s.is_finite())
                .fold(None, |acc: Option<TraceColumn>, &s| {
                    Some(match acc {
                        Some(c) => TraceColumn {
                            min: c.min.min(s),
                            max: c.max.max(s),
                        },
                        None => TraceColumn { min: s, max: s },
                    })
                })
                .unwrap_or(TraceColumn { min: 0.0, max: 0.0 })
        })
        .collect()
}

/// First sample index of `column`. Never exceeds `len`.
fn column_bound(column: usize, columns: usize, len: usize) -> usize {
    (column as u128 * len as u128 / columns as u128) as usize
}

/// Draw a trace onto a canvas. Samples are expected in -1..1.
pub fn rasterize(trace: &[TraceColumn], canvas: &mut impl Canvas) {
    let (width, height) = canvas.size();
    canvas.clear();
    if width == 0 || height == 0 {
        canvas.finish();
        return;
    }

    let mid = height as f64 / 2.0;
    let to_y = |sample: f32| mid - sample.clamp(-1.0, 1.0) as f64 * mid;

    for (x, column) in trace.iter().take(width as usize).enumerate() {
        let top = to_y(column.max);
        // A flat column still needs one pixel to be visible.
        let bottom = to_y(column.min).max(top + 1.0);
        canvas.vertical_line(x as f64 + 0.5, top, bottom);
    }
    canvas.finish();
}

/// Periodically redraws a named device buffer.
#[derive(Debug, Clone)]
pub struct WaveformView {
    buffer: String,
    missing: bool,
}

impl WaveformView {
    pub fn new(buffer: impl Into<String>) -> Self {
        Self {
            buffer: buffer.into(),
            missing: false,
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Re-read the buffer and redraw. Returns whether anything was drawn.
    ///
    /// A missing buffer is logged once per absence and otherwise ignored.
    pub fn refresh<D: Device>(&mut self, device: &D, canvas: &mut impl Canvas) -> bool {
        let Some(samples) = device.data_buffer(&self.buffer) else {
            if !self.missing {
                log::warn!("data buffer '{}' not available, waveform paused", self.buffer);
                self.missing = true;
            }
            return false;
        };
        if self.missing {
            log::info!("data buffer '{}' available again", self.buffer);
            self.missing = false;
        }

        let (width, _) = canvas.size();
        let trace = min_max_trace(&samples, width as usize);
        rasterize(&trace, canvas);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{MemoryCanvas, SimDevice};

    #[test]
    fn test_column_bounds_do_not_overflow() {
        let len = usize::MAX / 2;
        assert_eq!(column_bound(0, 4, len), 0);
        assert_eq!(column_bound(4, 4, len), len);
        let last = column_bound(3, 4, len);
        assert!(last > column_bound(2, 4, len) && last < len);

        assert_eq!(column_bound(1_999, 2_000, 3_000_000), 2_998_500);
    }

    #[test]
    fn test_min_max_per_column() {
        let samples = [0.1, -0.5, 0.9, 0.2, -0.1, -0.3, 0.0, 0.4];
        let trace = min_max_trace(&samples, 4);
        assert_eq!(trace.len(), 4);
        assert_eq!(trace[0], TraceColumn { min: -0.5, max: 0.1 });
        assert_eq!(trace[1], TraceColumn { min: 0.2, max: 0.9 });
        assert_eq!(trace[3], TraceColumn { min: 0.0, max: 0.4 });
    }

    #[test]
    fn test_short_buffer_fills_every_column() {
        let trace = min_max_trace(&[0.5, -0.5], 5);
        assert_eq!(trace.len(), 5);
        assert!(trace.iter().all(|c| c.min == c.max));
        assert!(min_max_trace(&[], 5).is_empty());
    }

    #[test]
    fn test_rasterize_stays_on_canvas() {
        let mut canvas = MemoryCanvas::new(4, 100);
        let trace = [
            TraceColumn { min: -2.0, max: 2.0 },
            TraceColumn { min: 0.0, max: 0.0 },
        ];
        rasterize(&trace, &mut canvas);

        assert_eq!(canvas.segments.len(), 2);
        assert_eq!(canvas.segments[0], (0.5, 0.0, 100.0));
        assert_eq!(canvas.segments[1], (1.5, 50.0, 51.0));
        assert_eq!(canvas.frames, 1);
    }

    #[test_log::test]
    fn test_missing_buffer_is_not_fatal() {
        let device = SimDevice::with_parameters(&[]);
        let mut canvas = MemoryCanvas::new(8, 8);
        let mut view = WaveformView::new("waveform");

        assert!(!view.refresh(&device, &mut canvas));
        assert!(!view.refresh(&device, &mut canvas));
        assert_eq!(canvas.frames, 0);

        device.load_buffer("waveform", vec![0.0; 64]);
        assert!(view.refresh(&device, &mut canvas));
        assert_eq!(canvas.segments.len(), 8);
    }
}
