//! Image transformation parameters and their constraints.
//!
//! [`ParameterModel`] is the only writer of [`ImageParameters`]. It keeps
//! width and height tied to the stored aspect ratio while the lock is on,
//! clamps dimensions to the configured limits, and publishes each new
//! snapshot on a `watch` channel. It performs no I/O: every mutator returns a
//! [`ParamChange`] and the owning session decides what to do with it.

use crate::api::AutoAdjustment;
use crate::config::{ClientConfig, ResizeMode};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::trace;

/// Snapshot of the current image parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageParameters {
    pub width: u32,
    pub height: u32,
    /// JPEG quality, 1..=100.
    pub quality: u8,
    /// Resize mode chosen by the user. Only honoured while unlocked.
    pub mode: ResizeMode,
    /// Target output size in KB for the deviation readout and auto-adjust.
    pub target_kb: u32,
    pub aspect_locked: bool,
    /// `width / height` captured at load or by the last locked preset.
    pub aspect_ratio: f64,
}

impl ImageParameters {
    /// The mode actually sent to the server: with the lock on the box already
    /// has the image's proportions, so the mode does not apply.
    pub fn effective_mode(&self) -> ResizeMode {
        if self.aspect_locked {
            ResizeMode::Stretch
        } else {
            self.mode
        }
    }
}

/// What a parameter change means for the preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamChange {
    /// Continuous edit: schedule a debounced preview.
    Debounced,
    /// Discrete action: refresh the preview now.
    Immediate,
    /// Only the statistics readout changes; no new preview is needed.
    StatsOnly,
}

/// Owner of [`ImageParameters`].
#[derive(Debug)]
pub struct ParameterModel {
    params: ImageParameters,
    min_dimension: u32,
    max_dimension: u32,
    tx: watch::Sender<ImageParameters>,
}

impl ParameterModel {
    pub fn new(config: &ClientConfig) -> Self {
        let params = ImageParameters {
            width: config.min_dimension,
            height: config.min_dimension,
            quality: config.default_quality,
            mode: ResizeMode::default(),
            target_kb: config.default_target_kb,
            aspect_locked: true,
            aspect_ratio: 1.0,
        };
        let (tx, _) = watch::channel(params.clone());
        Self {
            params,
            min_dimension: config.min_dimension,
            max_dimension: config.max_dimension,
            tx,
        }
    }

    pub fn get(&self) -> &ImageParameters {
        &self.params
    }

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ImageParameters> {
        self.tx.subscribe()
    }

    /// Reset to a freshly loaded image of `width` x `height`.
    ///
    /// Captures the image's own aspect ratio and re-enables the lock, so an
    /// image larger than the limits loads scaled down rather than distorted.
    /// Quality, mode and target survive a reload.
    pub fn load(&mut self, width: u32, height: u32) -> ParamChange {
        self.params.aspect_ratio = ratio(width, height);
        self.params.aspect_locked = true;
        self.fit_width(width as f64);
        self.publish();
        ParamChange::Immediate
    }

    pub fn set_width(&mut self, width: u32) -> ParamChange {
        if self.params.aspect_locked {
            self.fit_width(width as f64);
        } else {
            self.params.width = self.clamp(width as f64);
        }
        self.publish();
        ParamChange::Debounced
    }

    pub fn set_height(&mut self, height: u32) -> ParamChange {
        if self.params.aspect_locked {
            let (h, w) = self.locked_pair(height as f64, self.params.aspect_ratio);
            self.params.height = h;
            self.params.width = w;
        } else {
            self.params.height = self.clamp(height as f64);
        }
        self.publish();
        ParamChange::Debounced
    }

    /// Turning the lock on snaps the height back onto the stored ratio.
    /// Turning it off leaves both dimensions alone.
    pub fn set_aspect_locked(&mut self, locked: bool) -> ParamChange {
        self.params.aspect_locked = locked;
        if locked {
            self.fit_width(self.params.width as f64);
        }
        self.publish();
        ParamChange::Debounced
    }

    /// Set width, height and quality in one step.
    ///
    /// While locked the preset's proportions become the new ratio.
    pub fn apply_preset(&mut self, width: u32, height: u32, quality: u8) -> ParamChange {
        self.params.quality = quality.clamp(1, 100);
        if self.params.aspect_locked {
            self.params.aspect_ratio = ratio(width, height);
            self.fit_width(width as f64);
        } else {
            self.params.width = self.clamp(width as f64);
            self.params.height = self.clamp(height as f64);
        }
        self.publish();
        ParamChange::Immediate
    }

    pub fn set_quality(&mut self, quality: u8) -> ParamChange {
        self.params.quality = quality.clamp(1, 100);
        self.publish();
        ParamChange::Debounced
    }

    pub fn set_mode(&mut self, mode: ResizeMode) -> ParamChange {
        self.params.mode = mode;
        self.publish();
        ParamChange::Debounced
    }

    pub fn set_target_kb(&mut self, target_kb: u32) -> ParamChange {
        self.params.target_kb = target_kb.max(1);
        self.publish();
        ParamChange::StatsOnly
    }

    /// Apply the server's suggestion for hitting the target size.
    ///
    /// Quality is always taken. Dimensions are only taken when the server
    /// had to scale down (`scale < 1`).
    pub fn apply_auto_adjust(&mut self, adjustment: &AutoAdjustment) -> ParamChange {
        self.params.quality = adjustment.quality.clamp(1, 100);
        if adjustment.scale < 1.0 {
            self.params.width = self.clamp(adjustment.width as f64);
            self.params.height = self.clamp(adjustment.height as f64);
        }
        self.publish();
        ParamChange::Immediate
    }

    fn fit_width(&mut self, width: f64) {
        let (w, h) = self.locked_pair(width, 1.0 / self.params.aspect_ratio);
        self.params.width = w;
        self.params.height = h;
    }

    /// Resolve a driving dimension and its derived partner (`driving * factor`)
    /// so that both land inside the limits. The driving side is clamped first
    /// to the range that keeps the derived side in bounds.
    fn locked_pair(&self, driving: f64, factor: f64) -> (u32, u32) {
        let (min, max) = (self.min_dimension as f64, self.max_dimension as f64);
        let lo = min.max(min / factor).ceil();
        let hi = max.min(max / factor).floor();
        if !factor.is_finite() || factor <= 0.0 || lo > hi {
            // No size satisfies both limits at this ratio.
            let d = self.clamp(driving);
            return (d, self.clamp(d as f64 * factor));
        }
        let rounded = driving.round();
        let d = if rounded.is_finite() { rounded.clamp(lo, hi) } else { hi };
        (d as u32, self.clamp(d * factor))
    }

    fn clamp(&self, value: f64) -> u32 {
        // f64::round rounds half away from zero.
        let rounded = value.round();
        if !rounded.is_finite() {
            return self.max_dimension;
        }
        rounded.clamp(self.min_dimension as f64, self.max_dimension as f64) as u32
    }

    fn publish(&self) {
        trace!(
            "params {}x{} q{} locked={}",
            self.params.width,
            self.params.height,
            self.params.quality,
            self.params.aspect_locked
        );
        self.tx.send_replace(self.params.clone());
    }
}

fn ratio(width: u32, height: u32) -> f64 {
    width as f64 / height.max(1) as f64
}
