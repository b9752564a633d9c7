//! Display statistics for previews and finished tasks.
//!
//! Everything here is a pure function of its inputs.

use crate::api::{PreviewResponse, ResultSummary, SizeField};
use crate::params::ImageParameters;
use crate::progress::DoneSummary;
use serde::Serialize;
use std::fmt;

/// Human-readable byte count: `"1.53 MB"`, `"12.0 KB"`, `"512 B"`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.2} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

// ── Preview ──────────────────────────────────────────────────────────────

/// Whether the estimated output fits the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetStatus {
    Ok,
    Over,
}

/// Signed distance between the estimated size and the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetDeviation {
    /// `estimated - target` in bytes.
    pub delta_bytes: i64,
    pub status: TargetStatus,
    /// e.g. `"400.0 KB over"`.
    pub label: String,
}

/// Compare an estimated size against a target given in KB.
pub fn target_deviation(estimated_bytes: u64, target_kb: u32) -> TargetDeviation {
    let target_bytes = target_kb as i64 * 1024;
    let delta = estimated_bytes as i64 - target_bytes;
    let magnitude = format_bytes(delta.unsigned_abs());
    let (status, word) = if delta > 0 {
        (TargetStatus::Over, "over")
    } else {
        (TargetStatus::Ok, "under")
    };
    TargetDeviation {
        delta_bytes: delta,
        status,
        label: format!("{magnitude} {word}"),
    }
}

/// Readout for the current preview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewStats {
    pub estimated_bytes: u64,
    /// Dimensions the server actually applied.
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub deviation: TargetDeviation,
}

impl PreviewStats {
    pub fn size_label(&self) -> String {
        format_bytes(self.estimated_bytes)
    }

    pub fn dimensions_label(&self) -> String {
        format!("{} x {} px", self.width, self.height)
    }
}

/// Build the preview readout. Dimensions missing from the response headers
/// fall back to the requested ones.
pub fn preview_stats(response: &PreviewResponse, params: &ImageParameters) -> PreviewStats {
    PreviewStats {
        estimated_bytes: response.estimated_bytes,
        width: response.width.unwrap_or(params.width),
        height: response.height.unwrap_or(params.height),
        quality: params.quality,
        deviation: target_deviation(response.estimated_bytes, params.target_kb),
    }
}

// ── Completed tasks ──────────────────────────────────────────────────────

/// How the output size compares to the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeCategory {
    Improvement,
    NoChange,
    Regression,
}

/// `round((input - output) / input * 100)`; `0` for an empty input.
pub fn reduction_percent(input_bytes: u64, output_bytes: u64) -> i64 {
    if input_bytes == 0 {
        return 0;
    }
    let diff = input_bytes as f64 - output_bytes as f64;
    (diff / input_bytes as f64 * 100.0).round() as i64
}

pub fn classify(reduction: i64) -> ChangeCategory {
    match reduction {
        r if r > 0 => ChangeCategory::Improvement,
        0 => ChangeCategory::NoChange,
        _ => ChangeCategory::Regression,
    }
}

/// Final statistics for a finished conversion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionStats {
    pub input_label: String,
    pub output_label: String,
    pub reduction: i64,
    pub category: ChangeCategory,
}

impl CompletionStats {
    pub fn change_label(&self) -> String {
        match self.category {
            ChangeCategory::Improvement => format!("{}% smaller", self.reduction),
            ChangeCategory::Regression => format!("{}% larger", -self.reduction),
            ChangeCategory::NoChange => "No change".to_string(),
        }
    }
}

impl fmt::Display for CompletionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({})",
            self.input_label,
            self.output_label,
            self.change_label()
        )
    }
}

pub fn completion_from_sizes(input_bytes: u64, output_bytes: u64) -> CompletionStats {
    let reduction = reduction_percent(input_bytes, output_bytes);
    CompletionStats {
        input_label: format_bytes(input_bytes),
        output_label: format_bytes(output_bytes),
        reduction,
        category: classify(reduction),
    }
}

/// Statistics from a result summary.
///
/// Byte counts are preferred. When the server sent preformatted labels the
/// server's own `reduction` is used instead, rounded to a whole percent.
pub fn completion_stats(summary: &ResultSummary) -> CompletionStats {
    match (&summary.input_size, &summary.output_size) {
        (SizeField::Bytes(input), SizeField::Bytes(output)) => {
            completion_from_sizes(*input, *output)
        }
        (input, output) => {
            let reduction = summary.reduction.map(|r| r.round() as i64).unwrap_or(0);
            CompletionStats {
                input_label: size_label(input),
                output_label: size_label(output),
                reduction,
                category: classify(reduction),
            }
        }
    }
}

fn size_label(field: &SizeField) -> String {
    match field {
        SizeField::Bytes(b) => format_bytes(*b),
        SizeField::Formatted(s) => s.clone(),
    }
}

/// Size readout for a GIF result: `"{size_mb} MB"`, or the artifact length
/// when the done event carried no size.
pub fn gif_size_label(done: Option<&DoneSummary>, artifact_len: Option<usize>) -> Option<String> {
    if let Some(mb) = done.and_then(|d| d.size_mb) {
        return Some(format!("{mb} MB"));
    }
    artifact_len.map(|len| format_bytes(len as u64))
}
