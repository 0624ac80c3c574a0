//! Generation cost accounting.
//!
//! Prices come from a fixed table keyed by model and resolution tier. A
//! chain is billed for every planned segment at its configured duration,
//! not the duration the provider reports back.
//!
//! # Example
//!
//! ```
//! use vchain_models::{segment_cost, Resolution, VideoModel};
//!
//! let quote = segment_cost(VideoModel::Sora2, Resolution::new(1280, 720), 8);
//! assert_eq!(quote.total, 0.80);
//! ```

use serde::{Deserialize, Serialize};

use crate::video::{Resolution, ResolutionTier, VideoModel};

/// Marker stored with every breakdown describing what was billed.
pub const BILLING_BASIS: &str = "configured_duration";

/// Price per second in USD.
fn price_per_second(model: VideoModel, tier: ResolutionTier) -> f64 {
    match (model, tier) {
        (VideoModel::Sora2, _) => 0.10,
        (VideoModel::Sora2Pro, ResolutionTier::Standard) => 0.30,
        (VideoModel::Sora2Pro, ResolutionTier::High) => 0.50,
    }
}

/// Round to a hundredth of a cent so sums stay stable.
fn round_money(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Price of one generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostQuote {
    pub price_per_second: f64,
    pub total: f64,
}

/// Quote a single segment.
pub fn segment_cost(model: VideoModel, resolution: Resolution, seconds: u32) -> CostQuote {
    let price = price_per_second(model, resolution.tier());
    CostQuote {
        price_per_second: price,
        total: round_money(price * seconds as f64),
    }
}

/// One billed segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLine {
    /// 1-based segment index
    pub segment: u32,
    /// Billed seconds (configured)
    pub seconds: u32,
    /// Seconds the provider actually returned, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_seconds: Option<f64>,
    pub cost: f64,
}

/// Serialized into a chain's `cost_details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub model: VideoModel,
    pub size: String,
    pub tier: ResolutionTier,
    pub price_per_second: f64,
    pub segments: Vec<CostLine>,
    pub total: f64,
    pub currency: String,
    pub billing_basis: String,
}

impl CostBreakdown {
    /// Record the provider-reported durations next to the billed ones.
    pub fn with_actual_durations(mut self, durations: &[f64]) -> Self {
        for (line, actual) in self.segments.iter_mut().zip(durations) {
            line.actual_seconds = Some(*actual);
        }
        self
    }

    /// Billed seconds minus reported seconds, summed across segments.
    pub fn duration_drift(&self) -> Option<f64> {
        let mut drift = 0.0;
        for line in &self.segments {
            drift += line.seconds as f64 - line.actual_seconds?;
        }
        Some(drift)
    }
}

/// Cost of a whole chain: one line per planned segment.
pub fn chain_cost(
    model: VideoModel,
    resolution: Resolution,
    seconds_per_segment: u32,
    num_segments: u32,
) -> CostBreakdown {
    let quote = segment_cost(model, resolution, seconds_per_segment);
    let segments: Vec<CostLine> = (1..=num_segments)
        .map(|segment| CostLine {
            segment,
            seconds: seconds_per_segment,
            actual_seconds: None,
            cost: quote.total,
        })
        .collect();
    let total = round_money(segments.iter().map(|l| l.cost).sum());

    CostBreakdown {
        model,
        size: resolution.to_size_string(),
        tier: resolution.tier(),
        price_per_second: quote.price_per_second,
        segments,
        total,
        currency: "USD".to_string(),
        billing_basis: BILLING_BASIS.to_string(),
    }
}
