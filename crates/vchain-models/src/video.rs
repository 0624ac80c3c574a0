//! Generation models and output resolutions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported video generation models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum VideoModel {
    #[default]
    #[serde(rename = "sora-2")]
    Sora2,
    #[serde(rename = "sora-2-pro")]
    Sora2Pro,
}

impl VideoModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoModel::Sora2 => "sora-2",
            VideoModel::Sora2Pro => "sora-2-pro",
        }
    }
}

impl fmt::Display for VideoModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VideoModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sora-2" => Ok(VideoModel::Sora2),
            "sora-2-pro" => Ok(VideoModel::Sora2Pro),
            other => Err(format!("unknown video model: {}", other)),
        }
    }
}

/// Pricing tier a resolution falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTier {
    /// 720p-class output (720x1280, 1280x720)
    Standard,
    /// HD-class output (1024x1792, 1792x1024)
    High,
}

impl ResolutionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionTier::Standard => "standard",
            ResolutionTier::High => "high",
        }
    }
}

/// Output frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bucket this resolution into a pricing tier.
    ///
    /// Unrecognized sizes fall back to the standard tier.
    pub fn tier(&self) -> ResolutionTier {
        match (self.width, self.height) {
            (1024, 1792) | (1792, 1024) => ResolutionTier::High,
            _ => ResolutionTier::Standard,
        }
    }

    /// Format as the `WxH` string the generation API expects.
    pub fn to_size_string(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("size must look like WxH, got '{}'", s))?;
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| format!("invalid width in size '{}'", s))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| format!("invalid height in size '{}'", s))?;
        if width == 0 || height == 0 {
            return Err(format!("size must be non-zero, got '{}'", s));
        }
        Ok(Self { width, height })
    }
}
