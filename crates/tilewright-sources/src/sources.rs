use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{SourceExtent, SourceId};

/// Configuration for a synthetic tile source.
///
/// Synthetic sources generate their imagery locally. They stand in for fetching
/// and warping real imagery when load testing the rendering core, and behave like
/// slow remote sources thanks to their configurable latency.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Alternating squares of two colors.
    Checkerboard(Arc<CheckerboardSourceConfig>),
    /// A single flat color.
    Solid(Arc<SolidSourceConfig>),
    /// A source whose every tile fails to produce.
    Failing(Arc<FailingSourceConfig>),
}

impl SourceConfig {
    /// The unique identifier of this source.
    pub fn id(&self) -> &SourceId {
        match self {
            Self::Checkerboard(x) => &x.id,
            Self::Solid(x) => &x.id,
            Self::Failing(x) => &x.id,
        }
    }

    /// Name of this source type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Checkerboard(..) => "checkerboard",
            Self::Solid(..) => "solid",
            Self::Failing(..) => "failing",
        }
    }

    /// Parameters common to all source types.
    pub fn common(&self) -> &CommonSourceConfig {
        match self {
            Self::Checkerboard(x) => &x.common,
            Self::Solid(x) => &x.common,
            Self::Failing(x) => &x.common,
        }
    }
}

/// Parameters shared by every synthetic source.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CommonSourceConfig {
    /// The region and zoom range the source has imagery for.
    pub extent: SourceExtent,

    /// Simulated production time per tile.
    #[serde(with = "humantime_serde")]
    pub latency: Duration,

    /// Edge length of the produced tiles, in pixels.
    pub tile_size: u32,

    /// Attribution text to display alongside the imagery.
    pub credit: Option<String>,

    /// Identifies the transformation chain applied to the imagery.
    ///
    /// Changing it yields different computation keys for otherwise identical tiles.
    pub transform: String,
}

impl Default for CommonSourceConfig {
    fn default() -> Self {
        Self {
            extent: SourceExtent::WORLD,
            latency: Duration::from_millis(5),
            tile_size: 256,
            credit: None,
            transform: "identity".into(),
        }
    }
}

/// Configuration for a checkerboard source.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CheckerboardSourceConfig {
    /// Unique source identifier.
    pub id: SourceId,

    /// Size of a single checkerboard square, in pixels.
    #[serde(default = "default_square_size")]
    pub square_size: u32,

    /// The two alternating RGBA colors.
    #[serde(default = "default_checker_colors")]
    pub colors: [[u8; 4]; 2],

    /// Common parameters.
    #[serde(flatten)]
    pub common: CommonSourceConfig,
}

fn default_square_size() -> u32 {
    32
}

fn default_checker_colors() -> [[u8; 4]; 2] {
    [[255, 255, 255, 255], [64, 64, 64, 255]]
}

/// Configuration for a flat colored source.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SolidSourceConfig {
    /// Unique source identifier.
    pub id: SourceId,

    /// The RGBA fill color.
    pub color: [u8; 4],

    /// Common parameters.
    #[serde(flatten)]
    pub common: CommonSourceConfig,
}

/// Configuration for a source that always fails.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FailingSourceConfig {
    /// Unique source identifier.
    pub id: SourceId,

    /// The stage at which production fails.
    #[serde(default)]
    pub stage: FailureStage,

    /// Details attached to the failure.
    #[serde(default)]
    pub message: String,

    /// Common parameters.
    #[serde(flatten)]
    pub common: CommonSourceConfig,
}

/// The production stage a synthetic failure is attributed to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    /// Fetching the source imagery.
    #[default]
    Fetch,
    /// Decoding the fetched imagery.
    Decode,
    /// Warping or cropping the decoded imagery.
    Transform,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sources() {
        let yaml = r#"
            - type: checkerboard
              id: base
              latency: 20ms
              credit: "Synthetic imagery"
            - type: solid
              id: overlay
              color: [255, 0, 0, 128]
              extent:
                max_zoom: 8
                right: 0.5
            - type: failing
              id: broken
              stage: decode
              message: truncated jpeg
        "#;
        let sources: Vec<SourceConfig> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(sources.len(), 3);

        let SourceConfig::Checkerboard(ref base) = sources[0] else {
            panic!("expected a checkerboard source");
        };
        assert_eq!(base.id, SourceId::new("base"));
        assert_eq!(base.square_size, 32);
        assert_eq!(base.common.latency, Duration::from_millis(20));
        assert_eq!(base.common.credit.as_deref(), Some("Synthetic imagery"));
        assert_eq!(base.common.tile_size, 256);

        assert_eq!(sources[1].type_name(), "solid");
        assert_eq!(sources[1].common().extent.max_zoom, 8);
        assert_eq!(sources[1].common().extent.right, 0.5);

        let SourceConfig::Failing(ref broken) = sources[2] else {
            panic!("expected a failing source");
        };
        assert_eq!(broken.stage, FailureStage::Decode);
        assert_eq!(sources[2].id().as_str(), "broken");
    }
}
