//! Resolution ladder and bitrate bands.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Video quality tier, ordered low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityTier {
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
}

/// Inclusive bitrate band in kbps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitrateBand {
    pub min_kbps: u32,
    pub max_kbps: u32,
}

impl QualityTier {
    pub const LADDER: [QualityTier; 4] = [
        QualityTier::P360,
        QualityTier::P480,
        QualityTier::P720,
        QualityTier::P1080,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            QualityTier::P360 => "360p",
            QualityTier::P480 => "480p",
            QualityTier::P720 => "720p",
            QualityTier::P1080 => "1080p",
        }
    }

    #[must_use]
    pub const fn band(&self) -> BitrateBand {
        match self {
            QualityTier::P360 => BitrateBand {
                min_kbps: 300,
                max_kbps: 800,
            },
            QualityTier::P480 => BitrateBand {
                min_kbps: 500,
                max_kbps: 1200,
            },
            QualityTier::P720 => BitrateBand {
                min_kbps: 1000,
                max_kbps: 2500,
            },
            QualityTier::P1080 => BitrateBand {
                min_kbps: 2500,
                max_kbps: 5000,
            },
        }
    }

    /// Next tier up, `None` at the top of the ladder.
    #[must_use]
    pub const fn up(&self) -> Option<QualityTier> {
        match self {
            QualityTier::P360 => Some(QualityTier::P480),
            QualityTier::P480 => Some(QualityTier::P720),
            QualityTier::P720 => Some(QualityTier::P1080),
            QualityTier::P1080 => None,
        }
    }

    /// Next tier down, `None` at the bottom of the ladder.
    #[must_use]
    pub const fn down(&self) -> Option<QualityTier> {
        match self {
            QualityTier::P360 => None,
            QualityTier::P480 => Some(QualityTier::P360),
            QualityTier::P720 => Some(QualityTier::P480),
            QualityTier::P1080 => Some(QualityTier::P720),
        }
    }

    /// Band maximum clamped into the session's `[min, max]`.
    #[must_use]
    pub fn target_bitrate(&self, min_kbps: u32, max_kbps: u32) -> u32 {
        if min_kbps > max_kbps {
            return self.band().max_kbps;
        }
        self.band().max_kbps.clamp(min_kbps, max_kbps)
    }

    /// Highest tier whose band overlaps `[min, max]`, falling back to 360p.
    #[must_use]
    pub fn highest_within(min_kbps: u32, max_kbps: u32) -> QualityTier {
        Self::LADDER
            .iter()
            .rev()
            .find(|tier| tier.band().min_kbps <= max_kbps && tier.band().max_kbps >= min_kbps)
            .copied()
            .unwrap_or(QualityTier::P360)
    }

    /// Clamp a requested tier to what the session's bitrate bounds allow.
    #[must_use]
    pub fn clamp_to(self, min_kbps: u32, max_kbps: u32) -> QualityTier {
        self.min(Self::highest_within(min_kbps, max_kbps))
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "360p" => Ok(QualityTier::P360),
            "480p" => Ok(QualityTier::P480),
            "720p" => Ok(QualityTier::P720),
            "1080p" => Ok(QualityTier::P1080),
            other => Err(format!("unknown quality tier '{other}'")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ladder_order() {
        assert!(QualityTier::P360 < QualityTier::P480);
        assert!(QualityTier::P720 < QualityTier::P1080);
        assert_eq!(QualityTier::P1080.up(), None);
        assert_eq!(QualityTier::P360.down(), None);
        assert_eq!(QualityTier::P720.down(), Some(QualityTier::P480));
    }

    #[test]
    fn test_target_bitrate_clamped() {
        assert_eq!(QualityTier::P720.target_bitrate(300, 5000), 2500);
        assert_eq!(QualityTier::P1080.target_bitrate(300, 3000), 3000);
        assert_eq!(QualityTier::P360.target_bitrate(1000, 5000), 1000);
    }

    #[test]
    fn test_clamp_to_session_bounds() {
        assert_eq!(QualityTier::P1080.clamp_to(300, 1100), QualityTier::P720);
        assert_eq!(QualityTier::P1080.clamp_to(300, 600), QualityTier::P480);
        assert_eq!(QualityTier::P480.clamp_to(300, 5000), QualityTier::P480);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&QualityTier::P1080).unwrap(),
            "\"1080p\""
        );
        let tier: QualityTier = serde_json::from_str("\"360p\"").unwrap();
        assert_eq!(tier, QualityTier::P360);
        assert_eq!("720P".parse::<QualityTier>().unwrap(), QualityTier::P720);
        assert!("4k".parse::<QualityTier>().is_err());
    }
}
