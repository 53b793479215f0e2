//! Security band classification

use serde::{Deserialize, Serialize};

/// Security band of a star system, derived from its security status.
///
/// The 0.45 cutoff matches the in-game rounding rule: systems at 0.45+
/// display as 0.5 and are policed as high security.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SecurityBand {
    High,
    Low,
    Null,
}

impl SecurityBand {
    pub fn of(security: f64) -> Self {
        if security >= 0.45 {
            SecurityBand::High
        } else if security > 0.0 {
            SecurityBand::Low
        } else {
            SecurityBand::Null
        }
    }
}

impl std::fmt::Display for SecurityBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SecurityBand::High => "high",
            SecurityBand::Low => "low",
            SecurityBand::Null => "null",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_cutoffs() {
        assert_eq!(SecurityBand::of(0.9), SecurityBand::High);
        assert_eq!(SecurityBand::of(0.45), SecurityBand::High);
        assert_eq!(SecurityBand::of(0.4), SecurityBand::Low);
        assert_eq!(SecurityBand::of(0.1), SecurityBand::Low);
        assert_eq!(SecurityBand::of(0.0), SecurityBand::Null);
        assert_eq!(SecurityBand::of(-0.3), SecurityBand::Null);
    }
}
