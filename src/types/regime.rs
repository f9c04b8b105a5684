use serde::{Deserialize, Serialize};
use std::fmt;

/// Volatility regime, ordered by ascending fitted emission mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RegimeLabel {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl RegimeLabel {
    pub const ALL: [RegimeLabel; 3] = [RegimeLabel::Low, RegimeLabel::Medium, RegimeLabel::High];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeLabel::Low => "Low Volatility",
            RegimeLabel::Medium => "Medium Volatility",
            RegimeLabel::High => "High Volatility",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            RegimeLabel::Low => "#28a745",
            RegimeLabel::Medium => "#ffc107",
            RegimeLabel::High => "#dc3545",
        }
    }
}

impl fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
