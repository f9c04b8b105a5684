use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete recommendation emitted by the signal engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalKind {
    RiskOn,
    Neutral,
    Alert,
    RiskOff,
    StrongRiskOff,
    Watch,
}

impl SignalKind {
    pub const ALL: [SignalKind; 6] = [
        SignalKind::RiskOn,
        SignalKind::Neutral,
        SignalKind::Alert,
        SignalKind::RiskOff,
        SignalKind::StrongRiskOff,
        SignalKind::Watch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::RiskOn => "RISK_ON",
            SignalKind::Neutral => "NEUTRAL",
            SignalKind::Alert => "ALERT",
            SignalKind::RiskOff => "RISK_OFF",
            SignalKind::StrongRiskOff => "STRONG_RISK_OFF",
            SignalKind::Watch => "WATCH",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_names_match_display() {
        for kind in SignalKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
        let parsed: SignalKind = serde_json::from_str("\"STRONG_RISK_OFF\"").unwrap();
        assert_eq!(parsed, SignalKind::StrongRiskOff);
    }
}
