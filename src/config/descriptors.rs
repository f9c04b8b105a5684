use serde::{Deserialize, Serialize};

use crate::types::SignalKind;

/// Presentation metadata attached to a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDescriptor {
    pub signal: SignalKind,
    pub icon: String,
    pub color: String,
    pub action: String,
}

impl SignalDescriptor {
    fn new(signal: SignalKind, icon: &str, color: &str, action: &str) -> Self {
        Self {
            signal,
            icon: icon.to_string(),
            color: color.to_string(),
            action: action.to_string(),
        }
    }
}

/// Static lookup table from signal to descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalDescriptors(pub Vec<SignalDescriptor>);

impl SignalDescriptors {
    /// Falls back to the NEUTRAL entry when `signal` has no descriptor.
    pub fn lookup(&self, signal: SignalKind) -> SignalDescriptor {
        self.find(signal)
            .or_else(|| self.find(SignalKind::Neutral))
            .cloned()
            .unwrap_or_else(neutral_descriptor)
    }

    fn find(&self, signal: SignalKind) -> Option<&SignalDescriptor> {
        self.0.iter().find(|d| d.signal == signal)
    }
}

fn neutral_descriptor() -> SignalDescriptor {
    SignalDescriptor::new(SignalKind::Neutral, "🟡", "#ffc107", "Standard allocation")
}

impl Default for SignalDescriptors {
    fn default() -> Self {
        Self(vec![
            SignalDescriptor::new(
                SignalKind::StrongRiskOff,
                "🔴🔴",
                "#8b0000",
                "Aggressive hedge (long VIX futures / put spread)",
            ),
            SignalDescriptor::new(
                SignalKind::RiskOff,
                "🔴",
                "#dc3545",
                "Reduce exposure, tactical hedging",
            ),
            SignalDescriptor::new(
                SignalKind::Alert,
                "🟠",
                "#fd7e14",
                "Monitor, prepare hedge orders",
            ),
            neutral_descriptor(),
            SignalDescriptor::new(
                SignalKind::RiskOn,
                "🟢",
                "#28a745",
                "Full exposure, directional strategies",
            ),
            SignalDescriptor::new(
                SignalKind::Watch,
                "⚠️",
                "#6c757d",
                "Unstable regime, caution",
            ),
        ])
    }
}
