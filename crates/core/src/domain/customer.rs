use serde::{Deserialize, Serialize};
use serde_json::Value;

/// CRM signals about the customer behind a quote. Every field is optional
/// because walk-in and first-time customers have no history yet. Values
/// arrive from CRM exports in whatever shape the export produced, so they
/// stay loosely typed until feature building coerces them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerProfile {
    #[serde(default)]
    pub satisfaction: Value,
    #[serde(default)]
    pub total_purchases: Value,
    #[serde(default)]
    pub interaction_channel: Value,
}
