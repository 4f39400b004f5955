use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::customer::CustomerProfile;
use crate::domain::quote::{Channel, PricingRequest, RequestItem, ServiceType, Timeframe};

pub const DEFAULT_CUSTOMER_SATISFACTION: f64 = 3.0;
pub const BUCKET_KEY_DELIMITER: char = '|';
pub const NUMERIC_VECTOR_WIDTH: usize = 4;

/// Canonical record consumed by every residual estimator.
///
/// Built only through [`ResidualFeatures::from_request`] (or the offline
/// builder), which guarantees `line_count >= 1` and finite, non-negative
/// numeric fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResidualFeatures {
    pub service_type: ServiceType,
    pub timeframe: Timeframe,
    pub channel: Channel,
    pub postcode_area: String,
    pub customer_interaction_channel: String,
    pub qty_sum: f64,
    pub line_count: u32,
    pub customer_satisfaction: f64,
    pub customer_total_purchases: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey(pub String);

impl BucketKey {
    pub fn new(
        service_type: &ServiceType,
        timeframe: &Timeframe,
        channel: &Channel,
        postcode_area: &str,
    ) -> Self {
        Self(format!(
            "{}{d}{}{d}{}{d}{}",
            service_type.as_str(),
            timeframe.as_str(),
            channel.as_str(),
            postcode_area,
            d = BUCKET_KEY_DELIMITER
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ResidualFeatures {
    /// Coerce a raw pricing request into a feature record. Total: bad or
    /// missing values fall back to documented defaults instead of failing.
    pub fn from_request(request: &PricingRequest) -> Self {
        let customer = request.customer.clone().unwrap_or_default();

        Self {
            service_type: request.service_type.clone(),
            timeframe: request.timeframe.clone(),
            channel: request.channel.clone(),
            postcode_area: postcode_area(request.site_postcode.as_deref().unwrap_or("")),
            customer_interaction_channel: interaction_channel(&customer),
            qty_sum: quantity_sum(&request.items),
            line_count: line_count(request.items.len()),
            customer_satisfaction: satisfaction(&customer),
            customer_total_purchases: total_purchases(&customer),
        }
    }

    pub fn bucket_key(&self) -> BucketKey {
        BucketKey::new(&self.service_type, &self.timeframe, &self.channel, &self.postcode_area)
    }

    /// Fixed-order numeric vector for single-input legacy models.
    pub fn numeric_vector(&self) -> Vec<f32> {
        vec![
            self.qty_sum as f32,
            self.line_count as f32,
            self.customer_satisfaction as f32,
            self.customer_total_purchases as f32,
        ]
    }
}

/// Trim, uppercase, then take the outward code when the postcode is spaced,
/// otherwise its first three characters.
pub fn postcode_area(raw: &str) -> String {
    let normalized = raw.trim().to_uppercase();
    if normalized.is_empty() {
        return String::new();
    }

    if normalized.contains(char::is_whitespace) {
        return normalized.split_whitespace().next().unwrap_or_default().to_string();
    }

    normalized.chars().take(3).collect()
}

pub fn line_count(item_count: usize) -> u32 {
    u32::try_from(item_count).unwrap_or(u32::MAX).max(1)
}

/// Numbers and numeric strings; anything else is not a number.
fn coerce_number(value: &serde_json::Value) -> Option<f64> {
    let parsed = match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|number| number.is_finite())
}

pub fn coerce_quantity(value: &serde_json::Value) -> f64 {
    match coerce_number(value) {
        Some(quantity) if quantity > 0.0 => quantity,
        _ => 0.0,
    }
}

fn quantity_sum(items: &[RequestItem]) -> f64 {
    items.iter().map(|item| coerce_quantity(&item.quantity)).sum()
}

pub(crate) fn satisfaction(customer: &CustomerProfile) -> f64 {
    coerce_number(&customer.satisfaction)
        .map(|value| value.clamp(0.0, 5.0))
        .unwrap_or(DEFAULT_CUSTOMER_SATISFACTION)
}

/// Fractional counts are truncated; negative counts read as zero.
pub(crate) fn total_purchases(customer: &CustomerProfile) -> u64 {
    coerce_number(&customer.total_purchases).map(|value| value.max(0.0) as u64).unwrap_or(0)
}

pub(crate) fn interaction_channel(customer: &CustomerProfile) -> String {
    match &customer.interaction_channel {
        serde_json::Value::String(channel) => channel.trim().to_string(),
        serde_json::Value::Number(number) => number.to_string(),
        _ => String::new(),
    }
}
