use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::customer::CustomerProfile;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServiceType {
    SupplyOnly,
    SupplyAndInstall,
    Other(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Timeframe {
    Asap,
    ThreeToSixMonths,
    SixToTwelveMonths,
    /// Finer-grained caller timeframes are kept verbatim so they bucket on their own.
    Other(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Channel {
    Website,
    Phone,
    Whatsapp,
    Referral,
    Social,
    Showroom,
    Email,
    Other(String),
}

impl ServiceType {
    pub fn parse(raw: &str) -> Self {
        match normalize_token(raw).as_str() {
            "supply_only" => Self::SupplyOnly,
            "supply_and_install" => Self::SupplyAndInstall,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::SupplyOnly => "supply_only",
            Self::SupplyAndInstall => "supply_and_install",
            Self::Other(value) => value,
        }
    }
}

impl Timeframe {
    pub fn parse(raw: &str) -> Self {
        match normalize_token(raw).as_str() {
            "asap" => Self::Asap,
            "3_6_months" => Self::ThreeToSixMonths,
            "6_12_months" => Self::SixToTwelveMonths,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Asap => "asap",
            Self::ThreeToSixMonths => "3_6_months",
            Self::SixToTwelveMonths => "6_12_months",
            Self::Other(value) => value,
        }
    }
}

impl Channel {
    pub fn parse(raw: &str) -> Self {
        match normalize_token(raw).as_str() {
            "website" => Self::Website,
            "phone" => Self::Phone,
            "whatsapp" => Self::Whatsapp,
            "referral" => Self::Referral,
            "social" => Self::Social,
            "showroom" => Self::Showroom,
            "email" => Self::Email,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Website => "website",
            Self::Phone => "phone",
            Self::Whatsapp => "whatsapp",
            Self::Referral => "referral",
            Self::Social => "social",
            Self::Showroom => "showroom",
            Self::Email => "email",
            Self::Other(value) => value,
        }
    }
}

fn normalize_token(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

macro_rules! string_enum_conversions {
    ($ty:ty) => {
        impl From<String> for $ty {
            fn from(value: String) -> Self {
                Self::parse(&value)
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.as_str().to_string()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum_conversions!(ServiceType);
string_enum_conversions!(Timeframe);
string_enum_conversions!(Channel);

/// A requested line item. Quantities arrive from forms and spreadsheets, so
/// they are kept loosely typed until feature building coerces them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestItem {
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub quantity: serde_json::Value,
}

/// Everything the pricing engine needs to know about a quote being priced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricingRequest {
    pub service_type: ServiceType,
    pub timeframe: Timeframe,
    pub channel: Channel,
    #[serde(default)]
    pub site_postcode: Option<String>,
    #[serde(default)]
    pub items: Vec<RequestItem>,
    #[serde(default)]
    pub customer: Option<CustomerProfile>,
}
