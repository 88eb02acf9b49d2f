//! Interpretations: what the system believes the user asked for.
//!
//! An [`Interpretation`] is created by the reasoning engine once intent,
//! entities and a template have been pinned down. It is owned by the
//! engine until it enters the approval flow, which owns it for the rest
//! of its life.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Intent taxonomy the classifier maps input onto.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IntentTag {
    ResourceReservation,
    TaskScheduling,
    StatusQuery,
    InventoryManagement,
    ReportingAnalytics,
    UserManagement,
    Unknown,
}

impl IntentTag {
    /// Canonical snake_case label, as it appears in model output.
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentTag::ResourceReservation => "resource_reservation",
            IntentTag::TaskScheduling => "task_scheduling",
            IntentTag::StatusQuery => "status_query",
            IntentTag::InventoryManagement => "inventory_management",
            IntentTag::ReportingAnalytics => "reporting_analytics",
            IntentTag::UserManagement => "user_management",
            IntentTag::Unknown => "unknown",
        }
    }

    /// Parse a label, treating anything unrecognized as [`IntentTag::Unknown`].
    pub fn parse(label: &str) -> Self {
        match label {
            "resource_reservation" => IntentTag::ResourceReservation,
            "task_scheduling" => IntentTag::TaskScheduling,
            "status_query" => IntentTag::StatusQuery,
            "inventory_management" => IntentTag::InventoryManagement,
            "reporting_analytics" => IntentTag::ReportingAnalytics,
            "user_management" => IntentTag::UserManagement,
            _ => IntentTag::Unknown,
        }
    }
}

impl std::fmt::Display for IntentTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical label attached to an extracted entity value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    ResourceId,
    Date,
    Time,
    Location,
    User,
    Duration,
    Cost,
    Mileage,
    Fuel,
    Status,
    Priority,
}

impl EntityKind {
    /// Canonical singular label.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::ResourceId => "resource_id",
            EntityKind::Date => "date",
            EntityKind::Time => "time",
            EntityKind::Location => "location",
            EntityKind::User => "user",
            EntityKind::Duration => "duration",
            EntityKind::Cost => "cost",
            EntityKind::Mileage => "mileage",
            EntityKind::Fuel => "fuel",
            EntityKind::Status => "status",
            EntityKind::Priority => "priority",
        }
    }

    /// Parse a canonical singular label.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "resource_id" => Some(EntityKind::ResourceId),
            "date" => Some(EntityKind::Date),
            "time" => Some(EntityKind::Time),
            "location" => Some(EntityKind::Location),
            "user" => Some(EntityKind::User),
            "duration" => Some(EntityKind::Duration),
            "cost" => Some(EntityKind::Cost),
            "mileage" => Some(EntityKind::Mileage),
            "fuel" => Some(EntityKind::Fuel),
            "status" => Some(EntityKind::Status),
            "priority" => Some(EntityKind::Priority),
            _ => None,
        }
    }

    /// Map a key from the model's entity-extraction step onto a kind.
    ///
    /// The model emits plural group names (`resource_ids`, `dates`, ...);
    /// canonical labels are singular.
    pub fn from_envelope_key(key: &str) -> Option<Self> {
        match key {
            "resource_ids" | "resource_id" | "vehicle_ids" => Some(EntityKind::ResourceId),
            "dates" | "date" => Some(EntityKind::Date),
            "times" | "time" => Some(EntityKind::Time),
            "locations" | "location" => Some(EntityKind::Location),
            "users" | "user" => Some(EntityKind::User),
            "durations" | "duration" => Some(EntityKind::Duration),
            "costs" | "cost" => Some(EntityKind::Cost),
            "mileages" | "mileage" => Some(EntityKind::Mileage),
            "fuel" => Some(EntityKind::Fuel),
            "statuses" | "status" => Some(EntityKind::Status),
            "priorities" | "priority" => Some(EntityKind::Priority),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A validated interpretation of one natural-language input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interpretation {
    /// Unique interpretation ID.
    pub id: Uuid,
    /// The original input text.
    pub input_text: String,
    /// Classified intent.
    pub intent: IntentTag,
    /// Extracted entity groups.
    pub entities: HashMap<EntityKind, Vec<String>>,
    /// Name of the template the request was filled from.
    pub template_name: String,
    /// The filled request object.
    pub request: serde_json::Value,
    /// Classifier confidence, if the classifier produced one.
    pub intent_confidence: Option<f32>,
    /// Extractor confidence, if the extractor produced one.
    pub entity_confidence: Option<f32>,
}

impl Interpretation {
    /// Overall confidence: the mean of the defined signals.
    ///
    /// Absent signals do not contribute. With neither signal defined the
    /// result falls back to 0.0 rather than a silent NaN.
    pub fn overall_confidence(&self) -> f32 {
        let signals: Vec<f32> = [self.intent_confidence, self.entity_confidence]
            .into_iter()
            .flatten()
            .collect();
        if signals.is_empty() {
            return 0.0;
        }
        signals.iter().sum::<f32>() / signals.len() as f32
    }
}
