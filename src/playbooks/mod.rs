pub mod dispatcher;
pub mod evaluator;
pub mod outbox;
pub mod template;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operator-authored retention rule: a flat AND-ed condition list plus the
/// actions to fire on a match. Definitions are only loosely validated at
/// authoring time, so every enum here deserializes leniently; the evaluator
/// and dispatcher fail closed on the `Unknown` variants instead of erroring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookDefinition {
    pub id: String,
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Overrides the service-wide cooldown when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_hours: Option<u32>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SendEmail,
    Webhook,
    CreateCoupon,
    Tag,
    #[serde(other)]
    Unknown,
}

impl ActionType {
    pub fn label(&self) -> &'static str {
        match self {
            ActionType::SendEmail => "send_email",
            ActionType::Webhook => "webhook",
            ActionType::CreateCoupon => "create_coupon",
            ActionType::Tag => "tag",
            ActionType::Unknown => "unknown",
        }
    }
}
