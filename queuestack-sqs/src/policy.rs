//! Dead-letter and redrive-allow policies
//!
//! Both arrive embedded as JSON strings inside queue attribute values. AWS
//! tooling sometimes writes `maxReceiveCount` as a number and sometimes as a
//! string; both are accepted.

use serde::Serialize;
use serde_json::Value;

/// Dead-letter queue wiring: a name lookup, not an ownership edge. The
/// target is resolved at move time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedrivePolicy {
    pub dead_letter_target_arn: String,
    pub max_receive_count: u32,
}

impl RedrivePolicy {
    pub fn from_json(s: &str) -> Result<Self, String> {
        let v: Value =
            serde_json::from_str(s).map_err(|e| format!("invalid RedrivePolicy JSON: {e}"))?;
        let arn = v
            .get("deadLetterTargetArn")
            .and_then(Value::as_str)
            .ok_or("RedrivePolicy must contain deadLetterTargetArn")?
            .to_string();
        let max_receive_count = v
            .get("maxReceiveCount")
            .and_then(int_or_string)
            .unwrap_or(0) as u32;
        Ok(Self {
            dead_letter_target_arn: arn,
            max_receive_count,
        })
    }
}

/// Which queues may redrive out of this one: `allowAll`, `denyAll`, or
/// `byQueue` with an explicit source list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedriveAllowPolicy {
    pub redrive_permission: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_queue_arns: Option<Vec<String>>,
}

impl RedriveAllowPolicy {
    pub fn from_json(s: &str) -> Result<Self, String> {
        let v: Value =
            serde_json::from_str(s).map_err(|e| format!("invalid RedriveAllowPolicy JSON: {e}"))?;
        let permission = v
            .get("redrivePermission")
            .and_then(Value::as_str)
            .unwrap_or("allowAll")
            .to_string();
        let source_queue_arns = v.get("sourceQueueArns").and_then(Value::as_array).map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        });
        Ok(Self {
            redrive_permission: permission,
            source_queue_arns,
        })
    }
}

fn int_or_string(v: &Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}
