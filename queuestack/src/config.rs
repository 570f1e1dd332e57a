//! YAML configuration and queue bootstrap
//!
//! Queues declared in the file are created at startup through the same
//! `create` entry point the wire API uses.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use queuestack_sqs::QueueRegistry;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queues: Vec<QueueConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// A queue to create at startup.
#[derive(Debug, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout: u32,
    #[serde(default = "default_retention_period")]
    pub message_retention_period: u32,
    #[serde(default = "default_maximum_message_size")]
    pub maximum_message_size: u32,
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
    #[serde(default)]
    pub delay_seconds: u32,
    #[serde(default)]
    pub receive_message_wait_time: u32,
    /// Additional attributes (RedrivePolicy, FifoQueue, …), merged verbatim.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

fn default_port() -> u16 {
    9324
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_visibility_timeout() -> u32 {
    30
}

fn default_retention_period() -> u32 {
    345_600 // 4 days
}

fn default_maximum_message_size() -> u32 {
    262_144 // 256 KB
}

fn default_max_receive_count() -> u32 {
    3
}

pub fn load(path: &Path) -> anyhow::Result<Config> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data).context("failed to parse config")?;
    Ok(config)
}

/// Create every configured queue. `create` is idempotent, so re-running
/// against a warm registry changes nothing.
pub fn bootstrap(registry: &Arc<QueueRegistry>, config: &Config) {
    for queue in &config.queues {
        let mut attributes = HashMap::new();
        attributes.insert(
            "VisibilityTimeout".to_string(),
            queue.visibility_timeout.to_string(),
        );
        attributes.insert(
            "MessageRetentionPeriod".to_string(),
            queue.message_retention_period.to_string(),
        );
        attributes.insert(
            "MaximumMessageSize".to_string(),
            queue.maximum_message_size.to_string(),
        );
        attributes.insert(
            "MaxReceiveCount".to_string(),
            queue.max_receive_count.to_string(),
        );
        attributes.insert("DelaySeconds".to_string(), queue.delay_seconds.to_string());
        attributes.insert(
            "ReceiveMessageWaitTimeSeconds".to_string(),
            queue.receive_message_wait_time.to_string(),
        );
        for (key, value) in &queue.attributes {
            attributes.insert(key.clone(), value.clone());
        }
        registry.create(&queue.name, attributes);
    }
    if !config.queues.is_empty() {
        info!(count = config.queues.len(), "bootstrapped queues from configuration");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config: Config = serde_yaml::from_str(
            r#"
queues:
  - name: jobs
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9324);
        assert_eq!(config.server.host, "0.0.0.0");
        let queue = &config.queues[0];
        assert_eq!(queue.visibility_timeout, 30);
        assert_eq!(queue.message_retention_period, 345_600);
        assert_eq!(queue.maximum_message_size, 262_144);
        assert_eq!(queue.max_receive_count, 3);
        assert_eq!(queue.delay_seconds, 0);
    }

    #[test]
    fn test_full_queue_entry() {
        let config: Config = serde_yaml::from_str(
            r#"
server:
  port: 9400
queues:
  - name: main
    visibility_timeout: 5
    max_receive_count: 2
    attributes:
      RedrivePolicy: '{"deadLetterTargetArn":"arn:aws:sqs:us-east-1:000000000000:dlq","maxReceiveCount":2}'
  - name: dlq
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9400);
        assert_eq!(config.queues.len(), 2);
        assert_eq!(config.queues[0].visibility_timeout, 5);
        assert!(config.queues[0].attributes.contains_key("RedrivePolicy"));
    }

    #[tokio::test]
    async fn test_bootstrap_creates_queues() {
        let config: Config = serde_yaml::from_str(
            r#"
queues:
  - name: jobs
    visibility_timeout: 7
    attributes:
      FifoQueue: "true"
"#,
        )
        .unwrap();
        let registry = QueueRegistry::new();
        bootstrap(&registry, &config);

        let queue = registry.get("jobs").unwrap();
        assert_eq!(queue.config.visibility_timeout, 7);
        assert!(queue.config.fifo);
    }
}
