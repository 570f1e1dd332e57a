//! Read-only admin surface: an embedded HTML page and a JSON snapshot of
//! every queue.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use queuestack_sqs::policy::{RedriveAllowPolicy, RedrivePolicy};

use crate::router::AppState;

#[derive(Serialize)]
struct QueueDetails {
    name: String,
    url: String,
    message_count: usize,
    visible_count: usize,
    not_visible_count: usize,
    delayed_count: usize,
    messages: Vec<MessageDetails>,
    fifo_queue: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    content_based_deduplication: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    redrive_policy: Option<RedrivePolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    redrive_allow_policy: Option<RedriveAllowPolicy>,
}

#[derive(Serialize)]
struct MessageDetails {
    message_id: String,
    body: String,
    md5_of_body: String,
    sent_timestamp: DateTime<Utc>,
    receive_count: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    receipt_handle: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    sequence_number: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    message_group_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    message_deduplication_id: String,
}

pub async fn admin_page() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html")
        .body(Body::from(include_str!("admin.html")))
        .unwrap()
}

pub async fn queue_snapshot(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let now = Utc::now();
    let mut queues: Vec<QueueDetails> = state
        .registry
        .all()
        .into_iter()
        .map(|queue| {
            let messages = queue.snapshot_messages();
            let visible = messages.iter().filter(|m| m.is_eligible(now)).count();
            let not_visible = messages.iter().filter(|m| m.is_in_flight(now)).count();
            let delayed = messages.iter().filter(|m| m.is_delayed(now)).count();
            QueueDetails {
                name: queue.name.clone(),
                url: queue.url.clone(),
                message_count: messages.len(),
                visible_count: visible,
                not_visible_count: not_visible,
                delayed_count: delayed,
                messages: messages
                    .into_iter()
                    .map(|m| MessageDetails {
                        message_id: m.message_id,
                        body: m.body,
                        md5_of_body: m.md5_of_body,
                        sent_timestamp: m.sent_at,
                        receive_count: m.receive_count,
                        receipt_handle: m.receipt_handle,
                        sequence_number: m.sequence_number,
                        message_group_id: m.group_id,
                        message_deduplication_id: m.deduplication_id,
                    })
                    .collect(),
                fifo_queue: queue.config.fifo,
                content_based_deduplication: queue.config.content_based_deduplication,
                redrive_policy: queue.config.redrive_policy.clone(),
                redrive_allow_policy: queue.config.redrive_allow_policy.clone(),
            }
        })
        .collect();
    queues.sort_by(|a, b| a.name.cmp(&b.name));

    Json(json!({ "queues": queues }))
}
