//! HTTP handlers for the SQS API
//!
//! A single entry point classifies each request into one of the supported
//! operations. Requests carrying an `X-Amz-Target: <service>.<Operation>`
//! header use the JSON dialect; everything else is the form-encoded query
//! dialect with XML responses. Errors use the shared `ErrorResponse`
//! envelope in both dialects.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Host, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use bytes::Bytes;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use queuestack_core::{arn, SqsError};

use crate::params::{queue_name_from_url, Params};
use crate::queue::Queue;
use crate::registry::QueueRegistry;
use crate::xml;

/// How often a long-polling receive re-checks the queue.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Query,
    Json,
}

/// Handle one SQS request, dispatching on the detected dialect and action.
pub async fn handle_request(
    State(registry): State<Arc<QueueRegistry>>,
    Host(host): Host,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok());

    let (dialect, action, params) = match target {
        Some(target) => {
            let action = target.split('.').last().unwrap_or(target).to_string();
            let params = match Params::from_json(&body) {
                Ok(params) => params,
                Err(e) => return error_response(&e),
            };
            (Dialect::Json, action, params)
        }
        None => {
            let params = Params::from_form(&body);
            let action = params.str("Action").unwrap_or_default().to_string();
            (Dialect::Query, action, params)
        }
    };

    info!(action = %action, dialect = ?dialect, "SQS request");

    let result = match action.as_str() {
        "CreateQueue" => create_queue(&registry, &host, &params, dialect),
        "DeleteQueue" => delete_queue(&registry, &params, dialect),
        "ListQueues" => list_queues(&registry, &host, &params, dialect),
        "SendMessage" => send_message(&registry, &params, dialect),
        "ReceiveMessage" => receive_message(&registry, &params, dialect).await,
        "DeleteMessage" => delete_message(&registry, &params, dialect),
        "GetQueueAttributes" => get_queue_attributes(&registry, &params, dialect),
        "PurgeQueue" => purge_queue(&registry, &params, dialect),
        "StartMessageMoveTask" => start_message_move_task(&registry, &params, dialect),
        "ListMessageMoveTasks" => Ok(list_message_move_tasks(dialect)),
        "CancelMessageMoveTask" => Ok(empty_response(dialect, "CancelMessageMoveTask")),
        _ => {
            warn!(action = %action, "unknown SQS action");
            Err(SqsError::invalid_action(&action))
        }
    };

    result.unwrap_or_else(|e| error_response(&e))
}

// === Operations ===

fn create_queue(
    registry: &Arc<QueueRegistry>,
    host: &str,
    params: &Params,
    dialect: Dialect,
) -> Result<Response, SqsError> {
    let name = params.required("QueueName")?;
    let queue = registry.create(name, params.attributes());
    let queue_url = format!("http://{host}{}", queue.url);

    Ok(match dialect {
        Dialect::Json => json_response(json!({ "QueueUrl": queue_url })),
        Dialect::Query => xml::response(
            StatusCode::OK,
            format!(
                "<CreateQueueResponse>\n  <CreateQueueResult>\n    <QueueUrl>{}</QueueUrl>\n  </CreateQueueResult>\n</CreateQueueResponse>",
                xml::escape(&queue_url)
            ),
        ),
    })
}

fn delete_queue(
    registry: &Arc<QueueRegistry>,
    params: &Params,
    dialect: Dialect,
) -> Result<Response, SqsError> {
    let name = queue_name_from_url(params.required("QueueUrl")?);
    if registry.delete(name) {
        Ok(empty_response(dialect, "DeleteQueue"))
    } else {
        Err(SqsError::non_existent_queue(name))
    }
}

fn list_queues(
    registry: &Arc<QueueRegistry>,
    host: &str,
    params: &Params,
    dialect: Dialect,
) -> Result<Response, SqsError> {
    let prefix = params.str("QueueNamePrefix").unwrap_or_default();
    let urls: Vec<String> = registry
        .list(prefix)
        .into_iter()
        .map(|url| format!("http://{host}{url}"))
        .collect();

    Ok(match dialect {
        Dialect::Json => json_response(json!({ "QueueUrls": urls })),
        Dialect::Query => {
            let mut body = String::from("<ListQueuesResponse>\n  <ListQueuesResult>\n");
            for url in &urls {
                body.push_str(&format!("    <QueueUrl>{}</QueueUrl>\n", xml::escape(url)));
            }
            body.push_str("  </ListQueuesResult>\n</ListQueuesResponse>");
            xml::response(StatusCode::OK, body)
        }
    })
}

fn send_message(
    registry: &Arc<QueueRegistry>,
    params: &Params,
    dialect: Dialect,
) -> Result<Response, SqsError> {
    let queue = queue_from_params(registry, params)?;
    let body = params.required("MessageBody")?.to_string();
    if body.len() > queue.config.maximum_message_size {
        return Err(SqsError::invalid_parameter(format!(
            "Message body must be shorter than {} bytes",
            queue.config.maximum_message_size
        )));
    }

    let message = queue.send(
        body,
        params.message_attributes(),
        params.u32("DelaySeconds"),
        params.str("MessageDeduplicationId").unwrap_or_default(),
        params.str("MessageGroupId").unwrap_or_default(),
    );

    Ok(match dialect {
        Dialect::Json => {
            let mut fields = Map::new();
            fields.insert("MD5OfMessageBody".into(), message.md5_of_body.clone().into());
            fields.insert("MessageId".into(), message.message_id.clone().into());
            if queue.config.fifo {
                fields.insert(
                    "SequenceNumber".into(),
                    message.sequence_number.clone().into(),
                );
            }
            json_response(Value::Object(fields))
        }
        Dialect::Query => {
            let sequence = if queue.config.fifo {
                format!(
                    "\n    <SequenceNumber>{}</SequenceNumber>",
                    message.sequence_number
                )
            } else {
                String::new()
            };
            xml::response(
                StatusCode::OK,
                format!(
                    "<SendMessageResponse>\n  <SendMessageResult>\n    <MD5OfMessageBody>{}</MD5OfMessageBody>\n    <MessageId>{}</MessageId>{}\n  </SendMessageResult>\n</SendMessageResponse>",
                    message.md5_of_body, message.message_id, sequence
                ),
            )
        }
    })
}

async fn receive_message(
    registry: &Arc<QueueRegistry>,
    params: &Params,
    dialect: Dialect,
) -> Result<Response, SqsError> {
    let queue = queue_from_params(registry, params)?;
    let max = params.u32("MaxNumberOfMessages").unwrap_or(1).clamp(1, 10) as usize;
    let visibility = params
        .u32("VisibilityTimeout")
        .unwrap_or(queue.config.visibility_timeout);
    // Each dialect reads its own parameters, so a JSON request takes
    // WaitTimeSeconds from the JSON body only.
    let wait = params
        .u32("WaitTimeSeconds")
        .unwrap_or(queue.config.receive_wait_time);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(u64::from(wait));
    let mut messages = queue.receive(max, visibility);
    while messages.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(POLL_INTERVAL).await;
        messages = queue.receive(max, visibility);
    }

    Ok(match dialect {
        Dialect::Json => {
            let rendered: Vec<Value> = messages
                .iter()
                .map(|msg| {
                    let mut fields = Map::new();
                    fields.insert("MessageId".into(), msg.message_id.clone().into());
                    fields.insert("ReceiptHandle".into(), msg.receipt_handle.clone().into());
                    fields.insert("MD5OfBody".into(), msg.md5_of_body.clone().into());
                    fields.insert("Body".into(), msg.body.clone().into());
                    if !msg.message_attributes.is_empty() {
                        let attrs: Map<String, Value> = msg
                            .message_attributes
                            .iter()
                            .map(|(name, value)| (name.clone(), value.clone().into()))
                            .collect();
                        fields.insert("MessageAttributes".into(), Value::Object(attrs));
                    }
                    Value::Object(fields)
                })
                .collect();
            json_response(json!({ "Messages": rendered }))
        }
        Dialect::Query => {
            let mut body = String::from("<ReceiveMessageResponse>\n  <ReceiveMessageResult>\n");
            for msg in &messages {
                body.push_str("    <Message>\n");
                body.push_str(&format!(
                    "      <MessageId>{}</MessageId>\n",
                    msg.message_id
                ));
                body.push_str(&format!(
                    "      <ReceiptHandle>{}</ReceiptHandle>\n",
                    msg.receipt_handle
                ));
                body.push_str(&format!(
                    "      <MD5OfBody>{}</MD5OfBody>\n",
                    msg.md5_of_body
                ));
                body.push_str(&format!("      <Body>{}</Body>\n", xml::escape(&msg.body)));
                for (name, value) in &msg.message_attributes {
                    body.push_str(&format!(
                        "      <MessageAttribute>\n        <Name>{}</Name>\n        <Value>\n          <StringValue>{}</StringValue>\n        </Value>\n      </MessageAttribute>\n",
                        xml::escape(name),
                        xml::escape(value)
                    ));
                }
                body.push_str("    </Message>\n");
            }
            body.push_str("  </ReceiveMessageResult>\n</ReceiveMessageResponse>");
            xml::response(StatusCode::OK, body)
        }
    })
}

fn delete_message(
    registry: &Arc<QueueRegistry>,
    params: &Params,
    dialect: Dialect,
) -> Result<Response, SqsError> {
    let queue = queue_from_params(registry, params)?;
    let receipt_handle = params.required("ReceiptHandle")?;
    if queue.delete_message(receipt_handle) {
        Ok(empty_response(dialect, "DeleteMessage"))
    } else {
        Err(SqsError::invalid_receipt_handle())
    }
}

fn get_queue_attributes(
    registry: &Arc<QueueRegistry>,
    params: &Params,
    dialect: Dialect,
) -> Result<Response, SqsError> {
    let queue = queue_from_params(registry, params)?;
    let mut entries: Vec<(String, String)> = queue.attributes().into_iter().collect();
    entries.sort();

    Ok(match dialect {
        Dialect::Json => {
            let attrs: Map<String, Value> = entries
                .into_iter()
                .map(|(name, value)| (name, value.into()))
                .collect();
            json_response(json!({ "Attributes": attrs }))
        }
        Dialect::Query => {
            let mut body =
                String::from("<GetQueueAttributesResponse>\n  <GetQueueAttributesResult>\n");
            for (name, value) in entries {
                body.push_str(&format!(
                    "    <Attribute>\n      <Name>{}</Name>\n      <Value>{}</Value>\n    </Attribute>\n",
                    xml::escape(&name),
                    xml::escape(&value)
                ));
            }
            body.push_str("  </GetQueueAttributesResult>\n</GetQueueAttributesResponse>");
            xml::response(StatusCode::OK, body)
        }
    })
}

fn purge_queue(
    registry: &Arc<QueueRegistry>,
    params: &Params,
    dialect: Dialect,
) -> Result<Response, SqsError> {
    let queue = queue_from_params(registry, params)?;
    queue.purge();
    info!(queue = %queue.name, "queue purged");
    Ok(empty_response(dialect, "PurgeQueue"))
}

/// Moves are synchronous: the redrive happens here and the returned task
/// handle refers to already-finished work.
fn start_message_move_task(
    registry: &Arc<QueueRegistry>,
    params: &Params,
    dialect: Dialect,
) -> Result<Response, SqsError> {
    let source_name = arn::queue_name_from_arn(params.required("SourceArn")?);
    let destination = params.str("DestinationArn").unwrap_or_default();
    let cap = params.u32("MaxNumberOfMessagesPerSecond").unwrap_or(0) as usize;

    let moved = registry.redrive(source_name, destination, cap)?;
    let task_handle = Uuid::new_v4().to_string();
    info!(task = %task_handle, moved, source = %source_name, "message move task complete");

    Ok(match dialect {
        Dialect::Json => json_response(json!({ "TaskHandle": task_handle })),
        Dialect::Query => xml::response(
            StatusCode::OK,
            format!(
                "<StartMessageMoveTaskResponse>\n  <StartMessageMoveTaskResult>\n    <TaskHandle>{task_handle}</TaskHandle>\n  </StartMessageMoveTaskResult>\n</StartMessageMoveTaskResponse>"
            ),
        ),
    })
}

fn list_message_move_tasks(dialect: Dialect) -> Response {
    match dialect {
        Dialect::Json => json_response(json!({ "Results": [] })),
        Dialect::Query => xml::response(
            StatusCode::OK,
            "<ListMessageMoveTasksResponse>\n  <ListMessageMoveTasksResult>\n  </ListMessageMoveTasksResult>\n</ListMessageMoveTasksResponse>"
                .to_string(),
        ),
    }
}

// === Helpers ===

fn queue_from_params(
    registry: &Arc<QueueRegistry>,
    params: &Params,
) -> Result<Arc<Queue>, SqsError> {
    let name = queue_name_from_url(params.required("QueueUrl")?);
    registry
        .get(name)
        .ok_or_else(|| SqsError::non_existent_queue(name))
}

fn empty_response(dialect: Dialect, operation: &str) -> Response {
    match dialect {
        Dialect::Json => json_response(json!({})),
        Dialect::Query => xml::response(
            StatusCode::OK,
            format!("<{operation}Response></{operation}Response>"),
        ),
    }
}

fn json_response(value: Value) -> Response {
    let mut response = Response::new(Body::from(value.to_string()));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/x-amz-json-1.0"),
    );
    response
}

fn error_response(err: &SqsError) -> Response {
    let status =
        StatusCode::from_u16(err.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    xml::response(status, err.to_xml())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn call(
        registry: &Arc<QueueRegistry>,
        target: Option<&str>,
        body: &str,
    ) -> (StatusCode, String) {
        let mut headers = HeaderMap::new();
        if let Some(target) = target {
            headers.insert("x-amz-target", target.parse().unwrap());
        }
        let response = handle_request(
            State(registry.clone()),
            Host("localhost:9324".to_string()),
            headers,
            Bytes::from(body.to_string()),
        )
        .await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_unknown_action_is_rejected() {
        let registry = QueueRegistry::new();
        let (status, body) = call(&registry, None, "Action=Bogus").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("<Code>InvalidAction</Code>"));
        assert!(body.contains("<Type>Sender</Type>"));
    }

    #[tokio::test]
    async fn test_create_requires_queue_name() {
        let registry = QueueRegistry::new();
        let (status, body) = call(&registry, None, "Action=CreateQueue&QueueName=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("<Code>MissingParameter</Code>"));
    }

    #[tokio::test]
    async fn test_malformed_json_body_is_rejected() {
        let registry = QueueRegistry::new();
        let (status, body) = call(&registry, Some("AmazonSQS.CreateQueue"), "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("<Code>InvalidParameterValue</Code>"));
    }

    #[tokio::test]
    async fn test_send_to_missing_queue_fails() {
        let registry = QueueRegistry::new();
        let (status, body) = call(
            &registry,
            None,
            "Action=SendMessage&QueueUrl=%2Fmissing&MessageBody=x",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("<Code>NonExistentQueue</Code>"));
    }

    #[tokio::test]
    async fn test_query_dialect_lifecycle() {
        let registry = QueueRegistry::new();
        let (status, body) = call(&registry, None, "Action=CreateQueue&QueueName=q").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<QueueUrl>http://localhost:9324/q</QueueUrl>"));

        let (status, body) = call(
            &registry,
            None,
            "Action=SendMessage&QueueUrl=http%3A%2F%2Flocalhost%3A9324%2Fq&MessageBody=hello",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<MD5OfMessageBody>5d41402abc4b2a76b9719d911017c592</MD5OfMessageBody>"));

        let (status, body) = call(
            &registry,
            None,
            "Action=ReceiveMessage&QueueUrl=%2Fq&MaxNumberOfMessages=1",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<Body>hello</Body>"));
    }

    #[tokio::test]
    async fn test_json_dialect_lifecycle() {
        let registry = QueueRegistry::new();
        let (status, body) = call(
            &registry,
            Some("AmazonSQS.CreateQueue"),
            r#"{"QueueName":"q"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["QueueUrl"], "http://localhost:9324/q");

        let (_, body) = call(
            &registry,
            Some("AmazonSQS.SendMessage"),
            r#"{"QueueUrl":"http://localhost:9324/q","MessageBody":"hello"}"#,
        )
        .await;
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["MD5OfMessageBody"], "5d41402abc4b2a76b9719d911017c592");

        let (_, body) = call(
            &registry,
            Some("AmazonSQS.ReceiveMessage"),
            r#"{"QueueUrl":"/q"}"#,
        )
        .await;
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["Messages"][0]["Body"], "hello");
        assert!(!parsed["Messages"][0]["ReceiptHandle"]
            .as_str()
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_message_attributes_carried_through() {
        let registry = QueueRegistry::new();
        call(&registry, None, "Action=CreateQueue&QueueName=q").await;
        call(
            &registry,
            None,
            "Action=SendMessage&QueueUrl=%2Fq&MessageBody=x\
             &MessageAttribute.1.Name=color\
             &MessageAttribute.1.Value.StringValue=red",
        )
        .await;

        let (_, body) = call(
            &registry,
            None,
            "Action=ReceiveMessage&QueueUrl=%2Fq&VisibilityTimeout=0",
        )
        .await;
        assert!(body.contains("<Name>color</Name>"));
        assert!(body.contains("<StringValue>red</StringValue>"));

        // The JSON dialect echoes the same opaque map.
        let (_, receipt_body) = call(
            &registry,
            Some("AmazonSQS.ReceiveMessage"),
            r#"{"QueueUrl":"/q","VisibilityTimeout":0}"#,
        )
        .await;
        let parsed: Value = serde_json::from_str(&receipt_body).unwrap();
        assert_eq!(parsed["Messages"][0]["MessageAttributes"]["color"], "red");
    }

    #[tokio::test]
    async fn test_stale_receipt_is_invalid() {
        let registry = QueueRegistry::new();
        call(&registry, None, "Action=CreateQueue&QueueName=q").await;
        call(
            &registry,
            None,
            "Action=SendMessage&QueueUrl=%2Fq&MessageBody=x",
        )
        .await;
        let (status, body) = call(
            &registry,
            None,
            "Action=DeleteMessage&QueueUrl=%2Fq&ReceiptHandle=stale",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("<Code>ReceiptHandleIsInvalid</Code>"));
    }

    #[tokio::test]
    async fn test_fifo_send_reports_sequence_number() {
        let registry = QueueRegistry::new();
        call(
            &registry,
            None,
            "Action=CreateQueue&QueueName=q.fifo\
             &Attribute.1.Name=ContentBasedDeduplication&Attribute.1.Value=true",
        )
        .await;
        let (_, body) = call(
            &registry,
            None,
            "Action=SendMessage&QueueUrl=%2Fq.fifo&MessageBody=a&MessageGroupId=g",
        )
        .await;
        assert!(body.contains("<SequenceNumber>1</SequenceNumber>"));
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let registry = QueueRegistry::new();
        call(
            &registry,
            None,
            "Action=CreateQueue&QueueName=q\
             &Attribute.1.Name=MaximumMessageSize&Attribute.1.Value=1024",
        )
        .await;
        let big = "x".repeat(2048);
        let (status, body) = call(
            &registry,
            None,
            &format!("Action=SendMessage&QueueUrl=%2Fq&MessageBody={big}"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("<Code>InvalidParameterValue</Code>"));
    }

    #[tokio::test]
    async fn test_move_task_listing_is_empty() {
        let registry = QueueRegistry::new();
        let (status, body) = call(
            &registry,
            Some("AmazonSQS.ListMessageMoveTasks"),
            r#"{"SourceArn":"arn:aws:sqs:us-east-1:000000000000:dlq"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["Results"].as_array().unwrap().len(), 0);
    }
}
