//! SQS error taxonomy and the shared wire envelope

use thiserror::Error;

use crate::request_id::RequestId;

/// Error codes the emulator reports over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MissingParameter,
    InvalidParameterValue,
    InvalidAction,
    NonExistentQueue,
    ReceiptHandleIsInvalid,
    InternalError,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingParameter => "MissingParameter",
            Self::InvalidParameterValue => "InvalidParameterValue",
            Self::InvalidAction => "InvalidAction",
            Self::NonExistentQueue => "NonExistentQueue",
            Self::ReceiptHandleIsInvalid => "ReceiptHandleIsInvalid",
            Self::InternalError => "InternalError",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::MissingParameter
            | Self::InvalidParameterValue
            | Self::InvalidAction
            | Self::NonExistentQueue
            | Self::ReceiptHandleIsInvalid => 400,
            Self::InternalError => 500,
        }
    }

    /// `Sender` for client faults, `Receiver` for server faults.
    pub fn fault_type(&self) -> &'static str {
        if self.http_status() < 500 {
            "Sender"
        } else {
            "Receiver"
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// An error reported to the client. Both protocol dialects answer with the
/// same XML `ErrorResponse` envelope.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct SqsError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SqsError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn missing_parameter(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingParameter, message)
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParameterValue, message)
    }

    pub fn invalid_action(action: &str) -> Self {
        Self::new(ErrorKind::InvalidAction, format!("Unknown action: {action}"))
    }

    pub fn non_existent_queue(name: &str) -> Self {
        Self::new(
            ErrorKind::NonExistentQueue,
            format!("Queue does not exist: {name}"),
        )
    }

    pub fn invalid_receipt_handle() -> Self {
        Self::new(ErrorKind::ReceiptHandleIsInvalid, "Invalid receipt handle")
    }

    /// Render the shared error envelope.
    pub fn to_xml(&self) -> String {
        format!(
            r#"<ErrorResponse>
  <Error>
    <Type>{}</Type>
    <Code>{}</Code>
    <Message>{}</Message>
  </Error>
  <RequestId>{}</RequestId>
</ErrorResponse>"#,
            self.kind.fault_type(),
            self.kind.code(),
            xml_escape(&self.message),
            RequestId::new()
        )
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
