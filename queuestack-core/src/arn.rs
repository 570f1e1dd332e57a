//! ARN synthesis and decoding
//!
//! The emulator runs under a single fixed region and account; every queue ARN
//! embeds them.

/// Region embedded in every synthesized ARN.
pub const REGION: &str = "us-east-1";

/// Account ID embedded in every synthesized ARN.
pub const ACCOUNT_ID: &str = "000000000000";

/// Build the ARN for a queue name.
pub fn queue_arn(name: &str) -> String {
    format!("arn:aws:sqs:{REGION}:{ACCOUNT_ID}:{name}")
}

/// Extract the queue name from an ARN of the form
/// `arn:aws:sqs:<region>:<account>:<name>`. A value that is not an ARN is
/// taken to be a bare queue name.
pub fn queue_name_from_arn(arn: &str) -> &str {
    if arn.starts_with("arn:") {
        arn.split(':').nth(5).unwrap_or("")
    } else {
        arn
    }
}
