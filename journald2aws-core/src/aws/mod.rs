//! AWS plumbing without an SDK
//!
//! - [`signer`]: Signature Version 4 header computation
//! - [`logs`]: CloudWatch Logs `PutLogEvents` bodies and posts
//! - [`client`]: sends posts over HTTP

pub mod client;
pub mod logs;
pub mod signer;

pub use client::LogsClient;
pub use logs::{AwsLogMessageBuilder, LogMessage, Post, PutLogEventsResponse};
pub use signer::{AwsSigner, Credentials, SignRequest, V4AwsSigner};
