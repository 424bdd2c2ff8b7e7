//! # Anthropic Messages API Client
//!
//! A small, non-streaming client for the Anthropic Messages API, used by the
//! generative analysis oracle.
//!
//! ## Example
//!
//! ```no_run
//! use triage_anthropic::{AnthropicClient, MessagesRequest};
//! use triage_anthropic::types::Message;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = AnthropicClient::new(std::env::var("ANTHROPIC_API_KEY")?)?;
//!
//!     let request = MessagesRequest::new(vec![Message::user("disk full on db1")])
//!         .with_max_tokens(256);
//!
//!     let response = client.messages(request).await?;
//!     println!("{}", response.text());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod messages;
pub mod types;

pub use client::AnthropicClient;
pub use error::ClaudeError;
pub use messages::{MessagesRequest, MessagesResponse};
pub use types::{ContentBlock, Message, Role, StopReason, Usage};
