//! Conversation engine for the storefront bot.
//!
//! Each inbound chat message is bound to a business, deduplicated, classified,
//! and applied to the customer's cart and checkout state. The language and
//! vision oracle is optional: every call is bounded, and a failed call falls
//! back to keyword handling or a plain reply.
//!
//! # Key Types
//!
//! - `ConversationEngine` - per-message orchestration (see `runtime`)
//! - `Oracle` / `BoundedOracle` - item extraction, photo matching, receipt checks
//! - `GuardrailPolicy` - keeps negative phrasing out of the cart
//! - `VoiceDesk` - answers voice-assistant tool calls

pub mod guardrails;
pub mod intent;
pub mod llm;
pub mod locks;
pub mod matching;
pub mod oracle;
pub mod replies;
pub mod responder;
pub mod runtime;
pub mod tenant;
pub mod voice;

pub use llm::oracle_from_config;
pub use oracle::{BoundedOracle, Oracle, OracleError};
pub use runtime::{ConversationEngine, InboundOutcome, StagedCart, TracingAuditSink};
pub use voice::VoiceDesk;
