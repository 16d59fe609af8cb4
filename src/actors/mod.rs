//! Actors of the `watch` mode
//!
//! Each actor runs as an independent async task communicating via Tokio channels.
//!
//! ```text
//!   ReadingStore
//!        │ readings_after
//! ┌──────▼─────────────┐   ReadingEvent    ┌──────────────────┐
//! │ ReadingPollerActor ├──(bounded mpsc)──▶│ EvaluationActor  │──▶ Evaluator (one task per reading)
//! └────────────────────┘                   └──────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Events**: Readings go over a bounded mpsc channel, so a slow
//!    evaluation side holds the poller back instead of losing readings
//! 3. **Request/Response**: oneshot channels for queries such as stats

pub mod evaluation;
pub mod messages;
pub mod poller;
