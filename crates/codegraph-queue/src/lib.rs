//! Durable work queues for the codegraph pipeline.
//!
//! Named FIFO queues over the pipeline's SQLite database: at-least-once
//! delivery, claim/ack, exponential backoff with jitter, per-job timeouts
//! enforced by a reaper, and a dead-letter queue. Sharing the database with
//! the relational store is deliberate — it lets the outbox publisher flip an
//! event to PUBLISHED and append its jobs in one transaction.

mod heartbeat;
mod job;
mod queue;
mod reaper;

pub use heartbeat::spawn_heartbeat;
pub use job::{JobMessage, PoiContext, QueueName};
pub use queue::{ClaimedJob, FailDisposition, JobQueue};
pub use reaper::spawn_reaper;
