//! Outbound seam between capture and delivery.
//!
//! Handlers finish by handing a payload to a [`LogSink`]; they never talk
//! to the network themselves. In production the sink is the delivery
//! pipeline's sender handle, which serializes everything through the
//! per-process ordering chain. Tests record payloads in memory instead.

use clawlink_board::{LogPayload, TopicUpsert};
use clawlink_delivery::DeliverySender;

/// Where capture hands finished payloads.
pub trait LogSink: Send + Sync {
    /// Hand one log payload to the ordering chain.
    fn submit(&self, payload: LogPayload);

    /// Hand one topic upsert to the ordering chain.
    fn provision_topic(&self, upsert: TopicUpsert);
}

impl LogSink for DeliverySender {
    fn submit(&self, payload: LogPayload) {
        self.send(payload);
    }

    fn provision_topic(&self, upsert: TopicUpsert) {
        self.upsert_topic(upsert);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
