//! Fan-out delivery
//!
//! Hub and channel actors deliver one encoded frame to every member in turn.
//! Each enqueue waits for room in the member's bounded outbound queue, so a
//! stalled member holds up the whole actor. `fanout_timeout` bounds that wait:
//! when it expires the frame is dropped for that member only and delivery
//! moves on. With no timeout the actor blocks until the member drains or
//! disconnects.

use std::time::Duration;

use bytes::Bytes;

use crate::client::ClientHandle;

/// Outcome of delivering one frame to one member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Frame is in the member's queue
    Queued,
    /// Member's writer has stopped
    Closed,
    /// Member's queue stayed full for the whole timeout
    TimedOut,
}

/// Tally of one fan-out pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub queued: usize,
    pub closed: usize,
    pub timed_out: usize,
}

/// Deliver a frame to a single client
pub async fn deliver(client: &ClientHandle, frame: Bytes, timeout: Option<Duration>) -> Delivery {
    let outbound = client.outbound();

    let sent = match timeout {
        Some(limit) => match tokio::time::timeout(limit, outbound.send(frame)).await {
            Ok(sent) => sent,
            Err(_) => {
                tracing::warn!(
                    client_id = %client.id(),
                    timeout_ms = limit.as_millis() as u64,
                    "Outbound queue full, frame dropped"
                );
                return Delivery::TimedOut;
            }
        },
        None => outbound.send(frame).await,
    };

    match sent {
        Ok(()) => Delivery::Queued,
        Err(_) => {
            tracing::trace!(client_id = %client.id(), "Skipping closed client");
            Delivery::Closed
        }
    }
}

/// Deliver a frame to every client, one after another
pub async fn fan_out<'a, I>(clients: I, frame: &Bytes, timeout: Option<Duration>) -> FanoutReport
where
    I: IntoIterator<Item = &'a ClientHandle>,
{
    let mut report = FanoutReport::default();

    for client in clients {
        match deliver(client, frame.clone(), timeout).await {
            Delivery::Queued => report.queued += 1,
            Delivery::Closed => report.closed += 1,
            Delivery::TimedOut => report.timed_out += 1,
        }
    }

    report
}
