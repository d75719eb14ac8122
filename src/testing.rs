//! Helpers shared by unit tests

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::protocol::{Action, Message};

/// Wait for the next frame on an outbound queue and decode it
pub(crate) async fn next_message(rx: &mut mpsc::Receiver<Bytes>) -> Message {
    let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("outbound queue closed");
    Message::decode(&frame).expect("frame is not a message")
}

/// Assert nothing is waiting on an outbound queue
pub(crate) fn assert_no_message(rx: &mut mpsc::Receiver<Bytes>) {
    if let Ok(frame) = rx.try_recv() {
        panic!("unexpected frame: {}", String::from_utf8_lossy(&frame));
    }
}

/// Skip frames until one carries `action`
pub(crate) async fn next_of(rx: &mut mpsc::Receiver<Bytes>, action: Action) -> Message {
    loop {
        let message = next_message(rx).await;
        if message.action == action {
            return message;
        }
    }
}
