//! Reader and writer duties
//!
//! A [`Connection`] bridges one WebSocket to a [`ClientSession`]. The reader
//! runs on the connection's own task and feeds the session; the writer runs
//! on a spawned task and drains the outbound queue into the socket.
//!
//! Both halves share the session's cancellation token. Whichever side fails
//! first cancels it, the reader then runs the session's disconnect and the
//! writer closes the outbound queue so nothing can be enqueued afterwards.
//!
//! The duties are generic over `Stream`/`Sink` of WebSocket messages, so they
//! run unchanged over a `tokio-tungstenite` stream or in-memory channels.

use std::fmt::Display;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::protocol::constants::FRAME_SEPARATOR;
use crate::server::{HubHandler, ServerConfig};
use crate::stats::{SessionStats, WriterStats};

use super::{ClientQueues, ClientSession, ClientSignal};

/// Why the reader stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    /// The peer sent a close frame or ended the stream
    PeerClosed,
    /// Nothing arrived within the pong wait
    IdleTimeout,
    /// The transport reported an error
    TransportError,
    /// The writer stopped first
    Shutdown,
}

/// Timings used by the writer
#[derive(Debug, Clone, Copy)]
pub(crate) struct WriterTiming {
    pub write_wait: Duration,
    pub ping_period: Duration,
    pub max_batch: usize,
}

impl From<&ServerConfig> for WriterTiming {
    fn from(config: &ServerConfig) -> Self {
        Self {
            write_wait: config.write_wait,
            ping_period: config.ping_period,
            max_batch: config.send_queue_capacity.max(1),
        }
    }
}

/// One client connection, ready to run
pub struct Connection<H: HubHandler> {
    session: ClientSession<H>,
    queues: ClientQueues,
    config: ServerConfig,
}

impl<H: HubHandler> Connection<H> {
    pub fn new(session: ClientSession<H>, queues: ClientQueues, config: ServerConfig) -> Self {
        Self {
            session,
            queues,
            config,
        }
    }

    /// Serve the connection until either side ends it
    ///
    /// Registers the client with the hub, runs the reader on the current
    /// task and the writer on a spawned one, and disconnects the session
    /// exactly once before returning.
    pub async fn run<St, Si, E>(self, stream: St, sink: Si) -> (SessionStats, WriterStats)
    where
        St: Stream<Item = Result<WsMessage, E>> + Unpin,
        E: Display,
        Si: Sink<WsMessage> + Unpin + Send + 'static,
        Si::Error: Display,
    {
        let Self {
            mut session,
            queues,
            config,
        } = self;
        let ClientQueues {
            outbound,
            mut control,
        } = queues;

        let shutdown = session.shutdown_token();
        let writer = tokio::spawn(write_loop(
            sink,
            outbound,
            shutdown.clone(),
            WriterTiming::from(&config),
        ));

        session.connect().await;
        let end = read_loop(&mut session, stream, &mut control, &shutdown, config.pong_wait).await;
        session.disconnect().await;

        let writer_stats = match writer.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(client_id = %session.id(), error = %e, "Writer task failed");
                WriterStats::default()
            }
        };
        let session_stats = session.stats();

        tracing::info!(
            client_id = %session.id(),
            reason = ?end,
            frames_received = session_stats.frames_received,
            frames_written = writer_stats.frames_written,
            messages_written = writer_stats.messages_written,
            pings_sent = writer_stats.pings_sent,
            duration_secs = session_stats.duration.as_secs(),
            "Connection closed"
        );

        (session_stats, writer_stats)
    }
}

/// Feed inbound frames and peer signals to the session
///
/// Every inbound frame, including pings and pongs, restarts the read
/// deadline.
pub(crate) async fn read_loop<H, St, E>(
    session: &mut ClientSession<H>,
    mut stream: St,
    control: &mut mpsc::Receiver<ClientSignal>,
    shutdown: &CancellationToken,
    pong_wait: Duration,
) -> ReadEnd
where
    H: HubHandler,
    St: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + pong_wait;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return ReadEnd::Shutdown,

            Some(signal) = control.recv() => session.handle_signal(signal).await,

            next = tokio::time::timeout_at(deadline, stream.next()) => {
                let frame = match next {
                    Err(_) => {
                        tracing::debug!(client_id = %session.id(), "Read deadline expired");
                        return ReadEnd::IdleTimeout;
                    }
                    Ok(None) => return ReadEnd::PeerClosed,
                    Ok(Some(Err(e))) => {
                        tracing::debug!(client_id = %session.id(), error = %e, "Read failed");
                        return ReadEnd::TransportError;
                    }
                    Ok(Some(Ok(frame))) => frame,
                };

                session.record_frame();
                deadline = Instant::now() + pong_wait;

                match frame {
                    WsMessage::Text(text) => session.handle_frame(text.as_bytes()).await,
                    WsMessage::Binary(data) => session.handle_frame(&data).await,
                    WsMessage::Close(_) => return ReadEnd::PeerClosed,
                    WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
                }
            }
        }
    }
}

/// Drain the outbound queue into the sink and keep the peer alive
///
/// Stops on shutdown, when the queue closes, or on the first failed or
/// timed-out write. On exit the queue is closed and shutdown is cancelled.
pub(crate) async fn write_loop<Si>(
    mut sink: Si,
    mut outbound: mpsc::Receiver<Bytes>,
    shutdown: CancellationToken,
    timing: WriterTiming,
) -> WriterStats
where
    Si: Sink<WsMessage> + Unpin,
    Si::Error: Display,
{
    let mut stats = WriterStats::new();
    let mut ping = tokio::time::interval_at(Instant::now() + timing.ping_period, timing.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            frame = outbound.recv() => {
                let Some(first) = frame else { break };
                let (payload, count) = coalesce(first, &mut outbound, timing.max_batch);
                let len = payload.len() as u64;

                if !write(&mut sink, WsMessage::Text(payload), timing.write_wait).await {
                    break;
                }
                stats.frames_written += 1;
                stats.messages_written += count;
                stats.bytes_written += len;
            }

            _ = ping.tick() => {
                if !write(&mut sink, WsMessage::Ping(Vec::new()), timing.write_wait).await {
                    break;
                }
                stats.pings_sent += 1;
            }
        }
    }

    outbound.close();
    shutdown.cancel();

    // Best effort: the peer may already be gone
    let _ = tokio::time::timeout(timing.write_wait, sink.send(WsMessage::Close(None))).await;
    let _ = tokio::time::timeout(timing.write_wait, sink.close()).await;

    stats
}

/// Join `first` with whatever is already queued, up to `max_batch` messages
fn coalesce(first: Bytes, outbound: &mut mpsc::Receiver<Bytes>, max_batch: usize) -> (String, u64) {
    let mut buf = Vec::with_capacity(first.len());
    buf.extend_from_slice(&first);
    let mut count = 1u64;

    while (count as usize) < max_batch {
        match outbound.try_recv() {
            Ok(next) => {
                buf.push(FRAME_SEPARATOR);
                buf.extend_from_slice(&next);
                count += 1;
            }
            Err(_) => break,
        }
    }

    (String::from_utf8_lossy(&buf).into_owned(), count)
}

async fn write<Si>(sink: &mut Si, message: WsMessage, write_wait: Duration) -> bool
where
    Si: Sink<WsMessage> + Unpin,
    Si::Error: Display,
{
    match tokio::time::timeout(write_wait, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Write failed");
            false
        }
        Err(_) => {
            tracing::warn!(timeout_ms = write_wait.as_millis() as u64, "Write timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use tokio_stream::wrappers::ReceiverStream;
    use tokio_util::sync::PollSender;

    use super::*;
    use crate::client::ClientHandle;
    use crate::hub::{Hub, HubConfig};
    use crate::protocol::{Action, Message};
    use crate::server::DefaultHandler;

    type Inbound = mpsc::Sender<Result<WsMessage, io::Error>>;
    type Outbound = mpsc::Receiver<WsMessage>;

    fn timing() -> WriterTiming {
        WriterTiming {
            write_wait: Duration::from_secs(1),
            ping_period: Duration::from_secs(30),
            max_batch: 16,
        }
    }

    fn text(frame: WsMessage) -> String {
        match frame {
            WsMessage::Text(text) => text,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    /// Start a full connection over in-memory channels
    fn spawn_connection(
        hub: &Hub,
        name: &str,
        config: ServerConfig,
    ) -> (
        ClientHandle,
        Inbound,
        Outbound,
        tokio::task::JoinHandle<(SessionStats, WriterStats)>,
    ) {
        let (client, queues) = ClientHandle::new(
            Some(name.to_string()),
            config.send_queue_capacity,
            config.control_queue_capacity,
        );
        let session = ClientSession::new(client.clone(), hub.clone(), Arc::new(DefaultHandler));

        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(16);
        let connection = Connection::new(session, queues, config);
        let task = tokio::spawn(connection.run(ReceiverStream::new(in_rx), PollSender::new(out_tx)));

        (client, in_tx, out_rx, task)
    }

    /// Read frames until one decodes to `action`
    async fn expect_action(out: &mut Outbound, action: Action) -> Message {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), out.recv())
                .await
                .expect("timed out waiting for a frame")
                .expect("sink closed");
            if let WsMessage::Text(text) = frame {
                for line in text.split('\n') {
                    let message = Message::decode(line.as_bytes()).unwrap();
                    if message.action == action {
                        return message;
                    }
                }
            }
        }
    }

    fn request(action: Action, name: &str) -> Result<WsMessage, io::Error> {
        Ok(WsMessage::Text(
            String::from_utf8(Message::new(action).with_name(name).encode().to_vec()).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_writer_coalesces_queued_frames() {
        let (tx, rx) = mpsc::channel(16);
        for payload in ["one", "two", "three"] {
            tx.send(Bytes::from(payload)).await.unwrap();
        }
        let (sink_tx, mut sink_rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();

        let writer = tokio::spawn(write_loop(
            PollSender::new(sink_tx),
            rx,
            shutdown.clone(),
            timing(),
        ));

        assert_eq!(text(sink_rx.recv().await.unwrap()), "one\ntwo\nthree");

        shutdown.cancel();
        let stats = writer.await.unwrap();
        assert_eq!(stats.frames_written, 1);
        assert_eq!(stats.messages_written, 3);
        assert_eq!(stats.coalesced(), 2);

        assert!(matches!(sink_rx.recv().await, Some(WsMessage::Close(None))));
        assert!(sink_rx.recv().await.is_none());
        assert!(tx.send(Bytes::from("late")).await.is_err());
    }

    #[tokio::test]
    async fn test_coalesce_respects_batch_limit() {
        let (tx, mut rx) = mpsc::channel(8);
        for i in 0..5 {
            tx.send(Bytes::from(i.to_string())).await.unwrap();
        }
        let first = rx.recv().await.unwrap();

        let (payload, count) = coalesce(first, &mut rx, 3);
        assert_eq!(payload, "0\n1\n2");
        assert_eq!(count, 3);
        assert_eq!(rx.try_recv().unwrap(), "3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_writer_pings_on_interval() {
        let (_tx, rx) = mpsc::channel::<Bytes>(4);
        let (sink_tx, mut sink_rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let timing = WriterTiming {
            ping_period: Duration::from_secs(2),
            ..timing()
        };

        let writer = tokio::spawn(write_loop(PollSender::new(sink_tx), rx, shutdown.clone(), timing));

        assert!(matches!(sink_rx.recv().await, Some(WsMessage::Ping(_))));
        assert!(matches!(sink_rx.recv().await, Some(WsMessage::Ping(_))));

        shutdown.cancel();
        assert_eq!(writer.await.unwrap().pings_sent, 2);
    }

    #[tokio::test]
    async fn test_failed_write_cancels_shutdown() {
        let (tx, rx) = mpsc::channel(4);
        let (sink_tx, sink_rx) = mpsc::channel(4);
        drop(sink_rx);
        let shutdown = CancellationToken::new();

        let writer = tokio::spawn(write_loop(
            PollSender::new(sink_tx),
            rx,
            shutdown.clone(),
            timing(),
        ));
        tx.send(Bytes::from("lost")).await.unwrap();

        let stats = writer.await.unwrap();
        assert_eq!(stats.frames_written, 0);
        assert!(shutdown.is_cancelled());
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_connection_round_trip_and_close() {
        let hub = Hub::spawn(HubConfig::default());
        let (client, inbound, mut outbound, task) =
            spawn_connection(&hub, "alice", ServerConfig::default());

        inbound.send(request(Action::JoinChannel, "general")).await.unwrap();
        inbound.send(Ok(WsMessage::Ping(Vec::new()))).await.unwrap();
        inbound.send(Ok(WsMessage::Text("garbage".into()))).await.unwrap();

        let joined = expect_action(&mut outbound, Action::ChannelJoined).await;
        assert_eq!(joined.name, "general");

        inbound.send(Ok(WsMessage::Close(None))).await.unwrap();
        let (session_stats, _) = task.await.unwrap();

        assert_eq!(session_stats.frames_received, 4);
        assert_eq!(session_stats.decode_errors, 1);
        assert!(hub.find_client_by_id(client.id()).await.is_none());
        let channel = hub.find_channel_by_name("general").await.unwrap();
        assert!(channel.members().await.is_empty());
        assert!(client.is_closed());
        assert!(!client.send(Bytes::from("late")).await);
    }

    #[tokio::test]
    async fn test_peer_sees_private_message() {
        let hub = Hub::spawn(HubConfig::default());
        let (alice, alice_in, mut alice_out, _alice_task) =
            spawn_connection(&hub, "alice", ServerConfig::default());
        let (bob, bob_in, mut bob_out, bob_task) =
            spawn_connection(&hub, "bob", ServerConfig::default());

        // alice learns about bob once both are online
        let presence = expect_action(&mut alice_out, Action::MemberAdded).await;
        assert_eq!(presence.sender.unwrap().id, bob.id());

        let open = Message::new(Action::JoinChannelPrivate).with_data(bob.id().to_string());
        alice_in
            .send(Ok(WsMessage::Text(String::from_utf8(open.encode().to_vec()).unwrap())))
            .await
            .unwrap();

        let name = expect_action(&mut alice_out, Action::ChannelJoined).await.name;
        assert_eq!(expect_action(&mut bob_out, Action::ChannelJoined).await.name, name);

        let send = Message::new(Action::SendMessage).with_name(&name).with_data("hi bob");
        alice_in
            .send(Ok(WsMessage::Text(String::from_utf8(send.encode().to_vec()).unwrap())))
            .await
            .unwrap();

        let received = expect_action(&mut bob_out, Action::SendMessage).await;
        assert_eq!(received.data, "hi bob");
        assert_eq!(received.sender.unwrap().id, alice.id());

        // bob drops; alice sees him leave the hub (and, anonymously, the
        // private channel, in either order)
        drop(bob_in);
        bob_task.await.unwrap();
        let left = loop {
            let removed = expect_action(&mut alice_out, Action::MemberRemoved).await;
            if removed.target.is_none() {
                break removed;
            }
            assert!(removed.sender.is_none());
        };
        assert_eq!(left.sender.unwrap().id, bob.id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out() {
        let hub = Hub::spawn(HubConfig::default());
        let config = ServerConfig::default().pong_wait(Duration::from_secs(3));
        let (client, _inbound, _outbound, task) = spawn_connection(&hub, "quiet", config);

        let (session_stats, writer_stats) = task.await.unwrap();
        assert_eq!(session_stats.frames_received, 0);
        assert!(writer_stats.pings_sent >= 1);
        assert!(hub.find_client_by_id(client.id()).await.is_none());
    }
}
