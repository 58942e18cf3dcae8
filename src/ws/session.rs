//! Connecting → Active → Closing → Closed for one websocket.
//!
//! The inbound loop runs on the caller's task and the outbound loop on a
//! spawned one. They share nothing but the connection's queue and the
//! registry. Whichever loop stops first unregisters the connection, which
//! closes the queue (ending the writer) and cancels the connection (ending
//! the reader).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::db::UserId;
use crate::error::{ChatError, ChatResult};

use super::event::{ClientEvent, ServerEvent};
use super::registry::{Connection, Outbound};
use super::{Hub, SessionSettings};

/// Registers an authenticated transport and serves it until disconnect.
pub async fn run_session<S, SE, R, RE>(hub: Hub, user_id: UserId, sink: S, stream: R)
where
    S: Sink<Message, Error = SE> + Unpin + Send + 'static,
    SE: fmt::Display + Send + 'static,
    R: Stream<Item = Result<Message, RE>> + Unpin + Send,
    RE: fmt::Display,
{
    let registry = Arc::clone(hub.broadcaster.registry());
    let (connection, queue) = Connection::new(
        registry.next_connection_id(),
        user_id,
        hub.settings.queue_capacity,
    );
    if let Err(error) = registry.register(Arc::clone(&connection)) {
        warn!(%error, "refusing connection");
        return;
    }

    let span = info_span!("connection", conn_id = %connection.id(), user_id = connection.user_id());

    let writer = tokio::spawn({
        let registry = Arc::clone(&registry);
        let id = connection.id();
        let settings = hub.settings.clone();
        async move {
            let result = write_loop(sink, queue, &settings).await;
            registry.unregister(id);
            result
        }
        .instrument(span.clone())
    });

    let read_result = read_loop(stream, &connection, &hub).instrument(span.clone()).await;
    registry.unregister(connection.id());

    let write_result = match writer.await {
        Ok(result) => result,
        Err(error) => Err(ChatError::Transport(format!("writer task failed: {error}"))),
    };

    span.in_scope(|| match (read_result, write_result) {
        (Ok(()), Ok(())) => info!("connection closed"),
        (Err(error), _) | (_, Err(error)) => info!(%error, "connection closed"),
    });
}

async fn read_loop<R, RE>(mut stream: R, connection: &Connection, hub: &Hub) -> ChatResult<()>
where
    R: Stream<Item = Result<Message, RE>> + Unpin,
    RE: fmt::Display,
{
    loop {
        let next = tokio::select! {
            _ = connection.closed() => return Ok(()),
            next = time::timeout(hub.settings.pong_wait, stream.next()) => next,
        };

        let message = match next {
            Err(_) => return Err(ChatError::Transport("read deadline elapsed".to_owned())),
            Ok(None) => return Ok(()),
            Ok(Some(Err(error))) => return Err(ChatError::Transport(error.to_string())),
            Ok(Some(Ok(message))) => message,
        };

        let handled = match message {
            Message::Text(text) => handle_frame(text.as_str().as_bytes(), connection, hub).await,
            Message::Binary(data) => handle_frame(&data, connection, hub).await,
            Message::Close(_) => return Ok(()),
            // any traffic, pongs included, has already refreshed the deadline
            Message::Ping(_) | Message::Pong(_) => Ok(()),
        };
        match handled {
            Err(error) if error.is_fatal_to_connection() => return Err(error),
            Err(error) => debug!(%error, "inbound frame ignored"),
            Ok(()) => {}
        }
    }
}

/// Malformed frames come back as `ChatError::Malformed` and leave the
/// connection open; a reply that cannot be queued is fatal.
async fn handle_frame(frame: &[u8], connection: &Connection, hub: &Hub) -> ChatResult<()> {
    let event = ClientEvent::decode(frame)?;

    let registry = hub.broadcaster.registry();
    let reply = match event {
        ClientEvent::Subscribe { room_id } => match subscribe(connection, &room_id, hub).await {
            Ok(()) => ServerEvent::Subscribed { room_id },
            Err(error) => {
                warn!(room_id = %room_id, %error, "subscribe failed");
                ServerEvent::error("Failed to subscribe to room")
            }
        },
        ClientEvent::Unsubscribe { room_id } => match registry.unsubscribe(connection.id(), &room_id) {
            Ok(()) => ServerEvent::Unsubscribed { room_id },
            Err(error) => {
                warn!(room_id = %room_id, %error, "unsubscribe failed");
                ServerEvent::error("Failed to unsubscribe from room")
            }
        },
        ClientEvent::Ping => ServerEvent::pong_now(),
    };

    if !hub.broadcaster.send_to(connection, &reply) {
        return Err(ChatError::Transport("reply could not be queued".to_owned()));
    }
    Ok(())
}

/// Only members of a room may listen to it.
async fn subscribe(connection: &Connection, room_id: &str, hub: &Hub) -> ChatResult<()> {
    let members = hub.store.room_members(room_id).await?;
    if !members.contains(connection.user_id()) {
        return Err(ChatError::Forbidden(format!(
            "{} is not a member of {room_id}",
            connection.user_id()
        )));
    }
    hub.broadcaster.registry().subscribe(connection.id(), room_id)
}

async fn write_loop<S, SE>(
    mut sink: S,
    mut queue: mpsc::Receiver<Outbound>,
    settings: &SessionSettings,
) -> ChatResult<()>
where
    S: Sink<Message, Error = SE> + Unpin,
    SE: fmt::Display,
{
    let mut keepalive = time::interval_at(Instant::now() + settings.ping_interval, settings.ping_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            item = queue.recv() => {
                let Some(first) = item else {
                    // queue closed: teardown is underway
                    let _ = send_within(&mut sink, Message::Close(None), settings.write_wait).await;
                    return Ok(());
                };
                let frame = coalesce(first, &mut queue);
                send_within(&mut sink, Message::Text(frame.into()), settings.write_wait).await?;
                keepalive.reset();
            }
            _ = keepalive.tick() => {
                send_within(&mut sink, Message::Ping(Bytes::new()), settings.write_wait).await?;
            }
        }
    }
}

/// Joins `first` with everything already waiting in the queue, one event per
/// line, so a burst costs one frame.
fn coalesce(first: Outbound, queue: &mut mpsc::Receiver<Outbound>) -> String {
    let mut frame = String::from(&*first);
    while let Ok(next) = queue.try_recv() {
        frame.push('\n');
        frame.push_str(&next);
    }
    frame
}

async fn send_within<S, SE>(sink: &mut S, message: Message, deadline: Duration) -> ChatResult<()>
where
    S: Sink<Message, Error = SE> + Unpin,
    SE: fmt::Display,
{
    match time::timeout(deadline, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(ChatError::Transport(error.to_string())),
        Err(_) => Err(ChatError::Transport("write deadline elapsed".to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use futures_util::stream;
    use serde_json::Value;
    use ::time::OffsetDateTime;
    use tokio::task::JoinHandle;
    use tokio_util::sync::PollSender;

    use super::*;
    use crate::db::{ChatStore, InMemoryStore, Room, RoomKind};
    use crate::ws::Broadcaster;

    struct Client {
        inbound: mpsc::Sender<Result<Message, String>>,
        outbound: mpsc::Receiver<Message>,
        task: JoinHandle<()>,
    }

    impl Client {
        async fn send_json(&self, json: &str) {
            self.inbound
                .send(Ok(Message::Text(json.to_owned().into())))
                .await
                .unwrap();
        }

        /// Next text event, skipping keepalive pings.
        async fn next_event(&mut self) -> Value {
            loop {
                match self.outbound.recv().await.unwrap() {
                    Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                    Message::Ping(_) => continue,
                    other => panic!("unexpected frame {other:?}"),
                }
            }
        }
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            queue_capacity: 8,
            ping_interval: Duration::from_secs(5),
            pong_wait: Duration::from_secs(8),
            write_wait: Duration::from_secs(1),
            max_message_bytes: 512,
        }
    }

    async fn hub() -> Hub {
        let store = InMemoryStore::new();
        let members: BTreeSet<String> = ["alice", "bob"].iter().map(|u| u.to_string()).collect();
        let room = Room {
            id: "r1".to_owned(),
            name: "lobby".to_owned(),
            kind: RoomKind::Group,
            created_at: OffsetDateTime::now_utc(),
        };
        store.create_room(&room, &members).await.unwrap();
        Hub {
            broadcaster: Broadcaster::default(),
            store: Arc::new(store),
            settings: settings(),
        }
    }

    fn connect(hub: &Hub, user: &str) -> Client {
        connect_with_buffer(hub, user, 16)
    }

    /// `buffer` bounds the frames the fake socket holds before sends stall.
    fn connect_with_buffer(hub: &Hub, user: &str, buffer: usize) -> Client {
        let (inbound, in_rx) = mpsc::channel(16);
        let (out_tx, outbound) = mpsc::channel(buffer);
        let stream = Box::pin(stream::unfold(in_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }));
        let task = tokio::spawn(run_session(hub.clone(), user.to_owned(), PollSender::new(out_tx), stream));
        Client { inbound, outbound, task }
    }

    #[tokio::test]
    async fn subscribe_then_receive_room_traffic() {
        let hub = hub().await;
        let mut alice = connect(&hub, "alice");

        alice.send_json(r#"{"type":"subscribe","content":"r1"}"#).await;
        let reply = alice.next_event().await;
        assert_eq!(reply["type"], "subscribed");
        assert_eq!(reply["content"]["room_id"], "r1");
        assert_eq!(hub.broadcaster.registry().room_subscriber_count("r1"), 1);

        hub.broadcaster.broadcast("r1", &ServerEvent::error("hello room"), None);
        let event = alice.next_event().await;
        assert_eq!(event["content"]["message"], "hello room");

        alice.send_json(r#"{"type":"unsubscribe","content":"r1"}"#).await;
        assert_eq!(alice.next_event().await["type"], "unsubscribed");
        assert_eq!(hub.broadcaster.registry().room_count(), 0);
    }

    #[tokio::test]
    async fn non_members_cannot_subscribe() {
        let hub = hub().await;
        let mut mallory = connect(&hub, "mallory");

        mallory.send_json(r#"{"type":"subscribe","content":"r1"}"#).await;
        let reply = mallory.next_event().await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["content"]["message"], "Failed to subscribe to room");
        assert_eq!(hub.broadcaster.registry().room_subscriber_count("r1"), 0);
    }

    #[tokio::test]
    async fn bad_frames_are_ignored_without_closing() {
        let hub = hub().await;
        let mut alice = connect(&hub, "alice");

        alice.send_json("{{{ nope").await;
        alice.send_json(r#"{"type":"dance"}"#).await;
        alice.send_json(r#"{"type":"ping"}"#).await;

        // the first reply is the pong: nothing was sent for the bad frames
        let reply = alice.next_event().await;
        assert_eq!(reply["type"], "pong");
        assert_eq!(hub.broadcaster.registry().connection_count(), 1);
    }

    #[tokio::test]
    async fn binary_frames_are_decoded_too() {
        let hub = hub().await;
        let mut alice = connect(&hub, "alice");

        alice
            .inbound
            .send(Ok(Message::Binary(Bytes::from_static(br#"{"type":"ping"}"#))))
            .await
            .unwrap();
        assert_eq!(alice.next_event().await["type"], "pong");
    }

    #[tokio::test]
    async fn client_hangup_unregisters() {
        let hub = hub().await;
        let mut alice = connect(&hub, "alice");
        alice.send_json(r#"{"type":"subscribe","content":"r1"}"#).await;
        alice.next_event().await;

        drop(alice.inbound);
        alice.task.await.unwrap();

        assert_eq!(hub.broadcaster.registry().connection_count(), 0);
        assert_eq!(hub.broadcaster.registry().room_count(), 0);
    }

    #[tokio::test]
    async fn read_error_tears_down() {
        let hub = hub().await;
        let alice = connect(&hub, "alice");

        alice.inbound.send(Err("connection reset".to_owned())).await.unwrap();
        alice.task.await.unwrap();

        assert_eq!(hub.broadcaster.registry().connection_count(), 0);
    }

    #[tokio::test]
    async fn external_unregister_sends_close_and_ends_session() {
        let hub = hub().await;
        let mut alice = connect(&hub, "alice");
        alice.send_json(r#"{"type":"subscribe","content":"r1"}"#).await;
        alice.next_event().await;

        let registry = hub.broadcaster.registry();
        let connection = registry.subscribers_of("r1").pop().unwrap();
        registry.unregister(connection.id());

        assert!(matches!(alice.outbound.recv().await, Some(Message::Close(_))));
        alice.task.await.unwrap();
        assert!(connection.is_closed());
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn write_failure_tears_down() {
        let hub = hub().await;
        let alice = connect(&hub, "alice");
        alice.send_json(r#"{"type":"ping"}"#).await;
        drop(alice.outbound);
        // a second reply hits the dead sink if the first one did not
        let _ = alice
            .inbound
            .send(Ok(Message::Text(r#"{"type":"ping"}"#.into())))
            .await;

        alice.task.await.unwrap();
        assert_eq!(hub.broadcaster.registry().connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_hits_the_deadline() {
        let hub = hub().await;
        // the peer never reads, so the second frame cannot be written
        let alice = connect_with_buffer(&hub, "alice", 1);

        let started = Instant::now();
        for _ in 0..3 {
            alice.send_json(r#"{"type":"ping"}"#).await;
        }
        alice.task.await.unwrap();

        assert!(started.elapsed() >= settings().write_wait);
        // torn down by the writer, well before the read deadline
        assert!(started.elapsed() < settings().pong_wait);
        assert_eq!(hub.broadcaster.registry().connection_count(), 0);
        drop(alice.outbound);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_is_probed_then_dropped() {
        let hub = hub().await;
        let mut alice = connect(&hub, "alice");

        let started = Instant::now();
        assert!(matches!(alice.outbound.recv().await, Some(Message::Ping(_))));
        assert!(started.elapsed() >= settings().ping_interval);
        assert!(started.elapsed() < settings().pong_wait);

        // nobody acks, so the read deadline expires and the socket is closed
        assert!(matches!(alice.outbound.recv().await, Some(Message::Close(_))));
        assert!(started.elapsed() >= settings().pong_wait);
        alice.task.await.unwrap();
        assert_eq!(hub.broadcaster.registry().connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_traffic_refreshes_the_deadline() {
        let hub = hub().await;
        let mut alice = connect(&hub, "alice");

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(6)).await;
            alice.inbound.send(Ok(Message::Pong(Bytes::new()))).await.unwrap();
        }
        // 18s in, well past pong_wait, but still alive
        alice.send_json(r#"{"type":"ping"}"#).await;
        assert_eq!(alice.next_event().await["type"], "pong");
        assert_eq!(hub.broadcaster.registry().connection_count(), 1);
    }

    #[tokio::test]
    async fn queued_events_are_coalesced() {
        let (tx, mut rx) = mpsc::channel::<Outbound>(8);
        tx.send(Arc::from("b")).await.unwrap();
        tx.send(Arc::from("c")).await.unwrap();

        assert_eq!(coalesce(Arc::from("a"), &mut rx), "a\nb\nc");
        assert_eq!(coalesce(Arc::from("d"), &mut rx), "d");
    }
}
