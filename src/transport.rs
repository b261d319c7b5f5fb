//! Conversation channel over a websocket, with reconnect-with-backoff.
//!
//! The socket lives in a background task ([`Transport::run`]). Callers hold a
//! cheap [`TransportHandle`] for sending and control, and consume the single
//! inbound [`TransportEvent`] stream returned by [`Transport::connect`]. There
//! is no outbound buffering across disconnects: whatever is sent while the
//! channel is not open is dropped.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::COOKIE, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::connection::{Connection, ConnectionState, ReconnectPolicy};
use crate::error::TransportError;
use crate::protocol::OutboundEvent;

const EVENT_BUFFER: usize = 100;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Anything the session can put outbound events on.
pub trait EventSink {
    /// Hand `event` to the channel. Returns `false` when it was dropped;
    /// `true` is not a delivery guarantee.
    fn send(&self, event: &OutboundEvent) -> bool;
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub address: Url,
    pub cookie: Option<String>,
    pub policy: ReconnectPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    State(ConnectionState),
    /// One raw inbound text frame, still undecoded.
    Frame(String),
}

#[derive(Debug)]
enum Control {
    Reconnect,
    Close,
}

#[derive(Debug, Clone)]
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<String>,
    control: mpsc::UnboundedSender<Control>,
    state: watch::Receiver<ConnectionState>,
}

impl TransportHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Reconnect now, resetting the retry budget. Also the way out of
    /// `GaveUp`.
    pub fn reconnect(&self) {
        if self.control.send(Control::Reconnect).is_err() {
            debug!("transport already stopped; reconnect ignored");
        }
    }

    pub fn close(&self) {
        if self.control.send(Control::Close).is_err() {
            debug!("transport already stopped");
        }
    }
}

impl EventSink for TransportHandle {
    fn send(&self, event: &OutboundEvent) -> bool {
        if !self.is_open() {
            debug!("channel not open; dropping {} event", event.kind());
            return false;
        }
        match event.to_frame() {
            Ok(frame) => self.outbound.send(frame).is_ok(),
            Err(err) => {
                error!("cannot encode {} event: {err}", event.kind());
                false
            }
        }
    }
}

enum Exit {
    Dropped,
    Reconnect,
    Closed,
}

/// Background half of the channel. Owns the socket and the [`Connection`].
pub struct Transport {
    config: TransportConfig,
    connection: Connection,
    outbound: mpsc::UnboundedReceiver<String>,
    control: mpsc::UnboundedReceiver<Control>,
    state: watch::Sender<ConnectionState>,
    events: mpsc::Sender<TransportEvent>,
}

impl Transport {
    /// Build both halves without starting anything. Drive the worker with
    /// [`Transport::run`].
    pub fn new(
        config: TransportConfig,
    ) -> (TransportHandle, Transport, mpsc::Receiver<TransportEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        let connection = Connection::new(config.address.as_str(), config.policy);
        let handle = TransportHandle {
            outbound: outbound_tx,
            control: control_tx,
            state: state_rx,
        };
        let transport = Transport {
            config,
            connection,
            outbound: outbound_rx,
            control: control_rx,
            state: state_tx,
            events: events_tx,
        };
        (handle, transport, events_rx)
    }

    /// Spawn the worker on the current tokio runtime.
    pub fn connect(config: TransportConfig) -> (TransportHandle, mpsc::Receiver<TransportEvent>) {
        let (handle, transport, events) = Transport::new(config);
        tokio::spawn(transport.run());
        (handle, events)
    }

    pub async fn run(mut self) {
        info!("channel {} starting", self.connection.address());
        loop {
            let state = self.connection.on_connecting();
            self.publish(state).await;
            self.discard_queued();

            let exit = match self.open().await {
                Ok(mut socket) => {
                    if self.close_requested() {
                        if let Err(err) = socket.close(None).await {
                            debug!("close frame not sent: {err}");
                        }
                        Exit::Closed
                    } else {
                        info!("channel {} open", self.connection.address());
                        let state = self.connection.on_open();
                        self.publish(state).await;
                        self.pump(socket).await
                    }
                }
                Err(err) => {
                    warn!("connect to {} failed: {err}", self.connection.address());
                    Exit::Dropped
                }
            };

            match exit {
                Exit::Closed => break,
                Exit::Reconnect => {
                    self.connection.on_manual_reconnect();
                    continue;
                }
                Exit::Dropped => {}
            }

            match self.connection.on_unexpected_close() {
                Some(delay) => {
                    self.publish(self.connection.state()).await;
                    info!(
                        "reconnecting in {delay:?} (attempt {})",
                        self.connection.attempts()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        control = self.control.recv() => match control {
                            Some(Control::Reconnect) => {
                                self.connection.on_manual_reconnect();
                            }
                            Some(Control::Close) | None => break,
                        },
                    }
                }
                None => {
                    warn!(
                        "giving up on {} after {} attempts",
                        self.connection.address(),
                        self.connection.attempts()
                    );
                    self.publish(ConnectionState::GaveUp).await;
                    match self.control.recv().await {
                        Some(Control::Reconnect) => {
                            self.connection.on_manual_reconnect();
                        }
                        Some(Control::Close) | None => break,
                    }
                }
            }
        }
        let state = self.connection.on_close();
        self.publish(state).await;
        info!("channel {} closed", self.connection.address());
    }

    async fn open(&self) -> Result<Socket, TransportError> {
        let mut request = self.config.address.as_str().into_client_request()?;
        if let Some(cookie) = &self.config.cookie {
            let value = HeaderValue::from_str(cookie).map_err(|_| {
                TransportError::Address("session cookie is not a valid header value".to_string())
            })?;
            request.headers_mut().insert(COOKIE, value);
        }
        let (socket, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| TransportError::Timeout(CONNECT_TIMEOUT))??;
        Ok(socket)
    }

    async fn pump(&mut self, socket: Socket) -> Exit {
        let (mut sink, mut stream) = socket.split();
        let exit = loop {
            tokio::select! {
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(frame))) => {
                        if self.events.send(TransportEvent::Frame(frame)).await.is_err() {
                            debug!("no one is listening; closing channel");
                            break Exit::Closed;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("server closed channel: {frame:?}");
                        return Exit::Dropped;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("channel error: {err}");
                        return Exit::Dropped;
                    }
                    None => return Exit::Dropped,
                },
                outgoing = self.outbound.recv() => match outgoing {
                    Some(frame) => {
                        if let Err(err) = sink.send(Message::Text(frame)).await {
                            warn!("send failed: {err}");
                            return Exit::Dropped;
                        }
                    }
                    None => break Exit::Closed,
                },
                control = self.control.recv() => match control {
                    Some(Control::Reconnect) => break Exit::Reconnect,
                    Some(Control::Close) | None => break Exit::Closed,
                },
            }
        };
        if let Err(err) = sink.send(Message::Close(None)).await {
            debug!("close frame not sent: {err}");
        }
        exit
    }

    /// Consume controls that arrived while connecting. A reconnect is already
    /// satisfied by the socket that just opened; only a close still matters.
    fn close_requested(&mut self) -> bool {
        let mut close = false;
        while let Ok(control) = self.control.try_recv() {
            match control {
                Control::Reconnect => debug!("reconnect requested while connecting; ignored"),
                Control::Close => close = true,
            }
        }
        close
    }

    fn discard_queued(&mut self) {
        while let Ok(frame) = self.outbound.try_recv() {
            debug!("dropping frame queued while disconnected: {frame}");
        }
    }

    async fn publish(&self, state: ConnectionState) {
        self.state.send_replace(state);
        if self.events.send(TransportEvent::State(state)).await.is_err() {
            debug!("state {state:?} not delivered; receiver gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn config(port: u16, max_attempts: u32) -> TransportConfig {
        TransportConfig {
            address: Url::parse(&format!("ws://127.0.0.1:{port}/ws/chat/12/")).unwrap(),
            cookie: Some("sessionid=abc".to_string()),
            policy: ReconnectPolicy::new(Duration::from_millis(10), max_attempts),
        }
    }

    async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("transport stopped")
    }

    async fn next_state(events: &mut mpsc::Receiver<TransportEvent>) -> ConnectionState {
        loop {
            if let TransportEvent::State(state) = next_event(events).await {
                return state;
            }
        }
    }

    async fn wait_for(events: &mut mpsc::Receiver<TransportEvent>, wanted: ConnectionState) {
        while next_state(events).await != wanted {}
    }

    #[tokio::test]
    async fn test_exchange_frames_when_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = accept_async(stream).await.unwrap();
            socket
                .send(Message::Text(r#"{"type":"status","username":"bob","is_online":true}"#.into()))
                .await
                .unwrap();
            loop {
                match socket.next().await {
                    Some(Ok(Message::Text(frame))) => return frame,
                    Some(Ok(_)) => continue,
                    other => panic!("client went away: {other:?}"),
                }
            }
        });

        let (handle, mut events) = Transport::connect(config(port, 3));
        assert!(!handle.send(&OutboundEvent::Message {
            content: "too early".into()
        }));
        wait_for(&mut events, ConnectionState::Open).await;
        assert!(handle.is_open());

        match next_event(&mut events).await {
            TransportEvent::Frame(frame) => assert!(frame.contains("\"status\"")),
            other => panic!("expected a frame, got {other:?}"),
        }

        assert!(handle.send(&OutboundEvent::Typing { is_typing: true }));
        let received = tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
        assert_eq!(received, r#"{"type":"typing","is_typing":true}"#);

        handle.close();
        wait_for(&mut events, ConnectionState::Closed).await;
    }

    #[tokio::test]
    async fn test_reconnect_during_connect_keeps_the_new_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = accept_async(stream).await.unwrap();
            socket
                .send(Message::Text(r#"{"type":"status","username":"bob","is_online":true}"#.into()))
                .await
                .unwrap();
            while socket.next().await.is_some() {}
        });

        let (handle, mut events) = Transport::connect(config(port, 3));
        handle.reconnect();
        wait_for(&mut events, ConnectionState::Open).await;
        match next_event(&mut events).await {
            TransportEvent::Frame(frame) => assert!(frame.contains("\"status\"")),
            other => panic!("socket was dropped after opening: {other:?}"),
        }
        assert!(handle.is_open());

        handle.close();
        wait_for(&mut events, ConnectionState::Closed).await;
    }

    #[tokio::test]
    async fn test_reconnects_after_server_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let socket = accept_async(stream).await.unwrap();
            drop(socket);
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = accept_async(stream).await.unwrap();
            while socket.next().await.is_some() {}
        });

        let (handle, mut events) = Transport::connect(config(port, 3));
        wait_for(&mut events, ConnectionState::Open).await;
        assert_eq!(
            next_state(&mut events).await,
            ConnectionState::Reconnecting { attempt: 1 }
        );
        wait_for(&mut events, ConnectionState::Open).await;
        handle.close();
        wait_for(&mut events, ConnectionState::Closed).await;
    }

    #[tokio::test]
    async fn test_gives_up_then_manual_reconnect() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let (handle, mut events) = Transport::connect(config(port, 2));
        let mut seen = Vec::new();
        loop {
            let state = next_state(&mut events).await;
            seen.push(state);
            if state == ConnectionState::GaveUp {
                break;
            }
        }
        assert_eq!(
            seen,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Reconnecting { attempt: 1 },
                ConnectionState::Connecting,
                ConnectionState::Reconnecting { attempt: 2 },
                ConnectionState::Connecting,
                ConnectionState::GaveUp,
            ]
        );
        assert_eq!(handle.state(), ConnectionState::GaveUp);
        assert!(!handle.send(&OutboundEvent::Delete { message_id: 1 }));

        handle.reconnect();
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(
            next_state(&mut events).await,
            ConnectionState::Reconnecting { attempt: 1 }
        );
        handle.close();
        wait_for(&mut events, ConnectionState::Closed).await;
    }
}
