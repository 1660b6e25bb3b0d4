//! Live client connections: one outbound stream per interactive session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::dispatch::EventHandler;
use crate::error::{ClientError, HandlerError};
use crate::events::{Event, OutboundMessage};

const RECV_POLL: Duration = Duration::from_millis(1);

/// Receiving end handed to the network layer.
pub struct ClientConnection {
    session_id: String,
    receiver: UnboundedReceiver<OutboundMessage>,
    peeked: Option<OutboundMessage>,
}

impl ClientConnection {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// `None` once the connection is closed and drained.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        if let Some(message) = self.peeked.take() {
            return Some(message);
        }
        self.receiver.recv().await
    }

    /// Blocking receive for callers outside any async runtime.
    pub fn blocking_recv(&mut self) -> Option<OutboundMessage> {
        if let Some(message) = self.peeked.take() {
            return Some(message);
        }
        self.receiver.blocking_recv()
    }

    /// Like [`blocking_recv`](Self::blocking_recv), giving up after `timeout`.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<OutboundMessage>, ClientError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.peeked.take() {
                return Ok(Some(message));
            }
            match self.receiver.try_recv() {
                Ok(message) => return Ok(Some(message)),
                Err(TryRecvError::Disconnected) => return Ok(None),
                Err(TryRecvError::Empty) if Instant::now() >= deadline => {
                    return Err(ClientError::TimedOut(timeout))
                }
                Err(TryRecvError::Empty) => std::thread::sleep(RECV_POLL),
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<OutboundMessage> {
        self.peeked
            .take()
            .or_else(|| self.receiver.try_recv().ok())
    }

    /// Everything already queued.
    pub fn drain(&mut self) -> Vec<OutboundMessage> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// True once the hub closed the connection and nothing is left to read.
    pub fn is_closed(&mut self) -> bool {
        if self.peeked.is_some() {
            return false;
        }
        match self.receiver.try_recv() {
            Ok(message) => {
                self.peeked = Some(message);
                false
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => true,
        }
    }
}

#[derive(Default)]
pub struct ClientHub {
    connections: Mutex<HashMap<String, UnboundedSender<OutboundMessage>>>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the session's live connection. A previous connection for the same
    /// session is closed.
    pub fn connect(&self, session_id: impl Into<String>) -> ClientConnection {
        let session_id = session_id.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        if self
            .connections
            .lock()
            .insert(session_id.clone(), sender)
            .is_some()
        {
            debug!(session_id = %session_id, "client connection replaced");
        }
        ClientConnection {
            session_id,
            receiver,
            peeked: None,
        }
    }

    pub fn disconnect(&self, session_id: &str) -> bool {
        self.connections.lock().remove(session_id).is_some()
    }

    pub fn is_connected(&self, session_id: &str) -> bool {
        self.connections.lock().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn deliver(&self, event: &Event) {
        let mut connections = self.connections.lock();
        let Some(sender) = connections.get(event.session_id()) else {
            debug!(
                session_id = %event.session_id(),
                event_type = %event.kind(),
                "no live connection; outbound message skipped"
            );
            return;
        };
        if sender.send(event.to_outbound()).is_err() {
            debug!(session_id = %event.session_id(), "client went away");
            connections.remove(event.session_id());
            return;
        }
        if event.is_terminal() {
            connections.remove(event.session_id());
        }
    }
}

/// Sends one outbound message per dispatched event, closing the connection
/// after the turn's terminal event.
pub struct ClientForwarder {
    hub: Arc<ClientHub>,
}

impl ClientForwarder {
    pub fn new(hub: Arc<ClientHub>) -> Self {
        Self { hub }
    }
}

impl EventHandler for ClientForwarder {
    fn name(&self) -> &str {
        "client_forwarder"
    }

    fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        self.hub.deliver(event);
        Ok(())
    }
}
