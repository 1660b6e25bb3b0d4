//! The cooperative loop: one thread, one single-threaded tokio runtime, one queue.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, error};

use crate::bridge::{EventBridge, LoopMessage, Unavailable};
use crate::error::LoopError;
use crate::events::{Event, SignalEnvelope};

const LOOP_THREAD_NAME: &str = "flowrelay-loop";

/// Receives every message the loop delivers, always on the loop thread.
pub trait LoopConsumer: Send + Sync {
    fn on_event(&self, event: Event);
    fn on_signal(&self, envelope: SignalEnvelope);
}

/// Running loop. Dropping it stops the loop.
pub struct EventLoop {
    bridge: EventBridge,
    handle: Handle,
    thread_id: ThreadId,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Attach `bridge` to a new loop thread delivering into `consumer`.
    pub fn start(bridge: &EventBridge, consumer: Arc<dyn LoopConsumer>) -> Result<Self, LoopError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| LoopError::Runtime(e.to_string()))?;
        let handle = runtime.handle().clone();

        let (sender, receiver) = mpsc::unbounded_channel();
        bridge.attach(sender)?;

        let loop_bridge = bridge.clone();
        let thread = std::thread::Builder::new()
            .name(LOOP_THREAD_NAME.to_string())
            .spawn(move || {
                runtime.block_on(run_loop(receiver, consumer, loop_bridge));
            })
            .map_err(LoopError::Spawn)?;
        let thread_id = thread.thread().id();
        debug!(thread = LOOP_THREAD_NAME, "event loop started");

        Ok(Self {
            bridge: bridge.clone(),
            handle,
            thread_id,
            thread: Some(thread),
        })
    }

    pub fn bridge(&self) -> &EventBridge {
        &self.bridge
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn is_loop_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Run cooperative work on the loop thread, interleaved with deliveries.
    pub fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Wait until everything queued before this call has been delivered.
    ///
    /// Returns false on timeout, when the loop is gone, or when called from
    /// the loop thread itself (which would wait on its own queue).
    pub fn sync(&self, timeout: Duration) -> bool {
        if self.is_loop_thread() {
            return false;
        }
        let (ack_tx, ack_rx) = std::sync::mpsc::channel();
        if !self.bridge.send_control(LoopMessage::Barrier(ack_tx)) {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }

    /// Deliver what is already queued, then stop. Later submits are dropped
    /// with one diagnostic line each.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.bridge.send_control(LoopMessage::Stop);
        if self.is_loop_thread() {
            return;
        }
        if thread.join().is_err() {
            error!("event loop thread panicked");
        }
        debug!("event loop stopped");
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

async fn run_loop(
    mut receiver: UnboundedReceiver<LoopMessage>,
    consumer: Arc<dyn LoopConsumer>,
    bridge: EventBridge,
) {
    while let Some(message) = receiver.recv().await {
        match message {
            LoopMessage::Event(event) => {
                let kind = event.kind();
                if catch_unwind(AssertUnwindSafe(|| consumer.on_event(event))).is_err() {
                    error!(event_type = %kind, "loop consumer panicked on event");
                }
            }
            LoopMessage::Signal(envelope) => {
                let session_id = envelope.session_id.clone();
                if catch_unwind(AssertUnwindSafe(|| consumer.on_signal(envelope))).is_err() {
                    error!(session_id = %session_id, "loop consumer panicked on signal");
                }
            }
            LoopMessage::Barrier(ack) => {
                let _ = ack.send(());
            }
            LoopMessage::Stop => break,
        }
        // Yield point: tasks spawned on the loop run between deliveries.
        tokio::task::yield_now().await;
    }

    receiver.close();
    while let Ok(message) = receiver.try_recv() {
        bridge.report_dropped(&message, Unavailable::Stopped);
    }
}
