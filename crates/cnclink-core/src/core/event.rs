//! Event system for controller communication
//!
//! Provides:
//! - Event types published by the IO context
//! - A bounded dispatcher that applies backpressure to the IO context
//! - The UI-side receiver that delivers events to a listener in order

use crate::core::context::UiContext;
use crate::core::listener::ControllerListener;
use crate::data::{LineAck, MachineStatus, StreamProgress, StreamingError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

/// Controller event types
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// Connection opened or closed
    ConnectionChanged {
        /// New connection state
        connected: bool,
        /// Firmware version, when connected
        version: Option<String>,
    },
    /// Fresh status snapshot
    Status(MachineStatus),
    /// A line was acknowledged with `ok` or `error:N`
    LineAcked(LineAck),
    /// Stream progress changed
    Progress(StreamProgress),
    /// Firmware raised an alarm
    Alarm {
        /// Alarm code
        code: u16,
        /// Alarm description
        description: String,
    },
    /// Error not tied to a streamed line
    Error(String),
    /// A streamed line failed; the stream is blocked until acknowledged
    StreamingError(StreamingError),
    /// Raw wire traffic
    RawLine {
        /// Line text without terminator
        line: String,
        /// `true` when sent to the device, `false` when received
        sent: bool,
    },
    /// Tool change requested; the stream is halted until acknowledged
    ToolChange(u32),
    /// Stream finished with every line acknowledged
    StreamCompleted(StreamProgress),
}

impl std::fmt::Display for ControllerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerEvent::ConnectionChanged {
                connected: true,
                version,
            } => write!(f, "Connected ({})", version.as_deref().unwrap_or("unknown")),
            ControllerEvent::ConnectionChanged { .. } => write!(f, "Disconnected"),
            ControllerEvent::Status(status) => write!(f, "Status: {}", status),
            ControllerEvent::LineAcked(ack) => match ack.error_code {
                Some(code) => write!(f, "error:{} <- {}", code, ack.line),
                None => write!(f, "ok <- {}", ack.line),
            },
            ControllerEvent::Progress(progress) => write!(f, "Progress: {}", progress),
            ControllerEvent::Alarm { code, description } => {
                write!(f, "Alarm {} ({})", code, description)
            }
            ControllerEvent::Error(msg) => write!(f, "Error: {}", msg),
            ControllerEvent::StreamingError(err) => write!(f, "Stream error: {}", err),
            ControllerEvent::RawLine { line, sent: true } => write!(f, ">> {}", line),
            ControllerEvent::RawLine { line, sent: false } => write!(f, "<< {}", line),
            ControllerEvent::ToolChange(tool) => write!(f, "Tool change: T{}", tool),
            ControllerEvent::StreamCompleted(progress) => {
                write!(f, "Stream complete: {}", progress)
            }
        }
    }
}

/// Create a bounded event channel
///
/// The dispatcher side is cloned into the IO context; the receiver stays
/// with the UI.
pub fn event_channel(capacity: usize) -> (EventDispatcher, ControllerEvents) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let room = Arc::new(Room::default());
    (
        EventDispatcher {
            tx,
            room: room.clone(),
        },
        ControllerEvents { rx, room },
    )
}

/// Wakes a publisher blocked on a full queue
#[derive(Debug, Default)]
struct Room {
    cancelled: Mutex<bool>,
    freed: Condvar,
}

impl Room {
    fn signal(&self) {
        let _guard = self.cancelled.lock();
        self.freed.notify_all();
    }
}

/// Event dispatcher for publishing events to the UI context
#[derive(Clone, Debug)]
pub struct EventDispatcher {
    tx: mpsc::Sender<ControllerEvent>,
    room: Arc<Room>,
}

impl EventDispatcher {
    /// Upper bound on one wait; the receiver normally wakes us sooner
    const MAX_WAIT: Duration = Duration::from_millis(100);

    /// Publish an event, waiting while the queue is full
    ///
    /// Blocks the calling thread until the receiver frees a slot, the
    /// receiver is gone, or the dispatcher is cancelled. Must not be called
    /// from the UI context. Returns `true` if the event was queued.
    pub fn publish(&self, event: ControllerEvent) -> bool {
        let mut event = match self.tx.try_send(event) {
            Ok(()) => return true,
            Err(TrySendError::Closed(_)) => return false,
            Err(TrySendError::Full(event)) => event,
        };
        let mut cancelled = self.room.cancelled.lock();
        loop {
            if *cancelled {
                tracing::warn!("Event queue full during shutdown; dropping {}", event);
                return false;
            }
            // retried under the lock so a slot freed meanwhile is not missed
            match self.tx.try_send(event) {
                Ok(()) => return true,
                Err(TrySendError::Closed(_)) => return false,
                Err(TrySendError::Full(returned)) => event = returned,
            }
            self.room.freed.wait_for(&mut cancelled, Self::MAX_WAIT);
        }
    }

    /// Publish without waiting; drops the event if the queue is full
    pub fn try_publish(&self, event: ControllerEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::warn!("Event queue full; dropping {}", event);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Stop waiting on a full queue
    pub fn cancel(&self) {
        *self.room.cancelled.lock() = true;
        self.room.freed.notify_all();
    }

    /// Re-arm after `cancel` for a new connection
    pub fn rearm(&self) {
        *self.room.cancelled.lock() = false;
    }

    /// Whether the UI side has dropped its receiver
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// UI-side receiving end of the controller's event queue
#[derive(Debug)]
pub struct ControllerEvents {
    rx: mpsc::Receiver<ControllerEvent>,
    room: Arc<Room>,
}

impl ControllerEvents {
    /// Wait for the next event
    ///
    /// Returns `None` once the controller has been dropped and the queue is
    /// drained.
    pub async fn next(&mut self) -> Option<ControllerEvent> {
        let event = self.rx.recv().await;
        if event.is_some() {
            self.room.signal();
        }
        event
    }

    /// Take the next event if one is queued
    pub fn try_next(&mut self) -> Option<ControllerEvent> {
        match self.rx.try_recv() {
            Ok(event) => {
                self.room.signal();
                Some(event)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Deliver every queued event to `listener`, in enqueue order
    ///
    /// Only runs on the thread that owns `ctx`; from any other thread nothing
    /// is delivered. Returns the number of events delivered.
    pub fn pump(&mut self, ctx: &UiContext, listener: &mut impl ControllerListener) -> usize {
        if !ctx.is_current() {
            tracing::error!("Controller events pumped off the UI context; ignoring");
            return 0;
        }
        let mut delivered = 0;
        while let Some(event) = self.try_next() {
            dispatch(&event, listener);
            delivered += 1;
        }
        delivered
    }
}

impl Drop for ControllerEvents {
    fn drop(&mut self) {
        self.rx.close();
        self.room.signal();
    }
}

/// Route one event to the matching listener method
pub fn dispatch(event: &ControllerEvent, listener: &mut impl ControllerListener) {
    match event {
        ControllerEvent::ConnectionChanged { connected, version } => {
            listener.on_connection_changed(*connected, version.as_deref())
        }
        ControllerEvent::Status(status) => listener.on_status(status),
        ControllerEvent::LineAcked(ack) => listener.on_line_acked(ack),
        ControllerEvent::Progress(progress) => listener.on_progress(progress),
        ControllerEvent::Alarm { code, description } => listener.on_alarm(*code, description),
        ControllerEvent::Error(message) => listener.on_error(message),
        ControllerEvent::StreamingError(err) => listener.on_streaming_error(err),
        ControllerEvent::RawLine { line, sent } => listener.on_raw_line(line, *sent),
        ControllerEvent::ToolChange(tool) => listener.on_tool_change(*tool),
        ControllerEvent::StreamCompleted(progress) => listener.on_stream_completed(progress),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<String>,
    }

    impl ControllerListener for Recorder {
        fn on_error(&mut self, message: &str) {
            self.seen.push(format!("error {}", message));
        }

        fn on_tool_change(&mut self, tool: u32) {
            self.seen.push(format!("tool {}", tool));
        }
    }

    #[test]
    fn test_pump_preserves_order() {
        let (dispatcher, mut events) = event_channel(8);
        assert!(dispatcher.publish(ControllerEvent::Error("a".into())));
        assert!(dispatcher.publish(ControllerEvent::ToolChange(3)));
        assert!(dispatcher.publish(ControllerEvent::Error("b".into())));

        let ctx = UiContext::claim();
        let mut recorder = Recorder::default();
        assert_eq!(events.pump(&ctx, &mut recorder), 3);
        assert_eq!(recorder.seen, vec!["error a", "tool 3", "error b"]);
    }

    #[test]
    fn test_cancelled_publish_does_not_block() {
        let (dispatcher, _events) = event_channel(1);
        assert!(dispatcher.publish(ControllerEvent::Error("fill".into())));
        dispatcher.cancel();
        assert!(!dispatcher.publish(ControllerEvent::Error("dropped".into())));
    }

    #[test]
    fn test_publish_waits_for_room() {
        let (dispatcher, mut events) = event_channel(1);
        assert!(dispatcher.publish(ControllerEvent::Error("first".into())));

        let producer = {
            let dispatcher = dispatcher.clone();
            std::thread::spawn(move || dispatcher.publish(ControllerEvent::Error("second".into())))
        };
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(events.try_next(), Some(ControllerEvent::Error("first".into())));
        assert!(producer.join().unwrap());
        assert_eq!(events.try_next(), Some(ControllerEvent::Error("second".into())));
    }

    #[test]
    fn test_cancel_releases_blocked_publisher() {
        let (dispatcher, _events) = event_channel(1);
        assert!(dispatcher.publish(ControllerEvent::Error("fill".into())));

        let producer = {
            let dispatcher = dispatcher.clone();
            std::thread::spawn(move || dispatcher.publish(ControllerEvent::Error("late".into())))
        };
        std::thread::sleep(Duration::from_millis(20));
        dispatcher.cancel();
        assert!(!producer.join().unwrap());

        dispatcher.rearm();
        assert!(!dispatcher.is_closed());
    }

    #[test]
    fn test_receiver_drop_releases_blocked_publisher() {
        let (dispatcher, events) = event_channel(1);
        assert!(dispatcher.publish(ControllerEvent::Error("fill".into())));

        let producer = {
            let dispatcher = dispatcher.clone();
            std::thread::spawn(move || dispatcher.publish(ControllerEvent::Error("late".into())))
        };
        std::thread::sleep(Duration::from_millis(20));
        drop(events);
        assert!(!producer.join().unwrap());
    }

    #[test]
    fn test_publish_after_receiver_dropped() {
        let (dispatcher, events) = event_channel(4);
        drop(events);
        assert!(dispatcher.is_closed());
        assert!(!dispatcher.publish(ControllerEvent::Error("gone".into())));
    }
}
