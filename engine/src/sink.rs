//! Notification sinks.
//!
//! This module defines the EventSink trait, which decouples the engine from
//! whatever consumes its per-item events (a console printer, a GUI channel,
//! a test collector). Events are handed over by value; the engine keeps no
//! history of its own.
//!
//! Sinks are called from worker threads, possibly concurrently, so they must
//! be `Send + Sync`.

use crossbeam_channel::Sender;
use parking_lot::Mutex;

/// Receiver of per-item events of type `E`.
pub trait EventSink<E>: Send + Sync {
    /// Called once per event, from whichever worker produced it.
    fn notify(&self, event: E);
}

impl<E, F> EventSink<E> for F
where
    F: Fn(E) + Send + Sync,
{
    fn notify(&self, event: E) {
        self(event)
    }
}

/// Forward events over a channel. A disconnected receiver drops events.
impl<E: Send> EventSink<E> for Sender<E> {
    fn notify(&self, event: E) {
        let _ = self.send(event);
    }
}

/// A sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl<E> EventSink<E> for NullSink {
    fn notify(&self, _event: E) {}
}

/// A caller-owned sink retaining every event of one run.
#[derive(Debug)]
pub struct Collector<E> {
    events: Mutex<Vec<E>>,
}

impl<E> Default for Collector<E> {
    fn default() -> Self {
        Collector {
            events: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Clone> Collector<E> {
    pub fn new() -> Self {
        Collector::default()
    }

    /// A copy of the events received so far, in arrival order.
    pub fn events(&self) -> Vec<E> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Take ownership of the retained events.
    pub fn into_events(self) -> Vec<E> {
        self.events.into_inner()
    }
}

impl<E: Send> EventSink<E> for Collector<E> {
    fn notify(&self, event: E) {
        self.events.lock().push(event);
    }
}
