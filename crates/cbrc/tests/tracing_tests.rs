//! Integration tests for the lifecycle tracing feature.
//!
//! A capturing layer records the message of every event emitted while a
//! scenario runs, so tests can check the order of block transitions.

#![cfg(feature = "tracing")]

use std::fmt;
use std::sync::{Arc, Mutex};

use cbrc::{PoolOptions, SharedPtr};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::Registry;

#[derive(Clone, Default)]
struct Capture {
    events: Arc<Mutex<Vec<String>>>,
}

struct MessageVisitor<'a>(&'a mut Option<String>);

impl Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            *self.0 = Some(format!("{value:?}"));
        }
    }
}

impl<S: Subscriber> Layer<S> for Capture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = None;
        event.record(&mut MessageVisitor(&mut message));
        if let Some(message) = message {
            self.events.lock().unwrap().push(message);
        }
    }
}

fn capture<F: FnOnce()>(scenario: F) -> Vec<String> {
    let layer = Capture::default();
    let events = Arc::clone(&layer.events);
    let subscriber = Registry::default().with(layer);
    tracing::subscriber::with_default(subscriber, scenario);
    let events = events.lock().unwrap().clone();
    events
}

#[test]
fn test_inline_lifecycle_events() {
    let events = capture(|| {
        let p = SharedPtr::new(5_u32);
        drop(p);
    });
    assert_eq!(events, ["block_created", "pointee_destroyed", "block_freed"]);
}

#[test]
fn test_weak_delays_block_freed() {
    let events = capture(|| {
        let p = SharedPtr::from_box(Box::new(String::from("traced")));
        let weak = SharedPtr::downgrade(&p);
        drop(p);
        assert!(weak.upgrade().is_none());
        drop(weak);
    });
    assert_eq!(
        events,
        ["block_created", "pointee_destroyed", "lock_failed", "block_freed"]
    );
}

#[test]
fn test_pool_events() {
    let events = capture(|| {
        let pool = PoolOptions::new().max_regions(1).build();
        let p = SharedPtr::new_in(1_u8, pool.clone());
        assert!(SharedPtr::try_new_in([0_u8; 4096], pool).is_err());
        drop(p);
    });
    assert_eq!(events[0], "region_reserved");
    assert_eq!(events[1], "block_created");
    assert!(events.iter().any(|e| e == "alloc_failed"));
    assert_eq!(events.last().map(String::as_str), Some("block_freed"));
}
