//! Pub/Sub Module
//!
//! Routing of pushed messages on a subscribed connection.
//!
//! ## Flow
//! ```text
//!   reader ──▶ push message? ──yes──▶ listeners for channel/pattern
//!                   │                    └─▶ event lane (never the reader)
//!                   no
//!                   ▼
//!             command queue (SUBSCRIBE/UNSUBSCRIBE acknowledgements)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::protocol::Reply;

/// A message published to a channel the connection subscribed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Channel the message was published on
    pub channel: Bytes,

    /// Pattern that matched, for pattern subscriptions
    pub pattern: Option<Bytes>,

    pub payload: Bytes,
}

/// Receives pushed messages
///
/// Called from an event lane. Slow work should be handed off; it delays
/// later messages for the same connection.
pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: &Message);
}

impl<F> MessageListener for F
where
    F: Fn(&Message) + Send + Sync,
{
    fn on_message(&self, message: &Message) {
        self(message)
    }
}

/// Interpret a reply as a pushed message
///
/// `["message", channel, payload]` or `["pmessage", pattern, channel, payload]`.
pub(crate) fn parse_push(reply: &Reply) -> Option<Message> {
    let items = match reply {
        Reply::Array(items) => items,
        _ => return None,
    };
    match items.as_slice() {
        [Reply::Bulk(kind), Reply::Bulk(channel), Reply::Bulk(payload)]
            if kind.eq_ignore_ascii_case(b"message") =>
        {
            Some(Message {
                channel: channel.clone(),
                pattern: None,
                payload: payload.clone(),
            })
        }
        [Reply::Bulk(kind), Reply::Bulk(pattern), Reply::Bulk(channel), Reply::Bulk(payload)]
            if kind.eq_ignore_ascii_case(b"pmessage") =>
        {
            Some(Message {
                channel: channel.clone(),
                pattern: Some(pattern.clone()),
                payload: payload.clone(),
            })
        }
        _ => None,
    }
}

type ListenerSet = Vec<Arc<dyn MessageListener>>;

/// Subscription table of one connection
#[derive(Default)]
pub(crate) struct Subscriptions {
    channels: Mutex<HashMap<Bytes, ListenerSet>>,
    patterns: Mutex<HashMap<Bytes, ListenerSet>>,
}

fn add(table: &mut HashMap<Bytes, ListenerSet>, name: Bytes, listener: Arc<dyn MessageListener>) -> bool {
    let listeners = table.entry(name).or_default();
    listeners.push(listener);
    listeners.len() == 1
}

/// Remove one listener; the name goes when its last listener does
fn withdraw(table: &mut HashMap<Bytes, ListenerSet>, name: &[u8], listener: &Arc<dyn MessageListener>) {
    if let Some(listeners) = table.get_mut(name) {
        listeners.retain(|registered| !Arc::ptr_eq(registered, listener));
        if listeners.is_empty() {
            table.remove(name);
        }
    }
}

impl Subscriptions {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a listener; returns whether the channel is new
    pub(crate) fn add_channel(&self, channel: Bytes, listener: Arc<dyn MessageListener>) -> bool {
        add(&mut self.channels.lock(), channel, listener)
    }

    /// Register a listener; returns whether the pattern is new
    pub(crate) fn add_pattern(&self, pattern: Bytes, listener: Arc<dyn MessageListener>) -> bool {
        add(&mut self.patterns.lock(), pattern, listener)
    }

    /// Undo one `add_channel`
    pub(crate) fn withdraw_channel(&self, channel: &[u8], listener: &Arc<dyn MessageListener>) {
        withdraw(&mut self.channels.lock(), channel, listener)
    }

    /// Undo one `add_pattern`
    pub(crate) fn withdraw_pattern(&self, pattern: &[u8], listener: &Arc<dyn MessageListener>) {
        withdraw(&mut self.patterns.lock(), pattern, listener)
    }

    pub(crate) fn remove_channel(&self, channel: &[u8]) -> bool {
        self.channels.lock().remove(channel).is_some()
    }

    pub(crate) fn remove_pattern(&self, pattern: &[u8]) -> bool {
        self.patterns.lock().remove(pattern).is_some()
    }

    /// Channels to re-subscribe after a reconnect
    pub(crate) fn channels(&self) -> Vec<Bytes> {
        self.channels.lock().keys().cloned().collect()
    }

    /// Patterns to re-subscribe after a reconnect
    pub(crate) fn patterns(&self) -> Vec<Bytes> {
        self.patterns.lock().keys().cloned().collect()
    }

    /// Listeners interested in `message`
    pub(crate) fn listeners_for(&self, message: &Message) -> ListenerSet {
        match &message.pattern {
            Some(pattern) => self.patterns.lock().get(pattern).cloned().unwrap_or_default(),
            None => self
                .channels
                .lock()
                .get(&message.channel)
                .cloned()
                .unwrap_or_default(),
        }
    }
}
