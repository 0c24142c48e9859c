//! Keyed and binary listener registry.

use super::WeakConnection;
use crate::error::{ListenerResult, WireResult};
use crate::wire::BinaryModel;
use serde_json::Value;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tandem_core::Context;
use tandem_shared::BinaryIdentifier;

/// Callback for keyed messages and room events.
pub type KeyedListener = dyn FnMut(&mut Context, &Value) -> ListenerResult;

/// Callback for binary frames.
pub type BinaryListener = dyn FnMut(&mut Context, &BinaryMessage<'_>) -> ListenerResult;

pub(crate) type SharedKeyed = Rc<RefCell<KeyedListener>>;
pub(crate) type SharedBinary = Rc<RefCell<BinaryListener>>;

/// Decodes a whole frame into the model registered for its identifier.
pub(crate) type Decoder = fn(&[u8]) -> WireResult<Box<dyn Any>>;

/// [`Decoder`] of `M`.
pub(crate) fn decode_boxed<M: BinaryModel + 'static>(frame: &[u8]) -> WireResult<Box<dyn Any>> {
    let model = M::from_frame(frame)?;
    Ok(Box::new(model))
}

pub(crate) fn shared_binary<F>(listener: F) -> SharedBinary
where
    F: FnMut(&mut Context, &BinaryMessage<'_>) -> ListenerResult + 'static,
{
    Rc::new(RefCell::new(listener))
}

/// A binary frame as handed to listeners.
pub struct BinaryMessage<'a> {
    /// Whole frame, identifier included
    pub frame: &'a [u8],
    decoded: Option<&'a (dyn Any + 'static)>,
}

impl<'a> BinaryMessage<'a> {
    pub(crate) fn new(frame: &'a [u8], decoded: Option<&'a (dyn Any + 'static)>) -> Self {
        Self { frame, decoded }
    }

    /// The decoded model, if the frame was decoded as `M`.
    #[must_use]
    pub fn model<M: 'static>(&self) -> Option<&'a M> {
        self.decoded.and_then(|any| any.downcast_ref::<M>())
    }
}

/// Handle to a registered listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// What a listener is registered for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ListenerKey {
    /// Keyed message or room event
    Keyed(String),
    /// Binary frames with this identifier
    Binary(BinaryIdentifier),
}

/// Listeners in registration order, per key.
#[derive(Default)]
pub(crate) struct Listeners {
    keyed: HashMap<String, Vec<(ListenerId, SharedKeyed)>>,
    binary: HashMap<BinaryIdentifier, Vec<(ListenerId, SharedBinary)>>,
    decoders: HashMap<BinaryIdentifier, Decoder>,
    next: u64,
}

impl Listeners {
    fn next_id(&mut self) -> ListenerId {
        self.next += 1;
        ListenerId(self.next)
    }

    pub(crate) fn add_keyed(&mut self, key: &str, listener: SharedKeyed) -> ListenerId {
        let id = self.next_id();
        self.keyed.entry(key.to_owned()).or_default().push((id, listener));
        id
    }

    pub(crate) fn add_binary(&mut self, identifier: BinaryIdentifier, listener: SharedBinary) -> ListenerId {
        let id = self.next_id();
        self.binary.entry(identifier).or_default().push((id, listener));
        id
    }

    /// Sets the decoder run once per frame of `identifier`, ahead of its listeners.
    pub(crate) fn set_decoder(&mut self, identifier: BinaryIdentifier, decoder: Decoder) {
        self.decoders.insert(identifier, decoder);
    }

    pub(crate) fn decoder(&self, identifier: BinaryIdentifier) -> Option<Decoder> {
        self.decoders.get(&identifier).copied()
    }

    pub(crate) fn remove(&mut self, key: &ListenerKey, id: ListenerId) -> bool {
        match key {
            ListenerKey::Keyed(key) => remove_from(&mut self.keyed, key.as_str(), id),
            ListenerKey::Binary(identifier) => {
                let removed = remove_from(&mut self.binary, identifier, id);
                if !self.binary.contains_key(identifier) {
                    self.decoders.remove(identifier);
                }
                removed
            }
        }
    }

    pub(crate) fn contains(&self, key: &ListenerKey, id: ListenerId) -> bool {
        match key {
            ListenerKey::Keyed(key) => self.keyed.get(key).is_some_and(|l| l.iter().any(|(i, _)| *i == id)),
            ListenerKey::Binary(identifier) => {
                self.binary.get(identifier).is_some_and(|l| l.iter().any(|(i, _)| *i == id))
            }
        }
    }

    pub(crate) fn count(&self, key: &ListenerKey) -> usize {
        match key {
            ListenerKey::Keyed(key) => self.keyed.get(key).map_or(0, Vec::len),
            ListenerKey::Binary(identifier) => self.binary.get(identifier).map_or(0, Vec::len),
        }
    }

    /// Listeners of `key` at the time of the call.
    pub(crate) fn keyed_snapshot(&self, key: &str) -> Vec<(ListenerId, SharedKeyed)> {
        self.keyed.get(key).cloned().unwrap_or_default()
    }

    /// Listeners of `identifier` at the time of the call.
    pub(crate) fn binary_snapshot(&self, identifier: BinaryIdentifier) -> Vec<(ListenerId, SharedBinary)> {
        self.binary.get(&identifier).cloned().unwrap_or_default()
    }
}

fn remove_from<K, Q, L>(map: &mut HashMap<K, Vec<(ListenerId, L)>>, key: &Q, id: ListenerId) -> bool
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + ?Sized,
{
    let Some(list) = map.get_mut(key) else {
        return false;
    };
    let before = list.len();
    list.retain(|(i, _)| *i != id);
    let removed = list.len() != before;
    if list.is_empty() {
        map.remove(key);
    }
    removed
}

/// Unregisters its listener when dropped.
///
/// Components keep their subscriptions in a field, so destroying the
/// component unregisters every listener it owns.
#[must_use = "dropping a subscription unregisters the listener"]
pub struct Subscription {
    connection: WeakConnection,
    key: ListenerKey,
    id: ListenerId,
}

impl Subscription {
    pub(crate) fn new(connection: WeakConnection, key: ListenerKey, id: ListenerId) -> Self {
        Self { connection, key, id }
    }

    /// Registered listener
    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }

    /// What the listener is registered for
    #[must_use]
    pub const fn key(&self) -> &ListenerKey {
        &self.key
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("key", &self.key).field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.upgrade() {
            connection.remove_listener(&self.key, self.id);
        }
    }
}
