//! # Ownership Model
//!
//! Advisory authority over one networked identity. Nothing on the relay
//! enforces it; a component checks [`OwnershipModel::has_ownership`] before
//! sending state for the guid.
//!
//! ## Arbitration
//!
//! Every claim carries a sequence number. Claims are totally ordered by
//! `(seq, owner)`, so two peers that claim with the same sequence in the
//! same broadcast cycle resolve to the one with the greater connection id
//! on every peer, whatever order the claims arrive in. A request always
//! claims one past the highest sequence seen, so a later request beats
//! every claim it has observed.
//!
//! ```text
//!            request                 own claim echoed, still the greatest
//! Unowned ───────────► Requesting ─────────────────────────────────► Owned
//!    ▲                     │ greater remote claim                     │
//!    │  free / owner left  ▼                                          │
//!    └──────────────── OwnedRemote ◄──────── greater remote claim ────┘
//! ```
//!
//! Claims are never stored as room state. A peer joining the room asks for
//! the current owner with a query; the owner answers by re-broadcasting.

use crate::connection::{NetworkConnection, Subscription, WeakConnection};
use crate::error::ListenerResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::{Rc, Weak};
use tandem_shared::{Envelope, OwnershipEvent, RoomEvent, SendQueue, UserPresencePayload};
use tracing::{debug, trace, warn};

/// Ownership of one guid as seen by the local peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OwnershipState {
    /// Nobody holds a claim.
    Unowned,
    /// A local claim was broadcast and has not come back yet.
    Requesting,
    /// The local peer holds the greatest claim.
    Owned,
    /// Another peer holds the greatest claim.
    OwnedRemote(String),
}

/// Payload of a claim or a release.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipClaim {
    /// Claimed identity
    pub guid: String,
    /// Connection id of the claimant
    pub owner: String,
    /// Claim sequence
    pub seq: u64,
    /// Claims are transient
    #[serde(default)]
    pub dont_save: bool,
}

impl OwnershipClaim {
    fn key(&self) -> (u64, &str) {
        (self.seq, self.owner.as_str())
    }

    /// Total order of claims: sequence first, connection id second.
    #[must_use]
    pub fn cmp_claim(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Payload of an ownership query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipQuery {
    /// Identity whose owner is asked for
    pub guid: String,
}

/// What a record asks the model to do after handling a message.
#[derive(Debug, PartialEq, Eq)]
enum Reply {
    Nothing,
    Rebroadcast(OwnershipClaim),
}

#[derive(Debug)]
struct Record {
    guid: String,
    state: OwnershipState,
    /// Greatest claim observed.
    current: Option<OwnershipClaim>,
    /// Local claim sent and not yet echoed.
    pending: Option<OwnershipClaim>,
    max_seq: u64,
}

impl Record {
    fn new(guid: String) -> Self {
        Self {
            guid,
            state: OwnershipState::Unowned,
            current: None,
            pending: None,
            max_seq: 0,
        }
    }

    fn owned_claim(&self) -> Option<OwnershipClaim> {
        match self.state {
            OwnershipState::Owned => self.current.clone(),
            _ => None,
        }
    }

    fn begin_request(&mut self, local: &str) -> OwnershipClaim {
        let claim = OwnershipClaim {
            guid: self.guid.clone(),
            owner: local.to_owned(),
            seq: self.max_seq + 1,
            dont_save: true,
        };
        self.max_seq = claim.seq;
        self.pending = Some(claim.clone());
        self.state = OwnershipState::Requesting;
        claim
    }

    fn on_claim(&mut self, claim: OwnershipClaim, local: Option<&str>) -> Reply {
        self.max_seq = self.max_seq.max(claim.seq);
        let is_local = local == Some(claim.owner.as_str());

        if let Some(current) = &self.current {
            match claim.cmp_claim(current) {
                Ordering::Less => {
                    // A peer that missed our claim: tell it again
                    if !is_local && self.state == OwnershipState::Owned {
                        return Reply::Rebroadcast(current.clone());
                    }
                    return Reply::Nothing;
                }
                Ordering::Equal => {
                    if is_local && self.pending.as_ref() == Some(&claim) {
                        self.pending = None;
                        self.state = OwnershipState::Owned;
                    }
                    return Reply::Nothing;
                }
                Ordering::Greater => {}
            }
        }

        self.current = Some(claim.clone());
        if is_local {
            if self.pending.as_ref().is_some_and(|p| p.seq == claim.seq) {
                self.pending = None;
                self.state = OwnershipState::Owned;
            }
            return Reply::Nothing;
        }

        // A pending local claim that outranks this one still wins once echoed
        if self.pending.as_ref().is_some_and(|p| p.cmp_claim(&claim) == Ordering::Greater) {
            return Reply::Nothing;
        }
        self.pending = None;
        self.state = OwnershipState::OwnedRemote(claim.owner);
        Reply::Nothing
    }

    fn on_free(&mut self, claim: &OwnershipClaim) {
        let releases = self
            .current
            .as_ref()
            .is_some_and(|c| c.owner == claim.owner && c.seq <= claim.seq);
        if releases {
            self.max_seq = self.max_seq.max(claim.seq);
            self.current = None;
            self.fall_back();
        }
    }

    fn on_user_left(&mut self, user: &str) {
        if self.current.as_ref().is_some_and(|c| c.owner == user) {
            self.current = None;
            self.fall_back();
        }
    }

    /// State once the greatest claim is gone.
    fn fall_back(&mut self) {
        self.state = if self.pending.is_some() {
            OwnershipState::Requesting
        } else {
            OwnershipState::Unowned
        };
    }

    fn reset(&mut self) {
        self.state = OwnershipState::Unowned;
        self.current = None;
        self.pending = None;
    }
}

/// Tracks and negotiates ownership of one guid.
///
/// Listens on the connection for as long as it lives; dropping the model
/// unregisters every listener.
pub struct OwnershipModel {
    record: Rc<RefCell<Record>>,
    connection: NetworkConnection,
    _subscriptions: Vec<Subscription>,
}

impl OwnershipModel {
    /// Starts tracking `guid`. Asks the room for the current owner right
    /// away when already joined, otherwise on join.
    pub fn new(connection: &NetworkConnection, guid: impl Into<String>) -> Self {
        let record = Rc::new(RefCell::new(Record::new(guid.into())));
        let subscriptions = vec![
            subscribe(connection, &record, OwnershipEvent::Claim.key(), on_claim),
            subscribe(connection, &record, OwnershipEvent::Free.key(), on_free),
            subscribe(connection, &record, OwnershipEvent::Query.key(), on_query),
            subscribe(connection, &record, RoomEvent::JoinedRoom.key(), on_joined),
            subscribe(connection, &record, RoomEvent::LeftRoom.key(), on_left),
            subscribe(connection, &record, RoomEvent::UserJoinedRoom.key(), on_user_joined),
            subscribe(connection, &record, RoomEvent::UserLeftRoom.key(), on_user_left),
        ];
        let model = Self {
            record,
            connection: connection.clone(),
            _subscriptions: subscriptions,
        };
        if connection.is_in_room() {
            send_query(connection, &model.guid());
        }
        model
    }

    /// Tracked identity
    #[must_use]
    pub fn guid(&self) -> String {
        self.record.borrow().guid.clone()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> OwnershipState {
        self.record.borrow().state.clone()
    }

    /// Returns true while the local peer holds the greatest claim.
    #[must_use]
    pub fn has_ownership(&self) -> bool {
        self.record.borrow().state == OwnershipState::Owned
    }

    /// Returns true while a local claim is in flight.
    #[must_use]
    pub fn is_requesting(&self) -> bool {
        self.record.borrow().state == OwnershipState::Requesting
    }

    /// Connection id of the current owner, local peer included.
    #[must_use]
    pub fn owner(&self) -> Option<String> {
        let record = self.record.borrow();
        match record.state {
            OwnershipState::Owned | OwnershipState::OwnedRemote(_) => {
                record.current.as_ref().map(|c| c.owner.clone())
            }
            OwnershipState::Unowned | OwnershipState::Requesting => None,
        }
    }

    /// Returns true if another peer holds the greatest claim.
    #[must_use]
    pub fn is_owned_by_other(&self) -> bool {
        matches!(self.record.borrow().state, OwnershipState::OwnedRemote(_))
    }

    /// Broadcasts a claim newer than every claim seen so far.
    ///
    /// Returns false when not in a room; nothing is sent then.
    pub fn request_ownership(&self) -> bool {
        let Some(local) = self.connection.connection_id().filter(|_| self.connection.is_in_room()) else {
            debug!(guid = %self.guid(), "ownership request outside a room ignored");
            return false;
        };
        let claim = self.record.borrow_mut().begin_request(&local);
        trace!(guid = %claim.guid, seq = claim.seq, "requesting ownership");
        send_claim(&self.connection, OwnershipEvent::Claim, &claim, true);
        true
    }

    /// Requests ownership unless it is held or already requested.
    pub fn request_ownership_if_not_owned(&self) -> bool {
        match self.state() {
            OwnershipState::Owned | OwnershipState::Requesting => false,
            OwnershipState::Unowned | OwnershipState::OwnedRemote(_) => self.request_ownership(),
        }
    }

    /// Releases a held or requested claim. Peers observing the release
    /// see the guid as unowned.
    pub fn free_ownership(&self) {
        let release = {
            let mut record = self.record.borrow_mut();
            let claim = match record.state {
                OwnershipState::Owned => record.current.clone(),
                OwnershipState::Requesting => record.pending.clone(),
                OwnershipState::Unowned | OwnershipState::OwnedRemote(_) => None,
            };
            if claim.is_some() {
                if record.state == OwnershipState::Owned {
                    record.current = None;
                }
                record.pending = None;
                record.fall_back();
            }
            claim
        };
        if let Some(claim) = release {
            debug!(guid = %claim.guid, "ownership freed");
            send_claim(&self.connection, OwnershipEvent::Free, &claim, false);
        }
    }
}

impl std::fmt::Debug for OwnershipModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.record.try_borrow() {
            Ok(record) => f
                .debug_struct("OwnershipModel")
                .field("guid", &record.guid)
                .field("state", &record.state)
                .finish(),
            Err(_) => f.write_str("OwnershipModel(<busy>)"),
        }
    }
}

// =============================================================================
// Listener plumbing
// =============================================================================

type Handler = fn(&mut Record, &NetworkConnection, &Value) -> ListenerResult;

fn subscribe(
    connection: &NetworkConnection,
    record: &Rc<RefCell<Record>>,
    key: &str,
    handler: Handler,
) -> Subscription {
    let record: Weak<RefCell<Record>> = Rc::downgrade(record);
    let weak: WeakConnection = connection.downgrade();
    connection.subscribe(key, move |_, data| {
        let (Some(record), Some(connection)) = (record.upgrade(), weak.upgrade()) else {
            return Ok(());
        };
        let Ok(mut record) = record.try_borrow_mut() else {
            warn!("ownership record busy, message skipped");
            return Ok(());
        };
        handler(&mut record, &connection, data)
    })
}

fn targets<'a>(record: &Record, data: &'a Value) -> Option<&'a str> {
    tandem_shared::protocol::payload_guid(data).filter(|guid| *guid == record.guid)
}

fn on_claim(record: &mut Record, connection: &NetworkConnection, data: &Value) -> ListenerResult {
    if targets(record, data).is_none() {
        return Ok(());
    }
    let claim: OwnershipClaim = serde_json::from_value(data.clone())?;
    let local = connection.connection_id();
    let before = record.state.clone();
    let reply = record.on_claim(claim, local.as_deref());
    if record.state != before {
        debug!(guid = %record.guid, state = ?record.state, "ownership changed");
    }
    if let Reply::Rebroadcast(claim) = reply {
        send_claim(connection, OwnershipEvent::Claim, &claim, false);
    }
    Ok(())
}

fn on_free(record: &mut Record, _connection: &NetworkConnection, data: &Value) -> ListenerResult {
    if targets(record, data).is_none() {
        return Ok(());
    }
    let claim: OwnershipClaim = serde_json::from_value(data.clone())?;
    record.on_free(&claim);
    Ok(())
}

fn on_query(record: &mut Record, connection: &NetworkConnection, data: &Value) -> ListenerResult {
    if targets(record, data).is_none() {
        return Ok(());
    }
    if let Some(claim) = record.owned_claim() {
        send_claim(connection, OwnershipEvent::Claim, &claim, false);
    }
    Ok(())
}

fn on_joined(record: &mut Record, connection: &NetworkConnection, _data: &Value) -> ListenerResult {
    record.reset();
    send_query(connection, &record.guid);
    Ok(())
}

fn on_left(record: &mut Record, _connection: &NetworkConnection, _data: &Value) -> ListenerResult {
    record.reset();
    Ok(())
}

fn on_user_joined(record: &mut Record, connection: &NetworkConnection, _data: &Value) -> ListenerResult {
    if let Some(claim) = record.owned_claim() {
        send_claim(connection, OwnershipEvent::Claim, &claim, false);
    }
    Ok(())
}

fn on_user_left(record: &mut Record, _connection: &NetworkConnection, data: &Value) -> ListenerResult {
    let presence: UserPresencePayload = serde_json::from_value(data.clone())?;
    record.on_user_left(&presence.user_id);
    Ok(())
}

fn send_claim(connection: &NetworkConnection, event: OwnershipEvent, claim: &OwnershipClaim, echo: bool) {
    match serde_json::to_value(claim) {
        Ok(data) => {
            let mut envelope = Envelope::new(event.key(), data);
            envelope.echo = echo;
            connection.send_envelope(envelope, SendQueue::Immediate);
        }
        Err(err) => warn!(%err, "failed to encode ownership claim"),
    }
}

fn send_query(connection: &NetworkConnection, guid: &str) {
    match serde_json::to_value(OwnershipQuery { guid: guid.to_owned() }) {
        Ok(mut data) => {
            data["dontSave"] = Value::Bool(true);
            connection.send(OwnershipEvent::Query.key(), data, SendQueue::Immediate);
        }
        Err(err) => warn!(%err, "failed to encode ownership query"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::RoomHub;
    use tandem_core::Context;

    const DT: f32 = 1.0 / 60.0;

    struct Peer {
        cx: Context,
        connection: NetworkConnection,
    }

    fn join(hub: &mut RoomHub, room: &str) -> Peer {
        let mut cx = Context::new();
        let connection = NetworkConnection::default();
        connection.connect(hub.connect());
        connection.install(&mut cx);
        connection.join_room(room);
        Peer { cx, connection }
    }

    fn settle(hub: &mut RoomHub, peers: &mut [&mut Peer], rounds: usize) {
        for _ in 0..rounds {
            hub.pump();
            for peer in peers.iter_mut() {
                peer.cx.tick(DT);
            }
        }
    }

    fn claim(owner: &str, seq: u64) -> OwnershipClaim {
        OwnershipClaim { guid: "g".into(), owner: owner.into(), seq, dont_save: true }
    }

    #[test]
    fn test_claim_order_breaks_ties_by_owner() {
        assert_eq!(claim("peer-2", 1).cmp_claim(&claim("peer-1", 1)), Ordering::Greater);
        assert_eq!(claim("peer-1", 2).cmp_claim(&claim("peer-2", 1)), Ordering::Greater);
    }

    #[test]
    fn test_record_ignores_older_claims_arriving_late() {
        let mut record = Record::new("g".into());
        record.on_claim(claim("peer-2", 3), Some("peer-1"));
        record.on_claim(claim("peer-3", 2), Some("peer-1"));
        assert_eq!(record.state, OwnershipState::OwnedRemote("peer-2".into()));

        let mine = record.begin_request("peer-1");
        assert_eq!(mine.seq, 4);
        // Echo of the local claim arrives after a competing older one
        record.on_claim(claim("peer-3", 3), Some("peer-1"));
        assert_eq!(record.state, OwnershipState::Requesting);
        record.on_claim(mine, Some("peer-1"));
        assert_eq!(record.state, OwnershipState::Owned);

        let reply = record.on_claim(claim("peer-3", 1), Some("peer-1"));
        assert!(matches!(reply, Reply::Rebroadcast(c) if c.owner == "peer-1"));
    }

    #[test]
    fn test_request_round_trip() {
        let mut hub = RoomHub::new();
        let mut a = join(&mut hub, "X");
        let mut b = join(&mut hub, "X");
        settle(&mut hub, &mut [&mut a, &mut b], 3);

        let a_model = OwnershipModel::new(&a.connection, "obj-1");
        let b_model = OwnershipModel::new(&b.connection, "obj-1");
        assert!(a_model.request_ownership());
        assert!(a_model.is_requesting());
        assert!(!a_model.has_ownership());

        settle(&mut hub, &mut [&mut a, &mut b], 2);
        assert!(a_model.has_ownership());
        assert_eq!(a_model.owner().as_deref(), Some("peer-1"));
        assert!(!b_model.has_ownership());
        assert_eq!(b_model.state(), OwnershipState::OwnedRemote("peer-1".into()));
    }

    #[test]
    fn test_simultaneous_requests_converge() {
        let mut hub = RoomHub::new();
        let mut a = join(&mut hub, "X");
        let mut b = join(&mut hub, "X");
        settle(&mut hub, &mut [&mut a, &mut b], 3);

        let a_model = OwnershipModel::new(&a.connection, "obj-1");
        let b_model = OwnershipModel::new(&b.connection, "obj-1");
        a_model.request_ownership();
        b_model.request_ownership();
        settle(&mut hub, &mut [&mut a, &mut b], 3);

        assert_ne!(a_model.has_ownership(), b_model.has_ownership());
        assert_eq!(a_model.owner(), b_model.owner());
        assert_eq!(a_model.owner().as_deref(), Some("peer-2"));
    }

    #[test]
    fn test_later_claim_wins() {
        let mut hub = RoomHub::new();
        let mut a = join(&mut hub, "X");
        let mut b = join(&mut hub, "X");
        settle(&mut hub, &mut [&mut a, &mut b], 3);

        let a_model = OwnershipModel::new(&a.connection, "obj-1");
        let b_model = OwnershipModel::new(&b.connection, "obj-1");
        a_model.request_ownership();
        settle(&mut hub, &mut [&mut a, &mut b], 2);
        assert!(b_model.request_ownership_if_not_owned());
        assert!(b_model.is_requesting());
        settle(&mut hub, &mut [&mut a, &mut b], 2);

        assert!(b_model.has_ownership());
        assert_eq!(a_model.state(), OwnershipState::OwnedRemote("peer-2".into()));
        assert!(!b_model.request_ownership_if_not_owned());
    }

    #[test]
    fn test_free_releases_for_everyone() {
        let mut hub = RoomHub::new();
        let mut a = join(&mut hub, "X");
        let mut b = join(&mut hub, "X");
        settle(&mut hub, &mut [&mut a, &mut b], 3);

        let a_model = OwnershipModel::new(&a.connection, "obj-1");
        let b_model = OwnershipModel::new(&b.connection, "obj-1");
        a_model.request_ownership();
        settle(&mut hub, &mut [&mut a, &mut b], 2);
        assert!(b_model.is_owned_by_other());

        a_model.free_ownership();
        assert_eq!(a_model.state(), OwnershipState::Unowned);
        settle(&mut hub, &mut [&mut a, &mut b], 2);
        assert_eq!(b_model.state(), OwnershipState::Unowned);
        assert_eq!(b_model.owner(), None);
    }

    #[test]
    fn test_late_joiner_learns_owner() {
        let mut hub = RoomHub::new();
        let mut a = join(&mut hub, "X");
        settle(&mut hub, &mut [&mut a], 2);
        let a_model = OwnershipModel::new(&a.connection, "obj-1");
        a_model.request_ownership();
        settle(&mut hub, &mut [&mut a], 2);
        assert!(a_model.has_ownership());

        let mut c = join(&mut hub, "X");
        let c_model = OwnershipModel::new(&c.connection, "obj-1");
        settle(&mut hub, &mut [&mut a, &mut c], 4);
        assert_eq!(c_model.state(), OwnershipState::OwnedRemote("peer-1".into()));
        assert!(a_model.has_ownership());
    }

    #[test]
    fn test_owner_leaving_reverts_to_unowned() {
        let mut hub = RoomHub::new();
        let mut a = join(&mut hub, "X");
        let mut b = join(&mut hub, "X");
        settle(&mut hub, &mut [&mut a, &mut b], 3);

        let a_model = OwnershipModel::new(&a.connection, "obj-1");
        let b_model = OwnershipModel::new(&b.connection, "obj-1");
        a_model.request_ownership();
        settle(&mut hub, &mut [&mut a, &mut b], 2);

        a.connection.leave_room();
        settle(&mut hub, &mut [&mut a, &mut b], 2);
        assert_eq!(a_model.state(), OwnershipState::Unowned);
        assert_eq!(b_model.state(), OwnershipState::Unowned);
        assert!(b_model.request_ownership());
    }

    #[test]
    fn test_request_outside_room_is_ignored() {
        let connection = NetworkConnection::default();
        let model = OwnershipModel::new(&connection, "obj-1");
        assert!(!model.request_ownership());
        assert_eq!(model.state(), OwnershipState::Unowned);
    }
}
