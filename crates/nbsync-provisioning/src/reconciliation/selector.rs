//! Primary address selection.
//!
//! Picks one address per VM as its primary. An existing primary that is
//! still valid always wins, so runs do not flip between equally good
//! private addresses when interface enumeration order changes.

use serde::{Deserialize, Serialize};

use nbsync_connector::ids::{PendingTag, RecordId, Ref};
use nbsync_connector::types::ObjectKind;

use super::address::{same_address, AddressClass};
use super::snapshot::{DestinationSnapshot, VM_INTERFACE_OBJECT_TYPE};

/// Current state of a destination address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressInfo {
    /// Full address value including mask.
    pub address: String,
    /// Interface the address is attached to.
    pub interface: Option<RecordId>,
}

/// Read access to destination addresses.
pub trait AddressLookup {
    fn address(&self, id: RecordId) -> Option<AddressInfo>;
}

impl AddressLookup for DestinationSnapshot {
    fn address(&self, id: RecordId) -> Option<AddressInfo> {
        let record = self.get(ObjectKind::IpAddress, id)?;
        let interface = if record.text("assigned_object_type") == VM_INTERFACE_OBJECT_TYPE {
            record.reference("assigned_object_id")
        } else {
            None
        };
        Some(AddressInfo {
            address: record.name().to_string(),
            interface,
        })
    }
}

/// An address that could serve as primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub address: String,
    pub class: AddressClass,
    /// Existing record, or placeholder for an address being created.
    pub target: Ref,
}

/// An interface with its desired addresses, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPoint {
    pub interface: Ref,
    pub addresses: Vec<Candidate>,
}

/// Outcome of primary selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "address", rename_all = "snake_case")]
pub enum PrimaryDecision {
    /// Leave the primary as it is.
    Keep,
    /// Point the primary at an existing address.
    SwitchTo(RecordId),
    /// Point the primary at an address once it has been created.
    Pending(PendingTag),
    /// The VM has no addresses left; clear the primary.
    Remove,
}

impl PrimaryDecision {
    /// Check if the primary field changes.
    #[must_use]
    pub fn is_change(&self) -> bool {
        !matches!(self, PrimaryDecision::Keep)
    }
}

fn current_is_valid(
    current: RecordId,
    points: &[AttachmentPoint],
    lookup: &impl AddressLookup,
) -> bool {
    let Some(info) = lookup.address(current) else {
        return false;
    };
    if AddressClass::of(&info.address) != AddressClass::Private {
        return false;
    }
    let Some(interface) = info.interface else {
        return false;
    };
    let attached = points
        .iter()
        .any(|p| p.interface == Ref::Resolved(interface));
    let still_desired = points.iter().flat_map(|p| &p.addresses).any(|c| {
        c.class == AddressClass::Private && same_address(&c.address, &info.address)
    });
    attached && still_desired
}

fn decide(target: Ref, current: Option<RecordId>) -> PrimaryDecision {
    match target {
        Ref::Resolved(id) if Some(id) == current => PrimaryDecision::Keep,
        Ref::Resolved(id) => PrimaryDecision::SwitchTo(id),
        Ref::Pending(tag) => PrimaryDecision::Pending(tag),
    }
}

/// Choose the primary address for a VM.
///
/// 1. A current primary that still exists, is private, sits on one of the
///    VM's own interfaces and is still among its desired private addresses
///    is kept.
/// 2. Otherwise the first private address in interface order is chosen.
/// 3. With no private address, the first public address is chosen.
/// 4. With no addresses at all, the primary is kept only if there was none;
///    otherwise it is removed.
///
/// A chosen address that does not exist yet yields [`PrimaryDecision::Pending`].
#[must_use]
pub fn select_primary(
    current: Option<RecordId>,
    points: &[AttachmentPoint],
    lookup: &impl AddressLookup,
) -> PrimaryDecision {
    if let Some(id) = current {
        if current_is_valid(id, points, lookup) {
            return PrimaryDecision::Keep;
        }
    }

    let candidates = || points.iter().flat_map(|p| p.addresses.iter());

    if let Some(private) = candidates().find(|c| c.class == AddressClass::Private) {
        return decide(private.target, current);
    }
    if let Some(public) = candidates().find(|c| c.class == AddressClass::Public) {
        return decide(public.target, current);
    }

    match current {
        None => PrimaryDecision::Keep,
        Some(_) => PrimaryDecision::Remove,
    }
}
