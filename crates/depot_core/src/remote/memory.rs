//! In-memory zone-membership implementation.
//!
//! Serves tests and embedders that run the core without a networked
//! membership service. Semantics mirror the remote contract: removes are
//! permissive (membership is an approximate index), adds are idempotent.

use super::{MembershipDelta, RemoteError, ZoneMembershipClient};
use crate::model::record::{RecordId, ZoneId};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Mutex-guarded zone → member-set map.
#[derive(Debug, Default)]
pub struct InMemoryZoneMembership {
    zones: Mutex<HashMap<ZoneId, HashSet<RecordId>>>,
}

impl InMemoryZoneMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a zone with members, replacing any existing set.
    pub fn seed_zone(&self, zone_uuid: ZoneId, members: impl IntoIterator<Item = RecordId>) {
        let mut zones = self.zones.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        zones.insert(zone_uuid, members.into_iter().collect());
    }

    /// Returns a sorted copy of one zone's members for assertions.
    pub fn members_of(&self, zone_uuid: ZoneId) -> Vec<RecordId> {
        let zones = self.zones.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut members: Vec<RecordId> = zones
            .get(&zone_uuid)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        members.sort();
        members
    }
}

impl ZoneMembershipClient for InMemoryZoneMembership {
    fn move_records(&self, deltas: &[MembershipDelta]) -> Result<(), RemoteError> {
        let mut zones = self.zones.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for delta in deltas {
            if let Some(old_zone) = delta.old_zone_uuid {
                if let Some(members) = zones.get_mut(&old_zone) {
                    members.remove(&delta.record_uuid);
                }
            }
            if let Some(new_zone) = delta.new_zone_uuid {
                zones.entry(new_zone).or_default().insert(delta.record_uuid);
            }
        }
        Ok(())
    }

    fn remove_from_zone(&self, zone_uuid: ZoneId, record_uuid: RecordId) -> Result<(), RemoteError> {
        let mut zones = self.zones.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(members) = zones.get_mut(&zone_uuid) {
            members.remove(&record_uuid);
        }
        Ok(())
    }

    fn zone_contents(&self, zone_uuid: ZoneId) -> Result<HashSet<RecordId>, RemoteError> {
        let zones = self.zones.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(zones.get(&zone_uuid).cloned().unwrap_or_default())
    }
}
