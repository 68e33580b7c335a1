//! Indirect Chooser Adapter (§4.8): remembers, per client, whether the user
//! has picked a remote manager to hand an IndirectQuery off to. The actual
//! chooser UI is an external collaborator; this table is the thin piece of
//! state the core owns on its behalf.

use std::net::SocketAddr;

use parking_lot::Mutex;

/// A client's indirect-query choice, pending or resolved (§4.8).
#[derive(Debug, Clone)]
pub struct IndirectRecord {
    pub id: u32,
    pub client_addr: SocketAddr,
    pub chosen_host: Option<SocketAddr>,
}

#[derive(Default)]
pub struct IndirectTable {
    records: Mutex<Vec<IndirectRecord>>,
    next_id: Mutex<u32>,
}

impl IndirectTable {
    /// `indirect_lookup` (§4.8).
    pub fn lookup(&self, client_addr: &SocketAddr) -> Option<IndirectRecord> {
        self.records
            .lock()
            .iter()
            .find(|r| codec::addr::equal(&r.client_addr, client_addr))
            .cloned()
    }

    /// `indirect_lookup_by_chosen` (§4.8): used by MANAGED_FORWARD to find
    /// the record a peer manager's handoff refers to.
    pub fn lookup_by_chosen(
        &self,
        client_addr: &SocketAddr,
        chosen_addr: &SocketAddr,
    ) -> Option<IndirectRecord> {
        self.records
            .lock()
            .iter()
            .find(|r| {
                codec::addr::equal(&r.client_addr, client_addr)
                    && r.chosen_host
                        .as_ref()
                        .is_some_and(|h| codec::addr::equal(h, chosen_addr))
            })
            .cloned()
    }

    /// `indirect_alloc` (§4.8): a fresh record with no chosen host yet.
    pub fn alloc(&self, client_addr: SocketAddr) -> IndirectRecord {
        let mut next_id = self.next_id.lock();
        *next_id = next_id.wrapping_add(1);
        let record = IndirectRecord {
            id: *next_id,
            client_addr,
            chosen_host: None,
        };

        self.records.lock().push(record.clone());
        record
    }

    /// Record the chooser's selection for `client_addr`, creating the
    /// record first if the chooser acted without a prior IndirectQuery.
    pub fn set_chosen(&self, client_addr: SocketAddr, chosen_host: SocketAddr) -> IndirectRecord {
        let mut records = self.records.lock();
        if let Some(existing) = records
            .iter_mut()
            .find(|r| codec::addr::equal(&r.client_addr, &client_addr))
        {
            existing.chosen_host = Some(chosen_host);
            return existing.clone();
        }

        drop(records);
        let mut next_id = self.next_id.lock();
        *next_id = next_id.wrapping_add(1);
        let record = IndirectRecord {
            id: *next_id,
            client_addr,
            chosen_host: Some(chosen_host),
        };

        self.records.lock().push(record.clone());
        record
    }

    /// `indirect_dispose` (§4.8).
    pub fn dispose(&self, id: u32) {
        self.records.lock().retain(|r| r.id != id);
    }

    /// Dispose by `(client, chosen)` — used by MANAGED_FORWARD (§4.9).
    pub fn dispose_by_chosen(&self, client_addr: &SocketAddr, chosen_addr: &SocketAddr) {
        self.records.lock().retain(|r| {
            !(codec::addr::equal(&r.client_addr, client_addr)
                && r.chosen_host
                    .as_ref()
                    .is_some_and(|h| codec::addr::equal(h, chosen_addr)))
        });
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn alloc_then_lookup_round_trips() {
        let table = IndirectTable::default();
        let client = addr("192.0.2.5:4000");
        let record = table.alloc(client);

        let found = table.lookup(&client).unwrap();
        assert_eq!(found.id, record.id);
        assert!(found.chosen_host.is_none());
    }

    #[test]
    fn set_chosen_updates_existing_record() {
        let table = IndirectTable::default();
        let client = addr("192.0.2.5:4000");
        let chosen = addr("198.51.100.2:177");
        table.alloc(client);

        let updated = table.set_chosen(client, chosen);
        assert_eq!(updated.chosen_host, Some(chosen));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn dispose_by_chosen_removes_matching_record_only() {
        let table = IndirectTable::default();
        let client = addr("192.0.2.5:4000");
        let chosen = addr("198.51.100.2:177");
        table.set_chosen(client, chosen);

        table.dispose_by_chosen(&client, &addr("198.51.100.9:177"));
        assert_eq!(table.len(), 1, "non-matching chosen host must not dispose");

        table.dispose_by_chosen(&client, &chosen);
        assert!(table.is_empty());
    }

    #[test]
    fn lookup_by_chosen_matches_ipv4_mapped_addresses() {
        let table = IndirectTable::default();
        let client = addr("192.0.2.5:4000");
        let chosen = addr("198.51.100.2:177");
        table.set_chosen(client, chosen);

        let mapped: SocketAddr = "[::ffff:198.51.100.2]:177".parse().unwrap();
        assert!(table.lookup_by_chosen(&client, &mapped).is_some());
    }
}
