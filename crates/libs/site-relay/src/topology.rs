use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::address::{LocalAddress, SiteName};

/// A single cached member record for some site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub addr: LocalAddress,
    pub can_become_site_master: bool,
}

/// Cache of [`MemberInfo`] per site, refreshed by TOPO_REQ/TOPO_RSP traffic.
/// Has no effect on routing decisions — it exists purely so the relay core
/// can answer "who is in site X" without a round trip.
///
/// Guarded by a mutex: admin messages (TOPO_REQ/TOPO_RSP, SITES_UP/DOWN) may
/// be delivered on a different thread than the one handling views.
pub struct Topology {
    members: Mutex<HashMap<SiteName, Vec<MemberInfo>>>,
}

impl Topology {
    pub fn new() -> Self {
        Self { members: Mutex::new(HashMap::new()) }
    }

    /// Updates this site's own entries from the current cluster view.
    pub fn adjust(&self, local_site: &SiteName, members: Vec<MemberInfo>) {
        self.members.lock().expect("topology mutex poisoned").insert(local_site.clone(), members);
    }

    /// Merges a peer's advertisement of another site's membership.
    pub fn handle_response(&self, site: &SiteName, members: Vec<MemberInfo>) {
        self.members.lock().expect("topology mutex poisoned").insert(site.clone(), members);
    }

    pub fn remove_all(&self, sites: &[SiteName]) {
        let mut table = self.members.lock().expect("topology mutex poisoned");
        for site in sites {
            table.remove(site);
        }
    }

    pub fn members_of(&self, site: &SiteName) -> Vec<MemberInfo> {
        self.members
            .lock()
            .expect("topology mutex poisoned")
            .get(site)
            .cloned()
            .unwrap_or_default()
    }

    /// Renders the cache for a single site, or all sites when `None`.
    pub fn print(&self, site: Option<&SiteName>) -> String {
        let table = self.members.lock().expect("topology mutex poisoned");
        let mut out = String::new();
        match site {
            Some(site) => {
                let members = table.get(site).cloned().unwrap_or_default();
                out.push_str(&format!("{site}: {} member(s)\n", members.len()));
            }
            None => {
                for (site, members) in table.iter() {
                    out.push_str(&format!("{site}: {} member(s)\n", members.len()));
                }
            }
        }
        out
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjust_then_lookup_round_trips() {
        let topology = Topology::new();
        let site = SiteName::new("LON");
        let members =
            vec![MemberInfo { addr: LocalAddress::from_bytes([1; 16]), can_become_site_master: true }];
        topology.adjust(&site, members.clone());
        assert_eq!(topology.members_of(&site), members);
    }

    #[test]
    fn remove_all_drops_entries() {
        let topology = Topology::new();
        let site = SiteName::new("TOK");
        topology.handle_response(&site, vec![]);
        topology.remove_all(&[site.clone()]);
        assert!(topology.members_of(&site).is_empty());
    }
}
