use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::address::SiteAddress;
use crate::error::RelayError;

/// Stable protocol id for the topology sub-header, preserved for interop
/// with existing deployments.
pub const TOPO_PROTOCOL_ID: u16 = 560;

/// Header-map key the encoded member list travels under, derived from
/// [`TOPO_PROTOCOL_ID`] so a wire decoder dispatches topo sub-headers on the
/// same stable id.
pub fn topo_members_header_key() -> String {
    format!("topo-members-{TOPO_PROTOCOL_ID}")
}

/// Relay header type, wire-coded as `u8`. Codes are chosen by this
/// implementation and kept stable once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RelayHeaderType {
    Data = 1,
    SiteUnreachable = 2,
    SitesUp = 3,
    SitesDown = 4,
    TopoReq = 5,
    TopoRsp = 6,
}

impl RelayHeaderType {
    pub fn from_wire(code: u8) -> Result<Self, RelayError> {
        match code {
            1 => Ok(Self::Data),
            2 => Ok(Self::SiteUnreachable),
            3 => Ok(Self::SitesUp),
            4 => Ok(Self::SitesDown),
            5 => Ok(Self::TopoReq),
            6 => Ok(Self::TopoRsp),
            other => Err(RelayError::MalformedHeader(format!("unknown relay header type {other}"))),
        }
    }

    pub fn is_admin(self) -> bool {
        !matches!(self, Self::Data)
    }
}

/// Metadata attached to messages crossing bridges: final destination,
/// originating site address, and the visited-site breadcrumbs used to break
/// multicast relay cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayHeader {
    pub ty: RelayHeaderType,
    pub final_dest: Option<SiteAddress>,
    pub original_sender: SiteAddress,
    pub sites: Option<BTreeSet<String>>,
    pub visited_sites: Option<BTreeSet<String>>,
    /// Carried rather than re-derived at the receiver: true only when the
    /// sender resolved `final_dest` via the site-master picker and the
    /// receiver should treat it as already-coordinator-bound.
    pub forward_to_current_coord: bool,
}

impl RelayHeader {
    pub fn data(final_dest: Option<SiteAddress>, original_sender: SiteAddress) -> Self {
        Self {
            ty: RelayHeaderType::Data,
            final_dest,
            original_sender,
            sites: None,
            visited_sites: None,
            forward_to_current_coord: false,
        }
    }

    pub fn with_visited_sites(mut self, visited: BTreeSet<String>) -> Self {
        self.visited_sites = Some(visited);
        self
    }

    pub fn with_forward_to_current_coord(mut self, value: bool) -> Self {
        self.forward_to_current_coord = value;
        self
    }

    pub fn site_unreachable(site: impl Into<String>, original_sender: SiteAddress) -> Self {
        let mut sites = BTreeSet::new();
        sites.insert(site.into());
        Self {
            ty: RelayHeaderType::SiteUnreachable,
            final_dest: None,
            original_sender,
            sites: Some(sites),
            visited_sites: None,
            forward_to_current_coord: false,
        }
    }

    pub fn sites_up(sites: BTreeSet<String>, original_sender: SiteAddress) -> Self {
        Self {
            ty: RelayHeaderType::SitesUp,
            final_dest: None,
            original_sender,
            sites: Some(sites),
            visited_sites: None,
            forward_to_current_coord: false,
        }
    }

    pub fn sites_down(sites: BTreeSet<String>, original_sender: SiteAddress) -> Self {
        Self {
            ty: RelayHeaderType::SitesDown,
            final_dest: None,
            original_sender,
            sites: Some(sites),
            visited_sites: None,
            forward_to_current_coord: false,
        }
    }

    pub fn topo_req(original_sender: SiteAddress) -> Self {
        Self {
            ty: RelayHeaderType::TopoReq,
            final_dest: None,
            original_sender,
            sites: None,
            visited_sites: None,
            forward_to_current_coord: false,
        }
    }

    pub fn topo_rsp(original_sender: SiteAddress) -> Self {
        Self {
            ty: RelayHeaderType::TopoRsp,
            final_dest: None,
            original_sender,
            sites: None,
            visited_sites: None,
            forward_to_current_coord: false,
        }
    }
}
