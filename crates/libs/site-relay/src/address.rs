use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// An opaque cluster-unique identifier for a single member.
///
/// Modeled as a fixed-size byte array rather than an inheritance hierarchy
/// so equality, hashing and wire identity fall out of `derive` instead of a
/// dispatch table (see the "Polymorphic addresses" design note).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalAddress([u8; 16]);

impl LocalAddress {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for LocalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Display for LocalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Cheaply-cloned site name; sites are looked up by name constantly on the
/// hot path (routing table keys, visited-site sets) so this avoids a `String`
/// allocation per clone.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SiteName(Arc<str>);

impl SiteName {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Serialize for SiteName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SiteName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(SiteName::new)
    }
}

impl fmt::Debug for SiteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SiteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SiteName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SiteName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A [`LocalAddress`] tagged with a site name: either a concrete member, or
/// the virtual "current site master of this site" destination that is
/// resolved dynamically at delivery time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SiteAddress {
    /// A concrete remote or local member in a named site.
    Uuid { addr: LocalAddress, site: SiteName },
    /// "The current site master of `site`", resolved at delivery time.
    Master { site: SiteName },
}

impl SiteAddress {
    pub fn site(&self) -> &SiteName {
        match self {
            SiteAddress::Uuid { site, .. } => site,
            SiteAddress::Master { site } => site,
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self, SiteAddress::Master { .. })
    }

    pub fn uuid(addr: LocalAddress, site: impl Into<SiteName>) -> Self {
        SiteAddress::Uuid { addr, site: site.into() }
    }

    pub fn master(site: impl Into<SiteName>) -> Self {
        SiteAddress::Master { site: site.into() }
    }
}

/// A `SiteMaster` is equal only to another `SiteMaster` of the same site; a
/// `SiteUUID` is equal only to another `SiteUUID` with the same address and
/// site. The two variants never compare equal to each other.
impl PartialEq for SiteAddress {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SiteAddress::Uuid { addr: a, site: sa }, SiteAddress::Uuid { addr: b, site: sb }) => {
                a == b && sa == sb
            }
            (SiteAddress::Master { site: sa }, SiteAddress::Master { site: sb }) => sa == sb,
            _ => false,
        }
    }
}
impl Eq for SiteAddress {}

impl std::hash::Hash for SiteAddress {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            SiteAddress::Uuid { addr, site } => {
                0u8.hash(state);
                addr.hash(state);
                site.hash(state);
            }
            SiteAddress::Master { site } => {
                1u8.hash(state);
                site.hash(state);
            }
        }
    }
}

impl fmt::Display for SiteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteAddress::Uuid { addr, site } => write!(f, "{addr}@{site}"),
            SiteAddress::Master { site } => write!(f, "master@{site}"),
        }
    }
}

/// A [`LocalAddress`] carrying the flag set needed by the relay core. The
/// only flag the core reads is `can_become_site_master`; other bits are
/// opaque to this crate and simply round-trip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedAddress {
    pub addr: LocalAddress,
    pub can_become_site_master: bool,
}

impl ExtendedAddress {
    pub fn new(addr: LocalAddress, can_become_site_master: bool) -> Self {
        Self { addr, can_become_site_master }
    }
}

/// Either a plain cluster member or a tagged site address. `down()` only
/// acts on the `Site` variant; anything else passes through unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Address {
    Local(LocalAddress),
    Site(SiteAddress),
}

impl From<LocalAddress> for Address {
    fn from(value: LocalAddress) -> Self {
        Address::Local(value)
    }
}

impl From<SiteAddress> for Address {
    fn from(value: SiteAddress) -> Self {
        Address::Site(value)
    }
}
