use std::time::Duration;

use crate::address::SiteName;
use crate::error::ConfigError;

/// One reachable remote site, as described by the inter-site configuration.
#[derive(Debug, Clone)]
pub struct RemoteSiteConfig {
    pub site: SiteName,
    /// Name of the dedicated inter-site cluster this site's bridge joins.
    pub bridge_cluster: String,
}

/// Configuration for [`crate::core::RelayCore`]. Mirrors the named options
/// in the external interfaces section: every field with a documented
/// default gets one here via [`Default`]; `site` has no default and must be
/// supplied by the embedder.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub site: SiteName,
    pub remote_sites: Vec<RemoteSiteConfig>,
    pub max_site_masters: u32,
    pub site_masters_ratio: f64,
    pub can_become_site_master: bool,
    pub enable_address_tagging: bool,
    pub async_relay_creation: bool,
    pub topo_wait_time: Duration,
    pub suppress_time_no_route_errors: Duration,

    /// Deprecated, accepted and ignored for config compatibility (open
    /// question in the source: intent unspecified beyond accept-and-ignore).
    #[allow(dead_code)]
    pub relay_multicasts: bool,
    #[allow(dead_code)]
    pub can_forward_local_cluster: bool,
}

impl RelayConfig {
    pub fn new(site: impl Into<SiteName>) -> Self {
        Self { site: site.into(), ..Self::default_without_site() }
    }

    fn default_without_site() -> Self {
        Self {
            site: SiteName::new(""),
            remote_sites: Vec::new(),
            max_site_masters: 1,
            site_masters_ratio: 0.0,
            can_become_site_master: true,
            enable_address_tagging: false,
            async_relay_creation: true,
            topo_wait_time: Duration::from_secs(2),
            suppress_time_no_route_errors: Duration::from_secs(60),
            relay_multicasts: true,
            can_forward_local_cluster: true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.site.as_str().is_empty() {
            return Err(ConfigError::MissingSite);
        }
        if self.max_site_masters < 1 {
            return Err(ConfigError::InvalidMaxSiteMasters(self.max_site_masters));
        }
        if !(0.0..=1.0).contains(&self.site_masters_ratio) {
            return Err(ConfigError::InvalidSiteMastersRatio(self.site_masters_ratio));
        }
        Ok(())
    }

    /// `max(max_site_masters, floor(view_len * site_masters_ratio))`.
    pub fn max_num_site_masters(&self, view_len: usize) -> usize {
        let ratio_floor = (view_len as f64 * self.site_masters_ratio).floor() as usize;
        (self.max_site_masters as usize).max(ratio_floor)
    }
}

/// Configuration for [`crate::bundler::Bundler`].
#[derive(Debug, Clone, Copy)]
pub struct BundlerConfig {
    pub max_size: usize,
    pub capacity: usize,
    pub process_loopbacks: bool,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self { max_size: 64_000, capacity: 16_384, process_loopbacks: true }
    }
}
