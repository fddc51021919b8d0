use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::address::{LocalAddress, SiteName};
use crate::config::{RelayConfig, RemoteSiteConfig};
use crate::route::{Route, RouteStatus};
use crate::traits::{Bridge, BridgeFactory};
use crate::view::View;

/// Owns every open bridge plus the routing table (site name -> ordered
/// routes, primary first). Its lifetime spans exactly one "we are a site
/// master" period: created on `become site master`, stopped on `cease`.
///
/// Invariant: every route's bridge is present in `bridges`; no route
/// outlives its bridge (enforced by only ever removing a route alongside,
/// or before, the bridge it points at).
pub struct Relayer {
    local_site: SiteName,
    routes: RwLock<HashMap<SiteName, Vec<Route>>>,
    bridges: RwLock<Vec<Arc<dyn Bridge>>>,
}

impl Relayer {
    pub fn new(local_site: SiteName) -> Self {
        Self { local_site, routes: RwLock::new(HashMap::new()), bridges: RwLock::new(Vec::new()) }
    }

    /// Opens one bridge per configured remote site. When
    /// `config.async_relay_creation` is set, callers should run this inside
    /// `tokio::spawn` and tolerate `self` being usable — with empty routes —
    /// while it runs; this method itself just does the connecting.
    pub async fn start(
        self: &Arc<Self>,
        config: &RelayConfig,
        factory: &dyn BridgeFactory,
    ) {
        for remote in &config.remote_sites {
            self.start_one_bridge(remote, factory).await;
        }
    }

    async fn start_one_bridge(&self, remote: &RemoteSiteConfig, factory: &dyn BridgeFactory) {
        match factory.connect(&remote.bridge_cluster).await {
            Ok(bridge) => {
                self.bridges.write().expect("relayer bridges lock poisoned").push(bridge.clone());
                let route = Route::new(remote.site.clone(), bridge);
                self.routes
                    .write()
                    .expect("relayer routes lock poisoned")
                    .entry(remote.site.clone())
                    .or_default()
                    .push(route);
                log::info!("relayer({}): bridge up for site {}", self.local_site, remote.site);
            }
            Err(err) => {
                log::error!(
                    "relayer({}): bridge startup failed for site {}: {err}",
                    self.local_site,
                    remote.site
                );
            }
        }
    }

    /// Closes every bridge and clears the routing table.
    pub fn stop(&self) {
        for bridge in self.bridges.write().expect("relayer bridges lock poisoned").drain(..) {
            bridge.close();
        }
        self.routes.write().expect("relayer routes lock poisoned").clear();
    }

    /// Marks every route through `bridge` as DOWN, and drops it if
    /// `remove` is set (bridge-loss handling referenced in §4.3).
    pub fn mark_bridge_down(&self, bridge: &Arc<dyn Bridge>, remove: bool) {
        let mut routes = self.routes.write().expect("relayer routes lock poisoned");
        for site_routes in routes.values_mut() {
            for route in site_routes.iter_mut() {
                if Arc::ptr_eq(&route.bridge, bridge) {
                    route.status = RouteStatus::Down;
                }
            }
            if remove {
                site_routes.retain(|route| !Arc::ptr_eq(&route.bridge, bridge));
            }
        }
    }

    /// Returns the primary UP route for `site`, if any. `_sender` is part of
    /// the contract (a picker may weigh routes by sender) but the default
    /// lookup ignores it.
    pub fn get_route(&self, site: &SiteName, _sender: &LocalAddress) -> Option<RouteHandle> {
        let routes = self.routes.read().expect("relayer routes lock poisoned");
        routes.get(site)?.iter().find(|route| route.is_up()).map(RouteHandle::from)
    }

    /// Fallback lookup for transitive forwarding via an intermediate site.
    /// This relayer only owns routes it directly bridges to — a route
    /// stored under key `known_site` always has `route.site_name ==
    /// known_site` (see `start_one_bridge`) — so there is no data here that
    /// could ever resolve a site this relayer doesn't already have a direct
    /// route for. Always `None`; left as the hook `core::route` calls after
    /// `get_route` misses, for an embedder wiring in real cross-site
    /// topology knowledge (open question, resolved per DESIGN.md).
    pub fn get_forwarding_route_matching(
        &self,
        _site: &SiteName,
        _sender: &LocalAddress,
    ) -> Option<RouteHandle> {
        None
    }

    pub fn site_names(&self) -> Vec<SiteName> {
        self.routes.read().expect("relayer routes lock poisoned").keys().cloned().collect()
    }

    pub fn print_routes(&self) -> String {
        let routes = self.routes.read().expect("relayer routes lock poisoned");
        let mut out = String::new();
        for (site, site_routes) in routes.iter() {
            out.push_str(&format!(
                "{site}: {} route(s), {} up\n",
                site_routes.len(),
                site_routes.iter().filter(|r| r.is_up()).count()
            ));
        }
        out
    }

    /// Every UP route to `site`, primary first — used by multicast fan-out,
    /// which must try alternates on failure rather than stop at the first.
    pub fn routes_for(&self, site: &SiteName) -> Vec<RouteHandle> {
        let routes = self.routes.read().expect("relayer routes lock poisoned");
        routes
            .get(site)
            .map(|site_routes| site_routes.iter().filter(|r| r.is_up()).map(RouteHandle::from).collect())
            .unwrap_or_default()
    }

    pub fn bridge_view(&self, cluster_site: &SiteName) -> Option<View> {
        let routes = self.routes.read().expect("relayer routes lock poisoned");
        routes.get(cluster_site)?.first()?.bridge.view()
    }
}

/// A cheap, Clone-free snapshot reference used by callers that need to act
/// on a route without holding the relayer's lock across an `.await`.
pub struct RouteHandle {
    pub site_name: SiteName,
    pub bridge: Arc<dyn Bridge>,
    pub site_master_address_on_bridge: Option<LocalAddress>,
}

impl From<&Route> for RouteHandle {
    fn from(route: &Route) -> Self {
        Self {
            site_name: route.site_name.clone(),
            bridge: route.bridge.clone(),
            site_master_address_on_bridge: route.site_master_address_on_bridge,
        }
    }
}

impl RouteHandle {
    pub fn send(
        &self,
        final_dest: Option<crate::address::SiteAddress>,
        original_sender: crate::address::SiteAddress,
        msg: crate::message::Message,
    ) -> Result<(), crate::error::RelayError> {
        let route = Route {
            site_name: self.site_name.clone(),
            bridge: self.bridge.clone(),
            site_master_address_on_bridge: self.site_master_address_on_bridge,
            status: RouteStatus::Up,
        };
        route.send(final_dest, original_sender, msg)
    }

    pub fn send_with_visited(
        &self,
        final_dest: Option<crate::address::SiteAddress>,
        original_sender: crate::address::SiteAddress,
        msg: crate::message::Message,
        visited_sites: std::collections::BTreeSet<String>,
    ) -> Result<(), crate::error::RelayError> {
        let route = Route {
            site_name: self.site_name.clone(),
            bridge: self.bridge.clone(),
            site_master_address_on_bridge: self.site_master_address_on_bridge,
            status: RouteStatus::Up,
        };
        route.send_with_visited(final_dest, original_sender, msg, visited_sites)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use crate::message::Message;

    struct StubBridge;
    impl Bridge for StubBridge {
        fn send(&self, _dest: Option<LocalAddress>, _msg: Message) -> Result<(), RelayError> {
            Ok(())
        }
        fn view(&self) -> Option<View> {
            None
        }
        fn is_up(&self) -> bool {
            true
        }
        fn close(&self) {}
    }

    struct StubFactory;
    #[async_trait::async_trait]
    impl BridgeFactory for StubFactory {
        async fn connect(&self, _cluster: &str) -> Result<Arc<dyn Bridge>, RelayError> {
            Ok(Arc::new(StubBridge))
        }
    }

    #[tokio::test]
    async fn start_registers_a_route_per_remote_site() {
        let relayer = Arc::new(Relayer::new(SiteName::new("LON")));
        let mut config = RelayConfig::new("LON");
        config.remote_sites = vec![RemoteSiteConfig {
            site: SiteName::new("SFO"),
            bridge_cluster: "lon-sfo".into(),
        }];
        relayer.start(&config, &StubFactory).await;

        assert_eq!(relayer.site_names(), vec![SiteName::new("SFO")]);
        assert!(relayer.get_route(&SiteName::new("SFO"), &LocalAddress::from_bytes([0; 16])).is_some());
    }

    #[test]
    fn absent_route_returns_none() {
        let relayer = Relayer::new(SiteName::new("LON"));
        assert!(relayer.get_route(&SiteName::new("TOK"), &LocalAddress::from_bytes([0; 16])).is_none());
    }

    #[tokio::test]
    async fn stop_clears_routes_and_closes_bridges() {
        let relayer = Arc::new(Relayer::new(SiteName::new("LON")));
        let mut config = RelayConfig::new("LON");
        config.remote_sites =
            vec![RemoteSiteConfig { site: SiteName::new("SFO"), bridge_cluster: "x".into() }];
        relayer.start(&config, &StubFactory).await;
        relayer.stop();
        assert!(relayer.site_names().is_empty());
    }
}
