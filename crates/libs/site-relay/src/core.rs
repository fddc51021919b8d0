use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use log::Level;

use crate::address::{Address, ExtendedAddress, LocalAddress, SiteAddress};
use crate::config::RelayConfig;
use crate::election::determine_site_masters;
use crate::error::RelayError;
use crate::header::{self, RelayHeader, RelayHeaderType};
use crate::message::Message;
use crate::relayer::Relayer;
use crate::suppress_log::SuppressLog;
use crate::stats::RelayStats;
use crate::topology::{MemberInfo, Topology};
use crate::traits::{BridgeFactory, RouteStatusListener, SiteMasterPicker, Transport};
use crate::view::View;

/// The relay core (C6): site-master election, view handling, the down/up
/// message paths, routing with forwarding fallback, multicast fan-out with
/// cycle prevention, and site-unreachable signalling.
///
/// `site_masters`, `is_site_master`, `relayer` and `members` are the
/// volatile, view-published fields from the spec's shared-state policy:
/// readers snapshot them once per operation and tolerate a relayer that is
/// freshly constructed but not yet started.
pub struct RelayCore<T: Transport> {
    config: RelayConfig,
    transport: Arc<T>,
    listener: Arc<dyn RouteStatusListener>,
    picker: Arc<dyn SiteMasterPicker>,
    bridge_factory: Arc<dyn BridgeFactory>,

    site_masters: RwLock<Vec<ExtendedAddress>>,
    is_site_master: AtomicBool,
    relayer: RwLock<Option<Arc<Relayer>>>,
    members: RwLock<Vec<ExtendedAddress>>,
    broadcast_route_notifications: AtomicBool,

    topology: Topology,
    suppress_log: SuppressLog,
    site_cache: std::sync::Mutex<HashSet<String>>,
    stats: RelayStats,
}

impl<T: Transport> RelayCore<T> {
    pub fn new(
        config: RelayConfig,
        transport: Arc<T>,
        listener: Arc<dyn RouteStatusListener>,
        picker: Arc<dyn SiteMasterPicker>,
        bridge_factory: Arc<dyn BridgeFactory>,
    ) -> Result<Self, crate::error::ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            listener,
            picker,
            bridge_factory,
            site_masters: RwLock::new(Vec::new()),
            is_site_master: AtomicBool::new(false),
            relayer: RwLock::new(None),
            members: RwLock::new(Vec::new()),
            broadcast_route_notifications: AtomicBool::new(false),
            topology: Topology::new(),
            suppress_log: SuppressLog::new(),
            site_cache: std::sync::Mutex::new(HashSet::new()),
            stats: RelayStats::default(),
        })
    }

    pub fn is_site_master(&self) -> bool {
        self.is_site_master.load(Ordering::SeqCst)
    }

    pub fn broadcasts_route_notifications(&self) -> bool {
        self.broadcast_route_notifications.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    fn relayer_snapshot(&self) -> Option<Arc<Relayer>> {
        self.relayer.read().expect("relayer lock poisoned").clone()
    }

    fn site_master_candidates(&self) -> Vec<LocalAddress> {
        self.site_masters.read().expect("site_masters lock poisoned").iter().map(|m| m.addr).collect()
    }

    // ---- view transition -------------------------------------------------

    /// Handles a new view: recomputes site masters, starts/stops the
    /// relayer on become/cease, and refreshes topology + suppress-log
    /// bookkeeping. Returns promptly when `async_relay_creation` is set —
    /// the relayer's bridges come up on a spawned task.
    pub async fn handle_view(self: &Arc<Self>, view: View) {
        let max_num = self.config.max_num_site_masters(view.len());
        let new_masters = determine_site_masters(&view, max_num);
        let local_addr = self.transport.local_addr();

        let old_masters = {
            let mut guard = self.site_masters.write().expect("site_masters lock poisoned");
            let old = guard.clone();
            *guard = new_masters.clone();
            old
        };
        *self.members.write().expect("members lock poisoned") = view.members.clone();

        let was_master = old_masters.iter().any(|m| m.addr == local_addr);
        let is_master_now = new_masters.iter().any(|m| m.addr == local_addr);
        self.is_site_master.store(is_master_now, Ordering::SeqCst);

        if new_masters.first().map(|m| m.addr) == Some(local_addr) {
            self.broadcast_route_notifications.store(true, Ordering::SeqCst);
        }

        let became_master = is_master_now && !was_master;
        let cease = was_master && !is_master_now;

        if became_master {
            log::info!("relay({}): became site master", self.config.site);
            self.start_relayer().await;
        } else if cease {
            log::info!("relay({}): ceased site master", self.config.site);
            self.stop_relayer();
        }

        let members: Vec<MemberInfo> = view
            .members
            .iter()
            .map(|m| MemberInfo { addr: m.addr, can_become_site_master: m.can_become_site_master })
            .collect();
        self.topology.adjust(&self.config.site, members);
        self.suppress_log.remove_expired(self.config.suppress_time_no_route_errors);
    }

    async fn start_relayer(self: &Arc<Self>) {
        self.stop_relayer();
        let relayer = Arc::new(Relayer::new(self.config.site.clone()));
        *self.relayer.write().expect("relayer lock poisoned") = Some(relayer.clone());

        if self.config.async_relay_creation {
            let config = self.config.clone();
            let bridge_factory = self.bridge_factory.clone();
            tokio::spawn(async move {
                relayer.start(&config, bridge_factory.as_ref()).await;
            });
        } else {
            relayer.start(&self.config, self.bridge_factory.as_ref()).await;
        }
    }

    fn stop_relayer(&self) {
        if let Some(relayer) = self.relayer.write().expect("relayer lock poisoned").take() {
            relayer.stop();
        }
    }

    // ---- down path: application -> network -------------------------------

    /// Sends `msg` toward `msg.dest`. Passes through unchanged when the
    /// destination is not a [`SiteAddress`].
    pub fn down(&self, mut msg: Message) -> Result<(), RelayError> {
        let Some(Address::Site(dest)) = msg.dest.clone() else {
            return self.transport.send_down(msg);
        };

        let sender = self.normalize_sender(&msg);

        if dest.site() == &self.config.site {
            self.down_local_site(dest, sender, msg)
        } else {
            self.down_remote_site(dest, sender, &mut msg)
        }
    }

    fn normalize_sender(&self, msg: &Message) -> SiteAddress {
        match &msg.src {
            Some(Address::Site(SiteAddress::Master { site })) => {
                SiteAddress::Master { site: site.clone() }
            }
            _ => SiteAddress::uuid(self.transport.local_addr(), self.config.site.clone()),
        }
    }

    fn down_local_site(
        &self,
        dest: SiteAddress,
        sender: SiteAddress,
        msg: Message,
    ) -> Result<(), RelayError> {
        let is_target = matches!(&dest, SiteAddress::Uuid { addr, .. } if *addr == self.transport.local_addr());
        let to_master_and_we_are_master = dest.is_master() && self.is_site_master();

        if is_target || to_master_and_we_are_master {
            self.deliver(dest, sender, msg);
            Ok(())
        } else {
            self.deliver_locally(dest, sender, msg)
        }
    }

    fn down_remote_site(
        &self,
        dest: SiteAddress,
        sender: SiteAddress,
        msg: &mut Message,
    ) -> Result<(), RelayError> {
        if !self.is_site_master() {
            let picked = self.picker.pick_master(&self.site_master_candidates());
            let Some(picked) = picked else {
                return Err(RelayError::NoSiteMaster);
            };
            let forward_to_current_coord = self.config.max_site_masters == 1;
            msg.relay_header = Some(
                RelayHeader::data(Some(dest), sender).with_forward_to_current_coord(forward_to_current_coord),
            );
            msg.dest = Some(Address::Local(picked));
            self.stats.incr_forwarded();
            self.transport.send_down(msg.clone())
        } else {
            self.route(dest, sender, msg.clone());
            Ok(())
        }
    }

    /// Picks a site master via `site_master_picker`, marking
    /// `forward_to_current_coord` when delivering to a [`SiteAddress::Master`];
    /// otherwise reconstructs the plain UUID destination. Wraps with a DATA
    /// relay header and sends down the local stack.
    fn deliver_locally(
        &self,
        dest: SiteAddress,
        sender: SiteAddress,
        mut msg: Message,
    ) -> Result<(), RelayError> {
        let (local_dest, forward_to_current_coord) = match &dest {
            SiteAddress::Master { .. } => {
                let picked = self.picker.pick_master(&self.site_master_candidates());
                let Some(picked) = picked else {
                    return Err(RelayError::NoSiteMaster);
                };
                (picked, true)
            }
            SiteAddress::Uuid { addr, .. } => (*addr, false),
        };

        msg.relay_header = Some(
            RelayHeader::data(Some(dest), sender).with_forward_to_current_coord(forward_to_current_coord),
        );
        msg.dest = Some(Address::Local(local_dest));
        self.stats.incr_forward_to_local_mbr();
        self.transport.send_down(msg)
    }

    /// Strips to a clean copy addressed with `(dest, sender)` and passes it
    /// up the stack.
    fn deliver(&self, dest: SiteAddress, sender: SiteAddress, msg: Message) {
        let clean = msg.stripped_for_delivery(Address::Site(dest), Address::Site(sender));
        self.stats.incr_delivered();
        self.transport.deliver_up(clean);
    }

    // ---- routing (site master) -------------------------------------------

    /// Routes `msg` toward `dest`'s site. Local-site destinations reuse the
    /// down path's intra-site rules; remote destinations go through the
    /// relayer's routing table, falling back to a forwarding route, and
    /// finally to a SITE_UNREACHABLE notification when nothing is found.
    pub fn route(&self, dest: SiteAddress, sender: SiteAddress, msg: Message) {
        if dest.site() == &self.config.site {
            if let Err(err) = self.down_local_site(dest.clone(), sender, msg) {
                log::error!("relay({}): local delivery failed: {err}", self.config.site);
            }
            return;
        }

        let local_addr = self.transport.local_addr();
        let Some(relayer) = self.relayer_snapshot() else {
            self.site_unreachable(dest.site(), sender);
            return;
        };

        let route = relayer
            .get_route(dest.site(), &local_addr)
            .or_else(|| relayer.get_forwarding_route_matching(dest.site(), &local_addr));

        match route {
            Some(route) => match route.send(Some(dest.clone()), sender.clone(), msg) {
                Ok(()) => self.stats.incr_relayed(),
                Err(err) => log::trace!("relay({}): route send to {} failed: {err}", self.config.site, dest.site()),
            },
            None => self.site_unreachable(dest.site(), sender),
        }
    }

    fn site_unreachable(&self, site: &crate::address::SiteName, sender: SiteAddress) {
        self.stats.incr_site_unreachable();
        let site_owned = site.clone();
        self.suppress_log.log(
            Level::Error,
            &format!("no-route:{site}"),
            self.config.suppress_time_no_route_errors,
            || format!("{}: no route to site {site_owned}", self.config.site),
        );

        let local_addr = self.transport.local_addr();
        if matches!(&sender, SiteAddress::Uuid { addr, .. } if *addr == local_addr) {
            self.listener.sites_unreachable(std::slice::from_ref(site));
            return;
        }

        let mut reply = Message::new(Vec::new());
        reply.dest = Some(Address::Site(sender.clone()));
        reply.src = Some(Address::Site(SiteAddress::uuid(local_addr, self.config.site.clone())));
        reply.relay_header = Some(RelayHeader::site_unreachable(site.as_str().to_string(), sender));
        let _ = self.transport.send_down(reply);
    }

    // ---- up path: network -> application -----------------------------------

    /// Handles an inbound message. Multicast data at a site master fans out
    /// to bridges first (unless `NO_RELAY` is set), then is classified by
    /// its relay header: admin types are handled and consumed, unicast DATA
    /// is routed, and multicast DATA (no relay header, or header with no
    /// `final_dest`) is delivered up-stack.
    ///
    /// Fan-out is gated on the *effective* destination, not the raw
    /// `msg.dest` field: a relayed unicast has `msg.dest` cleared by
    /// `Route::send` before it crosses a bridge, so `msg.dest.is_none()`
    /// alone can't tell a unicast DATA message apart from a true multicast.
    /// Admin types never carry a `final_dest` either and must not be
    /// re-fanned-out as if they were multicasts.
    pub fn up(&self, msg: Message) {
        let is_multicast = match &msg.relay_header {
            Some(header) => !header.ty.is_admin() && header.final_dest.is_none(),
            None => msg.dest.is_none(),
        };
        if is_multicast && self.is_site_master() && !msg.flags.no_relay {
            self.send_to_bridges(msg.clone());
        }

        let Some(header) = msg.relay_header.clone() else {
            if msg.headers.contains_key(header::topo_members_header_key().as_str()) {
                self.handle_topo_rsp(msg);
            } else {
                self.transport.deliver_up(msg);
            }
            return;
        };

        if header.ty.is_admin() {
            self.handle_admin(header, msg);
            return;
        }

        match header.final_dest {
            Some(dest) => self.route(dest, header.original_sender, msg),
            None => self.transport.deliver_up(msg),
        }
    }

    /// Batch form: same classification as [`Self::up`], but
    /// SITE_UNREACHABLE notifications are coalesced so a batch with
    /// multiple unreachable-site records for the same site notifies once.
    pub fn up_batch(&self, messages: Vec<Message>) {
        let mut unreachable_sites: BTreeSet<String> = BTreeSet::new();

        for msg in messages {
            if let Some(header) = &msg.relay_header {
                if header.ty == RelayHeaderType::SiteUnreachable {
                    if let Some(sites) = &header.sites {
                        unreachable_sites.extend(sites.iter().cloned());
                    }
                    continue;
                }
            }
            self.up(msg);
        }

        if !unreachable_sites.is_empty() {
            let sites: Vec<crate::address::SiteName> =
                unreachable_sites.into_iter().map(crate::address::SiteName::new).collect();
            self.listener.sites_unreachable(&sites);
        }
    }

    /// Multicast relaying with cycle prevention: computes the visited-site
    /// set, fans out to every not-yet-visited site's routes (trying
    /// alternates on failure, stopping at the first success per site), and
    /// propagates the visited set so downstream relays don't echo back.
    fn send_to_bridges(&self, msg: Message) {
        let Some(relayer) = self.relayer_snapshot() else {
            return;
        };

        let header = msg.relay_header.clone();
        let mut visited: BTreeSet<String> =
            header.as_ref().and_then(|h| h.visited_sites.clone()).unwrap_or_default();
        visited.insert(self.config.site.as_str().to_string());

        let original_sender = header
            .as_ref()
            .map(|h| h.original_sender.clone())
            .unwrap_or_else(|| SiteAddress::uuid(self.transport.local_addr(), self.config.site.clone()));

        let to_visit: Vec<crate::address::SiteName> = relayer
            .site_names()
            .into_iter()
            .filter(|site| !visited.contains(site.as_str()))
            .collect();

        for site in to_visit {
            let mut sent = false;
            for route in relayer.routes_for(&site) {
                match route.send_with_visited(None, original_sender.clone(), msg.clone(), visited.clone()) {
                    Ok(()) => {
                        self.stats.incr_relayed();
                        sent = true;
                        break;
                    }
                    Err(err) => {
                        log::trace!(
                            "relay({}): multicast send to {site} failed, trying next route: {err}",
                            self.config.site
                        );
                    }
                }
            }
            if !sent {
                log::warn!("relay({}): all routes to {site} failed during multicast fan-out", self.config.site);
            }
        }
    }

    fn handle_admin(&self, header: RelayHeader, msg: Message) {
        match header.ty {
            RelayHeaderType::SiteUnreachable => {
                if let Some(sites) = &header.sites {
                    let sites: Vec<crate::address::SiteName> =
                        sites.iter().cloned().map(crate::address::SiteName::new).collect();
                    self.listener.sites_unreachable(&sites);
                }
            }
            RelayHeaderType::SitesUp => self.handle_sites_up(header.sites.unwrap_or_default()),
            RelayHeaderType::SitesDown => self.handle_sites_down(header.sites.unwrap_or_default()),
            RelayHeaderType::TopoReq => self.handle_topo_req(msg),
            RelayHeaderType::TopoRsp => self.handle_topo_rsp(msg),
            RelayHeaderType::Data => unreachable!("handle_admin only called for admin types"),
        }
    }

    fn handle_sites_up(&self, mut sites: BTreeSet<String>) {
        sites.remove(self.config.site.as_str());

        let mut cache = self.site_cache.lock().expect("site_cache lock poisoned");
        let new_sites: Vec<String> = sites.into_iter().filter(|s| !cache.contains(s)).collect();
        if !new_sites.is_empty() {
            let names: Vec<crate::address::SiteName> =
                new_sites.iter().cloned().map(crate::address::SiteName::new).collect();
            self.listener.sites_up(&names);
            cache.extend(new_sites);
        }
    }

    fn handle_sites_down(&self, mut sites: BTreeSet<String>) {
        sites.remove(self.config.site.as_str());
        let names: Vec<crate::address::SiteName> =
            sites.iter().cloned().map(crate::address::SiteName::new).collect();
        self.listener.sites_down(&names);

        let mut cache = self.site_cache.lock().expect("site_cache lock poisoned");
        for site in &sites {
            cache.remove(site);
        }
        self.topology.remove_all(&names);
    }

    /// TOPO_RSP handling: decode the member list carried under the topo
    /// members header key and merge it into this site's cache under the
    /// sender's site name. The wire encoding of the payload itself belongs
    /// to the transport's codec; this only interprets the decoded bytes.
    fn handle_topo_rsp(&self, msg: Message) {
        let Some(Address::Site(src)) = &msg.src else {
            return;
        };
        let site = src.site().clone();
        let members = msg
            .headers
            .get(header::topo_members_header_key().as_str())
            .and_then(|bytes| serde_json::from_slice::<Vec<MemberInfo>>(bytes).ok())
            .unwrap_or_default();
        self.topology.handle_response(&site, members);
    }

    /// TOPO_REQ handling: render this site's own cached member list and send
    /// a TOPO_RSP back to the requester.
    fn handle_topo_req(&self, msg: Message) {
        let Some(Address::Site(requester)) = msg.src else {
            return;
        };
        let local_addr = self.transport.local_addr();
        let local_site_address = SiteAddress::uuid(local_addr, self.config.site.clone());
        let members = self.topology.members_of(&self.config.site);
        let Ok(encoded) = serde_json::to_vec(&members) else {
            log::warn!("relay({}): failed to encode topo response for {requester}", self.config.site);
            return;
        };

        let mut reply = Message::new(Vec::new());
        reply.headers.insert(header::topo_members_header_key(), encoded);
        reply.dest = Some(Address::Site(requester));
        reply.src = Some(Address::Site(local_site_address.clone()));
        reply.relay_header = Some(RelayHeader::topo_rsp(local_site_address));
        if let Err(err) = self.transport.send_down(reply) {
            log::warn!("relay({}): topo response send failed: {err}", self.config.site);
        }
    }
}
