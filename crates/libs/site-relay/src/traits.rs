use std::sync::Arc;

use crate::address::{LocalAddress, SiteName};
use crate::error::RelayError;
use crate::message::Message;
use crate::view::View;

/// The only two plugin points named by the design notes: picking a site
/// master and picking among failover routes. Both default to uniform random
/// choice; embedders override for locality-aware or weighted selection.
pub trait SiteMasterPicker: Send + Sync {
    fn pick_master(&self, candidates: &[LocalAddress]) -> Option<LocalAddress>;

    /// Given `route_count` UP routes to a site in priority order, pick the
    /// index to use. The default always prefers the primary (index 0); the
    /// generic engine still calls through the trait so embedders can shed
    /// load across routes.
    fn pick_route(&self, route_count: usize) -> Option<usize> {
        (route_count > 0).then_some(0)
    }
}

/// Uniformly-random picker; the default unless an embedder installs its own
/// (§6 `site_master_picker_impl`, default "picks uniformly at random").
pub struct RandomSiteMasterPicker;

impl SiteMasterPicker for RandomSiteMasterPicker {
    fn pick_master(&self, candidates: &[LocalAddress]) -> Option<LocalAddress> {
        use rand::seq::SliceRandom;
        candidates.choose(&mut rand::thread_rng()).copied()
    }
}

/// Route-status callbacks for the embedder. All three may be left
/// unimplemented (default no-ops) — the trait is null-safe by construction
/// rather than requiring an `Option<Box<dyn ...>>` at every call site.
pub trait RouteStatusListener: Send + Sync {
    fn sites_up(&self, _sites: &[SiteName]) {}
    fn sites_down(&self, _sites: &[SiteName]) {}
    fn sites_unreachable(&self, _sites: &[SiteName]) {}
}

/// No-op listener used when the embedder does not care about route status.
pub struct NullRouteStatusListener;
impl RouteStatusListener for NullRouteStatusListener {}

/// The inter-site cluster connection one [`crate::route::Route`] forwards
/// over. Bridges are owned by the [`crate::relayer::Relayer`]; a route never
/// outlives the bridge it was built from.
pub trait Bridge: Send + Sync {
    /// Send `msg` to `dest` on this bridge's cluster, or multicast when
    /// `dest` is `None`.
    fn send(&self, dest: Option<LocalAddress>, msg: Message) -> Result<(), RelayError>;

    /// Current membership view of the bridge's cluster, if known.
    fn view(&self) -> Option<View>;

    fn is_up(&self) -> bool;

    fn close(&self);
}

/// Opens bridges to a named inter-site cluster. Joining the underlying
/// transport is an external collaborator concern (§1); this is the seam the
/// [`crate::relayer::Relayer`] calls through to get one.
#[async_trait::async_trait]
pub trait BridgeFactory: Send + Sync {
    async fn connect(&self, bridge_cluster: &str) -> Result<Arc<dyn Bridge>, RelayError>;
}

/// The external group-membership transport this crate relays on top of:
/// delivers views and raw sends/receives for the local cluster. Out of
/// scope per the spec; this trait is the contract the relay core needs from
/// it, nothing more.
pub trait Transport: Send + Sync {
    fn local_addr(&self) -> LocalAddress;

    /// Fixed per-message overhead the bundler adds to its byte estimate.
    fn per_message_overhead(&self) -> usize {
        16
    }

    /// Send a message down the local cluster stack (never across a bridge).
    fn send_down(&self, msg: Message) -> Result<(), RelayError>;

    /// Deliver a message up the local stack to the application.
    fn deliver_up(&self, msg: Message);

    /// Whether loopback delivery should happen on a separate thread from
    /// the sender (bundler loopback fast path, §4.1).
    fn loopback_on_separate_thread(&self) -> bool {
        true
    }

    /// Dispatch a loopback batch to the local processing policy, tagged
    /// with its ordering class so OOB messages can overtake regular ones.
    fn process_loopback_batch(&self, messages: Vec<Message>, oob: bool);
}
