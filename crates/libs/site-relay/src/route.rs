use std::collections::BTreeSet;
use std::sync::Arc;

use crate::address::{LocalAddress, SiteAddress, SiteName};
use crate::error::RelayError;
use crate::header::RelayHeader;
use crate::message::Message;
use crate::traits::Bridge;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStatus {
    Up,
    Down,
}

/// One directional path to a remote site over a single bridge. The route's
/// lifetime ends when its bridge is closed; it never outlives it (owned
/// exclusively by the [`crate::relayer::Relayer`]).
pub struct Route {
    pub site_name: SiteName,
    pub bridge: Arc<dyn Bridge>,
    pub site_master_address_on_bridge: Option<LocalAddress>,
    pub status: RouteStatus,
}

impl Route {
    pub fn new(site_name: SiteName, bridge: Arc<dyn Bridge>) -> Self {
        Self { site_name, bridge, site_master_address_on_bridge: None, status: RouteStatus::Up }
    }

    pub fn is_up(&self) -> bool {
        self.status == RouteStatus::Up
    }

    /// Wraps `msg` with a DATA relay header and forwards it down the
    /// bridge's protocol stack. The wrapped message's own dest/source are
    /// cleared; the relay header carries end-to-end identity instead.
    pub fn send(
        &self,
        final_dest: Option<SiteAddress>,
        original_sender: SiteAddress,
        mut msg: Message,
    ) -> Result<(), RelayError> {
        msg.dest = None;
        msg.src = None;
        msg.relay_header = Some(RelayHeader::data(final_dest, original_sender));
        self.bridge.send(self.site_master_address_on_bridge, msg)
    }

    /// As [`Route::send`], but also populates `visited_sites` so downstream
    /// relays will not echo a multicast back through this route.
    pub fn send_with_visited(
        &self,
        final_dest: Option<SiteAddress>,
        original_sender: SiteAddress,
        mut msg: Message,
        visited_sites: BTreeSet<String>,
    ) -> Result<(), RelayError> {
        msg.dest = None;
        msg.src = None;
        msg.relay_header =
            Some(RelayHeader::data(final_dest, original_sender).with_visited_sites(visited_sites));
        self.bridge.send(self.site_master_address_on_bridge, msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::view::View;

    struct RecordingBridge {
        sent: Mutex<Vec<Message>>,
        fail: bool,
    }

    impl Bridge for RecordingBridge {
        fn send(&self, _dest: Option<LocalAddress>, msg: Message) -> Result<(), RelayError> {
            if self.fail {
                return Err(RelayError::BridgeSend("boom".into()));
            }
            self.sent.lock().unwrap().push(msg);
            Ok(())
        }

        fn view(&self) -> Option<View> {
            None
        }

        fn is_up(&self) -> bool {
            !self.fail
        }

        fn close(&self) {}
    }

    #[test]
    fn send_clears_dest_and_src_and_wraps_header() {
        let bridge = Arc::new(RecordingBridge { sent: Mutex::new(Vec::new()), fail: false });
        let route = Route::new(SiteName::new("SFO"), bridge.clone());
        let msg = Message::new(vec![1, 2, 3])
            .with_dest(SiteAddress::uuid(LocalAddress::from_bytes([2; 16]), "SFO"))
            .with_src(SiteAddress::uuid(LocalAddress::from_bytes([1; 16]), "LON"));

        route
            .send(
                Some(SiteAddress::uuid(LocalAddress::from_bytes([2; 16]), "SFO")),
                SiteAddress::uuid(LocalAddress::from_bytes([1; 16]), "LON"),
                msg,
            )
            .unwrap();

        let sent = bridge.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].dest.is_none());
        assert!(sent[0].src.is_none());
        assert!(sent[0].relay_header.is_some());
    }

    #[test]
    fn send_propagates_bridge_failure() {
        let bridge = Arc::new(RecordingBridge { sent: Mutex::new(Vec::new()), fail: true });
        let route = Route::new(SiteName::new("SFO"), bridge);
        let result = route.send(
            None,
            SiteAddress::uuid(LocalAddress::from_bytes([1; 16]), "LON"),
            Message::new(vec![]),
        );
        assert!(result.is_err());
    }
}
