use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::address::Address;
use crate::config::BundlerConfig;
use crate::message::Message;
use crate::stats::FlushStats;
use crate::traits::Transport;

/// Per-destination outbound accumulator. Guarded by a single mutex held for
/// the entirety of `add_message`/`flush`/`size`, matching the spec's
/// concurrency model: senders may block on the mutex, and the shared
/// serialize buffer is logically reset before each send while the lock is
/// held (this crate doesn't own a shared byte buffer — serialization is the
/// transport's job — but flush still does all work under one lock to
/// preserve the same blocking behavior callers depend on).
pub struct Bundler<T: Transport> {
    transport: Arc<T>,
    config: BundlerConfig,
    collect_stats: bool,
    inner: Mutex<Inner>,
}

struct Inner {
    msgs: HashMap<DestKey, Vec<Message>>,
    count: usize,
    flush_stats: FlushStats,
}

/// `Address` doesn't implement `Hash`/`Eq` uniformly enough to be a map key
/// directly (a `None` destination and the transport's own address bundle
/// together); this normalizes both to one key per spec's "dest is null *or*
/// equals transport.address" rule used at flush time.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum DestKey {
    Local(Option<crate::address::LocalAddress>),
    Site(crate::address::SiteAddress),
}

impl DestKey {
    fn of(dest: &Option<Address>) -> Self {
        match dest {
            None => DestKey::Local(None),
            Some(Address::Local(addr)) => DestKey::Local(Some(*addr)),
            Some(Address::Site(site)) => DestKey::Site(site.clone()),
        }
    }

    fn is_local(&self, local_addr: crate::address::LocalAddress) -> bool {
        match self {
            DestKey::Local(None) => true,
            DestKey::Local(Some(addr)) => *addr == local_addr,
            DestKey::Site(_) => false,
        }
    }
}

impl<T: Transport> Bundler<T> {
    pub fn new(transport: Arc<T>, config: BundlerConfig, collect_stats: bool) -> Self {
        Self {
            transport,
            config,
            collect_stats,
            inner: Mutex::new(Inner {
                msgs: HashMap::new(),
                count: 0,
                flush_stats: FlushStats::default(),
            }),
        }
    }

    /// Accumulates `msg` under its destination; a send failure during the
    /// eventual flush is logged and swallowed, never surfaced here.
    pub fn send(&self, msg: Message) {
        let overhead = self.transport.per_message_overhead();
        let size = msg.estimated_size(overhead);
        let mut inner = self.inner.lock().expect("bundler mutex poisoned");
        self.add_message_locked(&mut inner, msg, size);
        if inner.count >= self.config.max_size {
            self.flush_locked(&mut inner);
        }
    }

    fn add_message_locked(&self, inner: &mut Inner, msg: Message, size: usize) {
        let key = DestKey::of(&msg.dest);
        inner.msgs.entry(key).or_default().push(msg);
        inner.count += size;
    }

    /// Accumulated byte total currently queued.
    pub fn size(&self) -> usize {
        self.inner.lock().expect("bundler mutex poisoned").count
    }

    /// Flushes every non-empty destination queue: a lone message is sent
    /// standalone, two or more are serialized as one batch addressed to the
    /// destination with source = the first message's source. Either way the
    /// queue is then loopback-dispatched and cleared.
    pub fn flush(&self) {
        let mut inner = self.inner.lock().expect("bundler mutex poisoned");
        self.flush_locked(&mut inner);
    }

    fn flush_locked(&self, inner: &mut Inner) {
        let started = self.collect_stats.then(Instant::now);
        let local_addr = self.transport.local_addr();

        for (key, mut queue) in inner.msgs.drain() {
            if queue.is_empty() {
                continue;
            }

            let is_local = key.is_local(local_addr);

            if queue.len() == 1 {
                let msg = queue.remove(0);
                self.send_standalone(msg, is_local);
            } else {
                self.send_batch(queue, is_local);
            }
        }

        inner.count = 0;

        if let Some(started) = started {
            inner.flush_stats.record(started.elapsed().as_nanos() as u64);
        }
    }

    fn send_standalone(&self, msg: Message, is_local: bool) {
        let dont_loopback = msg.flags.dont_loopback;
        let loopback_candidate = msg.clone();
        if let Err(err) = self.transport.send_down(msg) {
            log::trace!("bundler: send failed, dropping message: {err}");
            return;
        }
        if is_local && !dont_loopback && self.config.process_loopbacks {
            self.dispatch_loopback(vec![loopback_candidate]);
        }
    }

    fn send_batch(&self, queue: Vec<Message>, is_local: bool) {
        let first_src = queue[0].src.clone();
        let mut batch = Message::new(Vec::new());
        batch.src = first_src;
        // The real wire form serializes `queue` as one payload; this crate
        // hands the still-structured batch to the transport, which owns the
        // actual wire encoding (an external collaborator per the spec).
        batch.headers.insert("batch_len".to_string(), queue.len().to_le_bytes().to_vec());
        let loopback_candidates = queue.clone();

        if let Err(err) = self.send_serialized_batch(batch, queue) {
            log::trace!("bundler: batch send failed, dropping {} message(s): {err}", loopback_candidates.len());
            return;
        }

        if is_local && self.config.process_loopbacks {
            self.dispatch_loopback(loopback_candidates);
        }
    }

    fn send_serialized_batch(
        &self,
        mut batch: Message,
        queue: Vec<Message>,
    ) -> Result<(), crate::error::RelayError> {
        batch.payload = queue.into_iter().flat_map(|m| m.payload).collect();
        self.transport.send_down(batch)
    }

    /// Partitions the batch by OOB flag, skips `DONT_LOOPBACK` messages, and
    /// hands each non-empty partition to the transport's processing policy
    /// — but only when the transport elected loopback on a separate thread.
    fn dispatch_loopback(&self, messages: Vec<Message>) {
        if !self.transport.loopback_on_separate_thread() {
            return;
        }

        let mut oob = Vec::new();
        let mut reg = Vec::new();
        for msg in messages {
            if msg.flags.dont_loopback {
                continue;
            }
            if msg.flags.oob {
                oob.push(msg);
            } else {
                reg.push(msg);
            }
        }

        if !oob.is_empty() {
            self.transport.process_loopback_batch(oob, true);
        }
        if !reg.is_empty() {
            self.transport.process_loopback_batch(reg, false);
        }
    }

    pub fn flush_stats(&self) -> crate::stats::FlushStats {
        self.inner.lock().expect("bundler mutex poisoned").flush_stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::LocalAddress;
    use crate::message::MessageFlags;
    use std::sync::Mutex as StdMutex;

    struct RecordingTransport {
        local: LocalAddress,
        sent: StdMutex<Vec<Message>>,
        loopbacks: StdMutex<Vec<(usize, bool)>>,
    }

    impl Transport for RecordingTransport {
        fn local_addr(&self) -> LocalAddress {
            self.local
        }
        fn send_down(&self, msg: Message) -> Result<(), crate::error::RelayError> {
            self.sent.lock().unwrap().push(msg);
            Ok(())
        }
        fn deliver_up(&self, _msg: Message) {}
        fn process_loopback_batch(&self, messages: Vec<Message>, oob: bool) {
            self.loopbacks.lock().unwrap().push((messages.len(), oob));
        }
    }

    fn transport() -> Arc<RecordingTransport> {
        Arc::new(RecordingTransport {
            local: LocalAddress::from_bytes([0; 16]),
            sent: StdMutex::new(Vec::new()),
            loopbacks: StdMutex::new(Vec::new()),
        })
    }

    #[test]
    fn single_message_per_destination_sends_standalone_and_loopback() {
        let transport = transport();
        let bundler = Bundler::new(transport.clone(), BundlerConfig::default(), false);
        bundler.send(Message::new(vec![1, 2, 3]));
        bundler.flush();

        assert_eq!(transport.sent.lock().unwrap().len(), 1);
        assert_eq!(transport.loopbacks.lock().unwrap().len(), 1);
        assert_eq!(bundler.size(), 0);
    }

    #[test]
    fn two_messages_to_same_destination_coalesce_into_one_batch_send() {
        let transport = transport();
        let bundler = Bundler::new(transport.clone(), BundlerConfig::default(), false);
        bundler.send(Message::new(vec![0; 30_000]));
        bundler.send(Message::new(vec![1; 30_000]));
        bundler.flush();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload.len(), 60_000);
        assert_eq!(bundler.size(), 0);
    }

    #[test]
    fn dont_loopback_messages_never_loop_back() {
        let transport = transport();
        let bundler = Bundler::new(transport.clone(), BundlerConfig::default(), false);
        let msg = Message::new(vec![9])
            .with_flags(MessageFlags { dont_loopback: true, ..Default::default() });
        bundler.send(msg);
        bundler.flush();

        assert!(transport.loopbacks.lock().unwrap().is_empty());
    }

    #[test]
    fn oob_and_regular_loopbacks_dispatch_as_separate_batches() {
        let transport = transport();
        let bundler = Bundler::new(transport.clone(), BundlerConfig::default(), false);
        bundler.send(
            Message::new(vec![1]).with_flags(MessageFlags { oob: true, ..Default::default() }),
        );
        bundler.send(Message::new(vec![2]));
        bundler.flush();

        let loopbacks = transport.loopbacks.lock().unwrap();
        assert_eq!(loopbacks.len(), 2);
        assert!(loopbacks.contains(&(1, true)));
        assert!(loopbacks.contains(&(1, false)));
    }

    #[test]
    fn different_destinations_stay_in_fifo_order_per_destination() {
        let transport = transport();
        let bundler = Bundler::new(transport.clone(), BundlerConfig::default(), false);
        let dest = Address::Local(LocalAddress::from_bytes([7; 16]));
        bundler.send(Message::new(vec![1]).with_dest(dest.clone()));
        bundler.send(Message::new(vec![2]).with_dest(dest));
        bundler.flush();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].payload, vec![1, 2]);
    }
}
