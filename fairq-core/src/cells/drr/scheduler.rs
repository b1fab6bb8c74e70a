use std::collections::VecDeque;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use super::flow::{Flow, FlowId, FlowTable};
use crate::cells::queue::{InnerQueue, PacketQueue};
use crate::cells::Packet;
use crate::error::{DrrConfigError, Error};
use crate::filter::{classify_chain, FilterKind, FilterResult, PacketFilter};

/// Quantum used when neither a quantum nor an MTU is configured.
pub const DEFAULT_QUANTUM: u32 = 1500;
pub const DEFAULT_FLOWS: u32 = 1024;
pub const DEFAULT_BYTE_LIMIT: usize = 1000 * 1024;

/// Why the scheduler lost a packet.
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Evicted from the heaviest flow because the byte limit was exceeded.
    Overlimit,
    /// Discarded by a flow's own queue, on admission or by its AQM.
    Queue,
}

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrrStats {
    pub enqueued_packets: u64,
    pub enqueued_bytes: u64,
    pub dequeued_packets: u64,
    pub dequeued_bytes: u64,
    pub overlimit_drops: u64,
    pub overlimit_drop_bytes: u64,
    pub queue_drops: u64,
    pub queue_drop_bytes: u64,
}

impl DrrStats {
    pub(crate) fn record_drop(&mut self, reason: DropReason, packets: usize, bytes: usize) {
        match reason {
            DropReason::Overlimit => {
                self.overlimit_drops += packets as u64;
                self.overlimit_drop_bytes += bytes as u64;
            }
            DropReason::Queue => {
                self.queue_drops += packets as u64;
                self.queue_drop_bytes += bytes as u64;
            }
        }
    }

    pub fn drops(&self) -> u64 {
        self.overlimit_drops + self.queue_drops
    }
}

fn resolve_quantum(quantum: u32, mtu: Option<u32>) -> u32 {
    if quantum > 0 {
        return quantum;
    }
    match mtu {
        Some(mtu) if mtu > 0 => mtu,
        _ => DEFAULT_QUANTUM,
    }
}

/// Collects the parts of a [`DrrScheduler`] and validates them in [`build`](Self::build).
pub struct DrrSchedulerBuilder<P, Q = InnerQueue<P>>
where
    P: Packet,
    Q: PacketQueue<P>,
{
    filters: Vec<Box<dyn PacketFilter<P>>>,
    static_classes: Vec<Q>,
    internal_queues: Vec<Q>,
    flows: u32,
    quantum: u32,
    mtu: Option<u32>,
    byte_limit: usize,
    queue_config: Q::Config,
}

impl<P, Q> Default for DrrSchedulerBuilder<P, Q>
where
    P: Packet,
    Q: PacketQueue<P>,
    Q::Config: Default,
{
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            static_classes: Vec::new(),
            internal_queues: Vec::new(),
            flows: DEFAULT_FLOWS,
            quantum: 0,
            mtu: None,
            byte_limit: DEFAULT_BYTE_LIMIT,
            queue_config: Q::Config::default(),
        }
    }
}

impl<P, Q> DrrSchedulerBuilder<P, Q>
where
    P: Packet,
    Q: PacketQueue<P> + From<Q::Config>,
    Q::Config: Default,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: PacketFilter<P> + 'static,
    {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn filters<I>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = FilterKind>,
    {
        self.filters.extend(kinds.into_iter().map(FilterKind::build));
        self
    }

    /// Number of hash buckets; unmatched packets use one extra bucket.
    pub fn flows(mut self, flows: u32) -> Self {
        self.flows = flows;
        self
    }

    /// 0 leaves the quantum to the MTU or [`DEFAULT_QUANTUM`].
    pub fn quantum(mut self, quantum: u32) -> Self {
        self.quantum = quantum;
        self
    }

    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }

    pub fn byte_limit(mut self, byte_limit: usize) -> Self {
        self.byte_limit = byte_limit;
        self
    }

    pub fn queue_config(mut self, queue_config: Q::Config) -> Self {
        self.queue_config = queue_config;
        self
    }

    /// Classes are created per flow by the scheduler; attaching one makes `build` fail.
    pub fn static_class(mut self, queue: Q) -> Self {
        self.static_classes.push(queue);
        self
    }

    /// Packets are stored in per-flow queues only; attaching one makes `build` fail.
    pub fn internal_queue(mut self, queue: Q) -> Self {
        self.internal_queues.push(queue);
        self
    }

    pub fn build(self) -> Result<DrrScheduler<P, Q>, Error> {
        let rejection = if !self.static_classes.is_empty() {
            Some(DrrConfigError::StaticClasses(self.static_classes.len()))
        } else if self.filters.is_empty() {
            Some(DrrConfigError::NoPacketFilter)
        } else if !self.internal_queues.is_empty() {
            Some(DrrConfigError::InternalQueues(self.internal_queues.len()))
        } else if self.flows == 0 {
            Some(DrrConfigError::ZeroFlows)
        } else {
            None
        };
        if let Some(e) = rejection {
            error!("Invalid DRR scheduler configuration: {}", e);
            return Err(e.into());
        }

        let quantum = resolve_quantum(self.quantum, self.mtu);
        debug!(
            flows = self.flows,
            quantum,
            byte_limit = self.byte_limit,
            filters = self.filters.len(),
            queue_config = ?self.queue_config,
            "New DrrScheduler"
        );
        Ok(DrrScheduler {
            filters: self.filters,
            flows: self.flows,
            quantum,
            mtu: self.mtu,
            byte_limit: self.byte_limit,
            queue_config: self.queue_config,
            table: FlowTable::new(),
            active: VecDeque::new(),
            backlog: 0,
            packets: 0,
            stats: DrrStats::default(),
        })
    }
}

/// Deficit Round Robin over lazily created per-bucket flows, under a global byte limit.
///
/// All sizes are network layer lengths ([`Packet::l3_length`]).
pub struct DrrScheduler<P, Q = InnerQueue<P>>
where
    P: Packet,
    Q: PacketQueue<P>,
{
    filters: Vec<Box<dyn PacketFilter<P>>>,
    flows: u32,
    quantum: u32,
    mtu: Option<u32>,
    byte_limit: usize,
    queue_config: Q::Config,
    pub(super) table: FlowTable<P, Q>,
    pub(super) active: VecDeque<FlowId>,
    pub(super) backlog: usize,
    pub(super) packets: usize,
    pub(super) stats: DrrStats,
}

impl<P, Q> fmt::Debug for DrrScheduler<P, Q>
where
    P: Packet,
    Q: PacketQueue<P> + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrrScheduler")
            .field("filters", &self.filters)
            .field("flows", &self.flows)
            .field("quantum", &self.quantum)
            .field("byte_limit", &self.byte_limit)
            .field("table", &self.table)
            .field("active", &self.active)
            .field("backlog", &self.backlog)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<P, Q> DrrScheduler<P, Q>
where
    P: Packet,
    Q: PacketQueue<P> + From<Q::Config>,
    Q::Config: Default,
{
    pub fn builder() -> DrrSchedulerBuilder<P, Q> {
        DrrSchedulerBuilder::new()
    }
}

impl<P, Q> DrrScheduler<P, Q>
where
    P: Packet,
    Q: PacketQueue<P> + From<Q::Config>,
{
    /// Classifies `packet` into its flow and queues it, then evicts from the heaviest
    /// flows until the backlog is within the byte limit again.
    pub fn enqueue(&mut self, mut packet: P) {
        let bucket = match classify_chain(&self.filters, &packet) {
            FilterResult::Match(key) => key.bucket(self.flows),
            FilterResult::NoMatch => {
                warn!(
                    overflow_bucket = self.flows,
                    "No filter has been able to classify this packet, using the overflow flow"
                );
                self.flows
            }
        };
        packet.set_flow_id(bucket);
        let l3_len = packet.l3_length();
        self.stats.enqueued_packets += 1;
        self.stats.enqueued_bytes += l3_len as u64;

        let queue_config = &self.queue_config;
        let id = self.table.get_or_insert_with(bucket, || {
            debug!(bucket, "Creating a new flow queue");
            Q::from(queue_config.clone())
        });
        let flow = &mut self.table[id];
        let bytes_before = flow.byte_count();
        let len_before = flow.len();
        flow.enqueue(packet);
        let bytes_after = flow.byte_count();
        let len_after = flow.len();

        self.backlog = self.backlog - bytes_before + bytes_after;
        self.packets = self.packets - len_before + len_after;
        let dropped = (len_before + 1).saturating_sub(len_after);
        if dropped > 0 {
            let dropped_bytes = (bytes_before + l3_len).saturating_sub(bytes_after);
            trace!(
                bucket,
                dropped,
                dropped_bytes,
                "Flow queue dropped packets on enqueue"
            );
            self.stats
                .record_drop(DropReason::Queue, dropped, dropped_bytes);
        }

        if !flow.is_active() && !flow.is_empty() {
            flow.activate();
            self.active.push_back(id);
            trace!(bucket, "Flow activated");
        }
        trace!(
            bucket,
            l3_len,
            backlog = self.backlog,
            packets = self.packets,
            "Enqueued packet"
        );

        while self.backlog > self.byte_limit {
            if self.drop_overlimit().is_none() {
                break;
            }
        }
    }

    /// Serves the active flows round robin. A flow sends its head packet once its
    /// deficit covers the packet size, otherwise it moves to the tail.
    pub fn dequeue(&mut self) -> Option<P> {
        while let Some(id) = self.active.pop_front() {
            self.table[id].add_quantum(self.quantum);
            let Some(head_len) = self.settle_head(id) else {
                trace!(bucket = self.table[id].bucket(), "Flow queue drained by its AQM");
                self.table[id].deactivate();
                continue;
            };
            let flow = &mut self.table[id];
            if flow.deficit() < head_len as i64 {
                trace!(
                    bucket = flow.bucket(),
                    deficit = flow.deficit(),
                    head_len,
                    "Deficit too small, moving flow to the tail"
                );
                self.active.push_back(id);
                continue;
            }

            let Some(packet) = flow.take_head() else {
                flow.deactivate();
                continue;
            };
            self.backlog -= head_len;
            self.packets -= 1;
            flow.consume(head_len);
            trace!(
                bucket = flow.bucket(),
                deficit = flow.deficit(),
                l3_len = head_len,
                backlog = self.backlog,
                "Dequeued packet"
            );
            if flow.is_empty() {
                flow.deactivate();
            } else {
                self.active.push_back(id);
            }
            self.stats.dequeued_packets += 1;
            self.stats.dequeued_bytes += head_len as u64;
            return Some(packet);
        }
        None
    }

    /// Head packet of the flow at the front of the round, without serving it.
    ///
    /// The head is settled through the flow queue's AQM and cached, so it is the packet
    /// that flow sends next. Flows the AQM drains on the way are deactivated.
    pub fn peek(&mut self) -> Option<&P> {
        let id = loop {
            let id = *self.active.front()?;
            if self.settle_head(id).is_some() {
                break id;
            }
            trace!(bucket = self.table[id].bucket(), "Flow queue drained by its AQM");
            self.table[id].deactivate();
            self.active.pop_front();
        };
        self.table[id].head()
    }

    /// Caches the head of flow `id` and returns its size. Packets the flow queue
    /// discards while producing it are counted as queue drops.
    fn settle_head(&mut self, id: FlowId) -> Option<usize> {
        let flow = &mut self.table[id];
        let bytes_before = flow.byte_count();
        let len_before = flow.len();
        let head_len = flow.fill_head().map(Packet::l3_length);
        let dropped = len_before - flow.len();
        if dropped > 0 {
            let dropped_bytes = bytes_before - flow.byte_count();
            self.backlog -= dropped_bytes;
            self.packets -= dropped;
            trace!(
                bucket = flow.bucket(),
                dropped,
                dropped_bytes,
                "Flow queue dropped packets on dequeue"
            );
            self.stats
                .record_drop(DropReason::Queue, dropped, dropped_bytes);
        }
        head_len
    }

    /// Takes effect at once: flows are evicted until the backlog fits.
    pub fn set_byte_limit(&mut self, byte_limit: usize) {
        debug!(before = self.byte_limit, after = byte_limit, "Set byte limit");
        self.byte_limit = byte_limit;
        while self.backlog > self.byte_limit {
            if self.drop_overlimit().is_none() {
                break;
            }
        }
    }

    /// 0 restores the default, the MTU if one was configured or [`DEFAULT_QUANTUM`].
    pub fn set_quantum(&mut self, quantum: u32) {
        let quantum = resolve_quantum(quantum, self.mtu);
        debug!(before = self.quantum, after = quantum, "Set quantum");
        self.quantum = quantum;
    }

    /// Reconfigures the queue of every existing flow and of flows created later.
    pub fn configure_queues(&mut self, queue_config: Q::Config) {
        debug!(?queue_config, "Set flow queue config");
        for (_, flow) in self.table.iter_mut() {
            let bytes_before = flow.byte_count();
            let len_before = flow.len();
            flow.configure(queue_config.clone());
            let bytes_removed = bytes_before.saturating_sub(flow.byte_count());
            let len_removed = len_before.saturating_sub(flow.len());
            if len_removed > 0 {
                self.stats
                    .record_drop(DropReason::Queue, len_removed, bytes_removed);
            }
            if flow.is_active() && flow.is_empty() {
                flow.deactivate();
            }
        }
        let table = &self.table;
        self.active.retain(|id| table[*id].is_active());
        self.backlog = self.table.iter().map(|(_, f)| f.byte_count()).sum();
        self.packets = self.table.iter().map(|(_, f)| f.len()).sum();
        self.queue_config = queue_config;
        while self.backlog > self.byte_limit {
            if self.drop_overlimit().is_none() {
                break;
            }
        }
    }
}

impl<P, Q> DrrScheduler<P, Q>
where
    P: Packet,
    Q: PacketQueue<P>,
{
    pub fn flows(&self) -> u32 {
        self.flows
    }

    pub fn quantum(&self) -> u32 {
        self.quantum
    }

    pub fn byte_limit(&self) -> usize {
        self.byte_limit
    }

    pub fn queue_config(&self) -> &Q::Config {
        &self.queue_config
    }

    /// Bytes queued over all flows.
    pub fn backlog(&self) -> usize {
        self.backlog
    }

    /// Packets queued over all flows.
    pub fn len(&self) -> usize {
        self.packets
    }

    pub fn is_empty(&self) -> bool {
        self.packets == 0
    }

    pub fn stats(&self) -> &DrrStats {
        &self.stats
    }

    pub fn flow_table(&self) -> &FlowTable<P, Q> {
        &self.table
    }

    pub fn flow(&self, bucket: u32) -> Option<&Flow<P, Q>> {
        self.table.by_bucket(bucket)
    }

    /// Active flows in service order.
    pub fn active_flows(&self) -> impl Iterator<Item = &Flow<P, Q>> {
        self.active.iter().map(|id| &self.table[*id])
    }
}
