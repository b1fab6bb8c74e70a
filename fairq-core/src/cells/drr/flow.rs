//! Per-bucket flow state and the table that owns it.

use std::collections::HashMap;
use std::ops::{Index, IndexMut};

use crate::cells::queue::PacketQueue;
use crate::cells::Packet;

/// Stable handle of a flow inside its [`FlowTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    Inactive,
    Active,
}

/// A flow owns its queue plus the head packet that queue has already handed out.
///
/// The head is taken through the queue's own `dequeue`, so any AQM decision about it
/// is made once, and the packet the deficit is checked against is the packet served.
/// It still belongs to the flow: `len`, `byte_count` and `is_empty` include it.
#[derive(Debug)]
pub struct Flow<P, Q> {
    bucket: u32,
    deficit: i64,
    status: FlowStatus,
    head: Option<P>,
    queue: Q,
}

impl<P, Q> Flow<P, Q> {
    pub fn new(bucket: u32, queue: Q) -> Self {
        Self {
            bucket,
            deficit: 0,
            status: FlowStatus::Inactive,
            head: None,
            queue,
        }
    }

    pub fn bucket(&self) -> u32 {
        self.bucket
    }

    pub fn deficit(&self) -> i64 {
        self.deficit
    }

    pub fn status(&self) -> FlowStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == FlowStatus::Active
    }

    /// The flow's queue, without the cached head.
    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Cached head packet, if the queue has handed one out yet.
    pub fn head(&self) -> Option<&P> {
        self.head.as_ref()
    }

    pub(crate) fn add_quantum(&mut self, quantum: u32) {
        self.deficit += i64::from(quantum);
    }

    pub(crate) fn consume(&mut self, bytes: usize) {
        self.deficit -= bytes as i64;
    }

    pub(crate) fn activate(&mut self) {
        self.status = FlowStatus::Active;
    }

    /// Marks the flow inactive and forgets its deficit.
    pub(crate) fn deactivate(&mut self) {
        self.status = FlowStatus::Inactive;
        self.deficit = 0;
    }
}

impl<P, Q> Flow<P, Q>
where
    P: Packet,
    Q: PacketQueue<P>,
{
    pub fn len(&self) -> usize {
        self.queue.length() + usize::from(self.head.is_some())
    }

    pub fn byte_count(&self) -> usize {
        self.queue.byte_count() + self.head.as_ref().map_or(0, Packet::l3_length)
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none() && self.queue.is_empty()
    }

    pub(crate) fn enqueue(&mut self, packet: P) {
        self.queue.enqueue(packet);
    }

    /// Makes sure a head is cached, running the queue's dequeue when none is.
    pub(crate) fn fill_head(&mut self) -> Option<&P> {
        if self.head.is_none() {
            self.head = self.queue.dequeue();
        }
        self.head.as_ref()
    }

    pub(crate) fn take_head(&mut self) -> Option<P> {
        self.head.take()
    }

    /// Removes the front packet without queue management; the cached head goes first.
    pub(crate) fn drop_front(&mut self) -> Option<P> {
        self.head.take().or_else(|| self.queue.drop_front())
    }

    pub(crate) fn configure(&mut self, config: Q::Config) {
        self.queue.configure(config);
    }
}

/// Arena of flows indexed by bucket. Flows are created on first use and never removed.
#[derive(Debug)]
pub struct FlowTable<P, Q> {
    flows: Vec<Flow<P, Q>>,
    buckets: HashMap<u32, FlowId>,
}

impl<P, Q> Default for FlowTable<P, Q> {
    fn default() -> Self {
        Self {
            flows: Vec::new(),
            buckets: HashMap::new(),
        }
    }
}

impl<P, Q> FlowTable<P, Q> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, bucket: u32) -> Option<FlowId> {
        self.buckets.get(&bucket).copied()
    }

    /// Returns the flow of `bucket`, creating it with a queue from `make_queue` if the
    /// bucket has not been seen before.
    pub fn get_or_insert_with<F>(&mut self, bucket: u32, make_queue: F) -> FlowId
    where
        F: FnOnce() -> Q,
    {
        if let Some(id) = self.lookup(bucket) {
            return id;
        }
        let id = FlowId(self.flows.len());
        self.flows.push(Flow::new(bucket, make_queue()));
        self.buckets.insert(bucket, id);
        id
    }

    pub fn get(&self, id: FlowId) -> Option<&Flow<P, Q>> {
        self.flows.get(id.0)
    }

    pub fn by_bucket(&self, bucket: u32) -> Option<&Flow<P, Q>> {
        self.lookup(bucket).and_then(|id| self.get(id))
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Flows in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (FlowId, &Flow<P, Q>)> {
        self.flows.iter().enumerate().map(|(i, flow)| (FlowId(i), flow))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (FlowId, &mut Flow<P, Q>)> {
        self.flows
            .iter_mut()
            .enumerate()
            .map(|(i, flow)| (FlowId(i), flow))
    }
}

impl<P, Q> Index<FlowId> for FlowTable<P, Q> {
    type Output = Flow<P, Q>;

    fn index(&self, id: FlowId) -> &Self::Output {
        &self.flows[id.0]
    }
}

impl<P, Q> IndexMut<FlowId> for FlowTable<P, Q> {
    fn index_mut(&mut self, id: FlowId) -> &mut Self::Output {
        &mut self.flows[id.0]
    }
}
