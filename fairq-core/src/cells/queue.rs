//! Per-flow packet queues.
//!
//! Every DRR flow owns one queue implementing [`PacketQueue`]. The scheduler only relies
//! on the FIFO contract (push at the tail, peek and pop at the head, byte and packet
//! counts); what a queue does on top of that, like refusing packets when full or
//! discarding packets that waited too long, is its own business.

use crate::cells::Packet;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Debug;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace};

pub trait PacketQueue<P>: Send
where
    P: Packet,
{
    #[cfg(feature = "serde")]
    type Config: for<'a> Deserialize<'a> + Serialize + Send + Debug + Clone;
    #[cfg(not(feature = "serde"))]
    type Config: Send + Debug + Clone;

    fn configure(&mut self, config: Self::Config);

    /// The queue may refuse the packet or evict older ones; callers observe the
    /// outcome through `length()` and `byte_count()`.
    fn enqueue(&mut self, packet: P);

    /// Removes the head packet, applying whatever active queue management the queue
    /// implements. If the queue is empty, return `None`
    fn dequeue(&mut self) -> Option<P>;

    /// Removes the head packet unconditionally, bypassing queue management.
    fn drop_front(&mut self) -> Option<P>;

    fn peek(&self) -> Option<&P>;

    fn is_empty(&self) -> bool;

    fn length(&self) -> usize;

    fn byte_count(&self) -> usize;
}

/// FIFO storage shared by all queue kinds, keeping the byte count in sync.
#[derive(Debug)]
struct ByteQueue<P> {
    queue: VecDeque<P>,
    now_bytes: usize,
}

impl<P> Default for ByteQueue<P> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            now_bytes: 0,
        }
    }
}

impl<P: Packet> ByteQueue<P> {
    fn push(&mut self, packet: P) {
        self.now_bytes += packet.l3_length();
        self.queue.push_back(packet);
    }

    fn pop(&mut self) -> Option<P> {
        let packet = self.queue.pop_front()?;
        self.now_bytes -= packet.l3_length();
        Some(packet)
    }

    fn fits(&self, packet: &P, packet_limit: Option<usize>, byte_limit: Option<usize>) -> bool {
        packet_limit.map_or(true, |limit| self.queue.len() < limit)
            && byte_limit.map_or(true, |limit| self.now_bytes + packet.l3_length() <= limit)
    }

    fn over(&self, packet_limit: Option<usize>, byte_limit: Option<usize>) -> bool {
        packet_limit.is_some_and(|limit| self.queue.len() > limit)
            || byte_limit.is_some_and(|limit| self.now_bytes > limit)
    }
}

macro_rules! impl_byte_queue_accessors {
    () => {
        fn drop_front(&mut self) -> Option<P> {
            self.inner.pop()
        }

        fn peek(&self) -> Option<&P> {
            self.inner.queue.front()
        }

        fn is_empty(&self) -> bool {
            self.inner.queue.is_empty()
        }

        fn length(&self) -> usize {
            self.inner.queue.len()
        }

        fn byte_count(&self) -> usize {
            self.inner.now_bytes
        }
    };
}

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct InfiniteQueueConfig {}

impl InfiniteQueueConfig {
    pub fn new() -> Self {
        Self {}
    }
}

impl<P> From<InfiniteQueueConfig> for InfiniteQueue<P> {
    fn from(config: InfiniteQueueConfig) -> Self {
        InfiniteQueue::new(config)
    }
}

#[derive(Debug)]
pub struct InfiniteQueue<P> {
    inner: ByteQueue<P>,
}

impl<P> InfiniteQueue<P> {
    pub fn new(_config: InfiniteQueueConfig) -> Self {
        debug!("New InfiniteQueue");
        Self {
            inner: ByteQueue::default(),
        }
    }
}

impl<P> Default for InfiniteQueue<P> {
    fn default() -> Self {
        Self::new(InfiniteQueueConfig::default())
    }
}

impl<P> PacketQueue<P> for InfiniteQueue<P>
where
    P: Packet,
{
    type Config = InfiniteQueueConfig;

    fn configure(&mut self, _config: Self::Config) {}

    fn enqueue(&mut self, packet: P) {
        self.inner.push(packet);
    }

    fn dequeue(&mut self) -> Option<P> {
        self.inner.pop()
    }

    impl_byte_queue_accessors!();
}

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DropTailQueueConfig {
    pub packet_limit: Option<usize>, // None means unlimited
    pub byte_limit: Option<usize>,   // None means unlimited
}

impl DropTailQueueConfig {
    pub fn new<A: Into<Option<usize>>, B: Into<Option<usize>>>(
        packet_limit: A,
        byte_limit: B,
    ) -> Self {
        Self {
            packet_limit: packet_limit.into(),
            byte_limit: byte_limit.into(),
        }
    }
}

impl<P> From<DropTailQueueConfig> for DropTailQueue<P> {
    fn from(config: DropTailQueueConfig) -> Self {
        DropTailQueue::new(config)
    }
}

#[derive(Debug)]
pub struct DropTailQueue<P> {
    inner: ByteQueue<P>,
    packet_limit: Option<usize>,
    byte_limit: Option<usize>,
}

impl<P> DropTailQueue<P> {
    pub fn new(config: DropTailQueueConfig) -> Self {
        debug!(?config, "New DropTailQueue");
        Self {
            inner: ByteQueue::default(),
            packet_limit: config.packet_limit,
            byte_limit: config.byte_limit,
        }
    }
}

impl<P> Default for DropTailQueue<P> {
    fn default() -> Self {
        Self::new(DropTailQueueConfig::default())
    }
}

impl<P> PacketQueue<P> for DropTailQueue<P>
where
    P: Packet,
{
    type Config = DropTailQueueConfig;

    fn configure(&mut self, config: Self::Config) {
        self.packet_limit = config.packet_limit;
        self.byte_limit = config.byte_limit;
    }

    fn enqueue(&mut self, packet: P) {
        if self.inner.fits(&packet, self.packet_limit, self.byte_limit) {
            self.inner.push(packet);
        } else {
            trace!(
                queue_len = self.inner.queue.len(),
                now_bytes = self.inner.now_bytes,
                flow_id = packet.get_flow_id(),
                "Drop packet(l3_len: {}) when enqueue",
                packet.l3_length()
            );
        }
    }

    fn dequeue(&mut self) -> Option<P> {
        self.inner.pop()
    }

    impl_byte_queue_accessors!();
}

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DropHeadQueueConfig {
    pub packet_limit: Option<usize>,
    pub byte_limit: Option<usize>,
}

impl DropHeadQueueConfig {
    pub fn new<A: Into<Option<usize>>, B: Into<Option<usize>>>(
        packet_limit: A,
        byte_limit: B,
    ) -> Self {
        Self {
            packet_limit: packet_limit.into(),
            byte_limit: byte_limit.into(),
        }
    }
}

impl<P> From<DropHeadQueueConfig> for DropHeadQueue<P> {
    fn from(config: DropHeadQueueConfig) -> Self {
        DropHeadQueue::new(config)
    }
}

#[derive(Debug)]
pub struct DropHeadQueue<P> {
    inner: ByteQueue<P>,
    packet_limit: Option<usize>,
    byte_limit: Option<usize>,
}

impl<P> DropHeadQueue<P> {
    pub fn new(config: DropHeadQueueConfig) -> Self {
        debug!(?config, "New DropHeadQueue");
        Self {
            inner: ByteQueue::default(),
            packet_limit: config.packet_limit,
            byte_limit: config.byte_limit,
        }
    }
}

impl<P> Default for DropHeadQueue<P> {
    fn default() -> Self {
        Self::new(DropHeadQueueConfig::default())
    }
}

impl<P> PacketQueue<P> for DropHeadQueue<P>
where
    P: Packet,
{
    type Config = DropHeadQueueConfig;

    fn configure(&mut self, config: Self::Config) {
        self.packet_limit = config.packet_limit;
        self.byte_limit = config.byte_limit;
    }

    fn enqueue(&mut self, packet: P) {
        self.inner.push(packet);
        while self.inner.over(self.packet_limit, self.byte_limit) {
            let Some(packet) = self.inner.pop() else {
                break;
            };
            trace!(
                after_queue_len = self.inner.queue.len(),
                after_now_bytes = self.inner.now_bytes,
                flow_id = packet.get_flow_id(),
                "Drop packet(l3_len: {}) when enqueue another packet",
                packet.l3_length()
            );
        }
    }

    fn dequeue(&mut self) -> Option<P> {
        self.inner.pop()
    }

    impl_byte_queue_accessors!();
}

// CoDel Queue Implementation Reference:
// https://github.com/torvalds/linux/blob/v6.6/include/net/codel.h

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize), serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct CoDelQueueConfig {
    pub packet_limit: Option<usize>, // the maximum number of packets in the queue, or None for unlimited
    pub byte_limit: Option<usize>, // the maximum number of bytes in the queue, or None for unlimited
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub interval: Duration, // width of moving time window
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub target: Duration, // target queue delay
    pub mtu: u32,         // minimal queue backlog in bytes before dropping
}

impl Default for CoDelQueueConfig {
    fn default() -> Self {
        Self {
            packet_limit: None,
            byte_limit: None,
            interval: Duration::from_millis(100),
            target: Duration::from_millis(5),
            mtu: 1500,
        }
    }
}

impl CoDelQueueConfig {
    pub fn new<A: Into<Option<usize>>, B: Into<Option<usize>>>(
        packet_limit: A,
        byte_limit: B,
        interval: Duration,
        target: Duration,
        mtu: u32,
    ) -> Self {
        Self {
            packet_limit: packet_limit.into(),
            byte_limit: byte_limit.into(),
            interval,
            target,
            mtu,
        }
    }
}

impl<P> From<CoDelQueueConfig> for CoDelQueue<P> {
    fn from(config: CoDelQueueConfig) -> Self {
        CoDelQueue::new(config)
    }
}

#[derive(Debug)]
pub struct CoDelQueue<P> {
    inner: ByteQueue<P>,
    config: CoDelQueueConfig,

    count: u32, // how many drops we've done since the last time we entered dropping state
    lastcount: u32, // count at entry to dropping state
    dropping: bool, // set to true if in dropping state
    first_above_time: Option<Instant>, // when we went (or will go) continuously above target for interval
    drop_next: Instant,                // time to drop next packet, or when we dropped last
    ldelay: Duration,                  // sojourn time of last dequeued packet
}

impl<P> CoDelQueue<P> {
    pub fn new(config: CoDelQueueConfig) -> Self {
        debug!(?config, "New CoDelQueue");
        Self {
            inner: ByteQueue::default(),
            config,
            count: 0,
            lastcount: 0,
            dropping: false,
            first_above_time: None,
            drop_next: Instant::now(),
            ldelay: Duration::ZERO,
        }
    }
}

impl<P> Default for CoDelQueue<P> {
    fn default() -> Self {
        Self::new(CoDelQueueConfig::default())
    }
}

impl<P> CoDelQueue<P>
where
    P: Packet,
{
    fn should_drop(&mut self, packet: &P, now: Instant) -> bool {
        self.ldelay = now.saturating_duration_since(packet.get_timestamp());
        if self.ldelay < self.config.target || self.inner.now_bytes <= self.config.mtu as usize {
            self.first_above_time = None;
            return false;
        }
        match self.first_above_time {
            Some(first_above_time) => now >= first_above_time,
            None => {
                self.first_above_time = Some(now + self.config.interval);
                false
            }
        }
    }

    fn control_law(&self, t: Instant) -> Instant {
        t + self.config.interval.div_f64(f64::sqrt(self.count as f64))
    }

    /// Discards `dropped` and pops the next head.
    fn pop_after_drop(&mut self, dropped: &P) -> Option<P> {
        trace!(
            ldelay = ?self.ldelay,
            count = self.count,
            after_queue_len = self.inner.queue.len(),
            after_now_bytes = self.inner.now_bytes,
            flow_id = dropped.get_flow_id(),
            "Drop packet(l3_len: {}) by CoDel",
            dropped.l3_length()
        );
        self.inner.pop()
    }
}

impl<P> PacketQueue<P> for CoDelQueue<P>
where
    P: Packet,
{
    type Config = CoDelQueueConfig;

    fn configure(&mut self, config: Self::Config) {
        self.config = config;
    }

    fn enqueue(&mut self, packet: P) {
        if self
            .inner
            .fits(&packet, self.config.packet_limit, self.config.byte_limit)
        {
            self.inner.push(packet);
        } else {
            trace!(
                queue_len = self.inner.queue.len(),
                now_bytes = self.inner.now_bytes,
                flow_id = packet.get_flow_id(),
                "Drop packet(l3_len: {}) when enqueue",
                packet.l3_length()
            );
        }
    }

    fn dequeue(&mut self) -> Option<P> {
        let now = Instant::now();
        let Some(mut packet) = self.inner.pop() else {
            self.dropping = false;
            return None;
        };
        let drop = self.should_drop(&packet, now);
        trace!(
            drop,
            ldelay = ?self.ldelay,
            count = self.count,
            lastcount = self.lastcount,
            dropping = self.dropping,
            after_queue_len = self.inner.queue.len(),
            after_now_bytes = self.inner.now_bytes,
            "dequeueing a new packet"
        );
        if self.dropping {
            if !drop {
                self.dropping = false;
                trace!("Exit dropping state since packet should not drop");
            } else {
                while self.dropping && now >= self.drop_next {
                    self.count += 1;
                    let Some(next) = self.pop_after_drop(&packet) else {
                        self.dropping = false;
                        self.first_above_time = None;
                        trace!("Exit dropping state since queue is empty");
                        return None;
                    };
                    packet = next;
                    if self.should_drop(&packet, now) {
                        self.drop_next = self.control_law(self.drop_next);
                    } else {
                        self.dropping = false;
                        trace!("Exit dropping state since packet should not drop");
                    }
                }
            }
        } else if drop {
            let next = self.pop_after_drop(&packet);
            match &next {
                Some(next) => {
                    self.should_drop(next, now);
                }
                None => self.first_above_time = None,
            }
            self.dropping = true;
            let delta = self.count.saturating_sub(self.lastcount);
            self.count = if delta > 1
                && now.saturating_duration_since(self.drop_next) < 16 * self.config.interval
            {
                delta
            } else {
                1
            };
            self.lastcount = self.count;
            self.drop_next = self.control_law(now);
            trace!(count = self.count, delta, "Enter dropping state");
            return next;
        }
        Some(packet)
    }

    fn drop_front(&mut self) -> Option<P> {
        self.inner.pop()
    }

    fn peek(&self) -> Option<&P> {
        self.inner.queue.front()
    }

    fn is_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }

    fn length(&self) -> usize {
        self.inner.queue.len()
    }

    fn byte_count(&self) -> usize {
        self.inner.now_bytes
    }
}

/// Inner queue policy chosen at runtime, by configuration.
#[cfg_attr(
    feature = "serde",
    derive(Deserialize, Serialize),
    serde(tag = "type")
)]
#[derive(Debug, Clone, PartialEq)]
pub enum InnerQueueConfig {
    Infinite(InfiniteQueueConfig),
    DropTail(DropTailQueueConfig),
    DropHead(DropHeadQueueConfig),
    CoDel(CoDelQueueConfig),
}

impl Default for InnerQueueConfig {
    fn default() -> Self {
        InnerQueueConfig::CoDel(CoDelQueueConfig::default())
    }
}

#[derive(Debug)]
pub enum InnerQueue<P> {
    Infinite(InfiniteQueue<P>),
    DropTail(DropTailQueue<P>),
    DropHead(DropHeadQueue<P>),
    CoDel(CoDelQueue<P>),
}

impl<P> From<InnerQueueConfig> for InnerQueue<P> {
    fn from(config: InnerQueueConfig) -> Self {
        match config {
            InnerQueueConfig::Infinite(config) => InnerQueue::Infinite(config.into()),
            InnerQueueConfig::DropTail(config) => InnerQueue::DropTail(config.into()),
            InnerQueueConfig::DropHead(config) => InnerQueue::DropHead(config.into()),
            InnerQueueConfig::CoDel(config) => InnerQueue::CoDel(config.into()),
        }
    }
}

impl<P> Default for InnerQueue<P> {
    fn default() -> Self {
        InnerQueueConfig::default().into()
    }
}

macro_rules! dispatch_inner {
    ($self:expr, $queue:ident => $body:expr) => {
        match $self {
            InnerQueue::Infinite($queue) => $body,
            InnerQueue::DropTail($queue) => $body,
            InnerQueue::DropHead($queue) => $body,
            InnerQueue::CoDel($queue) => $body,
        }
    };
}

impl<P> PacketQueue<P> for InnerQueue<P>
where
    P: Packet,
{
    type Config = InnerQueueConfig;

    /// A config of another kind replaces the queue; queued packets move over in order
    /// and are subject to the new queue's admission rules.
    fn configure(&mut self, config: Self::Config) {
        match (self, config) {
            (InnerQueue::Infinite(queue), InnerQueueConfig::Infinite(config)) => {
                queue.configure(config)
            }
            (InnerQueue::DropTail(queue), InnerQueueConfig::DropTail(config)) => {
                queue.configure(config)
            }
            (InnerQueue::DropHead(queue), InnerQueueConfig::DropHead(config)) => {
                queue.configure(config)
            }
            (InnerQueue::CoDel(queue), InnerQueueConfig::CoDel(config)) => {
                queue.configure(config)
            }
            (queue, config) => {
                let mut replacement = InnerQueue::from(config);
                while let Some(packet) = queue.drop_front() {
                    replacement.enqueue(packet);
                }
                *queue = replacement;
            }
        }
    }

    fn enqueue(&mut self, packet: P) {
        dispatch_inner!(self, queue => queue.enqueue(packet))
    }

    fn dequeue(&mut self) -> Option<P> {
        dispatch_inner!(self, queue => queue.dequeue())
    }

    fn drop_front(&mut self) -> Option<P> {
        dispatch_inner!(self, queue => queue.drop_front())
    }

    fn peek(&self) -> Option<&P> {
        dispatch_inner!(self, queue => queue.peek())
    }

    fn is_empty(&self) -> bool {
        dispatch_inner!(self, queue => queue.is_empty())
    }

    fn length(&self) -> usize {
        dispatch_inner!(self, queue => queue.length())
    }

    fn byte_count(&self) -> usize {
        dispatch_inner!(self, queue => queue.byte_count())
    }
}
