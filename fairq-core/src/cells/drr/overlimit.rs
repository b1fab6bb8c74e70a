//! Eviction under the global byte limit.

use tracing::trace;

use super::flow::FlowId;
use super::scheduler::{DropReason, DrrScheduler};
use crate::cells::queue::PacketQueue;
use crate::cells::Packet;

impl<P, Q> DrrScheduler<P, Q>
where
    P: Packet,
    Q: PacketQueue<P>,
{
    /// Flow with the largest byte backlog. Ties go to the flow created first; flows
    /// holding no bytes are never chosen.
    pub(super) fn heaviest_flow(&self) -> Option<FlowId> {
        let mut victim = None;
        let mut max_bytes = 0;
        for (id, flow) in self.table.iter() {
            let bytes = flow.byte_count();
            if bytes > max_bytes {
                max_bytes = bytes;
                victim = Some(id);
            }
        }
        victim
    }

    /// Drops the front packet of the heaviest flow, bypassing the flow queue's AQM. A
    /// head already handed out by the queue is the front.
    /// Returns `None` when no flow holds anything.
    pub(super) fn drop_overlimit(&mut self) -> Option<P> {
        let victim = self.heaviest_flow()?;
        let byte_limit = self.byte_limit();
        let flow = &mut self.table[victim];
        let packet = flow.drop_front()?;
        let l3_len = packet.l3_length();
        self.backlog -= l3_len;
        self.packets -= 1;
        self.stats.record_drop(DropReason::Overlimit, 1, l3_len);
        trace!(
            bucket = flow.bucket(),
            l3_len,
            flow_bytes = flow.byte_count(),
            backlog = self.backlog,
            byte_limit,
            "Overlimit drop"
        );
        if flow.is_empty() && flow.is_active() {
            flow.deactivate();
            self.active.retain(|id| *id != victim);
        }
        Some(packet)
    }
}
