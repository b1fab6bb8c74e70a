use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use bytesize::ByteSize;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info};

use super::scheduler::DrrScheduler;
use crate::cells::queue::{InnerQueue, PacketQueue};
use crate::cells::{
    AtomicCellState, Cell, CellState, ControlInterface, Egress, Ingress, Packet,
};
use crate::error::Error;

pub struct DrrCellIngress<P>
where
    P: Packet,
{
    ingress: mpsc::UnboundedSender<P>,
}

impl<P> Clone for DrrCellIngress<P>
where
    P: Packet,
{
    fn clone(&self) -> Self {
        Self {
            ingress: self.ingress.clone(),
        }
    }
}

impl<P> Ingress<P> for DrrCellIngress<P>
where
    P: Packet + Send,
{
    fn enqueue(&self, packet: P) -> Result<(), Error> {
        self.ingress
            .send(packet)
            .map_err(|_| Error::ChannelError("Data channel is closed.".to_string()))?;
        Ok(())
    }
}

pub struct DrrCellEgress<P, Q = InnerQueue<P>>
where
    P: Packet,
    Q: PacketQueue<P>,
{
    egress: mpsc::UnboundedReceiver<P>,
    scheduler: DrrScheduler<P, Q>,
    config_rx: mpsc::UnboundedReceiver<DrrCellConfig<P, Q>>,
    state: AtomicCellState,
}

impl<P, Q> DrrCellEgress<P, Q>
where
    P: Packet,
    Q: PacketQueue<P> + From<Q::Config>,
{
    pub fn scheduler(&self) -> &DrrScheduler<P, Q> {
        &self.scheduler
    }

    fn set_config(&mut self, config: DrrCellConfig<P, Q>) {
        if let Some(quantum) = config.quantum {
            debug!(quantum, "Set inner quantum:");
            self.scheduler.set_quantum(quantum);
        }
        if let Some(queue_config) = config.queue_config {
            debug!(?queue_config, "Set inner queue config:");
            self.scheduler.configure_queues(queue_config);
        }
        if let Some(byte_limit) = config.byte_limit {
            debug!(%byte_limit, "Set inner byte limit:");
            self.scheduler.set_byte_limit(byte_limit.as_u64() as usize);
        }
    }

    /// Hands the packet to the scheduler, or returns it if it must leave right away.
    #[inline(always)]
    fn admit(&mut self, packet: P) -> Option<P> {
        match self.state.load(Ordering::Acquire) {
            CellState::Drop => None,
            CellState::PassThrough => Some(packet),
            CellState::Normal => {
                self.scheduler.enqueue(packet);
                None
            }
        }
    }
}

#[async_trait]
impl<P, Q> Egress<P> for DrrCellEgress<P, Q>
where
    P: Packet + Send + Sync,
    Q: PacketQueue<P> + From<Q::Config>,
{
    async fn dequeue(&mut self) -> Option<P> {
        loop {
            while let Ok(config) = self.config_rx.try_recv() {
                self.set_config(config);
            }

            // Move everything already received into the scheduler before picking, so
            // that the round sees every backlogged flow.
            let mut closed = false;
            loop {
                match self.egress.try_recv() {
                    Ok(packet) => {
                        if let Some(packet) = self.admit(packet) {
                            return Some(packet);
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        closed = true;
                        break;
                    }
                }
            }

            if let Some(packet) = self.scheduler.dequeue() {
                return Some(packet);
            }
            if closed {
                return None;
            }

            tokio::select! {
                biased;
                Some(config) = self.config_rx.recv() => {
                    self.set_config(config);
                }
                // `new_packet` can be None only if `self.egress` is closed.
                new_packet = self.egress.recv() => {
                    if let Some(packet) = self.admit(new_packet?) {
                        return Some(packet);
                    }
                }
            }
        }
    }

    fn change_state(&self, state: CellState) {
        self.state.store(state, Ordering::Release);
    }
}

#[cfg_attr(
    feature = "serde",
    serde_with::skip_serializing_none,
    derive(Deserialize, Serialize),
    serde(bound = "")
)]
#[derive(Debug)]
pub struct DrrCellConfig<P, Q = InnerQueue<P>>
where
    P: Packet,
    Q: PacketQueue<P>,
{
    #[cfg_attr(
        feature = "serde",
        serde(default, with = "crate::utils::serde::byte")
    )]
    pub byte_limit: Option<ByteSize>,
    pub quantum: Option<u32>,
    pub queue_config: Option<Q::Config>,
}

impl<P, Q> Clone for DrrCellConfig<P, Q>
where
    P: Packet,
    Q: PacketQueue<P>,
{
    fn clone(&self) -> Self {
        Self {
            byte_limit: self.byte_limit,
            quantum: self.quantum,
            queue_config: self.queue_config.clone(),
        }
    }
}

impl<P, Q> DrrCellConfig<P, Q>
where
    P: Packet,
    Q: PacketQueue<P>,
{
    pub fn new<B: Into<Option<ByteSize>>, T: Into<Option<u32>>, U: Into<Option<Q::Config>>>(
        byte_limit: B,
        quantum: T,
        queue_config: U,
    ) -> Self {
        Self {
            byte_limit: byte_limit.into(),
            quantum: quantum.into(),
            queue_config: queue_config.into(),
        }
    }
}

pub struct DrrCellControlInterface<P, Q = InnerQueue<P>>
where
    P: Packet,
    Q: PacketQueue<P>,
{
    config_tx: mpsc::UnboundedSender<DrrCellConfig<P, Q>>,
}

impl<P, Q> ControlInterface for DrrCellControlInterface<P, Q>
where
    P: Packet,
    Q: PacketQueue<P> + 'static,
{
    type Config = DrrCellConfig<P, Q>;

    fn set_config(&self, config: Self::Config) -> Result<(), Error> {
        if config.byte_limit.is_none() && config.quantum.is_none() && config.queue_config.is_none()
        {
            return Err(Error::ConfigError(
                "At least one of byte_limit, quantum and queue_config should be set".to_string(),
            ));
        }
        if let Some(byte_limit) = config.byte_limit {
            info!("Setting byte limit to: {}", byte_limit);
        }
        if let Some(quantum) = config.quantum {
            info!("Setting quantum to: {}", quantum);
        }
        if let Some(queue_config) = config.queue_config.as_ref() {
            info!("Setting queue config to: {:?}", queue_config);
        }
        self.config_tx
            .send(config)
            .map_err(|_| Error::ConfigError("Control channel is closed.".to_string()))?;
        Ok(())
    }
}

pub struct DrrCell<P, Q = InnerQueue<P>>
where
    P: Packet,
    Q: PacketQueue<P>,
{
    ingress: Arc<DrrCellIngress<P>>,
    egress: DrrCellEgress<P, Q>,
    control_interface: Arc<DrrCellControlInterface<P, Q>>,
}

impl<P, Q> Cell<P> for DrrCell<P, Q>
where
    P: Packet + Send + Sync + 'static,
    Q: PacketQueue<P> + From<Q::Config> + 'static,
{
    type IngressType = DrrCellIngress<P>;
    type EgressType = DrrCellEgress<P, Q>;
    type ControlInterfaceType = DrrCellControlInterface<P, Q>;

    fn sender(&self) -> Arc<Self::IngressType> {
        self.ingress.clone()
    }

    fn receiver(&mut self) -> &mut Self::EgressType {
        &mut self.egress
    }

    fn into_receiver(self) -> Self::EgressType {
        self.egress
    }

    fn control_interface(&self) -> Arc<Self::ControlInterfaceType> {
        self.control_interface.clone()
    }
}

impl<P, Q> DrrCell<P, Q>
where
    P: Packet,
    Q: PacketQueue<P>,
{
    /// The cell starts in [`CellState::Drop`]; switch it with [`Egress::change_state`].
    pub fn new(scheduler: DrrScheduler<P, Q>) -> Result<DrrCell<P, Q>, Error> {
        debug!("New DrrCell");
        let (rx, tx) = mpsc::unbounded_channel();
        let (config_tx, config_rx) = mpsc::unbounded_channel();
        Ok(DrrCell {
            ingress: Arc::new(DrrCellIngress { ingress: rx }),
            egress: DrrCellEgress {
                egress: tx,
                scheduler,
                config_rx,
                state: AtomicCellState::new(CellState::Drop),
            },
            control_interface: Arc::new(DrrCellControlInterface { config_tx }),
        })
    }
}
