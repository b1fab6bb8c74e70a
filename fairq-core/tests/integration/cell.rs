use fairq_core::cells::queue::{InfiniteQueueConfig, InnerQueueConfig};
use fairq_core::cells::{Cell, CellState, Egress, Ingress, Packet, StdPacket};
use fairq_core::config::DrrCellBuildConfig;
use fairq_core::Error;
use tracing::{info, span, Level};

use crate::{distinct_ports, udp_v4, udp_v4_key};

const FLOWS: u32 = 1024;

fn infinite_config() -> DrrCellBuildConfig {
    DrrCellBuildConfig {
        queue: Some(InnerQueueConfig::Infinite(InfiniteQueueConfig::new())),
        ..Default::default()
    }
}

#[test_log::test]
fn cell_serves_flows_round_robin() -> Result<(), Error> {
    let _span = span!(Level::INFO, "cell_serves_flows_round_robin").entered();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let _guard = rt.enter();

    let cell = infinite_config().into_cell::<StdPacket>()?;
    let ingress = cell.sender();
    let mut egress = cell.into_receiver();
    egress.change_state(CellState::Normal);

    let ports = distinct_ports(3, FLOWS, 50000);
    for _ in 0..3 {
        ingress.enqueue(udp_v4(ports[0], 53, 1000, 0))?;
    }
    ingress.enqueue(udp_v4(ports[1], 53, 1000, 0))?;
    ingress.enqueue(udp_v4(ports[2], 53, 1000, 0))?;

    let served: Vec<u32> = rt.block_on(async {
        let mut served = Vec::new();
        for _ in 0..5 {
            served.push(egress.dequeue().await.unwrap().get_flow_id());
        }
        served
    });
    info!(?served, "Service order");
    let bucket = |port| udp_v4_key(port, 53).bucket(FLOWS);
    let (a, b, c) = (bucket(ports[0]), bucket(ports[1]), bucket(ports[2]));
    assert_eq!(served, vec![a, b, c, a, a]);
    Ok(())
}

#[test_log::test]
fn cell_waits_for_late_packets() -> Result<(), Error> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let _guard = rt.enter();

    let cell = infinite_config().into_cell::<StdPacket>()?;
    let ingress = cell.sender();
    let mut egress = cell.into_receiver();
    egress.change_state(CellState::Normal);

    let received = rt.block_on(async move {
        let sender = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            ingress.enqueue(udp_v4(1234, 53, 200, 7))
        });
        let packet = egress.dequeue().await;
        sender.await.unwrap().unwrap();
        packet
    });
    assert_eq!(received.map(|p| p.l3_length()), Some(200));
    Ok(())
}

#[test_log::test]
fn ingress_fails_once_egress_is_gone() -> Result<(), Error> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let _guard = rt.enter();

    let cell = infinite_config().into_cell::<StdPacket>()?;
    let ingress = cell.sender();
    drop(cell.into_receiver());
    assert!(matches!(
        ingress.enqueue(udp_v4(1, 2, 64, 0)),
        Err(Error::ChannelError(_))
    ));
    Ok(())
}

#[cfg(feature = "serde")]
#[test_log::test]
fn cell_accepts_json_config() -> Result<(), Error> {
    use fairq_core::cells::JsonControlInterface;

    let _span = span!(Level::INFO, "cell_accepts_json_config").entered();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let _guard = rt.enter();

    let cell = infinite_config().into_cell::<StdPacket>()?;
    let ingress = cell.sender();
    let control = cell.control_interface();
    let mut egress = cell.into_receiver();
    egress.change_state(CellState::Normal);

    assert!(control.config_cell(serde_json::json!({})).is_err());
    assert!(control
        .config_cell(serde_json::json!({"quantum": "large"}))
        .is_err());
    control.config_cell(serde_json::json!({
        "quantum": 3000,
        "byte_limit": "2 KiB",
    }))?;

    let ports = distinct_ports(3, FLOWS, 60000);
    for port in &ports {
        ingress.enqueue(udp_v4(*port, 53, 1000, 0))?;
    }
    let received = rt.block_on(async { egress.dequeue().await });
    assert!(received.is_some());
    let scheduler = egress.scheduler();
    assert_eq!(scheduler.quantum(), 3000);
    assert_eq!(scheduler.byte_limit(), 2048);
    assert_eq!(scheduler.stats().overlimit_drops, 1);
    assert_eq!(scheduler.len(), 1);
    Ok(())
}
