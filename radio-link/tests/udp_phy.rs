//! Two nodes talking over real loopback UDP sockets.

use std::time::Duration;

use radio_link::aloha::AlohaPolicy;
use radio_link::config::{ArqMode, NodeConfig};
use radio_link::message::DeliveryOutcome;
use radio_link::socket::UdpPhy;
use radio_link::spawn;
use tokio::time::timeout;

async fn loopback_pair() -> (UdpPhy, UdpPhy) {
    let any = "127.0.0.1:0".parse().unwrap();
    let mut a = UdpPhy::bind(any, any).await.expect("bind a");
    let mut b = UdpPhy::bind(any, any).await.expect("bind b");
    let a_addr = a.local_addr().unwrap();
    let b_addr = b.local_addr().unwrap();
    a.set_remote(b_addr);
    b.set_remote(a_addr);
    (a, b)
}

fn config(address: u8) -> NodeConfig {
    let mut c = NodeConfig::new(address);
    c.aloha = AlohaPolicy::always();
    c.arq.mode = ArqMode::GoBackN { window_size: 4 };
    c.arq.timeout = Duration::from_millis(200);
    c.segment_size = 16;
    c
}

#[tokio::test]
async fn message_crosses_udp_in_both_directions() {
    let (a_phy, b_phy) = loopback_pair().await;
    let (a_port, a_pump) = a_phy.spawn(64);
    let (b_port, b_pump) = b_phy.spawn(64);
    let mut a = spawn(config(1), a_port).unwrap();
    let mut b = spawn(config(2), b_port).unwrap();

    let body = "a message long enough to need a few segments";
    a.submit(2, body).await.unwrap();
    b.submit(1, "short reply").await.unwrap();

    let limit = Duration::from_secs(5);
    let at_b = timeout(limit, b.deliveries.recv()).await.unwrap().unwrap();
    assert_eq!(at_b.payload, body.as_bytes());
    let at_a = timeout(limit, a.deliveries.recv()).await.unwrap().unwrap();
    assert_eq!(at_a.payload, b"short reply");

    for node in [&mut a, &mut b] {
        let feedback = timeout(limit, node.feedback.recv()).await.unwrap().unwrap();
        assert_eq!(feedback.outcome, DeliveryOutcome::Delivered);
    }

    a.shutdown().await;
    b.shutdown().await;
    // Engines dropped their transmitters, so the pumps wind down.
    a_pump.await.unwrap();
    b_pump.await.unwrap();
}
