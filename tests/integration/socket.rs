use std::time::Duration;

use fabric_core::config::{NetworkConfig, ReceiveMode};
use fabric_core::wire::{BeaconData, BeaconPayload, BeaconRemote, BeaconType};
use fabric_services::engine::{self, receive_loop};
use fabric_services::{BeaconingEngine, EngineSettings, UdpTransport};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

/// A solicitation sent to the real socket over loopback is answered with a
/// unicast advertisement acknowledging it.
#[tokio::test]
async fn socket_answers_unicast_solicitation() {
    let config = NetworkConfig {
        port: 0,
        loopback: true,
        ..NetworkConfig::default()
    };
    let transport = match UdpTransport::bind(&config) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("SKIP: cannot bind dual-stack UDP socket: {e}");
            return;
        }
    };
    let port = transport.port();
    let receiver = transport.receiver().unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let settings = EngineSettings {
        receive_mode: ReceiveMode::Socket,
        ..EngineSettings::default()
    };
    let (handle, task) = engine::spawn(
        BeaconingEngine::new(settings, transport),
        shutdown_tx.subscribe(),
    );
    let receive_task = tokio::spawn(receive_loop(receiver, handle.clone(), shutdown_tx.subscribe()));

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let remote = BeaconRemote {
        name: "ens3".into(),
        mac_address: Some("52:54:00:00:0b:02".into()),
        ..BeaconRemote::default()
    };
    let (solicitation, bytes) =
        BeaconPayload::create(BeaconType::Solicitation, BeaconData::with_remote(remote)).unwrap();
    if let Err(e) = peer.send_to(&bytes, ("127.0.0.1", port)).await {
        eprintln!("SKIP: cannot reach dual-stack socket over IPv4 loopback: {e}");
        return;
    }

    let mut buf = vec![0u8; 65_535];
    let (len, _) = tokio::time::timeout(Duration::from_secs(5), peer.recv_from(&mut buf))
        .await
        .expect("no reply within 5s")
        .unwrap();
    let reply = BeaconPayload::decode(&buf[..len]).unwrap();
    assert_eq!(reply.kind, BeaconType::Advertisement);
    assert_eq!(reply.payload.acks, Some(solicitation.uuid));

    let status = handle.status().await.unwrap();
    assert_eq!(status.stats.beacons_received, 1);
    assert_eq!(status.stats.beacons_sent, 1);
    assert_eq!(status.tx_queued, 1);

    // Garbage on the wire is counted, not fatal.
    peer.send_to(b"\x01\x02", ("127.0.0.1", port)).await.unwrap();
    for _ in 0..100 {
        if handle.status().await.unwrap().stats.beacons_rejected == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(handle.status().await.unwrap().stats.beacons_rejected, 1);

    handle.stop().await.unwrap();
    task.await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), receive_task)
        .await
        .expect("receiver outlived the engine")
        .unwrap();
}
