// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Outbound-only uplink to a remote broker (§11).
//!
//! mqttd never subscribes upstream and the bridge never feeds anything back
//! into local dispatch: it is a one-way tap that mirrors locally-authorized
//! publishes matching the configured topic filters, republished under its
//! own `client_id`. A short per-(topic, qos) dedup window absorbs bursts of
//! identical announcements without needing to track acks from the remote
//! broker.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use codec::{ConnectPacket, EncodePacket, PublishPacket, QoS};

use crate::config::Bridge;
use crate::constants::CHANNEL_CAPACITY;

const DEDUP_WINDOW: Duration = Duration::from_secs(1);

/// A message this tap has decided to mirror upstream, already authorized
/// and accepted locally.
#[derive(Debug)]
pub enum BridgeCmd {
    Announce {
        topic: String,
        qos: QoS,
        payload: Vec<u8>,
    },
}

/// Spawn the bridge task and return the sender the dispatcher feeds.
#[must_use]
pub fn spawn(config: Bridge) -> mpsc::Sender<BridgeCmd> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(run(config, rx));
    tx
}

async fn run(config: Bridge, mut rx: mpsc::Receiver<BridgeCmd>) {
    let mut stream: Option<TcpStream> = None;
    let mut recent: HashMap<(String, QoS), Instant> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        let BridgeCmd::Announce { topic, qos, payload } = cmd;

        if !config
            .topics()
            .iter()
            .any(|filter| codec::topic::topic_matches(filter, &topic))
        {
            continue;
        }

        let now = Instant::now();
        if let Some(last) = recent.get(&(topic.clone(), qos)) {
            if now.duration_since(*last) < DEDUP_WINDOW {
                continue;
            }
        }
        recent.insert((topic.clone(), qos), now);

        if stream.is_none() {
            match connect(&config).await {
                Ok(s) => stream = Some(s),
                Err(err) => {
                    log::warn!("bridge: failed to reach {}: {err}", config.address());
                    continue;
                }
            }
        }

        let mut packet = match PublishPacket::new(&topic, qos, &payload) {
            Ok(packet) => packet,
            Err(err) => {
                log::warn!("bridge: cannot encode {topic}: {err:?}");
                continue;
            }
        };
        packet.set_retain(false);

        let mut buf = Vec::new();
        if packet.encode(&mut buf).is_err() {
            continue;
        }

        if let Some(s) = stream.as_mut() {
            if s.write_all(&buf).await.is_err() {
                log::warn!("bridge: upstream connection to {} dropped", config.address());
                stream = None;
            }
        }
    }
}

async fn connect(config: &Bridge) -> std::io::Result<TcpStream> {
    let address = config
        .address()
        .trim_start_matches("mqtt://")
        .trim_start_matches("tcp://");

    let mut stream = TcpStream::connect(address).await?;

    // `ConnectPacket::new` defaults to a clean session, which is exactly
    // what a tap that never resumes state wants.
    let connect_packet = ConnectPacket::new(config.client_id())
        .map_err(|err| std::io::Error::other(format!("{err:?}")))?;

    let mut buf = Vec::new();
    connect_packet
        .encode(&mut buf)
        .map_err(|err| std::io::Error::other(format!("{err:?}")))?;
    stream.write_all(&buf).await?;

    // Best-effort CONNACK drain; the bridge does not gate publishing on it.
    let mut ack = [0_u8; 4];
    let _ = stream.read(&mut ack).await;

    Ok(stream)
}
