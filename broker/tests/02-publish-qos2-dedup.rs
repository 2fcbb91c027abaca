// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Scenario (b): a duplicate QoS 2 PUBLISH (same packet id, dup=true, sent
//! again before any PUBREL) is delivered to subscribers exactly once, and
//! the publisher still gets a PUBREC for both copies.

use codec::QoS;

mod common;
use common::{mqtt::Client, Server, ServerConfig};

const CONFIG: &str = r#"
[[listeners]]
protocol = "mqtt"
address = "127.0.0.1:1902"

[security]
allow_anonymous = true

[log]
console_log = false
log_file = "/tmp/mqttd-tests/mqttd-1902.log"
"#;

#[test]
fn test_qos2_duplicate_suppression() -> Result<(), common::Error> {
    let config = ServerConfig::new("/tmp/mqttd-tests/02-publish-qos2-dedup.toml", CONFIG)?;
    let server = Server::start(config.filename())?;

    let mut subscriber = Client::connect("127.0.0.1:1902", "qos2-sub", true)?;
    subscriber.subscribe(1, "t", QoS::ExactOnce)?;

    let mut publisher = Client::connect("127.0.0.1:1902", "qos2-pub", true)?;
    publisher.publish("t", QoS::ExactOnce, b"once", false, 7)?;
    publisher.expect_pubrec(7)?;

    // Re-send the identical packet id as a dup, before sending PUBREL.
    publisher.publish_dup("t", QoS::ExactOnce, b"once", 7)?;
    publisher.expect_pubrec(7)?;

    publisher.send_pubrel(7)?;

    let first = subscriber
        .recv_publish()?
        .expect("subscriber never received the publish");
    assert_eq!(first.message(), b"once");

    // The dispatcher must not have dispatched the duplicate a second time.
    assert!(
        subscriber.recv_publish()?.is_none(),
        "subscriber received the duplicate payload a second time"
    );

    server.terminate();
    Ok(())
}
