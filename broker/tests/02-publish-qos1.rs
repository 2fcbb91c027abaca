// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Scenario (a) from the testable-properties list: a QoS 1 subscriber
//! receives a published message and the publisher gets its PUBACK.

use codec::QoS;

mod common;
use common::{mqtt::Client, Server, ServerConfig};

const CONFIG: &str = r#"
[[listeners]]
protocol = "mqtt"
address = "127.0.0.1:1901"

[security]
allow_anonymous = true

[log]
console_log = false
log_file = "/tmp/mqttd-tests/mqttd-1901.log"
"#;

#[test]
fn test_qos1_delivery() -> Result<(), common::Error> {
    let config = ServerConfig::new("/tmp/mqttd-tests/02-publish-qos1.toml", CONFIG)?;
    let server = Server::start(config.filename())?;

    let mut subscriber = Client::connect("127.0.0.1:1901", "qos1-sub", true)?;
    let suback = subscriber.subscribe(1, "a/b", QoS::AtLeastOnce)?;
    assert_eq!(suback.acknowledgements().len(), 1);

    let mut publisher = Client::connect("127.0.0.1:1901", "qos1-pub", true)?;
    publisher.publish("a/b", QoS::AtLeastOnce, b"x", false, 7)?;
    publisher.expect_puback(7)?;

    let received = subscriber
        .recv_publish()?
        .expect("subscriber never received the fanned-out publish");
    assert_eq!(received.topic(), "a/b");
    assert_eq!(received.qos(), QoS::AtLeastOnce);
    assert_eq!(received.message(), b"x");
    assert!(!received.retain());

    server.terminate();
    Ok(())
}
