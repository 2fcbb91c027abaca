// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Scenario (e): a retained publish is replayed to a subscriber that
//! arrives afterward, and an empty-payload retained publish erases it for
//! subsequent subscribers.

use codec::QoS;

mod common;
use common::{mqtt::Client, Server, ServerConfig};

const CONFIG: &str = r#"
[[listeners]]
protocol = "mqtt"
address = "127.0.0.1:1904"

[security]
allow_anonymous = true

[log]
console_log = false
log_file = "/tmp/mqttd-tests/mqttd-1904.log"
"#;

#[test]
fn test_retained_replay_and_erase() -> Result<(), common::Error> {
    let config = ServerConfig::new("/tmp/mqttd-tests/02-retained.toml", CONFIG)?;
    let server = Server::start(config.filename())?;

    let mut publisher = Client::connect("127.0.0.1:1904", "retain-pub", true)?;
    publisher.publish("status", QoS::AtLeastOnce, b"ok", true, 1)?;
    publisher.expect_puback(1)?;

    let mut late_subscriber = Client::connect("127.0.0.1:1904", "retain-sub-1", true)?;
    late_subscriber.subscribe(1, "status", QoS::AtMostOnce)?;

    let replayed = late_subscriber
        .recv_publish()?
        .expect("late subscriber never received the retained replay");
    assert_eq!(replayed.topic(), "status");
    assert_eq!(replayed.message(), b"ok");
    assert!(replayed.retain());
    assert_eq!(replayed.qos(), QoS::AtMostOnce);

    // An empty-payload retained publish erases the entry.
    publisher.publish("status", QoS::AtLeastOnce, b"", true, 2)?;
    publisher.expect_puback(2)?;

    let mut new_subscriber = Client::connect("127.0.0.1:1904", "retain-sub-2", true)?;
    new_subscriber.subscribe(1, "status", QoS::AtMostOnce)?;
    assert!(
        new_subscriber.recv_publish()?.is_none(),
        "new subscriber should not receive anything after the retained message was erased"
    );

    server.terminate();
    Ok(())
}
