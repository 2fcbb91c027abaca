// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Scenario (d): `sport/+/player1/#` matches `sport/tennis/player1` and
//! `sport/tennis/player1/ranking`, but not `sport/player1`.

use codec::QoS;

mod common;
use common::{mqtt::Client, Server, ServerConfig};

const CONFIG: &str = r#"
[[listeners]]
protocol = "mqtt"
address = "127.0.0.1:1905"

[security]
allow_anonymous = true

[log]
console_log = false
log_file = "/tmp/mqttd-tests/mqttd-1905.log"
"#;

#[test]
fn test_wildcard_filter_matches_expected_topics() -> Result<(), common::Error> {
    let config = ServerConfig::new("/tmp/mqttd-tests/02-wildcard-match.toml", CONFIG)?;
    let server = Server::start(config.filename())?;

    let mut subscriber = Client::connect("127.0.0.1:1905", "wildcard-sub", true)?;
    subscriber.subscribe(1, "sport/+/player1/#", QoS::AtMostOnce)?;

    let mut publisher = Client::connect("127.0.0.1:1905", "wildcard-pub", true)?;

    publisher.publish("sport/tennis/player1", QoS::AtMostOnce, b"1", false, 0)?;
    let msg = subscriber.recv_publish()?.expect("expected a match for sport/tennis/player1");
    assert_eq!(msg.topic(), "sport/tennis/player1");

    publisher.publish("sport/tennis/player1/ranking", QoS::AtMostOnce, b"2", false, 0)?;
    let msg = subscriber
        .recv_publish()?
        .expect("expected a match for sport/tennis/player1/ranking");
    assert_eq!(msg.topic(), "sport/tennis/player1/ranking");

    publisher.publish("sport/player1", QoS::AtMostOnce, b"3", false, 0)?;
    assert!(
        subscriber.recv_publish()?.is_none(),
        "sport/player1 should not match sport/+/player1/#"
    );

    server.terminate();
    Ok(())
}
