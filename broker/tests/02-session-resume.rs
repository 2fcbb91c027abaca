// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Scenario (c): a non-clean session that drops its connection before
//! acking an inflight QoS 1 publish gets that same publish resent with
//! dup=true and the same packet id once it reconnects.

use std::thread::sleep;
use std::time::Duration;

use codec::QoS;

mod common;
use common::{mqtt::Client, Server, ServerConfig};

const CONFIG: &str = r#"
[[listeners]]
protocol = "mqtt"
address = "127.0.0.1:1903"

[security]
allow_anonymous = true

[log]
console_log = false
log_file = "/tmp/mqttd-tests/mqttd-1903.log"
"#;

#[test]
fn test_session_resume_retransmits_inflight_publish() -> Result<(), common::Error> {
    let config = ServerConfig::new("/tmp/mqttd-tests/02-session-resume.toml", CONFIG)?;
    let server = Server::start(config.filename())?;

    let mut subscriber = Client::connect("127.0.0.1:1903", "resume-client", false)?;
    subscriber.subscribe(1, "t", QoS::AtLeastOnce)?;

    let mut publisher = Client::connect("127.0.0.1:1903", "resume-publisher", true)?;
    publisher.publish("t", QoS::AtLeastOnce, b"resume", false, 50)?;
    publisher.expect_puback(50)?;

    let first = subscriber
        .recv_publish()?
        .expect("subscriber never received the initial publish");
    assert!(!first.dup());
    let packet_id = first.packet_id().value();

    // Drop the connection without ever sending PUBACK back: this is the
    // abrupt-close path, not a clean DISCONNECT.
    drop(subscriber);
    sleep(Duration::from_millis(200));

    let mut resumed = Client::connect("127.0.0.1:1903", "resume-client", false)?;
    let redelivered = resumed
        .recv_publish()?
        .expect("resumed session never received the retransmitted publish");
    assert_eq!(redelivered.topic(), "t");
    assert_eq!(redelivered.packet_id().value(), packet_id);
    assert!(redelivered.dup());

    server.terminate();
    Ok(())
}
