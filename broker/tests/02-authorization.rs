// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Scenario (f): a session authorized to publish/subscribe only on `a/#`
//! has a publish on `b/x` silently dropped (connection stays open) and a
//! subscribe to `b/x` acked with 0x80, without recording the subscription.

use std::fs;

use codec::{QoS, SubscribeAck};

mod common;
use common::{mqtt::Client, Server, ServerConfig};

const CONFIG: &str = r#"
[[listeners]]
protocol = "mqtt"
address = "127.0.0.1:1906"

[security]
authfile = "/tmp/mqttd-tests/02-authorization-authfile.json"

[log]
console_log = false
log_file = "/tmp/mqttd-tests/mqttd-1906.log"
"#;

#[test]
fn test_authorization_restricts_publish_and_subscribe() -> Result<(), common::Error> {
    fs::create_dir_all("/tmp/mqttd-tests")?;
    let restricted_hash = bcrypt::hash("secret", bcrypt::DEFAULT_COST)
        .expect("bcrypt hashing should not fail for a short ascii password");
    let publisher_hash = bcrypt::hash("other-secret", bcrypt::DEFAULT_COST)
        .expect("bcrypt hashing should not fail for a short ascii password");
    let authfile = format!(
        r#"[
            {{"username": "restricted", "password": "{restricted_hash}", "publish": ["a/#"], "subscribe": ["a/#"]}},
            {{"username": "publisher", "password": "{publisher_hash}", "publish": "ALL", "subscribe": "ALL"}}
        ]"#
    );
    fs::write("/tmp/mqttd-tests/02-authorization-authfile.json", authfile)?;

    let config = ServerConfig::new("/tmp/mqttd-tests/02-authorization.toml", CONFIG)?;
    let server = Server::start(config.filename())?;

    let mut restricted = Client::connect_with_auth(
        "127.0.0.1:1906",
        "restricted-client",
        true,
        Some("restricted"),
        Some(b"secret"),
    )?;

    // Subscribing outside the allowed mask is rejected with 0x80 and the
    // connection stays open.
    let suback = restricted.subscribe(1, "b/x", QoS::AtMostOnce)?;
    assert_eq!(suback.acknowledgements().len(), 1);
    assert_eq!(suback.acknowledgements()[0], SubscribeAck::Failed);

    // A matching subscribe to confirm the connection is still healthy and
    // that the denied filter really wasn't recorded: an unrelated publisher
    // sends on both `a/#` and `b/x`; only the former should arrive.
    let allowed_suback = restricted.subscribe(2, "a/#", QoS::AtMostOnce)?;
    assert_eq!(allowed_suback.acknowledgements().len(), 1);
    assert_eq!(allowed_suback.acknowledgements()[0], SubscribeAck::QoS(QoS::AtMostOnce));

    let mut publisher = Client::connect_with_auth(
        "127.0.0.1:1906",
        "unrestricted-pub",
        true,
        Some("publisher"),
        Some(b"other-secret"),
    )?;
    publisher.publish("b/x", QoS::AtMostOnce, b"denied", false, 0)?;
    publisher.publish("a/y", QoS::AtMostOnce, b"allowed", false, 0)?;

    let received = restricted
        .recv_publish()?
        .expect("the allowed publish on a/y should have arrived");
    assert_eq!(received.topic(), "a/y");
    assert!(
        restricted.recv_publish()?.is_none(),
        "b/x was never subscribed to (denied) and must not have arrived"
    );

    // The restricted client's own publish attempt outside `a/#` is dropped,
    // not rejected with a connection close: prove the connection still
    // works by publishing on the allowed mask afterward.
    restricted.publish("b/z", QoS::AtMostOnce, b"should be dropped", false, 0)?;
    restricted.publish("a/z", QoS::AtMostOnce, b"should pass", false, 0)?;
    let own = restricted
        .recv_publish()?
        .expect("restricted client should still see its own allowed publish via its a/# subscription");
    assert_eq!(own.topic(), "a/z");

    server.terminate();
    Ok(())
}
