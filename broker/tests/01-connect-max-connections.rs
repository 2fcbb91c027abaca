// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::net::TcpStream;

mod common;
use common::{mqtt, Server, ServerConfig};

const CONFIG: &str = r#"
[general]
pid_file = "/tmp/mqttd-tests/mqtt-1893.pid"

[[listeners]]
protocol = "mqtt"
address = "127.0.0.1:1893"
maximum_connections = 1

[security]
allow_anonymous = true

[log]
console_log = false
log_file = "/tmp/mqttd-tests/mqttd-1893.log"
"#;

#[test]
fn test_connect_max_connections() -> Result<(), common::Error> {
    let config = ServerConfig::new("/tmp/mqttd-tests/01-connect-max-connections.toml", CONFIG)?;
    let server = Server::start(config.filename())?;

    // First connection fits inside the one-connection budget and is kept
    // open across the second connection attempt below.
    let first = TcpStream::connect("127.0.0.1:1893")?;

    // The listener has already used its only slot, so the second attempt
    // is dropped by the accept loop before any CONNACK is sent.
    let second_ack = mqtt::connect("127.0.0.1:1893", "second-client", None, None, 30)?;
    assert!(
        second_ack.is_none(),
        "expected the connection over maximum_connections to be closed without a CONNACK"
    );

    drop(first);
    server.terminate();
    Ok(())
}
