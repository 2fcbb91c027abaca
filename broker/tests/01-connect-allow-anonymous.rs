// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use codec::ConnectReturnCode;

mod common;
use common::{mqtt, Server, ServerConfig};

const ALLOW_CONFIG: &str = r#"
[general]
pid_file = "/tmp/mqttd-tests/mqtt-1889.pid"

[[listeners]]
protocol = "mqtt"
address = "127.0.0.1:1889"

[security]
allow_anonymous = true

[log]
console_log = false
log_file = "/tmp/mqttd-tests/mqttd-1889.log"
"#;

const DENY_CONFIG: &str = r#"
[general]
pid_file = "/tmp/mqttd-tests/mqtt-1891.pid"

[[listeners]]
protocol = "mqtt"
address = "127.0.0.1:1891"

[security]
allow_anonymous = false

[log]
console_log = false
log_file = "/tmp/mqttd-tests/mqttd-1891.log"
"#;

#[test]
fn test_conn_allow_anonymous() -> Result<(), common::Error> {
    let config = ServerConfig::new(
        "/tmp/mqttd-tests/01-connect-allow-anonymous.toml",
        ALLOW_CONFIG,
    )?;
    let server = Server::start(config.filename())?;

    let ack = mqtt::connect("127.0.0.1:1889", "anon-client-1", None, None, 30)?
        .expect("server closed the connection instead of replying with CONNACK");
    assert_eq!(ack.return_code(), ConnectReturnCode::Accepted);

    server.terminate();
    Ok(())
}

#[test]
fn test_conn_deny_anonymous() -> Result<(), common::Error> {
    let config = ServerConfig::new(
        "/tmp/mqttd-tests/01-connect-deny-anonymous.toml",
        DENY_CONFIG,
    )?;
    let server = Server::start(config.filename())?;

    let ack = mqtt::connect("127.0.0.1:1891", "anon-client-2", None, None, 30)?
        .expect("server closed the connection instead of replying with CONNACK");
    assert_eq!(ack.return_code(), ConnectReturnCode::Unauthorized);

    server.terminate();
    Ok(())
}
