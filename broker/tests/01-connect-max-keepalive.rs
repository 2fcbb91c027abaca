// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Test whether `maximum_keep_alive` violations are rejected for MQTT 3.1.1.

use codec::ConnectReturnCode;

mod common;
use common::{mqtt, Server, ServerConfig};

const CONFIG: &str = r#"
[general]
maximum_keep_alive = 10

[[listeners]]
protocol = "mqtt"
address = "127.0.0.1:1894"

[security]
allow_anonymous = true

[log]
console_log = false
log_file = "/tmp/mqttd-tests/mqttd-1894.log"
"#;

#[test]
fn test_connect_max_keepalive() -> Result<(), common::Error> {
    let config = ServerConfig::new("/tmp/mqttd-tests/01-connect-max-keepalive.toml", CONFIG)?;
    let server = Server::start(config.filename())?;

    // 30s exceeds the configured maximum_keep_alive of 10s.
    let ack = mqtt::connect("127.0.0.1:1894", "keepalive-client", None, None, 30)?
        .expect("server closed the connection instead of replying with CONNACK");
    assert_eq!(ack.return_code(), ConnectReturnCode::IdentifierRejected);

    server.terminate();
    Ok(())
}
