// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::path::PathBuf;
use std::process::{Child, Command};
use std::thread::sleep;
use std::time::Duration;

use super::Error;

/// Spawns the `mqttd` binary against a config file and kills it on drop.
pub struct Server {
    child: Child,
}

impl Server {
    /// Start `mqttd` with `config_file` and give it a moment to bind its listeners.
    pub fn start(config_file: &str) -> Result<Self, Error> {
        let exec_file = Self::get_exec_file()?;
        let child = Command::new(exec_file).args(["-c", config_file]).spawn()?;
        // No readiness signal is exposed over the process boundary; give the
        // listener accept loop time to bind before tests start connecting.
        sleep(Duration::from_millis(300));
        Ok(Self { child })
    }

    pub fn terminate(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn get_exec_file() -> Result<PathBuf, Error> {
        const IN_CURR_DIR: &str = "./target/debug/mqttd";
        const IN_PARENT_DIR: &str = "../target/debug/mqttd";
        let path = PathBuf::from(IN_CURR_DIR);
        if path.exists() {
            return Ok(path);
        }
        let path = PathBuf::from(IN_PARENT_DIR);
        if path.exists() {
            return Ok(path);
        }
        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "mqttd binary not found, build it first with `cargo build`",
        )
        .into())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
