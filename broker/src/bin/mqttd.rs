// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Broker entry point (§10.4): parse CLI flags, load config, run until a
//! shutdown signal arrives.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use mqttd::constants::DEFAULT_CONFIG;
use mqttd::server;

#[derive(Parser, Debug)]
#[command(name = "mqttd", version, about = "MQTT 3.1/3.1.1 broker")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(server::run_server(&cli.config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("mqttd exited with error: {err}");
            ExitCode::FAILURE
        }
    }
}
