// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Authfile management utility (§10.4): add, remove or list the users in a
//! `mqttd` authfile, hashing passwords with the same bcrypt routine the
//! broker uses to verify them.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use mqttd::auth::file_auth::{AuthEntry, FileAuth, DEFAULT_COST};
use mqttd::error::Error;

#[derive(Parser, Debug)]
#[command(name = "mqttd-passwd", about = "Manage mqttd authfile entries")]
struct Cli {
    /// Path to the authfile.
    #[arg(short, long)]
    file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a user, or replace it if the username already exists.
    Add {
        username: String,
        password: String,
        #[arg(long, value_delimiter = ',', default_value = "ALL")]
        publish: Vec<String>,
        #[arg(long, value_delimiter = ',', default_value = "ALL")]
        subscribe: Vec<String>,
    },
    /// Remove a user.
    Remove { username: String },
    /// List configured usernames.
    List,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("mqttd-passwd: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Error> {
    let mut entries = FileAuth::load_entries(&cli.file)?;

    match &cli.command {
        Command::Add {
            username,
            password,
            publish,
            subscribe,
        } => {
            let hashed = bcrypt::hash(password, DEFAULT_COST)?;
            entries.retain(|entry| &entry.username != username);
            entries.push(AuthEntry {
                username: username.clone(),
                password: hashed,
                publish: publish.clone(),
                subscribe: subscribe.clone(),
            });
            FileAuth::save(&cli.file, &entries)?;
            println!("added {username}");
        }
        Command::Remove { username } => {
            let before = entries.len();
            entries.retain(|entry| &entry.username != username);
            if entries.len() == before {
                println!("no such user: {username}");
            } else {
                FileAuth::save(&cli.file, &entries)?;
                println!("removed {username}");
            }
        }
        Command::List => {
            for entry in &entries {
                println!("{}", entry.username);
            }
        }
    }

    Ok(())
}
