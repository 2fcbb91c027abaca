// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Top-level process assembly (§9.1): load and validate the config, build
//! the persistence backend and authenticator, bind every configured
//! listener, and drive the dispatcher to completion on SIGINT/SIGTERM.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::auth::Authenticator;
use crate::config::{Backend, Config};
use crate::constants::CHANNEL_CAPACITY;
use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::error::{Error, ErrorKind};
use crate::persistence::{MemoryStore, PersistenceBackend, RedisStore};

/// Load `config_path`, validate it, and run the broker until a shutdown
/// signal arrives. Returns once every session has been torn down (and any
/// last-wills published).
///
/// # Errors
///
/// Returns error if the config cannot be loaded or fails validation, a
/// listener cannot be bound, or the persistence backend cannot be reached.
pub async fn run_server(config_path: &Path) -> Result<(), Error> {
    let config = load_config(config_path)?;
    config.validate(true)?;

    crate::log::init_log(config.log())?;
    log::info!("mqttd starting, config: {config_path:?}");

    write_pid_file(config.general().pid_file())?;

    let persistence = match config.storage().backend() {
        Backend::Memory => PersistenceBackend::Memory(MemoryStore::new()),
        Backend::Redis => PersistenceBackend::Redis(
            RedisStore::connect(config.storage().connection_url()).await?,
        ),
    };

    let authenticator = Arc::new(Authenticator::new(config.security())?);
    let bridge = config.bridge().cloned().map(crate::bridge::spawn);

    let dispatcher_config = DispatcherConfig {
        max_inflight: config.general().max_inflight(),
        redelivery_floor: config.general().redelivery_interval(0),
        maximum_qos: config.general().maximum_qos(),
    };

    let mut dispatcher = Dispatcher::new(dispatcher_config, persistence, bridge);
    dispatcher.restore().await?;

    let (to_dispatcher_listener, from_listeners) = mpsc::channel(CHANNEL_CAPACITY);
    let (to_dispatcher_session, from_sessions) = mpsc::channel(CHANNEL_CAPACITY);

    for (index, listener_config) in config.listeners().iter().enumerate() {
        let listener_id = index as u32;
        crate::listener::spawn(
            listener_id,
            listener_config.clone(),
            config.general(),
            to_dispatcher_listener.clone(),
            to_dispatcher_session.clone(),
            Arc::clone(&authenticator),
        )
        .await?;
    }
    // The dispatcher's own copies of these senders keep the channels open;
    // drop the locals so `from_listeners`/`from_sessions` only close once
    // every listener/connection task has gone away.
    drop(to_dispatcher_listener);
    drop(to_dispatcher_session);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let dispatcher_handle = tokio::spawn(dispatcher.run(from_listeners, from_sessions, shutdown_rx));

    wait_for_shutdown_signal().await;
    log::info!("shutdown signal received, draining sessions");

    let _ = shutdown_tx.send(());
    dispatcher_handle
        .await
        .map_err(|err| Error::from_string(ErrorKind::ChannelError, format!("dispatcher task panicked: {err}")))??;

    Ok(())
}

fn load_config(config_path: &Path) -> Result<Config, Error> {
    let content = std::fs::read_to_string(config_path).map_err(|err| {
        Error::from_string(
            ErrorKind::ConfigError,
            format!("failed to read config {config_path:?}: {err}"),
        )
    })?;
    toml::from_str(&content).map_err(Into::into)
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                log::warn!("failed to install SIGTERM handler: {err}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
