// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Per-listener accept loop (§5, §9.2): binds one configured socket,
//! optionally wraps accepted connections in TLS, and spawns one
//! [`crate::connection::handle_connection`] task per accepted client.

use std::io::BufReader;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::rustls::ServerConfig as TlsServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::auth::Authenticator;
use crate::commands::{ListenerToDispatcherCmd, SessionToDispatcherCmd};
use crate::config;
use crate::connection::{self, ConnectionConfig};
use crate::error::{Error, ErrorKind};
use crate::stream::Stream;
use crate::types::{ConnectionId, ListenerId};

/// Build a TLS acceptor from an `mqtts` listener's configured cert/key files.
fn load_tls_acceptor(listener: &config::Listener) -> Result<TlsAcceptor, Error> {
    let cert_path = listener
        .cert_file()
        .ok_or_else(|| Error::new(ErrorKind::CertError, "mqtts listener missing cert_file"))?;
    let key_path = listener
        .key_file()
        .ok_or_else(|| Error::new(ErrorKind::CertError, "mqtts listener missing key_file"))?;

    let cert_file = std::fs::File::open(cert_path)?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            Error::from_string(ErrorKind::CertError, format!("failed to parse cert_file: {err}"))
        })?;

    let key_file = std::fs::File::open(key_path)?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|err| {
            Error::from_string(ErrorKind::CertError, format!("failed to parse key_file: {err}"))
        })?
        .ok_or_else(|| Error::new(ErrorKind::CertError, "key_file contains no private key"))?;

    let tls_config = TlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| {
            Error::from_string(ErrorKind::CertError, format!("invalid cert/key pair: {err}"))
        })?;

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

/// Bind one configured listener and spawn its accept loop in the
/// background; returns once the socket is bound, not when the loop exits.
///
/// # Errors
///
/// Returns error if the socket cannot be bound or, for an `mqtts` listener,
/// the TLS certificate/key cannot be loaded.
pub async fn spawn(
    listener_id: ListenerId,
    listener: config::Listener,
    general: &config::General,
    to_dispatcher: mpsc::Sender<ListenerToDispatcherCmd>,
    to_session_dispatcher: mpsc::Sender<SessionToDispatcherCmd>,
    authenticator: Arc<Authenticator>,
) -> Result<(), Error> {
    let tcp_listener = TcpListener::bind(listener.address()).await?;
    log::info!("listener {listener_id} bound to {}", listener.address());

    let tls_acceptor = match listener.protocol() {
        config::Protocol::Mqtts => Some(load_tls_acceptor(&listener)?),
        config::Protocol::Mqtt => None,
    };

    let connection_config = ConnectionConfig {
        listener_id,
        keep_alive_default: listener.keep_alive(),
        connect_timeout: Duration::from_secs(u64::from(listener.connect_timeout())),
        allow_empty_client_id: listener.allow_empty_client_id(),
        maximum_keep_alive: general.maximum_keep_alive(),
        maximum_packet_size: general.maximum_packet_size(),
        message_size_limit: general.message_size_limit(),
        maximum_qos: general.maximum_qos(),
    };

    let maximum_connections = listener.maximum_connections();
    let active_connections = Arc::new(AtomicUsize::new(0));

    tokio::spawn(accept_loop(
        tcp_listener,
        tls_acceptor,
        connection_config,
        maximum_connections,
        active_connections,
        to_dispatcher,
        to_session_dispatcher,
        authenticator,
    ));

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn accept_loop(
    tcp_listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    connection_config: ConnectionConfig,
    maximum_connections: usize,
    active_connections: Arc<AtomicUsize>,
    to_dispatcher: mpsc::Sender<ListenerToDispatcherCmd>,
    to_session_dispatcher: mpsc::Sender<SessionToDispatcherCmd>,
    authenticator: Arc<Authenticator>,
) {
    let mut next_connection_id: ConnectionId = 0;
    loop {
        let (socket, peer) = match tcp_listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                log::warn!(
                    "listener {}: accept failed: {err}",
                    connection_config.listener_id
                );
                continue;
            }
        };

        // maximum_connections == 0 means unlimited.
        if maximum_connections > 0 && active_connections.load(Ordering::Acquire) >= maximum_connections
        {
            log::warn!(
                "listener {}: rejecting {peer}, maximum_connections ({maximum_connections}) reached",
                connection_config.listener_id
            );
            drop(socket);
            continue;
        }

        if let Err(err) = socket.set_nodelay(true) {
            log::warn!(
                "listener {}: failed to set nodelay for {peer}: {err}",
                connection_config.listener_id
            );
        }

        let connection_id = next_connection_id;
        next_connection_id = next_connection_id.wrapping_add(1);

        let stream = if let Some(acceptor) = &tls_acceptor {
            match acceptor.accept(socket).await {
                Ok(tls_stream) => Stream::Mqtts(Box::new(tls_stream)),
                Err(err) => {
                    log::warn!(
                        "listener {}: TLS handshake with {peer} failed: {err}",
                        connection_config.listener_id
                    );
                    continue;
                }
            }
        } else {
            Stream::Mqtt(socket)
        };

        active_connections.fetch_add(1, Ordering::AcqRel);
        let slot = Arc::clone(&active_connections);
        let connection_config = connection_config.clone();
        let to_dispatcher = to_dispatcher.clone();
        let to_session_dispatcher = to_session_dispatcher.clone();
        let authenticator = Arc::clone(&authenticator);
        tokio::spawn(async move {
            connection::handle_connection(
                stream,
                connection_id,
                connection_config,
                to_dispatcher,
                to_session_dispatcher,
                authenticator,
            )
            .await;
            slot.fetch_sub(1, Ordering::AcqRel);
        });
    }
}
