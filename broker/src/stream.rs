// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Each `Stream` represents a duplex socket connection to a client.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

use crate::error::Error;

#[derive(Debug)]
pub enum Stream {
    Mqtt(TcpStream),
    Mqtts(Box<TlsStream<TcpStream>>),
}

impl Stream {
    /// Read from stream.
    ///
    /// # Errors
    ///
    /// Returns error if stream/socket gets error.
    pub async fn read_buf(&mut self, buf: &mut Vec<u8>) -> Result<usize, Error> {
        match self {
            Self::Mqtt(tcp_stream) => Ok(tcp_stream.read_buf(buf).await?),
            Self::Mqtts(tls_stream) => Ok(tls_stream.read_buf(buf).await?),
        }
    }

    /// Write the whole buffer to the stream.
    ///
    /// # Errors
    ///
    /// Returns error if socket/stream gets error.
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
        match self {
            Self::Mqtt(tcp_stream) => tcp_stream.write_all(buf).await.map_err(Into::into),
            Self::Mqtts(tls_stream) => tls_stream.write_all(buf).await.map_err(Into::into),
        }
    }

    pub async fn shutdown(&mut self) -> Result<(), Error> {
        match self {
            Self::Mqtt(tcp_stream) => tcp_stream.shutdown().await.map_err(Into::into),
            Self::Mqtts(tls_stream) => tls_stream.shutdown().await.map_err(Into::into),
        }
    }

    #[must_use]
    pub fn peer_addr_string(&self) -> String {
        let addr = match self {
            Self::Mqtt(tcp_stream) => tcp_stream.peer_addr(),
            Self::Mqtts(tls_stream) => tls_stream.get_ref().0.peer_addr(),
        };
        addr.map_or_else(|_| "unknown".to_string(), |addr| addr.to_string())
    }
}
