//! Establishes one raw TCP or TLS connection to a TAK server destination and writes framed CoT
//! XML over it. Framing is trivial: each event's XML bytes are written as-is,
//! back to back, since CoT XML fragments are self-delimiting on the wire.

use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio_rustls::{rustls::pki_types::ServerName, TlsConnector};
use trakbridge_core::config::{TakProtocol, TakServerConfig};
use trakbridge_core::error::TransmitError;

use crate::tls::build_client_config;

/// A live, writable connection to a destination, abstracting over plain TCP and TLS.
pub enum Connection {
    Plain(BufWriter<TcpStream>),
    Tls(BufWriter<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Connection {
    /// Dials `server`, performing a TLS handshake when `server.protocol` calls for one.
    pub async fn connect(server: &TakServerConfig) -> Result<Self, TransmitError> {
        let tcp = TcpStream::connect((server.host.as_str(), server.port))
            .await
            .map_err(TransmitError::Connection)?;
        tcp.set_nodelay(true).ok();

        match server.protocol {
            TakProtocol::Tcp => Ok(Connection::Plain(BufWriter::new(tcp))),
            TakProtocol::Tls => {
                let material = server.tls_material.clone().unwrap_or_default();
                let config = build_client_config(&material)?;
                let connector = TlsConnector::from(Arc::new(config));
                let server_name = ServerName::try_from(server.host.clone())
                    .map_err(|_| TransmitError::Tls(format!("invalid server name {}", server.host)))?;
                let tls = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| TransmitError::Tls(e.to_string()))?;
                Ok(Connection::Tls(BufWriter::new(tls)))
            }
        }
    }

    /// Writes one event's XML bytes and flushes, so a write error always surfaces before the
    /// worker reports the batch transmitted, so there's no silent loss on a dead connection.
    pub async fn write_event(&mut self, xml_bytes: &[u8]) -> Result<(), TransmitError> {
        match self {
            Connection::Plain(w) => {
                w.write_all(xml_bytes).await.map_err(TransmitError::Connection)?;
                w.flush().await.map_err(TransmitError::Connection)
            }
            Connection::Tls(w) => {
                w.write_all(xml_bytes).await.map_err(TransmitError::Connection)?;
                w.flush().await.map_err(TransmitError::Connection)
            }
        }
    }

    pub async fn shutdown(&mut self) {
        let _ = match self {
            Connection::Plain(w) => w.shutdown().await,
            Connection::Tls(w) => w.shutdown().await,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use trakbridge_core::config::TlsMaterial;

    fn server_config(port: u16) -> TakServerConfig {
        TakServerConfig {
            id: "s1".to_string(),
            name: "test".to_string(),
            host: "127.0.0.1".to_string(),
            port,
            protocol: TakProtocol::Tcp,
            tls_material: None,
        }
    }

    #[tokio::test]
    async fn writes_plain_tcp_bytes_to_the_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut conn = Connection::connect(&server_config(addr.port())).await.unwrap();
        conn.write_event(b"hello").await.unwrap();

        let received = accept.await.unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn connect_fails_when_nothing_is_listening() {
        let result = Connection::connect(&server_config(1)).await;
        assert!(result.is_err());
    }

    #[test]
    fn unset_tls_material_defaults_to_no_client_auth_and_native_roots() {
        let material = TlsMaterial::default();
        assert!(material.client_cert_path.is_none());
        assert!(material.server_fingerprint_sha256.is_none());
    }
}
