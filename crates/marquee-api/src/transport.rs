// TLS transport to a Cast receiver.
//
// Receivers present self-signed device certificates, so chain and name
// verification are switched off. Handshake signatures are still checked
// against the ring provider's algorithms.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use crate::error::Error;

/// Transport settings shared by every device session.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    /// Upper bound on the TLS handshake once TCP is up.
    pub handshake_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(1000),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens TLS streams to receivers. Cheap to clone.
#[derive(Clone)]
pub struct Connector {
    tls: TlsConnector,
    connect_timeout: Duration,
    handshake_timeout: Duration,
}

impl Connector {
    pub fn new(config: &TransportConfig) -> Result<Self, Error> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = Arc::new(AcceptAnyCert {
            provider: Arc::clone(&provider),
        });

        let tls = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(format!("failed to build TLS config: {e}")))?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();

        Ok(Self {
            tls: TlsConnector::from(Arc::new(tls)),
            connect_timeout: config.connect_timeout,
            handshake_timeout: config.handshake_timeout,
        })
    }

    /// TCP connect, then TLS handshake, each under its own timeout.
    pub async fn connect(&self, addr: SocketAddr) -> Result<TlsStream<TcpStream>, Error> {
        let tcp = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectTimeout {
                timeout: self.connect_timeout,
            })??;
        tcp.set_nodelay(true)?;

        debug!(%addr, "TCP connected, starting TLS handshake");

        let server_name = ServerName::from(addr.ip());
        tokio::time::timeout(self.handshake_timeout, self.tls.connect(server_name, tcp))
            .await
            .map_err(|_| Error::HandshakeTimeout {
                timeout: self.handshake_timeout,
            })?
            .map_err(|e| Error::Tls(format!("handshake with {addr} failed: {e}")))
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("connect_timeout", &self.connect_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

// ── Certificate verifier ────────────────────────────────────────────

#[derive(Debug)]
struct AcceptAnyCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_defaults() {
        let connector = Connector::new(&TransportConfig::default()).unwrap();
        assert_eq!(connector.connect_timeout, Duration::from_millis(1000));
        assert_eq!(connector.handshake_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn refused_connection_is_transport_error() {
        // Bind then drop to get a port nobody is listening on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = Connector::new(&TransportConfig::default()).unwrap();
        let err = connector.connect(addr).await.unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn silent_peer_fails_handshake_in_time() {
        // Accepts TCP and then never says a word.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let holder = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let connector = Connector::new(&TransportConfig {
            connect_timeout: Duration::from_millis(500),
            handshake_timeout: Duration::from_millis(100),
        })
        .unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), connector.connect(addr))
            .await
            .expect("handshake was never bounded")
            .unwrap_err();
        let expected = Duration::from_millis(100);
        assert!(
            matches!(err, Error::HandshakeTimeout { timeout } if timeout == expected),
            "unexpected error: {err}"
        );
        assert!(err.is_fatal());
        assert!(err.is_transport());

        holder.abort();
    }
}
