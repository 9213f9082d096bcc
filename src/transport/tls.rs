//! TLS stream transport (rustls).
//!
//! Establishes TCP, performs the TLS handshake, then hands the encrypted
//! stream to the shared newline driver in [`super::stream`].

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use super::stream::spawn_stream_transport;
use crate::{
    //
    log_info,
    log_warn,
    Result,
    RpcError,
    TransportBase,
    TransportConfig,
    TransportHandle,
    TransportKind,
    TransportPtr,
};

/// Trust and verification parameters for the encrypted transport.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    client_config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
}

impl TlsConfig {
    /// Use a fully prepared rustls client configuration.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Tls` if `server_name` is not a valid DNS name or
    /// IP address.
    pub fn new(client_config: Arc<ClientConfig>, server_name: &str) -> Result<Self> {
        // ---
        Ok(Self {
            client_config,
            server_name: parse_server_name(server_name)?,
        })
    }

    /// Verify the server against `roots`.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Tls` for an invalid server name.
    pub fn with_root_certificates(roots: RootCertStore, server_name: &str) -> Result<Self> {
        // ---
        let config = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(|err| RpcError::Tls(err.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self::new(Arc::new(config), server_name)
    }

    /// Accept any server certificate.
    ///
    /// Electrum servers commonly present self-signed certificates. The
    /// handshake signatures are still checked; the certificate chain is not.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Tls` for an invalid server name.
    pub fn insecure(server_name: &str) -> Result<Self> {
        // ---
        let provider = provider();
        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|err| RpcError::Tls(err.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth();

        Self::new(Arc::new(config), server_name)
    }

    /// Name presented for SNI and certificate verification.
    pub fn server_name(&self) -> &ServerName<'static> {
        &self.server_name
    }
}

/// Dial `addr`, complete the TLS handshake and start the stream driver.
///
/// # Errors
///
/// Returns `RpcError::Io` if TCP cannot connect and `RpcError::Tls` if the
/// handshake fails.
pub async fn create_tls_transport(
    addr: &str,
    tls: &TlsConfig,
    config: &TransportConfig,
) -> Result<(TransportPtr, TransportHandle)> {
    // ---
    let tcp = TcpStream::connect(addr).await?;
    tcp.set_nodelay(true)?;

    let connector = TlsConnector::from(tls.client_config.clone());
    let stream = connector
        .connect(tls.server_name.clone(), tcp)
        .await
        .map_err(|err| RpcError::Tls(err.to_string()))?;

    log_info!("{addr}: tls connection established");

    Ok(spawn_stream_transport(
        stream,
        TransportBase::new(addr, TransportKind::Tls),
        config,
    ))
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn parse_server_name(name: &str) -> Result<ServerName<'static>> {
    // ---
    ServerName::try_from(name.to_owned())
        .map_err(|err| RpcError::Tls(format!("invalid server name {name:?}: {err}")))
}

/// Certificate verifier that trusts every chain.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        log_warn!("accepting server certificate without verification");
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
