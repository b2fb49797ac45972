//! Local connector (spec §4.E): opens a plain or TLS connection to the
//! user's local server with configurable certificate trust.
//!
//! The `IoStream` enum and the PEM-loading helpers are generalized from the
//! teacher's `transport::io_stream`/`transport::pem` modules to the
//! client-side connection this agent makes to the operator's local server.

use std::{fs::File, io::BufReader as StdBufReader, path::Path, pin::Pin, sync::Arc, task::{Context, Poll}};

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::config::LocalConnectConfig;
use crate::error::SessionError;

/// A connection to the local server: either plain TCP or TLS over TCP.
pub enum IoStream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl From<TcpStream> for IoStream {
    fn from(stream: TcpStream) -> Self {
        IoStream::Tcp(stream)
    }
}

impl From<TlsStream<TcpStream>> for IoStream {
    fn from(stream: TlsStream<TcpStream>) -> Self {
        IoStream::Tls(Box::new(stream))
    }
}

impl AsyncRead for IoStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            IoStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            IoStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for IoStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            IoStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            IoStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            IoStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            IoStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            IoStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            IoStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Open a client connection to `config.host:config.port` per spec §4.E.
pub async fn connect_local(config: &LocalConnectConfig) -> Result<IoStream, SessionError> {
    let addr = (config.host.as_str(), config.port);
    let tcp_stream = TcpStream::connect(addr).await.map_err(|e| {
        if SessionError::is_connection_refused(&e) {
            SessionError::LocalConnectionRefused(config.host.clone(), config.port)
        } else {
            SessionError::LocalDialError(config.host.clone(), config.port, e)
        }
    })?;

    if !config.https {
        return Ok(IoStream::from(tcp_stream));
    }

    let tls_config = build_client_config(config)?;
    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from(config.host.clone()).map_err(|_| {
        SessionError::LocalConfigError(format!("invalid hostname for TLS SNI: {}", config.host))
    })?;

    let tls_stream = connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|e| SessionError::LocalDialError(config.host.clone(), config.port, e))?;

    Ok(IoStream::from(tls_stream))
}

fn build_client_config(config: &LocalConnectConfig) -> Result<ClientConfig, SessionError> {
    let builder = ClientConfig::builder();

    if config.allow_invalid_cert {
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoVerifier))
            .with_no_client_auth());
    }

    let mut root_store = RootCertStore::empty();
    match &config.ca_file {
        Some(ca_file) => {
            for cert in read_certificates(ca_file)? {
                root_store.add(cert).map_err(|e| {
                    SessionError::LocalConfigError(format!("invalid CA certificate: {}", e))
                })?;
            }
        }
        None => {
            for cert in webpki_roots::TLS_SERVER_ROOTS.iter() {
                root_store.roots.push(cert.clone());
            }
        }
    }

    let builder = builder.with_root_certificates(root_store);

    match (&config.cert_file, &config.key_file) {
        (Some(cert_file), Some(key_file)) => {
            let cert_chain = read_certificates(cert_file)?;
            let private_key = read_private_key(key_file)?;
            builder
                .with_client_auth_cert(cert_chain, private_key)
                .map_err(|e| {
                    SessionError::LocalConfigError(format!("invalid client certificate/key: {}", e))
                })
        }
        (None, None) => Ok(builder.with_no_client_auth()),
        _ => Err(SessionError::LocalConfigError(
            "certFile and keyFile must both be provided, or neither".to_string(),
        )),
    }
}

fn read_certificates(path: impl AsRef<Path>) -> Result<Vec<CertificateDer<'static>>, SessionError> {
    let file = File::open(&path).map_err(|e| {
        SessionError::LocalConfigError(format!(
            "could not open certificate file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    let mut reader = StdBufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            SessionError::LocalConfigError(format!(
                "invalid PEM certificate data in {}: {}",
                path.as_ref().display(),
                e
            ))
        })
}

fn read_private_key(path: impl AsRef<Path>) -> Result<PrivateKeyDer<'static>, SessionError> {
    let file = File::open(&path).map_err(|e| {
        SessionError::LocalConfigError(format!(
            "could not open private key file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    let mut reader = StdBufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| {
            SessionError::LocalConfigError(format!(
                "invalid PEM private key data in {}: {}",
                path.as_ref().display(),
                e
            ))
        })?
        .ok_or_else(|| {
            SessionError::LocalConfigError(format!(
                "no private key found in {}",
                path.as_ref().display()
            ))
        })
}

/// A certificate verifier that accepts anything, used when
/// `allow_invalid_cert` is set (spec §4.E). Grounded on the
/// `NoVerifier` pattern seen across the example pack's rustls-based
/// tunneling/proxy crates.
mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}
