//! Secure channel provider.
//!
//! Turns the configured [`SecurityMode`] into connections both ends can run
//! transfers over:
//!
//! - `plaintext`: raw TCP, for networks that are already encrypted.
//! - `tls`: TLS over TCP. The server presents a PEM chain and key; the
//!   client trusts a PEM root and checks the configured server name.
//! - `tunnel`: plaintext through an SSH forward set up outside this
//!   process. The server binds loopback only, the client dials the local
//!   end of the forward.
//!
//! Address selection per mode lives in `FerryConfig::listen_addr` and
//! `FerryConfig::dial_addr`.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use ferry_core::config::{FerryConfig, SecurityMode};

use super::{BoxedIo, FramedStream};
use crate::stream::{OpenStream, StreamError};

/// Client side: dials one connection per transfer.
#[derive(Clone)]
pub struct Connector {
    addr: String,
    mode: SecurityMode,
    tls: Option<(TlsConnector, ServerName<'static>)>,
}

impl Connector {
    pub fn from_config(config: &FerryConfig) -> Result<Self, ChannelError> {
        let addr = config.dial_addr();
        match config.security.mode {
            SecurityMode::Tls => {
                let ca = config
                    .security
                    .ca_path
                    .as_deref()
                    .ok_or(ChannelError::MissingPath("security.ca_path"))?;
                Self::tls(addr, ca, &config.client.server_name_override)
            }
            mode => Ok(Self { addr, mode, tls: None }),
        }
    }

    pub fn plaintext(addr: impl Into<String>) -> Self {
        Self { addr: addr.into(), mode: SecurityMode::Plaintext, tls: None }
    }

    /// TLS to `addr`, trusting the roots in `ca_path` and requiring the
    /// server certificate to be valid for `server_name`.
    pub fn tls(addr: impl Into<String>, ca_path: &Path, server_name: &str) -> Result<Self, ChannelError> {
        let mut roots = rustls::RootCertStore::empty();
        for cert in load_certs(ca_path)? {
            roots.add(cert).map_err(ChannelError::Tls)?;
        }
        let config = rustls::ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(ChannelError::Tls)?
            .with_root_certificates(roots)
            .with_no_client_auth();
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|_| ChannelError::BadServerName(server_name.to_string()))?;

        Ok(Self {
            addr: addr.into(),
            mode: SecurityMode::Tls,
            tls: Some((TlsConnector::from(Arc::new(config)), name)),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    pub async fn connect(&self) -> Result<FramedStream<BoxedIo>, ChannelError> {
        let tcp = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| ChannelError::Connect(self.addr.clone(), e))?;
        tcp.set_nodelay(true).map_err(|e| ChannelError::Connect(self.addr.clone(), e))?;

        let io: BoxedIo = match &self.tls {
            None => Box::new(tcp),
            Some((connector, name)) => Box::new(
                connector
                    .connect(name.clone(), tcp)
                    .await
                    .map_err(ChannelError::Handshake)?,
            ),
        };
        tracing::trace!(addr = %self.addr, mode = ?self.mode, "channel established");
        Ok(FramedStream::new(io))
    }
}

impl OpenStream for Connector {
    type Stream = FramedStream<BoxedIo>;

    async fn open_stream(&self) -> Result<Self::Stream, StreamError> {
        Ok(self.connect().await?)
    }
}

/// Server side: wraps each accepted TCP connection for the configured mode.
#[derive(Clone)]
pub struct Acceptor {
    mode: SecurityMode,
    tls: Option<TlsAcceptor>,
}

impl Acceptor {
    pub fn from_config(config: &FerryConfig) -> Result<Self, ChannelError> {
        match config.security.mode {
            SecurityMode::Tls => {
                let cert = config
                    .security
                    .cert_path
                    .as_deref()
                    .ok_or(ChannelError::MissingPath("security.cert_path"))?;
                let key = config
                    .security
                    .key_path
                    .as_deref()
                    .ok_or(ChannelError::MissingPath("security.key_path"))?;
                Self::tls(cert, key)
            }
            mode => Ok(Self { mode, tls: None }),
        }
    }

    pub fn plaintext() -> Self {
        Self { mode: SecurityMode::Plaintext, tls: None }
    }

    pub fn tls(cert_path: &Path, key_path: &Path) -> Result<Self, ChannelError> {
        let certs = load_certs(cert_path)?;
        let key = load_key(key_path)?;
        let config = rustls::ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(ChannelError::Tls)?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(ChannelError::Tls)?;
        Ok(Self { mode: SecurityMode::Tls, tls: Some(TlsAcceptor::from(Arc::new(config))) })
    }

    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    pub async fn accept(&self, tcp: TcpStream) -> Result<FramedStream<BoxedIo>, ChannelError> {
        let io: BoxedIo = match &self.tls {
            None => Box::new(tcp),
            Some(acceptor) => {
                Box::new(acceptor.accept(tcp).await.map_err(ChannelError::Handshake)?)
            }
        };
        Ok(FramedStream::new(io))
    }
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ChannelError> {
    let file = File::open(path).map_err(|e| ChannelError::Read(path.to_path_buf(), e))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ChannelError::Read(path.to_path_buf(), e))?;
    if certs.is_empty() {
        return Err(ChannelError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ChannelError> {
    let file = File::open(path).map_err(|e| ChannelError::Read(path.to_path_buf(), e))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| ChannelError::Read(path.to_path_buf(), e))?
        .ok_or_else(|| ChannelError::NoPrivateKey(path.to_path_buf()))
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("must provide {0} under TLS")]
    MissingPath(&'static str),
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
    #[error("invalid server name '{0}'")]
    BadServerName(String),
    #[error("TLS configuration: {0}")]
    Tls(rustls::Error),
    #[error("failed to connect to {0}: {1}")]
    Connect(String, std::io::Error),
    #[error("TLS handshake failed: {0}")]
    Handshake(std::io::Error),
}
