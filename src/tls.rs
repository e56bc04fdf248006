use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::{self, ServerConfig};
use pgwire::tokio::TlsAcceptor;
use tracing::info;

use crate::config::Config;

/// PEM certificate chain and private key for the wire listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsFiles {
    /// Pair up the configured paths. Neither set means plaintext.
    pub fn pair(cert: Option<PathBuf>, key: Option<PathBuf>) -> Result<Option<Self>, TlsError> {
        match (cert, key) {
            (None, None) => Ok(None),
            (Some(cert), Some(key)) => Ok(Some(Self { cert, key })),
            (Some(_), None) => Err(TlsError::HalfConfigured {
                missing: "SLOTGRID_TLS_KEY",
            }),
            (None, Some(_)) => Err(TlsError::HalfConfigured {
                missing: "SLOTGRID_TLS_CERT",
            }),
        }
    }

    pub fn acceptor(&self) -> Result<TlsAcceptor, TlsError> {
        let certs: Vec<_> = rustls_pemfile::certs(&mut open(&self.cert)?)
            .collect::<Result<_, _>>()
            .map_err(|e| TlsError::read(&self.cert, e))?;
        if certs.is_empty() {
            return Err(TlsError::NoCertificate(self.cert.clone()));
        }

        let key = rustls_pemfile::private_key(&mut open(&self.key)?)
            .map_err(|e| TlsError::read(&self.key, e))?
            .ok_or_else(|| TlsError::NoPrivateKey(self.key.clone()))?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(TlsError::Rejected)?;
        config.alpn_protocols = vec![b"postgresql".to_vec()];

        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| TlsError::read(path, e))
}

/// Acceptor for the configured cert/key pair, or `None` for plaintext.
pub fn load_tls_acceptor(config: &Config) -> Result<Option<TlsAcceptor>, TlsError> {
    let Some(files) = TlsFiles::pair(config.tls_cert.clone(), config.tls_key.clone())? else {
        return Ok(None);
    };
    let acceptor = files.acceptor()?;
    info!("tls certificate {}", files.cert.display());
    Ok(Some(acceptor))
}

#[derive(Debug)]
pub enum TlsError {
    HalfConfigured { missing: &'static str },
    Read { path: PathBuf, source: io::Error },
    NoCertificate(PathBuf),
    NoPrivateKey(PathBuf),
    Rejected(rustls::Error),
}

impl TlsError {
    fn read(path: &Path, source: io::Error) -> Self {
        TlsError::Read {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsError::HalfConfigured { missing } => write!(
                f,
                "{missing} is not set: TLS needs both SLOTGRID_TLS_CERT and SLOTGRID_TLS_KEY, or neither"
            ),
            TlsError::Read { path, source } => write!(f, "{}: {source}", path.display()),
            TlsError::NoCertificate(path) => write!(f, "{}: no certificate found", path.display()),
            TlsError::NoPrivateKey(path) => write!(f, "{}: no private key found", path.display()),
            TlsError::Rejected(e) => write!(f, "certificate/key rejected: {e}"),
        }
    }
}

impl std::error::Error for TlsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TlsError::Read { source, .. } => Some(source),
            TlsError::Rejected(e) => Some(e),
            _ => None,
        }
    }
}
