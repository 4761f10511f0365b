//! TLS configuration and certificate loading.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};

use crate::config::TlsConfig;

fn invalid(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message)
}

/// Check that the PEM files hold at least one certificate and a private key.
pub fn check_pem_files(cert_path: &Path, key_path: &Path) -> Result<(), std::io::Error> {
    let mut certs = BufReader::new(File::open(cert_path)?);
    let count = rustls_pemfile::certs(&mut certs).collect::<Result<Vec<_>, _>>()?.len();
    if count == 0 {
        return Err(invalid(format!("no certificates found in {}", cert_path.display())));
    }

    let mut key = BufReader::new(File::open(key_path)?);
    if rustls_pemfile::private_key(&mut key)?.is_none() {
        return Err(invalid(format!("no private key found in {}", key_path.display())));
    }
    Ok(())
}

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    check_pem_files(cert_path, key_path)?;
    RustlsConfig::from_pem_file(cert_path, key_path).await
}

/// Build the acceptor used on every accepted socket. Only HTTP/1.1 is offered via ALPN.
pub async fn build_acceptor(config: &TlsConfig) -> Result<RustlsAcceptor, std::io::Error> {
    let rustls = load_tls_config(Path::new(&config.cert_path), Path::new(&config.key_path)).await?;
    let mut server_config = (*rustls.get_inner()).clone();
    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];
    tracing::info!(cert = %config.cert_path, "TLS enabled");
    Ok(RustlsAcceptor::new(RustlsConfig::from_config(Arc::new(server_config))))
}
