//! TLS acceptor setup for the Key Manager port — the only one of the
//! three front ends that runs over TLS, since it carries the blinded
//! RSA exchange to a KM that may live outside the trust boundary of
//! the storage cloud itself.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

pub fn build_acceptor(cert_path: &str, key_path: &str) -> anyhow::Result<TlsAcceptor> {
    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<_, _>>()?;
    let mut keys: Vec<PrivateKeyDer<'static>> = pkcs8_private_keys(&mut BufReader::new(File::open(key_path)?))
        .map(|k| k.map(PrivateKeyDer::from))
        .collect::<Result<_, _>>()?;
    let key = keys.pop().ok_or_else(|| anyhow::anyhow!("no private key found in {key_path}"))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
