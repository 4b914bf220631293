//! The Key Manager service: a stateless RSA exponentiation endpoint
//! reached over TLS. It holds no per-key state at all — every request
//! is a batch of blinded elements, every response is that batch signed
//! with the private exponent. Convergence and confidentiality both
//! live entirely on the client side of the blind/unblind math in
//! `dispersion_core::blind`; this service only ever sees blinded
//! values, which is the point.

use std::sync::Arc;

use dispersion_core::blind::{RsaPrivateKey, RSA_ELEMENT_SIZE};
use dispersion_core::protocol::{decode_km_batch, encode_km_batch};
use num_bigint_dig::BigUint;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::TlsAcceptor;

/// On-disk serialization of the private key; deliberately minimal,
/// matching the narrow RSA surface the exchange actually needs
/// (modexp + fixed-width serialization, nothing else).
#[derive(Serialize, Deserialize)]
struct RsaKeyFile {
    n_hex: String,
    d_hex: String,
}

pub fn load_private_key(path: &str) -> anyhow::Result<RsaPrivateKey> {
    let text = std::fs::read_to_string(path)?;
    let file: RsaKeyFile = serde_json::from_str(&text)?;
    let n = BigUint::parse_bytes(file.n_hex.as_bytes(), 16)
        .ok_or_else(|| anyhow::anyhow!("malformed RSA modulus in {path}"))?;
    let d = BigUint::parse_bytes(file.d_hex.as_bytes(), 16)
        .ok_or_else(|| anyhow::anyhow!("malformed RSA private exponent in {path}"))?;
    Ok(RsaPrivateKey { n, d })
}

/// Sign every element of a decoded batch, in place, leaving the wire
/// shape identical: `count:i32 LE ‖ element[count]`.
fn sign_batch(key: &RsaPrivateKey, batch: &[[u8; RSA_ELEMENT_SIZE]]) -> Vec<[u8; RSA_ELEMENT_SIZE]> {
    batch.iter().map(|el| key.sign_blinded(el)).collect()
}

/// Accept TLS connections on `acceptor`'s listener and answer each
/// with the signed batch, one connection per request (mirrors the
/// reference system's thread-per-connection KM handler).
pub async fn serve(
    listener: tokio::net::TcpListener,
    acceptor: TlsAcceptor,
    key: Arc<RsaPrivateKey>,
) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let acceptor = acceptor.clone();
        let key = key.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, acceptor, key).await {
                tracing::warn!(%peer, error = %err, "key manager connection failed");
            }
        });
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    acceptor: TlsAcceptor,
    key: Arc<RsaPrivateKey>,
) -> anyhow::Result<()> {
    let mut tls = acceptor.accept(stream).await?;

    let mut len_buf = [0u8; 4];
    tls.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut body = vec![0u8; len];
    tls.read_exact(&mut body).await?;

    let batch = decode_km_batch(&body).ok_or_else(|| anyhow::anyhow!("malformed key exchange batch"))?;
    tracing::debug!(elements = batch.len(), "key manager signing batch");
    let signed = sign_batch(&key, &batch);
    let response = encode_km_batch(&signed);

    tls.write_all(&(response.len() as u32).to_le_bytes()).await?;
    tls.write_all(&response).await?;
    tls.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_batch_applies_sign_blinded_to_every_element() {
        let key = RsaPrivateKey { n: BigUint::from(3233u32), d: BigUint::from(2753u32) };
        let mut el = [0u8; RSA_ELEMENT_SIZE];
        el[RSA_ELEMENT_SIZE - 1] = 65;
        let signed = sign_batch(&key, &[el, el]);
        assert_eq!(signed.len(), 2);
        assert_eq!(signed[0], signed[1]);
        assert_ne!(signed[0], el);
    }
}
