//! Upload/download pipeline: chunk a file, group chunks into segments,
//! resolve each segment's convergent key through the key client,
//! CAONT-and-erasure-encode the segment's concatenated chunk bytes
//! into N-1 shares, and dispatch one share to each non-KM cloud over
//! its data front end, skipping whichever cloud is that segment's Key
//! Manager. The filename itself goes through the same codec as
//! a single header secret (self-derived key, no KM round trip) so a
//! restore can recover file content by path without a side channel.
//!
//! Segments, not individual chunks, are the unit handed to the codec:
//! every chunk in a segment shares one convergent key anyway (§A.4
//! Segmenter), so treating the segment's concatenated payload as one
//! CAONT-RS secret avoids a second layer of per-chunk share bookkeeping
//! without changing what gets deduplicated or how keys converge. This
//! is recorded as an open-question resolution in the design ledger.

use dispersion_core::blind::RsaPublicKey;
use dispersion_core::chunk::Chunk;
use dispersion_core::chunker::{Chunker, ChunkerMode};
use dispersion_core::codec::{CdScheme, Codec};
use dispersion_core::crypto::{CryptoPrimitive, SecurityLevel};
use dispersion_core::protocol::{client_action, server_status};
use dispersion_core::segment::{Segmenter, SegmenterConfig};
use std::collections::BTreeMap;

use crate::config::Config;
use crate::keyclient::KeyClient;
use crate::netclient::FrontendConnection;

pub struct UploadReport {
    pub segments_uploaded: u64,
    pub bytes_uploaded: u64,
    /// Shares a cloud already held (§4.5's STAT step told this client
    /// not to send the body), counted across every configured cloud.
    pub shares_deduplicated: u64,
}

pub struct DownloadReport {
    pub secrets_recovered: u64,
    pub bytes_recovered: u64,
}

/// One cloud's Key Manager public key, fetched out of band (the spec
/// treats KM provisioning as external configuration, not a runtime
/// discovery protocol).
pub fn load_km_public_key(path: &str) -> anyhow::Result<RsaPublicKey> {
    #[derive(serde::Deserialize)]
    struct PubKeyFile {
        n_hex: String,
        e_hex: String,
    }
    let text = std::fs::read_to_string(path)?;
    let file: PubKeyFile = serde_json::from_str(&text)?;
    let n = num_bigint_dig_hex(&file.n_hex)?;
    let e = num_bigint_dig_hex(&file.e_hex)?;
    Ok(RsaPublicKey { n, e })
}

fn num_bigint_dig_hex(hex: &str) -> anyhow::Result<num_bigint_dig::BigUint> {
    num_bigint_dig::BigUint::parse_bytes(hex.as_bytes(), 16)
        .ok_or_else(|| anyhow::anyhow!("malformed hex integer {hex}"))
}

/// Build the codec shared by upload and download: `n` = `N-1` data
/// shares (one configured cloud is always the segment's Key Manager and
/// stores no data/meta share, §4.3), `k` = confidentiality threshold,
/// `m = n - k` parity shares, `r = k - 1` so every AONT-RS family scheme
/// gets maximum confidentiality (§A.4 Encoder parameters).
fn build_codec(config: &Config, crypto: &CryptoPrimitive) -> anyhow::Result<Codec> {
    let n = config.data_shares();
    let k = config.k();
    if k == 0 || k >= n {
        anyhow::bail!("k={k} must be in (0, n={n})");
    }
    let m = n - k;
    let r = k - 1;
    Codec::new(CdScheme::CaontRs, n, m, r, crypto).map_err(|e| anyhow::anyhow!(e))
}

/// Map a segment's `N-1` share ids onto actual cloud indices, skipping
/// the segment's Key Manager cloud and starting the rotation right
/// after it (§4.4 step 3: "If cloud = KM cloud: skip"), so no data/meta
/// share for that segment is ever sent to that cloud (§8.6).
fn rotation_order(km_cloud_index: usize, total_clouds: usize) -> Vec<usize> {
    (1..total_clouds).map(|offset| (km_cloud_index + offset) % total_clouds).collect()
}

pub fn upload_file(
    config: &Config,
    user_id: u32,
    path: &std::path::Path,
    level: SecurityLevel,
    km_public_keys: &[RsaPublicKey],
) -> anyhow::Result<UploadReport> {
    config.require_clouds()?;
    let data = std::fs::read(path)?;
    let crypto = CryptoPrimitive::new(level);
    let key_client = KeyClient::new(CryptoPrimitive::new(level));
    let codec = build_codec(config, &crypto)?;

    let mut connections: Vec<FrontendConnection> = config
        .clouds
        .iter()
        .map(|c| FrontendConnection::connect(&c.data_addr, user_id).map_err(anyhow::Error::from))
        .collect::<anyhow::Result<_>>()?;

    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("unnamed").to_string();
    for conn in &mut connections {
        conn.send_file_meta(&filename)?;
    }
    let header_order = rotation_order(0, connections.len());
    upload_header(&mut connections, &header_order, &codec, &crypto, filename.as_bytes())?;

    let chunker = Chunker::new(ChunkerMode::Variable {
        avg_chunk_size: 8 * 1024,
        min_chunk_size: 2 * 1024,
        max_chunk_size: 64 * 1024,
        sliding_window_size: 48,
    })?;
    let spans = chunker.chunk(&data);
    let mut segmenter = Segmenter::new(SegmenterConfig {
        min_segment_size: 512 * 1024,
        avg_segment_size: 1024 * 1024,
        max_segment_size: 2 * 1024 * 1024,
        fp_size: crypto.hash_size(),
        km_server_count: km_public_keys.len() as u32,
    });

    let mut segments_uploaded = 0u64;
    let mut bytes_uploaded = 0u64;
    let mut shares_deduplicated = 0u64;
    let span_count = spans.len();

    for (id, span) in spans.into_iter().enumerate() {
        let payload = data[span.start..span.end].to_vec();
        let fp = crypto.generate_hash(&payload);
        let mut chunk = Chunk::new(id as u64, payload, id + 1 == span_count);
        chunk.fp = fp;

        if let Some(ready) = segmenter.push(chunk) {
            let cloud = &config.clouds[ready.km_cloud_index as usize];
            let pub_key = &km_public_keys[ready.km_cloud_index as usize];
            let key = key_client.key_for_segment(cloud, pub_key, &ready.min_fp)?;

            let mut secret = Vec::new();
            for c in &ready.chunks {
                secret.extend_from_slice(&c.payload);
            }

            let (encoded, _used_key) =
                codec.encode(&crypto, &secret, Some(&key)).map_err(|e| anyhow::anyhow!(e))?;
            bytes_uploaded += secret.len() as u64;

            let order = rotation_order(ready.km_cloud_index as usize, connections.len());
            for (share_id, share) in encoded.shares.iter().enumerate() {
                let conn = &mut connections[order[share_id]];
                let status = conn.send_share(
                    client_action::SEND_DATA,
                    &ready.min_fp,
                    ready.seg_id as i64,
                    secret.len() as u32,
                    ready.seg_id,
                    share_id as u32,
                    share,
                )?;
                if status == server_status::SHARE_DUPLICATE {
                    shares_deduplicated += 1;
                }
                tracing::debug!(seg_id = ready.seg_id, share_id, status, "share uploaded");
            }
            segments_uploaded += 1;
        }
    }

    Ok(UploadReport { segments_uploaded, bytes_uploaded, shares_deduplicated })
}

/// Header/filename secrets self-derive their key (no Key Manager round
/// trip: the spec's header path never needs to deduplicate across
/// users by name, only by content), so they carry a synthetic negative
/// `secret_id` the way a metadata chunk would (§A.3 metadata chunk).
fn upload_header(
    connections: &mut [FrontendConnection],
    order: &[usize],
    codec: &Codec,
    crypto: &CryptoPrimitive,
    name_bytes: &[u8],
) -> anyhow::Result<()> {
    let fp = crypto.generate_hash(name_bytes);
    let (encoded, _key) = codec.encode(crypto, name_bytes, None).map_err(|e| anyhow::anyhow!(e))?;
    for (share_id, share) in encoded.shares.iter().enumerate() {
        let conn = &mut connections[order[share_id]];
        conn.send_share(
            client_action::SEND_META,
            &fp,
            -1,
            name_bytes.len() as u32,
            0,
            share_id as u32,
            share,
        )?;
    }
    Ok(())
}

/// Download and reconstruct `path`, tolerating up to `m` of the
/// configured clouds being unreachable (§A.6 Downloader + Decoder):
/// this first opens each cloud's meta channel and asks for a MetaList
/// summary of the file (§4.6 download meta phase) purely to report
/// what a resumed download would still need; the data phase below
/// always re-fetches every share regardless, since nothing durable is
/// kept client-side yet to act on a prior MetaList (an open question
/// resolved in the design ledger). Each reachable cloud is then asked
/// for every share it holds for this user's file over its data
/// channel, shares are grouped by `secret_id`, and any `k` of the (at
/// most `n`) returned shares per secret reconstruct that secret.
/// CAONT-RS recovers its own key from the package tail, so no
/// Key-Manager round trip is needed on the read path.
pub fn download_file(
    config: &Config,
    user_id: u32,
    remote_path: &str,
    level: SecurityLevel,
    out_path: &std::path::Path,
) -> anyhow::Result<DownloadReport> {
    config.require_clouds()?;
    let crypto = CryptoPrimitive::new(level);
    let codec = build_codec(config, &crypto)?;
    let k = codec.k();

    for cloud in &config.clouds {
        match FrontendConnection::connect(&cloud.meta_addr, user_id) {
            Ok(mut meta_conn) => match meta_conn.request_meta_list(remote_path) {
                Ok(entries) => tracing::debug!(cloud = %cloud.name, count = entries.len(), "meta list received"),
                Err(err) => tracing::warn!(cloud = %cloud.name, error = %err, "meta list request failed"),
            },
            Err(err) => tracing::warn!(cloud = %cloud.name, error = %err, "meta channel unreachable"),
        }
    }

    let mut shares_by_secret: BTreeMap<i64, (u32, Vec<(usize, Vec<u8>)>)> = BTreeMap::new();
    let mut any_cloud_reachable = false;

    for cloud in &config.clouds {
        let mut conn = match FrontendConnection::connect(&cloud.data_addr, user_id) {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(cloud = %cloud.name, error = %err, "cloud unreachable, continuing without it");
                continue;
            }
        };
        any_cloud_reachable = true;
        let shares = match conn.request_download(remote_path) {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(cloud = %cloud.name, error = %err, "download request failed, continuing without it");
                continue;
            }
        };
        for (secret_id, secret_size, _seg_id, share_id, body) in shares {
            let entry = shares_by_secret.entry(secret_id).or_insert((secret_size, Vec::new()));
            entry.1.push((share_id as usize, body));
        }
    }

    if !any_cloud_reachable {
        anyhow::bail!("no configured cloud was reachable");
    }

    let mut out = Vec::new();
    let mut secrets_recovered = 0u64;

    // Secret ids are non-negative for file-content secrets (header
    // secrets use -1 and are not part of file content); ascending
    // order reassembles the file in the original byte order.
    for (secret_id, (secret_size, mut shares)) in shares_by_secret {
        if secret_id < 0 {
            continue;
        }
        shares.sort_by_key(|(id, _)| *id);
        shares.dedup_by_key(|(id, _)| *id);
        if shares.len() < k {
            anyhow::bail!(
                "secret {secret_id}: only {} of the required {k} shares were available",
                shares.len()
            );
        }
        shares.truncate(k);
        let share_size = shares[0].1.len();
        let secret = codec
            .decode(&crypto, &shares, share_size, secret_size as usize, None)
            .map_err(|e| anyhow::anyhow!(e))?;
        out.extend_from_slice(&secret);
        secrets_recovered += 1;
    }

    std::fs::write(out_path, &out)?;
    Ok(DownloadReport { secrets_recovered, bytes_recovered: out.len() as u64 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_order_skips_the_km_cloud() {
        let order = rotation_order(1, 4);
        assert_eq!(order, vec![2, 3, 0]);
        assert!(!order.contains(&1));
    }

    #[test]
    fn rotation_order_starts_right_after_the_km_cloud() {
        let order = rotation_order(0, 5);
        assert_eq!(order, vec![1, 2, 3, 4]);
    }
}
