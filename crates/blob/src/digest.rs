use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use vault_core::Digest;

const READ_CHUNK: usize = 64 * 1024;

/// Compute the content digest of a fully buffered payload.
pub fn fingerprint(data: &[u8]) -> Digest {
    Digest::from_trusted(hex::encode(Sha256::digest(data)))
}

/// Compute the content digest of a stream, returning it with the byte count.
pub async fn fingerprint_reader<R>(mut reader: R) -> std::io::Result<(Digest, u64)>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((Digest::from_trusted(hex::encode(hasher.finalize())), total))
}
