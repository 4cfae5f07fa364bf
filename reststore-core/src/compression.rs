use crate::error::{RestStoreError, Result};
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as Level;
use std::io::{Read, Write};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Gzip on the blocking thread pool, at most `workers` jobs at a time.
pub struct CompressionPool {
    permits: Arc<Semaphore>,
}

impl CompressionPool {
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub async fn compress(&self, data: Bytes) -> Result<Bytes> {
        self.run(move || gzip(&data)).await
    }

    pub async fn decompress(&self, data: Bytes) -> Result<Bytes> {
        self.run(move || gunzip(&data)).await
    }

    async fn run<F>(&self, job: F) -> Result<Bytes>
    where
        F: FnOnce() -> std::io::Result<Vec<u8>> + Send + 'static,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| RestStoreError::Internal(format!("compression pool closed: {}", e)))?;

        let output = tokio::task::spawn_blocking(job)
            .await
            .map_err(|e| RestStoreError::Internal(format!("compression worker failed: {}", e)))?;

        output
            .map(Bytes::from)
            .map_err(|e| RestStoreError::Compression(e.to_string()))
    }
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Level::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut output = Vec::new();
    decoder.read_to_end(&mut output)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn compressed_payload_restores() {
        let pool = CompressionPool::new(2);
        let payload = Bytes::from_static(br#"{"hello":"world","padding":"aaaaaaaaaaaaaaaa"}"#);

        let compressed = pool.compress(payload.clone()).await.unwrap();
        assert_ne!(compressed, payload);
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);

        let restored = pool.decompress(compressed).await.unwrap();
        assert_eq!(restored, payload);
    }

    #[tokio::test]
    async fn corrupt_input_is_a_compression_error() {
        let pool = CompressionPool::new(1);
        let error = pool
            .decompress(Bytes::from_static(b"definitely not gzip"))
            .await
            .unwrap_err();
        assert!(matches!(error, RestStoreError::Compression(_)));
    }
}
