use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chunkup_protocol::ChecksumAlgorithm;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tracing::debug;

use crate::TransferError;
use crate::types::Part;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Checksum of one part in the wire form S3 expects: base64 of the raw
/// digest (CRC32 as a big-endian u32).
pub fn part_checksum(algorithm: ChecksumAlgorithm, data: &[u8]) -> String {
    match algorithm {
        ChecksumAlgorithm::Sha256 => BASE64.encode(Sha256::digest(data)),
        ChecksumAlgorithm::Crc32 => BASE64.encode(crc32fast::hash(data).to_be_bytes()),
    }
}

// ---------------------------------------------------------------------------
// PauseHandle
// ---------------------------------------------------------------------------

/// Shared pause switch for a [`ChunkSource`].
///
/// Clones control the same source. While paused, `next_chunk` waits
/// instead of reading.
#[derive(Debug, Clone)]
pub struct PauseHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl PauseHandle {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn pause(&self) {
        self.tx.send_replace(true);
    }

    pub fn resume(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// ChunkSource
// ---------------------------------------------------------------------------

/// Reads a file sequentially into numbered parts of at most `chunk_size`
/// bytes.
///
/// Part numbers start at 1 and increase by one per emitted part. The
/// source only moves forward; restarting means opening it again.
pub struct ChunkSource {
    file: tokio::fs::File,
    chunk_size: usize,
    algorithm: ChecksumAlgorithm,
    file_size: u64,
    offset: u64,
    next_part: u32,
    exhausted: bool,
    digest: Sha256,
    pause: PauseHandle,
    paused_rx: watch::Receiver<bool>,
}

impl ChunkSource {
    /// Opens `path` for chunked reading.
    pub async fn open(
        path: &Path,
        chunk_size: usize,
        algorithm: ChecksumAlgorithm,
    ) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidChunkSize(chunk_size));
        }
        let file = tokio::fs::File::open(path).await?;
        let file_size = file.metadata().await?.len();
        let pause = PauseHandle::new();
        let paused_rx = pause.subscribe();
        Ok(Self {
            file,
            chunk_size,
            algorithm,
            file_size,
            offset: 0,
            next_part: 1,
            exhausted: false,
            digest: Sha256::new(),
            pause,
            paused_rx,
        })
    }

    /// Reads the next part. Returns `None` once every byte was delivered.
    ///
    /// Waits while the source is paused. After end of file every call
    /// returns `None` again.
    pub async fn next_chunk(&mut self) -> Result<Option<Part>, TransferError> {
        if self.exhausted {
            return Ok(None);
        }

        self.paused_rx
            .wait_for(|paused| !*paused)
            .await
            .map_err(|_| TransferError::PauseClosed)?;

        let remaining = self.file_size - self.offset;
        if remaining == 0 {
            self.exhausted = true;
            debug!(
                parts = self.next_part - 1,
                bytes = self.file_size,
                "chunk source exhausted"
            );
            return Ok(None);
        }

        let read_size = remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; read_size];
        let mut filled = 0;
        while filled < read_size {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(TransferError::UnexpectedEof {
                    offset: self.offset + filled as u64,
                    expected: read_size - filled,
                });
            }
            filled += n;
        }

        let part_number = self.next_part;
        self.next_part = part_number
            .checked_add(1)
            .ok_or(TransferError::PartNumberOverflow(part_number))?;

        self.digest.update(&buf);
        let checksum = part_checksum(self.algorithm, &buf);
        let part = Part {
            part_number,
            offset: self.offset,
            data: Bytes::from(buf),
            checksum,
        };
        self.offset += read_size as u64;
        Ok(Some(part))
    }

    /// Returns a handle that pauses and resumes this source.
    pub fn pause_handle(&self) -> PauseHandle {
        self.pause.clone()
    }

    pub fn pause(&self) {
        self.pause.pause();
    }

    pub fn resume(&self) {
        self.pause.resume();
    }

    /// `true` once end of file has been reported.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Total file size in bytes, as seen when the file was opened.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of parts the whole file splits into: `ceil(size / chunk_size)`.
    pub fn expected_parts(&self) -> u64 {
        self.file_size.div_ceil(self.chunk_size as u64)
    }

    /// Hex SHA-256 of the whole file. `None` until the source is exhausted.
    pub fn file_sha256(&self) -> Option<String> {
        self.exhausted
            .then(|| hex::encode(self.digest.clone().finalize()))
    }
}
