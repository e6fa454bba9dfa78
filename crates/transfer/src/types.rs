use bytes::Bytes;

/// One contiguous slice of the source file.
#[derive(Debug, Clone)]
pub struct Part {
    /// 1-based sequence number, assigned at read time.
    pub part_number: u32,
    /// Byte offset of the first byte within the file.
    pub offset: u64,
    /// Raw payload. Cloning is cheap, so retries resend the same buffer.
    pub data: Bytes,
    /// Checksum of `data` in the session's algorithm, base64 encoded.
    pub checksum: String,
}

impl Part {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Offset one past the last byte of this part.
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}
