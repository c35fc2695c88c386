//! Read and write buffers for a non-blocking connection.

use std::ops::Range;

use crate::error::ClientResult;
use crate::protocol::codec::split_message;

/// Bytes received but not yet parsed, and bytes queued but not yet sent.
pub struct BufferSet {
    read_buffer: Vec<u8>,
    read_pos: usize,
    /// Outgoing frontend messages. State machines append here directly.
    pub write_buffer: Vec<u8>,
    write_pos: usize,
}

impl BufferSet {
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::with_capacity(8192),
            read_pos: 0,
            write_buffer: Vec::with_capacity(8192),
            write_pos: 0,
        }
    }

    /// Append freshly received bytes.
    pub fn extend_read(&mut self, data: &[u8]) {
        if self.read_pos > 0 && self.read_pos * 2 >= self.read_buffer.len() {
            self.read_buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.read_buffer.extend_from_slice(data);
    }

    /// Frame the next complete message: `(type_byte, payload range)`.
    ///
    /// The range indexes [`unread`](Self::unread) and stays valid until
    /// [`consume`](Self::consume) is called with the returned length.
    pub fn next_message(&self) -> ClientResult<Option<(u8, Range<usize>, usize)>> {
        split_message(self.unread())
    }

    pub fn unread(&self) -> &[u8] {
        &self.read_buffer[self.read_pos..]
    }

    /// Payload of a message framed by [`next_message`](Self::next_message).
    pub fn payload(&self, range: Range<usize>) -> &[u8] {
        let start = self.read_pos;
        &self.read_buffer[start + range.start..start + range.end]
    }

    /// Like [`payload`](Self::payload), together with the write buffer so a
    /// reply can be appended while the payload is borrowed.
    pub fn payload_and_writer(&mut self, range: Range<usize>) -> (&[u8], &mut Vec<u8>) {
        let start = self.read_pos;
        (
            &self.read_buffer[start + range.start..start + range.end],
            &mut self.write_buffer,
        )
    }

    pub fn consume(&mut self, len: usize) {
        self.read_pos = (self.read_pos + len).min(self.read_buffer.len());
        if self.read_pos == self.read_buffer.len() {
            self.read_buffer.clear();
            self.read_pos = 0;
        }
    }

    pub fn unwritten(&self) -> &[u8] {
        &self.write_buffer[self.write_pos..]
    }

    pub fn has_unwritten(&self) -> bool {
        self.write_pos < self.write_buffer.len()
    }

    /// Record that `len` bytes of [`unwritten`](Self::unwritten) were sent.
    pub fn advance_write(&mut self, len: usize) {
        self.write_pos = (self.write_pos + len).min(self.write_buffer.len());
        if self.write_pos == self.write_buffer.len() {
            self.write_buffer.clear();
            self.write_pos = 0;
        }
    }

    pub fn clear(&mut self) {
        self.read_buffer.clear();
        self.read_pos = 0;
        self.write_buffer.clear();
        self.write_pos = 0;
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_writes() {
        let mut buffers = BufferSet::new();
        buffers.write_buffer.extend_from_slice(b"abcdef");
        buffers.advance_write(4);
        assert_eq!(buffers.unwritten(), b"ef");
        buffers.write_buffer.extend_from_slice(b"gh");
        assert_eq!(buffers.unwritten(), b"efgh");
        buffers.advance_write(4);
        assert!(!buffers.has_unwritten());
        assert!(buffers.write_buffer.is_empty());
    }

    #[test]
    fn messages_across_reads() {
        let mut buffers = BufferSet::new();
        buffers.extend_read(&[b'Z', 0, 0]);
        assert!(buffers.next_message().unwrap().is_none());

        buffers.extend_read(&[0, 5, b'I', b'Z', 0]);
        let (type_byte, payload, len) = buffers.next_message().unwrap().unwrap();
        assert_eq!(type_byte, b'Z');
        assert_eq!(buffers.payload(payload), b"I");
        buffers.consume(len);
        assert_eq!(buffers.unread(), &[b'Z', 0]);

        buffers.extend_read(&[0, 0, 5, b'T']);
        let (_, payload, len) = buffers.next_message().unwrap().unwrap();
        assert_eq!(buffers.payload(payload), b"T");
        buffers.consume(len);
        assert!(buffers.unread().is_empty());
    }
}
