//! Length-prefixed byte objects: `String` and the raw `Buffer` that backs arrays.
//!
//! Both payloads are `[len: u64][bytes...]`.

use crate::barrier::WriteBarrier;
use crate::builtins::{BUFFER, STRING};
use crate::error::CoreError;
use crate::heap::{Allocator, Heap, Value};
use crate::layout::REF_SIZE;

impl<B: WriteBarrier> Heap<B> {
    pub fn new_string(&mut self, s: &str) -> Result<Value, CoreError> {
        self.new_string_from_bytes(s.as_bytes())
    }

    /// Strings hold arbitrary bytes; UTF-8 is only checked by [`string_str`](Self::string_str).
    pub fn new_string_from_bytes(&mut self, data: &[u8]) -> Result<Value, CoreError> {
        let v = self.allocate(STRING, data.len())?;
        self.bytes_mut(v.offset() + REF_SIZE, data.len())?
            .copy_from_slice(data);
        Ok(v)
    }

    pub fn string_len(&self, s: Value) -> Result<usize, CoreError> {
        self.expect_type(s, STRING)?;
        self.read_usize(s.offset())
    }

    /// The bytes after the length prefix.
    pub fn string_data(&self, s: Value) -> Result<&[u8], CoreError> {
        let len = self.string_len(s)?;
        self.bytes(s.offset() + REF_SIZE, len)
    }

    pub fn string_str(&self, s: Value) -> Result<&str, CoreError> {
        std::str::from_utf8(self.string_data(s)?).map_err(|e| CoreError::InvalidUtf8 {
            valid_up_to: e.valid_up_to(),
        })
    }

    pub fn new_buffer(&mut self, nbytes: usize) -> Result<Value, CoreError> {
        self.allocate(BUFFER, nbytes)
    }

    pub fn buffer_len(&self, b: Value) -> Result<usize, CoreError> {
        self.expect_type(b, BUFFER)?;
        self.read_usize(b.offset())
    }

    pub fn buffer_data(&self, b: Value) -> Result<&[u8], CoreError> {
        let len = self.buffer_len(b)?;
        self.bytes(b.offset() + REF_SIZE, len)
    }

    /// Heap offset of a buffer's first data byte.
    pub(crate) fn buffer_start(&self, b: Value) -> Result<usize, CoreError> {
        self.expect_type(b, BUFFER)?;
        Ok(b.offset() + REF_SIZE)
    }
}
