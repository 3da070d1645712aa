//Copyright 2024 Felix Engl
//
//Licensed under the Apache License, Version 2.0 (the "License");
//you may not use this file except in compliance with the License.
//You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
//Unless required by applicable law or agreed to in writing, software
//distributed under the License is distributed on an "AS IS" BASIS,
//WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//See the License for the specific language governing permissions and
//limitations under the License.

use std::io::{Read, Write};

pub fn crc32<R: Read>(mut reader: R) -> std::io::Result<u32> {
    let mut hasher = crc32fast::Hasher::new();
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk)? {
            0 => break,
            other => hasher.update(&chunk[0..other])
        }
    }
    Ok(hasher.finalize())
}

/// A writer that calculates the crc32 of everything written through it.
pub struct Crc32Writer<W> {
    inner: W,
    hasher: crc32fast::Hasher,
    written: usize,
}

impl<W> Crc32Writer<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, hasher: crc32fast::Hasher::new(), written: 0 }
    }

    /// Number of bytes passed through this writer.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Returns the inner writer and the checksum of the written bytes.
    pub fn finish(self) -> (W, u32) {
        (self.inner, self.hasher.finalize())
    }
}

impl<W: Write> Write for Crc32Writer<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.written += written;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
