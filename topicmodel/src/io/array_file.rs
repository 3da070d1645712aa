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


//! A minimal binary file for a single matrix.
//!
//! Layout: an 8 byte magic, the element type, the shape as little endian `u64`
//! values and zero padding up to [HEADER_LEN] bytes. The row major little endian
//! data follows, so it is aligned for memory mapping.

use std::io::{Read, Write};
use ndarray::{Array2, ArrayView2};

pub(crate) const MAGIC: [u8; 8] = *b"\x93NMFDATA";
pub(crate) const HEADER_LEN: usize = 64;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum DType {
    F32,
    F64,
}

impl DType {
    fn tag(self) -> u8 {
        match self {
            DType::F32 => b'4',
            DType::F64 => b'8',
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'4' => Some(DType::F32),
            b'8' => Some(DType::F64),
            _ => None
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct ArrayHeader {
    pub dtype: DType,
    pub shape: (usize, usize),
}

impl ArrayHeader {
    fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[..8].copy_from_slice(&MAGIC);
        bytes[8] = self.dtype.tag();
        bytes[16..24].copy_from_slice(&(self.shape.0 as u64).to_le_bytes());
        bytes[24..32].copy_from_slice(&(self.shape.1 as u64).to_le_bytes());
        bytes
    }

    /// None if `bytes` is not a header.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN || bytes[..8] != MAGIC {
            return None;
        }
        let dtype = DType::from_tag(bytes[8])?;
        let rows = u64::from_le_bytes(bytes[16..24].try_into().ok()?);
        let cols = u64::from_le_bytes(bytes[24..32].try_into().ok()?);
        Some(Self {
            dtype,
            shape: (usize::try_from(rows).ok()?, usize::try_from(cols).ok()?)
        })
    }
}

/// Upper bound for the elements reserved before reading.
const MAX_PREALLOCATED: usize = 1 << 20;

pub(crate) fn write_array<W: Write + ?Sized>(writer: &mut W, array: ArrayView2<f64>, dtype: DType) -> std::io::Result<()> {
    let header = ArrayHeader { dtype, shape: array.dim() };
    writer.write_all(&header.to_bytes())?;
    // iter() walks in logical (row major) order
    for &value in array.iter() {
        match dtype {
            DType::F32 => writer.write_all(&(value as f32).to_le_bytes())?,
            DType::F64 => writer.write_all(&value.to_le_bytes())?,
        }
    }
    Ok(())
}

/// Reads a header and its data. The values are upgraded to `f64`.
pub(crate) fn read_array<R: Read + ?Sized>(reader: &mut R) -> std::io::Result<(ArrayHeader, Array2<f64>)> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;
    let header = ArrayHeader::from_bytes(&header).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "Missing array file header!")
    })?;
    let (rows, cols) = header.shape;
    let elements = rows.checked_mul(cols).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "The array shape is too big!")
    })?;
    // the header is not trusted, the vec grows with the data actually read
    let mut data = Vec::with_capacity(elements.min(MAX_PREALLOCATED));
    match header.dtype {
        DType::F32 => {
            let mut buf = [0u8; 4];
            for _ in 0..elements {
                reader.read_exact(&mut buf)?;
                data.push(f32::from_le_bytes(buf) as f64);
            }
        }
        DType::F64 => {
            let mut buf = [0u8; 8];
            for _ in 0..elements {
                reader.read_exact(&mut buf)?;
                data.push(f64::from_le_bytes(buf));
            }
        }
    }
    let array = Array2::from_shape_vec(header.shape, data)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    Ok((header, array))
}

#[cfg(test)]
mod test {
    use ndarray::array;
    use crate::io::array_file::{read_array, write_array, ArrayHeader, DType, HEADER_LEN};

    #[test]
    fn the_data_starts_after_the_header(){
        let array = array![[1.5, 2.0], [0.25, -3.0], [8.0, 0.0]];
        let mut buffer = Vec::new();
        write_array(&mut buffer, array.view(), DType::F64).unwrap();
        assert_eq!(HEADER_LEN + 6 * 8, buffer.len());
        assert_eq!(1.5f64.to_le_bytes(), buffer[HEADER_LEN..HEADER_LEN + 8]);
        assert_eq!(
            Some(ArrayHeader { dtype: DType::F64, shape: (3, 2) }),
            ArrayHeader::from_bytes(&buffer)
        );
        let (_, read) = read_array(&mut buffer.as_slice()).unwrap();
        assert_eq!(array, read);
    }

    #[test]
    fn transposed_views_are_written_in_logical_order(){
        let array = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let mut buffer = Vec::new();
        write_array(&mut buffer, array.t(), DType::F32).unwrap();
        assert_eq!(HEADER_LEN + 6 * 4, buffer.len());
        let (header, read) = read_array(&mut buffer.as_slice()).unwrap();
        assert_eq!(DType::F32, header.dtype);
        assert_eq!(array.t(), read);
    }

    #[test]
    fn garbage_is_rejected(){
        assert_eq!(None, ArrayHeader::from_bytes(&[0u8; 64]));
        assert!(read_array(&mut [1u8; 10].as_slice()).is_err());
    }

    #[test]
    fn a_header_larger_than_the_data_is_an_error(){
        let header = ArrayHeader { dtype: DType::F32, shape: (usize::MAX / 2, 1) };
        let mut buffer = header.to_bytes().to_vec();
        buffer.extend_from_slice(&1.0f32.to_le_bytes());
        let err = read_array(&mut buffer.as_slice()).unwrap_err();
        assert_eq!(std::io::ErrorKind::UnexpectedEof, err.kind());
    }
}
