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


use std::fmt::{Debug, Formatter};
use std::mem::{align_of, size_of};
use std::sync::Arc;
use memmap2::Mmap;
use ndarray::{Array2, ArrayView2};

/// A read only `f64` matrix inside of a memory mapped file.
#[derive(Clone)]
pub struct MappedArray {
    mmap: Arc<Mmap>,
    offset: usize,
    shape: (usize, usize),
}

impl MappedArray {
    /// Fails if the data at `offset` is not usable as little endian `f64` values.
    pub(crate) fn new(mmap: Arc<Mmap>, offset: usize, shape: (usize, usize)) -> std::io::Result<Self> {
        if cfg!(target_endian = "big") {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "Memory mapped arrays are only supported on little endian targets!"
            ));
        }
        let len = shape.0.checked_mul(shape.1)
            .and_then(|elements| elements.checked_mul(size_of::<f64>()))
            .and_then(|bytes| bytes.checked_add(offset));
        match len {
            Some(end) if end <= mmap.len() => {}
            _ => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("The mapped file is too small for an array of {shape:?}!")
                ))
            }
        }
        if (mmap.as_ptr() as usize + offset) % align_of::<f64>() != 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "The mapped array data is not aligned!"
            ));
        }
        Ok(Self { mmap, offset, shape })
    }

    pub fn view(&self) -> ArrayView2<f64> {
        // SAFETY: `new` checked the bounds, the alignment and the byte order.
        // The map is read only and lives as long as self.
        unsafe {
            ArrayView2::from_shape_ptr(self.shape, self.mmap.as_ptr().add(self.offset) as *const f64)
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    /// True if both arrays are backed by the same map.
    pub fn shares_map_with(&self, other: &MappedArray) -> bool {
        Arc::ptr_eq(&self.mmap, &other.mmap)
    }
}

impl Debug for MappedArray {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedArray")
            .field("offset", &self.offset)
            .field("shape", &self.shape)
            .finish()
    }
}

/// The storage of a factor matrix. Mapped data is copied on the first write.
#[derive(Debug, Clone)]
pub enum FactorStorage {
    Owned(Array2<f64>),
    Mapped(MappedArray),
}

impl FactorStorage {
    pub fn zeros(shape: (usize, usize)) -> Self {
        Self::Owned(Array2::zeros(shape))
    }

    pub fn view(&self) -> ArrayView2<f64> {
        match self {
            FactorStorage::Owned(array) => array.view(),
            FactorStorage::Mapped(mapped) => mapped.view()
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        match self {
            FactorStorage::Owned(array) => array.dim(),
            FactorStorage::Mapped(mapped) => mapped.shape()
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, FactorStorage::Mapped(_))
    }

    /// Mutable access to the data, copies mapped data first.
    pub fn to_mut(&mut self) -> &mut Array2<f64> {
        if let FactorStorage::Mapped(mapped) = self {
            log::debug!("Copying a mapped array of {:?} before the first write.", mapped.shape());
            let owned = mapped.view().to_owned();
            *self = FactorStorage::Owned(owned);
        }
        match self {
            FactorStorage::Owned(array) => array,
            FactorStorage::Mapped(_) => unreachable!("mapped data was copied")
        }
    }

    pub fn into_owned(self) -> Array2<f64> {
        match self {
            FactorStorage::Owned(array) => array,
            FactorStorage::Mapped(mapped) => mapped.view().to_owned()
        }
    }
}

impl From<Array2<f64>> for FactorStorage {
    fn from(value: Array2<f64>) -> Self {
        Self::Owned(value)
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;
    use std::sync::Arc;
    use memmap2::Mmap;
    use ndarray::array;
    use crate::io::{FactorStorage, MappedArray};

    #[test]
    fn mapped_data_is_copied_on_write(){
        let mut file = tempfile::tempfile().unwrap();
        let mut bytes = vec![0u8; 64];
        for value in [1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();
        let mmap = Arc::new(unsafe { Mmap::map(&file).unwrap() });

        let mapped = MappedArray::new(mmap.clone(), 64, (2, 3)).unwrap();
        assert_eq!(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]], mapped.view());
        assert!(MappedArray::new(mmap.clone(), 64, (3, 3)).is_err());

        let mut storage = FactorStorage::Mapped(mapped.clone());
        let shared = storage.clone();
        assert!(storage.is_mapped());
        storage.to_mut()[[0, 0]] = 10.0;
        assert!(!storage.is_mapped());
        assert_eq!(10.0, storage.view()[[0, 0]]);
        assert_eq!(1.0, shared.view()[[0, 0]]);
        assert_eq!(1.0, mapped.view()[[0, 0]]);
        if let FactorStorage::Mapped(other) = &shared {
            assert!(other.shares_map_with(&mapped));
        }
        assert_eq!((2, 3), shared.shape());
        assert_eq!(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]], shared.into_owned());
    }
}
