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


mod storage;
mod array_file;

pub use storage::*;

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use memmap2::Mmap;
use ndarray::{Array2, ArrayView2};
use nmftopics_toolkit::crc32_for_reader::{crc32, Crc32Writer};
use serde::{Deserialize, Serialize};
use crate::enums::{ModelVersion, ReadError, WriteError};
use crate::io::array_file::{read_array, write_array, ArrayHeader, DType, HEADER_LEN};
use crate::math::MathError;
use crate::model::{ModelState, Nmf, NmfConfig};
use crate::vocabulary::Vocabulary;

/// Arrays with at least this many elements are stored in their own file.
pub const DEFAULT_SEP_LIMIT: usize = 10 * 1024 * 1024;

/// How companion array files are loaded.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MmapMode {
    /// The arrays are mapped read only and copied before the first change.
    ReadOnly,
}

#[derive(Debug, Serialize, Deserialize)]
enum ArrayData {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

#[derive(Debug, Serialize, Deserialize)]
enum ArrayRecord {
    Inline {
        shape: (usize, usize),
        data: ArrayData
    },
    /// The array is stored in a file next to the model.
    Companion {
        file_name: String,
        shape: (usize, usize),
        checksum: u32
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct NmfRecord {
    config: NmfConfig,
    vocabulary: Vocabulary,
    num_terms: usize,
    v_max: Option<f64>,
    w_std: f64,
    w_error: f64,
    rng_seed: u64,
    state: ModelState,
    w: ArrayRecord,
    a: ArrayRecord,
    b: ArrayRecord,
    h: Option<ArrayRecord>,
}

fn is_compressed(path: &Path) -> bool {
    path.extension().is_some_and(|extension| extension == "gz")
}

/// Writes a file through `content` and returns the checksum of the bytes on disk.
/// The data goes to a temporary file first, so mapped files of a loaded model stay intact.
fn write_file<F>(path: &Path, compressed: bool, content: F) -> Result<u32, WriteError>
where
    F: FnOnce(&mut dyn Write) -> Result<(), WriteError>
{
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| WriteError::InvalidPath(path.to_path_buf()))?;
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));
    let file = File::options().write(true).create(true).truncate(true).open(&tmp_path)?;
    let mut checked = Crc32Writer::new(BufWriter::new(file));
    if compressed {
        let mut encoder = GzEncoder::new(&mut checked, Compression::default());
        content(&mut encoder)?;
        encoder.finish()?;
    } else {
        content(&mut checked)?;
    }
    let (mut writer, checksum) = checked.finish();
    writer.flush()?;
    drop(writer);
    std::fs::rename(&tmp_path, path)?;
    Ok(checksum)
}

fn open_reader(path: &Path, compressed: bool) -> std::io::Result<Box<dyn Read>> {
    let reader = BufReader::new(File::open(path)?);
    if compressed {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

struct ArrayWriter<'a> {
    path: &'a Path,
    file_name: &'a str,
    sep_limit: usize,
    compressed: bool,
    dtype: DType,
}

impl ArrayWriter<'_> {
    fn store(&self, attribute: &str, array: ArrayView2<f64>) -> Result<ArrayRecord, WriteError> {
        let shape = array.dim();
        if array.len() >= self.sep_limit {
            let file_name = if self.compressed {
                format!("{}.{attribute}.npy.gz", self.file_name)
            } else {
                format!("{}.{attribute}.npy", self.file_name)
            };
            let companion = self.path.with_file_name(&file_name);
            log::info!("storing np array '{attribute}' to {}", companion.display());
            let dtype = self.dtype;
            let checksum = write_file(&companion, self.compressed, |writer| {
                Ok(write_array(writer, array, dtype)?)
            })?;
            Ok(ArrayRecord::Companion { file_name, shape, checksum })
        } else {
            let data = match self.dtype {
                DType::F32 => ArrayData::F32(array.iter().map(|value| *value as f32).collect()),
                DType::F64 => ArrayData::F64(array.iter().copied().collect()),
            };
            Ok(ArrayRecord::Inline { shape, data })
        }
    }
}

struct ArrayReader<'a> {
    path: &'a Path,
    mmap: Option<MmapMode>,
}

impl ArrayReader<'_> {
    fn check_shape(attribute: &str, expected: Option<(usize, usize)>, actual: (usize, usize)) -> Result<(), ReadError> {
        match expected {
            Some(expected) if expected != actual => Err(ReadError::Shape { name: attribute.to_string(), expected, actual }),
            _ => Ok(())
        }
    }

    fn restore(&self, attribute: &str, record: ArrayRecord, expected: Option<(usize, usize)>) -> Result<FactorStorage, ReadError> {
        match record {
            ArrayRecord::Inline { shape, data } => {
                Self::check_shape(attribute, expected, shape)?;
                let data: Vec<f64> = match data {
                    ArrayData::F32(values) => values.into_iter().map(f64::from).collect(),
                    ArrayData::F64(values) => values
                };
                Ok(Array2::from_shape_vec(shape, data).map_err(MathError::from)?.into())
            }
            ArrayRecord::Companion { file_name, shape, checksum } => {
                Self::check_shape(attribute, expected, shape)?;
                let companion = self.path.with_file_name(&file_name);
                if !companion.exists() {
                    return Err(ReadError::MissingCompanion(companion));
                }
                let compressed = is_compressed(&companion);
                let storage = match self.mmap {
                    Some(MmapMode::ReadOnly) if compressed => {
                        return Err(ReadError::IO(std::io::Error::new(
                            std::io::ErrorKind::Unsupported,
                            format!("Can not memory map the compressed file {}!", companion.display())
                        )));
                    }
                    Some(MmapMode::ReadOnly) => {
                        log::info!("loading '{attribute}' from {} with mmap", companion.display());
                        Self::map(&companion, attribute, shape)?
                    }
                    None => {
                        log::info!("loading '{attribute}' from {}", companion.display());
                        Self::read(&companion, compressed, checksum)?
                    }
                };
                Self::check_shape(attribute, Some(shape), storage.shape())?;
                Ok(storage)
            }
        }
    }

    fn map(companion: &Path, attribute: &str, shape: (usize, usize)) -> Result<FactorStorage, ReadError> {
        let file = File::open(companion)?;
        // SAFETY: the map is read only, the files are replaced but never changed in place by `save`.
        let map = Arc::new(unsafe { Mmap::map(&file)? });
        let header = ArrayHeader::from_bytes(&map).ok_or_else(|| ReadError::NotAnArrayFile(companion.to_path_buf()))?;
        Self::check_shape(attribute, Some(shape), header.shape)?;
        match header.dtype {
            DType::F64 => Ok(FactorStorage::Mapped(MappedArray::new(map, HEADER_LEN, header.shape)?)),
            DType::F32 => {
                // older files can not be mapped as f64
                let (_, array) = read_array(&mut &map[..])?;
                Ok(array.into())
            }
        }
    }

    fn read(companion: &Path, compressed: bool, checksum: u32) -> Result<FactorStorage, ReadError> {
        let actual = crc32(BufReader::new(File::open(companion)?))?;
        if actual != checksum {
            return Err(ReadError::ChecksumMismatch { path: companion.to_path_buf(), expected: checksum, actual });
        }
        let mut reader = open_reader(companion, compressed)?;
        match read_array(&mut reader) {
            Ok((_, array)) => Ok(array.into()),
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => Err(ReadError::NotAnArrayFile(companion.to_path_buf())),
            Err(err) => Err(err.into())
        }
    }
}

impl Nmf {
    /// Saves the model to `path`. Arrays with at least `sep_limit` elements
    /// ([DEFAULT_SEP_LIMIT] if None) are written to the files `"{path}.{attribute}.npy"`.
    /// Everything is gzip compressed if `path` ends with `.gz`.
    pub fn save(&self, path: impl AsRef<Path>, sep_limit: Option<usize>) -> Result<(), WriteError> {
        self.save_with_version(path.as_ref(), sep_limit, ModelVersion::CURRENT)
    }

    pub(crate) fn save_with_version(&self, path: &Path, sep_limit: Option<usize>, version: ModelVersion) -> Result<(), WriteError> {
        let compressed = is_compressed(path);
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| WriteError::InvalidPath(path.to_path_buf()))?;
        let arrays = ArrayWriter {
            path,
            file_name,
            sep_limit: sep_limit.unwrap_or(DEFAULT_SEP_LIMIT),
            compressed,
            dtype: match version {
                ModelVersion::V1 => DType::F32,
                ModelVersion::V2 => DType::F64,
            }
        };
        log::info!("saving Nmf object under {}, separately {:?}", path.display(), sep_limit);

        let record = NmfRecord {
            config: self.config.clone(),
            vocabulary: self.vocabulary.clone(),
            num_terms: self.num_terms,
            v_max: self.v_max,
            w_std: self.w_std,
            w_error: self.w_error,
            rng_seed: self.rng_seed,
            state: self.state,
            w: arrays.store("w", self.w.view())?,
            a: arrays.store("a", self.a.view())?,
            b: arrays.store("b", self.b.view())?,
            h: self.h.as_ref().map(|h| arrays.store("h", h.view())).transpose()?,
        };

        write_file(path, compressed, |writer| {
            bincode::serialize_into(&mut *writer, version.as_ref())?;
            bincode::serialize_into(&mut *writer, &record)?;
            Ok(())
        })?;
        Ok(())
    }

    /// Loads a model saved with [Nmf::save]. With `mmap` the companion files
    /// are memory mapped instead of read, this fails for compressed files.
    pub fn load(path: impl AsRef<Path>, mmap: Option<MmapMode>) -> Result<Self, ReadError> {
        let path = path.as_ref();
        log::info!("loading Nmf object from {}", path.display());
        let mut reader = open_reader(path, is_compressed(path))?;
        let version: String = bincode::deserialize_from(&mut reader)?;
        let version = ModelVersion::from_str(&version).map_err(|_| ReadError::UnsupportedVersion(version.clone()))?;
        let record: NmfRecord = bincode::deserialize_from(&mut reader)?;
        if version != ModelVersion::CURRENT {
            log::info!("upgrading a model stored as {version}");
        }

        let num_topics = record.config.num_topics;
        let num_terms = record.num_terms;
        let arrays = ArrayReader { path, mmap };
        let w = arrays.restore("w", record.w, Some((num_terms, num_topics)))?;
        let a = arrays.restore("a", record.a, Some((num_topics, num_topics)))?;
        let b = arrays.restore("b", record.b, Some((num_terms, num_topics)))?;
        let h = match record.h {
            Some(h) => Some(arrays.restore("h", h, None)?.into_owned()),
            None => None
        };

        Ok(Nmf {
            config: record.config,
            vocabulary: record.vocabulary,
            num_terms,
            w,
            a,
            b,
            h,
            v_max: record.v_max,
            w_std: record.w_std,
            w_error: record.w_error,
            rng_seed: record.rng_seed,
            state: record.state,
        })
    }
}

#[cfg(test)]
mod test {
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::path::Path;
    use approx::AbsDiffEq;
    use crate::enums::{ModelVersion, ReadError};
    use crate::io::MmapMode;
    use crate::model::test::trained_model;
    use crate::math::sparse_to_full;
    use crate::model::Nmf;
    use crate::vocabulary::test::common_corpus;

    fn assert_same_queries(expected: &Nmf, actual: &Nmf) {
        let (_, corpus) = common_corpus();
        assert_eq!(expected.num_topics(), actual.num_topics());
        assert_eq!(expected.vocabulary(), actual.vocabulary());
        assert_eq!(expected.state(), actual.state());
        assert_eq!(expected.get_topics(), actual.get_topics());
        assert_eq!(expected.transform(&[]).unwrap(), actual.transform(&[]).unwrap());
        assert!(actual.transform(&[]).unwrap().is_empty());
        for doc in &corpus {
            assert_eq!(expected.transform(doc).unwrap(), actual.transform(doc).unwrap());
        }
    }

    #[test]
    fn can_save_and_load(){
        let model = trained_model(42);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nmf_model.tst");
        model.save(&path, None).unwrap();
        assert!(!Path::new(&format!("{}.w.npy", path.display())).exists());

        let loaded = Nmf::load(&path, None).unwrap();
        assert!(!loaded.is_memory_mapped());
        assert_same_queries(&model, &loaded);
    }

    #[test]
    fn large_arrays_can_be_mapped(){
        let model = trained_model(42);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nmf_model.tst");
        model.save(&path, Some(0)).unwrap();
        for attribute in ["w", "a", "b", "h"] {
            assert!(dir.path().join(format!("nmf_model.tst.{attribute}.npy")).exists());
        }

        let mut loaded = Nmf::load(&path, Some(MmapMode::ReadOnly)).unwrap();
        assert!(loaded.is_memory_mapped());
        assert_same_queries(&model, &loaded);

        let (_, corpus) = common_corpus();
        loaded.update(&corpus).unwrap();
        assert!(!loaded.is_memory_mapped());
        let reloaded = Nmf::load(&path, None).unwrap();
        assert_same_queries(&model, &reloaded);
    }

    #[test]
    fn compressed_arrays_can_not_be_mapped(){
        let model = trained_model(42);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nmf_model.tst.gz");
        model.save(&path, Some(0)).unwrap();
        assert!(dir.path().join("nmf_model.tst.gz.w.npy.gz").exists());

        match Nmf::load(&path, Some(MmapMode::ReadOnly)) {
            Err(ReadError::IO(err)) => assert_eq!(std::io::ErrorKind::Unsupported, err.kind()),
            other => panic!("Expected an io error but got {other:?}")
        }

        let loaded = Nmf::load(&path, None).unwrap();
        assert_same_queries(&model, &loaded);
    }

    #[test]
    fn compressed_models_without_companions_load_with_mmap(){
        let model = trained_model(42);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nmf.gz");
        model.save(&path, None).unwrap();
        let loaded = Nmf::load(&path, Some(MmapMode::ReadOnly)).unwrap();
        assert!(!loaded.is_memory_mapped());
        assert_same_queries(&model, &loaded);
    }

    #[test]
    fn older_models_are_upgraded(){
        let model = trained_model(42);
        let test_doc = [(0, 1.0), (1, 1.0), (2, 1.0)];
        let expected = sparse_to_full(&model.transform(&test_doc).unwrap(), model.num_topics());
        let dir = tempfile::tempdir().unwrap();
        for (name, sep_limit) in [("inline", None), ("separate", Some(0))] {
            let path = dir.path().join(name);
            model.save_with_version(&path, sep_limit, ModelVersion::V1).unwrap();
            for mmap in [None, Some(MmapMode::ReadOnly)] {
                let loaded = Nmf::load(&path, mmap).unwrap();
                assert!(!loaded.is_memory_mapped());
                assert!(model.get_topics().abs_diff_eq(&loaded.get_topics(), 1e-6));
                let actual = sparse_to_full(&loaded.transform(&test_doc).unwrap(), loaded.num_topics());
                assert!(
                    expected.abs_diff_eq(&actual, 1e-4),
                    "{name} with {mmap:?}: expected {expected} but got {actual}"
                );
            }
        }
    }

    /// Overwrites the row count in the header of a companion file.
    fn overwrite_rows(companion: &Path, rows: u64) {
        let mut file = std::fs::File::options().write(true).open(companion).unwrap();
        file.seek(SeekFrom::Start(16)).unwrap();
        file.write_all(&rows.to_le_bytes()).unwrap();
    }

    #[test]
    fn broken_headers_are_errors(){
        let model = trained_model(42);
        let dir = tempfile::tempdir().unwrap();
        for version in [ModelVersion::V1, ModelVersion::V2] {
            let path = dir.path().join(format!("model_{version}"));
            model.save_with_version(&path, Some(0), version).unwrap();
            overwrite_rows(&dir.path().join(format!("model_{version}.b.npy")), u64::MAX / 2);
            match Nmf::load(&path, Some(MmapMode::ReadOnly)) {
                Err(ReadError::Shape { name, .. }) => assert_eq!("b", name),
                other => panic!("Expected a shape error for {version} but got {other:?}")
            }
            assert!(Nmf::load(&path, None).is_err());
        }
    }

    #[test]
    fn corrupted_companions_are_detected(){
        let model = trained_model(42);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model");
        model.save(&path, Some(0)).unwrap();

        let companion = dir.path().join("model.b.npy");
        let mut file = std::fs::File::options().read(true).write(true).open(&companion).unwrap();
        file.seek(SeekFrom::Start(70)).unwrap();
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte).unwrap();
        file.seek(SeekFrom::Start(70)).unwrap();
        file.write_all(&[byte[0] ^ 0xFF]).unwrap();
        drop(file);
        assert!(matches!(Nmf::load(&path, None), Err(ReadError::ChecksumMismatch { .. })));

        std::fs::remove_file(&companion).unwrap();
        match Nmf::load(&path, Some(MmapMode::ReadOnly)) {
            Err(ReadError::MissingCompanion(missing)) => assert_eq!(companion, missing),
            other => panic!("Expected a missing companion but got {other:?}")
        }
    }

    #[test]
    fn unknown_versions_are_rejected(){
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future");
        let mut file = std::fs::File::create(&path).unwrap();
        bincode::serialize_into(&mut file, "V7").unwrap();
        file.write_all(&[0u8; 16]).unwrap();
        drop(file);
        match Nmf::load(&path, None) {
            Err(ReadError::UnsupportedVersion(version)) => assert_eq!("V7", version),
            other => panic!("Expected an unsupported version but got {other:?}")
        }
    }
}
