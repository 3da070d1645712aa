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


use std::path::PathBuf;
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;
use crate::math::MathError;

/// The model storing version.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Display, AsRefStr, EnumString)]
pub enum ModelVersion {
    /// The factor matrices are stored as f32.
    V1,
    /// The factor matrices are stored as f64.
    V2
}

impl ModelVersion {
    pub const CURRENT: ModelVersion = ModelVersion::V2;
}

/// The errors while writing
#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
    #[error("The path {0} can not be used as base for the companion files!")]
    InvalidPath(PathBuf),
}

/// The errors while reading
#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
    #[error("The version {0} is not supported!")]
    UnsupportedVersion(String),
    #[error("The companion file {0} is missing!")]
    MissingCompanion(PathBuf),
    #[error("The checksum of {path} is {actual:#010x} but {expected:#010x} was expected!")]
    ChecksumMismatch {
        path: PathBuf,
        expected: u32,
        actual: u32
    },
    #[error("The file {0} is not an array file!")]
    NotAnArrayFile(PathBuf),
    #[error("The array {name} has the shape {actual:?} but {expected:?} was expected!")]
    Shape {
        name: String,
        expected: (usize, usize),
        actual: (usize, usize)
    },
    #[error(transparent)]
    Math(#[from] MathError),
}
