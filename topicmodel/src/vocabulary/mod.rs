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

mod anonymous;

pub use anonymous::*;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::io::{BufRead, BufWriter, Write};
use std::ops::Range;
use std::slice::Iter;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::corpus::SparseDocument;
use crate::model::WordId;

/// Maps the word ids of a corpus to their tokens and back.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    entry2id: HashMap<String, WordId>,
    id2entry: Vec<String>
}

#[derive(Debug, Error)]
pub enum LoadVocabularyError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("The token {0:?} in line {1} is not unique!")]
    Duplicate(String, usize),
}

impl Vocabulary {
    pub fn new() -> Self {
        Default::default()
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entry2id: HashMap::with_capacity(capacity),
            id2entry: Vec::with_capacity(capacity)
        }
    }

    pub fn len(&self) -> usize {
        self.id2entry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id2entry.is_empty()
    }

    pub fn ids(&self) -> Range<WordId> {
        0..self.id2entry.len()
    }

    pub fn iter(&self) -> Iter<String> {
        self.id2entry.iter()
    }

    /// Adds the token if it is not already known and returns its id.
    pub fn add(&mut self, token: impl Into<String>) -> WordId {
        match self.entry2id.entry(token.into()) {
            Entry::Occupied(entry) => {
                *entry.get()
            }
            Entry::Vacant(entry) => {
                let id = self.id2entry.len();
                self.id2entry.push(entry.key().clone());
                entry.insert(id);
                id
            }
        }
    }

    pub fn get_id(&self, token: &str) -> Option<WordId> {
        self.entry2id.get(token).copied()
    }

    pub fn get_value_by_id(&self, id: WordId) -> Option<&str> {
        self.id2entry.get(id).map(String::as_str)
    }

    pub fn contains_id(&self, id: WordId) -> bool {
        id < self.id2entry.len()
    }

    pub fn contains_value(&self, token: &str) -> bool {
        self.entry2id.contains_key(token)
    }

    /// Converts `tokens` to a bag of words ordered by id.
    /// Unknown tokens are added if `allow_update` is set, otherwise they are counted and skipped.
    pub fn doc_to_bow<S: AsRef<str>>(&mut self, tokens: impl IntoIterator<Item=S>, allow_update: bool) -> (SparseDocument<f64>, usize) {
        let mut counts: HashMap<WordId, f64> = HashMap::new();
        let mut unknown = 0usize;
        let mut new_tokens = Vec::new();
        for token in tokens {
            let token = token.as_ref();
            match self.get_id(token) {
                Some(id) => *counts.entry(id).or_default() += 1.0,
                None if allow_update => new_tokens.push(token.to_string()),
                None => unknown += 1,
            }
        }
        // new tokens get their ids in sorted order, like the gensim dictionary
        for token in new_tokens.into_iter().sorted() {
            let id = self.add(token);
            *counts.entry(id).or_default() += 1.0;
        }
        (counts.into_iter().sorted_by_key(|(id, _)| *id).collect(), unknown)
    }

    pub fn load_from_input(reader: &mut impl BufRead) -> Result<Self, LoadVocabularyError> {
        let mut vocabulary = Self::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if vocabulary.contains_value(&line) {
                return Err(LoadVocabularyError::Duplicate(line, line_no));
            }
            vocabulary.add(line);
        }
        Ok(vocabulary)
    }

    pub fn save_to_output(&self, writer: &mut impl Write) -> std::io::Result<usize> {
        let mut written = 0;
        let mut writer = BufWriter::new(writer);
        for value in self.id2entry.iter() {
            writer.write_all(value.as_bytes())?;
            writer.write_all(b"\n")?;
            written += value.len() + 1;
        }
        writer.flush()?;
        Ok(written)
    }
}

impl From<Vec<String>> for Vocabulary {
    fn from(value: Vec<String>) -> Self {
        let mut vocabulary = Self::with_capacity(value.len());
        vocabulary.extend(value);
        vocabulary
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(value: Vocabulary) -> Self {
        value.id2entry
    }
}

impl<Q: Into<String>> Extend<Q> for Vocabulary {
    fn extend<I: IntoIterator<Item=Q>>(&mut self, iter: I) {
        for value in iter {
            self.add(value);
        }
    }
}

impl PartialEq for Vocabulary {
    fn eq(&self, other: &Self) -> bool {
        self.id2entry == other.id2entry
    }
}

impl Eq for Vocabulary {}

impl Display for Vocabulary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Vocabulary<{}>:", self.len())?;
        for (id, token) in self.id2entry.iter().enumerate() {
            write!(f, "\n    {id}: {token}")?;
        }
        Ok(())
    }
}
