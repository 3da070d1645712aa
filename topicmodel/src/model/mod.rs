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


mod config;
mod solver;
mod training;
mod inference;
mod coherence;

pub use config::*;
pub use inference::*;

use std::fmt::{Debug, Formatter};
use ndarray::{Array2, ArrayView2};
use rand::random;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;
use crate::corpus::CorpusError;
use crate::io::FactorStorage;
use crate::vocabulary::Vocabulary;

pub type Probability = f64;
pub type WordId = usize;
pub type TopicId = usize;
pub type DocumentId = usize;

/// The lifecycle of a model.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, AsRefStr, EnumString)]
pub enum ModelState {
    /// The factor matrices are allocated but no batch was seen.
    Initialized,
    /// The first update call saw at least one batch.
    Trained,
    /// The model was updated after the initial training.
    Updated,
}

#[derive(Debug, Error)]
pub enum NmfError {
    #[error(transparent)]
    Corpus(#[from] CorpusError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Config(#[from] NmfConfigBuilderError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LookupError {
    #[error("The term id {term_id} is unknown to a vocabulary of {num_terms} terms!")]
    UnknownTermId {
        term_id: WordId,
        num_terms: usize
    },
    #[error("The token {0:?} is not in the vocabulary!")]
    UnknownToken(String),
    #[error("The topic {topic_id} does not exist, the model has {num_topics} topics!")]
    UnknownTopic {
        topic_id: TopicId,
        num_topics: usize
    },
}

/// An online non-negative matrix factorization topic model.
///
/// The corpus `V` (terms x documents) is approximated by `W * H`,
/// where `W` (terms x topics) holds the topics and is refined
/// batch by batch with the running statistics `A` and `B`.
#[derive(Clone)]
pub struct Nmf {
    pub(crate) config: NmfConfig,
    pub(crate) vocabulary: Vocabulary,
    pub(crate) num_terms: usize,
    // Row = Word
    // Col = Topic
    pub(crate) w: FactorStorage,
    pub(crate) a: FactorStorage,
    pub(crate) b: FactorStorage,
    /// The activations of the last batch.
    pub(crate) h: Option<Array2<f64>>,
    pub(crate) v_max: Option<f64>,
    pub(crate) w_std: f64,
    pub(crate) w_error: f64,
    pub(crate) rng_seed: u64,
    pub(crate) state: ModelState,
}

impl Nmf {
    /// Creates an untrained model for the terms of `vocabulary`.
    pub fn new(vocabulary: Vocabulary, config: NmfConfig) -> Self {
        let num_terms = vocabulary.len();
        let num_topics = config.num_topics;
        let rng_seed = config.random_state.unwrap_or_else(random);
        Self {
            num_terms,
            w: FactorStorage::zeros((num_terms, num_topics)),
            a: FactorStorage::zeros((num_topics, num_topics)),
            b: FactorStorage::zeros((num_terms, num_topics)),
            h: None,
            v_max: None,
            w_std: 0.0,
            w_error: f64::INFINITY,
            rng_seed,
            state: ModelState::Initialized,
            config,
            vocabulary,
        }
    }

    pub fn config(&self) -> &NmfConfig {
        &self.config
    }

    /// Replaces the config. Changes of the number of topics are ignored.
    pub fn set_config(&mut self, mut config: NmfConfig) {
        if config.num_topics != self.config.num_topics {
            log::warn!(
                "The number of topics can not be changed from {} to {}!",
                self.config.num_topics,
                config.num_topics
            );
            config.num_topics = self.config.num_topics;
        }
        self.config = config;
    }

    pub fn num_topics(&self) -> usize {
        self.config.num_topics
    }

    pub fn num_terms(&self) -> usize {
        self.num_terms
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    /// The raw topic matrix with the shape `num_terms x num_topics`.
    pub fn w(&self) -> ArrayView2<f64> {
        self.w.view()
    }

    /// True if any factor matrix is still backed by a memory map.
    pub fn is_memory_mapped(&self) -> bool {
        self.w.is_mapped() || self.a.is_mapped() || self.b.is_mapped()
    }
}

impl Debug for Nmf {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nmf")
            .field("num_topics", &self.num_topics())
            .field("num_terms", &self.num_terms)
            .field("state", &self.state)
            .field("v_max", &self.v_max)
            .field("w_error", &self.w_error)
            .field("memory_mapped", &self.is_memory_mapped())
            .finish()
    }
}
