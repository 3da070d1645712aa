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


use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// The hyperparameters of an [Nmf](crate::model::Nmf).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(default, build_fn(validate = "Self::validate"))]
pub struct NmfConfig {
    /// Number of topics to extract.
    pub num_topics: usize,
    /// Number of documents used per training batch.
    pub chunksize: usize,
    /// Passes over a restartable corpus per update.
    pub passes: usize,
    /// Gradient descent step scale.
    pub kappa: f64,
    /// Topics with a lower probability are dropped from query results.
    pub minimum_probability: f64,
    pub w_max_iter: usize,
    pub w_stop_condition: f64,
    pub h_max_iter: usize,
    pub h_stop_condition: f64,
    /// Number of batches between two evaluations, 0 disables them.
    pub eval_every: usize,
    /// Normalize the results of the queries.
    pub normalize: bool,
    #[builder(setter(strip_option))]
    pub random_state: Option<u64>,
}

impl Default for NmfConfig {
    fn default() -> Self {
        Self {
            num_topics: 100,
            chunksize: 2000,
            passes: 1,
            kappa: 1.0,
            minimum_probability: 0.01,
            w_max_iter: 200,
            w_stop_condition: 1e-4,
            h_max_iter: 50,
            h_stop_condition: 1e-3,
            eval_every: 10,
            normalize: true,
            random_state: None,
        }
    }
}

impl NmfConfig {
    pub fn builder() -> NmfConfigBuilder {
        NmfConfigBuilder::default()
    }
}

impl NmfConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        for (name, value) in [("num_topics", self.num_topics), ("chunksize", self.chunksize), ("passes", self.passes)] {
            if value == Some(0) {
                return Err(format!("{name} has to be greater than 0!"));
            }
        }
        for (name, value) in [
            ("kappa", self.kappa),
            ("minimum_probability", self.minimum_probability),
            ("w_stop_condition", self.w_stop_condition),
            ("h_stop_condition", self.h_stop_condition)
        ] {
            if let Some(value) = value {
                if !(value >= 0.0) {
                    return Err(format!("{name} has to be a non-negative number but was {value}!"));
                }
            }
        }
        Ok(())
    }
}
