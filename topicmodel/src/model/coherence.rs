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


use std::collections::{HashMap, HashSet};
use itertools::Itertools;
use rayon::prelude::*;
use crate::math::argsort_desc;
use crate::model::inference::cmp_scored;
use crate::model::{Nmf, Probability, WordId};

const EPSILON: f64 = 1e-12;

/// Document frequencies of a fixed set of terms and of their pairs.
#[derive(Debug, Default)]
struct OccurrenceCounts {
    num_docs: usize,
    single: HashMap<WordId, usize>,
    pairs: HashMap<(WordId, WordId), usize>,
}

impl OccurrenceCounts {
    fn from_corpus<I, D>(corpus: I, relevant: &HashSet<WordId>) -> Self
    where
        I: IntoIterator<Item=D>,
        D: AsRef<[(WordId, f64)]>
    {
        let mut counts = Self::default();
        for doc in corpus {
            counts.num_docs += 1;
            let present = doc
                .as_ref()
                .iter()
                .filter(|(word_id, value)| *value > 0.0 && relevant.contains(word_id))
                .map(|(word_id, _)| *word_id)
                .sorted_unstable()
                .dedup()
                .collect_vec();
            for (idx, &word_id) in present.iter().enumerate() {
                *counts.single.entry(word_id).or_default() += 1;
                for &other in &present[idx + 1..] {
                    *counts.pairs.entry((word_id, other)).or_default() += 1;
                }
            }
        }
        counts
    }

    fn document_frequency(&self, word_id: WordId) -> usize {
        self.single.get(&word_id).copied().unwrap_or(0)
    }

    fn co_document_frequency(&self, a: WordId, b: WordId) -> usize {
        let key = if a <= b { (a, b) } else { (b, a) };
        self.pairs.get(&key).copied().unwrap_or(0)
    }
}

/// The u_mass coherence of the terms of a topic, ordered by importance.
///
/// Every term is paired with all terms before it. Pairs with a preceding term
/// that occurs in no document are skipped, a topic without any pair scores 0.
fn u_mass(top_terms: &[WordId], counts: &OccurrenceCounts) -> f64 {
    let num_docs = counts.num_docs as f64;
    let scores = top_terms
        .iter()
        .enumerate()
        .skip(1)
        .flat_map(|(idx, &w_prime)| top_terms[..idx].iter().map(move |&w_star| (w_prime, w_star)))
        .filter_map(|(w_prime, w_star)| {
            let w_star_count = counts.document_frequency(w_star);
            if w_star_count == 0 {
                return None;
            }
            let co_occurrence = counts.co_document_frequency(w_prime, w_star) as f64;
            Some(((co_occurrence / num_docs + EPSILON) / (w_star_count as f64 / num_docs)).ln())
        })
        .collect_vec();
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

impl Nmf {
    /// The topics with their `topn` most important terms, ordered by their
    /// u_mass coherence on `corpus`.
    pub fn top_topics<I, D>(&self, corpus: I, topn: usize) -> Vec<(Vec<(Probability, String)>, f64)>
    where
        I: IntoIterator<Item=D>,
        D: AsRef<[(WordId, f64)]>
    {
        let topics = self.get_topics();
        let top_terms = topics
            .rows()
            .into_iter()
            .map(|topic| argsort_desc(topic, topn))
            .collect_vec();
        let relevant: HashSet<WordId> = top_terms.iter().flatten().copied().collect();
        let counts = OccurrenceCounts::from_corpus(corpus, &relevant);
        log::debug!("Counted the co-occurrences of {} terms in {} documents", relevant.len(), counts.num_docs);

        let coherences: Vec<f64> = top_terms
            .par_iter()
            .map(|terms| u_mass(terms, &counts))
            .collect();

        let mut scored = coherences.into_iter().enumerate().collect_vec();
        scored.sort_by(cmp_scored);

        scored
            .into_iter()
            .map(|(topic_id, coherence)| {
                let terms = top_terms[topic_id]
                    .iter()
                    .map(|&word_id| (topics[[topic_id, word_id]], self.token(word_id).to_string()))
                    .collect();
                (terms, coherence)
            })
            .collect()
    }
}
