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


use itertools::Itertools;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use sprs::CsMat;
use crate::corpus::corpus_to_csc;
use crate::io::FactorStorage;
use crate::model::solver::{dot_h_transposed, l2_norm, solve_projection, solve_w};
use crate::model::{ModelState, Nmf, NmfConfig, NmfError, WordId};
use crate::vocabulary::Vocabulary;

/// The state shared by all batches of one update call.
struct UpdateRun {
    rng: StdRng,
    /// Number of batches seen in this call.
    batches: usize,
}

impl Nmf {
    /// Creates a model and trains it with `passes` passes over `corpus`.
    /// Without a vocabulary the term ids of the corpus are used as tokens.
    pub fn train<C, D>(corpus: C, vocabulary: Option<Vocabulary>, config: NmfConfig) -> Result<Self, NmfError>
    where
        C: IntoIterator<Item=D> + Clone,
        D: AsRef<[(WordId, f64)]>
    {
        let vocabulary = vocabulary.unwrap_or_else(|| Vocabulary::anonymous_from_corpus(corpus.clone()));
        let mut model = Self::new(vocabulary, config);
        model.update(corpus)?;
        Ok(model)
    }

    /// Creates a model and trains it with a single pass over `corpus`.
    pub fn train_once<I, D>(corpus: I, vocabulary: Vocabulary, config: NmfConfig) -> Result<Self, NmfError>
    where
        I: IntoIterator<Item=D>,
        D: AsRef<[(WordId, f64)]>
    {
        let mut model = Self::new(vocabulary, config);
        model.update_once(corpus)?;
        Ok(model)
    }

    /// Trains the model with `passes` passes over `corpus`.
    pub fn update<C, D>(&mut self, corpus: C) -> Result<(), NmfError>
    where
        C: IntoIterator<Item=D> + Clone,
        D: AsRef<[(WordId, f64)]>
    {
        let passes = self.config.passes;
        self.run_update(|model, pass, run| model.update_pass(corpus.clone(), pass, run), passes)
    }

    /// Trains the model with exactly one pass over `corpus`.
    /// The documents are read `chunksize` at a time.
    pub fn update_once<I, D>(&mut self, corpus: I) -> Result<(), NmfError>
    where
        I: IntoIterator<Item=D>,
        D: AsRef<[(WordId, f64)]>
    {
        let mut corpus = Some(corpus);
        self.run_update(
            |model, pass, run| match corpus.take() {
                Some(corpus) => model.update_pass(corpus, pass, run),
                None => Ok(0)
            },
            1
        )
    }

    fn run_update<F>(&mut self, mut pass_fn: F, passes: usize) -> Result<(), NmfError>
    where
        F: FnMut(&mut Self, usize, &mut UpdateRun) -> Result<usize, NmfError>
    {
        let mut run = UpdateRun {
            rng: StdRng::seed_from_u64(self.rng_seed),
            batches: 0
        };
        let mut result = Ok(());
        for pass in 0..passes {
            match pass_fn(self, pass, &mut run) {
                Ok(0) => {
                    log::warn!("Nmf::update called with an empty corpus");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        if run.batches > 0 {
            self.rng_seed = run.rng.random();
            self.state = match self.state {
                ModelState::Initialized => ModelState::Trained,
                _ => ModelState::Updated
            };
        }
        result
    }

    /// Returns the number of documents seen.
    fn update_pass<I, D>(&mut self, corpus: I, pass: usize, run: &mut UpdateRun) -> Result<usize, NmfError>
    where
        I: IntoIterator<Item=D>,
        D: AsRef<[(WordId, f64)]>
    {
        let documents = corpus.into_iter();
        let corpus_len = match documents.size_hint() {
            (lower, Some(upper)) if lower == upper => Some(lower),
            _ => None
        };
        let chunksize = self.config.chunksize;
        let eval_every = self.config.eval_every;

        let chunks = documents.chunks(chunksize);
        let mut seen = 0usize;
        for (chunk_index, chunk) in chunks.into_iter().enumerate() {
            let mut chunk = chunk.collect_vec();
            chunk.shuffle(&mut run.rng);
            seen += chunk.len();
            let v = corpus_to_csc(&chunk, self.num_terms)?;

            let evaluate = eval_every > 0 && (
                (chunk_index + 1) % eval_every == 0
                    || corpus_len.is_some_and(|len| (chunk_index + 1) * chunksize >= len)
            );
            self.update_batch(&v, run, evaluate);
        }
        log::info!("PROGRESS: pass {pass}, at document #{seen}");
        Ok(seen)
    }

    /// Draws the initial topics, scaled by the mean of the first batch.
    fn setup(&mut self, v: &CsMat<f64>, rng: &mut StdRng) {
        let num_topics = self.num_topics();
        let cells = (v.rows() * v.cols()) as f64;
        let mean = if cells > 0.0 { v.data().iter().sum::<f64>() / cells } else { 0.0 };
        let scale = (self.num_terms * num_topics) as f64;
        self.w_std = if scale > 0.0 { (mean / scale).sqrt() } else { 0.0 };

        let w_std = self.w_std;
        self.w = FactorStorage::Owned(
            Array2::from_shape_fn((self.num_terms, num_topics), |_| {
                (w_std * rng.sample::<f64, _>(StandardNormal)).abs()
            })
        );
        self.a = FactorStorage::zeros((num_topics, num_topics));
        self.b = FactorStorage::zeros((self.num_terms, num_topics));
        self.v_max = Some(v.data().iter().copied().fold(0.0, f64::max));
    }

    fn update_batch(&mut self, v: &CsMat<f64>, run: &mut UpdateRun, evaluate: bool) {
        if self.v_max.is_none() {
            self.setup(v, &mut run.rng);
        }
        let v_max = self.v_max.unwrap_or(f64::INFINITY);

        let h = solve_projection(v, self.w.view(), self.h.take(), v_max, &self.config, &mut run.rng);

        if evaluate {
            log::info!("L2 norm: {}", l2_norm(v, self.w.view(), h.view()));
            self.print_topics(5, 10);
        }

        run.batches += 1;
        let i = run.batches as f64;

        let a = self.a.to_mut();
        *a *= i - 1.0;
        *a += &h.dot(&h.t());
        *a /= i;

        let b = self.b.to_mut();
        *b *= i - 1.0;
        *b += &dot_h_transposed(v, h.view());
        *b /= i;

        solve_w(self.w.to_mut().view_mut(), self.a.view(), self.b.view(), v_max, &mut self.w_error, &self.config);
        log::info!("W error: {}", self.w_error);

        self.h = Some(h);
    }
}

#[cfg(test)]
mod test {
    use approx::AbsDiffEq;
    use crate::model::test::{init_logging, trained_model};
    use crate::model::{ModelState, Nmf, NmfConfig, NmfError};
    use crate::corpus::CorpusError;
    use crate::vocabulary::test::common_corpus;

    /// Hides the length of the wrapped iterator, like a stream read from disk.
    struct Unsized<I>(I);

    impl<I: Iterator> Iterator for Unsized<I> {
        type Item = I::Item;

        fn next(&mut self) -> Option<Self::Item> {
            self.0.next()
        }
    }

    #[test]
    fn the_same_seed_gives_the_same_model(){
        let model = trained_model(42);
        let same = trained_model(42);
        let other = trained_model(0);
        assert_eq!(ModelState::Trained, model.state());
        assert_eq!(model.get_topics(), same.get_topics());
        assert!(!model.get_topics().abs_diff_eq(&other.get_topics(), 1e-8));
    }

    #[test]
    fn a_single_pass_over_a_generator_matches_a_restartable_corpus(){
        init_logging();
        let (vocabulary, corpus) = common_corpus();
        let config = NmfConfig::builder()
            .num_topics(2)
            .chunksize(1)
            .passes(1)
            .random_state(42)
            .build()
            .unwrap();
        let repeated: Vec<_> = corpus.iter().cycle().take(corpus.len() * 100).cloned().collect();
        let generator = Unsized((0..repeated.len()).map(|idx| corpus[idx % corpus.len()].clone()));
        assert_eq!((0, None), generator.size_hint());

        let from_generator = Nmf::train_once(generator, vocabulary.clone(), config.clone()).unwrap();
        let from_vec = Nmf::train(&repeated, Some(vocabulary), config).unwrap();
        assert!(from_generator.get_topics().abs_diff_eq(&from_vec.get_topics(), 1e-12));
    }

    #[test]
    fn update_changes_the_topics(){
        let model = trained_model(42);
        let (_, corpus) = common_corpus();
        let mut updated = model.clone();
        updated.update(&corpus).unwrap();
        assert_eq!(ModelState::Updated, updated.state());
        assert!(!model.get_topics().abs_diff_eq(&updated.get_topics(), 1e-8));
    }

    #[test]
    fn topics_stay_in_bounds(){
        let model = trained_model(7);
        let w = model.w();
        let v_max = model.v_max.unwrap();
        // with chunksize 1 the first batch is the first document
        let (_, corpus) = common_corpus();
        let first_max = corpus[0].iter().map(|(_, count)| *count).fold(0.0, f64::max);
        assert_eq!(first_max, v_max);
        assert!(w.iter().all(|value| (0.0..=v_max).contains(value)));
        for column in w.columns() {
            assert!(column.dot(&column).sqrt() <= 1.0 + 1e-9);
        }
    }

    #[test]
    fn an_empty_corpus_changes_nothing(){
        init_logging();
        let (vocabulary, _) = common_corpus();
        let config = NmfConfig::builder().num_topics(2).random_state(1).build().unwrap();
        let mut model = Nmf::new(vocabulary, config);
        model.update(Vec::<Vec<(usize, f64)>>::new()).unwrap();
        assert_eq!(ModelState::Initialized, model.state());
        assert!(model.w().iter().all(|value| *value == 0.0));
    }

    #[test]
    fn an_empty_update_keeps_the_projections(){
        init_logging();
        let mut model = trained_model(42);
        let (_, corpus) = common_corpus();
        let seed = model.rng_seed;
        let topics = model.get_topics();
        let before = model.get_document_topics(&corpus[3], None).unwrap();
        model.update(Vec::<Vec<(usize, f64)>>::new()).unwrap();
        assert_eq!(seed, model.rng_seed);
        assert_eq!(ModelState::Trained, model.state());
        assert_eq!(topics, model.get_topics());
        assert_eq!(before, model.get_document_topics(&corpus[3], None).unwrap());
    }

    #[test]
    fn without_vocabulary_the_ids_are_used(){
        init_logging();
        let (_, corpus) = common_corpus();
        let config = NmfConfig::builder().num_topics(2).chunksize(3).random_state(3).build().unwrap();
        let model = Nmf::train(&corpus, None, config).unwrap();
        assert_eq!(12, model.num_terms());
        assert_eq!(Some("11"), model.vocabulary().get_value_by_id(11));
    }

    #[test]
    fn unknown_terms_are_rejected(){
        let mut model = trained_model(42);
        let result = model.update(vec![vec![(12usize, 1.0)]]);
        assert!(matches!(
            result,
            Err(NmfError::Corpus(CorpusError::TermOutOfRange { term_id: 12, num_terms: 12, .. }))
        ));
    }
}
