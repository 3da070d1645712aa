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


use std::cmp::Ordering;
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use nmftopics_toolkit::normal_number::cmp_descending;
use nmftopics_toolkit::single_or_vec::SingleOrVec;
use rand::rngs::StdRng;
use rand::SeedableRng;
use crate::corpus::corpus_to_csc;
use crate::math::argsort_desc;
use crate::model::solver::{l2_norm, solve_projection};
use crate::model::{LookupError, Nmf, NmfError, Probability, TopicId, WordId};

/// Results below this probability are never reported.
const PROBABILITY_FLOOR: f64 = 1e-8;

/// A term of the vocabulary, either by id or by token.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TermRef<'a> {
    Id(WordId),
    Token(&'a str),
}

impl From<WordId> for TermRef<'_> {
    fn from(value: WordId) -> Self {
        Self::Id(value)
    }
}

impl<'a> From<&'a str> for TermRef<'a> {
    fn from(value: &'a str) -> Self {
        Self::Token(value)
    }
}

impl<'a> From<&'a String> for TermRef<'a> {
    fn from(value: &'a String) -> Self {
        Self::Token(value.as_str())
    }
}

fn sort_by_probability<T: Ord + Copy>(values: &mut [(T, Probability)]) {
    values.sort_by(|(id_a, a), (id_b, b)| cmp_descending(*a, *b).then(id_a.cmp(id_b)));
}

/// Divides `values` by their sum if the sum is positive.
fn normalized(values: ArrayView1<f64>) -> Array1<f64> {
    let sum = values.sum();
    if sum > 0.0 {
        &values / sum
    } else {
        values.to_owned()
    }
}

impl Nmf {
    fn threshold(&self, minimum_probability: Option<f64>) -> f64 {
        minimum_probability
            .unwrap_or(self.config.minimum_probability)
            .max(PROBABILITY_FLOOR)
    }

    pub(crate) fn token(&self, word_id: WordId) -> &str {
        self.vocabulary.get_value_by_id(word_id).unwrap_or("<unknown>")
    }

    fn check_topic(&self, topic_id: TopicId) -> Result<(), LookupError> {
        if topic_id < self.num_topics() {
            Ok(())
        } else {
            Err(LookupError::UnknownTopic { topic_id, num_topics: self.num_topics() })
        }
    }

    /// The topic-term matrix with the shape `num_topics x num_terms`.
    /// Every row sums up to 1 if the model normalizes its results.
    pub fn get_topics(&self) -> Array2<f64> {
        let mut topics = self.w.view().t().to_owned();
        if self.config.normalize {
            for mut topic in topics.axis_iter_mut(Axis(0)) {
                let sum = topic.sum();
                if sum > 0.0 {
                    topic /= sum;
                }
            }
        }
        topics
    }

    /// The `topn` most important terms of a topic.
    pub fn get_topic_terms(&self, topic_id: TopicId, topn: usize) -> Result<Vec<(WordId, Probability)>, LookupError> {
        self.check_topic(topic_id)?;
        let column = self.w.view();
        let topic = if self.config.normalize {
            normalized(column.column(topic_id))
        } else {
            column.column(topic_id).to_owned()
        };
        Ok(argsort_desc(topic.view(), topn).into_iter().map(|word_id| (word_id, topic[word_id])).collect())
    }

    /// Same as [Nmf::get_topic_terms] with the tokens instead of the ids.
    pub fn show_topic(&self, topic_id: TopicId, topn: usize) -> Result<Vec<(&str, Probability)>, LookupError> {
        Ok(
            self.get_topic_terms(topic_id, topn)?
                .into_iter()
                .map(|(word_id, probability)| (self.token(word_id), probability))
                .collect()
        )
    }

    /// Shows `num_topics` topics with their `num_words` most important terms.
    ///
    /// If less than all topics are requested, one half is taken from the
    /// strongest and the other half from the weakest topics.
    pub fn show_topics(&self, num_topics: Option<usize>, num_words: usize) -> Vec<(TopicId, Vec<(&str, Probability)>)> {
        let chosen: Vec<TopicId> = match num_topics {
            Some(requested) if requested < self.num_topics() => {
                let weights = self.w.view().sum_axis(Axis(0));
                let by_weight = argsort_desc(weights.view(), weights.len());
                let strongest = requested / 2;
                let weakest = requested - strongest;
                by_weight[..strongest]
                    .iter()
                    .chain(&by_weight[by_weight.len() - weakest..])
                    .copied()
                    .collect()
            }
            _ => (0..self.num_topics()).collect()
        };
        chosen
            .into_iter()
            .filter_map(|topic_id| Some((topic_id, self.show_topic(topic_id, num_words).ok()?)))
            .collect()
    }

    /// Logs the topics of [Nmf::show_topics] in the form `0.512*"token" + ...`.
    pub fn print_topics(&self, num_topics: usize, num_words: usize) -> Vec<(TopicId, String)> {
        self.show_topics(Some(num_topics), num_words)
            .into_iter()
            .map(|(topic_id, terms)| {
                let formatted = terms
                    .into_iter()
                    .map(|(token, probability)| format!("{probability:.3}*\"{token}\""))
                    .join(" + ");
                log::info!("topic #{topic_id}: {formatted}");
                (topic_id, formatted)
            })
            .collect()
    }

    /// The topics a term belongs to, ordered by descending probability.
    pub fn get_term_topics<'a>(&self, term: impl Into<TermRef<'a>>, minimum_probability: Option<f64>) -> Result<Vec<(TopicId, Probability)>, LookupError> {
        let word_id = match term.into() {
            TermRef::Id(word_id) => {
                if word_id >= self.num_terms {
                    return Err(LookupError::UnknownTermId { term_id: word_id, num_terms: self.num_terms });
                }
                word_id
            }
            TermRef::Token(token) => {
                self.vocabulary
                    .get_id(token)
                    .ok_or_else(|| LookupError::UnknownToken(token.to_string()))?
            }
        };
        let threshold = self.threshold(minimum_probability);
        let w = self.w.view();
        let word_topics = if self.config.normalize {
            normalized(w.row(word_id))
        } else {
            w.row(word_id).to_owned()
        };
        let mut values = word_topics
            .into_iter()
            .enumerate()
            .filter(|(_, probability)| *probability >= threshold)
            .collect_vec();
        sort_by_probability(&mut values);
        Ok(values)
    }

    /// Projects a single document onto the topics.
    /// The projection does not change the model, the same document always gets the same result.
    fn project(&self, doc: &[(WordId, f64)]) -> Result<Array1<f64>, NmfError> {
        let v = corpus_to_csc(std::iter::once(doc), self.num_terms)?;
        let mut rng = StdRng::seed_from_u64(self.rng_seed);
        let h = solve_projection(&v, self.w.view(), None, f64::INFINITY, &self.config, &mut rng);
        Ok(h.column(0).to_owned())
    }

    /// The topic distribution of a document, topics with a probability of at most
    /// `minimum_probability` (or the configured one) are dropped.
    pub fn get_document_topics(&self, doc: &[(WordId, f64)], minimum_probability: Option<f64>) -> Result<Vec<(TopicId, Probability)>, NmfError> {
        let threshold = self.threshold(minimum_probability);
        let mut h = self.project(doc)?;
        if self.config.normalize {
            h = normalized(h.view());
        }
        Ok(
            h.into_iter()
                .enumerate()
                .filter(|(_, probability)| *probability > threshold)
                .collect()
        )
    }

    /// Lazily calculates the topic distribution of every document in `corpus`.
    pub fn get_corpus_topics<'a, I, D>(&'a self, corpus: I, minimum_probability: Option<f64>) -> impl Iterator<Item=Result<Vec<(TopicId, Probability)>, NmfError>> + 'a
    where
        I: IntoIterator<Item=D>,
        I::IntoIter: 'a,
        D: AsRef<[(WordId, f64)]>
    {
        corpus
            .into_iter()
            .map(move |doc| self.get_document_topics(doc.as_ref(), minimum_probability))
    }

    /// Calculates the topics of a single document or of every document in a list.
    pub fn get_document_topics_for<D>(&self, docs: SingleOrVec<D>, minimum_probability: Option<f64>) -> Result<SingleOrVec<Vec<(TopicId, Probability)>>, NmfError>
    where
        D: AsRef<[(WordId, f64)]>
    {
        match docs {
            SingleOrVec::Single(doc) => {
                Ok(SingleOrVec::Single(self.get_document_topics(doc.as_ref(), minimum_probability)?))
            }
            SingleOrVec::Vec(docs) => {
                Ok(SingleOrVec::Vec(self.get_corpus_topics(docs, minimum_probability).collect::<Result<_, _>>()?))
            }
        }
    }

    /// The topics of `doc` with the configured minimum probability.
    pub fn transform(&self, doc: &[(WordId, f64)]) -> Result<Vec<(TopicId, Probability)>, NmfError> {
        self.get_document_topics(doc, None)
    }

    /// The reconstruction error of `batch`. The activations of the last training batch
    /// are used if they fit, otherwise the batch is projected.
    pub fn l2_norm<I, D>(&self, batch: I) -> Result<f64, NmfError>
    where
        I: IntoIterator<Item=D>,
        D: AsRef<[(WordId, f64)]>
    {
        let v = corpus_to_csc(batch, self.num_terms)?;
        let h = match &self.h {
            Some(h) if h.dim() == (self.num_topics(), v.cols()) => h.clone(),
            _ => {
                let mut rng = StdRng::seed_from_u64(self.rng_seed);
                solve_projection(&v, self.w.view(), None, f64::INFINITY, &self.config, &mut rng)
            }
        };
        Ok(l2_norm(&v, self.w.view(), h.view()))
    }
}

/// Orders topics by descending `score`, ties by id.
pub(crate) fn cmp_scored<T: Ord>(a: &(T, f64), b: &(T, f64)) -> Ordering {
    cmp_descending(a.1, b.1).then(a.0.cmp(&b.0))
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;
    use nmftopics_toolkit::single_or_vec::SingleOrVec;
    use approx::AbsDiffEq;
    use ndarray::array;
    use crate::corpus::CorpusError;
    use crate::math::sparse_to_full;
    use crate::model::test::trained_model;
    use crate::model::{LookupError, NmfError, TermRef};
    use crate::vocabulary::test::common_corpus;

    #[test]
    fn the_first_document_keeps_its_topic(){
        // recorded outputs of the fixture model, a change here means the training changed
        let (_, corpus) = common_corpus();
        for (seed, expected) in [(42, array![1.0, 0.0]), (0, array![1.0, 0.0]), (1, array![0.0, 1.0])] {
            let model = trained_model(seed);
            let actual = sparse_to_full(&model.transform(&corpus[0]).unwrap(), 2);
            assert!(expected.abs_diff_eq(&actual, 1e-3), "seed {seed}: expected {expected} but got {actual}");
        }
    }

    #[test]
    fn topics_are_normalized(){
        let model = trained_model(42);
        let topics = model.get_topics();
        assert_eq!((2, 12), topics.dim());
        for topic in topics.rows() {
            assert_relative_eq!(1.0, topic.sum(), epsilon = 1e-9);
            assert!(topic.iter().all(|value| *value >= 0.0));
        }
    }

    #[test]
    fn topic_terms_are_sorted(){
        let model = trained_model(42);
        let terms = model.get_topic_terms(1, 10).unwrap();
        assert_eq!(10, terms.len());
        assert!(terms.iter().all(|(word_id, _)| *word_id < 12));
        assert!(terms.windows(2).all(|pair| pair[0].1 >= pair[1].1));

        let shown = model.show_topic(1, 10).unwrap();
        for ((word_id, probability), (token, shown_probability)) in terms.iter().zip(shown) {
            assert_eq!(model.vocabulary().get_value_by_id(*word_id), Some(token));
            assert_eq!(*probability, shown_probability);
        }

        assert_eq!(
            Err(LookupError::UnknownTopic { topic_id: 2, num_topics: 2 }),
            model.get_topic_terms(2, 10)
        );
    }

    #[test]
    fn show_topics_mixes_strong_and_weak_topics(){
        let model = trained_model(42);
        assert_eq!(vec![0, 1], model.show_topics(None, 3).into_iter().map(|(id, _)| id).collect::<Vec<_>>());

        let weights = model.w().sum_axis(ndarray::Axis(0));
        let weakest = if weights[0] < weights[1] { 0 } else { 1 };
        let shown = model.show_topics(Some(1), 3);
        assert_eq!(1, shown.len());
        assert_eq!(weakest, shown[0].0);
        assert_eq!(3, shown[0].1.len());

        let printed = model.print_topics(2, 2);
        assert_eq!(2, printed.len());
        assert!(printed.iter().all(|(_, text)| text.contains("*\"") && text.contains(" + ")));
    }

    #[test]
    fn term_topics_by_id_and_token(){
        let model = trained_model(42);
        let by_id = model.get_term_topics(2usize, None).unwrap();
        let by_token = model.get_term_topics("interface", None).unwrap();
        assert_eq!(by_id, by_token);
        assert!(by_id.iter().all(|(topic_id, probability)| *topic_id < 2 && *probability >= 0.01));
        assert!(by_id.windows(2).all(|pair| pair[0].1 >= pair[1].1));

        let system = model.get_term_topics(TermRef::Id(5), Some(0.0)).unwrap();
        assert!(!system.is_empty());
        assert_relative_eq!(1.0, system.iter().map(|(_, p)| p).sum::<f64>(), epsilon = 1e-9);

        assert_eq!(
            Err(LookupError::UnknownTermId { term_id: 99, num_terms: 12 }),
            model.get_term_topics(99usize, None)
        );
        assert_eq!(
            Err(LookupError::UnknownToken("nothing".to_string())),
            model.get_term_topics("nothing", None)
        );
    }

    #[test]
    fn transform_a_document(){
        let model = trained_model(42);
        let (_, corpus) = common_corpus();
        let transformed = model.transform(&corpus[0]).unwrap();
        assert!(!transformed.is_empty());
        assert!(transformed.len() <= 2);
        assert!(transformed.iter().all(|(_, p)| *p > 0.01 && *p <= 1.0));

        let all = model.get_document_topics(&corpus[0], Some(0.0)).unwrap();
        assert_relative_eq!(1.0, all.iter().map(|(_, p)| p).sum::<f64>(), epsilon = 1e-9);

        // inference does not touch the model
        assert_eq!(transformed, model.transform(&corpus[0]).unwrap());
    }

    #[test]
    fn an_empty_document_has_no_topics(){
        let model = trained_model(42);
        assert!(model.transform(&[]).unwrap().is_empty());
    }

    #[test]
    fn documents_and_corpora(){
        let model = trained_model(42);
        let (_, corpus) = common_corpus();
        let lazy: Vec<_> = model.get_corpus_topics(&corpus, None).collect::<Result<_, _>>().unwrap();
        assert_eq!(9, lazy.len());
        for (doc, topics) in corpus.iter().zip(&lazy) {
            assert_eq!(&model.transform(doc).unwrap(), topics);
        }

        let single = model.get_document_topics_for(SingleOrVec::Single(corpus[3].clone()), None).unwrap();
        assert_eq!(Some(&lazy[3]), single.as_single());
        let many = model.get_document_topics_for(SingleOrVec::Vec(corpus.clone()), None).unwrap();
        assert_eq!(Some(&lazy), many.as_vec());

        assert!(matches!(
            model.transform(&[(40, 1.0)]),
            Err(NmfError::Corpus(CorpusError::TermOutOfRange { term_id: 40, .. }))
        ));
    }

    #[test]
    fn the_reconstruction_error_is_finite(){
        let model = trained_model(42);
        let (_, corpus) = common_corpus();
        let error = model.l2_norm(&corpus).unwrap();
        assert!(error.is_finite() && error >= 0.0);
        assert_eq!(0.0, model.l2_norm(Vec::<Vec<(usize, f64)>>::new()).unwrap());
    }
}
