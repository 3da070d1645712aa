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


use crate::model::WordId;
use crate::vocabulary::Vocabulary;

impl Vocabulary {
    /// A vocabulary where every token is the rendered id.
    pub fn anonymous(num_terms: usize) -> Self {
        (0..num_terms).map(|id| id.to_string()).collect::<Vec<_>>().into()
    }

    /// Creates an anonymous vocabulary large enough for every term id in `corpus`.
    pub fn anonymous_from_corpus<I, D>(corpus: I) -> Self
    where
        I: IntoIterator<Item=D>,
        D: AsRef<[(WordId, f64)]>
    {
        Self::anonymous(num_terms_of(corpus))
    }
}

/// The largest term id of `corpus` plus one, 0 for a corpus without terms.
pub fn num_terms_of<I, D>(corpus: I) -> usize
where
    I: IntoIterator<Item=D>,
    D: AsRef<[(WordId, f64)]>
{
    corpus
        .into_iter()
        .filter_map(|doc| doc.as_ref().iter().map(|(id, _)| *id).max())
        .max()
        .map_or(0, |max| max + 1)
}

#[cfg(test)]
mod test {
    use crate::vocabulary::{num_terms_of, Vocabulary};

    #[test]
    fn uses_the_largest_id(){
        let corpus = vec![vec![(3, 1.0)], vec![], vec![(0, 2.0), (7, 1.0)]];
        assert_eq!(8, num_terms_of(&corpus));
        let vocabulary = Vocabulary::anonymous_from_corpus(&corpus);
        assert_eq!(8, vocabulary.len());
        assert_eq!(Some("7"), vocabulary.get_value_by_id(7));
        assert_eq!(Some(3), vocabulary.get_id("3"));
        assert!(Vocabulary::anonymous_from_corpus(Vec::<Vec<(usize, f64)>>::new()).is_empty());
    }
}
