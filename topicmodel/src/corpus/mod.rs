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

mod sparse;

pub use sparse::*;

use itertools::Itertools;
use sprs::{CsMat, TriMat};
use thiserror::Error;
use crate::model::{DocumentId, WordId};

/// A document as bag of words. Every word id is unique, the order is not relevant.
pub type SparseDocument<N = f64> = Vec<(WordId, N)>;

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("The index {index} is out of bounds for a corpus with {len} documents!")]
    IndexOutOfBounds {
        index: usize,
        len: usize
    },
    #[error("The term id {term_id} in document {document} is out of range for {num_terms} terms!")]
    TermOutOfRange {
        document: DocumentId,
        term_id: WordId,
        num_terms: usize
    },
}

/// Converts the documents of `corpus` to a `num_terms x documents` matrix.
/// Zeros are dropped and duplicated ids in a document are summed up.
pub fn corpus_to_csc<I, D>(corpus: I, num_terms: usize) -> Result<CsMat<f64>, CorpusError>
where
    I: IntoIterator<Item=D>,
    D: AsRef<[(WordId, f64)]>
{
    let documents = corpus.into_iter().collect_vec();
    let mut triplets = TriMat::new((num_terms, documents.len()));
    for (document, doc) in documents.iter().enumerate() {
        for &(term_id, value) in doc.as_ref() {
            if term_id >= num_terms {
                return Err(CorpusError::TermOutOfRange { document, term_id, num_terms })
            }
            if value != 0.0 {
                triplets.add_triplet(term_id, document, value);
            }
        }
    }
    Ok(triplets.to_csc())
}

#[cfg(test)]
mod test {
    use crate::corpus::{corpus_to_csc, CorpusError, SparseCorpus};

    #[test]
    fn builds_a_term_document_matrix(){
        let corpus = vec![
            vec![(2, 1.0), (0, 2.0)],
            vec![],
            vec![(1, 1.0), (1, 2.0), (3, 0.0)],
        ];
        let matrix = corpus_to_csc(&corpus, 4).unwrap();
        assert_eq!((4, 3), matrix.shape());
        assert!(matrix.is_csc());
        let back = SparseCorpus::new(matrix);
        assert_eq!(Some(vec![(0, 2.0), (2, 1.0)]), back.get(0));
        assert_eq!(Some(vec![]), back.get(1));
        assert_eq!(Some(vec![(1, 3.0)]), back.get(2));
    }

    #[test]
    fn rejects_unknown_terms(){
        let corpus = vec![vec![(0, 1.0)], vec![(5, 1.0)]];
        match corpus_to_csc(&corpus, 3) {
            Err(CorpusError::TermOutOfRange { document, term_id, num_terms }) => {
                assert_eq!((1, 5, 3), (document, term_id, num_terms));
            }
            other => panic!("Expected an error, got {other:?}")
        }
    }
}
