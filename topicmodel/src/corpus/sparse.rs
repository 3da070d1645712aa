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

use std::ops::{Range, RangeFrom, RangeFull, RangeInclusive, RangeTo, RangeToInclusive};
use std::sync::Arc;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use num::Zero;
use sprs::{CsMat, TriMat};
use crate::corpus::{CorpusError, SparseDocument};

/// Presents a sparse `terms x documents` matrix as corpus.
///
/// Selecting documents creates a new view on the same backing matrix, nothing is copied
/// until [SparseCorpus::sparse] or [SparseCorpus::to_dense] is called.
#[derive(Debug)]
pub struct SparseCorpus<N = f64> {
    /// Always compressed by column.
    matrix: Arc<CsMat<N>>,
    selection: Selection,
}

#[derive(Debug, Clone)]
enum Selection {
    All,
    Columns(Arc<[usize]>)
}

impl<N> Clone for SparseCorpus<N> {
    fn clone(&self) -> Self {
        Self {
            matrix: self.matrix.clone(),
            selection: self.selection.clone()
        }
    }
}

impl<N> SparseCorpus<N> where N: Clone + Zero + PartialEq {
    /// Creates a corpus where every column of `matrix` is a document.
    pub fn new(matrix: CsMat<N>) -> Self where N: Default {
        let matrix = if matrix.is_csc() {
            matrix
        } else {
            matrix.to_csc()
        };
        Self {
            matrix: Arc::new(matrix),
            selection: Selection::All
        }
    }

    /// Creates a corpus where every row of `matrix` is a document.
    pub fn from_rows(matrix: CsMat<N>) -> Self where N: Default {
        Self::new(matrix.transpose_view().to_owned())
    }

    /// Creates a corpus from a dense `terms x documents` matrix, zeros are not stored.
    pub fn from_dense(dense: ArrayView2<N>) -> Self where N: Default {
        let mut triplets = TriMat::new(dense.dim());
        for ((row, col), value) in dense.indexed_iter() {
            if !value.is_zero() {
                triplets.add_triplet(row, col, value.clone());
            }
        }
        Self::new(triplets.to_csc())
    }

    /// The number of documents in this view.
    pub fn len(&self) -> usize {
        match &self.selection {
            Selection::All => self.matrix.cols(),
            Selection::Columns(columns) => columns.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of terms, the rows of the backing matrix.
    pub fn num_terms(&self) -> usize {
        self.matrix.rows()
    }

    /// Returns true if both views use the same backing matrix.
    pub fn shares_backing_with(&self, other: &SparseCorpus<N>) -> bool {
        Arc::ptr_eq(&self.matrix, &other.matrix)
    }

    /// Resolves the position in this view to the column in the backing matrix.
    fn column_of(&self, position: usize) -> Option<usize> {
        match &self.selection {
            Selection::All => (position < self.matrix.cols()).then_some(position),
            Selection::Columns(columns) => columns.get(position).copied()
        }
    }

    /// The document at `position` as pairs of term id and weight, ordered by term id.
    pub fn get(&self, position: usize) -> Option<SparseDocument<N>> {
        let column = self.matrix.outer_view(self.column_of(position)?)?;
        Some(
            column
                .iter()
                .filter(|(_, value)| !value.is_zero())
                .map(|(term_id, value)| (term_id, value.clone()))
                .collect()
        )
    }

    /// Selects documents by `index`, see [CorpusIndex] for the supported selectors.
    pub fn index<I: CorpusIndex<N>>(&self, index: I) -> I::Output {
        index.select_from(self)
    }

    fn with_positions(&self, positions: impl Iterator<Item=usize>) -> Result<Self, CorpusError> {
        let len = self.len();
        let columns = positions
            .map(|position| self.column_of(position).ok_or(CorpusError::IndexOutOfBounds { index: position, len }))
            .collect::<Result<Arc<[usize]>, _>>()?;
        Ok(
            Self {
                matrix: self.matrix.clone(),
                selection: Selection::Columns(columns)
            }
        )
    }

    fn with_clamped_range(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.len());
        let start = start.min(end);
        Self {
            matrix: self.matrix.clone(),
            selection: Selection::Columns((start..end).filter_map(|position| self.column_of(position)).collect())
        }
    }

    pub fn iter(&self) -> SparseCorpusIter<N> {
        SparseCorpusIter {
            corpus: self,
            position: 0
        }
    }

    /// Materializes the selected documents as `terms x documents` matrix.
    pub fn sparse(&self) -> CsMat<N> {
        match &self.selection {
            Selection::All => (*self.matrix).clone(),
            Selection::Columns(columns) => {
                let mut triplets = TriMat::new((self.num_terms(), columns.len()));
                for (new_col, &col) in columns.iter().enumerate() {
                    if let Some(view) = self.matrix.outer_view(col) {
                        for (row, value) in view.iter() {
                            triplets.add_triplet(row, new_col, value.clone());
                        }
                    }
                }
                triplets.to_csc()
            }
        }
    }

    /// Materializes the selected documents as dense `terms x documents` matrix.
    pub fn to_dense(&self) -> Array2<N> {
        let mut dense = Array2::from_elem((self.num_terms(), self.len()), N::zero());
        for (position, mut column) in dense.axis_iter_mut(Axis(1)).enumerate() {
            if let Some(doc) = self.get(position) {
                for (term_id, value) in doc {
                    column[term_id] = value;
                }
            }
        }
        dense
    }
}

/// A selector for the documents of a [SparseCorpus].
///
/// - `usize`: a single document
/// - ranges: a clamped slice of the documents, `..` selects everything
/// - lists and arrays of positions: the documents in the order of the list
pub trait CorpusIndex<N> {
    type Output;

    fn select_from(self, corpus: &SparseCorpus<N>) -> Self::Output;
}

impl<N> CorpusIndex<N> for usize where N: Clone + Zero + PartialEq {
    type Output = Option<SparseDocument<N>>;

    fn select_from(self, corpus: &SparseCorpus<N>) -> Self::Output {
        corpus.get(self)
    }
}

impl<N> CorpusIndex<N> for RangeFull where N: Clone + Zero + PartialEq {
    type Output = SparseCorpus<N>;

    fn select_from(self, corpus: &SparseCorpus<N>) -> Self::Output {
        corpus.clone()
    }
}

macro_rules! impl_range_index {
    ($($t:ty => |$range: ident, $len: ident| ($start: expr, $end: expr)),* $(,)?) => {
        $(
            impl<N> CorpusIndex<N> for $t where N: Clone + Zero + PartialEq {
                type Output = SparseCorpus<N>;

                fn select_from(self, corpus: &SparseCorpus<N>) -> Self::Output {
                    let $range = self;
                    let $len = corpus.len();
                    corpus.with_clamped_range($start, $end)
                }
            }
        )*
    };
}

impl_range_index! {
    Range<usize> => |range, _len| (range.start, range.end),
    RangeFrom<usize> => |range, len| (range.start, len),
    RangeTo<usize> => |range, _len| (0, range.end),
    RangeInclusive<usize> => |range, _len| (*range.start(), range.end().saturating_add(1)),
    RangeToInclusive<usize> => |range, _len| (0, range.end.saturating_add(1)),
}

impl<'a, N> CorpusIndex<N> for &'a [usize] where N: Clone + Zero + PartialEq {
    type Output = Result<SparseCorpus<N>, CorpusError>;

    fn select_from(self, corpus: &SparseCorpus<N>) -> Self::Output {
        corpus.with_positions(self.iter().copied())
    }
}

impl<'a, N> CorpusIndex<N> for &'a Vec<usize> where N: Clone + Zero + PartialEq {
    type Output = Result<SparseCorpus<N>, CorpusError>;

    fn select_from(self, corpus: &SparseCorpus<N>) -> Self::Output {
        self.as_slice().select_from(corpus)
    }
}

impl<N> CorpusIndex<N> for Vec<usize> where N: Clone + Zero + PartialEq {
    type Output = Result<SparseCorpus<N>, CorpusError>;

    fn select_from(self, corpus: &SparseCorpus<N>) -> Self::Output {
        self.as_slice().select_from(corpus)
    }
}

impl<N, const K: usize> CorpusIndex<N> for [usize; K] where N: Clone + Zero + PartialEq {
    type Output = Result<SparseCorpus<N>, CorpusError>;

    fn select_from(self, corpus: &SparseCorpus<N>) -> Self::Output {
        self.as_slice().select_from(corpus)
    }
}

impl<'a, N> CorpusIndex<N> for ArrayView1<'a, usize> where N: Clone + Zero + PartialEq {
    type Output = Result<SparseCorpus<N>, CorpusError>;

    fn select_from(self, corpus: &SparseCorpus<N>) -> Self::Output {
        corpus.with_positions(self.iter().copied())
    }
}

impl<N> CorpusIndex<N> for Array1<usize> where N: Clone + Zero + PartialEq {
    type Output = Result<SparseCorpus<N>, CorpusError>;

    fn select_from(self, corpus: &SparseCorpus<N>) -> Self::Output {
        self.view().select_from(corpus)
    }
}

/// Iterates the documents of a [SparseCorpus], can be restarted by calling [SparseCorpus::iter] again.
pub struct SparseCorpusIter<'a, N> {
    corpus: &'a SparseCorpus<N>,
    position: usize
}

impl<'a, N> Iterator for SparseCorpusIter<'a, N> where N: Clone + Zero + PartialEq {
    type Item = SparseDocument<N>;

    fn next(&mut self) -> Option<Self::Item> {
        let doc = self.corpus.get(self.position)?;
        self.position += 1;
        Some(doc)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.corpus.len().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl<'a, N> ExactSizeIterator for SparseCorpusIter<'a, N> where N: Clone + Zero + PartialEq {}

impl<'a, N> IntoIterator for &'a SparseCorpus<N> where N: Clone + Zero + PartialEq {
    type Item = SparseDocument<N>;
    type IntoIter = SparseCorpusIter<'a, N>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
