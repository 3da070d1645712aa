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

use serde::{Deserialize, Serialize};

/// Either a single value or a vec of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SingleOrVec<T> {
    Single(#[serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>"))] T),
    Vec(#[serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>"))] Vec<T>),
}

impl<T> SingleOrVec<T> {
    pub fn to_vec(self) -> Vec<T> {
        match self {
            SingleOrVec::Single(value) => {vec![value]}
            SingleOrVec::Vec(value) => {value}
        }
    }

    pub fn as_single(&self) -> Option<&T> {
        if let Self::Single(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_vec(&self) -> Option<&Vec<T>> {
        if let Self::Vec(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn is_single(&self) -> bool {
        matches!(self, Self::Single(_))
    }

    /// Applies `f` to every contained value while keeping the shape.
    pub fn map<R, F: FnMut(T) -> R>(self, mut f: F) -> SingleOrVec<R> {
        match self {
            SingleOrVec::Single(value) => SingleOrVec::Single(f(value)),
            SingleOrVec::Vec(values) => SingleOrVec::Vec(values.into_iter().map(f).collect())
        }
    }
}

impl<T> AsRef<[T]> for SingleOrVec<T> {
    fn as_ref(&self) -> &[T] {
        match self {
            SingleOrVec::Single(value) => {
                std::slice::from_ref(value)
            }
            SingleOrVec::Vec(values) => {
                values.as_slice()
            }
        }
    }
}

impl<T> From<Vec<T>> for SingleOrVec<T> {
    fn from(value: Vec<T>) -> Self {
        Self::Vec(value)
    }
}

impl<T> From<T> for SingleOrVec<T> {
    fn from(value: T) -> Self {
        Self::Single(value)
    }
}

#[cfg(test)]
mod test {
    use crate::single_or_vec::SingleOrVec;

    #[test]
    fn nested_vectors_are_told_apart(){
        let doc: Vec<(usize, f64)> = vec![(0, 1.0), (3, 2.0)];
        let single: SingleOrVec<Vec<(usize, f64)>> = doc.clone().into();
        assert!(single.is_single());
        let many: SingleOrVec<Vec<(usize, f64)>> = vec![doc.clone(), doc].into();
        assert!(!many.is_single());
        assert_eq!(2, many.as_ref().len());
    }

    #[test]
    fn map_keeps_the_shape(){
        let value = SingleOrVec::Vec(vec![1, 2, 3]).map(|v| v * 2);
        assert_eq!(Some(&vec![2, 4, 6]), value.as_vec());
        let value = SingleOrVec::Single(4).map(|v| v + 1);
        assert_eq!(Some(&5), value.as_single());
        assert_eq!(vec![5], value.to_vec());
    }

    #[test]
    fn serializes_untagged(){
        let value: SingleOrVec<u32> = SingleOrVec::Vec(vec![1, 2]);
        assert_eq!("[1,2]", serde_json::to_string(&value).unwrap());
        let back: SingleOrVec<u32> = serde_json::from_str("7").unwrap();
        assert_eq!(SingleOrVec::Single(7), back);
    }
}
