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

/// A trait that allows to check, if a number is usable for ordering, i.e. not Infinity or NaN.
pub trait IsNormalNumber: Copy {
    /// Returns true if the number is finite and not something like Infinity or NaN.
    fn is_normal_number(self) -> bool;
}

macro_rules! impl_is_normal_number {
    (for integer: $($t:ident),*) => {
        $(
            impl IsNormalNumber for $t {
                #[inline(always)]
                fn is_normal_number(self) -> bool {
                    true
                }
            }
        )*
    };
    (for float: $($t:ident),*) => {
        $(
            impl IsNormalNumber for $t {
                #[inline(always)]
                fn is_normal_number(self) -> bool {
                    self.is_finite()
                }
            }
        )*
    };
}

impl_is_normal_number!(for integer: u8, i8, u16, i16, u32, i32, u64, i64, u128, i128, usize, isize);
impl_is_normal_number!(for float: f32, f64);

/// Orders `a` before `b` if `a` is bigger. Numbers that are not normal are sorted to the end.
pub fn cmp_descending<T>(a: T, b: T) -> Ordering where T: IsNormalNumber + PartialOrd {
    match b.partial_cmp(&a) {
        Some(ordering) => ordering,
        None => {
            match (a.is_normal_number(), b.is_normal_number()) {
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                _ => Ordering::Equal
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::cmp::Ordering;
    use crate::normal_number::{cmp_descending, IsNormalNumber};

    #[test]
    fn detects_unusable_floats(){
        assert!(0.0f64.is_normal_number());
        assert!(1.5f32.is_normal_number());
        assert!(!f64::NAN.is_normal_number());
        assert!(!f32::INFINITY.is_normal_number());
        assert!(7u8.is_normal_number());
    }

    #[test]
    fn descending_puts_nan_last(){
        let mut values = vec![0.5, f64::NAN, 2.0, 1.0];
        values.sort_by(|a, b| cmp_descending(*a, *b));
        assert_eq!(&values[..3], &[2.0, 1.0, 0.5]);
        assert!(values[3].is_nan());
        assert_eq!(cmp_descending(1, 1), Ordering::Equal);
    }
}
