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


//! An online non-negative matrix factorization topic model with sparse corpora,
//! coherence based topic ranking and memory mappable persistence.

pub mod math;
pub mod corpus;
pub mod vocabulary;
pub mod model;
pub mod io;
pub mod enums;
