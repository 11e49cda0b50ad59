//! Schema descriptor and object value types.
//!
//! # Responsibility
//! - Describe entities and their typed attributes (`schema`).
//! - Define the values and records a context moves between memory and
//!   the store (`object`).
//!
//! # Invariants
//! - A loaded `ObjectModel` is validated and never mutated afterwards.
//! - Every managed object is identified by a stable `ObjectId`.

pub mod object;
pub mod schema;
