//! Umbrella crate for the ANPR workspace; integration tests live in `tests/`.

pub use anpr_service;
pub use common;
