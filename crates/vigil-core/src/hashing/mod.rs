//! Módulo de hashing para el mecanismo de delta.

pub mod hash;

pub use hash::{corpus_fingerprint, hash_hex, short_hash};
