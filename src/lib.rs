//! Firmhub - Over-the-air firmware distribution for ESP devices
//!
//! Mirrors the GitHub releases of a firmware project into a checksum-verified
//! local store and answers ESP HTTP-update polls with either `304 Not Modified`
//! or the newest verified image.

pub mod engine;
