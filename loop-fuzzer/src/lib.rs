// Copyright (C) 2025 Zihan Li and Ethan Uppal.

pub mod fuzzer;
pub mod oracle;

pub use fuzzer::{Fuzzer, FuzzerBuilder};
pub use oracle::RegionOracle;
