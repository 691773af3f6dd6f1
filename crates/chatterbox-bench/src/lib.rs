//! Benchmark-only crate; the interesting parts live under `benches/`.
