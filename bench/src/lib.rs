//! Benchmark-only crate; see `benches/farm_bench.rs`.
