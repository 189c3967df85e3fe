//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `depot_core` linkage.
//! - Keep output deterministic for quick local sanity checks.

fn main() {
    println!("depot_core ping={}", depot_core::ping());
    println!("depot_core version={}", depot_core::core_version());
}
