// locus_core/src/lib.rs

// This file defines the public modules of the library.
pub mod bridge;
pub mod conversions;
pub mod diagnostics;
pub mod error;
pub mod estimation;
pub mod messages;
pub mod observations;
pub mod params;
pub mod prelude;
pub mod updaters;
