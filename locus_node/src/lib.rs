// locus_node/src/lib.rs

// The runtime around `locus_core`: message delivery, health monitoring,
// configuration and the synthetic sensor sources used by the binary.
pub mod bus;
pub mod cli;
pub mod clock;
pub mod config;
pub mod health;
pub mod sim;
