//! Config-file driven runner for the courier dispatch engine

pub mod controller;
pub mod intake;
