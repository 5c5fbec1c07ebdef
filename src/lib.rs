#![deny(unsafe_code)]
#![deny(warnings)]
#![deny(unused_must_use)]
#![deny(unexpected_cfgs)]

pub mod accumulator;
pub mod clock;
pub mod config;
pub mod controller;
pub mod energy;
pub mod error;
pub mod host_cpu;
pub mod logging;
pub mod probe;
pub mod process_cpu;
pub mod reader;
pub mod report;
pub mod scheduler;
