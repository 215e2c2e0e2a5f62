//! tieloop: a live-codable sequencing language for CV and MIDI hardware.

pub mod config;
pub mod dsl;
pub mod event;
pub mod output;

pub use config::Config;
pub use dsl::{CompileError, Compiler, Program};
pub use event::{Scheduler, SchedulerSettings};
pub use output::{DeviceRegistry, Output, OutputError};
