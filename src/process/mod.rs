//! Child process management for supervised applications.
//!
//! This module handles launching the application in its own OS process and
//! tearing that process down again. The supervisor only sees the
//! [`Launcher`] and [`ChildProcess`] traits, so tests can drive the restart
//! state machine with fake children.
//!
//! ## Module Structure
//!
//! - `child`: process trait, OS implementation and the supervisor's handle
//! - `launcher`: spawning workers by re-executing the current program
//! - `stop`: the SIGINT, wait, SIGKILL, wait sequence

mod child;
mod launcher;
mod stop;


pub use child::{ChildExit, ChildHandle, ChildProcess, OsChild};
pub use launcher::{Launcher, ProcessLauncher};
pub use stop::{StopOutcome, StopPolicy, stop_child};
