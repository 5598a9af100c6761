pub mod controller;
pub mod state;
mod ticker;

pub use controller::{EngineParts, TimerController, TimerSnapshot};
pub use state::{next_break, CompletedPhase, TimerMode, TimerState};
