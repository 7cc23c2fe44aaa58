pub mod controller;
pub mod state;

pub use controller::FocusController;
pub use state::{FocusTimer, FocusTimerState, SharedTimer};
