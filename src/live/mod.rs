//! Live session broadcasting to the OS display surface.

mod broadcaster;
mod content;
mod surface;

pub use broadcaster::{BroadcasterPhase, LiveSessionBroadcaster, TICK_INTERVAL};
pub use content::{LiveContent, LiveUpdate};
pub use surface::{DismissalPolicy, LiveSurface, LogSurface};
