//! Engine primitives for shared listening sessions: the playback state
//! machine, the round-robin presenter scheduler, and the clock-sync
//! protocol contract. No I/O lives here; transports drive these types and
//! fan their output back to clients.

mod config;
mod track;
mod util;

pub mod clock;
mod playback;
mod scheduling;

pub use config::*;
pub use playback::*;
pub use scheduling::*;
pub use track::*;
pub use util::*;
