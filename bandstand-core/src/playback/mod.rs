mod engine;
mod timer;

pub use engine::*;
pub use timer::*;
