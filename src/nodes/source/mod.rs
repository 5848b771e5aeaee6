mod player;
mod tone;

pub use player::*;
pub use tone::*;
