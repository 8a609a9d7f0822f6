//! Concrete scene object types.

mod character;
mod crab;

pub use character::{Character, CharacterState, Gesture};
pub use crab::Crab;
