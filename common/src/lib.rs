//! Shared types for the levelwatch monitoring stack
//!
//! Pure data definitions used across the feed connector and the level
//! monitor: normalized price ticks, structural level descriptions, and the
//! interaction events the detector emits. No I/O lives here.

pub mod events;
pub mod levels;
pub mod market;

pub use events::{InteractionKind, LevelInteraction};
pub use levels::{LevelKind, LevelPriority, StructuralLevel};
pub use market::{PriceTick, TradeSide};
