//! Repository implementations for database operations

pub mod alerts;
pub mod quality;
pub mod runs;
pub mod snapshots;
pub mod watchlist;

pub use alerts::*;
pub use quality::*;
pub use runs::*;
pub use snapshots::*;
pub use watchlist::*;
