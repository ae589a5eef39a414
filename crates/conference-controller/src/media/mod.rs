//! Media relay model.

pub mod frame;
pub mod router;

pub use router::{Delivery, MediaRouter, Track, TrackKind, TrackRole};
