//! Core identifiers, deterministic RNG, and attribute value coding.

pub mod ids;
pub mod rng;
pub mod value;

pub use ids::{SessionId, UserId};
pub use rng::GameRng;
pub use value::{cmp_values, decode_attr, encode_attr};
