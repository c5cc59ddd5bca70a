//! Rule modules shipped with the crate.

pub mod number_guesser;

pub use number_guesser::NumberGuesser;
