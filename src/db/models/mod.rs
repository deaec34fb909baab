pub mod round;

pub use round::{NewRound, RoundRecord, RoundSource};
