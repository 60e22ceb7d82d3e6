use thiserror::Error;

use kinelink_types::KineError;

/// Errors raised while assembling or running the control side.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Tick rate must be between 1 and {max} Hz (got {got})")]
    InvalidTickRate { got: u32, max: u32 },

    #[error(transparent)]
    Link(#[from] KineError),
}
