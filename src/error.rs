use crate::stack::{SendResult, StackError};
use ssmarshal;

/// An error that can occur while running the advertiser protocol
#[derive(Debug)]
pub enum Error {
    /// An error occured while serializing or deserializing a fixed-layout
    /// message
    Ssmarshal(ssmarshal::Error),

    /// An error occured while packing or unpacking a variable-length payload
    Byte(byte::Error),

    /// Buffer too small
    BufferTooSmall {
        /// Indicates how large a buffer would have been required
        required_len: usize,
    },

    /// The payload is not a message of the expected type
    UnexpectedMessage,

    /// The operation is not allowed in the current state
    InvalidState,

    /// Invalid parameters were passed
    InvalidParam,

    /// The node has the wrong role for this operation
    InvalidRole,

    /// The stack refused to queue a packet
    Send(SendResult),

    /// A stack service returned an error
    Stack(StackError),

    /// No free slot left in the task scheduler
    SchedulerFull,
}

impl From<ssmarshal::Error> for Error {
    fn from(error: ssmarshal::Error) -> Self {
        Error::Ssmarshal(error)
    }
}

impl From<byte::Error> for Error {
    fn from(error: byte::Error) -> Self {
        Error::Byte(error)
    }
}

impl From<StackError> for Error {
    fn from(error: StackError) -> Self {
        Error::Stack(error)
    }
}
