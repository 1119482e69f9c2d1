//! Fixed-layout messages exchanged by tags, routers and control nodes
//!
//! All messages are little-endian with no padding, matching the packed
//! structures used by the C applications running on the same network. This
//! module defines the messages, and provides code for encoding and decoding
//! them. It is left to the protocol objects to send them at the right time.
//!
//! Messages flow as follows:
//! 1. A tag sends its [`TagData`] to a router it heard a beacon from.
//! 2. The router answers on the link layer with its configured
//!    [`TagAckConfig`].
//! 3. The router aggregates the data of many tags and forwards it to the sink
//!    (see the [`aggregate`] module).
//! 4. Control nodes send [`ControlDiag`] to a router, which forwards it to the
//!    sink as [`ForwardedDiag`].
//!
//! [`aggregate`]: ../aggregate/index.html

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use ssmarshal;

use crate::{stack::Address, Error};


/// Type byte of the tag telemetry record
pub const ADV_TYPE0: u8 = 0;

/// Magic byte that starts a valid router app config
pub const APP_CONFIG_MAGIC: u8 = 0xAD;


/// Implemented by all fixed-layout messages
pub trait Message: Sized + for<'de> Deserialize<'de> + Serialize {
    /// The length of the encoded message
    const LEN: usize;

    /// Encodes this message into the beginning of `buf`
    ///
    /// Returns the number of bytes written.
    fn encode(&self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.len() < Self::LEN {
            return Err(Error::BufferTooSmall {
                required_len: Self::LEN,
            });
        }

        Ok(ssmarshal::serialize(&mut buf[..Self::LEN], self)?)
    }

    /// Decodes a message of this type from the beginning of `bytes`
    ///
    /// Trailing bytes are ignored.
    fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < Self::LEN {
            return Err(Error::BufferTooSmall {
                required_len: Self::LEN,
            });
        }

        let (message, _) = ssmarshal::deserialize::<Self>(&bytes[..Self::LEN])?;
        Ok(message)
    }
}


/// Value forwarded to the sink for each tag in an aggregate packet
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PayloadType {
    /// Received signal strength of the router's beacon at the tag
    Rssi = 2,
    /// Sequence of the scratchpad the tag last processed
    ProcessedOtapSeq = 3,
    /// Sequence of the scratchpad the tag has stored
    StoredOtapSeq = 4,
    /// Supply voltage of the tag
    Voltage = 5,
    /// Low byte of the tag's cycle sequence number
    Sequence = 6,
}


/// Telemetry record a tag sends once per advertising cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[repr(C)]
pub struct TagData {
    /// Record type, always [`ADV_TYPE0`]
    pub kind: u8,

    /// Signal strength of the target router's beacon
    pub rssi: i8,

    /// Advertising cycle sequence number
    pub seq: u16,

    /// Supply voltage in millivolts
    pub voltage_mv: u16,

    /// Sequence of the scratchpad last processed
    pub proc_otap_seq: u8,

    /// Sequence of the scratchpad stored
    pub stored_otap_seq: u8,

    /// Scans started since the last acknowledged cycle
    pub scan_count: u8,

    /// Sends attempted in this cycle
    pub send_count: u8,
}

impl Message for TagData {
    const LEN: usize = 10;
}


/// Configuration a router hands to tags in its link-layer acknowledgment
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[repr(C)]
pub struct TagAckConfig {
    /// Advertising period in seconds, 0 to keep the current one
    pub period_s: u16,

    /// Maximum scan time in units of 10 ms, 0 to keep the current one
    pub max_scan_time: u8,

    /// Sequence of the scratchpad tags should process
    pub otap_seq: u8,
}

impl Message for TagAckConfig {
    const LEN: usize = 4;
}


/// Router configuration distributed through the network's app config
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[repr(C)]
pub struct RouterAppConfig {
    /// Must be [`APP_CONFIG_MAGIC`]
    pub magic: u8,

    /// Acknowledgment handed to tags
    pub ack: TagAckConfig,

    /// Send check interval in units of 10 ms, 0 to keep the current one
    pub send_check: u8,

    /// Aggregation timeout in units of 100 ms, 0 to keep the current one
    pub send_timeout: u8,

    /// Raw [`PayloadType`]; unknown values keep the current one
    pub payload_type: u8,
}

impl Message for RouterAppConfig {
    const LEN: usize = 8;
}


/// Diagnostics a control node sends periodically
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[repr(C)]
pub struct ControlDiag {
    /// Supply voltage in millivolts
    pub voltage_mv: u16,

    /// Sequence of the scratchpad last processed
    pub proc_otap_seq: u8,

    /// Sequence of the scratchpad stored
    pub stored_otap_seq: u8,

    /// Diagnostics packets delivered
    pub success: u16,

    /// Diagnostics packets that failed
    pub error: u16,

    /// Time from sending the previous diagnostics to its delivery, `u32::MAX`
    /// if it was not delivered
    pub timing_us: u32,
}

impl Message for ControlDiag {
    const LEN: usize = 12;
}


/// Diagnostics of a control node, as forwarded by a router to the sink
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[repr(C)]
pub struct ForwardedDiag {
    /// Address of the control node
    pub address: Address,

    /// The diagnostics it sent
    pub diag: ControlDiag,
}

impl Message for ForwardedDiag {
    const LEN: usize = 4 + ControlDiag::LEN;
}


/// Control payload of an acknowledgment sent to control nodes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[repr(C)]
pub struct ControlAck {
    /// Sequence of the scratchpad to process, [`NO_OTAP_SEQ`] for none
    ///
    /// [`NO_OTAP_SEQ`]: ../control/constant.NO_OTAP_SEQ.html
    pub otap_seq: u8,
}

impl Message for ControlAck {
    const LEN: usize = 1;
}
