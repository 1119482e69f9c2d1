use heapless::Vec;
use log::{debug, error, info, warn};

use crate::{
    configs::CONTROL_DIAG_EP,
    messages::{ControlAck, ControlDiag, ForwardedDiag, Message},
    stack::{DataToSend, Qos, Received, SendResult, Stack, ANY_SINK, MAX_PAYLOAD},
    time::Duration,
    tlv,
    Error,
};

use super::{CONTROL_TYPE_ACK, CONTROL_TYPE_USER};


/// Writes the acknowledgment a router returns to control nodes
///
/// The acknowledgment is a [`ControlAck`] record, followed by a record of
/// application data if `user` is given. Returns the length written.
///
/// [`ControlAck`]: ../messages/struct.ControlAck.html
pub fn build_ack(buf: &mut [u8], otap_seq: u8, user: Option<&[u8]>)
    -> Result<usize, Error>
{
    let mut ack = [0; ControlAck::LEN];
    ControlAck { otap_seq }.encode(&mut ack)?;

    let offset = &mut 0;
    tlv::write_record(buf, offset, CONTROL_TYPE_ACK, &ack)?;
    if let Some(user) = user {
        tlv::write_record(buf, offset, CONTROL_TYPE_USER, user)?;
    }

    Ok(*offset)
}


/// A control router
///
/// Forwards diagnostics of control nodes to the sink, and holds the
/// acknowledgment handed to control nodes.
pub struct ControlRouter<S> {
    stack:       S,
    initialized: bool,
    ack:         Option<Vec<u8, MAX_PAYLOAD>>,
}

impl<S> ControlRouter<S>
    where S: Stack
{
    /// Create a new control router
    pub fn new(stack: S) -> Self {
        ControlRouter {
            stack,
            initialized: false,
            ack:         None,
        }
    }

    /// Check that the node has a role
    pub fn init(&mut self) -> Result<(), Error> {
        info!("Control router init");

        if self.stack.node_role().is_none() {
            error!("Node role not set");
            return Err(Error::InvalidRole);
        }

        self.initialized = true;
        Ok(())
    }

    /// Set the acknowledgment handed to control nodes
    pub fn set_ack(&mut self, otap_seq: u8, user: Option<&[u8]>)
        -> Result<(), Error>
    {
        let mut buf = [0; MAX_PAYLOAD];
        let len = build_ack(&mut buf, otap_seq, user)?;

        let mut ack = Vec::new();
        ack.extend_from_slice(&buf[..len])
            .map_err(|_| Error::BufferTooSmall { required_len: len })?;
        self.ack = Some(ack);

        Ok(())
    }

    /// The acknowledgment for control nodes, once one was set
    pub fn ack_data(&self) -> Option<&[u8]> {
        self.ack.as_deref()
    }

    /// Call when the stack received a packet for the application
    ///
    /// Forwards control node diagnostics to the sink and returns `true` for
    /// them. Other packets are left alone.
    pub fn on_data_received(&mut self, data: &Received) -> bool {
        if !self.initialized
            || data.src_endpoint != CONTROL_DIAG_EP
            || data.dest_endpoint != CONTROL_DIAG_EP
        {
            return false;
        }

        if data.bytes.len() != ControlDiag::LEN {
            error!("Invalid diagnostics length: {}", data.bytes.len());
        }

        let diag = match ControlDiag::decode(data.bytes) {
            Ok(diag) => diag,
            Err(error) => {
                warn!("Dropping diagnostics from {:#x}: {:?}", data.src_address, error);
                return true;
            }
        };

        let forwarded = ForwardedDiag {
            address: data.src_address,
            diag,
        };

        let mut buf = [0; ForwardedDiag::LEN];
        let result = match forwarded.encode(&mut buf) {
            Ok(len) => self.stack.send_data(&DataToSend {
                bytes:         &buf[..len],
                dest_address:  ANY_SINK,
                src_endpoint:  CONTROL_DIAG_EP,
                dest_endpoint: CONTROL_DIAG_EP,
                qos:           Qos::Normal,
                delay:         Duration::ZERO,
                tracking_id:   None,
            }),
            Err(error) => {
                warn!("Failed to encode diagnostics: {:?}", error);
                return true;
            }
        };

        if result == SendResult::Success {
            debug!("Forwarded diagnostics of {:#x}", data.src_address);
        }
        else {
            debug!("Forwarding diagnostics failed: {:?}", result);
        }

        true
    }

    /// Reference to the stack
    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// Mutable reference to the stack
    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }
}
