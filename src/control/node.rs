use heapless::Vec;
use log::{debug, error, info, warn};

use crate::{
    configs::{ControlNodeConfig, CONTROL_DIAG_EP, DIRADV_EP_DEST, DIRADV_EP_SRC_ACK},
    messages::{ControlAck, ControlDiag, Message},
    scheduler::Schedule,
    stack::{
        Address,
        AdvertiserOptions,
        DataToSend,
        Qos,
        Received,
        Role,
        SendResult,
        SentStatus,
        Stack,
        MAX_PAYLOAD,
    },
    time::{Duration, Instant},
    tlv::Records,
    Error,
};

use super::{da_router, CONTROL_TYPE_ACK, CONTROL_TYPE_USER, MIN_DIAG_PERIOD_MS, NO_OTAP_SEQ};


/// Tracking id of diagnostics packets
///
/// Applications must not use it for their own packets.
pub const DIAG_TRACKING_ID: u8 = 0xff;


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ControlState {
    Uninitialized,
    Idle,
    Busy,
}

/// One of the two routes a packet can take
#[derive(Clone, Copy, Debug, Default)]
struct Route {
    address: Option<Address>,
    sent:    bool,
    ack:     bool,
    end:     bool,
}

/// The packet being sent, kept for the backup route
#[derive(Debug)]
struct Pending {
    bytes:         Vec<u8, MAX_PAYLOAD>,
    src_endpoint:  u8,
    dest_endpoint: u8,
    qos:           Qos,
    tracking_id:   Option<u8>,
}

#[derive(Clone, Copy, Debug, Default)]
struct DiagInfo {
    success:   u16,
    error:     u16,
    sent_at:   Option<Instant>,
    timing_us: u32,
}


/// A control node
///
/// Sends one application packet at a time through the best
/// directed-advertiser router, falling back to a backup router.
pub struct ControlNode<S> {
    stack:  S,
    config: ControlNodeConfig,
    state:  ControlState,

    routes:    [Route; 2],
    pending:   Pending,
    time_sent: Instant,
    reported:  bool,

    diag: DiagInfo,
}

impl<S> ControlNode<S>
    where S: Stack
{
    /// Create a new control node
    ///
    /// Nothing can be sent until [`ControlNode::init`] succeeded.
    pub fn new(stack: S, config: ControlNodeConfig) -> Self {
        let time_sent = stack.now();

        ControlNode {
            stack,
            config,
            state: ControlState::Uninitialized,

            routes: [Route::default(); 2],
            pending: Pending {
                bytes:         Vec::new(),
                src_endpoint:  0,
                dest_endpoint: 0,
                qos:           Qos::Normal,
                tracking_id:   None,
            },
            time_sent,
            reported: true,

            diag: DiagInfo::default(),
        }
    }

    /// Check the node role and configure the directed-advertiser service
    ///
    /// The node must already have the advertiser role. Returns the schedule
    /// of the diagnostics task, [`Schedule::Stop`] if diagnostics are
    /// disabled.
    pub fn init(&mut self) -> Result<Schedule, Error> {
        info!("Control node init: {:?}", self.config);

        if let Some(period) = self.config.diag_period_ms {
            if period < MIN_DIAG_PERIOD_MS {
                warn!("Diagnostics period too short ({} ms), disabled", period);
                self.config.diag_period_ms = None;
            }
        }

        match self.stack.node_role() {
            Some(Role::Advertiser) => {}
            role => {
                error!("Wrong node role: {:?}", role);
                return Err(Error::InvalidRole);
            }
        }

        self.diag = DiagInfo::default();

        self.stack
            .set_advertiser_options(AdvertiserOptions { follow_network: true })?;
        self.stack
            .set_queuing_time(Duration::from_millis(self.config.packet_ttl_ms))?;

        if self.state == ControlState::Uninitialized {
            self.state = ControlState::Idle;
        }

        Ok(self.diag_schedule())
    }

    /// Send a packet through the best directed-advertiser router
    ///
    /// The destination address of `data` is ignored. Only one packet can be
    /// in flight; this returns [`Error::InvalidState`] while one is.
    ///
    /// If the primary router refuses the packet, it is sent to the backup
    /// router right away. Otherwise, the backup router gets it when the
    /// returned schedule of [`ControlNode::timeout_task`] expires.
    pub fn send(&mut self, data: &DataToSend) -> Result<Schedule, Error> {
        if self.state != ControlState::Idle {
            error!("Send in state {:?}", self.state);
            return Err(Error::InvalidState);
        }
        if data.bytes.is_empty() || data.bytes.len() > MAX_PAYLOAD {
            error!("Invalid payload length: {}", data.bytes.len());
            return Err(Error::InvalidParam);
        }

        self.pending.bytes.clear();
        self.pending
            .bytes
            .extend_from_slice(data.bytes)
            .map_err(|_| Error::InvalidParam)?;
        self.pending.src_endpoint  = data.src_endpoint;
        self.pending.dest_endpoint = data.dest_endpoint;
        self.pending.qos           = data.qos;
        self.pending.tracking_id   = data.tracking_id;

        self.state     = ControlState::Busy;
        self.time_sent = self.stack.now();
        self.reported  = false;

        let primary = da_router(&self.stack, None);
        let backup  = da_router(&self.stack, primary);
        debug!("Primary route {:?}, backup route {:?}", primary, backup);

        self.routes = [
            Route { address: primary, ..Route::default() },
            Route { address: backup, ..Route::default() },
        ];

        self.routes[0].sent = true;
        let result = self.transmit(0);
        if result != SendResult::Success {
            warn!("Sending failed ({:?}), trying backup route", result);
            self.routes[0].end  = true;
            self.routes[1].sent = true;

            let result = self.transmit(1);
            if result != SendResult::Success {
                warn!("Sending to backup route failed ({:?})", result);
                self.state = ControlState::Idle;
                return Err(Error::Send(result));
            }
        }

        Ok(Schedule::after_ms(self.config.packet_ttl_ms / 2))
    }

    /// Sends the pending packet to the backup router
    ///
    /// Does nothing if the primary router already reported back or the backup
    /// router already has the packet.
    pub fn timeout_task(&mut self) -> Schedule {
        if self.state != ControlState::Busy
            || self.routes[0].end
            || self.routes[1].sent
        {
            return Schedule::Stop;
        }

        warn!("Timeout, sending to backup route");

        self.routes[1].sent = true;
        let result = self.transmit(1);
        if result != SendResult::Success {
            warn!("Sending to backup route failed ({:?})", result);
            self.routes[1].end = true;
        }

        Schedule::Stop
    }

    /// Call when the stack reports the delivery status of a packet
    ///
    /// Returns the status to hand to the application. That happens once per
    /// packet: on the first success, or when both routes failed.
    pub fn on_data_sent(&mut self, status: &SentStatus) -> Option<SentStatus> {
        if status.tracking_id == Some(DIAG_TRACKING_ID) {
            self.diag_sent(status.success);
            return None;
        }

        if self.state != ControlState::Busy {
            error!("Delivery status while not sending");
            return None;
        }

        let dest = Some(status.dest_address);
        if dest == self.routes[0].address {
            self.routes[0].end = true;

            if !self.routes[1].sent {
                if status.success {
                    self.routes[1].end = true;
                }
                else {
                    warn!("Primary route failed, trying backup route");
                    self.routes[1].sent = true;
                    let result = self.transmit(1);
                    if result != SendResult::Success {
                        error!("Sending to backup route failed ({:?})", result);
                        self.routes[1].end = true;
                    }
                }
            }
        }
        else if dest == self.routes[1].address {
            self.routes[1].end = true;
        }
        else {
            error!("Delivery status for unknown route {:#x}", status.dest_address);
            for route in self.routes.iter_mut() {
                route.end = true;
                route.ack = true;
            }
        }

        let finished = self.routes[0].end && self.routes[1].end;

        let mut report = None;
        if (status.success || finished) && !self.reported {
            self.reported = true;
            report = Some(*status);
        }

        if finished {
            self.state = ControlState::Idle;
        }

        report
    }

    /// Call when the stack received a packet for the application
    ///
    /// Processes router acknowledgments and returns the application data
    /// they carry, if any. A scratchpad the acknowledgment asks for is marked
    /// for processing and the stack stopped. Duplicate acknowledgments of the
    /// same packet are ignored.
    pub fn on_data_received<'a>(&mut self, data: &Received<'a>) -> Option<&'a [u8]> {
        if data.src_endpoint != DIRADV_EP_SRC_ACK
            || data.dest_endpoint != DIRADV_EP_DEST
        {
            return None;
        }

        let from = Some(data.src_address);
        let for_packet = self
            .routes
            .iter()
            .any(|route| route.address == from && !route.end);

        if for_packet {
            if self.routes.iter().any(|route| route.ack) {
                debug!("Duplicate acknowledgment");
                return None;
            }
            for route in self.routes.iter_mut() {
                route.ack = true;
            }
            debug!("Acknowledgment ({} bytes)", data.bytes.len());
        }
        else {
            debug!("Acknowledgment of diagnostics ({} bytes)", data.bytes.len());
        }

        let mut user = None;
        for record in Records::new(data.bytes) {
            let record = match record {
                Ok(record) => record,
                Err(error) => {
                    warn!("Invalid acknowledgment: {:?}", error);
                    break;
                }
            };

            match record.kind {
                CONTROL_TYPE_USER => {
                    user = Some(record.value);
                }
                CONTROL_TYPE_ACK => match ControlAck::decode(record.value) {
                    Ok(ack) => self.process_scratchpad(ack.otap_seq),
                    Err(error) => warn!("Invalid control ack: {:?}", error),
                },
                kind => {
                    warn!("Unknown acknowledgment record type {}", kind);
                }
            }
        }

        user
    }

    /// The diagnostics task
    ///
    /// Sends a [`ControlDiag`] to the best router.
    pub fn diag_task(&mut self) -> Schedule {
        if self.state == ControlState::Uninitialized {
            return Schedule::Stop;
        }

        let otap = self.stack.otap();
        let diag = ControlDiag {
            voltage_mv:      self.stack.supply_voltage_mv(),
            proc_otap_seq:   otap.processed_seq,
            stored_otap_seq: otap.seq,
            success:         self.diag.success,
            error:           self.diag.error,
            timing_us:       self.diag.timing_us,
        };
        debug!("Sending diagnostics: {:?}", diag);

        let mut buf = [0; ControlDiag::LEN];
        let result = match (diag.encode(&mut buf), da_router(&self.stack, None)) {
            (Ok(len), Some(router)) => self.stack.send_data(&DataToSend {
                bytes:         &buf[..len],
                dest_address:  router,
                src_endpoint:  CONTROL_DIAG_EP,
                dest_endpoint: CONTROL_DIAG_EP,
                qos:           Qos::Normal,
                delay:         Duration::ZERO,
                tracking_id:   Some(DIAG_TRACKING_ID),
            }),
            (Err(error), _) => {
                warn!("Failed to encode diagnostics: {:?}", error);
                SendResult::InvalidNumBytes
            }
            (_, None) => SendResult::InvalidDestAddress,
        };

        if result == SendResult::Success {
            self.diag.sent_at = Some(self.stack.now());
        }
        else {
            error!("Sending diagnostics failed ({:?})", result);
            self.diag.sent_at   = None;
            self.diag.error     = self.diag.error.wrapping_add(1);
            self.diag.timing_us = u32::MAX;
        }

        self.diag_schedule()
    }

    /// Whether a packet is in flight
    pub fn is_busy(&self) -> bool {
        self.state == ControlState::Busy
    }

    /// The configuration, after [`ControlNode::init`] validated it
    pub fn config(&self) -> &ControlNodeConfig {
        &self.config
    }

    /// Reference to the stack
    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// Mutable reference to the stack
    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    fn diag_schedule(&self) -> Schedule {
        match self.config.diag_period_ms {
            Some(period) => Schedule::after_ms(period),
            None         => Schedule::Stop,
        }
    }

    fn transmit(&mut self, route: usize) -> SendResult {
        let address = match self.routes[route].address {
            Some(address) => address,
            None          => return SendResult::InvalidDestAddress,
        };

        // Time spent on earlier attempts counts as travel time
        let delay = self.stack.now().duration_since(self.time_sent);

        self.stack.send_data(&DataToSend {
            bytes:         &self.pending.bytes,
            dest_address:  address,
            src_endpoint:  self.pending.src_endpoint,
            dest_endpoint: self.pending.dest_endpoint,
            qos:           self.pending.qos,
            delay,
            tracking_id:   self.pending.tracking_id,
        })
    }

    fn diag_sent(&mut self, success: bool) {
        if success {
            self.diag.success = self.diag.success.wrapping_add(1);
            if let Some(sent_at) = self.diag.sent_at.take() {
                let micros = self.stack.now().duration_since(sent_at).as_micros();
                self.diag.timing_us = micros.min(u64::from(u32::MAX)) as u32;
            }
        }
        else {
            self.diag.error     = self.diag.error.wrapping_add(1);
            self.diag.timing_us = u32::MAX;
        }
    }

    fn process_scratchpad(&mut self, otap_seq: u8) {
        let otap = self.stack.otap();
        debug!("Control ack: otap_seq {}, scratchpad {:?}", otap_seq, otap);

        if otap_seq == NO_OTAP_SEQ || !otap.needs_processing(otap_seq) {
            return;
        }

        match self.stack.set_otap_to_be_processed() {
            Ok(()) => {
                info!("Processing scratchpad {}, rebooting", otap_seq);
                self.stack.stop_stack();
            }
            Err(error) => {
                warn!("Failed to mark scratchpad: {:?}", error);
            }
        }
    }
}
