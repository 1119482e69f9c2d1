//! Inventory tag
//!
//! A tag is a battery-powered directed advertiser. Once per period it wakes
//! up, scans for routers that accept directed-advertiser traffic, sends its
//! [`TagData`] to the first one it hears, and waits for the router's
//! link-layer acknowledgment. The acknowledgment carries a [`TagAckConfig`]
//! that updates the tag's period, scan time and target scratchpad.
//!
//! The advertiser is a state machine driven by two tasks:
//!
//! - The main task runs once per period. It wakes the advertiser and does the
//!   scratchpad check. See [`Tag::main_task`].
//! - The advertiser task runs whenever the state machine has something to do.
//!   See [`Tag::advertiser_task`].
//!
//! Events from the stack are fed in through the `on_*` methods. Each returns
//! `true` if the advertiser task should run as soon as possible.
//!
//! [`TagApp`] wires both tasks up to a [`Scheduler`].

use core::num::Wrapping;

use embedded_hal::blocking::rng;
use heapless::Vec;
use log::{debug, info, warn};

use crate::{
    configs::{TagConfig, DIRADV_EP_DEST, DIRADV_EP_SRC_ACK, DIRADV_EP_SRC_DATA},
    messages::{Message, TagAckConfig, TagData, ADV_TYPE0},
    scheduler::{Schedule, Scheduler},
    stack::{
        Beacon,
        DataToSend,
        Qos,
        Received,
        Role,
        SendResult,
        SentStatus,
        Stack,
    },
    time::{Duration, Instant},
    util::Jitter,
    Error,
};


/// Default number of router beacons collected before a scan is stopped
pub const MAX_BEACONS: u8 = 1;

/// Maximum number of scans in one advertising cycle that finds no router
pub const MAX_SCAN_RETRY: u8 = 4;

/// Scan failure budget of one advertising cycle
///
/// Each scan without a usable router takes two from it.
pub const MAX_SCAN_FAILURES: u8 = 2 * MAX_SCAN_RETRY;

/// Maximum number of sends in one advertising cycle
pub const MAX_SEND_RETRY: u8 = 2;

/// Delay before scanning again after a failure, in milliseconds
pub const TIMEOUT_SCAN_RETRY_MS: u32 = 50;

/// How long to wait for the end of a scan, in milliseconds
pub const TIMEOUT_SCAN_END_MS: u32 = 2_000;

/// How long to wait for the delivery status of a send, in milliseconds
pub const TIMEOUT_SEND_CONFIRM_MS: u32 = 6_000;

/// Number of main task runs the advertiser may stay busy before it is reset
pub const MAX_MISSED_RUNS: u8 = 10;

// A state counts as timed out this much before its deadline
const TIMEOUT_SLACK_MS: u32 = 20;

// Added to the random delay before each scan
const SCAN_DELAY_MS: u32 = 50;

const BEACON_CAPACITY: usize = 8;

const ACK_LEN: usize = 4;


/// State of the advertiser
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Waiting for the main task
    Idle,

    /// About to start a neighbor scan
    Scan,

    /// Waiting for the neighbor scan to end
    ScanEnd {
        /// The stack reported the end of the scan
        done: bool,
    },

    /// About to send the telemetry record
    SendData,

    /// Waiting for the delivery status of the telemetry record
    SendConfirm {
        /// Whether the record was delivered, once the stack reported it
        delivered: Option<bool>,
    },
}

/// Operating parameters of the tag
///
/// Start out from [`TagConfig`] and are updated by router acknowledgments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagSettings {
    /// Advertising period in milliseconds
    pub period_ms: u32,

    /// Maximum duration of a neighbor scan in milliseconds
    pub max_scan_time_ms: u32,

    /// Number of router beacons after which a scan is stopped, at least 1
    /// and at most 8
    pub max_beacons: u8,

    /// Sequence of the scratchpad the network wants processed
    pub otap_seq: u8,

    /// Added once to the next period after the period changed
    pub period_phase_ms: u32,
}

impl From<&TagConfig> for TagSettings {
    fn from(config: &TagConfig) -> Self {
        TagSettings {
            period_ms:        config.period_ms,
            max_scan_time_ms: config.max_scan_time_ms,
            max_beacons:      config.max_beacons.clamp(1, BEACON_CAPACITY as u8),
            otap_seq:         0,
            period_phase_ms:  0,
        }
    }
}

/// What a run of the main task asks for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MainRun {
    /// Delay until the main task runs again
    pub next_run: Duration,

    /// New schedule of the advertiser task, if it changes
    ///
    /// [`Schedule::Stop`] means the advertiser task must be cancelled.
    pub advertiser: Option<Schedule>,
}


/// The inventory tag
pub struct Tag<S, R> {
    stack:    S,
    jitter:   Jitter<R>,
    config:   TagConfig,
    settings: TagSettings,

    state:   State,
    entered: Instant,
    timeout: Duration,

    run:           u8,
    seq:           Wrapping<u16>,
    tracking_id:   Wrapping<u8>,
    retry:         u8,
    scan_failures: u8,
    scan_count:    u8,
    send_count:    u8,

    beacons: Vec<Beacon, BEACON_CAPACITY>,
    target:  Option<usize>,
    ack:     Option<[u8; ACK_LEN]>,
}

impl<S, R> Tag<S, R>
    where
        S: Stack,
        R: rng::Read,
{
    /// Create a new tag
    ///
    /// The tag does nothing until [`Tag::start`] is called.
    pub fn new(stack: S, rng: R, config: TagConfig) -> Self {
        let entered = stack.now();

        Tag {
            stack,
            jitter: Jitter::new(rng),
            settings: TagSettings::from(&config),
            config,

            state: State::Idle,
            entered,
            timeout: Duration::ZERO,

            run:           0,
            seq:           Wrapping(0),
            tracking_id:   Wrapping(0),
            retry:         0,
            scan_failures: 0,
            scan_count:    0,
            send_count:    0,

            beacons: Vec::new(),
            target:  None,
            ack:     None,
        }
    }

    /// Configure the node and start the stack
    ///
    /// Returns the delay until the first run of the main task: one period
    /// plus a random part of another, so that tags powered up together don't
    /// advertise together.
    ///
    /// If the node didn't have the advertiser role, it is set and the stack is
    /// stopped instead, as the new role only takes effect after a reboot. This
    /// returns [`Error::InvalidRole`] then.
    pub fn start(&mut self) -> Result<Duration, Error> {
        self.stack.set_queuing_time(
            Duration::from_millis(self.config.queuing_time_ms)
        )?;

        let role = self.stack.node_role();
        if role != Some(Role::Advertiser) {
            warn!("Node role is {:?}, switching to advertiser", role);
            if let Err(error) = self.stack.set_node_role(Role::Advertiser) {
                warn!("Failed to set node role: {:?}", error);
            }
            self.stack.stop_stack();
            return Err(Error::InvalidRole);
        }

        self.stack.start_stack()?;

        let period = self.settings.period_ms;
        let delay  = period.saturating_add(self.jitter.jitter_ms(period));
        info!("Tag started, first run in {} ms", delay);

        Ok(Duration::from_millis(delay))
    }

    /// The main task
    ///
    /// Wakes the advertiser if it is idle, and resets it if it has been busy
    /// for more than [`MAX_MISSED_RUNS`] runs. Also checks whether the stored
    /// scratchpad should be processed, and stops the stack if so.
    pub fn main_task(&mut self) -> MainRun {
        self.run = self.run.saturating_add(1);

        let advertiser = if self.state == State::Idle {
            Some(Schedule::Asap)
        }
        else if self.run > MAX_MISSED_RUNS {
            warn!("Advertiser stuck in {:?}, resetting", self.state);
            if self.state == (State::ScanEnd { done: false }) {
                self.stack.stop_scan();
            }
            self.go_idle();
            Some(Schedule::Stop)
        }
        else {
            None
        };

        let otap = self.stack.otap();
        if otap.needs_processing(self.settings.otap_seq) {
            match self.stack.set_otap_to_be_processed() {
                Ok(()) => {
                    info!("Processing scratchpad {}, rebooting", otap.seq);
                    self.stack.stop_stack();
                }
                Err(error) => {
                    warn!("Failed to mark scratchpad: {:?}", error);
                }
            }
        }

        let mut next_run = self.settings.period_ms;
        if self.settings.period_phase_ms != 0 {
            next_run = next_run.saturating_add(self.settings.period_phase_ms);
            self.settings.period_phase_ms = 0;
        }

        MainRun {
            next_run: Duration::from_millis(next_run),
            advertiser,
        }
    }

    /// The advertiser task
    ///
    /// Advances the state machine and returns when it wants to run next.
    pub fn advertiser_task(&mut self) -> Schedule {
        let elapsed   = self.stack.now().duration_since(self.entered);
        let slack     = Duration::from_millis(TIMEOUT_SLACK_MS);
        let timed_out =
            elapsed.as_micros() + slack.as_micros() >= self.timeout.as_micros();

        match self.state {
            State::Idle => {
                self.run           = 0;
                self.seq          += Wrapping(1);
                self.retry         = 0;
                self.scan_failures = 0;
                self.send_count    = 0;

                let delay = self.jitter.jitter_ms(self.config.scan_rand_ms)
                    .saturating_add(SCAN_DELAY_MS);
                self.enter(State::Scan, delay)
            }
            State::Scan => {
                self.start_scan()
            }
            State::ScanEnd { done } => {
                if done || timed_out {
                    self.select_target(done)
                }
                else {
                    self.wait(elapsed)
                }
            }
            State::SendData => {
                self.send_data()
            }
            State::SendConfirm { delivered } => {
                match delivered {
                    Some(true) => {
                        // Keep waiting if the ACK payload isn't there yet
                        if let Some(ack) = self.ack {
                            self.apply_ack(&ack);
                            self.scan_count = 0;
                            self.send_count = 0;
                            return self.go_idle();
                        }
                    }
                    Some(false) => {
                        if self.may_rescan()
                            && self.send_count < MAX_SEND_RETRY
                        {
                            debug!("Delivery failed, scanning again");
                            return self.rescan();
                        }
                    }
                    None => {}
                }

                if timed_out {
                    warn!("No acknowledgment, giving up until next period");
                    self.go_idle()
                }
                else {
                    self.wait(elapsed)
                }
            }
        }
    }

    /// Call when the stack reports a network beacon
    ///
    /// Only beacons of routers that accept directed-advertiser traffic are
    /// kept. The scan is stopped once enough of them have been collected.
    pub fn on_beacon(&mut self, beacon: &Beacon) {
        if self.state != (State::ScanEnd { done: false }) {
            return;
        }
        if beacon.is_sink || !beacon.da_support {
            return;
        }

        let max = usize::from(self.settings.max_beacons);
        if self.beacons.len() >= max || self.beacons.push(*beacon).is_err() {
            return;
        }

        debug!("Beacon from {:#x}, rssi {}", beacon.address, beacon.rssi);

        if self.beacons.len() >= max {
            self.stack.stop_scan();
        }
    }

    /// Call when the stack reports the end of a neighbor scan
    pub fn on_scan_end(&mut self) -> bool {
        if self.state != (State::ScanEnd { done: false }) {
            return false;
        }

        self.state = State::ScanEnd { done: true };
        true
    }

    /// Call when the stack reports the delivery status of a packet
    ///
    /// Statuses of packets other than the last telemetry record are ignored.
    pub fn on_data_sent(&mut self, status: &SentStatus) -> bool {
        match self.state {
            State::SendConfirm { delivered: None }
                if status.tracking_id == Some(self.tracking_id.0) =>
            {
                self.state = State::SendConfirm {
                    delivered: Some(status.success),
                };
                true
            }
            _ => false,
        }
    }

    /// Call when the stack received a packet for the application
    ///
    /// Accepts the acknowledgment of the router the telemetry record was
    /// sent to. Short acknowledgments are padded with zeros.
    pub fn on_data_received(&mut self, data: &Received) -> bool {
        let target = match (self.state, self.target()) {
            (State::SendConfirm { .. }, Some(beacon)) => beacon.address,
            _ => return false,
        };

        if data.src_address != target
            || data.src_endpoint != DIRADV_EP_SRC_ACK
            || data.dest_endpoint != DIRADV_EP_DEST
        {
            return false;
        }

        let mut ack = [0; ACK_LEN];
        let len = data.bytes.len().min(ACK_LEN);
        ack[..len].copy_from_slice(&data.bytes[..len]);
        self.ack = Some(ack);

        true
    }

    /// The current state of the advertiser
    pub fn state(&self) -> State {
        self.state
    }

    /// The current operating parameters
    pub fn settings(&self) -> &TagSettings {
        &self.settings
    }

    /// Sequence number of the current advertising cycle
    pub fn seq(&self) -> u16 {
        self.seq.0
    }

    /// Reference to the stack
    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// Mutable reference to the stack
    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    fn enter(&mut self, state: State, timeout_ms: u32) -> Schedule {
        debug!("{:?} -> {:?}", self.state, state);

        self.state   = state;
        self.entered = self.stack.now();
        self.timeout = Duration::from_millis(timeout_ms);

        Schedule::After(self.timeout)
    }

    fn go_idle(&mut self) -> Schedule {
        self.enter(State::Idle, 0);
        self.beacons.clear();
        self.target = None;
        self.ack    = None;

        if self.run > 0 {
            Schedule::Asap
        }
        else {
            Schedule::Stop
        }
    }

    fn wait(&self, elapsed: Duration) -> Schedule {
        Schedule::After(self.timeout.saturating_sub(elapsed))
    }

    fn may_rescan(&self) -> bool {
        self.retry < MAX_SCAN_RETRY && self.scan_failures < MAX_SCAN_FAILURES
    }

    fn rescan(&mut self) -> Schedule {
        self.retry += 1;
        self.beacons.clear();
        self.target = None;
        self.ack    = None;

        self.enter(State::Scan, TIMEOUT_SCAN_RETRY_MS)
    }

    fn target(&self) -> Option<&Beacon> {
        self.target.and_then(|index| self.beacons.get(index))
    }

    fn start_scan(&mut self) -> Schedule {
        let duration = Duration::from_millis(self.settings.max_scan_time_ms);
        if let Err(error) = self.stack.set_scan_duration(duration) {
            warn!("Failed to set scan duration: {:?}", error);
        }

        self.beacons.clear();
        self.target = None;

        // A scan that didn't start just times out
        if let Err(error) = self.stack.start_scan() {
            warn!("Failed to start scan: {:?}", error);
        }
        self.scan_count = self.scan_count.saturating_add(1);

        self.enter(State::ScanEnd { done: false }, TIMEOUT_SCAN_END_MS)
    }

    fn select_target(&mut self, scan_done: bool) -> Schedule {
        if !scan_done {
            self.stack.stop_scan();
        }

        self.target = self.beacons.iter().position(|beacon| !beacon.is_sink);
        if let Some(beacon) = self.target() {
            debug!("Sending to {:#x}", beacon.address);
            let delay = self.jitter.jitter_ms(self.config.send_rand_ms);
            return self.enter(State::SendData, delay);
        }

        self.scan_failures =
            self.scan_failures.saturating_add(2).min(MAX_SCAN_FAILURES);

        if self.may_rescan() {
            debug!("No router found, scanning again");
            return self.rescan();
        }

        info!("No router found, giving up until next period");
        self.go_idle()
    }

    fn send_data(&mut self) -> Schedule {
        let beacon = match self.target() {
            Some(beacon) => *beacon,
            None         => return self.go_idle(),
        };

        self.send_count   = self.send_count.saturating_add(1);
        self.tracking_id += Wrapping(1);

        let otap = self.stack.otap();
        let data = TagData {
            kind:            ADV_TYPE0,
            rssi:            beacon.rssi,
            seq:             self.seq.0,
            voltage_mv:      self.stack.supply_voltage_mv(),
            proc_otap_seq:   otap.processed_seq,
            stored_otap_seq: otap.seq,
            scan_count:      self.scan_count,
            send_count:      self.send_count,
        };

        let mut buf = [0; TagData::LEN];
        let result = match data.encode(&mut buf) {
            Ok(len) => self.stack.send_data(&DataToSend {
                bytes:         &buf[..len],
                dest_address:  beacon.address,
                src_endpoint:  DIRADV_EP_SRC_DATA,
                dest_endpoint: DIRADV_EP_DEST,
                qos:           Qos::Normal,
                delay:         Duration::ZERO,
                tracking_id:   Some(self.tracking_id.0),
            }),
            Err(error) => {
                warn!("Failed to encode tag data: {:?}", error);
                return self.go_idle();
            }
        };

        if result == SendResult::Success {
            return self.enter(
                State::SendConfirm { delivered: None },
                TIMEOUT_SEND_CONFIRM_MS,
            );
        }

        warn!("Send to {:#x} rejected: {:?}", beacon.address, result);

        if self.may_rescan() && self.send_count < MAX_SEND_RETRY {
            return self.rescan();
        }

        self.go_idle()
    }

    fn apply_ack(&mut self, bytes: &[u8]) {
        let ack = match TagAckConfig::decode(bytes) {
            Ok(ack) => ack,
            Err(error) => {
                warn!("Invalid acknowledgment: {:?}", error);
                return;
            }
        };

        debug!("Acknowledgment: {:?}", ack);

        if ack.period_s != 0 {
            let period_ms = u32::from(ack.period_s) * 1000;
            if period_ms != self.settings.period_ms {
                self.settings.period_phase_ms = self.jitter.jitter_ms(period_ms);
                info!(
                    "Period changed to {} ms, phase {} ms",
                    period_ms, self.settings.period_phase_ms,
                );
            }
            self.settings.period_ms = period_ms;
        }

        self.settings.otap_seq = ack.otap_seq;

        if ack.max_scan_time != 0 {
            self.settings.max_scan_time_ms = u32::from(ack.max_scan_time) * 10;
        }
    }
}


/// Tasks of the tag application
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagTask {
    /// See [`Tag::main_task`]
    Main,
    /// See [`Tag::advertiser_task`]
    Advertiser,
}

/// A [`Tag`] driven by a [`Scheduler`]
///
/// Firmware glue calls [`TagApp::poll`] whenever the application gets
/// control, and forwards stack events to the `on_*` methods.
pub struct TagApp<S, R> {
    tag:       Tag<S, R>,
    scheduler: Scheduler<TagTask, 2>,
}

impl<S, R> TagApp<S, R>
    where
        S: Stack,
        R: rng::Read,
{
    /// Wrap a tag
    pub fn new(tag: Tag<S, R>) -> Self {
        TagApp {
            tag,
            scheduler: Scheduler::new(),
        }
    }

    /// Start the tag and schedule its main task
    pub fn start(&mut self) -> Result<(), Error> {
        let delay = self.tag.start()?;
        let now   = self.tag.stack.now();
        self.scheduler.add_task(TagTask::Main, Schedule::After(delay), now)
    }

    /// Run the next task that is due
    ///
    /// Returns `WouldBlock` if no task is due yet.
    pub fn poll(&mut self) -> nb::Result<TagTask, Error> {
        let now = self.tag.stack.now();
        let task = match self.scheduler.poll(now) {
            Ok(task) => task,
            Err(nb::Error::WouldBlock) => return Err(nb::Error::WouldBlock),
            Err(nb::Error::Other(never)) => match never {},
        };

        match task {
            TagTask::Main => {
                let run = self.tag.main_task();
                self.scheduler.add_task(
                    TagTask::Main,
                    Schedule::After(run.next_run),
                    now,
                )?;
                if let Some(schedule) = run.advertiser {
                    self.scheduler.add_task(TagTask::Advertiser, schedule, now)?;
                }
            }
            TagTask::Advertiser => {
                let schedule = self.tag.advertiser_task();
                self.scheduler.add_task(TagTask::Advertiser, schedule, now)?;
            }
        }

        Ok(task)
    }

    /// The earliest time a task is due
    pub fn next_due(&self) -> Option<Instant> {
        self.scheduler.next_due()
    }

    /// Forward a beacon to the tag
    pub fn on_beacon(&mut self, beacon: &Beacon) {
        self.tag.on_beacon(beacon)
    }

    /// Forward the end of a scan to the tag
    pub fn on_scan_end(&mut self) -> Result<(), Error> {
        let wake = self.tag.on_scan_end();
        self.wake_if(wake)
    }

    /// Forward a delivery status to the tag
    pub fn on_data_sent(&mut self, status: &SentStatus) -> Result<(), Error> {
        let wake = self.tag.on_data_sent(status);
        self.wake_if(wake)
    }

    /// Forward a received packet to the tag
    ///
    /// Returns whether the packet was for the tag.
    pub fn on_data_received(&mut self, data: &Received) -> Result<bool, Error> {
        let handled = self.tag.on_data_received(data);
        self.wake_if(handled)?;
        Ok(handled)
    }

    /// Reference to the tag
    pub fn tag(&self) -> &Tag<S, R> {
        &self.tag
    }

    /// Mutable reference to the tag
    pub fn tag_mut(&mut self) -> &mut Tag<S, R> {
        &mut self.tag
    }

    fn wake_if(&mut self, wake: bool) -> Result<(), Error> {
        if wake {
            let now = self.tag.stack.now();
            self.scheduler.add_task(TagTask::Advertiser, Schedule::Asap, now)?;
        }
        Ok(())
    }
}
