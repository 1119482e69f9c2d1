//! Interface to the closed mesh stack
//!
//! The stack firmware exposes its services to applications through a table of
//! function pointers. This module describes the subset of those services the
//! advertiser protocol relies on as the [`Stack`] trait, together with the
//! data types that cross that boundary.
//!
//! Firmware glue implements [`Stack`] on top of the real function table. Test
//! harnesses and simulations implement it on top of a model of the network.
//! Asynchronous stack events (beacon received, scan finished, packet sent,
//! packet received) are not part of the trait. They are delivered by calling
//! the matching `on_*` method of the protocol object that owns the stack.

use heapless::Vec;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::time::{Duration, Instant};


/// A node address in the mesh network
pub type Address = u32;

/// Destination address that delivers a packet to whichever sink is closest
pub const ANY_SINK: Address = 0xffff_fffe;

/// The broadcast address
pub const BROADCAST: Address = 0xffff_ffff;

/// Maximum number of neighbors reported by [`Stack::neighbors`]
pub const MAX_NEIGHBORS: usize = 10;

/// Maximum application payload of a single packet, in bytes
pub const MAX_PAYLOAD: usize = 102;


/// Role of a node in the network
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Role {
    /// Sink, low-energy mode
    SinkLe = 0x00,
    /// Sink, low-latency mode
    SinkLl = 0x10,
    /// Router, low-energy mode
    HeadnodeLe = 0x01,
    /// Router, low-latency mode
    HeadnodeLl = 0x11,
    /// Non-routing node, low-energy mode
    SubnodeLe = 0x02,
    /// Non-routing node, low-latency mode
    SubnodeLl = 0x12,
    /// Automatic role selection, low-energy mode
    AutoroleLe = 0x42,
    /// Automatic role selection, low-latency mode
    AutoroleLl = 0x52,
    /// Directed advertiser
    Advertiser = 0x04,
}

/// Error codes returned by stack services
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum StackError {
    /// Unspecified error
    Unspecified = 1,
    /// The service is not implemented by this stack version
    NotImplemented = 2,
    /// A value was out of range
    InvalidValue = 3,
    /// A required pointer was null
    InvalidNullPointer = 4,
    /// The configuration is not valid
    InvalidConfiguration = 5,
    /// A resource is exhausted
    ResourceUnavailable = 6,
    /// The service is not available in the current stack state
    InvalidStackState = 7,
    /// The operation is not permitted
    AccessDenied = 8,
}

/// Result of asking the stack to send a packet
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SendResult {
    /// The packet was queued
    Success = 0,
    /// The stack is not running
    InvalidStackState = 1,
    /// Invalid quality of service
    InvalidQos = 2,
    /// Invalid send flags
    InvalidFlags = 3,
    /// No room in the packet queue
    OutOfMemory = 4,
    /// Unknown destination address
    InvalidDestAddress = 5,
    /// Payload is empty or too large
    InvalidNumBytes = 6,
    /// All tracking ids are in use
    OutOfTrackingIds = 7,
    /// The tracking id is already in use
    InvalidTrackingId = 8,
    /// The endpoint is reserved for the stack
    ReservedEndpoint = 9,
    /// Sending is not permitted
    AccessDenied = 10,
    /// Invalid hop limit
    InvalidHopLimit = 11,
    /// The data service is not initialized
    Uninitialized = 12,
    /// Invalid fragment information
    InvalidFragmentInfo = 13,
}

/// Quality of service class of an outgoing packet
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Qos {
    /// Normal priority
    Normal = 0,
    /// High priority
    High = 1,
}


/// An outgoing packet
#[derive(Clone, Copy, Debug)]
pub struct DataToSend<'a> {
    /// The payload
    pub bytes: &'a [u8],

    /// The destination address, possibly [`ANY_SINK`]
    pub dest_address: Address,

    /// Source endpoint
    pub src_endpoint: u8,

    /// Destination endpoint
    pub dest_endpoint: u8,

    /// Quality of service class
    pub qos: Qos,

    /// Time the payload has already spent travelling, added to the packet's
    /// travel time
    pub delay: Duration,

    /// If set, the stack reports delivery of this packet with a
    /// [`SentStatus`] carrying the same id
    pub tracking_id: Option<u8>,
}

/// Delivery status of a tracked packet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SentStatus {
    /// The tracking id given when sending
    pub tracking_id: Option<u8>,

    /// The destination the packet was sent to
    pub dest_address: Address,

    /// Whether the packet was delivered to the next hop
    pub success: bool,
}

/// An incoming packet
#[derive(Clone, Copy, Debug)]
pub struct Received<'a> {
    /// The payload
    pub bytes: &'a [u8],

    /// The sender
    pub src_address: Address,

    /// Source endpoint
    pub src_endpoint: u8,

    /// Destination endpoint
    pub dest_endpoint: u8,
}

/// A network beacon heard during a neighbor scan
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Beacon {
    /// Address of the sender
    pub address: Address,

    /// Received signal strength in dBm
    pub rssi: i8,

    /// Whether the sender is a sink
    pub is_sink: bool,

    /// Whether the sender accepts directed-advertiser traffic
    pub da_support: bool,

    /// The sender's route cost to a sink
    pub cost: u8,
}

/// An entry of the stack's neighbor table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Neighbor {
    /// Address of the neighbor
    pub address: Address,

    /// Signal strength, compensated for transmission power
    pub norm_rssi: i8,

    /// Seconds since this entry was last updated
    pub last_update_s: u16,

    /// Whether the neighbor accepts directed-advertiser traffic
    pub da_support: bool,
}

/// State of the scratchpad (the staged firmware image)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OtapStatus {
    /// A valid scratchpad is stored
    pub valid: bool,

    /// The stored scratchpad has been processed by the bootloader
    pub processed: bool,

    /// Sequence number of the stored scratchpad
    pub seq: u8,

    /// Sequence number of the scratchpad last processed
    pub processed_seq: u8,
}

impl OtapStatus {
    /// Whether the stored scratchpad should be processed to reach `target_seq`
    pub fn needs_processing(&self, target_seq: u8) -> bool {
        self.valid
            && !self.processed
            && self.seq == target_seq
            && self.processed_seq != target_seq
    }
}

/// Directed-advertiser options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdvertiserOptions {
    /// Follow the network's frequency hopping while advertising
    pub follow_network: bool,
}


/// Services the mesh stack provides to the application
pub trait Stack {
    /// Current high-precision time
    fn now(&self) -> Instant;

    /// Start the protocol stack
    fn start_stack(&mut self) -> Result<(), StackError>;

    /// Stop the protocol stack
    ///
    /// On real hardware this reboots the node, which is how a scratchpad gets
    /// handed to the bootloader.
    fn stop_stack(&mut self);

    /// The configured node role, if any
    fn node_role(&self) -> Option<Role>;

    /// Persist a new node role. Takes effect after a reboot.
    fn set_node_role(&mut self, role: Role) -> Result<(), StackError>;

    /// Queue a packet for sending
    fn send_data(&mut self, data: &DataToSend) -> SendResult;

    /// Set the maximum duration of the next neighbor scan
    fn set_scan_duration(&mut self, duration: Duration) -> Result<(), StackError>;

    /// Start a neighbor scan
    ///
    /// Beacons are then reported as they arrive, and the end of the scan is
    /// reported once.
    fn start_scan(&mut self) -> Result<(), StackError>;

    /// Stop an ongoing neighbor scan
    fn stop_scan(&mut self);

    /// Fill `out` with the current neighbor table
    fn neighbors(&self, out: &mut Vec<Neighbor, MAX_NEIGHBORS>);

    /// Supply voltage in millivolts
    fn supply_voltage_mv(&self) -> u16;

    /// State of the stored scratchpad
    fn otap(&self) -> OtapStatus;

    /// Mark the stored scratchpad to be processed on the next reboot
    fn set_otap_to_be_processed(&mut self) -> Result<(), StackError>;

    /// Configure the directed-advertiser service
    fn set_advertiser_options(&mut self, options: AdvertiserOptions)
        -> Result<(), StackError>;

    /// Maximum time advertiser packets may wait in the queue
    fn set_queuing_time(&mut self, time: Duration) -> Result<(), StackError>;
}
