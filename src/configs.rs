//! Configuration structs and well-known endpoints
//!
//! This module houses the datastructures that control how the tag, the router
//! and the control node behave. The configs are passed to the constructors of
//! the respective protocol objects. The defaults are a sane starting point.

use crate::messages::{PayloadType, TagAckConfig};


/// Source endpoint of advertiser data packets
pub const DIRADV_EP_SRC_DATA: u8 = 248;

/// Source endpoint of router acknowledgments sent to advertisers
pub const DIRADV_EP_SRC_ACK: u8 = 249;

/// Destination endpoint of both advertiser data and acknowledgments
pub const DIRADV_EP_DEST: u8 = 248;

/// Endpoint of the aggregated inventory packets a router sends to the sink
pub const DIRADV_AGR_EP: u8 = 250;

/// Endpoint of control node diagnostics, in both directions
pub const CONTROL_DIAG_EP: u8 = 237;


/// Inventory tag configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagConfig {
    /// Advertising period in milliseconds, until an ACK changes it
    pub period_ms: u32,
    /// Maximum duration of a neighbor scan in milliseconds, until an ACK
    /// changes it
    pub max_scan_time_ms: u32,
    /// Number of DA-capable beacons after which a scan is stopped early.
    /// Clamped to `1..=8`.
    pub max_beacons: u8,
    /// Upper bound of the random delay before each scan, in milliseconds
    pub scan_rand_ms: u32,
    /// Upper bound of the random delay before each send, in milliseconds
    pub send_rand_ms: u32,
    /// Maximum time a packet may wait in the advertiser queue, in
    /// milliseconds
    pub queuing_time_ms: u32,
}

impl Default for TagConfig {
    fn default() -> Self {
        TagConfig {
            period_ms: 10_000,
            max_scan_time_ms: 1_000,
            max_beacons: 1,
            scan_rand_ms: 100,
            send_rand_ms: 20,
            queuing_time_ms: 2_000,
        }
    }
}


/// Inventory router configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouterConfig {
    /// Acknowledgment returned to every advertiser packet
    pub ack: TagAckConfig,
    /// Interval at which collected data is checked for sending, in
    /// milliseconds
    pub send_check_ms: u32,
    /// Collected data older than this is sent even if the aggregate packet is
    /// not full, in microseconds
    pub send_timeout_us: u32,
    /// Which field of the tag data is forwarded to the sink
    pub payload_type: PayloadType,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            ack: TagAckConfig::default(),
            send_check_ms: 500,
            send_timeout_us: 2_000_000,
            payload_type: PayloadType::Rssi,
        }
    }
}


/// Control node configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlNodeConfig {
    /// Interval of directed-advertiser diagnostics in milliseconds, `None` to
    /// disable them. Intervals under 30 seconds also disable them.
    pub diag_period_ms: Option<u32>,
    /// Maximum queuing time of advertiser packets in milliseconds, 0 to
    /// disable. Half of it is the timeout before the backup route is tried.
    pub packet_ttl_ms: u32,
}

impl Default for ControlNodeConfig {
    fn default() -> Self {
        ControlNodeConfig {
            diag_period_ms: None,
            packet_ttl_ms: 1_000,
        }
    }
}
