//! Inventory router
//!
//! The router is a low-latency headnode that collects the [`TagData`] of the
//! tags around it, answers each of them with its configured
//! [`TagAckConfig`], and periodically forwards what it collected to the sink
//! as [aggregate] packets.
//!
//! [aggregate]: ../aggregate/index.html

use core::{convert::TryFrom, iter, num::Wrapping};

use heapless::Deque;
use log::{debug, info, warn};

use crate::{
    aggregate::{self, Item, MAX_ITEMS},
    configs::{RouterConfig, DIRADV_AGR_EP, DIRADV_EP_DEST, DIRADV_EP_SRC_DATA},
    messages::{
        Message,
        PayloadType,
        RouterAppConfig,
        TagAckConfig,
        TagData,
        ADV_TYPE0,
        APP_CONFIG_MAGIC,
    },
    scheduler::Schedule,
    stack::{
        Address,
        DataToSend,
        Qos,
        Received,
        Role,
        SendResult,
        SentStatus,
        Stack,
        ANY_SINK,
        MAX_PAYLOAD,
    },
    time::{Duration, Instant},
    Error,
};


/// Number of tag records the router buffers
pub const FIFO_CAPACITY: usize = 150;

/// App config TLV type carrying a [`RouterAppConfig`]
pub const INVENTORY_APPCFG_TLV_TYPE: u16 = 0xC4;

/// Type under which app configs in the legacy, non-TLV format are delivered
#[cfg(feature = "legacy-appcfg")]
pub const LEGACY_APPCFG_TLV_TYPE: u16 = 0xFFFE;

const SEND_CHECK_SCALING_MS: u32 = 10;
const SEND_TIMEOUT_SCALING_US: u32 = 100_000;


/// A tag record waiting to be forwarded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reading {
    /// Address of the tag
    pub address: Address,

    /// When the record was received
    pub received: Instant,

    /// The record
    pub data: TagData,
}


/// The inventory router
pub struct Router<S> {
    stack:     S,
    config:    RouterConfig,
    ack:       [u8; 4],
    fifo:      Deque<Reading, FIFO_CAPACITY>,
    msg_count: Wrapping<u8>,
    received:  u32,
}

impl<S> Router<S>
    where S: Stack
{
    /// Create a new router
    pub fn new(stack: S, config: RouterConfig) -> Self {
        let mut router = Router {
            stack,
            config,
            ack:       [0; 4],
            fifo:      Deque::new(),
            msg_count: Wrapping(0),
            received:  0,
        };
        router.set_ack(config.ack);
        router
    }

    /// Configure the node as low-latency headnode and start the stack
    ///
    /// Returns when the send task should first run. The stack is stopped if
    /// the role can't be set.
    pub fn start(&mut self) -> Result<Schedule, Error> {
        if let Err(error) = self.stack.set_node_role(Role::HeadnodeLl) {
            warn!("Failed to set node role: {:?}", error);
            self.stack.stop_stack();
            return Err(error.into());
        }

        self.stack.start_stack()?;
        info!("Router started");

        Ok(Schedule::after_ms(self.config.send_check_ms))
    }

    /// Call when the stack received a packet for the application
    ///
    /// Queues tag records arriving on the directed-advertiser endpoints and
    /// returns `true` for them. Other packets are left alone.
    pub fn on_data_received(&mut self, data: &Received) -> bool {
        if data.src_endpoint != DIRADV_EP_SRC_DATA
            || data.dest_endpoint != DIRADV_EP_DEST
            || data.bytes.len() <= 1
        {
            return false;
        }

        self.received = self.received.wrapping_add(1);

        if data.bytes[0] != ADV_TYPE0 {
            debug!("Unknown record type {} from {:#x}", data.bytes[0], data.src_address);
            return true;
        }

        let record = match TagData::decode(data.bytes) {
            Ok(record) => record,
            Err(error) => {
                debug!("Invalid record from {:#x}: {:?}", data.src_address, error);
                return true;
            }
        };

        let reading = Reading {
            address:  data.src_address,
            received: self.stack.now(),
            data:     record,
        };
        if self.fifo.push_back(reading).is_err() {
            warn!("Queue full, dropping record from {:#x}", data.src_address);
        }

        true
    }

    /// The acknowledgment returned to every advertiser packet
    pub fn ack_data(&self) -> &[u8] {
        &self.ack
    }

    /// Call when the network's app config has an entry of type `tlv_type`
    ///
    /// Applies a valid [`RouterAppConfig`]. Zero intervals and unknown payload
    /// types keep the current setting.
    pub fn on_app_config(&mut self, tlv_type: u16, bytes: &[u8])
        -> Result<(), Error>
    {
        let length_ok = match tlv_type {
            INVENTORY_APPCFG_TLV_TYPE => bytes.len() == RouterAppConfig::LEN,
            #[cfg(feature = "legacy-appcfg")]
            LEGACY_APPCFG_TLV_TYPE => true,
            _ => return Err(Error::UnexpectedMessage),
        };
        if !length_ok {
            return Err(Error::InvalidParam);
        }

        let app_config = RouterAppConfig::decode(bytes)?;
        if app_config.magic != APP_CONFIG_MAGIC {
            return Err(Error::InvalidParam);
        }

        self.set_ack(app_config.ack);

        if app_config.send_check > 0 {
            self.config.send_check_ms =
                u32::from(app_config.send_check) * SEND_CHECK_SCALING_MS;
        }
        if app_config.send_timeout > 0 {
            self.config.send_timeout_us =
                u32::from(app_config.send_timeout) * SEND_TIMEOUT_SCALING_US;
        }
        if let Ok(payload_type) = PayloadType::try_from(app_config.payload_type) {
            self.config.payload_type = payload_type;
        }

        info!("App config applied: {:?}", self.config);

        Ok(())
    }

    /// The send task
    ///
    /// Forwards collected records once a full packet is available, or once
    /// the oldest of them is older than the send timeout.
    pub fn send_task(&mut self) -> Schedule {
        let next = Schedule::after_ms(self.config.send_check_ms);

        let pending = self.fifo.len();
        if pending == 0 || (pending < MAX_ITEMS && !self.oldest_timed_out()) {
            return next;
        }

        self.msg_count += Wrapping(1);

        let payload_type = self.config.payload_type;
        let fifo = &mut self.fifo;
        let items = iter::from_fn(|| fifo.pop_front()).map(|reading| {
            Item::from_tag_data(reading.address, &reading.data, payload_type)
        });

        let mut payload = [0; MAX_PAYLOAD];
        let len = match aggregate::pack(&mut payload, payload_type, self.msg_count.0, items) {
            Ok(0) => return next,
            Ok(len) => len,
            Err(error) => {
                warn!("Failed to pack aggregate: {:?}", error);
                return next;
            }
        };

        let result = self.stack.send_data(&DataToSend {
            bytes:         &payload[..len],
            dest_address:  ANY_SINK,
            src_endpoint:  DIRADV_AGR_EP,
            dest_endpoint: DIRADV_AGR_EP,
            qos:           Qos::High,
            delay:         Duration::ZERO,
            tracking_id:   Some(self.msg_count.0),
        });
        if result != SendResult::Success {
            warn!("Aggregate {} dropped: {:?}", self.msg_count.0, result);
        }

        next
    }

    /// Call when the stack reports the delivery status of a packet
    pub fn on_data_sent(&mut self, status: &SentStatus) {
        if !status.success {
            warn!("Aggregate {:?} not delivered", status.tracking_id);
        }
    }

    /// Number of records waiting to be forwarded
    pub fn pending(&self) -> usize {
        self.fifo.len()
    }

    /// Number of advertiser packets received
    pub fn received_count(&self) -> u32 {
        self.received
    }

    /// The current configuration
    pub fn config(&self) -> &RouterConfig {
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

    fn set_ack(&mut self, ack: TagAckConfig) {
        self.config.ack = ack;
        if let Err(error) = ack.encode(&mut self.ack) {
            warn!("Failed to encode acknowledgment: {:?}", error);
        }
    }

    fn oldest_timed_out(&self) -> bool {
        let now = self.stack.now();
        self.fifo
            .front()
            .map(|oldest| {
                now.duration_since(oldest.received).as_micros()
                    > u64::from(self.config.send_timeout_us)
            })
            .unwrap_or(false)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use crate::{aggregate::Aggregate, mock::MockStack};

    fn router() -> Router<MockStack> {
        let mut router = Router::new(MockStack::new(Role::SubnodeLe), RouterConfig::default());
        router.start().unwrap();
        router
    }

    fn record(seq: u16) -> [u8; TagData::LEN] {
        let data = TagData {
            kind: ADV_TYPE0,
            rssi: -50 - seq as i8,
            seq,
            voltage_mv: 2800,
            ..TagData::default()
        };
        let mut buf = [0; TagData::LEN];
        data.encode(&mut buf).unwrap();
        buf
    }

    fn receive(router: &mut Router<MockStack>, address: Address, bytes: &[u8]) -> bool {
        router.on_data_received(&Received {
            bytes,
            src_address: address,
            src_endpoint: DIRADV_EP_SRC_DATA,
            dest_endpoint: DIRADV_EP_DEST,
        })
    }

    fn app_config(magic: u8, payload_type: u8) -> [u8; RouterAppConfig::LEN] {
        [magic, 30, 0, 20, 7, 50, 30, payload_type]
    }

    #[test]
    fn start_sets_headnode_role() {
        let mut router = Router::new(MockStack::new(Role::SubnodeLe), RouterConfig::default());

        assert_eq!(router.start().unwrap(), Schedule::after_ms(500));
        assert_eq!(router.stack().role, Some(Role::HeadnodeLl));
        assert!(router.stack().started);
    }

    #[test]
    fn tag_records_are_queued() {
        let mut router = router();

        assert!(receive(&mut router, 1, &record(1)));
        assert!(receive(&mut router, 2, &record(2)));
        assert_eq!(router.pending(), 2);
        assert_eq!(router.received_count(), 2);
    }

    #[test]
    fn other_packets_are_not_queued() {
        let mut router = router();

        // too short
        assert!(receive(&mut router, 1, &record(1)[..5]));
        // unknown record type
        assert!(receive(&mut router, 1, &[7, 0, 0, 0, 0, 0, 0, 0, 0, 0]));
        assert!(!receive(&mut router, 1, &[0]));
        assert!(!router.on_data_received(&Received {
            bytes: &record(1),
            src_address: 1,
            src_endpoint: 1,
            dest_endpoint: DIRADV_EP_DEST,
        }));

        assert_eq!(router.pending(), 0);
        assert_eq!(router.received_count(), 2);
    }

    #[test]
    fn full_queue_drops_new_records() {
        let mut router = router();

        for i in 0..FIFO_CAPACITY as u32 + 5 {
            receive(&mut router, i, &record(0));
        }

        assert_eq!(router.pending(), FIFO_CAPACITY);
    }

    #[test]
    fn records_wait_for_send_timeout() {
        let mut router = router();
        receive(&mut router, 0x0001_0203, &record(3));
        receive(&mut router, 0x0a0b_0c0d, &record(4));

        assert_eq!(router.send_task(), Schedule::after_ms(500));
        assert!(router.stack().sent.is_empty());

        router.stack_mut().advance_ms(2_001);
        assert_eq!(router.send_task(), Schedule::after_ms(500));

        let packet = router.stack().last_sent();
        assert_eq!(packet.dest_address, ANY_SINK);
        assert_eq!(packet.src_endpoint, DIRADV_AGR_EP);
        assert_eq!(packet.dest_endpoint, DIRADV_AGR_EP);
        assert_eq!(packet.qos, Qos::High);
        assert_eq!(packet.tracking_id, Some(1));
        assert_eq!(
            packet.bytes,
            [0x82, 1, 0x03, 0x02, 0x01, (-53i8) as u8, 0x0d, 0x0c, 0x0b, (-54i8) as u8],
        );
        assert_eq!(router.pending(), 0);
    }

    #[test]
    fn full_packet_is_sent_right_away() {
        let mut router = router();
        for i in 0..30 {
            receive(&mut router, i, &record(i as u16));
        }

        router.send_task();

        let aggregate = Aggregate::decode(&router.stack().last_sent().bytes).unwrap();
        assert_eq!(aggregate.len(), MAX_ITEMS);
        assert_eq!(aggregate.items().next().unwrap().address, 0);
        assert_eq!(router.pending(), 30 - MAX_ITEMS);
    }

    #[test]
    fn app_config_updates_settings_and_ack() {
        let mut router = router();
        assert_eq!(router.ack_data(), &[0, 0, 0, 0]);

        router
            .on_app_config(INVENTORY_APPCFG_TLV_TYPE, &app_config(APP_CONFIG_MAGIC, 5))
            .unwrap();

        assert_eq!(router.ack_data(), &[30, 0, 20, 7]);
        assert_eq!(router.config().send_check_ms, 500);
        assert_eq!(router.config().send_timeout_us, 3_000_000);
        assert_eq!(router.config().payload_type, PayloadType::Voltage);
        assert_eq!(router.send_task(), Schedule::after_ms(500));
    }

    #[test]
    fn unknown_payload_type_is_kept() {
        let mut router = router();

        router
            .on_app_config(INVENTORY_APPCFG_TLV_TYPE, &app_config(APP_CONFIG_MAGIC, 9))
            .unwrap();

        assert_eq!(router.config().payload_type, PayloadType::Rssi);
    }

    #[test]
    fn invalid_app_config_is_rejected() {
        let mut router = router();

        assert!(router
            .on_app_config(INVENTORY_APPCFG_TLV_TYPE, &app_config(0x00, 5))
            .is_err());
        assert!(router
            .on_app_config(INVENTORY_APPCFG_TLV_TYPE, &app_config(APP_CONFIG_MAGIC, 5)[..7])
            .is_err());
        assert!(router
            .on_app_config(0x01, &app_config(APP_CONFIG_MAGIC, 5))
            .is_err());

        assert_eq!(*router.config(), RouterConfig::default());
        assert_eq!(router.ack_data(), &[0, 0, 0, 0]);
    }

    #[cfg(feature = "legacy-appcfg")]
    #[test]
    fn legacy_app_config_is_accepted() {
        let mut router = router();
        let mut bytes = [0; 12];
        bytes[..RouterAppConfig::LEN].copy_from_slice(&app_config(APP_CONFIG_MAGIC, 6));

        router.on_app_config(LEGACY_APPCFG_TLV_TYPE, &bytes).unwrap();

        assert_eq!(router.config().payload_type, PayloadType::Sequence);
    }
}
