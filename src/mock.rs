//! Simulated stack for unit tests

use std::{collections::VecDeque, vec::Vec};

use embedded_hal::blocking::rng;

use crate::{
    stack::{
        AdvertiserOptions,
        Address,
        DataToSend,
        Neighbor,
        OtapStatus,
        Qos,
        Role,
        SendResult,
        Stack,
        StackError,
        MAX_NEIGHBORS,
    },
    time::{Duration, Instant},
};


/// A packet handed to [`MockStack::send_data`]
#[derive(Clone, Debug)]
pub struct SentPacket {
    pub bytes:         Vec<u8>,
    pub dest_address:  Address,
    pub src_endpoint:  u8,
    pub dest_endpoint: u8,
    pub qos:           Qos,
    pub delay:         Duration,
    pub tracking_id:   Option<u8>,
    pub result:        SendResult,
}

#[derive(Debug)]
pub struct MockStack {
    pub now:               Instant,
    pub role:              Option<Role>,
    pub started:           bool,
    pub stopped:           bool,
    pub sent:              Vec<SentPacket>,
    pub send_results:      VecDeque<SendResult>,
    pub scan_duration:     Option<Duration>,
    pub scan_error:        Option<StackError>,
    pub scans_started:     u32,
    pub scans_stopped:     u32,
    pub neighbors:         Vec<Neighbor>,
    pub voltage_mv:        u16,
    pub otap:              OtapStatus,
    pub otap_marked:       bool,
    pub advertiser_options: Option<AdvertiserOptions>,
    pub queuing_time:      Option<Duration>,
}

impl MockStack {
    pub fn new(role: Role) -> Self {
        MockStack {
            now:                Instant::from_micros(1_000_000),
            role:               Some(role),
            started:            false,
            stopped:            false,
            sent:               Vec::new(),
            send_results:       VecDeque::new(),
            scan_duration:      None,
            scan_error:         None,
            scans_started:      0,
            scans_stopped:      0,
            neighbors:          Vec::new(),
            voltage_mv:         3000,
            otap:               OtapStatus::default(),
            otap_marked:        false,
            advertiser_options: None,
            queuing_time:       None,
        }
    }

    pub fn advance_ms(&mut self, ms: u32) {
        self.now = self.now + Duration::from_millis(ms);
    }

    /// The next `send_data` calls return these results, then `Success`
    pub fn fail_sends(&mut self, results: &[SendResult]) {
        self.send_results.extend(results.iter().copied());
    }

    pub fn last_sent(&self) -> &SentPacket {
        self.sent.last().expect("nothing was sent")
    }

    /// Packets that the stack accepted
    pub fn accepted(&self) -> impl Iterator<Item = &SentPacket> {
        self.sent.iter().filter(|p| p.result == SendResult::Success)
    }
}

impl Stack for MockStack {
    fn now(&self) -> Instant {
        self.now
    }

    fn start_stack(&mut self) -> Result<(), StackError> {
        self.started = true;
        Ok(())
    }

    fn stop_stack(&mut self) {
        self.stopped = true;
    }

    fn node_role(&self) -> Option<Role> {
        self.role
    }

    fn set_node_role(&mut self, role: Role) -> Result<(), StackError> {
        self.role = Some(role);
        Ok(())
    }

    fn send_data(&mut self, data: &DataToSend) -> SendResult {
        let result = self.send_results.pop_front().unwrap_or(SendResult::Success);

        self.sent.push(SentPacket {
            bytes:         data.bytes.to_vec(),
            dest_address:  data.dest_address,
            src_endpoint:  data.src_endpoint,
            dest_endpoint: data.dest_endpoint,
            qos:           data.qos,
            delay:         data.delay,
            tracking_id:   data.tracking_id,
            result,
        });

        result
    }

    fn set_scan_duration(&mut self, duration: Duration) -> Result<(), StackError> {
        self.scan_duration = Some(duration);
        Ok(())
    }

    fn start_scan(&mut self) -> Result<(), StackError> {
        if let Some(error) = self.scan_error {
            return Err(error);
        }
        self.scans_started += 1;
        Ok(())
    }

    fn stop_scan(&mut self) {
        self.scans_stopped += 1;
    }

    fn neighbors(&self, out: &mut heapless::Vec<Neighbor, MAX_NEIGHBORS>) {
        out.clear();
        for neighbor in self.neighbors.iter().take(MAX_NEIGHBORS) {
            let _ = out.push(*neighbor);
        }
    }

    fn supply_voltage_mv(&self) -> u16 {
        self.voltage_mv
    }

    fn otap(&self) -> OtapStatus {
        self.otap
    }

    fn set_otap_to_be_processed(&mut self) -> Result<(), StackError> {
        self.otap_marked = true;
        Ok(())
    }

    fn set_advertiser_options(&mut self, options: AdvertiserOptions)
        -> Result<(), StackError>
    {
        self.advertiser_options = Some(options);
        Ok(())
    }

    fn set_queuing_time(&mut self, time: Duration) -> Result<(), StackError> {
        self.queuing_time = Some(time);
        Ok(())
    }
}


/// Random number generator that always yields the same number
#[derive(Debug)]
pub struct FixedRng(pub u32);

impl rng::Read for FixedRng {
    type Error = ();

    fn read(&mut self, buffer: &mut [u8]) -> Result<(), Self::Error> {
        let bytes = self.0.to_le_bytes();
        for (i, b) in buffer.iter_mut().enumerate() {
            *b = bytes[i % 4];
        }
        Ok(())
    }
}
