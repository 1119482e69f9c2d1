//! Simulated inventory network
//!
//! Runs a handful of tags and one router against a simple model of the mesh
//! network on the host, and prints the aggregate packets that reach the sink.
//!
//! Run with `RUST_LOG=debug` to follow the tags' state machines.

use std::{cell::RefCell, collections::VecDeque, convert::Infallible, rc::Rc};

use diradv::{
    aggregate::Aggregate,
    configs::{DIRADV_EP_DEST, DIRADV_EP_SRC_ACK},
    scheduler::Scheduler,
    stack::{
        Address, AdvertiserOptions, Beacon, DataToSend, Neighbor, OtapStatus,
        Received, Role, SendResult, SentStatus, StackError, ANY_SINK,
        MAX_NEIGHBORS,
    },
    tag::TagApp,
    Duration, Instant, Router, RouterConfig, Stack, Tag, TagConfig,
};
use embedded_hal::blocking::rng;


const ROUTER: Address = 0x100;
const TAGS: u32 = 5;
const RUN_TIME_MS: u32 = 60_000;


enum Event {
    Beacon { to: Address, beacon: Beacon },
    ScanEnd { to: Address },
    Sent { to: Address, status: SentStatus },
    Data {
        to:            Address,
        from:          Address,
        src_endpoint:  u8,
        dest_endpoint: u8,
        bytes:         Vec<u8>,
    },
}

#[derive(Default)]
struct Net {
    now_us: u64,
    events: VecDeque<Event>,
    sink:   Vec<Vec<u8>>,
}

type Shared = Rc<RefCell<Net>>;


struct SimStack {
    net:     Shared,
    address: Address,
    role:    Option<Role>,
}

impl SimStack {
    fn new(net: &Shared, address: Address, role: Role) -> Self {
        SimStack {
            net: net.clone(),
            address,
            role: Some(role),
        }
    }

    fn push(&self, event: Event) {
        self.net.borrow_mut().events.push_back(event);
    }
}

impl Stack for SimStack {
    fn now(&self) -> Instant {
        Instant::from_micros(self.net.borrow().now_us)
    }

    fn start_stack(&mut self) -> Result<(), StackError> {
        Ok(())
    }

    fn stop_stack(&mut self) {
        println!("{:#x}: stack stopped", self.address);
    }

    fn node_role(&self) -> Option<Role> {
        self.role
    }

    fn set_node_role(&mut self, role: Role) -> Result<(), StackError> {
        self.role = Some(role);
        Ok(())
    }

    fn send_data(&mut self, data: &DataToSend) -> SendResult {
        if data.dest_address == ANY_SINK {
            self.net.borrow_mut().sink.push(data.bytes.to_vec());
        }
        else {
            self.push(Event::Data {
                to:            data.dest_address,
                from:          self.address,
                src_endpoint:  data.src_endpoint,
                dest_endpoint: data.dest_endpoint,
                bytes:         data.bytes.to_vec(),
            });
        }

        if data.tracking_id.is_some() {
            self.push(Event::Sent {
                to: self.address,
                status: SentStatus {
                    tracking_id:  data.tracking_id,
                    dest_address: data.dest_address,
                    success:      true,
                },
            });
        }

        SendResult::Success
    }

    fn set_scan_duration(&mut self, _: Duration) -> Result<(), StackError> {
        Ok(())
    }

    fn start_scan(&mut self) -> Result<(), StackError> {
        let beacon = Beacon {
            address:    ROUTER,
            rssi:       -50 - (self.address % 30) as i8,
            is_sink:    false,
            da_support: true,
            cost:       1,
        };
        self.push(Event::Beacon { to: self.address, beacon });
        self.push(Event::ScanEnd { to: self.address });
        Ok(())
    }

    fn stop_scan(&mut self) {}

    fn neighbors(&self, out: &mut heapless::Vec<Neighbor, MAX_NEIGHBORS>) {
        out.clear();
        let _ = out.push(Neighbor {
            address:       ROUTER,
            norm_rssi:     -60,
            last_update_s: 0,
            da_support:    true,
        });
    }

    fn supply_voltage_mv(&self) -> u16 {
        2900 + (self.address % 200) as u16
    }

    fn otap(&self) -> OtapStatus {
        OtapStatus::default()
    }

    fn set_otap_to_be_processed(&mut self) -> Result<(), StackError> {
        Ok(())
    }

    fn set_advertiser_options(&mut self, _: AdvertiserOptions)
        -> Result<(), StackError>
    {
        Ok(())
    }

    fn set_queuing_time(&mut self, _: Duration) -> Result<(), StackError> {
        Ok(())
    }
}


/// Xorshift generator standing in for the radio's hardware RNG
struct XorShift(u32);

impl rng::Read for XorShift {
    type Error = Infallible;

    fn read(&mut self, buffer: &mut [u8]) -> Result<(), Self::Error> {
        for byte in buffer {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 17;
            self.0 ^= self.0 << 5;
            *byte = self.0 as u8;
        }
        Ok(())
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RouterTask {
    Send,
}


fn main() -> Result<(), diradv::Error> {
    env_logger::init();

    let net: Shared = Rc::new(RefCell::new(Net::default()));

    let mut router = Router::new(
        SimStack::new(&net, ROUTER, Role::HeadnodeLl),
        RouterConfig::default(),
    );
    let mut router_tasks = Scheduler::<RouterTask, 1>::new();
    let schedule = router.start()?;
    router_tasks.add_task(RouterTask::Send, schedule, router.stack().now())?;

    let config = TagConfig {
        period_ms: 5_000,
        ..TagConfig::default()
    };
    let mut tags = Vec::new();
    for i in 1..=TAGS {
        let address = 0x0100_0000 + i;
        let stack   = SimStack::new(&net, address, Role::Advertiser);
        let mut app = TagApp::new(Tag::new(stack, XorShift(address), config));
        app.start()?;
        tags.push((address, app));
    }

    let end = Instant::from_micros(0) + Duration::from_millis(RUN_TIME_MS);

    loop {
        // Run everything that is due
        for (_, app) in tags.iter_mut() {
            while app.poll().is_ok() {}
        }
        if let Ok(task) = router_tasks.poll(router.stack().now()) {
            let schedule = router.send_task();
            router_tasks.add_task(task, schedule, router.stack().now())?;
        }

        // Deliver stack events until the network is quiet
        loop {
            let event = net.borrow_mut().events.pop_front();
            let event = match event {
                Some(event) => event,
                None        => break,
            };

            dispatch(event, &mut tags, &mut router)?;

            for (_, app) in tags.iter_mut() {
                while app.poll().is_ok() {}
            }
        }

        for bytes in net.borrow_mut().sink.drain(..) {
            print_aggregate(&bytes);
        }

        let next = tags
            .iter()
            .filter_map(|(_, app)| app.next_due())
            .chain(router_tasks.next_due())
            .min();
        let next = match next {
            Some(next) if next <= end => next,
            _ => break,
        };

        let mut state = net.borrow_mut();
        state.now_us = state.now_us.max(next.value());
    }

    println!(
        "Router received {} records, {} still queued",
        router.received_count(),
        router.pending(),
    );

    Ok(())
}

fn dispatch(
    event:  Event,
    tags:   &mut [(Address, TagApp<SimStack, XorShift>)],
    router: &mut Router<SimStack>,
)
    -> Result<(), diradv::Error>
{
    match event {
        Event::Beacon { to, beacon } => {
            if let Some(app) = find(tags, to) {
                app.on_beacon(&beacon);
            }
        }
        Event::ScanEnd { to } => {
            if let Some(app) = find(tags, to) {
                app.on_scan_end()?;
            }
        }
        Event::Sent { to, status } => {
            if to == ROUTER {
                router.on_data_sent(&status);
            }
            else if let Some(app) = find(tags, to) {
                app.on_data_sent(&status)?;
            }
        }
        Event::Data { to, from, src_endpoint, dest_endpoint, bytes } => {
            let received = Received {
                bytes: &bytes,
                src_address: from,
                src_endpoint,
                dest_endpoint,
            };

            if to == ROUTER {
                // The stack answers advertiser packets with the router's ACK
                if router.on_data_received(&received) {
                    let ack = router.ack_data().to_vec();
                    router.stack().push(Event::Data {
                        to:            from,
                        from:          ROUTER,
                        src_endpoint:  DIRADV_EP_SRC_ACK,
                        dest_endpoint: DIRADV_EP_DEST,
                        bytes:         ack,
                    });
                }
            }
            else if let Some(app) = find(tags, to) {
                app.on_data_received(&received)?;
            }
        }
    }

    Ok(())
}

fn find(tags: &mut [(Address, TagApp<SimStack, XorShift>)], address: Address)
    -> Option<&mut TagApp<SimStack, XorShift>>
{
    tags.iter_mut()
        .find(|(a, _)| *a == address)
        .map(|(_, app)| app)
}

fn print_aggregate(bytes: &[u8]) {
    let aggregate = match Aggregate::decode(bytes) {
        Ok(aggregate) => aggregate,
        Err(error) => {
            println!("Sink: invalid aggregate: {:?}", error);
            return;
        }
    };

    println!(
        "Sink: aggregate {} with {} items of {:?}",
        aggregate.msg_count,
        aggregate.len(),
        aggregate.payload_type,
    );
    for item in aggregate.items() {
        println!("  {:#08x}: {}", item.address, item.value);
    }
}
