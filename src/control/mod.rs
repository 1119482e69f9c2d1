//! Control nodes and control routers
//!
//! A control node is a directed advertiser that sends application data on
//! demand, like a light switch, rather than periodically like a tag. It picks
//! the best router in its neighbor table and keeps a second one as backup
//! route. Routers answer with a stream of [TLV records] that can carry
//! application data and a [`ControlAck`].
//!
//! Control nodes can also send periodic [`ControlDiag`] packets. A
//! [`ControlRouter`] forwards those to the sink.
//!
//! [TLV records]: ../tlv/index.html
//! [`ControlAck`]: ../messages/struct.ControlAck.html
//! [`ControlDiag`]: ../messages/struct.ControlDiag.html

mod node;
mod router;

pub use node::*;
pub use router::*;

use heapless::Vec;

use crate::stack::{Address, Neighbor, Stack, MAX_NEIGHBORS};


/// `otap_seq` of a [`ControlAck`] that requests no scratchpad processing
///
/// [`ControlAck`]: ../messages/struct.ControlAck.html
pub const NO_OTAP_SEQ: u8 = 0;

/// TLV type of application data in an acknowledgment
pub const CONTROL_TYPE_USER: u8 = 1;

/// TLV type of a [`ControlAck`] in an acknowledgment
///
/// [`ControlAck`]: ../messages/struct.ControlAck.html
pub const CONTROL_TYPE_ACK: u8 = 2;

/// Routers not heard from for this many seconds are only used as fallback
pub const NBOR_MAX_TIME_LAST_SEEN_S: u16 = 60;

/// Diagnostics periods shorter than this disable diagnostics
pub const MIN_DIAG_PERIOD_MS: u32 = 30_000;


/// Selects the router to send directed-advertiser packets to
///
/// Prefers the strongest router that accepts directed-advertiser traffic and
/// was heard from in the last [`NBOR_MAX_TIME_LAST_SEEN_S`] seconds, then the
/// strongest one overall. `exclude` is never selected.
pub fn best_da_router(neighbors: &[Neighbor], exclude: Option<Address>)
    -> Option<Address>
{
    let candidates = || {
        neighbors
            .iter()
            .filter(move |n| n.da_support && Some(n.address) != exclude)
    };

    strongest(candidates().filter(|n| n.last_update_s < NBOR_MAX_TIME_LAST_SEEN_S))
        .or_else(|| strongest(candidates()))
        .map(|n| n.address)
}

// First of the neighbors with the highest signal strength
fn strongest<'a, I>(neighbors: I) -> Option<&'a Neighbor>
    where I: Iterator<Item = &'a Neighbor>
{
    neighbors.fold(None, |best, n| match best {
        Some(best) if best.norm_rssi >= n.norm_rssi => Some(best),
        _ => Some(n),
    })
}

fn da_router<S: Stack>(stack: &S, exclude: Option<Address>) -> Option<Address> {
    let mut neighbors = Vec::<Neighbor, MAX_NEIGHBORS>::new();
    stack.neighbors(&mut neighbors);
    best_da_router(&neighbors, exclude)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn neighbor(address: Address, norm_rssi: i8, last_update_s: u16) -> Neighbor {
        Neighbor {
            address,
            norm_rssi,
            last_update_s,
            da_support: true,
        }
    }

    #[test]
    fn recent_routers_are_preferred() {
        let neighbors = [
            neighbor(1, -40, 120),
            neighbor(2, -70, 5),
            neighbor(3, -60, 10),
        ];

        assert_eq!(best_da_router(&neighbors, None), Some(3));
        assert_eq!(best_da_router(&neighbors, Some(3)), Some(2));
    }

    #[test]
    fn stale_routers_are_fallback() {
        let neighbors = [neighbor(1, -40, 120), neighbor(2, -30, 300)];

        assert_eq!(best_da_router(&neighbors, None), Some(2));
        assert_eq!(best_da_router(&neighbors, Some(2)), Some(1));
        assert_eq!(best_da_router(&neighbors[..1], Some(1)), None);
    }

    #[test]
    fn routers_without_da_support_are_skipped() {
        let neighbors = [
            Neighbor { da_support: false, ..neighbor(1, -20, 0) },
            neighbor(2, -80, 0),
        ];

        assert_eq!(best_da_router(&neighbors, None), Some(2));
    }

    #[test]
    fn ties_go_to_the_first_router() {
        let neighbors = [neighbor(7, -50, 0), neighbor(8, -50, 0)];

        assert_eq!(best_da_router(&neighbors, None), Some(7));
    }
}
