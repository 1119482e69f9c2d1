//! Aggregate inventory packets a router sends to the sink
//!
//! An aggregate packet starts with a two-byte header, the type byte
//! (`payload type | MSG_TYPE2_PREFIX`) and a wrapping message counter. It is
//! followed by up to [`MAX_ITEMS`] items, each made of the tag's 24-bit address
//! (little-endian) and one byte whose meaning depends on the payload type.

use core::convert::TryFrom;

use byte::{BytesExt, LE};

use crate::{
    messages::{PayloadType, TagData},
    stack::{Address, MAX_PAYLOAD},
    Error,
};


/// Bit set in the type byte of every aggregate packet
pub const MSG_TYPE2_PREFIX: u8 = 0x80;

/// Bytes of a tag address carried in an item
pub const NODE_ADDRESS_SIZE: usize = 3;

/// Length of the header
pub const HEADER_LEN: usize = 2;

/// Length of one item
pub const ITEM_LEN: usize = NODE_ADDRESS_SIZE + 1;

/// Maximum number of items in one packet
pub const MAX_ITEMS: usize = (MAX_PAYLOAD - HEADER_LEN) / ITEM_LEN;


/// One tag's entry in an aggregate packet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Item {
    /// The tag address, truncated to 24 bits
    pub address: Address,

    /// The value selected by the payload type
    pub value: u8,
}

impl Item {
    /// Builds the item for `data` received from `address`
    pub fn from_tag_data(address: Address, data: &TagData, payload_type: PayloadType) -> Self {
        let value = match payload_type {
            PayloadType::Rssi => data.rssi as u8,
            PayloadType::ProcessedOtapSeq => data.proc_otap_seq,
            PayloadType::StoredOtapSeq => data.stored_otap_seq,
            PayloadType::Voltage => compress_voltage(data.voltage_mv),
            PayloadType::Sequence => (data.seq & 0x00ff) as u8,
        };

        Item { address: address & 0x00ff_ffff, value }
    }
}

/// Squeeze a supply voltage into one byte: 10 mV steps starting at 1 V
///
/// ``` rust
/// use diradv::aggregate::compress_voltage;
///
/// assert_eq!(compress_voltage(3000), 200);
/// assert_eq!(compress_voltage(900), 0);
/// assert_eq!(compress_voltage(4000), 255);
/// ```
pub fn compress_voltage(voltage_mv: u16) -> u8 {
    let steps = voltage_mv.saturating_sub(1000) / 10;
    if steps > u8::MAX as u16 {
        u8::MAX
    }
    else {
        steps as u8
    }
}

/// Writes an aggregate packet into `buf`
///
/// Takes at most [`MAX_ITEMS`] items from `items`. Returns the length of the
/// packet, or 0 if `items` was empty.
pub fn pack<I>(
    buf:          &mut [u8],
    payload_type: PayloadType,
    msg_count:    u8,
    items:        I,
)
    -> Result<usize, Error>
    where I: IntoIterator<Item = Item>
{
    let offset = &mut 0;
    buf.write_with(offset, u8::from(payload_type) | MSG_TYPE2_PREFIX, LE)?;
    buf.write_with(offset, msg_count, LE)?;

    let mut count = 0;
    for item in items.into_iter().take(MAX_ITEMS) {
        buf.write_with(offset, (item.address & 0xffff) as u16, LE)?;
        buf.write_with(offset, (item.address >> 16) as u8, LE)?;
        buf.write_with(offset, item.value, LE)?;
        count += 1;
    }

    if count == 0 {
        return Ok(0);
    }

    Ok(*offset)
}

/// A decoded aggregate packet
#[derive(Debug)]
pub struct Aggregate<'a> {
    /// What the item values mean
    pub payload_type: PayloadType,

    /// The router's message counter
    pub msg_count: u8,

    items: &'a [u8],
}

impl<'a> Aggregate<'a> {
    /// Decodes the header of an aggregate packet
    pub fn decode(bytes: &'a [u8]) -> Result<Self, Error> {
        let offset = &mut 0;
        let kind: u8 = bytes.read_with(offset, LE)?;
        let msg_count: u8 = bytes.read_with(offset, LE)?;

        if kind & MSG_TYPE2_PREFIX == 0 {
            return Err(Error::UnexpectedMessage);
        }
        let payload_type = PayloadType::try_from(kind & !MSG_TYPE2_PREFIX)
            .map_err(|_| Error::UnexpectedMessage)?;

        let items = &bytes[HEADER_LEN..];
        if items.len() % ITEM_LEN != 0 {
            return Err(Error::BufferTooSmall {
                required_len: HEADER_LEN + (items.len() / ITEM_LEN + 1) * ITEM_LEN,
            });
        }

        Ok(Aggregate { payload_type, msg_count, items })
    }

    /// Number of items in the packet
    pub fn len(&self) -> usize {
        self.items.len() / ITEM_LEN
    }

    /// Whether the packet has no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The items in the packet
    pub fn items(&self) -> impl Iterator<Item = Item> + 'a {
        self.items.chunks_exact(ITEM_LEN).map(|chunk| Item {
            address: chunk[0] as Address
                | (chunk[1] as Address) << 8
                | (chunk[2] as Address) << 16,
            value: chunk[3],
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_items_fills_payload() {
        assert_eq!(MAX_ITEMS, 25);
        assert!(HEADER_LEN + MAX_ITEMS * ITEM_LEN <= MAX_PAYLOAD);
    }

    #[test]
    fn pack_writes_header_and_items() {
        let items = [
            Item { address: 0x0012_3456, value: 0xc4 },
            Item { address: 0x0000_0001, value: 7 },
        ];

        let mut buf = [0; MAX_PAYLOAD];
        let len = pack(&mut buf, PayloadType::Rssi, 9, items.iter().copied()).unwrap();

        assert_eq!(len, HEADER_LEN + 2 * ITEM_LEN);
        assert_eq!(
            &buf[..len],
            &[0x82, 9, 0x56, 0x34, 0x12, 0xc4, 0x01, 0x00, 0x00, 7],
        );

        let aggregate = Aggregate::decode(&buf[..len]).unwrap();
        assert_eq!(aggregate.payload_type, PayloadType::Rssi);
        assert_eq!(aggregate.msg_count, 9);
        assert_eq!(aggregate.len(), 2);
        assert!(aggregate.items().eq(items.iter().copied()));
    }

    #[test]
    fn pack_stops_at_max_items() {
        let items = (0..40).map(|i| Item { address: i, value: i as u8 });

        let mut buf = [0; MAX_PAYLOAD];
        let len = pack(&mut buf, PayloadType::Sequence, 0, items).unwrap();

        assert_eq!(len, HEADER_LEN + MAX_ITEMS * ITEM_LEN);
    }

    #[test]
    fn pack_without_items_is_empty() {
        let mut buf = [0; MAX_PAYLOAD];
        let len = pack(&mut buf, PayloadType::Voltage, 0, core::iter::empty()).unwrap();

        assert_eq!(len, 0);
    }

    #[test]
    fn item_value_follows_payload_type() {
        let data = TagData {
            rssi: -60,
            seq: 0x1234,
            voltage_mv: 2500,
            proc_otap_seq: 3,
            stored_otap_seq: 4,
            ..TagData::default()
        };

        let value = |payload_type| Item::from_tag_data(0x0100_0002, &data, payload_type).value;

        assert_eq!(value(PayloadType::Rssi), (-60i8) as u8);
        assert_eq!(value(PayloadType::ProcessedOtapSeq), 3);
        assert_eq!(value(PayloadType::StoredOtapSeq), 4);
        assert_eq!(value(PayloadType::Voltage), 150);
        assert_eq!(value(PayloadType::Sequence), 0x34);
        assert_eq!(
            Item::from_tag_data(0x0100_0002, &data, PayloadType::Rssi).address,
            0x0000_0002,
        );
    }

    #[test]
    fn decode_rejects_tag_data() {
        let bytes = [0, 0, 1, 2, 3, 4];
        assert!(Aggregate::decode(&bytes).is_err());
    }
}
