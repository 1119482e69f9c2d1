//! Type-length-value records
//!
//! Acknowledgments to control nodes carry a sequence of records, each made of
//! a one-byte type, a one-byte length and `length` bytes of value.

use byte::{BytesExt, LE};

use crate::Error;


/// A single decoded record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Record<'a> {
    /// The record type
    pub kind: u8,

    /// The record value
    pub value: &'a [u8],
}

/// Iterator over the records of a TLV stream
///
/// Yields an error and then stops if a record is truncated.
#[derive(Debug)]
pub struct Records<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Records<'a> {
    /// Iterate over the records in `bytes`
    pub fn new(bytes: &'a [u8]) -> Self {
        Records { bytes, offset: 0 }
    }

    fn read_record(&mut self) -> Result<Record<'a>, Error> {
        let kind: u8 = self.bytes.read_with(&mut self.offset, LE)?;
        let len: u8 = self.bytes.read_with(&mut self.offset, LE)?;

        let end = self.offset + len as usize;
        if end > self.bytes.len() {
            return Err(Error::BufferTooSmall { required_len: end });
        }

        let value = &self.bytes[self.offset..end];
        self.offset = end;

        Ok(Record { kind, value })
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<Record<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.bytes.len() {
            return None;
        }

        let record = self.read_record();
        if record.is_err() {
            // Nothing after a broken record can be trusted
            self.offset = self.bytes.len();
        }

        Some(record)
    }
}

/// Append a record to `buf` at `offset`, advancing `offset`
pub fn write_record(
    buf:    &mut [u8],
    offset: &mut usize,
    kind:   u8,
    value:  &[u8],
)
    -> Result<(), Error>
{
    if value.len() > u8::MAX as usize {
        return Err(Error::InvalidParam);
    }

    let end = *offset + 2 + value.len();
    if end > buf.len() {
        return Err(Error::BufferTooSmall { required_len: end });
    }

    buf.write_with(offset, kind, LE)?;
    buf.write_with(offset, value.len() as u8, LE)?;
    buf[*offset..end].copy_from_slice(value);
    *offset = end;

    Ok(())
}
