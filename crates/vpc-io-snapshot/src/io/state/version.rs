use std::collections::BTreeMap;

use thiserror::Error;

/// Leading magic of every device blob.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"VPIO";

/// Version of the outer TLV framing (not of any particular device).
pub const SNAPSHOT_FORMAT_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);

const HEADER_LEN: usize = 4 + 4 + 4 + 4;
const FIELD_HEADER_LEN: usize = 2 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotVersion {
    pub major: u16,
    pub minor: u16,
}

impl SnapshotVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub format_version: SnapshotVersion,
    pub device_id: [u8; 4],
    pub device_version: SnapshotVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("unexpected end of snapshot data")]
    UnexpectedEof,
    #[error("invalid snapshot magic")]
    InvalidMagic,
    #[error("unsupported snapshot format version {}.{}", .0.major, .0.minor)]
    UnsupportedFormatVersion(SnapshotVersion),
    #[error("snapshot is for device {found:?}, expected {expected:?}")]
    DeviceIdMismatch { expected: [u8; 4], found: [u8; 4] },
    #[error("unsupported device major version {found} (expected {expected})")]
    UnsupportedDeviceMajorVersion { expected: u16, found: u16 },
    #[error("duplicate field tag {0}")]
    DuplicateFieldTag(u16),
    #[error("invalid field encoding: {0}")]
    InvalidFieldEncoding(&'static str),
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Builds a device blob. Fields are emitted in ascending tag order regardless of insertion order.
#[derive(Debug)]
pub struct SnapshotWriter {
    header: SnapshotHeader,
    fields: BTreeMap<u16, Vec<u8>>,
}

impl SnapshotWriter {
    pub fn new(device_id: [u8; 4], device_version: SnapshotVersion) -> Self {
        Self {
            header: SnapshotHeader {
                format_version: SNAPSHOT_FORMAT_VERSION,
                device_id,
                device_version,
            },
            fields: BTreeMap::new(),
        }
    }

    pub fn field_bytes(&mut self, tag: u16, bytes: Vec<u8>) {
        let prev = self.fields.insert(tag, bytes);
        debug_assert!(prev.is_none(), "snapshot field tag {tag} written twice");
    }

    pub fn field_u8(&mut self, tag: u16, v: u8) {
        self.field_bytes(tag, vec![v]);
    }

    pub fn field_bool(&mut self, tag: u16, v: bool) {
        self.field_u8(tag, v as u8);
    }

    pub fn field_u16(&mut self, tag: u16, v: u16) {
        self.field_bytes(tag, v.to_le_bytes().to_vec());
    }

    pub fn field_i16(&mut self, tag: u16, v: i16) {
        self.field_bytes(tag, v.to_le_bytes().to_vec());
    }

    pub fn field_u32(&mut self, tag: u16, v: u32) {
        self.field_bytes(tag, v.to_le_bytes().to_vec());
    }

    pub fn field_u64(&mut self, tag: u16, v: u64) {
        self.field_bytes(tag, v.to_le_bytes().to_vec());
    }

    pub fn finish(self) -> Vec<u8> {
        let body: usize = self
            .fields
            .values()
            .map(|v| FIELD_HEADER_LEN + v.len())
            .sum();
        let mut out = Vec::with_capacity(HEADER_LEN + body);
        out.extend_from_slice(&SNAPSHOT_MAGIC);
        out.extend_from_slice(&self.header.format_version.major.to_le_bytes());
        out.extend_from_slice(&self.header.format_version.minor.to_le_bytes());
        out.extend_from_slice(&self.header.device_id);
        out.extend_from_slice(&self.header.device_version.major.to_le_bytes());
        out.extend_from_slice(&self.header.device_version.minor.to_le_bytes());
        for (tag, value) in self.fields {
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
            out.extend_from_slice(&value);
        }
        out
    }
}

/// Parsed view over a device blob.
#[derive(Debug)]
pub struct SnapshotReader<'a> {
    header: SnapshotHeader,
    fields: BTreeMap<u16, &'a [u8]>,
}

impl<'a> SnapshotReader<'a> {
    pub fn parse(bytes: &'a [u8], expected_device_id: [u8; 4]) -> SnapshotResult<Self> {
        let mut d = codec::Decoder::new(bytes);
        if d.bytes(4)? != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic);
        }
        let format_version = SnapshotVersion::new(d.u16()?, d.u16()?);
        if format_version.major != SNAPSHOT_FORMAT_VERSION.major {
            return Err(SnapshotError::UnsupportedFormatVersion(format_version));
        }
        let mut device_id = [0u8; 4];
        device_id.copy_from_slice(d.bytes(4)?);
        if device_id != expected_device_id {
            return Err(SnapshotError::DeviceIdMismatch {
                expected: expected_device_id,
                found: device_id,
            });
        }
        let device_version = SnapshotVersion::new(d.u16()?, d.u16()?);

        let mut fields = BTreeMap::new();
        while !d.is_empty() {
            let tag = d.u16()?;
            let len = d.u32()? as usize;
            let value = d.bytes(len)?;
            if fields.insert(tag, value).is_some() {
                return Err(SnapshotError::DuplicateFieldTag(tag));
            }
        }

        Ok(Self {
            header: SnapshotHeader {
                format_version,
                device_id,
                device_version,
            },
            fields,
        })
    }

    pub fn header(&self) -> &SnapshotHeader {
        &self.header
    }

    pub fn ensure_device_major(&self, major: u16) -> SnapshotResult<()> {
        let found = self.header.device_version.major;
        if found != major {
            return Err(SnapshotError::UnsupportedDeviceMajorVersion {
                expected: major,
                found,
            });
        }
        Ok(())
    }

    pub fn bytes(&self, tag: u16) -> Option<&'a [u8]> {
        self.fields.get(&tag).copied()
    }

    fn fixed<const N: usize>(&self, tag: u16) -> SnapshotResult<Option<[u8; N]>> {
        let Some(buf) = self.bytes(tag) else {
            return Ok(None);
        };
        let arr: [u8; N] = buf
            .try_into()
            .map_err(|_| SnapshotError::InvalidFieldEncoding("unexpected field length"))?;
        Ok(Some(arr))
    }

    pub fn u8(&self, tag: u16) -> SnapshotResult<Option<u8>> {
        Ok(self.fixed::<1>(tag)?.map(|b| b[0]))
    }

    pub fn bool(&self, tag: u16) -> SnapshotResult<Option<bool>> {
        match self.u8(tag)? {
            None => Ok(None),
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            Some(_) => Err(SnapshotError::InvalidFieldEncoding("bool out of range")),
        }
    }

    pub fn u16(&self, tag: u16) -> SnapshotResult<Option<u16>> {
        Ok(self.fixed::<2>(tag)?.map(u16::from_le_bytes))
    }

    pub fn i16(&self, tag: u16) -> SnapshotResult<Option<i16>> {
        Ok(self.fixed::<2>(tag)?.map(i16::from_le_bytes))
    }

    pub fn u32(&self, tag: u16) -> SnapshotResult<Option<u32>> {
        Ok(self.fixed::<4>(tag)?.map(u32::from_le_bytes))
    }

    pub fn u64(&self, tag: u16) -> SnapshotResult<Option<u64>> {
        Ok(self.fixed::<8>(tag)?.map(u64::from_le_bytes))
    }
}

pub mod codec {
    //! Little-endian helpers for composite field payloads.

    use super::{SnapshotError, SnapshotResult};

    #[derive(Debug, Default)]
    pub struct Encoder {
        buf: Vec<u8>,
    }

    impl Encoder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn u8(mut self, v: u8) -> Self {
            self.buf.push(v);
            self
        }

        pub fn bool(self, v: bool) -> Self {
            self.u8(v as u8)
        }

        pub fn u16(mut self, v: u16) -> Self {
            self.buf.extend_from_slice(&v.to_le_bytes());
            self
        }

        pub fn i16(mut self, v: i16) -> Self {
            self.buf.extend_from_slice(&v.to_le_bytes());
            self
        }

        pub fn u32(mut self, v: u32) -> Self {
            self.buf.extend_from_slice(&v.to_le_bytes());
            self
        }

        pub fn u64(mut self, v: u64) -> Self {
            self.buf.extend_from_slice(&v.to_le_bytes());
            self
        }

        pub fn bytes(mut self, v: &[u8]) -> Self {
            self.buf.extend_from_slice(v);
            self
        }

        pub fn finish(self) -> Vec<u8> {
            self.buf
        }
    }

    #[derive(Debug)]
    pub struct Decoder<'a> {
        buf: &'a [u8],
        pos: usize,
    }

    impl<'a> Decoder<'a> {
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, pos: 0 }
        }

        pub fn is_empty(&self) -> bool {
            self.pos >= self.buf.len()
        }

        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.pos)
        }

        pub fn bytes(&mut self, len: usize) -> SnapshotResult<&'a [u8]> {
            if self.remaining() < len {
                return Err(SnapshotError::UnexpectedEof);
            }
            let out = &self.buf[self.pos..self.pos + len];
            self.pos += len;
            Ok(out)
        }

        fn array<const N: usize>(&mut self) -> SnapshotResult<[u8; N]> {
            let mut out = [0u8; N];
            out.copy_from_slice(self.bytes(N)?);
            Ok(out)
        }

        pub fn u8(&mut self) -> SnapshotResult<u8> {
            Ok(self.array::<1>()?[0])
        }

        pub fn bool(&mut self) -> SnapshotResult<bool> {
            match self.u8()? {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(SnapshotError::InvalidFieldEncoding("bool out of range")),
            }
        }

        pub fn u16(&mut self) -> SnapshotResult<u16> {
            Ok(u16::from_le_bytes(self.array()?))
        }

        pub fn i16(&mut self) -> SnapshotResult<i16> {
            Ok(i16::from_le_bytes(self.array()?))
        }

        pub fn u32(&mut self) -> SnapshotResult<u32> {
            Ok(u32::from_le_bytes(self.array()?))
        }

        pub fn u64(&mut self) -> SnapshotResult<u64> {
            Ok(u64::from_le_bytes(self.array()?))
        }

        /// Fails if any bytes were left unconsumed.
        pub fn finish(self) -> SnapshotResult<()> {
            if self.is_empty() {
                Ok(())
            } else {
                Err(SnapshotError::InvalidFieldEncoding("trailing bytes"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_emitted_in_tag_order() {
        let mut a = SnapshotWriter::new(*b"TEST", SnapshotVersion::new(1, 0));
        a.field_u8(2, 0xAA);
        a.field_u16(1, 0x1234);

        let mut b = SnapshotWriter::new(*b"TEST", SnapshotVersion::new(1, 0));
        b.field_u16(1, 0x1234);
        b.field_u8(2, 0xAA);

        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn reader_rejects_wrong_device_id() {
        let w = SnapshotWriter::new(*b"AAAA", SnapshotVersion::new(1, 0));
        let err = SnapshotReader::parse(&w.finish(), *b"BBBB").unwrap_err();
        assert_eq!(
            err,
            SnapshotError::DeviceIdMismatch {
                expected: *b"BBBB",
                found: *b"AAAA"
            }
        );
    }

    #[test]
    fn wrong_width_field_is_an_encoding_error() {
        let mut w = SnapshotWriter::new(*b"TEST", SnapshotVersion::new(1, 0));
        w.field_u8(7, 1);
        let bytes = w.finish();
        let r = SnapshotReader::parse(&bytes, *b"TEST").unwrap();
        assert_eq!(r.u8(7).unwrap(), Some(1));
        assert!(matches!(
            r.u32(7),
            Err(SnapshotError::InvalidFieldEncoding(_))
        ));
        assert_eq!(r.u32(8).unwrap(), None);
    }

    #[test]
    fn decoder_reports_trailing_bytes() {
        let buf = codec::Encoder::new().u16(5).u8(1).finish();
        let mut d = codec::Decoder::new(&buf);
        assert_eq!(d.u16().unwrap(), 5);
        assert_eq!(
            d.finish(),
            Err(SnapshotError::InvalidFieldEncoding("trailing bytes"))
        );
    }
}
