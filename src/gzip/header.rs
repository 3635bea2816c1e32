//! Gzip extra-field parsing.

use crate::error::{Error, Result};

/// One subfield of a gzip `extra` field, as defined by RFC 1952 §2.3.1.1.
#[derive(Debug, Clone)]
pub struct SubField {
    /// First subfield id byte.
    pub si1: u8,
    /// Second subfield id byte.
    pub si2: u8,
    /// The subfield payload.
    pub payload: Vec<u8>,
}

/// The parsed subfields of a gzip `extra` field, in file order.
#[derive(Debug, Clone, Default)]
pub struct ExtraField {
    subfields: Vec<SubField>,
}

impl ExtraField {
    /// Parses the raw bytes of an `extra` field (the XLEN bytes that
    /// follow the XLEN prefix) into ordered subfields.
    ///
    /// Subfield lengths are 2-byte little-endian. Fails if any declared
    /// length exceeds the remaining bytes; `offset` is only used to
    /// report where in the file the extra field came from.
    pub fn parse(extra: &[u8], offset: u64) -> Result<Self> {
        let mut subfields = Vec::new();
        let mut rest = extra;
        while !rest.is_empty() {
            if rest.len() < 4 {
                return Err(Error::InvalidFormat {
                    offset,
                    reason: format!("{} trailing bytes do not form an extra subfield", rest.len()),
                });
            }
            let si1 = rest[0];
            let si2 = rest[1];
            let sflen = u16::from_le_bytes([rest[2], rest[3]]) as usize;
            rest = &rest[4..];
            if sflen > rest.len() {
                return Err(Error::InvalidFormat {
                    offset,
                    reason: format!(
                        "extra subfield length {} exceeds remaining {} bytes",
                        sflen,
                        rest.len()
                    ),
                });
            }
            subfields.push(SubField {
                si1,
                si2,
                payload: rest[..sflen].to_vec(),
            });
            rest = &rest[sflen..];
        }
        Ok(Self { subfields })
    }

    /// Returns the first subfield with the given id bytes, if any.
    pub fn find_first(&self, si1: u8, si2: u8) -> Option<&SubField> {
        self.subfields.iter().find(|sf| sf.si1 == si1 && sf.si2 == si2)
    }

    /// The parsed subfields, in file order.
    pub fn subfields(&self) -> &[SubField] {
        &self.subfields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ordered_subfields() {
        let mut extra = Vec::new();
        extra.extend_from_slice(b"RA");
        extra.extend_from_slice(&3u16.to_le_bytes());
        extra.extend_from_slice(b"abc");
        extra.extend_from_slice(b"XY");
        extra.extend_from_slice(&0u16.to_le_bytes());

        let ef = ExtraField::parse(&extra, 0).unwrap();
        assert_eq!(ef.subfields().len(), 2);
        assert_eq!(ef.find_first(b'R', b'A').unwrap().payload, b"abc");
        assert!(ef.find_first(b'X', b'Y').unwrap().payload.is_empty());
        assert!(ef.find_first(b'Z', b'Z').is_none());
    }

    #[test]
    fn rejects_overlong_subfield() {
        let mut extra = Vec::new();
        extra.extend_from_slice(b"RA");
        extra.extend_from_slice(&10u16.to_le_bytes());
        extra.extend_from_slice(b"abc");
        assert!(matches!(
            ExtraField::parse(&extra, 7).unwrap_err(),
            Error::InvalidFormat { offset: 7, .. }
        ));
    }

    #[test]
    fn rejects_truncated_subfield_header() {
        assert!(ExtraField::parse(&[b'R'], 0).is_err());
    }
}
