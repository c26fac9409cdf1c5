//! Message fragmenting.
//!
//! Messages travel in 16-byte fragments: one status byte followed by 15
//! payload bytes. Bit 7 of the status byte marks the first fragment of a
//! message; bits 0-6 count the fragments still to follow.

use crate::error::ProtocolError;

/// Size of a fragment on the wire
pub const FRAGMENT_LEN: usize = 16;

/// Message bytes carried per fragment
pub const FRAGMENT_PAYLOAD_LEN: usize = FRAGMENT_LEN - 1;

const FIRST_FLAG: u8 = 0x80;
const REMAINING_MASK: u8 = 0x7f;

/// One 16-byte fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    bytes: [u8; FRAGMENT_LEN],
}

impl Fragment {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let bytes: [u8; FRAGMENT_LEN] =
            bytes
                .try_into()
                .map_err(|_| ProtocolError::InvalidFragment {
                    expected: FRAGMENT_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self { bytes })
    }

    pub fn status(&self) -> u8 {
        self.bytes[0]
    }

    pub fn is_first(&self) -> bool {
        self.status() & FIRST_FLAG != 0
    }

    /// Number of fragments that follow this one.
    pub fn remaining(&self) -> u8 {
        self.status() & REMAINING_MASK
    }

    pub fn is_last(&self) -> bool {
        self.remaining() == 0
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[1..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Split a message (`[type, data..]`) into fragments, zero-padding the tail.
pub fn split(message: &[u8]) -> Result<Vec<Fragment>, ProtocolError> {
    if message.is_empty() {
        return Err(ProtocolError::Empty);
    }

    let count = message.len().div_ceil(FRAGMENT_PAYLOAD_LEN);
    if count > usize::from(REMAINING_MASK) + 1 {
        return Err(ProtocolError::MessageTooLong(message.len()));
    }

    let fragments = message
        .chunks(FRAGMENT_PAYLOAD_LEN)
        .enumerate()
        .map(|(index, chunk)| {
            let mut bytes = [0u8; FRAGMENT_LEN];
            let remaining = (count - index - 1) as u8;
            bytes[0] = if index == 0 { FIRST_FLAG | remaining } else { remaining };
            bytes[1..1 + chunk.len()].copy_from_slice(chunk);
            Fragment { bytes }
        })
        .collect();

    Ok(fragments)
}

/// Reassembles incoming fragments into complete messages.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: Vec<u8>,
    expected_remaining: Option<u8>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment; returns the message once its last fragment arrives.
    ///
    /// A first fragment always restarts reassembly, discarding any partial
    /// message left over from an interrupted exchange.
    pub fn push(&mut self, fragment: &Fragment) -> Result<Option<Vec<u8>>, ProtocolError> {
        if fragment.is_first() {
            self.buffer.clear();
        } else {
            match self.expected_remaining {
                Some(expected) if expected == fragment.remaining() => {}
                Some(expected) => {
                    self.reset();
                    return Err(ProtocolError::FragmentOutOfOrder {
                        expected,
                        actual: fragment.remaining(),
                    });
                }
                None => {
                    return Err(ProtocolError::FragmentOutOfOrder {
                        expected: 0,
                        actual: fragment.remaining(),
                    });
                }
            }
        }

        self.buffer.extend_from_slice(fragment.payload());

        if fragment.is_last() {
            self.expected_remaining = None;
            Ok(Some(std::mem::take(&mut self.buffer)))
        } else {
            self.expected_remaining = Some(fragment.remaining() - 1);
            Ok(None)
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected_remaining = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_single_fragment() {
        let fragments = split(&[0x02, 0xff, 1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].status(), 0x80);
        assert!(fragments[0].is_first());
        assert!(fragments[0].is_last());
        assert_eq!(&fragments[0].payload()[..10], &[0x02, 0xff, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(fragments[0].payload()[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_split_multiple_fragments() {
        let message: Vec<u8> = (0u8..30).collect();
        let fragments = split(&message).unwrap();

        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].status(), 0x81);
        assert_eq!(fragments[1].status(), 0x00);
        assert!(!fragments[1].is_first());
        assert_eq!(fragments[1].payload()[0], 15);
    }

    #[test]
    fn test_split_rejects_empty() {
        assert_eq!(split(&[]), Err(ProtocolError::Empty));
    }

    #[test]
    fn test_reassemble() {
        let message: Vec<u8> = (0u8..45).collect();
        let fragments = split(&message).unwrap();
        assert_eq!(fragments.len(), 3);

        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(&fragments[0]).unwrap(), None);
        assert_eq!(reassembler.push(&fragments[1]).unwrap(), None);
        assert_eq!(reassembler.push(&fragments[2]).unwrap(), Some(message));
    }

    #[test]
    fn test_reassemble_out_of_order() {
        let message: Vec<u8> = (0u8..45).collect();
        let fragments = split(&message).unwrap();

        let mut reassembler = Reassembler::new();
        reassembler.push(&fragments[0]).unwrap();
        let result = reassembler.push(&fragments[2]);
        assert_eq!(
            result,
            Err(ProtocolError::FragmentOutOfOrder {
                expected: 1,
                actual: 0
            })
        );
    }

    #[test]
    fn test_first_fragment_restarts() {
        let long: Vec<u8> = (0u8..30).collect();
        let short = [0x03, 7, 7, 7];

        let mut reassembler = Reassembler::new();
        reassembler.push(&split(&long).unwrap()[0]).unwrap();

        let fragment = split(&short).unwrap()[0];
        let message = reassembler.push(&fragment).unwrap().unwrap();
        assert_eq!(&message[..4], &short);
    }

    #[test]
    fn test_fragment_from_bytes_length() {
        assert!(Fragment::from_bytes(&[0u8; 16]).is_ok());
        assert_eq!(
            Fragment::from_bytes(&[0u8; 20]),
            Err(ProtocolError::InvalidFragment {
                expected: 16,
                actual: 20
            })
        );
    }
}
