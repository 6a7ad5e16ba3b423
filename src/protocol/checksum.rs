//! Internet checksum (RFC 1071) with incremental update (RFC 1624)
//!
//! The running sum is kept folded to 16 bits after every accumulation, so
//! it can be carried across stream words of any length.

use std::net::Ipv4Addr;

/// Add one 16-bit word to a running sum with end-around carry.
pub fn accumulate(running: u16, word: u16) -> u16 {
    let sum = running as u32 + word as u32;
    ((sum & 0xFFFF) + (sum >> 16)) as u16
}

/// One's complement of the folded sum, as placed in a header.
pub fn finalize(running: u16) -> u16 {
    !running
}

/// Checksum of a contiguous buffer.
pub fn checksum(data: &[u8]) -> u16 {
    let mut c = Checksum::new();
    c.add_bytes(data);
    c.finish()
}

/// Streaming checksum accumulator.
///
/// Byte runs may be split at any offset, including odd ones; a dangling
/// high byte is held until its partner arrives.
#[derive(Debug, Clone, Copy, Default)]
pub struct Checksum {
    sum: u16,
    odd: Option<u8>,
}

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_u16(&mut self, word: u16) {
        if let Some(hi) = self.odd.take() {
            // Keep byte alignment: the pending byte pairs with the high half.
            let [a, b] = word.to_be_bytes();
            self.sum = accumulate(self.sum, u16::from_be_bytes([hi, a]));
            self.odd = Some(b);
        } else {
            self.sum = accumulate(self.sum, word);
        }
    }

    pub fn add_bytes(&mut self, data: &[u8]) {
        let mut rest = data;
        if let Some(hi) = self.odd {
            let Some((&lo, tail)) = rest.split_first() else {
                return;
            };
            self.sum = accumulate(self.sum, u16::from_be_bytes([hi, lo]));
            self.odd = None;
            rest = tail;
        }
        let mut pairs = rest.chunks_exact(2);
        for pair in &mut pairs {
            self.sum = accumulate(self.sum, u16::from_be_bytes([pair[0], pair[1]]));
        }
        if let [last] = pairs.remainder() {
            self.odd = Some(*last);
        }
    }

    /// Add the IPv4 pseudo-header used by UDP.
    pub fn add_pseudo_header(&mut self, src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, len: u16) {
        self.add_bytes(&src.octets());
        self.add_bytes(&dst.octets());
        self.add_u16(protocol as u16);
        self.add_u16(len);
    }

    /// Folded sum without the final complement; 0xFFFF over data that
    /// includes a correct checksum field.
    pub fn sum(&self) -> u16 {
        match self.odd {
            Some(hi) => accumulate(self.sum, u16::from_be_bytes([hi, 0])),
            None => self.sum,
        }
    }

    pub fn finish(&self) -> u16 {
        finalize(self.sum())
    }

    /// True when the data summed so far carried a valid checksum.
    pub fn verifies(&self) -> bool {
        self.finish() == 0
    }
}

/// Update a stored checksum after one 16-bit field changed from `old` to
/// `new` (RFC 1624 eqn. 3: HC' = ~(~HC + ~m + m')).
pub fn incremental_update(check: u16, old: u16, new: u16) -> u16 {
    let sum = accumulate(accumulate(!check, !old), new);
    !sum
}

#[cfg(test)]
mod tests {
    use super::*;

    // Header from RFC 1071 discussions / common IPv4 example
    fn make_ipv4_header() -> [u8; 20] {
        [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0x61, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ]
    }

    #[test]
    fn test_accumulate_end_around_carry() {
        assert_eq!(accumulate(0xFFFF, 0x0001), 0x0001);
        assert_eq!(accumulate(0x8000, 0x8000), 0x0001);
        assert_eq!(accumulate(0x1234, 0x0001), 0x1235);
    }

    #[test]
    fn test_valid_header_verifies() {
        let hdr = make_ipv4_header();
        assert_eq!(checksum(&hdr), 0);
        let mut c = Checksum::new();
        c.add_bytes(&hdr);
        assert!(c.verifies());
    }

    #[test]
    fn test_corruption_detected() {
        let mut hdr = make_ipv4_header();
        hdr[15] ^= 0x01;
        assert_ne!(checksum(&hdr), 0);
    }

    #[test]
    fn test_compute_matches_stored() {
        let mut hdr = make_ipv4_header();
        hdr[10] = 0;
        hdr[11] = 0;
        assert_eq!(checksum(&hdr), 0xb861);
    }

    #[test]
    fn test_odd_split_equals_contiguous() {
        let data: Vec<u8> = (1..=37).collect();
        let mut split = Checksum::new();
        split.add_bytes(&data[..3]);
        split.add_bytes(&data[3..4]);
        split.add_bytes(&data[4..19]);
        split.add_bytes(&[]);
        split.add_bytes(&data[19..]);
        assert_eq!(split.finish(), checksum(&data));
    }

    #[test]
    fn test_add_u16_after_odd_byte() {
        let mut a = Checksum::new();
        a.add_bytes(&[0x12]);
        a.add_u16(0x3456);
        assert_eq!(a.finish(), checksum(&[0x12, 0x34, 0x56]));
    }

    #[test]
    fn test_incremental_update_matches_recompute() {
        // ICMP echo request -> reply: type 8 -> 0.
        let mut msg = [0x08, 0x00, 0x00, 0x00, 0x12, 0x34, 0x00, 0x01, 0xaa, 0xbb];
        let check = checksum(&msg);
        msg[2..4].copy_from_slice(&check.to_be_bytes());

        let updated = incremental_update(check, 0x0800, 0x0000);

        let mut reply = msg;
        reply[0] = 0;
        reply[2] = 0;
        reply[3] = 0;
        assert_eq!(updated, checksum(&reply));
    }
}
