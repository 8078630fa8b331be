//! Internet checksum (RFC 1071)

/// One's complement sum of `data` as big-endian 16-bit words, added to
/// `initial` and left unfolded
///
/// An odd trailing byte is treated as the high byte of a zero-padded word.
pub fn sum(data: &[u8], initial: u32) -> u32 {
    let mut sum = initial;

    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += u16::from_be_bytes([*last, 0]) as u32;
    }

    sum
}

/// Fold carries back into the low 16 bits and complement
pub fn finish(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Checksum over `data`
///
/// Computing it over data that already carries a correct checksum
/// yields zero.
pub fn checksum(data: &[u8]) -> u16 {
    finish(sum(data, 0))
}
