//! MPEG-2 CRC-32 (ITU-T H.222.0 / ISO 13818-1).
//!
//! Polynomial 0x04C11DB7, init 0xFFFFFFFF, no reflection, no final XOR.
//! Not the zlib CRC-32.

const POLYNOMIAL: u32 = 0x04C1_1DB7;

const TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
};

/// Compute the MPEG-2 CRC-32 of `data`.
pub fn mpeg2_crc32(data: &[u8]) -> u32 {
    data.iter().fold(0xFFFF_FFFF, |crc, &byte| {
        (crc << 8) ^ TABLE[((crc >> 24) ^ byte as u32) as usize]
    })
}

/// A splice_info_section is intact when the CRC over the whole section,
/// trailing CRC_32 included, is zero.
pub fn section_crc_ok(section: &[u8]) -> bool {
    mpeg2_crc32(section) == 0
}
