/// CRC-32 (IEEE, reflected) used to give every resource locator a short,
/// stable tag for its default checkpoint file name.

const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Compute CRC-32 over `data`.
pub fn checksum(data: &[u8]) -> u32 {
    let crc = data.iter().fold(0xFFFF_FFFFu32, |crc, &b| {
        (crc >> 8) ^ CRC32_TABLE[((crc as u8) ^ b) as usize]
    });
    crc ^ 0xFFFF_FFFF
}

/// Eight lowercase hex digits identifying `locator`.
pub fn locator_tag(locator: &str) -> String {
    format!("{:08x}", checksum(locator.as_bytes()))
}
