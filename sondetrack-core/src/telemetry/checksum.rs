//! CRC16-CCITT (poly 0x1021, init 0xFFFF, no reflection) used by habitat sentences

const POLY: u16 = 0x1021;
const INIT: u16 = 0xFFFF;

/// Calculate the CRC16-CCITT checksum of `data`
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc = INIT;
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Checksum as it appears after the `*`: four upper case hex digits
pub fn format_checksum(data: &[u8]) -> String {
    format!("{:04X}", crc16_ccitt(data))
}
