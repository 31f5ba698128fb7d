/// Reflected polynomial of CRC-32 as `java.util.zip.CRC32` computes it.
pub const CRC32_POLYNOMIAL: u32 = 0xEDB8_8320;
/// Reflected Castagnoli polynomial of `java.util.zip.CRC32C`.
pub const CRC32C_POLYNOMIAL: u32 = 0x82F6_3B78;

/// The byte-at-a-time lookup table the generated CRC code indexes.
pub fn crc_table(polynomial: u32) -> [u32; 256] {
    let mut table = [0; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let mut crc = i as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ polynomial } else { crc >> 1 };
        }
        *entry = crc;
    }
    table
}

/// Continues `crc` over `bytes`. The value is the one Java sees, inverted before and after.
pub fn update(table: &[u32; 256], crc: u32, bytes: &[u8]) -> u32 {
    let crc = bytes.iter().fold(!crc, |crc, byte| table[((crc ^ *byte as u32) & 0xFF) as usize] ^ (crc >> 8));
    !crc
}
