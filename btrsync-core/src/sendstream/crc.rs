/// CRC32C over a command's header-with-zeroed-checksum-field followed by its
/// payload. The kernel computes the checksum this way so a receiver can
/// verify a command without first separating header from body.
pub fn command_checksum(header_with_zeroed_crc: &[u8], payload: &[u8]) -> u32 {
    let mut crc = crc32c::crc32c(header_with_zeroed_crc);
    crc = crc32c::crc32c_append(crc, payload);
    crc
}
