//! CRC16-CCITT（XModem 变体）
//!
//! YModem 包校验使用多项式 0x1021、初值 0x0000 的 CCITT 校验。

/// 计算缓冲区的 CRC16-CCITT（XModem：初值 0）
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;

    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        // XModem 参考向量
        assert_eq!(crc16_ccitt(b"123456789"), 0x31C3);
        assert_eq!(crc16_ccitt(b""), 0x0000);
    }

    #[test]
    fn test_single_bit_sensitivity() {
        let a = crc16_ccitt(b"G1 X1\n");
        let b = crc16_ccitt(b"G1 X2\n");
        assert_ne!(a, b);
    }
}
