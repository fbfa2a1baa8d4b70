//! Absolute branches for 64-bit hosts, where a rel32 cannot reach every address

/// Length of [`jmp_abs`]
pub const JMP_ABS_LEN: usize = 14;
/// Length of [`call_abs`]
pub const CALL_ABS_LEN: usize = 16;

/// Generates an absolute jump to `target`: `jmp [rip + 0]` followed by the 8-byte address
pub fn jmp_abs(target: u64) -> [u8; JMP_ABS_LEN] {
    let mut code = [0u8; JMP_ABS_LEN];
    code[..6].copy_from_slice(&[0xFF, 0x25, 0x00, 0x00, 0x00, 0x00]);
    code[6..].copy_from_slice(&target.to_le_bytes());
    code
}

/// Generates an absolute call to `target`: `call [rip + 2]`, `jmp +8` over the inline 8-byte address
pub fn call_abs(target: u64) -> [u8; CALL_ABS_LEN] {
    let mut code = [0u8; CALL_ABS_LEN];
    code[..8].copy_from_slice(&[0xFF, 0x15, 0x02, 0x00, 0x00, 0x00, 0xEB, 0x08]);
    code[8..].copy_from_slice(&target.to_le_bytes());
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jmp_abs() {
        let code = jmp_abs(0x1122_3344_5566_7788);
        assert_eq!(
            code,
            [0xFF, 0x25, 0, 0, 0, 0, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
        );
    }

    #[test]
    fn test_call_abs() {
        let code = call_abs(0x1000);
        assert_eq!(&code[..8], [0xFF, 0x15, 0x02, 0, 0, 0, 0xEB, 0x08]);
        assert_eq!(u64::from_le_bytes(code[8..].try_into().unwrap()), 0x1000);
    }
}
