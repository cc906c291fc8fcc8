//! 校验和辅助函数

use sha2::{Digest, Sha256};

/// 计算内容的 SHA256 哈希值（十六进制字符串）
///
/// 远端存储没有原生版本校验时，用它比较写入前后的内容。
pub fn content_checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = hasher.finalize();
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_checksum() {
        let checksum = content_checksum(b"test content");

        // 64 位十六进制字符串（SHA256）
        assert_eq!(checksum.len(), 64);
        assert!(checksum.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(checksum, content_checksum(b"test content"));
    }

    #[test]
    fn test_content_checksum_differs() {
        assert_ne!(content_checksum(b"content A"), content_checksum(b"content B"));
    }
}
