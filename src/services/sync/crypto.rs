//! 同步负载加密
//!
//! - KDF: Argon2id，每次加密随机 16 字节 salt，派生 32 字节密钥
//! - AEAD: AES-256-GCM，每次加密随机 12 字节 nonce
//! - 规范化的 header（版本、KDF 参数、salt、nonce）作为附加认证数据，
//!   篡改 header 任意字段都会导致解密失败
//!
//! 传输格式（JSON，二进制字段 base64 编码）：
//!
//! ```text
//! {"header":{"schemaVersion":1,"kdfParams":{...},"salt":"..","nonce":".."},"ciphertext":".."}
//! ```

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

/// 加密容器格式版本
pub const BUNDLE_SCHEMA_VERSION: u32 = 1;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;

// 参数上下限：远端 bundle 不可信，不能让它指定任意大的计算量
const MIN_MEMORY_KIB: u32 = 8 * 1024;
const MAX_MEMORY_KIB: u32 = 1024 * 1024;
const MIN_ITERATIONS: u32 = 1;
const MAX_ITERATIONS: u32 = 10;
const MIN_PARALLELISM: u32 = 1;
const MAX_PARALLELISM: u32 = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("加密失败: {0}")]
    Encryption(String),

    /// 对外只有这一种解密错误，具体原因只记录在 debug 日志中
    #[error("解密失败：密码错误或数据已损坏")]
    Decryption,

    #[error("KDF 参数无效: {0}")]
    InvalidParams(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KdfAlgorithm {
    Argon2id,
}

/// Argon2id 参数（随 bundle 一起传输）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KdfParams {
    pub algorithm: KdfAlgorithm,
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            algorithm: KdfAlgorithm::Argon2id,
            memory_kib: 64 * 1024, // 64 MiB
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        Self {
            algorithm: KdfAlgorithm::Argon2id,
            memory_kib,
            iterations,
            parallelism,
        }
    }

    /// 检查参数是否在允许范围内
    pub fn validate(&self) -> Result<()> {
        if !(MIN_MEMORY_KIB..=MAX_MEMORY_KIB).contains(&self.memory_kib) {
            return Err(CryptoError::InvalidParams(format!(
                "memoryKib 必须在 {MIN_MEMORY_KIB}..={MAX_MEMORY_KIB} 之间，当前 {}",
                self.memory_kib
            )));
        }
        if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&self.iterations) {
            return Err(CryptoError::InvalidParams(format!(
                "iterations 必须在 {MIN_ITERATIONS}..={MAX_ITERATIONS} 之间，当前 {}",
                self.iterations
            )));
        }
        if !(MIN_PARALLELISM..=MAX_PARALLELISM).contains(&self.parallelism) {
            return Err(CryptoError::InvalidParams(format!(
                "parallelism 必须在 {MIN_PARALLELISM}..={MAX_PARALLELISM} 之间，当前 {}",
                self.parallelism
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BundleHeader {
    pub schema_version: u32,
    pub kdf_params: KdfParams,
    pub salt: String,
    pub nonce: String,
}

impl BundleHeader {
    /// 作为 AAD 的规范化字节（字段顺序固定，紧凑 JSON）
    fn associated_data(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CryptoError::Encryption(e.to_string()))
    }
}

/// 加密后的容器，是远端 blob 中保存的唯一内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EncryptedBundle {
    pub header: BundleHeader,
    pub ciphertext: String,
}

impl EncryptedBundle {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CryptoError::Encryption(e.to_string()))
    }

    /// 解析 JSON 形式的 bundle；任何格式问题都视为解密失败
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| {
            tracing::debug!(error = %e, "bundle JSON 解析失败");
            CryptoError::Decryption
        })
    }
}

/// 使用默认 KDF 参数加密
pub fn encrypt(plaintext: &[u8], password: &str) -> Result<EncryptedBundle> {
    encrypt_with_params(plaintext, password, &KdfParams::default())
}

pub fn encrypt_with_params(
    plaintext: &[u8],
    password: &str,
    params: &KdfParams,
) -> Result<EncryptedBundle> {
    params.validate()?;

    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(password, &salt, params)
        .map_err(|e| CryptoError::Encryption(format!("密钥派生失败: {e}")))?;

    let header = BundleHeader {
        schema_version: BUNDLE_SCHEMA_VERSION,
        kdf_params: *params,
        salt: BASE64.encode(salt),
        nonce: BASE64.encode(nonce_bytes),
    };
    let aad = header.associated_data()?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(EncryptedBundle {
        header,
        ciphertext: BASE64.encode(ciphertext),
    })
}

/// 加密并直接输出 JSON 字符串
pub fn encrypt_to_string(plaintext: &[u8], password: &str, params: &KdfParams) -> Result<String> {
    encrypt_with_params(plaintext, password, params)?.to_json()
}

pub fn decrypt(bundle: &EncryptedBundle, password: &str) -> Result<Vec<u8>> {
    let header = &bundle.header;

    if header.schema_version != BUNDLE_SCHEMA_VERSION {
        return Err(decryption_failure(&format!(
            "不支持的 bundle 版本: {}",
            header.schema_version
        )));
    }
    if let Err(e) = header.kdf_params.validate() {
        return Err(decryption_failure(&e.to_string()));
    }

    let salt = decode_fixed::<SALT_LEN>(&header.salt, "salt")?;
    let nonce_bytes = decode_fixed::<NONCE_LEN>(&header.nonce, "nonce")?;
    let ciphertext = BASE64
        .decode(&bundle.ciphertext)
        .map_err(|e| decryption_failure(&format!("ciphertext base64 无效: {e}")))?;
    if ciphertext.len() < TAG_LEN {
        return Err(decryption_failure("ciphertext 过短"));
    }

    let key = derive_key(password, &salt, &header.kdf_params)
        .map_err(|e| decryption_failure(&format!("密钥派生失败: {e}")))?;
    let aad = header.associated_data().map_err(|_| CryptoError::Decryption)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
    cipher
        .decrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: &ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| decryption_failure("认证标签校验失败"))
}

/// 解析 JSON 形式的 bundle 并解密
pub fn decrypt_str(content: &str, password: &str) -> Result<Vec<u8>> {
    let bundle = EncryptedBundle::from_json(content)?;
    decrypt(&bundle, password)
}

fn derive_key(
    password: &str,
    salt: &[u8],
    params: &KdfParams,
) -> std::result::Result<Zeroizing<[u8; KEY_LEN]>, argon2::Error> {
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2.hash_password_into(password.as_bytes(), salt, &mut key[..])?;
    Ok(key)
}

fn decode_fixed<const N: usize>(encoded: &str, field: &str) -> Result<[u8; N]> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| decryption_failure(&format!("{field} base64 无效: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| decryption_failure(&format!("{field} 长度错误")))
}

fn decryption_failure(reason: &str) -> CryptoError {
    tracing::debug!(reason, "解密失败");
    CryptoError::Decryption
}

#[cfg(test)]
mod tests {
    use super::*;

    // 测试使用允许范围内最低的参数，避免拖慢测试
    fn fast_params() -> KdfParams {
        KdfParams::new(MIN_MEMORY_KIB, 1, 1)
    }

    const PASSWORD: &str = "correct horse battery";

    #[test]
    fn test_round_trip() {
        let plaintext = br#"{"mirrors":[{"name":"a","apiKey":"sk-1"}]}"#;
        let bundle = encrypt_with_params(plaintext, PASSWORD, &fast_params()).unwrap();
        let decrypted = decrypt(&bundle, PASSWORD).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_round_trip_through_json() {
        let content = encrypt_to_string(b"payload", PASSWORD, &fast_params()).unwrap();
        assert!(!content.contains("payload"));
        assert_eq!(decrypt_str(&content, PASSWORD).unwrap(), b"payload");
    }

    #[test]
    fn test_wire_format_field_names() {
        let content = encrypt_to_string(b"payload", PASSWORD, &fast_params()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["header"]["schemaVersion"], 1);
        assert_eq!(value["header"]["kdfParams"]["algorithm"], "argon2id");
        assert_eq!(value["header"]["kdfParams"]["memoryKib"], MIN_MEMORY_KIB);
        assert!(value["header"]["salt"].is_string());
        assert!(value["header"]["nonce"].is_string());
        assert!(value["ciphertext"].is_string());
    }

    #[test]
    fn test_wrong_password() {
        let bundle = encrypt_with_params(b"secret", PASSWORD, &fast_params()).unwrap();
        assert_eq!(
            decrypt(&bundle, "wrong password").unwrap_err(),
            CryptoError::Decryption
        );
    }

    #[test]
    fn test_empty_plaintext_round_trip() {
        let bundle = encrypt_with_params(b"", PASSWORD, &fast_params()).unwrap();
        // 只剩认证标签
        assert_eq!(BASE64.decode(&bundle.ciphertext).unwrap().len(), TAG_LEN);
        assert!(decrypt(&bundle, PASSWORD).unwrap().is_empty());
        assert_eq!(
            decrypt(&bundle, "wrong password").unwrap_err(),
            CryptoError::Decryption
        );
    }

    #[test]
    fn test_salt_and_nonce_unique_per_call() {
        let a = encrypt_with_params(b"same", PASSWORD, &fast_params()).unwrap();
        let b = encrypt_with_params(b"same", PASSWORD, &fast_params()).unwrap();
        assert_ne!(a.header.salt, b.header.salt);
        assert_ne!(a.header.nonce, b.header.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_tampered_ciphertext_bytes() {
        let bundle = encrypt_with_params(b"secret data", PASSWORD, &fast_params()).unwrap();
        let raw = BASE64.decode(&bundle.ciphertext).unwrap();

        // 首字节（密文）和末字节（认证标签）
        for index in [0, raw.len() - 1] {
            let mut tampered_raw = raw.clone();
            tampered_raw[index] ^= 0x01;
            let mut tampered = bundle.clone();
            tampered.ciphertext = BASE64.encode(&tampered_raw);
            assert_eq!(
                decrypt(&tampered, PASSWORD).unwrap_err(),
                CryptoError::Decryption
            );
        }
    }

    #[test]
    fn test_tampered_header_fields() {
        let bundle = encrypt_with_params(b"secret data", PASSWORD, &fast_params()).unwrap();

        let mut salt = BASE64.decode(&bundle.header.salt).unwrap();
        salt[0] ^= 0x80;
        let mut tampered = bundle.clone();
        tampered.header.salt = BASE64.encode(&salt);
        assert_eq!(decrypt(&tampered, PASSWORD).unwrap_err(), CryptoError::Decryption);

        let mut nonce = BASE64.decode(&bundle.header.nonce).unwrap();
        nonce[5] ^= 0x01;
        let mut tampered = bundle.clone();
        tampered.header.nonce = BASE64.encode(&nonce);
        assert_eq!(decrypt(&tampered, PASSWORD).unwrap_err(), CryptoError::Decryption);

        // 参数仍合法，但与 AAD 不一致
        let mut tampered = bundle.clone();
        tampered.header.kdf_params.memory_kib += 1024;
        assert_eq!(decrypt(&tampered, PASSWORD).unwrap_err(), CryptoError::Decryption);
    }

    #[test]
    fn test_tampered_wire_characters() {
        let content = encrypt_to_string(b"secret data", PASSWORD, &fast_params()).unwrap();

        let salt_pos = content.find("\"salt\":\"").unwrap() + 8;
        let ciphertext_pos = content.find("\"ciphertext\":\"").unwrap() + 14;
        let brace_pos = 0;
        let version_pos = content.find("\"schemaVersion\":").unwrap() + 16;

        for index in [salt_pos, ciphertext_pos, brace_pos, version_pos] {
            let mut bytes = content.clone().into_bytes();
            bytes[index] ^= 0x01;
            let tampered = String::from_utf8(bytes).unwrap();
            assert_eq!(
                decrypt_str(&tampered, PASSWORD).unwrap_err(),
                CryptoError::Decryption,
                "byte {index} flipped"
            );
        }
    }

    #[test]
    fn test_unknown_schema_version() {
        let mut bundle = encrypt_with_params(b"secret", PASSWORD, &fast_params()).unwrap();
        bundle.header.schema_version = 2;
        assert_eq!(decrypt(&bundle, PASSWORD).unwrap_err(), CryptoError::Decryption);
    }

    #[test]
    fn test_hostile_params_rejected_before_kdf() {
        let mut bundle = encrypt_with_params(b"secret", PASSWORD, &fast_params()).unwrap();
        bundle.header.kdf_params.memory_kib = u32::MAX;
        assert_eq!(decrypt(&bundle, PASSWORD).unwrap_err(), CryptoError::Decryption);

        let mut bundle = encrypt_with_params(b"secret", PASSWORD, &fast_params()).unwrap();
        bundle.header.kdf_params.iterations = 0;
        assert_eq!(decrypt(&bundle, PASSWORD).unwrap_err(), CryptoError::Decryption);
    }

    #[test]
    fn test_invalid_params_on_encrypt() {
        let err = encrypt_with_params(b"x", PASSWORD, &KdfParams::new(1024, 1, 1)).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidParams(_)));

        let err = encrypt_with_params(b"x", PASSWORD, &KdfParams::new(MIN_MEMORY_KIB, 11, 1))
            .unwrap_err();
        assert!(matches!(err, CryptoError::InvalidParams(_)));

        let err = encrypt_with_params(b"x", PASSWORD, &KdfParams::new(MIN_MEMORY_KIB, 1, 17))
            .unwrap_err();
        assert!(matches!(err, CryptoError::InvalidParams(_)));
    }

    #[test]
    fn test_malformed_json_and_unknown_fields() {
        assert_eq!(decrypt_str("not json", PASSWORD).unwrap_err(), CryptoError::Decryption);

        let content = encrypt_to_string(b"secret", PASSWORD, &fast_params()).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&content).unwrap();
        value["extra"] = serde_json::json!(true);
        assert_eq!(
            decrypt_str(&value.to_string(), PASSWORD).unwrap_err(),
            CryptoError::Decryption
        );
    }

    #[test]
    fn test_default_params_are_valid() {
        let params = KdfParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.memory_kib, 65536);
        assert_eq!(params.iterations, 3);
        assert_eq!(params.parallelism, 1);
    }
}
