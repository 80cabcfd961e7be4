//! AES-128 分片解密

use aes::Aes128;
use cbc::Decryptor;
use cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};

use crate::core::error_handling::{HlsError, HlsResult};
use crate::parsers::m3u8_parser::EncryptionInfo;

/// Key material for one media playlist
#[derive(Debug, Clone)]
pub struct SegmentCipher {
    key: [u8; 16],
    explicit_iv: Option<[u8; 16]>,
    media_sequence: u64,
}

impl SegmentCipher {
    pub fn new(key: &[u8], info: &EncryptionInfo, media_sequence: u64) -> HlsResult<Self> {
        let key: [u8; 16] = key.try_into().map_err(|_| {
            HlsError::Decrypt(format!(
                "AES-128 key must be 16 bytes, got {}",
                key.len()
            ))
        })?;

        let explicit_iv = match info.iv.as_deref() {
            Some(iv) => match parse_iv(iv) {
                Some(parsed) => Some(parsed),
                None => {
                    tracing::warn!("IV 格式解析失败，使用媒体序列号: {}", iv);
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            key,
            explicit_iv,
            media_sequence,
        })
    }

    /// IV for the segment at `index`: the tag value, else its media sequence number
    pub fn iv_for(&self, index: usize) -> [u8; 16] {
        if let Some(iv) = self.explicit_iv {
            return iv;
        }
        let mut iv = [0u8; 16];
        let sequence = self.media_sequence.saturating_add(index as u64);
        iv[8..].copy_from_slice(&sequence.to_be_bytes());
        iv
    }

    pub fn decrypt(&self, data: &[u8], index: usize) -> HlsResult<Vec<u8>> {
        let iv = self.iv_for(index);
        Decryptor::<Aes128>::new(&self.key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|_| HlsError::Decrypt(format!("segment #{} failed to decrypt", index)))
    }
}

fn parse_iv(iv: &str) -> Option<[u8; 16]> {
    let trimmed = iv.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits).ok()?.try_into().ok()
}
