//! Tokenizer collaborator and a byte-level implementation.

use crate::error::{DecodeError, Result};

/// Text <-> token id conversion used around the decode loop.
pub trait Tokenizer {
    /// Encode text without adding special tokens.
    fn encode(&self, text: &str) -> Result<Vec<i64>>;

    /// Decode ids back to text, optionally dropping special tokens.
    fn decode(&self, ids: &[i64], skip_special_tokens: bool) -> Result<String>;

    /// End-of-sequence token id.
    fn eos_id(&self) -> i64;
}

pub const PAD_ID: i64 = 0;
pub const BOS_ID: i64 = 1;
pub const EOS_ID: i64 = 2;

/// Offset of byte tokens: byte `b` is token `b + 3`.
const BYTE_OFFSET: i64 = 3;

/// Maps every UTF-8 byte to its own token after three special ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteTokenizer;

impl ByteTokenizer {
    pub const VOCAB_SIZE: usize = 256 + BYTE_OFFSET as usize;

    pub fn new() -> Self {
        ByteTokenizer
    }

    /// String form of a token, `<0xXX>` for bytes.
    pub fn piece(&self, id: i64) -> Option<String> {
        match id {
            PAD_ID => Some("<pad>".into()),
            BOS_ID => Some("<s>".into()),
            EOS_ID => Some("</s>".into()),
            _ => self.byte(id).map(|b| format!("<0x{:02X}>", b)),
        }
    }

    fn byte(&self, id: i64) -> Option<u8> {
        u8::try_from(id - BYTE_OFFSET).ok()
    }

    fn is_special(&self, id: i64) -> bool {
        (PAD_ID..BYTE_OFFSET).contains(&id)
    }
}

impl Tokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<i64>> {
        Ok(text.bytes().map(|b| b as i64 + BYTE_OFFSET).collect())
    }

    fn decode(&self, ids: &[i64], skip_special_tokens: bool) -> Result<String> {
        let mut bytes = Vec::with_capacity(ids.len());
        for &id in ids {
            if self.is_special(id) {
                if !skip_special_tokens {
                    // piece() covers every special id
                    bytes.extend(self.piece(id).unwrap_or_default().into_bytes());
                }
                continue;
            }
            let byte = self
                .byte(id)
                .ok_or_else(|| DecodeError::Tokenizer(format!("unknown token id {}", id)))?;
            bytes.push(byte);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn eos_id(&self) -> i64 {
        EOS_ID
    }
}
