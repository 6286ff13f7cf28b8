//! A toy [`BlockEncryption`] that XORs every byte with a keystream derived from a one-byte secret,
//! the block's log, and its index. Good enough to tell ciphertext apart from plaintext.

use causal_base::{
    encryption::{BlockEncryption, EncryptionError},
    types::data_types::{CryptoHash, LogKey},
};

pub(crate) struct XorEncryption {
    secret: u8,
}

impl XorEncryption {
    pub(crate) fn new(secret: u8) -> XorEncryption {
        XorEncryption { secret }
    }

    fn keystream(&self, key: &LogKey, index: u64) -> impl Iterator<Item = u8> {
        let key = key.bytes();
        let secret = self.secret;
        (0..).map(move |i: usize| secret ^ key[i % 32] ^ (index as u8).wrapping_add(i as u8) ^ 0x5a)
    }
}

impl BlockEncryption for XorEncryption {
    fn id(&self) -> CryptoHash {
        CryptoHash::new([self.secret; 32])
    }

    fn encrypt(&self, key: &LogKey, index: u64, block: &[u8]) -> Vec<u8> {
        block
            .iter()
            .zip(self.keystream(key, index))
            .map(|(byte, k)| byte ^ k)
            .collect()
    }

    fn decrypt(&self, key: &LogKey, index: u64, block: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        Ok(self.encrypt(key, index, block))
    }
}
