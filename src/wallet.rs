//! Local Solana keypair and transaction signing.
//!
//! Jupiter returns unsigned versioned transactions. Signing only needs the
//! wire layout: a compact-u16 signature count, the signature slots, then the
//! message bytes. The fee payer is always the first account key and signs slot 0.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signer, SigningKey};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Error, Result};

const SIGNATURE_LEN: usize = 64;
const PUBKEY_LEN: usize = 32;
const VERSION_PREFIX_MASK: u8 = 0x80;

pub struct Keypair {
    signing_key: SigningKey,
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("pubkey", &self.pubkey())
            .finish()
    }
}

/// Transaction with the fee-payer signature filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub base64: String,
    /// Base58 signature, which doubles as the transaction id
    pub signature: String,
}

impl Keypair {
    /// Load a Solana CLI keypair file (JSON array of 64 bytes)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let bytes: Vec<u8> = serde_json::from_str(content.trim())
            .map_err(|e| Error::Wallet(format!("keypair file is not a JSON byte array: {}", e)))?;
        let keypair = Self::from_bytes(&bytes)?;
        info!(path = %path.as_ref().display(), pubkey = %keypair.pubkey(), "keypair loaded");
        Ok(keypair)
    }

    /// Parse a base58-encoded 64-byte secret (wallet export format)
    pub fn from_base58(encoded: &str) -> Result<Self> {
        let bytes = bs58::decode(encoded.trim())
            .into_vec()
            .map_err(|e| Error::Wallet(format!("invalid base58 secret: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: &[u8; 64] = bytes
            .try_into()
            .map_err(|_| Error::Wallet(format!("expected 64 keypair bytes, got {}", bytes.len())))?;
        let signing_key = SigningKey::from_keypair_bytes(bytes)
            .map_err(|e| Error::Wallet(format!("public key does not match secret: {}", e)))?;
        Ok(Self { signing_key })
    }

    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.signing_key.to_keypair_bytes()
    }

    pub fn pubkey_bytes(&self) -> [u8; PUBKEY_LEN] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Base58 public key
    pub fn pubkey(&self) -> String {
        bs58::encode(self.pubkey_bytes()).into_string()
    }

    pub fn sign_message(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Sign a base64 wire transaction as its fee payer
    pub fn sign_transaction(&self, base64_tx: &str) -> Result<SignedTransaction> {
        let mut tx = BASE64
            .decode(base64_tx.trim())
            .map_err(|e| Error::Wallet(format!("transaction is not base64: {}", e)))?;

        let (sig_count, header_len) = decode_compact_u16(&tx)?;
        if sig_count == 0 {
            return Err(Error::Wallet("transaction has no signature slots".to_string()));
        }
        let message_start = header_len + sig_count * SIGNATURE_LEN;
        if tx.len() <= message_start {
            return Err(Error::Wallet("transaction truncated before message".to_string()));
        }

        let message = &tx[message_start..];
        let fee_payer = fee_payer(message)?;
        if fee_payer != self.pubkey_bytes() {
            return Err(Error::Wallet(format!(
                "fee payer {} is not this wallet ({})",
                bs58::encode(fee_payer).into_string(),
                self.pubkey()
            )));
        }

        let signature = self.sign_message(message);
        tx[header_len..header_len + SIGNATURE_LEN].copy_from_slice(&signature);

        let signature = bs58::encode(signature).into_string();
        debug!(signature = %signature, signers = sig_count, "transaction signed");
        Ok(SignedTransaction {
            base64: BASE64.encode(&tx),
            signature,
        })
    }
}

/// Decode a compact-u16 ("shortvec") length prefix; returns (value, bytes read)
pub fn decode_compact_u16(bytes: &[u8]) -> Result<(usize, usize)> {
    let mut value = 0usize;
    for i in 0..3 {
        let byte = *bytes
            .get(i)
            .ok_or_else(|| Error::Wallet("truncated compact-u16".to_string()))?;
        value |= ((byte & 0x7f) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(Error::Wallet("compact-u16 longer than 3 bytes".to_string()))
}

pub fn encode_compact_u16(mut value: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(3);
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

/// First static account key of a legacy or versioned message
fn fee_payer(message: &[u8]) -> Result<[u8; PUBKEY_LEN]> {
    let mut offset = 0;
    if message.first().is_some_and(|b| b & VERSION_PREFIX_MASK != 0) {
        offset += 1;
    }
    // header: required signatures, readonly signed, readonly unsigned
    offset += 3;
    let (key_count, len) = decode_compact_u16(message.get(offset..).unwrap_or_default())?;
    if key_count == 0 {
        return Err(Error::Wallet("message has no account keys".to_string()));
    }
    offset += len;
    message
        .get(offset..offset + PUBKEY_LEN)
        .and_then(|k| k.try_into().ok())
        .ok_or_else(|| Error::Wallet("message truncated in account keys".to_string()))
}
