use crate::types::Signature;
use anyhow::Result;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha3::{Digest, Keccak256};

/// Holds the guardian's signing key. Signatures are recoverable ECDSA over
/// secp256k1, address derivation is the usual keccak-of-pubkey scheme so
/// that recovered addresses line up with the on-chain guardian set.
pub struct Signer {
    secret_key: SecretKey,
    secp: Secp256k1<secp256k1::All>,
}

impl Signer {
    pub fn from_hex(private_key_hex: &str) -> Result<Self> {
        let private_key_bytes = hex::decode(private_key_hex.trim_start_matches("0x"))?;
        let secret_key = SecretKey::from_slice(&private_key_bytes)?;
        let secp = Secp256k1::new();

        Ok(Self { secret_key, secp })
    }

    pub fn sign(&self, digest: [u8; 32], guardian_index: u8) -> Result<Signature> {
        let message = Message::from_digest_slice(&digest)?;
        let sig = self.secp.sign_ecdsa_recoverable(&message, &self.secret_key);

        let (recovery_id, compact_sig) = sig.serialize_compact();

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&compact_sig[0..32]);
        s.copy_from_slice(&compact_sig[32..64]);
        let v = 27 + recovery_id.to_i32() as u8;

        Ok(Signature {
            guardian_index,
            r,
            s,
            v,
        })
    }

    pub fn address(&self) -> [u8; 20] {
        let public_key = PublicKey::from_secret_key(&self.secp, &self.secret_key);
        pubkey_to_address(&public_key)
    }
}

/// Recovers the signer address from a 65-byte recoverable signature over
/// the given digest.
pub fn recover_signer(digest: [u8; 32], signature: &[u8; 65]) -> Result<[u8; 20]> {
    let secp = Secp256k1::new();

    let mut compact_sig = [0u8; 64];
    compact_sig.copy_from_slice(&signature[0..64]);
    let recovery_id =
        secp256k1::ecdsa::RecoveryId::from_i32((signature[64] as i32) - 27)?;

    let recoverable_sig =
        secp256k1::ecdsa::RecoverableSignature::from_compact(&compact_sig, recovery_id)?;
    let message = Message::from_digest_slice(&digest)?;
    let public_key = secp.recover_ecdsa(&message, &recoverable_sig)?;

    Ok(pubkey_to_address(&public_key))
}

fn pubkey_to_address(public_key: &PublicKey) -> [u8; 20] {
    let public_key_bytes = public_key.serialize_uncompressed();

    let mut hasher = Keccak256::new();
    hasher.update(&public_key_bytes[1..]);
    let hash = hasher.finalize();

    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..32]);
    address
}
