use super::fixtures::TEST_GUARDIAN_KEYS;
use guardian_common::signer::Signer;
use guardian_common::types::{Signature, VAA};

pub fn create_unsigned_vaa(guardian_set_index: u32) -> VAA {
    VAA {
        version: 1,
        guardian_set_index,
        signatures: vec![],
        timestamp: 1699276800,
        nonce: 0,
        emitter_chain: 2,
        emitter_address: [0x74; 32],
        sequence: 42,
        consistency_level: 200,
        payload: vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xe8],
    }
}

/// Builds a VAA carrying real signatures from the test guardians at the
/// given indices, in the given order.
pub fn create_signed_vaa(guardian_set_index: u32, signer_indices: &[u8]) -> VAA {
    let mut vaa = create_unsigned_vaa(guardian_set_index);
    let digest = vaa.signing_digest();

    for &idx in signer_indices {
        let signer = Signer::from_hex(TEST_GUARDIAN_KEYS[idx as usize]).unwrap();
        vaa.signatures.push(signer.sign(digest, idx).unwrap());
    }

    vaa
}

/// Like `create_signed_vaa`, but the signature at position `pos` is
/// produced by the wrong guardian key while keeping its claimed index.
pub fn create_signed_vaa_with_impostor(
    guardian_set_index: u32,
    signer_indices: &[u8],
    pos: usize,
    impostor_key: &str,
) -> VAA {
    let mut vaa = create_unsigned_vaa(guardian_set_index);
    let digest = vaa.signing_digest();

    for (i, &idx) in signer_indices.iter().enumerate() {
        let key = if i == pos {
            impostor_key
        } else {
            TEST_GUARDIAN_KEYS[idx as usize]
        };
        let signer = Signer::from_hex(key).unwrap();
        vaa.signatures.push(signer.sign(digest, idx).unwrap());
    }

    vaa
}

#[allow(dead_code)]
pub fn sign_digest(digest: [u8; 32], key_hex: &str, guardian_index: u8) -> Signature {
    let signer = Signer::from_hex(key_hex).unwrap();
    signer.sign(digest, guardian_index).unwrap()
}
