use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::cmp::Ordering;

/// Operational cap on guardian set size. Signature indices are a single
/// byte on the wire, but the protocol never runs sets larger than this.
pub const MAX_GUARDIAN_COUNT: usize = 19;

/// Shortest well-formed message id: "{chain}/{emitter}/{sequence}" with
/// single-character components.
pub const MIN_MESSAGE_ID_LEN: usize = 5;

/// Minimum number of distinct guardian signatures required for a set of
/// `num_guardians` keys to be authoritative. Tolerates up to
/// `num_guardians - quorum` faulty or absent signers.
pub fn calculate_quorum(num_guardians: usize) -> usize {
    num_guardians * 2 / 3 + 1
}

/// A structured observation produced by a chain watcher. The core only
/// inspects the message id (dedup key) and the (chain, emitter) pair
/// (subscription filtering); everything else passes through opaquely.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MessagePublication {
    pub tx_hash: [u8; 32],
    pub block_number: u64,
    pub block_timestamp: u32,
    pub emitter_chain: u16,
    pub emitter_address: [u8; 32],
    pub sequence: u64,
    pub nonce: u32,
    pub payload: Vec<u8>,
    pub consistency_level: u8,
}

impl MessagePublication {
    /// Human-readable emitter_chain/emitter_address/sequence tuple used as
    /// the dedup key throughout the node.
    pub fn message_id(&self) -> String {
        format!(
            "{}/{}/{}",
            self.emitter_chain,
            hex::encode(self.emitter_address),
            self.sequence
        )
    }

    /// Keccak hash of the observation body, computed over the same field
    /// layout a VAA body uses so the aggregation stage signs the bytes a
    /// finished VAA will carry.
    pub fn digest(&self) -> [u8; 32] {
        let mut data = Vec::new();
        data.extend_from_slice(&self.block_timestamp.to_be_bytes());
        data.extend_from_slice(&self.nonce.to_be_bytes());
        data.extend_from_slice(&self.emitter_chain.to_be_bytes());
        data.extend_from_slice(&self.emitter_address);
        data.extend_from_slice(&self.sequence.to_be_bytes());
        data.push(self.consistency_level);
        data.extend_from_slice(&self.payload);

        let mut hasher = Keccak256::new();
        hasher.update(&data);
        hasher.finalize().into()
    }
}

/// An observation held back until its release time. Ordered by release
/// time so the queue can hand messages out earliest-first.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    /// Unix seconds at which the message may be released.
    pub release_time: i64,
    pub msg: MessagePublication,
}

impl Ord for PendingMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.release_time
            .cmp(&other.release_time)
            .then_with(|| self.msg.message_id().cmp(&other.msg.message_id()))
    }
}

impl PartialOrd for PendingMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VAA {
    pub version: u8,
    pub guardian_set_index: u32,
    pub signatures: Vec<Signature>,
    pub timestamp: u32,
    pub nonce: u32,
    pub emitter_chain: u16,
    pub emitter_address: [u8; 32],
    pub sequence: u64,
    pub consistency_level: u8,
    pub payload: Vec<u8>,
}

impl VAA {
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        bytes.push(self.version);
        bytes.extend_from_slice(&self.guardian_set_index.to_be_bytes());
        bytes.push(self.signatures.len() as u8);

        for sig in &self.signatures {
            bytes.push(sig.guardian_index);
            bytes.extend_from_slice(&sig.r);
            bytes.extend_from_slice(&sig.s);
            bytes.push(sig.v);
        }

        bytes.extend_from_slice(&self.serialize_body());

        bytes
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);

        let version = r.u8()?;
        let guardian_set_index = r.u32()?;

        let sig_count = r.u8()? as usize;
        let mut signatures = Vec::with_capacity(sig_count);
        for _ in 0..sig_count {
            let guardian_index = r.u8()?;
            let r_bytes = r.array::<32>()?;
            let s_bytes = r.array::<32>()?;
            let v = r.u8()?;
            signatures.push(Signature {
                guardian_index,
                r: r_bytes,
                s: s_bytes,
                v,
            });
        }

        let timestamp = r.u32()?;
        let nonce = r.u32()?;
        let emitter_chain = r.u16()?;
        let emitter_address = r.array::<32>()?;
        let sequence = r.u64()?;
        let consistency_level = r.u8()?;
        let payload = r.rest().to_vec();

        Ok(VAA {
            version,
            guardian_set_index,
            signatures,
            timestamp,
            nonce,
            emitter_chain,
            emitter_address,
            sequence,
            consistency_level,
            payload,
        })
    }

    fn serialize_body(&self) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&self.timestamp.to_be_bytes());
        data.extend_from_slice(&self.nonce.to_be_bytes());
        data.extend_from_slice(&self.emitter_chain.to_be_bytes());
        data.extend_from_slice(&self.emitter_address);
        data.extend_from_slice(&self.sequence.to_be_bytes());
        data.push(self.consistency_level);
        data.extend_from_slice(&self.payload);
        data
    }

    /// Digest that guardians sign. The body is hashed twice so on-chain
    /// verifiers only need the first 32-byte hash instead of the full body.
    pub fn signing_digest(&self) -> [u8; 32] {
        let body_hash: [u8; 32] = {
            let mut hasher = Keccak256::new();
            hasher.update(self.serialize_body());
            hasher.finalize().into()
        };

        let mut hasher = Keccak256::new();
        hasher.update(body_hash);
        hasher.finalize().into()
    }

    pub fn message_id(&self) -> String {
        format!(
            "{}/{}/{}",
            self.emitter_chain,
            hex::encode(self.emitter_address),
            self.sequence
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub guardian_index: u8,
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: u8,
}

impl Signature {
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut bytes = [0u8; 65];
        bytes[0..32].copy_from_slice(&self.r);
        bytes[32..64].copy_from_slice(&self.s);
        bytes[64] = self.v;
        bytes
    }
}

/// A versioned list of trusted guardian signing addresses. Once published
/// for a given index the key list never changes; old sets are kept around
/// forever so historical VAAs stay verifiable.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GuardianSet {
    pub index: u32,
    pub keys: Vec<[u8; 20]>,
    pub creation_time: i64,
    pub expiration_time: u32,
}

impl GuardianSet {
    pub fn is_active(&self) -> bool {
        self.expiration_time == 0
            || self.expiration_time > chrono::Utc::now().timestamp() as u32
    }

    pub fn quorum_size(&self) -> usize {
        calculate_quorum(self.keys.len())
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        ensure!(
            self.offset + n <= self.bytes.len(),
            "unexpected end of input at offset {}",
            self.offset
        );
        let slice = &self.bytes[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        Ok(self.take(N)?.try_into().unwrap())
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.bytes[self.offset..];
        self.offset = self.bytes.len();
        slice
    }
}
