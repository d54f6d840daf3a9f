//! CommitmentHash: a chunked commitment to a quantized model
//!
//! Records are grouped `RECORDS_PER_CHUNK` at a time. Each group's canonical
//! bits are hashed to one chunk hash, and the ordered chunk hashes are hashed
//! once more as a field array to produce the root. The result depends only on
//! record content and the primitive, so the client and the verifier agree.

use super::hash::HashPrimitive;
use super::layout::QuantizedRecord;
use super::quantize::QuantizeError;
use ark_bn254::Fr;
use ark_ff::PrimeField;
use serde::{Deserialize, Serialize};

pub const RECORDS_PER_CHUNK: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentHash {
    /// Root as a decimal field element
    pub root: String,
    /// Chunk hashes in order, decimal
    pub chunks: Vec<String>,
    pub record_count: usize,
    /// Name of the hash primitive that produced it
    pub primitive: String,
}

fn decimal(f: &Fr) -> String {
    f.into_bigint().to_string()
}

impl CommitmentHash {
    /// Commit to records in order
    pub fn compute(records: &[QuantizedRecord], hash: &dyn HashPrimitive) -> Result<Self, QuantizeError> {
        if records.is_empty() {
            return Err(QuantizeError::EmptyRecords);
        }
        let chunk_hashes: Vec<Fr> = records
            .chunks(RECORDS_PER_CHUNK)
            .map(|group| {
                let bits: Vec<bool> = group.iter().flat_map(|r| r.bits()).collect();
                hash.hash_bits(&bits)
            })
            .collect();
        let root = hash.hash_field_array(&chunk_hashes)?;

        Ok(Self {
            root: decimal(&root),
            chunks: chunk_hashes.iter().map(decimal).collect(),
            record_count: records.len(),
            primitive: hash.name().to_string(),
        })
    }

    /// Recompute from records and compare
    pub fn verify(&self, records: &[QuantizedRecord], hash: &dyn HashPrimitive) -> bool {
        Self::compute(records, hash).map(|c| c == *self).unwrap_or(false)
    }

    /// Root as a literal for on-chain registration
    pub fn root_literal(&self) -> String {
        format!("{}field", self.root)
    }
}
