//! Swappable hash primitive behind the commitment
//!
//! The commitment only depends on the algebraic contract: bits in, one field
//! element out; field array in, one field element out. The verifier's exact
//! primitive plugs in through `HashPrimitive`.

use super::quantize::QuantizeError;
use ark_bn254::Fr;
use ark_ff::PrimeField;
use ark_serialize::CanonicalSerialize;
use sha2::{Digest, Sha256};

pub trait HashPrimitive: Send + Sync {
    fn name(&self) -> &'static str;

    fn hash_bits(&self, bits: &[bool]) -> Fr;

    fn hash_field_array(&self, values: &[Fr]) -> Result<Fr, QuantizeError>;
}

/// SHA-256 with domain tags, reduced into the BN254 scalar field
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256FieldHash;

const BITS_DOMAIN: &[u8] = b"bioproof/hash-bits/v1";
const ARRAY_DOMAIN: &[u8] = b"bioproof/hash-array/v1";

/// Pack bits little-endian within each byte
fn pack_bits(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|byte| {
            byte.iter()
                .enumerate()
                .fold(0u8, |acc, (i, &b)| acc | ((b as u8) << i))
        })
        .collect()
}

impl HashPrimitive for Sha256FieldHash {
    fn name(&self) -> &'static str {
        "sha256-bn254"
    }

    fn hash_bits(&self, bits: &[bool]) -> Fr {
        let mut hasher = Sha256::new();
        hasher.update(BITS_DOMAIN);
        hasher.update((bits.len() as u64).to_le_bytes());
        hasher.update(pack_bits(bits));
        Fr::from_le_bytes_mod_order(&hasher.finalize())
    }

    fn hash_field_array(&self, values: &[Fr]) -> Result<Fr, QuantizeError> {
        let mut hasher = Sha256::new();
        hasher.update(ARRAY_DOMAIN);
        hasher.update((values.len() as u64).to_le_bytes());
        let mut buf = Vec::with_capacity(32);
        for v in values {
            buf.clear();
            v.serialize_compressed(&mut buf)
                .map_err(|e| QuantizeError::Serialization(e.to_string()))?;
            hasher.update(&buf);
        }
        Ok(Fr::from_le_bytes_mod_order(&hasher.finalize()))
    }
}
