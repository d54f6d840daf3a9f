//! Record layout consumed by the verifier
//!
//! The layout is a data table per modality: which tensors go in which order,
//! whether each field carries one value or a pair, and how many fields fit in
//! one record struct. Every tensor starts a fresh record; a partially filled
//! record is padded with zero fields. The packer refuses any model whose shape
//! disagrees with the table.

use super::quantize::{QuantizeError, QuantizedModel};
use crate::sample::{Architecture, Modality};
use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tensor {
    W1,
    B1,
    W2,
    B2,
}

impl Tensor {
    pub fn name(&self) -> &'static str {
        match self {
            Tensor::W1 => "w1",
            Tensor::B1 => "b1",
            Tensor::W2 => "w2",
            Tensor::B2 => "b2",
        }
    }

    fn len(&self, arch: &Architecture) -> usize {
        match self {
            Tensor::W1 => arch.hidden * arch.input,
            Tensor::B1 => arch.hidden,
            Tensor::W2 => arch.output * arch.hidden,
            Tensor::B2 => arch.output,
        }
    }

    fn values<'a>(&self, model: &'a QuantizedModel) -> &'a [i64] {
        match self {
            Tensor::W1 => &model.w1,
            Tensor::B1 => &model.b1,
            Tensor::W2 => &model.w2,
            Tensor::B2 => &model.b2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldEncoding {
    /// One signed value per field
    Single,
    /// Two values per field, offset-binary in the high and low 64 bits
    Pair,
}

impl FieldEncoding {
    pub fn values_per_field(&self) -> usize {
        match self {
            FieldEncoding::Single => 1,
            FieldEncoding::Pair => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub tensor: Tensor,
    pub encoding: FieldEncoding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLayout {
    pub modality: Modality,
    pub architecture: Architecture,
    pub fields_per_record: usize,
    pub segments: Vec<Segment>,
}

/// Signed value as a field element; negatives wrap to `p - |v|`
pub fn single_field(v: i64) -> Fr {
    let magnitude = Fr::from(v.unsigned_abs());
    if v < 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Two signed values packed as `(hi + 2^63) << 64 | (lo + 2^63)`
pub fn pair_field(hi: i64, lo: i64) -> Fr {
    let offset = |v: i64| (v as u64) ^ (1 << 63);
    let packed = ((offset(hi) as u128) << 64) | offset(lo) as u128;
    Fr::from(packed)
}

/// Little-endian canonical bits of a field element, modulus width
pub fn field_bits(f: &Fr) -> Vec<bool> {
    let mut bits = f.into_bigint().to_bits_le();
    bits.truncate(Fr::MODULUS_BIT_SIZE as usize);
    bits
}

/// One packed record struct
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedRecord {
    pub fields: Vec<Fr>,
}

impl QuantizedRecord {
    pub fn bits(&self) -> Vec<bool> {
        self.fields.iter().flat_map(field_bits).collect()
    }

    /// Struct literal accepted by the proving service: `{ f0: 12field, ... }`
    pub fn to_literal(&self) -> String {
        let body: Vec<String> = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| format!("f{}: {}field", i, f.into_bigint()))
            .collect();
        format!("{{ {} }}", body.join(", "))
    }
}

fn chunk_records(fields: Vec<Fr>, per_record: usize) -> Vec<QuantizedRecord> {
    fields
        .chunks(per_record)
        .map(|chunk| {
            let mut fields = chunk.to_vec();
            fields.resize(per_record, Fr::from(0u64));
            QuantizedRecord { fields }
        })
        .collect()
}

fn encode(values: &[i64], encoding: FieldEncoding) -> Vec<Fr> {
    match encoding {
        FieldEncoding::Single => values.iter().map(|&v| single_field(v)).collect(),
        FieldEncoding::Pair => values
            .chunks(2)
            .map(|p| pair_field(p[0], p.get(1).copied().unwrap_or(0)))
            .collect(),
    }
}

impl RecordLayout {
    pub fn for_modality(modality: Modality) -> Self {
        let fields_per_record = match modality {
            Modality::Signature => 16,
            Modality::Face => 32,
        };
        Self {
            modality,
            architecture: modality.architecture(),
            fields_per_record,
            segments: vec![
                Segment { tensor: Tensor::W1, encoding: FieldEncoding::Pair },
                Segment { tensor: Tensor::B1, encoding: FieldEncoding::Single },
                Segment { tensor: Tensor::W2, encoding: FieldEncoding::Pair },
                Segment { tensor: Tensor::B2, encoding: FieldEncoding::Single },
            ],
        }
    }

    fn records_for(&self, values: usize, encoding: FieldEncoding) -> usize {
        let fields = values.div_ceil(encoding.values_per_field());
        fields.div_ceil(self.fields_per_record)
    }

    /// Number of model records this layout produces
    pub fn expected_records(&self) -> usize {
        self.segments
            .iter()
            .map(|s| self.records_for(s.tensor.len(&self.architecture), s.encoding))
            .sum()
    }

    /// Pack a quantized model into records, in segment order
    pub fn pack(&self, model: &QuantizedModel) -> Result<Vec<QuantizedRecord>, QuantizeError> {
        if model.modality != self.modality || model.architecture != self.architecture {
            return Err(QuantizeError::ShapeMismatch {
                modality: model.modality,
                expected: self.architecture,
                actual: model.architecture,
            });
        }
        let mut records = Vec::with_capacity(self.expected_records());
        for segment in &self.segments {
            let values = segment.tensor.values(model);
            let expected = segment.tensor.len(&self.architecture);
            if values.len() != expected {
                return Err(QuantizeError::LayoutMismatch {
                    tensor: segment.tensor.name(),
                    expected,
                    actual: values.len(),
                });
            }
            records.extend(chunk_records(encode(values, segment.encoding), self.fields_per_record));
        }
        if records.len() != self.expected_records() {
            return Err(QuantizeError::RecordCount {
                expected: self.expected_records(),
                actual: records.len(),
            });
        }
        Ok(records)
    }

    /// Pack a quantized inference input as single-value records
    pub fn pack_input(&self, input: &[i64]) -> Result<Vec<QuantizedRecord>, QuantizeError> {
        if input.len() != self.architecture.input {
            return Err(QuantizeError::InputDimension {
                expected: self.architecture.input,
                actual: input.len(),
            });
        }
        Ok(chunk_records(encode(input, FieldEncoding::Single), self.fields_per_record))
    }
}

#[cfg(test)]
mod tests {
    use super::super::quantize::ScaleFactors;
    use super::*;
    use crate::train::{Lcg, TrainedModel};

    fn quantized(modality: Modality) -> QuantizedModel {
        let model = TrainedModel::initialize(modality, &mut Lcg::new(3));
        QuantizedModel::from_model(&model, ScaleFactors::from_base(1024).unwrap()).unwrap()
    }

    #[test]
    fn test_record_counts() {
        // w1 110 pair fields -> 7, b1 -> 1, w2 11 pair fields -> 1, b2 -> 1
        let sig = RecordLayout::for_modality(Modality::Signature);
        assert_eq!(sig.expected_records(), 10);
        assert_eq!(sig.pack(&quantized(Modality::Signature)).unwrap().len(), 10);
        // w1 272 pair fields -> 9, then 1 + 1 + 1
        let face = RecordLayout::for_modality(Modality::Face);
        assert_eq!(face.expected_records(), 12);
        let records = face.pack(&quantized(Modality::Face)).unwrap();
        assert!(records.iter().all(|r| r.fields.len() == 32));
    }

    #[test]
    fn test_single_field_negatives() {
        assert_eq!(single_field(-5) + Fr::from(5u64), Fr::from(0u64));
        assert_eq!(single_field(7), Fr::from(7u64));
    }

    #[test]
    fn test_pair_field_offset_binary() {
        assert_eq!(pair_field(0, 0), Fr::from((1u128 << 127) | (1u128 << 63)));
        assert_eq!(pair_field(i64::MIN, i64::MIN), Fr::from(0u64));
        assert_ne!(pair_field(1, 2), pair_field(2, 1));
    }

    #[test]
    fn test_layer_starts_new_record() {
        let layout = RecordLayout::for_modality(Modality::Signature);
        let model = quantized(Modality::Signature);
        let records = layout.pack(&model).unwrap();
        // Record 7 holds b1 alone: 11 values then zero padding
        let b1 = &records[7];
        assert_eq!(b1.fields[0], single_field(model.b1[0]));
        assert_eq!(b1.fields[11], Fr::from(0u64));
        // Last w1 record has 110 - 96 = 14 used fields
        assert_eq!(records[6].fields[14], Fr::from(0u64));
    }

    #[test]
    fn test_wrong_modality_refused() {
        let layout = RecordLayout::for_modality(Modality::Face);
        assert!(matches!(
            layout.pack(&quantized(Modality::Signature)),
            Err(QuantizeError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_tensor_refused() {
        let layout = RecordLayout::for_modality(Modality::Signature);
        let mut model = quantized(Modality::Signature);
        model.w2.pop();
        assert_eq!(
            layout.pack(&model),
            Err(QuantizeError::LayoutMismatch { tensor: "w2", expected: 22, actual: 21 })
        );
    }

    #[test]
    fn test_literal_format() {
        let record = QuantizedRecord { fields: vec![Fr::from(3u64), single_field(-1)] };
        let lit = record.to_literal();
        assert!(lit.starts_with("{ f0: 3field, f1: "));
        assert!(lit.ends_with("field }"));
        assert_eq!(record.bits().len(), 2 * 254);
    }

    #[test]
    fn test_input_records() {
        let layout = RecordLayout::for_modality(Modality::Signature);
        let records = layout.pack_input(&[1; 20]).unwrap();
        assert_eq!(records.len(), 2);
        assert!(layout.pack_input(&[1; 3]).is_err());
    }
}
