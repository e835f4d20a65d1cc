//! Coding operation descriptors.
//!
//! A coding operation combines locally stored blocks into one result:
//! output byte `i` is the GF(2^8) sum of `coefficient ⊗ input[i]` over all
//! inputs. Inputs shorter than the longest one are zero-padded. With every
//! coefficient set to 1 this is plain XOR parity.
//!
//! The result is either streamed back to the caller buffer by buffer
//! (`CodingTarget::Stream`) or persisted as a local block
//! (`CodingTarget::Local`). The descriptor travels as JSON text inside the
//! request's `coding` field.

use serde::{Deserialize, Serialize};

use crate::protocol::BlockId;

/// Default size of each produced buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Largest buffer a single coding step may produce.
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodingInput {
    pub block: BlockId,
    #[serde(default = "unit_coefficient")]
    pub coefficient: u8,
}

impl CodingInput {
    pub fn new(block: BlockId, coefficient: u8) -> Self {
        Self { block, coefficient }
    }
}

fn unit_coefficient() -> u8 {
    1
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

/// Where the result of an operation goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum CodingTarget {
    /// Relay each buffer to the caller. If `persist` is set the buffers
    /// are also written to that local block as they are produced.
    Stream {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        persist: Option<BlockId>,
    },
    /// Write the result to `output`; nothing is streamed back.
    Local { output: BlockId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodingOperation {
    pub inputs: Vec<CodingInput>,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    pub target: CodingTarget,
}

impl CodingOperation {
    pub fn stream(inputs: Vec<CodingInput>) -> Self {
        Self {
            inputs,
            buffer_size: DEFAULT_BUFFER_SIZE,
            target: CodingTarget::Stream { persist: None },
        }
    }

    pub fn local(inputs: Vec<CodingInput>, output: BlockId) -> Self {
        Self {
            inputs,
            buffer_size: DEFAULT_BUFFER_SIZE,
            target: CodingTarget::Local { output },
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Also persist a streamed result. No effect on local operations.
    pub fn persisting_to(mut self, block: BlockId) -> Self {
        if let CodingTarget::Stream { persist } = &mut self.target {
            *persist = Some(block);
        }
        self
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.target, CodingTarget::Stream { .. })
    }

    /// Block the result is written to, if any.
    pub fn output_block(&self) -> Option<&BlockId> {
        match &self.target {
            CodingTarget::Stream { persist } => persist.as_ref(),
            CodingTarget::Local { output } => Some(output),
        }
    }

    pub fn validate(&self) -> Result<(), CodingError> {
        if self.inputs.is_empty() {
            return Err(CodingError::NoInputs);
        }
        if self.buffer_size == 0 || self.buffer_size > MAX_BUFFER_SIZE {
            return Err(CodingError::BufferSize(self.buffer_size));
        }
        if let Some(output) = self.output_block() {
            if self.inputs.iter().any(|i| &i.block == output) {
                return Err(CodingError::OutputAliasesInput(output.clone()));
            }
        }
        Ok(())
    }

    pub fn serialize(&self) -> Result<String, CodingError> {
        serde_json::to_string(self).map_err(CodingError::Malformed)
    }

    /// Parse and validate a serialized descriptor.
    pub fn unserialize(text: &str) -> Result<Self, CodingError> {
        let op: CodingOperation = serde_json::from_str(text).map_err(CodingError::Malformed)?;
        op.validate()?;
        Ok(op)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodingError {
    #[error("malformed coding operation: {0}")]
    Malformed(serde_json::Error),

    #[error("coding operation has no inputs")]
    NoInputs,

    #[error("buffer size {0} outside 1..={}", MAX_BUFFER_SIZE)]
    BufferSize(usize),

    #[error("output block {0} is also an input")]
    OutputAliasesInput(BlockId),
}

// ── GF(2^8) ───────────────────────────────────────────────────────────────────

/// Arithmetic in GF(2^8) with the Reed-Solomon polynomial x^8+x^4+x^3+x^2+1.
pub mod gf256 {
    /// Reduction polynomial, low byte (0x11d).
    pub const POLY: u8 = 0x1d;

    pub const fn mul(mut a: u8, mut b: u8) -> u8 {
        let mut product = 0u8;
        while b != 0 {
            if b & 1 != 0 {
                product ^= a;
            }
            let carry = a & 0x80 != 0;
            a <<= 1;
            if carry {
                a ^= POLY;
            }
            b >>= 1;
        }
        product
    }

    /// `dst[i] ^= coefficient ⊗ src[i]` for every `i < src.len()`.
    /// Bytes of `dst` past the end of `src` are untouched (zero padding).
    pub fn mul_add_into(dst: &mut [u8], src: &[u8], coefficient: u8) {
        match coefficient {
            0 => {}
            1 => {
                for (d, s) in dst.iter_mut().zip(src) {
                    *d ^= *s;
                }
            }
            c => {
                let row: [u8; 256] = std::array::from_fn(|x| mul(c, x as u8));
                for (d, s) in dst.iter_mut().zip(src) {
                    *d ^= row[*s as usize];
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
