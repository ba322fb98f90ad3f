//! Pipeline definition and execution plan.
//!
//! Operators are fixed hardware primitives identified by small integer ids:
//! the enable id selects a bit in the operator enable mask, the stream id
//! names the stream-switch port the operator is wired to. Compiling a plan
//! turns the *order* of the operator list into stream-switch routing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::common::{AccelFsError, AccelFsResult};
use crate::fpga::{NUM_STREAMS, STREAM_DISABLED};

/// A single typed option value forwarded to an operator (for example a
/// cryptographic key buffer, or a boolean mode flag). The core never
/// interprets these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionValue {
    Flag(bool),
    Uint(u64),
    Buffer(Vec<u8>),
}

/// Opaque key-value configuration carried by an operator, forwarded to the
/// card as a serialized blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorOptions(BTreeMap<String, OptionValue>);

impl OperatorOptions {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn set(&mut self, key: impl Into<String>, value: OptionValue) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.0.get(key)
    }

    /// Serialize for the configure-operator job.
    pub fn to_blob(&self) -> AccelFsResult<Vec<u8>> {
        serde_json::to_vec(&self.0).map_err(|_| AccelFsError::InvalidArgument)
    }
}

/// One requested operator: hardware ids plus its configuration.
#[derive(Debug, Clone)]
pub struct OperatorSpec {
    /// Bit position in the 64-bit enable mask.
    pub enable_id: u8,
    /// Stream-switch port carrying this operator's input.
    pub stream_id: u8,
    pub options: OperatorOptions,
}

impl OperatorSpec {
    pub fn new(enable_id: u8, stream_id: u8) -> Self {
        Self {
            enable_id,
            stream_id,
            options: OperatorOptions::default(),
        }
    }

    pub fn set_option(&mut self, key: impl Into<String>, value: OptionValue) {
        self.options.set(key, value);
    }
}

/// An ordered, validated operator list ready to be wired into the stream
/// switch. The empty plan is legal and configures a no-op pass-through.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    operators: Vec<OperatorSpec>,
}

impl ExecutionPlan {
    /// Validate ids and reject duplicate enable ids (a caller error, since
    /// two operators cannot share an enable bit).
    pub fn new(operators: Vec<OperatorSpec>) -> AccelFsResult<Self> {
        let mut seen = 0u64;
        for op in &operators {
            if op.enable_id >= 64 || usize::from(op.stream_id) >= NUM_STREAMS {
                return Err(AccelFsError::InvalidArgument);
            }
            let bit = 1u64 << op.enable_id;
            if seen & bit != 0 {
                return Err(AccelFsError::InvalidArgument);
            }
            seen |= bit;
        }
        Ok(Self { operators })
    }

    pub fn empty() -> Self {
        Self {
            operators: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn operators(&self) -> &[OperatorSpec] {
        &self.operators
    }

    /// One bit per operator, at its enable id.
    pub fn enable_mask(&self) -> u64 {
        self.operators
            .iter()
            .fold(0, |mask, op| mask | 1u64 << op.enable_id)
    }

    /// Per-port source table for the stream switch.
    ///
    /// From the switch's perspective: which slave port feeds each master
    /// port. Operator k's port is sourced from operator k-1's port; the
    /// first operator's port stays at the disabled default and is fed from
    /// outside the chain (the data source).
    pub fn routing_table(&self) -> [u32; NUM_STREAMS] {
        let mut table = [STREAM_DISABLED; NUM_STREAMS];
        for pair in self.operators.windows(2) {
            table[usize::from(pair[1].stream_id)] = u32::from(pair[0].stream_id);
        }
        table
    }
}
