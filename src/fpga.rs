//! Job wire contract between the host and the accelerator action.
//!
//! This is a fixed protocol: job records and every out-of-band parameter
//! blob cross the host/device boundary in big-endian order regardless of
//! host endianness.

use std::fmt;

use crate::common::AccelFsError;

/// Number of stream-switch ports.
pub const NUM_STREAMS: usize = 8;

/// Routing table sentinel: high bit set means the port has no source.
pub const STREAM_DISABLED: u32 = 0x8000_0000;

/// Action type identifying the pipeline bitstream during attach.
pub const ACTION_TYPE: u32 = 0x0000_0216;

/// Hardware return code reported by a successfully completed job.
pub const RETC_SUCCESS: u32 = 0x102;

/// Encoded size of a job record.
pub const JOB_BYTES: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum JobType {
    ReadImageInfo = 0,
    Map = 1,
    ConfigureStreams = 2,
    ResetPerfmon = 3,
    ConfigurePerfmon = 4,
    ReadPerfmonCounters = 5,
    RunOperators = 6,
    ConfigureOperator = 7,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobType::ReadImageInfo => "ReadImageInfo",
            JobType::Map => "Map",
            JobType::ConfigureStreams => "ConfigureStreams",
            JobType::ResetPerfmon => "ResetPerfmon",
            JobType::ConfigurePerfmon => "ConfigurePerfmon",
            JobType::ReadPerfmonCounters => "ReadPerfmonCounters",
            JobType::RunOperators => "RunOperators",
            JobType::ConfigureOperator => "ConfigureOperator",
        };
        f.write_str(name)
    }
}

/// What kind of memory an address names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressType {
    Host = 0,
    CardDram = 1,
    Nvme = 2,
    /// Discards writes, produces nothing.
    Null = 3,
    /// Card-generated pattern data, no memory behind it.
    Random = 4,
}

/// How the job protocol should interpret the address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MapType {
    None = 0,
    Dram = 1,
    Nvme = 2,
    DramAndNvme = 3,
}

/// A typed source or destination address in a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub addr: u64,
    pub size: u32,
    pub ty: AddressType,
    pub map: MapType,
}

impl Address {
    /// Placeholder for jobs that carry no data address.
    pub fn none() -> Self {
        Self {
            addr: 0,
            size: 0,
            ty: AddressType::Null,
            map: MapType::None,
        }
    }

    fn encode_into(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&self.addr.to_be_bytes());
        out[8..12].copy_from_slice(&self.size.to_be_bytes());
        out[12] = self.ty as u8;
        out[13] = self.map as u8;
        // out[14..16] reserved
    }
}

/// One job to be submitted to the card. Jobs are transient: constructed,
/// submitted, discarded.
///
/// `parameters` is the out-of-band blob the record's address word refers
/// to; the driver fills that word in once it has pinned the blob, so the
/// encoded record carries a zero placeholder.
#[derive(Debug)]
pub struct JobRequest {
    pub job_type: JobType,
    pub source: Address,
    pub destination: Address,
    pub direct_data: [u64; 4],
    pub parameters: Vec<u8>,
}

impl JobRequest {
    pub fn new(job_type: JobType) -> Self {
        Self {
            job_type,
            source: Address::none(),
            destination: Address::none(),
            direct_data: [0; 4],
            parameters: Vec::new(),
        }
    }

    pub fn with_addresses(mut self, source: Address, destination: Address) -> Self {
        self.source = source;
        self.destination = destination;
        self
    }

    pub fn with_parameters(mut self, parameters: Vec<u8>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_direct_data(mut self, direct_data: [u64; 4]) -> Self {
        self.direct_data = direct_data;
        self
    }

    /// Fixed record layout: type word, reserved word, parameter address
    /// placeholder, source, destination, four direct data words.
    pub fn encode(&self) -> [u8; JOB_BYTES] {
        let mut buf = [0u8; JOB_BYTES];
        buf[0..4].copy_from_slice(&(self.job_type as u32).to_be_bytes());
        // buf[4..8] reserved, buf[8..16] job_address placeholder
        self.source.encode_into(&mut buf[16..32]);
        self.destination.encode_into(&mut buf[32..48]);
        for (i, word) in self.direct_data.iter().enumerate() {
            buf[48 + i * 8..56 + i * 8].copy_from_slice(&word.to_be_bytes());
        }
        buf
    }
}

/// A job record wrapped for submission. The receiving side re-derives the
/// checksum over the payload it actually got and rejects short transfers.
///
/// `retc` and `response` are written back by the action on completion; for
/// perfmon reads the action also writes into `request.parameters`.
#[derive(Debug)]
pub struct JobEnvelope {
    pub request: JobRequest,
    pub checksum: u32,
    pub retc: u32,
    pub response: [u64; 2],
}

impl JobEnvelope {
    pub fn new(request: JobRequest) -> Self {
        let checksum = length_checksum(&request.encode());
        Self {
            request,
            checksum,
            retc: 0,
            response: [0; 2],
        }
    }

    pub fn payload(&self) -> [u8; JOB_BYTES] {
        self.request.encode()
    }
}

/// Length-folded checksum over an encoded payload.
pub fn length_checksum(payload: &[u8]) -> u32 {
    payload.iter().fold(payload.len() as u32, |sum, byte| {
        sum.wrapping_mul(31).wrapping_add(u32::from(*byte))
    })
}

/// Transport-level result of the blocking execute call. Nonzero means the
/// job never ran.
pub type TransportCode = i32;

pub const TRANSPORT_OK: TransportCode = 0;
pub const TRANSPORT_EBUSY: TransportCode = -1;
pub const TRANSPORT_ENODEV: TransportCode = -2;
pub const TRANSPORT_EIO: TransportCode = -3;
pub const TRANSPORT_ENOENT: TransportCode = -4;
pub const TRANSPORT_EFAULT: TransportCode = -5;
pub const TRANSPORT_ETIMEDOUT: TransportCode = -6;
pub const TRANSPORT_EINVAL: TransportCode = -7;
pub const TRANSPORT_EATTACH: TransportCode = -8;
pub const TRANSPORT_EDETACH: TransportCode = -9;

pub fn transport_message(rc: TransportCode) -> &'static str {
    match rc {
        TRANSPORT_OK => "",
        TRANSPORT_EBUSY => "resource is busy",
        TRANSPORT_ENODEV => "no such device",
        TRANSPORT_EIO => "problem accessing the card",
        TRANSPORT_ENOENT => "entry not found",
        TRANSPORT_EFAULT => "illegal address",
        TRANSPORT_ETIMEDOUT => "timeout error",
        TRANSPORT_EINVAL => "invalid parameters",
        TRANSPORT_EATTACH => "attach error",
        TRANSPORT_EDETACH => "detach error",
        _ => "unknown error",
    }
}

/// Translate a nonzero transport code into the crate error taxonomy. A
/// timeout is reported separately: the job's true completion status is
/// unknown afterwards.
pub fn transport_error(rc: TransportCode) -> AccelFsError {
    if rc == TRANSPORT_ETIMEDOUT {
        AccelFsError::Timeout
    } else {
        AccelFsError::Transport(rc)
    }
}
