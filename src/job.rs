//! Synchronous hardware job protocol.
//!
//! [`FpgaContext`] owns the card attachment for its whole lifetime:
//! `initialize` opens the card and attaches the action (freeing the card
//! again if the attach fails), dropping the context detaches and frees.
//! Submissions hold the context's mutex across the entire blocking
//! execute-with-timeout call, so exactly one job is ever in flight and
//! concurrent callers queue on the lock instead of being rejected.

use std::fmt;

use log::{debug, trace};
use spin::Mutex;

use crate::card::{CardAction, CardConfig, CardHandle, CardSdk};
use crate::common::{AccelFsError, AccelFsResult};
use crate::fpga::{
    transport_error, transport_message, Address, JobEnvelope, JobRequest, JobType, NUM_STREAMS,
    RETC_SUCCESS, TRANSPORT_OK,
};
use crate::models::Extent;
use crate::pipeline::{ExecutionPlan, OperatorSpec};

/// Completion values of a successful job.
#[derive(Debug)]
pub struct JobResponse {
    /// Direct data words written back by the action.
    pub direct_data: [u64; 2],
    /// The parameter blob, possibly rewritten by the action.
    pub parameters: Vec<u8>,
}

/// Which hardware extent slot a map job targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentSlot {
    Read = 0,
    Write = 1,
}

pub struct FpgaContext {
    // Field order matters on drop: the action detaches before the card is
    // freed.
    action: Box<dyn CardAction>,
    _card: Box<dyn CardHandle>,
    job_timeout_secs: u64,
    submit_lock: Mutex<()>,
}

impl FpgaContext {
    /// Open the card and attach the pipeline action.
    ///
    /// If the attach fails, the already-opened card handle is dropped
    /// before returning, so a failed initialization never leaves a
    /// half-attached state behind.
    pub fn initialize(sdk: &dyn CardSdk, config: &CardConfig) -> AccelFsResult<Self> {
        trace!("opening card device {}", config.device);
        let card = sdk
            .open(&config.device)
            .ok_or(AccelFsError::InvalidArgument)?;

        trace!("attaching action {:#x}", config.action_type);
        let action = match card.attach(config.action_type, config.flags, config.attach_timeout_secs)
        {
            Some(action) => action,
            None => {
                drop(card);
                return Err(AccelFsError::InvalidArgument);
            }
        };

        Ok(Self {
            action,
            _card: card,
            job_timeout_secs: config.job_timeout_secs,
            submit_lock: Mutex::new(()),
        })
    }

    /// Explicit teardown; dropping the context does the same.
    pub fn deinitialize(self) {}

    /// Submit one job and block until it completes or times out.
    ///
    /// Two-level failure check: a nonzero transport code means the job
    /// never ran; on transport success the hardware return code must still
    /// match the success sentinel, otherwise the job ran and failed.
    pub fn execute_job(&self, request: JobRequest) -> AccelFsResult<JobResponse> {
        debug!("starting job {}", request.job_type);
        let mut envelope = JobEnvelope::new(request);

        let rc = {
            let _guard = self.submit_lock.lock();
            self.action.execute(&mut envelope, self.job_timeout_secs)
        };

        if rc != TRANSPORT_OK {
            trace!(
                "job {} transport failure: {}",
                envelope.request.job_type,
                transport_message(rc)
            );
            return Err(transport_error(rc));
        }
        if envelope.retc != RETC_SUCCESS {
            return Err(AccelFsError::JobFailed(envelope.retc));
        }

        Ok(JobResponse {
            direct_data: envelope.response,
            parameters: envelope.request.parameters,
        })
    }

    /// Program the stream switch for an execution plan: 8-byte enable mask
    /// followed by the eight 4-byte routing words.
    pub fn configure_streams(&self, plan: &ExecutionPlan) -> AccelFsResult<()> {
        let mut parameters = Vec::with_capacity(8 + NUM_STREAMS * 4);
        parameters.extend_from_slice(&plan.enable_mask().to_be_bytes());
        for word in plan.routing_table() {
            parameters.extend_from_slice(&word.to_be_bytes());
        }

        self.execute_job(JobRequest::new(JobType::ConfigureStreams).with_parameters(parameters))?;
        Ok(())
    }

    /// Kick the configured operator chain. Relies on a prior
    /// `configure_streams` and on any file extents being mapped. Returns
    /// the number of bytes the chain wrote to the sink.
    pub fn run_operators(&self, source: Address, destination: Address) -> AccelFsResult<u64> {
        let response = self
            .execute_job(JobRequest::new(JobType::RunOperators).with_addresses(source, destination))?;
        Ok(response.direct_data[0])
    }

    /// Forward an operator's option blob to the card. The blob stays
    /// opaque to this layer.
    pub fn configure_operator(&self, operator: &OperatorSpec) -> AccelFsResult<()> {
        let request = JobRequest::new(JobType::ConfigureOperator)
            .with_parameters(operator.options.to_blob()?)
            .with_direct_data([
                u64::from(operator.enable_id),
                u64::from(operator.stream_id),
                0,
                0,
            ]);
        self.execute_job(request)?;
        Ok(())
    }

    /// Point the performance monitor at a stream-switch port.
    pub fn configure_perfmon(&self, stream_id: u64) -> AccelFsResult<()> {
        self.execute_job(
            JobRequest::new(JobType::ConfigurePerfmon)
                .with_parameters(stream_id.to_be_bytes().to_vec()),
        )?;
        Ok(())
    }

    pub fn reset_perfmon(&self) -> AccelFsResult<()> {
        self.execute_job(JobRequest::new(JobType::ResetPerfmon))?;
        Ok(())
    }

    /// Read the seven perfmon counter words; the action writes them into
    /// the parameter blob.
    pub fn read_perfmon(&self) -> AccelFsResult<PerfmonCounters> {
        let response = self.execute_job(
            JobRequest::new(JobType::ReadPerfmonCounters)
                .with_parameters(vec![0u8; PERFMON_WORDS * 4]),
        )?;
        PerfmonCounters::from_bytes(&response.parameters)
    }

    /// Bind a file's extents into the card's address space before a run.
    pub fn map_extents(&self, slot: ExtentSlot, extents: &[Extent]) -> AccelFsResult<()> {
        debug!("mapping {} extents into slot {:?}", extents.len(), slot);
        self.execute_job(
            JobRequest::new(JobType::Map).with_parameters(map_parameters(slot, true, extents)),
        )?;
        Ok(())
    }

    /// Release a slot's extent binding; same blob shape with the map flag
    /// cleared.
    pub fn unmap_extents(&self, slot: ExtentSlot) -> AccelFsResult<()> {
        self.execute_job(
            JobRequest::new(JobType::Map).with_parameters(map_parameters(slot, false, &[])),
        )?;
        Ok(())
    }
}

/// Map job parameter blob: eight prefix words (slot, map flag, extent
/// count, rest reserved), then an (offset, length) pair per extent. All
/// 8-byte big-endian words.
fn map_parameters(slot: ExtentSlot, map: bool, extents: &[Extent]) -> Vec<u8> {
    let mut words = Vec::with_capacity(8 + 2 * extents.len());
    words.push(slot as u64);
    words.push(u64::from(map));
    words.push(extents.len() as u64);
    words.resize(8, 0);
    for extent in extents {
        words.push(extent.offset);
        words.push(extent.length);
    }

    let mut blob = Vec::with_capacity(words.len() * 8);
    for word in words {
        blob.extend_from_slice(&word.to_be_bytes());
    }
    blob
}

pub const PERFMON_WORDS: usize = 7;

/// Counter snapshot from the stream performance monitor.
#[derive(Debug, Clone, Copy)]
pub struct PerfmonCounters {
    words: [u32; PERFMON_WORDS],
}

impl PerfmonCounters {
    fn from_bytes(buf: &[u8]) -> AccelFsResult<Self> {
        if buf.len() < PERFMON_WORDS * 4 {
            return Err(AccelFsError::Corrupt);
        }
        let mut words = [0u32; PERFMON_WORDS];
        for (word, chunk) in words.iter_mut().zip(buf.chunks_exact(4)) {
            *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(Self { words })
    }

    /// Total cycles during which data was transferred.
    pub fn transfer_cycle_count(&self) -> u32 {
        self.words[0]
    }

    pub fn packet_count(&self) -> u32 {
        self.words[1]
    }

    pub fn data_byte_count(&self) -> u32 {
        self.words[2]
    }

    pub fn position_byte_count(&self) -> u32 {
        self.words[3]
    }

    pub fn null_byte_count(&self) -> u32 {
        self.words[4]
    }

    /// Idle cycles caused by the slave side.
    pub fn slave_idle_count(&self) -> u32 {
        self.words[5]
    }

    /// Idle cycles caused by the master side.
    pub fn master_idle_count(&self) -> u32 {
        self.words[6]
    }
}

impl fmt::Display for PerfmonCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Performance counters")?;
        writeln!(f, "  Transfer Cycle Count: {}", self.transfer_cycle_count())?;
        writeln!(f, "  Packet Count:         {}", self.packet_count())?;
        writeln!(f, "  Data Byte Count:      {}", self.data_byte_count())?;
        writeln!(f, "  Position Byte Count:  {}", self.position_byte_count())?;
        writeln!(f, "  Null Byte Count:      {}", self.null_byte_count())?;
        writeln!(f, "  Slave Idle Count:     {}", self.slave_idle_count())?;
        write!(f, "  Master Idle Count:    {}", self.master_idle_count())
    }
}
