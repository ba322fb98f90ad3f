use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spin::Mutex;

use crate::card::{ActionFlags, CardAction, CardConfig, CardHandle, CardSdk};
use crate::common::AccelFsError;
use crate::data::{DataSink, DataSource};
use crate::fpga::{
    length_checksum, Address, AddressType, JobEnvelope, JobType, MapType, TransportCode,
    RETC_SUCCESS, STREAM_DISABLED, TRANSPORT_EIO, TRANSPORT_ETIMEDOUT, TRANSPORT_OK,
};
use crate::fs::Filesystem;
use crate::job::{ExtentSlot, FpgaContext};
use crate::models::Extent;
use crate::pipeline::{ExecutionPlan, OperatorSpec, OptionValue};
use crate::runner::PipelineRunner;

#[derive(Debug, Clone)]
struct Submitted {
    job_type: JobType,
    parameters: Vec<u8>,
    source: Address,
    destination: Address,
    direct_data: [u64; 4],
}

#[derive(Default)]
struct MockState {
    submitted: Mutex<Vec<Submitted>>,
    /// Transport codes returned by upcoming jobs, oldest first; empty
    /// means success.
    rc_script: Mutex<Vec<TransportCode>>,
    /// Hardware return codes for upcoming jobs, oldest first; empty means
    /// the success sentinel.
    retc_script: Mutex<Vec<u32>>,
    card_freed: AtomicBool,
}

impl MockState {
    fn submitted(&self) -> Vec<Submitted> {
        self.submitted.lock().clone()
    }

    fn job_types(&self) -> Vec<JobType> {
        self.submitted().iter().map(|s| s.job_type).collect()
    }
}

struct MockSdk {
    state: Arc<MockState>,
    fail_open: bool,
    fail_attach: bool,
}

impl MockSdk {
    fn new(state: Arc<MockState>) -> Self {
        Self {
            state,
            fail_open: false,
            fail_attach: false,
        }
    }
}

impl CardSdk for MockSdk {
    fn open(&self, _device: &str) -> Option<Box<dyn CardHandle>> {
        if self.fail_open {
            return None;
        }
        Some(Box::new(MockCard {
            state: self.state.clone(),
            fail_attach: self.fail_attach,
        }))
    }
}

struct MockCard {
    state: Arc<MockState>,
    fail_attach: bool,
}

impl Drop for MockCard {
    fn drop(&mut self) {
        self.state.card_freed.store(true, Ordering::SeqCst);
    }
}

impl CardHandle for MockCard {
    fn attach(
        &self,
        _action_type: u32,
        _flags: ActionFlags,
        _timeout_secs: u64,
    ) -> Option<Box<dyn CardAction>> {
        if self.fail_attach {
            return None;
        }
        Some(Box::new(MockAction {
            state: self.state.clone(),
        }))
    }
}

struct MockAction {
    state: Arc<MockState>,
}

impl CardAction for MockAction {
    fn execute(&self, envelope: &mut JobEnvelope, _timeout_secs: u64) -> TransportCode {
        assert_eq!(envelope.checksum, length_checksum(&envelope.payload()));

        self.state.submitted.lock().push(Submitted {
            job_type: envelope.request.job_type,
            parameters: envelope.request.parameters.clone(),
            source: envelope.request.source,
            destination: envelope.request.destination,
            direct_data: envelope.request.direct_data,
        });

        let rc = {
            let mut script = self.state.rc_script.lock();
            if script.is_empty() {
                TRANSPORT_OK
            } else {
                script.remove(0)
            }
        };
        if rc != TRANSPORT_OK {
            return rc;
        }

        envelope.retc = {
            let mut script = self.state.retc_script.lock();
            if script.is_empty() {
                RETC_SUCCESS
            } else {
                script.remove(0)
            }
        };

        match envelope.request.job_type {
            JobType::RunOperators => {
                envelope.response[0] = u64::from(envelope.request.source.size);
            }
            JobType::ReadPerfmonCounters => {
                for (i, chunk) in envelope
                    .request
                    .parameters
                    .chunks_exact_mut(4)
                    .enumerate()
                {
                    chunk.copy_from_slice(&(i as u32 + 1).to_be_bytes());
                }
            }
            _ => {}
        }
        TRANSPORT_OK
    }
}

fn context(state: &Arc<MockState>) -> FpgaContext {
    let _ = env_logger::builder().is_test(true).try_init();
    FpgaContext::initialize(&MockSdk::new(state.clone()), &CardConfig::default()).unwrap()
}

fn volume_path(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "accelfs-proto-{}-{}.db",
        std::process::id(),
        name
    ));
    let _ = std::fs::remove_file(&path);
    path
}

#[test]
fn open_failure_reports_invalid_argument() {
    let state = Arc::new(MockState::default());
    let mut sdk = MockSdk::new(state);
    sdk.fail_open = true;
    assert!(matches!(
        FpgaContext::initialize(&sdk, &CardConfig::default()),
        Err(AccelFsError::InvalidArgument)
    ));
}

#[test]
fn attach_failure_frees_the_card() {
    let state = Arc::new(MockState::default());
    let mut sdk = MockSdk::new(state.clone());
    sdk.fail_attach = true;
    assert!(matches!(
        FpgaContext::initialize(&sdk, &CardConfig::default()),
        Err(AccelFsError::InvalidArgument)
    ));
    assert!(state.card_freed.load(Ordering::SeqCst));
}

#[test]
fn configure_streams_blob_is_mask_then_routing_words() {
    let state = Arc::new(MockState::default());
    let ctx = context(&state);

    let plan = ExecutionPlan::new(vec![
        OperatorSpec::new(1, 2),
        OperatorSpec::new(3, 5),
        OperatorSpec::new(4, 2),
    ])
    .unwrap();
    ctx.configure_streams(&plan).unwrap();

    let jobs = state.submitted();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_type, JobType::ConfigureStreams);

    let blob = &jobs[0].parameters;
    assert_eq!(blob.len(), 8 + 8 * 4);
    assert_eq!(&blob[0..8], &(0b11010u64).to_be_bytes());

    let word = |port: usize| {
        u32::from_be_bytes([
            blob[8 + port * 4],
            blob[9 + port * 4],
            blob[10 + port * 4],
            blob[11 + port * 4],
        ])
    };
    assert_eq!(word(5), 2);
    assert_eq!(word(2), 5);
    for port in [0, 1, 3, 4, 6, 7] {
        assert_eq!(word(port), STREAM_DISABLED);
    }
}

#[test]
fn map_blob_carries_slot_flag_count_and_extent_pairs() {
    let state = Arc::new(MockState::default());
    let ctx = context(&state);

    let extents = [
        Extent {
            offset: 7,
            length: 3,
        },
        Extent {
            offset: 100,
            length: 1,
        },
    ];
    ctx.map_extents(ExtentSlot::Write, &extents).unwrap();
    ctx.unmap_extents(ExtentSlot::Write).unwrap();

    let jobs = state.submitted();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].job_type, JobType::Map);

    let blob = &jobs[0].parameters;
    assert_eq!(blob.len(), 8 * 8 + 2 * 16);
    let word = |i: usize| {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&blob[i * 8..(i + 1) * 8]);
        u64::from_be_bytes(buf)
    };
    assert_eq!(word(0), ExtentSlot::Write as u64);
    assert_eq!(word(1), 1, "map flag set");
    assert_eq!(word(2), 2, "extent count");
    for reserved in 3..8 {
        assert_eq!(word(reserved), 0);
    }
    assert_eq!(word(8), 7);
    assert_eq!(word(9), 3);
    assert_eq!(word(10), 100);
    assert_eq!(word(11), 1);

    let unmap = &jobs[1].parameters;
    assert_eq!(unmap.len(), 8 * 8);
    assert_eq!(&unmap[8..16], &[0u8; 8], "map flag cleared");
}

#[test]
fn transport_failure_releases_the_lock_for_the_next_job() {
    let state = Arc::new(MockState::default());
    let ctx = context(&state);

    state.rc_script.lock().push(TRANSPORT_EIO);
    assert!(matches!(
        ctx.reset_perfmon(),
        Err(AccelFsError::Transport(TRANSPORT_EIO))
    ));

    // A failed submission must not poison the context.
    ctx.reset_perfmon().unwrap();
    assert_eq!(state.submitted().len(), 2);
}

#[test]
fn timeout_is_reported_as_timeout() {
    let state = Arc::new(MockState::default());
    let ctx = context(&state);

    state.rc_script.lock().push(TRANSPORT_ETIMEDOUT);
    assert!(matches!(ctx.reset_perfmon(), Err(AccelFsError::Timeout)));
}

#[test]
fn hardware_failure_is_reported_with_its_return_code() {
    let state = Arc::new(MockState::default());
    let ctx = context(&state);

    state.retc_script.lock().push(0x104);
    assert!(matches!(
        ctx.reset_perfmon(),
        Err(AccelFsError::JobFailed(0x104))
    ));
}

#[test]
fn run_reports_bytes_written() {
    let state = Arc::new(MockState::default());
    let ctx = context(&state);

    let input = vec![0u8; 512];
    let source = DataSource::host(&input);
    let sink = DataSink::null();

    let runner = PipelineRunner::new(&ctx, ExecutionPlan::empty());
    let bytes = runner.run(&source, &sink).unwrap();
    assert_eq!(bytes, 512);

    assert_eq!(
        state.job_types(),
        vec![JobType::ConfigureStreams, JobType::RunOperators]
    );
    let run = &state.submitted()[1];
    assert_eq!(run.source.ty, AddressType::Host);
    assert_eq!(run.source.addr, input.as_ptr() as u64);
    assert_eq!(run.destination.ty, AddressType::Null);
}

#[test]
fn file_endpoints_are_mapped_around_the_run() {
    let state = Arc::new(MockState::default());
    let ctx = context(&state);

    let fs = Filesystem::open(volume_path("endpoints")).unwrap();
    fs.create_file("/in").unwrap();
    fs.create_file("/out").unwrap();
    fs.set_file_extents(
        "/in",
        &[Extent {
            offset: 0,
            length: 2,
        }],
        6000,
    )
    .unwrap();
    fs.set_file_extents(
        "/out",
        &[Extent {
            offset: 2,
            length: 4,
        }],
        0,
    )
    .unwrap();

    let source =
        DataSource::file(&fs, "/in", 0, 0, AddressType::Nvme, MapType::Nvme).unwrap();
    let sink = DataSink::file(&fs, "/out", 0, 0, AddressType::Nvme, MapType::Nvme).unwrap();

    let mut op = OperatorSpec::new(2, 3);
    op.set_option("lowercase", OptionValue::Flag(true));
    let plan = ExecutionPlan::new(vec![op]).unwrap();

    let runner = PipelineRunner::new(&ctx, plan);
    let bytes = runner.run(&source, &sink).unwrap();
    assert_eq!(bytes, 6000);

    assert_eq!(
        state.job_types(),
        vec![
            JobType::ConfigureOperator,
            JobType::ConfigureStreams,
            JobType::Map,
            JobType::Map,
            JobType::RunOperators,
            JobType::Map,
            JobType::Map,
        ]
    );

    let jobs = state.submitted();
    // read slot mapped before the write slot, unmapped in the same order
    assert_eq!(&jobs[2].parameters[0..8], &0u64.to_be_bytes());
    assert_eq!(&jobs[3].parameters[0..8], &1u64.to_be_bytes());
    assert_eq!(&jobs[5].parameters[0..8], &0u64.to_be_bytes());
    assert_eq!(&jobs[6].parameters[0..8], &1u64.to_be_bytes());
}

#[test]
fn extents_are_unmapped_when_the_run_fails() {
    let state = Arc::new(MockState::default());
    let ctx = context(&state);

    let fs = Filesystem::open(volume_path("unmap-on-failure")).unwrap();
    fs.create_file("/in").unwrap();
    fs.set_file_extents(
        "/in",
        &[Extent {
            offset: 0,
            length: 1,
        }],
        100,
    )
    .unwrap();

    let source =
        DataSource::file(&fs, "/in", 0, 0, AddressType::Nvme, MapType::Nvme).unwrap();
    let sink = DataSink::null();

    // configure succeeds, map succeeds, the run itself fails
    state
        .rc_script
        .lock()
        .extend([TRANSPORT_OK, TRANSPORT_OK, TRANSPORT_EIO]);

    let runner = PipelineRunner::new(&ctx, ExecutionPlan::empty());
    assert!(matches!(
        runner.run(&source, &sink),
        Err(AccelFsError::Transport(TRANSPORT_EIO))
    ));

    assert_eq!(
        state.job_types(),
        vec![
            JobType::ConfigureStreams,
            JobType::Map,
            JobType::RunOperators,
            JobType::Map,
        ]
    );
}

#[test]
fn profile_brackets_the_run_with_perfmon_jobs() {
    let state = Arc::new(MockState::default());
    let ctx = context(&state);

    let input = vec![0u8; 64];
    let source = DataSource::host(&input);
    let sink = DataSink::null();

    let runner = PipelineRunner::new(&ctx, ExecutionPlan::empty());
    let (bytes, counters) = runner.profile(3, &source, &sink).unwrap();
    assert_eq!(bytes, 64);

    assert_eq!(
        state.job_types(),
        vec![
            JobType::ResetPerfmon,
            JobType::ConfigurePerfmon,
            JobType::ConfigureStreams,
            JobType::RunOperators,
            JobType::ReadPerfmonCounters,
        ]
    );
    assert_eq!(&state.submitted()[1].parameters, &3u64.to_be_bytes());

    assert_eq!(counters.transfer_cycle_count(), 1);
    assert_eq!(counters.packet_count(), 2);
    assert_eq!(counters.master_idle_count(), 7);
}

#[test]
fn operators_without_options_skip_configuration() {
    let state = Arc::new(MockState::default());
    let ctx = context(&state);

    let plan = ExecutionPlan::new(vec![OperatorSpec::new(0, 1), OperatorSpec::new(2, 4)]).unwrap();
    let input = vec![0u8; 8];
    let source = DataSource::host(&input);
    let sink = DataSink::null();

    PipelineRunner::new(&ctx, plan).run(&source, &sink).unwrap();
    assert_eq!(
        state.job_types(),
        vec![JobType::ConfigureStreams, JobType::RunOperators]
    );
}

#[test]
fn configure_operator_carries_ids_in_direct_data() {
    let state = Arc::new(MockState::default());
    let ctx = context(&state);

    let mut op = OperatorSpec::new(5, 6);
    op.set_option("key", OptionValue::Buffer(vec![1, 2, 3]));
    ctx.configure_operator(&op).unwrap();

    let jobs = state.submitted();
    assert_eq!(jobs[0].job_type, JobType::ConfigureOperator);
    assert_eq!(jobs[0].direct_data, [5, 6, 0, 0]);
    assert!(!jobs[0].parameters.is_empty());
}
