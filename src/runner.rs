//! Drives one pipeline run end to end.
//!
//! Fixed order per run: per-operator configuration, stream switch setup,
//! extent mapping, the run itself, unmapping. The context's submit lock
//! serializes the individual jobs, but a whole run is not atomic against
//! other runs; callers interleaving runs on one context get interleaved
//! configuration at their own risk.

use log::warn;

use crate::common::AccelFsResult;
use crate::data::{DataSink, DataSource};
use crate::job::{ExtentSlot, FpgaContext, PerfmonCounters};
use crate::pipeline::ExecutionPlan;

pub struct PipelineRunner<'a> {
    context: &'a FpgaContext,
    plan: ExecutionPlan,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(context: &'a FpgaContext, plan: ExecutionPlan) -> Self {
        Self { context, plan }
    }

    /// Execute the plan once, moving bytes from `source` to `sink`.
    /// Returns the number of bytes the chain delivered to the sink.
    pub fn run(&self, source: &DataSource, sink: &DataSink) -> AccelFsResult<u64> {
        for op in self.plan.operators() {
            if !op.options.is_empty() {
                self.context.configure_operator(op)?;
            }
        }
        self.context.configure_streams(&self.plan)?;

        if let Some(extents) = source.extents() {
            self.context.map_extents(ExtentSlot::Read, extents)?;
        }
        if let Some(extents) = sink.extents() {
            self.context.map_extents(ExtentSlot::Write, extents)?;
        }

        let result = self
            .context
            .run_operators(source.address(), sink.address());

        // Unmap both slots even when the run failed; a failed unmap only
        // downgrades to a warning so the run's own result survives.
        if source.extents().is_some() {
            if let Err(err) = self.context.unmap_extents(ExtentSlot::Read) {
                warn!("failed to unmap read extents: {}", err);
            }
        }
        if sink.extents().is_some() {
            if let Err(err) = self.context.unmap_extents(ExtentSlot::Write) {
                warn!("failed to unmap write extents: {}", err);
            }
        }

        result
    }

    /// Like [`run`](Self::run), with the performance monitor attached to
    /// `stream_id` for the duration of the run.
    pub fn profile(
        &self,
        stream_id: u64,
        source: &DataSource,
        sink: &DataSink,
    ) -> AccelFsResult<(u64, PerfmonCounters)> {
        self.context.reset_perfmon()?;
        self.context.configure_perfmon(stream_id)?;
        let bytes = self.run(source, sink)?;
        let counters = self.context.read_perfmon()?;
        Ok((bytes, counters))
    }
}
