use std::{any::Any, mem, thread};

use crossbeam_channel::{Receiver, Sender};

use super::RenderEngine;
use crate::{
    grain::{Grain, GrainRender},
    source::GrainSampleSource,
    Error,
};

// -------------------------------------------------------------------------------------------------

/// A bin for collecting grains assigned to a worker during bin-packing.
#[derive(Debug, Clone)]
struct WorkerTaskBin {
    total_weight: usize,
    render_indices: Vec<usize>,
}

impl WorkerTaskBin {
    fn new(capacity_hint: usize) -> Self {
        Self {
            total_weight: 0,
            render_indices: Vec::with_capacity(capacity_hint),
        }
    }

    fn clear(&mut self) {
        self.total_weight = 0;
        self.render_indices.clear();
    }
}

// -------------------------------------------------------------------------------------------------

/// Weight and index of a single grain render within a batch.
#[derive(Debug, Copy, Clone)]
struct WorkerTaskWeight {
    index: usize,
    weight: usize,
}

// -------------------------------------------------------------------------------------------------

/// Distributes grain renders across workers with a greedy bin-packing: renders with the highest
/// weight get assigned first, each one to the worker with the lowest total weight so far.
#[derive(Debug, Clone)]
struct WorkerTaskBatcher {
    weights: Vec<WorkerTaskWeight>,
    bins: Vec<WorkerTaskBin>,
}

impl WorkerTaskBatcher {
    fn new(thread_count: usize, max_expected_renders: usize) -> Self {
        let bin_capacity = (max_expected_renders / thread_count).max(1) + 8;
        Self {
            weights: Vec::with_capacity(max_expected_renders),
            bins: (0..thread_count)
                .map(|_| WorkerTaskBin::new(bin_capacity))
                .collect(),
        }
    }

    fn bins(&self) -> &[WorkerTaskBin] {
        &self.bins
    }

    fn clear(&mut self) {
        self.weights.clear();
        for bin in &mut self.bins {
            bin.clear();
        }
    }

    fn update(&mut self, renders: &[GrainRender]) {
        self.clear();

        self.weights
            .extend(
                renders
                    .iter()
                    .enumerate()
                    .map(|(index, render)| WorkerTaskWeight {
                        index,
                        weight: render.weight(),
                    }),
            );

        self.weights.sort_by(|a, b| b.weight.cmp(&a.weight));

        for task in &self.weights {
            if let Some(min_bin) = self.bins.iter_mut().min_by_key(|bin| bin.total_weight) {
                min_bin.total_weight += task.weight;
                min_bin.render_indices.push(task.index);
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Grain renders and their original index in the render list.
type WorkerBatch = Vec<(usize, GrainRender)>;

/// Command sent from the control thread to worker threads.
enum WorkerCommand {
    Process(WorkerBatch),
    Shutdown,
}

/// Sent from a worker thread back to the control thread when a batch got rendered.
type WorkerCompletion = Result<WorkerBatch, Box<dyn Any + Send + 'static>>;

// -------------------------------------------------------------------------------------------------

/// Per-worker channels, owned by the control thread.
struct WorkerState {
    work_sender: Sender<WorkerCommand>,
    completion_receiver: Receiver<WorkerCompletion>,
    /// Recycled batch vector, moved to the worker while it's rendering.
    batch: WorkerBatch,
    busy: bool,
}

// -------------------------------------------------------------------------------------------------

/// Renders grains in a fixed-size pool of worker threads.
///
/// Workers are spawned at construction and stay idle until grains get dispatched. Each call to
/// `render` distributes the grains across the workers by weight, moves each worker's batch over
/// to it, and waits until all workers returned their batches: a join barrier. When a worker
/// panics, the panic gets forwarded to the control thread.
///
/// Small batches are rendered on the calling thread.
pub struct ParallelEngine {
    source: GrainSampleSource,
    worker_states: Vec<WorkerState>,
    worker_threads: Vec<thread::JoinHandle<()>>,
    task_batcher: WorkerTaskBatcher,
    slots: Vec<Option<GrainRender>>,
    /// Copies of the dispatched grains, to recover batches of lost workers.
    dispatched: Vec<Grain>,
}

impl ParallelEngine {
    /// Number of renders we pre-allocate scratch space for.
    pub const MAX_RENDERS_HINT: usize = 256;

    /// Create a new engine with the given number of worker threads.
    pub fn new(source: GrainSampleSource, thread_count: usize) -> Result<Self, Error> {
        if thread_count == 0 {
            return Err(Error::ParameterError(
                "Parallel render engine needs at least one worker thread".to_string(),
            ));
        }
        let worker_capacity = (Self::MAX_RENDERS_HINT / thread_count).max(1) + 16;

        let mut worker_states = Vec::with_capacity(thread_count);
        let mut worker_threads = Vec::with_capacity(thread_count);

        for worker_id in 0..thread_count {
            let (work_sender, work_receiver) = crossbeam_channel::bounded(1);
            let (completion_sender, completion_receiver) = crossbeam_channel::bounded(1);

            let worker_source = source.clone();
            let handle = thread::Builder::new()
                .name(format!("graincore-render-worker-{worker_id}"))
                .spawn(move || {
                    let error_sender = completion_sender.clone();
                    if let Err(payload) = std::panic::catch_unwind(move || {
                        Self::run_worker_thread(
                            worker_id,
                            worker_source,
                            work_receiver,
                            completion_sender,
                        )
                    }) {
                        log::error!(
                            "Ouch. Render worker thread #{worker_id} panicked: {}",
                            panic_message::panic_message(&payload)
                        );
                        if error_sender.send(Err(payload)).is_err() {
                            log::error!("Failed to forward panic of render worker #{worker_id}");
                        }
                    }
                })?;

            worker_states.push(WorkerState {
                work_sender,
                completion_receiver,
                batch: Vec::with_capacity(worker_capacity),
                busy: false,
            });
            worker_threads.push(handle);
        }

        let task_batcher = WorkerTaskBatcher::new(thread_count, Self::MAX_RENDERS_HINT);
        let slots = Vec::with_capacity(Self::MAX_RENDERS_HINT);
        let dispatched = Vec::with_capacity(Self::MAX_RENDERS_HINT);

        Ok(Self {
            source,
            worker_states,
            worker_threads,
            task_batcher,
            slots,
            dispatched,
        })
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.worker_threads.len()
    }

    /// Check if the thread pool should be used based on the number of grains to render.
    pub fn should_use_concurrent_processing(&self, render_count: usize) -> bool {
        self.worker_threads.len() >= 2 && render_count >= 2
    }

    fn run_worker_thread(
        worker_id: usize,
        source: GrainSampleSource,
        work_receiver: Receiver<WorkerCommand>,
        completion_sender: Sender<WorkerCompletion>,
    ) {
        loop {
            match work_receiver.recv() {
                Ok(WorkerCommand::Process(mut batch)) => {
                    for (_, render) in batch.iter_mut() {
                        render.render(&source);
                    }
                    if completion_sender.send(Ok(batch)).is_err() {
                        log::warn!(
                            "Render worker #{worker_id} unexpectedly got disconnected from the \
                             control thread."
                        );
                        break;
                    }
                }
                Ok(WorkerCommand::Shutdown) => {
                    log::debug!("Render worker #{worker_id} is shutting down...");
                    break;
                }
                Err(_) => {
                    log::warn!(
                        "Render worker #{worker_id} unexpectedly got disconnected from the \
                         control thread."
                    );
                    break;
                }
            }
        }
    }
}

impl RenderEngine for ParallelEngine {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn render(&mut self, renders: &mut Vec<GrainRender>) {
        if !self.should_use_concurrent_processing(renders.len()) {
            for render in renders.iter_mut() {
                render.render(&self.source);
            }
            return;
        }

        // Divide grains into weighted batches across all workers
        self.task_batcher.update(renders);

        let render_count = renders.len();
        self.dispatched.clear();
        self.dispatched
            .extend(renders.iter().map(|render| render.grain.clone()));
        self.slots.clear();
        self.slots.extend(renders.drain(..).map(Some));

        // Move batches to the workers and wake them up
        for (worker_state, bin) in self.worker_states.iter_mut().zip(self.task_batcher.bins()) {
            if bin.render_indices.is_empty() {
                continue;
            }
            let mut batch = mem::take(&mut worker_state.batch);
            batch.clear();
            batch.extend(
                bin.render_indices
                    .iter()
                    .filter_map(|&index| self.slots[index].take().map(|render| (index, render))),
            );
            match worker_state.work_sender.send(WorkerCommand::Process(batch)) {
                Ok(()) => worker_state.busy = true,
                Err(err) => {
                    log::error!("Render worker is gone: rendering its grains on the control thread");
                    if let WorkerCommand::Process(mut batch) = err.into_inner() {
                        for (index, mut render) in batch.drain(..) {
                            render.render(&self.source);
                            self.slots[index] = Some(render);
                        }
                        worker_state.batch = batch;
                    }
                }
            }
        }

        // Wait for all busy workers and put their renders back into place
        let mut panic_payload = None;
        for ((worker_id, worker_state), bin) in self
            .worker_states
            .iter_mut()
            .enumerate()
            .zip(self.task_batcher.bins())
        {
            if !mem::take(&mut worker_state.busy) {
                continue;
            }
            match worker_state.completion_receiver.recv() {
                Ok(Ok(mut batch)) => {
                    for (index, render) in batch.drain(..) {
                        self.slots[index] = Some(render);
                    }
                    worker_state.batch = batch;
                }
                Ok(Err(payload)) => {
                    panic_payload.get_or_insert((worker_id, payload));
                }
                Err(_) => {
                    // the batch went down with the worker: render it again with new buffers
                    log::error!(
                        "Render worker #{worker_id} got disconnected: rendering its grains on \
                         the control thread"
                    );
                    for &index in &bin.render_indices {
                        let grain = self.dispatched[index].clone();
                        let buffer = Vec::with_capacity(grain.duration_samples);
                        let mut render = GrainRender { grain, buffer };
                        render.render(&self.source);
                        self.slots[index] = Some(render);
                    }
                }
            }
        }

        renders.extend(self.slots.drain(..).flatten());
        debug_assert!(panic_payload.is_some() || renders.len() == render_count);

        if let Some((worker_id, payload)) = panic_payload {
            // Forward errors from worker threads to the control thread
            panic!(
                "Render worker thread #{worker_id} failed: {}",
                panic_message::panic_message(&payload)
            );
        }
    }
}

impl Drop for ParallelEngine {
    fn drop(&mut self) {
        for worker_state in &self.worker_states {
            let _ = worker_state.work_sender.send(WorkerCommand::Shutdown);
        }
        while let Some(worker) = self.worker_threads.pop() {
            if let Err(payload) = worker.join() {
                log::error!(
                    "Render worker thread panicked: {}",
                    panic_message::panic_message(&payload)
                );
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::{
            tests::{test_renders, test_source},
            SequentialEngine,
        },
        grain::GrainPool,
    };

    #[test]
    fn batcher_balances_weights() {
        let mut pool = GrainPool::new(64, 4096);
        let renders = test_renders(&mut pool, 40);
        let mut batcher = WorkerTaskBatcher::new(4, 64);
        batcher.update(&renders);

        let mut assigned = batcher
            .bins()
            .iter()
            .flat_map(|bin| bin.render_indices.iter().copied())
            .collect::<Vec<_>>();
        assigned.sort();
        assert_eq!(assigned, (0..40).collect::<Vec<_>>());

        let weights = batcher
            .bins()
            .iter()
            .map(|bin| bin.total_weight)
            .collect::<Vec<_>>();
        let max_weight = renders.iter().map(|r| r.weight()).max().unwrap();
        let (min, max) = (
            *weights.iter().min().unwrap(),
            *weights.iter().max().unwrap(),
        );
        assert!(max - min <= max_weight);
    }

    #[test]
    fn invalid_thread_count() {
        assert!(ParallelEngine::new(test_source(), 0).is_err());
    }

    #[test]
    fn parallel_matches_sequential() {
        let mut pool = GrainPool::new(128, 1024);

        let mut sequential = SequentialEngine::new(test_source());
        let mut expected = test_renders(&mut pool, 50);
        sequential.render(&mut expected);

        let mut parallel = ParallelEngine::new(test_source(), 4).unwrap();
        for _ in 0..3 {
            let mut renders = test_renders(&mut pool, 50);
            parallel.render(&mut renders);
            assert_eq!(renders.len(), expected.len());
            for (render, expected) in renders.iter().zip(&expected) {
                assert!(render.grain.is_populated());
                assert_eq!(render.grain.emitter_id, expected.grain.emitter_id);
                assert_eq!(render.buffer, expected.buffer);
            }
            for render in renders {
                pool.release(render);
            }
        }
    }

    #[test]
    fn lost_workers_do_not_lose_grains() {
        let mut pool = GrainPool::new(64, 1024);

        let mut sequential = SequentialEngine::new(test_source());
        let mut expected = test_renders(&mut pool, 20);
        sequential.render(&mut expected);

        let mut parallel = ParallelEngine::new(test_source(), 2).unwrap();
        // a worker which accepts its batch, but never answers
        let (work_sender, _lost_batches) = crossbeam_channel::unbounded();
        let (_, completion_receiver) = crossbeam_channel::bounded(1);
        parallel.worker_states[0].work_sender = work_sender;
        parallel.worker_states[0].completion_receiver = completion_receiver;

        let mut renders = test_renders(&mut pool, 20);
        parallel.render(&mut renders);
        assert_eq!(renders.len(), expected.len());
        for (render, expected) in renders.iter().zip(&expected) {
            assert!(render.grain.is_populated());
            assert_eq!(render.grain.emitter_id, expected.grain.emitter_id);
            assert_eq!(render.buffer, expected.buffer);
        }
        // all buffers find their way back into the pool
        let available = pool.available();
        for render in renders {
            pool.release(render);
        }
        assert_eq!(pool.available(), available + 20);
    }

    #[test]
    fn single_worker_renders_on_the_calling_thread() {
        let mut pool = GrainPool::new(8, 1024);
        let mut engine = ParallelEngine::new(test_source(), 1).unwrap();
        assert!(!engine.should_use_concurrent_processing(8));
        let mut renders = test_renders(&mut pool, 8);
        engine.render(&mut renders);
        assert!(renders.iter().all(|r| r.grain.is_populated()));
    }
}
