//! The host-side executor: deadlines, instance caps, and output pumping.
//!
//! Each run gets its own worker thread and its own memory; programs
//! never share mutable state. The host thread drains buffered effects
//! every quantum and owns the deadline: when the soft budget (plus
//! accumulated sleep credit) expires it raises the interrupt flag, and
//! the VM observes it at the next checkpoint and unwinds with
//! `Interrupted`. A hard cap bounds even sleep-heavy programs.

use crate::context::{BufferedEffects, Effect, Event};
use crate::vm::Vm;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use yq_core::error::{Error, Result};
use yq_core::memory::Memory;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// CPU budget before the interrupt flag is raised; time spent in
    /// `sleep` is credited back.
    pub soft_budget: Duration,
    /// Absolute wall-clock bound for one run.
    pub hard_cap: Duration,
    /// How often buffered output is drained to the sink.
    pub quantum: Duration,
    /// Concurrent runs allowed across this executor.
    pub max_instances: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            soft_budget: Duration::from_millis(800),
            hard_cap: Duration::from_secs(60 * 60),
            quantum: Duration::from_millis(100),
            max_instances: 10,
        }
    }
}

/// What a finished run hands back: the (possibly mutated) memory for
/// persistence, and the error that stopped it, if any.
#[derive(Debug)]
pub struct RunOutcome {
    pub memory: Memory,
    pub error: Option<Error>,
}

pub struct Executor {
    config: ExecutorConfig,
    active: Arc<AtomicUsize>,
    nicknames: HashMap<i64, String>,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Executor {
            config,
            active: Arc::new(AtomicUsize::new(0)),
            nicknames: HashMap::new(),
        }
    }

    pub fn with_nicknames(mut self, nicknames: HashMap<i64, String>) -> Self {
        self.nicknames = nicknames;
        self
    }

    /// Run one program activation to completion, pumping effects into
    /// `sink` in emission order. Fails fast with a resource error when
    /// the instance cap is reached.
    pub fn run(
        &self,
        mut memory: Memory,
        event: &Event,
        first_run: bool,
        mut sink: impl FnMut(Effect),
    ) -> Result<RunOutcome> {
        let _slot = InstanceSlot::acquire(&self.active, self.config.max_instances)?;

        event.install(&mut memory);

        let interrupt = Arc::new(AtomicBool::new(false));
        let mut fx = BufferedEffects::new(first_run, interrupt.clone())
            .with_nicknames(self.nicknames.clone());
        let output = fx.output_handle();
        let slept = fx.slept_counter();

        let vm_flag = interrupt.clone();
        let worker = std::thread::spawn(move || {
            let mut vm = Vm::new(memory).with_interrupt(vm_flag);
            let result = vm.run(&mut fx);
            (vm.into_memory(), result)
        });

        let started = Instant::now();
        let mut interrupted = false;
        while !worker.is_finished() {
            std::thread::sleep(self.config.quantum);
            for effect in output.drain() {
                sink(effect);
            }
            if !interrupted {
                let elapsed = started.elapsed();
                let credit = Duration::from_millis(slept.load(Ordering::Relaxed));
                if elapsed > self.config.hard_cap
                    || elapsed > self.config.soft_budget + credit
                {
                    debug!(elapsed = ?elapsed, "deadline reached, interrupting");
                    interrupt.store(true, Ordering::Relaxed);
                    interrupted = true;
                }
            }
        }

        let (memory, result) = worker
            .join()
            .map_err(|_| Error::internal("worker thread panicked"))?;
        for effect in output.drain() {
            sink(effect);
        }
        if let Err(e) = &result {
            warn!(error = %e, "program run failed");
        }
        Ok(RunOutcome {
            memory,
            error: result.err(),
        })
    }
}

/// RAII guard on the concurrent-instance counter.
struct InstanceSlot {
    active: Arc<AtomicUsize>,
}

impl InstanceSlot {
    fn acquire(active: &Arc<AtomicUsize>, cap: usize) -> Result<InstanceSlot> {
        let prev = active.fetch_add(1, Ordering::SeqCst);
        if prev >= cap {
            active.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::resource(format!(
                "instance cap of {} reached",
                cap
            )));
        }
        Ok(InstanceSlot {
            active: active.clone(),
        })
    }
}

impl Drop for InstanceSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
