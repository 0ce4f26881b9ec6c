//! The execution context: effects, event bindings, and output buffering.
//!
//! The VM never talks to the chat front-end directly. Actions and the
//! system builtins go through the [`Effects`] trait; the host decides
//! what a `say` actually does. [`BufferedEffects`] is the standard
//! implementation: it queues outputs for quantum-based draining so a
//! chatty program cannot outrun the bot's send-rate limits.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use yq_core::memory::Memory;
use yq_core::value::Value;

/// One observable output of a program run, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Say(String),
    Nudge(i64),
    PicSave(String),
    PicSend(String),
}

/// What the VM needs from its host.
pub trait Effects {
    fn say(&mut self, text: String);
    fn nudge(&mut self, user: i64);
    fn picsave(&mut self, pic: String);
    fn picsend(&mut self, pic: String);
    fn nickname(&mut self, user: i64) -> String;
    /// Cooperative wait. Implementations should wake early when the
    /// interrupt flag is raised.
    fn sleep(&mut self, ms: u64);
    /// True on the first activation of a saved program.
    fn first_run(&self) -> bool;
}

/// Shared handle the host uses to drain buffered outputs.
#[derive(Clone, Default)]
pub struct OutputHandle {
    queue: Arc<Mutex<VecDeque<Effect>>>,
}

impl OutputHandle {
    pub fn drain(&self) -> Vec<Effect> {
        match self.queue.lock() {
            Ok(mut q) => q.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn push(&self, effect: Effect) {
        if let Ok(mut q) = self.queue.lock() {
            q.push_back(effect);
        }
    }
}

/// The standard buffering context.
pub struct BufferedEffects {
    output: OutputHandle,
    first_run: bool,
    interrupt: Arc<AtomicBool>,
    slept_ms: Arc<AtomicU64>,
    nicknames: HashMap<i64, String>,
}

/// Sleep in short slices so a raised interrupt flag cuts the wait short.
const SLEEP_SLICE: Duration = Duration::from_millis(25);

impl BufferedEffects {
    pub fn new(first_run: bool, interrupt: Arc<AtomicBool>) -> Self {
        BufferedEffects {
            output: OutputHandle::default(),
            first_run,
            interrupt,
            slept_ms: Arc::new(AtomicU64::new(0)),
            nicknames: HashMap::new(),
        }
    }

    pub fn with_nicknames(mut self, nicknames: HashMap<i64, String>) -> Self {
        self.nicknames = nicknames;
        self
    }

    pub fn output_handle(&self) -> OutputHandle {
        self.output.clone()
    }

    /// Total milliseconds spent in `sleep`, credited against the soft
    /// deadline by the executor.
    pub fn slept_counter(&self) -> Arc<AtomicU64> {
        self.slept_ms.clone()
    }
}

impl Effects for BufferedEffects {
    fn say(&mut self, text: String) {
        self.output.push(Effect::Say(text));
    }

    fn nudge(&mut self, user: i64) {
        self.output.push(Effect::Nudge(user));
    }

    fn picsave(&mut self, pic: String) {
        self.output.push(Effect::PicSave(pic));
    }

    fn picsend(&mut self, pic: String) {
        self.output.push(Effect::PicSend(pic));
    }

    fn nickname(&mut self, user: i64) -> String {
        self.nicknames
            .get(&user)
            .cloned()
            .unwrap_or_else(|| format!("user{}", user))
    }

    fn sleep(&mut self, ms: u64) {
        let mut remaining = Duration::from_millis(ms);
        while !remaining.is_zero() {
            if self.interrupt.load(Ordering::Relaxed) {
                break;
            }
            let slice = remaining.min(SLEEP_SLICE);
            std::thread::sleep(slice);
            self.slept_ms
                .fetch_add(slice.as_millis() as u64, Ordering::Relaxed);
            remaining -= slice;
        }
    }

    fn first_run(&self) -> bool {
        self.first_run
    }
}

/// The host-to-program bindings installed before each activation.
/// Absent events bind `null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    /// Message content, for text events.
    pub text: Option<String>,
    /// Numeric id of the sender.
    pub sender: Option<i64>,
    /// Millisecond timestamp, for timer ticks.
    pub clock: Option<i64>,
    /// Numeric id of the nudger, when the bot was nudged.
    pub nudged: Option<i64>,
    /// Ids of images attached to the event.
    pub images: Option<Vec<String>>,
}

impl Event {
    pub fn message(text: impl Into<String>, sender: i64) -> Self {
        Event {
            text: Some(text.into()),
            sender: Some(sender),
            ..Event::default()
        }
    }

    pub fn tick(clock: i64) -> Self {
        Event {
            clock: Some(clock),
            ..Event::default()
        }
    }

    pub fn nudge(nudged: i64) -> Self {
        Event {
            nudged: Some(nudged),
            ..Event::default()
        }
    }

    /// Write the bindings into the root scope of `memory`.
    pub fn install(&self, memory: &mut Memory) {
        let text = match &self.text {
            Some(t) => memory.alloc_string(t.clone()),
            None => Value::Null,
        };
        memory.set_global("text", text);
        memory.set_global("sender", opt_int(self.sender));
        memory.set_global("clock", opt_int(self.clock));
        memory.set_global("nudged", opt_int(self.nudged));
        let images = match &self.images {
            Some(ids) => {
                let values = ids
                    .iter()
                    .map(|id| memory.alloc_string(id.clone()))
                    .collect();
                memory.alloc_list(values)
            }
            None => Value::Null,
        };
        memory.set_global("images", images);
    }
}

fn opt_int(v: Option<i64>) -> Value {
    match v {
        Some(n) => Value::Integer(n),
        None => Value::Null,
    }
}

/// A plain context for tests and the CLI: no deadline, immediate buffer.
pub fn collecting_context(first_run: bool) -> BufferedEffects {
    BufferedEffects::new(first_run, Arc::new(AtomicBool::new(false)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effects_drain_in_order() {
        let mut fx = collecting_context(true);
        let handle = fx.output_handle();
        fx.say("one".to_string());
        fx.nudge(9);
        fx.say("two".to_string());
        assert_eq!(
            handle.drain(),
            vec![
                Effect::Say("one".to_string()),
                Effect::Nudge(9),
                Effect::Say("two".to_string()),
            ]
        );
        assert!(handle.drain().is_empty());
    }

    #[test]
    fn test_interrupt_cuts_sleep_short() {
        let interrupt = Arc::new(AtomicBool::new(true));
        let mut fx = BufferedEffects::new(true, interrupt);
        let started = std::time::Instant::now();
        fx.sleep(5_000);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_nickname_falls_back_to_id() {
        let mut fx = collecting_context(true);
        assert_eq!(fx.nickname(42), "user42");
        let mut fx = collecting_context(true)
            .with_nicknames(HashMap::from([(42, "ada".to_string())]));
        assert_eq!(fx.nickname(42), "ada");
    }
}
