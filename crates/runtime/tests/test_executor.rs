//! Executor tests: deadlines, the instance cap, sleep credit, and
//! effect ordering under quantum draining.

use std::sync::Arc;
use std::time::{Duration, Instant};
use yq_core::error::Error;
use yq_runtime::context::{Effect, Event};
use yq_runtime::executor::{Executor, ExecutorConfig};

fn quick_config() -> ExecutorConfig {
    ExecutorConfig {
        soft_budget: Duration::from_millis(150),
        hard_cap: Duration::from_secs(10),
        quantum: Duration::from_millis(20),
        max_instances: 4,
    }
}

#[test]
fn test_infinite_loop_hits_the_deadline() {
    let executor = Executor::new(quick_config());
    let memory = yqc::compile("say \"start\"\nwhile true {}").unwrap();
    let started = Instant::now();
    let mut effects = Vec::new();
    let outcome = executor
        .run(memory, &Event::default(), true, |e| effects.push(e))
        .unwrap();
    // Terminates within the budget plus a few quanta, not much more.
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.error, Some(Error::Interrupted));
    // Output emitted before the interrupt is preserved, nothing after.
    assert_eq!(effects, vec![Effect::Say("start".to_string())]);
}

#[test]
fn test_effects_arrive_in_emission_order() {
    let executor = Executor::new(quick_config());
    let memory = yqc::compile("i = 0; while i < 5 { say i; i += 1 }").unwrap();
    let mut effects = Vec::new();
    let outcome = executor
        .run(memory, &Event::default(), true, |e| effects.push(e))
        .unwrap();
    assert_eq!(outcome.error, None);
    let texts: Vec<String> = effects
        .into_iter()
        .map(|e| match e {
            Effect::Say(t) => t,
            other => panic!("unexpected effect {:?}", other),
        })
        .collect();
    assert_eq!(texts, vec!["0", "1", "2", "3", "4"]);
}

#[test]
fn test_sleep_credits_the_soft_budget() {
    let executor = Executor::new(quick_config());
    // Sleeps well past the soft budget; the credit keeps it alive.
    let memory = yqc::compile("sleep(400)\nsay \"woke\"").unwrap();
    let mut effects = Vec::new();
    let outcome = executor
        .run(memory, &Event::default(), true, |e| effects.push(e))
        .unwrap();
    assert_eq!(outcome.error, None);
    assert_eq!(effects, vec![Effect::Say("woke".to_string())]);
}

#[test]
fn test_instance_cap_rejects_excess_runs() {
    let config = ExecutorConfig {
        max_instances: 1,
        ..quick_config()
    };
    let executor = Arc::new(Executor::new(config));

    let busy = executor.clone();
    let worker = std::thread::spawn(move || {
        let memory = yqc::compile("sleep(600)").unwrap();
        busy.run(memory, &Event::default(), true, |_| {}).unwrap()
    });

    // Give the first run time to occupy the only slot.
    std::thread::sleep(Duration::from_millis(150));
    let memory = yqc::compile("say 1").unwrap();
    let err = executor
        .run(memory, &Event::default(), true, |_| {})
        .unwrap_err();
    assert!(matches!(err, Error::Resource { .. }));

    let outcome = worker.join().unwrap();
    assert_eq!(outcome.error, None);

    // The slot is free again afterwards.
    let memory = yqc::compile("say 2").unwrap();
    let mut effects = Vec::new();
    executor
        .run(memory, &Event::default(), true, |e| effects.push(e))
        .unwrap();
    assert_eq!(effects, vec![Effect::Say("2".to_string())]);
}

#[test]
fn test_runtime_errors_are_reported_not_panicked() {
    let executor = Executor::new(quick_config());
    let memory = yqc::compile("say 1 / 0").unwrap();
    let outcome = executor
        .run(memory, &Event::default(), true, |_| {})
        .unwrap();
    assert!(matches!(outcome.error, Some(Error::Builtin { .. })));
}

#[test]
fn test_memory_comes_back_for_persistence() {
    let executor = Executor::new(quick_config());
    let memory = yqc::compile("init n = 0; n += 1").unwrap();
    let outcome = executor
        .run(memory, &Event::default(), true, |_| {})
        .unwrap();
    let mut memory = outcome.memory;
    let image = memory.to_image().unwrap();
    assert!(image.symbols.iter().any(|(name, _)| name == "n"));
}
