//! Persistence tests: image round-trips, first-run semantics across
//! activations, and the update-time merge that keeps globals alive.

use yq_core::image::MemoryImage;
use yq_core::memory::Memory;
use yq_runtime::context::{Effect, Event, collecting_context};
use yq_runtime::vm::Vm;

fn activate(memory: Memory, event: &Event, first_run: bool) -> (Memory, Vec<Effect>) {
    let mut memory = memory;
    event.install(&mut memory);
    let mut vm = Vm::new(memory);
    let mut fx = collecting_context(first_run);
    let handle = fx.output_handle();
    vm.run(&mut fx).expect("run");
    (vm.into_memory(), handle.drain())
}

fn says(effects: &[Effect]) -> Vec<String> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Say(t) => Some(t.clone()),
            _ => None,
        })
        .collect()
}

const LOVED: &str = "init loved = []; if nudged { loved += nudged; say \"mua\" }";

#[test]
fn test_globals_persist_across_activations() {
    let memory = yqc::compile(LOVED).unwrap();

    let (mut memory, fx) = activate(memory, &Event::nudge(42), true);
    assert_eq!(says(&fx), vec!["mua"]);
    let loved = memory.global("loved").unwrap().clone();
    assert_eq!(memory.display_value(&loved), "[42]");

    // Serialize between runs, as the bot host does.
    let bytes = memory.to_image().unwrap().encode().unwrap();
    let restored = Memory::from_image(MemoryImage::decode(&bytes).unwrap()).unwrap();

    let (memory, fx) = activate(restored, &Event::nudge(7), false);
    assert_eq!(says(&fx), vec!["mua"]);
    let loved = memory.global("loved").unwrap().clone();
    assert_eq!(memory.display_value(&loved), "[42, 7]");
}

#[test]
fn test_init_counter_across_three_runs() {
    let source = "init s = 0; s += 1; say s";
    let mut memory = yqc::compile(source).unwrap();
    for round in 1..=3 {
        let (mut after, fx) = activate(memory, &Event::default(), round == 1);
        assert_eq!(says(&fx), vec![round.to_string()]);
        let bytes = after.to_image().unwrap().encode().unwrap();
        memory = Memory::from_image(MemoryImage::decode(&bytes).unwrap()).unwrap();
    }
}

#[test]
fn test_image_round_trip_is_value_equal() {
    let memory = yqc::compile("init seen = [1, \"two\", {a: 3}]").unwrap();
    let (mut memory, _) = activate(memory, &Event::default(), true);
    let image = memory.to_image().unwrap();
    let bytes = image.encode().unwrap();
    let decoded = MemoryImage::decode(&bytes).unwrap();
    assert_eq!(image, decoded);
}

#[test]
fn test_round_trip_preserves_effect_traces() {
    let source = "init n = 10; n += 5; say n * 2";
    let memory = yqc::compile(source).unwrap();
    let (mut memory, first) = activate(memory, &Event::default(), true);

    let bytes = memory.to_image().unwrap().encode().unwrap();
    let a = Memory::from_image(MemoryImage::decode(&bytes).unwrap()).unwrap();
    let b = Memory::from_image(MemoryImage::decode(&bytes).unwrap()).unwrap();

    assert_eq!(says(&first), vec!["30"]);
    let (_, fx_a) = activate(a, &Event::default(), false);
    let (_, fx_b) = activate(b, &Event::default(), false);
    assert_eq!(fx_a, fx_b);
    assert_eq!(says(&fx_a), vec!["40"]);
}

#[test]
fn test_update_merge_keeps_surviving_globals() {
    // Version 1 accumulates state.
    let v1 = "init hits = 0; init log = []; hits += 1; log += hits";
    let memory = yqc::compile(v1).unwrap();
    let (mut memory, _) = activate(memory, &Event::default(), true);
    let old_image = memory.to_image().unwrap();

    // Version 2 still declares `hits`, drops `log`, adds `label`.
    // A merged program is past its first run, so the new `init` does not
    // fire and `label` reads null.
    let v2 = "init hits = 0; init label = \"fresh\"; hits += 1; say string(label) + hits";
    let mut updated = yqc::compile(v2).unwrap();
    updated.merge_image(old_image).unwrap();

    // Not a first run: the old image's state substitutes the inits.
    let (after, fx) = activate(updated, &Event::default(), false);
    assert_eq!(says(&fx), vec!["null2"]);
    assert_eq!(after.global("hits").unwrap(), &yq_core::value::Value::Integer(2));
    // The orphaned global is still reachable for a future update.
    let log = after.global("log").unwrap().clone();
    assert_eq!(after.display_value(&log), "[1]");
}

#[test]
fn test_image_survives_disk_round_trip() {
    let source = "init stash = {count: 3}";
    let memory = yqc::compile(source).unwrap();
    let (mut memory, _) = activate(memory, &Event::default(), true);
    let bytes = memory.to_image().unwrap().encode().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("program.image");
    std::fs::write(&path, &bytes).unwrap();
    let read_back = std::fs::read(&path).unwrap();

    let restored = Memory::from_image(MemoryImage::decode(&read_back).unwrap()).unwrap();
    let stash = restored.global("stash").unwrap().clone();
    assert_eq!(restored.display_value(&stash), "{count: 3}");
}
