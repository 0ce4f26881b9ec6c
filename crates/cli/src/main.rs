//! yq CLI
//!
//! Reads a program from standard input until EOF, runs the full
//! pipeline (lex, parse, codegen, execute), and prints a banner per
//! stage. Effects are echoed to standard output as they drain. With
//! `--image`, globals persist across invocations the same way the bot
//! host persists them between events.

use clap::Parser as ClapParser;
use std::io::Read;
use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};
use yq_core::bytecode::disassemble;
use yq_core::image::MemoryImage;
use yq_runtime::context::{Effect, Event};
use yq_runtime::executor::{Executor, ExecutorConfig};

#[derive(ClapParser)]
#[command(name = "yq")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a yq program from standard input", long_about = None)]
struct Cli {
    /// Print the bytecode listing before executing
    #[arg(long)]
    disassemble: bool,

    /// Load the memory image from this path before the run (if it
    /// exists) and save it back afterwards
    #[arg(long)]
    image: Option<PathBuf>,

    /// Dump the post-run memory image as JSON to standard output
    #[arg(long)]
    dump_image: bool,

    /// Soft execution budget in milliseconds
    #[arg(long, default_value_t = 800)]
    budget_ms: u64,

    /// Bind the `text` event variable (simulates a chat message)
    #[arg(long)]
    text: Option<String>,

    /// Bind the `nudged` event variable (simulates a nudge)
    #[arg(long)]
    nudged: Option<i64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut source = String::new();
    std::io::stdin().read_to_string(&mut source)?;

    let tokens = yqc::tokenize(&source)?;
    println!("Lexing... {} tokens", tokens.len());

    let program = yqc::parse(&source)?;
    println!("Parsing... {} statements", program.body.len());

    let mut memory = yqc::generate(&program)?;
    println!("Generating code... {} instructions", memory.text.len());

    if cli.disassemble {
        print!("{}", disassemble(&memory.text, &memory.labels));
    }

    // Merge a previous image so init-initialized globals survive edits.
    let mut first_run = true;
    if let Some(path) = &cli.image
        && path.exists()
    {
        let bytes = std::fs::read(path)?;
        memory.merge_image(MemoryImage::decode(&bytes)?)?;
        first_run = false;
    }

    let event = Event {
        text: cli.text.clone(),
        sender: cli.text.as_ref().map(|_| 0),
        nudged: cli.nudged,
        ..Event::default()
    };

    println!("Executing...");
    let executor = Executor::new(ExecutorConfig {
        soft_budget: Duration::from_millis(cli.budget_ms),
        ..ExecutorConfig::default()
    });
    let started = Instant::now();
    let outcome = executor.run(memory, &event, first_run, print_effect)?;
    let elapsed = started.elapsed().as_millis();

    if let Some(e) = outcome.error {
        // The bot host renders runtime failures as one-line diagnostics.
        println!("! {}", e);
    }

    let mut memory = outcome.memory;
    if cli.image.is_some() || cli.dump_image {
        let image = memory.to_image()?;
        if let Some(path) = &cli.image {
            std::fs::write(path, image.encode()?)?;
        }
        if cli.dump_image {
            println!("{}", serde_json::to_string_pretty(&image)?);
        }
    }

    println!("Done! ({} ms)", elapsed);
    Ok(())
}

fn print_effect(effect: Effect) {
    match effect {
        Effect::Say(text) => println!("{}", text),
        Effect::Nudge(user) => println!("[nudge {}]", user),
        Effect::PicSave(pic) => println!("[picsave {}]", pic),
        Effect::PicSend(pic) => println!("[picsend {}]", pic),
    }
}
