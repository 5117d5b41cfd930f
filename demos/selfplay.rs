//! Self-play: two agents talk about their views of the same dots.
//!
//! Each agent sees a slightly perturbed copy of one seven-dot scene.
//! They take turns writing and reading until one of them produces the
//! selection token (or the turn limit runs out), then both choose.
//!
//! Run with:
//!   cargo run --example selfplay --release [-- path/to/weights.safetensors]
//!
//! Set `RUST_LOG=debug` to see per-turn events.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use dotref_agent::{
    model_for, AgentConfig, Context, ContextOptions, LexiconDetector, ReadOptions, RnnAgent, WordDict,
    WriteOptions,
};
use dotref_nn::{load_weights, ModelConfig};

const WORDS: [&str; 20] = [
    "i", "see", "a", "the", "dot", "dots", "large", "small", "medium", "dark", "light", "grey", "left", "right",
    "top", "bottom", "near", "yes", "no", "pick",
];
const MAX_TURNS: usize = 8;

fn scene(rng: &mut StdRng) -> Vec<f32> {
    (0..7 * 4).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn perturb(base: &[f32], rng: &mut StdRng) -> Vec<f32> {
    base.iter().map(|v| v + rng.gen_range(-0.05..0.05)).collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let vocab = Arc::new(WordDict::from_words(WORDS));
    let mut model = model_for(&vocab, ModelConfig::onecommon(vocab.len()))?;
    if let Some(path) = std::env::args().nth(1) {
        let loaded = load_weights(Path::new(&path), &mut model, false)?;
        println!("Loaded {loaded} tensors from {path}");
    } else {
        println!("No weights given, running with random initialisation");
    }
    println!("Model parameters: {}", model.param_count());
    let model = Arc::new(model);

    let make_agent = |name: &str, seed: u64| -> Result<RnnAgent, Box<dyn std::error::Error>> {
        let config = AgentConfig {
            seed,
            max_words: 15,
            ..AgentConfig::default()
        };
        let agent = RnnAgent::from_config(name, model.clone(), vocab.clone(), config)?
            .with_markable_detector(Box::new(LexiconDetector::new(["dot", "dots"])));
        Ok(agent)
    };
    let mut alice = make_agent("alice", 1)?;
    let mut bob = make_agent("bob", 2)?;

    let mut rng = StdRng::seed_from_u64(42);
    let base = scene(&mut rng);
    let ids: Vec<String> = (0..7).map(|i| format!("dot-{i}")).collect();
    alice.feed_context(
        Context::new(perturb(&base, &mut rng)).with_real_ids(ids.clone()),
        ContextOptions::default(),
    )?;
    bob.feed_context(Context::new(perturb(&base, &mut rng)).with_real_ids(ids), ContextOptions::default())?;

    let start = Instant::now();
    let write_opts = WriteOptions {
        detect_markables: true,
        ..WriteOptions::default()
    };
    let read_opts = ReadOptions {
        detect_markables: true,
        ..ReadOptions::default()
    };

    for turn in 0..MAX_TURNS {
        let (speaker, listener) = if turn % 2 == 0 {
            (&mut alice, &mut bob)
        } else {
            (&mut bob, &mut alice)
        };
        let words = speaker.write(&write_opts)?;
        println!("{:>5}: {}", speaker.name, words.join(" "));
        listener.read(words.as_slice(), &read_opts)?;
        if words.iter().any(|w| w == "<selection>") {
            break;
        }
    }

    let a = alice.choose()?;
    let b = bob.choose()?;
    println!();
    println!("alice picks {:?} (p={:.3})", a.id, a.prob);
    println!("bob   picks {:?} (p={:.3})", b.id, b.prob);
    println!("agreement: {}", a.id == b.id);
    alice.update(a.id == b.id, if a.id == b.id { 1.0 } else { 0.0 }, Some(&a));
    bob.update(a.id == b.id, if a.id == b.id { 1.0 } else { 0.0 }, Some(&b));
    println!("{} turns in {:.2?}", alice.turn(), start.elapsed());
    Ok(())
}
