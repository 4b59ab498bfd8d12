use std::io;
use std::process;
use std::time::Instant;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use llama_decode::{
    ByteTokenizer, DEFAULT_MAX_NEW_TOKENS, DEFAULT_PROMPT, LlamaConfig, LlamaModel, TextGenerator,
};

/// Greedy KV-cached generation with a seeded synthetic Llama model.
///
/// The weights are random, so the continuation is noise; the tool exercises
/// the decode loop end to end.
#[derive(Parser)]
#[command(name = "llama-decode")]
struct Args {
    /// Prompt text
    #[arg(default_value = DEFAULT_PROMPT)]
    prompt: String,

    /// Maximum number of tokens to generate after the prompt
    #[arg(short = 'n', long, default_value_t = DEFAULT_MAX_NEW_TOKENS)]
    max_new_tokens: usize,

    /// Maximum sequence length in tokens, prompt included; overrides -n
    #[arg(long, conflicts_with = "max_new_tokens")]
    max_length: Option<usize>,

    /// Model size preset: tiny or small
    #[arg(long, default_value = "tiny", value_parser = validate_preset)]
    preset: String,

    /// Seed for the synthetic weights
    #[arg(short = 's', long, default_value_t = 0)]
    seed: u64,

    /// Suppress all logging
    #[arg(long)]
    log_disable: bool,
}

fn validate_preset(s: &str) -> Result<String, String> {
    match LlamaConfig::preset(s) {
        Some(_) => Ok(s.to_string()),
        None => Err(format!("Unknown preset '{}'. Options: tiny, small", s)),
    }
}

/// Log to stderr, respecting `RUST_LOG` and defaulting to WARN.
fn init_logging(disable: bool) {
    if disable {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.log_disable);

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = LlamaConfig::preset(&args.preset)
        .ok_or_else(|| format!("unknown preset '{}'", args.preset))?;

    let load_start = Instant::now();
    let model = LlamaModel::random(config, args.seed)?;
    info!(
        dim = config.dim,
        layers = config.n_layers,
        heads = config.n_heads,
        kv_heads = config.n_kv_heads,
        vocab = config.vocab_size,
        elapsed_ms = load_start.elapsed().as_millis() as u64,
        "model initialised"
    );

    let layout = model.cache_layout();
    let generator = TextGenerator::new(ByteTokenizer::new(), model, layout);

    let start = Instant::now();
    let completion = match args.max_length {
        Some(max_length) => generator.generate(&args.prompt, max_length)?,
        None => generator.generate_new_tokens(&args.prompt, args.max_new_tokens)?,
    };
    println!("{}", completion.text);

    let generated = completion.generated();
    let secs = start.elapsed().as_secs_f64();
    let tok_per_sec = if secs > 0.0 { generated as f64 / secs } else { 0.0 };
    info!(
        generated,
        steps = completion.steps,
        stop_reason = %completion.stop_reason,
        tok_per_sec,
        "done"
    );
    Ok(())
}
