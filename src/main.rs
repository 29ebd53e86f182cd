//! One-shot console entry point
//!
//! Reads a question from the arguments (or stdin), runs it through the
//! orchestrator, prints the answer. The HTTP layer of the backend drives the
//! same `Orchestrator::complete` call.

use std::io::Read;

use tracing_subscriber::EnvFilter;

use examly::{AiError, CompletionRequest, Config, Orchestrator};

/// System prompt used by the exam-prep flows
const DEFAULT_SYSTEM_PROMPT: &str = "You are an academic assistant.";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    if config.api_key.is_none() {
        eprintln!("[WARNING] OPENROUTER_KEY is not set; cloud models will be unreachable");
        eprintln!("[WARNING] answers will come from the local model or the degraded heuristic");
    }

    let prompt = read_prompt();
    let orchestrator = Orchestrator::new(config);
    let request = CompletionRequest::new(DEFAULT_SYSTEM_PROMPT, prompt);

    match orchestrator.complete(&request).await {
        Ok(answer) => println!("{}", answer),
        Err(e @ AiError::RateLimited) => {
            eprintln!("{}", e);
            std::process::exit(3);
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

/// Prompt from the arguments, or stdin when none are given
fn read_prompt() -> String {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        return args.join(" ");
    }
    let mut buffer = String::new();
    std::io::stdin().read_to_string(&mut buffer).ok();
    buffer
}
