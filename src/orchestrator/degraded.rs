//! Degraded Answer Generator
//!
//! Terminal node of the call graph: when every cloud model is exhausted,
//! this produces *something*: the local model if one is usable, otherwise a
//! heuristic extract of the input. It never fails.

use tracing::{info, warn};

use crate::providers::local::LocalGenerator;

/// How many trailing non-empty lines of the input to consider
const SCAN_LINES: usize = 30;

/// How many of those lines make it into the extract
const MAX_EXTRACT_LINES: usize = 10;

const DEGRADED_NOTICE: &str = "[Degraded answer] The AI models are temporarily \
unavailable, so this is an extract of the most relevant lines from your input, \
not a generated answer. Please retry later for a full answer.";

/// Last-resort answer source
pub struct DegradedAnswerGenerator {
    local: Option<LocalGenerator>,
}

impl DegradedAnswerGenerator {
    pub fn new(local: Option<LocalGenerator>) -> Self {
        Self { local }
    }

    /// Produce an answer, always. Local model first, heuristic second.
    pub async fn generate(&self, system_prompt: &str, user_prompt: &str) -> String {
        if let Some(answer) = self.try_local(system_prompt, user_prompt).await {
            return answer;
        }
        heuristic_extract(user_prompt)
    }

    /// Attempt the local model alone; `None` when it is unusable or returns
    /// nothing worth caching.
    pub async fn try_local(&self, system_prompt: &str, user_prompt: &str) -> Option<String> {
        let local = self.local.as_ref()?;
        match local.try_generate(system_prompt, user_prompt).await {
            Ok(text) if !text.trim().is_empty() => {
                info!("local model produced a degraded answer");
                Some(text.trim().to_string())
            }
            Ok(_) => {
                warn!("local model returned empty output");
                None
            }
            Err(e) => {
                warn!(error = %e, "local model unavailable for degraded answer");
                None
            }
        }
    }
}

/// Extractive summary of the prompt: the trailing non-empty lines, with
/// lines containing a `?` or starting with a digit (enumerated exam items)
/// preferred.
fn heuristic_extract(input: &str) -> String {
    let lines: Vec<&str> = input
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let tail_start = lines.len().saturating_sub(SCAN_LINES);
    let tail = &lines[tail_start..];

    let preferred: Vec<&str> = tail
        .iter()
        .copied()
        .filter(|l| l.contains('?') || l.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .collect();

    let chosen: Vec<&str> = if preferred.is_empty() {
        tail.iter().copied().take(MAX_EXTRACT_LINES).collect()
    } else {
        preferred.into_iter().take(MAX_EXTRACT_LINES).collect()
    };

    if chosen.is_empty() {
        return format!(
            "{}\n\nNo readable content was found in the request to summarize.",
            DEGRADED_NOTICE
        );
    }

    format!("{}\n\n{}", DEGRADED_NOTICE, chosen.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_never_returns_empty() {
        let generator = DegradedAnswerGenerator::new(None);
        let answer = generator.generate("system", "").await;
        assert!(!answer.is_empty());
        assert!(answer.contains("[Degraded answer]"));
    }

    #[test]
    fn test_extract_prefers_question_lines() {
        let input = "Some intro text.\nJust a statement.\nWhat is a mutex?\nAnother statement.";
        let extract = heuristic_extract(input);
        assert!(extract.contains("What is a mutex?"));
        assert!(!extract.contains("Just a statement."));
    }

    #[test]
    fn test_extract_prefers_enumerated_lines() {
        let input = "Preamble.\n1. Define deadlock.\n2. Give an example.\nClosing remark.";
        let extract = heuristic_extract(input);
        assert!(extract.contains("1. Define deadlock."));
        assert!(extract.contains("2. Give an example."));
        assert!(!extract.contains("Preamble."));
    }

    #[test]
    fn test_extract_falls_back_to_tail_lines() {
        let input = "alpha\nbeta\ngamma";
        let extract = heuristic_extract(input);
        assert!(extract.contains("alpha"));
        assert!(extract.contains("gamma"));
    }

    #[test]
    fn test_extract_caps_line_count() {
        let input: String = (0..50).map(|i| format!("{}. item\n", i)).collect();
        let extract = heuristic_extract(&input);
        let body_lines = extract.lines().filter(|l| l.ends_with("item")).count();
        assert_eq!(body_lines, MAX_EXTRACT_LINES);
    }

    #[test]
    fn test_extract_scans_only_the_tail() {
        // 40 plain lines then a question far from the start: the question is
        // inside the 30-line scan window and must win
        let mut input = String::new();
        for i in 0..40 {
            input.push_str(&format!("filler line {}\n", i));
        }
        input.push_str("Is this the real question?\n");
        let extract = heuristic_extract(&input);
        assert!(extract.contains("Is this the real question?"));
    }
}
