//! Reviewing-agent boundary and review prompt construction.
//!
//! The reviewer is an external agent invoked with a prompt and a
//! timeout; it answers in free text expected to carry a JSON verdict.
//! The trait exists so the engine can be driven by scripted mocks in
//! tests, the same seam shape as `AgentRuntime`.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::store::models::{Chunk, Spec};

/// Raw outcome of one reviewer invocation.
///
/// `success = false` means the agent itself failed (process error, HTTP
/// failure); `output` then carries the error text for classification.
#[derive(Debug, Clone)]
pub struct ReviewerResponse {
    pub success: bool,
    pub output: String,
}

impl ReviewerResponse {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// External reviewing-agent boundary.
#[async_trait]
pub trait ReviewerAgent: Send + Sync {
    async fn execute(&self, prompt: &str, timeout: Duration) -> Result<ReviewerResponse>;

    /// Model identifier recorded in audit rows.
    fn model(&self) -> &str;
}

/// Build the prompt for reviewing one chunk's output.
pub fn build_chunk_review_prompt(chunk: &Chunk) -> String {
    let output = chunk.output.as_deref().unwrap_or("(no output recorded)");

    format!(
        r#"# Chunk Review

You are reviewing whether one unit of delegated work satisfies its
requirements.

## Chunk
- Title: {title}

## Requirements

{description}

## Produced Output

{output}

## Review Instructions

1. Check whether the output satisfies the stated requirements
2. Verdict `pass` when it does, `fail` when it is fundamentally wrong,
   `needs_fix` when a concrete follow-up task would repair it
3. When the verdict is `needs_fix`, propose exactly one follow-up task

## Output Format

Respond with a JSON object:

```json
{{
  "status": "pass|needs_fix|fail",
  "feedback": "Brief explanation of your verdict",
  "fix_chunk": {{
    "title": "Follow-up task title (only when status is needs_fix)",
    "description": "What the follow-up task must do"
  }}
}}
```

Omit `fix_chunk` unless the status is `needs_fix`. Begin your review now.
"#,
        title = chunk.title,
        description = chunk.description,
        output = output,
    )
}

/// Build the prompt for the whole-spec final review.
pub fn build_final_review_prompt(spec: &Spec, chunks: &[Chunk]) -> String {
    let chunk_summaries = chunks
        .iter()
        .map(|c| {
            let output = c
                .output
                .as_deref()
                .map(truncate_output)
                .unwrap_or_else(|| "(no output)".to_string());
            format!(
                "### {} [{}]\n{}\n\nOutput:\n{}",
                c.title, c.status, c.description, output
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"# Final Review

You are reviewing whether a completed set of work chunks, taken
together, satisfies the original specification.

## Specification

{content}

## Chunk Results

{chunk_summaries}

## Review Instructions

1. Check the combined result against the specification
2. Look for integration issues between chunks and for requirements no
   chunk covered
3. Verdict `pass` when the specification is satisfied, `fail` when the
   work is fundamentally off course, `needs_fix` when concrete follow-up
   tasks would close the gaps
4. When the verdict is `needs_fix`, propose one follow-up task per gap

## Output Format

Respond with a JSON object:

```json
{{
  "status": "pass|needs_fix|fail",
  "feedback": "Overall assessment",
  "integration_issues": ["..."],
  "missing_requirements": ["..."],
  "fix_chunks": [
    {{"title": "Follow-up task title", "description": "What it must do"}}
  ]
}}
```

Begin your review now.
"#,
        content = spec.content,
        chunk_summaries = chunk_summaries,
    )
}

// Keeps final-review prompts bounded when chunk outputs run long.
fn truncate_output(output: &str) -> String {
    const MAX_CHARS: usize = 2000;
    if output.chars().count() <= MAX_CHARS {
        return output.to_string();
    }
    let truncated: String = output.chars().take(MAX_CHARS).collect();
    format!("{}\n... (truncated)", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{ChunkStatus, SpecStatus};

    fn chunk(title: &str, description: &str, output: Option<&str>) -> Chunk {
        Chunk {
            id: 1,
            spec_id: 1,
            title: title.to_string(),
            description: description.to_string(),
            status: ChunkStatus::Completed,
            position: 0,
            dependencies: vec![],
            review_status: None,
            review_feedback: None,
            output: output.map(String::from),
            error: None,
            fix_of: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_chunk_prompt_carries_title_description_output() {
        let c = chunk("Add config loader", "Load TOML config", Some("Wrote loader.rs"));
        let prompt = build_chunk_review_prompt(&c);
        assert!(prompt.contains("Add config loader"));
        assert!(prompt.contains("Load TOML config"));
        assert!(prompt.contains("Wrote loader.rs"));
        assert!(prompt.contains("pass|needs_fix|fail"));
    }

    #[test]
    fn test_chunk_prompt_handles_missing_output() {
        let c = chunk("Task", "Do the thing", None);
        let prompt = build_chunk_review_prompt(&c);
        assert!(prompt.contains("(no output recorded)"));
    }

    #[test]
    fn test_final_prompt_summarizes_all_chunks() {
        let spec = Spec {
            id: 1,
            project_id: 1,
            content: "Build the widget service".to_string(),
            status: SpecStatus::Running,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let chunks = vec![
            chunk("First", "step one", Some("done one")),
            chunk("Second", "step two", Some("done two")),
        ];
        let prompt = build_final_review_prompt(&spec, &chunks);
        assert!(prompt.contains("Build the widget service"));
        assert!(prompt.contains("First"));
        assert!(prompt.contains("Second"));
        assert!(prompt.contains("done two"));
        assert!(prompt.contains("fix_chunks"));
    }

    #[test]
    fn test_long_output_is_truncated_in_final_prompt() {
        let long = "x".repeat(5000);
        let spec = Spec {
            id: 1,
            project_id: 1,
            content: "spec".to_string(),
            status: SpecStatus::Running,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let chunks = vec![chunk("Big", "big", Some(&long))];
        let prompt = build_final_review_prompt(&spec, &chunks);
        assert!(prompt.contains("... (truncated)"));
        assert!(prompt.len() < 4000 + 1000);
    }
}
