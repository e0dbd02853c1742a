//! Defensive parsing of reviewer output.
//!
//! Reviewer output is free text expected to contain a JSON object,
//! optionally inside a fenced code block. Extraction strips the fence,
//! then the object is parsed strictly: a missing or unrecognized `status`
//! is a parse failure, never a panic. Parse failures classify as
//! `parse_error` upstream and are not retried.

use serde::{Deserialize, Serialize};

use crate::store::models::ReviewStatus;

/// A `{title, description}` proposal for a follow-up chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixChunkProposal {
    pub title: String,
    pub description: String,
}

/// Parsed result of a single-chunk review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReviewResponse {
    pub status: ReviewStatus,
    pub feedback: String,
    /// Present only when `status` is `needs_fix`.
    pub fix_chunk: Option<FixChunkProposal>,
}

/// Parsed result of a whole-spec review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalReviewResponse {
    pub status: ReviewStatus,
    pub feedback: String,
    pub integration_issues: Vec<String>,
    pub missing_requirements: Vec<String>,
    pub fix_chunks: Vec<FixChunkProposal>,
}

/// Parse a chunk-review response out of raw reviewer text.
pub fn parse_chunk_review(output: &str) -> Result<ChunkReviewResponse, String> {
    let json_str = extract_json(output).ok_or("No JSON object found in reviewer output")?;
    let value: serde_json::Value = serde_json::from_str(&json_str)
        .map_err(|e| format!("Invalid JSON in reviewer output: {}", e))?;

    let status = parse_status(&value)?;
    let feedback = string_field(&value, "feedback");

    let fix_chunk = if status == ReviewStatus::NeedsFix {
        parse_fix_chunk(value.get("fix_chunk"))
    } else {
        None
    };

    Ok(ChunkReviewResponse {
        status,
        feedback,
        fix_chunk,
    })
}

/// Parse a final-review response out of raw reviewer text.
pub fn parse_final_review(output: &str) -> Result<FinalReviewResponse, String> {
    let json_str = extract_json(output).ok_or("No JSON object found in reviewer output")?;
    let value: serde_json::Value = serde_json::from_str(&json_str)
        .map_err(|e| format!("Invalid JSON in reviewer output: {}", e))?;

    let status = parse_status(&value)?;
    let feedback = string_field(&value, "feedback");

    let fix_chunks = value
        .get("fix_chunks")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| parse_fix_chunk(Some(v))).collect())
        .unwrap_or_default();

    Ok(FinalReviewResponse {
        status,
        feedback,
        integration_issues: string_list(&value, "integration_issues"),
        missing_requirements: string_list(&value, "missing_requirements"),
        fix_chunks,
    })
}

fn parse_status(value: &serde_json::Value) -> Result<ReviewStatus, String> {
    let status_str = value
        .get("status")
        .and_then(|v| v.as_str())
        .ok_or("Reviewer output missing 'status' field")?;
    status_str
        .to_lowercase()
        .parse::<ReviewStatus>()
        .map_err(|_| format!("Unrecognized review status '{}'", status_str))
}

fn parse_fix_chunk(value: Option<&serde_json::Value>) -> Option<FixChunkProposal> {
    let value = value?;
    let title = value.get("title").and_then(|v| v.as_str())?;
    let description = value.get("description").and_then(|v| v.as_str())?;
    if title.is_empty() {
        return None;
    }
    Some(FixChunkProposal {
        title: title.to_string(),
        description: description.to_string(),
    })
}

fn string_field(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn string_list(value: &serde_json::Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Extract JSON from output that may contain markdown or other text.
fn extract_json(output: &str) -> Option<String> {
    // A ```json fenced block wins
    if let Some(start) = output.find("```json") {
        let after_marker = &output[start + 7..];
        if let Some(end) = after_marker.find("```") {
            return Some(after_marker[..end].trim().to_string());
        }
    }

    // Then a generic fenced block containing a brace
    if let Some(start) = output.find("```") {
        let after_marker = &output[start + 3..];
        if let Some(end) = after_marker.find("```") {
            if let Some(json_start) = after_marker[..end].find('{') {
                let content = &after_marker[json_start..end];
                if !content.is_empty() {
                    return Some(content.trim().to_string());
                }
            }
        }
    }

    // Finally a raw object, matched by brace depth
    if let Some(start) = output.find('{') {
        let mut depth = 0;
        let mut end = start;
        for (i, c) in output[start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = start + i + 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        if depth == 0 && end > start {
            return Some(output[start..end].to_string());
        }
    }

    None
}
