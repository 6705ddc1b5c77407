//! Prompt templates for conflict resolution
//!
//! The model gets purpose (each task's intent) and the minimal code involved,
//! never the whole repository.

use crate::merge::ai_resolver::context::ConflictContext;

/// Marker that opens each section of a batched response
pub const LOCATION_MARKER: &str = "## Location:";

pub const SYSTEM_PROMPT: &str = r#"You merge concurrent edits made by independent coding agents to the same code region.

Each agent had a stated intent. Produce a single version of the region that fulfills every intent, keeps the code valid, and preserves behavior neither agent meant to change.

Rules:
- Output code only inside fenced code blocks tagged with the language.
- Do not add features neither agent asked for.
- If the intents genuinely contradict each other, say so instead of writing code."#;

fn fence_tag(ctx: &ConflictContext) -> &'static str {
    ctx.language
        .and_then(|l| l.fence_tags().first().copied())
        .unwrap_or("")
}

fn conflict_section(ctx: &ConflictContext) -> String {
    let tag = fence_tag(ctx);
    let mut section = format!(
        "File: {}\nLocation: {}\nWhy it conflicts: {}\n\n### Baseline\n",
        ctx.conflict.file_path, ctx.conflict.location, ctx.conflict.reason
    );
    if ctx.baseline.trim().is_empty() {
        section.push_str("(not present in the baseline)\n");
    } else {
        section.push_str(&format!("```{}\n{}\n```\n", tag, ctx.baseline.trim_end()));
    }

    for task in &ctx.tasks {
        let kinds = task
            .change_types
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        section.push_str(&format!(
            "\n### Task {} ({})\nIntent: {}\n```{}\n{}\n```\n",
            task.task_id,
            if kinds.is_empty() { "unknown".to_string() } else { kinds },
            task.intent.summary(),
            tag,
            task.changes.trim_end()
        ));
    }
    section
}

/// Prompt for one conflict
pub fn build_resolution_prompt(ctx: &ConflictContext) -> String {
    let language = ctx.language.map(|l| l.name()).unwrap_or("the file's language");
    format!(
        "{}\n## Output\n\nReturn the merged code for `{}` as one ```{}``` fenced block in {}. \
         Return only the code that replaces the baseline region.\n",
        conflict_section(ctx),
        ctx.conflict.location,
        fence_tag(ctx),
        language
    )
}

/// Prompt for several conflicts of the same file in one call
pub fn build_batch_prompt(contexts: &[ConflictContext]) -> String {
    let mut prompt = format!(
        "Resolve the following {} conflicts independently.\n",
        contexts.len()
    );
    for (i, ctx) in contexts.iter().enumerate() {
        prompt.push_str(&format!("\n# Conflict {}\n\n{}", i + 1, conflict_section(ctx)));
    }
    prompt.push_str(&format!(
        "\n## Output\n\nFor each conflict write a line `{} <location>` with the location exactly as given, \
         followed by one fenced code block with the merged code for that location.\n",
        LOCATION_MARKER
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::ai_resolver::context::TaskChangeContext;
    use crate::merge::semantic::Language;
    use crate::merge::types::{ChangeType, ConflictRegion, ConflictSeverity, TaskIntent};

    fn context(location: &str) -> ConflictContext {
        ConflictContext {
            conflict: ConflictRegion {
                file_path: "api.ts".to_string(),
                location: location.to_string(),
                tasks_involved: vec!["t1".to_string()],
                change_types: vec![ChangeType::ModifyFunction],
                severity: ConflictSeverity::High,
                reason: "both rewrite handler".to_string(),
                merge_strategy: None,
            },
            language: Some(Language::TypeScript),
            baseline: "function handler() {}".to_string(),
            tasks: vec![TaskChangeContext {
                task_id: "t1".to_string(),
                intent: TaskIntent::new("Add auth check", ""),
                change_types: vec![ChangeType::ModifyFunction],
                changes: "function handler() { auth(); }".to_string(),
                truncated_lines: 0,
            }],
        }
    }

    #[test]
    fn test_build_resolution_prompt() {
        let prompt = build_resolution_prompt(&context("function:handler"));
        assert!(prompt.contains("api.ts"));
        assert!(prompt.contains("Intent: Add auth check"));
        assert!(prompt.contains("```typescript\nfunction handler() {}\n```"));
        assert!(prompt.contains("modify_function"));
    }

    #[test]
    fn test_batch_prompt_names_every_location() {
        let prompt = build_batch_prompt(&[context("function:a"), context("function:b")]);
        assert!(prompt.contains("Location: function:a"));
        assert!(prompt.contains("Location: function:b"));
        assert!(prompt.contains(LOCATION_MARKER));
    }
}
