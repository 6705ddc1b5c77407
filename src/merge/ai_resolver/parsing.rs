//! Model response parsing
//!
//! Code is only accepted when it is clearly there: a fenced block tagged with
//! the target language (or untagged), or an unfenced response that reads as
//! code for that language.

use crate::merge::ai_resolver::prompts::LOCATION_MARKER;
use crate::merge::semantic::Language;

/// Minimum number of distinct language keywords an unfenced response needs
const MIN_KEYWORD_HITS: usize = 2;

struct FencedBlock {
    tag: String,
    body: String,
}

fn fenced_blocks(response: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in response.lines() {
        let trimmed = line.trim();
        match current.take() {
            None => {
                if let Some(info) = trimmed.strip_prefix("```") {
                    let tag = info.split_whitespace().next().unwrap_or("").to_ascii_lowercase();
                    current = Some((tag, Vec::new()));
                }
            }
            Some((tag, body)) if trimmed == "```" => {
                blocks.push(FencedBlock {
                    tag,
                    body: body.join("\n"),
                });
            }
            Some((tag, mut body)) => {
                body.push(line);
                current = Some((tag, body));
            }
        }
    }
    // An unclosed fence is not trusted
    blocks
}

/// Extract merged code for `language` from a model response
pub fn extract_code(response: &str, language: Option<Language>) -> Option<String> {
    let blocks = fenced_blocks(response);

    if !blocks.is_empty() {
        return blocks
            .into_iter()
            .find(|b| {
                b.tag.is_empty()
                    || language.map_or(true, |l| l.fence_tags().contains(&b.tag.as_str()))
            })
            .map(|b| b.body)
            .filter(|body| !body.trim().is_empty());
    }

    if response.contains("```") {
        return None;
    }

    let language = language?;
    looks_like_code(response, language).then(|| response.trim_matches('\n').trim_end().to_string())
}

/// Keyword heuristic for unfenced responses
pub fn looks_like_code(text: &str, language: Language) -> bool {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.is_empty() {
        return false;
    }

    let hits = language
        .code_keywords()
        .iter()
        .filter(|k| text.contains(*k))
        .count();

    // Sentences end in a period and contain several words
    let prose = lines
        .iter()
        .filter(|l| l.ends_with('.') && l.split_whitespace().count() > 3)
        .count();

    hits >= MIN_KEYWORD_HITS && prose * 2 < lines.len()
}

/// Split a batched response into `(location, section)` pairs in response order
pub fn split_batch_response(response: &str) -> Vec<(String, String)> {
    let mut sections: Vec<(String, Vec<&str>)> = Vec::new();

    for line in response.lines() {
        if let Some(rest) = line.trim().strip_prefix(LOCATION_MARKER) {
            let location = rest.trim().trim_matches('`').trim().to_string();
            sections.push((location, Vec::new()));
        } else if let Some((_, body)) = sections.last_mut() {
            body.push(line);
        }
    }

    sections
        .into_iter()
        .map(|(location, body)| (location, body.join("\n")))
        .collect()
}
