//! AI-assisted conflict resolution
//!
//! Last resort for conflicts the compatibility rules cannot settle. The model
//! sits behind the `AiClient` capability so the resolver works the same with a
//! CLI agent, an HTTP client, or a deterministic test stub.
//!
//! The resolver fails closed:
//! - ineligible conflicts (low severity, AI disabled, no client) go to human review
//! - prompts over the token budget go to human review without calling the model
//! - responses without recognizable code go to human review
//! - a failing call marks only that conflict `failed`

mod cli_client;
mod context;
mod parsing;
mod prompts;

pub use cli_client::CliAgentClient;
pub use context::{estimate_tokens, ConflictContext, TaskChangeContext};
pub use parsing::{extract_code, looks_like_code, split_batch_response};
pub use prompts::{build_batch_prompt, build_resolution_prompt, LOCATION_MARKER, SYSTEM_PROMPT};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

use crate::merge::types::{ConflictRegion, MergeResult};

/// The single model call the merge engine depends on
#[async_trait]
pub trait AiClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, String>;
}

/// Resolver limits
#[derive(Debug, Clone)]
pub struct AiResolverConfig {
    pub enable_ai: bool,
    /// Budget for one single-conflict prompt, system prompt included
    pub max_context_tokens: usize,
    /// Budget for one batched prompt
    pub max_batch_tokens: usize,
    pub batch_conflicts: bool,
    /// Lines of each task's change shown to the model
    pub max_change_lines: usize,
    pub timeout_secs: u64,
}

impl Default for AiResolverConfig {
    fn default() -> Self {
        Self {
            enable_ai: true,
            max_context_tokens: 4000,
            max_batch_tokens: 8000,
            batch_conflicts: true,
            max_change_lines: 60,
            timeout_secs: 120,
        }
    }
}

pub struct AiResolver {
    client: Option<Arc<dyn AiClient>>,
    config: AiResolverConfig,
}

impl AiResolver {
    pub fn new(client: Option<Arc<dyn AiClient>>, config: AiResolverConfig) -> Self {
        Self { client, config }
    }

    /// Resolver with no model behind it
    pub fn disabled() -> Self {
        Self {
            client: None,
            config: AiResolverConfig {
                enable_ai: false,
                ..AiResolverConfig::default()
            },
        }
    }

    pub fn config(&self) -> &AiResolverConfig {
        &self.config
    }

    /// Whether `conflict` may be sent to the model at all
    pub fn can_resolve(&self, conflict: &ConflictRegion) -> bool {
        self.config.enable_ai && self.client.is_some() && conflict.is_ai_eligible()
    }

    /// Tokens a single-conflict call would send
    pub fn estimate_prompt_tokens(ctx: &ConflictContext) -> usize {
        estimate_tokens(SYSTEM_PROMPT) + estimate_tokens(&build_resolution_prompt(ctx))
    }

    async fn call(&self, client: &dyn AiClient, user_prompt: &str) -> Result<String, String> {
        match timeout(
            Duration::from_secs(self.config.timeout_secs),
            client.complete(SYSTEM_PROMPT, user_prompt),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(format!("Timeout after {} seconds", self.config.timeout_secs)),
        }
    }

    /// Resolve one conflict, or explain why it needs a human
    pub async fn resolve_conflict(&self, ctx: &ConflictContext) -> MergeResult {
        let conflict = &ctx.conflict;
        let client = match &self.client {
            Some(client) if self.can_resolve(conflict) => client.clone(),
            _ => {
                return MergeResult::needs_human_review(
                    conflict,
                    format!(
                        "{} conflict at {} is not eligible for AI resolution",
                        conflict.severity, conflict.location
                    ),
                )
            }
        };

        if ctx.is_truncated() {
            log::info!(
                "[AiResolver] {}:{} does not fit in {} lines per task, routing to human review",
                conflict.file_path,
                conflict.location,
                self.config.max_change_lines
            );
            return MergeResult::needs_human_review(
                conflict,
                format!(
                    "changes at {} exceed {} lines per task and cannot be shown in full",
                    conflict.location, self.config.max_change_lines
                ),
            );
        }

        let prompt = build_resolution_prompt(ctx);
        let prompt_tokens = estimate_tokens(SYSTEM_PROMPT) + estimate_tokens(&prompt);
        if prompt_tokens > self.config.max_context_tokens {
            log::info!(
                "[AiResolver] {}:{} needs ~{} tokens (budget {}), routing to human review",
                conflict.file_path,
                conflict.location,
                prompt_tokens,
                self.config.max_context_tokens
            );
            return MergeResult::needs_human_review(
                conflict,
                format!(
                    "context of ~{} tokens exceeds the budget of {}",
                    prompt_tokens, self.config.max_context_tokens
                ),
            );
        }

        log::info!(
            "[AiResolver] Resolving {}:{} (~{} tokens)",
            conflict.file_path,
            conflict.location,
            prompt_tokens
        );

        match self.call(client.as_ref(), &prompt).await {
            Err(e) => {
                log::error!(
                    "[AiResolver] Call failed for {}:{}: {}",
                    conflict.file_path,
                    conflict.location,
                    e
                );
                MergeResult::failed(conflict, e).with_call_cost(prompt_tokens)
            }
            Ok(response) => {
                let tokens = prompt_tokens + estimate_tokens(&response);
                match extract_code(&response, ctx.language) {
                    Some(code) => MergeResult::ai_merged(
                        conflict,
                        code,
                        tokens,
                        format!("merged {} by AI", conflict.location),
                    ),
                    None => {
                        log::warn!(
                            "[AiResolver] No usable code in response for {}:{}",
                            conflict.file_path,
                            conflict.location
                        );
                        MergeResult::needs_human_review(
                            conflict,
                            "model response contained no recognizable code",
                        )
                        .with_call_cost(tokens)
                    }
                }
            }
        }
    }

    /// Resolve several conflicts of one file, batching those that fit together.
    ///
    /// Results come back in input order.
    pub async fn resolve_conflicts(&self, contexts: &[ConflictContext]) -> Vec<MergeResult> {
        let mut results: Vec<Option<MergeResult>> = vec![None; contexts.len()];

        let eligible: Vec<usize> = (0..contexts.len())
            .filter(|&i| self.can_resolve(&contexts[i].conflict) && !contexts[i].is_truncated())
            .filter(|&i| Self::estimate_prompt_tokens(&contexts[i]) <= self.config.max_context_tokens)
            .collect();

        if self.config.batch_conflicts && eligible.len() > 1 {
            for chunk in self.plan_batches(contexts, &eligible) {
                if chunk.len() < 2 {
                    continue;
                }
                for (i, result) in self.resolve_batch(contexts, &chunk).await {
                    results[i] = Some(result);
                }
            }
        }

        for (i, ctx) in contexts.iter().enumerate() {
            if results[i].is_none() {
                results[i] = Some(self.resolve_conflict(ctx).await);
            }
        }

        results.into_iter().flatten().collect()
    }

    /// Greedy grouping of consecutive eligible conflicts under the batch budget
    fn plan_batches(&self, contexts: &[ConflictContext], eligible: &[usize]) -> Vec<Vec<usize>> {
        let mut batches: Vec<Vec<usize>> = Vec::new();
        let mut current: Vec<usize> = Vec::new();

        for &i in eligible {
            let mut candidate = current.clone();
            candidate.push(i);
            let batch: Vec<ConflictContext> = candidate.iter().map(|&j| contexts[j].clone()).collect();
            let tokens = estimate_tokens(SYSTEM_PROMPT) + estimate_tokens(&build_batch_prompt(&batch));

            if tokens <= self.config.max_batch_tokens || current.is_empty() {
                current = candidate;
            } else {
                batches.push(std::mem::take(&mut current));
                current.push(i);
            }
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    /// One call for several conflicts. Locations missing from the response are
    /// left out so the caller resolves them individually.
    async fn resolve_batch(
        &self,
        contexts: &[ConflictContext],
        chunk: &[usize],
    ) -> Vec<(usize, MergeResult)> {
        let Some(client) = self.client.clone() else {
            return Vec::new();
        };
        let batch: Vec<ConflictContext> = chunk.iter().map(|&i| contexts[i].clone()).collect();
        let prompt = build_batch_prompt(&batch);
        let prompt_tokens = estimate_tokens(SYSTEM_PROMPT) + estimate_tokens(&prompt);

        log::info!(
            "[AiResolver] Resolving {} conflicts in one call (~{} tokens)",
            chunk.len(),
            prompt_tokens
        );

        let response = match self.call(client.as_ref(), &prompt).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("[AiResolver] Batch call failed: {}", e);
                return chunk
                    .iter()
                    .enumerate()
                    .map(|(n, &i)| {
                        let failed = MergeResult::failed(&contexts[i].conflict, e.clone());
                        let failed = if n == 0 { failed.with_call_cost(prompt_tokens) } else { failed };
                        (i, failed)
                    })
                    .collect();
            }
        };

        let tokens = prompt_tokens + estimate_tokens(&response);
        let sections = split_batch_response(&response);
        let mut resolved = Vec::new();

        for &i in chunk {
            let ctx = &contexts[i];
            let code = sections
                .iter()
                .find(|(location, _)| location == ctx.location())
                .and_then(|(_, section)| extract_code(section, ctx.language));
            match code {
                Some(code) => {
                    let mut result = MergeResult::ai_merged(
                        &ctx.conflict,
                        code,
                        0,
                        format!("merged {} by AI (batched)", ctx.location()),
                    );
                    // The call is counted once per batch
                    if resolved.is_empty() {
                        result.tokens_used = tokens;
                    } else {
                        result.ai_calls_made = 0;
                    }
                    resolved.push((i, result));
                }
                None => log::debug!(
                    "[AiResolver] {} missing from batch response, resolving individually",
                    ctx.location()
                ),
            }
        }

        if resolved.is_empty() {
            log::warn!("[AiResolver] Batch response had no usable sections");
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::semantic::Language;
    use crate::merge::types::{ChangeType, ConflictSeverity, MergeDecision, TaskIntent};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Returns queued responses in order and counts calls
    struct StubClient {
        responses: Mutex<Vec<Result<String, String>>>,
        calls: AtomicUsize,
    }

    impl StubClient {
        fn new(responses: Vec<Result<String, String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AiClient for StubClient {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(String::new())
            } else {
                responses.remove(0)
            }
        }
    }

    fn context(location: &str, severity: ConflictSeverity, body_lines: usize) -> ConflictContext {
        let body = (0..body_lines)
            .map(|i| format!("    value_{} = compute({})", i, i))
            .collect::<Vec<_>>()
            .join("\n");
        ConflictContext {
            conflict: ConflictRegion {
                file_path: "app.py".to_string(),
                location: location.to_string(),
                tasks_involved: vec!["a".to_string(), "b".to_string()],
                change_types: vec![ChangeType::ModifyFunction],
                severity,
                reason: "both rewrite".to_string(),
                merge_strategy: None,
            },
            language: Some(Language::Python),
            baseline: format!("def f():\n{}", body),
            tasks: vec![TaskChangeContext {
                task_id: "a".to_string(),
                intent: TaskIntent::new("Add caching", ""),
                change_types: vec![ChangeType::ModifyFunction],
                changes: body,
                truncated_lines: 0,
            }],
        }
    }

    fn resolver(client: Arc<StubClient>, config: AiResolverConfig) -> AiResolver {
        AiResolver::new(Some(client as Arc<dyn AiClient>), config)
    }

    #[tokio::test]
    async fn test_successful_resolution() {
        let stub = StubClient::new(vec![Ok("```python\ndef f():\n    return 1\n```".to_string())]);
        let resolver = resolver(stub.clone(), AiResolverConfig::default());

        let result = resolver
            .resolve_conflict(&context("function:f", ConflictSeverity::High, 2))
            .await;
        assert_eq!(result.decision, MergeDecision::AiMerged);
        assert_eq!(result.merged_content.as_deref(), Some("def f():\n    return 1"));
        assert_eq!(result.ai_calls_made, 1);
        assert!(result.tokens_used > 0);
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_over_budget_makes_no_call() {
        let stub = StubClient::new(vec![]);
        let config = AiResolverConfig {
            max_context_tokens: 200,
            ..AiResolverConfig::default()
        };
        let resolver = resolver(stub.clone(), config);

        let result = resolver
            .resolve_conflict(&context("function:f", ConflictSeverity::High, 200))
            .await;
        assert_eq!(result.decision, MergeDecision::NeedsHumanReview);
        assert_eq!(result.ai_calls_made, 0);
        assert!(result.merged_content.is_none());
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn test_truncated_context_makes_no_call() {
        let stub = StubClient::new(vec![
            Ok("```python\ndef f():\n    return 1\n```".to_string()),
            Ok("```python\ndef g():\n    return 2\n```".to_string()),
        ]);
        let resolver = resolver(stub.clone(), AiResolverConfig::default());

        let mut truncated = context("function:f", ConflictSeverity::High, 2);
        truncated.tasks[0].truncated_lines = 40;
        assert!(truncated.is_truncated());

        let result = resolver.resolve_conflict(&truncated).await;
        assert_eq!(result.decision, MergeDecision::NeedsHumanReview);
        assert_eq!(result.ai_calls_made, 0);
        assert_eq!(stub.calls(), 0);

        let mut second = truncated.clone();
        second.conflict.location = "function:g".to_string();
        let results = resolver.resolve_conflicts(&[truncated, second]).await;
        assert!(results
            .iter()
            .all(|r| r.decision == MergeDecision::NeedsHumanReview && r.ai_calls_made == 0));
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn test_low_severity_and_disabled_are_not_sent() {
        let stub = StubClient::new(vec![]);
        let resolver = resolver(stub.clone(), AiResolverConfig::default());
        let low = context("function:f", ConflictSeverity::Low, 1);
        assert!(!resolver.can_resolve(&low.conflict));
        let result = resolver.resolve_conflict(&low).await;
        assert_eq!(result.decision, MergeDecision::NeedsHumanReview);

        let disabled = AiResolver::disabled();
        let high = context("function:f", ConflictSeverity::High, 1);
        assert!(!disabled.can_resolve(&high.conflict));
        assert_eq!(
            disabled.resolve_conflict(&high).await.decision,
            MergeDecision::NeedsHumanReview
        );
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn test_response_without_code_needs_review() {
        let stub = StubClient::new(vec![Ok(
            "These two changes contradict each other and should be reviewed by a person.".to_string(),
        )]);
        let resolver = resolver(stub.clone(), AiResolverConfig::default());

        let result = resolver
            .resolve_conflict(&context("function:f", ConflictSeverity::Medium, 1))
            .await;
        assert_eq!(result.decision, MergeDecision::NeedsHumanReview);
        assert!(result.merged_content.is_none());
        assert_eq!(result.ai_calls_made, 1);
    }

    #[tokio::test]
    async fn test_call_error_is_failed() {
        let stub = StubClient::new(vec![Err("connection reset".to_string())]);
        let resolver = resolver(stub, AiResolverConfig::default());

        let result = resolver
            .resolve_conflict(&context("function:f", ConflictSeverity::High, 1))
            .await;
        assert_eq!(result.decision, MergeDecision::Failed);
        assert_eq!(result.error.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn test_batch_with_missing_location_falls_back() {
        let batch_response = "## Location: function:a\n```python\ndef a():\n    return 1\n```\n";
        let stub = StubClient::new(vec![
            Ok(batch_response.to_string()),
            Ok("```python\ndef b():\n    return 2\n```".to_string()),
        ]);
        let resolver = resolver(stub.clone(), AiResolverConfig::default());

        let contexts = vec![
            context("function:a", ConflictSeverity::High, 1),
            context("function:b", ConflictSeverity::High, 1),
        ];
        let results = resolver.resolve_conflicts(&contexts).await;

        assert_eq!(stub.calls(), 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].location.as_deref(), Some("function:a"));
        assert_eq!(results[0].merged_content.as_deref(), Some("def a():\n    return 1"));
        assert_eq!(results[1].merged_content.as_deref(), Some("def b():\n    return 2"));
        let calls: u32 = results.iter().map(|r| r.ai_calls_made).sum();
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_batching_disabled_resolves_individually() {
        let stub = StubClient::new(vec![
            Ok("```python\ndef a(): pass\n```".to_string()),
            Ok("```python\ndef b(): pass\n```".to_string()),
        ]);
        let config = AiResolverConfig {
            batch_conflicts: false,
            ..AiResolverConfig::default()
        };
        let resolver = resolver(stub.clone(), config);
        let results = resolver
            .resolve_conflicts(&[
                context("function:a", ConflictSeverity::High, 1),
                context("function:b", ConflictSeverity::High, 1),
            ])
            .await;
        assert_eq!(stub.calls(), 2);
        assert!(results.iter().all(|r| r.is_success()));
    }
}
