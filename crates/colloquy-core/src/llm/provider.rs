//! The provider trait every chat-completion backend implements.

use colloquy_types::llm::{CompletionRequest, CompletionResponse, LlmError, ProviderCapabilities};

/// A chat-completion backend.
///
/// Uses RPITIT for the async method; [`crate::llm::BoxLlmProvider`] adds
/// dyn-compatible type erasure on top so heterogeneous providers can share
/// one failover chain.
pub trait LlmProvider: Send + Sync {
    /// Canonical provider name (matches configuration).
    fn name(&self) -> &str;

    /// Model requested when the completion request leaves `model` empty.
    fn model(&self) -> &str;

    fn capabilities(&self) -> &ProviderCapabilities;

    /// Execute a completion request.
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl std::future::Future<Output = Result<CompletionResponse, LlmError>> + Send;

    /// Rough token estimate for pre-flight context-window screening.
    ///
    /// Character-count heuristic (about 4 chars per token plus a small
    /// per-message overhead); deliberately pessimistic rather than exact.
    fn estimate_tokens(&self, request: &CompletionRequest) -> u32 {
        let mut chars = request.system.as_deref().map_or(0, str::len);
        for message in &request.messages {
            chars += message.content.len();
        }
        (chars as u32).div_ceil(4) + (request.messages.len() as u32) * 10
    }
}
