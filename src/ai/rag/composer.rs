// Grounded prompt assembly and answer generation

use std::sync::Arc;

use futures_util::StreamExt;

use super::services::{GenerationBackend, TextStream};
use super::types::Passage;
use super::{RAGError, RAGResult};

pub const DEFAULT_INSTRUCTION: &str = "Answer only using the above context.";
pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 4000;

/// Rough token count, about four characters per token
fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

/// Builds a context-bounded prompt and forwards it to the generation backend.
pub struct AnswerComposer {
    generator: Arc<dyn GenerationBackend>,
    instruction: String,
    max_context_tokens: usize,
}

impl AnswerComposer {
    pub fn new(generator: Arc<dyn GenerationBackend>) -> Self {
        Self {
            generator,
            instruction: DEFAULT_INSTRUCTION.to_string(),
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_max_context_tokens(mut self, max_context_tokens: usize) -> Self {
        self.max_context_tokens = max_context_tokens;
        self
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    /// Number of leading passages that fit the budget, with their token total.
    fn fitted_count(&self, passages: &[Passage]) -> (usize, usize) {
        let mut total_tokens = 0;
        let mut fitted = 0;
        for passage in passages {
            let passage_tokens = estimate_tokens(&passage.text);
            if total_tokens + passage_tokens > self.max_context_tokens {
                break;
            }
            total_tokens += passage_tokens;
            fitted += 1;
        }
        (fitted, total_tokens)
    }

    /// Leading passages that fit within `max_context_tokens`, in order.
    /// Fails when passages are given but even the first one does not fit.
    pub fn fit_context<'a>(&self, passages: &'a [Passage]) -> RAGResult<&'a [Passage]> {
        let (fitted, total_tokens) = self.fitted_count(passages);
        if fitted == 0 {
            if let Some(first) = passages.first() {
                return Err(RAGError::ContextBudgetExceeded {
                    required: estimate_tokens(&first.text),
                    budget: self.max_context_tokens,
                });
            }
        }
        if fitted < passages.len() {
            tracing::debug!(
                "Context truncated to {} of {} passages (~{} tokens, budget {})",
                fitted,
                passages.len(),
                total_tokens,
                self.max_context_tokens
            );
        }
        Ok(&passages[..fitted])
    }

    /// Lays out the prompt with passages in the given order, one per line.
    /// Passages are added until the next one would push the context past
    /// `max_context_tokens`.
    pub fn compose_prompt(&self, question: &str, passages: &[Passage]) -> String {
        let (fitted, _) = self.fitted_count(passages);
        let context: Vec<&str> = passages[..fitted].iter().map(|p| p.text.as_str()).collect();

        format!(
            "Context:\n{}\n\nQuestion: {}\n\n{}",
            context.join("\n"),
            question,
            self.instruction
        )
    }

    pub async fn answer(&self, question: &str, passages: &[Passage]) -> RAGResult<String> {
        let prompt = self.compose_prompt(question, self.fit_context(passages)?);
        self.generator.generate(&prompt).await
    }

    pub async fn answer_stream(&self, question: &str, passages: &[Passage]) -> RAGResult<TextStream> {
        let prompt = self.compose_prompt(question, self.fit_context(passages)?);
        self.generator.generate_stream(&prompt).await
    }
}

/// Drains a text stream into one string, failing on the first error.
pub async fn collect_text(mut stream: TextStream) -> RAGResult<String> {
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(&chunk?);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::rag::test_support::ScriptedGenerator;

    fn passage(id: usize, text: &str) -> Passage {
        Passage {
            id,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_prompt_layout() {
        let composer = AnswerComposer::new(Arc::new(ScriptedGenerator::new(&["ok"])));
        let prompt = composer.compose_prompt(
            "How did revenue change?",
            &[
                passage(3, "Revenue grew 20% year over year."),
                passage(0, "Margins were stable at 18%."),
            ],
        );
        assert_eq!(
            prompt,
            "Context:\nRevenue grew 20% year over year.\nMargins were stable at 18%.\n\n\
             Question: How did revenue change?\n\nAnswer only using the above context."
        );
    }

    #[test]
    fn test_context_budget_keeps_leading_passages() {
        // 40 chars each, 10 estimated tokens
        let text = "a".repeat(40);
        let passages: Vec<Passage> = (0..5).map(|id| passage(id, &text)).collect();

        let composer = AnswerComposer::new(Arc::new(ScriptedGenerator::new(&["ok"])))
            .with_max_context_tokens(25);
        let prompt = composer.compose_prompt("q", &passages);
        assert_eq!(prompt.matches(&text).count(), 2);

        let unbounded = AnswerComposer::new(Arc::new(ScriptedGenerator::new(&["ok"])));
        assert_eq!(unbounded.compose_prompt("q", &passages).matches(&text).count(), 5);
    }

    #[tokio::test]
    async fn test_oversized_top_passage_is_not_answered() {
        let generator = Arc::new(ScriptedGenerator::new(&["ungrounded"]));
        // 50 chars, 13 estimated tokens
        let passages = [
            passage(0, "Tesla reported strong revenue growth this quarter."),
            passage(1, "Short."),
        ];
        let composer = AnswerComposer::new(generator.clone()).with_max_context_tokens(10);

        assert!(matches!(
            composer.fit_context(&passages),
            Err(RAGError::ContextBudgetExceeded { required: 13, budget: 10 })
        ));
        assert!(matches!(
            composer.answer("q", &passages).await,
            Err(RAGError::ContextBudgetExceeded { .. })
        ));
        assert!(matches!(
            composer.answer_stream("q", &passages).await,
            Err(RAGError::ContextBudgetExceeded { .. })
        ));
        assert!(generator.prompts().is_empty());
    }

    #[test]
    fn test_fit_context_returns_leading_passages() {
        let text = "a".repeat(40);
        let passages: Vec<Passage> = (0..4).map(|id| passage(id, &text)).collect();
        let composer = AnswerComposer::new(Arc::new(ScriptedGenerator::new(&["ok"])))
            .with_max_context_tokens(25);

        let fitted = composer.fit_context(&passages).unwrap();
        assert_eq!(fitted.iter().map(|p| p.id).collect::<Vec<_>>(), vec![0, 1]);
        assert!(composer.fit_context(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_custom_instruction() {
        let composer = AnswerComposer::new(Arc::new(ScriptedGenerator::new(&["ok"])))
            .with_instruction("Reply in one sentence.");
        let prompt = composer.compose_prompt("q", &[passage(0, "Some context sentence here.")]);
        assert!(prompt.ends_with("Question: q\n\nReply in one sentence."));
    }

    #[tokio::test]
    async fn test_answer_forwards_prompt() {
        let generator = Arc::new(ScriptedGenerator::new(&["Revenue ", "grew."]));
        let composer = AnswerComposer::new(generator.clone());
        let passages = [passage(0, "Tesla reported strong revenue growth this quarter.")];

        let answer = composer.answer("How did revenue change?", &passages).await.unwrap();
        assert_eq!(answer, "Revenue grew.");

        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Tesla reported strong revenue growth this quarter."));
        assert!(prompts[0].contains("Question: How did revenue change?"));
    }

    #[tokio::test]
    async fn test_stream_collects_to_full_answer() {
        let generator = Arc::new(ScriptedGenerator::new(&["Revenue ", "grew ", "20%."]));
        let composer = AnswerComposer::new(generator);
        let stream = composer.answer_stream("q", &[]).await.unwrap();
        assert_eq!(collect_text(stream).await.unwrap(), "Revenue grew 20%.");
    }

    #[tokio::test]
    async fn test_collect_text_stops_on_error() {
        let stream: TextStream = Box::pin(futures_util::stream::iter(vec![
            Ok("partial".to_string()),
            Err(RAGError::GenerationFailure("stream dropped".to_string())),
            Ok("never".to_string()),
        ]));
        assert!(matches!(
            collect_text(stream).await,
            Err(RAGError::GenerationFailure(_))
        ));
    }
}
