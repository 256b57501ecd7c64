use candle_transformers::generation::LogitsProcessor;
use std::time::Instant;

use crate::core::pipeline::{ChatTokenizer, CompiledModule};
use crate::core::{Result, Shape, Tensor};

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub max_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub seed: u64,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.8,
            top_p: 0.9,
            seed: 42,
        }
    }
}

#[derive(Debug)]
pub struct ChatResult {
    pub response: String,
    pub done: bool,
    pub eval_count: usize,
    pub total_duration_ms: u128,
}

/// A compiled language model. The module exposes `run_initialize` (consumes
/// the full prompt) and `run_forward` (consumes the last token); each call
/// returns logits for the next token.
pub struct LanguageModel {
    module: Box<dyn CompiledModule>,
    tokenizer: Box<dyn ChatTokenizer>,
    options: ChatOptions,
}

impl LanguageModel {
    pub fn new(
        module: Box<dyn CompiledModule>,
        tokenizer: Box<dyn ChatTokenizer>,
        options: ChatOptions,
    ) -> Self {
        Self {
            module,
            tokenizer,
            options,
        }
    }

    /// Generate a reply, invoking `callback(decoded_so_far, done)` after
    /// every token. The decoded history grows monotonically, the way the
    /// streaming UI consumes it.
    pub fn chat<F>(&mut self, prompt: &str, mut callback: F) -> Result<ChatResult>
    where
        F: FnMut(&str, bool),
    {
        let prompt_tokens = self.tokenizer.encode(prompt)?;
        if prompt_tokens.is_empty() {
            anyhow::bail!("prompt produced no tokens");
        }

        let mut logits_processor = LogitsProcessor::new(
            self.options.seed,
            Some(self.options.temperature),
            Some(self.options.top_p),
        );

        let stop_token = self.tokenizer.stop_token();
        let started = Instant::now();
        let mut history: Vec<u32> = Vec::new();

        for iter in 0..self.options.max_tokens {
            let (entry, input) = if iter == 0 {
                ("run_initialize", tokens_tensor(&prompt_tokens))
            } else {
                ("run_forward", tokens_tensor(&history[history.len() - 1..]))
            };

            let outputs = self.module.invoke(entry, &[input])?;
            let logits = outputs
                .into_iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("module returned no logits"))?;

            let candle_logits =
                candle_core::Tensor::new(logits.data(), &candle_core::Device::Cpu)?;
            let token = logits_processor.sample(&candle_logits)?;

            if token == stop_token {
                break;
            }

            history.push(token);
            let decoded = self.tokenizer.decode(&history)?;
            callback(&decoded, false);
        }

        let response = self.tokenizer.decode(&history)?;
        callback(&response, true);

        Ok(ChatResult {
            response,
            done: true,
            eval_count: history.len(),
            total_duration_ms: started.elapsed().as_millis(),
        })
    }
}

fn tokens_tensor(tokens: &[u32]) -> Tensor {
    Tensor::new(
        tokens.iter().map(|&t| t as f32).collect(),
        Shape::new(vec![tokens.len()]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::dev::{DevChatModule, DevChatTokenizer};

    fn model() -> LanguageModel {
        LanguageModel::new(
            Box::new(DevChatModule::new()),
            Box::new(DevChatTokenizer::new()),
            ChatOptions::default(),
        )
    }

    #[test]
    fn test_chat_streams_growing_history() {
        let mut lengths = Vec::new();
        let result = model()
            .chat("describe a latent", |decoded, done| {
                if !done {
                    lengths.push(decoded.split_whitespace().count());
                }
            })
            .unwrap();

        assert!(result.done);
        assert!(result.eval_count > 0);
        assert!(lengths.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*lengths.last().unwrap(), result.eval_count);
    }

    #[test]
    fn test_chat_stops_within_budget() {
        let result = model().chat("hello", |_, _| {}).unwrap();
        assert!(result.eval_count <= 512);
        assert!(!result.response.is_empty());
    }

    #[test]
    fn test_same_prompt_same_reply() {
        let a = model().chat("hello world", |_, _| {}).unwrap();
        let b = model().chat("hello world", |_, _| {}).unwrap();
        assert_eq!(a.response, b.response);
    }

    #[test]
    fn test_empty_prompt_rejected() {
        assert!(model().chat("", |_, _| {}).is_err());
    }

    #[test]
    fn test_unknown_entry_point_propagates() {
        struct BadModule;
        impl CompiledModule for BadModule {
            fn entry_points(&self) -> Vec<String> {
                vec![]
            }
            fn invoke(&mut self, entry: &str, _inputs: &[Tensor]) -> Result<Vec<Tensor>> {
                anyhow::bail!("no entry point {}", entry)
            }
        }

        let mut lm = LanguageModel::new(
            Box::new(BadModule),
            Box::new(DevChatTokenizer::new()),
            ChatOptions::default(),
        );
        assert!(lm.chat("hi", |_, _| {}).is_err());
    }
}
