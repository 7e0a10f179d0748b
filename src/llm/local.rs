use std::num::NonZeroU32;
use std::pin::pin;

use anyhow::{Context, Result};
use log::{debug, info, trace};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;

use super::{BackendConfig, ChatMessage, DecisionMaker};

/// Sampler chain for free-form answers. The seed changes on every call so
/// repeated episodes over the same story sample different paths.
fn build_sampler(temperature: f32) -> LlamaSampler {
    LlamaSampler::chain_simple([
        LlamaSampler::penalties(64, 1.1, 0.0, 0.0),
        LlamaSampler::top_k(40),
        LlamaSampler::top_p(0.95, 1),
        LlamaSampler::min_p(0.0, 1),
        LlamaSampler::temp(temperature),
        LlamaSampler::dist(rand::random::<u32>()),
    ])
}

/// A GGUF model loaded in-process through llama.cpp.
pub struct LocalModel {
    model: &'static LlamaModel,
    ctx: LlamaContext<'static>,
    n_ctx: u32,
    max_tokens: usize,
    temperature: f32,
}

impl LocalModel {
    pub fn load(config: &BackendConfig) -> Result<Self> {
        let backend: &'static LlamaBackend = Box::leak(Box::new(
            LlamaBackend::init().context("failed to init llama backend")?,
        ));

        info!("Loading model from: {}", config.model);
        info!(
            "  config: n_gpu_layers={}, n_ctx={}, max_tokens={}",
            config.n_gpu_layers, config.n_ctx, config.max_tokens
        );

        let model_params =
            pin!(LlamaModelParams::default().with_n_gpu_layers(config.n_gpu_layers));
        let model: &'static LlamaModel = Box::leak(Box::new(
            LlamaModel::load_from_file(backend, &config.model, &model_params)
                .context("failed to load model")?,
        ));

        info!("Model loaded successfully");

        let n_ctx = NonZeroU32::new(config.n_ctx).context("context size must be > 0")?;
        let ctx_params = LlamaContextParams::default().with_n_ctx(Some(n_ctx));
        let ctx = model
            .new_context(backend, ctx_params)
            .context("failed to create inference context")?;

        Ok(Self {
            model,
            ctx,
            n_ctx: config.n_ctx,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// Wrap one chat message in the model's own chat template.
    fn render(&self, message: &ChatMessage) -> Result<String> {
        let turn = LlamaChatMessage::new(message.role.clone(), message.content.clone())
            .context("failed to create chat message")?;
        let template = self
            .model
            .chat_template(None)
            .context("model has no chat template")?;
        let rendered = self
            .model
            .apply_chat_template(&template, &[turn], true)
            .context("failed to apply chat template")?;
        trace!("Rendered chat template:\n{rendered}");
        Ok(rendered)
    }

    /// Reset the context and decode the whole prompt in a single batch.
    fn prefill(&mut self, rendered: &str) -> Result<LlamaBatch> {
        let tokens = self
            .model
            .str_to_token(rendered, AddBos::Always)
            .context("tokenization failed")?;
        anyhow::ensure!(!tokens.is_empty(), "prompt produced no tokens");
        anyhow::ensure!(
            tokens.len() < self.n_ctx as usize,
            "prompt of {} tokens does not fit a {}-token context",
            tokens.len(),
            self.n_ctx
        );

        self.ctx.clear_kv_cache();
        let mut batch = LlamaBatch::new(self.n_ctx as usize, 1);
        let last = tokens.len() - 1;
        for (pos, tok) in tokens.iter().enumerate() {
            batch.add(*tok, pos as i32, &[0], pos == last)?;
        }
        self.ctx.decode(&mut batch).context("prompt decode failed")?;
        debug!("Prefilled {} prompt tokens", tokens.len());
        Ok(batch)
    }

    /// Sample one token at a time until end-of-generation, the token budget,
    /// or the end of the context window.
    fn complete(&mut self, mut batch: LlamaBatch) -> Result<String> {
        let mut sampler = build_sampler(self.temperature);
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut reply = String::new();
        let mut pos = batch.n_tokens();
        let budget = self.max_tokens.min(self.n_ctx as usize - pos as usize);

        for _ in 0..budget {
            let tok = sampler.sample(&self.ctx, batch.n_tokens() - 1);
            sampler.accept(tok);
            if self.model.is_eog_token(tok) {
                break;
            }

            reply.push_str(
                &self
                    .model
                    .token_to_piece(tok, &mut decoder, true, None)
                    .context("token_to_piece failed")?,
            );

            batch.clear();
            batch.add(tok, pos, &[0], true)?;
            self.ctx.decode(&mut batch).context("decode step failed")?;
            pos += 1;
        }

        Ok(reply)
    }
}

impl DecisionMaker for LocalModel {
    fn invoke(&mut self, prompt: &str) -> Result<String> {
        let rendered = self.render(&ChatMessage::user(prompt))?;
        let batch = self.prefill(&rendered)?;
        let reply = self.complete(batch)?;
        debug!("Local model reply ({} chars):\n{reply}", reply.len());
        Ok(reply)
    }
}
