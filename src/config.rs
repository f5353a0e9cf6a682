//! Configuration helpers: provider selection by target name and environment lookup.

use crate::backend::ProviderBackend;
use crate::http::HttpTransport;
use crate::openai::OpenAiProvider;
use crate::{Error, Result};
use std::env;

/// Environment variable overriding every provider's base URL.
pub const BASE_URL_ENV: &str = "LLM_CONDUIT_BASE_URL";

/// Hosted model families recognized from a target name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
    Xai,
}

impl ProviderKind {
    /// Picks the provider from the target's prefix.
    ///
    /// `gpt*` and `o1*` are OpenAI, `grok*` is xAI, `claude*` is Anthropic and
    /// `gemini*` is Google.
    pub fn from_target(target: &str) -> Result<Self> {
        if target.starts_with("gpt") || target.starts_with("o1") {
            Ok(ProviderKind::OpenAi)
        } else if target.starts_with("grok") {
            Ok(ProviderKind::Xai)
        } else if target.starts_with("claude") {
            Ok(ProviderKind::Anthropic)
        } else if target.starts_with("gemini") {
            Ok(ProviderKind::Google)
        } else {
            Err(Error::config(format!("Unknown model provider for {}", target)))
        }
    }

    pub fn default_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com/v1",
            ProviderKind::Google => "https://generativelanguage.googleapis.com/v1beta",
            ProviderKind::Xai => "https://api.x.ai/v1",
        }
    }

    /// Name of the environment variable holding this provider's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Google => "GEMINI_API_KEY",
            ProviderKind::Xai => "XAI_API_KEY",
        }
    }

    /// Whether the provider speaks the chat-completions wire format.
    pub fn is_openai_compatible(&self) -> bool {
        matches!(self, ProviderKind::OpenAi | ProviderKind::Xai)
    }

    pub fn api_key(&self) -> Option<String> {
        env::var(self.api_key_env()).ok().filter(|k| !k.is_empty())
    }

    /// Base URL from [`BASE_URL_ENV`], falling back to the provider default.
    pub fn base_url(&self) -> String {
        resolve_base_url(*self, env::var(BASE_URL_ENV).ok())
    }
}

fn resolve_base_url(kind: ProviderKind, override_url: Option<String>) -> String {
    override_url
        .filter(|url| !url.is_empty())
        .unwrap_or_else(|| kind.default_url().to_string())
}

/// Builds an HTTP backend for a target whose provider speaks chat-completions.
///
/// The API key and base URL come from the environment. Anthropic and Google need a
/// caller-supplied [`Provider`](crate::Provider) and are rejected here.
///
/// # Examples
///
/// ```rust,no_run
/// use llm_conduit::{Pipeline, config::backend_for};
///
/// # fn example() -> llm_conduit::Result<()> {
/// let pipeline = Pipeline::builder().backend(backend_for("gpt-4o")?).build()?;
/// # Ok(())
/// # }
/// ```
pub fn backend_for(target: &str) -> Result<ProviderBackend<OpenAiProvider, HttpTransport>> {
    let kind = ProviderKind::from_target(target)?;
    if !kind.is_openai_compatible() {
        return Err(Error::config(format!(
            "no built-in adapter for {:?}; supply a Provider for {}",
            kind, target
        )));
    }

    let transport = HttpTransport::new(kind.api_key())?;
    Ok(ProviderBackend::new(OpenAiProvider::new(kind.base_url()), transport))
}
