//! Model catalog: context windows, output caps and pricing.
//!
//! Config may name a model by id or by alias. Unknown ids still work; they
//! get a conservative custom spec.

use std::borrow::Cow;

/// Context window assumed for models missing from the catalog.
pub const CUSTOM_CONTEXT_WINDOW: usize = 32_768;
const CUSTOM_MAX_OUTPUT: usize = 4096;

/// Static description of a remote model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub id: Cow<'static, str>,
    pub name: Cow<'static, str>,
    pub provider: Cow<'static, str>,
    pub context_window: usize,
    pub max_output_tokens: usize,
    pub cost_per_1k_input: f64,
    pub cost_per_1k_output: f64,
}

const fn spec(
    id: &'static str,
    name: &'static str,
    provider: &'static str,
    context_window: usize,
    max_output_tokens: usize,
    cost_per_1k_input: f64,
    cost_per_1k_output: f64,
) -> ModelSpec {
    ModelSpec {
        id: Cow::Borrowed(id),
        name: Cow::Borrowed(name),
        provider: Cow::Borrowed(provider),
        context_window,
        max_output_tokens,
        cost_per_1k_input,
        cost_per_1k_output,
    }
}

static CATALOG: &[ModelSpec] = &[
    spec("gemini-2.0-flash", "Gemini 2.0 Flash", "gemini", 1_048_576, 8192, 0.0001, 0.0004),
    spec("gemini-2.0-flash-lite", "Gemini 2.0 Flash-Lite", "gemini", 1_048_576, 8192, 0.000075, 0.0003),
    spec("gemini-2.5-flash", "Gemini 2.5 Flash", "gemini", 1_048_576, 65_536, 0.0003, 0.0025),
    spec("gemini-2.5-pro", "Gemini 2.5 Pro", "gemini", 1_048_576, 65_536, 0.00125, 0.01),
    spec("gpt-4o", "GPT-4o", "openai", 128_000, 16_384, 0.0025, 0.01),
    spec("gpt-4o-mini", "GPT-4o mini", "openai", 128_000, 16_384, 0.00015, 0.0006),
    spec("gpt-4.1", "GPT-4.1", "openai", 1_047_576, 32_768, 0.002, 0.008),
    spec("gpt-4.1-mini", "GPT-4.1 mini", "openai", 1_047_576, 32_768, 0.0004, 0.0016),
];

static ALIASES: &[(&str, &str)] = &[
    ("gemini", "gemini-2.0-flash"),
    ("flash", "gemini-2.0-flash"),
    ("flash-lite", "gemini-2.0-flash-lite"),
    ("gemini-pro", "gemini-2.5-pro"),
    ("gpt", "gpt-4o"),
    ("gpt-mini", "gpt-4o-mini"),
    ("gpt-4", "gpt-4.1"),
];

/// Every catalogued model.
pub fn all() -> &'static [ModelSpec] {
    CATALOG
}

/// Aliases as `(alias, model id)` pairs.
pub fn aliases() -> &'static [(&'static str, &'static str)] {
    ALIASES
}

/// Map an alias to its model id; other names pass through unchanged.
pub fn resolve(name: &str) -> &str {
    let name = name.trim();
    ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
        .map(|(_, id)| *id)
        .unwrap_or(name)
}

/// Find a catalogued model by id or alias.
pub fn lookup(name: &str) -> Option<&'static ModelSpec> {
    let id = resolve(name);
    CATALOG.iter().find(|m| m.id.eq_ignore_ascii_case(id))
}

/// Catalogued models served by one provider.
pub fn by_provider(provider: &str) -> Vec<&'static ModelSpec> {
    CATALOG.iter().filter(|m| m.provider == provider).collect()
}

/// Catalog entry for `name`, or a custom spec when the model is unknown.
pub fn resolve_or_custom(name: &str, provider: &str) -> ModelSpec {
    match lookup(name) {
        Some(spec) => spec.clone(),
        None => ModelSpec {
            id: Cow::Owned(resolve(name).to_string()),
            name: Cow::Owned(format!("{} (custom)", name.trim())),
            provider: Cow::Owned(provider.to_string()),
            context_window: CUSTOM_CONTEXT_WINDOW,
            max_output_tokens: CUSTOM_MAX_OUTPUT,
            cost_per_1k_input: 0.0,
            cost_per_1k_output: 0.0,
        },
    }
}

/// Estimated cost in USD of a call.
pub fn estimate_cost(spec: &ModelSpec, input_tokens: usize, output_tokens: usize) -> f64 {
    (input_tokens as f64 / 1000.0) * spec.cost_per_1k_input
        + (output_tokens as f64 / 1000.0) * spec.cost_per_1k_output
}
