//! Centralized system prompts for the Langbase pipes the pipeline calls.
//!
//! The classifier and expander prompts define JSON contracts parsed in
//! `providers`; the reasoning prompts only shape free-text answers.

/// System prompt for the query classifier pipe.
pub const CLASSIFIER_PROMPT: &str = r#"You classify user questions about a private document collection.

Your response MUST be valid JSON in this exact format:
{
  "category": "factual",
  "confidence": 0.8,
  "rationale": "why this category fits",
  "needs_retrieval": true,
  "use_fallback_knowledge": true
}

Categories:
- factual: direct questions answered by document content
- counterfactual: "what if" or hypothetical questions
- temporal: questions about order, timelines or change over time
- analytical: comparisons or multi-part analysis

Set needs_retrieval to false only for greetings or messages that do not ask about the documents.
Set use_fallback_knowledge to false when an answer must come from the documents alone.
confidence must be between 0.0 and 1.0.

Always respond with valid JSON only, no other text."#;

/// System prompt for the query expansion pipe.
pub const EXPANDER_PROMPT: &str = r#"You rewrite a search query into alternative phrasings that retrieve different relevant passages.

Your response MUST be valid JSON in this exact format:
{
  "variants": ["first rephrasing", "second rephrasing", "third rephrasing"]
}

Guidelines:
- Produce up to 3 variants
- Use synonyms and related terms the original does not contain
- Keep each variant a standalone search query
- Never answer the question

Always respond with valid JSON only, no other text."#;

/// System prompt for answering from retrieved fragments.
pub const FACTUAL_REASONING_PROMPT: &str = r#"You answer questions using only the numbered source passages provided.
Cite passages as [1], [2] and so on. If the passages do not contain the answer, say so plainly."#;

/// System prompt for hypothetical questions grounded in retrieved fragments.
pub const COUNTERFACTUAL_PROMPT: &str = r#"You reason about hypothetical scenarios.
Start from the facts in the numbered source passages, state which assumption changes, then walk through the likely consequences step by step. Cite passages as [1], [2] and so on."#;

/// System prompt for timeline and change-over-time questions.
pub const TEMPORAL_ANALYSIS_PROMPT: &str = r#"You analyze how things change over time.
Order the relevant events from the numbered source passages chronologically, note what changed between them, and cite passages as [1], [2] and so on."#;

/// System prompt when nothing relevant was retrieved.
pub const FALLBACK_KNOWLEDGE_PROMPT: &str = r#"No relevant passages were found in the user's documents.
Answer from general knowledge, say clearly that the answer does not come from their documents, and keep it brief."#;
