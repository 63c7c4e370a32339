//! Conditional edges between stages.
//!
//! Every edge checks for a fatal error first so a halted run never reaches
//! another provider call.

use super::state::{PipelineState, Stage};
use super::WorkflowConfig;
use crate::types::{Classification, QueryCategory};

/// Strategy stage for a category.
pub fn strategy_for(category: QueryCategory) -> Stage {
    match category {
        QueryCategory::Factual | QueryCategory::Analytical => Stage::Reason,
        QueryCategory::Counterfactual => Stage::Simulate,
        QueryCategory::Temporal => Stage::TemporalAnalyze,
    }
}

fn classification(state: &PipelineState) -> Classification {
    state
        .classification
        .clone()
        .unwrap_or_else(Classification::rule_based_default)
}

pub fn after_classify(state: &PipelineState, config: &WorkflowConfig) -> Stage {
    if state.is_halted() {
        return Stage::Done;
    }
    let classification = classification(state);
    if !classification.needs_retrieval {
        return strategy_for(classification.category);
    }
    if config.expand_queries {
        Stage::Expand
    } else {
        Stage::Retrieve
    }
}

pub fn after_expand(state: &PipelineState) -> Stage {
    if state.is_halted() {
        Stage::Done
    } else {
        Stage::Retrieve
    }
}

/// With no fragments the run either falls back to general knowledge or ends
/// with no response, which the engine turns into an insufficient-information reply.
pub fn after_retrieve(state: &PipelineState) -> Stage {
    if state.is_halted() {
        return Stage::Done;
    }
    let classification = classification(state);
    if state.fragments.is_empty() {
        return if classification.use_fallback_knowledge {
            Stage::FallbackKnowledge
        } else {
            Stage::Done
        };
    }
    strategy_for(classification.category)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, PipelineError};
    use crate::types::{Fragment, Query};

    fn state_with(classification: Classification) -> PipelineState {
        let mut state = PipelineState::new(Query::new("q", "s"));
        state.classification = Some(classification);
        state
    }

    #[test]
    fn test_category_routes() {
        assert_eq!(strategy_for(QueryCategory::Factual), Stage::Reason);
        assert_eq!(strategy_for(QueryCategory::Analytical), Stage::Reason);
        assert_eq!(strategy_for(QueryCategory::Counterfactual), Stage::Simulate);
        assert_eq!(strategy_for(QueryCategory::Temporal), Stage::TemporalAnalyze);
    }

    #[test]
    fn test_fatal_error_ends_every_edge() {
        let mut state = state_with(Classification::rule_based_default());
        state.fragments.push(Fragment::new("f", "d", "c", 0.9));
        state.halt(PipelineError::new(ErrorKind::ProviderQuotaExceeded, "429"));

        assert_eq!(after_classify(&state, &WorkflowConfig::default()), Stage::Done);
        assert_eq!(after_expand(&state), Stage::Done);
        assert_eq!(after_retrieve(&state), Stage::Done);
    }

    #[test]
    fn test_expand_continues_to_retrieve() {
        let state = state_with(Classification::rule_based_default());
        assert_eq!(after_expand(&state), Stage::Retrieve);
    }

    #[test]
    fn test_no_retrieval_goes_straight_to_strategy() {
        let state = state_with(
            Classification::new(QueryCategory::Counterfactual, 0.8, "r").with_retrieval(false),
        );
        assert_eq!(
            after_classify(&state, &WorkflowConfig::default()),
            Stage::Simulate
        );
    }

    #[test]
    fn test_expansion_can_be_disabled() {
        let state = state_with(Classification::rule_based_default());
        let config = WorkflowConfig {
            expand_queries: false,
            ..WorkflowConfig::default()
        };
        assert_eq!(after_classify(&state, &config), Stage::Retrieve);
    }

    #[test]
    fn test_empty_retrieval_routes() {
        let fallback = state_with(Classification::rule_based_default());
        assert_eq!(after_retrieve(&fallback), Stage::FallbackKnowledge);

        let strict = state_with(Classification::rule_based_default().with_fallback_knowledge(false));
        assert_eq!(after_retrieve(&strict), Stage::Done);
    }

    #[test]
    fn test_fragments_route_by_category() {
        let mut state =
            state_with(Classification::new(QueryCategory::Temporal, 0.9, "timeline"));
        state.fragments.push(Fragment::new("f", "d", "c", 0.9));
        assert_eq!(after_retrieve(&state), Stage::TemporalAnalyze);
    }
}
