use crate::error::AppError;
use crate::pricing::PricingTable;
use serde::Serialize;
use std::sync::Arc;

const TOKENS_PER_MILLION: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_cost: f64,
    pub total_cost: f64,
}

/// A "what if" workload: a number of users each holding a number of chats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatScenario {
    pub model: String,
    pub users: u64,
    pub chats_per_user: u64,
    pub avg_input_tokens_per_chat: u64,
    pub avg_output_tokens_per_chat: u64,
    pub cache_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioEstimate {
    pub model: String,
    pub total_chats: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub cache_tokens: u64,
    pub cost: f64,
    pub cost_per_chat: f64,
    pub cost_per_user: f64,
}

#[derive(Debug, Clone)]
pub struct CostEstimator {
    pricing: Arc<PricingTable>,
}

impl CostEstimator {
    pub fn new(pricing: Arc<PricingTable>) -> Self {
        Self { pricing }
    }

    /// Cost in USD. Unrounded; presentation decides the precision.
    pub fn estimate(
        &self,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        cache_tokens: u64,
    ) -> Result<f64, AppError> {
        self.breakdown(model, input_tokens, output_tokens, cache_tokens)
            .map(|b| b.total_cost)
    }

    pub fn breakdown(
        &self,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        cache_tokens: u64,
    ) -> Result<CostBreakdown, AppError> {
        let rates = self.pricing.lookup(model)?;
        let input_cost = (input_tokens as f64 / TOKENS_PER_MILLION) * rates.input_per_million();
        let output_cost = (output_tokens as f64 / TOKENS_PER_MILLION) * rates.output_per_million();
        let cache_cost = (cache_tokens as f64 / TOKENS_PER_MILLION) * rates.cache_per_million();
        Ok(CostBreakdown {
            input_cost,
            output_cost,
            cache_cost,
            total_cost: input_cost + output_cost + cache_cost,
        })
    }

    pub fn estimate_scenario(
        &self,
        scenario: &ChatScenario,
    ) -> Result<ScenarioEstimate, AppError> {
        if scenario.users == 0 || scenario.chats_per_user == 0 {
            return Err(AppError::Config(
                "users and chats per user must both be at least 1".into(),
            ));
        }

        let overflow = || AppError::Config("token totals overflow a 64-bit counter".into());
        let total_chats = scenario
            .users
            .checked_mul(scenario.chats_per_user)
            .ok_or_else(overflow)?;
        let total_input_tokens = total_chats
            .checked_mul(scenario.avg_input_tokens_per_chat)
            .ok_or_else(overflow)?;
        let total_output_tokens = total_chats
            .checked_mul(scenario.avg_output_tokens_per_chat)
            .ok_or_else(overflow)?;

        let cost = self.estimate(
            &scenario.model,
            total_input_tokens,
            total_output_tokens,
            scenario.cache_tokens,
        )?;

        Ok(ScenarioEstimate {
            model: scenario.model.clone(),
            total_chats,
            total_input_tokens,
            total_output_tokens,
            cache_tokens: scenario.cache_tokens,
            cost,
            cost_per_chat: cost / total_chats as f64,
            cost_per_user: cost / scenario.users as f64,
        })
    }
}
