use super::NormalizedUsage;
use crate::backends::ModelPrice;

const TOKENS_PER_PRICE_UNIT: f64 = 1_000_000.0;

/// Cost of a request given per-million-token prices. Unpriced models are
/// free.
pub fn calculate_cost(usage: &NormalizedUsage, price: Option<&ModelPrice>) -> f64 {
    let Some(price) = price else {
        return 0.0;
    };
    (usage.prompt_tokens as f64 / TOKENS_PER_PRICE_UNIT) * price.input_price
        + (usage.completion_tokens as f64 / TOKENS_PER_PRICE_UNIT) * price.output_price
}
