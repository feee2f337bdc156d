/// Rough per-token USD pricing used to stamp `estimated_cost` on run and
/// call records. Not tied to any provider's live price list — an
/// order-of-magnitude flat-rate estimate rather than a per-model lookup
/// table.
const INPUT_RATE_PER_TOKEN: f64 = 3.0 / 1_000_000.0;
const OUTPUT_RATE_PER_TOKEN: f64 = 15.0 / 1_000_000.0;

pub fn estimate_cost(tokens_in: u64, tokens_out: u64) -> f64 {
    tokens_in as f64 * INPUT_RATE_PER_TOKEN + tokens_out as f64 * OUTPUT_RATE_PER_TOKEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_scales_with_tokens() {
        let cost = estimate_cost(1000, 500);
        assert!(cost > 0.0);
        assert!(estimate_cost(2000, 1000) > cost);
    }
}
