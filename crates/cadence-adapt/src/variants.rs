//! Weighted A/B variant selection.
//!
//! A draw happens only when a step has at least one active variant with a
//! positive weight sum. Variants arrive sorted by id (the store guarantees
//! it), which makes cumulative-weight walking deterministic: equal weights
//! break ties in stable id order.

use rand::Rng;

use cadence_store::types::StepVariant;

/// Pick one variant by normalized weight, or `None` when A/B selection
/// does not apply to this step.
pub fn select_variant<'a, R: Rng>(variants: &'a [StepVariant], rng: &mut R) -> Option<&'a StepVariant> {
    let total: f64 = variants.iter().map(|v| v.weight.max(0.0)).sum();
    if variants.is_empty() || total <= 0.0 {
        return None;
    }

    let draw: f64 = rng.gen_range(0.0..total);
    let mut cumulative = 0.0;
    for variant in variants {
        cumulative += variant.weight.max(0.0);
        if draw < cumulative {
            return Some(variant);
        }
    }
    // Floating-point edge: the draw landed on the total. Last wins.
    variants.last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::types::StepContent;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn variant(id: &str, weight: f64) -> StepVariant {
        StepVariant {
            id: id.into(),
            step_id: "st1".into(),
            label: id.into(),
            content: StepContent::Sms {
                body: format!("variant {id}"),
            },
            weight,
            active: true,
            sent_count: 0,
            reply_count: 0,
            conversion_count: 0,
        }
    }

    #[test]
    fn no_variants_no_draw() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(select_variant(&[], &mut rng).is_none());
    }

    #[test]
    fn zero_weight_sum_disables_selection() {
        let variants = vec![variant("a", 0.0), variant("b", 0.0)];
        let mut rng = StdRng::seed_from_u64(7);
        assert!(select_variant(&variants, &mut rng).is_none());
    }

    #[test]
    fn single_variant_always_wins() {
        let variants = vec![variant("a", 1.0)];
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            assert_eq!(select_variant(&variants, &mut rng).unwrap().id, "a");
        }
    }

    #[test]
    fn selection_frequency_tracks_weights() {
        // 70/30 split over 10k draws; allow ±3 percentage points.
        let variants = vec![variant("a", 0.7), variant("b", 0.3)];
        let mut rng = StdRng::seed_from_u64(42);
        let mut a_hits = 0usize;
        const N: usize = 10_000;
        for _ in 0..N {
            if select_variant(&variants, &mut rng).unwrap().id == "a" {
                a_hits += 1;
            }
        }
        let share = a_hits as f64 / N as f64;
        assert!(
            (share - 0.7).abs() < 0.03,
            "expected ≈0.7 share for variant a, got {share}"
        );
    }

    #[test]
    fn weights_need_not_sum_to_one() {
        // Raw counts as weights normalize the same way.
        let variants = vec![variant("a", 14.0), variant("b", 6.0)];
        let mut rng = StdRng::seed_from_u64(9);
        let mut a_hits = 0usize;
        const N: usize = 10_000;
        for _ in 0..N {
            if select_variant(&variants, &mut rng).unwrap().id == "a" {
                a_hits += 1;
            }
        }
        let share = a_hits as f64 / N as f64;
        assert!((share - 0.7).abs() < 0.03);
    }

    #[test]
    fn negative_weights_are_treated_as_zero() {
        let variants = vec![variant("a", -1.0), variant("b", 1.0)];
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            assert_eq!(select_variant(&variants, &mut rng).unwrap().id, "b");
        }
    }
}
