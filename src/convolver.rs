use crate::error::ForecastError;
use crate::models::{AvailabilityCurve, Category};
use crate::views::ViewsProfile;

/// Discrete convolution trimmed to the length of the longer input, centred on the full result.
pub fn convolve_same(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let full_len = a.len() + b.len() - 1;
    let mut full = vec![0.0; full_len];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            full[i + j] += x * y;
        }
    }
    let out_len = a.len().max(b.len());
    let start = (full_len - out_len) / 2;
    full[start..start + out_len].to_vec()
}

/// Estimated views for one category in one observation year.
///
/// The availability curve and the views profile are joined on age; ages present on
/// only one side are dropped. The estimate is the peak of the same-mode convolution.
pub fn estimate_views(
    category: Category,
    year: i32,
    availability: &AvailabilityCurve,
    profile: &ViewsProfile,
) -> Result<f64, ForecastError> {
    let (rates, counts): (Vec<f64>, Vec<f64>) = profile
        .iter()
        .filter(|(age, _)| availability.contains(*age))
        .map(|(age, rate)| (rate, availability.get(age) as f64))
        .unzip();

    convolve_same(&rates, &counts)
        .into_iter()
        .reduce(f64::max)
        .ok_or(ForecastError::ConvolutionAlignment { category, year })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn curve(buckets: &[(u32, u64)]) -> AvailabilityCurve {
        buckets.iter().copied().collect()
    }

    #[test]
    fn same_mode_keeps_longer_length_centred() {
        assert_eq!(convolve_same(&[1.0, 2.0, 3.0], &[0.0, 1.0, 0.5]), vec![1.0, 2.5, 4.0]);
        assert_eq!(convolve_same(&[1.0, 1.0, 1.0, 1.0], &[2.0]), vec![2.0; 4]);
        assert_eq!(convolve_same(&[1.0, 2.0], &[1.0, 1.0]), vec![1.0, 3.0]);
        assert!(convolve_same(&[], &[1.0]).is_empty());
    }

    #[test]
    fn mixed_gold_and_closed_cohort_views() {
        let gold = estimate_views(
            Category::Gold,
            2015,
            &curve(&[(0, 1_000)]),
            &ViewsProfile::constant(Category::Gold, 5.0, 15),
        )
        .unwrap();
        let closed = estimate_views(
            Category::Closed,
            2015,
            &curve(&[(0, 1_000_000)]),
            &ViewsProfile::constant(Category::Closed, 1.0, 15),
        )
        .unwrap();
        assert_eq!(gold + closed, 1_005_000.0);
    }

    #[test]
    fn no_shared_ages_is_an_alignment_error() {
        let profile = ViewsProfile::new(Category::Green, [(3, 2.0)].into_iter().collect());
        let err = estimate_views(Category::Green, 2020, &curve(&[(0, 10), (1, 4)]), &profile)
            .unwrap_err();
        assert!(matches!(
            err,
            ForecastError::ConvolutionAlignment {
                category: Category::Green,
                year: 2020
            }
        ));
    }

    #[test]
    fn ages_missing_from_profile_are_dropped() {
        let profile = ViewsProfile::new(Category::Hybrid, [(0, 2.0), (1, 2.0)].into_iter().collect());
        let views = estimate_views(Category::Hybrid, 2019, &curve(&[(0, 10), (1, 5), (7, 1_000)]), &profile)
            .unwrap();
        assert_eq!(views, 30.0);
    }

    proptest! {
        #[test]
        fn constant_profile_scales_total_availability(
            counts in proptest::collection::vec(0u64..10_000, 1..16),
            rate in 0.0f64..50.0,
        ) {
            let availability: AvailabilityCurve = counts
                .iter()
                .enumerate()
                .map(|(age, count)| (age as u32, *count))
                .collect();
            let profile = ViewsProfile::constant(Category::Green, rate, 15);
            let views = estimate_views(Category::Green, 2030, &availability, &profile).unwrap();
            let expected = rate * availability.total() as f64;
            prop_assert!((views - expected).abs() <= 1e-6 * expected.max(1.0));
        }
    }
}
