use std::collections::BTreeMap;

use crate::availability::AvailabilityIndex;
use crate::error::ForecastError;
use crate::extrapolator::GrowthFit;
use crate::models::{AvailabilityCurve, Category, SeriesStatus};

/// Rolls the base-year curve forward one year at a time. Each year every bucket ages
/// by one and the base year's newly-available slice is added again, scaled by the
/// growth fit's ratio to the base year.
pub fn project_forward(
    base: &AvailabilityCurve,
    delta_seed: &AvailabilityCurve,
    fit: &GrowthFit,
    base_year: i32,
    last_year: i32,
) -> Result<BTreeMap<i32, AvailabilityCurve>, ForecastError> {
    let mut projected = BTreeMap::new();
    let mut current = base.clone();

    for year in base_year + 1..=last_year {
        let scale = fit.scaling_factor(year, base_year)?;
        let mut next = current.aged(1);
        for (age, count) in delta_seed.iter() {
            next.add(age, (scale * count as f64) as u64);
        }
        projected.insert(year, next.clone());
        current = next;
    }

    Ok(projected)
}

/// Closed curves past the base year, by the same subtraction as the historical ones.
///
/// Published totals beyond the base year are unknown, so they are rebuilt as the
/// base year's closed-at-publication slice scaled by the closed fit plus every open
/// category's projected age-0 bucket. Returns an empty map when an open category with
/// data has no projection.
pub fn project_closed(
    index: &AvailabilityIndex,
    open_projections: &BTreeMap<Category, BTreeMap<i32, AvailabilityCurve>>,
    closed_fit: &GrowthFit,
    base_year: i32,
    last_year: i32,
) -> Result<BTreeMap<i32, AvailabilityCurve>, ForecastError> {
    let closed_seed = index.newly_available(Category::Closed, base_year).get(0);
    // Categories without any input contribute nothing; a missing projection for one
    // that has data means its fit failed, and then closed cannot be derived.
    let open_curves_for = |year: i32| -> Option<Vec<AvailabilityCurve>> {
        Category::OPEN
            .iter()
            .map(|category| {
                if !index.has_data(*category) {
                    return Some(AvailabilityCurve::new());
                }
                open_projections
                    .get(category)
                    .and_then(|curves| curves.get(&year))
                    .cloned()
            })
            .collect()
    };

    let mut projected_totals = BTreeMap::new();
    for year in base_year + 1..=last_year {
        let Some(open) = open_curves_for(year) else {
            return Ok(BTreeMap::new());
        };
        let scale = closed_fit.scaling_factor(year, base_year)?;
        let closed_new = (scale * closed_seed as f64) as u64;
        let open_new: u64 = open.iter().map(|curve| curve.get(0)).sum();
        projected_totals.insert(year, closed_new + open_new);
    }

    let total_for = |published_year: i32| {
        if published_year <= base_year {
            index.total_published(published_year)
        } else {
            projected_totals.get(&published_year).copied().unwrap_or(0)
        }
    };

    let mut projected = BTreeMap::new();
    for year in base_year + 1..=last_year {
        let Some(open) = open_curves_for(year) else {
            break;
        };
        projected.insert(year, index.closed_from_open(year, &open, &total_for));
    }
    Ok(projected)
}

/// Availability for any year: observed curves up to the base year, projected after.
pub struct AvailabilityTimeline<'a> {
    index: &'a AvailabilityIndex,
    base_year: i32,
    projected: BTreeMap<Category, BTreeMap<i32, AvailabilityCurve>>,
}

impl<'a> AvailabilityTimeline<'a> {
    pub fn new(
        index: &'a AvailabilityIndex,
        base_year: i32,
        projected: BTreeMap<Category, BTreeMap<i32, AvailabilityCurve>>,
    ) -> Self {
        Self {
            index,
            base_year,
            projected,
        }
    }

    pub fn status(&self, year: i32) -> SeriesStatus {
        if year <= self.base_year {
            SeriesStatus::Observed
        } else {
            SeriesStatus::Projected
        }
    }

    /// `None` when the year lies past the base year and the category has no projection.
    pub fn curve(&self, category: Category, year: i32) -> Option<AvailabilityCurve> {
        match self.status(year) {
            SeriesStatus::Observed => Some(self.index.cumulative(category, year)),
            SeriesStatus::Projected => self
                .projected
                .get(&category)
                .and_then(|curves| curves.get(&year))
                .cloned(),
        }
    }

    pub fn is_projected(&self, category: Category) -> bool {
        self.projected.contains_key(&category)
    }
}
