//! Age-indexed availability curves.
//!
//! For a category and an observation year, a curve maps `observation_year - published_year`
//! to the number of articles of that publication year readable under the category at
//! that point in time. Each category has its own rule for when an article becomes
//! readable, expressed as an [`AvailabilityStrategy`].

use std::collections::BTreeMap;

use crate::classifier::ClassifiedArticles;
use crate::config::ForecastConfig;
use crate::models::{AvailabilityCurve, BiorxivCount, Category, GreenDepositRecord};

#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub floor_year: i32,
    pub small_count_floor: u64,
    pub delta_max_age: u32,
    pub green_min_months: i32,
    pub green_max_months: i32,
}

impl From<&ForecastConfig> for IndexSettings {
    fn from(config: &ForecastConfig) -> Self {
        Self {
            floor_year: config.floor_year,
            small_count_floor: config.small_count_floor,
            delta_max_age: config.delta_max_age,
            green_min_months: config.green.min_months,
            green_max_months: config.green.max_months,
        }
    }
}

/// How one category decides which articles are available in a given year.
pub trait AvailabilityStrategy: Send + Sync {
    /// Everything available as of `observation_year`, bucketed by publication age.
    fn cumulative(&self, index: &AvailabilityIndex, observation_year: i32) -> AvailabilityCurve;

    /// Articles that became available during `observation_year`: the cumulative curve
    /// minus the previous year's curve aged by one year, with small buckets zeroed and
    /// old ages dropped.
    fn newly_available(&self, index: &AvailabilityIndex, observation_year: i32) -> AvailabilityCurve {
        let current = self.cumulative(index, observation_year);
        let previous = self.cumulative(index, observation_year - 1).aged(1);

        let mut delta: AvailabilityCurve = current
            .iter()
            .map(|(age, count)| (age, count.saturating_sub(previous.get(age))))
            .collect();
        delta.floor_small_counts(index.settings.small_count_floor);
        delta.truncate_after(index.settings.delta_max_age);
        delta
    }
}

/// Gold, hybrid, immediate bronze and biorxiv: readable from the day of publication.
pub struct ImmediateStrategy {
    pub category: Category,
}

/// Readable from the year of the first repository deposit.
pub struct GreenStrategy;

/// Readable once the journal's embargo has elapsed.
pub struct DelayedBronzeStrategy;

/// Whatever was published and is not readable under any open category.
pub struct ClosedStrategy;

impl AvailabilityStrategy for ImmediateStrategy {
    fn cumulative(&self, index: &AvailabilityIndex, observation_year: i32) -> AvailabilityCurve {
        index
            .published_series(self.category)
            .into_iter()
            .filter(|(year, _)| *year <= observation_year)
            .map(|(year, count)| ((observation_year - year) as u32, count))
            .collect()
    }
}

impl AvailabilityStrategy for GreenStrategy {
    fn cumulative(&self, index: &AvailabilityIndex, observation_year: i32) -> AvailabilityCurve {
        index
            .green_deposits
            .iter()
            .filter(|((deposit_year, published_year), _)| {
                *deposit_year <= observation_year && *published_year <= observation_year
            })
            .map(|((_, published_year), count)| ((observation_year - published_year) as u32, *count))
            .collect()
    }
}

impl AvailabilityStrategy for DelayedBronzeStrategy {
    fn cumulative(&self, index: &AvailabilityIndex, observation_year: i32) -> AvailabilityCurve {
        index
            .articles
            .delayed_cohorts()
            .filter(|((published_year, embargo_months), _)| {
                embargo_elapsed(*published_year, *embargo_months, observation_year)
            })
            .map(|((published_year, _), count)| ((observation_year - published_year) as u32, count))
            .collect()
    }
}

impl AvailabilityStrategy for ClosedStrategy {
    fn cumulative(&self, index: &AvailabilityIndex, observation_year: i32) -> AvailabilityCurve {
        let open = index.open_curves(observation_year);
        index.closed_from_open(observation_year, &open, |year| index.total_published(year))
    }

    /// Only articles published this year can newly enter the closed pool.
    fn newly_available(&self, index: &AvailabilityIndex, observation_year: i32) -> AvailabilityCurve {
        let total = index.total_published(observation_year);
        if total == 0 {
            return AvailabilityCurve::new();
        }
        let open = index.open_curves(observation_year);
        let open_at_publication: u64 = open.iter().map(|curve| curve.get(0)).sum();

        let mut curve = AvailabilityCurve::new();
        curve.add(0, total.saturating_sub(open_at_publication));
        curve.floor_small_counts(index.settings.small_count_floor);
        curve
    }
}

/// An embargo of `m` months on an article published in year `P` is treated as elapsed
/// from year `P + m / 12` onwards, publication dates counting from January 1st.
pub fn embargo_elapsed(published_year: i32, embargo_months: i32, observation_year: i32) -> bool {
    observation_year >= published_year
        && i64::from(observation_year - published_year) * 12 >= i64::from(embargo_months)
}

pub fn strategy_for(category: Category) -> Box<dyn AvailabilityStrategy> {
    match category {
        Category::Gold | Category::Hybrid | Category::ImmediateBronze | Category::Biorxiv => {
            Box::new(ImmediateStrategy { category })
        }
        Category::Green => Box::new(GreenStrategy),
        Category::DelayedBronze => Box::new(DelayedBronzeStrategy),
        Category::Closed => Box::new(ClosedStrategy),
    }
}

/// Aggregated inputs plus the rules for reading availability out of them.
#[derive(Debug, Clone)]
pub struct AvailabilityIndex {
    articles: ClassifiedArticles,
    /// Deposit counts keyed by `(first_availability_year, published_year)`, already
    /// restricted to the plausible deposit window.
    green_deposits: BTreeMap<(i32, i32), u64>,
    biorxiv: BTreeMap<i32, u64>,
    settings: IndexSettings,
}

impl AvailabilityIndex {
    pub fn new(
        articles: ClassifiedArticles,
        deposits: &[GreenDepositRecord],
        biorxiv: &[BiorxivCount],
        settings: IndexSettings,
    ) -> Self {
        let mut green_deposits = BTreeMap::new();
        for deposit in deposits {
            let months = deposit.months_old_at_first_deposit;
            if months < settings.green_min_months || months > settings.green_max_months {
                continue;
            }
            *green_deposits
                .entry((deposit.first_availability_year, deposit.published_year))
                .or_insert(0) += 1;
        }

        let mut biorxiv_counts = BTreeMap::new();
        for row in biorxiv {
            *biorxiv_counts.entry(row.published_year).or_insert(0) += row.article_count.max(0) as u64;
        }

        Self {
            articles,
            green_deposits,
            biorxiv: biorxiv_counts,
            settings,
        }
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub fn cumulative(&self, category: Category, observation_year: i32) -> AvailabilityCurve {
        strategy_for(category).cumulative(self, observation_year)
    }

    pub fn newly_available(&self, category: Category, observation_year: i32) -> AvailabilityCurve {
        strategy_for(category).newly_available(self, observation_year)
    }

    pub fn total_published(&self, published_year: i32) -> u64 {
        self.articles.total_published(published_year)
    }

    pub fn published_count(&self, category: Category, published_year: i32) -> u64 {
        match category {
            Category::Biorxiv => self.biorxiv.get(&published_year).copied().unwrap_or(0),
            _ => self.articles.published_count(category, published_year),
        }
    }

    /// Whether any input row can feed this category at all.
    pub fn has_data(&self, category: Category) -> bool {
        match category {
            Category::Biorxiv => !self.biorxiv.is_empty(),
            Category::Green => !self.green_deposits.is_empty(),
            Category::DelayedBronze => self.articles.delayed_cohorts().next().is_some(),
            Category::Closed => !self.articles.is_empty(),
            _ => self.articles.published_by_year(category).next().is_some(),
        }
    }

    pub fn open_curves(&self, observation_year: i32) -> Vec<AvailabilityCurve> {
        Category::OPEN
            .iter()
            .map(|category| self.cumulative(*category, observation_year))
            .collect()
    }

    /// Articles published in `published_year` that are not open as of `observation_year`,
    /// before small counts are floored.
    pub fn closed_count(&self, observation_year: i32, published_year: i32) -> u64 {
        if published_year > observation_year {
            return 0;
        }
        let age = (observation_year - published_year) as u32;
        let open: u64 = Category::OPEN
            .iter()
            .map(|category| self.cumulative(*category, observation_year).get(age))
            .sum();
        self.total_published(published_year).saturating_sub(open)
    }

    /// Closed curve by subtraction: for every publication year from the observation year
    /// back to the floor year, the published total minus the open counts at that age.
    /// `total_for` supplies the published total so projected totals can be used too.
    pub fn closed_from_open(
        &self,
        observation_year: i32,
        open: &[AvailabilityCurve],
        total_for: impl Fn(i32) -> u64,
    ) -> AvailabilityCurve {
        let floor_year = self.settings.floor_year;
        if observation_year < floor_year {
            return AvailabilityCurve::new();
        }

        let span = (observation_year - floor_year) as usize + 1;
        let mut arena: Vec<Option<u64>> = vec![None; span];
        for (age, slot) in arena.iter_mut().enumerate() {
            let published_year = observation_year - age as i32;
            let total = total_for(published_year);
            if total == 0 {
                continue;
            }
            let open_at_age: u64 = open.iter().map(|curve| curve.get(age as u32)).sum();
            let closed = total.saturating_sub(open_at_age);
            *slot = Some(if closed < self.settings.small_count_floor {
                0
            } else {
                closed
            });
        }

        arena
            .into_iter()
            .enumerate()
            .filter_map(|(age, closed)| closed.map(|count| (age as u32, count)))
            .collect()
    }

    fn published_series(&self, category: Category) -> Vec<(i32, u64)> {
        match category {
            Category::Biorxiv => self.biorxiv.iter().map(|(year, count)| (*year, *count)).collect(),
            _ => self.articles.published_by_year(category).collect(),
        }
    }
}
