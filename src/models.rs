use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Access category of an article as seen in one observation snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Gold,
    Hybrid,
    ImmediateBronze,
    DelayedBronze,
    Green,
    Closed,
    /// Auxiliary green-like category for preprints later published elsewhere.
    Biorxiv,
}

impl Category {
    /// The six mutually exclusive categories every article falls into.
    pub const PRIMARY: [Category; 6] = [
        Category::Green,
        Category::Gold,
        Category::Hybrid,
        Category::ImmediateBronze,
        Category::DelayedBronze,
        Category::Closed,
    ];

    /// Categories subtracted from the published total to obtain closed counts.
    pub const OPEN: [Category; 5] = [
        Category::Gold,
        Category::Hybrid,
        Category::ImmediateBronze,
        Category::DelayedBronze,
        Category::Green,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Gold => "gold",
            Category::Hybrid => "hybrid",
            Category::ImmediateBronze => "immediate_bronze",
            Category::DelayedBronze => "delayed_bronze",
            Category::Green => "green",
            Category::Closed => "closed",
            Category::Biorxiv => "biorxiv",
        }
    }

    pub fn is_open(&self) -> bool {
        Category::OPEN.contains(self)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gold" => Ok(Category::Gold),
            "hybrid" => Ok(Category::Hybrid),
            "immediate_bronze" => Ok(Category::ImmediateBronze),
            "delayed_bronze" => Ok(Category::DelayedBronze),
            "green" => Ok(Category::Green),
            "closed" => Ok(Category::Closed),
            "biorxiv" => Ok(Category::Biorxiv),
            other => Err(format!("unknown category `{other}`")),
        }
    }
}

/// OA status as delivered by the bibliographic warehouse, before the bronze split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawOaStatus {
    Gold,
    Hybrid,
    Bronze,
    Green,
    Closed,
}

impl RawOaStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gold" => Some(RawOaStatus::Gold),
            "hybrid" => Some(RawOaStatus::Hybrid),
            "bronze" => Some(RawOaStatus::Bronze),
            "green" => Some(RawOaStatus::Green),
            "closed" => Some(RawOaStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArticleRecord {
    pub id: String,
    pub published_year: i32,
    pub oa_status: Option<String>,
    pub journal_id: Option<String>,
    pub embargo_months: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GreenDepositRecord {
    pub id: String,
    pub published_year: i32,
    pub first_availability_year: i32,
    pub months_old_at_first_deposit: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewLogRecord {
    pub article_age_months: i32,
    pub oa_status: String,
    pub delayed_or_immediate: Option<String>,
    pub view_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DelayedJournal {
    pub journal_id: String,
    pub embargo_months: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BiorxivCount {
    pub published_year: i32,
    pub article_count: i64,
}

/// Every input table one forecasting run consumes.
#[derive(Debug, Clone, Default)]
pub struct ForecastInputs {
    pub articles: Vec<ArticleRecord>,
    pub green_deposits: Vec<GreenDepositRecord>,
    pub view_logs: Vec<ViewLogRecord>,
    pub delayed_journals: Vec<DelayedJournal>,
    pub biorxiv: Vec<BiorxivCount>,
}

/// Article counts keyed by age in years, for one category and observation year.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailabilityCurve {
    buckets: BTreeMap<u32, u64>,
}

impl AvailabilityCurve {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, age_years: u32, count: u64) {
        *self.buckets.entry(age_years).or_insert(0) += count;
    }

    pub fn get(&self, age_years: u32) -> u64 {
        self.buckets.get(&age_years).copied().unwrap_or(0)
    }

    /// True when the age has a bucket, even a zeroed one.
    pub fn contains(&self, age_years: u32) -> bool {
        self.buckets.contains_key(&age_years)
    }

    pub fn total(&self) -> u64 {
        self.buckets.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.buckets.iter().map(|(age, count)| (*age, *count))
    }

    /// Shifts every bucket `years` older.
    pub fn aged(&self, years: u32) -> Self {
        self.buckets
            .iter()
            .map(|(age, count)| (age + years, *count))
            .collect()
    }

    pub fn truncate_after(&mut self, max_age: u32) {
        self.buckets.retain(|age, _| *age <= max_age);
    }

    /// Zeroes buckets holding fewer than `threshold` articles. The buckets stay present.
    pub fn floor_small_counts(&mut self, threshold: u64) {
        for count in self.buckets.values_mut() {
            if *count < threshold {
                *count = 0;
            }
        }
    }
}

impl FromIterator<(u32, u64)> for AvailabilityCurve {
    fn from_iter<T: IntoIterator<Item = (u32, u64)>>(iter: T) -> Self {
        let mut curve = AvailabilityCurve::new();
        for (age, count) in iter {
            curve.add(age, count);
        }
        curve
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesStatus {
    Observed,
    Projected,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityRow {
    pub category: Category,
    pub observation_year: i32,
    pub age_years: u32,
    pub article_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TotalRow {
    pub category: Category,
    pub year: i32,
    pub total_count: u64,
    pub status: SeriesStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewsPerArticleRow {
    pub category: Category,
    pub age_years: u32,
    pub views_per_article: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectedViewsRow {
    pub category: Category,
    pub observation_year: i32,
    pub estimated_views: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FitRow {
    pub category: Category,
    pub curve_family: String,
    pub origin_year: i32,
    pub a: f64,
    pub b: f64,
    pub d: Option<f64>,
    pub r_squared: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FittedPointRow {
    pub category: Category,
    pub year: i32,
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_names_round_trip_through_from_str() {
        for category in Category::PRIMARY {
            assert_eq!(category.as_str().parse::<Category>(), Ok(category));
        }
        assert!("platinum".parse::<Category>().is_err());
    }

    #[test]
    fn aged_curve_moves_every_bucket() {
        let curve: AvailabilityCurve = [(0, 10), (3, 4)].into_iter().collect();
        let aged = curve.aged(2);
        assert_eq!(aged.get(0), 0);
        assert_eq!(aged.get(2), 10);
        assert_eq!(aged.get(5), 4);
        assert_eq!(aged.total(), curve.total());
    }

    #[test]
    fn floor_keeps_buckets_but_zeroes_small_counts() {
        let mut curve: AvailabilityCurve = [(0, 24), (1, 25), (2, 300)].into_iter().collect();
        curve.floor_small_counts(25);
        assert_eq!(curve.len(), 3);
        assert_eq!(curve.get(0), 0);
        assert_eq!(curve.get(1), 25);
        assert_eq!(curve.total(), 325);
    }

    #[test]
    fn raw_status_parsing_is_case_insensitive() {
        assert_eq!(RawOaStatus::parse(" Bronze "), Some(RawOaStatus::Bronze));
        assert_eq!(RawOaStatus::parse("unknown"), None);
    }
}
