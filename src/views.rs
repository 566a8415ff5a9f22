use std::collections::BTreeMap;

use crate::config::ViewsSettings;
use crate::models::{AvailabilityCurve, Category, ViewLogRecord, ViewsPerArticleRow};

/// Yearly views per available article, by article age, for one category.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewsProfile {
    pub category: Category,
    by_age: BTreeMap<u32, f64>,
}

impl ViewsProfile {
    pub fn new(category: Category, by_age: BTreeMap<u32, f64>) -> Self {
        Self { category, by_age }
    }

    /// Same value at every age in `0..=max_age`.
    pub fn constant(category: Category, value: f64, max_age: u32) -> Self {
        Self::new(category, (0..=max_age).map(|age| (age, value)).collect())
    }

    pub fn get(&self, age_years: u32) -> Option<f64> {
        self.by_age.get(&age_years).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.by_age.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.by_age.iter().map(|(age, value)| (*age, *value))
    }

    pub fn to_rows(&self) -> Vec<ViewsPerArticleRow> {
        self.iter()
            .map(|(age_years, views_per_article)| ViewsPerArticleRow {
                category: self.category,
                age_years,
                views_per_article,
            })
            .collect()
    }
}

/// Maps a view-log row onto a category. Bronze rows need the delayed/immediate marker.
pub fn view_category(record: &ViewLogRecord) -> Option<Category> {
    let status = record.oa_status.trim().to_ascii_lowercase();
    if status == "bronze" {
        return match record
            .delayed_or_immediate
            .as_deref()
            .map(|marker| marker.trim().to_ascii_lowercase())
            .as_deref()
        {
            Some("delayed") => Some(Category::DelayedBronze),
            Some("immediate") => Some(Category::ImmediateBronze),
            _ => None,
        };
    }
    status.parse().ok()
}

/// Views in the reference window summed by article age in whole years.
pub fn views_by_age(logs: &[ViewLogRecord], category: Category, max_age: u32) -> BTreeMap<u32, f64> {
    let mut by_age = BTreeMap::new();
    for record in logs {
        if record.article_age_months < 0 || view_category(record) != Some(category) {
            continue;
        }
        let age = (record.article_age_months / 12) as u32;
        if age > max_age {
            continue;
        }
        *by_age.entry(age).or_insert(0.0) += record.view_count.max(0) as f64;
    }
    by_age
}

/// Divides annualised views by the articles available in the reference year, age by age.
///
/// Ages missing on either side, or with no articles, are left out. Biorxiv borrows the
/// green profile, so callers pass green views and green reference articles for it.
/// Delayed bronze has almost nothing available at age 0, so its age-0 ratio is replaced
/// by the age-1 ratio.
pub fn estimate_profile(
    category: Category,
    logs: &[ViewLogRecord],
    reference_articles: &AvailabilityCurve,
    settings: &ViewsSettings,
) -> ViewsProfile {
    let view_source = match category {
        Category::Biorxiv => Category::Green,
        other => other,
    };
    let views = views_by_age(logs, view_source, settings.max_age);

    let mut by_age: BTreeMap<u32, f64> = views
        .iter()
        .filter_map(|(age, views)| {
            let articles = reference_articles.get(*age);
            (articles > 0).then(|| (*age, settings.annualize_factor * views / articles as f64))
        })
        .collect();

    if category == Category::DelayedBronze && by_age.contains_key(&0) {
        match by_age.get(&1).copied() {
            Some(age_one) => {
                by_age.insert(0, age_one);
            }
            None => {
                by_age.remove(&0);
            }
        }
    }

    ViewsProfile::new(category, by_age)
}
