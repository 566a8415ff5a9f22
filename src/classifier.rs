use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::error::ForecastError;
use crate::models::{ArticleRecord, Category, DelayedJournal, RawOaStatus};

/// Journals whose free-to-read content appears only after a fixed embargo.
#[derive(Debug, Clone, Default)]
pub struct EmbargoTable {
    by_journal: HashMap<String, i32>,
}

impl EmbargoTable {
    pub fn from_journals(journals: &[DelayedJournal]) -> Self {
        let by_journal = journals
            .iter()
            .map(|journal| (journal.journal_id.clone(), journal.embargo_months.max(0)))
            .collect();
        Self { by_journal }
    }

    pub fn embargo_for(&self, journal_id: &str) -> Option<i32> {
        self.by_journal.get(journal_id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_journal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_journal.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    /// Set only for delayed bronze.
    pub embargo_months: Option<i32>,
}

/// Assigns the single category an article belongs to.
///
/// Bronze splits on the delayed-journal list alone. The embargo carried on the record
/// is only compared against the listed one; it never makes an unlisted journal delayed.
/// An unreadable or missing status counts as closed.
pub fn classify(record: &ArticleRecord, embargoes: &EmbargoTable) -> Classification {
    let status = record
        .oa_status
        .as_deref()
        .and_then(RawOaStatus::parse)
        .unwrap_or(RawOaStatus::Closed);

    let category = match status {
        RawOaStatus::Gold => Category::Gold,
        RawOaStatus::Hybrid => Category::Hybrid,
        RawOaStatus::Green => Category::Green,
        RawOaStatus::Closed => Category::Closed,
        RawOaStatus::Bronze => {
            let embargo = record
                .journal_id
                .as_deref()
                .and_then(|journal| embargoes.embargo_for(journal));
            if let Some(embargo_months) = embargo {
                if let Some(recorded) = record.embargo_months.filter(|m| *m != embargo_months) {
                    debug!(
                        article_id = %record.id,
                        listed = embargo_months,
                        recorded,
                        "record embargo disagrees with delayed-journal list"
                    );
                }
                return Classification {
                    category: Category::DelayedBronze,
                    embargo_months: Some(embargo_months),
                };
            }
            Category::ImmediateBronze
        }
    };

    Classification {
        category,
        embargo_months: None,
    }
}

/// Per-year article counts after classification.
#[derive(Debug, Clone, Default)]
pub struct ClassifiedArticles {
    published: BTreeMap<(Category, i32), u64>,
    delayed_cohorts: BTreeMap<(i32, i32), u64>,
    totals: BTreeMap<i32, u64>,
}

impl ClassifiedArticles {
    pub fn published_count(&self, category: Category, published_year: i32) -> u64 {
        self.published
            .get(&(category, published_year))
            .copied()
            .unwrap_or(0)
    }

    /// `(published_year, count)` pairs for one category, oldest first.
    pub fn published_by_year(&self, category: Category) -> impl Iterator<Item = (i32, u64)> + '_ {
        self.published
            .range((category, i32::MIN)..=(category, i32::MAX))
            .map(|((_, year), count)| (*year, *count))
    }

    pub fn total_published(&self, published_year: i32) -> u64 {
        self.totals.get(&published_year).copied().unwrap_or(0)
    }

    /// Delayed bronze counts keyed by `(published_year, embargo_months)`.
    pub fn delayed_cohorts(&self) -> impl Iterator<Item = ((i32, i32), u64)> + '_ {
        self.delayed_cohorts.iter().map(|(key, count)| (*key, *count))
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    fn record(&mut self, published_year: i32, classification: Classification) {
        *self
            .published
            .entry((classification.category, published_year))
            .or_insert(0) += 1;
        *self.totals.entry(published_year).or_insert(0) += 1;
        if let Some(embargo) = classification.embargo_months {
            *self
                .delayed_cohorts
                .entry((published_year, embargo))
                .or_insert(0) += 1;
        }
    }
}

/// Classifies every article. Repeated ids with the same category are counted once;
/// repeated ids landing in different categories abort the run.
pub fn classify_all(
    records: &[ArticleRecord],
    embargoes: &EmbargoTable,
) -> Result<ClassifiedArticles, ForecastError> {
    let mut seen: HashMap<&str, Category> = HashMap::with_capacity(records.len());
    let mut classified = ClassifiedArticles::default();
    let mut duplicates = 0usize;

    for record in records {
        let classification = classify(record, embargoes);
        if let Some(previous) = seen.insert(record.id.as_str(), classification.category) {
            if previous != classification.category {
                return Err(ForecastError::InconsistentCategory {
                    article_id: record.id.clone(),
                    year: record.published_year,
                    first: previous,
                    second: classification.category,
                });
            }
            duplicates += 1;
            continue;
        }
        classified.record(record.published_year, classification);
    }

    if duplicates > 0 {
        debug!(duplicates, "skipped repeated article ids");
    }

    Ok(classified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn article(id: &str, year: i32, status: Option<&str>, journal: Option<&str>) -> ArticleRecord {
        ArticleRecord {
            id: id.to_string(),
            published_year: year,
            oa_status: status.map(str::to_string),
            journal_id: journal.map(str::to_string),
            embargo_months: None,
        }
    }

    fn embargoes() -> EmbargoTable {
        EmbargoTable::from_journals(&[DelayedJournal {
            journal_id: "J-DELAY".to_string(),
            embargo_months: 12,
        }])
    }

    #[test]
    fn bronze_in_delayed_journal_becomes_delayed_bronze() {
        let result = classify(&article("a", 2010, Some("bronze"), Some("J-DELAY")), &embargoes());
        assert_eq!(result.category, Category::DelayedBronze);
        assert_eq!(result.embargo_months, Some(12));

        let result = classify(&article("b", 2010, Some("bronze"), Some("J-OTHER")), &embargoes());
        assert_eq!(result.category, Category::ImmediateBronze);
        assert_eq!(result.embargo_months, None);
    }

    #[test]
    fn non_bronze_statuses_are_not_split() {
        let result = classify(&article("a", 2010, Some("gold"), Some("J-DELAY")), &embargoes());
        assert_eq!(result.category, Category::Gold);
        assert_eq!(result.embargo_months, None);
    }

    #[test]
    fn record_embargo_alone_does_not_delay_unlisted_journal() {
        let mut record = article("a", 2010, Some("bronze"), Some("J-NOT-LISTED"));
        record.embargo_months = Some(12);
        let result = classify(&record, &EmbargoTable::default());
        assert_eq!(result.category, Category::ImmediateBronze);
        assert_eq!(result.embargo_months, None);

        record.journal_id = None;
        assert_eq!(classify(&record, &embargoes()).category, Category::ImmediateBronze);
    }

    #[test]
    fn listed_embargo_wins_over_record_embargo() {
        let mut record = article("a", 2010, Some("bronze"), Some("J-DELAY"));
        record.embargo_months = Some(6);
        let result = classify(&record, &embargoes());
        assert_eq!(result.category, Category::DelayedBronze);
        assert_eq!(result.embargo_months, Some(12));
    }

    #[test]
    fn missing_or_unknown_status_defaults_to_closed() {
        assert_eq!(
            classify(&article("a", 2010, None, None), &embargoes()).category,
            Category::Closed
        );
        assert_eq!(
            classify(&article("b", 2010, Some("diamond"), None), &embargoes()).category,
            Category::Closed
        );
    }

    #[test]
    fn conflicting_duplicate_ids_are_fatal() {
        let records = vec![
            article("dup", 2012, Some("gold"), None),
            article("dup", 2012, Some("green"), None),
        ];
        let err = classify_all(&records, &embargoes()).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            ForecastError::InconsistentCategory {
                year: 2012,
                first: Category::Gold,
                second: Category::Green,
                ..
            }
        ));
    }

    #[test]
    fn identical_duplicates_are_counted_once() {
        let records = vec![
            article("dup", 2012, Some("gold"), None),
            article("dup", 2012, Some("gold"), None),
        ];
        let classified = classify_all(&records, &embargoes()).unwrap();
        assert_eq!(classified.published_count(Category::Gold, 2012), 1);
        assert_eq!(classified.total_published(2012), 1);
    }

    #[test]
    fn delayed_cohorts_track_embargo_lengths() {
        let records = vec![
            article("a", 2010, Some("bronze"), Some("J-DELAY")),
            article("b", 2010, Some("bronze"), Some("J-DELAY")),
            article("c", 2011, Some("bronze"), None),
        ];
        let classified = classify_all(&records, &embargoes()).unwrap();
        let cohorts: Vec<_> = classified.delayed_cohorts().collect();
        assert_eq!(cohorts, vec![((2010, 12), 2)]);
        assert_eq!(classified.published_count(Category::ImmediateBronze, 2011), 1);
    }

    fn status_strategy() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            Just(None),
            Just(Some("gold".to_string())),
            Just(Some("hybrid".to_string())),
            Just(Some("bronze".to_string())),
            Just(Some("green".to_string())),
            Just(Some("closed".to_string())),
            Just(Some("???".to_string())),
        ]
    }

    proptest! {
        #[test]
        fn prop_every_article_lands_in_exactly_one_category(
            rows in prop::collection::vec(
                (2000i32..2005, status_strategy(), prop::bool::ANY),
                0..200,
            )
        ) {
            let records: Vec<ArticleRecord> = rows
                .iter()
                .enumerate()
                .map(|(i, (year, status, delayed))| ArticleRecord {
                    id: format!("doi-{i}"),
                    published_year: *year,
                    oa_status: status.clone(),
                    journal_id: Some(if *delayed { "J-DELAY" } else { "J-OPEN" }.to_string()),
                    embargo_months: None,
                })
                .collect();

            let classified = classify_all(&records, &embargoes()).unwrap();
            for year in 2000..2005 {
                let expected = rows.iter().filter(|(y, _, _)| *y == year).count() as u64;
                let per_category: u64 = Category::PRIMARY
                    .iter()
                    .map(|category| classified.published_count(*category, year))
                    .sum();
                prop_assert_eq!(per_category, expected);
                prop_assert_eq!(classified.total_published(year), expected);
            }
        }
    }
}
