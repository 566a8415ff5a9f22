use std::path::Path;

use anyhow::Context;
use sqlx::{PgPool, Row};

use crate::loader::read_csv;
use crate::models::{
    ArticleRecord, BiorxivCount, DelayedJournal, ForecastInputs, GreenDepositRecord, ViewLogRecord,
};

/// Staging tables an `import` can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum InputTable {
    Articles,
    GreenDeposits,
    ViewLogs,
    DelayedJournals,
    Biorxiv,
}

impl InputTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            InputTable::Articles => "oa_forecast.articles",
            InputTable::GreenDeposits => "oa_forecast.green_deposits",
            InputTable::ViewLogs => "oa_forecast.view_logs",
            InputTable::DelayedJournals => "oa_forecast.delayed_journals",
            InputTable::Biorxiv => "oa_forecast.biorxiv_counts",
        }
    }
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Loads one CSV file into its staging table. Rows whose key already exists are
/// updated in place; view logs are append-only. Returns the number of rows written.
pub async fn import_csv(pool: &PgPool, table: InputTable, csv_path: &Path) -> anyhow::Result<u64> {
    let context = || format!("failed to read {}", csv_path.display());
    let mut written = 0u64;

    match table {
        InputTable::Articles => {
            for row in read_csv::<ArticleRecord>(csv_path).with_context(context)? {
                let result = sqlx::query(
                    r#"
                    INSERT INTO oa_forecast.articles
                    (id, published_year, oa_status, journal_id, embargo_months)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (id) DO UPDATE
                    SET published_year = EXCLUDED.published_year,
                        oa_status = EXCLUDED.oa_status,
                        journal_id = EXCLUDED.journal_id,
                        embargo_months = EXCLUDED.embargo_months
                    "#,
                )
                .bind(&row.id)
                .bind(row.published_year)
                .bind(&row.oa_status)
                .bind(&row.journal_id)
                .bind(row.embargo_months)
                .execute(pool)
                .await?;
                written += result.rows_affected();
            }
        }
        InputTable::GreenDeposits => {
            for row in read_csv::<GreenDepositRecord>(csv_path).with_context(context)? {
                let result = sqlx::query(
                    r#"
                    INSERT INTO oa_forecast.green_deposits
                    (id, published_year, first_availability_year, months_old_at_first_deposit)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (id) DO UPDATE
                    SET published_year = EXCLUDED.published_year,
                        first_availability_year = EXCLUDED.first_availability_year,
                        months_old_at_first_deposit = EXCLUDED.months_old_at_first_deposit
                    "#,
                )
                .bind(&row.id)
                .bind(row.published_year)
                .bind(row.first_availability_year)
                .bind(row.months_old_at_first_deposit)
                .execute(pool)
                .await?;
                written += result.rows_affected();
            }
        }
        InputTable::ViewLogs => {
            for row in read_csv::<ViewLogRecord>(csv_path).with_context(context)? {
                let result = sqlx::query(
                    r#"
                    INSERT INTO oa_forecast.view_logs
                    (article_age_months, oa_status, delayed_or_immediate, view_count)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(row.article_age_months)
                .bind(&row.oa_status)
                .bind(&row.delayed_or_immediate)
                .bind(row.view_count)
                .execute(pool)
                .await?;
                written += result.rows_affected();
            }
        }
        InputTable::DelayedJournals => {
            for row in read_csv::<DelayedJournal>(csv_path).with_context(context)? {
                let result = sqlx::query(
                    r#"
                    INSERT INTO oa_forecast.delayed_journals (journal_id, embargo_months)
                    VALUES ($1, $2)
                    ON CONFLICT (journal_id) DO UPDATE
                    SET embargo_months = EXCLUDED.embargo_months
                    "#,
                )
                .bind(&row.journal_id)
                .bind(row.embargo_months)
                .execute(pool)
                .await?;
                written += result.rows_affected();
            }
        }
        InputTable::Biorxiv => {
            for row in read_csv::<BiorxivCount>(csv_path).with_context(context)? {
                let result = sqlx::query(
                    r#"
                    INSERT INTO oa_forecast.biorxiv_counts (published_year, article_count)
                    VALUES ($1, $2)
                    ON CONFLICT (published_year) DO UPDATE
                    SET article_count = EXCLUDED.article_count
                    "#,
                )
                .bind(row.published_year)
                .bind(row.article_count)
                .execute(pool)
                .await?;
                written += result.rows_affected();
            }
        }
    }

    Ok(written)
}

/// Every staged input table, in the shape a forecasting run consumes.
pub async fn fetch_inputs(pool: &PgPool) -> anyhow::Result<ForecastInputs> {
    let articles = sqlx::query(
        "SELECT id, published_year, oa_status, journal_id, embargo_months \
         FROM oa_forecast.articles",
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch articles")?
    .into_iter()
    .map(|row| ArticleRecord {
        id: row.get("id"),
        published_year: row.get("published_year"),
        oa_status: row.get("oa_status"),
        journal_id: row.get("journal_id"),
        embargo_months: row.get("embargo_months"),
    })
    .collect();

    let green_deposits = sqlx::query(
        "SELECT id, published_year, first_availability_year, months_old_at_first_deposit \
         FROM oa_forecast.green_deposits",
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch green deposits")?
    .into_iter()
    .map(|row| GreenDepositRecord {
        id: row.get("id"),
        published_year: row.get("published_year"),
        first_availability_year: row.get("first_availability_year"),
        months_old_at_first_deposit: row.get("months_old_at_first_deposit"),
    })
    .collect();

    let view_logs = sqlx::query(
        "SELECT article_age_months, oa_status, delayed_or_immediate, view_count \
         FROM oa_forecast.view_logs",
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch view logs")?
    .into_iter()
    .map(|row| ViewLogRecord {
        article_age_months: row.get("article_age_months"),
        oa_status: row.get("oa_status"),
        delayed_or_immediate: row.get("delayed_or_immediate"),
        view_count: row.get("view_count"),
    })
    .collect();

    let delayed_journals = sqlx::query(
        "SELECT journal_id, embargo_months FROM oa_forecast.delayed_journals",
    )
    .fetch_all(pool)
    .await
    .context("embargoed journal list is missing; run `init-db` and import delayed-journals")?
    .into_iter()
    .map(|row| DelayedJournal {
        journal_id: row.get("journal_id"),
        embargo_months: row.get("embargo_months"),
    })
    .collect();

    let biorxiv = sqlx::query(
        "SELECT published_year, article_count FROM oa_forecast.biorxiv_counts",
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch biorxiv counts")?
    .into_iter()
    .map(|row| BiorxivCount {
        published_year: row.get("published_year"),
        article_count: row.get("article_count"),
    })
    .collect();

    Ok(ForecastInputs {
        articles,
        green_deposits,
        view_logs,
        delayed_journals,
        biorxiv,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ValueEnum;

    #[test]
    fn table_flags_use_kebab_case() {
        let table = InputTable::from_str("green-deposits", false).unwrap();
        assert_eq!(table, InputTable::GreenDeposits);
        assert_eq!(table.table_name(), "oa_forecast.green_deposits");
        assert!(InputTable::from_str("signals", false).is_err());
    }
}
