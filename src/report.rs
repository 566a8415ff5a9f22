use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ForecastError;
use crate::models::Category;
use crate::pipeline::ForecastOutputs;

pub const JSON_BUNDLE_FILE: &str = "forecast.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Csv,
    Json,
}

#[derive(Serialize)]
struct Bundle<'a> {
    run_id: Uuid,
    generated_at: DateTime<Utc>,
    #[serde(flatten)]
    outputs: &'a ForecastOutputs,
}

fn write_table<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), ForecastError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes every output table into `out_dir`, creating it if needed. Returns the files written.
pub fn write_outputs(
    outputs: &ForecastOutputs,
    out_dir: &Path,
    format: OutputFormat,
) -> Result<Vec<PathBuf>, ForecastError> {
    std::fs::create_dir_all(out_dir)?;

    match format {
        OutputFormat::Csv => {
            let files = [
                "availability.csv",
                "totals.csv",
                "fits.csv",
                "fitted_series.csv",
                "views_per_article.csv",
                "projected_views.csv",
            ];
            let paths: Vec<PathBuf> = files.iter().map(|file| out_dir.join(file)).collect();
            write_table(&paths[0], &outputs.availability)?;
            write_table(&paths[1], &outputs.totals)?;
            write_table(&paths[2], &outputs.fits)?;
            write_table(&paths[3], &outputs.fitted_series)?;
            write_table(&paths[4], &outputs.views_per_article)?;
            write_table(&paths[5], &outputs.projected_views)?;
            Ok(paths)
        }
        OutputFormat::Json => {
            let path = out_dir.join(JSON_BUNDLE_FILE);
            let bundle = Bundle {
                run_id: Uuid::new_v4(),
                generated_at: Utc::now(),
                outputs,
            };
            let file = std::fs::File::create(&path)?;
            serde_json::to_writer_pretty(file, &bundle).map_err(std::io::Error::from)?;
            Ok(vec![path])
        }
    }
}

/// First and last projected views per category, one line each.
pub fn build_summary(outputs: &ForecastOutputs) -> String {
    let mut by_category: BTreeMap<Category, Vec<(i32, f64)>> = BTreeMap::new();
    for row in &outputs.projected_views {
        by_category
            .entry(row.category)
            .or_default()
            .push((row.observation_year, row.estimated_views));
    }

    let mut output = String::new();
    if by_category.is_empty() {
        let _ = writeln!(output, "No projected views for this run.");
    }
    for (category, mut points) in by_category {
        points.sort_by_key(|(year, _)| *year);
        if let (Some(first), Some(last)) = (points.first(), points.last()) {
            let _ = writeln!(
                output,
                "- {}: {:.0} views in {} -> {:.0} views in {}",
                category, first.1, first.0, last.1, last.0
            );
        }
    }
    for warning in &outputs.warnings {
        let _ = writeln!(output, "warning: {warning}");
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProjectedViewsRow, SeriesStatus, TotalRow};

    fn sample() -> ForecastOutputs {
        ForecastOutputs {
            totals: vec![TotalRow {
                category: Category::DelayedBronze,
                year: 2019,
                total_count: 42,
                status: SeriesStatus::Projected,
            }],
            projected_views: vec![
                ProjectedViewsRow {
                    category: Category::Gold,
                    observation_year: 2020,
                    estimated_views: 900.0,
                },
                ProjectedViewsRow {
                    category: Category::Gold,
                    observation_year: 2010,
                    estimated_views: 100.4,
                },
            ],
            warnings: vec!["hybrid: cannot fit linear curve".to_string()],
            ..ForecastOutputs::default()
        }
    }

    #[test]
    fn csv_tables_use_snake_case_labels() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_outputs(&sample(), dir.path(), OutputFormat::Csv).unwrap();
        assert_eq!(paths.len(), 6);

        let totals = std::fs::read_to_string(dir.path().join("totals.csv")).unwrap();
        assert_eq!(
            totals,
            "category,year,total_count,status\ndelayed_bronze,2019,42,projected\n"
        );
    }

    #[test]
    fn json_bundle_carries_run_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_outputs(&sample(), dir.path().join("nested").as_path(), OutputFormat::Json)
            .unwrap();
        let content = std::fs::read_to_string(&paths[0]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();

        assert!(Uuid::parse_str(value["run_id"].as_str().unwrap()).is_ok());
        assert!(value["generated_at"].is_string());
        assert_eq!(value["projected_views"].as_array().unwrap().len(), 2);
        assert_eq!(value["totals"][0]["status"], "projected");
    }

    #[test]
    fn summary_spans_first_to_last_year() {
        let summary = build_summary(&sample());
        assert!(summary.contains("- gold: 100 views in 2010 -> 900 views in 2020"));
        assert!(summary.contains("warning: hybrid"));
    }
}
