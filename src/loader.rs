//! Input tables from a directory of CSV files.

use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::ForecastError;
use crate::models::ForecastInputs;

pub const ARTICLES_FILE: &str = "articles.csv";
pub const GREEN_DEPOSITS_FILE: &str = "green_deposits.csv";
pub const VIEW_LOGS_FILE: &str = "view_logs.csv";
pub const DELAYED_JOURNALS_FILE: &str = "delayed_journals.csv";
pub const BIORXIV_FILE: &str = "biorxiv.csv";

pub fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, ForecastError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize::<T>() {
        rows.push(result?);
    }
    Ok(rows)
}

fn read_optional<T: DeserializeOwned>(dir: &Path, file: &str) -> Result<Vec<T>, ForecastError> {
    let path = dir.join(file);
    if !path.exists() {
        debug!(file, "input table absent, treating as empty");
        return Ok(Vec::new());
    }
    read_csv(&path)
}

/// Reads every input table. The embargoed-journal list must be present, even if empty.
pub fn load_inputs(dir: &Path) -> Result<ForecastInputs, ForecastError> {
    let journals_path = dir.join(DELAYED_JOURNALS_FILE);
    if !journals_path.exists() {
        return Err(ForecastError::MissingData {
            table: DELAYED_JOURNALS_FILE.to_string(),
        });
    }

    let inputs = ForecastInputs {
        articles: read_optional(dir, ARTICLES_FILE)?,
        green_deposits: read_optional(dir, GREEN_DEPOSITS_FILE)?,
        view_logs: read_optional(dir, VIEW_LOGS_FILE)?,
        delayed_journals: read_csv(&journals_path)?,
        biorxiv: read_optional(dir, BIORXIV_FILE)?,
    };
    info!(
        dir = %dir.display(),
        articles = inputs.articles.len(),
        green_deposits = inputs.green_deposits.len(),
        view_logs = inputs.view_logs.len(),
        delayed_journals = inputs.delayed_journals.len(),
        biorxiv = inputs.biorxiv.len(),
        "inputs loaded"
    );
    Ok(inputs)
}
