use thiserror::Error;

use crate::extrapolator::CurveFamily;
use crate::models::Category;

#[derive(Debug, Error)]
pub enum ForecastError {
    /// A reference table the run cannot start without is absent.
    #[error("required reference table `{table}` is missing")]
    MissingData { table: String },

    #[error("cannot fit {family} curve for {category}: {reason}")]
    FitDegeneracy {
        category: Category,
        family: CurveFamily,
        reason: String,
    },

    #[error(
        "article {article_id} (published {year}) classified as both {first} and {second}"
    )]
    InconsistentCategory {
        article_id: String,
        year: i32,
        first: Category,
        second: Category,
    },

    #[error("no overlapping age buckets for {category} in {year}")]
    ConvolutionAlignment { category: Category, year: i32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl ForecastError {
    /// Errors that abort the whole run instead of leaving a gap in the output.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ForecastError::MissingData { .. } | ForecastError::InconsistentCategory { .. }
        )
    }
}
