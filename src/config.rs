use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ForecastError;
use crate::models::Category;

/// Tuning for one forecasting run. Every field has a default, so an empty TOML
/// file reproduces the reference analysis.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Earliest publication year the closed subtraction walks back to.
    pub floor_year: i32,
    /// First year whose data is still incomplete. The projection base is the year before.
    pub last_complete_year: i32,
    /// Buckets below this count are zeroed wherever counts are differenced.
    pub small_count_floor: u64,
    /// Oldest age bucket kept in year-over-year deltas.
    pub delta_max_age: u32,
    pub green: GreenWindow,
    pub fit: FitSettings,
    pub views: ViewsSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GreenWindow {
    pub min_months: i32,
    pub max_months: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CurveGuess {
    pub a: f64,
    pub b: f64,
    pub d: f64,
    #[serde(default)]
    pub origin_year: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CategoryGuesses {
    pub growth: Option<CurveGuess>,
    pub saturation: Option<CurveGuess>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FitSettings {
    pub start_year: i32,
    pub max_age: u32,
    pub origin_year: i32,
    pub horizon_year: i32,
    pub default_growth: CurveGuess,
    pub default_saturation: CurveGuess,
    /// Keyed by category name, e.g. `[fit.overrides.biorxiv.growth]`.
    pub overrides: BTreeMap<String, CategoryGuesses>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViewsSettings {
    pub reference_year: i32,
    pub max_age: u32,
    pub annualize_factor: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub first_year: i32,
    pub last_year: i32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            floor_year: 1990,
            last_complete_year: 2018,
            small_count_floor: 25,
            delta_max_age: 10,
            green: GreenWindow::default(),
            fit: FitSettings::default(),
            views: ViewsSettings::default(),
            output: OutputSettings::default(),
        }
    }
}

impl Default for GreenWindow {
    fn default() -> Self {
        Self {
            min_months: -24,
            max_months: 12 * 25,
        }
    }
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            start_year: 2000,
            max_age: 5,
            origin_year: 2000,
            horizon_year: 2040,
            default_growth: CurveGuess {
                a: 14287.0,
                b: 21932.0,
                d: 5.0,
                origin_year: None,
            },
            default_saturation: CurveGuess {
                a: 1_731_700.0,
                b: 22_962_997.0,
                d: -7.0,
                origin_year: None,
            },
            overrides: BTreeMap::new(),
        }
    }
}

impl Default for ViewsSettings {
    fn default() -> Self {
        Self {
            reference_year: 2018,
            max_age: 15,
            annualize_factor: 12.0,
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            first_year: 1995,
            last_year: 2025,
        }
    }
}

/// Biorxiv counts are orders of magnitude smaller and only start in 2014.
const BIORXIV_GROWTH: CurveGuess = CurveGuess {
    a: 5.0,
    b: 1.0,
    d: 1.0,
    origin_year: Some(2014),
};

impl FitSettings {
    pub fn growth_guess(&self, category: Category) -> CurveGuess {
        let configured = self
            .overrides
            .get(category.as_str())
            .and_then(|guesses| guesses.growth);
        match (configured, category) {
            (Some(guess), _) => guess,
            (None, Category::Biorxiv) => BIORXIV_GROWTH,
            (None, _) => self.default_growth,
        }
    }

    pub fn saturation_guess(&self, category: Category) -> CurveGuess {
        self.overrides
            .get(category.as_str())
            .and_then(|guesses| guesses.saturation)
            .unwrap_or(self.default_saturation)
    }
}

impl ForecastConfig {
    pub fn load(path: &Path) -> Result<Self, ForecastError> {
        let content = std::fs::read_to_string(path)?;
        let config: ForecastConfig = toml::from_str(&content).map_err(|err| {
            ForecastError::InvalidConfig(format!("{}: {err}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// The last fully observed year, from which projections start.
    pub fn base_year(&self) -> i32 {
        self.last_complete_year - 1
    }

    pub fn validate(&self) -> Result<(), ForecastError> {
        let invalid = |message: String| Err(ForecastError::InvalidConfig(message));

        if self.floor_year >= self.last_complete_year {
            return invalid(format!(
                "floor_year {} must precede last_complete_year {}",
                self.floor_year, self.last_complete_year
            ));
        }
        if self.fit.start_year >= self.last_complete_year {
            return invalid(format!(
                "fit.start_year {} leaves no years before {}",
                self.fit.start_year, self.last_complete_year
            ));
        }
        if self.fit.horizon_year < self.output.last_year {
            return invalid(format!(
                "fit.horizon_year {} is before output.last_year {}",
                self.fit.horizon_year, self.output.last_year
            ));
        }
        if self.output.first_year > self.output.last_year {
            return invalid(format!(
                "output.first_year {} is after output.last_year {}",
                self.output.first_year, self.output.last_year
            ));
        }
        if self.green.min_months > self.green.max_months {
            return invalid(format!(
                "green window [{}, {}] is empty",
                self.green.min_months, self.green.max_months
            ));
        }
        if !(self.views.annualize_factor.is_finite() && self.views.annualize_factor > 0.0) {
            return invalid(format!(
                "views.annualize_factor must be positive, got {}",
                self.views.annualize_factor
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_reference_defaults() {
        let config: ForecastConfig = toml::from_str("").unwrap();
        assert_eq!(config.floor_year, 1990);
        assert_eq!(config.base_year(), 2017);
        assert_eq!(config.small_count_floor, 25);
        assert_eq!(config.green.min_months, -24);
        assert_eq!(config.green.max_months, 300);
        assert_eq!(config.fit.horizon_year, 2040);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overrides_take_precedence_over_defaults() {
        let config: ForecastConfig = toml::from_str(
            r#"
            small_count_floor = 10

            [fit.overrides.gold.growth]
            a = 1.0
            b = 2.0
            d = 3.0
            "#,
        )
        .unwrap();

        assert_eq!(config.small_count_floor, 10);
        let gold = config.fit.growth_guess(Category::Gold);
        assert_eq!((gold.a, gold.b, gold.d), (1.0, 2.0, 3.0));
        assert_eq!(config.fit.growth_guess(Category::Hybrid).a, 14287.0);
        assert_eq!(config.fit.growth_guess(Category::Biorxiv).origin_year, Some(2014));
        assert_eq!(config.fit.saturation_guess(Category::Closed).d, -7.0);
    }

    #[test]
    fn validate_rejects_inverted_output_range() {
        let mut config = ForecastConfig::default();
        config.output.first_year = 2030;
        config.output.last_year = 2020;
        assert!(matches!(
            config.validate(),
            Err(ForecastError::InvalidConfig(_))
        ));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("forecast.toml");
        std::fs::write(&path, "[views]\nreference_year = 2017\n").unwrap();

        let config = ForecastConfig::load(&path).unwrap();
        assert_eq!(config.views.reference_year, 2017);
        assert_eq!(config.views.max_age, 15);
    }
}
