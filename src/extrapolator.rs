use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::availability::AvailabilityIndex;
use crate::config::{CurveGuess, FitSettings};
use crate::error::ForecastError;
use crate::least_squares::{levenberg_marquardt, Model};
use crate::models::{Category, FitRow, FittedPointRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveFamily {
    /// `a * (y - y0) + b`
    Linear,
    /// `b + a * exp((y - y0) / d)`
    Exponential,
    /// `b - a * exp((y - y0) / d)`, a saturating trend.
    InverseExponential,
}

impl CurveFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            CurveFamily::Linear => "linear",
            CurveFamily::Exponential => "exponential",
            CurveFamily::InverseExponential => "inverse_exponential",
        }
    }

    pub fn param_count(&self) -> usize {
        match self {
            CurveFamily::Linear => 2,
            CurveFamily::Exponential | CurveFamily::InverseExponential => 3,
        }
    }

    fn evaluate(&self, origin_year: i32, year: f64, params: &[f64]) -> f64 {
        let t = year - f64::from(origin_year);
        match self {
            CurveFamily::Linear => params[0] * t + params[1],
            CurveFamily::Exponential => params[1] + params[0] * (t / params[2]).exp(),
            CurveFamily::InverseExponential => params[1] - params[0] * (t / params[2]).exp(),
        }
    }
}

impl fmt::Display for CurveFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories whose yearly totals trend down to a floor; they always get the
/// saturating family regardless of goodness of fit.
pub fn forces_saturation(category: Category) -> bool {
    matches!(category, Category::DelayedBronze | Category::Closed)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoricalPoint {
    pub observation_year: i32,
    pub category: Category,
    pub total_count: u64,
}

struct FamilyModel {
    family: CurveFamily,
    origin_year: i32,
}

impl Model for FamilyModel {
    fn param_count(&self) -> usize {
        self.family.param_count()
    }

    fn value(&self, x: f64, params: &[f64]) -> f64 {
        self.family.evaluate(self.origin_year, x, params)
    }

    fn gradient(&self, x: f64, params: &[f64], out: &mut [f64]) {
        let t = x - f64::from(self.origin_year);
        match self.family {
            CurveFamily::Linear => {
                out[0] = t;
                out[1] = 1.0;
            }
            CurveFamily::Exponential | CurveFamily::InverseExponential => {
                let sign = if self.family == CurveFamily::Exponential {
                    1.0
                } else {
                    -1.0
                };
                let (a, d) = (params[0], params[2]);
                let growth = (t / d).exp();
                out[0] = sign * growth;
                out[1] = 1.0;
                out[2] = -sign * a * t * growth / (d * d);
            }
        }
    }
}

/// The retained growth curve for one category.
#[derive(Debug, Clone)]
pub struct GrowthFit {
    pub category: Category,
    pub family: CurveFamily,
    pub origin_year: i32,
    pub params: Vec<f64>,
    pub r_squared: f64,
    pub fitted_series: BTreeMap<i32, f64>,
}

impl GrowthFit {
    pub fn value_at(&self, year: i32) -> f64 {
        self.family
            .evaluate(self.origin_year, f64::from(year), &self.params)
    }

    /// Ratio of the fitted value in `year` to the fitted value in `base_year`.
    /// A curve that has dropped below zero contributes nothing.
    pub fn scaling_factor(&self, year: i32, base_year: i32) -> Result<f64, ForecastError> {
        let base = self.value_at(base_year);
        let value = self.value_at(year);
        if !base.is_finite() || base.abs() < f64::EPSILON || !value.is_finite() {
            return Err(ForecastError::FitDegeneracy {
                category: self.category,
                family: self.family,
                reason: format!("fitted value in base year {base_year} is {base}"),
            });
        }
        Ok((value / base).max(0.0))
    }

    pub fn to_row(&self) -> FitRow {
        FitRow {
            category: self.category,
            curve_family: self.family.to_string(),
            origin_year: self.origin_year,
            a: self.params[0],
            b: self.params[1],
            d: self.params.get(2).copied(),
            r_squared: self.r_squared,
        }
    }

    pub fn series_rows(&self) -> Vec<FittedPointRow> {
        self.fitted_series
            .iter()
            .map(|(year, value)| FittedPointRow {
                category: self.category,
                year: *year,
                value: *value,
            })
            .collect()
    }
}

/// Yearly newly-available totals used as fitting input: ages up to `max_age`,
/// observation years in `[start_year, last_complete_year)`.
pub fn fitting_series(
    index: &AvailabilityIndex,
    category: Category,
    settings: &FitSettings,
    last_complete_year: i32,
) -> Vec<HistoricalPoint> {
    (settings.start_year..last_complete_year)
        .filter_map(|year| {
            let mut delta = index.newly_available(category, year);
            if delta.is_empty() {
                return None;
            }
            delta.truncate_after(settings.max_age);
            Some(HistoricalPoint {
                observation_year: year,
                category,
                total_count: delta.total(),
            })
        })
        .collect()
}

pub fn fit_family(
    category: Category,
    family: CurveFamily,
    points: &[HistoricalPoint],
    settings: &FitSettings,
) -> Result<GrowthFit, ForecastError> {
    let degenerate = |reason: String| ForecastError::FitDegeneracy {
        category,
        family,
        reason,
    };

    let needed = family.param_count();
    if points.len() < needed {
        return Err(degenerate(format!(
            "needs at least {needed} points, got {}",
            points.len()
        )));
    }

    let xs: Vec<f64> = points.iter().map(|p| f64::from(p.observation_year)).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.total_count as f64).collect();

    let (origin_year, params) = match family {
        CurveFamily::Linear => {
            let origin_year = settings.origin_year;
            let params = ordinary_least_squares(&xs, &ys, origin_year)
                .ok_or_else(|| degenerate("all points share one year".to_string()))?;
            (origin_year, params)
        }
        CurveFamily::Exponential | CurveFamily::InverseExponential => {
            let guess: CurveGuess = if family == CurveFamily::Exponential {
                settings.growth_guess(category)
            } else {
                settings.saturation_guess(category)
            };
            let origin_year = guess.origin_year.unwrap_or(settings.origin_year);
            let model = FamilyModel {
                family,
                origin_year,
            };
            let solution = levenberg_marquardt(&model, &xs, &ys, &[guess.a, guess.b, guess.d])
                .map_err(|err| degenerate(err.to_string()))?;
            debug!(
                %category,
                %family,
                iterations = solution.iterations,
                "curve fit converged"
            );
            (origin_year, solution.params)
        }
    };

    if params.iter().any(|p| !p.is_finite()) {
        return Err(degenerate("non-finite parameters".to_string()));
    }

    let fitted: Vec<f64> = xs
        .iter()
        .map(|x| family.evaluate(origin_year, *x, &params))
        .collect();
    let r_squared = r_squared(&ys, &fitted);

    let fitted_series = (settings.start_year..=settings.horizon_year)
        .map(|year| (year, family.evaluate(origin_year, f64::from(year), &params)))
        .collect();

    Ok(GrowthFit {
        category,
        family,
        origin_year,
        params,
        r_squared,
        fitted_series,
    })
}

/// Picks the retained fit for a category. Saturating categories always take the
/// inverse-exponential family; the rest take whichever of linear and exponential
/// explains more variance. Any family that cannot be fitted falls back to linear.
pub fn select_fit(
    category: Category,
    points: &[HistoricalPoint],
    settings: &FitSettings,
) -> Result<GrowthFit, ForecastError> {
    let preferred = if forces_saturation(category) {
        CurveFamily::InverseExponential
    } else {
        CurveFamily::Exponential
    };

    let candidate = fit_family(category, preferred, points, settings);
    let linear = fit_family(category, CurveFamily::Linear, points, settings);

    match (candidate, linear) {
        (Ok(candidate), _) if forces_saturation(category) => Ok(candidate),
        (Ok(candidate), Ok(linear)) => {
            if linear.r_squared > candidate.r_squared {
                Ok(linear)
            } else {
                Ok(candidate)
            }
        }
        (Ok(candidate), Err(_)) => Ok(candidate),
        (Err(err), Ok(linear)) => {
            warn!(%category, error = %err, "falling back to linear fit");
            Ok(linear)
        }
        (Err(_), Err(err)) => Err(err),
    }
}

/// Slope and intercept of `y = a * (x - origin) + b`.
fn ordinary_least_squares(xs: &[f64], ys: &[f64], origin_year: i32) -> Option<Vec<f64>> {
    let n = xs.len() as f64;
    let ts: Vec<f64> = xs.iter().map(|x| x - f64::from(origin_year)).collect();
    let mean_t = ts.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let sxx: f64 = ts.iter().map(|t| (t - mean_t).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = ts
        .iter()
        .zip(ys)
        .map(|(t, y)| (t - mean_t) * (y - mean_y))
        .sum();
    let slope = sxy / sxx;
    Some(vec![slope, mean_y - slope * mean_t])
}

fn r_squared(observed: &[f64], fitted: &[f64]) -> f64 {
    let mean = observed.iter().sum::<f64>() / observed.len() as f64;
    let ss_res: f64 = observed
        .iter()
        .zip(fitted)
        .map(|(y, f)| (y - f).powi(2))
        .sum();
    let ss_tot: f64 = observed.iter().map(|y| (y - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(category: Category, f: impl Fn(f64) -> f64) -> Vec<HistoricalPoint> {
        (2000..2018)
            .map(|year| HistoricalPoint {
                observation_year: year,
                category,
                total_count: f(f64::from(year)).round() as u64,
            })
            .collect()
    }

    fn settings_with(category: Category, growth: Option<CurveGuess>, saturation: Option<CurveGuess>) -> FitSettings {
        let mut settings = FitSettings::default();
        settings.overrides.insert(
            category.as_str().to_string(),
            crate::config::CategoryGuesses { growth, saturation },
        );
        settings
    }

    #[test]
    fn exponential_growth_is_recovered_and_preferred() {
        let data = points(Category::Gold, |y| 10_000.0 + 5_000.0 * ((y - 2000.0) / 5.0).exp());
        let settings = settings_with(
            Category::Gold,
            Some(CurveGuess {
                a: 4_000.0,
                b: 9_000.0,
                d: 4.5,
                origin_year: None,
            }),
            None,
        );

        let fit = select_fit(Category::Gold, &data, &settings).unwrap();
        assert_eq!(fit.family, CurveFamily::Exponential);
        assert!(fit.r_squared > 0.9999, "r2 = {}", fit.r_squared);
        assert!((fit.params[2] - 5.0).abs() < 0.01);
        let expected_2030 = 10_000.0 + 5_000.0 * 6.0_f64.exp();
        assert!((fit.value_at(2030) / expected_2030 - 1.0).abs() < 1e-3);
    }

    #[test]
    fn saturating_categories_ignore_r_squared() {
        let data = points(Category::Closed, |y| 50_000.0 - 30_000.0 * (-(y - 2000.0) / 7.0).exp());
        let settings = settings_with(
            Category::Closed,
            None,
            Some(CurveGuess {
                a: 25_000.0,
                b: 45_000.0,
                d: -6.0,
                origin_year: None,
            }),
        );

        let fit = select_fit(Category::Closed, &data, &settings).unwrap();
        assert_eq!(fit.family, CurveFamily::InverseExponential);
        assert!(fit.r_squared > 0.999);
        assert!(fit.value_at(2040) < 50_000.0);
    }

    #[test]
    fn too_few_points_fall_back_to_linear() {
        let data = vec![
            HistoricalPoint {
                observation_year: 2015,
                category: Category::DelayedBronze,
                total_count: 100,
            },
            HistoricalPoint {
                observation_year: 2016,
                category: Category::DelayedBronze,
                total_count: 120,
            },
        ];
        let fit = select_fit(Category::DelayedBronze, &data, &FitSettings::default()).unwrap();
        assert_eq!(fit.family, CurveFamily::Linear);
        assert!((fit.params[0] - 20.0).abs() < 1e-9);
        assert!((fit.value_at(2017) - 140.0).abs() < 1e-9);
    }

    #[test]
    fn a_single_point_cannot_be_fitted() {
        let data = vec![HistoricalPoint {
            observation_year: 2016,
            category: Category::Hybrid,
            total_count: 10,
        }];
        let err = select_fit(Category::Hybrid, &data, &FitSettings::default()).unwrap_err();
        assert!(matches!(
            err,
            ForecastError::FitDegeneracy {
                category: Category::Hybrid,
                family: CurveFamily::Linear,
                ..
            }
        ));
    }

    #[test]
    fn scaling_factor_is_one_at_the_base_year() {
        let data = points(Category::Green, |y| 3.0 * y - 5000.0);
        let fit = fit_family(Category::Green, CurveFamily::Linear, &data, &FitSettings::default()).unwrap();
        assert_eq!(fit.scaling_factor(2017, 2017).unwrap(), 1.0);
        assert!(fit.scaling_factor(2020, 2017).unwrap() > 1.0);
    }

    #[test]
    fn fitted_series_spans_start_to_horizon() {
        let data = points(Category::Green, |y| 2.0 * y);
        let settings = FitSettings::default();
        let fit = fit_family(Category::Green, CurveFamily::Linear, &data, &settings).unwrap();
        assert_eq!(fit.fitted_series.keys().next(), Some(&settings.start_year));
        assert_eq!(fit.fitted_series.keys().last(), Some(&settings.horizon_year));
        assert_eq!(fit.series_rows().len(), 41);
        assert!((fit.r_squared - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_base_value_is_degenerate() {
        let fit = GrowthFit {
            category: Category::Gold,
            family: CurveFamily::Linear,
            origin_year: 2000,
            params: vec![0.0, 0.0],
            r_squared: 1.0,
            fitted_series: BTreeMap::new(),
        };
        assert!(fit.scaling_factor(2020, 2017).is_err());
    }
}
