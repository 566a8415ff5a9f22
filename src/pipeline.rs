//! One forecasting run: classify, index, fit, project, then convolve with readership.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::availability::{AvailabilityIndex, IndexSettings};
use crate::classifier::{classify_all, EmbargoTable};
use crate::config::ForecastConfig;
use crate::convolver::estimate_views;
use crate::error::ForecastError;
use crate::extrapolator::{fitting_series, select_fit, GrowthFit};
use crate::models::{
    AvailabilityCurve, AvailabilityRow, Category, FitRow, FittedPointRow, ForecastInputs,
    ProjectedViewsRow, TotalRow, ViewsPerArticleRow,
};
use crate::projector::{project_closed, project_forward, AvailabilityTimeline};
use crate::views::{estimate_profile, ViewsProfile};

type Projections = BTreeMap<Category, BTreeMap<i32, AvailabilityCurve>>;

/// Every output table of a run. Years or categories that could not be produced are
/// absent rather than zero; `warnings` says which categories were dropped and why.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ForecastOutputs {
    pub availability: Vec<AvailabilityRow>,
    pub totals: Vec<TotalRow>,
    pub fits: Vec<FitRow>,
    pub fitted_series: Vec<FittedPointRow>,
    pub views_per_article: Vec<ViewsPerArticleRow>,
    pub projected_views: Vec<ProjectedViewsRow>,
    pub warnings: Vec<String>,
}

/// State shared by the stages of a single run.
pub struct ForecastContext<'a> {
    config: &'a ForecastConfig,
    index: AvailabilityIndex,
    warnings: Vec<String>,
}

impl<'a> ForecastContext<'a> {
    pub fn new(config: &'a ForecastConfig, inputs: &ForecastInputs) -> Result<Self, ForecastError> {
        config.validate()?;
        let embargoes = EmbargoTable::from_journals(&inputs.delayed_journals);
        let classified = classify_all(&inputs.articles, &embargoes)?;
        let index = AvailabilityIndex::new(
            classified,
            &inputs.green_deposits,
            &inputs.biorxiv,
            IndexSettings::from(config),
        );
        info!(
            articles = inputs.articles.len(),
            green_deposits = inputs.green_deposits.len(),
            embargoed_journals = embargoes.len(),
            "availability index built"
        );
        Ok(Self {
            config,
            index,
            warnings: Vec::new(),
        })
    }

    pub fn index(&self) -> &AvailabilityIndex {
        &self.index
    }

    /// Categories with any input rows, primary ones first.
    pub fn active_categories(&self) -> Vec<Category> {
        Category::PRIMARY
            .iter()
            .copied()
            .chain(std::iter::once(Category::Biorxiv))
            .filter(|category| self.index.has_data(*category))
            .collect()
    }

    pub fn fit_all(&mut self, categories: &[Category]) -> BTreeMap<Category, GrowthFit> {
        let index = &self.index;
        let fit = &self.config.fit;
        let last_complete_year = self.config.last_complete_year;

        let results: Vec<(Category, Result<GrowthFit, ForecastError>)> = categories
            .par_iter()
            .map(|category| {
                let points = fitting_series(index, *category, fit, last_complete_year);
                (*category, select_fit(*category, &points, fit))
            })
            .collect();

        let mut fits = BTreeMap::new();
        for (category, result) in results {
            match result {
                Ok(growth) => {
                    debug!(%category, family = %growth.family, r_squared = growth.r_squared, "fit retained");
                    fits.insert(category, growth);
                }
                Err(err) => record_dropped(&mut self.warnings, category, &err),
            }
        }
        info!(fitted = fits.len(), "growth curves fitted");
        fits
    }

    /// Future curves for every fitted category. Closed is derived last from the open ones.
    pub fn project_all(&mut self, fits: &BTreeMap<Category, GrowthFit>) -> Projections {
        let index = &self.index;
        let base_year = self.config.base_year();
        let last_year = self.projection_end();

        let results: Vec<(Category, Result<BTreeMap<i32, AvailabilityCurve>, ForecastError>)> = fits
            .par_iter()
            .filter(|(category, _)| **category != Category::Closed)
            .map(|(category, fit)| {
                let base = index.cumulative(*category, base_year);
                let seed = index.newly_available(*category, base_year);
                (*category, project_forward(&base, &seed, fit, base_year, last_year))
            })
            .collect();

        let mut projections = Projections::new();
        for (category, result) in results {
            match result {
                Ok(curves) => {
                    projections.insert(category, curves);
                }
                Err(err) => record_dropped(&mut self.warnings, category, &err),
            }
        }

        if let Some(closed_fit) = fits.get(&Category::Closed) {
            match project_closed(index, &projections, closed_fit, base_year, last_year) {
                Ok(curves) if curves.is_empty() && base_year < last_year => {
                    let message = "closed: not projected, an open category with data has no projection";
                    warn!("{message}");
                    self.warnings.push(message.to_string());
                }
                Ok(curves) => {
                    projections.insert(Category::Closed, curves);
                }
                Err(err) => record_dropped(&mut self.warnings, Category::Closed, &err),
            }
        }
        info!(projected = projections.len(), "availability projected");
        projections
    }

    /// Readership profile per category from the reference observation year.
    pub fn views_profiles(
        &self,
        categories: &[Category],
        inputs: &ForecastInputs,
    ) -> BTreeMap<Category, ViewsProfile> {
        let settings = &self.config.views;
        categories
            .par_iter()
            .map(|category| {
                let article_source = match category {
                    Category::Biorxiv => Category::Green,
                    other => *other,
                };
                let articles = self.index.cumulative(article_source, settings.reference_year);
                let profile = estimate_profile(*category, &inputs.view_logs, &articles, settings);
                (*category, profile)
            })
            .filter(|(_, profile)| !profile.is_empty())
            .collect()
    }

    pub fn into_warnings(self) -> Vec<String> {
        self.warnings
    }

    fn projection_end(&self) -> i32 {
        self.config.output.last_year.max(self.config.base_year())
    }
}

fn record_dropped(warnings: &mut Vec<String>, category: Category, err: &ForecastError) {
    warn!(%category, error = %err, "category dropped from projection");
    warnings.push(format!("{category}: {err}"));
}

/// Runs the whole forecast. Only fatal errors abort; everything else leaves gaps.
pub fn run(config: &ForecastConfig, inputs: &ForecastInputs) -> Result<ForecastOutputs, ForecastError> {
    let mut context = ForecastContext::new(config, inputs)?;
    let categories = context.active_categories();

    let fits = context.fit_all(&categories);
    let projections = context.project_all(&fits);
    let profiles = context.views_profiles(&categories, inputs);

    let timeline = AvailabilityTimeline::new(context.index(), config.base_year(), projections);
    let years = config.output.first_year..=config.output.last_year;

    let mut outputs = ForecastOutputs::default();
    for category in &categories {
        for year in years.clone() {
            let Some(curve) = timeline.curve(*category, year).filter(|c| !c.is_empty()) else {
                continue;
            };
            outputs.totals.push(TotalRow {
                category: *category,
                year,
                total_count: curve.total(),
                status: timeline.status(year),
            });
            outputs
                .availability
                .extend(curve.iter().map(|(age_years, article_count)| AvailabilityRow {
                    category: *category,
                    observation_year: year,
                    age_years,
                    article_count,
                }));

            let Some(profile) = profiles.get(category) else {
                continue;
            };
            match estimate_views(*category, year, &curve, profile) {
                Ok(estimated_views) => outputs.projected_views.push(ProjectedViewsRow {
                    category: *category,
                    observation_year: year,
                    estimated_views,
                }),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => debug!(error = %err, "year omitted from projected views"),
            }
        }
    }

    for fit in fits.values() {
        outputs.fits.push(fit.to_row());
        outputs.fitted_series.extend(fit.series_rows());
    }
    for profile in profiles.values() {
        outputs.views_per_article.extend(profile.to_rows());
    }
    outputs.warnings = context.into_warnings();

    info!(
        availability_rows = outputs.availability.len(),
        projected_views = outputs.projected_views.len(),
        warnings = outputs.warnings.len(),
        "forecast complete"
    );
    Ok(outputs)
}
