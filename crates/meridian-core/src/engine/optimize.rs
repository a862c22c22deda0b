use crate::engine::backtest::Backtester;
use crate::error::{BacktestError, Result};
use crate::performance::{is_metric_name, PerformanceReport};
use crate::strategy::{ParameterSet, StrategyFactory};
use crate::types::PricePoint;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridParam {
    pub name: String,
    pub values: Vec<f64>,
}

/// Ordered list of parameters and their candidate values. Expansion follows
/// declaration order: the first parameter varies slowest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterGrid {
    params: Vec<GridParam>,
}

impl ParameterGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_param(mut self, name: impl Into<String>, values: impl Into<Vec<f64>>) -> Self {
        self.params.push(GridParam {
            name: name.into(),
            values: values.into(),
        });
        self
    }

    pub fn params(&self) -> &[GridParam] {
        &self.params
    }

    pub fn combinations(&self) -> usize {
        if self.params.is_empty() {
            return 0;
        }
        self.params.iter().map(|p| p.values.len()).product()
    }

    pub fn validate(&self) -> Result<()> {
        if self.params.is_empty() {
            return Err(BacktestError::EmptyGrid("grid has no parameters".to_string()));
        }
        let mut seen = BTreeSet::new();
        for param in &self.params {
            let name = param.name.trim();
            if name.is_empty() {
                return Err(BacktestError::InvalidConfiguration(
                    "grid parameter name cannot be empty".to_string(),
                ));
            }
            if !seen.insert(name) {
                return Err(BacktestError::InvalidConfiguration(format!(
                    "grid parameter listed twice: {}",
                    name
                )));
            }
            if param.values.is_empty() {
                return Err(BacktestError::EmptyGrid(format!(
                    "grid parameter has no values: {}",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn expand(&self) -> Vec<ParameterSet> {
        if self.params.is_empty() {
            return Vec::new();
        }
        let mut out: Vec<ParameterSet> = vec![ParameterSet::new()];
        for param in &self.params {
            let mut next = Vec::with_capacity(out.len() * param.values.len());
            for base in &out {
                for value in &param.values {
                    let mut assignment = base.clone();
                    assignment.insert(param.name.trim().to_string(), *value);
                    next.push(assignment);
                }
            }
            out = next;
        }
        out
    }
}

impl FromIterator<GridParam> for ParameterGrid {
    fn from_iter<I: IntoIterator<Item = GridParam>>(iter: I) -> Self {
        Self {
            params: iter.into_iter().collect(),
        }
    }
}

/// Metric to maximize. Any name `PerformanceReport::metric` understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    metric: String,
}

impl Objective {
    pub fn new(metric: &str) -> Result<Self> {
        let metric = metric.trim();
        if !is_metric_name(metric) {
            return Err(BacktestError::InvalidConfiguration(format!(
                "unknown objective metric: {}",
                metric
            )));
        }
        Ok(Self {
            metric: metric.to_string(),
        })
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn needs_benchmark(&self) -> bool {
        matches!(self.metric.as_str(), "alpha" | "beta" | "information_ratio")
    }

    /// NaN when the metric is undefined for this report.
    pub fn score(&self, report: &PerformanceReport) -> f64 {
        report.metric(&self.metric).unwrap_or(f64::NAN)
    }
}

impl Default for Objective {
    fn default() -> Self {
        Self {
            metric: "sharpe_ratio".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GridSearchOptions {
    pub objective: Objective,
    pub parallel: bool,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl GridSearchOptions {
    pub fn with_objective(mut self, objective: Objective) -> Self {
        self.objective = objective;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Ok => "ok",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GridRunEntry {
    pub run_id: String,
    pub params: ParameterSet,
    pub status: RunStatus,
    pub error: Option<String>,
    pub score: Option<f64>,
    pub report: Option<PerformanceReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    pub objective: String,
    pub best: Option<GridRunEntry>,
    pub runs: Vec<GridRunEntry>,
}

impl OptimizationResult {
    pub fn count(&self, status: RunStatus) -> usize {
        self.runs.iter().filter(|r| r.status == status).count()
    }
}

/// Short, stable id for one parameter assignment.
pub fn assignment_run_id(params: &ParameterSet) -> String {
    let canonical =
        serde_json::to_string(params).unwrap_or_else(|_| "{\"error\":\"params\"}".to_string());
    let digest = Sha256::digest(canonical.as_bytes());
    digest[..6].iter().map(|b| format!("{:02x}", b)).collect()
}

/// First strictly greatest finite-or-infinite score wins; NaN never does.
fn select_best(runs: &[GridRunEntry]) -> Option<&GridRunEntry> {
    let mut best: Option<(&GridRunEntry, f64)> = None;
    for entry in runs {
        if entry.status != RunStatus::Ok {
            continue;
        }
        let Some(score) = entry.score.filter(|s| !s.is_nan()) else {
            continue;
        };
        match best {
            Some((_, current)) if score <= current => {}
            _ => best = Some((entry, score)),
        }
    }
    best.map(|(entry, _)| entry)
}

impl Backtester {
    /// Runs every grid combination against `prices` and picks the one that
    /// maximizes the objective. A failing combination is recorded and the
    /// search carries on.
    pub fn optimize<F>(
        &self,
        factory: &F,
        grid: &ParameterGrid,
        prices: &[PricePoint],
        options: &GridSearchOptions,
    ) -> Result<OptimizationResult>
    where
        F: StrategyFactory + ?Sized,
    {
        grid.validate()?;
        if prices.is_empty() {
            return Err(BacktestError::EmptyInput("price series has no rows".to_string()));
        }
        if options.objective.needs_benchmark() && !self.has_benchmark() {
            return Err(BacktestError::InvalidConfiguration(format!(
                "objective {} requires a benchmark series",
                options.objective.metric()
            )));
        }

        let assignments = grid.expand();
        let span = tracing::info_span!(
            "backtest.optimize",
            combinations = assignments.len(),
            objective = options.objective.metric(),
            parallel = options.parallel
        );
        let _enter = span.enter();
        info!("grid search started");

        let run_one = |params: &ParameterSet| self.evaluate(factory, params, prices, options);
        let runs: Vec<GridRunEntry> = if options.parallel {
            assignments.par_iter().map(run_one).collect()
        } else {
            assignments.iter().map(run_one).collect()
        };

        let best = select_best(&runs).cloned();
        let result = OptimizationResult {
            objective: options.objective.metric().to_string(),
            best,
            runs,
        };

        info!(
            ok = result.count(RunStatus::Ok),
            failed = result.count(RunStatus::Failed),
            cancelled = result.count(RunStatus::Cancelled),
            best_run_id = result.best.as_ref().map(|b| b.run_id.as_str()),
            best_score = result.best.as_ref().and_then(|b| b.score),
            "grid search complete"
        );
        Ok(result)
    }

    fn evaluate<F>(
        &self,
        factory: &F,
        params: &ParameterSet,
        prices: &[PricePoint],
        options: &GridSearchOptions,
    ) -> GridRunEntry
    where
        F: StrategyFactory + ?Sized,
    {
        let run_id = assignment_run_id(params);
        let entry = if options.is_cancelled() {
            GridRunEntry {
                run_id,
                params: params.clone(),
                status: RunStatus::Cancelled,
                error: None,
                score: None,
                report: None,
            }
        } else {
            match factory.build(params).and_then(|s| self.run(s.as_ref(), prices)) {
                Ok(run) => GridRunEntry {
                    run_id,
                    params: params.clone(),
                    status: RunStatus::Ok,
                    error: None,
                    score: Some(options.objective.score(&run.report)),
                    report: Some(run.report),
                },
                Err(err) => {
                    if err.is_configuration() {
                        warn!(run_id = %run_id, ?params, error = %err, "grid combination rejected");
                    } else {
                        error!(run_id = %run_id, ?params, error = %err, "grid combination failed");
                    }
                    GridRunEntry {
                        run_id,
                        params: params.clone(),
                        status: RunStatus::Failed,
                        error: Some(err.to_string()),
                        score: None,
                        report: None,
                    }
                }
            }
        };

        metrics::counter!("meridian.optimize.runs", "status" => entry.status.as_str())
            .increment(1);
        entry
    }
}
