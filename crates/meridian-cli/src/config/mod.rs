use meridian_core::optimize::{GridParam, GridSearchOptions, Objective, ParameterGrid};
use meridian_core::performance::{PerformanceConfig, TRADING_DAYS_PER_YEAR};
use meridian_core::portfolio::{SimulationConfig, SizingPolicy};
use meridian_core::strategy::{ParameterSet, StrategyKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub run: RunConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub costs: CostsConfig,
    #[serde(default)]
    pub sizing: SizingConfig,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub optimize: Option<OptimizeConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub run_id: String,
    pub symbol: String,
    pub initial_capital: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    pub prices_csv: String,
    pub price_column: Option<String>,
    pub benchmark_csv: Option<String>,
    pub out_dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CostsConfig {
    pub commission_rate: f64,
}

impl Default for CostsConfig {
    fn default() -> Self {
        Self {
            commission_rate: SimulationConfig::default().commission_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    #[default]
    FixedUnits,
    AllInWholeShares,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SizingConfig {
    #[serde(default)]
    pub mode: SizingMode,
    pub units: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    pub kind: String,
    pub short_window: Option<u64>,
    pub long_window: Option<u64>,
    pub size: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    pub risk_free_rate: Option<f64>,
    pub periods_per_year: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizeConfig {
    pub objective: Option<String>,
    pub parallel: Option<bool>,
    #[serde(default)]
    pub params: Vec<OptimizeParam>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizeParam {
    pub name: String,
    pub values: Vec<f64>,
}

impl Config {
    pub fn simulation_config(&self) -> Result<SimulationConfig, String> {
        let sizing = match (self.sizing.mode, self.sizing.units) {
            (SizingMode::FixedUnits, units) => SizingPolicy::FixedUnits {
                units: units.unwrap_or(1.0),
            },
            (SizingMode::AllInWholeShares, None) => SizingPolicy::AllInWholeShares,
            (SizingMode::AllInWholeShares, Some(_)) => {
                return Err("sizing.units only applies to mode = \"fixed_units\"".to_string())
            }
        };
        Ok(SimulationConfig::new(self.run.initial_capital, self.costs.commission_rate)
            .with_sizing(sizing))
    }

    pub fn performance_config(&self) -> PerformanceConfig {
        PerformanceConfig {
            risk_free_rate: self.metrics.risk_free_rate.unwrap_or(0.0),
            periods_per_year: self.metrics.periods_per_year.unwrap_or(TRADING_DAYS_PER_YEAR),
        }
    }

    pub fn strategy_params(&self) -> ParameterSet {
        let mut params = ParameterSet::new();
        if let Some(value) = self.strategy.short_window {
            params.insert("short_window".to_string(), value as f64);
        }
        if let Some(value) = self.strategy.long_window {
            params.insert("long_window".to_string(), value as f64);
        }
        if let Some(value) = self.strategy.size {
            params.insert("size".to_string(), value);
        }
        params
    }

    pub fn parameter_grid(&self) -> Option<ParameterGrid> {
        self.optimize.as_ref().map(|opt| {
            opt.params
                .iter()
                .map(|p| GridParam {
                    name: p.name.clone(),
                    values: p.values.clone(),
                })
                .collect()
        })
    }

    pub fn grid_search_options(
        &self,
        objective_override: Option<&str>,
    ) -> Result<GridSearchOptions, String> {
        let opt = self.optimize.as_ref();
        let configured = opt.and_then(|o| o.objective.as_deref());
        let objective = match objective_override.or(configured) {
            Some(name) => Objective::new(name).map_err(|err| err.to_string())?,
            None => Objective::default(),
        };
        Ok(GridSearchOptions::default()
            .with_objective(objective)
            .parallel(opt.and_then(|o| o.parallel).unwrap_or(false)))
    }

    /// Rejects anything the engine would refuse, before touching data.
    pub fn validate(&self) -> Result<(), String> {
        let run_id = self.run.run_id.trim();
        if run_id.is_empty() {
            return Err("run.run_id cannot be empty".to_string());
        }
        if run_id.contains(['/', '\\']) || run_id == "." || run_id == ".." {
            return Err(format!("run.run_id must be a plain directory name: {}", run_id));
        }
        if self.paths.out_dir.trim().is_empty() {
            return Err("paths.out_dir cannot be empty".to_string());
        }

        self.simulation_config()?
            .validate()
            .map_err(|err| err.to_string())?;
        self.performance_config()
            .validate()
            .map_err(|err| err.to_string())?;
        StrategyKind::from_params(&self.strategy.kind, &self.strategy_params())
            .map_err(|err| err.to_string())?;

        if let Some(grid) = self.parameter_grid() {
            grid.validate().map_err(|err| err.to_string())?;
            self.grid_search_options(None)?;
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config, String> {
    let (config, _source) = load_config_with_source(path)?;
    Ok(config)
}

pub fn load_config_with_source(path: &Path) -> Result<(Config, String), String> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("failed to read config {}: {}", path.display(), err))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|err| format!("failed to parse TOML {}: {}", path.display(), err))?;
    config.validate()?;
    Ok((config, contents))
}
