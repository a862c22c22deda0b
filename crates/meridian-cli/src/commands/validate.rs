use meridian_core::engine_name;
use std::path::PathBuf;

pub(super) fn run_validate(config_path: PathBuf, strict: bool) -> Result<(), String> {
    let config = crate::config::load_config(&config_path)?;
    super::common::print_config_summary("validate", &config, None);

    let (prices, quality) = super::common::load_prices(&config)?;
    super::common::print_quality("prices", &quality);
    let mut clean = quality.is_clean();

    if let Some((benchmark, bench_quality)) = super::common::load_benchmark(&config)? {
        super::common::print_quality("benchmark", &bench_quality);
        clean &= bench_quality.is_clean();
        let aligned = super::common::align_benchmark(&prices, &benchmark);
        let missing = aligned.iter().filter(|p| p.price.is_nan()).count();
        if missing > 0 {
            println!("benchmark: {} of {} traded dates missing", missing, aligned.len());
            clean = false;
        }
    }

    if let Some(grid) = config.parameter_grid() {
        println!(
            "optimize: {} combinations over {:?}",
            grid.combinations(),
            grid.params().iter().map(|p| p.name.as_str()).collect::<Vec<_>>()
        );
    }

    if strict && !clean {
        return Err("data quality issues found (strict mode)".to_string());
    }
    println!("{} cli: validate ok (rows={})", engine_name(), prices.len());
    Ok(())
}
