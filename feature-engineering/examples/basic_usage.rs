//! Example usage of the feature layer

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use feature_engineering::{
    calculate_price_trend, change_point_scores, compute_matrix_profile_metrics, compute_vpin,
    fit_exponential_hawkes, FeatureConfig, FeatureEngine, HawkesFitOptions, MatrixProfileEngine,
    Quote, Trade, WindowBatch, WindowKey,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    println!("=== Feature Layer Example ===\n");

    let key = WindowKey::new("AAPL", NaiveDate::from_ymd_opt(2024, 1, 2).unwrap_or_default(), "am");
    let open = Utc
        .with_ymd_and_hms(2024, 1, 2, 9, 30, 0)
        .single()
        .ok_or_else(|| anyhow::anyhow!("invalid session open"))?;
    let mut rng = fastrand::Rng::with_seed(7);

    // Synthetic session: a level shift halfway through
    let mids: Vec<f64> = (0..200)
        .map(|i| (if i < 100 { 100.0 } else { 100.8 }) + (rng.f64() - 0.5) * 0.1)
        .collect();
    let quotes: Vec<Quote> = mids
        .iter()
        .enumerate()
        .map(|(i, &mid)| Quote {
            key: key.clone(),
            timestamp: open + Duration::seconds(i as i64 * 5),
            bid_price: mid - 0.02,
            bid_size: 200.0 + rng.f64() * 100.0,
            ask_price: mid + 0.02,
            ask_size: 200.0 + rng.f64() * 100.0,
        })
        .collect();
    let trades: Vec<Trade> = mids
        .iter()
        .enumerate()
        .map(|(i, &mid)| Trade {
            key: key.clone(),
            timestamp: open + Duration::seconds(i as i64 * 5 + 2),
            price: mid + if rng.bool() { 0.02 } else { -0.02 },
            size: 50.0 + rng.f64() * 150.0,
        })
        .collect();

    // Example 1: Run every feature with one engine
    println!("Example 1: Feature Engine");
    let mut config = FeatureConfig::default();
    config.vpin.bucket_volume = 1_000.0;
    config.vpin.rolling_bars = 10;
    config.matrix_profile.subseq_length = 16;
    let engine = FeatureEngine::with_config(config)?;
    let report = engine.run(&WindowBatch {
        quotes: quotes.clone(),
        trades: trades.clone(),
        events: Vec::new(),
    })?;
    for row in &report.ofi {
        println!(
            "  OFI: {:.1} over {} transitions (qc: {})",
            row.ofi, row.ofi_obs, row.ofi_qc_pass
        );
    }
    for row in &report.spreads {
        println!("  Avg spread: {:.4} ({:.6} relative)", row.avg_spread, row.avg_rel_spread);
    }
    println!();

    // Example 2: VPIN directly
    println!("Example 2: VPIN");
    for row in compute_vpin(&trades, 1_000.0, 10)? {
        println!(
            "  VPIN: {:.3} (change {:+.3}, {} buckets)\n",
            row.vpin, row.vpin_change, row.vpin_buckets
        );
    }

    // Example 3: Matrix Profile on the mid series
    println!("Example 3: Matrix Profile");
    let mp = compute_matrix_profile_metrics(&mids, 16, 3, Some(MatrixProfileEngine::Accelerated))?;
    println!("  Engine: {} (fell back: {})", mp.engine, mp.fell_back);
    println!("  Discord: {:.3} at {:?}", mp.discord_dist, mp.discord_index);
    println!("  Motifs: {:?}\n", mp.motif_counts);

    // Example 4: Change points with the online detector
    println!("Example 4: Change Points");
    let cp = change_point_scores(&mids, 8.0, 10, None, true, 200.0, Some(100))?;
    println!("  Breakpoints: {:?}", cp.breakpoints);
    println!("  Deltas: {:?}", cp.deltas);
    if let Some(probs) = &cp.bocpd_probabilities {
        let peak = probs.iter().cloned().fold(0.0, f64::max);
        println!("  Peak change probability: {:.3}\n", peak);
    }

    // Example 5: Hawkes fit on trade arrival times
    println!("Example 5: Hawkes Self-Excitation");
    let arrivals: Vec<f64> = trades
        .iter()
        .filter(|t| t.size > 150.0)
        .map(|t| (t.timestamp - open).num_milliseconds() as f64 / 1_000.0)
        .collect();
    let fit = fit_exponential_hawkes(&arrivals, &HawkesFitOptions::default())?;
    println!("  Events: {}", fit.n_events);
    println!("  Branching ratio: {:.3}", fit.branching_ratio);
    println!("  Converged: {} (poisson fallback: {})\n", fit.converged, fit.poisson_fallback);

    // Example 6: Price trend
    println!("Example 6: Price Trend");
    let closes: Vec<f64> = (0..25).map(|d| 180.0 + d as f64 * 0.5).collect();
    let trend = calculate_price_trend(&closes);
    println!("  5d return: {:.2}%", trend.ret_5d * 100.0);
    println!("  20d high: {}, trend up: {}\n", trend.high_20d, trend.trend_up);

    println!("=== Example Complete ===");

    Ok(())
}
