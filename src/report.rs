use std::fmt::Write;

use crate::features::FEATURE_NAMES;
use crate::models::{Dashboard, Kpis, Prediction, SensitivityCurve, TrendOverlay};

const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Rows shown per sensitivity table; the full curve is in the JSON output.
const CURVE_TABLE_ROWS: usize = 11;

pub fn format_currency(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if rounded < 0.0 {
        format!("-${grouped}")
    } else {
        format!("${grouped}")
    }
}

pub fn format_percent(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{value:+.2}%"),
        None => "n/a".to_string(),
    }
}

/// One character per value, scaled between the series minimum and maximum.
pub fn sparkline(values: &[f64]) -> String {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    values
        .iter()
        .map(|value| {
            if span <= 0.0 || !span.is_finite() {
                SPARK_LEVELS[SPARK_LEVELS.len() / 2]
            } else {
                let level = ((value - min) / span * (SPARK_LEVELS.len() - 1) as f64).round();
                SPARK_LEVELS[level as usize]
            }
        })
        .collect()
}

pub fn build_report(dashboard: &Dashboard) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Weekly Sales Forecast");
    let _ = writeln!(
        output,
        "Store {} for the week of {} (render {})",
        dashboard.store_id, dashboard.date, dashboard.render_id
    );
    if dashboard.base_date != dashboard.date {
        let _ = writeln!(
            output,
            "No record for this week; inputs start from the week of {}.",
            dashboard.base_date
        );
    }
    let _ = writeln!(output);

    write_kpis(&mut output, &dashboard.kpis);
    write_inputs(&mut output, &dashboard.prediction);
    write_trend(&mut output, &dashboard.trend);

    let _ = writeln!(output, "## Sensitivity Analysis");
    let _ = writeln!(
        output,
        "Sales response around the current operating point ({}).",
        format_currency(dashboard.prediction.value)
    );
    for curve in &dashboard.sensitivity {
        let _ = writeln!(output);
        write_curve(&mut output, curve);
    }

    output
}

fn write_kpis(output: &mut String, kpis: &Kpis) {
    let _ = writeln!(output, "## Key Figures");
    let _ = writeln!(
        output,
        "- Predicted weekly sales: {}",
        format_currency(kpis.predicted_sales)
    );
    let _ = writeln!(
        output,
        "- Average store sales: {}",
        kpis.average_sales
            .map(format_currency)
            .unwrap_or_else(|| "n/a".to_string())
    );
    let _ = writeln!(
        output,
        "- Change vs average: {}",
        format_percent(kpis.delta_percent)
    );
    let _ = writeln!(output);
}

fn write_inputs(output: &mut String, prediction: &Prediction) {
    let inputs = &prediction.inputs;
    let _ = writeln!(output, "## Inputs");
    let _ = writeln!(
        output,
        "Holiday week: {} | Temperature: {:.1}°F | Fuel: ${:.3}/gal | CPI: {:.2} | Unemployment: {:.2}%",
        if inputs.holiday_flag { "yes" } else { "no" },
        inputs.temperature,
        inputs.fuel_price,
        inputs.cpi,
        inputs.unemployment
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "| Feature | Value |");
    let _ = writeln!(output, "|---|---|");
    for (name, value) in FEATURE_NAMES.iter().zip(prediction.features.as_slice()) {
        let _ = writeln!(output, "| {name} | {value:.4} |");
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "| Model | Prediction |");
    let _ = writeln!(output, "|---|---|");
    for member in &prediction.members {
        let _ = writeln!(output, "| {} | {} |", member.model, format_currency(member.value));
    }
    let _ = writeln!(output, "| ensemble (mean) | {} |", format_currency(prediction.value));
    let _ = writeln!(output);
}

fn write_trend(output: &mut String, trend: &TrendOverlay) {
    let _ = writeln!(output, "## Recent Sales Trend");

    if trend.points.is_empty() {
        let _ = writeln!(output, "No recorded sales for this store yet.");
        let _ = writeln!(output);
        return;
    }

    let actual: Vec<f64> = trend.points.iter().map(|p| p.actual_sales).collect();
    let predicted: Vec<f64> = trend.points.iter().map(|p| p.predicted_sales).collect();
    let _ = writeln!(output, "Actual:    {}", sparkline(&actual));
    let _ = writeln!(output, "Predicted: {}", sparkline(&predicted));
    let _ = writeln!(output);
    let _ = writeln!(output, "| Week | Actual | Predicted | Current prediction |");
    let _ = writeln!(output, "|---|---|---|---|");
    for point in &trend.points {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} |",
            point.date,
            format_currency(point.actual_sales),
            format_currency(point.predicted_sales),
            format_currency(trend.reference)
        );
    }
    let _ = writeln!(output);
}

fn write_curve(output: &mut String, curve: &SensitivityCurve) {
    let ys: Vec<f64> = curve.points.iter().map(|p| p.y).collect();
    let _ = writeln!(output, "### {}", curve.feature.label());
    let _ = writeln!(output, "{}", sparkline(&ys));
    let _ = writeln!(
        output,
        "Current: {:.2} -> {}",
        curve.operating_point.x,
        format_currency(curve.operating_point.y)
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "| {} | Predicted |", curve.feature.label());
    let _ = writeln!(output, "|---|---|");

    let last = curve.points.len().saturating_sub(1);
    let rows = CURVE_TABLE_ROWS.min(curve.points.len());
    for row in 0..rows {
        let index = if rows <= 1 { 0 } else { row * last / (rows - 1) };
        let point = curve.points[index];
        let _ = writeln!(output, "| {:.2} | {} |", point.x, format_currency(point.y));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DashboardSettings;
    use crate::dashboard::{Controller, Selection};
    use crate::ensemble::Ensemble;
    use crate::fixtures::{self, Constant};
    use crate::models::WhatIf;

    #[test]
    fn currency_groups_thousands() {
        assert_eq!(format_currency(0.0), "$0");
        assert_eq!(format_currency(999.4), "$999");
        assert_eq!(format_currency(1_643_690.9), "$1,643,691");
        assert_eq!(format_currency(-12_500.0), "-$12,500");
    }

    #[test]
    fn percent_is_signed() {
        assert_eq!(format_percent(Some(3.456)), "+3.46%");
        assert_eq!(format_percent(Some(-0.5)), "-0.50%");
        assert_eq!(format_percent(None), "n/a");
    }

    #[test]
    fn sparkline_spans_lowest_to_highest_level() {
        let line = sparkline(&[1.0, 5.0, 9.0]);
        assert_eq!(line.chars().count(), 3);
        assert!(line.starts_with('▁'));
        assert!(line.ends_with('█'));
        assert_eq!(sparkline(&[4.0, 4.0]), "▅▅");
    }

    #[test]
    fn report_contains_every_panel() {
        let dataset = fixtures::history(&[1], 12);
        let ensemble = Ensemble::new(vec![
            Box::new(Constant::new("bagged_trees", 100.0)),
            Box::new(Constant::new("gradient_boosting", 200.0)),
            Box::new(Constant::new("stochastic_boosting", 300.0)),
        ])
        .unwrap();
        let settings = DashboardSettings::default();
        let controller = Controller::new(&dataset, &ensemble, &settings);
        let dashboard = controller
            .render(&Selection {
                store_id: 1,
                date: fixtures::date("2011-03-25"),
                what_if: WhatIf::default(),
            })
            .unwrap();

        let report = build_report(&dashboard);
        assert!(report.contains("# Weekly Sales Forecast"));
        assert!(report.contains("- Predicted weekly sales: $200"));
        assert!(report.contains("## Recent Sales Trend"));
        assert!(report.contains("| gradient_boosting | $200 |"));
        assert!(report.contains("### Temperature (°F)"));
        assert!(report.contains("### Unemployment Rate (%)"));
        assert!(!report.contains("No record for this week"));
    }
}
