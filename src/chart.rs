//! Candlestick + volume chart rendering.

use plotters::prelude::*;
use tracing::{debug, info};

use crate::error::BotError;
use crate::market::{Candle, Timeframe};

const WIDTH: u32 = 1000;
const HEIGHT: u32 = 600;
const PRICE_PANEL_HEIGHT: i32 = 430;

const BACKGROUND: RGBColor = RGBColor(18, 18, 18);
const FOREGROUND: RGBColor = RGBColor(220, 220, 220);
const GAIN: RGBColor = RGBColor(38, 166, 154);
const LOSS: RGBColor = RGBColor(239, 83, 80);

/// Reject series that cannot be drawn.
fn validate(series: &[Candle]) -> Result<(), BotError> {
    if series.is_empty() {
        return Err(BotError::RenderFailure("empty series".into()));
    }
    for c in series {
        if ![c.open, c.high, c.low, c.close, c.volume].iter().all(|v| v.is_finite()) {
            return Err(BotError::RenderFailure(format!("non-numeric values on {}", c.date)));
        }
    }
    if let Some(w) = series.windows(2).find(|w| w[0].date >= w[1].date) {
        return Err(BotError::RenderFailure(format!(
            "timestamps not ascending at {} -> {}",
            w[0].date, w[1].date
        )));
    }
    Ok(())
}

/// Render the series as PNG bytes.
pub fn render_chart(series: &[Candle], symbol: &str, timeframe: Timeframe) -> Result<Vec<u8>, BotError> {
    validate(series)?;

    let file = tempfile::Builder::new()
        .prefix("cryptogem_chart_")
        .suffix(".png")
        .tempfile()
        .map_err(|e| BotError::RenderFailure(format!("Failed to create chart file: {e}")))?;

    draw(file.path(), series, symbol, timeframe)
        .map_err(|e| BotError::RenderFailure(e.to_string()))?;

    let png = std::fs::read(file.path())
        .map_err(|e| BotError::RenderFailure(format!("Failed to read chart file: {e}")))?;

    info!("📊 Chart rendered for {symbol} ({timeframe}): {} candles, {} bytes", series.len(), png.len());
    Ok(png)
}

fn draw(
    path: &std::path::Path,
    series: &[Candle],
    symbol: &str,
    timeframe: Timeframe,
) -> Result<(), Box<dyn std::error::Error>> {
    let root = BitMapBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&BACKGROUND)?;

    let root = root.titled(
        &format!("{symbol}/USD Price Chart ({timeframe})"),
        ("sans-serif", 28.0).into_font().color(&FOREGROUND),
    )?;
    let (upper, lower) = root.split_vertically(PRICE_PANEL_HEIGHT);

    let low = series.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let high = series.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    let padding = ((high - low) * 0.05).max(high.abs() * 1e-4).max(1e-8);
    let max_volume = series.iter().map(|c| c.volume).fold(0.0, f64::max).max(1e-8);

    let x_range = -0.5f64..(series.len() as f64 - 0.5);
    let date_label = |x: &f64| {
        let idx = x.round();
        if idx < 0.0 {
            return String::new();
        }
        series
            .get(idx as usize)
            .map(|c| c.date.format("%m-%d").to_string())
            .unwrap_or_default()
    };
    let label_style = ("sans-serif", 14.0).into_font().color(&FOREGROUND);

    let mut price_chart = ChartBuilder::on(&upper)
        .margin(10)
        .x_label_area_size(0)
        .y_label_area_size(80)
        .build_cartesian_2d(x_range.clone(), (low - padding)..(high + padding))?;

    price_chart
        .configure_mesh()
        .light_line_style(BACKGROUND)
        .bold_line_style(FOREGROUND.mix(0.15))
        .axis_style(FOREGROUND.mix(0.6))
        .y_desc("Price (USD)")
        .label_style(label_style.clone())
        .axis_desc_style(label_style.clone())
        .draw()?;

    let body_width = (((WIDTH - 100) / series.len().max(1) as u32) * 6 / 10).clamp(1, 30);
    price_chart.draw_series(series.iter().enumerate().map(|(i, c)| {
        CandleStick::new(i as f64, c.open, c.high, c.low, c.close, GAIN.filled(), LOSS.filled(), body_width)
    }))?;

    let mut volume_chart = ChartBuilder::on(&lower)
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(80)
        .build_cartesian_2d(x_range, 0.0..max_volume * 1.1)?;

    volume_chart
        .configure_mesh()
        .light_line_style(BACKGROUND)
        .bold_line_style(FOREGROUND.mix(0.15))
        .axis_style(FOREGROUND.mix(0.6))
        .y_desc("Volume")
        .x_labels(series.len().min(12))
        .x_label_formatter(&date_label)
        .label_style(label_style.clone())
        .axis_desc_style(label_style)
        .draw()?;

    volume_chart.draw_series(series.iter().enumerate().map(|(i, c)| {
        let color = if c.close >= c.open { GAIN } else { LOSS };
        Rectangle::new([(i as f64 - 0.3, 0.0), (i as f64 + 0.3, c.volume)], color.mix(0.7).filled())
    }))?;

    root.present()?;
    debug!("Chart written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn candle(day: u32, close: f64) -> Candle {
        Candle {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: 100.0,
            high: 120.0,
            low: 90.0,
            close,
            volume: 500.0,
        }
    }

    #[test]
    fn test_empty_series_fails() {
        assert!(matches!(render_chart(&[], "BTC", Timeframe::Day), Err(BotError::RenderFailure(_))));
    }

    #[test]
    fn test_nan_values_fail() {
        let series = vec![candle(1, 101.0), candle(2, f64::NAN)];
        let err = render_chart(&series, "BTC", Timeframe::Week).unwrap_err();
        assert!(matches!(err, BotError::RenderFailure(ref m) if m.contains("2024-01-02")));
    }

    #[test]
    fn test_non_monotonic_dates_fail() {
        let series = vec![candle(2, 101.0), candle(1, 99.0)];
        assert!(matches!(validate(&series), Err(BotError::RenderFailure(_))));

        let duplicated = vec![candle(1, 101.0), candle(1, 99.0)];
        assert!(matches!(validate(&duplicated), Err(BotError::RenderFailure(_))));
    }

    #[test]
    fn test_valid_series_passes_validation() {
        let series: Vec<Candle> = (1..=7).map(|d| candle(d, 95.0 + d as f64)).collect();
        assert!(validate(&series).is_ok());
    }

    #[test]
    fn test_week_series_renders_png() {
        let series: Vec<Candle> = (1..=7).map(|d| candle(d, 95.0 + d as f64)).collect();
        let png = render_chart(&series, "ETH", Timeframe::Week).unwrap();
        assert!(png.starts_with(b"\x89PNG"));
        assert!(png.len() > 1000);
    }
}
