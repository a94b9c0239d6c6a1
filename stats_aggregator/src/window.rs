//! Sliding-window summaries over the tail of the raw logs.
use link_protocol::STATUS_SUCCESS;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl Summary {
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let (mut min, mut max, mut sum) = (f64::INFINITY, f64::NEG_INFINITY, 0.0);
        for &v in values {
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        Some(Self { mean: sum / values.len() as f64, min, max })
    }

    /// Stats row: Timestamp,Mean,Min,Max with two decimals.
    pub fn row(&self, stamp: &str) -> String {
        format!("{stamp},{:.2},{:.2},{:.2}", self.mean, self.min, self.max)
    }
}

fn column(row: &str, idx: usize) -> Option<&str> {
    row.split(',').nth(idx).map(str::trim)
}

/// RSSI values of the last `window` successful rows. Rows whose RSSI does not
/// parse are dropped after windowing, so the result may be shorter.
pub fn rssi_window(rows: &[String], window: usize) -> Vec<f64> {
    let ok: Vec<&String> = rows
        .iter()
        .filter(|r| column(r, 2) == Some(STATUS_SUCCESS))
        .collect();
    let start = ok.len().saturating_sub(window);
    ok[start..]
        .iter()
        .filter_map(|r| column(r, 1)?.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .collect()
}

/// Luminosity values of the last `window` rows.
pub fn luminosity_window(rows: &[String], window: usize) -> Vec<f64> {
    let start = rows.len().saturating_sub(window);
    rows[start..]
        .iter()
        .filter_map(|r| column(r, 1)?.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn summary_of_values() {
        let s = Summary::of(&[-80.0, -70.5, -90.0]).unwrap();
        assert_eq!(s.min, -90.0);
        assert_eq!(s.max, -70.5);
        assert!((s.mean - (-80.166_666)).abs() < 1e-3);
        assert_eq!(s.row("19-10-2026 10:00:00"), "19-10-2026 10:00:00,-80.17,-90.00,-70.50");
        assert!(Summary::of(&[]).is_none());
    }

    #[test]
    fn all_zero_luminosity_summarizes_to_zero() {
        let s = Summary::of(&[0.0, 0.0, 0.0]).unwrap();
        assert_eq!(s.row("t"), "t,0.00,0.00,0.00");
    }

    #[test]
    fn rssi_window_keeps_successful_rows_only() {
        let r = rows(&[
            "t1,-80.00,Success",
            "t2,-81.00,Timeout",
            "t3,-82.00,Success",
            "t4,garbage,Success",
            "t5,-84.00,Success",
        ]);
        // last three successful rows are t3, t4, t5; t4 does not parse
        assert_eq!(rssi_window(&r, 3), vec![-82.0, -84.0]);
        assert_eq!(rssi_window(&r, 10), vec![-80.0, -82.0, -84.0]);
        assert!(rssi_window(&r, 0).is_empty());
    }

    #[test]
    fn luminosity_window_takes_the_tail() {
        let r = rows(&["t1,100", "t2,200", "t3,", "t4,400"]);
        assert_eq!(luminosity_window(&r, 2), vec![400.0]);
        assert_eq!(luminosity_window(&r, 4), vec![100.0, 200.0, 400.0]);
    }
}
