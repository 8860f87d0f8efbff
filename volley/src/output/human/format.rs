use std::time::Duration;

/// Renders `d` as one rounded component in us, ms or s.
pub(crate) fn format_duration(d: Duration) -> String {
    const NS_PER_US: u128 = 1_000;
    const NS_PER_MS: u128 = 1_000_000;
    const NS_PER_S: u128 = 1_000_000_000;

    fn round_div(value: u128, unit: u128) -> u128 {
        (value + (unit / 2)) / unit
    }

    let total_ns = d.as_nanos();
    if total_ns >= NS_PER_S {
        return format!("{}s", round_div(total_ns, NS_PER_S));
    }
    if total_ns >= NS_PER_MS {
        return format!("{}ms", round_div(total_ns, NS_PER_MS));
    }
    format!("{}us", round_div(total_ns, NS_PER_US))
}

/// Latency in microseconds, with two decimals above one millisecond.
pub(crate) fn format_micros(us: f64) -> String {
    if !us.is_finite() || us < 0.0 {
        return "n/a".to_string();
    }
    if us >= 1_000_000.0 {
        return format!("{:.2}s", us / 1_000_000.0);
    }
    if us >= 1_000.0 {
        return format!("{:.2}ms", us / 1_000.0);
    }
    format!("{us:.0}us")
}

pub(crate) fn format_percent(part: u64, total: u64) -> String {
    if total == 0 {
        return "0.00%".to_string();
    }
    format!("{:.2}%", (part as f64) * 100.0 / (total as f64))
}

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.1}")
    } else {
        "0".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_use_a_single_unit() {
        assert_eq!(format_duration(Duration::from_micros(250)), "250us");
        assert_eq!(format_duration(Duration::from_micros(1_499)), "1ms");
        assert_eq!(format_duration(Duration::from_millis(1_500)), "2s");
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
    }

    #[test]
    fn micros_pick_a_readable_unit() {
        assert_eq!(format_micros(850.0), "850us");
        assert_eq!(format_micros(12_346.0), "12.35ms");
        assert_eq!(format_micros(2_500_000.0), "2.50s");
        assert_eq!(format_micros(f64::NAN), "n/a");
    }

    #[test]
    fn percent_and_rate() {
        assert_eq!(format_percent(1, 4), "25.00%");
        assert_eq!(format_percent(0, 0), "0.00%");
        assert_eq!(format_rate(99.96), "100.0");
        assert_eq!(format_rate(f64::INFINITY), "0");
    }
}
