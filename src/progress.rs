use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner for enumeration and filtering; hidden unless `enabled`
pub fn create_spinner(msg: &str, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Submission progress bar; hidden unless `enabled`
pub fn create_progress_bar(total: u64, msg: &str, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░"),
    );
    pb.set_message(msg.to_string());
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_bars_are_hidden() {
        let bar = create_progress_bar(10, "Submitting", false);
        assert!(bar.is_hidden());
        bar.inc(3);
        assert_eq!(bar.position(), 3);

        assert!(create_spinner("Enumerating", false).is_hidden());
    }
}
