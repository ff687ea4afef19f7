/// In-place progress bars
///
/// Downloads, exploits and ssh connects take a synthetic amount of time
/// derived from the user's own resources; the bar redraws on one terminal
/// line at ~20 Hz for the duration.

use std::time::Duration;

use colored::Colorize;
use termsh_core::types::Resources;

use crate::session::Outbound;
use crate::style;

pub const DOWNLOAD_BASE: f64 = 3.0;
pub const EXPLOIT_BASE: f64 = 2.5;
pub const SSH_BASE: f64 = 1.5;

const FRAME_MS: u64 = 50;
const BAR_WIDTH: usize = 24;

/// duration = base / clamp(0.5, 2.0, 0.5·avg + 0.5) where avg averages the
/// resource components against the starting loadout.
pub fn duration_for(resources: &Resources, base_secs: f64) -> Duration {
    let avg = (resources.cpu as f64 / 200.0
        + resources.bandwidth / 300.0
        + resources.ram as f64 / 24.0)
        / 3.0;
    let factor = (0.5 * avg + 0.5).clamp(0.5, 2.0);
    Duration::from_secs_f64(base_secs / factor)
}

/// Animate a labelled bar for `duration`, ending on a completed bar and a
/// newline.
pub async fn run(out: &Outbound, label: &str, duration: Duration) {
    let frames = (duration.as_millis() as u64 / FRAME_MS).max(1);
    for frame in 0..=frames {
        let ratio = frame as f64 / frames as f64;
        let filled = (ratio * BAR_WIDTH as f64).round() as usize;
        let bar = format!(
            "{}{}",
            "█".repeat(filled).bright_green(),
            "░".repeat(BAR_WIDTH - filled)
        );
        out.send(&format!(
            "{}{} [{}] {:>3.0}%",
            style::CLEAR_LINE,
            label,
            bar,
            ratio * 100.0
        ));
        if frame < frames {
            tokio::time::sleep(Duration::from_millis(FRAME_MS)).await;
        }
    }
    out.send(style::NEWLINE);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_scales_with_resources() {
        // the starting loadout averages to factor 1.0
        let starting = Resources::new(200, 300.0, 24);
        assert!((duration_for(&starting, 3.0).as_secs_f64() - 3.0).abs() < 1e-9);

        // a beefy loadout caps at 2x speed
        let beefy = Resources::new(2000, 3000.0, 240);
        assert!((duration_for(&beefy, 3.0).as_secs_f64() - 1.5).abs() < 1e-9);

        // an empty loadout bottoms out at half speed
        let broke = Resources::new(0, 0.0, 0);
        assert!((duration_for(&broke, 3.0).as_secs_f64() - 6.0).abs() < 1e-9);
    }
}
