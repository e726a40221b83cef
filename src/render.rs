use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::progress::{ProgressSink, ProgressSnapshot};

/// Terminal renderer: one header line with the aggregate rate plus one bar
/// per task. Consumes engine snapshots; all byte counts, percentages and
/// rates come from the snapshot, never from indicatif's own bookkeeping.
pub struct MultiBarRenderer {
    multi: MultiProgress,
    header: ProgressBar,
    bars: Vec<ProgressBar>,
}

impl MultiBarRenderer {
    pub fn new() -> Self {
        let multi = MultiProgress::new();
        // Draw to stderr so piped stdout stays clean
        multi.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));

        let header = multi.add(ProgressBar::new(0));
        header.set_style(
            ProgressStyle::default_bar()
                .template("{msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        Self {
            multi,
            header,
            bars: Vec::new(),
        }
    }

    fn ensure_bars(&mut self, count: usize) {
        while self.bars.len() < count {
            let bar = self.multi.add(ProgressBar::new(0));
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("[{bar:40.cyan/blue}] {bytes:>10}/{total_bytes:<10} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=>-"),
            );
            self.bars.push(bar);
        }
    }

    /// Freeze all bars at their final state.
    pub fn finish(&self) {
        for bar in &self.bars {
            bar.finish();
        }
        self.header.finish();
    }
}

impl Default for MultiBarRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for MultiBarRenderer {
    fn render(&mut self, snapshot: &ProgressSnapshot) {
        self.ensure_bars(snapshot.rows.len());
        self.header
            .set_message(format!("Total: {}/s", HumanBytes(snapshot.total_rate)));
        self.header.tick();

        for (bar, row) in self.bars.iter().zip(&snapshot.rows) {
            bar.set_length(row.total);
            bar.set_position(row.downloaded);
            bar.set_message(format!(
                "{:>10}/s {:>3}% {}",
                HumanBytes(row.rate),
                row.percent,
                row.filename
            ));
        }
    }
}
