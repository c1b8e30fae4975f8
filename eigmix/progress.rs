use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;

/// Observer for loci consumed during accumulation.
///
/// `total_loci` is the source's hint and may be `0` when the length is unknown.
pub trait AccumulationProgressObserver {
    fn on_start(&mut self, total_loci: usize) {
        let _ = total_loci;
    }
    fn on_advance(&mut self, loci: usize) {
        let _ = loci;
    }
    fn on_finish(&mut self) {}
}

#[derive(Default)]
pub struct NoopProgress;

impl AccumulationProgressObserver for NoopProgress {}

/// Terminal progress bar on stderr. Hidden when stderr is not a terminal.
#[derive(Default)]
pub struct ConsoleProgress {
    bar: Option<ProgressBar>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccumulationProgressObserver for ConsoleProgress {
    fn on_start(&mut self, total_loci: usize) {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let len = (total_loci > 0).then_some(total_loci as u64);
        let bar = ProgressBar::with_draw_target(len, draw_target);
        if let Ok(style) = ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} loci ({eta}) {msg}",
        ) {
            bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }
        bar.set_message("relationship matrix");
        self.bar = Some(bar);
    }

    fn on_advance(&mut self, loci: usize) {
        if let Some(bar) = &self.bar {
            bar.inc(loci as u64);
        }
    }

    fn on_finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message("done");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_progress_tracks_position_without_a_terminal() {
        let mut progress = ConsoleProgress::new();
        progress.on_start(1000);
        progress.on_advance(512);
        progress.on_advance(488);
        assert_eq!(progress.bar.as_ref().map(ProgressBar::position), Some(1000));
        progress.on_finish();
        assert!(progress.bar.is_none());
    }
}
