use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fmt;
use std::io::IsTerminal;

/// Long-running loops that report progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProgressStage {
    SnapshotIngest,
    TetrachoricPairs,
    PupilScoring,
}

impl ProgressStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::SnapshotIngest => "census snapshot ingestion",
            Self::TetrachoricPairs => "tetrachoric correlations",
            Self::PupilScoring => "pupil factor scoring",
        }
    }
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for incremental progress inside a stage.
pub trait ProgressObserver {
    fn on_stage_start(&mut self, stage: ProgressStage, total: usize) {
        let _ = (stage, total);
    }
    fn on_stage_advance(&mut self, stage: ProgressStage, processed: usize) {
        let _ = (stage, processed);
    }
    fn on_stage_finish(&mut self, stage: ProgressStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopProgress;

impl ProgressObserver for NoopProgress {}

/// Draws one bar per stage on stderr when it is a terminal.
#[derive(Default)]
pub struct TerminalProgress {
    bar: Option<ProgressBar>,
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());
    pb
}

impl ProgressObserver for TerminalProgress {
    fn on_stage_start(&mut self, stage: ProgressStage, total: usize) {
        self.bar = Some(create_progress_bar(total as u64, stage.describe()));
    }

    fn on_stage_advance(&mut self, stage: ProgressStage, processed: usize) {
        let _ = stage;
        if let Some(bar) = &self.bar {
            bar.set_position(processed as u64);
        }
    }

    fn on_stage_finish(&mut self, stage: ProgressStage) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message(format!("{} complete", stage.describe()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<(ProgressStage, usize)>,
    }

    impl ProgressObserver for Recorder {
        fn on_stage_advance(&mut self, stage: ProgressStage, processed: usize) {
            self.events.push((stage, processed));
        }
    }

    #[test]
    fn test_default_methods_are_optional() {
        let mut recorder = Recorder::default();
        recorder.on_stage_start(ProgressStage::PupilScoring, 3);
        recorder.on_stage_advance(ProgressStage::PupilScoring, 2);
        recorder.on_stage_finish(ProgressStage::PupilScoring);
        assert_eq!(recorder.events, vec![(ProgressStage::PupilScoring, 2)]);
        assert_eq!(ProgressStage::TetrachoricPairs.to_string(), "tetrachoric correlations");
    }
}
