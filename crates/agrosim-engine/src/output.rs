//! Day callback that writes observations as JSON lines.
//!
//! Each simulated day becomes one line; the run summary is written as a
//! final line wrapped in a `summary` key so readers can tell it apart.

use std::io::Write;

use serde::Serialize;
use tracing::warn;

use agrosim_core::runner::DayCallback;
use agrosim_core::{Observation, RunSummary};

use crate::error::AppError;

#[derive(Serialize)]
struct SummaryLine<'a> {
    summary: &'a RunSummary,
}

/// Writes one JSON object per simulated day.
pub struct JsonLinesOutput {
    out: Box<dyn Write + Send>,
    lines: u64,
    failed: bool,
}

impl JsonLinesOutput {
    /// Write to `out`.
    pub const fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out,
            lines: 0,
            failed: false,
        }
    }

    /// Number of daily lines written.
    pub const fn lines(&self) -> u64 {
        self.lines
    }

    fn write_line<T: Serialize>(&mut self, value: &T) -> Result<(), AppError> {
        serde_json::to_writer(&mut self.out, value)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    /// Append the run summary and flush.
    pub fn finish(mut self, summary: &RunSummary) -> Result<(), AppError> {
        self.write_line(&SummaryLine { summary })?;
        self.out.flush()?;
        Ok(())
    }
}

impl DayCallback for JsonLinesOutput {
    fn on_day(&mut self, observation: &Observation) {
        if self.failed {
            return;
        }
        match self.write_line(observation) {
            Ok(()) => self.lines = self.lines.saturating_add(1),
            Err(e) => {
                warn!(day = %observation.day, error = %e, "Daily output failed, further days are not written");
                self.failed = true;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use chrono::NaiveDate;

    use agrosim_core::RunEndReason;
    use agrosim_types::RunId;

    use super::*;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 3, d).unwrap()
    }

    #[test]
    fn one_line_per_day_then_summary() {
        let sink = Shared::default();
        let mut output = JsonLinesOutput::new(Box::new(sink.clone()));
        for d in 1..=3 {
            output.on_day(&Observation {
                day: day(d),
                values: BTreeMap::new(),
                stage: None,
                terminated: d == 3,
            });
        }
        assert_eq!(output.lines(), 3);

        let summary = RunSummary {
            run_id: RunId::new(),
            start: day(1),
            end: day(3),
            days_run: 3,
            end_reason: RunEndReason::Terminated,
            crops: Vec::new(),
            water_balance_checksum: Some(0.0),
        };
        output.finish(&summary).unwrap();

        let text = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines.first().unwrap()["day"], "2021-03-01");
        assert_eq!(lines.get(2).unwrap()["terminated"], true);
        assert_eq!(lines.last().unwrap()["summary"]["end_reason"], "terminated");
        assert_eq!(lines.last().unwrap()["summary"]["days_run"], 3);
    }
}
