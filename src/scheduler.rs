//! Rate scheduler
//!
//! Writes `"<timestamp> <line>\n"` records to one destination following a
//! Poisson process whose rate can be changed at runtime.
//!
//! The worker keeps a virtual "next emission" instant. Each time the timer
//! fires it draws exponential delays and writes one line per delay until the
//! virtual clock passes the instant the timer fired at. A worker that fell
//! behind therefore catches up in a bounded burst instead of sleeping for
//! delays that already elapsed.
//!
//! ```text
//!   virtual clock:  |--d1--|-d2-|----d3----|
//!   timer fires at:              ^ now
//!   emits:          line1  line2 (d3 ends after now, rearm the timer)
//! ```

use crate::error::Result;
use crate::layout::TimeLayout;
use crate::pacing::Pacer;
use crate::source::LineSource;
use crate::workload::{Control, Destination, EmitStats, Workload};
use chrono::Local;
use crossbeam_channel::{Receiver, Sender, bounded, select};
use std::io::Write;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Layout used when none is configured
pub const DEFAULT_TIME_LAYOUT: &str = "Jan _2 15:04:05.000000000";

/// A running generator bound to one destination
pub struct RateScheduler {
    name: String,
    control: Sender<Control>,
    stats: Arc<EmitStats>,
    handle: Option<JoinHandle<()>>,
}

impl RateScheduler {
    /// Start a worker thread writing lines from `lines` into `dest`.
    ///
    /// A rate of zero starts the scheduler paused.
    pub fn spawn(
        name: impl Into<String>,
        dest: Destination,
        lines: LineSource,
        layout: TimeLayout,
        rate: f64,
    ) -> Result<Self> {
        let name = name.into();
        let (control, rx) = bounded(0);
        let stats = Arc::new(EmitStats::default());

        let worker = SchedulerWorker {
            name: name.clone(),
            dest,
            lines,
            layout,
            pacer: Pacer::new(),
            rate,
            control: rx,
            stats: Arc::clone(&stats),
            record: String::with_capacity(256),
        };
        let handle = thread::Builder::new()
            .name(format!("scheduler-{}", name))
            .spawn(move || worker.run())?;

        Ok(Self {
            name,
            control,
            stats,
            handle: Some(handle),
        })
    }

    pub fn stats(&self) -> &EmitStats {
        &self.stats
    }

    pub fn set_rate(&self, rate: f64) {
        if self.control.send(Control::SetRate(rate)).is_err() {
            warn!(destination = %self.name, rate, "Scheduler already exited, rate ignored");
        }
    }

    /// Stop the worker and join it
    pub fn stop(mut self) {
        // The worker may already be gone after a write failure
        let _ = self.control.send(Control::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(destination = %self.name, "Scheduler thread panicked");
            }
        }
    }
}

impl Workload for RateScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_rate(&self, rate: f64) {
        RateScheduler::set_rate(self, rate)
    }

    fn stats(&self) -> &EmitStats {
        RateScheduler::stats(self)
    }

    fn stop(self: Box<Self>) {
        RateScheduler::stop(*self)
    }
}

enum Wake {
    Rate(f64),
    Due,
    Stop,
}

struct SchedulerWorker {
    name: String,
    dest: Destination,
    lines: LineSource,
    layout: TimeLayout,
    pacer: Pacer,
    rate: f64,
    control: Receiver<Control>,
    stats: Arc<EmitStats>,
    record: String,
}

impl SchedulerWorker {
    fn run(mut self) {
        info!(destination = %self.name, rate = self.rate, "Scheduler started");

        let mut next = Instant::now();
        let mut deadline = (self.rate > 0.0).then_some(next);

        loop {
            let timer = match deadline {
                Some(at) => crossbeam_channel::at(at),
                None => crossbeam_channel::never(),
            };

            let wake = select! {
                recv(self.control) -> msg => match msg {
                    Ok(Control::SetRate(rate)) => Wake::Rate(rate),
                    Ok(Control::Stop) | Err(_) => Wake::Stop,
                },
                recv(timer) -> _ => Wake::Due,
            };

            match wake {
                Wake::Rate(rate) => {
                    debug!(destination = %self.name, rate, "Rate changed");
                    self.rate = rate;
                    next = Instant::now();
                    deadline = (rate > 0.0).then_some(next);
                }
                Wake::Due => match self.emit_due(&mut next) {
                    Ok(due) => deadline = due,
                    Err(e) => {
                        EmitStats::incr(&self.stats.write_errors);
                        error!(destination = %self.name, error = %e, "Write failed, scheduler aborted");
                        break;
                    }
                },
                Wake::Stop => break,
            }
        }

        info!(
            destination = %self.name,
            emitted = self.stats.emitted(),
            "Scheduler stopped"
        );
    }

    /// Emit every line whose virtual emission time is not after now.
    /// Returns the next deadline, or `None` when paused.
    fn emit_due(&mut self, next: &mut Instant) -> std::io::Result<Option<Instant>> {
        let now = Instant::now();
        loop {
            let Some(delay) = self.pacer.next_delay(self.rate) else {
                return Ok(None);
            };
            let Some(advanced) = next.checked_add(delay) else {
                return Ok(None);
            };
            *next = advanced;

            self.write_line()?;

            if *next > now {
                return Ok(Some(*next));
            }
        }
    }

    fn write_line(&mut self) -> std::io::Result<()> {
        use std::fmt::Write as _;

        let stamp = self.layout.format(&Local::now().fixed_offset());
        self.record.clear();
        // Writing into a String cannot fail
        let _ = writeln!(self.record, "{} {}", stamp, self.lines.next_line());
        self.dest.write_all(self.record.as_bytes())?;
        EmitStats::incr(&self.stats.emitted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::CompiledMatcher;
    use crate::workload::testing::{BrokenSink, SharedBuffer};
    use std::time::Duration;

    fn layout() -> TimeLayout {
        TimeLayout::new(DEFAULT_TIME_LAYOUT).unwrap()
    }

    #[test]
    fn test_rate_is_approximately_honoured() {
        let buffer = SharedBuffer::default();
        let scheduler = RateScheduler::spawn(
            "rate",
            Box::new(buffer.clone()),
            LineSource::fixed("payload"),
            layout(),
            2000.0,
        )
        .unwrap();

        thread::sleep(Duration::from_millis(500));
        scheduler.stop();

        let count = buffer.lines().len();
        // Expected ~1000; Poisson noise is ~3%, allow for scheduling jitter
        assert!((600..=1400).contains(&count), "emitted {}", count);
    }

    #[test]
    fn test_lines_are_stamped_and_cycled() {
        let buffer = SharedBuffer::default();
        let lines = LineSource::from_lines(vec!["a".into(), "b".into(), "c".into()]).unwrap();
        let scheduler =
            RateScheduler::spawn("cycle", Box::new(buffer.clone()), lines, layout(), 1000.0)
                .unwrap();
        thread::sleep(Duration::from_millis(100));
        scheduler.stop();

        let matcher = CompiledMatcher::compile(DEFAULT_TIME_LAYOUT).unwrap();
        let lines = buffer.lines();
        assert!(lines.len() >= 6, "only {} lines", lines.len());
        for (i, line) in lines.iter().enumerate() {
            let span = matcher.find(line.as_bytes()).expect("timestamp prefix");
            assert_eq!(span.start, 0);
            assert_eq!(&line[span.end..], format!(" {}", ["a", "b", "c"][i % 3]));
            matcher.layout().parse(&line[span]).unwrap();
        }
    }

    #[test]
    fn test_zero_rate_pauses_and_resumes() {
        let buffer = SharedBuffer::default();
        let scheduler = RateScheduler::spawn(
            "pause",
            Box::new(buffer.clone()),
            LineSource::fixed("x"),
            layout(),
            0.0,
        )
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(scheduler.stats().emitted(), 0);

        scheduler.set_rate(500.0);
        thread::sleep(Duration::from_millis(200));
        assert!(scheduler.stats().emitted() > 0);

        scheduler.set_rate(0.0);
        let paused_at = scheduler.stats().emitted();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(scheduler.stats().emitted(), paused_at);

        scheduler.stop();
    }

    #[test]
    fn test_rate_increase_cuts_long_wait_short() {
        let buffer = SharedBuffer::default();
        let lines = LineSource::from_lines((0..100_000).map(|i| i.to_string()).collect()).unwrap();
        let scheduler =
            RateScheduler::spawn("speedup", Box::new(buffer.clone()), lines, layout(), 0.01)
                .unwrap();

        // First line is due at start; the next one is ~100s out
        let started = Instant::now();
        while scheduler.stats().emitted() == 0 {
            assert!(started.elapsed() < Duration::from_secs(1), "no first line");
            thread::sleep(Duration::from_millis(1));
        }

        scheduler.set_rate(1000.0);
        thread::sleep(Duration::from_millis(100));
        scheduler.stop();

        let lines = buffer.lines();
        assert!(lines.len() >= 30, "only {} lines after speedup", lines.len());
        // Each source line exactly once and in order
        for (i, line) in lines.iter().enumerate() {
            let (_, payload) = line.rsplit_once(' ').unwrap();
            assert_eq!(payload, i.to_string());
        }
    }

    #[test]
    fn test_stop_is_terminal() {
        let buffer = SharedBuffer::default();
        let scheduler = RateScheduler::spawn(
            "stop",
            Box::new(buffer.clone()),
            LineSource::fixed("x"),
            layout(),
            5000.0,
        )
        .unwrap();
        thread::sleep(Duration::from_millis(50));
        scheduler.stop();

        let after_stop = buffer.contents().len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(buffer.contents().len(), after_stop);
    }

    #[test]
    fn test_write_failure_aborts_worker() {
        let scheduler = RateScheduler::spawn(
            "broken",
            Box::new(BrokenSink),
            LineSource::fixed("x"),
            layout(),
            1000.0,
        )
        .unwrap();
        thread::sleep(Duration::from_millis(50));

        assert_eq!(scheduler.stats().emitted(), 0);
        assert_eq!(scheduler.stats().write_errors(), 1);

        // Control calls after the abort must not block
        scheduler.set_rate(10.0);
        scheduler.stop();
    }
}
