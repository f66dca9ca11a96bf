//! Log replay
//!
//! Re-emits an existing log, one logical event at a time, into a destination.
//! An event is a line, or with a multiline start pattern, a start line plus
//! every following line that does not itself match the pattern.
//!
//! Pacing depends on configuration:
//!
//! 1. With a timestamp matcher, the original spacing between events is
//!    reproduced relative to the first parsed timestamp, and each timestamp
//!    is rewritten to the wall-clock time of its emission.
//! 2. Otherwise, with a positive rate, events leave at Poisson-distributed
//!    intervals.
//! 3. Otherwise events are copied through as fast as the destination takes
//!    them.
//!
//! Events whose timestamp cannot be parsed are written unchanged and
//! without delay.

use crate::error::Result;
use crate::matcher::{self, CompiledMatcher};
use crate::pacing::Pacer;
use crate::workload::{Control, Destination, EmitStats, Workload};
use chrono::{DateTime, FixedOffset, Local};
use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, select};
use regex::bytes::Regex;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// How a replay is paced and segmented
#[derive(Debug, Clone, Default)]
pub struct ReplayConfig {
    /// Time layout, or boundary pattern with one capturing group
    pub timestamp: Option<String>,
    /// Pattern matching the first line of each event; may contain
    /// `{timestamp}`
    pub multiline_start: Option<String>,
    /// Events per second when no timestamp layout is set
    pub rate: f64,
}

// ============================================================================
// EVENT SEGMENTATION
// ============================================================================

/// Splits a byte stream into logical events
pub struct EventReader<R> {
    reader: R,
    start: Option<Regex>,
    pending: Option<Vec<u8>>,
}

impl<R: BufRead> EventReader<R> {
    /// Without a start pattern every line is its own event
    pub fn new(reader: R, start: Option<Regex>) -> Self {
        Self {
            reader,
            start,
            pending: None,
        }
    }

    /// Next event including its line terminators, `None` at end of input.
    /// A final line without a trailing newline is still returned.
    pub fn next_event(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut event = match self.pending.take() {
            Some(line) => line,
            None => {
                let line = self.read_line()?;
                if line.is_empty() {
                    return Ok(None);
                }
                line
            }
        };

        let Some(start) = &self.start else {
            return Ok(Some(event));
        };

        loop {
            let mut line = Vec::new();
            if self.reader.read_until(b'\n', &mut line)? == 0 {
                return Ok(Some(event));
            }
            if start.is_match(strip_newline(&line)) {
                self.pending = Some(line);
                return Ok(Some(event));
            }
            event.extend_from_slice(&line);
        }
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        self.reader.read_until(b'\n', &mut line)?;
        Ok(line)
    }
}

fn strip_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

// ============================================================================
// CLOCK REBASING
// ============================================================================

/// Maps source timestamps onto the wall clock.
///
/// `target = wall_anchor + (t - source_anchor)`, where the anchors are the
/// first parsed source timestamp and the moment it was seen.
#[derive(Debug, Clone, Copy)]
pub struct ReplayClock {
    source_anchor: DateTime<FixedOffset>,
    wall_anchor: Instant,
    wall_anchor_time: DateTime<Local>,
}

/// When an event should leave
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot {
    /// Target is in the future: wait until `until`, stamp with `at`
    Wait {
        until: Instant,
        at: DateTime<Local>,
    },
    /// Target already passed: emit immediately
    Now,
}

impl ReplayClock {
    pub fn anchor(source: DateTime<FixedOffset>) -> Self {
        Self::anchor_at(source, Instant::now(), Local::now())
    }

    pub fn anchor_at(
        source: DateTime<FixedOffset>,
        wall: Instant,
        wall_time: DateTime<Local>,
    ) -> Self {
        Self {
            source_anchor: source,
            wall_anchor: wall,
            wall_anchor_time: wall_time,
        }
    }

    /// Slot for an event stamped `t`, as seen at `now`
    pub fn schedule(&self, t: DateTime<FixedOffset>, now: Instant) -> Slot {
        let offset = t.signed_duration_since(self.source_anchor);
        let Ok(ahead) = offset.to_std() else {
            return Slot::Now;
        };
        match self.wall_anchor.checked_add(ahead) {
            Some(until) if until > now => Slot::Wait {
                until,
                at: self.wall_anchor_time + offset,
            },
            _ => Slot::Now,
        }
    }
}

// ============================================================================
// REPLAYER
// ============================================================================

/// A running replay of one source into one destination
pub struct Replayer {
    name: String,
    control: Sender<Control>,
    stats: Arc<EmitStats>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl Replayer {
    /// Compile `config` and start replaying `source` into `dest`.
    ///
    /// Pattern errors are reported here, before any thread starts.
    pub fn spawn<R>(
        name: impl Into<String>,
        source: R,
        dest: Destination,
        config: &ReplayConfig,
    ) -> Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let name = name.into();
        let timestamp = config
            .timestamp
            .as_deref()
            .map(CompiledMatcher::compile)
            .transpose()?;
        let start = config
            .multiline_start
            .as_deref()
            .map(|pattern| matcher::multiline_start(pattern, timestamp.as_ref()))
            .transpose()?;

        let (control, rx) = bounded(0);
        let stats = Arc::new(EmitStats::default());
        let worker = ReplayWorker {
            name: name.clone(),
            events: EventReader::new(source, start),
            dest,
            timestamp,
            clock: None,
            pacer: Pacer::new(),
            rate: (config.rate > 0.0).then_some(config.rate),
            next: Instant::now(),
            control: rx,
            stats: Arc::clone(&stats),
        };
        let handle = thread::Builder::new()
            .name(format!("replay-{}", name))
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

    /// Change the flat rate. Has no effect on timestamp-paced replays.
    pub fn set_rate(&self, rate: f64) {
        if self.control.send(Control::SetRate(rate)).is_err() {
            debug!(source = %self.name, rate, "Replay already finished, rate ignored");
        }
    }

    /// Wait for the replay to reach the end of its source
    pub fn join(mut self) -> Result<()> {
        self.wait()
    }

    /// Interrupt the replay and wait for it to exit
    pub fn stop(mut self) -> Result<()> {
        let _ = self.control.send(Control::Stop);
        self.wait()
    }

    fn wait(&mut self) -> Result<()> {
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(result)) => result,
            Some(Err(_)) => {
                error!(source = %self.name, "Replay thread panicked");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Workload for Replayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_rate(&self, rate: f64) {
        Replayer::set_rate(self, rate)
    }

    fn stats(&self) -> &EmitStats {
        Replayer::stats(self)
    }

    fn stop(self: Box<Self>) {
        // Failures were already logged by the worker
        let _ = Replayer::stop(*self);
    }
}

enum Wake {
    Elapsed,
    RateChanged,
    Stopped,
}

struct ReplayWorker<R> {
    name: String,
    events: EventReader<R>,
    dest: Destination,
    timestamp: Option<CompiledMatcher>,
    clock: Option<ReplayClock>,
    pacer: Pacer,
    /// `None` until a positive rate is configured: copy through unpaced
    rate: Option<f64>,
    /// Virtual emission clock for flat-rate pacing
    next: Instant,
    control: Receiver<Control>,
    stats: Arc<EmitStats>,
}

impl<R: BufRead> ReplayWorker<R> {
    fn run(mut self) -> Result<()> {
        info!(source = %self.name, "Replay started");
        self.next = Instant::now();

        loop {
            match self.control.try_recv() {
                Ok(Control::SetRate(rate)) => self.set_rate(rate),
                Ok(Control::Stop) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            let event = match self.events.next_event() {
                Ok(Some(event)) => event,
                Ok(None) => {
                    info!(source = %self.name, "Replay reached end of source");
                    break;
                }
                Err(e) => {
                    error!(source = %self.name, error = %e, "Read failed, replay aborted");
                    return Err(e.into());
                }
            };

            let Some(event) = self.pace(event) else {
                break;
            };

            if let Err(e) = self.dest.write_all(&event) {
                EmitStats::incr(&self.stats.write_errors);
                error!(source = %self.name, error = %e, "Write failed, replay aborted");
                return Err(e.into());
            }
            EmitStats::incr(&self.stats.emitted);
        }

        info!(
            source = %self.name,
            events = self.stats.emitted(),
            rewritten = self.stats.rewritten(),
            unparsed = self.stats.unparsed(),
            "Replay stopped"
        );
        Ok(())
    }

    /// Delay according to the pacing mode; `None` if stopped while waiting
    fn pace(&mut self, event: Vec<u8>) -> Option<Vec<u8>> {
        if let Some(matcher) = self.timestamp.take() {
            let paced = self.rebase(&matcher, event);
            self.timestamp = Some(matcher);
            return paced;
        }

        // Virtual clock: an event already due leaves without sleeping
        while let Some(rate) = self.rate {
            let due = self
                .pacer
                .next_delay(rate)
                .and_then(|delay| self.next.checked_add(delay));
            if let Some(due) = due {
                self.next = due;
                if due <= Instant::now() {
                    break;
                }
            }
            match self.wait(due) {
                Wake::Elapsed => break,
                Wake::RateChanged => continue,
                Wake::Stopped => return None,
            }
        }
        Some(event)
    }

    /// A rate change discards any pacing backlog
    fn set_rate(&mut self, rate: f64) {
        self.rate = Some(rate);
        self.next = Instant::now();
    }

    fn rebase(&mut self, matcher: &CompiledMatcher, event: Vec<u8>) -> Option<Vec<u8>> {
        let Some(span) = matcher.find(&event) else {
            return Some(event);
        };
        let parsed = std::str::from_utf8(&event[span.clone()])
            .map_err(|e| e.to_string())
            .and_then(|text| matcher.layout().parse(text).map_err(|e| e.to_string()));
        let t = match parsed {
            Ok(t) => t,
            Err(reason) => {
                EmitStats::incr(&self.stats.unparsed);
                warn!(source = %self.name, error = %reason, "Timestamp not parsed, event passed through");
                return Some(event);
            }
        };

        let clock = *self.clock.get_or_insert_with(|| ReplayClock::anchor(t));
        let at = match clock.schedule(t, Instant::now()) {
            Slot::Wait { until, at } => loop {
                match self.wait(Some(until)) {
                    Wake::Elapsed => break at,
                    Wake::RateChanged => continue,
                    Wake::Stopped => return None,
                }
            },
            Slot::Now => Local::now(),
        };

        let stamp = matcher.layout().format(&at.fixed_offset());
        let mut rewritten = Vec::with_capacity(event.len() + stamp.len());
        rewritten.extend_from_slice(&event[..span.start]);
        rewritten.extend_from_slice(stamp.as_bytes());
        rewritten.extend_from_slice(&event[span.end..]);
        EmitStats::incr(&self.stats.rewritten);
        Some(rewritten)
    }

    /// Sleep until `until` (forever if `None`) while honouring control messages
    fn wait(&mut self, until: Option<Instant>) -> Wake {
        let timer = match until {
            Some(at) => crossbeam_channel::at(at),
            None => crossbeam_channel::never(),
        };
        let msg = select! {
            recv(self.control) -> msg => msg.unwrap_or(Control::Stop),
            recv(timer) -> _ => return Wake::Elapsed,
        };
        match msg {
            Control::SetRate(rate) => {
                self.set_rate(rate);
                Wake::RateChanged
            }
            Control::Stop => Wake::Stopped,
        }
    }
}

/// Replay a whole source synchronously, for callers without a control loop
pub fn replay_to_end<R>(source: R, dest: Destination, config: &ReplayConfig) -> Result<u64>
where
    R: BufRead + Send + 'static,
{
    let replayer = Replayer::spawn("inline", source, dest, config)?;
    let stats = Arc::clone(&replayer.stats);
    replayer.join()?;
    Ok(stats.emitted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::testing::{BrokenSink, SharedBuffer, TimedSink};
    use chrono::TimeZone;
    use std::io::{Cursor, Read};
    use std::time::Duration;

    fn events(input: &str, start: Option<&str>) -> Vec<String> {
        let start = start.map(|p| Regex::new(p).unwrap());
        let mut reader = EventReader::new(Cursor::new(input.as_bytes().to_vec()), start);
        let mut out = Vec::new();
        while let Some(event) = reader.next_event().unwrap() {
            out.push(String::from_utf8(event).unwrap());
        }
        out
    }

    #[test]
    fn test_multiline_segmentation() {
        let got = events(
            "1 header\ncontinuation\n2 header\ncontinuation\n",
            Some(r"^\d"),
        );
        assert_eq!(got, ["1 header\ncontinuation\n", "2 header\ncontinuation\n"]);
    }

    #[test]
    fn test_line_events_keep_unterminated_tail() {
        let got = events("a\nb\nc", None);
        assert_eq!(got, ["a\n", "b\n", "c"]);
    }

    #[test]
    fn test_leading_continuation_forms_its_own_event() {
        let got = events("orphan\n1 start\nmore", Some(r"^\d"));
        assert_eq!(got, ["orphan\n", "1 start\nmore"]);
    }

    #[test]
    fn test_start_pattern_ignores_line_terminator() {
        let got = events("start\r\nx\r\nstart\r\n", Some("^start$"));
        assert_eq!(got, ["start\r\nx\r\n", "start\r\n"]);
    }

    #[test]
    fn test_clock_schedule() {
        let source = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2001, 1, 1, 0, 0, 0)
            .unwrap();
        let wall = Instant::now();
        let wall_time = Local::now();
        let clock = ReplayClock::anchor_at(source, wall, wall_time);

        match clock.schedule(source + chrono::Duration::seconds(2), wall) {
            Slot::Wait { until, at } => {
                assert_eq!(until - wall, Duration::from_secs(2));
                assert_eq!(at - wall_time, chrono::Duration::seconds(2));
            }
            Slot::Now => panic!("future event scheduled immediately"),
        }
        // Earlier than the anchor, or already overdue
        assert_eq!(
            clock.schedule(source - chrono::Duration::seconds(1), wall),
            Slot::Now
        );
        assert_eq!(
            clock.schedule(
                source + chrono::Duration::seconds(1),
                wall + Duration::from_secs(5)
            ),
            Slot::Now
        );
    }

    #[test]
    fn test_timestamp_spacing_is_reproduced() {
        let input = "2001-01-01 00:00:00.000 first\n\
                     2001-01-01 00:00:00.200 second\n\
                     2001-01-01 00:00:00.600 third\n";
        let sink = TimedSink::default();
        let config = ReplayConfig {
            timestamp: Some("2006-01-02 15:04:05.000".into()),
            ..Default::default()
        };
        let replayer = Replayer::spawn(
            "spacing",
            Cursor::new(input.as_bytes().to_vec()),
            Box::new(sink.clone()),
            &config,
        )
        .unwrap();
        replayer.join().unwrap();

        let writes = sink.writes();
        assert_eq!(writes.len(), 3);
        let gap1 = writes[1].0 - writes[0].0;
        let gap2 = writes[2].0 - writes[1].0;
        assert!(
            gap1 >= Duration::from_millis(150) && gap1 <= Duration::from_millis(350),
            "gap1 {:?}",
            gap1
        );
        assert!(
            gap2 >= Duration::from_millis(330) && gap2 <= Duration::from_millis(550),
            "gap2 {:?}",
            gap2
        );

        let layout = crate::layout::TimeLayout::new("2006-01-02 15:04:05.000").unwrap();
        for ((_, line), suffix) in writes.iter().zip([" first\n", " second\n", " third\n"]) {
            assert!(line.ends_with(suffix), "{:?}", line);
            assert!(!line.starts_with("2001"), "timestamp not rewritten: {:?}", line);
            let stamp = &line[..line.len() - suffix.len()];
            // Zone-less layout: compare as local wall-clock readings
            let emitted = layout.parse(stamp).unwrap().naive_local();
            let drift = (Local::now().naive_local() - emitted).abs();
            assert!(drift < chrono::Duration::seconds(5), "drift {:?}", drift);
        }
    }

    #[test]
    fn test_unparsed_timestamp_passes_through() {
        // Month 13 matches the pattern but does not parse
        let input = "2021-13-01 10:00:00 bad\n2021-01-01 10:00:00 good\n";
        let buffer = SharedBuffer::default();
        let config = ReplayConfig {
            timestamp: Some("^(2006-01-02 15:04:05) ".into()),
            ..Default::default()
        };
        let replayer = Replayer::spawn(
            "unparsed",
            Cursor::new(input.as_bytes().to_vec()),
            Box::new(buffer.clone()),
            &config,
        )
        .unwrap();
        let stats = Arc::clone(&replayer.stats);
        replayer.join().unwrap();

        let lines = buffer.lines();
        assert_eq!(lines[0], "2021-13-01 10:00:00 bad");
        assert!(lines[1].ends_with(" good"));
        assert!(!lines[1].starts_with("2021-01-01 10:00:00"));
        assert_eq!(stats.unparsed(), 1);
        assert_eq!(stats.rewritten(), 1);
    }

    #[test]
    fn test_multiline_with_timestamp_placeholder() {
        let input = "Jan  2 10:00:00 boom\n  at frame 1\n  at frame 2\nJan  2 10:00:00 ok\n";
        let buffer = SharedBuffer::default();
        let config = ReplayConfig {
            timestamp: Some("Jan _2 15:04:05".into()),
            multiline_start: Some("^{timestamp}".into()),
            rate: 0.0,
        };
        let emitted = replay_to_end(
            Cursor::new(input.as_bytes().to_vec()),
            Box::new(buffer.clone()),
            &config,
        )
        .unwrap();
        assert_eq!(emitted, 2);
        let text = buffer.contents();
        assert!(text.contains(" boom\n  at frame 1\n  at frame 2\n"));
        assert!(text.ends_with(" ok\n"));
    }

    #[test]
    fn test_unpaced_copy_through() {
        let input: String = (0..500).map(|i| format!("line {}\n", i)).collect();
        let buffer = SharedBuffer::default();
        let started = Instant::now();
        let emitted = replay_to_end(
            Cursor::new(input.clone().into_bytes()),
            Box::new(buffer.clone()),
            &ReplayConfig::default(),
        )
        .unwrap();
        assert_eq!(emitted, 500);
        assert_eq!(buffer.contents(), input);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_flat_rate_paces_events() {
        let input: String = (0..100).map(|i| format!("line {}\n", i)).collect();
        let buffer = SharedBuffer::default();
        let started = Instant::now();
        let config = ReplayConfig {
            rate: 1000.0,
            ..Default::default()
        };
        let emitted = replay_to_end(
            Cursor::new(input.clone().into_bytes()),
            Box::new(buffer.clone()),
            &config,
        )
        .unwrap();
        let elapsed = started.elapsed();
        assert_eq!(emitted, 100);
        assert_eq!(buffer.contents(), input);
        // Expected ~100ms
        assert!(elapsed >= Duration::from_millis(40), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "{:?}", elapsed);
    }

    #[test]
    fn test_flat_rate_keeps_up_above_timer_resolution() {
        let n = 20_000;
        let input: String = (0..n).map(|i| format!("{}\n", i)).collect();
        let buffer = SharedBuffer::default();
        let config = ReplayConfig {
            rate: 100_000.0,
            ..Default::default()
        };
        let started = Instant::now();
        let emitted = replay_to_end(
            Cursor::new(input.into_bytes()),
            Box::new(buffer.clone()),
            &config,
        )
        .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(emitted, n);
        // Expected ~200ms; per-event sleeping would take several times longer
        assert!(elapsed >= Duration::from_millis(120), "{:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(600), "{:?}", elapsed);
    }

    #[test]
    fn test_read_error_aborts_after_earlier_events() {
        struct FailingSource(Cursor<Vec<u8>>);

        impl Read for FailingSource {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                match self.0.read(buf)? {
                    0 => Err(io::Error::new(io::ErrorKind::Other, "device gone")),
                    n => Ok(n),
                }
            }
        }

        let buffer = SharedBuffer::default();
        let source = io::BufReader::new(FailingSource(Cursor::new(b"one\ntwo\n".to_vec())));
        let replayer = Replayer::spawn(
            "failing",
            source,
            Box::new(buffer.clone()),
            &ReplayConfig::default(),
        )
        .unwrap();

        assert!(replayer.join().is_err());
        assert_eq!(buffer.contents(), "one\ntwo\n");
    }

    #[test]
    fn test_stop_interrupts_wait() {
        let input = "2001-01-01 00:00:00 first\n2001-01-01 01:00:00 an hour later\n";
        let buffer = SharedBuffer::default();
        let config = ReplayConfig {
            timestamp: Some("2006-01-02 15:04:05".into()),
            ..Default::default()
        };
        let replayer = Replayer::spawn(
            "stop",
            Cursor::new(input.as_bytes().to_vec()),
            Box::new(buffer.clone()),
            &config,
        )
        .unwrap();
        thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        replayer.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(buffer.lines().len(), 1);
    }

    #[test]
    fn test_write_failure_is_reported() {
        let replayer = Replayer::spawn(
            "broken",
            Cursor::new(b"one\ntwo\n".to_vec()),
            Box::new(BrokenSink),
            &ReplayConfig::default(),
        )
        .unwrap();
        assert!(replayer.join().is_err());
    }

    #[test]
    fn test_bad_patterns_fail_before_start() {
        let config = ReplayConfig {
            timestamp: Some("^(2006-01-02".into()),
            ..Default::default()
        };
        let result = Replayer::spawn(
            "bad",
            Cursor::new(Vec::new()),
            Box::new(SharedBuffer::default()),
            &config,
        );
        assert!(result.is_err());
    }
}
