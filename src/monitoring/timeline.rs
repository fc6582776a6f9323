//! Execution Timeline
//!
//! Records when each top-level step starts and ends. A step revisited after
//! a `goto` appears once per visit, so timings are aggregated per step.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Started,
    Completed,
    /// The step, or something nested inside it, failed
    Failed,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    /// Program counter value of the step
    pub position: usize,
    /// Display name of the step
    pub step: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

impl TimelineEvent {
    /// Chart label, e.g. `3:fetch`.
    pub fn label(&self) -> String {
        format!("{}:{}", self.position, self.step)
    }
}

/// Aggregated timings for one step over all its visits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepTiming {
    pub visits: usize,
    pub failures: usize,
    pub total: Duration,
}

/// Tracks the execution timeline of a run.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl ExecutionTimeline {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Records an event for the step at `position`.
    pub fn add_event(&mut self, position: usize, step: impl Into<String>, event_type: EventType) {
        self.events.push(TimelineEvent {
            position,
            step: step.into(),
            event_type,
            timestamp: Instant::now(),
        });
    }

    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Pairs every start with the end event that follows it.
    fn visits(&self) -> Vec<(&TimelineEvent, &TimelineEvent)> {
        let mut open: HashMap<usize, &TimelineEvent> = HashMap::new();
        let mut visits = Vec::new();

        for event in &self.events {
            match event.event_type {
                EventType::Started => {
                    open.insert(event.position, event);
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(start) = open.remove(&event.position) {
                        visits.push((start, event));
                    }
                }
            }
        }
        visits
    }

    /// Timings keyed by step label, summed over all visits.
    pub fn get_durations(&self) -> HashMap<String, StepTiming> {
        let mut timings: HashMap<String, StepTiming> = HashMap::new();

        for (start, end) in self.visits() {
            let timing = timings.entry(start.label()).or_default();
            timing.visits += 1;
            timing.total += end.timestamp.duration_since(start.timestamp);
            if end.event_type == EventType::Failed {
                timing.failures += 1;
            }
        }
        timings
    }

    /// Renders an ASCII chart with one bar per step visit.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = self.start_time.elapsed().as_millis();
        if total_time == 0 {
            return output;
        }

        // 50 characters wide
        let scale = 50.0 / total_time as f64;

        for (start, end) in self.visits() {
            let from = start.timestamp.duration_since(self.start_time).as_millis();
            let to = end.timestamp.duration_since(self.start_time).as_millis();

            let offset = (from as f64 * scale) as usize;
            let width = ((to - from) as f64 * scale).max(1.0) as usize;
            let marker = if end.event_type == EventType::Failed { 'x' } else { '#' };

            output.push_str(&format!(
                "{:16} |{}{}| ({} ms)\n",
                truncate(&start.label(), 16),
                " ".repeat(offset),
                marker.to_string().repeat(width),
                to - from
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
