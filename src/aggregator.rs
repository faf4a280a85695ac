use crate::db::Database;
use crate::errors::AppResult;
use crate::models::{
    DayBucket, EntityKind, FormAggregate, FormCounters, TaskAggregate, TaskCounters, TrafficAggregate,
    TrafficCounters,
};
use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Additive per-day counters.
pub trait Counters: Default + Copy {
    fn absorb(&mut self, other: &Self);
}

impl Counters for TrafficCounters {
    fn absorb(&mut self, other: &Self) {
        self.page_views = self.page_views.saturating_add(other.page_views);
        self.button_clicks = self.button_clicks.saturating_add(other.button_clicks);
    }
}

impl Counters for TaskCounters {
    fn absorb(&mut self, other: &Self) {
        self.created = self.created.saturating_add(other.created);
        self.closed = self.closed.saturating_add(other.closed);
    }
}

impl Counters for FormCounters {
    fn absorb(&mut self, other: &Self) {
        self.total = self.total.saturating_add(other.total);
        self.with_calendly = self.with_calendly.saturating_add(other.with_calendly);
    }
}

/// The trailing window `[as_of - window_days, as_of]`, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub as_of: NaiveDate,
    pub window_days: u32,
}

impl DayWindow {
    pub fn new(as_of: NaiveDate, window_days: u32) -> Self {
        Self { as_of, window_days }
    }

    pub fn start(&self) -> NaiveDate {
        self.as_of - Duration::days(i64::from(self.window_days))
    }

    /// Every day in the window, newest first.
    pub fn days_descending(&self) -> impl Iterator<Item = NaiveDate> {
        let as_of = self.as_of;
        (0..=i64::from(self.window_days)).map(move |offset| as_of - Duration::days(offset))
    }
}

/// Zero-filled buckets for every day of `window`, newest first. Events dated outside the
/// window are ignored.
pub fn bucketize<C, I>(window: DayWindow, events: I) -> Vec<DayBucket<C>>
where
    C: Counters,
    I: IntoIterator<Item = (NaiveDate, C)>,
{
    let mut by_day: BTreeMap<NaiveDate, C> = window.days_descending().map(|day| (day, C::default())).collect();
    for (date, counters) in events {
        if let Some(slot) = by_day.get_mut(&date) {
            slot.absorb(&counters);
        }
    }
    by_day
        .into_iter()
        .rev()
        .map(|(date, counters)| DayBucket { date, counters })
        .collect()
}

/// Sum over all buckets, and over all buckets except the still-accumulating `as_of` day.
pub fn period_totals<C: Counters>(buckets: &[DayBucket<C>], as_of: NaiveDate) -> (C, C) {
    let mut current = C::default();
    let mut previous = C::default();
    for bucket in buckets {
        current.absorb(&bucket.counters);
        if bucket.date != as_of {
            previous.absorb(&bucket.counters);
        }
    }
    (current, previous)
}

pub fn percent_change(current: i64, previous: i64) -> f64 {
    if previous == 0 {
        return 0.0;
    }
    round_one_decimal((current as f64 - previous as f64) / previous as f64 * 100.0)
}

pub fn share_percent(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round_one_decimal(part as f64 / whole as f64 * 100.0)
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Builds the dashboard aggregates from the store. Never reads the clock.
#[derive(Clone)]
pub struct Aggregator {
    db: Arc<Database>,
}

impl Aggregator {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn daily(&self, entity: EntityKind, window: DayWindow) -> AppResult<serde_json::Value> {
        let data = match entity {
            EntityKind::Tasks => serde_json::to_value(self.task_buckets(window)?)?,
            EntityKind::FormResponses => serde_json::to_value(self.form_buckets(window)?)?,
            EntityKind::Metrics => serde_json::to_value(self.traffic_buckets(window)?)?,
        };
        Ok(data)
    }

    pub fn traffic(&self, window: DayWindow) -> AppResult<TrafficAggregate> {
        let data = self.traffic_buckets(window)?;
        let (current, previous) = period_totals(&data, window.as_of);
        Ok(TrafficAggregate {
            total: current.page_views,
            previous_period: previous.page_views,
            button_clicks: current.button_clicks,
            previous_button_clicks: previous.button_clicks,
            total_change: percent_change(current.page_views, previous.page_views),
            button_clicks_change: percent_change(current.button_clicks, previous.button_clicks),
            data,
        })
    }

    pub fn tasks(&self, window: DayWindow) -> AppResult<TaskAggregate> {
        let data = self.task_buckets(window)?;
        let (current, previous) = period_totals(&data, window.as_of);
        Ok(TaskAggregate {
            created: current.created,
            closed: current.closed,
            previous_created: previous.created,
            previous_closed: previous.closed,
            created_change: percent_change(current.created, previous.created),
            closed_change: percent_change(current.closed, previous.closed),
            total_tasks: self.db.count_rows(EntityKind::Tasks)?,
            open_tasks: self.db.count_open_tasks()?,
            data,
        })
    }

    pub fn forms(&self, window: DayWindow) -> AppResult<FormAggregate> {
        let data = self.form_buckets(window)?;
        let (current, previous) = period_totals(&data, window.as_of);
        Ok(FormAggregate {
            total: current.total,
            with_calendly: current.with_calendly,
            previous_total: previous.total,
            previous_with_calendly: previous.with_calendly,
            total_change: percent_change(current.total, previous.total),
            with_calendly_change: percent_change(current.with_calendly, previous.with_calendly),
            calendly_rate: share_percent(current.with_calendly, current.total),
            data,
        })
    }

    fn traffic_buckets(&self, window: DayWindow) -> AppResult<Vec<DayBucket<TrafficCounters>>> {
        let days = self.db.metric_days_in_range(window.start(), window.as_of)?;
        Ok(bucketize(
            window,
            days.into_iter().map(|day| {
                (
                    day.date,
                    TrafficCounters {
                        page_views: day.page_views,
                        button_clicks: day.button_clicks,
                    },
                )
            }),
        ))
    }

    fn task_buckets(&self, window: DayWindow) -> AppResult<Vec<DayBucket<TaskCounters>>> {
        let tasks = self.db.tasks_in_range(window.start(), window.as_of)?;
        let mut events = Vec::with_capacity(tasks.len() * 2);
        for task in &tasks {
            if let Some(created) = task.created_at {
                events.push((created.date_naive(), TaskCounters { created: 1, closed: 0 }));
            }
            if let Some(closed) = task.closed_at {
                events.push((closed.date_naive(), TaskCounters { created: 0, closed: 1 }));
            }
        }
        Ok(bucketize(window, events))
    }

    fn form_buckets(&self, window: DayWindow) -> AppResult<Vec<DayBucket<FormCounters>>> {
        let responses = self.db.form_responses_in_range(window.start(), window.as_of)?;
        Ok(bucketize(
            window,
            responses.iter().filter_map(|response| {
                response.submitted_at.map(|at| {
                    (
                        at.date_naive(),
                        FormCounters {
                            total: 1,
                            with_calendly: i64::from(response.flagged),
                        },
                    )
                })
            }),
        ))
    }
}
