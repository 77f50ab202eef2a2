use crate::domain::models::{
    local_to_utc_lenient, CalendarEvent, DailyHours, FreeWindow, SchedulingRequest,
};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

/// Computes the free windows shared by both participants inside the range.
///
/// Busy time is half-open (`start <= t < end`) and touching busy intervals merge, so
/// the result is the exact complement of the merged timeline with no zero-width gaps.
pub fn resolve(
    events_a: &[CalendarEvent],
    events_b: &[CalendarEvent],
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    min_duration: Duration,
) -> Vec<FreeWindow> {
    resolve_within_hours(events_a, events_b, range_start, range_end, min_duration, None)
}

/// Same as [`resolve`], additionally clipping every window to the local daily hours.
pub fn resolve_within_hours(
    events_a: &[CalendarEvent],
    events_b: &[CalendarEvent],
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    min_duration: Duration,
    daily_hours: Option<(DailyHours, Tz)>,
) -> Vec<FreeWindow> {
    if range_end <= range_start {
        return Vec::new();
    }

    let busy = merge_intervals(
        events_a
            .iter()
            .chain(events_b.iter())
            .filter_map(event_to_interval)
            .filter_map(|interval| clip_interval(interval, range_start, range_end))
            .collect(),
    );

    let mut slots = free_slots(range_start, range_end, &busy);
    if let Some((hours, timezone)) = daily_hours {
        slots = slots
            .into_iter()
            .flat_map(|slot| clip_to_daily_hours(slot, hours, timezone))
            .collect();
    }

    slots
        .into_iter()
        .filter(|slot| slot.end > slot.start && slot.end - slot.start >= min_duration)
        .map(|slot| FreeWindow {
            start: slot.start,
            end: slot.end,
        })
        .collect()
}

pub fn resolve_request(request: &SchedulingRequest) -> Vec<FreeWindow> {
    resolve_within_hours(
        &request.events_a,
        &request.events_b,
        request.range_start,
        request.range_end,
        request.min_duration,
        request.daily_hours.map(|hours| (hours, request.timezone)),
    )
}

fn event_to_interval(event: &CalendarEvent) -> Option<Interval> {
    // Point markers cover no instant under the half-open convention.
    if event.end <= event.start {
        return None;
    }
    Some(Interval {
        start: event.start,
        end: event.end,
    })
}

fn clip_interval(
    interval: Interval,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Option<Interval> {
    if interval.end <= window_start || interval.start >= window_end {
        return None;
    }
    let start = interval.start.max(window_start);
    let end = interval.end.min(window_end);
    (end > start).then_some(Interval { start, end })
}

fn merge_intervals(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.sort_unstable_by(|left, right| {
        left.start
            .cmp(&right.start)
            .then_with(|| left.end.cmp(&right.end))
    });

    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            Some(last) if interval.start <= last.end => {
                if interval.end > last.end {
                    last.end = interval.end;
                }
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// Complement of sorted, merged busy intervals within the window.
fn free_slots(
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    busy_intervals: &[Interval],
) -> Vec<Interval> {
    let mut slots = Vec::new();
    let mut cursor = window_start;
    for interval in busy_intervals {
        if interval.start > cursor {
            slots.push(Interval {
                start: cursor,
                end: interval.start,
            });
        }
        if interval.end > cursor {
            cursor = interval.end;
        }
    }
    if cursor < window_end {
        slots.push(Interval {
            start: cursor,
            end: window_end,
        });
    }
    slots
}

fn clip_to_daily_hours(slot: Interval, hours: DailyHours, timezone: Tz) -> Vec<Interval> {
    let first_day = slot.start.with_timezone(&timezone).date_naive();
    let last_day = slot.end.with_timezone(&timezone).date_naive();

    first_day
        .iter_days()
        .take_while(|day| *day <= last_day)
        .filter_map(|day| {
            let day_start = local_to_utc_lenient(timezone, day.and_time(hours.start))?;
            let day_end = local_to_utc_lenient(timezone, day.and_time(hours.end))?;
            clip_interval(slot, day_start, day_end)
        })
        .collect()
}
