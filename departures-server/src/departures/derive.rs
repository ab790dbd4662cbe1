//! The pure departures derivation.
//!
//! Everything here is a function of its inputs: the same schedules, routes,
//! stations, time and options always give the same groups. The aggregator
//! calls it on every relevant change.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDateTime;
use crate::domain::{Eta, Route, Schedule, Station, StationId, TrainId};

use super::stop_count::StopCounter;

/// How departures of a station are grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupBy {
    /// One group per destination station.
    #[default]
    Destination,
    /// One group per line; the destination shown is that of the earliest train.
    Line,
}

/// One upcoming departure as displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub schedule: Schedule,
    pub eta: String,
    /// Stops left after the station; `None` until the train's route is known.
    pub stop_count: Option<usize>,
}

/// Departures sharing a destination (or a line).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleGroup {
    pub destination: Station,
    pub line: String,
    pub color: String,
    /// Ascending by departure time.
    pub departures: Vec<Departure>,
}

/// Knobs of the derivation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivationOptions {
    pub future_only: bool,
    pub group_by: GroupBy,
    pub stop_counter: StopCounter,
}

/// Everything the derivation reads.
#[derive(Debug, Clone, Copy)]
pub struct DerivationInput<'a> {
    /// The station whose departures are shown.
    pub station: &'a StationId,
    pub schedules: &'a [Schedule],
    pub routes: &'a HashMap<TrainId, Arc<Route>>,
    pub stations: &'a HashMap<StationId, Arc<Station>>,
    pub now: NaiveDateTime,
}

/// Filter, group and sort schedules. Each group is ascending by departure.
fn grouped<'a>(
    schedules: &'a [Schedule],
    now: NaiveDateTime,
    future_only: bool,
    group_by: GroupBy,
) -> Vec<Vec<&'a Schedule>> {
    let mut groups: BTreeMap<&str, Vec<&Schedule>> = BTreeMap::new();
    for schedule in schedules {
        if future_only && !schedule.departs_after(now) {
            continue;
        }
        let key = match group_by {
            GroupBy::Destination => schedule.station_destination_id.as_str(),
            GroupBy::Line => schedule.line.as_str(),
        };
        groups.entry(key).or_default().push(schedule);
    }

    groups
        .into_values()
        .map(|mut group| {
            group.sort_by(|a, b| a.departs_at.cmp(&b.departs_at).then_with(|| a.id.cmp(&b.id)));
            group
        })
        .collect()
}

/// The earliest train of every group, i.e. the trains whose routes the
/// view needs for its stop counts.
///
/// Groups are taken before destination lookup, so a group whose
/// destination is not yet known still names its train.
pub fn reference_trains(
    schedules: &[Schedule],
    now: NaiveDateTime,
    options: &DerivationOptions,
) -> Vec<TrainId> {
    let mut trains: Vec<TrainId> = grouped(schedules, now, options.future_only, options.group_by)
        .into_iter()
        .filter_map(|group| group.first().map(|s| s.train_id.clone()))
        .collect();
    trains.sort();
    trains.dedup();
    trains
}

/// Destination stations the derivation needs to resolve.
pub fn destination_ids(schedules: &[Schedule]) -> Vec<StationId> {
    let mut ids: Vec<StationId> = schedules
        .iter()
        .map(|s| s.station_destination_id.clone())
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Build the grouped departures view.
pub fn compute_groups(input: &DerivationInput<'_>, options: &DerivationOptions) -> Vec<ScheduleGroup> {
    let mut groups: Vec<ScheduleGroup> =
        grouped(input.schedules, input.now, options.future_only, options.group_by)
            .into_iter()
            .filter_map(|group| build_group(input, options, &group))
            .collect();

    groups.sort_by(|a, b| {
        a.line
            .cmp(&b.line)
            .then_with(|| a.destination.name.cmp(&b.destination.name))
            .then_with(|| a.destination.id.cmp(&b.destination.id))
    });
    groups
}

fn build_group(
    input: &DerivationInput<'_>,
    options: &DerivationOptions,
    schedules: &[&Schedule],
) -> Option<ScheduleGroup> {
    let first = schedules.first()?;
    // Unknown destinations are left out until the station record arrives.
    let destination = input.stations.get(&first.station_destination_id)?;

    let stop_count = input
        .routes
        .get(&first.train_id)
        .map(|route| options.stop_counter.count(route, input.station, &first.line));

    let departures = schedules
        .iter()
        .map(|schedule| Departure {
            schedule: (*schedule).clone(),
            eta: Eta::between(input.now, schedule.departs_at).to_string(),
            stop_count,
        })
        .collect();

    Some(ScheduleGroup {
        destination: destination.as_ref().clone(),
        line: first.line.clone(),
        color: first.color.clone(),
        departures,
    })
}
