// libs/scheduling-cell/src/services/insights.rs
//
// Plain-language summary of past booking decisions, handed to the ranking
// advisor as context. Read-only over feedback events.

use std::collections::BTreeMap;

use crate::models::{Doctor, FeedbackEvent, TimeOfDay};

pub const INSUFFICIENT_FEEDBACK: &str = "Insufficient feedback data to derive new scheduling insights.";

pub fn summarize(events: &[FeedbackEvent], doctors: &[Doctor]) -> Vec<String> {
    let mut doctor_counts: BTreeMap<String, u32> = BTreeMap::new();
    let mut bucket_counts: BTreeMap<&'static str, u32> = BTreeMap::new();
    let mut rank_counts: BTreeMap<u32, u32> = BTreeMap::new();

    for event in events {
        let doctor = doctors
            .iter()
            .find(|d| d.id == event.suggestion_doctor_id)
            .map(|d| d.display_name.clone())
            .unwrap_or_else(|| event.suggestion_doctor_id.to_string());
        *doctor_counts.entry(doctor).or_default() += 1;

        let bucket = match TimeOfDay::of(event.suggestion_start_time) {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Afternoon => "afternoon",
            TimeOfDay::Evening => "evening",
        };
        *bucket_counts.entry(bucket).or_default() += 1;

        if let Some(rank) = event.suggestion_rank {
            *rank_counts.entry(rank).or_default() += 1;
        }
    }

    let mut insights = Vec::new();

    if let Some((doctor, count)) = most_common(&doctor_counts) {
        insights.push(format!(
            "Clients most frequently choose recommendations featuring {} ({} recent selections).",
            doctor, count
        ));
    }
    if let Some((bucket, count)) = most_common(&bucket_counts) {
        insights.push(format!(
            "Preferred appointment window skews toward the {} based on {} bookings.",
            bucket, count
        ));
    }
    if let Some((rank, count)) = most_common(&rank_counts) {
        insights.push(format!(
            "The {} ranked suggestion was accepted {} times in the latest run.",
            ordinal(*rank),
            count
        ));
    }

    if insights.is_empty() {
        insights.push(INSUFFICIENT_FEEDBACK.to_string());
    }
    insights
}

/// Highest count; ties go to the smallest key.
fn most_common<K: Ord>(counts: &BTreeMap<K, u32>) -> Option<(&K, u32)> {
    counts
        .iter()
        .fold(None, |best: Option<(&K, u32)>, (key, count)| match best {
            Some((_, top)) if top >= *count => best,
            _ => Some((key, *count)),
        })
}

pub fn ordinal(value: u32) -> String {
    let suffix = if (10..=20).contains(&(value % 100)) {
        "th"
    } else {
        match value % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        }
    };
    format!("{}{}", value, suffix)
}
