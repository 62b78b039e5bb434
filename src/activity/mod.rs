//! Member activity inferred from the clan snapshot history.
//!
//! A member's activity over a trailing window is the trophy and donation delta
//! between the oldest and newest clan snapshot inside that window. Inference is
//! advisory: every failure collapses to [`ActivityResult::inactive`].

use crate::storage::{Category, Snapshot, Storage};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

pub const DEFAULT_WINDOW_DAYS: u32 = 7;
const DAY_MS: i64 = 86_400_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityResult {
    pub score: i64,
    pub trophy_change: i64,
    pub donations_change: i64,
    pub last_seen: Option<i64>,
    pub is_active: bool,
    /// Older history entries name this `days`, and their zero results omit it.
    #[serde(default, alias = "days")]
    pub window_days: u32,
}

impl ActivityResult {
    pub fn inactive(window_days: u32) -> Self {
        Self {
            score: 0,
            trophy_change: 0,
            donations_change: 0,
            last_seen: None,
            is_active: false,
            window_days,
        }
    }
}

/// The counters activity is computed from, read out of a `memberList` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    #[serde(default)]
    pub trophies: i64,
    #[serde(default)]
    pub donations: i64,
}

/// A roster entry exactly as stored, paired with its activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InactiveMember {
    #[serde(flatten)]
    pub member: Map<String, Value>,
    pub activity: ActivityResult,
}

impl InactiveMember {
    pub fn tag(&self) -> &str {
        self.member.get("tag").and_then(Value::as_str).unwrap_or_default()
    }
}

/// Why no delta could be computed. Callers only ever see the inactive result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NoActivity {
    InsufficientHistory,
    EmptyWindow,
    MemberMissing,
    Overflow,
}

pub fn compute_activity(storage: &Storage, member_tag: &str, window_days: u32) -> ActivityResult {
    compute_activity_at(storage, member_tag, window_days, Utc::now().timestamp_millis())
}

pub fn compute_activity_at(
    storage: &Storage,
    member_tag: &str,
    window_days: u32,
    now: i64,
) -> ActivityResult {
    infer_activity(&storage.load_all(Category::Clan), member_tag, window_days, now)
}

pub fn infer_activity(
    history: &[Snapshot],
    member_tag: &str,
    window_days: u32,
    now: i64,
) -> ActivityResult {
    try_infer_activity(history, member_tag, window_days, now).unwrap_or_else(|reason| {
        debug!(member = member_tag, ?reason, "no activity inferred");
        ActivityResult::inactive(window_days)
    })
}

fn try_infer_activity(
    history: &[Snapshot],
    member_tag: &str,
    window_days: u32,
    now: i64,
) -> Result<ActivityResult, NoActivity> {
    if history.len() < 2 {
        return Err(NoActivity::InsufficientHistory);
    }

    let cutoff = now.saturating_sub(i64::from(window_days).saturating_mul(DAY_MS));
    let mut in_window = history.iter().filter(|snapshot| snapshot.timestamp >= cutoff);

    let oldest = in_window.next().ok_or(NoActivity::EmptyWindow)?;
    let newest = in_window.last().unwrap_or(oldest);

    let before = find_member(&oldest.data, member_tag).ok_or(NoActivity::MemberMissing)?;
    let after = find_member(&newest.data, member_tag).ok_or(NoActivity::MemberMissing)?;

    let trophy_change = after
        .trophies
        .checked_sub(before.trophies)
        .ok_or(NoActivity::Overflow)?;
    let donations_change = after
        .donations
        .checked_sub(before.donations)
        .ok_or(NoActivity::Overflow)?;
    let score = trophy_change
        .checked_abs()
        .zip(donations_change.checked_mul(2))
        .and_then(|(trophies, donations)| trophies.checked_add(donations))
        .ok_or(NoActivity::Overflow)?;

    Ok(ActivityResult {
        score,
        trophy_change,
        donations_change,
        last_seen: Some(newest.timestamp),
        is_active: trophy_change != 0 || donations_change != 0,
        window_days,
    })
}

/// Looks up one member by tag; malformed entries count as missing.
pub fn find_member(clan: &Value, member_tag: &str) -> Option<Member> {
    clan.get("memberList")?
        .as_array()?
        .iter()
        .find(|entry| entry.get("tag").and_then(Value::as_str) == Some(member_tag))
        .and_then(|entry| Member::deserialize(entry).ok())
}

/// Current roster: every `memberList` object carrying a string tag, untouched.
pub fn roster(clan: &Value) -> Vec<Map<String, Value>> {
    clan.get("memberList")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_object)
                .filter(|entry| entry.get("tag").is_some_and(Value::is_string))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

pub fn find_inactive_members(storage: &Storage, window_days: u32) -> Vec<InactiveMember> {
    find_inactive_members_at(storage, window_days, Utc::now().timestamp_millis())
}

/// Members of the current roster without movement in the window, in roster order.
pub fn find_inactive_members_at(storage: &Storage, window_days: u32, now: i64) -> Vec<InactiveMember> {
    let Some(clan) = storage.clan_data() else {
        return Vec::new();
    };
    let history = storage.load_all(Category::Clan);

    roster(&clan)
        .into_iter()
        .map(|member| {
            let tag = member.get("tag").and_then(Value::as_str).unwrap_or_default();
            let activity = infer_activity(&history, tag, window_days, now);
            InactiveMember { member, activity }
        })
        .filter(|candidate| !candidate.activity.is_active)
        .collect()
}
