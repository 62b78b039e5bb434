use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

const DEFAULT_ATTACKS_PER_MEMBER: u32 = 2;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WarPayload {
    state: String,
    team_size: u32,
    attacks_per_member: Option<u32>,
    clan: WarSidePayload,
    opponent: WarSidePayload,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WarSidePayload {
    name: Option<String>,
    stars: u32,
    destruction_percentage: f64,
    attacks: u32,
    members: Vec<WarMemberPayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WarMemberPayload {
    tag: String,
    name: String,
    townhall_level: u32,
    map_position: u32,
    attacks: Vec<WarAttackPayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WarAttackPayload {
    stars: u32,
    destruction_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarSide {
    pub name: Option<String>,
    pub stars: u32,
    pub destruction: f64,
    pub attacks: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarMemberMetrics {
    pub tag: String,
    pub name: String,
    pub townhall_level: u32,
    pub map_position: u32,
    pub attacks_used: u32,
    pub attacks_missed: u32,
    pub total_stars: u32,
    pub total_destruction: f64,
    pub avg_destruction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarMetrics {
    pub state: String,
    pub team_size: u32,
    pub attacks_per_member: u32,
    pub clan: WarSide,
    pub opponent: WarSide,
    pub members: Vec<WarMemberMetrics>,
}

/// Per-member war performance, best performers first. `None` when not in war.
pub fn war_metrics(war: &Value) -> Option<WarMetrics> {
    let payload = WarPayload::deserialize(war).ok()?;
    if payload.state.is_empty() || payload.state == "notInWar" {
        return None;
    }

    let attacks_per_member = payload
        .attacks_per_member
        .filter(|attacks| *attacks > 0)
        .unwrap_or(DEFAULT_ATTACKS_PER_MEMBER);

    let mut members = payload
        .clan
        .members
        .iter()
        .map(|member| {
            let attacks_used = member.attacks.len() as u32;
            let total_stars = member.attacks.iter().map(|attack| attack.stars).sum::<u32>();
            let total_destruction = member
                .attacks
                .iter()
                .map(|attack| attack.destruction_percentage)
                .sum::<f64>();

            WarMemberMetrics {
                tag: member.tag.clone(),
                name: member.name.clone(),
                townhall_level: member.townhall_level,
                map_position: member.map_position,
                attacks_used,
                attacks_missed: attacks_per_member.saturating_sub(attacks_used),
                total_stars,
                total_destruction,
                avg_destruction: if attacks_used > 0 {
                    total_destruction / f64::from(attacks_used)
                } else {
                    0.0
                },
            }
        })
        .collect::<Vec<_>>();

    members.sort_by(|a, b| {
        b.total_stars.cmp(&a.total_stars).then_with(|| {
            b.total_destruction
                .partial_cmp(&a.total_destruction)
                .unwrap_or(Ordering::Equal)
        })
    });

    Some(WarMetrics {
        state: payload.state,
        team_size: payload.team_size,
        attacks_per_member,
        clan: side(&payload.clan),
        opponent: side(&payload.opponent),
        members,
    })
}

fn side(payload: &WarSidePayload) -> WarSide {
    WarSide {
        name: payload.name.clone(),
        stars: payload.stars,
        destruction: payload.destruction_percentage,
        attacks: payload.attacks,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CapitalPayload {
    items: Vec<RaidSeasonPayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RaidSeasonPayload {
    state: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    capital_total_loot: u64,
    raids_completed: u32,
    total_attacks: u32,
    enemy_districts_destroyed: u32,
    offensive_reward: u32,
    defensive_reward: u32,
    members: Vec<RaidMember>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RaidMember {
    pub tag: String,
    pub name: String,
    pub attacks: u32,
    pub attack_limit: u32,
    pub bonus_attack_limit: u32,
    pub capital_resources_looted: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapitalMetrics {
    pub state: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub capital_total_loot: u64,
    pub raids_completed: u32,
    pub total_attacks: u32,
    pub enemy_districts_destroyed: u32,
    pub offensive_reward: u32,
    pub defensive_reward: u32,
    pub members: Vec<RaidMember>,
}

/// Summary of the most recent raid season (the first listed).
pub fn capital_metrics(capital: &Value) -> Option<CapitalMetrics> {
    let payload = CapitalPayload::deserialize(capital).ok()?;
    let season = payload.items.into_iter().next()?;

    let mut members = season.members;
    members.sort_by(|a, b| b.capital_resources_looted.cmp(&a.capital_resources_looted));

    Some(CapitalMetrics {
        state: season.state,
        start_time: season.start_time,
        end_time: season.end_time,
        capital_total_loot: season.capital_total_loot,
        raids_completed: season.raids_completed,
        total_attacks: season.total_attacks,
        enemy_districts_destroyed: season.enemy_districts_destroyed,
        offensive_reward: season.offensive_reward,
        defensive_reward: season.defensive_reward,
        members,
    })
}

#[cfg(test)]
mod tests {
    use super::{capital_metrics, war_metrics};
    use serde_json::json;

    #[test]
    fn war_members_ranked_by_stars_then_destruction() {
        let war = json!({
            "state": "inWar",
            "teamSize": 15,
            "clan": {
                "name": "Home",
                "stars": 20,
                "destructionPercentage": 71.5,
                "attacks": 3,
                "members": [
                    { "tag": "#A", "name": "a", "townhallLevel": 14, "mapPosition": 1,
                      "attacks": [{ "stars": 2, "destructionPercentage": 80.0 }] },
                    { "tag": "#B", "name": "b", "townhallLevel": 15, "mapPosition": 2,
                      "attacks": [{ "stars": 2, "destructionPercentage": 90.0 },
                                  { "stars": 1, "destructionPercentage": 40.0 }] },
                    { "tag": "#C", "name": "c", "townhallLevel": 12, "mapPosition": 3,
                      "attacks": [{ "stars": 3, "destructionPercentage": 100.0 }] },
                    { "tag": "#D", "name": "d", "townhallLevel": 11, "mapPosition": 4 }
                ]
            },
            "opponent": { "name": "Away", "stars": 18 }
        });

        let metrics = war_metrics(&war).expect("in war");
        let order = metrics
            .members
            .iter()
            .map(|member| member.tag.as_str())
            .collect::<Vec<_>>();

        assert_eq!(metrics.attacks_per_member, 2);
        assert_eq!(order, vec!["#B", "#C", "#A", "#D"]);
        assert_eq!(metrics.members[0].avg_destruction, 65.0);
        assert_eq!(metrics.members[2].attacks_missed, 1);
        assert_eq!(metrics.members[3].attacks_missed, 2);
        assert_eq!(metrics.opponent.stars, 18);
        assert_eq!(metrics.opponent.destruction, 0.0);
    }

    #[test]
    fn not_in_war_yields_nothing() {
        assert_eq!(war_metrics(&json!({ "state": "notInWar" })), None);
        assert_eq!(war_metrics(&json!(null)), None);
    }

    #[test]
    fn capital_uses_latest_season_sorted_by_loot() {
        let capital = json!({
            "items": [
                {
                    "state": "ongoing",
                    "capitalTotalLoot": 1200,
                    "members": [
                        { "tag": "#A", "name": "a", "attacks": 5, "capitalResourcesLooted": 200 },
                        { "tag": "#B", "name": "b", "attacks": 6, "capitalResourcesLooted": 1000 }
                    ]
                },
                { "state": "ended", "capitalTotalLoot": 99 }
            ]
        });

        let metrics = capital_metrics(&capital).expect("season");

        assert_eq!(metrics.state.as_deref(), Some("ongoing"));
        assert_eq!(metrics.capital_total_loot, 1200);
        assert_eq!(metrics.raids_completed, 0);
        assert_eq!(metrics.members[0].tag, "#B");
        assert_eq!(capital_metrics(&json!({ "items": [] })), None);
    }
}
