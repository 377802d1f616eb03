//! Deterministic triage fallback: ordered keyword buckets, headcount and
//! urgency bumps, and fixed division/skill tables. Total: every input maps
//! to a verdict.

use std::collections::BTreeSet;

use crate::domain::{DivisionType, TriageResult, TriageSource};

pub(crate) struct CategoryRule {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    pub base_priority: u8,
    pub division_type: DivisionType,
    pub skills: &'static [&'static str],
}

/// Bucket order is load-bearing: the first bucket with a keyword hit wins.
pub(crate) const CATEGORY_RULES: &[CategoryRule] = &[
    CategoryRule {
        name: "Flood Rescue",
        keywords: &[
            "flood",
            "water",
            "rising",
            "inundation",
            "submerged",
            "drowning",
            "boat",
        ],
        base_priority: 4,
        division_type: DivisionType::Rescue,
        skills: &["rescue", "boat", "swimming", "evacuation"],
    },
    CategoryRule {
        name: "Fire Response",
        keywords: &["fire", "smoke", "burn", "explosion", "gas leak"],
        base_priority: 5,
        division_type: DivisionType::EmergencyResponse,
        skills: &["fire", "rescue", "evacuation"],
    },
    CategoryRule {
        name: "Medical Emergency",
        keywords: &[
            "medical",
            "unconscious",
            "bleeding",
            "injury",
            "injured",
            "fracture",
            "heart",
            "ambulance",
            "pregnant",
        ],
        base_priority: 4,
        division_type: DivisionType::Medical,
        skills: &["medical", "first aid", "trauma", "paramedic"],
    },
    CategoryRule {
        name: "Rescue",
        keywords: &["trapped", "collapse", "debris", "landslide", "buried"],
        base_priority: 4,
        division_type: DivisionType::Rescue,
        skills: &["rescue", "search", "extraction"],
    },
    CategoryRule {
        name: "Food and Shelter",
        keywords: &["food", "hungry", "shelter", "homeless", "displaced", "relief"],
        base_priority: 3,
        division_type: DivisionType::Logistics,
        skills: &["relief", "logistics", "shelter"],
    },
    CategoryRule {
        name: "Infrastructure",
        keywords: &[
            "power",
            "electric",
            "bridge",
            "road blocked",
            "communication down",
        ],
        base_priority: 2,
        division_type: DivisionType::Logistics,
        skills: &["logistics", "engineering", "coordination"],
    },
];

const FALLBACK_CATEGORY: &str = "General Emergency";
const FALLBACK_BASE_PRIORITY: u8 = 2;

const URGENCY_PHRASES: &[&str] = &["urgent", "trapped", "children", "elderly"];
const MAX_PHRASE_BUMP: u8 = 2;

pub(crate) fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn headcount_bump(people: u32) -> u8 {
    match people {
        0..=2 => 0,
        3..=9 => 1,
        10..=29 => 2,
        _ => 3,
    }
}

fn phrase_bump(text: &str) -> u8 {
    let hits = URGENCY_PHRASES
        .iter()
        .filter(|phrase| text.contains(**phrase))
        .count() as u8;
    hits.min(MAX_PHRASE_BUMP)
}

fn clamp_priority(raw: i16) -> u8 {
    raw.clamp(1, 5) as u8
}

/// Classify free-form report text into a triage verdict.
pub fn classify(merged_text: &str, people: u32) -> TriageResult {
    let text = normalize(merged_text);

    let mut matched: Option<&CategoryRule> = None;
    let mut keyword_hits = 0usize;
    for rule in CATEGORY_RULES {
        let hits = rule
            .keywords
            .iter()
            .filter(|keyword| text.contains(**keyword))
            .count();
        if hits > 0 {
            matched = Some(rule);
            keyword_hits = hits;
            break;
        }
    }

    let (category, base, division_type, skills): (&str, u8, DivisionType, &[&str]) = match matched {
        Some(rule) => (rule.name, rule.base_priority, rule.division_type, rule.skills),
        None => (
            FALLBACK_CATEGORY,
            FALLBACK_BASE_PRIORITY,
            DivisionType::Rescue,
            &["coordination"],
        ),
    };

    let priority = clamp_priority(
        base as i16 + headcount_bump(people.max(1)) as i16 + phrase_bump(&text) as i16,
    );

    let required_skills: BTreeSet<String> = skills.iter().map(|s| s.to_string()).collect();

    let confidence = (0.55 + 0.08 * keyword_hits as f32).min(0.95);

    TriageResult {
        category: category.to_string(),
        priority,
        required_division_type: division_type,
        required_skills,
        source: TriageSource::Rules,
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_bucket_hit_wins_over_later_buckets() {
        // "flood" and "trapped" both appear; the flood bucket is declared first.
        let result = classify("Flood water entered homes, children trapped", 12);
        assert_eq!(result.category, "Flood Rescue");
        assert_eq!(result.required_division_type, DivisionType::Rescue);
    }

    #[test]
    fn flood_with_many_people_reaches_priority_five() {
        let result = classify("Flood water entered homes, children trapped", 12);
        // base 4 + headcount bump 2 + phrase bump 2, clamped to 5.
        assert_eq!(result.priority, 5);
    }

    #[test]
    fn rules_fallback_matches_the_collapsed_building_scenario() {
        let result = classify("elderly trapped in collapsed building, urgent", 1);
        assert_eq!(result.category, "Rescue");
        assert_eq!(result.source, TriageSource::Rules);
        // base 4 + headcount 0 + phrase bump capped at 2 => clamp(6) = 5.
        assert_eq!(result.priority, 5);
    }

    #[test]
    fn phrase_bump_caps_at_two() {
        assert_eq!(phrase_bump("urgent trapped children elderly"), 2);
        assert_eq!(phrase_bump("urgent"), 1);
        assert_eq!(phrase_bump("calm report"), 0);
    }

    #[test]
    fn headcount_bump_boundaries() {
        assert_eq!(headcount_bump(0), 0);
        assert_eq!(headcount_bump(2), 0);
        assert_eq!(headcount_bump(3), 1);
        assert_eq!(headcount_bump(9), 1);
        assert_eq!(headcount_bump(10), 2);
        assert_eq!(headcount_bump(29), 2);
        assert_eq!(headcount_bump(30), 3);
    }

    #[test]
    fn headcount_zero_is_treated_as_one() {
        let zero = classify("minor water logging on street", 0);
        let one = classify("minor water logging on street", 1);
        assert_eq!(zero.priority, one.priority);
    }

    #[test]
    fn priority_is_always_clamped_to_range() {
        let low = classify("nothing matches here at all", 1);
        assert!((1..=5).contains(&low.priority));
        let high = classify("fire explosion urgent trapped children", 200);
        assert_eq!(high.priority, 5);
    }

    #[test]
    fn unmatched_text_falls_back_to_general_emergency() {
        let result = classify("please help", 1);
        assert_eq!(result.category, "General Emergency");
        assert_eq!(result.priority, 2);
        assert!(result.required_skills.contains("coordination"));
    }

    #[test]
    fn food_and_shelter_maps_to_logistics() {
        let result = classify("families displaced, need food and shelter", 20);
        assert_eq!(result.category, "Food and Shelter");
        assert_eq!(result.required_division_type, DivisionType::Logistics);
    }
}
