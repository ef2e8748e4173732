//! Selection of the lead flow rule that routes an incoming lead.
//!
//! Resolution is deterministic: active rules for the lead's source are
//! tried in (priority, id) order and the first whose conditions pass wins.
//! If none passes, the first active default rule for that source is used.

use serde_json::{Map, Value};

use crate::conditions::{condition_passes, Operator};
use crate::error::ValidationError;
use crate::types::{LeadFlowRule, MatchType, NewRule, Person, RuleDestination};

/// The outcome of rule resolution: the winning rule and its destination,
/// already unpacked so callers never have to re-derive it.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedRoute<'a> {
    pub rule: &'a LeadFlowRule,
    pub destination: RuleDestination,
}

/// Picks the rule that should route `person`, arriving from the given
/// source. Rules without a usable destination are skipped entirely, both in
/// the main pass and in the default fallback.
pub fn resolve<'a>(
    rules: &'a [LeadFlowRule],
    person: &Person,
    source_type: Option<&str>,
    source_name: Option<&str>,
) -> Option<ResolvedRoute<'a>> {
    let mut candidates: Vec<&LeadFlowRule> = rules
        .iter()
        .filter(|rule| rule.is_active && rule.matches_source(source_type, source_name))
        .collect();
    candidates.sort_by_key(|rule| (rule.priority, rule.id));

    let fields = person.match_fields();
    for rule in &candidates {
        if let Some(destination) = rule.destination() {
            if rule_matches_fields(rule, &fields) {
                return Some(ResolvedRoute { rule, destination });
            }
        }
    }

    candidates
        .into_iter()
        .filter(|rule| rule.is_default)
        .find_map(|rule| {
            rule.destination()
                .map(|destination| ResolvedRoute { rule, destination })
        })
}

/// Whether a single rule's conditions hold for a person. Used by resolution
/// and by the dry-run endpoint; never writes anything.
pub fn rule_matches(rule: &LeadFlowRule, person: &Person) -> bool {
    rule_matches_fields(rule, &person.match_fields())
}

fn rule_matches_fields(rule: &LeadFlowRule, fields: &Map<String, Value>) -> bool {
    // A rule with no conditions matches unconditionally, whatever its
    // match type says.
    if rule.conditions.is_empty() {
        return true;
    }
    match rule.match_type {
        MatchType::All => rule
            .conditions
            .iter()
            .all(|condition| condition_passes(condition, fields)),
        MatchType::Any => rule
            .conditions
            .iter()
            .any(|condition| condition_passes(condition, fields)),
    }
}

/// Structural checks for rule writes. Unknown operators are allowed through
/// on purpose: they evaluate to a non-match today and may become meaningful
/// after an upgrade, so rejecting them would break config written by a
/// newer admin UI.
pub fn validate_new_rule(rule: &NewRule) -> Result<(), ValidationError> {
    let mut errors = ValidationError::new();
    if rule.name.trim().is_empty() {
        errors.push("name", "name is required");
    }
    for (index, condition) in rule.conditions.iter().enumerate() {
        if condition.field.trim().is_empty() {
            errors.push(&format!("conditions[{index}].field"), "field is required");
        }
        if condition.operator.parse::<Operator>().is_err() {
            tracing::warn!(
                operator = condition.operator,
                "storing condition with an operator this version cannot evaluate"
            );
        }
    }
    errors.into_result()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_utils::{condition_for_rule, person, rule};

    fn lead_from(source_type: &str) -> Person {
        let mut lead = person(1, 1);
        lead.source_type = Some(source_type.to_owned());
        lead
    }

    #[test]
    fn test_resolve_prefers_lower_priority_then_lower_id() {
        let mut second = rule(2);
        second.priority = 10;
        let mut first = rule(1);
        first.priority = 10;
        let mut earlier = rule(3);
        earlier.priority = 5;

        let rules = vec![second, first, earlier];
        let lead = person(1, 1);

        let resolved = resolve(&rules, &lead, None, None).unwrap();
        assert_eq!(resolved.rule.id, 3);

        // Same priority falls back to the lower id.
        let rules: Vec<_> = rules.into_iter().filter(|r| r.priority == 10).collect();
        let resolved = resolve(&rules, &lead, None, None).unwrap();
        assert_eq!(resolved.rule.id, 1);
    }

    #[test]
    fn test_resolve_skips_inactive_rules() {
        let mut inactive = rule(1);
        inactive.priority = 1;
        inactive.is_active = false;
        let mut active = rule(2);
        active.priority = 2;

        let rules = [inactive, active];
        let resolved = resolve(&rules, &person(1, 1), None, None).unwrap();
        assert_eq!(resolved.rule.id, 2);
    }

    #[test]
    fn test_resolve_filters_by_source() {
        let mut zillow = rule(1);
        zillow.priority = 1;
        zillow.source_type = Some("zillow".to_owned());
        let mut any_source = rule(2);
        any_source.priority = 2;

        let rules = [zillow, any_source];
        let lead = lead_from("realtor");
        let resolved = resolve(&rules, &lead, lead.source_type.as_deref(), None).unwrap();
        assert_eq!(resolved.rule.id, 2);
    }

    #[test]
    fn test_resolve_skips_rules_without_a_destination() {
        let mut broken = rule(1);
        broken.priority = 1;
        broken.group_id = None;
        let mut working = rule(2);
        working.priority = 2;

        let rules = [broken, working];
        let resolved = resolve(&rules, &person(1, 1), None, None).unwrap();
        assert_eq!(resolved.rule.id, 2);
    }

    #[test]
    fn test_rule_with_no_conditions_matches_any_lead() {
        let mut unconditional = rule(1);
        unconditional.match_type = MatchType::Any;
        assert!(rule_matches(&unconditional, &person(1, 1)));
    }

    #[test]
    fn test_all_requires_every_condition() {
        let mut strict = rule(1);
        strict.conditions = vec![
            condition_for_rule(1, 1, "name", "contains", json!("Ada")),
            condition_for_rule(2, 1, "email", "is_set", json!(null)),
        ];

        let mut lead = person(1, 1);
        lead.name = "Ada Lovelace".to_owned();
        assert!(!rule_matches(&strict, &lead));

        lead.email = Some("ada@example.com".to_owned());
        assert!(rule_matches(&strict, &lead));
    }

    #[test]
    fn test_any_requires_at_least_one_condition() {
        let mut relaxed = rule(1);
        relaxed.match_type = MatchType::Any;
        relaxed.conditions = vec![
            condition_for_rule(1, 1, "name", "eq", json!("Grace Hopper")),
            condition_for_rule(2, 1, "email", "is_set", json!(null)),
        ];

        let mut lead = person(1, 1);
        lead.name = "Ada Lovelace".to_owned();
        assert!(!rule_matches(&relaxed, &lead));

        lead.email = Some("ada@example.com".to_owned());
        assert!(rule_matches(&relaxed, &lead));
    }

    #[test]
    fn test_default_rule_catches_unmatched_leads() {
        let mut conditional = rule(1);
        conditional.priority = 1;
        conditional.conditions = vec![condition_for_rule(1, 1, "name", "eq", json!("Nobody"))];
        let mut fallback = rule(2);
        fallback.priority = 2;
        fallback.is_default = true;
        fallback.conditions = vec![condition_for_rule(2, 2, "name", "eq", json!("Nobody"))];

        // Neither rule's conditions match, but the default still routes.
        let rules = [conditional, fallback];
        let resolved = resolve(&rules, &person(1, 1), None, None).unwrap();
        assert_eq!(resolved.rule.id, 2);
    }

    #[test]
    fn test_first_default_in_order_wins_the_fallback() {
        let mut late_default = rule(1);
        late_default.priority = 9;
        late_default.is_default = true;
        late_default.conditions = vec![condition_for_rule(1, 1, "name", "eq", json!("Nobody"))];
        let mut early_default = rule(2);
        early_default.priority = 3;
        early_default.is_default = true;
        early_default.conditions = vec![condition_for_rule(2, 2, "name", "eq", json!("Nobody"))];

        let rules = [late_default, early_default];
        let resolved = resolve(&rules, &person(1, 1), None, None).unwrap();
        assert_eq!(resolved.rule.id, 2);
    }

    #[test]
    fn test_resolve_returns_none_without_matches_or_default() {
        let mut conditional = rule(1);
        conditional.conditions = vec![condition_for_rule(1, 1, "name", "eq", json!("Nobody"))];
        assert!(resolve(&[conditional], &person(1, 1), None, None).is_none());
    }

    #[test]
    fn test_validate_new_rule_collects_field_errors() {
        let mut input = crate::test_utils::new_rule("route to pool");
        input.name = "  ".to_owned();
        input.conditions.push(crate::types::NewCondition {
            field: String::new(),
            operator: "eq".to_owned(),
            value: json!("x"),
        });

        let errors = validate_new_rule(&input).unwrap_err();
        assert!(errors.fields.contains_key("name"));
        assert!(errors.fields.contains_key("conditions[0].field"));
    }

    #[test]
    fn test_validate_new_rule_allows_unknown_operators() {
        let mut input = crate::test_utils::new_rule("future proof");
        input.conditions.push(crate::types::NewCondition {
            field: "city".to_owned(),
            operator: "regex".to_owned(),
            value: json!(".*"),
        });
        assert!(validate_new_rule(&input).is_ok());
    }
}
