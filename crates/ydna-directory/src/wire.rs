//! Decoding of Geni API payloads into the core model.

use crate::DirectoryError;
use serde_json::{Map, Value};
use ydna_core::{
    normalize_profile_id, FamilyUnion, Gender, ImmediateFamily, Profile, VitalEvent,
    PROFILE_ID_PREFIX, UNION_ID_PREFIX,
};

const REL_CHILD: &str = "child";
const REL_PARTNER: &str = "partner";

pub fn decode_profile(value: &Value) -> Result<Profile, DirectoryError> {
    let object = value
        .as_object()
        .ok_or_else(|| DirectoryError::Decode("profile payload is not an object".to_string()))?;
    let id = text(object, "id")
        .map(|id| reference_id(&id))
        .ok_or_else(|| DirectoryError::Decode("profile payload has no id".to_string()))?;
    Ok(profile_from_object(id, object, value))
}

/// Decodes a `profile/search` response. Results without an identifier are
/// dropped.
pub fn decode_search(value: &Value) -> Result<Vec<Profile>, DirectoryError> {
    let results = value
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| DirectoryError::Decode("search payload has no results".to_string()))?;
    Ok(results
        .iter()
        .filter_map(|result| decode_profile(result).ok())
        .collect())
}

/// Decodes an `immediate-family` response. Parents are partners of unions in
/// which the focus is a child; children and partners come from unions in
/// which the focus is a partner. Order follows the response's edge order.
pub fn decode_family(value: &Value, requested_id: &str) -> Result<ImmediateFamily, DirectoryError> {
    let object = value
        .as_object()
        .ok_or_else(|| DirectoryError::Decode("family payload is not an object".to_string()))?;

    let focus_value = object.get("focus").filter(|focus| focus.is_object());
    let focus_id = focus_value
        .and_then(|focus| focus.get("id"))
        .and_then(Value::as_str)
        .map(reference_id)
        .unwrap_or_else(|| normalize_profile_id(requested_id));

    let empty = Map::new();
    let nodes = object
        .get("nodes")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let mut family = ImmediateFamily::default();
    for (node_id, node) in nodes {
        let Some(node_object) = node.as_object() else {
            continue;
        };
        if node_id.starts_with(PROFILE_ID_PREFIX) {
            let id = text(node_object, "id")
                .map(|id| reference_id(&id))
                .unwrap_or_else(|| node_id.clone());
            family
                .profiles
                .push(profile_from_object(id, node_object, node));
        } else if node_id.starts_with(UNION_ID_PREFIX) {
            family.unions.push(union_from_object(node_id, node_object, node));
        }
    }

    family.focus = match focus_value {
        Some(focus) => Some(decode_profile(focus).unwrap_or_else(|_| {
            let fallback = focus.as_object().unwrap_or(&empty);
            profile_from_object(focus_id.clone(), fallback, focus)
        })),
        None => family
            .profiles
            .iter()
            .find(|profile| profile.id == focus_id)
            .cloned(),
    };

    let focus_edges = nodes
        .get(&focus_id)
        .and_then(|node| node.get("edges"))
        .or_else(|| focus_value.and_then(|focus| focus.get("edges")))
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    for (union_id, edge) in focus_edges {
        if !union_id.starts_with(UNION_ID_PREFIX) {
            continue;
        }
        let union_edges = nodes
            .get(union_id)
            .and_then(|node| node.get("edges"))
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        match rel(edge) {
            Some(REL_CHILD) => {
                for (member_id, member_edge) in union_edges {
                    if rel(member_edge) == Some(REL_PARTNER) {
                        push_member(&mut family.parents, &family.profiles, member_id);
                    }
                }
            }
            Some(REL_PARTNER) => {
                for (member_id, member_edge) in union_edges {
                    if member_id == &focus_id {
                        continue;
                    }
                    match rel(member_edge) {
                        Some(REL_CHILD) => {
                            push_member(&mut family.children, &family.profiles, member_id)
                        }
                        Some(REL_PARTNER) => {
                            push_member(&mut family.partners, &family.profiles, member_id)
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    Ok(family)
}

/// Accepts `profile-<n>`, API URLs and bare identifiers.
pub fn reference_id(reference: &str) -> String {
    normalize_profile_id(reference)
}

fn push_member(target: &mut Vec<Profile>, profiles: &[Profile], member_id: &str) {
    if !member_id.starts_with(PROFILE_ID_PREFIX) {
        return;
    }
    if let Some(profile) = profiles.iter().find(|profile| profile.id == member_id) {
        target.push(profile.clone());
    }
}

fn rel(edge: &Value) -> Option<&str> {
    edge.get("rel").and_then(Value::as_str)
}

fn profile_from_object(id: String, object: &Map<String, Value>, raw: &Value) -> Profile {
    Profile {
        id,
        guid: text(object, "guid"),
        display_name: text(object, "display_name").or_else(|| text(object, "name")),
        first_name: text(object, "first_name"),
        middle_name: text(object, "middle_name"),
        last_name: text(object, "last_name"),
        maiden_name: text(object, "maiden_name"),
        suffix: text(object, "suffix"),
        gender: Gender::parse_lenient(object.get("gender").and_then(Value::as_str)),
        birth: vital_event(object.get("birth")),
        death: vital_event(object.get("death")),
        is_alive: object
            .get("is_alive")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        occupation: text(object, "occupation"),
        about_me: text(object, "about_me"),
        raw: raw.clone(),
        fetched_at: None,
        updated_at: None,
    }
}

fn union_from_object(node_id: &str, object: &Map<String, Value>, raw: &Value) -> FamilyUnion {
    let edges = object.get("edges").and_then(Value::as_object);
    let members = |key: &str, relation: &str| -> Vec<String> {
        match object.get(key).and_then(Value::as_array) {
            Some(listed) => listed
                .iter()
                .filter_map(Value::as_str)
                .map(reference_id)
                .collect(),
            None => edges
                .map(|edges| {
                    edges
                        .iter()
                        .filter(|(_, edge)| rel(edge) == Some(relation))
                        .map(|(member_id, _)| member_id.clone())
                        .collect()
                })
                .unwrap_or_default(),
        }
    };

    FamilyUnion {
        id: text(object, "id").unwrap_or_else(|| node_id.to_string()),
        partners: members("partners", REL_PARTNER),
        children: members("children", REL_CHILD),
        marriage: vital_event(object.get("marriage")),
        divorce_date: object
            .get("divorce")
            .map(|divorce| vital_event(Some(divorce)))
            .and_then(|divorce| divorce.date),
        status: text(object, "status"),
        raw: raw.clone(),
    }
}

/// Geni sends events either as `{date: {formatted_date}, location: {place_name}}`
/// or with plain strings in those slots.
fn vital_event(value: Option<&Value>) -> VitalEvent {
    let Some(event) = value.and_then(Value::as_object) else {
        return VitalEvent::default();
    };
    VitalEvent {
        date: nested_text(event.get("date"), "formatted_date"),
        place: nested_text(event.get("location"), "place_name"),
    }
}

fn nested_text(value: Option<&Value>, key: &str) -> Option<String> {
    match value? {
        Value::String(raw) => non_blank(raw),
        Value::Object(object) => text(object, key),
        _ => None,
    }
}

fn text(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::String(raw) => non_blank(raw),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn non_blank(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
