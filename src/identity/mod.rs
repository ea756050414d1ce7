//! Identity model: zones, profiles, and addressing.
//!
//! Everything here is pure data-in/data-out so the safety invariants are
//! directly testable: a profile's public aliases never intersect its
//! private aliases, and addressing in a public zone never surfaces a
//! private alias.

pub mod sanitizer;

use chrono::Utc;
use serde_json::Value;

use crate::types::{
    AddressingChoice, IdentityProfile, IdentityTraits, IdentityZone, Observation, UserEntity,
};

/// Resolve the trust zone of an observation.
///
/// No guild means a direct message. `Trusted` is reserved for future
/// channel-level flags and is never produced here.
pub fn resolve_zone(observation: &Observation) -> IdentityZone {
    if observation.guild_id.is_none() {
        IdentityZone::PrivateDm
    } else {
        IdentityZone::PublicGuild
    }
}

/// Build a validated identity profile for the observation's author.
///
/// Seeding order for public aliases, deduplicating case-insensitively and
/// skipping anything that matches a private alias:
/// 1. the observation's display name
/// 2. the entity's display name
/// 3. the entity's stored aliases
/// 4. `traits.identity.publicAliases`
///
/// Non-string alias entries are dropped. An empty public list falls back
/// to the author id.
pub fn build_profile(
    observation: &Observation,
    entity: Option<&UserEntity>,
) -> IdentityProfile {
    let traits = entity
        .and_then(|e| e.traits.get("identity"))
        .cloned()
        .map(|v| serde_json::from_value::<IdentityTraits>(v).unwrap_or_default())
        .unwrap_or_default();

    let private_aliases: Vec<String> = traits
        .private_aliases
        .iter()
        .filter_map(Value::as_str)
        .map(ToOwned::to_owned)
        .collect();

    let mut public_aliases: Vec<String> = Vec::new();
    let mut push_public = |candidate: &str| {
        let is_private = private_aliases
            .iter()
            .any(|p| p.eq_ignore_ascii_case(candidate));
        let is_dup = public_aliases
            .iter()
            .any(|p: &String| p.eq_ignore_ascii_case(candidate));
        if !candidate.is_empty() && !is_private && !is_dup {
            public_aliases.push(candidate.to_owned());
        }
    };

    if let Some(display) = observation.author_display_name.as_deref() {
        push_public(display);
    }
    if let Some(display) = entity.and_then(|e| e.display.as_deref()) {
        push_public(display);
    }
    for alias in entity.map(|e| e.aliases.as_slice()).unwrap_or_default() {
        push_public(alias);
    }
    for alias in traits.public_aliases.iter().filter_map(Value::as_str) {
        push_public(alias);
    }

    if public_aliases.is_empty() {
        public_aliases.push(observation.author_id.clone());
    }

    let last_known_display_name = observation
        .author_display_name
        .clone()
        .or_else(|| entity.and_then(|e| e.display.clone()));

    IdentityProfile {
        user_id: observation.author_id.clone(),
        public_aliases,
        private_aliases,
        allow_auto_intimate: traits.allow_auto_intimate,
        last_known_display_name,
        last_updated: Utc::now(),
    }
}

/// The zone-safe name for outward reference.
///
/// Chain: last known display name, then the first public alias, then the
/// author id. A result colliding with any private alias hard-falls-back
/// to the author id.
pub fn safe_name(profile: &IdentityProfile) -> String {
    let candidate = profile
        .last_known_display_name
        .clone()
        .or_else(|| profile.public_aliases.first().cloned())
        .unwrap_or_else(|| profile.user_id.clone());

    let collides = profile
        .private_aliases
        .iter()
        .any(|p| p.eq_ignore_ascii_case(&candidate));
    if collides {
        profile.user_id.clone()
    } else {
        candidate
    }
}

/// Choose how the agent may address the author in the given zone.
///
/// Pure function of its inputs. In a public guild the intimate path is
/// always off and both names are zone-safe; in a DM the intimate alias is
/// used only when the author opted in and one exists.
pub fn choose_addressing(zone: IdentityZone, profile: &IdentityProfile) -> AddressingChoice {
    let safe = safe_name(profile);

    match zone {
        IdentityZone::PublicGuild => AddressingChoice {
            primary_name: safe.clone(),
            safe_name: safe,
            intimate_name: None,
            use_intimate: false,
        },
        IdentityZone::PrivateDm | IdentityZone::Trusted => {
            let intimate_name = profile.private_aliases.first().cloned();
            let use_intimate = profile.allow_auto_intimate && intimate_name.is_some();
            let primary_name = if use_intimate {
                intimate_name.clone().unwrap_or_else(|| safe.clone())
            } else {
                safe.clone()
            };
            AddressingChoice {
                primary_name,
                safe_name: safe,
                intimate_name,
                use_intimate,
            }
        }
    }
}
