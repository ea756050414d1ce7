//! Outward-content sanitizer.
//!
//! Defence in depth for public zones: whatever stage produced a plan,
//! private aliases must not reach a guild channel. Two regex passes run
//! over every `message.send` step, both word-bounded so substrings inside
//! longer words never fire (`"hi"` must not match inside `"history"`):
//!
//! 1. greeting + private alias → `"<greeting>, <safe name>!"`
//! 2. any standalone private alias → safe name
//!
//! The sanitizer also strips the `originalContent` side-channel from step
//! arguments and produces a sanitized observation copy for the executor;
//! reflection keeps the original so the audit trail stays faithful.
//!
//! Both passes are idempotent: a sanitized text contains no private
//! aliases, so a second application changes nothing.

use regex::Regex;
use tracing::warn;

use crate::types::{IdentityProfile, IdentityZone, Observation, Plan};

/// The sanitizer's safe replacement name.
///
/// First non-colliding candidate of {last known display name, first
/// public alias}; author id when both collide with a private alias.
fn replacement_name(profile: &IdentityProfile) -> String {
    let candidates = [
        profile.last_known_display_name.as_deref(),
        profile.public_aliases.first().map(String::as_str),
    ];

    candidates
        .into_iter()
        .flatten()
        .find(|candidate| {
            !profile
                .private_aliases
                .iter()
                .any(|p| p.eq_ignore_ascii_case(candidate))
        })
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| profile.user_id.clone())
}

/// Rewrite a single text through both passes.
///
/// Returns the sanitized text and how many replacements fired.
pub fn sanitize_text(text: &str, profile: &IdentityProfile) -> (String, u32) {
    let safe = replacement_name(profile);
    let mut result = text.to_owned();
    let mut corrections: u32 = 0;

    for alias in &profile.private_aliases {
        if alias.trim().is_empty() {
            continue;
        }
        let escaped = regex::escape(alias);

        // Pass 1: greeting + alias pair.
        let greeting_pattern =
            format!(r"(?i)\b(hi|hey|hello|greetings)[,\s]+{escaped}\b[!.]?");
        match Regex::new(&greeting_pattern) {
            Ok(re) => {
                let replaced = re
                    .replace_all(&result, format!("$1, {safe}!"))
                    .into_owned();
                if replaced != result {
                    corrections = corrections.saturating_add(1);
                    result = replaced;
                }
            }
            Err(e) => warn!(alias, error = %e, "greeting pattern failed to compile"),
        }

        // Pass 2: standalone alias sweep.
        let sweep_pattern = format!(r"(?i)\b{escaped}\b");
        match Regex::new(&sweep_pattern) {
            Ok(re) => {
                let replaced = re.replace_all(&result, safe.as_str()).into_owned();
                if replaced != result {
                    corrections = corrections.saturating_add(1);
                    result = replaced;
                }
            }
            Err(e) => warn!(alias, error = %e, "sweep pattern failed to compile"),
        }
    }

    (result, corrections)
}

/// Enforce identity invariants on a plan before execution.
///
/// Public zones only; other zones pass through untouched. Returns the
/// number of corrections applied (content rewrites and side-channel
/// removals), which callers log.
pub fn sanitize_plan(zone: IdentityZone, plan: &mut Plan, profile: &IdentityProfile) -> u32 {
    if !zone.is_public() {
        return 0;
    }

    let mut corrections: u32 = 0;

    for step in &mut plan.steps {
        // The raw utterance must never ride along to a tool.
        if step.args.remove("originalContent").is_some() {
            corrections = corrections.saturating_add(1);
        }

        if step.tool != "message.send" {
            continue;
        }
        let Some(content) = step.args.get("content").and_then(|v| v.as_str()) else {
            continue;
        };

        let (sanitized, fixed) = sanitize_text(content, profile);
        if fixed > 0 {
            warn!(
                corrections = fixed,
                "private alias scrubbed from outbound content"
            );
            step.args
                .insert("content".to_owned(), sanitized.into());
            corrections = corrections.saturating_add(fixed);
        }
    }

    corrections
}

/// Build the observation copy the executor sees.
///
/// In public zones the content has private aliases redacted; elsewhere
/// the copy is verbatim. The original observation is still what the
/// reflector persists.
pub fn sanitize_observation(
    zone: IdentityZone,
    observation: &Observation,
    profile: &IdentityProfile,
) -> Observation {
    let mut copy = observation.clone();
    if zone.is_public() {
        let (content, _) = sanitize_text(&observation.content, profile);
        copy.content = content;
    }
    copy
}
