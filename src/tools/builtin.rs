//! Built-in tool set.
//!
//! Contract-level implementations of the tools the pipeline assumes.
//! Outward effects stay behind seams: `message.send` and `user.remind`
//! push onto mpsc channels the gateway drains, `memory.query` and
//! `identity.update` go through the memory client, and the guild
//! introspection tools call a [`GuildInfo`] capability.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::memory::{canonical_user_id, MemoryApi};

use super::{timeparse, Tool, ToolDefinition, ToolError, ToolRegistry};

/// An outbound chat message for the gateway to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination channel.
    pub channel_id: String,
    /// Sanitized, length-capped content.
    pub content: String,
}

/// A scheduled reminder for the gateway to deliver later.
#[derive(Debug, Clone)]
pub struct ReminderRequest {
    /// Identifier returned to the caller.
    pub reminder_id: String,
    /// User to remind.
    pub user_id: String,
    /// Channel to deliver on, when one was given.
    pub channel_id: Option<String>,
    /// Reminder text.
    pub text: String,
    /// Absolute delivery instant.
    pub deliver_at: DateTime<Utc>,
}

/// Guild introspection capability (the gateway knows; the core does not).
#[async_trait]
pub trait GuildInfo: Send + Sync {
    /// Current member count of a guild.
    async fn member_count(&self, guild_id: &str) -> Result<u64, ToolError>;

    /// Moderation statistics over a trailing window.
    async fn moderation_stats(
        &self,
        guild_id: &str,
        window_hours: u64,
    ) -> Result<Value, ToolError>;
}

/// Shared dependencies for the built-in tool set.
pub struct BuiltinDeps {
    /// Sink for outbound chat messages.
    pub outbound_tx: mpsc::Sender<OutboundMessage>,
    /// Sink for scheduled reminders.
    pub reminder_tx: mpsc::Sender<ReminderRequest>,
    /// Memory service client.
    pub memory: Arc<dyn MemoryApi>,
    /// Guild introspection capability.
    pub guild_info: Arc<dyn GuildInfo>,
    /// Outbound message length cap.
    pub max_message_len: usize,
    /// Reminder zone; `None` means host-local.
    pub reminder_offset: Option<FixedOffset>,
}

/// Register every built-in tool, then `system.capabilities` over the
/// resulting definition list.
pub fn register_builtins(registry: &mut ToolRegistry, deps: BuiltinDeps) {
    registry.register(Arc::new(MessageSendTool {
        tx: deps.outbound_tx,
        max_len: deps.max_message_len,
    }));
    registry.register(Arc::new(MemoryQueryTool {
        memory: deps.memory.clone(),
    }));
    registry.register(Arc::new(UserRemindTool {
        tx: deps.reminder_tx,
        offset: deps.reminder_offset,
    }));
    registry.register(Arc::new(IdentityUpdateTool {
        memory: deps.memory,
    }));
    registry.register(Arc::new(GuildMemberCountTool {
        info: deps.guild_info.clone(),
    }));
    registry.register(Arc::new(GuildModStatsTool {
        info: deps.guild_info,
    }));

    let definitions = registry.definitions();
    registry.register(Arc::new(CapabilitiesTool { definitions }));
}

// ---------------------------------------------------------------------------
// message.send
// ---------------------------------------------------------------------------

/// Sends a chat message through the outbound channel.
pub struct MessageSendTool {
    tx: mpsc::Sender<OutboundMessage>,
    max_len: usize,
}

#[async_trait]
impl Tool for MessageSendTool {
    fn name(&self) -> &str {
        "message.send"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "message.send".to_owned(),
            description: "Send a message to a channel.".to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "channelId": { "type": "string", "description": "Destination channel." },
                    "content": { "type": "string", "description": "Message text." }
                },
                "required": ["channelId", "content"]
            }),
        }
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["ok"],
            "properties": {
                "ok": { "type": "boolean" },
                "status": { "type": "integer" },
                "rateLimit": { "type": "integer" }
            }
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let channel_id = require_str(&args, "channelId")?;
        let content = require_str(&args, "content")?;

        let safe = neutralize_mentions(content);
        let capped = truncate_chars(&safe, self.max_len);

        self.tx
            .try_send(OutboundMessage {
                channel_id: channel_id.to_owned(),
                content: capped,
            })
            .map_err(|e| {
                warn!(error = %e, "outbound channel refused message");
                ToolError::ExecutionFailed(format!("failed to queue message: {e}"))
            })?;

        Ok(json!({ "ok": true, "status": 200 }))
    }
}

/// Defang `@everyone` / `@here` with a zero-width space.
fn neutralize_mentions(content: &str) -> String {
    content
        .replace("@everyone", "@\u{200b}everyone")
        .replace("@here", "@\u{200b}here")
}

/// Truncate to a character count, appending an ellipsis when cut.
fn truncate_chars(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_owned();
    }
    let kept: String = content.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{kept}…")
}

// ---------------------------------------------------------------------------
// memory.query
// ---------------------------------------------------------------------------

/// Hybrid search against the memory service.
pub struct MemoryQueryTool {
    memory: Arc<dyn MemoryApi>,
}

#[async_trait]
impl Tool for MemoryQueryTool {
    fn name(&self) -> &str {
        "memory.query"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "memory.query".to_owned(),
            description: "Search long-term memory.".to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "q": { "type": "string", "description": "Search query." },
                    "query": { "type": "string", "description": "Alias for q." },
                    "limit": { "type": "integer", "description": "Max results (default 5)." },
                    "channelId": { "type": "string" },
                    "mode": { "type": "string" }
                }
            }),
        }
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["ok", "items"],
            "properties": {
                "ok": { "type": "boolean" },
                "items": { "type": "array" },
                "answer": { "type": "string" }
            }
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let query = args
            .get("q")
            .or_else(|| args.get("query"))
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("missing required field: q".to_owned()))?;
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .and_then(|l| u32::try_from(l).ok())
            .unwrap_or(5);

        debug!(query, limit, "memory.query");

        let hits = self
            .memory
            .hybrid_search(query, limit)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("memory search failed: {e}")))?;

        let items: Vec<Value> = hits
            .iter()
            .map(|h| json!({ "content": h.content, "score": h.score }))
            .collect();

        let answer = hits.first().map(|h| h.content.clone());
        let mut output = json!({ "ok": true, "items": items });
        if let Some(answer) = answer {
            output["answer"] = Value::String(answer);
        }
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// user.remind
// ---------------------------------------------------------------------------

/// Schedules a reminder for later delivery.
pub struct UserRemindTool {
    tx: mpsc::Sender<ReminderRequest>,
    offset: Option<FixedOffset>,
}

#[async_trait]
impl Tool for UserRemindTool {
    fn name(&self) -> &str {
        "user.remind"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "user.remind".to_owned(),
            description: "Schedule a reminder for a user.".to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "userId": { "type": "string" },
                    "text": { "type": "string", "description": "Reminder text." },
                    "time": { "type": "string", "description": "When to deliver (e.g. '5m', 'tomorrow morning', 'at 14:30')." },
                    "channelId": { "type": "string" }
                },
                "required": ["userId"]
            }),
        }
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["ok", "delaySec", "reminderId"],
            "properties": {
                "ok": { "type": "boolean" },
                "delaySec": { "type": "integer" },
                "reminderId": { "type": "string" }
            }
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let user_id = require_str(&args, "userId")?;

        // Callers use several spellings for the text and time fields.
        let text = args
            .get("text")
            .or_else(|| args.get("content"))
            .or_else(|| args.get("message"))
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("missing required field: text".to_owned()))?;

        let time_field = args
            .get("time")
            .or_else(|| args.get("duration"))
            .or_else(|| args.get("delay"))
            .or_else(|| args.get("delaySec"));

        let now = Utc::now();
        let delivery = match time_field {
            Some(Value::Number(n)) => {
                let secs = n.as_i64().unwrap_or(0).max(0);
                chrono::Duration::try_seconds(secs)
                    .and_then(|d| now.checked_add_signed(d))
                    .map(|deliver_at| timeparse::DeliveryTime {
                        deliver_at,
                        delay_secs: secs,
                    })
            }
            Some(Value::String(s)) => timeparse::parse_delivery(s, now, self.offset),
            _ => None,
        }
        .ok_or_else(|| {
            ToolError::InvalidInput("missing or unparseable field: time".to_owned())
        })?;

        let reminder_id = format!("rem-{}", Uuid::new_v4());
        let channel_id = args
            .get("channelId")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);

        self.tx
            .try_send(ReminderRequest {
                reminder_id: reminder_id.clone(),
                user_id: user_id.to_owned(),
                channel_id,
                text: text.to_owned(),
                deliver_at: delivery.deliver_at,
            })
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to queue reminder: {e}")))?;

        Ok(json!({
            "ok": true,
            "delaySec": delivery.delay_secs,
            "reminderId": reminder_id,
        }))
    }
}

// ---------------------------------------------------------------------------
// identity.update
// ---------------------------------------------------------------------------

/// Updates identity preferences on the author's entity.
pub struct IdentityUpdateTool {
    memory: Arc<dyn MemoryApi>,
}

#[async_trait]
impl Tool for IdentityUpdateTool {
    fn name(&self) -> &str {
        "identity.update"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "identity.update".to_owned(),
            description: "Update a user's identity preferences (aliases, intimacy).".to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "userId": { "type": "string" },
                    "addPublicAliases": { "type": "array", "items": { "type": "string" } },
                    "addPrivateAliases": { "type": "array", "items": { "type": "string" } },
                    "setAllowAutoIntimate": { "type": "boolean" }
                },
                "required": ["userId"]
            }),
        }
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["ok"],
            "properties": {
                "ok": { "type": "boolean" },
                "identity": { "type": "object" }
            }
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let user_id = require_str(&args, "userId")?;
        let entity_id = canonical_user_id(user_id);

        let existing = self
            .memory
            .get_user_entity(&entity_id)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("entity fetch failed: {e}")))?;

        let current_identity = existing
            .as_ref()
            .and_then(|e| e.traits.get("identity"))
            .cloned()
            .unwrap_or(Value::Null);

        let add_public = string_array(&args, "addPublicAliases");
        let add_private = string_array(&args, "addPrivateAliases");
        let set_allow = args
            .get("setAllowAutoIntimate")
            .and_then(Value::as_bool);

        let identity = merge_identity(&current_identity, &add_public, &add_private, set_allow);
        let traits = json!({ "identity": identity });

        self.memory
            .upsert_user_entity(&entity_id, &traits)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("entity upsert failed: {e}")))?;

        Ok(json!({ "ok": true, "identity": traits["identity"] }))
    }
}

/// Merge alias additions into an identity trait object.
///
/// Keeps the public/private sets disjoint: an alias added as private is
/// removed from the public list, case-insensitively, and a public
/// addition that matches an existing private alias is dropped.
pub fn merge_identity(
    current: &Value,
    add_public: &[String],
    add_private: &[String],
    set_allow: Option<bool>,
) -> Value {
    let mut public: Vec<String> = current
        .get("publicAliases")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default();
    let mut private: Vec<String> = current
        .get("privateAliases")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default();
    let mut allow = current
        .get("allowAutoIntimate")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    for alias in add_private {
        if !private.iter().any(|p| p.eq_ignore_ascii_case(alias)) {
            private.push(alias.clone());
        }
    }
    // Private wins: drop any public entry shadowed by a private alias.
    public.retain(|p| !private.iter().any(|q| q.eq_ignore_ascii_case(p)));

    for alias in add_public {
        let shadowed = private.iter().any(|p| p.eq_ignore_ascii_case(alias));
        let present = public.iter().any(|p| p.eq_ignore_ascii_case(alias));
        if !shadowed && !present {
            public.push(alias.clone());
        }
    }

    if let Some(v) = set_allow {
        allow = v;
    }

    json!({
        "publicAliases": public,
        "privateAliases": private,
        "allowAutoIntimate": allow,
    })
}

// ---------------------------------------------------------------------------
// guild introspection
// ---------------------------------------------------------------------------

/// Reports a guild's member count.
pub struct GuildMemberCountTool {
    info: Arc<dyn GuildInfo>,
}

#[async_trait]
impl Tool for GuildMemberCountTool {
    fn name(&self) -> &str {
        "guild.member.count"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "guild.member.count".to_owned(),
            description: "Count the members of the current guild.".to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": { "guildId": { "type": "string" } },
                "required": ["guildId"]
            }),
        }
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["ok", "count"],
            "properties": {
                "ok": { "type": "boolean" },
                "count": { "type": "integer" }
            }
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let guild_id = require_str(&args, "guildId")?;
        let count = self.info.member_count(guild_id).await?;
        Ok(json!({ "ok": true, "count": count }))
    }
}

/// Reports moderation statistics over a trailing window.
pub struct GuildModStatsTool {
    info: Arc<dyn GuildInfo>,
}

#[async_trait]
impl Tool for GuildModStatsTool {
    fn name(&self) -> &str {
        "guild.mod.stats"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "guild.mod.stats".to_owned(),
            description: "Moderation statistics for the current guild.".to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "guildId": { "type": "string" },
                    "windowHours": { "type": "integer", "description": "Trailing window (default 24)." }
                },
                "required": ["guildId"]
            }),
        }
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["ok", "windowHours", "stats"],
            "properties": {
                "ok": { "type": "boolean" },
                "windowHours": { "type": "integer" },
                "stats": { "type": "object" }
            }
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let guild_id = require_str(&args, "guildId")?;
        let window_hours = args
            .get("windowHours")
            .and_then(Value::as_u64)
            .unwrap_or(24);

        let stats = self.info.moderation_stats(guild_id, window_hours).await?;
        Ok(json!({ "ok": true, "windowHours": window_hours, "stats": stats }))
    }
}

// ---------------------------------------------------------------------------
// system.capabilities
// ---------------------------------------------------------------------------

/// Lists every registered tool with its input schema.
pub struct CapabilitiesTool {
    definitions: Vec<ToolDefinition>,
}

#[async_trait]
impl Tool for CapabilitiesTool {
    fn name(&self) -> &str {
        "system.capabilities"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "system.capabilities".to_owned(),
            description: "List the tools this runtime can use.".to_owned(),
            input_schema: json!({ "type": "object", "properties": {} }),
        }
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["ok", "tools"],
            "properties": {
                "ok": { "type": "boolean" },
                "tools": { "type": "array" }
            }
        })
    }

    async fn call(&self, _args: Value) -> Result<Value, ToolError> {
        let tools: Vec<Value> = self
            .definitions
            .iter()
            .map(|d| json!({ "name": d.name, "description": d.description }))
            .collect();
        Ok(json!({ "ok": true, "tools": tools }))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract a required string field from an argument bag.
fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidInput(format!("missing required field: {key}")))
}

/// Extract an optional string array, dropping non-string entries.
fn string_array(args: &Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default()
}
