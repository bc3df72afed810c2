//! Loading inbound trigger events (JSON validated against an embedded schema).

use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::core::trigger::Event;

pub const EVENT_SCHEMA: &str = include_str!("../../schemas/event.schema.json");

/// Parse and validate one event document.
pub fn parse_event(raw: &str) -> Result<Event> {
    let instance: Value = serde_json::from_str(raw).context("parse event json")?;
    let schema: Value = serde_json::from_str(EVENT_SCHEMA).context("parse event schema")?;
    let validator = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {err}"))?;
    if !validator.is_valid(&instance) {
        let messages = validator
            .iter_errors(&instance)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "event schema validation failed:\n- {}",
            messages.join("\n- ")
        ));
    }
    let event: Event = serde_json::from_value(instance).context("decode event")?;
    debug!(?event, "event loaded");
    Ok(event)
}

/// Read an event from `path`, or from stdin when `path` is `None`.
pub fn read_event(path: Option<&Path>) -> Result<Event> {
    let raw = match path {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("read event {}", path.display()))?
        }
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read event from stdin")?;
            buf
        }
    };
    parse_event(&raw)
}
