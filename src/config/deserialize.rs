// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Handles image refs and commands given as a string or a list.

use serde::Deserialize;

use crate::types::ImageRef;

pub fn deserialize_image_ref<'de, D>(deserializer: D) -> Result<ImageRef, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    ImageRef::parse(&s).map_err(serde::de::Error::custom)
}

/// Accepts `command: "make test"` (run through `sh -c`) or
/// `command: ["make", "test"]` (exec form).
pub fn deserialize_command<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let entry: Option<CommandEntry> = Option::deserialize(deserializer)?;
    match entry {
        None => Ok(None),
        Some(CommandEntry::Shell(s)) if s.trim().is_empty() => {
            Err(serde::de::Error::custom("command cannot be empty"))
        }
        Some(CommandEntry::Shell(s)) => Ok(Some(vec!["sh".to_string(), "-c".to_string(), s])),
        Some(CommandEntry::Exec(args)) if args.is_empty() => {
            Err(serde::de::Error::custom("command cannot be empty"))
        }
        Some(CommandEntry::Exec(args)) => Ok(Some(args)),
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandEntry {
    Shell(String),
    Exec(Vec<String>),
}
