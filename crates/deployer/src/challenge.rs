// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Mapping from a descriptor to the platform's challenge record.

use serde_json::{Map, Value, json};

use crate::descriptor::{Descriptor, DescriptorError, keys};
use crate::target::Target;

/// Number of solves over which a linearly decaying challenge reaches its minimum.
pub const DECAY_STEP_COUNT: u32 = 10;
/// Decay used for container challenges when no explicit limit is given.
pub const CONTAINER_DECAY: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Difficulty {
    Beginner,
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn parse(label: &str) -> Result<Self, DescriptorError> {
        match label.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(Difficulty::Beginner),
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            _ => Err(DescriptorError::UnknownDifficulty(label.to_string())),
        }
    }

    /// `(initial, minimum)` score band.
    pub fn scores(self) -> (u32, u32) {
        match self {
            Difficulty::Beginner => (100, 50),
            Difficulty::Easy => (250, 100),
            Difficulty::Medium => (500, 250),
            Difficulty::Hard => (1000, 500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeKind {
    Standard {
        value: Option<u32>,
    },
    Container {
        initial: Option<u32>,
        minimum: Option<u32>,
        decay: Option<u32>,
        connect_type: Option<String>,
        port: Option<u32>,
        command: Option<String>,
        image: String,
    },
    Dynamic {
        initial: Option<u32>,
        minimum: Option<u32>,
        decay: Option<u32>,
        function: String,
    },
    /// Any other `CHALLENGE_TYPE` (or none). Only the shared fields are sent.
    Unrecognized(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRecord {
    pub name: String,
    pub description: String,
    pub category: String,
    pub state: String,
    pub kind: ChallengeKind,
}

impl ChallengeRecord {
    /// Builds the record for `target`. `readme` is the staged, already scanned readme.
    pub fn from_descriptor(
        descriptor: &Descriptor,
        target: &Target,
        readme: Option<&str>,
    ) -> Result<Self, DescriptorError> {
        let difficulty = descriptor
            .get(keys::CHALLENGE_DIFFICULTY)
            .map(Difficulty::parse)
            .transpose()?;
        let band = difficulty.map(Difficulty::scores);
        let initial = descriptor
            .get_u32(keys::CHALLENGE_SCORE)?
            .or(band.map(|(initial, _)| initial));
        let minimum = descriptor
            .get_u32(keys::DECAYED_MINIMUM)?
            .or(band.map(|(_, minimum)| minimum));

        let kind = match descriptor.get(keys::CHALLENGE_TYPE) {
            Some("standard") => ChallengeKind::Standard { value: initial },
            Some("container") => ChallengeKind::Container {
                initial,
                minimum,
                decay: descriptor
                    .get_u32(keys::DECAY_LIMIT)?
                    .or(difficulty.map(|_| CONTAINER_DECAY)),
                connect_type: descriptor.get(keys::DOCKER_CONNECT_TYPE).map(str::to_string),
                port: descriptor.get_u32(keys::DOCKER_PORT)?,
                command: descriptor.get(keys::DOCKER_COMMAND).map(str::to_string),
                image: target.identity.image_tag(),
            },
            Some("dynamic") => ChallengeKind::Dynamic {
                initial,
                minimum,
                decay: match descriptor.get_u32(keys::DECAY_VALUE)? {
                    Some(decay) => Some(decay),
                    None if difficulty.is_some() => initial
                        .zip(minimum)
                        .map(|(i, m)| i.saturating_sub(m) / DECAY_STEP_COUNT),
                    None => None,
                },
                function: descriptor
                    .get(keys::DECAY_FUNCTION)
                    .unwrap_or("linear")
                    .to_string(),
            },
            other => ChallengeKind::Unrecognized(other.map(str::to_string)),
        };

        Ok(Self {
            name: descriptor
                .get(keys::CHALLENGE_NAME)
                .unwrap_or(target.name.as_str())
                .to_string(),
            description: readme
                .or(descriptor.get(keys::CHALLENGE_MESSAGE))
                .unwrap_or_default()
                .to_string(),
            category: descriptor
                .get(keys::CHALLENGE_CATEGORY)
                .unwrap_or_default()
                .to_string(),
            state: descriptor
                .get(keys::CHALLENGE_STATE)
                .unwrap_or("hidden")
                .to_string(),
            kind,
        })
    }

    /// Platform wire shape.
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("name".into(), json!(self.name));
        body.insert("description".into(), json!(self.description));
        body.insert("category".into(), json!(self.category));
        body.insert("state".into(), json!(self.state));
        let mut put = |key: &str, value: Value| {
            if !value.is_null() {
                body.insert(key.to_string(), value);
            }
        };
        match &self.kind {
            ChallengeKind::Standard { value } => {
                put("type", json!("standard"));
                put("value", json!(value));
            }
            ChallengeKind::Container {
                initial,
                minimum,
                decay,
                connect_type,
                port,
                command,
                image,
            } => {
                put("type", json!("container"));
                put("connection_info", json!("Container"));
                put("initial", json!(initial));
                put("minimum", json!(minimum));
                put("decay", json!(decay));
                put("ctype", json!(connect_type));
                put("port", json!(port));
                put("command", json!(command));
                put("image", json!(image));
            }
            ChallengeKind::Dynamic {
                initial,
                minimum,
                decay,
                function,
            } => {
                put("type", json!("dynamic"));
                put("initial", json!(initial));
                put("minimum", json!(minimum));
                put("decay", json!(decay));
                put("function", json!(function));
            }
            ChallengeKind::Unrecognized(_) => {}
        }
        Value::Object(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn target() -> Target {
        Target::new(PathBuf::from("/repo/baby-web")).unwrap()
    }

    fn record(descriptor: &str) -> ChallengeRecord {
        ChallengeRecord::from_descriptor(&Descriptor::parse(descriptor), &target(), None).unwrap()
    }

    #[test]
    fn test_shared_field_defaults() {
        let r = record("FLAG=x\nCHALLENGE_TYPE=standard\nCHALLENGE_SCORE=100");
        assert_eq!(r.name, "baby-web");
        assert_eq!(r.state, "hidden");
        assert_eq!(r.category, "");
        assert_eq!(r.kind, ChallengeKind::Standard { value: Some(100) });
    }

    #[test]
    fn test_readme_wins_over_message() {
        let d = Descriptor::parse("CHALLENGE_MESSAGE=short");
        let r = ChallengeRecord::from_descriptor(&d, &target(), Some("# long")).unwrap();
        assert_eq!(r.description, "# long");
        let r = ChallengeRecord::from_descriptor(&d, &target(), None).unwrap();
        assert_eq!(r.description, "short");
    }

    #[test]
    fn test_difficulty_derives_dynamic_scores() {
        let r = record("CHALLENGE_TYPE=dynamic\nCHALLENGE_DIFFICULTY=Medium");
        assert_eq!(
            r.kind,
            ChallengeKind::Dynamic {
                initial: Some(500),
                minimum: Some(250),
                decay: Some(25),
                function: "linear".to_string(),
            }
        );
    }

    #[test]
    fn test_explicit_scores_win_over_difficulty() {
        let r = record("CHALLENGE_TYPE=dynamic\nCHALLENGE_DIFFICULTY=hard\nCHALLENGE_SCORE=700\nDECAY_VALUE=3");
        assert_eq!(
            r.kind,
            ChallengeKind::Dynamic {
                initial: Some(700),
                minimum: Some(500),
                decay: Some(3),
                function: "linear".to_string(),
            }
        );
    }

    #[test]
    fn test_container_uses_constant_decay_and_identity_image() {
        let r = record("CHALLENGE_TYPE=container\nCHALLENGE_DIFFICULTY=easy\nDOCKER_PORT=1337\nDOCKER_CONNECT_TYPE=tcp");
        let json = r.to_json();
        assert_eq!(json["type"], "container");
        assert_eq!(json["initial"], 250);
        assert_eq!(json["minimum"], 100);
        assert_eq!(json["decay"], CONTAINER_DECAY);
        assert_eq!(json["port"], 1337);
        assert_eq!(json["ctype"], "tcp");
        assert_eq!(json["image"], target().identity.image_tag());
        assert!(json.get("command").is_none());
    }

    #[test]
    fn test_unrecognized_type_only_sends_shared_fields() {
        let r = record("CHALLENGE_TYPE=koth\nCHALLENGE_SCORE=10");
        assert_eq!(r.kind, ChallengeKind::Unrecognized(Some("koth".to_string())));
        let json = r.to_json();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys.len(), 4);
        assert!(json.get("type").is_none());
    }

    #[test]
    fn test_unknown_difficulty_is_rejected() {
        let d = Descriptor::parse("CHALLENGE_DIFFICULTY=insane");
        assert!(matches!(
            ChallengeRecord::from_descriptor(&d, &target(), None),
            Err(DescriptorError::UnknownDifficulty(_))
        ));
    }
}
