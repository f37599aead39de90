//! Replicated command schema.
//!
//! Commands are what leaders submit to the consensus log and what the
//! FSM adapter decodes on apply. The encoding is a schema-version byte
//! followed by the bincode body; decoders accept any version they know,
//! so old entries stay readable after upgrades.

use crate::core::error::{KvError, KvResult};
use serde::{Deserialize, Serialize};

/// Current command schema version.
pub const SCHEMA_VERSION: u8 = 1;

/// A state-machine command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Create or replace a key.
    Put { key: String, value: String },
    /// Remove a key.
    Delete { key: String },
}

impl Command {
    /// Encode with the current schema version.
    pub fn encode(&self) -> KvResult<Vec<u8>> {
        let mut buf = vec![SCHEMA_VERSION];
        let body = bincode::serialize(self).map_err(|err| KvError::BadCommand {
            reason: err.to_string(),
        })?;
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decode any known schema version.
    pub fn decode(data: &[u8]) -> KvResult<Self> {
        let (&version, body) = data.split_first().ok_or_else(|| KvError::BadCommand {
            reason: "empty command".to_string(),
        })?;
        match version {
            SCHEMA_VERSION => bincode::deserialize(body).map_err(|err| KvError::BadCommand {
                reason: err.to_string(),
            }),
            other => Err(KvError::BadCommand {
                reason: format!("unknown schema version {other}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_round_trips() {
        let cmd = Command::Put {
            key: "testkey".into(),
            value: "testvalue".into(),
        };
        assert_eq!(Command::decode(&cmd.encode().unwrap()).unwrap(), cmd);
    }

    #[test]
    fn delete_round_trips() {
        let cmd = Command::Delete {
            key: "testkey".into(),
        };
        assert_eq!(Command::decode(&cmd.encode().unwrap()).unwrap(), cmd);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            Command::decode(&[]),
            Err(KvError::BadCommand { .. })
        ));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut encoded = Command::Delete { key: "k".into() }.encode().unwrap();
        encoded[0] = 99;
        let err = Command::decode(&encoded).unwrap_err();
        assert!(err.to_string().contains("unknown schema version"));
    }

    #[test]
    fn garbage_body_is_rejected() {
        assert!(matches!(
            Command::decode(&[SCHEMA_VERSION, 0xff, 0xff]),
            Err(KvError::BadCommand { .. })
        ));
    }
}
