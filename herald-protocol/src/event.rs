//! Event records exchanged as SEND/MESSAGE bodies.
//!
//! Body layout:
//!
//! ```text
//! user:<owner>
//! city:<city>
//! event name:<name>
//! date time:<epoch seconds>
//! general information:
//! <key>:<value>
//! ...
//! description:
//! <free text, may span lines>
//! ```

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// A structured incident report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// User that reported the event. Absent in event files; stamped by the
    /// publisher.
    #[serde(default)]
    pub user: String,

    pub city: String,

    #[serde(rename = "event_name")]
    pub name: String,

    /// Event time as epoch seconds.
    pub date_time: i64,

    /// Free-form extra fields.
    #[serde(default)]
    pub general_information: BTreeMap<String, String>,

    #[serde(default)]
    pub description: String,
}

impl Event {
    /// Returns the event with its owner set to `user`.
    pub fn with_owner(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Serializes the event into the SEND/MESSAGE body layout.
    pub fn to_body(&self) -> String {
        let mut body = String::new();
        let _ = writeln!(body, "user:{}", self.user);
        let _ = writeln!(body, "city:{}", self.city);
        let _ = writeln!(body, "event name:{}", self.name);
        let _ = writeln!(body, "date time:{}", self.date_time);
        body.push_str("general information:\n");
        for (key, value) in &self.general_information {
            let _ = writeln!(body, "{key}:{value}");
        }
        body.push_str("description:\n");
        body.push_str(&self.description);
        body
    }

    /// Parses an event from a MESSAGE body.
    ///
    /// Extra fields are optional; the fixed preamble fields are not.
    /// Everything after the `description:` line is the description,
    /// verbatim.
    pub fn from_body(body: &str) -> Result<Self, ProtocolError> {
        let mut user = None;
        let mut city = None;
        let mut name = None;
        let mut date_time = None;
        let mut general_information = BTreeMap::new();
        let mut in_general = false;
        let mut description_start = None;

        let mut offset = 0;
        for line in body.split('\n') {
            let next_offset = (offset + line.len() + 1).min(body.len());
            if line == "description:" {
                description_start = Some(next_offset);
                break;
            }
            if line == "general information:" {
                in_general = true;
            } else if let Some((key, value)) = line.split_once(':') {
                if in_general {
                    general_information.insert(key.to_string(), value.to_string());
                } else {
                    match key {
                        "user" => user = Some(value.to_string()),
                        "city" => city = Some(value.to_string()),
                        "event name" => name = Some(value.to_string()),
                        "date time" => {
                            let parsed = value.trim().parse::<i64>().map_err(|_| {
                                ProtocolError::MalformedFrame(format!(
                                    "date time '{value}' is not an integer"
                                ))
                            })?;
                            date_time = Some(parsed);
                        }
                        _ => {}
                    }
                }
            }
            offset = next_offset;
        }

        let missing =
            |field: &str| ProtocolError::MalformedFrame(format!("event body missing {field}"));

        Ok(Self {
            user: user.ok_or_else(|| missing("user"))?,
            city: city.ok_or_else(|| missing("city"))?,
            name: name.ok_or_else(|| missing("event name"))?,
            date_time: date_time.ok_or_else(|| missing("date time"))?,
            general_information,
            description: description_start
                .map(|start| body[start..].to_string())
                .unwrap_or_default(),
        })
    }
}

/// An event file: a channel name plus the events to report on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFile {
    pub channel_name: String,
    pub events: Vec<Event>,
}

impl EventFile {
    /// Loads and parses a JSON event file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        Event {
            user: "bob".to_string(),
            city: "Haifa".to_string(),
            name: "fire in the harbor".to_string(),
            date_time: 1_700_000_000,
            general_information: BTreeMap::from([
                ("active".to_string(), "true".to_string()),
                ("forces arrival".to_string(), "12:30".to_string()),
            ]),
            description: "thick smoke over pier 4\nroad closed".to_string(),
        }
    }

    #[test]
    fn test_body_roundtrip() {
        let event = sample_event();
        let parsed = Event::from_body(&event.to_body()).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_body_layout() {
        let event = sample_event();
        let body = event.to_body();
        assert_eq!(
            body,
            "user:bob\n\
             city:Haifa\n\
             event name:fire in the harbor\n\
             date time:1700000000\n\
             general information:\n\
             active:true\n\
             forces arrival:12:30\n\
             description:\n\
             thick smoke over pier 4\nroad closed"
        );
    }

    #[test]
    fn test_body_roundtrip_minimal() {
        let event = Event {
            user: "alice".to_string(),
            city: "Eilat".to_string(),
            name: "flood".to_string(),
            date_time: 0,
            general_information: BTreeMap::new(),
            description: String::new(),
        };
        let parsed = Event::from_body(&event.to_body()).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_from_body_missing_user() {
        let body = "city:Haifa\nevent name:fire\ndate time:100\ndescription:\n";
        let result = Event::from_body(body);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_from_body_bad_date_time() {
        let body = "user:bob\ncity:Haifa\nevent name:fire\ndate time:noon\ndescription:\n";
        let result = Event::from_body(body);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_description_preserves_colons_and_newlines() {
        let body = "user:bob\ncity:Haifa\nevent name:fire\ndate time:100\n\
                    general information:\ndescription:\nnote: call 102\nsecond line";
        let event = Event::from_body(body).unwrap();
        assert_eq!(event.description, "note: call 102\nsecond line");
    }

    #[test]
    fn test_event_file_parsing() {
        let json = r#"{
            "channel_name": "fire",
            "events": [
                {
                    "event_name": "fire in the harbor",
                    "city": "Haifa",
                    "date_time": 1700000000,
                    "general_information": {"active": "true"},
                    "description": "thick smoke"
                }
            ]
        }"#;
        let file: EventFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.channel_name, "fire");
        assert_eq!(file.events.len(), 1);

        let event = &file.events[0];
        assert!(event.user.is_empty());
        assert_eq!(event.name, "fire in the harbor");

        let stamped = event.clone().with_owner("bob");
        assert_eq!(stamped.user, "bob");
    }
}
