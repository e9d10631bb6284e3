//! Carrier call-control actions returned in webhook responses

use serde::{Deserialize, Serialize};

/// One carrier command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CarrierAction {
    Answer,
    Speak {
        payload: String,
        language: String,
        voice: String,
    },
    Hangup,
    Stream {
        stream_url: String,
        stream_track: String,
    },
}

impl CarrierAction {
    pub fn kind(&self) -> &'static str {
        match self {
            CarrierAction::Answer => "answer",
            CarrierAction::Speak { .. } => "speak",
            CarrierAction::Hangup => "hangup",
            CarrierAction::Stream { .. } => "stream",
        }
    }
}

/// Webhook response body: `{"actions": [...]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionList {
    pub actions: Vec<CarrierAction>,
}

impl ActionList {
    pub fn new(actions: Vec<CarrierAction>) -> Self {
        Self { actions }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.actions.iter().map(CarrierAction::kind).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_wire_format() {
        let list = ActionList::new(vec![
            CarrierAction::Answer,
            CarrierAction::Speak {
                payload: "Sorry".to_string(),
                language: "en-US".to_string(),
                voice: "female".to_string(),
            },
            CarrierAction::Hangup,
        ]);
        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(json["actions"][0]["type"], "answer");
        assert_eq!(json["actions"][1]["type"], "speak");
        assert_eq!(json["actions"][1]["payload"], "Sorry");
        assert_eq!(json["actions"][2]["type"], "hangup");
        assert_eq!(list.kinds(), vec!["answer", "speak", "hangup"]);
    }
}
