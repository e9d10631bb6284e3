//! Blocked-call failover
//!
//! Produces the terminating `answer -> speak -> hangup` sequence. Pure and
//! synchronous: it is also the dispatcher's last-resort response.

use crate::config::FailoverConfig;
use crate::domain::call::{ActionList, CarrierAction, CallSession};

const FALLBACK_LOCALE: &str = "en-US";

/// Localized decline message; unknown locales fall back to English
fn decline_message(locale: &str) -> Option<&'static str> {
    let message = match locale {
        "en-US" => "We're sorry, we are unable to take your call right now. Please try again later. Goodbye.",
        "es-ES" => "Lo sentimos, no podemos atender su llamada en este momento. Por favor, inténtelo más tarde. Adiós.",
        "fr-FR" => "Nous sommes désolés, nous ne pouvons pas prendre votre appel pour le moment. Veuillez réessayer plus tard. Au revoir.",
        "de-DE" => "Es tut uns leid, wir können Ihren Anruf gerade nicht entgegennehmen. Bitte versuchen Sie es später erneut. Auf Wiederhören.",
        _ => return None,
    };
    Some(message)
}

/// Blocked-call failover handler
#[derive(Debug, Clone)]
pub struct FailoverHandler {
    default_locale: String,
    voice: String,
}

impl FailoverHandler {
    pub fn new(config: &FailoverConfig) -> Self {
        Self {
            default_locale: config.default_locale.clone(),
            voice: config.voice.clone(),
        }
    }

    /// Decline sequence in the given locale
    pub fn actions(&self, locale: Option<&str>) -> ActionList {
        let (language, message) = [locale, Some(self.default_locale.as_str())]
            .into_iter()
            .flatten()
            .find_map(|l| decline_message(l).map(|m| (l, m)))
            .unwrap_or((FALLBACK_LOCALE, decline_message(FALLBACK_LOCALE).unwrap_or_default()));

        ActionList::new(vec![
            CarrierAction::Answer,
            CarrierAction::Speak {
                payload: message.to_string(),
                language: language.to_string(),
                voice: self.voice.clone(),
            },
            CarrierAction::Hangup,
        ])
    }

    /// Decline sequence for a session (its locale), or the default one
    pub fn for_session(&self, session: Option<&CallSession>) -> ActionList {
        self.actions(session.and_then(CallSession::locale))
    }
}

impl Default for FailoverHandler {
    fn default() -> Self {
        Self::new(&FailoverConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speak_language(list: &ActionList) -> String {
        match &list.actions[1] {
            CarrierAction::Speak { language, .. } => language.clone(),
            other => panic!("expected speak, got {:?}", other),
        }
    }

    #[test]
    fn test_failover_sequence() {
        let handler = FailoverHandler::default();
        let list = handler.actions(None);
        assert_eq!(list.kinds(), vec!["answer", "speak", "hangup"]);
        assert_eq!(speak_language(&list), "en-US");
    }

    #[test]
    fn test_localized_decline() {
        let handler = FailoverHandler::default();
        let list = handler.actions(Some("es-ES"));
        assert_eq!(speak_language(&list), "es-ES");
        match &list.actions[1] {
            CarrierAction::Speak { payload, voice, .. } => {
                assert!(payload.starts_with("Lo sentimos"));
                assert_eq!(voice, "female");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_unknown_locale_falls_back() {
        let handler = FailoverHandler::new(&FailoverConfig {
            default_locale: "de-DE".to_string(),
            voice: "male".to_string(),
        });
        assert_eq!(speak_language(&handler.actions(Some("pt-BR"))), "de-DE");

        let broken_default = FailoverHandler::new(&FailoverConfig {
            default_locale: "xx-XX".to_string(),
            voice: "male".to_string(),
        });
        assert_eq!(speak_language(&broken_default.actions(Some("pt-BR"))), "en-US");
    }
}
