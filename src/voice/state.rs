//! Per-connection session state.
//!
//! Owned by exactly one coordinator task. Nothing here performs I/O, so the
//! bookkeeping rules (history, accumulated translation, language changes, phase
//! transitions) are testable on their own.

use serde::Serialize;

use super::events::ClientCommand;
use super::languages::{LanguagePair, LanguageRegistry};
use crate::error::Result;

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// No transcription stream.
    #[default]
    Idle,
    /// Transcription stream open, audio flowing.
    Listening,
    /// Transcription suspended while synthesized audio plays.
    Speaking,
}

impl LifecyclePhase {
    /// Phase after a command succeeds. There is no implicit resume from
    /// `Speaking`; only `start_listening` re-enters `Listening`.
    pub fn after(self, command: &ClientCommand) -> Self {
        match command {
            ClientCommand::StartListening => Self::Listening,
            ClientCommand::StopListening => Self::Idle,
            ClientCommand::Speak { .. } => Self::Speaking,
            ClientCommand::UpdateLanguages { .. } | ClientCommand::Ping => self,
        }
    }

    /// Phase after a command fails. A failed `start_listening` leaves no stream
    /// open; a failed `speak` has still suspended transcription.
    pub fn after_failure(self, command: &ClientCommand) -> Self {
        match command {
            ClientCommand::StartListening => Self::Idle,
            ClientCommand::Speak { .. } => Self::Speaking,
            _ => self,
        }
    }

    /// Whether the command must close an active transcription stream before it runs.
    pub fn closes_transcription(command: &ClientCommand) -> bool {
        matches!(
            command,
            ClientCommand::StartListening | ClientCommand::StopListening | ClientCommand::Speak { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// Authoritative state of one session.
#[derive(Debug, Clone)]
pub struct SessionState {
    source: &'static LanguagePair,
    target: &'static LanguagePair,
    history: Vec<ConversationTurn>,
    accumulated_translation: String,
    phase: LifecyclePhase,
}

impl SessionState {
    pub fn new(source: &'static LanguagePair, target: &'static LanguagePair) -> Self {
        Self {
            source,
            target,
            history: Vec::new(),
            accumulated_translation: String::new(),
            phase: LifecyclePhase::Idle,
        }
    }

    /// Resolve the handshake languages, falling back to the registry defaults.
    ///
    /// Returns the state plus the codes that could not be resolved.
    pub fn from_handshake(
        registry: &LanguageRegistry,
        source: Option<&str>,
        target: Option<&str>,
    ) -> (Self, Vec<String>) {
        let (default_source, default_target) = registry.defaults();
        let mut rejected = Vec::new();
        let mut pick = |code: Option<&str>, fallback: &'static LanguagePair| match code {
            Some(code) => registry.get(code).unwrap_or_else(|| {
                rejected.push(code.to_string());
                fallback
            }),
            None => fallback,
        };
        let source = pick(source, default_source);
        let target = pick(target, default_target);
        (Self::new(source, target), rejected)
    }

    pub fn source(&self) -> &'static LanguagePair {
        self.source
    }

    pub fn target(&self) -> &'static LanguagePair {
        self.target
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn accumulated_translation(&self) -> &str {
        &self.accumulated_translation
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: LifecyclePhase) {
        self.phase = phase;
    }

    /// Start a new listening episode.
    pub fn begin_listening_episode(&mut self) {
        self.accumulated_translation.clear();
    }

    /// Validate and apply a language change.
    ///
    /// Missing codes keep the current language. On an unknown code nothing is
    /// changed. On success history and the accumulated translation are reset.
    pub fn update_languages(
        &mut self,
        registry: &LanguageRegistry,
        source: Option<&str>,
        target: Option<&str>,
    ) -> Result<()> {
        let source = match source {
            Some(code) => registry.resolve(code)?,
            None => self.source,
        };
        let target = match target {
            Some(code) => registry.resolve(code)?,
            None => self.target,
        };

        self.source = source;
        self.target = target;
        self.history.clear();
        self.accumulated_translation.clear();
        Ok(())
    }

    pub fn record_user_turn(&mut self, text: &str) {
        self.history.push(ConversationTurn {
            role: Role::User,
            content: text.to_string(),
        });
    }

    /// Record a delivered translation; returns the accumulated translation.
    pub fn record_translation(&mut self, translated: &str) -> &str {
        self.history.push(ConversationTurn {
            role: Role::Assistant,
            content: translated.to_string(),
        });
        if !self.accumulated_translation.is_empty() {
            self.accumulated_translation.push(' ');
        }
        self.accumulated_translation.push_str(translated);
        &self.accumulated_translation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SessionState {
        let registry = LanguageRegistry::builtin();
        SessionState::new(
            registry.resolve("en-US").unwrap(),
            registry.resolve("es-ES").unwrap(),
        )
    }

    #[test]
    fn phase_transitions() {
        use LifecyclePhase::*;
        let speak = ClientCommand::Speak {
            text: Some("Hi".into()),
        };
        let update = ClientCommand::UpdateLanguages {
            source_language: None,
            target_language: None,
        };
        assert_eq!(Idle.after(&ClientCommand::StartListening), Listening);
        assert_eq!(Listening.after(&ClientCommand::StartListening), Listening);
        assert_eq!(Listening.after(&ClientCommand::StopListening), Idle);
        assert_eq!(Listening.after(&speak), Speaking);
        assert_eq!(Speaking.after(&ClientCommand::Ping), Speaking);
        assert_eq!(Listening.after(&update), Listening);
        assert_eq!(Speaking.after(&ClientCommand::StartListening), Listening);

        assert_eq!(Listening.after_failure(&ClientCommand::StartListening), Idle);
        assert_eq!(Listening.after_failure(&speak), Speaking);
        assert_eq!(Listening.after_failure(&update), Listening);
    }

    #[test]
    fn update_languages_never_closes_transcription() {
        let update = ClientCommand::UpdateLanguages {
            source_language: Some("de".into()),
            target_language: None,
        };
        assert!(!LifecyclePhase::closes_transcription(&update));
        assert!(!LifecyclePhase::closes_transcription(&ClientCommand::Ping));
        assert!(LifecyclePhase::closes_transcription(&ClientCommand::Speak { text: None }));
    }

    #[test]
    fn handshake_defaults_and_fallbacks() {
        let registry = LanguageRegistry::builtin();
        let (s, rejected) = SessionState::from_handshake(&registry, None, None);
        assert_eq!(s.source().code, "en-US");
        assert_eq!(s.target().code, "es-ES");
        assert!(rejected.is_empty());

        let (s, rejected) = SessionState::from_handshake(&registry, Some("ja"), Some("xx-ZZ"));
        assert_eq!(s.source().code, "ja");
        assert_eq!(s.target().code, "es-ES");
        assert_eq!(rejected, vec!["xx-ZZ".to_string()]);
    }

    #[test]
    fn accumulated_translation_concatenates_in_order() {
        let mut s = state();
        s.begin_listening_episode();
        s.record_user_turn("chest pain");
        assert_eq!(s.record_translation("dolor en el pecho"), "dolor en el pecho");
        s.record_user_turn("since yesterday");
        assert_eq!(
            s.record_translation("desde ayer"),
            "dolor en el pecho desde ayer"
        );
        assert_eq!(s.history().len(), 4);
        assert_eq!(s.history()[0].role, Role::User);
        assert_eq!(s.history()[3].role, Role::Assistant);

        s.begin_listening_episode();
        assert_eq!(s.accumulated_translation(), "");
        assert_eq!(s.history().len(), 4);
    }

    #[test]
    fn update_languages_resets_history() {
        let registry = LanguageRegistry::builtin();
        let mut s = state();
        s.record_user_turn("hello");
        s.record_translation("hola");

        s.update_languages(&registry, Some("fr-FR"), Some("de")).unwrap();
        assert_eq!(s.source().code, "fr-FR");
        assert_eq!(s.target().code, "de");
        assert!(s.history().is_empty());
        assert_eq!(s.accumulated_translation(), "");
    }

    #[test]
    fn update_languages_rejects_unknown_without_mutation() {
        let registry = LanguageRegistry::builtin();
        let mut s = state();
        s.record_user_turn("hello");
        s.record_translation("hola");

        assert!(s.update_languages(&registry, Some("de"), Some("xx-ZZ")).is_err());
        assert_eq!(s.source().code, "en-US");
        assert_eq!(s.target().code, "es-ES");
        assert_eq!(s.history().len(), 2);
        assert_eq!(s.accumulated_translation(), "hola");
    }

    #[test]
    fn update_languages_keeps_missing_side() {
        let registry = LanguageRegistry::builtin();
        let mut s = state();
        s.update_languages(&registry, None, Some("it")).unwrap();
        assert_eq!(s.source().code, "en-US");
        assert_eq!(s.target().code, "it");
    }
}
