//! Language registry shared by every session.
//!
//! Each entry maps the code the web client sends to the tag the transcription
//! provider expects and the language name used in the translation instruction.
//! The table is static and read-only, so lookups need no synchronization.

use serde::Serialize;

use crate::error::{Result, SessionError};

/// Client code used when the handshake omits `source_language`.
pub const DEFAULT_SOURCE_LANGUAGE: &str = "en-US";
/// Client code used when the handshake omits `target_language`.
pub const DEFAULT_TARGET_LANGUAGE: &str = "es-ES";

/// One registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LanguagePair {
    /// Code exchanged with the client (e.g. `en-US`).
    pub code: &'static str,
    /// Streaming transcription language tag (e.g. `en_us`).
    pub transcription_tag: &'static str,
    /// Language name given to the translation model (e.g. `english`).
    pub translation_tag: &'static str,
    /// Short label for UI rendering (e.g. `EN-US`).
    pub display: &'static str,
}

const fn pair(
    code: &'static str,
    transcription_tag: &'static str,
    translation_tag: &'static str,
    display: &'static str,
) -> LanguagePair {
    LanguagePair {
        code,
        transcription_tag,
        translation_tag,
        display,
    }
}

static LANGUAGES: [LanguagePair; 22] = [
    // English variants
    pair("en-US", "en_us", "english", "EN-US"),
    pair("en-GB", "en_gb", "english", "EN-GB"),
    pair("en-AU", "en_au", "english", "EN-AU"),
    pair("en-CA", "en_ca", "english", "EN-CA"),
    // Asia
    pair("ja", "ja", "japanese", "JA"),
    pair("zh", "zh", "chinese", "ZH"),
    pair("hi", "hi", "hindi", "HI"),
    pair("ko", "ko", "korean", "KO"),
    // Europe
    pair("de", "de", "german", "DE"),
    pair("fr-FR", "fr_fr", "french", "FR-FR"),
    pair("fr-CA", "fr_ca", "french", "FR-CA"),
    pair("pt-BR", "pt_br", "portuguese", "PT-BR"),
    pair("pt-PT", "pt_pt", "portuguese", "PT-PT"),
    pair("it", "it", "italian", "IT"),
    pair("es-ES", "es_es", "spanish", "ES-ES"),
    pair("es-MX", "es_mx", "spanish", "ES-MX"),
    pair("nl", "nl", "dutch", "NL"),
    pair("tr", "tr", "turkish", "TR"),
    pair("pl", "pl", "polish", "PL"),
    pair("fi", "fi", "finnish", "FI"),
    // Eastern Europe
    pair("uk", "uk", "ukrainian", "UK"),
    pair("ru", "ru", "russian", "RU"),
];

/// Read-only view over the process-wide language table.
#[derive(Debug, Clone, Copy)]
pub struct LanguageRegistry {
    entries: &'static [LanguagePair],
    default_source: &'static LanguagePair,
    default_target: &'static LanguagePair,
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LanguageRegistry {
    /// The built-in registry with `en-US` → `es-ES` defaults.
    pub fn builtin() -> Self {
        Self {
            entries: &LANGUAGES,
            default_source: &LANGUAGES[0],
            default_target: &LANGUAGES[14],
        }
    }

    /// The built-in registry with different handshake defaults.
    pub fn with_defaults(source: &str, target: &str) -> Result<Self> {
        let registry = Self::builtin();
        Ok(Self {
            default_source: registry.resolve(source)?,
            default_target: registry.resolve(target)?,
            ..registry
        })
    }

    /// Look up a client code (ASCII case-insensitive).
    pub fn get(&self, code: &str) -> Option<&'static LanguagePair> {
        self.entries
            .iter()
            .find(|entry| entry.code.eq_ignore_ascii_case(code.trim()))
    }

    /// Like [`get`](Self::get) but fails with `UnknownLanguage`.
    pub fn resolve(&self, code: &str) -> Result<&'static LanguagePair> {
        self.get(code)
            .ok_or_else(|| SessionError::unknown_language(code))
    }

    pub fn all(&self) -> &'static [LanguagePair] {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Default source/target pair used when the handshake omits a language.
    pub fn defaults(&self) -> (&'static LanguagePair, &'static LanguagePair) {
        (self.default_source, self.default_target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_22_entries() {
        assert_eq!(LanguageRegistry::builtin().len(), 22);
    }

    #[test]
    fn codes_are_unique() {
        let registry = LanguageRegistry::builtin();
        for (i, a) in registry.all().iter().enumerate() {
            for b in &registry.all()[i + 1..] {
                assert_ne!(a.code, b.code, "duplicate code {}", a.code);
            }
        }
    }

    #[test]
    fn resolve_known_code() {
        let registry = LanguageRegistry::builtin();
        let en = registry.resolve("en-US").unwrap();
        assert_eq!(en.transcription_tag, "en_us");
        assert_eq!(en.translation_tag, "english");
        assert_eq!(en.display, "EN-US");
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let registry = LanguageRegistry::builtin();
        assert_eq!(registry.resolve("pt-br").unwrap().code, "pt-BR");
        assert_eq!(registry.resolve(" ES-es ").unwrap().code, "es-ES");
    }

    #[test]
    fn resolve_unknown_code_fails() {
        let err = LanguageRegistry::builtin().resolve("xx-ZZ").unwrap_err();
        assert_eq!(err, SessionError::unknown_language("xx-ZZ"));
        assert!(LanguageRegistry::builtin().get("").is_none());
    }

    #[test]
    fn defaults_are_english_to_spanish() {
        let (source, target) = LanguageRegistry::builtin().defaults();
        assert_eq!(source.code, "en-US");
        assert_eq!(target.code, "es-ES");
        assert_eq!(source.code, DEFAULT_SOURCE_LANGUAGE);
        assert_eq!(target.code, DEFAULT_TARGET_LANGUAGE);
    }

    #[test]
    fn configured_defaults() {
        let registry = LanguageRegistry::with_defaults("fr-fr", "de").unwrap();
        let (source, target) = registry.defaults();
        assert_eq!(source.code, "fr-FR");
        assert_eq!(target.code, "de");
        assert!(LanguageRegistry::with_defaults("en-US", "xx-ZZ").is_err());
    }
}
