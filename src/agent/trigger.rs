//! Search trigger: does an utterance need live information?
//!
//! Pure keyword heuristics over English and Spanish recency markers and
//! explicit recent years. Biased toward firing; an extra search is cheap,
//! a stale answer is not.

use std::sync::OnceLock;

use regex::Regex;

const RECENCY_MARKERS: &str = r"(?i)\b(?:latest|recent|recently|current|currently|today|tonight|yesterday|this (?:week|month|year)|right now|nowadays|news|breaking|headlines|up[- ]to[- ]date|as of|new releases?|upcoming|trending|who won|what happened|últimos|últimas|recientes?|actuales|actualmente|nuevos|nuevas|estrenos?|hasta la fecha|más reciente|noticias|información actual|tendencias|qué hay de nuevo|novedades|actualizado|hoy)\b|\b20[2-9]\d\b";

fn markers() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(RECENCY_MARKERS).unwrap_or_else(|e| panic!("invalid recency regex: {e}"))
    })
}

/// Whether `utterance` asks for current information.
pub fn should_search(utterance: &str) -> bool {
    markers().is_match(utterance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recency_fixtures_trigger() {
        for utterance in [
            "What are the latest anime releases in 2025?",
            "Any news about the Rust foundation?",
            "Who won the match yesterday?",
            "What is the weather like today",
            "Cuáles son los últimos estrenos de anime?",
            "Novedades de la convocatoria 2024",
            "What changed in 2031?",
        ] {
            assert!(should_search(utterance), "should trigger: {utterance}");
        }
    }

    #[test]
    fn test_conversational_and_code_do_not_trigger() {
        for utterance in [
            "Write a function that reverses a string",
            "Hello, how are you?",
            "Explain ownership in Rust",
            "Refactor this loop into an iterator chain",
            "What happens at 1999 boundaries?",
        ] {
            assert!(!should_search(utterance), "should not trigger: {utterance}");
        }
    }

    #[test]
    fn test_markers_are_whole_words() {
        assert!(!should_search("Please recurrently call the newsletter-free handler"));
        assert!(should_search("LATEST"));
    }
}
