//! Selector registry — the single place host markup is named.
//!
//! Every structural role the engine touches (scroll region, turn containers,
//! role sections, code blocks, indicators) is looked up here by symbolic
//! name. Host-markup drift is remediated by shipping an updated registry;
//! extraction logic never hard-codes a locator.

use serde::{Deserialize, Serialize};

/// Symbolic-role → locator-pattern map for one chat host.
///
/// Patterns are CSS selector lists; `conversation_id_pattern` is a regex
/// applied to the page URL. All fields default individually, so a JSON
/// override may carry only the patterns that drifted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorRegistry {
    /// The scrollable element holding the conversation history.
    pub scroll_region: String,
    /// Paired container wrapping one user and one assistant section.
    pub turn_container: String,
    /// A user-authored message section.
    pub user_section: String,
    /// An assistant-authored message section.
    pub assistant_section: String,
    /// Collapsed/expanded reasoning panel inside an assistant section.
    pub reasoning_section: String,
    /// A rendered code region, replaced by a fenced block during extraction.
    pub code_block: String,
    /// Label element naming a code block's language (sibling/header lookup).
    pub code_language_label: String,
    /// Spinner shown while older history is being fetched by the host.
    pub loading_indicator: String,
    /// Control visible only while the host is still generating a response.
    pub generation_indicator: String,
    /// Image elements carrying attachment references.
    pub image: String,
    /// Interface chrome excluded from text extraction.
    pub ignored: String,
    /// Conversation title element.
    pub title: String,
    /// Regex with one capture group extracting the conversation id from the URL.
    pub conversation_id_pattern: String,
}

impl Default for SelectorRegistry {
    fn default() -> Self {
        Self {
            scroll_region: r#"[data-testid="chat-scroll-region"], main [data-scroll-container]"#.into(),
            turn_container: r#"[data-testid="conversation-turn"]"#.into(),
            user_section: r#"[data-message-author="user"]"#.into(),
            assistant_section: r#"[data-message-author="assistant"]"#.into(),
            reasoning_section: r#"[data-testid="reasoning-panel"]"#.into(),
            code_block: "pre".into(),
            code_language_label: r#".code-block-language, [data-code-language]"#.into(),
            loading_indicator: r#"[data-testid="history-loading"], .history-spinner"#.into(),
            generation_indicator: r#"[data-testid="stop-generating"], button[aria-label="Stop response"]"#.into(),
            image: "img".into(),
            ignored: r#"button, svg, [aria-hidden="true"], [role="tooltip"]"#.into(),
            title: r#"[data-testid="conversation-title"], header h1"#.into(),
            conversation_id_pattern: r"/chat/([0-9a-fA-F-]{8,})".into(),
        }
    }
}

impl SelectorRegistry {
    /// Load a registry from JSON, filling unspecified roles from the defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Selector list matching a message section of either role, in document order.
    pub fn role_union(&self) -> String {
        format!("{}, {}", self.user_section, self.assistant_section)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Selector;

    #[test]
    fn default_patterns_are_valid_selectors() {
        let registry = SelectorRegistry::default();
        for pattern in [
            &registry.scroll_region,
            &registry.turn_container,
            &registry.user_section,
            &registry.assistant_section,
            &registry.reasoning_section,
            &registry.code_block,
            &registry.code_language_label,
            &registry.loading_indicator,
            &registry.generation_indicator,
            &registry.image,
            &registry.ignored,
            &registry.title,
            &registry.role_union(),
        ] {
            assert!(
                Selector::parse(pattern).is_ok(),
                "pattern should parse: {pattern}"
            );
        }
    }

    #[test]
    fn default_id_pattern_is_valid_regex() {
        let registry = SelectorRegistry::default();
        regex::Regex::new(&registry.conversation_id_pattern).unwrap();
    }

    #[test]
    fn partial_json_override_keeps_defaults() {
        let registry =
            SelectorRegistry::from_json(r#"{"turn_container": ".conversation-row"}"#).unwrap();
        assert_eq!(registry.turn_container, ".conversation-row");
        assert_eq!(registry.code_block, SelectorRegistry::default().code_block);
    }

    #[test]
    fn role_union_joins_both_sections() {
        let registry = SelectorRegistry::default();
        let union = registry.role_union();
        assert!(union.contains(&registry.user_section));
        assert!(union.contains(&registry.assistant_section));
    }
}
