use super::Stopper;
use crate::engine::Token;
use crate::types::{FinishReason, StopSequenceError};
use tracing::debug;

/// Streaming matcher for one stop pattern.
///
/// Text arrives in arbitrary fragments (usually one detokenized token at a
/// time). The matcher keeps `cursor`, the number of consecutive pattern
/// characters matched so far, so a pattern split across any number of
/// fragments is still found without rescanning earlier output. Positions
/// are counted in `char`s, never bytes.
///
/// Any mismatching character drops the cursor to zero without being
/// re-checked, so `"aab"` fed against `"ab"` does not match.
///
/// ```rust
/// use llama_session::stopper::StopSequenceMatcher;
///
/// let mut matcher = StopSequenceMatcher::new("</s>");
/// assert!(!matcher.feed("Hello </"));
/// assert_eq!(matcher.cursor(), 2);
/// assert!(matcher.feed("s>"));
/// assert_eq!(matcher.cursor(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct StopSequenceMatcher {
    pattern: String,
    chars: Vec<char>,
    cursor: usize,
}

impl StopSequenceMatcher {
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let chars: Vec<char> = pattern.chars().collect();
        Self {
            pattern,
            chars,
            cursor: 0,
        }
    }

    /// Consume `text` and report whether the pattern completed anywhere in
    /// it. The cursor restarts from zero right after a completion.
    pub fn feed(&mut self, text: &str) -> bool {
        if self.chars.is_empty() {
            return false;
        }

        let mut matched = false;
        for ch in text.chars() {
            if self.advance(ch) {
                matched = true;
            }
        }
        matched
    }

    fn advance(&mut self, ch: char) -> bool {
        if self.chars[self.cursor] == ch {
            self.cursor += 1;
        } else {
            self.cursor = 0;
        }
        if self.cursor == self.chars.len() {
            self.cursor = 0;
            return true;
        }
        false
    }

    /// Characters of the pattern matched so far.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_running(&self) -> bool {
        self.cursor > 0
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}

/// All stop patterns of one generation request.
///
/// Any completed match resets every matcher: once generation is going to
/// stop, partial progress on other patterns is meaningless.
#[derive(Debug, Clone, Default)]
pub struct StopSequenceSet {
    matchers: Vec<StopSequenceMatcher>,
}

impl StopSequenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from a list of patterns, rejecting empty ones.
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self, StopSequenceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for pattern in patterns {
            set.register(pattern)?;
        }
        Ok(set)
    }

    /// Register a pattern. Registering the same pattern twice is a no-op.
    pub fn register(&mut self, pattern: impl Into<String>) -> Result<(), StopSequenceError> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(StopSequenceError::InvalidArgument(
                "stop sequence cannot be empty".to_string(),
            ));
        }
        if self.matchers.iter().any(|m| m.pattern() == pattern) {
            debug!("Stop sequence {:?} already registered", pattern);
            return Ok(());
        }
        self.matchers.push(StopSequenceMatcher::new(pattern));
        Ok(())
    }

    /// Feed a fragment to every matcher.
    ///
    /// Returns the completed pattern, choosing the lexicographically smallest
    /// one when several complete in the same fragment.
    pub fn feed(&mut self, text: &str) -> Option<String> {
        let mut best: Option<&str> = None;
        for matcher in self.matchers.iter_mut() {
            if matcher.feed(text) {
                let pattern = matcher.pattern.as_str();
                best = Some(match best {
                    Some(current) if current <= pattern => current,
                    _ => pattern,
                });
            }
        }

        let matched = best.map(str::to_string);
        if let Some(pattern) = &matched {
            debug!("Stop sequence {:?} matched", pattern);
            self.reset();
        }
        matched
    }

    /// True while some pattern is partially matched; hosts hold back output
    /// until this clears so a stop string prefix never reaches the user.
    pub fn has_running_matches(&self) -> bool {
        self.matchers.iter().any(StopSequenceMatcher::is_running)
    }

    pub fn reset(&mut self) {
        for matcher in &mut self.matchers {
            matcher.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.matchers.iter().map(StopSequenceMatcher::pattern)
    }
}

impl Stopper for StopSequenceSet {
    fn observe(&mut self, _token: Token, piece: &str) -> Option<FinishReason> {
        self.feed(piece).map(FinishReason::StopSequence)
    }

    fn reset(&mut self) {
        StopSequenceSet::reset(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn test_empty_pattern_never_matches() {
        let mut matcher = StopSequenceMatcher::new("");
        assert!(!matcher.feed(""));
        assert!(!matcher.feed("anything"));
        assert_eq!(matcher.cursor(), 0);
    }

    #[test]
    fn test_cursor_tracks_partial_match() {
        let mut matcher = StopSequenceMatcher::new("User:");
        assert!(!matcher.feed("Hi\nUs"));
        assert_eq!(matcher.cursor(), 2);
        assert!(matcher.is_running());
        assert!(!matcher.feed("x"));
        assert_eq!(matcher.cursor(), 0);
    }

    #[test]
    fn test_match_resets_cursor() {
        let mut matcher = StopSequenceMatcher::new("ab");
        assert!(matcher.feed("ab"));
        assert_eq!(matcher.cursor(), 0);
        assert!(!matcher.feed("a"));
        assert!(matcher.feed("b"));
    }

    #[rstest]
    #[case("ab", "aab", false, 0)]
    #[case("aab", "aaab", false, 0)]
    #[case("abab", "ababab", true, 2)]
    #[case("abc", "ababc", false, 0)]
    #[case("abc", "xabc", true, 0)]
    fn test_mismatch_restarts_from_zero(
        #[case] pattern: &str,
        #[case] text: &str,
        #[case] expected: bool,
        #[case] cursor: usize,
    ) {
        let mut matcher = StopSequenceMatcher::new(pattern);
        assert_eq!(matcher.feed(text), expected);
        assert_eq!(matcher.cursor(), cursor);
    }

    #[test]
    fn test_mismatching_char_is_not_rechecked() {
        let mut matcher = StopSequenceMatcher::new("ab");
        assert!(!matcher.feed("a"));
        assert_eq!(matcher.cursor(), 1);
        assert!(!matcher.feed("a"));
        assert_eq!(matcher.cursor(), 0);
        assert!(!matcher.is_running());
        assert!(!matcher.feed("b"));
    }

    #[test]
    fn test_counts_chars_not_bytes() {
        let mut matcher = StopSequenceMatcher::new("→é");
        assert!(!matcher.feed("a→"));
        assert_eq!(matcher.cursor(), 1);
        assert!(matcher.feed("é"));
    }

    #[test]
    fn test_register_rejects_empty_pattern() {
        let mut set = StopSequenceSet::new();
        assert_eq!(
            set.register(""),
            Err(StopSequenceError::InvalidArgument(
                "stop sequence cannot be empty".to_string()
            ))
        );
        assert!(set.is_empty());
    }

    #[test]
    fn test_duplicate_registration_is_ignored() {
        let set = StopSequenceSet::from_patterns(["###", "###", "END"]).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.patterns().collect::<Vec<_>>(), vec!["###", "END"]);
    }

    #[test]
    fn test_tie_break_prefers_smallest_pattern() {
        for _ in 0..10 {
            let mut set = StopSequenceSet::from_patterns(["ac", "ab"]).unwrap();
            assert_eq!(set.feed("abac"), Some("ab".to_string()));

            let mut reversed = StopSequenceSet::from_patterns(["ab", "ac"]).unwrap();
            assert_eq!(reversed.feed("acab"), Some("ab".to_string()));
        }
    }

    #[test]
    fn test_match_resets_every_matcher() {
        let mut set = StopSequenceSet::from_patterns(["END", "ENDING"]).unwrap();
        assert_eq!(set.feed("EN"), None);
        assert!(set.has_running_matches());

        assert_eq!(set.feed("D"), Some("END".to_string()));
        assert!(!set.has_running_matches());

        // "ENDING" was three characters in when the reset dropped it
        assert_eq!(set.feed("ING"), None);
    }

    #[test]
    fn test_running_matches_withhold_signal() {
        let mut set = StopSequenceSet::from_patterns(["\nUser:"]).unwrap();
        assert_eq!(set.feed("Sure"), None);
        assert!(!set.has_running_matches());
        assert_eq!(set.feed("!\nUs"), None);
        assert!(set.has_running_matches());
        assert_eq!(set.feed("er:"), Some("\nUser:".to_string()));
    }

    #[test]
    fn test_repeated_first_char_releases_withheld_text() {
        let mut set = StopSequenceSet::from_patterns(["ab"]).unwrap();
        assert_eq!(set.feed("a"), None);
        assert!(set.has_running_matches());
        assert_eq!(set.feed("a"), None);
        assert!(!set.has_running_matches());
        assert_eq!(set.feed("b"), None);
    }

    #[test]
    fn test_set_as_stopper() {
        let mut set = StopSequenceSet::from_patterns(["</s>"]).unwrap();
        assert_eq!(set.observe(Token(1), "</"), None);
        assert_eq!(
            set.observe(Token(2), "s>"),
            Some(FinishReason::StopSequence("</s>".to_string()))
        );
    }

    proptest! {
        #[test]
        fn split_feed_matches_exactly_once(
            pattern in "[a-c]{1,6}",
            split in 0usize..=6,
        ) {
            let chars: Vec<char> = pattern.chars().collect();
            let split = split.min(chars.len());
            let head: String = chars[..split].iter().collect();
            let tail: String = chars[split..].iter().collect();

            let mut whole = StopSequenceMatcher::new(pattern.clone());
            prop_assert!(whole.feed(&pattern));

            let mut matcher = StopSequenceMatcher::new(pattern.clone());
            let head_matched = matcher.feed(&head);
            let tail_matched = matcher.feed(&tail);
            // the match lands on the last character, never earlier
            prop_assert!(!head_matched || tail.is_empty());
            prop_assert!(head_matched != tail_matched);
        }

        #[test]
        fn cursor_counts_consecutive_matches(text in "[ab]{0,24}", pattern in "[ab]{1,5}") {
            let chars: Vec<char> = pattern.chars().collect();
            let mut matcher = StopSequenceMatcher::new(pattern.clone());
            let mut expected = 0usize;
            for ch in text.chars() {
                let completed = matcher.feed(&ch.to_string());
                if chars[expected] == ch {
                    expected += 1;
                } else {
                    expected = 0;
                }
                let done = expected == chars.len();
                if done {
                    expected = 0;
                }
                prop_assert_eq!(completed, done);
                prop_assert_eq!(matcher.cursor(), expected);
            }
        }
    }
}
