//! Extraction of structured answers from free-text completions.
//!
//! Completions are unreliable. Every extractor returns an [`Extraction`]:
//! either the strict shape was found, or the candidate text is handed back
//! so the caller can pick a documented heuristic with
//! [`Extraction::or_heuristic`]. Malformed completions never abort a tick.

/// Outcome of a strict extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction<T> {
    /// The expected shape was found.
    Parsed(T),
    /// It was not; carries the text a heuristic should work on.
    Unparsed(String),
}

impl<T> Extraction<T> {
    /// The parsed value, if any.
    pub fn parsed(self) -> Option<T> {
        match self {
            Self::Parsed(value) => Some(value),
            Self::Unparsed(_) => None,
        }
    }

    /// Whether the strict shape was found.
    pub const fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }

    /// The parsed value, or `heuristic` applied to the leftover text.
    pub fn or_heuristic(self, heuristic: impl FnOnce(&str) -> T) -> T {
        match self {
            Self::Parsed(value) => value,
            Self::Unparsed(raw) => heuristic(&raw),
        }
    }
}

// ---------------------------------------------------------------------------
// Tuples
// ---------------------------------------------------------------------------

/// Replace full-width parentheses and commas with ASCII ones.
fn normalize(text: &str) -> String {
    text.replace('\u{ff08}', "(")
        .replace('\u{ff09}', ")")
        .replace('\u{ff0c}', ",")
}

/// The last `( ... )` group that contains no nested parentheses and at
/// least `min_commas` commas, parentheses included.
fn last_group(text: &str, min_commas: usize) -> Option<&str> {
    let mut found = None;
    let mut open: Option<usize> = None;
    for (index, ch) in text.char_indices() {
        match ch {
            '(' => open = Some(index),
            ')' => {
                if let Some(start) = open.take() {
                    let group = text.get(start..=index)?;
                    if group.matches(',').count() >= min_commas {
                        found = Some(group);
                    }
                }
            }
            _ => {}
        }
    }
    found
}

/// Strictly match `(a, b, ..., z)` with exactly `arity` non-empty fields,
/// where every field but the last is comma-free.
fn strict_fields(group: &str, arity: usize) -> Option<Vec<String>> {
    let inner = group.trim().strip_prefix('(')?.strip_suffix(')')?;
    if inner.contains('(') || inner.contains(')') {
        return None;
    }
    let fields: Vec<String> = inner
        .splitn(arity, ',')
        .map(|field| field.trim().to_owned())
        .collect();
    if fields.len() != arity || fields.iter().any(String::is_empty) {
        return None;
    }
    Some(fields)
}

/// Candidate text for a tuple extraction: the last group if any, otherwise
/// the whole normalized text wrapped in parentheses when missing.
fn tuple_candidate(text: &str, min_commas: usize) -> String {
    let normalized = normalize(text.trim());
    if let Some(group) = last_group(&normalized, min_commas) {
        return group.to_owned();
    }
    let mut candidate = normalized;
    if !candidate.starts_with('(') {
        candidate.insert(0, '(');
    }
    if !candidate.ends_with(')') {
        candidate.push(')');
    }
    candidate
}

/// Split heuristic: strip parentheses and split on `;`, `,` or `/`.
fn split_parts(text: &str) -> Vec<String> {
    text.trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split([';', ',', '/'])
        .map(|part| part.trim().to_owned())
        .filter(|part| !part.is_empty())
        .collect()
}

/// Strictly extract a `(subject, object)` pair.
pub fn extract_pair(text: &str) -> Extraction<(String, String)> {
    let candidate = tuple_candidate(text, 1);
    match strict_fields(&candidate, 2) {
        Some(fields) => {
            let mut fields = fields.into_iter();
            match (fields.next(), fields.next()) {
                (Some(subject), Some(object)) => Extraction::Parsed((subject, object)),
                _ => Extraction::Unparsed(candidate),
            }
        }
        None => Extraction::Unparsed(candidate),
    }
}

/// Pair heuristic: the first and last of the split parts. Missing parts
/// are empty strings.
pub fn split_pair(text: &str) -> (String, String) {
    let parts = split_parts(text);
    let first = parts.first().cloned().unwrap_or_default();
    let last = if parts.len() > 1 {
        parts.last().cloned().unwrap_or_default()
    } else {
        String::new()
    };
    (first, last)
}

/// `(subject, object)` from a completion, falling back to [`split_pair`].
pub fn subject_object(text: &str) -> (String, String) {
    extract_pair(text).or_heuristic(split_pair)
}

/// Strictly extract a `(subject, predicate, object)` triple.
pub fn extract_triple(text: &str) -> Extraction<(String, String, String)> {
    let candidate = tuple_candidate(text, 2);
    match strict_fields(&candidate, 3) {
        Some(fields) => {
            let mut fields = fields.into_iter();
            match (fields.next(), fields.next(), fields.next()) {
                (Some(subject), Some(predicate), Some(object)) => {
                    Extraction::Parsed((subject, predicate, object))
                }
                _ => Extraction::Unparsed(candidate),
            }
        }
        None => Extraction::Unparsed(candidate),
    }
}

/// Triple heuristic: pad the split parts to three; with more than three,
/// the middle parts joined by spaces form the predicate.
pub fn split_triple(text: &str) -> (String, String, String) {
    let mut parts = split_parts(text);
    match parts.len() {
        0..=3 => {
            parts.resize(3, String::new());
            let mut parts = parts.into_iter();
            (
                parts.next().unwrap_or_default(),
                parts.next().unwrap_or_default(),
                parts.next().unwrap_or_default(),
            )
        }
        _ => {
            let object = parts.pop().unwrap_or_default();
            let mut parts = parts.into_iter();
            let subject = parts.next().unwrap_or_default();
            let predicate = parts.collect::<Vec<_>>().join(" ");
            (subject, predicate, object)
        }
    }
}

/// `(subject, predicate, object)` from a completion, falling back to
/// [`split_triple`].
pub fn subject_predicate_object(text: &str) -> (String, String, String) {
    extract_triple(text).or_heuristic(split_triple)
}

// ---------------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------------

/// The first whole word `yes` or `no`, case-insensitive.
pub fn yes_no(text: &str) -> Extraction<bool> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .find_map(|word| {
            if word.eq_ignore_ascii_case("yes") {
                Some(true)
            } else if word.eq_ignore_ascii_case("no") {
                Some(false)
            } else {
                None
            }
        })
        .map_or_else(|| Extraction::Unparsed(text.to_owned()), Extraction::Parsed)
}

/// Whether the completion answers yes. An unparsed answer counts as no.
pub fn affirmative(text: &str) -> bool {
    yes_no(text).parsed().unwrap_or(false)
}

/// The first run of ASCII digits, as a number.
pub fn first_integer(text: &str) -> Extraction<u32> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits
        .parse()
        .map_or_else(|_| Extraction::Unparsed(text.to_owned()), Extraction::Parsed)
}

/// The text between the first pair of double quotes.
pub fn first_quoted(text: &str) -> Extraction<String> {
    text.split_once('"')
        .and_then(|(_, rest)| rest.split_once('"'))
        .map_or_else(
            || Extraction::Unparsed(text.to_owned()),
            |(quoted, _)| Extraction::Parsed(quoted.to_owned()),
        )
}

/// An utterance from a dialogue completion: the first quoted span, or the
/// whole trimmed reply.
pub fn utterance(text: &str) -> String {
    first_quoted(text).or_heuristic(|raw| raw.trim().to_owned())
}

/// Every span between single quotes, in order. Used for list answers like
/// `['wake up at 7', 'eat breakfast']`.
pub fn single_quoted_items(text: &str) -> Vec<String> {
    text.split('\'')
        .skip(1)
        .step_by(2)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Strip a leading `Label:` and surrounding quotes or a trailing period
/// from a short answer.
pub fn short_answer(text: &str) -> String {
    let text = text.trim();
    let text = match text.split_once(':') {
        Some((label, rest)) if !label.trim().contains(' ') && !rest.trim().is_empty() => rest,
        _ => text,
    };
    text.trim()
        .trim_end_matches('.')
        .trim_matches(|c| c == '"' || c == '\'')
        .trim_end_matches('.')
        .trim()
        .to_owned()
}

/// The keyword occurring earliest in `text`; at the same position the
/// longest keyword wins.
pub fn contained_keyword<'a>(
    text: &str,
    keywords: impl IntoIterator<Item = &'a str>,
    case_sensitive: bool,
) -> Option<&'a str> {
    let haystack = if case_sensitive {
        text.to_owned()
    } else {
        text.to_lowercase()
    };
    keywords
        .into_iter()
        .filter(|keyword| !keyword.is_empty())
        .filter_map(|keyword| {
            let needle = if case_sensitive {
                keyword.to_owned()
            } else {
                keyword.to_lowercase()
            };
            haystack.find(&needle).map(|position| (position, keyword))
        })
        .min_by(|(pos_a, kw_a), (pos_b, kw_b)| {
            pos_a.cmp(pos_b).then_with(|| kw_b.len().cmp(&kw_a.len()))
        })
        .map(|(_, keyword)| keyword)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(a: &str, b: &str) -> (String, String) {
        (a.to_owned(), b.to_owned())
    }

    fn triple(a: &str, b: &str, c: &str) -> (String, String, String) {
        (a.to_owned(), b.to_owned(), c.to_owned())
    }

    #[test]
    fn pair_takes_last_tuple() {
        let reply = "Example: (Ada, bread). Output: (Bob, coffee)";
        assert_eq!(extract_pair(reply), Extraction::Parsed(pair("Bob", "coffee")));
    }

    #[test]
    fn pair_accepts_bare_and_full_width_text() {
        assert_eq!(extract_pair("Bob, coffee"), Extraction::Parsed(pair("Bob", "coffee")));
        assert_eq!(
            extract_pair("\u{ff08}Bob\u{ff0c}coffee\u{ff09}"),
            Extraction::Parsed(pair("Bob", "coffee"))
        );
    }

    #[test]
    fn pair_falls_back_to_split() {
        let extraction = extract_pair("Bob; kitchen / coffee");
        assert!(!extraction.is_parsed());
        assert_eq!(extraction.or_heuristic(split_pair), pair("Bob", "coffee"));
        assert_eq!(subject_object("just words"), pair("just words", ""));
    }

    #[test]
    fn triple_strict_and_heuristic() {
        assert_eq!(
            extract_triple("Answer: (Bob, brew, coffee)"),
            Extraction::Parsed(triple("Bob", "brew", "coffee"))
        );
        assert_eq!(
            subject_predicate_object("Bob; is; slowly; brewing; coffee"),
            triple("Bob", "is slowly brewing", "coffee")
        );
        assert_eq!(subject_predicate_object("Bob; coffee"), triple("Bob", "coffee", ""));
    }

    #[test]
    fn yes_no_whole_words_only() {
        assert_eq!(yes_no("Yes, definitely."), Extraction::Parsed(true));
        assert_eq!(yes_no("Answer: no"), Extraction::Parsed(false));
        assert!(!yes_no("Nothing to say, yesterday").is_parsed());
        assert!(!affirmative("maybe"));
        assert!(affirmative("YES"));
    }

    #[test]
    fn first_integer_and_quoted() {
        assert_eq!(first_integer("Rating: 7/10"), Extraction::Parsed(7));
        assert!(!first_integer("none").is_parsed());
        assert_eq!(
            first_quoted(r#"Ada: "Good morning, Bob!" she said"#),
            Extraction::Parsed("Good morning, Bob!".to_owned())
        );
        assert_eq!(utterance("  Hello there  "), "Hello there");
    }

    #[test]
    fn single_quoted_list() {
        let reply = "1) 'wake up at 7:00 am', 2) 'eat breakfast', 3) 'open the bakery'";
        assert_eq!(
            single_quoted_items(reply),
            vec!["wake up at 7:00 am", "eat breakfast", "open the bakery"]
        );
    }

    #[test]
    fn short_answer_strips_label() {
        assert_eq!(short_answer("Topic: \"the harvest festival\"."), "the harvest festival");
        assert_eq!(short_answer("the weather"), "the weather");
    }

    #[test]
    fn keyword_earliest_then_longest() {
        let keywords = ["cafe", "cafe terrace", "library"];
        assert_eq!(
            contained_keyword("Go to the Cafe Terrace, then the library", keywords, false),
            Some("cafe terrace")
        );
        assert_eq!(
            contained_keyword("Go to the Cafe Terrace", keywords, true),
            None
        );
        assert_eq!(contained_keyword("the library", keywords, false), Some("library"));
        assert_eq!(contained_keyword("nowhere", keywords, false), None);
    }
}
