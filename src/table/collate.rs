//! Polish aware text collation.
//!
//! Three levels like a locale collator: base letters first, then accents,
//! then case (lowercase before uppercase). Polish letters with diacritics are
//! distinct base letters placed after their plain counterpart.

use std::cmp::Ordering;

const ALPHABET: &str = "aąbcćdeęfghijklłmnńoópqrsśtuvwxyzźż";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Primary {
    Symbol(char),
    /// Digit run: significant length, then the digits without leading zeros.
    Digits(usize, String),
    Letter(u8),
    Foreign(char),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CollationKey {
    primary: Vec<Primary>,
    secondary: Vec<u8>,
    tertiary: Vec<u8>,
    raw: String,
}

fn alphabet_index(ch: char) -> Option<u8> {
    ALPHABET.chars().position(|c| c == ch).map(|idx| idx as u8)
}

/// Foreign accented letters fold to their base letter.
fn fold(ch: char) -> Option<char> {
    let base = match ch {
        'à' | 'á' | 'â' | 'ä' | 'ã' | 'å' | 'ā' => 'a',
        'ç' | 'č' => 'c',
        'ď' => 'd',
        'è' | 'é' | 'ê' | 'ë' | 'ě' | 'ē' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' | 'ň' => 'n',
        'ò' | 'ô' | 'ö' | 'õ' | 'ő' | 'ø' => 'o',
        'ř' => 'r',
        'š' | 'ß' => 's',
        'ť' => 't',
        'ù' | 'ú' | 'û' | 'ü' | 'ů' | 'ű' => 'u',
        'ý' | 'ÿ' => 'y',
        'ž' => 'z',
        _ => return None,
    };
    Some(base)
}

pub fn key(s: &str, numeric: bool) -> CollationKey {
    let mut primary = Vec::with_capacity(s.len());
    let mut secondary = Vec::with_capacity(s.len());
    let mut tertiary = Vec::with_capacity(s.len());

    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() {
            let mut run = String::from(ch);
            if numeric {
                while let Some(next) = chars.next_if(char::is_ascii_digit) {
                    run.push(next);
                }
            }
            let significant = run.trim_start_matches('0');
            let significant = if significant.is_empty() { "0" } else { significant };
            primary.push(Primary::Digits(significant.len(), significant.to_string()));
            secondary.push(0);
            tertiary.push(0);
            continue;
        }

        let lower = ch.to_lowercase().next().unwrap_or(ch);
        tertiary.push(u8::from(lower != ch));

        if let Some(idx) = alphabet_index(lower) {
            primary.push(Primary::Letter(idx));
            secondary.push(0);
        } else if let Some(idx) = fold(lower).and_then(alphabet_index) {
            primary.push(Primary::Letter(idx));
            secondary.push(1);
        } else if lower.is_alphabetic() {
            primary.push(Primary::Foreign(lower));
            secondary.push(0);
        } else {
            primary.push(Primary::Symbol(lower));
            secondary.push(0);
        }
    }

    CollationKey {
        primary,
        secondary,
        tertiary,
        raw: s.to_string(),
    }
}

pub fn compare(a: &str, b: &str) -> Ordering {
    key(a, false).cmp(&key(b, false))
}

/// Like [`compare`] but digit runs compare by numeric value.
pub fn compare_numeric(a: &str, b: &str) -> Ordering {
    key(a, true).cmp(&key(b, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut words: Vec<&str>, numeric: bool) -> Vec<&str> {
        words.sort_by(|a, b| if numeric { compare_numeric(a, b) } else { compare(a, b) });
        words
    }

    #[test]
    fn polish_letters_follow_their_base() {
        assert_eq!(
            sorted(vec!["łoś", "zebra", "lis", "żuk", "źrebię", "mysz"], false),
            vec!["lis", "łoś", "mysz", "zebra", "źrebię", "żuk"]
        );
        assert_eq!(sorted(vec!["ćma", "dom", "cel"], false), vec!["cel", "ćma", "dom"]);
    }

    #[test]
    fn case_only_breaks_ties() {
        assert_eq!(compare("anna", "Anna"), Ordering::Less);
        assert_eq!(compare("Anna", "anny"), Ordering::Less);
        assert_eq!(compare("Zofia", "adam"), Ordering::Greater);
    }

    #[test]
    fn foreign_accents_are_secondary() {
        assert_eq!(compare("rene", "rené"), Ordering::Less);
        assert_eq!(compare("rené", "renf"), Ordering::Less);
    }

    #[test]
    fn numeric_mode_compares_digit_runs() {
        assert_eq!(sorted(vec!["koło 10", "koło 9", "koło 1"], false), vec![
            "koło 1", "koło 10", "koło 9"
        ]);
        assert_eq!(sorted(vec!["koło 10", "koło 9", "koło 1"], true), vec![
            "koło 1", "koło 9", "koło 10"
        ]);
    }

    #[test]
    fn digits_sort_before_letters() {
        assert_eq!(compare("9", "a"), Ordering::Less);
        assert_eq!(compare_numeric("100", "abc"), Ordering::Less);
    }
}
