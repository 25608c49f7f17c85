//! Shell quoting for values embedded in `sh -c` command lines

use std::borrow::Cow;

fn is_plain(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-_./:@+,=%".contains(c)
}

/// Quotes `value` so a POSIX shell reads it back as exactly one literal
/// word, whatever quotes, backticks, `$` or `;` it contains.
pub fn escape(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    match shell_words::quote(value) {
        // shell_words leaves braces and `!` bare; bash would still expand them
        Cow::Borrowed(word) if !word.chars().all(is_plain) => format!("'{word}'"),
        quoted => quoted.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plain_words_stay_readable() {
        assert_eq!(escape("main"), "main");
        assert_eq!(escape(""), "''");
    }

    #[test]
    fn metacharacters_are_quoted() {
        assert_eq!(escape("a b"), "'a b'");
        assert_eq!(escape("$(id)"), "'$(id)'");
        assert_eq!(escape("`id`"), "'`id`'");
        assert_eq!(escape("{a,b}"), "'{a,b}'");
    }

    proptest! {
        #[test]
        fn escaped_value_splits_back_to_itself(value in "[ -~\n\t]{0,64}") {
            let words = shell_words::split(&escape(&value)).unwrap();
            prop_assert_eq!(words, vec![value]);
        }
    }
}
