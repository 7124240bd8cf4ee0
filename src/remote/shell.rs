//! Shell argument quoting.

/// Escapes a string for safe use in a shell command line.
///
/// Plain tokens pass through untouched; anything else is wrapped in
/// single quotes with embedded quotes escaped.
pub fn quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '+' | ':'))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_tokens_pass_through() {
        assert_eq!(quote("server.jar"), "server.jar");
        assert_eq!(quote("/home/mc/minecraft/mc-abc-0001"), "/home/mc/minecraft/mc-abc-0001");
        assert_eq!(quote("1.21.1"), "1.21.1");
    }

    #[test]
    fn special_characters_are_wrapped() {
        assert_eq!(quote("with space"), "'with space'");
        assert_eq!(quote("a;rm -rf /"), "'a;rm -rf /'");
        assert_eq!(quote("$(id)"), "'$(id)'");
        assert_eq!(quote("`id`"), "'`id`'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn embedded_quotes_are_escaped() {
        assert_eq!(quote("it's"), "'it'\\''s'");
    }
}
