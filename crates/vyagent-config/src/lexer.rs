//! Tokenizer shared by the configuration parser and [`ConfigPath`].
//!
//! Words follow shell rules: single quotes are literal, double quotes and
//! bare backslashes escape the next character, adjacent pieces concatenate.
//! `{` and `}` are structural outside quotes; `/* ... */` and `#` start
//! comments when they begin a word.
//!
//! [`ConfigPath`]: crate::ConfigPath

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Word(String),
    Open,
    Close,
    Newline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub line: usize,
}

pub(crate) fn tokenize(text: &str) -> ConfigResult<Vec<Spanned>> {
    let mut out = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                chars.next();
                out.push(Spanned {
                    token: Token::Newline,
                    line,
                });
                line += 1;
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '{' => {
                chars.next();
                out.push(Spanned {
                    token: Token::Open,
                    line,
                });
            }
            '}' => {
                chars.next();
                out.push(Spanned {
                    token: Token::Close,
                    line,
                });
            }
            '#' => {
                while let Some(&n) = chars.peek() {
                    if n == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '/' if starts_comment(&chars) => {
                let start = line;
                chars.next();
                chars.next();
                let mut prev = '\0';
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '\n' {
                        line += 1;
                    }
                    if prev == '*' && n == '/' {
                        closed = true;
                        break;
                    }
                    prev = n;
                }
                if !closed {
                    return Err(ConfigError::parse(start, "unterminated comment"));
                }
            }
            _ => {
                let start = line;
                let word = read_word(&mut chars, &mut line)?;
                out.push(Spanned {
                    token: Token::Word(word),
                    line: start,
                });
            }
        }
    }

    Ok(out)
}

fn starts_comment(chars: &std::iter::Peekable<std::str::Chars<'_>>) -> bool {
    let mut ahead = chars.clone();
    ahead.next();
    ahead.next() == Some('*')
}

fn read_word(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    line: &mut usize,
) -> ConfigResult<String> {
    let start = *line;
    let mut word = String::new();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() || c == '{' || c == '}' => break,
            '\'' => {
                chars.next();
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(n) => {
                            if n == '\n' {
                                *line += 1;
                            }
                            word.push(n);
                        }
                        None => return Err(ConfigError::parse(start, "unterminated single quote")),
                    }
                }
            }
            '"' => {
                chars.next();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(n) => word.push(n),
                            None => {
                                return Err(ConfigError::parse(start, "unterminated double quote"))
                            }
                        },
                        Some(n) => {
                            if n == '\n' {
                                *line += 1;
                            }
                            word.push(n);
                        }
                        None => return Err(ConfigError::parse(start, "unterminated double quote")),
                    }
                }
            }
            '\\' => {
                chars.next();
                match chars.next() {
                    Some(n) => word.push(n),
                    None => return Err(ConfigError::parse(start, "dangling backslash")),
                }
            }
            _ => {
                chars.next();
                word.push(c);
            }
        }
    }

    Ok(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn words(text: &str) -> Vec<String> {
        tokenize(text)
            .unwrap()
            .into_iter()
            .filter_map(|s| match s.token {
                Token::Word(w) => Some(w),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_plain_words() {
        assert_eq!(words("service dns  forwarding\tname-server 8.8.8.8"), [
            "service",
            "dns",
            "forwarding",
            "name-server",
            "8.8.8.8"
        ]);
    }

    #[test]
    fn test_quotes_group_words() {
        assert_eq!(words(r#"description "mgmt port" x"#), ["description", "mgmt port", "x"]);
        assert_eq!(words("description 'it'\\''s'"), ["description", "it's"]);
        assert_eq!(words("a \"\""), ["a", ""]);
    }

    #[test]
    fn test_braces_and_lines() {
        let tokens: Vec<Token> = tokenize("a {\n b c\n}")
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect();
        assert_eq!(tokens, vec![
            Token::Word("a".into()),
            Token::Open,
            Token::Newline,
            Token::Word("b".into()),
            Token::Word("c".into()),
            Token::Newline,
            Token::Close,
        ]);
    }

    #[test]
    fn test_comments_skipped() {
        let spanned = tokenize("/* Warning:\n keep */\n# note\nx").unwrap();
        let last = spanned.last().unwrap();
        assert_eq!(last.token, Token::Word("x".into()));
        assert_eq!(last.line, 4);
    }

    #[test]
    fn test_slash_inside_word_is_not_comment() {
        assert_eq!(words("10.0.0.0/24 /usr/bin"), ["10.0.0.0/24", "/usr/bin"]);
    }

    #[test]
    fn test_unterminated() {
        assert!(tokenize("a 'b").is_err());
        assert!(tokenize("a \"b").is_err());
        assert!(tokenize("/* never closed").is_err());
    }
}
