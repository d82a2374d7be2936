/*!
Tokenization for gating condition expressions.

Converts condition text into tokens: identifiers, literals, operators,
punctuation, and channel references written `<channel NAME>` where NAME is a
literal channel name or a `*`-glob.
*/

use crate::streamgrep::error::{GrepError, GrepResult};

/// Token types recognized by the condition lexer.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenType {
    // Literals and identifiers
    Identifier, // field names, builtin names like len
    Number,     // numeric literals (42, 3.14, 1e-3)
    String,     // string literals ('hello', "world")
    True,       // true / True
    False,      // false / False

    // Boolean keywords
    And, // and
    Or,  // or
    Not, // not

    // Comparison operators
    Equal,              // == (also accepts =)
    NotEqual,           // !=
    LessThan,           // <
    GreaterThan,        // >
    LessThanOrEqual,    // <=
    GreaterThanOrEqual, // >=

    // Arithmetic operators
    Plus,     // +
    Minus,    // -
    Multiply, // *
    Divide,   // /
    Modulo,   // %

    // Punctuation
    LeftParen,    // (
    RightParen,   // )
    LeftBracket,  // [
    RightBracket, // ]
    Dot,          // . (attribute access)

    // Channel history reference: <channel /some/name>
    ChannelRef,

    // End of input
    Eof,
}

/// A token with its type, text value and position for error reporting.
#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    pub value: String,
    pub position: usize,
}

fn keyword(word: &str) -> Option<TokenType> {
    match word {
        "and" => Some(TokenType::And),
        "or" => Some(TokenType::Or),
        "not" => Some(TokenType::Not),
        "true" | "True" => Some(TokenType::True),
        "false" | "False" => Some(TokenType::False),
        _ => None,
    }
}

/// Tokenizes a condition expression.
pub fn tokenize(text: &str) -> GrepResult<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let err = |message: &str, position: usize| {
        GrepError::condition_parse(message, text, Some(position))
    };

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '(' => {
                tokens.push(Token {
                    token_type: TokenType::LeftParen,
                    value: "(".to_string(),
                    position: i,
                });
                i += 1;
            }
            ')' => {
                tokens.push(Token {
                    token_type: TokenType::RightParen,
                    value: ")".to_string(),
                    position: i,
                });
                i += 1;
            }
            '[' => {
                tokens.push(Token {
                    token_type: TokenType::LeftBracket,
                    value: "[".to_string(),
                    position: i,
                });
                i += 1;
            }
            ']' => {
                tokens.push(Token {
                    token_type: TokenType::RightBracket,
                    value: "]".to_string(),
                    position: i,
                });
                i += 1;
            }
            '.' => {
                tokens.push(Token {
                    token_type: TokenType::Dot,
                    value: ".".to_string(),
                    position: i,
                });
                i += 1;
            }
            '+' => {
                tokens.push(Token {
                    token_type: TokenType::Plus,
                    value: "+".to_string(),
                    position: i,
                });
                i += 1;
            }
            '-' => {
                tokens.push(Token {
                    token_type: TokenType::Minus,
                    value: "-".to_string(),
                    position: i,
                });
                i += 1;
            }
            '*' => {
                tokens.push(Token {
                    token_type: TokenType::Multiply,
                    value: "*".to_string(),
                    position: i,
                });
                i += 1;
            }
            '/' => {
                tokens.push(Token {
                    token_type: TokenType::Divide,
                    value: "/".to_string(),
                    position: i,
                });
                i += 1;
            }
            '%' => {
                tokens.push(Token {
                    token_type: TokenType::Modulo,
                    value: "%".to_string(),
                    position: i,
                });
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token {
                        token_type: TokenType::Equal,
                        value: "==".to_string(),
                        position: i,
                    });
                    i += 2;
                } else {
                    tokens.push(Token {
                        token_type: TokenType::Equal,
                        value: "=".to_string(),
                        position: i,
                    });
                    i += 1;
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token {
                        token_type: TokenType::NotEqual,
                        value: "!=".to_string(),
                        position: i,
                    });
                    i += 2;
                } else {
                    return Err(err("Unexpected character '!' - did you mean '!='?", i));
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token {
                        token_type: TokenType::GreaterThanOrEqual,
                        value: ">=".to_string(),
                        position: i,
                    });
                    i += 2;
                } else {
                    tokens.push(Token {
                        token_type: TokenType::GreaterThan,
                        value: ">".to_string(),
                        position: i,
                    });
                    i += 1;
                }
            }
            '<' => {
                // Channel reference "<channel NAME>" or a comparison.
                if let Some((spec, next)) = scan_channel_ref(&chars, i) {
                    tokens.push(Token {
                        token_type: TokenType::ChannelRef,
                        value: spec,
                        position: i,
                    });
                    i = next;
                } else if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token {
                        token_type: TokenType::LessThanOrEqual,
                        value: "<=".to_string(),
                        position: i,
                    });
                    i += 2;
                } else {
                    tokens.push(Token {
                        token_type: TokenType::LessThan,
                        value: "<".to_string(),
                        position: i,
                    });
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = ch;
                let start = i;
                i += 1;
                let mut value = String::new();
                let mut closed = false;
                while i < chars.len() {
                    if chars[i] == quote {
                        i += 1;
                        closed = true;
                        break;
                    }
                    value.push(chars[i]);
                    i += 1;
                }
                if !closed {
                    return Err(err("Unterminated string literal", start));
                }
                tokens.push(Token {
                    token_type: TokenType::String,
                    value,
                    position: start,
                });
            }
            '0'..='9' => {
                let start = i;
                let mut value = String::new();
                let mut has_decimal = false;
                let mut has_exponent = false;
                while i < chars.len() {
                    let next = chars[i];
                    if next.is_ascii_digit() {
                        value.push(next);
                        i += 1;
                    } else if next == '.' && !has_decimal && !has_exponent {
                        has_decimal = true;
                        value.push(next);
                        i += 1;
                    } else if (next == 'e' || next == 'E') && !has_exponent {
                        has_exponent = true;
                        value.push(next);
                        i += 1;
                        if let Some(&sign) = chars.get(i) {
                            if sign == '+' || sign == '-' {
                                value.push(sign);
                                i += 1;
                            }
                        }
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    token_type: TokenType::Number,
                    value,
                    position: start,
                });
            }
            _ if ch.is_alphabetic() || ch == '_' => {
                let start = i;
                let mut value = String::new();
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    value.push(chars[i]);
                    i += 1;
                }
                let token_type = keyword(&value).unwrap_or(TokenType::Identifier);
                tokens.push(Token {
                    token_type,
                    value,
                    position: start,
                });
            }
            _ => {
                return Err(err(&format!("Unexpected character '{}'", ch), i));
            }
        }
    }

    tokens.push(Token {
        token_type: TokenType::Eof,
        value: String::new(),
        position: chars.len(),
    });
    Ok(tokens)
}

/// Tries to scan `<channel NAME>` starting at an opening angle bracket.
/// Returns the channel spec and the index past the closing bracket.
fn scan_channel_ref(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut i = start + 1;
    let marker: Vec<char> = "channel".chars().collect();
    if chars.len() < i + marker.len() || chars[i..i + marker.len()] != marker[..] {
        return None;
    }
    i += marker.len();
    if !matches!(chars.get(i), Some(c) if c.is_whitespace()) {
        return None;
    }
    while matches!(chars.get(i), Some(c) if c.is_whitespace()) {
        i += 1;
    }
    let mut spec = String::new();
    while let Some(&c) = chars.get(i) {
        if c == '>' {
            return if spec.is_empty() {
                None
            } else {
                Some((spec, i + 1))
            };
        }
        if c.is_whitespace() {
            // Trailing whitespace before the closing bracket is fine.
            while matches!(chars.get(i), Some(c) if c.is_whitespace()) {
                i += 1;
            }
            return match chars.get(i) {
                Some('>') if !spec.is_empty() => Some((spec, i + 1)),
                _ => None,
            };
        }
        if c == '<' {
            return None;
        }
        spec.push(c);
        i += 1;
    }
    None
}
