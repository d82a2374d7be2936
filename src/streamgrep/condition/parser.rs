/*!
Recursive descent parser for gating condition expressions.

Grammar, loosest binding first:

```text
expression  = or_expr
or_expr     = and_expr { "or" and_expr }
and_expr    = not_expr { "and" not_expr }
not_expr    = "not" not_expr | comparison
comparison  = additive [ ("==" | "!=" | "<" | "<=" | ">" | ">=") additive ]
additive    = multiplicative { ("+" | "-") multiplicative }
multiplicative = unary { ("*" | "/" | "%") unary }
unary       = "-" unary | postfix
postfix     = primary { "." IDENT | "[" expression "]" }
primary     = NUMBER | STRING | "true" | "false" | CHANNEL_REF
            | "len" "(" expression ")" | IDENT | "(" expression ")"
```
*/

use crate::streamgrep::condition::ast::{BinaryOperator, Expr, LiteralValue, UnaryOperator};
use crate::streamgrep::condition::lexer::{tokenize, Token, TokenType};
use crate::streamgrep::error::{GrepError, GrepResult};

/// Parses a condition expression into an AST.
pub fn parse_condition(text: &str) -> GrepResult<Expr> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        text,
        tokens,
        position: 0,
    };
    let expr = parser.parse_or()?;
    let trailing = parser.peek();
    if trailing.token_type != TokenType::Eof {
        return Err(GrepError::condition_parse(
            &format!("Unexpected token '{}'", trailing.value),
            text,
            Some(trailing.position),
        ));
    }
    Ok(expr)
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    position: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        token
    }

    fn check(&mut self, token_type: TokenType) -> bool {
        if self.peek().token_type == token_type {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token_type: TokenType, what: &str) -> GrepResult<Token> {
        if self.peek().token_type == token_type {
            Ok(self.advance())
        } else {
            let token = self.peek();
            Err(GrepError::condition_parse(
                &format!("Expected {}, found '{}'", what, token.value),
                self.text,
                Some(token.position),
            ))
        }
    }

    fn parse_or(&mut self) -> GrepResult<Expr> {
        let mut left = self.parse_and()?;
        while self.check(TokenType::Or) {
            let right = self.parse_and()?;
            left = Expr::Binary {
                left: Box::new(left),
                op: BinaryOperator::Or,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> GrepResult<Expr> {
        let mut left = self.parse_not()?;
        while self.check(TokenType::And) {
            let right = self.parse_not()?;
            left = Expr::Binary {
                left: Box::new(left),
                op: BinaryOperator::And,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> GrepResult<Expr> {
        if self.check(TokenType::Not) {
            let operand = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOperator::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> GrepResult<Expr> {
        let left = self.parse_additive()?;
        let op = match self.peek().token_type {
            TokenType::Equal => BinaryOperator::Equal,
            TokenType::NotEqual => BinaryOperator::NotEqual,
            TokenType::LessThan => BinaryOperator::LessThan,
            TokenType::LessThanOrEqual => BinaryOperator::LessThanOrEqual,
            TokenType::GreaterThan => BinaryOperator::GreaterThan,
            TokenType::GreaterThanOrEqual => BinaryOperator::GreaterThanOrEqual,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    fn parse_additive(&mut self) -> GrepResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().token_type {
                TokenType::Plus => BinaryOperator::Add,
                TokenType::Minus => BinaryOperator::Subtract,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> GrepResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().token_type {
                TokenType::Multiply => BinaryOperator::Multiply,
                TokenType::Divide => BinaryOperator::Divide,
                TokenType::Modulo => BinaryOperator::Modulo,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> GrepResult<Expr> {
        if self.check(TokenType::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOperator::Negate,
                operand: Box::new(operand),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> GrepResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check(TokenType::Dot) {
                let name = self.expect(TokenType::Identifier, "field name")?;
                expr = Expr::Attribute {
                    base: Box::new(expr),
                    name: name.value,
                };
            } else if self.check(TokenType::LeftBracket) {
                let index = self.parse_or()?;
                self.expect(TokenType::RightBracket, "']'")?;
                expr = Expr::Index {
                    base: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> GrepResult<Expr> {
        let token = self.advance();
        match token.token_type {
            TokenType::Number => {
                if token.value.contains('.')
                    || token.value.contains('e')
                    || token.value.contains('E')
                {
                    let value = token.value.parse::<f64>().map_err(|_| {
                        GrepError::condition_parse(
                            &format!("Invalid number '{}'", token.value),
                            self.text,
                            Some(token.position),
                        )
                    })?;
                    Ok(Expr::Literal(LiteralValue::Float(value)))
                } else {
                    let value = token.value.parse::<i64>().map_err(|_| {
                        GrepError::condition_parse(
                            &format!("Invalid number '{}'", token.value),
                            self.text,
                            Some(token.position),
                        )
                    })?;
                    Ok(Expr::Literal(LiteralValue::Integer(value)))
                }
            }
            TokenType::String => Ok(Expr::Literal(LiteralValue::String(token.value))),
            TokenType::True => Ok(Expr::Literal(LiteralValue::Boolean(true))),
            TokenType::False => Ok(Expr::Literal(LiteralValue::Boolean(false))),
            TokenType::ChannelRef => Ok(Expr::ChannelRef(token.value)),
            TokenType::Identifier if token.value == "len" => {
                if self.check(TokenType::LeftParen) {
                    let inner = self.parse_or()?;
                    self.expect(TokenType::RightParen, "')'")?;
                    Ok(Expr::Len(Box::new(inner)))
                } else {
                    Ok(Expr::Identifier(token.value))
                }
            }
            TokenType::Identifier => Ok(Expr::Identifier(token.value)),
            TokenType::LeftParen => {
                let inner = self.parse_or()?;
                self.expect(TokenType::RightParen, "')'")?;
                Ok(inner)
            }
            _ => Err(GrepError::condition_parse(
                &format!("Unexpected token '{}'", token.value),
                self.text,
                Some(token.position),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        // "a or b and c" groups as "a or (b and c)"
        let expr = parse_condition("a or b and c").unwrap();
        match expr {
            Expr::Binary { op, right, .. } => {
                assert_eq!(op, BinaryOperator::Or);
                assert!(matches!(
                    *right,
                    Expr::Binary {
                        op: BinaryOperator::And,
                        ..
                    }
                ));
            }
            other => panic!("unexpected AST: {:?}", other),
        }
    }

    #[test]
    fn test_comparison_binds_tighter_than_and() {
        let expr = parse_condition("x > 1 and y < 2").unwrap();
        assert!(matches!(
            expr,
            Expr::Binary {
                op: BinaryOperator::And,
                ..
            }
        ));
    }

    #[test]
    fn test_channel_attribute_chain() {
        let expr = parse_condition("<channel /state>.pose.x >= 0.5").unwrap();
        match expr {
            Expr::Binary { left, op, .. } => {
                assert_eq!(op, BinaryOperator::GreaterThanOrEqual);
                match *left {
                    Expr::Attribute { base, name } => {
                        assert_eq!(name, "x");
                        assert!(matches!(*base, Expr::Attribute { .. }));
                    }
                    other => panic!("unexpected AST: {:?}", other),
                }
            }
            other => panic!("unexpected AST: {:?}", other),
        }
    }

    #[test]
    fn test_negative_index() {
        let expr = parse_condition("<channel /odom>[-2].x").unwrap();
        match expr {
            Expr::Attribute { base, .. } => match *base {
                Expr::Index { index, .. } => {
                    assert!(matches!(
                        *index,
                        Expr::Unary {
                            op: UnaryOperator::Negate,
                            ..
                        }
                    ));
                }
                other => panic!("unexpected AST: {:?}", other),
            },
            other => panic!("unexpected AST: {:?}", other),
        }
    }

    #[test]
    fn test_len_builtin() {
        let expr = parse_condition("len(<channel /scan>) > 3").unwrap();
        assert!(matches!(
            expr,
            Expr::Binary {
                op: BinaryOperator::GreaterThan,
                ..
            }
        ));
    }

    #[test]
    fn test_channel_refs_deduplicated() {
        let expr =
            parse_condition("<channel /a>.x == 1 or <channel /b>.y == 2 and <channel /a>.z == 3")
                .unwrap();
        assert_eq!(expr.channel_refs(), vec!["/a".to_string(), "/b".to_string()]);
    }

    #[test]
    fn test_trailing_garbage_is_error() {
        assert!(parse_condition("a == 1 extra").is_err());
        assert!(parse_condition("(a == 1").is_err());
        assert!(parse_condition("").is_err());
    }
}
