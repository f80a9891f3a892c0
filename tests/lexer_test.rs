// SPDX-License-Identifier: GPL-3.0-or-later

//! Lexer coverage beyond what the in-crate self-test suite checks:
//! identifiers vs. keywords, numeric literal edge cases, comments, and
//! error tokens.

#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use rlox::lexer::{Lexer, TokenKind};

fn kinds(source: &str) -> Vec<TokenKind> {
    let mut lexer = Lexer::new(source);
    let mut out = Vec::new();
    loop {
        let token = lexer.next_token();
        if token.kind == TokenKind::Eof {
            break;
        }
        out.push(token.kind);
    }
    out
}

#[test]
fn keywords_are_not_identifiers() {
    assert_eq!(kinds("class else false for fun if nil or return super this true var while and break"), vec![
        TokenKind::Class,
        TokenKind::Else,
        TokenKind::False,
        TokenKind::For,
        TokenKind::Fun,
        TokenKind::If,
        TokenKind::Nil,
        TokenKind::Or,
        TokenKind::Return,
        TokenKind::Super,
        TokenKind::This,
        TokenKind::True,
        TokenKind::Var,
        TokenKind::While,
        TokenKind::And,
        TokenKind::Break,
    ]);
}

#[test]
fn identifiers_may_contain_keywords_as_a_prefix() {
    assert_eq!(kinds("classroom andiron forest"), vec![
        TokenKind::Identifier,
        TokenKind::Identifier,
        TokenKind::Identifier
    ]);
}

#[test]
fn underscore_digit_groups_are_skipped_in_numbers() {
    let mut lexer = Lexer::new("1_000_000");
    let token = lexer.next_token();
    assert_eq!(token.kind, TokenKind::Int);
    assert_eq!(token.lexeme, "1_000_000");
}

#[test]
fn scientific_notation_is_a_float() {
    for source in ["3.14e10", "2e5", "1.5E-3", "6E+2"] {
        let mut lexer = Lexer::new(source);
        let token = lexer.next_token();
        assert_eq!(token.kind, TokenKind::Float64, "{source} should lex as a float");
    }
}

#[test]
fn missing_digit_after_decimal_point_is_an_error() {
    let mut lexer = Lexer::new("1.");
    let token = lexer.next_token();
    assert_eq!(token.kind, TokenKind::Error);
}

#[test]
fn line_comments_are_skipped_and_line_numbers_still_advance() {
    let mut lexer = Lexer::new("// a comment\nvar");
    let token = lexer.next_token();
    assert_eq!(token.kind, TokenKind::Var);
    assert_eq!(token.line, 2);
}

#[test]
fn unterminated_string_is_an_error_token() {
    let mut lexer = Lexer::new("\"abc");
    let token = lexer.next_token();
    assert_eq!(token.kind, TokenKind::Error);
}

#[test]
fn strings_may_span_multiple_lines() {
    let mut lexer = Lexer::new("\"line one\nline two\"\nvar");
    let string_token = lexer.next_token();
    assert_eq!(string_token.kind, TokenKind::String);
    let next = lexer.next_token();
    assert_eq!(next.kind, TokenKind::Var);
    assert_eq!(next.line, 3);
}

#[test]
fn two_character_operators_are_not_confused_with_their_prefix() {
    assert_eq!(kinds("! != = == > >= < <="), vec![
        TokenKind::Bang,
        TokenKind::BangEqual,
        TokenKind::Equal,
        TokenKind::EqualEqual,
        TokenKind::Greater,
        TokenKind::GreaterEqual,
        TokenKind::Less,
        TokenKind::LessEqual,
    ]);
}

#[test]
fn unexpected_character_is_an_error_token() {
    let mut lexer = Lexer::new("@");
    let token = lexer.next_token();
    assert_eq!(token.kind, TokenKind::Error);
}
