//! Plain-text formula lexing using logos.
//!
//! Only what symbol classification needs: identifiers, the assignment `=`,
//! and enough punctuation to tell `f(x)` calls and comparisons apart.

use logos::Logos;

#[derive(Logos, Debug, Clone, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token<'src> {
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice())]
    Ident(&'src str),

    #[regex(r"[0-9]+(\.[0-9]+)?", |lex| lex.slice())]
    Number(&'src str),

    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LessEq,
    #[token(">=")]
    GreaterEq,
    #[token("=")]
    Assign,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,

    #[regex(r"[-+*/^<>,\[\]{}!.:;|&%]", |lex| lex.slice())]
    Op(&'src str),
}

/// Symbols a formula defines and references
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormulaSymbols {
    /// `name = value` when the formula is a plain assignment
    pub definition: Option<(String, String)>,
    /// Referenced identifiers in first-appearance order, excluding calls and
    /// the defined name
    pub uses: Vec<String>,
}

pub fn analyze(text: &str) -> FormulaSymbols {
    let tokens: Vec<(Token<'_>, std::ops::Range<usize>)> = Token::lexer(text)
        .spanned()
        .filter_map(|(token, span)| token.ok().map(|t| (t, span)))
        .collect();

    let assignments: Vec<usize> = tokens
        .iter()
        .enumerate()
        .filter(|(_, (t, _))| *t == Token::Assign)
        .map(|(i, _)| i)
        .collect();

    let mut symbols = FormulaSymbols::default();
    let mut rhs_start = 0;

    // A single `=` directly after a bare identifier
    if assignments == [1] {
        if let (Token::Ident(name), (_, span)) = (&tokens[0].0, &tokens[1]) {
            let value = text[span.end..].trim();
            if !value.is_empty() {
                symbols.definition = Some((name.to_string(), value.to_string()));
                rhs_start = 2;
            }
        }
    }

    for (i, (token, _)) in tokens.iter().enumerate().skip(rhs_start) {
        let Token::Ident(name) = token else { continue };
        let is_call = matches!(tokens.get(i + 1), Some((Token::LParen, _)));
        if is_call || symbols.uses.iter().any(|u| u == name) {
            continue;
        }
        symbols.uses.push(name.to_string());
    }

    symbols
}
