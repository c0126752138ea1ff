//! Line normalisation and quote-aware tokenization.
//!
//! Every helper that can grow a line takes the capacity `max` of the buffer the
//! line must fit in, terminator included: a result is accepted only while it is
//! strictly shorter than `max`. A rejected transformation leaves the line as it was.

use std::borrow::Cow;
use std::iter::Peekable;
use std::str::CharIndices;

use crate::shell::error::LexError;
use crate::shell::executor::variable::Environment;

/// Capacity of one input line.
pub const MAX_CMD_LINE: usize = 4096;
/// Capacity of the token array, sentinel slot included.
pub const MAX_TOKENS: usize = MAX_CMD_LINE / 2 + 1;
/// Longest variable name looked up by `$NAME` / `${NAME}`.
pub const MAX_VAR_NAME: usize = 255;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Operator {
    Semi,       // ;
    Background, // &
    Input,      // <
    Output,     // >
    Append,     // >>
    ErrOutput,  // 2>
    ErrAppend,  // 2>>
    OutToErr,   // >&2
    ErrToOut,   // 2>&1
    Pipe,       // |
    And,        // &&
    Or,         // ||
    Not,        // !
}

impl Operator {
    pub fn parse(word: &str) -> Option<Self> {
        let op = match word {
            ";" => Operator::Semi,
            "&" => Operator::Background,
            "<" => Operator::Input,
            ">" => Operator::Output,
            ">>" => Operator::Append,
            "2>" => Operator::ErrOutput,
            "2>>" => Operator::ErrAppend,
            ">&2" => Operator::OutToErr,
            "2>&1" => Operator::ErrToOut,
            "|" => Operator::Pipe,
            "&&" => Operator::And,
            "||" => Operator::Or,
            "!" => Operator::Not,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Semi => ";",
            Operator::Background => "&",
            Operator::Input => "<",
            Operator::Output => ">",
            Operator::Append => ">>",
            Operator::ErrOutput => "2>",
            Operator::ErrAppend => "2>>",
            Operator::OutToErr => ">&2",
            Operator::ErrToOut => "2>&1",
            Operator::Pipe => "|",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Not => "!",
        }
    }
}

/// One word of a line. Unquoted words are borrowed from the line buffer.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Token<'a> {
    pub text: Cow<'a, str>,
    /// Part of the word was quoted or escaped, so it is never an operator.
    pub quoted: bool,
}

impl<'a> Token<'a> {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn operator(&self) -> Option<Operator> {
        if self.quoted {
            None
        } else {
            Operator::parse(&self.text)
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Class {
    /// Unquoted and unescaped.
    Plain,
    /// A quote delimiter.
    Quote,
    /// Inside double quotes; `$` is still live.
    Double,
    /// Inside single quotes, or part of a backslash escape.
    Literal,
}

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

fn is_double_escapable(c: char) -> bool {
    matches!(c, '$' | '`' | '"' | '\\' | '\n')
}

fn fits(len: usize, max: usize) -> bool {
    len < max
}

/// Tags every character of `line` with its quoting context.
fn classify(line: &str) -> Vec<(usize, char, Class)> {
    let mut out = Vec::with_capacity(line.len());
    let mut quote: Option<char> = None;
    let mut chars = line.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match (quote, c) {
            (None, '\\') => {
                out.push((i, c, Class::Literal));
                if let Some((j, escaped)) = chars.next() {
                    out.push((j, escaped, Class::Literal));
                }
            }
            (None, '"' | '\'') => {
                quote = Some(c);
                out.push((i, c, Class::Quote));
            }
            (None, _) => out.push((i, c, Class::Plain)),
            (Some(q), _) if c == q => {
                quote = None;
                out.push((i, c, Class::Quote));
            }
            (Some('"'), '\\') => match chars.peek() {
                Some(&(j, escaped)) if is_double_escapable(escaped) => {
                    chars.next();
                    out.push((i, c, Class::Literal));
                    out.push((j, escaped, Class::Literal));
                }
                _ => out.push((i, c, Class::Double)),
            },
            (Some('"'), _) => out.push((i, c, Class::Double)),
            (Some(_), _) => out.push((i, c, Class::Literal)),
        }
    }
    out
}

/// Strips leading and trailing unquoted blanks (space, tab, CR, LF).
pub fn trim(line: &mut String) {
    let classes = classify(line);
    let is_edge = |&&(_, c, class): &&(usize, char, Class)| class == Class::Plain && is_blank(c);

    let start = classes
        .iter()
        .find(|entry| !is_edge(entry))
        .map(|&(i, _, _)| i)
        .unwrap_or(line.len());
    let end = classes
        .iter()
        .rev()
        .find(|entry| !is_edge(entry))
        .map(|&(i, c, _)| i + c.len_utf8())
        .unwrap_or(start);

    line.truncate(end);
    line.drain(..start);
}

/// Collapses every run of unquoted blanks into a single space.
pub fn clean(line: &mut String) {
    let mut out = String::with_capacity(line.len());
    let mut in_blank = false;

    for (_, c, class) in classify(line) {
        if class == Class::Plain && is_blank(c) {
            if !in_blank {
                out.push(' ');
                in_blank = true;
            }
        } else {
            out.push(c);
            in_blank = false;
        }
    }
    *line = out;
}

/// Surrounds each unquoted character of `separators` with spaces, without doubling
/// a space that is already there.
pub fn separate(line: &mut String, separators: &str, max: usize) -> Result<(), LexError> {
    let classes = classify(line);
    let mut out = String::with_capacity(line.len() + 8);

    for (n, &(_, c, class)) in classes.iter().enumerate() {
        if class != Class::Plain || !separators.contains(c) {
            out.push(c);
            continue;
        }
        if !out.is_empty() && !out.ends_with(' ') {
            out.push(' ');
        }
        out.push(c);
        match classes.get(n + 1) {
            Some(&(_, next, _)) if !is_blank(next) => out.push(' '),
            _ => {}
        }
    }

    if !fits(out.len(), max) {
        return Err(LexError::Overflow { max });
    }
    *line = out;
    Ok(())
}

/// Replaces every occurrence of `from` with `to`, returning how many were replaced.
pub fn replace(line: &mut String, from: &str, to: &str, max: usize) -> Result<usize, LexError> {
    if from.is_empty() {
        return Err(LexError::EmptyPattern);
    }
    let count = line.matches(from).count();
    if count == 0 {
        return Ok(0);
    }

    let new_len = line.len() - count * from.len() + count * to.len();
    if !fits(new_len, max) {
        return Err(LexError::Overflow { max });
    }
    *line = line.replace(from, to);
    Ok(count)
}

fn cap_name(name: &str) -> &str {
    match name.char_indices().nth(MAX_VAR_NAME) {
        Some((end, _)) => &name[..end],
        None => name,
    }
}

/// Parses the reference following a `$`. Returns the variable name and how many
/// characters after the `$` belong to the reference.
fn variable_at(rest: &str) -> Option<(&str, usize)> {
    if let Some(braced) = rest.strip_prefix('{') {
        let close = braced.find('}')?;
        let inner = &braced[..close];
        return Some((cap_name(inner), inner.chars().count() + 2));
    }

    let len = rest
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
        .take(MAX_VAR_NAME)
        .count();
    if len == 0 {
        return None;
    }
    Some((&rest[..len], len))
}

/// Expands `$NAME` and `${NAME}` outside single quotes and escapes. Unknown
/// variables expand to nothing; a `$` that does not start a reference is kept,
/// and so is the `$` of an empty `${}`.
pub fn expand_variables(
    line: &mut String,
    env: &dyn Environment,
    max: usize,
) -> Result<(), LexError> {
    if max == 0 {
        return Err(LexError::Overflow { max });
    }
    let classes = classify(line);
    let mut out = String::with_capacity(line.len());
    let mut n = 0;

    while n < classes.len() {
        let (i, c, class) = classes[n];
        n += 1;

        let reference = if c == '$' && matches!(class, Class::Plain | Class::Double) {
            variable_at(&line[i + 1..])
        } else {
            None
        };
        match reference {
            Some((name, consumed)) if !name.is_empty() => {
                if let Some(value) = env.get(name) {
                    out.push_str(&value);
                }
                n += consumed;
            }
            // `${}` keeps the `$` and drops the braces.
            Some((_, consumed)) => {
                out.push(c);
                n += consumed;
            }
            None => out.push(c),
        }

        if !fits(out.len(), max) {
            return Err(LexError::Overflow { max });
        }
    }

    *line = out;
    Ok(())
}

struct Word {
    start: usize,
    text: String,
    verbatim: bool,
    quoted: bool,
}

impl Word {
    fn at(start: usize) -> Self {
        Self {
            start,
            text: String::new(),
            verbatim: true,
            quoted: false,
        }
    }

    fn mark_quoted(&mut self) {
        self.verbatim = false;
        self.quoted = true;
    }
}

struct Tokenizer<'a> {
    line: &'a str,
    chars: Peekable<CharIndices<'a>>,
    tokens: Vec<Token<'a>>,
    max_tokens: usize,
}

impl<'a> Tokenizer<'a> {
    fn finish_word(&mut self, word: Word, end: usize) -> Result<(), LexError> {
        if self.tokens.len() + 1 >= self.max_tokens {
            return Err(LexError::TooManyTokens(self.max_tokens));
        }
        let text = if word.verbatim {
            Cow::Borrowed(&self.line[word.start..end])
        } else {
            Cow::Owned(word.text)
        };
        self.tokens.push(Token {
            text,
            quoted: word.quoted,
        });
        Ok(())
    }

    fn run(mut self) -> Result<Vec<Token<'a>>, LexError> {
        let mut current: Option<Word> = None;
        let mut quote: Option<char> = None;

        while let Some((i, c)) = self.chars.next() {
            if let Some(q) = quote {
                let word = current.get_or_insert_with(|| Word::at(i));
                if c == q {
                    quote = None;
                    continue;
                }
                if q == '"' && c == '\\' {
                    if let Some(&(_, escaped)) = self.chars.peek() {
                        if is_double_escapable(escaped) {
                            self.chars.next();
                            word.text.push(escaped);
                            continue;
                        }
                    }
                }
                word.text.push(c);
                continue;
            }

            match c {
                c if is_blank(c) => {
                    if let Some(word) = current.take() {
                        self.finish_word(word, i)?;
                    }
                }
                '"' | '\'' => {
                    current.get_or_insert_with(|| Word::at(i)).mark_quoted();
                    quote = Some(c);
                }
                '\\' => {
                    let word = current.get_or_insert_with(|| Word::at(i));
                    word.mark_quoted();
                    // a trailing backslash stands for itself
                    let escaped = self.chars.next().map_or('\\', |(_, e)| e);
                    word.text.push(escaped);
                }
                _ => current.get_or_insert_with(|| Word::at(i)).text.push(c),
            }
        }

        if let Some(q) = quote {
            return Err(LexError::UnterminatedQuote(q));
        }
        if let Some(word) = current.take() {
            let end = self.line.len();
            self.finish_word(word, end)?;
        }
        Ok(self.tokens)
    }
}

/// Splits `line` on unquoted blanks. Quote delimiters are removed; inside double
/// quotes a backslash only escapes `$`, `` ` ``, `"`, `\` and newline, inside single
/// quotes nothing is escaped. At most `max_tokens - 1` tokens are produced.
pub fn tokenize(line: &str, max_tokens: usize) -> Result<Vec<Token<'_>>, LexError> {
    if max_tokens == 0 {
        return Err(LexError::TooManyTokens(max_tokens));
    }
    Tokenizer {
        line,
        chars: line.char_indices().peekable(),
        tokens: Vec::new(),
        max_tokens,
    }
    .run()
}

/// Runs every normalisation stage in order: trim, clean, isolate `;`, expand.
pub fn normalize(line: &mut String, env: &dyn Environment, max: usize) -> Result<(), LexError> {
    if !fits(line.len(), max) {
        return Err(LexError::Overflow { max });
    }
    trim(line);
    clean(line);
    separate(line, ";", max)?;
    expand_variables(line, env, max)
}

/// Normalises `line` in place and splits it into tokens borrowed from it.
pub fn lex<'a>(
    line: &'a mut String,
    env: &dyn Environment,
    max: usize,
) -> Result<Vec<Token<'a>>, LexError> {
    normalize(line, env, max)?;
    let line: &'a String = line;
    tokenize(line, MAX_TOKENS)
}
