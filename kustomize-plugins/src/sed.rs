//! An in-process evaluator for sed substitution scripts (`s/re/replacement/flags`).
//!
//! Patterns use POSIX basic regular expression syntax with the usual GNU extensions
//! (`\+`, `\?`, `\|`) and are translated to [`regex`] syntax. Each line of the input is
//! processed independently, as sed does.

use std::{borrow::Cow, fmt, iter::Peekable, str::Chars, str::FromStr};

use anyhow::{Context as _, bail};
use regex::{Regex, RegexBuilder};

/// One or more substitution commands separated by `;` or newlines.
#[derive(Debug, Clone)]
pub struct Script {
    source: String,
    commands: Box<[Substitution]>,
}

#[derive(Debug, Clone)]
struct Substitution {
    regex: Regex,
    replacement: Box<[Replacement]>,
    global: bool,
    /// Replace starting from the nth match, 1-based.
    occurrence: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Replacement {
    Literal(String),
    Group(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Char(char),
    Escaped(char),
    /// An escaped delimiter, which always stands for itself.
    Delimiter(char),
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for Script {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut commands = vec![];
        let mut chars = s.chars().peekable();
        loop {
            while chars.next_if(|&c| c.is_whitespace() || c == ';').is_some() {}
            match chars.next() {
                None => break,
                Some('s') => commands.push(
                    Substitution::parse(&mut chars)
                        .with_context(|| format!("parsing sed script `{s}`"))?,
                ),
                Some(c) => bail!("unsupported sed command `{c}` in `{s}`, only `s` is supported"),
            }
        }

        if commands.is_empty() {
            bail!("sed script `{s}` contains no commands");
        }

        Ok(Script { source: s.to_owned(), commands: commands.into() })
    }
}

impl Script {
    /// Runs every command over each line of `input`, keeping line terminators as they were.
    pub fn apply(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        for line in input.split_inclusive('\n') {
            let (body, eol) = match line.strip_suffix('\n') {
                Some(body) => (body, "\n"),
                None => (line, ""),
            };

            let mut body = Cow::Borrowed(body);
            for command in &self.commands {
                body = Cow::Owned(command.apply(&body));
            }
            out.push_str(&body);
            out.push_str(eol);
        }
        out
    }
}

impl Substitution {
    fn parse(chars: &mut Peekable<Chars<'_>>) -> anyhow::Result<Self> {
        let delimiter = match chars.next() {
            None => bail!("missing delimiter after `s`"),
            Some(c @ ('\\' | '\n')) => bail!("`{}` cannot be used as a delimiter", c.escape_default()),
            Some(c) => c,
        };

        let pattern = read_part(chars, delimiter).context("unterminated pattern")?;
        let replacement = read_part(chars, delimiter).context("unterminated replacement")?;

        let mut global = false;
        let mut case_insensitive = false;
        let mut occurrence = String::new();
        while let Some(&c) = chars.peek() {
            match c {
                'g' => global = true,
                'i' | 'I' => case_insensitive = true,
                '0'..='9' => occurrence.push(c),
                ';' | '\n' => break,
                c if c.is_whitespace() => break,
                c => bail!("unknown option to `s`: `{c}`"),
            }
            chars.next();
        }

        let occurrence = match occurrence.as_str() {
            "" => 1,
            n => match n.parse::<usize>()? {
                0 => bail!("number option to `s` may not be zero"),
                n => n,
            },
        };

        let translated = translate_pattern(&pattern)?;
        let regex = RegexBuilder::new(&translated)
            .case_insensitive(case_insensitive)
            .build()
            .with_context(|| format!("compiling translated pattern `{translated}`"))?;

        let replacement = parse_replacement(&replacement);
        let groups = regex.captures_len() - 1;
        for part in &replacement {
            if let Replacement::Group(n) = part
                && *n > groups
            {
                bail!("invalid reference \\{n} on `s` command's replacement");
            }
        }

        Ok(Substitution { regex, replacement: replacement.into(), global, occurrence })
    }

    fn apply(&self, line: &str) -> String {
        let mut out = String::with_capacity(line.len());
        let mut last = 0;
        for (i, captures) in self.regex.captures_iter(line).enumerate() {
            let n = i + 1;
            let replace = if self.global { n >= self.occurrence } else { n == self.occurrence };
            if !replace {
                continue;
            }

            let Some(whole) = captures.get(0) else { continue };
            out.push_str(&line[last..whole.start()]);
            for part in &self.replacement {
                match part {
                    Replacement::Literal(s) => out.push_str(s),
                    Replacement::Group(group) => {
                        if let Some(m) = captures.get(*group) {
                            out.push_str(m.as_str());
                        }
                    }
                }
            }
            last = whole.end();

            if !self.global {
                break;
            }
        }
        out.push_str(&line[last..]);
        out
    }
}

/// Reads up to the next unescaped `delimiter`, consuming it.
fn read_part(chars: &mut Peekable<Chars<'_>>, delimiter: char) -> anyhow::Result<Vec<Token>> {
    let mut tokens = vec![];
    loop {
        match chars.next() {
            None => bail!("missing closing `{delimiter}`"),
            Some(c) if c == delimiter => return Ok(tokens),
            Some('\\') => match chars.next() {
                None => bail!("trailing backslash"),
                Some(c) if c == delimiter => tokens.push(Token::Delimiter(c)),
                Some(c) => tokens.push(Token::Escaped(c)),
            },
            Some(c) => tokens.push(Token::Char(c)),
        }
    }
}

fn push_literal(out: &mut String, c: char) {
    let mut buf = [0; 4];
    out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

/// Translates a basic regular expression into `regex` syntax.
fn translate_pattern(tokens: &[Token]) -> anyhow::Result<String> {
    let mut out = String::new();
    // `*` is literal at the start of an expression or group.
    let mut at_start = true;
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        let mut starts_expression = false;
        match token {
            Token::Delimiter(c) => push_literal(&mut out, c),
            Token::Char('[') => i = translate_bracket(tokens, i, &mut out)?,
            Token::Char('*') if at_start => out.push_str(r"\*"),
            Token::Char('^') if at_start => {
                out.push('^');
                starts_expression = true;
            }
            Token::Char('$')
                if !matches!(tokens.get(i + 1), None | Some(Token::Escaped(')' | '|'))) =>
            {
                out.push_str(r"\$")
            }
            Token::Char(c @ ('^' | '(' | ')' | '{' | '}' | '|' | '+' | '?')) => push_literal(&mut out, c),
            Token::Char(c) => out.push(c),
            Token::Escaped(c @ ('(' | '|')) => {
                out.push(c);
                starts_expression = true;
            }
            Token::Escaped(c @ (')' | '{' | '}' | '+' | '?')) => out.push(c),
            Token::Escaped(c @ '1'..='9') => {
                bail!("back-reference `\\{c}` in a pattern is not supported")
            }
            Token::Escaped('n') => out.push_str(r"\n"),
            Token::Escaped('t') => out.push_str(r"\t"),
            Token::Escaped(c @ ('w' | 'W' | 's' | 'S' | 'b' | 'B' | '<' | '>')) => {
                out.push('\\');
                out.push(c);
            }
            Token::Escaped('`') => out.push_str(r"\A"),
            Token::Escaped('\'') => out.push_str(r"\z"),
            Token::Escaped(c) => push_literal(&mut out, c),
        }
        at_start = starts_expression;
        i += 1;
    }
    Ok(out)
}

/// Translates the bracket expression starting at `start`, returning the index of its `]`.
fn translate_bracket(tokens: &[Token], start: usize, out: &mut String) -> anyhow::Result<usize> {
    let unterminated = || anyhow::anyhow!("unterminated bracket expression");
    let mut i = start + 1;
    out.push('[');
    if tokens.get(i) == Some(&Token::Char('^')) {
        out.push('^');
        i += 1;
    }
    if tokens.get(i) == Some(&Token::Char(']')) {
        out.push_str(r"\]");
        i += 1;
    }

    loop {
        match *tokens.get(i).ok_or_else(unterminated)? {
            Token::Char(']') => {
                out.push(']');
                return Ok(i);
            }
            Token::Char('[') if tokens.get(i + 1) == Some(&Token::Char(':')) => {
                let end = (i + 2..tokens.len().saturating_sub(1))
                    .find(|&j| tokens[j] == Token::Char(':') && tokens[j + 1] == Token::Char(']'))
                    .ok_or_else(unterminated)?;
                out.push_str("[:");
                for token in &tokens[i + 2..end] {
                    let (Token::Char(c) | Token::Escaped(c) | Token::Delimiter(c)) = *token;
                    out.push(c);
                }
                out.push_str(":]");
                i = end + 1;
            }
            Token::Char(c @ ('[' | '&' | '~' | '\\')) | Token::Delimiter(c @ ('[' | '&' | '~' | '\\')) => {
                out.push('\\');
                out.push(c);
            }
            Token::Char(c) | Token::Delimiter(c) => out.push(c),
            Token::Escaped('n') => out.push_str(r"\n"),
            Token::Escaped('t') => out.push_str(r"\t"),
            // Backslash is an ordinary character inside brackets.
            Token::Escaped(c) => {
                out.push_str(r"\\");
                match c {
                    '[' | '&' | '~' | '\\' => {
                        out.push('\\');
                        out.push(c);
                    }
                    ']' => {
                        out.push(']');
                        return Ok(i);
                    }
                    c => out.push(c),
                }
            }
        }
        i += 1;
    }
}

fn parse_replacement(tokens: &[Token]) -> Vec<Replacement> {
    let mut parts = vec![];
    let mut literal = String::new();
    for &token in tokens {
        let group = match token {
            Token::Char('&') => Some(0),
            Token::Escaped(c @ '0'..='9') => c.to_digit(10).map(|d| d as usize),
            _ => None,
        };

        match (group, token) {
            (Some(group), _) => {
                if !literal.is_empty() {
                    parts.push(Replacement::Literal(std::mem::take(&mut literal)));
                }
                parts.push(Replacement::Group(group));
            }
            (None, Token::Escaped('n')) => literal.push('\n'),
            (None, Token::Escaped('t')) => literal.push('\t'),
            (None, Token::Char(c) | Token::Escaped(c) | Token::Delimiter(c)) => literal.push(c),
        }
    }

    if !literal.is_empty() {
        parts.push(Replacement::Literal(literal));
    }
    parts
}
