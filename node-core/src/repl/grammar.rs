#![allow(clippy::module_name_repetitions)]

//! Lexer and parser for the operator console.
//!
//! The lexer uses `regal` to produce a bounded token stream and the parser
//! composes `winnow` combinators over those tokens. Both stay allocation-free
//! so the firmware can parse lines straight out of its receive buffer.
//!
//! ```text
//! command  := "exit" | "status" | "help" [ident] | "get" key | "set" key value
//! key      := "sleep.interval" | "advert.wakeups" | "hibernate.max"
//! value    := integer | duration
//! duration := integer ("s" | "m" | "h")
//! ```

use core::fmt;
use core::ops::Range;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
#[allow(deprecated)]
use winnow::error::ErrorKind;
use winnow::error::{ErrMode, ParserError};
use winnow::prelude::*;
use winnow::stream::Stream;

/// Maximum number of tokens produced per console line.
pub const MAX_TOKENS: usize = 16;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

/// Lexical token kinds recognized by the console grammar.
#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// Duration literal ending in `s`, `m`, or `h`.
    #[regex(r"[0-9]+[smh]", priority = 2)]
    Duration,
    /// Unsuffixed integer literal.
    #[regex(r"[0-9]+")]
    Integer,
    /// Keyword or dotted setting name.
    #[regex(r"[A-Za-z][A-Za-z0-9._-]*")]
    Ident,
    /// Inline whitespace is ignored.
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    /// End-of-line token (`\r`, `\n`, or `\r\n`).
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    /// Pseudo variant used when the lexer encounters unsupported input.
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Token emitted by the lexer with a byte span back into the source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

/// Bounded token buffer to avoid dynamic allocation in `no_std` environments.
pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    /// Input produced more tokens than the static buffer allows.
    TooManyTokens { processed: usize },
    /// Underlying lexer reported an unrecoverable error.
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "line too long ({processed} tokens)")
            }
            LexError::Engine => f.write_str("lexer engine error"),
        }
    }
}

/// Grammar errors emitted by the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarErrorKind<'a> {
    UnexpectedToken {
        expected: &'static str,
        found: &'a str,
        span: Range<usize>,
    },
    UnexpectedEnd {
        expected: &'static str,
    },
    UnknownCommand {
        lexeme: &'a str,
    },
    UnknownSetting {
        lexeme: &'a str,
    },
    InvalidNumber {
        span: Range<usize>,
    },
    InvalidToken {
        span: Range<usize>,
        lexeme: &'a str,
    },
}

impl fmt::Display for GrammarErrorKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarErrorKind::UnexpectedToken {
                expected, found, ..
            } => write!(f, "expected {expected}, found `{found}`"),
            GrammarErrorKind::UnexpectedEnd { expected } => {
                write!(f, "missing {expected}")
            }
            GrammarErrorKind::UnknownCommand { lexeme } => {
                write!(f, "unknown command `{lexeme}`, try `help`")
            }
            GrammarErrorKind::UnknownSetting { lexeme } => {
                write!(f, "unknown setting `{lexeme}`")
            }
            GrammarErrorKind::InvalidNumber { span } => {
                write!(f, "number out of range at {span:?}")
            }
            GrammarErrorKind::InvalidToken { lexeme, .. } => {
                write!(f, "unsupported character `{lexeme}`")
            }
        }
    }
}

/// Wrapper type enabling a consistent error surface for consumers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrammarError<'a> {
    pub kind: GrammarErrorKind<'a>,
}

impl fmt::Display for GrammarError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl<'a> GrammarError<'a> {
    fn unexpected(expected: &'static str, token: Option<&Token<'a>>) -> Self {
        GrammarError {
            kind: match token {
                Some(tok) if tok.kind != TokenKind::Eol => GrammarErrorKind::UnexpectedToken {
                    expected,
                    found: tok.lexeme,
                    span: tok.span.clone(),
                },
                _ => GrammarErrorKind::UnexpectedEnd { expected },
            },
        }
    }

    fn unknown_command(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::UnknownCommand {
                lexeme: token.lexeme,
            },
        }
    }

    fn unknown_setting(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::UnknownSetting {
                lexeme: token.lexeme,
            },
        }
    }

    fn invalid_number(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidNumber {
                span: token.span.clone(),
            },
        }
    }

    fn invalid_token(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidToken {
                span: token.span.clone(),
                lexeme: token.lexeme,
            },
        }
    }
}

type Input<'src, 'slice> = &'slice [Token<'src>];

#[allow(deprecated)]
impl<'src, 'slice> ParserError<Input<'src, 'slice>> for GrammarError<'src>
where
    'src: 'slice,
{
    fn from_error_kind(input: &Input<'src, 'slice>, _kind: ErrorKind) -> Self {
        GrammarError::unexpected("token", input.first())
    }

    fn append(
        self,
        _input: &Input<'src, 'slice>,
        _token_start: &<Input<'src, 'slice> as Stream>::Checkpoint,
        _kind: ErrorKind,
    ) -> Self {
        self
    }

    fn or(self, other: Self) -> Self {
        other
    }
}

/// Combined lex/parse error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Grammar(err) => err.fmt(f),
        }
    }
}

/// Operator-editable settings.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SettingKey {
    SleepInterval,
    AdvertWakeups,
    HibernateMax,
}

impl SettingKey {
    pub const ALL: [SettingKey; 3] = [
        SettingKey::SleepInterval,
        SettingKey::AdvertWakeups,
        SettingKey::HibernateMax,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            SettingKey::SleepInterval => "sleep.interval",
            SettingKey::AdvertWakeups => "advert.wakeups",
            SettingKey::HibernateMax => "hibernate.max",
        }
    }

    fn lookup(lexeme: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|key| key.name().eq_ignore_ascii_case(lexeme))
    }
}

/// Right-hand side of `set`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SettingValue {
    /// Bare number.
    Integer(u32),
    /// Number with a unit suffix, normalized to seconds.
    Seconds(u32),
}

/// Structured commands produced by the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Exit,
    Status,
    Help { topic: Option<&'a str> },
    Get(SettingKey),
    Set(SettingKey, SettingValue),
}

/// Tokenize the provided line.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(compiled, line)
        .map_err(map_incremental_error)?;
    let mut buffer = TokenBuffer::new();

    let records = cache
        .tokens()
        .filter(|record| !record.skipped)
        .map(|record| (record.token, record.start..record.end));
    let trailing = partial
        .filter(|partial| !partial.fragment.is_empty())
        .map(|partial| {
            let start = partial.start;
            (TokenKind::Error, start..start + partial.fragment.len())
        });

    for (kind, span) in records.chain(trailing) {
        let lexeme = &line[span.clone()];
        if buffer.push(Token { kind, lexeme, span }).is_err() {
            return Err(LexError::TooManyTokens {
                processed: buffer.len() + 1,
            });
        }
    }

    Ok(buffer)
}

fn map_incremental_error(error: IncrementalError) -> LexError {
    match error {
        IncrementalError::TokenOverflow => LexError::TooManyTokens {
            processed: MAX_TOKENS,
        },
        _ => LexError::Engine,
    }
}

/// Parse a console command from the provided line.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex(line).map_err(ParseError::Lex)?;

    if let Some(token) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(ParseError::Grammar(GrammarError::invalid_token(token)));
    }

    let mut input = tokens.as_slice();
    let command = match command().parse_next(&mut input) {
        Ok(command) => command,
        Err(ErrMode::Backtrack(err) | ErrMode::Cut(err)) => {
            return Err(ParseError::Grammar(err));
        }
        Err(ErrMode::Incomplete(_)) => {
            return Err(ParseError::Grammar(GrammarError::unexpected(
                "token",
                input.first(),
            )));
        }
    };

    match input.iter().find(|token| token.kind != TokenKind::Eol) {
        Some(token) => Err(ParseError::Grammar(GrammarError::unexpected(
            "end of command",
            Some(token),
        ))),
        None => Ok(command),
    }
}

fn command<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, Command<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let keyword = expect_kind(TokenKind::Ident, "command").parse_next(input)?;

        if keyword.lexeme.eq_ignore_ascii_case("exit") {
            Ok(Command::Exit)
        } else if keyword.lexeme.eq_ignore_ascii_case("status") {
            Ok(Command::Status)
        } else if keyword.lexeme.eq_ignore_ascii_case("help") {
            let topic = optional_ident(input);
            Ok(Command::Help { topic })
        } else if keyword.lexeme.eq_ignore_ascii_case("get") {
            let key = setting_key().parse_next(input)?;
            Ok(Command::Get(key))
        } else if keyword.lexeme.eq_ignore_ascii_case("set") {
            let key = setting_key().parse_next(input)?;
            let value = setting_value().parse_next(input)?;
            Ok(Command::Set(key, value))
        } else {
            Err(ErrMode::Cut(GrammarError::unknown_command(&keyword)))
        }
    }
}

fn optional_ident<'src>(input: &mut Input<'src, '_>) -> Option<&'src str> {
    match input.split_first() {
        Some((token, rest)) if token.kind == TokenKind::Ident => {
            *input = rest;
            Some(token.lexeme)
        }
        _ => None,
    }
}

fn setting_key<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, SettingKey, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let token = expect_kind(TokenKind::Ident, "setting name").parse_next(input)?;
        SettingKey::lookup(token.lexeme)
            .ok_or_else(|| ErrMode::Cut(GrammarError::unknown_setting(&token)))
    }
}

fn setting_value<'src, 'slice>()
-> impl Parser<Input<'src, 'slice>, SettingValue, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == TokenKind::Integer => {
            *input = rest;
            parse_integer(token)
                .map(SettingValue::Integer)
                .map_err(ErrMode::Cut)
        }
        Some((token, rest)) if token.kind == TokenKind::Duration => {
            *input = rest;
            parse_duration_secs(token)
                .map(SettingValue::Seconds)
                .map_err(ErrMode::Cut)
        }
        other => Err(ErrMode::Backtrack(GrammarError::unexpected(
            "value",
            other.map(|(token, _)| token),
        ))),
    }
}

fn expect_kind<'src, 'slice>(
    kind: TokenKind,
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(token.clone())
        }
        other => Err(ErrMode::Backtrack(GrammarError::unexpected(
            label,
            other.map(|(token, _)| token),
        ))),
    }
}

fn parse_integer<'a>(token: &Token<'a>) -> Result<u32, GrammarError<'a>> {
    token
        .lexeme
        .parse::<u32>()
        .map_err(|_| GrammarError::invalid_number(token))
}

fn parse_duration_secs<'a>(token: &Token<'a>) -> Result<u32, GrammarError<'a>> {
    let text = token.lexeme;
    let (digits, scale) = match text.as_bytes().last() {
        Some(b's') => (&text[..text.len() - 1], 1),
        Some(b'm') => (&text[..text.len() - 1], 60),
        Some(b'h') => (&text[..text.len() - 1], 3_600),
        _ => return Err(GrammarError::invalid_number(token)),
    };
    digits
        .parse::<u32>()
        .ok()
        .and_then(|value| value.checked_mul(scale))
        .ok_or_else(|| GrammarError::invalid_number(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Command<'_> {
        parse(input).expect("command should parse")
    }

    #[test]
    fn parses_bare_commands() {
        assert_eq!(parse_ok("exit"), Command::Exit);
        assert_eq!(parse_ok("status\r\n"), Command::Status);
        assert_eq!(parse_ok("help"), Command::Help { topic: None });
    }

    #[test]
    fn parses_help_topic() {
        assert_eq!(
            parse_ok("help set"),
            Command::Help { topic: Some("set") }
        );
    }

    #[test]
    fn parses_dotted_setting_names() {
        assert_eq!(
            parse_ok("get sleep.interval"),
            Command::Get(SettingKey::SleepInterval)
        );
        assert_eq!(
            parse_ok("set advert.wakeups 24"),
            Command::Set(SettingKey::AdvertWakeups, SettingValue::Integer(24))
        );
    }

    #[test]
    fn duration_suffixes_normalize_to_seconds() {
        assert_eq!(
            parse_ok("set sleep.interval 10m"),
            Command::Set(SettingKey::SleepInterval, SettingValue::Seconds(600))
        );
        assert_eq!(
            parse_ok("set hibernate.max 6h"),
            Command::Set(SettingKey::HibernateMax, SettingValue::Seconds(21_600))
        );
        assert_eq!(
            parse_ok("set sleep.interval 45s"),
            Command::Set(SettingKey::SleepInterval, SettingValue::Seconds(45))
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(parse_ok("EXIT"), Command::Exit);
        assert_eq!(
            parse_ok("Get Hibernate.Max"),
            Command::Get(SettingKey::HibernateMax)
        );
    }

    #[test]
    fn rejects_unknown_command_and_setting() {
        assert!(matches!(
            parse("reboot"),
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::UnknownCommand { lexeme: "reboot" }
            }))
        ));
        assert!(matches!(
            parse("get radio.power"),
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::UnknownSetting { .. }
            }))
        ));
    }

    #[test]
    fn rejects_missing_value_and_trailing_tokens() {
        assert!(matches!(
            parse("set sleep.interval"),
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::UnexpectedEnd { expected: "value" }
            }))
        ));
        assert!(matches!(
            parse("status now"),
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::UnexpectedToken { .. }
            }))
        ));
    }

    #[test]
    fn rejects_overflowing_numbers() {
        assert!(matches!(
            parse("set sleep.interval 99999999999"),
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::InvalidNumber { .. }
            }))
        ));
        assert!(matches!(
            parse("set sleep.interval 4294967295h"),
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::InvalidNumber { .. }
            }))
        ));
    }

    #[test]
    fn lexer_emits_error_token_for_unknown_symbol() {
        let tokens = lex("status$").expect("lexing should succeed");
        let last = tokens.last().expect("expected at least one token");
        assert_eq!(last.kind, TokenKind::Error);
        assert_eq!(last.lexeme, "$");
        assert!(matches!(
            parse("status$"),
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::InvalidToken { .. }
            }))
        ));
    }
}
