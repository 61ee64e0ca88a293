#![allow(clippy::module_name_repetitions)]

//! Lexer and parser for the serial command console.
//!
//! The lexer composes `winnow` combinators over the raw line to produce a
//! bounded token stream; the parser walks those tokens to build structured
//! command values. Keywords match case-insensitively. Range validation of
//! frequencies and duty cycles stays with the executor, mirroring the split
//! between syntax and configuration errors in the console replies.

use core::fmt;
use core::ops::Range;

use heapless::Vec as HeaplessVec;
use winnow::combinator::{alt, opt};
use winnow::prelude::*;
use winnow::token::{one_of, take_while};

use crate::discharge::MAX_DISCHARGE_STEPS;

/// Maximum number of tokens produced per console line. A `DC_STEP` line
/// with both channels filled to [`MAX_DISCHARGE_STEPS`] lexes to the
/// keyword, the step duration, and per channel one marker plus
/// `2 * MAX_DISCHARGE_STEPS - 1` values and commas, 402 tokens in all.
pub const MAX_TOKENS: usize = 4 * MAX_DISCHARGE_STEPS + 16;

/// Lexical token kinds recognized by the console grammar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// Keyword or channel-section marker.
    Ident,
    /// Unsigned integer or decimal literal.
    Number,
    /// Separator inside duty lists.
    Comma,
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

/// Lexer errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    /// Input produced more tokens than the static buffer allows.
    TooManyTokens,
    /// A character outside the grammar's alphabet.
    UnsupportedCharacter { position: usize },
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens => write!(f, "token buffer exhausted"),
            LexError::UnsupportedCharacter { position } => {
                write!(f, "unsupported character at column {position}")
            }
        }
    }
}

/// Grammar errors emitted by the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarError {
    UnexpectedToken {
        expected: &'static str,
        found: TokenKind,
        span: Range<usize>,
    },
    UnexpectedEnd {
        expected: &'static str,
    },
    TrailingInput {
        span: Range<usize>,
    },
    InvalidInteger {
        span: Range<usize>,
    },
    InvalidNumber {
        span: Range<usize>,
    },
    /// Switch arguments accept exactly `0` or `1`.
    InvalidSwitch {
        span: Range<usize>,
    },
    UnknownCommand {
        span: Range<usize>,
    },
}

impl fmt::Display for GrammarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarError::UnexpectedToken {
                expected,
                found,
                span,
            } => write!(f, "expected {expected}, found {found:?} at {span:?}"),
            GrammarError::UnexpectedEnd { expected } => {
                write!(f, "unexpected end of input, expected {expected}")
            }
            GrammarError::TrailingInput { span } => {
                write!(f, "unexpected trailing input at {span:?}")
            }
            GrammarError::InvalidInteger { span } => {
                write!(f, "invalid integer literal at {span:?}")
            }
            GrammarError::InvalidNumber { span } => {
                write!(f, "invalid number literal at {span:?}")
            }
            GrammarError::InvalidSwitch { span } => {
                write!(f, "expected 0 or 1 at {span:?}")
            }
            GrammarError::UnknownCommand { span } => {
                write!(f, "unrecognized command at {span:?}")
            }
        }
    }
}

/// Combined lex/parse error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    Lex(LexError),
    Grammar(GrammarError),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Grammar(err) => err.fmt(f),
        }
    }
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        ParseError::Lex(err)
    }
}

impl From<GrammarError> for ParseError {
    fn from(err: GrammarError) -> Self {
        ParseError::Grammar(err)
    }
}

/// Duty lists carried inside a parsed `DC_STEP` command.
pub type DutyList = HeaplessVec<f32, MAX_DISCHARGE_STEPS>;

/// Structured commands produced by the parser.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// `FREQ <hz> <duty_a> [<duty_b>]`; the two-argument form drives both
    /// pairs with the same duty.
    Frequency {
        frequency_hz: f64,
        duty_pair_a: f32,
        duty_pair_b: f32,
    },
    /// `TC_ON 0|1` toggles periodic temperature printing.
    TcAutoPrint(bool),
    /// `TC_CSV` dumps the rolling thermal log.
    TcCsv,
    /// `TC_NOW` prints the latest temperatures.
    TcNow,
    /// `SEQ_DEBUG 0|1` enables manual override of the sequencer trigger.
    SequencerDebug(bool),
    /// `SEQ_TRIGGER 0|1` drives the sequencer trigger while in debug mode.
    SequencerTrigger(bool),
    /// `SEQ_TRIGGER_STATUS` reports the sequencer trigger resolution.
    SequencerTriggerStatus,
    /// `RELAY 0|1` drives the output relay.
    Relay(bool),
    /// `DC_STEP <ms> [CH1 <d>...] [CH2 <d>...]` programs a whole sequence
    /// on one line.
    DischargeStep {
        step_ms: u32,
        channel_1: DutyList,
        channel_2: DutyList,
    },
    /// `DC_CSV <ms>` enters streaming sequence input.
    DischargeCsvBegin { step_ms: u32 },
    /// `DC_CSV_END` leaves streaming input and commits the sequence.
    DischargeCsvEnd,
    /// `DC_DEBUG 0|1` enables manual override of the discharge trigger.
    DischargeDebug(bool),
    /// `DC_TRIGGER 0|1` drives the discharge trigger while in debug mode.
    DischargeTrigger(bool),
    /// `DC_TRIGGER_STATUS` reports the discharge trigger resolution.
    DischargeTriggerStatus,
    /// `DC_VERBOSE 0|1` toggles per-step reporting.
    DischargeVerbose(bool),
    /// `DC_INVERT 0|1` toggles output inversion.
    DischargeInvert(bool),
    /// `DC_STATUS` summarizes the discharge configuration.
    DischargeStatus,
    Status,
    Help,
}

fn ident<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

fn number<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    alt((
        (
            take_while(1.., |c: char| c.is_ascii_digit()),
            opt(('.', take_while(0.., |c: char| c.is_ascii_digit()))),
        )
            .take(),
        ('.', take_while(1.., |c: char| c.is_ascii_digit())).take(),
    ))
    .parse_next(input)
}

/// Tokenize the provided line. Line terminators and inline whitespace are
/// skipped; anything else outside the alphabet is an error.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let mut rest = line.trim_end_matches(['\r', '\n']);
    let mut buffer = TokenBuffer::new();

    loop {
        rest = rest.trim_start_matches([' ', '\t']);
        if rest.is_empty() {
            break;
        }
        let start = line.len() - rest.len();

        let (kind, lexeme) = if let Ok(Some(lexeme)) = opt(number).parse_next(&mut rest) {
            (TokenKind::Number, lexeme)
        } else if let Ok(Some(lexeme)) = opt(ident).parse_next(&mut rest) {
            (TokenKind::Ident, lexeme)
        } else if let Some(stripped) = rest.strip_prefix(',') {
            let lexeme = &rest[..1];
            rest = stripped;
            (TokenKind::Comma, lexeme)
        } else {
            return Err(LexError::UnsupportedCharacter { position: start });
        };

        buffer
            .push(Token {
                kind,
                lexeme,
                span: start..start + lexeme.len(),
            })
            .map_err(|_| LexError::TooManyTokens)?;
    }

    Ok(buffer)
}

/// Parse a console command from the provided line.
pub fn parse(line: &str) -> Result<Command, ParseError> {
    let tokens = lex(line)?;
    let mut cursor = Cursor::new(tokens.as_slice());
    let command = cursor.command()?;
    cursor.expect_end()?;
    Ok(command)
}

/// Parse one streaming-mode data line: `ch1_duty[,ch2_duty]`.
pub fn parse_duty_pair(line: &str) -> Result<(f32, Option<f32>), ParseError> {
    let tokens = lex(line)?;
    let mut cursor = Cursor::new(tokens.as_slice());

    let first = cursor.float("duty cycle")?;
    let second = if cursor.take_comma() {
        Some(cursor.float("duty cycle")?)
    } else {
        None
    };
    cursor.expect_end()?;
    Ok((first, second))
}

struct Cursor<'src, 'slice> {
    tokens: &'slice [Token<'src>],
}

impl<'src, 'slice> Cursor<'src, 'slice> {
    fn new(tokens: &'slice [Token<'src>]) -> Self {
        Self { tokens }
    }

    fn peek(&self) -> Option<&Token<'src>> {
        self.tokens.first()
    }

    fn advance(&mut self) -> Option<&'slice Token<'src>> {
        let tokens = self.tokens;
        let (head, rest) = tokens.split_first()?;
        self.tokens = rest;
        Some(head)
    }

    fn expect_end(&self) -> Result<(), GrammarError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(GrammarError::TrailingInput {
                span: token.span.clone(),
            }),
        }
    }

    fn expect_kind(
        &mut self,
        kind: TokenKind,
        expected: &'static str,
    ) -> Result<&'slice Token<'src>, GrammarError> {
        let tokens = self.tokens;
        match tokens.split_first() {
            Some((head, rest)) if head.kind == kind => {
                self.tokens = rest;
                Ok(head)
            }
            Some((head, _)) => Err(GrammarError::UnexpectedToken {
                expected,
                found: head.kind,
                span: head.span.clone(),
            }),
            None => Err(GrammarError::UnexpectedEnd { expected }),
        }
    }

    fn integer(&mut self, expected: &'static str) -> Result<u32, GrammarError> {
        let token = self.expect_kind(TokenKind::Number, expected)?;
        token
            .lexeme
            .parse()
            .map_err(|_| GrammarError::InvalidInteger {
                span: token.span.clone(),
            })
    }

    fn float(&mut self, expected: &'static str) -> Result<f32, GrammarError> {
        let token = self.expect_kind(TokenKind::Number, expected)?;
        token
            .lexeme
            .parse()
            .map_err(|_| GrammarError::InvalidNumber {
                span: token.span.clone(),
            })
    }

    fn switch(&mut self) -> Result<bool, GrammarError> {
        let token = self.expect_kind(TokenKind::Number, "0 or 1")?;
        match token.lexeme {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(GrammarError::InvalidSwitch {
                span: token.span.clone(),
            }),
        }
    }

    fn take_comma(&mut self) -> bool {
        match self.peek() {
            Some(token) if token.kind == TokenKind::Comma => {
                self.advance();
                true
            }
            _ => false,
        }
    }

    fn command(&mut self) -> Result<Command, GrammarError> {
        let keyword = self.expect_kind(TokenKind::Ident, "command keyword")?;

        if keyword.lexeme.eq_ignore_ascii_case("FREQ")
            || keyword.lexeme.eq_ignore_ascii_case("FREQUENCY")
        {
            return self.frequency();
        }
        if keyword.lexeme.eq_ignore_ascii_case("TC_ON") {
            return Ok(Command::TcAutoPrint(self.switch()?));
        }
        if keyword.lexeme.eq_ignore_ascii_case("TC_CSV") {
            return Ok(Command::TcCsv);
        }
        if keyword.lexeme.eq_ignore_ascii_case("TC_NOW") {
            return Ok(Command::TcNow);
        }
        if keyword.lexeme.eq_ignore_ascii_case("SEQ_DEBUG") {
            return Ok(Command::SequencerDebug(self.switch()?));
        }
        if keyword.lexeme.eq_ignore_ascii_case("SEQ_TRIGGER") {
            return Ok(Command::SequencerTrigger(self.switch()?));
        }
        if keyword.lexeme.eq_ignore_ascii_case("SEQ_TRIGGER_STATUS") {
            return Ok(Command::SequencerTriggerStatus);
        }
        if keyword.lexeme.eq_ignore_ascii_case("RELAY") {
            return Ok(Command::Relay(self.switch()?));
        }
        if keyword.lexeme.eq_ignore_ascii_case("DC_STEP") {
            return self.discharge_step();
        }
        if keyword.lexeme.eq_ignore_ascii_case("DC_CSV") {
            let step_ms = self.integer("step duration in ms")?;
            return Ok(Command::DischargeCsvBegin { step_ms });
        }
        if keyword.lexeme.eq_ignore_ascii_case("DC_CSV_END") {
            return Ok(Command::DischargeCsvEnd);
        }
        if keyword.lexeme.eq_ignore_ascii_case("DC_DEBUG") {
            return Ok(Command::DischargeDebug(self.switch()?));
        }
        if keyword.lexeme.eq_ignore_ascii_case("DC_TRIGGER") {
            return Ok(Command::DischargeTrigger(self.switch()?));
        }
        if keyword.lexeme.eq_ignore_ascii_case("DC_TRIGGER_STATUS") {
            return Ok(Command::DischargeTriggerStatus);
        }
        if keyword.lexeme.eq_ignore_ascii_case("DC_VERBOSE") {
            return Ok(Command::DischargeVerbose(self.switch()?));
        }
        if keyword.lexeme.eq_ignore_ascii_case("DC_INVERT") {
            return Ok(Command::DischargeInvert(self.switch()?));
        }
        if keyword.lexeme.eq_ignore_ascii_case("DC_STATUS") {
            return Ok(Command::DischargeStatus);
        }
        if keyword.lexeme.eq_ignore_ascii_case("STATUS") {
            return Ok(Command::Status);
        }
        if keyword.lexeme.eq_ignore_ascii_case("HELP") || keyword.lexeme.eq_ignore_ascii_case("DC_HELP") {
            return Ok(Command::Help);
        }

        Err(GrammarError::UnknownCommand {
            span: keyword.span.clone(),
        })
    }

    fn frequency(&mut self) -> Result<Command, GrammarError> {
        let token = self.expect_kind(TokenKind::Number, "frequency in Hz")?;
        let frequency_hz: f64 =
            token
                .lexeme
                .parse()
                .map_err(|_| GrammarError::InvalidNumber {
                    span: token.span.clone(),
                })?;
        let duty_pair_a = self.float("duty cycle")?;
        // One duty drives both pairs; a second splits them.
        let duty_pair_b = match self.peek() {
            Some(token) if token.kind == TokenKind::Number => self.float("duty cycle")?,
            _ => duty_pair_a,
        };
        Ok(Command::Frequency {
            frequency_hz,
            duty_pair_a,
            duty_pair_b,
        })
    }

    fn discharge_step(&mut self) -> Result<Command, GrammarError> {
        let step_ms = self.integer("step duration in ms")?;
        let mut channel_1 = DutyList::new();
        let mut channel_2 = DutyList::new();

        while let Some(token) = self.peek() {
            let span = token.span.clone();
            let section = self.expect_kind(TokenKind::Ident, "CH1 or CH2")?;
            let target = if section.lexeme.eq_ignore_ascii_case("CH1") {
                &mut channel_1
            } else if section.lexeme.eq_ignore_ascii_case("CH2") {
                &mut channel_2
            } else {
                return Err(GrammarError::UnexpectedToken {
                    expected: "CH1 or CH2",
                    found: TokenKind::Ident,
                    span,
                });
            };
            self.duty_list(target)?;
        }

        Ok(Command::DischargeStep {
            step_ms,
            channel_1,
            channel_2,
        })
    }

    /// Collects numbers (with optional comma separators) until the next
    /// section marker or end of line. Entries past capacity drop silently,
    /// matching the bounded sequence length.
    fn duty_list(&mut self, target: &mut DutyList) -> Result<(), GrammarError> {
        loop {
            match self.peek() {
                Some(token) if token.kind == TokenKind::Number => {
                    let duty = self.float("duty cycle")?;
                    let _ = target.push(duty);
                    self.take_comma();
                }
                _ => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_mixed_tokens_with_spans() {
        let tokens = lex("DC_STEP 100 CH1 0.5,0.7\n").expect("lexes");
        let kinds: HeaplessVec<TokenKind, 8> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds.as_slice(),
            &[
                TokenKind::Ident,
                TokenKind::Number,
                TokenKind::Ident,
                TokenKind::Number,
                TokenKind::Comma,
                TokenKind::Number,
            ]
        );
        assert_eq!(tokens[0].lexeme, "DC_STEP");
        assert_eq!(tokens[0].span, 0..7);
        assert_eq!(tokens[3].lexeme, "0.5");
        assert_eq!(tokens[3].span, 16..19);
    }

    #[test]
    fn rejects_characters_outside_the_alphabet() {
        assert_eq!(
            lex("FREQ 100000 0.5; reboot"),
            Err(LexError::UnsupportedCharacter { position: 15 })
        );
    }

    #[test]
    fn frequency_three_argument_form() {
        let command = parse("FREQ 100000 0.5 0.3").expect("parses");
        assert_eq!(
            command,
            Command::Frequency {
                frequency_hz: 100_000.0,
                duty_pair_a: 0.5,
                duty_pair_b: 0.3,
            }
        );
    }

    #[test]
    fn frequency_two_argument_form_duplicates_the_duty() {
        let command = parse("frequency 50000 0.4").expect("parses");
        assert_eq!(
            command,
            Command::Frequency {
                frequency_hz: 50_000.0,
                duty_pair_a: 0.4,
                duty_pair_b: 0.4,
            }
        );
    }

    #[test]
    fn frequency_missing_duty_is_an_error() {
        assert!(matches!(
            parse("FREQ 100000"),
            Err(ParseError::Grammar(GrammarError::UnexpectedEnd { .. }))
        ));
    }

    #[test]
    fn discharge_step_with_both_sections() {
        let command = parse("DC_STEP 100 CH1 0.5 0.7 0.3 CH2 0.2,0.9,0.1").expect("parses");
        match command {
            Command::DischargeStep {
                step_ms,
                channel_1,
                channel_2,
            } => {
                assert_eq!(step_ms, 100);
                assert_eq!(channel_1.as_slice(), &[0.5, 0.7, 0.3]);
                assert_eq!(channel_2.as_slice(), &[0.2, 0.9, 0.1]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn discharge_step_sections_are_optional() {
        let command = parse("DC_STEP 50 CH2 1.0").expect("parses");
        match command {
            Command::DischargeStep {
                channel_1,
                channel_2,
                ..
            } => {
                assert!(channel_1.is_empty());
                assert_eq!(channel_2.as_slice(), &[1.0]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn discharge_step_rejects_unknown_section() {
        assert!(matches!(
            parse("DC_STEP 50 CH3 0.5"),
            Err(ParseError::Grammar(GrammarError::UnexpectedToken { .. }))
        ));
    }

    #[test]
    fn switch_arguments_accept_only_zero_and_one() {
        assert_eq!(parse("DC_DEBUG 1"), Ok(Command::DischargeDebug(true)));
        assert_eq!(parse("RELAY 0"), Ok(Command::Relay(false)));
        assert!(matches!(
            parse("DC_DEBUG 2"),
            Err(ParseError::Grammar(GrammarError::InvalidSwitch { .. }))
        ));
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(parse("tc_csv"), Ok(Command::TcCsv));
        assert_eq!(parse("Dc_Csv_End"), Ok(Command::DischargeCsvEnd));
    }

    #[test]
    fn unknown_keyword_reports_its_span() {
        assert_eq!(
            parse("SPIN 1"),
            Err(ParseError::Grammar(GrammarError::UnknownCommand {
                span: 0..4
            }))
        );
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        assert!(matches!(
            parse("TC_CSV now"),
            Err(ParseError::Grammar(GrammarError::TrailingInput { .. }))
        ));
    }

    #[test]
    fn duty_pair_parses_one_or_two_values() {
        assert_eq!(parse_duty_pair("0.5,0.7"), Ok((0.5, Some(0.7))));
        assert_eq!(parse_duty_pair("0.5"), Ok((0.5, None)));
        assert!(parse_duty_pair("x,y").is_err());
        assert!(parse_duty_pair("0.5,0.7,0.9").is_err());
    }
}
