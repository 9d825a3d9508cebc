//! Line-oriented parsers for manager protocol frames.
//!
//! ABNF (informal):
//! field-line = key ":" [SP] value CRLF
//! frame      = 1*field-line CRLF

use nom::{
    bytes::complete::{take_till, take_till1},
    character::complete::{char, line_ending, space0},
    combinator::opt,
    multi::many1,
    sequence::terminated,
    IResult,
};

/// Parse a single `Key: Value` line. The line terminator is optional so the
/// parser can also run on lines already split off the stream.
pub fn field_line(input: &str) -> IResult<&str, (String, String)> {
    let (input, key) = take_till1(|c| c == ':' || c == '\r' || c == '\n')(input)?;
    let (input, _) = char(':')(input)?;
    let (input, _) = space0(input)?;
    let (input, value) = take_till(|c| c == '\r' || c == '\n')(input)?;
    let (input, _) = opt(line_ending)(input)?;

    Ok((input, (key.trim_end().to_string(), value.to_string())))
}

/// Parse a full frame: one or more field lines terminated by a blank line.
pub fn frame(input: &str) -> IResult<&str, Vec<(String, String)>> {
    terminated(many1(field_line), opt(line_ending))(input)
}
