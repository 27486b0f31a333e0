// This file is part of wavevault, a scheduled internet-radio recorder.
// Copyright (C) 2026 The wavevault contributors.

//! Parser for the recurrence DSL.
//!
//! ```text
//! cond      := month | dow | hour | minute | second | hmtime | allof | firstof
//! month     := "JAN" | "FEB" | ... | "DEC"
//! dow       := "MON" | "TUE" | "WED" | "THU" | "FRI" | "SAT" | "SUN"
//! hour      := int "H"
//! minute    := int "M"
//! second    := int "S"
//! hmtime    := int ":" int               ; shorthand for (hour & minute)
//! allof     := "(" cond ("&" cond)+ ")"  ; one operand also allowed -> AllOf of 1
//! firstof   := "[" cond ("|" cond)+ "]"  ; one operand also allowed
//! ```
//!
//! Whitespace is permitted around `&`, `|`, and inside bracket groups.

use base::{bail, Error};
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{digit1, multispace0},
    combinator::{all_consuming, map, map_res, value},
    multi::separated_list1,
    sequence::{delimited, preceded, separated_pair, terminated},
    IResult,
};

use crate::predicate::Predicate;

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn uint(input: &str) -> IResult<&str, u8> {
    map_res(digit1, str::parse)(input)
}

fn month(input: &str) -> IResult<&str, Predicate> {
    alt((
        value(1u8, tag("JAN")),
        value(2u8, tag("FEB")),
        value(3u8, tag("MAR")),
        value(4u8, tag("APR")),
        value(5u8, tag("MAY")),
        value(6u8, tag("JUN")),
        value(7u8, tag("JUL")),
        value(8u8, tag("AUG")),
        value(9u8, tag("SEP")),
        value(10u8, tag("OCT")),
        value(11u8, tag("NOV")),
        value(12u8, tag("DEC")),
    ))(input)
    .map(|(rest, m)| (rest, Predicate::Month(m)))
}

fn dow(input: &str) -> IResult<&str, Predicate> {
    alt((
        value(0u8, tag("MON")),
        value(1u8, tag("TUE")),
        value(2u8, tag("WED")),
        value(3u8, tag("THU")),
        value(4u8, tag("FRI")),
        value(5u8, tag("SAT")),
        value(6u8, tag("SUN")),
    ))(input)
    .map(|(rest, w)| (rest, Predicate::DayOfWeek(w)))
}

fn hour(input: &str) -> IResult<&str, Predicate> {
    map(terminated(uint, tag("H")), Predicate::Hour)(input)
}

fn minute(input: &str) -> IResult<&str, Predicate> {
    map(terminated(uint, tag("M")), Predicate::Minute)(input)
}

fn second(input: &str) -> IResult<&str, Predicate> {
    map(terminated(uint, tag("S")), Predicate::Second)(input)
}

fn hmtime(input: &str) -> IResult<&str, Predicate> {
    map(separated_pair(uint, tag(":"), uint), |(h, m)| Predicate::HourMinute(h, m))(input)
}

fn allof(input: &str) -> IResult<&str, Predicate> {
    map(
        delimited(
            preceded(tag("("), multispace0),
            separated_list1(ws(tag("&")), cond),
            preceded(multispace0, tag(")")),
        ),
        Predicate::AllOf,
    )(input)
}

fn firstof(input: &str) -> IResult<&str, Predicate> {
    map(
        delimited(
            preceded(tag("["), multispace0),
            separated_list1(ws(tag("|")), cond),
            preceded(multispace0, tag("]")),
        ),
        Predicate::FirstOf,
    )(input)
}

/// `hmtime` must be tried before `hour`/`minute`/`second`, since `5:30` would
/// otherwise never get a chance once a leading int starts matching as part
/// of some other alternative; all share no common prefix with `month`/`dow`,
/// which are tried first since they have no digits at all.
fn cond(input: &str) -> IResult<&str, Predicate> {
    alt((month, dow, hmtime, hour, minute, second, allof, firstof))(input)
}

/// Parses a recurrence expression, requiring the entire input (after
/// trimming surrounding whitespace) to be consumed.
///
/// On failure, the returned error's message names the unparsed remainder
/// (or the nom diagnostic, if parsing failed before consuming anything).
pub fn parse(input: &str) -> Result<Predicate, Error> {
    match all_consuming(ws(cond))(input) {
        Ok((_, p)) => Ok(p),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            bail!(
                InvalidArgument,
                msg("failed to parse recurrence {input:?} at {:?}", e.input)
            );
        }
        Err(nom::Err::Incomplete(_)) => {
            bail!(InvalidArgument, msg("incomplete recurrence {input:?}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::Zoned;

    #[test]
    fn parses_month_and_dow() {
        assert_eq!(parse("JAN").unwrap(), Predicate::Month(1));
        assert_eq!(parse("WED").unwrap(), Predicate::DayOfWeek(2));
    }

    #[test]
    fn parses_numeric_leaves() {
        assert_eq!(parse("8H").unwrap(), Predicate::Hour(8));
        assert_eq!(parse("37M").unwrap(), Predicate::Minute(37));
        assert_eq!(parse("13S").unwrap(), Predicate::Second(13));
        assert_eq!(parse("16:30").unwrap(), Predicate::HourMinute(16, 30));
    }

    #[test]
    fn parses_allof_and_firstof() {
        assert_eq!(
            parse("(8H & 37M)").unwrap(),
            Predicate::AllOf(vec![Predicate::Hour(8), Predicate::Minute(37)])
        );
        assert_eq!(
            parse("[JAN | FEB | MAR]").unwrap(),
            Predicate::FirstOf(vec![
                Predicate::Month(1),
                Predicate::Month(2),
                Predicate::Month(3)
            ])
        );
    }

    #[test]
    fn allows_single_operand_composites() {
        assert_eq!(parse("(8H)").unwrap(), Predicate::AllOf(vec![Predicate::Hour(8)]));
        assert_eq!(parse("[8H]").unwrap(), Predicate::FirstOf(vec![Predicate::Hour(8)]));
    }

    #[test]
    fn tolerates_whitespace() {
        assert_eq!(
            parse(" ( 8H  &  37M ) ").unwrap(),
            Predicate::AllOf(vec![Predicate::Hour(8), Predicate::Minute(37)])
        );
        assert_eq!(
            parse("[ JAN|FEB ]").unwrap(),
            Predicate::FirstOf(vec![Predicate::Month(1), Predicate::Month(2)])
        );
    }

    #[test]
    fn parses_nested_scenario_3() {
        let p = parse("(WED & 13S & [(MAR & 12M) | JAN | (FRI & 17H)])").unwrap();
        assert_eq!(
            p,
            Predicate::AllOf(vec![
                Predicate::DayOfWeek(2),
                Predicate::Second(13),
                Predicate::FirstOf(vec![
                    Predicate::AllOf(vec![Predicate::Month(3), Predicate::Minute(12)]),
                    Predicate::Month(1),
                    Predicate::AllOf(vec![Predicate::DayOfWeek(4), Predicate::Hour(17)]),
                ]),
            ])
        );
    }

    #[test]
    fn rejects_trailing_garbage() {
        let err = parse("8H extra").unwrap_err();
        assert_eq!(err.kind(), base::ErrorKind::InvalidArgument);
    }

    #[test]
    fn rejects_empty_input() {
        parse("").unwrap_err();
    }

    #[test]
    fn scenario_7_whitespace_tolerance_matches_scenario_6() {
        let spaced = parse("(WED & [ 13H | 4H ] & 5M    )").unwrap();
        let unspaced = parse("(WED & [13H|4H] & 5M)").unwrap();
        assert_eq!(spaced, unspaced);

        let from: Zoned = "2016-08-31T04:00:00[UTC]".parse().unwrap();
        let expected: Zoned = "2016-08-31T04:05:00[UTC]".parse().unwrap();
        assert_eq!(spaced.next(&from, true), expected);
    }

    #[test]
    fn round_trips_through_display() {
        let p = parse("(WED & 13S & [(MAR & 12M) | JAN | (FRI & 17H)])").unwrap();
        let rendered = p.to_string();
        let reparsed = parse(&rendered).unwrap();
        assert_eq!(p, reparsed);
    }
}
