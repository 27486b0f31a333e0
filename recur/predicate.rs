// This file is part of wavevault, a scheduled internet-radio recorder.
// Copyright (C) 2026 The wavevault contributors.

//! `Predicate` and its `next` operation.
//!
//! Each variant answers a query `(from, strict)`: the earliest instant
//! `t >= from` (or `t > from` if `strict`) satisfying the predicate. Leaves
//! check their own field and otherwise ceil to the next boundary of their
//! unit before advancing by the minimal positive delta; composites combine
//! their children as described on [`Predicate::AllOf`] and
//! [`Predicate::FirstOf`].

use std::fmt;

use base::{bail, Error};
use jiff::{Span, Zoned};

/// Monday-zero weekday index, matching the parser's `MON..SUN` ordering.
pub type WeekdayIndex = u8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Predicate {
    /// 1..=12, January is 1.
    Month(u8),
    /// 1..=31.
    DayOfMonth(u8),
    /// 0..=6, Monday is 0.
    DayOfWeek(WeekdayIndex),
    /// 0..=23.
    Hour(u8),
    /// 0..=59.
    Minute(u8),
    /// 0..=59.
    Second(u8),
    /// Sugar for `AllOf(Hour(h), Minute(m))`, kept as its own variant so it
    /// renders back as `H:M` rather than a parenthesized conjunction.
    HourMinute(u8, u8),
    /// The next instant satisfying every child, found by the fixed-point
    /// iteration described in the module's algorithm: seed `t` (from `from`
    /// directly, or the earliest strict child occurrence if `strict`), then
    /// repeatedly re-evaluate each child non-strictly against `t` until a
    /// pass leaves `t` unchanged.
    AllOf(Vec<Predicate>),
    /// The earliest instant satisfying any child: the minimum of each
    /// child's own `next`.
    FirstOf(Vec<Predicate>),
}

fn weekday_index(t: &Zoned) -> WeekdayIndex {
    use jiff::civil::Weekday::*;
    match t.weekday() {
        Monday => 0,
        Tuesday => 1,
        Wednesday => 2,
        Thursday => 3,
        Friday => 4,
        Saturday => 5,
        Sunday => 6,
    }
}

fn earlier(a: Zoned, b: Zoned) -> Zoned {
    if a.timestamp() <= b.timestamp() {
        a
    } else {
        b
    }
}

fn ceil_second(t: &Zoned, force_carry: bool) -> Zoned {
    if !force_carry && t.subsec_nanosecond() == 0 {
        return t.clone();
    }
    let truncated = t.with().subsec_nanosecond(0).build().expect("truncate subsec");
    truncated.checked_add(Span::new().seconds(1)).expect("add 1s")
}

fn ceil_minute(t: &Zoned, force_carry: bool) -> Zoned {
    if !force_carry && t.second() == 0 && t.subsec_nanosecond() == 0 {
        return t.clone();
    }
    let truncated =
        t.with().second(0).subsec_nanosecond(0).build().expect("truncate to minute");
    truncated.checked_add(Span::new().minutes(1)).expect("add 1m")
}

fn ceil_hour(t: &Zoned, force_carry: bool) -> Zoned {
    if !force_carry && t.minute() == 0 && t.second() == 0 && t.subsec_nanosecond() == 0 {
        return t.clone();
    }
    let truncated = t
        .with()
        .minute(0)
        .second(0)
        .subsec_nanosecond(0)
        .build()
        .expect("truncate to hour");
    truncated.checked_add(Span::new().hours(1)).expect("add 1h")
}

fn ceil_day(t: &Zoned, force_carry: bool) -> Zoned {
    if !force_carry
        && t.hour() == 0
        && t.minute() == 0
        && t.second() == 0
        && t.subsec_nanosecond() == 0
    {
        return t.clone();
    }
    let truncated = t
        .with()
        .hour(0)
        .minute(0)
        .second(0)
        .subsec_nanosecond(0)
        .build()
        .expect("truncate to day");
    truncated.checked_add(Span::new().days(1)).expect("add 1d")
}

fn ceil_month(t: &Zoned, force_carry: bool) -> Zoned {
    if !force_carry
        && t.day() == 1
        && t.hour() == 0
        && t.minute() == 0
        && t.second() == 0
        && t.subsec_nanosecond() == 0
    {
        return t.clone();
    }
    let truncated = t
        .with()
        .day(1)
        .hour(0)
        .minute(0)
        .second(0)
        .subsec_nanosecond(0)
        .build()
        .expect("truncate to month");
    truncated.checked_add(Span::new().months(1)).expect("add 1mo")
}

/// Runs the `AllOf` fixed-point iteration over `children`. Shared by
/// [`Predicate::AllOf`] and the [`Predicate::HourMinute`] sugar.
fn all_of_next(children: &[Predicate], from: &Zoned, strict: bool) -> Zoned {
    let mut t = if strict {
        children
            .iter()
            .map(|c| c.next(from, true))
            .reduce(earlier)
            .expect("AllOf/HourMinute always has >=1 child")
    } else {
        from.clone()
    };
    loop {
        let prev = t.clone();
        for c in children {
            t = c.next(&t, false);
        }
        if t == prev {
            break;
        }
    }
    t
}

fn first_of_next(children: &[Predicate], from: &Zoned, strict: bool) -> Zoned {
    children
        .iter()
        .map(|c| c.next(from, strict))
        .reduce(earlier)
        .expect("FirstOf always has >=1 child")
}

impl Predicate {
    pub fn month(m: u8) -> Result<Predicate, Error> {
        if !(1..=12).contains(&m) {
            bail!(OutOfRange, msg("month {m} out of range [1, 12]"));
        }
        Ok(Predicate::Month(m))
    }

    pub fn day_of_month(d: u8) -> Result<Predicate, Error> {
        if !(1..=31).contains(&d) {
            bail!(OutOfRange, msg("day of month {d} out of range [1, 31]"));
        }
        Ok(Predicate::DayOfMonth(d))
    }

    pub fn hour(h: u8) -> Result<Predicate, Error> {
        if h >= 24 {
            bail!(OutOfRange, msg("hour {h} out of range [0, 24)"));
        }
        Ok(Predicate::Hour(h))
    }

    pub fn minute(m: u8) -> Result<Predicate, Error> {
        if m >= 60 {
            bail!(OutOfRange, msg("minute {m} out of range [0, 60)"));
        }
        Ok(Predicate::Minute(m))
    }

    pub fn second(s: u8) -> Result<Predicate, Error> {
        if s >= 60 {
            bail!(OutOfRange, msg("second {s} out of range [0, 60)"));
        }
        Ok(Predicate::Second(s))
    }

    pub fn hour_minute(h: u8, m: u8) -> Result<Predicate, Error> {
        if h >= 24 {
            bail!(OutOfRange, msg("hour {h} out of range [0, 24)"));
        }
        if m >= 60 {
            bail!(OutOfRange, msg("minute {m} out of range [0, 60)"));
        }
        Ok(Predicate::HourMinute(h, m))
    }

    pub fn all_of(children: Vec<Predicate>) -> Result<Predicate, Error> {
        if children.is_empty() {
            bail!(InvalidArgument, msg("AllOf requires at least one child"));
        }
        Ok(Predicate::AllOf(children))
    }

    pub fn first_of(children: Vec<Predicate>) -> Result<Predicate, Error> {
        if children.is_empty() {
            bail!(InvalidArgument, msg("FirstOf requires at least one child"));
        }
        Ok(Predicate::FirstOf(children))
    }

    /// Returns the earliest instant `t >= from` (or `t > from` if `strict`)
    /// satisfying this predicate.
    pub fn next(&self, from: &Zoned, strict: bool) -> Zoned {
        match self {
            Predicate::Month(m) => {
                if !strict && from.month() as u8 == *m {
                    return from.clone();
                }
                let t = ceil_month(from, strict);
                let mut diff = *m as i64 - t.month() as i64;
                if diff < 0 {
                    diff += 12;
                }
                t.checked_add(Span::new().months(diff)).expect("month advance in range")
            }
            Predicate::DayOfMonth(d) => {
                if !strict && from.day() as u8 == *d {
                    return from.clone();
                }
                let mut t = ceil_day(from, strict);
                let mut diff = *d as i64 - t.day() as i64;
                if diff < 0 {
                    t = ceil_month(from, true);
                    diff = *d as i64 - 1;
                }
                t.checked_add(Span::new().days(diff)).expect("day-of-month advance in range")
            }
            Predicate::DayOfWeek(w) => {
                if !strict && weekday_index(from) == *w {
                    return from.clone();
                }
                let t = ceil_day(from, strict);
                let mut diff = *w as i64 - weekday_index(&t) as i64;
                if diff < 0 {
                    diff += 7;
                }
                t.checked_add(Span::new().days(diff)).expect("day-of-week advance in range")
            }
            Predicate::Hour(h) => {
                if !strict && from.hour() as u8 == *h {
                    return from.clone();
                }
                let t = ceil_hour(from, strict);
                let mut diff = *h as i64 - t.hour() as i64;
                if diff < 0 {
                    diff += 24;
                }
                t.checked_add(Span::new().hours(diff)).expect("hour advance in range")
            }
            Predicate::Minute(m) => {
                if !strict && from.minute() as u8 == *m {
                    return from.clone();
                }
                let t = ceil_minute(from, strict);
                let mut diff = *m as i64 - t.minute() as i64;
                if diff < 0 {
                    diff += 60;
                }
                t.checked_add(Span::new().minutes(diff)).expect("minute advance in range")
            }
            Predicate::Second(s) => {
                if !strict && from.second() as u8 == *s {
                    return from.clone();
                }
                let t = ceil_second(from, strict);
                let mut diff = *s as i64 - t.second() as i64;
                if diff < 0 {
                    diff += 60;
                }
                t.checked_add(Span::new().seconds(diff)).expect("second advance in range")
            }
            Predicate::HourMinute(h, m) => {
                let children = [Predicate::Hour(*h), Predicate::Minute(*m)];
                all_of_next(&children, from, strict)
            }
            Predicate::AllOf(children) => all_of_next(children, from, strict),
            Predicate::FirstOf(children) => first_of_next(children, from, strict),
        }
    }
}

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const DOW_NAMES: [&str; 7] = ["MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Month(m) => f.write_str(MONTH_NAMES[usize::from(*m - 1)]),
            Predicate::DayOfMonth(d) => write!(f, "{d}D"),
            Predicate::DayOfWeek(w) => f.write_str(DOW_NAMES[usize::from(*w)]),
            Predicate::Hour(h) => write!(f, "{h}H"),
            Predicate::Minute(m) => write!(f, "{m}M"),
            Predicate::Second(s) => write!(f, "{s}S"),
            Predicate::HourMinute(h, m) => write!(f, "{h}:{m}"),
            Predicate::AllOf(children) => {
                f.write_str("(")?;
                for (i, c) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" & ")?;
                    }
                    write!(f, "{c}")?;
                }
                f.write_str(")")
            }
            Predicate::FirstOf(children) => {
                f.write_str("[")?;
                for (i, c) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{c}")?;
                }
                f.write_str("]")
            }
        }
    }
}
