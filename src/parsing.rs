//! Utilities for parsing chemical formulas such as `O24Ru4Sr8Y4` or `Sr2 Fe1 Mo1 O6`.

use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use nom::character::complete::{digit1, multispace0, satisfy};
use nom::combinator::{all_consuming, map_res, opt, recognize};
use nom::error::ParseError;
use nom::multi::{many0_count, many1};
use nom::sequence::{delimited, pair};
use nom::IResult;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Cannot parse formula: {0:?}")]
pub struct FormulaError(pub String);

/// Parses an element symbol: one uppercase letter followed by any lowercase letters.
pub fn element_symbol(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_uppercase()),
        many0_count(satisfy(|c| c.is_ascii_lowercase())),
    ))(input)
}

/// Parses an element count, which defaults to 1 when omitted.
pub fn element_count(input: &str) -> IResult<&str, u32> {
    let (o, count) = opt(map_res(digit1, u32::from_str))(input)?;
    Ok((o, count.unwrap_or(1)))
}

/// Parses a single `<symbol><count>` term.
pub fn formula_term(input: &str) -> IResult<&str, (&str, u32)> {
    ws(pair(element_symbol, element_count))(input)
}

/// Parses a complete formula. The same element may appear more than once.
pub fn formula_terms(input: &str) -> IResult<&str, Vec<(&str, u32)>> {
    all_consuming(many1(formula_term))(input)
}

fn ws<'a, F: 'a, O, E: ParseError<&'a str>>(
    inner: F,
) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

/// A parsed chemical formula. Keeps the text it was parsed from, since rows are grouped by the
/// literal formula string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Formula {
    text: String,
    counts: BTreeMap<String, u32>,
}

impl Formula {
    /// The formula as written.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Element symbols in alphabetical order.
    pub fn elements(&self) -> impl Iterator<Item = &str> + '_ {
        self.counts.keys().map(String::as_str)
    }

    /// Number of atoms of an element, 0 if absent.
    pub fn count(&self, element: &str) -> u32 {
        self.counts.get(element).copied().unwrap_or(0)
    }

    /// Total number of atoms.
    pub fn num_atoms(&self) -> u32 {
        self.counts.values().sum()
    }
}

impl FromStr for Formula {
    type Err = FormulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (_, terms) = formula_terms(s).map_err(|_e| FormulaError(s.to_owned()))?;
        let mut counts = BTreeMap::new();
        for (sym, n) in terms {
            *counts.entry(sym.to_owned()).or_insert(0) += n;
        }
        Ok(Self {
            text: s.to_owned(),
            counts,
        })
    }
}

impl Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}
