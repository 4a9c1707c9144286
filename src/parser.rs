//! Reads reviews from the text dump format
//!
//! ```text
//! product/productId: B001E4KFG0
//! review/userId: A3SGXH7AUHU8GW
//! review/helpfulness: 1/1
//! review/score: 5.0
//! review/text: I have bought several of the Vitality canned dog food...
//! ```
//!
//! A record starts with each `product/productId` line. Lines that do not
//! start a field continue the previous one.

use std::io::{BufRead, Lines};

use log::trace;

use crate::{
    error::{IndexError, Result},
    reviews::MAX_SCORE,
};

const PRODUCT_FIELD: &str = "product/productId";

/// A review, as consumed by the index writer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReviewRecord {
    pub product_id: String,
    pub score: u8,
    pub helpfulness_numerator: u32,
    pub helpfulness_denominator: u32,
    /// Normalized tokens of the review text
    pub tokens: Vec<String>,
}

impl ReviewRecord {
    /// Builds a record by tokenizing a text
    pub fn from_text(
        product_id: &str,
        score: u8,
        helpfulness: (u32, u32),
        text: &str,
    ) -> Self {
        Self {
            product_id: product_id.to_string(),
            score: score,
            helpfulness_numerator: helpfulness.0,
            helpfulness_denominator: helpfulness.1,
            tokens: tokenize(text),
        }
    }
}

/// Splits a text on non-alphanumeric (ASCII) characters and lower-cases
/// the tokens
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
        .collect()
}

/// Field values of the record being read
#[derive(Default)]
struct RawRecord {
    line: usize,
    product_id: Option<String>,
    score: Option<String>,
    helpfulness: Option<String>,
    text: String,
}

impl RawRecord {
    fn invalid(&self, message: &str) -> IndexError {
        IndexError::InvalidInput(format!("review at line {}: {}", self.line, message))
    }

    fn parse_score(&self) -> Result<u8> {
        let Some(score) = &self.score else {
            return Err(self.invalid("missing score"));
        };
        let value: f32 = score
            .trim()
            .parse()
            .map_err(|_| self.invalid(&format!("invalid score {:?}", score)))?;
        if value.fract() != 0. || value < 0. || value > MAX_SCORE as f32 {
            return Err(self.invalid(&format!("invalid score {:?}", score)));
        }
        Ok(value as u8)
    }

    fn parse_helpfulness(&self) -> Result<(u32, u32)> {
        let Some(helpfulness) = &self.helpfulness else {
            return Ok((0, 0));
        };
        let invalid = || self.invalid(&format!("invalid helpfulness {:?}", helpfulness));
        let (numerator, denominator) = helpfulness.trim().split_once('/').ok_or_else(invalid)?;
        Ok((
            numerator.trim().parse().map_err(|_| invalid())?,
            denominator.trim().parse().map_err(|_| invalid())?,
        ))
    }

    fn into_record(self) -> Result<ReviewRecord> {
        let score = self.parse_score()?;
        let helpfulness = self.parse_helpfulness()?;
        let Some(product_id) = &self.product_id else {
            return Err(self.invalid("missing product ID"));
        };
        Ok(ReviewRecord::from_text(
            product_id,
            score,
            helpfulness,
            &self.text,
        ))
    }

    /// Handles one line; returns false if the line is not a known field
    fn set_field(&mut self, line: &str) -> bool {
        let Some((name, value)) = line.split_once(':') else {
            return false;
        };
        let value = value.trim();
        match name.trim() {
            PRODUCT_FIELD => self.product_id = Some(value.to_string()),
            "review/score" => self.score = Some(value.to_string()),
            "review/helpfulness" => self.helpfulness = Some(value.to_string()),
            "review/text" => self.text = value.to_string(),
            name => return name.starts_with("review/") || name.starts_with("product/"),
        }
        true
    }
}

/// Iterates over the reviews of a text dump
pub struct ReviewReader<R: BufRead> {
    lines: Lines<R>,
    line: usize,
    /// Record being filled
    current: Option<RawRecord>,
    /// Whether continuation lines belong to the text
    in_text: bool,
}

impl<R: BufRead> ReviewReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
            current: None,
            in_text: false,
        }
    }
}

impl<R: BufRead> Iterator for ReviewReader<R> {
    type Item = Result<ReviewRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Some(Err(e.into())),
                None => return self.current.take().map(RawRecord::into_record),
            };
            self.line += 1;

            if line.trim_start().starts_with(PRODUCT_FIELD) {
                let mut record = RawRecord {
                    line: self.line,
                    ..Default::default()
                };
                record.set_field(&line);
                self.in_text = false;

                if let Some(previous) = self.current.replace(record) {
                    trace!("Read review ending at line {}", self.line - 1);
                    return Some(previous.into_record());
                }
                continue;
            }

            let Some(record) = self.current.as_mut() else {
                if line.trim().is_empty() {
                    continue;
                }
                return Some(Err(IndexError::InvalidInput(format!(
                    "line {} does not belong to a review",
                    self.line
                ))));
            };

            if record.set_field(&line) {
                self.in_text = line.trim_start().starts_with("review/text");
            } else if self.in_text && !line.trim().is_empty() {
                record.text.push(' ');
                record.text.push_str(line.trim());
            }
        }
    }
}
