//! Document number formatting and the number allocator.
//!
//! A document number is rendered from a printf-style format with three
//! positional substitutions, consumed in order: the running number, the month
//! as a Roman numeral, and the year. `SKH/%03d/%s/TUK.7.2.1/%d` renders as
//! `SKH/007/XI/TUK.7.2.1/2025`.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{Error, Phase, Result, store::SequenceTx};

pub const DEFAULT_NUMBER_FORMAT: &str = "SKH/%03d/%s/TUK.7.2.1/%d";

/// Separator between the fields of a rendered number.
const FIELD_SEPARATOR: char = '/';

/// Index of the running number among the separated fields.
const RUNNING_NUMBER_FIELD: usize = 1;

const ROMAN_MONTHS: [&str; 12] = [
  "I", "II", "III", "IV", "V", "VI", "VII", "VIII", "IX", "X", "XI", "XII",
];

/// The month as an uppercase Roman numeral. Only 1–12 are valid.
pub fn roman_month(month: u32) -> Result<&'static str> {
  month
    .checked_sub(1)
    .and_then(|i| ROMAN_MONTHS.get(i as usize))
    .copied()
    .ok_or(Error::InvalidMonth(month))
}

/// Extract the running number from a rendered (or deletion-mangled) number.
pub fn parse_running_number(number: &str) -> Option<u32> {
  number
    .split(FIELD_SEPARATOR)
    .nth(RUNNING_NUMBER_FIELD)?
    .trim()
    .parse()
    .ok()
}

// ─── Format ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
  Running,
  Month,
  Year,
}

const SLOTS: [Slot; 3] = [Slot::Running, Slot::Month, Slot::Year];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
  Right,
  ZeroPad,
  Left,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
  Literal(String),
  Field { slot: Slot, align: Align, width: usize },
}

/// A parsed number format.
///
/// Supported verbs: `%d` for the running number and year, `%s` for the month,
/// `%v` for any of them, and `%%` for a literal percent sign. A verb may carry
/// a `0` (zero-pad) or `-` (left-justify) flag and a width, as in `%03d`.
/// Fewer than three verbs is fine; the unused values are dropped.
///
/// The allocator can only reconcile against the record table when the running
/// number renders as the second `/`-separated field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NumberFormat {
  source:   String,
  segments: Vec<Segment>,
}

impl NumberFormat {
  pub fn parse(source: &str) -> Result<Self> {
    let invalid = |reason: &str| Error::InvalidFormat {
      format: source.to_owned(),
      reason: reason.to_owned(),
    };

    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut next_slot = 0;
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
      if c != '%' {
        literal.push(c);
        continue;
      }
      if chars.peek() == Some(&'%') {
        chars.next();
        literal.push('%');
        continue;
      }

      let align = match chars.peek() {
        Some('0') => {
          chars.next();
          Align::ZeroPad
        }
        Some('-') => {
          chars.next();
          Align::Left
        }
        _ => Align::Right,
      };

      let mut width = 0_usize;
      while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        chars.next();
        width = width
          .checked_mul(10)
          .and_then(|w| w.checked_add(d as usize))
          .ok_or_else(|| invalid("width too large"))?;
      }

      let verb = chars.next().ok_or_else(|| invalid("dangling '%'"))?;
      let slot = *SLOTS
        .get(next_slot)
        .ok_or_else(|| invalid("more than three substitutions"))?;
      let accepted = match (slot, verb) {
        (_, 'v') => true,
        (Slot::Running | Slot::Year, 'd') => true,
        (Slot::Month, 's') => true,
        _ => false,
      };
      if !accepted {
        return Err(invalid(&format!(
          "verb '%{verb}' does not fit substitution {}",
          next_slot + 1
        )));
      }
      next_slot += 1;

      if !literal.is_empty() {
        segments.push(Segment::Literal(std::mem::take(&mut literal)));
      }
      segments.push(Segment::Field { slot, align, width });
    }

    if !literal.is_empty() {
      segments.push(Segment::Literal(literal));
    }

    Ok(Self { source: source.to_owned(), segments })
  }

  pub fn as_str(&self) -> &str { &self.source }

  /// Render a number. `month` is the Roman numeral, already validated.
  pub fn render(&self, running: u32, month: &str, year: i32) -> String {
    let mut out = String::with_capacity(self.source.len() + 8);
    for segment in &self.segments {
      match segment {
        Segment::Literal(text) => out.push_str(text),
        Segment::Field { slot, align, width } => {
          let value = match slot {
            Slot::Running => running.to_string(),
            Slot::Month => month.to_owned(),
            Slot::Year => year.to_string(),
          };
          let pad = width.saturating_sub(value.chars().count());
          match align {
            Align::Right => out.extend(std::iter::repeat_n(' ', pad)),
            Align::ZeroPad => out.extend(std::iter::repeat_n('0', pad)),
            Align::Left => {}
          }
          out.push_str(&value);
          if *align == Align::Left {
            out.extend(std::iter::repeat_n(' ', pad));
          }
        }
      }
    }
    out
  }
}

impl Default for NumberFormat {
  fn default() -> Self {
    Self {
      source:   DEFAULT_NUMBER_FORMAT.to_owned(),
      segments: vec![
        Segment::Literal("SKH/".into()),
        Segment::Field { slot: Slot::Running, align: Align::ZeroPad, width: 3 },
        Segment::Literal("/".into()),
        Segment::Field { slot: Slot::Month, align: Align::Right, width: 0 },
        Segment::Literal("/TUK.7.2.1/".into()),
        Segment::Field { slot: Slot::Year, align: Align::Right, width: 0 },
      ],
    }
  }
}

impl fmt::Display for NumberFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.source)
  }
}

impl TryFrom<String> for NumberFormat {
  type Error = Error;

  fn try_from(value: String) -> Result<Self> { Self::parse(&value) }
}

impl From<NumberFormat> for String {
  fn from(value: NumberFormat) -> Self { value.source }
}

// ─── Allocator ───────────────────────────────────────────────────────────────

/// The persisted sequence counter: the last issued running number and the
/// year it belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
  pub running: u32,
  pub year:    i32,
}

/// The outcome of one allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
  pub number:  String,
  pub running: u32,
}

/// Reserve the next number for `year`/`month` inside `tx`.
///
/// The next running number is one past the larger of the last number found in
/// the record table and the persisted counter (which counts as zero when it
/// belongs to another year). The counter is advanced in the same transaction.
pub fn allocate<T: SequenceTx + ?Sized>(
  tx: &mut T,
  format: &NumberFormat,
  year: i32,
  month: u32,
) -> Result<Allocation> {
  let month_label = roman_month(month)?;

  let latest = tx
    .latest_number_in_year(year)
    .map_err(Error::storage(Phase::Numbering))?;
  let from_table = match latest.as_deref() {
    None => 0,
    Some(number) => parse_running_number(number).unwrap_or_else(|| {
      warn!(
        number,
        format = format.as_str(),
        "no running number in the second field; table scan reads as 0"
      );
      0
    }),
  };

  let counter = tx.lock_counter().map_err(Error::storage(Phase::Numbering))?;
  let from_counter = if counter.year == year {
    counter.running
  } else {
    if counter.year != 0 {
      info!(from = counter.year, to = year, "sequence year rolled over");
    }
    0
  };

  if from_table > from_counter {
    warn!(
      from_table,
      from_counter, year, "sequence counter behind record table; reconciling"
    );
  }

  let running = from_table.max(from_counter).saturating_add(1);
  tx.store_counter(Counter { running, year })
    .map_err(Error::storage(Phase::Numbering))?;

  Ok(Allocation { number: format.render(running, month_label, year), running })
}
