//! Code rendering - turns a reserved numeric range into textual codes.
//!
//! Rendering is pure: the same parts and range always produce the same strings.

use std::ops::RangeInclusive;

/// Widest serial part whose all-nines ceiling still fits in an `i64`.
pub const MAX_REPRESENTABLE_WIDTH: i32 = 18;

/// The effective textual components of a code. Disabled components are empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeParts<'a> {
    pub prefix: &'a str,
    pub rule_code: &'a str,
    pub separator: &'a str,
    pub width: usize,
}

impl CodeParts<'_> {
    /// Renders a single serial number.
    #[must_use]
    pub fn render(&self, serial: i64) -> String {
        format!(
            "{}{}{}{:0width$}",
            self.prefix,
            self.rule_code,
            self.separator,
            serial,
            width = self.width
        )
    }

    /// Renders every serial number in `range`, in ascending order.
    #[must_use]
    pub fn render_range(&self, range: RangeInclusive<i64>) -> Vec<String> {
        range.map(|serial| self.render(serial)).collect()
    }
}

/// Returns the all-nines ceiling for a serial part of `width` digits,
/// or `None` when the width is not representable.
#[must_use]
pub fn generate_digital_code_ending(width: i32) -> Option<i64> {
    if !(1..=MAX_REPRESENTABLE_WIDTH).contains(&width) {
        return None;
    }
    let exponent = u32::try_from(width).ok()?;
    10_i64.checked_pow(exponent).map(|limit| limit - 1)
}
