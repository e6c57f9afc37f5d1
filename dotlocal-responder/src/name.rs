// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Domain names and conflict renaming
//!
//! Per RFC 6762 names on `.local` are compared case-insensitively and
//! labels are not restricted to hostname characters (service instance
//! names routinely contain spaces). The hard limits are the DNS ones,
//! 63 bytes per label and 255 bytes for the encoded name, plus a ban on
//! dots inside a label so the dotted rendering stays unambiguous.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::consts::{DEFAULT_HOST_NAME, LABEL_MAX_LEN, NAME_MAX_LEN};

/// A validated DNS domain name: an ordered sequence of labels.
///
/// Instances are immutable; renaming builds a new name. Equality and
/// hashing are case-insensitive per label, so `Gadget.local` and
/// `gadget.LOCAL` are the same name.
///
/// # Example
///
/// ```
/// # use dotlocal_responder::DomainName;
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let name = DomainName::parse("gadget.local")?;
/// assert_eq!(name.labels().len(), 2);
/// assert_eq!(name, DomainName::parse("GADGET.local")?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct DomainName {
    labels: Vec<String>,
}

impl DomainName {
    /// Build a name from explicit labels.
    ///
    /// Use this instead of [`DomainName::parse`] when the labels are
    /// already split, e.g. decoded off the wire.
    ///
    /// # Errors
    ///
    /// Returns `NameError::Empty` for an empty label list,
    /// `NameError::EmptyLabel` / `NameError::LabelTooLong` /
    /// `NameError::InvalidLabel` for a bad label, and
    /// `NameError::NameTooLong` when the encoded form would exceed 255
    /// bytes.
    pub fn from_labels<I, S>(labels: I) -> Result<Self, NameError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(NameError::Empty);
        }
        for label in &labels {
            validate_label(label)?;
        }
        let name = Self { labels };
        if name.encoded_len() > NAME_MAX_LEN {
            return Err(NameError::NameTooLong);
        }
        Ok(name)
    }

    /// Parse a dotted name like `"gadget.local"`.
    ///
    /// # Errors
    ///
    /// Same conditions as [`DomainName::from_labels`]; an empty string or
    /// one with consecutive dots is rejected.
    pub fn parse(s: &str) -> Result<Self, NameError> {
        let trimmed = s.strip_suffix('.').unwrap_or(s);
        if trimmed.is_empty() {
            return Err(NameError::Empty);
        }
        Self::from_labels(trimmed.split('.'))
    }

    /// Build a name from labels already known to be valid.
    ///
    /// Callers are responsible for having validated every label; this is
    /// used on paths where the labels come from fields that were
    /// validated at construction time.
    pub(crate) fn from_validated_labels(labels: Vec<String>) -> Self {
        debug_assert!(!labels.is_empty());
        debug_assert!(labels.iter().all(|l| validate_label(l).is_ok()));
        Self { labels }
    }

    /// The labels, leftmost first.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// The leftmost label.
    pub fn first_label(&self) -> &str {
        // Invariant: labels is never empty.
        self.labels.first().map(String::as_str).unwrap_or_default()
    }

    /// Length of the uncompressed wire encoding (length bytes + root).
    pub fn encoded_len(&self) -> usize {
        self.labels.iter().map(|l| 1 + l.len()).sum::<usize>() + 1
    }

    /// A copy of this name with the leftmost label replaced.
    ///
    /// # Errors
    ///
    /// Returns `NameError::LabelTooLong` / `NameError::EmptyLabel` when
    /// the replacement label is out of bounds.
    pub fn with_first_label(&self, label: &str) -> Result<Self, NameError> {
        validate_label(label)?;
        let mut labels = self.labels.clone();
        labels[0] = label.to_owned();
        let name = Self { labels };
        if name.encoded_len() > NAME_MAX_LEN {
            return Err(NameError::NameTooLong);
        }
        Ok(name)
    }

    /// True when `self` is `parent` with exactly one extra leading label,
    /// compared case-insensitively.
    ///
    /// `Gadget._http._tcp.local` is a child of `_http._tcp.local`.
    pub fn is_child_of(&self, parent: &DomainName) -> bool {
        if self.labels.len() != parent.labels.len() + 1 {
            return false;
        }
        self.labels[1..]
            .iter()
            .zip(parent.labels.iter())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl PartialEq for DomainName {
    fn eq(&self, other: &Self) -> bool {
        self.labels.len() == other.labels.len()
            && self
                .labels
                .iter()
                .zip(other.labels.iter())
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl Hash for DomainName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for label in &self.labels {
            state.write(label.to_ascii_lowercase().as_bytes());
            state.write_u8(0);
        }
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, label) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(label)?;
        }
        Ok(())
    }
}

pub(crate) fn validate_label(label: &str) -> Result<(), NameError> {
    if label.is_empty() {
        return Err(NameError::EmptyLabel);
    }
    if label.len() > LABEL_MAX_LEN {
        return Err(NameError::LabelTooLong(label.to_owned()));
    }
    // A dot inside a label would be indistinguishable from a label
    // boundary in the dotted rendering.
    if label.contains('.') {
        return Err(NameError::InvalidLabel(label.to_owned()));
    }
    Ok(())
}

/// Derive the next candidate label after a name conflict.
///
/// An existing numeric suffix behind `divider` is incremented
/// (`gadget-2` becomes `gadget-3`); any other name gets `divider` plus
/// `2` appended (`gadget` becomes `gadget-2`). The suffix only counts
/// as numeric when digits run all the way to the end of the label, so
/// `gadget-2x` becomes `gadget-2x-2`. A missing or empty input falls
/// back to `fallback`, or to the built-in default name when that is
/// `None` too.
///
/// # Errors
///
/// Returns `NameError::LabelTooLong` when the result would exceed the
/// 63-byte label bound. This is a hard failure; the name is never
/// silently truncated.
///
/// # Example
///
/// ```
/// # use dotlocal_responder::index_name;
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// assert_eq!(index_name(Some("gadget"), "-", None)?, "gadget-2");
/// assert_eq!(index_name(Some("gadget-2"), "-", None)?, "gadget-3");
/// # Ok(())
/// # }
/// ```
pub fn index_name(
    current: Option<&str>,
    divider: &str,
    fallback: Option<&str>,
) -> Result<String, NameError> {
    let current = match current {
        Some(c) if !c.is_empty() => c,
        _ => {
            let name = fallback.unwrap_or(DEFAULT_HOST_NAME);
            validate_label(name)?;
            return Ok(name.to_owned());
        }
    };

    let indexed = match numeric_suffix(current, divider) {
        Some((stem, index)) => format!("{}{}{}", stem, divider, index + 1),
        None => format!("{}{}2", current, divider),
    };
    validate_label(&indexed)?;
    Ok(indexed)
}

/// Split `name` at the last `divider` when everything after it is a
/// decimal number; returns the stem and the parsed value.
fn numeric_suffix<'a>(name: &'a str, divider: &str) -> Option<(&'a str, u32)> {
    if divider.is_empty() {
        return None;
    }
    let pos = name.rfind(divider)?;
    let digits = &name[pos + divider.len()..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index: u32 = digits.parse().ok()?;
    Some((&name[..pos], index))
}

/// Errors from domain-name validation and renaming
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum NameError {
    /// The name has no labels at all
    #[error("empty domain name")]
    Empty,

    /// A label is empty
    #[error("empty label in domain name")]
    EmptyLabel,

    /// A label exceeds the 63-byte DNS bound
    #[error("label exceeds {LABEL_MAX_LEN} bytes: {0:?}")]
    LabelTooLong(String),

    /// A label contains a character it must not
    #[error("invalid label: {0:?}")]
    InvalidLabel(String),

    /// The encoded name exceeds the 255-byte DNS bound
    #[error("encoded name exceeds {NAME_MAX_LEN} bytes")]
    NameTooLong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let name = DomainName::parse("gadget.local").unwrap();
        assert_eq!(name.labels(), &["gadget", "local"]);
        assert_eq!(name.to_string(), "gadget.local");

        // Trailing dot is tolerated.
        let fqdn = DomainName::parse("gadget.local.").unwrap();
        assert_eq!(fqdn, name);
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(DomainName::parse(""), Err(NameError::Empty));
        assert_eq!(
            DomainName::parse("gadget..local"),
            Err(NameError::EmptyLabel)
        );
    }

    #[test]
    fn test_label_with_space_via_from_labels() {
        let name = DomainName::from_labels(["My Web Server", "_http", "_tcp", "local"]).unwrap();
        assert_eq!(name.first_label(), "My Web Server");
    }

    #[test]
    fn test_case_insensitive_eq_and_hash() {
        use std::collections::hash_map::DefaultHasher;

        let a = DomainName::parse("Gadget.Local").unwrap();
        let b = DomainName::parse("gadget.local").unwrap();
        assert_eq!(a, b);

        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn test_label_too_long() {
        let long = "x".repeat(64);
        assert!(matches!(
            DomainName::from_labels([long.as_str(), "local"]),
            Err(NameError::LabelTooLong(_))
        ));
    }

    #[test]
    fn test_label_with_dot_rejected() {
        assert!(matches!(
            DomainName::from_labels(["bad.label", "local"]),
            Err(NameError::InvalidLabel(_))
        ));
        assert!(matches!(
            validate_label("no.dots.allowed"),
            Err(NameError::InvalidLabel(_))
        ));
    }

    #[test]
    fn test_name_too_long() {
        let label = "x".repeat(63);
        let labels: Vec<&str> = std::iter::repeat(label.as_str()).take(4).collect();
        assert_eq!(DomainName::from_labels(labels), Err(NameError::NameTooLong));
    }

    #[test]
    fn test_encoded_len() {
        let name = DomainName::parse("gadget.local").unwrap();
        // 1+6 + 1+5 + root byte
        assert_eq!(name.encoded_len(), 14);
    }

    #[test]
    fn test_with_first_label() {
        let name = DomainName::parse("gadget.local").unwrap();
        let renamed = name.with_first_label("gadget-2").unwrap();
        assert_eq!(renamed.to_string(), "gadget-2.local");
        // Original untouched.
        assert_eq!(name.to_string(), "gadget.local");
    }

    #[test]
    fn test_is_child_of() {
        let service = DomainName::from_labels(["_http", "_tcp", "local"]).unwrap();
        let instance = DomainName::from_labels(["gadget", "_http", "_tcp", "local"]).unwrap();
        let deeper = DomainName::from_labels(["a", "b", "_http", "_tcp", "local"]).unwrap();

        assert!(instance.is_child_of(&service));
        assert!(!service.is_child_of(&instance));
        assert!(!deeper.is_child_of(&service));
    }

    #[test]
    fn test_index_name_appends() {
        assert_eq!(index_name(Some("gadget"), "-", None).unwrap(), "gadget-2");
    }

    #[test]
    fn test_index_name_increments() {
        assert_eq!(index_name(Some("gadget-2"), "-", None).unwrap(), "gadget-3");
        assert_eq!(index_name(Some("gadget-9"), "-", None).unwrap(), "gadget-10");
    }

    #[test]
    fn test_index_name_suffix_must_consume_remainder() {
        assert_eq!(
            index_name(Some("gadget-2x"), "-", None).unwrap(),
            "gadget-2x-2"
        );
        // Divider at the very end leaves an empty suffix.
        assert_eq!(index_name(Some("gadget-"), "-", None).unwrap(), "gadget--2");
    }

    #[test]
    fn test_index_name_fallbacks() {
        assert_eq!(index_name(None, "-", None).unwrap(), "dotlocal");
        assert_eq!(index_name(Some(""), "-", None).unwrap(), "dotlocal");
        assert_eq!(index_name(None, "-", Some("printer")).unwrap(), "printer");
    }

    #[test]
    fn test_index_name_overflow_is_hard_failure() {
        let long = "x".repeat(63);
        assert!(matches!(
            index_name(Some(long.as_str()), "-", None),
            Err(NameError::LabelTooLong(_))
        ));
    }

    #[test]
    fn test_index_name_huge_suffix_treated_as_text() {
        // Does not fit in u32, so it is not a numeric suffix.
        assert_eq!(
            index_name(Some("g-99999999999"), "-", None).unwrap(),
            "g-99999999999-2"
        );
    }
}
