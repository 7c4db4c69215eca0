// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

use crate::descriptor::DescriptorError;

static ACTIVATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}$").expect("valid regex"));

/// A challenge held back from synchronization until `at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredActivation {
    pub target: String,
    pub at: DateTime<Utc>,
}

/// Parses a `YYYY-MM-DDThh:mm` activation time given in `offset`'s wall-clock time.
pub fn parse_activation_time(
    value: &str,
    offset: FixedOffset,
) -> Result<DateTime<Utc>, DescriptorError> {
    let invalid = || DescriptorError::InvalidActivationTime(value.to_string());
    if !ACTIVATION_PATTERN.is_match(value) {
        return Err(invalid());
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M").map_err(|_| invalid())?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(invalid)
}
