// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting.

use chrono::{DateTime, Utc};

/// Format a UTC timestamp as decimal Unix seconds, the form the frontend
/// expects in JSON responses.
pub fn unix_string(date: DateTime<Utc>) -> String {
    date.timestamp().to_string()
}

pub fn unix_string_opt(date: Option<DateTime<Utc>>) -> Option<String> {
    date.map(unix_string)
}
