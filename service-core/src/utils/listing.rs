//! Query helpers shared by every list endpoint: pagination bounds, boolean
//! query flags, and the `enabled` filter applied to toggleable resources.

use serde::Serialize;

use crate::error::AppError;

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self { limit, offset }
    }

    /// Applies the window to an already filtered, ordered collection.
    pub fn slice<T: Clone>(&self, items: &[T]) -> Vec<T> {
        items
            .iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PaginationRules {
    pub default_limit: i64,
    pub max_limit: i64,
}

impl Default for PaginationRules {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_PAGE_LIMIT,
            max_limit: MAX_PAGE_LIMIT,
        }
    }
}

impl PaginationRules {
    /// Parses raw `limit`/`offset` query values. Limit must be within
    /// `1..=max_limit`, offset must be non-negative.
    pub fn resolve(&self, limit: Option<&str>, offset: Option<&str>) -> Result<Page, AppError> {
        let limit = match limit {
            Some(raw) => parse_integer("limit", raw)?,
            None => self.default_limit,
        };
        if limit < 1 || limit > self.max_limit {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "limit must be between 1 and {}",
                self.max_limit
            )));
        }

        let offset = match offset {
            Some(raw) => parse_integer("offset", raw)?,
            None => 0,
        };
        if offset < 0 {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "offset must be zero or greater"
            )));
        }

        Ok(Page { limit, offset })
    }
}

fn parse_integer(name: &str, raw: &str) -> Result<i64, AppError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("{} must be an integer", name)))
}

/// Parses an optional `true`/`false` query flag.
pub fn parse_flag(name: &str, raw: Option<&str>) -> Result<bool, AppError> {
    match raw.map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(value) if value == "true" => Ok(true),
        Some(value) if value == "false" || value.is_empty() => Ok(false),
        Some(_) => Err(AppError::BadRequest(anyhow::anyhow!(
            "{} must be true or false",
            name
        ))),
    }
}

/// Resources that can be switched off without being deleted.
pub trait Toggleable {
    fn is_enabled(&self) -> bool;
}

/// Disabled resources are hidden from listings unless explicitly requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnabledFilter {
    #[default]
    EnabledOnly,
    All,
}

impl EnabledFilter {
    pub fn from_include_disabled(include_disabled: bool) -> Self {
        if include_disabled {
            EnabledFilter::All
        } else {
            EnabledFilter::EnabledOnly
        }
    }

    pub fn admits(self, enabled: bool) -> bool {
        match self {
            EnabledFilter::EnabledOnly => enabled,
            EnabledFilter::All => true,
        }
    }

    pub fn admits_item<T: Toggleable + ?Sized>(self, item: &T) -> bool {
        self.admits(item.is_enabled())
    }

    /// Bind value for `WHERE ($1 OR enabled)` style SQL predicates.
    pub fn include_disabled(self) -> bool {
        self == EnabledFilter::All
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T: Serialize> {
    pub list: Vec<T>,
    pub total_count: i64,
    pub limit: i64,
    pub offset: i64,
}

impl<T: Serialize> ListResponse<T> {
    pub fn new(list: Vec<T>, total_count: i64, page: Page) -> Self {
        Self {
            list,
            total_count,
            limit: page.limit,
            offset: page.offset,
        }
    }
}
