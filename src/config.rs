use std::env;

use crate::error::{ArenaError, ArenaResult};

/// `log2` of the default page size: 4 KiB pages, or the OS page if that is bigger.
pub const DEFAULT_LOG_PAGE_SIZE: u32 = 12;

/// Pages requested from the OS at least, whatever the request was.
pub const DEFAULT_OS_QUANTUM_PAGES: usize = 64;

/// Coalesced free runs of at least this many pages give their whole OS
/// mappings back. 4096 pages of 4 KiB are 16 MiB.
pub const DEFAULT_RETURN_THRESHOLD: usize = 4096;

/// Pages bigger than 1 GiB make no sense for a heap.
const MAX_LOG_PAGE_SIZE: u32 = 30;

pub const ENV_LOG_PAGE_SIZE: &str = "BIBOP_LOG_PAGE_SIZE";
pub const ENV_OS_QUANTUM: &str = "BIBOP_OS_QUANTUM";
pub const ENV_RETURN_THRESHOLD: &str = "BIBOP_RETURN_THRESHOLD";

/// Knobs of a [`crate::PageArena`].
///
/// The page size is the one the collector classifies addresses with, so it is
/// fixed for the life of the arena. It has to be a multiple of the OS page size;
/// that part is only checked in [`crate::PageArena::initialize`], once the OS
/// has been asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Pages are `1 << log_page_size` bytes. `None` picks 4 KiB, raised to the
    /// OS page size on hosts with bigger pages.
    pub log_page_size: Option<u32>,
    /// Minimum number of pages per OS mapping. Requests smaller than this still
    /// map a whole quantum and leave the rest on the free list, so the OS is
    /// asked less often.
    pub os_quantum_pages: usize,
    /// Free runs at least this long are returned to the OS. `None` keeps every
    /// page mapped until the process exits.
    pub return_threshold: Option<usize>,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            log_page_size: None,
            os_quantum_pages: DEFAULT_OS_QUANTUM_PAGES,
            return_threshold: Some(DEFAULT_RETURN_THRESHOLD),
        }
    }
}

impl ArenaConfig {
    pub fn with_log_page_size(mut self, log_page_size: u32) -> Self {
        self.log_page_size = Some(log_page_size);
        self
    }

    pub fn with_os_quantum_pages(mut self, pages: usize) -> Self {
        self.os_quantum_pages = pages;
        self
    }

    pub fn with_return_threshold(mut self, pages: Option<usize>) -> Self {
        self.return_threshold = pages;
        self
    }

    /// The page size used on top of OS pages of `1 << log_os_page_size` bytes.
    ///
    /// An explicit size is returned as is, even when it is too small for the OS;
    /// [`crate::PageArena::initialize`] refuses those.
    pub fn resolve_log_page_size(&self, log_os_page_size: u32) -> u32 {
        self.log_page_size.unwrap_or(DEFAULT_LOG_PAGE_SIZE.max(log_os_page_size))
    }

    /// Defaults overridden by `BIBOP_LOG_PAGE_SIZE`, `BIBOP_OS_QUANTUM` and
    /// `BIBOP_RETURN_THRESHOLD` (`0` disables returning memory to the OS).
    pub fn from_env() -> ArenaResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`ArenaConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> ArenaResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = parse_var(&lookup, ENV_LOG_PAGE_SIZE)? {
            let log_page_size = u32::try_from(value).map_err(|_| {
                ArenaError::InvalidConfig(format!("{ENV_LOG_PAGE_SIZE}={value} is out of range"))
            })?;
            config.log_page_size = Some(log_page_size);
        }
        if let Some(value) = parse_var(&lookup, ENV_OS_QUANTUM)? {
            config.os_quantum_pages = value;
        }
        if let Some(value) = parse_var(&lookup, ENV_RETURN_THRESHOLD)? {
            config.return_threshold = (value > 0).then_some(value);
        }

        config.validate()?;

        Ok(config)
    }

    /// Checks everything that doesn't depend on the OS.
    pub fn validate(&self) -> ArenaResult<()> {
        self.validate_with(self.log_page_size.unwrap_or(DEFAULT_LOG_PAGE_SIZE))
    }

    /// Same as [`ArenaConfig::validate`] for pages of `1 << log_page_size` bytes.
    pub(crate) fn validate_with(&self, log_page_size: u32) -> ArenaResult<()> {
        if log_page_size > MAX_LOG_PAGE_SIZE {
            return Err(ArenaError::InvalidConfig(format!(
                "log_page_size {log_page_size} is larger than {MAX_LOG_PAGE_SIZE}"
            )));
        }
        if self.os_quantum_pages == 0 {
            return Err(ArenaError::InvalidConfig(
                "os_quantum_pages must be > 0".to_string(),
            ));
        }
        if self.return_threshold == Some(0) {
            return Err(ArenaError::InvalidConfig(
                "return_threshold must be > 0, use None to never return memory".to_string(),
            ));
        }
        if self.os_quantum_pages > (usize::MAX >> log_page_size) {
            return Err(ArenaError::InvalidConfig(
                "os_quantum_pages overflows the address space".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<F>(lookup: &F, key: &str) -> ArenaResult<Option<usize>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };

    raw.trim()
        .parse::<usize>()
        .map(Some)
        .map_err(|err| ArenaError::InvalidConfig(format!("{key}={raw:?}: {err}")))
}
