//! Fatal fault reporting and the optional BIBOP log file.
//!
//! The arena has no recoverable failures from the collector's point of view. When
//! something goes wrong the message is printed to stderr with a `gc: ` prefix and
//! the process exits with status 255.

use std::{fmt, process};

/// Exit status of a fatal fault, `exit(-1)` as seen by the parent process.
pub const FATAL_EXIT_CODE: i32 = 255;

/// Prints `gc: <message>` on stderr and exits the process.
pub fn fatal(message: fmt::Arguments<'_>) -> ! {
    eprintln!("{}", render(message));

    process::exit(FATAL_EXIT_CODE)
}

fn render(message: fmt::Arguments<'_>) -> String {
    format!("gc: {message}")
}

/// `format!`-style front end to [`fatal`].
///
/// ```no_run
/// bibop_pages::gc_error!("heap corrupted at 0x{:x}", 0x1000);
/// ```
#[macro_export]
macro_rules! gc_error {
    ($($arg:tt)*) => {
        $crate::diagnostics::fatal(::std::format_args!($($arg)*))
    };
}

#[cfg(feature = "bibop-log")]
pub use self::bibop_log::{BibopLog, DEFAULT_PATH};

#[cfg(feature = "bibop-log")]
mod bibop_log {
    use std::{
        fs::OpenOptions,
        io::Write,
        path::{Path, PathBuf},
    };

    use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

    /// Default file name, relative to the working directory.
    pub const DEFAULT_PATH: &str = "BIBOP_LOG";

    /// A [`log`] backend appending one line per record to a file.
    ///
    /// The file is opened and closed for every record so the log survives a fatal
    /// exit mid-collection. That is slow, it is only meant for debugging the page
    /// traffic of a collector.
    #[derive(Debug)]
    pub struct BibopLog {
        path: PathBuf,
        level: LevelFilter,
    }

    impl BibopLog {
        pub fn new(path: impl AsRef<Path>, level: LevelFilter) -> Self {
            Self {
                path: path.as_ref().to_path_buf(),
                level,
            }
        }

        /// Installs a logger writing to `BIBOP_LOG` as the global [`log`] backend.
        pub fn install(level: LevelFilter) -> Result<(), SetLoggerError> {
            Self::new(DEFAULT_PATH, level).install_as_global()
        }

        pub fn install_as_global(self) -> Result<(), SetLoggerError> {
            let level = self.level;

            log::set_boxed_logger(Box::new(self))?;
            log::set_max_level(level);

            Ok(())
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Log for BibopLog {
        fn enabled(&self, metadata: &Metadata<'_>) -> bool {
            metadata.level() <= self.level
        }

        fn log(&self, record: &Record<'_>) {
            if !self.enabled(record.metadata()) {
                return;
            }

            // A logger has nowhere to report its own failures.
            if let Ok(mut file) = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
            {
                let _ = writeln!(file, "{}", record.args());
            }
        }

        fn flush(&self) {}
    }

}
