use std::fs::{File, OpenOptions};
use std::io::{self, Stdout, Write};

use slog::{Drain, Logger};

use trellismq_conf::logging::To;

/// Builds the root logger from the `[log]` section: a plain-text drain
/// over console, file, or both, level-filtered and made async so slow
/// sinks never stall session loops.
pub fn config_logger(filename: String, to: To, level: slog::Level) -> Logger {
    let decorator = slog_term::PlainDecorator::new(WriteFilter::new(filename, to));
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = LevelFilter(drain, level).fuse();
    let drain = slog_async::Async::new(drain)
        .chan_size(4096 * 4)
        .overflow_strategy(slog_async::OverflowStrategy::DropAndReport)
        .build()
        .fuse();
    Logger::root(drain, slog::o!())
}

struct LevelFilter<D>(D, slog::Level);

impl<D> Drain for LevelFilter<D>
where
    D: Drain,
{
    type Ok = Option<D::Ok>;
    type Err = Option<D::Err>;

    fn log(
        &self,
        record: &slog::Record,
        values: &slog::OwnedKVList,
    ) -> std::result::Result<Self::Ok, Self::Err> {
        if record.level().is_at_least(self.1) {
            self.0.log(record, values).map(Some).map_err(Some)
        } else {
            Ok(None)
        }
    }
}

struct WriteFilter {
    to: To,
    file: Option<File>,
    console: Stdout,
}

impl WriteFilter {
    fn new(filename: String, to: To) -> Self {
        let file = if to.file() && !filename.is_empty() {
            match OpenOptions::new().create(true).append(true).open(&filename) {
                Ok(f) => Some(f),
                Err(e) => {
                    eprintln!("unable to open log file {filename}: {e}");
                    None
                }
            }
        } else {
            None
        };
        Self { to, file, console: io::stdout() }
    }
}

impl Write for WriteFilter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.to.off() {
            return Ok(buf.len());
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        if self.to.console() {
            self.console.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        if self.to.console() {
            self.console.flush()?;
        }
        Ok(())
    }
}
