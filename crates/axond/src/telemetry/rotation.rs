//! Date-based log file rotation.
//!
//! Rotated files are renamed to `<path>.YYYY-MM-DD`, named after the day the
//! file was opened. A second rotation on the same day appends `_1`, `_2` and
//! so on. With gzip compression the renamed file is replaced by `<name>.gz`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use axon_config::{Compression, RotationPeriod};
use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression as GzLevel;
use flate2::write::GzEncoder;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing::{error, info, warn};

use crate::worker::WorkerPool;

use super::TELEMETRY_TARGET;

const COMPRESS_THREAD: &str = "log-compress";

/// Whether a file opened on `opened` must rotate before writing on `today`.
#[must_use]
pub fn rotation_due(period: RotationPeriod, opened: Date, today: Date) -> bool {
    match period {
        RotationPeriod::Daily => opened != today,
        RotationPeriod::Weekly => {
            let (opened_year, opened_week, _) = opened.to_iso_week_date();
            let (year, week, _) = today.to_iso_week_date();
            (opened_year, opened_week) != (year, week)
        }
        RotationPeriod::Monthly => (opened.year(), opened.month()) != (today.year(), today.month()),
    }
}

/// First free name for a file rotated on `date`.
///
/// A name counts as taken when either it or its `.gz` sibling exists.
#[must_use]
pub fn rotated_name(
    path: &Utf8Path,
    date: Date,
    exists: impl Fn(&Utf8Path) -> bool,
) -> Utf8PathBuf {
    let suffix = date
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| date.to_string());
    let base = Utf8PathBuf::from(format!("{path}.{suffix}"));
    let taken = |candidate: &Utf8Path| {
        exists(candidate) || exists(Utf8Path::new(&format!("{candidate}.gz")))
    };
    if !taken(&base) {
        return base;
    }
    (1_u32..)
        .map(|index| Utf8PathBuf::from(format!("{base}_{index}")))
        .find(|candidate| !taken(candidate))
        .unwrap_or(base)
}

/// Compresses `path` to `<path>.gz` and removes the original.
pub fn gzip_file(path: &Utf8Path) -> io::Result<Utf8PathBuf> {
    let target = Utf8PathBuf::from(format!("{path}.gz"));
    let mut source = File::open(path)?;
    let mut encoder = GzEncoder::new(File::create(&target)?, GzLevel::default());
    io::copy(&mut source, &mut encoder)?;
    encoder.finish()?.sync_all()?;
    fs::remove_file(path)?;
    Ok(target)
}

/// Append-only log file that rotates itself on write.
#[derive(Debug)]
pub struct RotatingFile {
    path: Utf8PathBuf,
    period: Option<RotationPeriod>,
    compression: Option<Compression>,
    file: File,
    opened: Date,
    pool: Option<Arc<WorkerPool>>,
}

impl RotatingFile {
    /// Opens `path` for appending.
    ///
    /// An existing file keeps the date of its last modification, so a
    /// restart on a later day rotates it before the first write.
    pub fn open(
        path: &Utf8Path,
        period: Option<RotationPeriod>,
        compression: Option<Compression>,
        pool: Option<Arc<WorkerPool>>,
    ) -> io::Result<Self> {
        let today = OffsetDateTime::now_utc().date();
        let opened = fs::metadata(path)
            .and_then(|metadata| metadata.modified())
            .map_or(today, |modified| OffsetDateTime::from(modified).date());
        Ok(Self {
            path: path.to_path_buf(),
            period,
            compression,
            file: append(path)?,
            opened,
            pool,
        })
    }

    /// Rotates when the period boundary between the opening date and `today`
    /// has been crossed. Returns the name the old file was moved to.
    pub fn rotate_if_due(&mut self, today: Date) -> io::Result<Option<Utf8PathBuf>> {
        let Some(period) = self.period else {
            return Ok(None);
        };
        if !rotation_due(period, self.opened, today) {
            return Ok(None);
        }
        let rotated = rotated_name(&self.path, self.opened, Utf8Path::exists);
        self.file.flush()?;
        fs::rename(&self.path, &rotated)?;
        self.file = append(&self.path)?;
        self.opened = today;
        self.compress(rotated.clone());
        Ok(Some(rotated))
    }

    /// Compresses on the worker pool, or on a dedicated thread when the pool
    /// is absent or refuses the job. Nothing is logged on the calling thread:
    /// it holds the log writer.
    fn compress(&self, rotated: Utf8PathBuf) {
        let Some(Compression::Gzip) = self.compression else {
            return;
        };
        let refused = match &self.pool {
            Some(pool) => match pool.execute(compression_job(rotated.clone(), None)) {
                Ok(()) => return,
                Err(error) => Some(error.to_string()),
            },
            None => None,
        };
        let spawned = thread::Builder::new()
            .name(COMPRESS_THREAD.to_owned())
            .spawn(compression_job(rotated.clone(), refused));
        if let Err(error) = spawned {
            let _ = writeln!(
                io::stderr(),
                "failed to start compression of rotated log file {rotated}: {error}"
            );
        }
    }
}

fn compression_job(rotated: Utf8PathBuf, refused: Option<String>) -> impl FnOnce() + Send + 'static {
    move || {
        if let Some(reason) = refused {
            warn!(
                target: TELEMETRY_TARGET,
                file = %rotated,
                error = %reason,
                "worker pool refused log compression; using a dedicated thread"
            );
        }
        let started = Instant::now();
        match gzip_file(&rotated) {
            Ok(target) => info!(
                target: TELEMETRY_TARGET,
                from = %rotated,
                to = %target,
                elapsed_ms = started.elapsed().as_millis(),
                "rotated log file compressed"
            ),
            Err(error) => error!(
                target: TELEMETRY_TARGET,
                file = %rotated,
                error = %error,
                "failed to compress rotated log file"
            ),
        }
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.rotate_if_due(OffsetDateTime::now_utc().date())?;
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn append(path: &Utf8Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Read;

    use std::sync::Mutex;
    use std::time::Duration;

    use flate2::read::GzDecoder;
    use rstest::rstest;
    use time::macros::date;

    fn wait_until(done: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        true
    }

    #[rstest]
    #[case(RotationPeriod::Daily, date!(2024 - 03 - 04), date!(2024 - 03 - 04), false)]
    #[case(RotationPeriod::Daily, date!(2024 - 03 - 04), date!(2024 - 03 - 05), true)]
    #[case(RotationPeriod::Weekly, date!(2024 - 03 - 04), date!(2024 - 03 - 10), false)]
    #[case(RotationPeriod::Weekly, date!(2024 - 03 - 10), date!(2024 - 03 - 11), true)]
    #[case(RotationPeriod::Weekly, date!(2024 - 12 - 30), date!(2025 - 01 - 02), false)]
    #[case(RotationPeriod::Monthly, date!(2024 - 03 - 01), date!(2024 - 03 - 31), false)]
    #[case(RotationPeriod::Monthly, date!(2024 - 03 - 31), date!(2024 - 04 - 01), true)]
    #[case(RotationPeriod::Monthly, date!(2023 - 04 - 30), date!(2024 - 04 - 01), true)]
    fn detects_period_boundaries(
        #[case] period: RotationPeriod,
        #[case] opened: Date,
        #[case] today: Date,
        #[case] expected: bool,
    ) {
        assert_eq!(rotation_due(period, opened, today), expected);
    }

    #[rstest]
    fn numbers_colliding_names() {
        let taken: HashSet<&str> = ["app.log.2024-03-04", "app.log.2024-03-04_1.gz"]
            .into_iter()
            .collect();
        let name = rotated_name(Utf8Path::new("app.log"), date!(2024 - 03 - 04), |candidate| {
            taken.contains(candidate.as_str())
        });
        assert_eq!(name, "app.log.2024-03-04_2");
    }

    #[rstest]
    fn pads_single_digit_dates() {
        let name = rotated_name(Utf8Path::new("/var/log/app.log"), date!(2024 - 01 - 02), |_| false);
        assert_eq!(name, "/var/log/app.log.2024-01-02");
    }

    #[rstest]
    fn rotates_and_compresses_on_boundary() {
        let dir = tempfile::tempdir().expect("temp dir");
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 dir");
        let path = base.join("axond.log");
        let mut file = RotatingFile::open(
            &path,
            Some(RotationPeriod::Daily),
            Some(Compression::Gzip),
            None,
        )
        .expect("open log");
        file.opened = date!(2024 - 03 - 04);
        file.file.write_all(b"first day\n").expect("write first line");

        let rotated = file
            .rotate_if_due(date!(2024 - 03 - 05))
            .expect("rotate")
            .expect("boundary crossed");
        file.file.write_all(b"second day\n").expect("write second line");

        assert_eq!(rotated, base.join("axond.log.2024-03-04"));
        assert!(
            wait_until(|| !rotated.exists()),
            "uncompressed copy should be removed"
        );
        let mut text = String::new();
        GzDecoder::new(File::open(format!("{rotated}.gz")).expect("open gz"))
            .read_to_string(&mut text)
            .expect("decompress");
        assert_eq!(text, "first day\n");
        assert_eq!(fs::read_to_string(&path).expect("read live log"), "second day\n");
    }

    #[rstest]
    fn rotation_during_a_log_event_compresses_off_thread() {
        let dir = tempfile::tempdir().expect("temp dir");
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 dir");
        let path = base.join("live.log");
        let mut file = RotatingFile::open(
            &path,
            Some(RotationPeriod::Daily),
            Some(Compression::Gzip),
            None,
        )
        .expect("open log");
        file.opened = OffsetDateTime::now_utc()
            .date()
            .previous_day()
            .expect("yesterday exists");
        file.file.write_all(b"yesterday\n").expect("write old line");
        let rotated = rotated_name(&path, file.opened, Utf8Path::exists);

        let subscriber = tracing_subscriber::fmt()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            info!(target: TELEMETRY_TARGET, "first line of the day");
        });

        let compressed = Utf8PathBuf::from(format!("{rotated}.gz"));
        assert!(wait_until(|| compressed.exists() && !rotated.exists()));
        let live = fs::read_to_string(&path).expect("read live log");
        assert!(live.contains("first line of the day"));
        assert!(!live.contains("yesterday"));
    }

    #[rstest]
    fn files_without_period_never_rotate() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("plain.log")).expect("utf8 path");
        let mut file = RotatingFile::open(&path, None, None, None).expect("open log");
        assert_eq!(file.rotate_if_due(date!(2999 - 01 - 01)).expect("check"), None);
    }
}
