//! Wall-clock phase timings and periodic memory samples.
//!
//! `--cpuprofile <path>` records how long each import phase took and writes
//! a tab-separated report when the run ends. `--memprofile dir[:interval]`
//! writes the process's resident and virtual memory into a timestamped file
//! under `dir` every interval until the run ends.

use std::{
    io::{self, BufWriter, Write},
    sync::mpsc::{self, RecvTimeoutError},
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info, warn};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::CliError;

/// Sampling interval when `--memprofile` names only a directory.
pub const DEFAULT_MEMPROFILE_INTERVAL: Duration = Duration::from_secs(60);

/// Requested profiling outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileConfig {
    /// Destination of the phase timing report.
    pub cpu: Option<Utf8PathBuf>,
    pub memory: Option<MemProfile>,
}

/// Memory sampling target parsed from `dir[:interval]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemProfile {
    pub dir: Utf8PathBuf,
    pub interval: Duration,
}

impl MemProfile {
    /// Parse `dir[:interval]`.
    ///
    /// Intervals use humantime syntax such as `500ms`, `30s` or `1h 30m` and
    /// must be non-zero.
    pub fn parse(raw: &str) -> Result<Self, CliError> {
        let invalid = |reason| CliError::InvalidMemProfile {
            value: raw.to_owned(),
            reason,
        };
        let (dir, interval) = match raw.rsplit_once(':') {
            Some((dir, interval)) => (
                dir,
                parse_interval(interval)
                    .ok_or_else(|| invalid("interval must be a non-zero duration such as 30s"))?,
            ),
            None => (raw, DEFAULT_MEMPROFILE_INTERVAL),
        };
        if dir.is_empty() {
            return Err(invalid("directory is empty"));
        }
        Ok(Self {
            dir: Utf8PathBuf::from(dir),
            interval,
        })
    }
}

fn parse_interval(raw: &str) -> Option<Duration> {
    humantime::parse_duration(raw)
        .ok()
        .filter(|interval| !interval.is_zero())
}

/// Active profiling for one run.
///
/// Dropping an unfinished profiler still stops the sampler and writes the
/// timing report, so failed runs keep their profiles.
#[derive(Debug)]
pub(crate) struct Profiler {
    timings: Option<PhaseTimings>,
    sampler: Option<MemorySampler>,
}

impl Profiler {
    pub(crate) fn start(config: &ProfileConfig) -> Result<Self, CliError> {
        let sampler = config
            .memory
            .as_ref()
            .map(MemorySampler::start)
            .transpose()?;
        Ok(Self {
            timings: config.cpu.clone().map(PhaseTimings::new),
            sampler,
        })
    }

    /// Run `body`, recording its duration under `phase`.
    pub(crate) fn time<T>(&mut self, phase: &'static str, body: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let outcome = body();
        let elapsed = started.elapsed();
        debug!("Phase {phase} took {elapsed:?}");
        if let Some(timings) = self.timings.as_mut() {
            timings.phases.push((phase, elapsed));
        }
        outcome
    }

    /// Stop sampling and write the timing report.
    pub(crate) fn finish(mut self) -> Result<(), CliError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), CliError> {
        if let Some(sampler) = self.sampler.take() {
            sampler.stop();
        }
        self.timings.take().map_or(Ok(()), PhaseTimings::write)
    }
}

impl Drop for Profiler {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!("Failed to write profile: {err}");
        }
    }
}

#[derive(Debug)]
struct PhaseTimings {
    path: Utf8PathBuf,
    started: Instant,
    phases: Vec<(&'static str, Duration)>,
}

impl PhaseTimings {
    fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            started: Instant::now(),
            phases: Vec::new(),
        }
    }

    fn write(self) -> Result<(), CliError> {
        let total = self.started.elapsed();
        let report = || -> io::Result<()> {
            let mut out = BufWriter::new(geoport_fs::create_file(&self.path)?);
            writeln!(out, "phase\tmillis")?;
            for (phase, elapsed) in &self.phases {
                writeln!(out, "{phase}\t{}", elapsed.as_millis())?;
            }
            writeln!(out, "total\t{}", total.as_millis())?;
            out.flush()
        };
        report().map_err(|source| CliError::Profile {
            path: self.path.clone(),
            source,
        })?;
        info!("Wrote phase timings to {}", self.path);
        Ok(())
    }
}

#[derive(Debug)]
struct MemorySampler {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl MemorySampler {
    fn start(profile: &MemProfile) -> Result<Self, CliError> {
        let to_error = |source| CliError::Profile {
            path: profile.dir.clone(),
            source,
        };
        geoport_fs::ensure_dir(&profile.dir).map_err(to_error)?;
        let (stop, stopped) = mpsc::channel();
        let dir = profile.dir.clone();
        let interval = profile.interval;
        let handle = thread::Builder::new()
            .name("memprofile".into())
            .spawn(move || sample_until_stopped(&dir, interval, &stopped))
            .map_err(to_error)?;
        info!(
            "Sampling memory into {} every {:?}",
            profile.dir, profile.interval
        );
        Ok(Self { stop, handle })
    }

    fn stop(self) {
        if self.stop.send(()).is_err() {
            debug!("Memory sampler already stopped");
        }
        if self.handle.join().is_err() {
            warn!("Memory sampler panicked");
        }
    }
}

fn sample_until_stopped(dir: &Utf8Path, interval: Duration, stopped: &mpsc::Receiver<()>) {
    let pid = match sysinfo::get_current_pid() {
        Ok(pid) => pid,
        Err(err) => {
            warn!("Memory profile unavailable: {err}");
            return;
        }
    };
    let mut system = System::new();
    loop {
        if let Err(err) = write_sample(dir, &mut system, pid) {
            warn!("Stopping memory profile: {err}");
            return;
        }
        match stopped.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn write_sample(dir: &Utf8Path, system: &mut System, pid: Pid) -> io::Result<()> {
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        false,
        ProcessRefreshKind::nothing().with_memory(),
    );
    let process = system.process(pid).ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("process {pid} not found"))
    })?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let path = dir.join(format!(
        "memprofile-{}.{:03}.tsv",
        now.as_secs(),
        now.subsec_millis()
    ));
    let mut out = geoport_fs::create_file(&path)?;
    writeln!(out, "resident_bytes\tvirtual_bytes")?;
    writeln!(out, "{}\t{}", process.memory(), process.virtual_memory())
}
